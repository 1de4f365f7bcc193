//! Synthetic data ingestion: replays canned sensor series into SiteWise.
//!
//! Each invocation covers the last minute. Values are drawn between two
//! neighbouring canned points, and the position in the canned series slides
//! forward with wall-clock minutes so consecutive runs walk through the data.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::ThrottleSettings;
use crate::error::{PipelineError, Result};
use crate::model::{PropertyValue, PropertyValueEntry};
use crate::sitewise::SiteWiseApi;
use crate::storage::ObjectStore;
use crate::throttle::Throttle;

pub const MAX_ENTRIES_IN_BATCH: usize = 1;
pub const NUM_VALUES_PER_ENTRY: i64 = 10;
pub const SECONDS_PER_MINUTE: i64 = 60;
pub const UPLOAD_WINDOW_SECONDS: i64 = 60;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IngestRequest {
    pub asset_id: String,
    pub asset_data_bucket: String,
    pub asset_data_path: String,
    pub property_to_put_data: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct IngestSummary {
    pub asset_id: String,
    pub property_name: String,
    pub entries_sent: usize,
    pub values_sent: usize,
    pub failed_entries: usize,
}

/// Lookups run under the standard ceiling; batch puts are held to one per period
#[derive(Debug, Clone)]
pub struct IngestThrottles {
    pub lookups: Throttle,
    pub puts: Throttle,
}

impl IngestThrottles {
    pub fn from_settings(settings: &ThrottleSettings) -> Self {
        Self {
            lookups: settings.standard(),
            puts: settings.ingest_puts(),
        }
    }
}

/// Time window and series position for one invocation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IngestWindow {
    pub start_time_seconds: i64,
    pub base_offset: usize,
    pub num_entries: usize,
}

impl IngestWindow {
    pub fn ending_at(now: DateTime<Utc>) -> Self {
        let start_time_seconds = now.timestamp() - UPLOAD_WINDOW_SECONDS;
        Self {
            start_time_seconds,
            base_offset: start_time_seconds.div_euclid(SECONDS_PER_MINUTE) as usize,
            num_entries: (UPLOAD_WINDOW_SECONDS / NUM_VALUES_PER_ENTRY) as usize,
        }
    }
}

/// The two canned points bracketing the value for an entry starting
/// `seconds_since_start` into the window. Wraps at the end of the series.
pub fn value_range(series: &[f64], base_offset: usize, seconds_since_start: i64) -> (f64, f64) {
    let minutes_since_start = (seconds_since_start / SECONDS_PER_MINUTE) as usize;
    let low = (base_offset + minutes_since_start) % series.len();
    let high = (low + 1) % series.len();
    (series[low], series[high])
}

fn value_in_range(range: (f64, f64), rng: &mut impl Rng) -> f64 {
    let (low, high) = if range.0 <= range.1 {
        range
    } else {
        (range.1, range.0)
    };
    if low == high {
        low
    } else {
        rng.gen_range(low..=high)
    }
}

/// Lay out all batches for the window. `series` must not be empty.
pub fn build_batches(
    asset_id: &str,
    property_id: &str,
    series: &[f64],
    window: &IngestWindow,
    rng: &mut impl Rng,
) -> Vec<Vec<PropertyValueEntry>> {
    let num_batches = window.num_entries.div_ceil(MAX_ENTRIES_IN_BATCH);
    let mut batches = Vec::with_capacity(num_batches);

    for batch_number in 0..num_batches {
        let mut batch = Vec::with_capacity(MAX_ENTRIES_IN_BATCH);
        for entry_id in 0..MAX_ENTRIES_IN_BATCH {
            let seconds_since_start = (batch_number * MAX_ENTRIES_IN_BATCH) as i64
                * NUM_VALUES_PER_ENTRY
                + entry_id as i64 * NUM_VALUES_PER_ENTRY;
            let range = value_range(series, window.base_offset, seconds_since_start);

            let values = (0..NUM_VALUES_PER_ENTRY)
                .map(|second| {
                    PropertyValue::good(
                        value_in_range(range, rng),
                        window.start_time_seconds + seconds_since_start + second,
                    )
                })
                .collect();

            batch.push(PropertyValueEntry {
                entry_id: entry_id.to_string(),
                asset_id: asset_id.to_string(),
                property_id: property_id.to_string(),
                values,
            });

            if batch_number * MAX_ENTRIES_IN_BATCH + batch.len() == window.num_entries {
                break;
            }
        }
        batches.push(batch);
    }

    batches
}

/// Replay one property's canned series for the minute before `now`.
pub async fn ingest(
    sitewise: &dyn SiteWiseApi,
    store: &dyn ObjectStore,
    throttles: &IngestThrottles,
    request: &IngestRequest,
    now: DateTime<Utc>,
    rng: &mut (impl Rng + Send),
) -> Result<IngestSummary> {
    info!("property_to_put_data: {}", request.property_to_put_data);

    let description = throttles
        .lookups
        .call(|| sitewise.describe_asset(&request.asset_id))
        .await?;
    let raw = throttles
        .lookups
        .call(|| store.get_object(&request.asset_data_bucket, &request.asset_data_path))
        .await?;
    let asset_data: HashMap<String, Vec<f64>> = serde_json::from_slice(&raw)?;

    let property = description
        .property_named(&request.property_to_put_data)
        .ok_or_else(|| {
            PipelineError::Missing(format!(
                "property {} on asset {}",
                request.property_to_put_data, request.asset_id
            ))
        })?;
    let series = asset_data
        .get(&property.name)
        .filter(|series| !series.is_empty())
        .ok_or_else(|| {
            PipelineError::Missing(format!(
                "canned values for {} in s3://{}/{}",
                property.name, request.asset_data_bucket, request.asset_data_path
            ))
        })?;

    let window = IngestWindow::ending_at(now);
    let batches = build_batches(&request.asset_id, &property.id, series, &window, rng);

    let mut summary = IngestSummary {
        asset_id: request.asset_id.clone(),
        property_name: property.name.clone(),
        entries_sent: 0,
        values_sent: 0,
        failed_entries: 0,
    };

    for batch in batches {
        let entries = batch.len();
        let values: usize = batch.iter().map(|e| e.values.len()).sum();

        let failures = throttles
            .puts
            .call(|| sitewise.batch_put_asset_property_value(batch.clone()))
            .await?;
        for failure in &failures {
            warn!(
                "Entry {} rejected: {} {}",
                failure.entry_id, failure.code, failure.message
            );
        }

        summary.entries_sent += entries;
        summary.values_sent += values;
        summary.failed_entries += failures.len();
    }

    info!(
        "Ingested {} values into {} on asset {}",
        summary.values_sent, summary.property_name, summary.asset_id
    );
    Ok(summary)
}
