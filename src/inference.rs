//! Scheduled query runner producing Lookout for Equipment inference input.
//!
//! Athena materialises a per-asset pivot view over the flattened telemetry; the
//! runner re-queries it, resamples the result to one row per minute and drops the
//! five most recent minutes where the inference scheduler picks them up.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::athena::{NamedQuery, QueryEngine, QueryState};
use crate::config::QuerySettings;
use crate::error::{PipelineError, Result};
use crate::storage::ObjectStore;
use crate::throttle::Throttle;

pub const RESULT_PREFIX: &str = "athenaquery/";
pub const TIMESTAMP_COLUMN: &str = "Timestamp";
pub const OUTPUT_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";
pub const INFERENCE_ROWS: usize = 5;
/// Inference file names are stamped this far in the past
pub const STAMP_LAG_MINUTES: i64 = 6;

const INPUT_TIMESTAMP_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct InferenceScheduleRequest {
    pub asset_name: String,
    pub athena_output_bucket: String,
    pub view_query_id: String,
    pub l4e_bucket: String,
    #[serde(rename = "assetId")]
    pub asset_id: String,
    pub work_group: String,
    pub database: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct InferenceScheduleResponse {
    pub query_execution_id: String,
    pub view_created: bool,
    pub input_key: String,
    pub rows: usize,
}

/// Query result keyed by timestamp column, one optional value per sensor column
#[derive(Debug, Clone, PartialEq)]
pub struct SensorTable {
    pub columns: Vec<String>,
    pub rows: Vec<(NaiveDateTime, Vec<Option<f64>>)>,
}

fn parse_result_timestamp(raw: &str) -> Result<NaiveDateTime> {
    let trimmed = raw.trim();
    INPUT_TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(trimmed, format).ok())
        .ok_or_else(|| PipelineError::Decode(format!("unparseable timestamp {}", raw)))
}

fn parse_cell(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|v| !v.is_nan())
}

/// Parse an Athena result CSV. Cells that are blank or not numeric count as missing.
pub fn parse_query_result(body: &[u8]) -> Result<SensorTable> {
    let mut reader = csv::ReaderBuilder::new().from_reader(body);
    let headers = reader.headers()?.clone();

    let timestamp_index = headers
        .iter()
        .position(|h| h == TIMESTAMP_COLUMN)
        .ok_or_else(|| PipelineError::Missing(format!("{} column in query result", TIMESTAMP_COLUMN)))?;
    let columns: Vec<String> = headers
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != timestamp_index)
        .map(|(_, h)| h.to_string())
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let timestamp = parse_result_timestamp(record.get(timestamp_index).unwrap_or_default())?;
        let values = record
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != timestamp_index)
            .map(|(_, cell)| parse_cell(cell))
            .collect();
        rows.push((timestamp, values));
    }

    Ok(SensorTable { columns, rows })
}

impl SensorTable {
    /// Sort by time and carry each column's last seen value into later gaps.
    pub fn forward_filled(mut self) -> Self {
        self.rows.sort_by_key(|(timestamp, _)| *timestamp);
        let mut last: Vec<Option<f64>> = vec![None; self.columns.len()];
        for (_, values) in self.rows.iter_mut() {
            for (slot, value) in last.iter_mut().zip(values.iter_mut()) {
                match value {
                    Some(v) => *slot = Some(*v),
                    None => *value = *slot,
                }
            }
        }
        self
    }

    /// Mean per column per minute. Every minute between the first and last row
    /// gets a bucket; minutes without data stay empty.
    pub fn resampled_by_minute(&self) -> Self {
        let mut buckets: BTreeMap<NaiveDateTime, Vec<(f64, usize)>> = BTreeMap::new();
        for (timestamp, values) in &self.rows {
            let bucket = buckets
                .entry(floor_to_minute(*timestamp))
                .or_insert_with(|| vec![(0.0, 0); self.columns.len()]);
            for (acc, value) in bucket.iter_mut().zip(values) {
                if let Some(v) = value {
                    acc.0 += v;
                    acc.1 += 1;
                }
            }
        }

        let (Some(first), Some(last)) = (
            buckets.keys().next().copied(),
            buckets.keys().next_back().copied(),
        ) else {
            return Self {
                columns: self.columns.clone(),
                rows: Vec::new(),
            };
        };

        let mut rows = Vec::new();
        let mut minute = first;
        while minute <= last {
            let values = match buckets.get(&minute) {
                Some(acc) => acc
                    .iter()
                    .map(|(sum, count)| (*count > 0).then(|| sum / *count as f64))
                    .collect(),
                None => vec![None; self.columns.len()],
            };
            rows.push((minute, values));
            minute += ChronoDuration::minutes(1);
        }

        Self {
            columns: self.columns.clone(),
            rows,
        }
    }

    /// The `n` most recent rows, newest first
    pub fn latest(&self, n: usize) -> Self {
        let mut rows = self.rows.clone();
        rows.sort_by(|a, b| b.0.cmp(&a.0));
        rows.truncate(n);
        Self {
            columns: self.columns.clone(),
            rows,
        }
    }

    pub fn to_csv(&self) -> Result<String> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        let mut header = vec![TIMESTAMP_COLUMN.to_string()];
        header.extend(self.columns.iter().cloned());
        writer.write_record(&header)?;

        for (timestamp, values) in &self.rows {
            let mut record = vec![timestamp.format(OUTPUT_TIMESTAMP_FORMAT).to_string()];
            record.extend(values.iter().map(|v| match v {
                Some(v) => format!("{:?}", v),
                None => String::new(),
            }));
            writer.write_record(&record)?;
        }

        let bytes = writer
            .into_inner()
            .map_err(|e| PipelineError::Decode(format!("CSV flush failed: {}", e)))?;
        String::from_utf8(bytes).map_err(|e| PipelineError::Decode(e.to_string()))
    }
}

fn floor_to_minute(timestamp: NaiveDateTime) -> NaiveDateTime {
    timestamp
        .with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(timestamp)
}

/// Five most recent per-minute rows, ready for the inference scheduler
pub fn build_inference_input(result_csv: &[u8]) -> Result<SensorTable> {
    let table = parse_query_result(result_csv)?;
    Ok(table
        .forward_filled()
        .resampled_by_minute()
        .latest(INFERENCE_ROWS))
}

pub fn inference_input_key(asset_id: &str, asset_name: &str, now: DateTime<Utc>) -> String {
    let stamp = (now - ChronoDuration::minutes(STAMP_LAG_MINUTES)).format("%Y%m%d%H%M00");
    format!("{}/inference-data/input/{}_{}.csv", asset_id, asset_name, stamp)
}

/// Athena and S3 calls all go through `throttle`
pub struct QueryRunner<'a> {
    engine: &'a dyn QueryEngine,
    store: &'a dyn ObjectStore,
    throttle: Throttle,
    settings: QuerySettings,
}

impl<'a> QueryRunner<'a> {
    pub fn new(
        engine: &'a dyn QueryEngine,
        store: &'a dyn ObjectStore,
        throttle: Throttle,
        settings: QuerySettings,
    ) -> Self {
        Self {
            engine,
            store,
            throttle,
            settings,
        }
    }

    /// Poll until the query finishes; anything but success is an error.
    pub async fn wait_for(&self, query_execution_id: &str) -> Result<()> {
        let deadline = Instant::now() + self.settings.timeout;
        loop {
            let state = self
                .throttle
                .call(|| self.engine.query_state(query_execution_id))
                .await?;
            match state {
                QueryState::Succeeded => return Ok(()),
                QueryState::Failed(reason) => {
                    return Err(PipelineError::Query {
                        query_id: query_execution_id.to_string(),
                        reason,
                    })
                }
                QueryState::Cancelled => {
                    return Err(PipelineError::Query {
                        query_id: query_execution_id.to_string(),
                        reason: "cancelled".to_string(),
                    })
                }
                state => debug!("Query {} is {:?}", query_execution_id, state),
            }
            if Instant::now() >= deadline {
                return Err(PipelineError::Query {
                    query_id: query_execution_id.to_string(),
                    reason: format!("still running after {:?}", self.settings.timeout),
                });
            }
            sleep(self.settings.poll_interval).await;
        }
    }

    /// Create the view from its named query when the work group has never run anything.
    async fn ensure_view(
        &self,
        request: &InferenceScheduleRequest,
        named_query: &NamedQuery,
        output_location: &str,
    ) -> Result<bool> {
        let executions = self
            .throttle
            .call(|| self.engine.list_query_executions(&request.work_group, 1))
            .await?;
        info!("List Query Executions: {:?}", executions);
        if !executions.is_empty() {
            return Ok(false);
        }

        let id = self
            .throttle
            .call(|| {
                self.engine.start_query_execution(
                    &named_query.query_string,
                    &request.database,
                    output_location,
                )
            })
            .await?;
        info!("Create View: {}", id);
        self.wait_for(&id).await?;
        Ok(true)
    }

    pub async fn run(
        &self,
        request: &InferenceScheduleRequest,
        now: DateTime<Utc>,
    ) -> Result<InferenceScheduleResponse> {
        let output_location = format!("s3://{}/{}", request.athena_output_bucket, RESULT_PREFIX);
        let named_query = self
            .throttle
            .call(|| self.engine.get_named_query(&request.view_query_id))
            .await?;
        let view_created = self.ensure_view(request, &named_query, &output_location).await?;

        info!("Named Query: {}", named_query.name);
        let query = format!("SELECT * FROM {}.{}", request.database, named_query.name);
        info!("Query: {}", query);
        let query_id = self
            .throttle
            .call(|| {
                self.engine
                    .start_query_execution(&query, &request.database, &output_location)
            })
            .await?;
        self.wait_for(&query_id).await?;

        let result_key = format!("{}{}.csv", RESULT_PREFIX, query_id);
        let result = self
            .throttle
            .call(|| self.store.get_object(&request.athena_output_bucket, &result_key))
            .await?;
        let table = build_inference_input(&result)?;
        if table.rows.is_empty() {
            warn!("Query {} returned no rows for {}", query_id, request.asset_name);
        }

        let input_key = inference_input_key(&request.asset_id, &request.asset_name, now);
        let body = table.to_csv()?.into_bytes();
        self.throttle
            .call(|| {
                self.store.put_object(
                    &request.l4e_bucket,
                    &input_key,
                    body.clone(),
                    Some("text/csv"),
                )
            })
            .await?;

        let metadata_key = format!("{}.metadata", result_key);
        for key in [&result_key, &metadata_key] {
            self.throttle
                .call(|| self.store.delete_object(&request.athena_output_bucket, key))
                .await?;
        }

        Ok(InferenceScheduleResponse {
            query_execution_id: query_id,
            view_created,
            input_key,
            rows: table.rows.len(),
        })
    }
}
