//! Firehose transform that flattens SiteWise property-value updates into queryable rows.

use base64::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::error::{PipelineError, Result};

pub const RESULT_OK: &str = "Ok";
pub const RESULT_PROCESSING_FAILED: &str = "ProcessingFailed";

#[derive(Debug, Deserialize)]
pub struct FirehoseEvent {
    pub records: Vec<FirehoseRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirehoseRecord {
    #[serde(rename = "recordId")]
    pub record_id: String,
    pub data: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FirehoseResponse {
    pub records: Vec<FirehoseResult>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct FirehoseResult {
    #[serde(rename = "recordId")]
    pub record_id: String,
    pub result: String,
    pub data: String,
}

/// SiteWise notification envelope (`$aws/sitewise/.../properties/+` topic)
#[derive(Debug, Deserialize)]
pub struct PropertyUpdate {
    #[serde(rename = "type")]
    pub update_type: String,
    pub payload: PropertyUpdatePayload,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyUpdatePayload {
    pub asset_id: String,
    pub property_id: String,
    #[serde(default)]
    pub values: Vec<Value>,
}

/// One flattened time-series row as written to the data lake
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlatRow {
    #[serde(rename = "type")]
    pub update_type: String,
    pub asset_id: String,
    pub asset_property_id: String,
    pub time_in_seconds: i64,
    pub offset_in_nanos: i64,
    pub asset_property_quality: String,
    pub asset_property_value: String,
    pub asset_property_data_type: String,
}

/// Pick the value out of a SiteWise variant. When several keys are present the
/// last of double, integer, boolean, string wins.
pub fn extract_value_and_type(variant: &Value) -> Option<(String, &'static str)> {
    let mut found = None;
    if let Some(v) = variant.get("doubleValue") {
        found = Some((scalar_to_string(v), "double"));
    }
    if let Some(v) = variant.get("integerValue") {
        found = Some((scalar_to_string(v), "integer"));
    }
    if let Some(v) = variant.get("booleanValue") {
        found = Some((scalar_to_string(v), "boolean"));
    }
    if let Some(v) = variant.get("stringValue") {
        found = Some((scalar_to_string(v), "string"));
    }
    found
}

/// Values are written the way downstream queries were first fed them:
/// `True`/`False`, `None`, and Python float repr.
fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Null => "None".to_string(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() => float_repr(f),
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}

/// Shortest round-trip digits, in exponent form below 1e-4 or from 1e16 up,
/// with a signed exponent of at least two digits.
fn float_repr(f: f64) -> String {
    if f.is_nan() {
        return "nan".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf" } else { "-inf" }.to_string();
    }

    let scientific = format!("{:e}", f);
    let (mantissa, exponent) = match scientific.split_once('e') {
        Some((mantissa, exponent)) => (mantissa, exponent.parse::<i32>().unwrap_or(0)),
        None => (scientific.as_str(), 0),
    };

    if (-4..16).contains(&exponent) {
        let fixed = format!("{}", f);
        if fixed.contains('.') {
            fixed
        } else {
            format!("{}.0", fixed)
        }
    } else {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", mantissa, sign, exponent.abs())
    }
}

fn flatten_value(update: &PropertyUpdate, value: &Value) -> Option<FlatRow> {
    let timestamp = value.get("timestamp")?;
    let time_in_seconds = timestamp.get("timeInSeconds")?.as_i64()?;
    let offset_in_nanos = timestamp.get("offsetInNanos")?.as_i64()?;
    let quality = value.get("quality")?.as_str()?;
    let (property_value, data_type) = extract_value_and_type(value.get("value")?)?;

    Some(FlatRow {
        update_type: update.update_type.clone(),
        asset_id: update.payload.asset_id.clone(),
        asset_property_id: update.payload.property_id.clone(),
        time_in_seconds,
        offset_in_nanos,
        asset_property_quality: quality.to_string(),
        asset_property_value: property_value,
        asset_property_data_type: data_type.to_string(),
    })
}

/// Flatten every value of one update. Malformed values are skipped.
pub fn flatten(update: &PropertyUpdate) -> Vec<FlatRow> {
    update
        .payload
        .values
        .iter()
        .filter_map(|value| {
            let row = flatten_value(update, value);
            if row.is_none() {
                warn!(
                    "Skipping malformed value for asset {} property {}: {}",
                    update.payload.asset_id, update.payload.property_id, value
                );
            }
            row
        })
        .collect()
}

pub fn decode_update(data: &str) -> Result<PropertyUpdate> {
    let bytes = BASE64_STANDARD
        .decode(data)
        .map_err(|e| PipelineError::Decode(format!("Base64 decode failed: {}", e)))?;
    Ok(serde_json::from_slice(&bytes)?)
}

pub fn encode_rows(rows: &[FlatRow]) -> Result<String> {
    let lines = rows
        .iter()
        .map(serde_json::to_string)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(BASE64_STANDARD.encode(lines.join("\n")))
}

/// Transform one delivery-stream record. Undecodable records are handed back
/// untouched and marked failed so Firehose routes them to its error prefix.
pub fn transform_record(record: &FirehoseRecord) -> FirehoseResult {
    let outcome = decode_update(&record.data).and_then(|update| encode_rows(&flatten(&update)));
    match outcome {
        Ok(data) => FirehoseResult {
            record_id: record.record_id.clone(),
            result: RESULT_OK.to_string(),
            data,
        },
        Err(e) => {
            warn!("Record {} failed: {}", record.record_id, e);
            FirehoseResult {
                record_id: record.record_id.clone(),
                result: RESULT_PROCESSING_FAILED.to_string(),
                data: record.data.clone(),
            }
        }
    }
}

pub fn transform_batch(event: &FirehoseEvent) -> FirehoseResponse {
    let records: Vec<FirehoseResult> = event.records.iter().map(transform_record).collect();
    let failed = records
        .iter()
        .filter(|r| r.result != RESULT_OK)
        .count();
    info!(
        "Successfully processed {} records ({} failed)",
        records.len() - failed,
        failed
    );
    FirehoseResponse { records }
}
