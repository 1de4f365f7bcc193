//! Writes Lookout for Equipment inference results back onto SiteWise properties.

use chrono::{NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{PipelineError, Result};
use crate::model::{AssetDescription, BatchPutFailure, PropertyValue, PropertyValueEntry};
use crate::sitewise::{chunk_into_entries, put_in_batches, SiteWiseApi};
use crate::storage::ObjectStore;
use crate::throttle::Throttle;

/// Lines read from the head of an inference output file
pub const INFERENCE_LINES: usize = 25;
pub const SENSOR_SCORE_SUFFIX: &str = " L4EScore";
pub const INFERENCE_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

#[derive(Debug, Deserialize)]
pub struct S3Event {
    #[serde(rename = "Records")]
    pub records: Vec<S3EventRecord>,
}

#[derive(Debug, Deserialize)]
pub struct S3EventRecord {
    pub s3: S3Entity,
}

#[derive(Debug, Deserialize)]
pub struct S3Entity {
    pub bucket: S3Bucket,
    pub object: S3Object,
}

#[derive(Debug, Deserialize)]
pub struct S3Bucket {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct S3Object {
    pub key: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct InferenceResult {
    pub timestamp: String,
    pub prediction: f64,
    #[serde(default)]
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Diagnostic {
    pub name: String,
    pub value: f64,
}

impl Diagnostic {
    /// Diagnostic names look like `component\sensor`
    pub fn sensor_name(&self) -> &str {
        self.name.split('\\').nth(1).unwrap_or(&self.name)
    }
}

#[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct WritebackSummary {
    pub files: usize,
    pub asset_values: usize,
    pub sensor_values: usize,
    pub skipped_sensors: usize,
    pub failed_entries: usize,
}

/// S3 event keys are form-encoded: `+` is a space.
pub fn decode_key(key: &str) -> Result<String> {
    urlencoding::decode(&key.replace('+', " "))
        .map(|k| k.into_owned())
        .map_err(|e| PipelineError::Decode(format!("object key {}: {}", key, e)))
}

/// Inference output is written under `{asset_id}/inference-data/output/...`
pub fn asset_id_from_key(key: &str) -> Result<&str> {
    key.split('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .ok_or_else(|| PipelineError::Decode(format!("no asset id in key {}", key)))
}

pub fn parse_inference_output(body: &[u8]) -> Result<Vec<InferenceResult>> {
    let text = std::str::from_utf8(body)
        .map_err(|e| PipelineError::Decode(format!("UTF-8 decode failed: {}", e)))?;
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .take(INFERENCE_LINES)
        .map(|line| serde_json::from_str(line).map_err(PipelineError::from))
        .collect()
}

/// Inference timestamps carry no zone; they are UTC.
pub fn parse_timestamp(raw: &str) -> Result<i64> {
    let trimmed = raw.trim().trim_end_matches('Z');
    let naive = NaiveDateTime::parse_from_str(trimmed, INFERENCE_TIMESTAMP_FORMAT)
        .map_err(|e| PipelineError::Decode(format!("timestamp {}: {}", raw, e)))?;
    Ok(Utc.from_utc_datetime(&naive).timestamp())
}

pub fn asset_score_values(results: &[InferenceResult]) -> Result<Vec<PropertyValue>> {
    results
        .iter()
        .map(|r| Ok(PropertyValue::good(r.prediction, parse_timestamp(&r.timestamp)?)))
        .collect()
}

/// Per-sensor scores for every result flagged anomalous, as
/// (`"{sensor} L4EScore"`, value) pairs.
pub fn sensor_score_values(results: &[InferenceResult]) -> Result<Vec<(String, PropertyValue)>> {
    let mut values = Vec::new();
    for result in results.iter().filter(|r| r.prediction == 1.0) {
        let timestamp = parse_timestamp(&result.timestamp)?;
        for diagnostic in &result.diagnostics {
            values.push((
                format!("{}{}", diagnostic.sensor_name(), SENSOR_SCORE_SUFFIX),
                PropertyValue::good(diagnostic.value, timestamp),
            ));
        }
    }
    Ok(values)
}

fn sensor_entries(
    description: &AssetDescription,
    values: Vec<(String, PropertyValue)>,
    summary: &mut WritebackSummary,
) -> Vec<PropertyValueEntry> {
    let mut entries = Vec::with_capacity(values.len());
    for (property_name, value) in values {
        let Some(property) = description.property_named(&property_name) else {
            warn!(
                "Asset {} has no property {}, skipping",
                description.id, property_name
            );
            summary.skipped_sensors += 1;
            continue;
        };
        entries.push(PropertyValueEntry {
            entry_id: format!("sensor-{}", entries.len()),
            asset_id: description.id.clone(),
            property_id: property.id.clone(),
            values: vec![value],
        });
    }
    entries
}

fn log_failures(failures: &[BatchPutFailure]) {
    for failure in failures {
        warn!(
            "Entry {} rejected: {} {}",
            failure.entry_id, failure.code, failure.message
        );
    }
}

/// Write the asset score and, for anomalous results, per-sensor scores.
pub async fn write_scores(
    sitewise: &dyn SiteWiseApi,
    throttle: &Throttle,
    asset_id: &str,
    asset_score_property: &str,
    results: &[InferenceResult],
) -> Result<WritebackSummary> {
    let mut summary = WritebackSummary::default();
    let description = throttle.call(|| sitewise.describe_asset(asset_id)).await?;

    let asset_property = description
        .property_named(asset_score_property)
        .ok_or_else(|| {
            PipelineError::Missing(format!("property {} on asset {}", asset_score_property, asset_id))
        })?;
    let asset_values = asset_score_values(results)?;
    summary.asset_values = asset_values.len();

    let entries = chunk_into_entries("asset-", asset_id, &asset_property.id, asset_values);
    let failures = put_in_batches(sitewise, throttle, entries).await?;
    log_failures(&failures);
    summary.failed_entries += failures.len();

    let sensor_values = sensor_score_values(results)?;
    let entries = sensor_entries(&description, sensor_values, &mut summary);
    summary.sensor_values = entries.len();
    let failures = put_in_batches(sitewise, throttle, entries).await?;
    log_failures(&failures);
    summary.failed_entries += failures.len();

    Ok(summary)
}

/// Handle every object in an S3 notification.
pub async fn process_event(
    sitewise: &dyn SiteWiseApi,
    store: &dyn ObjectStore,
    throttle: &Throttle,
    asset_score_property: &str,
    event: &S3Event,
) -> Result<WritebackSummary> {
    let mut total = WritebackSummary::default();

    for record in &event.records {
        let bucket = &record.s3.bucket.name;
        let key = decode_key(&record.s3.object.key)?;
        let asset_id = asset_id_from_key(&key)?;

        let body = throttle.call(|| store.get_object(bucket, &key)).await?;
        let results = parse_inference_output(&body)?;
        info!(
            "Read {} inference results from s3://{}/{}",
            results.len(),
            bucket,
            key
        );

        let summary = write_scores(sitewise, throttle, asset_id, asset_score_property, &results).await?;
        total.files += 1;
        total.asset_values += summary.asset_values;
        total.sensor_values += summary.sensor_values;
        total.skipped_sensors += summary.skipped_sensors;
        total.failed_entries += summary.failed_entries;
    }

    info!("Score write-back completed: {:?}", total);
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{property, throttling, FakeSiteWise, MemoryStore};
    use crate::throttle::{RateLimiter, RetryPolicy};
    use serde_json::json;
    use std::time::Duration;

    fn throttle() -> Throttle {
        Throttle::new(
            RateLimiter::new(20, Duration::from_secs(1)),
            RetryPolicy::default(),
        )
    }

    const OUTPUT: &str = r#"{"timestamp": "2022-06-09T15:05:00.000000", "prediction": 0, "diagnostics": [{"name": "engine\\Sensor0", "value": 0.1}, {"name": "engine\\Sensor1", "value": 0.9}]}
{"timestamp": "2022-06-09T15:06:00.000000", "prediction": 1, "diagnostics": [{"name": "engine\\Sensor0", "value": 0.25}, {"name": "engine\\Sensor1", "value": 0.75}, {"name": "engine\\Sensor7", "value": 0.0}]}
"#;

    fn engine() -> FakeSiteWise {
        let mut fake = FakeSiteWise::default();
        fake.add_asset(
            "engine-model",
            "engine-0",
            vec![
                property("asset-score", "AssetL4EScore"),
                property("s0", "Sensor0 L4EScore"),
                property("s1", "Sensor1 L4EScore"),
            ],
        );
        fake
    }

    fn event(key: &str) -> S3Event {
        serde_json::from_value(json!({
            "Records": [{
                "eventSource": "aws:s3",
                "s3": {
                    "bucket": {"name": "l4e-bucket", "arn": "arn:aws:s3:::l4e-bucket"},
                    "object": {"key": key, "size": 1024}
                }
            }]
        }))
        .unwrap()
    }

    #[test]
    fn test_decode_key() {
        assert_eq!(
            decode_key("engine-0/inference-data/output/2022-06-09+15%3A05%3A00/results.jsonl").unwrap(),
            "engine-0/inference-data/output/2022-06-09 15:05:00/results.jsonl"
        );
    }

    #[test]
    fn test_asset_id_from_key() {
        assert_eq!(asset_id_from_key("abc/inference-data/output/x.jsonl").unwrap(), "abc");
        assert!(asset_id_from_key("/leading-slash").is_err());
    }

    #[test]
    fn test_parse_timestamp_variants() {
        let expected = Utc.with_ymd_and_hms(2022, 6, 9, 15, 5, 0).unwrap().timestamp();
        assert_eq!(parse_timestamp("2022-06-09T15:05:00.000000").unwrap(), expected);
        assert_eq!(parse_timestamp("2022-06-09T15:05:00").unwrap(), expected);
        assert_eq!(parse_timestamp("2022-06-09T15:05:00.123Z").unwrap(), expected);
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn test_parse_inference_output_takes_first_lines() {
        let mut body = String::new();
        for minute in 0..30 {
            body.push_str(&format!(
                "{{\"timestamp\": \"2022-06-09T15:{:02}:00.000000\", \"prediction\": 0}}\n",
                minute
            ));
        }
        let results = parse_inference_output(body.as_bytes()).unwrap();
        assert_eq!(results.len(), INFERENCE_LINES);
        assert!(results[0].diagnostics.is_empty());
    }

    #[test]
    fn test_sensor_scores_only_for_anomalies() {
        let results = parse_inference_output(OUTPUT.as_bytes()).unwrap();
        let values = sensor_score_values(&results).unwrap();

        let names: Vec<&str> = values.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(
            names,
            vec!["Sensor0 L4EScore", "Sensor1 L4EScore", "Sensor7 L4EScore"]
        );
        assert_eq!(values[1].1.value, 0.75);
    }

    #[test]
    fn test_diagnostic_without_component_uses_whole_name() {
        let diagnostic = Diagnostic {
            name: "Sensor3".to_string(),
            value: 0.5,
        };
        assert_eq!(diagnostic.sensor_name(), "Sensor3");
    }

    #[tokio::test(start_paused = true)]
    async fn test_process_event_writes_asset_and_sensor_scores() {
        let fake = engine();
        let store = MemoryStore::default();
        store.insert(
            "l4e-bucket",
            "engine-0/inference-data/output/results.jsonl",
            OUTPUT,
        );

        let summary = process_event(
            &fake,
            &store,
            &throttle(),
            "AssetL4EScore",
            &event("engine-0/inference-data/output/results.jsonl"),
        )
        .await
        .unwrap();

        assert_eq!(summary.files, 1);
        assert_eq!(summary.asset_values, 2);
        assert_eq!(summary.sensor_values, 2);
        assert_eq!(summary.skipped_sensors, 1);

        let batches = fake.batches();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), 1);
        assert_eq!(batches[0][0].property_id, "asset-score");
        assert_eq!(batches[0][0].values[1].value, 1.0);
        assert_eq!(batches[1][1].property_id, "s1");
        assert_eq!(batches[1][1].values[0].value, 0.75);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttled_describe_and_put_are_retried() {
        let fake = engine();
        fake.fail_next_call("describe_asset", throttling());
        fake.fail_next_call("batch_put_asset_property_value", throttling());
        let results = parse_inference_output(OUTPUT.as_bytes()).unwrap();

        let summary = write_scores(&fake, &throttle(), "engine-0", "AssetL4EScore", &results)
            .await
            .unwrap();

        assert_eq!(summary.asset_values, 2);
        assert_eq!(summary.sensor_values, 2);
        assert_eq!(fake.calls_to("describe_asset"), 2);
        assert_eq!(fake.calls_to("batch_put_asset_property_value"), 3);
        assert_eq!(fake.batches().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_many_anomalies_are_sent_in_batches_of_ten() {
        let fake = engine();
        let results: Vec<InferenceResult> = (0..12)
            .map(|minute| InferenceResult {
                timestamp: format!("2022-06-09T15:{:02}:00.000000", minute),
                prediction: 1.0,
                diagnostics: vec![Diagnostic {
                    name: "engine\\Sensor0".to_string(),
                    value: 0.5,
                }],
            })
            .collect();

        let summary = write_scores(&fake, &throttle(), "engine-0", "AssetL4EScore", &results)
            .await
            .unwrap();
        assert_eq!(summary.sensor_values, 12);

        let batches = fake.batches();
        // asset score: 12 values in two entries; sensors: 12 entries in 10 + 2
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].len(), 2);
        assert_eq!(batches[1].len(), 10);
        assert_eq!(batches[2].len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_entries_are_counted() {
        let mut fake = engine();
        fake.rejected_entries.push("s0".to_string());
        let results = parse_inference_output(OUTPUT.as_bytes()).unwrap();

        let summary = write_scores(&fake, &throttle(), "engine-0", "AssetL4EScore", &results)
            .await
            .unwrap();
        assert_eq!(summary.failed_entries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_asset_score_property_fails() {
        let fake = engine();
        let err = write_scores(&fake, &throttle(), "engine-0", "AVGL4EScore", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Missing(_)));
    }
}
