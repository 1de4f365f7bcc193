//! IoT SiteWise access behind a trait so handlers can run against fakes.

use async_trait::async_trait;
use aws_sdk_iotsitewise::error::BuildError;
use aws_sdk_iotsitewise::types::{
    AssetPropertyValue, PutAssetPropertyValueEntry, Quality as SdkQuality, TimeInNanos, Variant,
};
use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::model::{
    AssetDescription, AssetModelPropertySummary, AssetModelSummary, AssetProperty, AssetSummary,
    BatchPutFailure, Page, PropertyValueEntry, Quality,
};
use crate::throttle::Throttle;

const SERVICE: &str = "iotsitewise";

/// Page size for the list calls
pub const PAGE_SIZE: i32 = 250;

/// Maximum entries accepted by one `BatchPutAssetPropertyValue` call
pub const MAX_BATCH_PUT_ENTRIES: usize = 10;

/// Maximum values accepted per entry
pub const MAX_VALUES_PER_ENTRY: usize = 10;

#[async_trait]
pub trait SiteWiseApi: Send + Sync {
    async fn list_asset_models(&self, next_token: Option<String>)
        -> Result<Page<AssetModelSummary>>;

    async fn list_assets(
        &self,
        asset_model_id: &str,
        next_token: Option<String>,
    ) -> Result<Page<AssetSummary>>;

    async fn describe_asset(&self, asset_id: &str) -> Result<AssetDescription>;

    async fn list_asset_model_properties(
        &self,
        asset_model_id: &str,
        next_token: Option<String>,
    ) -> Result<Page<AssetModelPropertySummary>>;

    /// Returns the entries SiteWise rejected; an empty vec means every entry landed.
    async fn batch_put_asset_property_value(
        &self,
        entries: Vec<PropertyValueEntry>,
    ) -> Result<Vec<BatchPutFailure>>;
}

/// `SiteWiseApi` over the AWS SDK client
#[derive(Debug, Clone)]
pub struct SiteWiseClient {
    client: aws_sdk_iotsitewise::Client,
}

impl SiteWiseClient {
    pub fn new(client: aws_sdk_iotsitewise::Client) -> Self {
        Self { client }
    }

    pub fn from_conf(config: &aws_types::SdkConfig) -> Self {
        Self::new(aws_sdk_iotsitewise::Client::new(config))
    }
}

fn build_error(err: BuildError) -> PipelineError {
    PipelineError::Build(err.to_string())
}

fn sdk_quality(quality: Quality) -> SdkQuality {
    match quality {
        Quality::Good => SdkQuality::Good,
        Quality::Bad => SdkQuality::Bad,
        Quality::Uncertain => SdkQuality::Uncertain,
    }
}

fn sdk_entry(entry: PropertyValueEntry) -> Result<PutAssetPropertyValueEntry> {
    let mut values = Vec::with_capacity(entry.values.len());
    for value in entry.values {
        let timestamp = TimeInNanos::builder()
            .time_in_seconds(value.time_in_seconds)
            .offset_in_nanos(value.offset_in_nanos)
            .build()
            .map_err(build_error)?;
        let property_value = AssetPropertyValue::builder()
            .value(Variant::builder().double_value(value.value).build())
            .timestamp(timestamp)
            .quality(sdk_quality(value.quality))
            .build();
        values.push(property_value);
    }

    PutAssetPropertyValueEntry::builder()
        .entry_id(entry.entry_id)
        .asset_id(entry.asset_id)
        .property_id(entry.property_id)
        .set_property_values(Some(values))
        .build()
        .map_err(build_error)
}

#[async_trait]
impl SiteWiseApi for SiteWiseClient {
    async fn list_asset_models(
        &self,
        next_token: Option<String>,
    ) -> Result<Page<AssetModelSummary>> {
        let output = self
            .client
            .list_asset_models()
            .max_results(PAGE_SIZE)
            .set_next_token(next_token)
            .send()
            .await
            .map_err(|e| PipelineError::from_sdk(SERVICE, e))?;

        let items = output
            .asset_model_summaries()
            .iter()
            .map(|model| AssetModelSummary {
                id: model.id().to_string(),
                name: model.name().to_string(),
            })
            .collect();

        Ok(Page {
            items,
            next_token: output.next_token().map(str::to_string),
        })
    }

    async fn list_assets(
        &self,
        asset_model_id: &str,
        next_token: Option<String>,
    ) -> Result<Page<AssetSummary>> {
        let output = self
            .client
            .list_assets()
            .asset_model_id(asset_model_id)
            .max_results(PAGE_SIZE)
            .set_next_token(next_token)
            .send()
            .await
            .map_err(|e| PipelineError::from_sdk(SERVICE, e))?;

        let items = output
            .asset_summaries()
            .iter()
            .map(|asset| AssetSummary {
                id: asset.id().to_string(),
                name: asset.name().to_string(),
                asset_model_id: asset.asset_model_id().to_string(),
            })
            .collect();

        Ok(Page {
            items,
            next_token: output.next_token().map(str::to_string),
        })
    }

    async fn describe_asset(&self, asset_id: &str) -> Result<AssetDescription> {
        let output = self
            .client
            .describe_asset()
            .asset_id(asset_id)
            .send()
            .await
            .map_err(|e| PipelineError::from_sdk(SERVICE, e))?;

        let properties = output
            .asset_properties()
            .iter()
            .map(|property| AssetProperty {
                id: property.id().to_string(),
                name: property.name().to_string(),
                data_type: property.data_type().as_str().to_string(),
                unit: property.unit().map(str::to_string),
                alias: property.alias().map(str::to_string),
            })
            .collect();

        Ok(AssetDescription {
            id: output.asset_id().to_string(),
            name: output.asset_name().to_string(),
            asset_model_id: output.asset_model_id().to_string(),
            properties,
        })
    }

    async fn list_asset_model_properties(
        &self,
        asset_model_id: &str,
        next_token: Option<String>,
    ) -> Result<Page<AssetModelPropertySummary>> {
        let output = self
            .client
            .list_asset_model_properties()
            .asset_model_id(asset_model_id)
            .max_results(PAGE_SIZE)
            .set_next_token(next_token)
            .send()
            .await
            .map_err(|e| PipelineError::from_sdk(SERVICE, e))?;

        let items = output
            .asset_model_property_summaries()
            .iter()
            .map(|property| AssetModelPropertySummary {
                id: property.id().map(str::to_string),
                name: property.name().to_string(),
            })
            .collect();

        Ok(Page {
            items,
            next_token: output.next_token().map(str::to_string),
        })
    }

    async fn batch_put_asset_property_value(
        &self,
        entries: Vec<PropertyValueEntry>,
    ) -> Result<Vec<BatchPutFailure>> {
        let entries = entries
            .into_iter()
            .map(sdk_entry)
            .collect::<Result<Vec<_>>>()?;
        debug!("Sending {} entries to SiteWise", entries.len());

        let output = self
            .client
            .batch_put_asset_property_value()
            .set_entries(Some(entries))
            .send()
            .await
            .map_err(|e| PipelineError::from_sdk(SERVICE, e))?;

        let failures = output
            .error_entries()
            .iter()
            .map(|entry| {
                let first = entry.errors().first();
                BatchPutFailure {
                    entry_id: entry.entry_id().to_string(),
                    code: first
                        .map(|e| e.error_code().as_str().to_string())
                        .unwrap_or_default(),
                    message: first
                        .map(|e| e.error_message().to_string())
                        .unwrap_or_default(),
                }
            })
            .collect();

        Ok(failures)
    }
}

/// Split `values` into entries of at most `MAX_VALUES_PER_ENTRY` values each.
/// Entry ids are `{prefix}{n}` so they stay unique inside one batch.
pub fn chunk_into_entries(
    prefix: &str,
    asset_id: &str,
    property_id: &str,
    values: Vec<crate::model::PropertyValue>,
) -> Vec<PropertyValueEntry> {
    values
        .chunks(MAX_VALUES_PER_ENTRY)
        .enumerate()
        .map(|(n, chunk)| PropertyValueEntry {
            entry_id: format!("{}{}", prefix, n),
            asset_id: asset_id.to_string(),
            property_id: property_id.to_string(),
            values: chunk.to_vec(),
        })
        .collect()
}

/// Send entries in batches of `MAX_BATCH_PUT_ENTRIES`, returning every rejected entry.
pub async fn put_in_batches(
    api: &dyn SiteWiseApi,
    throttle: &Throttle,
    entries: Vec<PropertyValueEntry>,
) -> Result<Vec<BatchPutFailure>> {
    let mut failures = Vec::new();
    for batch in entries.chunks(MAX_BATCH_PUT_ENTRIES) {
        let rejected = throttle
            .call(|| api.batch_put_asset_property_value(batch.to_vec()))
            .await?;
        failures.extend(rejected);
    }
    Ok(failures)
}
