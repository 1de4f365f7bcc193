//! Asset metadata export: every asset's properties as NDJSON in S3, one file per asset.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::ThrottleSettings;
use crate::error::Result;
use crate::model::{AssetDescription, AssetModelSummary, AssetSummary};
use crate::sitewise::SiteWiseApi;
use crate::storage::ObjectStore;
use crate::throttle::Throttle;

#[derive(Debug, Deserialize)]
pub struct ExportRequest {
    pub bucket_name: String,
    pub key_name_prefix: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct ExportResponse {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub body: String,
    pub assets_exported: usize,
    pub properties_exported: usize,
}

/// One line of an exported metadata file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssetPropertyRecord {
    pub asset_id: String,
    pub asset_name: String,
    pub asset_model_id: String,
    pub asset_property_id: String,
    pub asset_property_name: String,
    pub asset_property_data_type: String,
    pub asset_property_unit: Option<String>,
    pub asset_property_alias: Option<String>,
}

/// Flatten a described asset into one record per property.
pub fn asset_property_records(
    description: &AssetDescription,
    asset: &AssetSummary,
) -> Vec<AssetPropertyRecord> {
    description
        .properties
        .iter()
        .map(|property| AssetPropertyRecord {
            asset_id: asset.id.clone(),
            asset_name: asset.name.clone(),
            asset_model_id: asset.asset_model_id.clone(),
            asset_property_id: property.id.clone(),
            asset_property_name: property.name.clone(),
            asset_property_data_type: property.data_type.clone(),
            asset_property_unit: property.unit.clone(),
            asset_property_alias: property.alias.clone(),
        })
        .collect()
}

pub fn to_ndjson(records: &[AssetPropertyRecord]) -> Result<String> {
    let lines = records
        .iter()
        .map(serde_json::to_string)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(lines.join("\n"))
}

pub fn object_key(prefix: &str, asset_id: &str) -> String {
    format!("{}/asset-id-{}.ndjson", prefix, asset_id)
}

/// One throttle per call kind; each service quota is counted on its own.
#[derive(Debug, Clone)]
pub struct ExportThrottles {
    pub model_listing: Throttle,
    pub asset_listing: Throttle,
    pub describe: Throttle,
    pub upload: Throttle,
}

impl ExportThrottles {
    pub fn from_settings(settings: &ThrottleSettings) -> Self {
        Self {
            model_listing: settings.model_listing(),
            asset_listing: settings.standard(),
            describe: settings.standard(),
            upload: settings.standard(),
        }
    }
}

/// Crawls asset models, assets and properties under separate call ceilings.
pub struct MetadataExporter<'a> {
    sitewise: &'a dyn SiteWiseApi,
    store: &'a dyn ObjectStore,
    throttles: ExportThrottles,
}

impl<'a> MetadataExporter<'a> {
    pub fn new(
        sitewise: &'a dyn SiteWiseApi,
        store: &'a dyn ObjectStore,
        throttles: ExportThrottles,
    ) -> Self {
        Self {
            sitewise,
            store,
            throttles,
        }
    }

    /// All asset models, following `nextToken` until it runs out
    pub async fn asset_models(&self) -> Result<Vec<AssetModelSummary>> {
        let mut models = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = self
                .throttles
                .model_listing
                .call(|| self.sitewise.list_asset_models(token.clone()))
                .await?;
            models.extend(page.items);
            match page.next_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        debug!("Listed {} asset models", models.len());
        Ok(models)
    }

    /// All assets created from one model
    pub async fn assets_of(&self, asset_model_id: &str) -> Result<Vec<AssetSummary>> {
        let mut assets = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = self
                .throttles
                .asset_listing
                .call(|| self.sitewise.list_assets(asset_model_id, token.clone()))
                .await?;
            assets.extend(page.items);
            match page.next_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        Ok(assets)
    }

    pub async fn export(&self, request: &ExportRequest) -> Result<ExportResponse> {
        let mut assets_exported = 0;
        let mut properties_exported = 0;

        for model in self.asset_models().await? {
            for asset in self.assets_of(&model.id).await? {
                let description = self
                    .throttles
                    .describe
                    .call(|| self.sitewise.describe_asset(&asset.id))
                    .await?;
                let records = asset_property_records(&description, &asset);
                let body = to_ndjson(&records)?;
                let key = object_key(&request.key_name_prefix, &asset.id);

                self.throttles
                    .upload
                    .call(|| {
                        self.store.put_object(
                            &request.bucket_name,
                            &key,
                            body.clone().into_bytes(),
                            Some("application/x-ndjson"),
                        )
                    })
                    .await?;

                assets_exported += 1;
                properties_exported += records.len();
            }
        }

        info!(
            "Exported metadata for {} assets ({} properties)",
            assets_exported, properties_exported
        );

        Ok(ExportResponse {
            status_code: 200,
            body: serde_json::to_string("Lambda is successfully executed")?,
            assets_exported,
            properties_exported,
        })
    }
}
