//! SiteWise shapes the handlers work with, independent of the SDK types.

/// One page of a paginated list call
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssetModelSummary {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssetSummary {
    pub id: String,
    pub name: String,
    pub asset_model_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssetProperty {
    pub id: String,
    pub name: String,
    pub data_type: String,
    pub unit: Option<String>,
    pub alias: Option<String>,
}

/// Result of `DescribeAsset`, trimmed to what the pipeline reads
#[derive(Debug, Clone, PartialEq)]
pub struct AssetDescription {
    pub id: String,
    pub name: String,
    pub asset_model_id: String,
    pub properties: Vec<AssetProperty>,
}

impl AssetDescription {
    pub fn property_named(&self, name: &str) -> Option<&AssetProperty> {
        self.properties.iter().find(|p| p.name == name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssetModelPropertySummary {
    pub id: Option<String>,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quality {
    Good,
    Bad,
    Uncertain,
}

/// A timestamped double written to a property
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyValue {
    pub value: f64,
    pub time_in_seconds: i64,
    pub offset_in_nanos: i32,
    pub quality: Quality,
}

impl PropertyValue {
    pub fn good(value: f64, time_in_seconds: i64) -> Self {
        Self {
            value,
            time_in_seconds,
            offset_in_nanos: 0,
            quality: Quality::Good,
        }
    }
}

/// One entry of a `BatchPutAssetPropertyValue` request
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyValueEntry {
    pub entry_id: String,
    pub asset_id: String,
    pub property_id: String,
    pub values: Vec<PropertyValue>,
}

/// Per-entry rejection reported by `BatchPutAssetPropertyValue`
#[derive(Debug, Clone, PartialEq)]
pub struct BatchPutFailure {
    pub entry_id: String,
    pub code: String,
    pub message: String,
}
