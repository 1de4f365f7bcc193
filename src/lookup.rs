//! CloudFormation custom resource that resolves an asset model property id by name.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;
use crate::sitewise::SiteWiseApi;
use crate::throttle::Throttle;

#[derive(Debug, Deserialize)]
pub struct CustomResourceEvent {
    #[serde(rename = "RequestType", default)]
    pub request_type: Option<String>,
    #[serde(rename = "ResourceProperties")]
    pub resource_properties: PropertyLookup,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PropertyLookup {
    pub asset_model_id: String,
    pub property_name: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct CustomResourceResponse {
    #[serde(rename = "Data")]
    pub data: PropertyLookupResult,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PropertyLookupResult {
    pub asset_model_id: String,
    pub property_name: String,
    pub property_id: Option<String>,
}

/// First property of the model whose name matches, across every page
pub async fn find_property_id(
    sitewise: &dyn SiteWiseApi,
    throttle: &Throttle,
    asset_model_id: &str,
    property_name: &str,
) -> Result<Option<String>> {
    let mut token: Option<String> = None;
    loop {
        let page = throttle
            .call(|| sitewise.list_asset_model_properties(asset_model_id, token.clone()))
            .await?;
        if let Some(found) = page.items.into_iter().find(|p| p.name == property_name) {
            return Ok(found.id);
        }
        match page.next_token {
            Some(next) => token = Some(next),
            None => return Ok(None),
        }
    }
}

pub async fn handle(
    sitewise: &dyn SiteWiseApi,
    throttle: &Throttle,
    event: &CustomResourceEvent,
) -> Result<CustomResourceResponse> {
    let lookup = &event.resource_properties;
    info!(
        "Received {} for model {} property {}",
        event.request_type.as_deref().unwrap_or("request"),
        lookup.asset_model_id,
        lookup.property_name
    );

    let property_id =
        find_property_id(sitewise, throttle, &lookup.asset_model_id, &lookup.property_name).await?;

    let response = CustomResourceResponse {
        data: PropertyLookupResult {
            asset_model_id: lookup.asset_model_id.clone(),
            property_name: lookup.property_name.clone(),
            property_id,
        },
    };
    info!("Returning response: {:?}", response);
    Ok(response)
}
