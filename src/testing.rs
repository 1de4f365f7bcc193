//! In-memory stand-ins for the service traits.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::athena::{NamedQuery, QueryEngine, QueryState};
use crate::error::{PipelineError, Result};
use crate::model::{
    AssetDescription, AssetModelPropertySummary, AssetModelSummary, AssetProperty, AssetSummary,
    BatchPutFailure, Page, PropertyValueEntry,
};
use crate::sitewise::SiteWiseApi;
use crate::storage::ObjectStore;

pub fn throttling() -> PipelineError {
    PipelineError::Service {
        service: "iotsitewise",
        code: Some("ThrottlingException".to_string()),
        message: "Rate exceeded".to_string(),
    }
}

pub fn property(id: &str, name: &str) -> AssetProperty {
    AssetProperty {
        id: id.to_string(),
        name: name.to_string(),
        data_type: "DOUBLE".to_string(),
        unit: None,
        alias: None,
    }
}

/// Hand out `items` in pages of `page_size`, tokens being the next start offset.
fn paginate<T: Clone>(items: &[T], page_size: usize, token: Option<String>) -> Page<T> {
    let start: usize = token.and_then(|t| t.parse().ok()).unwrap_or(0);
    let end = (start + page_size).min(items.len());
    Page {
        items: items[start..end].to_vec(),
        next_token: (end < items.len()).then(|| end.to_string()),
    }
}

#[derive(Default)]
pub struct FakeSiteWise {
    pub page_size: usize,
    pub models: Vec<AssetModelSummary>,
    pub assets: Vec<AssetSummary>,
    pub descriptions: HashMap<String, AssetDescription>,
    pub model_properties: HashMap<String, Vec<AssetModelPropertySummary>>,
    pub rejected_entries: Vec<String>,
    failures: Mutex<VecDeque<PipelineError>>,
    targeted: Mutex<Vec<(String, PipelineError)>>,
    calls: Mutex<Vec<String>>,
    batches: Mutex<Vec<Vec<PropertyValueEntry>>>,
}

impl FakeSiteWise {
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            page_size,
            ..Self::default()
        }
    }

    pub fn add_asset(&mut self, model_id: &str, asset_id: &str, properties: Vec<AssetProperty>) {
        let name = format!("{}-name", asset_id);
        self.assets.push(AssetSummary {
            id: asset_id.to_string(),
            name: name.clone(),
            asset_model_id: model_id.to_string(),
        });
        self.descriptions.insert(
            asset_id.to_string(),
            AssetDescription {
                id: asset_id.to_string(),
                name,
                asset_model_id: model_id.to_string(),
                properties,
            },
        );
    }

    /// Queue errors returned by the next calls, in order
    pub fn fail_next(&self, error: PipelineError) {
        self.failures.lock().unwrap().push_back(error);
    }

    /// Fail the next call whose recorded name starts with `call`, once
    pub fn fail_next_call(&self, call: &str, error: PipelineError) {
        self.targeted
            .lock()
            .unwrap()
            .push((call.to_string(), error));
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, name: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(name)).count()
    }

    pub fn batches(&self) -> Vec<Vec<PropertyValueEntry>> {
        self.batches.lock().unwrap().clone()
    }

    fn record(&self, call: String) -> Result<()> {
        let mut targeted = self.targeted.lock().unwrap();
        if let Some(n) = targeted.iter().position(|(name, _)| call.starts_with(name)) {
            self.calls.lock().unwrap().push(call);
            return Err(targeted.remove(n).1);
        }
        drop(targeted);
        self.calls.lock().unwrap().push(call);
        match self.failures.lock().unwrap().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn page_size(&self) -> usize {
        if self.page_size == 0 {
            usize::MAX / 2
        } else {
            self.page_size
        }
    }
}

#[async_trait]
impl SiteWiseApi for FakeSiteWise {
    async fn list_asset_models(
        &self,
        next_token: Option<String>,
    ) -> Result<Page<AssetModelSummary>> {
        self.record(format!("list_asset_models:{:?}", next_token))?;
        Ok(paginate(&self.models, self.page_size(), next_token))
    }

    async fn list_assets(
        &self,
        asset_model_id: &str,
        next_token: Option<String>,
    ) -> Result<Page<AssetSummary>> {
        self.record(format!("list_assets:{}:{:?}", asset_model_id, next_token))?;
        let assets: Vec<AssetSummary> = self
            .assets
            .iter()
            .filter(|a| a.asset_model_id == asset_model_id)
            .cloned()
            .collect();
        Ok(paginate(&assets, self.page_size(), next_token))
    }

    async fn describe_asset(&self, asset_id: &str) -> Result<AssetDescription> {
        self.record(format!("describe_asset:{}", asset_id))?;
        self.descriptions
            .get(asset_id)
            .cloned()
            .ok_or_else(|| PipelineError::Service {
                service: "iotsitewise",
                code: Some("ResourceNotFoundException".to_string()),
                message: format!("asset {} not found", asset_id),
            })
    }

    async fn list_asset_model_properties(
        &self,
        asset_model_id: &str,
        next_token: Option<String>,
    ) -> Result<Page<AssetModelPropertySummary>> {
        self.record(format!(
            "list_asset_model_properties:{}:{:?}",
            asset_model_id, next_token
        ))?;
        let properties = self
            .model_properties
            .get(asset_model_id)
            .cloned()
            .unwrap_or_default();
        Ok(paginate(&properties, self.page_size(), next_token))
    }

    async fn batch_put_asset_property_value(
        &self,
        entries: Vec<PropertyValueEntry>,
    ) -> Result<Vec<BatchPutFailure>> {
        self.record(format!("batch_put_asset_property_value:{}", entries.len()))?;
        let failures = entries
            .iter()
            .filter(|e| self.rejected_entries.contains(&e.property_id))
            .map(|e| BatchPutFailure {
                entry_id: e.entry_id.clone(),
                code: "InvalidRequestException".to_string(),
                message: "rejected".to_string(),
            })
            .collect();
        self.batches.lock().unwrap().push(entries);
        Ok(failures)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<(String, String), Vec<u8>>>,
    put_failures: Mutex<VecDeque<PipelineError>>,
    puts: Mutex<usize>,
}

impl MemoryStore {
    pub fn insert(&self, bucket: &str, key: &str, body: impl Into<Vec<u8>>) {
        self.objects
            .lock()
            .unwrap()
            .insert((bucket.to_string(), key.to_string()), body.into());
    }

    pub fn get(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    pub fn get_string(&self, bucket: &str, key: &str) -> Option<String> {
        self.get(bucket, key)
            .map(|bytes| String::from_utf8(bytes).unwrap())
    }

    pub fn keys(&self, bucket: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .objects
            .lock()
            .unwrap()
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn fail_next_put(&self, error: PipelineError) {
        self.put_failures.lock().unwrap().push_back(error);
    }

    pub fn put_attempts(&self) -> usize {
        *self.puts.lock().unwrap()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        _content_type: Option<&str>,
    ) -> Result<()> {
        *self.puts.lock().unwrap() += 1;
        if let Some(err) = self.put_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        self.insert(bucket, key, body);
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        self.get(bucket, key)
            .ok_or_else(|| PipelineError::Storage(format!("NoSuchKey: s3://{}/{}", bucket, key)))
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.objects
            .lock()
            .unwrap()
            .remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeAthena {
    pub executions: Vec<String>,
    pub named_queries: HashMap<String, NamedQuery>,
    /// States reported by successive `query_state` calls; the last one repeats
    pub states: Mutex<VecDeque<QueryState>>,
    started: Mutex<Vec<(String, String, String)>>,
}

impl FakeAthena {
    pub fn with_executions(executions: Vec<String>) -> Self {
        Self {
            executions,
            ..Self::default()
        }
    }

    pub fn with_states(states: Vec<QueryState>) -> Self {
        Self {
            states: Mutex::new(VecDeque::from(states)),
            ..Self::default()
        }
    }

    pub fn started(&self) -> Vec<(String, String, String)> {
        self.started.lock().unwrap().clone()
    }
}

#[async_trait]
impl QueryEngine for FakeAthena {
    async fn list_query_executions(
        &self,
        _work_group: &str,
        max_results: i32,
    ) -> Result<Vec<String>> {
        Ok(self
            .executions
            .iter()
            .take(max_results as usize)
            .cloned()
            .collect())
    }

    async fn get_named_query(&self, named_query_id: &str) -> Result<NamedQuery> {
        self.named_queries
            .get(named_query_id)
            .cloned()
            .ok_or_else(|| PipelineError::Missing(format!("named query {}", named_query_id)))
    }

    async fn start_query_execution(
        &self,
        query: &str,
        database: &str,
        output_location: &str,
    ) -> Result<String> {
        let mut started = self.started.lock().unwrap();
        started.push((
            query.to_string(),
            database.to_string(),
            output_location.to_string(),
        ));
        Ok(format!("query-{}", started.len()))
    }

    async fn query_state(&self, _query_execution_id: &str) -> Result<QueryState> {
        let mut states = self.states.lock().unwrap();
        if states.len() > 1 {
            Ok(states.pop_front().unwrap_or(QueryState::Succeeded))
        } else {
            Ok(states.front().cloned().unwrap_or(QueryState::Succeeded))
        }
    }
}
