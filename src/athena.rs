use async_trait::async_trait;
use aws_sdk_athena::types::{QueryExecutionContext, QueryExecutionState, ResultConfiguration};

use crate::error::{PipelineError, Result};

const SERVICE: &str = "athena";

pub const DATA_CATALOG: &str = "AwsDataCatalog";

#[derive(Debug, Clone, PartialEq)]
pub struct NamedQuery {
    pub name: String,
    pub query_string: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryState {
    Queued,
    Running,
    Succeeded,
    Failed(String),
    Cancelled,
}

#[async_trait]
pub trait QueryEngine: Send + Sync {
    async fn list_query_executions(&self, work_group: &str, max_results: i32)
        -> Result<Vec<String>>;

    async fn get_named_query(&self, named_query_id: &str) -> Result<NamedQuery>;

    /// Starts a query and returns its execution id
    async fn start_query_execution(
        &self,
        query: &str,
        database: &str,
        output_location: &str,
    ) -> Result<String>;

    async fn query_state(&self, query_execution_id: &str) -> Result<QueryState>;
}

/// `QueryEngine` over the Athena SDK client
#[derive(Debug, Clone)]
pub struct AthenaClient {
    client: aws_sdk_athena::Client,
}

impl AthenaClient {
    pub fn new(client: aws_sdk_athena::Client) -> Self {
        Self { client }
    }

    pub fn from_conf(config: &aws_types::SdkConfig) -> Self {
        Self::new(aws_sdk_athena::Client::new(config))
    }
}

#[async_trait]
impl QueryEngine for AthenaClient {
    async fn list_query_executions(
        &self,
        work_group: &str,
        max_results: i32,
    ) -> Result<Vec<String>> {
        let output = self
            .client
            .list_query_executions()
            .max_results(max_results)
            .work_group(work_group)
            .send()
            .await
            .map_err(|e| PipelineError::from_sdk(SERVICE, e))?;

        Ok(output.query_execution_ids().to_vec())
    }

    async fn get_named_query(&self, named_query_id: &str) -> Result<NamedQuery> {
        let output = self
            .client
            .get_named_query()
            .named_query_id(named_query_id)
            .send()
            .await
            .map_err(|e| PipelineError::from_sdk(SERVICE, e))?;

        let query = output
            .named_query()
            .ok_or_else(|| PipelineError::Missing(format!("named query {}", named_query_id)))?;

        Ok(NamedQuery {
            name: query.name().to_string(),
            query_string: query.query_string().to_string(),
        })
    }

    async fn start_query_execution(
        &self,
        query: &str,
        database: &str,
        output_location: &str,
    ) -> Result<String> {
        let output = self
            .client
            .start_query_execution()
            .query_string(query)
            .query_execution_context(
                QueryExecutionContext::builder()
                    .database(database)
                    .catalog(DATA_CATALOG)
                    .build(),
            )
            .result_configuration(
                ResultConfiguration::builder()
                    .output_location(output_location)
                    .build(),
            )
            .send()
            .await
            .map_err(|e| PipelineError::from_sdk(SERVICE, e))?;

        output
            .query_execution_id()
            .map(str::to_string)
            .ok_or_else(|| PipelineError::Missing("query execution id".to_string()))
    }

    async fn query_state(&self, query_execution_id: &str) -> Result<QueryState> {
        let output = self
            .client
            .get_query_execution()
            .query_execution_id(query_execution_id)
            .send()
            .await
            .map_err(|e| PipelineError::from_sdk(SERVICE, e))?;

        let status = output.query_execution().and_then(|q| q.status());
        let reason = status
            .and_then(|s| s.state_change_reason())
            .unwrap_or("no reason given")
            .to_string();

        Ok(match status.and_then(|s| s.state()) {
            Some(QueryExecutionState::Succeeded) => QueryState::Succeeded,
            Some(QueryExecutionState::Failed) => QueryState::Failed(reason),
            Some(QueryExecutionState::Cancelled) => QueryState::Cancelled,
            Some(QueryExecutionState::Running) => QueryState::Running,
            _ => QueryState::Queued,
        })
    }
}
