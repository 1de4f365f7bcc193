//! Firehose transformation hook flattening SiteWise property updates
use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use sitewise_l4e::logging::init_tracing;
use sitewise_l4e::transform::{transform_batch, FirehoseEvent, FirehoseResponse};
use tracing::info;

async fn function_handler(event: LambdaEvent<FirehoseEvent>) -> Result<FirehoseResponse, Error> {
    info!("Transforming {} records", event.payload.records.len());
    Ok(transform_batch(&event.payload))
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    init_tracing();
    run(service_fn(function_handler)).await
}
