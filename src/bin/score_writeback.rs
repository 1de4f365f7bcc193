//! Writes Lookout for Equipment inference results back to SiteWise properties
use aws_config::BehaviorVersion;
use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use sitewise_l4e::config::{required_env, ThrottleSettings, ASSET_SCORE_PROPERTY_VAR};
use sitewise_l4e::logging::init_tracing;
use sitewise_l4e::scores::{process_event, S3Event, WritebackSummary};
use sitewise_l4e::sitewise::SiteWiseClient;
use sitewise_l4e::storage::S3Store;
use sitewise_l4e::throttle::Throttle;

struct Handler {
    sitewise: SiteWiseClient,
    store: S3Store,
    throttle: Throttle,
    asset_score_property: String,
}

async fn function_handler(
    handler: &Handler,
    event: LambdaEvent<S3Event>,
) -> Result<WritebackSummary, Error> {
    let summary = process_event(
        &handler.sitewise,
        &handler.store,
        &handler.throttle,
        &handler.asset_score_property,
        &event.payload,
    )
    .await?;
    Ok(summary)
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    init_tracing();

    let config = aws_config::defaults(BehaviorVersion::latest()).load().await;
    let handler = Handler {
        sitewise: SiteWiseClient::from_conf(&config),
        store: S3Store::from_conf(&config),
        throttle: ThrottleSettings::from_env()?.standard(),
        asset_score_property: required_env(ASSET_SCORE_PROPERTY_VAR)?,
    };
    let handler = &handler;

    run(service_fn(move |event| async move {
        function_handler(handler, event).await
    }))
    .await
}
