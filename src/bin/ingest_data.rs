//! Replays canned sensor history into SiteWise, one property per invocation
use aws_config::BehaviorVersion;
use chrono::Utc;
use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use rand::rngs::StdRng;
use rand::SeedableRng;
use sitewise_l4e::config::ThrottleSettings;
use sitewise_l4e::ingest::{ingest, IngestRequest, IngestSummary, IngestThrottles};
use sitewise_l4e::logging::init_tracing;
use sitewise_l4e::sitewise::SiteWiseClient;
use sitewise_l4e::storage::S3Store;

struct Handler {
    sitewise: SiteWiseClient,
    store: S3Store,
    throttles: IngestThrottles,
}

async fn function_handler(
    handler: &Handler,
    event: LambdaEvent<IngestRequest>,
) -> Result<IngestSummary, Error> {
    let mut rng = StdRng::from_entropy();
    let summary = ingest(
        &handler.sitewise,
        &handler.store,
        &handler.throttles,
        &event.payload,
        Utc::now(),
        &mut rng,
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
        throttles: IngestThrottles::from_settings(&ThrottleSettings::from_env()?),
    };
    let handler = &handler;

    run(service_fn(move |event| async move {
        function_handler(handler, event).await
    }))
    .await
}
