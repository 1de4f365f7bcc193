//! Re-runs the per-asset Athena view and stages the latest minutes for inference
use aws_config::BehaviorVersion;
use chrono::Utc;
use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use sitewise_l4e::athena::AthenaClient;
use sitewise_l4e::config::{QuerySettings, ThrottleSettings};
use sitewise_l4e::inference::{InferenceScheduleRequest, InferenceScheduleResponse, QueryRunner};
use sitewise_l4e::logging::init_tracing;
use sitewise_l4e::storage::S3Store;

async fn function_handler(
    runner: &QueryRunner<'_>,
    event: LambdaEvent<InferenceScheduleRequest>,
) -> Result<InferenceScheduleResponse, Error> {
    Ok(runner.run(&event.payload, Utc::now()).await?)
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    init_tracing();

    let config = aws_config::defaults(BehaviorVersion::latest()).load().await;
    let athena = AthenaClient::from_conf(&config);
    let store = S3Store::from_conf(&config);
    let runner = QueryRunner::new(
        &athena,
        &store,
        ThrottleSettings::from_env()?.standard(),
        QuerySettings::from_env()?,
    );
    let runner = &runner;

    run(service_fn(move |event| async move {
        function_handler(runner, event).await
    }))
    .await
}
