//! Exports SiteWise asset metadata to S3 as NDJSON, one file per asset
use aws_config::BehaviorVersion;
use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use sitewise_l4e::config::ThrottleSettings;
use sitewise_l4e::logging::init_tracing;
use sitewise_l4e::metadata::{ExportRequest, ExportResponse, ExportThrottles, MetadataExporter};
use sitewise_l4e::sitewise::SiteWiseClient;
use sitewise_l4e::storage::S3Store;
use tracing::info;

async fn function_handler(
    exporter: &MetadataExporter<'_>,
    event: LambdaEvent<ExportRequest>,
) -> Result<ExportResponse, Error> {
    info!(
        "Exporting asset metadata to s3://{}/{}",
        event.payload.bucket_name, event.payload.key_name_prefix
    );
    Ok(exporter.export(&event.payload).await?)
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    init_tracing();

    let config = aws_config::defaults(BehaviorVersion::latest()).load().await;
    let sitewise = SiteWiseClient::from_conf(&config);
    let store = S3Store::from_conf(&config);
    let settings = ThrottleSettings::from_env()?;

    let exporter = MetadataExporter::new(&sitewise, &store, ExportThrottles::from_settings(&settings));
    let exporter = &exporter;

    run(service_fn(move |event| async move {
        function_handler(exporter, event).await
    }))
    .await
}
