//! Custom resource resolving an asset model property id from its name
use aws_config::BehaviorVersion;
use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use sitewise_l4e::config::ThrottleSettings;
use sitewise_l4e::logging::init_tracing;
use sitewise_l4e::lookup::{handle, CustomResourceEvent, CustomResourceResponse};
use sitewise_l4e::sitewise::SiteWiseClient;
use sitewise_l4e::throttle::Throttle;

async fn function_handler(
    sitewise: &SiteWiseClient,
    throttle: &Throttle,
    event: LambdaEvent<CustomResourceEvent>,
) -> Result<CustomResourceResponse, Error> {
    Ok(handle(sitewise, throttle, &event.payload).await?)
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    init_tracing();

    let config = aws_config::defaults(BehaviorVersion::latest()).load().await;
    let sitewise = SiteWiseClient::from_conf(&config);
    let throttle = ThrottleSettings::from_env()?.standard();
    let (sitewise, throttle) = (&sitewise, &throttle);

    run(service_fn(move |event| async move {
        function_handler(sitewise, throttle, event).await
    }))
    .await
}
