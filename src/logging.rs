use tracing_subscriber::EnvFilter;

/// Plain fmt output for CloudWatch: no target, no timestamp, `RUST_LOG` or INFO.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();
}
