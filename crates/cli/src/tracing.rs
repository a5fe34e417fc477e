/// Install the tracing subscriber and bridge `log` records into it.
///
/// `RUST_LOG` controls filtering; the default keeps the scheduler's own
/// crates at info and silences the noisier transport dependencies.
pub fn setup_logging() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,libp2p=warn,kameo=warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let _ = tracing_log::LogTracer::init();
}
