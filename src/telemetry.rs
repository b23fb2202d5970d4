use tracing_subscriber::{fmt, EnvFilter};

/// Installs the fmt subscriber once. `RUST_LOG` wins over `default_level`.
/// Output goes to stderr so streamed log lines on stdout stay clean.
pub fn init(service_name: &str, default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = fmt()
        .compact()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .try_init();

    tracing::info!(service = service_name, "telemetry initialized");
}
