/// Tracing initialization for the embedding process.
///
/// Called once at the start of `ChatApp::new()`; `try_init` makes repeated
/// construction (tests spin up several apps per process) a no-op.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bazar_core=debug,info".into()),
        )
        .try_init();
}
