use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber shared by all binaries.
///
/// `RUST_LOG` drives the filter (default `info`); `LOG_FORMAT=json`
/// switches to one JSON object per line for log shipping.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if json_requested(std::env::var("LOG_FORMAT").ok().as_deref()) {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

fn json_requested(format: Option<&str>) -> bool {
    format.is_some_and(|f| f.eq_ignore_ascii_case("json"))
}
