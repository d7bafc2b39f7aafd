use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

// Default filter when RUST_LOG is not set
fn default_level() -> &'static str {
    if cfg!(debug_assertions) { "trace" } else { "info" }
}

pub fn init_logging() {
    let level = default_level();

    let filter = EnvFilter::try_from_default_env().ok();
    let env_set = filter.is_some();
    let filter = filter.unwrap_or_else(|| EnvFilter::new(level));

    // Samples go to the CSV logs, diagnostics to stderr
    let fmt_layer = fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(filter)
        .init();

    if !env_set {
        info!("\"RUST_LOG\" variable not set, defaulting to {level}");
    }
}
