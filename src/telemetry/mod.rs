pub mod status;

use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber: `RUST_LOG`-style filter, plain or JSON lines.
pub fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt().with_env_filter(filter).with_target(false);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
