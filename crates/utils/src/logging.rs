//! provides logging helpers

use tracing_subscriber::filter::{self};
use tracing_subscriber::fmt::layer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry;

/// initiate the global tracing subscriber
///
/// The level defaults to INFO and can be overridden through `RUST_LOG`.
/// `json` switches to one JSON object per event for log shippers.
pub fn init(json: bool) {
    let env_filter = filter::EnvFilter::builder()
        .with_default_directive(filter::LevelFilter::INFO.into())
        .from_env_lossy();

    if json {
        let fmt_layer = layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_filter(env_filter);
        registry().with(fmt_layer).init();
    } else {
        let fmt_layer = layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_filter(env_filter);
        registry().with(fmt_layer).init();
    }
}
