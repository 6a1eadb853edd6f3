//! Process-wide tracing and diagnostics bootstrap.
//!
//! Call [`init`] once at startup. The filter defaults to `info` for this
//! crate and can be overridden with `RUST_LOG`.

use tracing_error::ErrorLayer;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the tracing subscriber and miette's pretty panic reports.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init() {
    let fmt_layer = fmt::layer()
        .with_target(false)
        // Log span open/close so instrumented async boundaries are visible.
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE);

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("error,loomflow=info"))
        .unwrap_or_default();

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(ErrorLayer::default())
        .try_init()
        .is_ok();
    if installed {
        miette::set_panic_hook();
    }
}
