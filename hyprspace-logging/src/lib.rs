//! Thin wrapper around `tracing-subscriber` setup, shared by the binary and by tests.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Installs a global `tracing` subscriber driven by `RUST_LOG` (default: `info`).
///
/// `extra` lets a caller layer additional subscribers (e.g. a test-only capture
/// layer) on top of the default stderr formatter without duplicating this setup.
pub fn setup_global_subscriber<L>(extra: L)
where
    L: Layer<tracing_subscriber::Registry> + Send + Sync + 'static,
{
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .with(extra)
        .init();
}

/// Renders an [`std::error::Error`] including its full `source()` chain on one line.
///
/// Useful as a `tracing` field value: `tracing::warn!(error = std_dyn_err(&e), "...")`.
pub fn std_dyn_err(err: &(dyn std::error::Error + 'static)) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(s) = source {
        out.push_str(": ");
        out.push_str(&s.to_string());
        source = s.source();
    }
    out
}
