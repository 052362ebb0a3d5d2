//! Logging initialization for vigil-daemon.
//!
//! `general.log_level` applies to the vigil crates only. Dependencies
//! (axum, hyper, rusqlite, ...) are held at `warn` so a debug run shows
//! dispatcher and store activity without transport noise. A non-empty
//! `RUST_LOG` replaces the whole filter and must parse.

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use vigil_core::config::GeneralConfig;

/// Crate targets that follow `general.log_level`.
const VIGIL_TARGETS: [&str; 4] = ["vigil_core", "vigil_store", "vigil_scanner", "vigil_daemon"];

/// Ceiling for every target outside [`VIGIL_TARGETS`].
const DEPENDENCY_LEVEL: LevelFilter = LevelFilter::WARN;

/// Build the subscriber filter.
///
/// `rust_log` is the raw `RUST_LOG` value; empty or whitespace counts as unset.
/// An invalid override is an error rather than a silent fallback.
pub fn build_filter(log_level: &str, rust_log: Option<&str>) -> Result<EnvFilter> {
    if let Some(directives) = rust_log.map(str::trim).filter(|d| !d.is_empty()) {
        return EnvFilter::try_new(directives)
            .with_context(|| format!("invalid RUST_LOG directives '{directives}'"));
    }

    let level: LevelFilter = log_level
        .parse()
        .with_context(|| format!("invalid log level '{log_level}'"))?;
    let base = level.min(DEPENDENCY_LEVEL);
    let mut directives = vec![base.to_string().to_lowercase()];
    directives.extend(
        VIGIL_TARGETS
            .iter()
            .map(|target| format!("{target}={}", level.to_string().to_lowercase())),
    );
    EnvFilter::try_new(directives.join(",")).context("failed to build log filter")
}

/// Initialize the global tracing subscriber.
///
/// Must be called exactly once, before any tracing macros are used.
///
/// # Formats
///
/// * `"json"` - one flattened JSON object per event, for log shippers
/// * `"pretty"` - Human-readable colored output (for development)
pub fn init_tracing(config: &GeneralConfig) -> Result<()> {
    let rust_log = std::env::var("RUST_LOG").ok();
    let filter = build_filter(&config.log_level, rust_log.as_deref())?;

    match config.log_format.as_str() {
        "json" => tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_current_span(false),
            )
            .try_init()
            .context("failed to initialize JSON tracing subscriber")?,
        "pretty" => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init()
            .context("failed to initialize pretty tracing subscriber")?,
        other => {
            anyhow::bail!("unknown log format '{other}', expected 'json' or 'pretty'");
        }
    }

    Ok(())
}
