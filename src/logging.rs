//! Tracing setup for the `warden` binary.
//!
//! Both the host CLI and the watcher log to stderr. The filter comes from
//! `WARDEN_LOG` (same syntax as `RUST_LOG`), defaulting to `info`. The watcher
//! keeps a [`TraceSwitch`] so TRACE_ON/TRACE_OFF requests can raise and restore
//! verbosity at runtime.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, reload, EnvFilter, Registry};

pub const LOG_ENV: &str = "WARDEN_LOG";
const DEFAULT_DIRECTIVE: &str = "info";
const VERBOSE_DIRECTIVE: &str = "trace";

fn base_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE))
}

/// Install the global subscriber. Safe to call twice; the second call is a no-op.
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(base_filter())
        .with_writer(std::io::stderr)
        .try_init();
}

/// Handle for switching verbose logging on and off
pub struct TraceSwitch {
    handle: reload::Handle<EnvFilter, Registry>,
}

impl TraceSwitch {
    pub fn set_verbose(&self, verbose: bool) {
        let filter = if verbose {
            EnvFilter::new(VERBOSE_DIRECTIVE)
        } else {
            base_filter()
        };
        if let Err(e) = self.handle.reload(filter) {
            tracing::warn!(error = %e, "failed to switch log level");
        }
    }
}

/// Install the global subscriber behind a reloadable filter.
///
/// Returns `None` when a subscriber is already installed.
pub fn init_reloadable() -> Option<TraceSwitch> {
    let (filter, handle) = reload::Layer::new(base_filter());
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .ok()?;
    Some(TraceSwitch { handle })
}
