//! Logging initialization and runtime filter updates (ambient stack).

use crate::state::RELOAD_HANDLE;
use std::sync::Once;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{filter::EnvFilter, fmt, reload::Layer as ReloadLayer};

static LOG_INIT: Once = Once::new();

/// Initializes the global tracing subscriber. Only the first call takes
/// effect; later calls are no-ops.
pub fn init_logging(default: &str) {
    LOG_INIT.call_once(|| {
        let filter = EnvFilter::new(default);
        let (reload_layer, handle) = ReloadLayer::new(filter);
        let subscriber = tracing_subscriber::registry()
            .with(reload_layer)
            .with(fmt::layer());
        tracing::subscriber::set_global_default(subscriber).unwrap();
        *RELOAD_HANDLE.lock().unwrap() = Some(handle);
    });
}

/// Replaces the active filter at runtime, e.g. from a telnet `loglevel`
/// command. No-op if logging hasn't been initialized yet.
pub fn set_filter(directive: &str) -> Result<(), String> {
    let guard = RELOAD_HANDLE.lock().unwrap();
    let Some(handle) = guard.as_ref() else {
        return Err("logging not initialized".to_string());
    };
    let filter = EnvFilter::new(directive);
    handle.reload(filter).map_err(|e| e.to_string())
}
