//! Global process-wide state that doesn't belong to any one session: the
//! handle `logging.rs` uses to change the filter at runtime.

use lazy_static::lazy_static;
use tracing_subscriber::{filter::EnvFilter, reload::Handle as ReloadHandle};

lazy_static! {
    pub static ref RELOAD_HANDLE: std::sync::Mutex<Option<ReloadHandle<EnvFilter, tracing_subscriber::Registry>>> =
        std::sync::Mutex::new(None);
}
