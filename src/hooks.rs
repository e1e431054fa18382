//! In-process router extension points. The original's dynamic plugin
//! loader (`plugin.Open`, an external `.so` loading mechanism) is out of
//! scope, but the registries its plugins hook into are just ordinary
//! in-process handler lists — kept here so other in-process code (tests,
//! chat commands) can extend packet handling without a dynamic loader.
//!
//! Grounded on `plugin_interact.go`, `plugin_node.go`, `plugin_map.go`,
//! `plugin_AO.go`.

use std::sync::{Arc, RwLock};

use crate::client::ClientSession;
use crate::wire::{AoMsg, ToSrv};

/// A generic ordered handler list. `register()` appends; `run()` calls
/// every handler in registration order and reports whether any of them
/// claimed to have handled the event.
pub struct Registry<F> {
    handlers: RwLock<Vec<F>>,
}

impl<F> Registry<F> {
    const fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    pub fn register(&self, handler: F) {
        self.handlers.write().unwrap().push(handler);
    }
}

pub type InteractionHandler = Arc<dyn Fn(&Arc<ClientSession>, &ToSrv) -> bool + Send + Sync>;
pub type BlockDataHandler = Arc<dyn Fn(&Arc<ClientSession>, i16, i16, i16) -> bool + Send + Sync>;
pub type AoHandler = Arc<dyn Fn(&Arc<ClientSession>, &AoMsg) -> bool + Send + Sync>;

lazy_static::lazy_static! {
    pub static ref INTERACTION_HANDLERS: Registry<InteractionHandler> = Registry::new();
    pub static ref BLOCK_DATA_HANDLERS: Registry<BlockDataHandler> = Registry::new();
    pub static ref AO_HANDLERS: Registry<AoHandler> = Registry::new();
}

/// Runs every registered interaction handler, returning whether any of
/// them claimed the event (a claimed interaction is still forwarded
/// upstream — these are observers, not interceptors).
pub fn run_interaction_handlers(cc: &Arc<ClientSession>, pkt: &ToSrv) -> bool {
    INTERACTION_HANDLERS
        .handlers
        .read()
        .unwrap()
        .iter()
        .fold(false, |handled, h| h(cc, pkt) || handled)
}

pub fn run_block_data_handlers(cc: &Arc<ClientSession>, x: i16, y: i16, z: i16) -> bool {
    BLOCK_DATA_HANDLERS
        .handlers
        .read()
        .unwrap()
        .iter()
        .fold(false, |handled, h| h(cc, x, y, z) || handled)
}

pub fn run_ao_handlers(cc: &Arc<ClientSession>, msg: &AoMsg) -> bool {
    AO_HANDLERS
        .handlers
        .read()
        .unwrap()
        .iter()
        .fold(false, |handled, h| h(cc, msg) || handled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn registered_handler_runs_and_reports_handled() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);
        let reg: Registry<Arc<dyn Fn() -> bool + Send + Sync>> = Registry::new();
        reg.register(Arc::new(|| {
            CALLS.fetch_add(1, Ordering::SeqCst);
            true
        }));
        let handled = reg
            .handlers
            .read()
            .unwrap()
            .iter()
            .fold(false, |acc, h| h() || acc);
        assert!(handled);
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
    }
}
