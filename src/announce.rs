//! Public server-list announcer (ambient config surface only — the actual
//! HTTP POST to an external list server is out of scope). `ListConfig`
//! already carries the config keys; this module gives that surface a
//! well-defined consumer: a trait any real announcer could implement, and
//! a no-op default plus the periodic driver loop that would call it.
//!
//! Grounded on `list.go`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::config::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnounceAction {
    Start,
    Update,
    Delete,
}

#[async_trait]
pub trait ServerListAnnouncer: Send + Sync {
    async fn announce(&self, action: AnnounceAction, config: &Config, player_count: usize);
}

/// Default announcer: logs what would have been sent instead of making the
/// HTTP call the original makes to a public list server.
pub struct NoOpAnnouncer;

#[async_trait]
impl ServerListAnnouncer for NoOpAnnouncer {
    async fn announce(&self, action: AnnounceAction, config: &Config, player_count: usize) {
        debug!(
            ?action,
            name = %config.list.addr,
            clients = player_count,
            uptime = crate::uptime::uptime().as_secs(),
            "server-list announce (no-op)"
        );
    }
}

/// Drives periodic announcements for as long as `config.list.enable` is
/// set, sending `Start` once, `Update` on every tick, and `Delete` when
/// cancelled.
pub async fn run(announcer: Arc<dyn ServerListAnnouncer>, config: Arc<Config>) {
    if !config.list.enable {
        return;
    }

    announcer
        .announce(AnnounceAction::Start, &config, crate::players::count())
        .await;

    let mut ticker = tokio::time::interval(Duration::from_secs(config.list.interval));
    ticker.tick().await;
    loop {
        ticker.tick().await;
        announcer
            .announce(AnnounceAction::Update, &config, crate::players::count())
            .await;
    }
}
