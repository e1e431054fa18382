//! Automatic fallback (§4.5): when an upstream's transport disappears
//! unexpectedly, or kicks with a reason in [`KickReason::triggers_fallback`],
//! try the server's own fallback list, then the global one, before giving up
//! and kicking the client with the reason that started the chain.
//!
//! Grounded on `fallback.go`.

use std::sync::Arc;

use tracing::{error, warn};

use crate::client::ClientSession;
use crate::server::ServerSession;
use crate::wire::KickReason;

pub async fn on_upstream_lost(cc: &Arc<ClientSession>, srv: &Arc<ServerSession>) {
    attempt_fallback(cc, srv, KickReason::SrvErr).await;
}

pub async fn on_kick(cc: &Arc<ClientSession>, srv: &Arc<ServerSession>, reason: KickReason) {
    attempt_fallback(cc, srv, reason).await;
}

async fn attempt_fallback(
    cc: &Arc<ClientSession>,
    srv: &Arc<ServerSession>,
    original_reason: KickReason,
) {
    let config = crate::config::current();
    let chain = config.fallback_chain_for(&srv.name);

    if chain.is_empty() {
        cc.kick(original_reason).await;
        return;
    }

    let _guard = cc.hop_mutex.lock().await;

    for candidate in &chain {
        let Some(entry) = config.servers.get(candidate) else {
            warn!(server = %candidate, "fallback server not configured");
            continue;
        };
        let pool = config
            .media_pool_of(candidate)
            .unwrap_or_else(|| candidate.clone());

        match crate::hop::hop_to(cc, candidate, &entry.addr, &pool).await {
            Ok(()) => {
                cc.send_chat_msg(format!("Moved to fallback server {candidate}."))
                    .await;
                return;
            }
            Err(e) => {
                error!(server = %candidate, error = %e, "fallback attempt failed");
            }
        }
    }

    warn!(client = %cc.name(), "all fallback servers exhausted");
    cc.kick(original_reason).await;
}
