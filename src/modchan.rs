//! Modchannel pub/sub (§4.3): per-channel local subscriber fan-out, plus
//! join/leave wait-sets resolved by the upstream's `ModChanSig` acks.
//!
//! Grounded on `modchannels.go`.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use lazy_static::lazy_static;
use tokio::sync::oneshot;

use crate::client::ClientSession;
use crate::server::ServerSession;

lazy_static! {
    static ref SUBSCRIBERS: DashMap<String, HashSet<String>> = DashMap::new();
}

/// Records local subscription intent. The channel only becomes live once
/// the upstream's `ModChanSig{join: true, success: true}` arrives; until
/// then messages sent into it still fan out locally (matching the
/// original's treatment of modchannels as proxy-local, not per-upstream).
pub fn join(cc: &Arc<ClientSession>, channel: &str) {
    SUBSCRIBERS
        .entry(channel.to_string())
        .or_default()
        .insert(cc.name());
}

pub fn leave(cc: &Arc<ClientSession>, channel: &str) {
    if let Some(mut subs) = SUBSCRIBERS.get_mut(channel) {
        subs.remove(&cc.name());
    }
}

/// Delivers a modchannel message to every other local subscriber of
/// `channel`, regardless of which upstream they're currently attached to.
pub async fn broadcast_local(channel: &str, sender: &Arc<ClientSession>, msg: &str) {
    let recipients: Vec<String> = match SUBSCRIBERS.get(channel) {
        Some(subs) => subs
            .iter()
            .filter(|n| **n != sender.name())
            .cloned()
            .collect(),
        None => return,
    };

    for name in recipients {
        if let Some(cc) = crate::players::find(&name) {
            cc.send_chat_msg(format!("[{channel}] {}: {msg}", sender.name()))
                .await;
        }
    }
}

/// Resolves any client waiting on a join/leave ack for `channel` on this
/// server session (the hop engine waits on these before treating a
/// re-subscribe as complete).
pub async fn resolve_wait(srv: &Arc<ServerSession>, channel: &str, join: bool, success: bool) {
    let mut waits = srv.modchan_waits.lock().await;
    let set = if join { &mut waits.join } else { &mut waits.leave };
    if let Some(waiters) = set.remove(channel) {
        for tx in waiters {
            let _ = tx.send(success);
        }
    }
}

pub async fn wait_for_join(srv: &Arc<ServerSession>, channel: &str) -> oneshot::Receiver<bool> {
    let (tx, rx) = oneshot::channel();
    srv.modchan_waits
        .lock()
        .await
        .join
        .entry(channel.to_string())
        .or_default()
        .push(tx);
    rx
}
