//! Packet router, server→client leg (§4.3): per-packet switch that
//! validates state, translates ids and strings, and forwards or drops.
//! The client→server leg lives in [`crate::client::process`]; this module
//! is the other half of the same table.

use std::sync::Arc;

use tracing::{info, warn};

use crate::client::ClientSession;
use crate::error::ProxyError;
use crate::rewrite::{prepend, prepend_formspec, prepend_inv};
use crate::server::ServerSession;
use crate::wire::{
    AoAdd, AoMsg, KickReason, PlayerListUpdate, ToClt, MEDIA_BUNCH_BYTES, AOID,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HudType {
    Statbar,
    Image,
    ImageWaypoint,
    Other,
}

/// Serves requested media in size-bounded bunches of at most
/// [`MEDIA_BUNCH_BYTES`] payload bytes each (§4.2 step 3, §8 boundary:
/// a file bigger than the limit is the sole occupant of its bunch).
pub async fn send_media(cc: &Arc<ClientSession>, filenames: &[String]) {
    let catalog = match cc.catalog.read().unwrap().clone() {
        Some(c) => c,
        None => return,
    };

    let wanted: Vec<_> = catalog
        .media
        .iter()
        .filter(|f| filenames.contains(&f.name))
        .collect();

    let mut bunch = Vec::new();
    let mut bunch_bytes = 0usize;

    for file in wanted {
        if !bunch.is_empty() && bunch_bytes + file.data.len() > MEDIA_BUNCH_BYTES {
            flush_media_bunch(cc, std::mem::take(&mut bunch)).await;
            bunch_bytes = 0;
        }
        bunch_bytes += file.data.len();
        bunch.push(file.clone());
        if bunch_bytes >= MEDIA_BUNCH_BYTES {
            flush_media_bunch(cc, std::mem::take(&mut bunch)).await;
            bunch_bytes = 0;
        }
    }
    if !bunch.is_empty() {
        flush_media_bunch(cc, bunch).await;
    }
}

async fn flush_media_bunch(cc: &Arc<ClientSession>, files: Vec<crate::wire::MediaFile>) {
    let _ = cc.peer.send(ToClt::Media { files }).await;
}

/// Dispatches one upstream-originated command to its client. Never treats
/// a malformed translation as fatal (§7): logs and forwards unchanged.
pub async fn process_server_pkt(srv: &Arc<ServerSession>, pkt: ToClt) -> Result<(), ProxyError> {
    let cc = match srv.client() {
        Some(cc) => cc,
        None => return Ok(()),
    };

    match pkt {
        ToClt::ItemDefs { .. } | ToClt::NodeDefs { .. } => {
            if cc.state() == crate::client::SessionState::Active {
                // Already has the merged catalog; drop (§4.3).
            } else {
                let _ = cc.peer.send(pkt).await;
            }
        }
        ToClt::Inv { raw } => {
            // Opaque inventory bytes are forwarded verbatim; the logical
            // mirror (used by the hop engine and `prependInv`) is
            // maintained separately wherever a structured `Inventory` is
            // available (media pushes, detached invs).
            let _ = cc.peer.send(ToClt::Inv { raw }).await;
        }
        ToClt::AoRmAdd { remove, add } => {
            handle_ao_rm_add(&cc, srv, remove, add).await;
        }
        ToClt::AoMsgs { messages } => {
            for m in &messages {
                crate::hooks::run_ao_handlers(&cc, m);
            }
            let swapped = messages
                .into_iter()
                .map(|m| AoMsg {
                    id: cc.swap_aoid(m.id),
                    data: m.data,
                })
                .collect();
            let _ = cc.peer.send(ToClt::AoMsgs { messages: swapped }).await;
        }
        ToClt::DetachedInv { name, keep, raw } => {
            if keep {
                srv.detached_invs.write().unwrap().insert(name.clone());
            } else {
                srv.detached_invs.write().unwrap().remove(&name);
            }
            let _ = cc.peer.send(ToClt::DetachedInv { name, keep, raw }).await;
        }
        ToClt::FormspecShow { formspec } => {
            let mangled = prepend_formspec(&srv.media_pool, &formspec);
            let _ = cc.peer.send(ToClt::FormspecShow { formspec: mangled }).await;
        }
        ToClt::FormspecPrepend { formspec } => {
            let mangled = prepend_formspec(&srv.media_pool, &formspec);
            let _ = cc
                .peer
                .send(ToClt::FormspecPrepend { formspec: mangled })
                .await;
        }
        ToClt::NodeMetasChanged { raw } => {
            let _ = cc.peer.send(ToClt::NodeMetasChanged { raw }).await;
        }
        ToClt::BlkData { pos, param0 } => {
            crate::hooks::run_block_data_handlers(&cc, pos.0, pos.1, pos.2);
            let p0_map = cc.p0_map.read().unwrap();
            let mapping = p0_map.get(&srv.name);
            let translated = param0
                .into_iter()
                .map(|p| mapping.and_then(|m| m.get(&p)).copied().unwrap_or(p))
                .collect();
            let _ = cc
                .peer
                .send(ToClt::BlkData {
                    pos,
                    param0: translated,
                })
                .await;
        }
        ToClt::AddNode {
            pos,
            param0,
            param1,
            param2,
        } => {
            crate::hooks::run_block_data_handlers(&cc, pos.0, pos.1, pos.2);
            let translated = cc
                .p0_map
                .read()
                .unwrap()
                .get(&srv.name)
                .and_then(|m| m.get(&param0))
                .copied()
                .unwrap_or(param0);
            let _ = cc
                .peer
                .send(ToClt::AddNode {
                    pos,
                    param0: translated,
                    param1,
                    param2,
                })
                .await;
        }
        ToClt::MediaPush {
            filename,
            token,
            ephemeral,
        } => {
            let mangled = prepend(&srv.media_pool, &filename);
            let known = cc
                .catalog
                .read()
                .unwrap()
                .as_ref()
                .map(|c| c.media.iter().any(|f| f.name == mangled))
                .unwrap_or(false);
            if known {
                return Ok(());
            }
            srv.media_pushes.write().unwrap().insert(
                mangled.clone(),
                crate::server::MediaPush {
                    token: token.clone(),
                    ephemeral,
                },
            );
            let _ = cc
                .peer
                .send(ToClt::MediaPush {
                    filename: mangled,
                    token,
                    ephemeral,
                })
                .await;
        }
        ToClt::UpdatePlayerList { kind, players } => {
            let kind = if kind == PlayerListUpdate::Init {
                if cc
                    .player_list_init
                    .swap(true, std::sync::atomic::Ordering::SeqCst)
                {
                    PlayerListUpdate::Add
                } else {
                    PlayerListUpdate::Init
                }
            } else {
                kind
            };
            {
                let mut list = srv.player_list.write().unwrap();
                match kind {
                    PlayerListUpdate::Remove => {
                        for p in &players {
                            list.remove(p);
                        }
                    }
                    _ => {
                        for p in &players {
                            list.insert(p.clone());
                        }
                    }
                }
            }
            let _ = cc.peer.send(ToClt::UpdatePlayerList { kind, players }).await;
        }
        ToClt::Kick { reason } => {
            if reason.triggers_fallback() {
                crate::fallback::on_kick(&cc, srv, reason).await;
            } else {
                let ack = cc.peer.send(ToClt::Kick { reason }).await;
                if let Ok(ack) = ack {
                    let mut closed = cc.peer.closed();
                    tokio::select! {
                        _ = closed.changed() => {}
                        _ = ack => {}
                    }
                }
                cc.peer.close();
            }
        }
        ToClt::ModChanSig {
            channel,
            join,
            success,
        } => {
            if success {
                let mut chans = cc.modchannels.write().unwrap();
                if join {
                    chans.insert(channel.clone());
                } else {
                    chans.remove(&channel);
                }
            }
            crate::modchan::resolve_wait(srv, &channel, join, success).await;
            let _ = cc
                .peer
                .send(ToClt::ModChanSig {
                    channel,
                    join,
                    success,
                })
                .await;
        }
        other => {
            let _ = cc.peer.send(other).await;
        }
    }

    Ok(())
}

/// AO add/remove translation (§4.3): pins the first AO whose init data
/// names the client's own player as `playerCAO`; any later collision on
/// that name is redirected back onto the pinned id via the swap and
/// delivered as an `AoMsgs` batch instead of a second add.
async fn handle_ao_rm_add(
    cc: &Arc<ClientSession>,
    srv: &Arc<ServerSession>,
    remove: Vec<AOID>,
    add: Vec<AoAdd>,
) {
    {
        let mut aos = srv.aos.write().unwrap();
        for id in &remove {
            aos.remove(id);
        }
    }

    let mut kept_add = Vec::new();
    let mut redirected = Vec::new();

    for entry in add {
        let is_player = entry.init_name == cc.name();
        let already_pinned = cc.player_cao.read().unwrap().is_some();

        if is_player && !already_pinned {
            *cc.player_cao.write().unwrap() = Some(entry.id);
            *cc.current_cao.write().unwrap() = Some(entry.id);
            srv.aos.write().unwrap().insert(entry.id);
            kept_add.push(entry);
        } else if is_player {
            // Collision: redirect this "new" player id back onto the
            // pinned playerCAO via the swap, deliver as AoMsgs.
            srv.aos.write().unwrap().insert(entry.id);
            redirected.push(AoMsg {
                id: cc.swap_aoid(entry.id),
                data: entry.data,
            });
        } else {
            srv.aos.write().unwrap().insert(entry.id);
            kept_add.push(AoAdd {
                id: cc.swap_aoid(entry.id),
                init_name: entry.init_name,
                data: entry.data,
            });
        }
    }

    if !remove.is_empty() || !kept_add.is_empty() {
        let swapped_remove = remove.into_iter().map(|id| cc.swap_aoid(id)).collect();
        let _ = cc
            .peer
            .send(ToClt::AoRmAdd {
                remove: swapped_remove,
                add: kept_add,
            })
            .await;
    }
    if !redirected.is_empty() {
        let _ = cc.peer.send(ToClt::AoMsgs { messages: redirected }).await;
    }
}

/// Translates a named inventory's stack names through the pool tag before
/// it's handed to `prependInv`-using call sites (detached invs, the
/// server's own inventory mirror).
pub fn mangle_inventory(pool: &str, inv: &mut crate::rewrite::Inventory) {
    prepend_inv(pool, inv);
}

pub fn log_dropped(reason: &str) {
    warn!(reason, "dropped packet");
}

pub fn log_info(msg: &str) {
    info!(msg);
}

pub fn describe_kick_reason(reason: &KickReason) -> String {
    reason.to_string()
}
