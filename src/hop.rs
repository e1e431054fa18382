//! Server-hop engine (§4.5): moves a client from its current upstream to a
//! new one without a reconnect — detach, undo, dial, install, resubscribe.
//! Every caller (the chat/admin hop command, the fallback chain) holds the
//! client's hop mutex for the duration, so concurrent hops serialize.
//!
//! Grounded on `hop.go`.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::client::ClientSession;
use crate::error::ProxyError;
use crate::server::ServerSession;
use crate::wire::{HotbarParam, PlayerListUpdate, ToClt, AOID};

/// Moves `cc` onto `addr` (named `name`, media pool `pool`), replacing
/// whatever server session it currently has.
pub async fn hop_to(
    cc: &Arc<ClientSession>,
    name: &str,
    addr: &str,
    pool: &str,
) -> Result<(), ProxyError> {
    let old = cc.srv.write().unwrap().take();

    if let Some(old) = &old {
        undo(cc, old).await;
        old.detach_client();
        old.peer.close();
    }

    let dialer = crate::listen::default_dialer();
    let peer = dialer.dial(addr).await.map_err(ProxyError::ContentMux)?;

    let new_srv = ServerSession::new(peer, name, pool, cc);
    tokio::spawn(crate::server::run(new_srv.clone()));

    let mut active = new_srv.wait_active();
    let _ = active.changed().await;

    *cc.srv.write().unwrap() = Some(new_srv.clone());

    rejoin_modchannels(&new_srv).await;

    if let Some(raw) = cc.cached_clt_info.read().unwrap().clone() {
        let _ = new_srv
            .peer
            .send(crate::wire::ToSrv::CltInfo { raw })
            .await;
    }

    let config = crate::config::current();
    if !config.force_default_srv {
        let _ = cc.auth_backend.set_last_srv(&cc.name(), name).await;
    }

    info!(client = %cc.name(), server = %name, "hopped");
    Ok(())
}

/// Emits the ordered undo set for the old server's installed state (§4.5
/// step 3): every id the client still thinks is live gets cleared before
/// the new server has a chance to reuse it, and every per-player scalar
/// the client retains across hops is reset to its factory default.
async fn undo(cc: &Arc<ClientSession>, old: &Arc<ServerSession>) {
    let snapshot = old.undo_snapshot();

    for name in &snapshot.detached_invs {
        let _ = cc
            .peer
            .send(ToClt::DetachedInv {
                name: name.clone(),
                keep: false,
                raw: Vec::new(),
            })
            .await;
    }
    for id in &snapshot.particle_spawners {
        let _ = cc.peer.send(ToClt::DelParticleSpawner { id: *id }).await;
    }
    for id in &snapshot.sounds {
        let _ = cc.peer.send(ToClt::StopSound { id: *id }).await;
    }
    for id in &snapshot.huds {
        let _ = cc.peer.send(ToClt::RmHud { id: *id }).await;
    }
    if !snapshot.player_list.is_empty() {
        let _ = cc
            .peer
            .send(ToClt::UpdatePlayerList {
                kind: PlayerListUpdate::Remove,
                players: snapshot.player_list.clone(),
            })
            .await;
    }
    if !snapshot.aos.is_empty() {
        let remove: Vec<AOID> = snapshot.aos.clone();
        let _ = cc
            .peer
            .send(ToClt::AoRmAdd {
                remove,
                add: Vec::new(),
            })
            .await;
    }

    let _ = cc.peer.send(ToClt::CloudParams).await;
    let _ = cc.peer.send(ToClt::SkyParams).await;
    let _ = cc.peer.send(ToClt::StarParams).await;
    let _ = cc.peer.send(ToClt::SunParams).await;
    let _ = cc.peer.send(ToClt::MoonParams).await;
    let _ = cc.peer.send(ToClt::Movement).await;
    let _ = cc.peer.send(ToClt::LocalPlayerAnim).await;
    let _ = cc.peer.send(ToClt::MinimapModes).await;
    let _ = cc.peer.send(ToClt::EyeOffset).await;
    let _ = cc.peer.send(ToClt::Fov).await;
    let _ = cc
        .peer
        .send(ToClt::OverrideDayNightRatio { value: None })
        .await;
    let _ = cc
        .peer
        .send(ToClt::HudFlags {
            mask: u32::MAX,
            flags: 0,
        })
        .await;
    let _ = cc.peer.send(ToClt::Breath { value: 11 }).await;
    let _ = cc.peer.send(ToClt::Hp { value: 20 }).await;
    let _ = cc.peer.send(ToClt::Privs { privs: Vec::new() }).await;
    let _ = cc
        .peer
        .send(ToClt::FormspecPrepend {
            formspec: String::new(),
        })
        .await;
    let _ = cc
        .peer
        .send(ToClt::HotbarParam {
            param: HotbarParam::ItemCount(8),
        })
        .await;
    let _ = cc
        .peer
        .send(ToClt::HotbarParam {
            param: HotbarParam::Image(String::new()),
        })
        .await;
    let _ = cc
        .peer
        .send(ToClt::HotbarParam {
            param: HotbarParam::SelectedImage(String::new()),
        })
        .await;
}

async fn rejoin_modchannels(srv: &Arc<ServerSession>) {
    let Some(cc) = srv.client() else { return };
    let channels: Vec<String> = cc.modchannels.read().unwrap().iter().cloned().collect();
    for channel in channels {
        let wait = crate::modchan::wait_for_join(srv, &channel).await;
        let _ = srv
            .peer
            .send(crate::wire::ToSrv::JoinModChan { channel })
            .await;
        let _ = tokio::time::timeout(Duration::from_secs(5), wait).await;
    }
}
