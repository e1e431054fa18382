//! Server session (§3 Server record, §4.4): symmetric to the client
//! session but in the opposite role — a pseudo-client dialed against one
//! upstream, owning the upstream-visible mirror of game state the hop
//! engine needs to compute its undo set.
//!
//! Grounded on `server_conn.go` (`ServerConn`, `handleSrv`).

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;

use rand::RngCore;
use tokio::sync::{oneshot, watch, Mutex as AsyncMutex};
use tracing::{error, info, warn};

use crate::client::ClientSession;
use crate::error::ProxyError;
use crate::peer::UpstreamPeer;
use crate::rewrite::Inventory;
use crate::wire::{
    AuthMethod, ToClt, ToSrv, AOID, LATEST_PROTO_VER, LATEST_SERIALIZE_VER,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SrvState {
    Created,
    Init,
    Active,
}

#[derive(Default)]
pub struct ModChanWaitSet {
    pub join: HashMap<String, Vec<oneshot::Sender<bool>>>,
    pub leave: HashMap<String, Vec<oneshot::Sender<bool>>>,
}

#[derive(Default)]
pub struct MediaPush {
    pub token: String,
    pub ephemeral: bool,
}

pub struct ServerSession {
    pub peer: Arc<dyn UpstreamPeer>,
    pub name: String,
    pub media_pool: String,

    clt: std::sync::RwLock<Option<Weak<ClientSession>>>,
    state: std::sync::RwLock<SrvState>,

    pub inv: AsyncMutex<Inventory>,
    pub detached_invs: std::sync::RwLock<HashSet<String>>,
    pub aos: std::sync::RwLock<HashSet<AOID>>,
    pub particle_spawners: std::sync::RwLock<HashSet<u32>>,
    pub sounds: std::sync::RwLock<HashSet<u32>>,
    pub huds: std::sync::RwLock<HashMap<u32, crate::router::HudType>>,
    pub player_list: std::sync::RwLock<HashSet<String>>,
    pub media_pushes: std::sync::RwLock<HashMap<String, MediaPush>>,
    pub modchan_waits: AsyncMutex<ModChanWaitSet>,

    active_tx: watch::Sender<bool>,
    active_rx: watch::Receiver<bool>,
}

impl ServerSession {
    pub fn new(
        peer: Arc<dyn UpstreamPeer>,
        name: impl Into<String>,
        media_pool: impl Into<String>,
        clt: &Arc<ClientSession>,
    ) -> Arc<Self> {
        let (active_tx, active_rx) = watch::channel(false);
        Arc::new(Self {
            peer,
            name: name.into(),
            media_pool: media_pool.into(),
            clt: std::sync::RwLock::new(Some(Arc::downgrade(clt))),
            state: std::sync::RwLock::new(SrvState::Created),
            inv: AsyncMutex::new(Inventory::default()),
            detached_invs: std::sync::RwLock::new(HashSet::new()),
            aos: std::sync::RwLock::new(HashSet::new()),
            particle_spawners: std::sync::RwLock::new(HashSet::new()),
            sounds: std::sync::RwLock::new(HashSet::new()),
            huds: std::sync::RwLock::new(HashMap::new()),
            player_list: std::sync::RwLock::new(HashSet::new()),
            media_pushes: std::sync::RwLock::new(HashMap::new()),
            modchan_waits: AsyncMutex::new(ModChanWaitSet::default()),
            active_tx,
            active_rx,
        })
    }

    pub fn client(&self) -> Option<Arc<ClientSession>> {
        self.clt.read().unwrap().as_ref().and_then(Weak::upgrade)
    }

    pub fn state(&self) -> SrvState {
        *self.state.read().unwrap()
    }

    fn set_state(&self, s: SrvState) {
        *self.state.write().unwrap() = s;
        if s == SrvState::Active {
            let _ = self.active_tx.send(true);
        }
    }

    pub fn wait_active(&self) -> watch::Receiver<bool> {
        self.active_rx.clone()
    }

    /// Clears the back-reference to the client under lock — the weak-edge
    /// half of the mutual-pointer-cycle teardown (§9). Called by both the
    /// client's close path and the hop engine's detach step.
    pub fn detach_client(&self) {
        *self.clt.write().unwrap() = None;
    }

    /// Everything the undo set needs in one read: a snapshot of every live
    /// id this server session had installed (§4.5 step 3).
    pub fn undo_snapshot(&self) -> UndoSnapshot {
        UndoSnapshot {
            detached_invs: self.detached_invs.read().unwrap().iter().cloned().collect(),
            aos: self.aos.read().unwrap().iter().copied().collect(),
            particle_spawners: self.particle_spawners.read().unwrap().iter().copied().collect(),
            sounds: self.sounds.read().unwrap().iter().copied().collect(),
            huds: self.huds.read().unwrap().keys().copied().collect(),
            player_list: self.player_list.read().unwrap().iter().cloned().collect(),
        }
    }
}

pub struct UndoSnapshot {
    pub detached_invs: Vec<String>,
    pub aos: Vec<AOID>,
    pub particle_spawners: Vec<u32>,
    pub sounds: Vec<u32>,
    pub huds: Vec<u32>,
    pub player_list: Vec<String>,
}

/// 500ms init retransmitter (§4.4, §5): resends `Init` until the session
/// advances past Created, bounded by a 10s ceiling past which the socket
/// is closed outright.
async fn init_retransmitter(srv: Arc<ServerSession>, player_name: String) {
    let deadline = tokio::time::sleep(Duration::from_secs(10));
    tokio::pin!(deadline);

    loop {
        if srv.state() != SrvState::Created || srv.client().is_none() {
            return;
        }

        let send = srv.peer.send(crate::wire::ToSrv::Init {
            serialize_ver: LATEST_SERIALIZE_VER,
            max_proto_ver: LATEST_PROTO_VER,
            player_name: player_name.clone(),
        });

        tokio::select! {
            _ = send => {}
            _ = &mut deadline => {
                warn!(server = %srv.name, "init timeout");
                srv.peer.close();
                return;
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(500)) => {}
            _ = &mut deadline => {
                warn!(server = %srv.name, "init timeout");
                srv.peer.close();
                return;
            }
        }
    }
}

const HANDSHAKE_CEILING: Duration = Duration::from_secs(10);

/// Drives the pseudo-client handshake against the upstream (Hello -> SRP ->
/// AcceptAuth -> Init2 -> content bundles -> CltReady), then marks the
/// session Active. Unlike [`crate::content::mux_content`]'s pseudo-clients,
/// this connection stays open afterward and feeds the gameplay loop in
/// [`run`] instead of closing.
async fn handshake(srv: &Arc<ServerSession>) -> Result<(), ProxyError> {
    let player_name = srv.client().map(|c| c.name()).unwrap_or_default();
    let identity = crate::srp::upstream_identity(&player_name);
    let deadline = tokio::time::Instant::now() + HANDSHAKE_CEILING;

    let auth_method = loop {
        match tokio::time::timeout_at(deadline, srv.peer.recv()).await {
            Ok(Ok(ToClt::Hello { auth_method, .. })) => {
                srv.set_state(SrvState::Init);
                break auth_method;
            }
            Ok(Ok(_)) => continue,
            Ok(Err(_)) => return Err(ProxyError::Closed),
            Err(_) => return Err(ProxyError::Protocol("handshake timed out waiting for hello".into())),
        }
    };

    match auth_method {
        AuthMethod::FirstSrp => {
            let mut salt = vec![0u8; 16];
            rand::rngs::OsRng.fill_bytes(&mut salt);
            let verifier = crate::srp::compute_verifier(&identity, b"", &salt);
            srv.peer
                .send(ToSrv::FirstSrp {
                    salt,
                    verifier,
                    empty_passwd: true,
                })
                .await?;
        }
        AuthMethod::Srp => {
            let client = crate::srp::ClientHandshake::begin();
            srv.peer
                .send(ToSrv::SrpBytesA {
                    a: client.a_pub.clone(),
                    no_sha1: true,
                })
                .await?;

            let (salt, b_pub) = loop {
                match tokio::time::timeout_at(deadline, srv.peer.recv()).await {
                    Ok(Ok(ToClt::SrpBytesSaltB { salt, b })) => break (salt, b),
                    Ok(Ok(_)) => continue,
                    Ok(Err(_)) => return Err(ProxyError::Closed),
                    Err(_) => {
                        return Err(ProxyError::Protocol("handshake timed out waiting for srp salt/b".into()))
                    }
                }
            };

            let (_verifier, proof) = client
                .finish(&identity, b"", &salt, &b_pub)
                .map_err(|_| ProxyError::Protocol("srp safety check failed".into()))?;
            srv.peer.send(ToSrv::SrpBytesM { m: proof }).await?;
        }
    }

    loop {
        match tokio::time::timeout_at(deadline, srv.peer.recv()).await {
            Ok(Ok(ToClt::AcceptAuth { .. })) => break,
            Ok(Ok(_)) => continue,
            Ok(Err(_)) => return Err(ProxyError::Closed),
            Err(_) => return Err(ProxyError::Protocol("handshake timed out waiting for accept_auth".into())),
        }
    }

    let lang = srv
        .client()
        .map(|c| c.lang.read().unwrap().clone())
        .unwrap_or_default();
    srv.peer.send(ToSrv::Init2 { lang }).await?;

    let mut got_item_defs = false;
    let mut got_node_defs = false;
    let mut got_media_announce = false;
    loop {
        if got_item_defs && got_node_defs && got_media_announce {
            break;
        }
        match tokio::time::timeout_at(deadline, srv.peer.recv()).await {
            Ok(Ok(ToClt::ItemDefs { .. })) => got_item_defs = true,
            Ok(Ok(ToClt::NodeDefs { .. })) => got_node_defs = true,
            Ok(Ok(ToClt::AnnounceMedia { .. })) => {
                got_media_announce = true;
                // The client already has the merged catalog from content
                // multiplexing; nothing needs fetching a second time.
                srv.peer.send(ToSrv::ReqMedia { filenames: Vec::new() }).await?;
            }
            Ok(Ok(_)) => continue,
            Ok(Err(_)) => return Err(ProxyError::Closed),
            Err(_) => return Err(ProxyError::Protocol("handshake timed out waiting for content bundle".into())),
        }
    }

    let (major, minor, patch, reserved, version, formspec) = srv
        .client()
        .map(|c| {
            let v = c.version.read().unwrap();
            (v.major, v.minor, v.patch, v.reserved, v.version_str.clone(), v.formspec_ver)
        })
        .unwrap_or_default();
    srv.peer
        .send(ToSrv::CltReady {
            major,
            minor,
            patch,
            reserved,
            version,
            formspec,
        })
        .await?;

    mark_active(srv);
    Ok(())
}

/// The receive loop (`handleSrv` in the original): runs the upstream
/// handshake, then pulls packets off the peer until it closes, dispatching
/// each through the outbound router. Transport loss (handshake or gameplay)
/// triggers the fallback chain rather than propagating the close straight
/// to the client (§4.4).
pub async fn run(srv: Arc<ServerSession>) {
    let player_name = srv.client().map(|c| c.name()).unwrap_or_default();
    tokio::spawn(init_retransmitter(srv.clone(), player_name));

    if let Err(e) = handshake(&srv).await {
        error!(error = %e, server = %srv.name, "upstream handshake failed");
        srv.peer.close();
        if let Some(clt) = srv.client() {
            crate::fallback::on_upstream_lost(&clt, &srv).await;
        }
        return;
    }

    loop {
        match srv.peer.recv().await {
            Ok(pkt) => {
                if let Err(e) = crate::router::process_server_pkt(&srv, pkt).await {
                    error!(error = %e, "error processing upstream packet");
                }
            }
            Err(_) => {
                info!(server = %srv.name, "upstream transport closed");
                if let Some(clt) = srv.client() {
                    crate::fallback::on_upstream_lost(&clt, &srv).await;
                }
                break;
            }
        }
    }
}

pub(crate) fn mark_active(srv: &Arc<ServerSession>) {
    srv.set_state(SrvState::Active);
}
