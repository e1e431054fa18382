//! Client session (§3 Client record, §4.3): terminates the client
//! handshake, owns client-visible state, dispatches inbound packets.
//!
//! Grounded on `client_conn.go` (`ClientConn`, `handleClt`) and
//! `process.go` (`(*ClientConn).process`).

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, RwLock};

use tokio::sync::{watch, Mutex};
use tracing::{error, info, warn};

use crate::auth::AuthBackend;
use crate::config::Config;
use crate::content::{Catalog, Param0Map, Param0SrvMap};
use crate::error::ProxyError;
use crate::peer::ClientPeer;
use crate::server::ServerSession;
use crate::wire::{
    AuthMethod, KickReason, Pointed, ToClt, ToSrv, AOID, LATEST_PROTO_VER, LATEST_SERIALIZE_VER,
    MAX_PLAYER_NAME_LEN,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum SessionState {
    Created = 0,
    Init = 1,
    Active = 2,
    Sudo = 3,
}

impl SessionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => SessionState::Created,
            1 => SessionState::Init,
            2 => SessionState::Active,
            _ => SessionState::Sudo,
        }
    }
}

#[derive(Default)]
pub struct AuthScratch {
    pub method: Option<AuthMethod>,
    pub salt: Vec<u8>,
    pub srp_a: Vec<u8>,
    pub handshake: Option<crate::srp::ServerHandshake>,
}

#[derive(Default)]
pub struct VersionInfo {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
    pub reserved: u8,
    pub version_str: String,
    pub formspec_ver: u16,
}

pub struct ClientSession {
    pub peer: Arc<dyn ClientPeer>,
    pub auth_backend: Arc<dyn AuthBackend>,

    state: AtomicU8,
    name: RwLock<String>,
    pub lang: RwLock<String>,
    pub version: RwLock<VersionInfo>,
    pub auth: Mutex<AuthScratch>,

    pub catalog: RwLock<Option<Arc<Catalog>>>,
    pub p0_map: RwLock<Param0Map>,
    pub p0_srv_map: RwLock<Param0SrvMap>,

    pub srv: RwLock<Option<Arc<ServerSession>>>,
    pub hop_mutex: Mutex<()>,

    pub player_cao: RwLock<Option<AOID>>,
    pub current_cao: RwLock<Option<AOID>>,

    pub modchannels: RwLock<HashSet<String>>,
    pub player_list_init: std::sync::atomic::AtomicBool,

    pub cached_clt_info: RwLock<Option<Vec<u8>>>,

    active_tx: watch::Sender<bool>,
    active_rx: watch::Receiver<bool>,
}

impl ClientSession {
    pub fn new(peer: Arc<dyn ClientPeer>, auth_backend: Arc<dyn AuthBackend>) -> Arc<Self> {
        let (active_tx, active_rx) = watch::channel(false);
        Arc::new(Self {
            peer,
            auth_backend,
            state: AtomicU8::new(SessionState::Created as u8),
            name: RwLock::new(String::new()),
            lang: RwLock::new(String::new()),
            version: RwLock::new(VersionInfo::default()),
            auth: Mutex::new(AuthScratch::default()),
            catalog: RwLock::new(None),
            p0_map: RwLock::new(Default::default()),
            p0_srv_map: RwLock::new(Default::default()),
            srv: RwLock::new(None),
            hop_mutex: Mutex::new(()),
            player_cao: RwLock::new(None),
            current_cao: RwLock::new(None),
            modchannels: RwLock::new(HashSet::new()),
            player_list_init: std::sync::atomic::AtomicBool::new(false),
            cached_clt_info: RwLock::new(None),
            active_tx,
            active_rx,
        })
    }

    pub fn name(&self) -> String {
        self.name.read().unwrap().clone()
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, s: SessionState) {
        self.state.store(s as u8, Ordering::SeqCst);
        if s == SessionState::Active {
            let _ = self.active_tx.send(true);
        }
    }

    /// Resolves once the session reaches Active. Matches `cc.Init()` in the
    /// original, which the init retransmitter watches to know when to stop.
    pub fn wait_active(&self) -> watch::Receiver<bool> {
        self.active_rx.clone()
    }

    pub fn server(&self) -> Option<Arc<ServerSession>> {
        self.srv.read().unwrap().clone()
    }

    /// Sends a terminal packet (kick/disconnect) then closes once it's
    /// acked or the peer is already closed — the `select{ Closed; Ack }`
    /// pattern repeated throughout the original (§4.3, §9).
    async fn send_and_close(&self, cmd: ToClt) {
        match self.peer.send(cmd).await {
            Ok(ack) => {
                let mut closed = self.peer.closed();
                tokio::select! {
                    _ = closed.changed() => {}
                    _ = ack => {}
                }
            }
            Err(_) => {}
        }
        self.peer.close();
    }

    pub async fn kick(&self, reason: KickReason) {
        info!(reason = %reason, "kicking client");
        self.send_and_close(ToClt::Disco { reason }).await;
    }

    pub async fn send_chat_msg(&self, msg: impl Into<String>) {
        let _ = self
            .peer
            .send(ToClt::Other {
                tag: "ChatMsg".to_string(),
                raw: msg.into().into_bytes(),
            })
            .await;
    }

    /// Swaps an AO id through the player/current-CAO permutation (§3
    /// invariant 4): either pinned id crossing the boundary is replaced
    /// with the other.
    pub fn swap_aoid(&self, id: AOID) -> AOID {
        let player = *self.player_cao.read().unwrap();
        let current = *self.current_cao.read().unwrap();
        match (player, current) {
            (Some(p), Some(c)) if id == p => c,
            (Some(p), Some(c)) if id == c => p,
            _ => id,
        }
    }
}

/// The peer trait only exposes `remote_addr()` as a display string (it may
/// come from a UDP socket or an in-memory test double); parse the IP back
/// out for the auth backend's ban/rate-limit keys.
fn remote_ip(cc: &Arc<ClientSession>) -> IpAddr {
    cc.peer
        .remote_addr()
        .parse::<std::net::SocketAddr>()
        .map(|a| a.ip())
        .unwrap_or(IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED))
}

fn valid_name_chars(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Global state the handshake needs that lives outside any one session:
/// the player-name set, ban list, user-limit check. Bundled so `process`
/// doesn't need a dozen separate globals threaded through.
pub struct HandshakeContext {
    pub config: Arc<Config>,
    pub remote_addr: IpAddr,
}

/// The per-packet router (§4.3). Owns no state of its own; every branch
/// reads/writes through `cc`. Returns `Ok(())` having either handled the
/// packet or forwarded it; never panics on malformed input.
pub async fn process(
    cc: &Arc<ClientSession>,
    ctx: &HandshakeContext,
    pkt: ToSrv,
) -> Result<(), ProxyError> {
    match pkt {
        ToSrv::Nil => {}
        ToSrv::Init {
            serialize_ver,
            max_proto_ver,
            player_name,
        } => {
            handle_init(cc, ctx, serialize_ver, max_proto_ver, player_name).await;
        }
        ToSrv::FirstSrp {
            salt,
            verifier,
            empty_passwd,
        } => {
            handle_first_srp(cc, ctx, salt, verifier, empty_passwd).await;
        }
        ToSrv::SrpBytesA { a, no_sha1 } => {
            handle_srp_bytes_a(cc, a, no_sha1).await;
        }
        ToSrv::SrpBytesM { m } => {
            handle_srp_bytes_m(cc, m).await;
        }
        ToSrv::Init2 { lang } => {
            handle_init2(cc, ctx, lang).await;
        }
        ToSrv::ReqMedia { filenames } => {
            crate::router::send_media(cc, &filenames).await;
        }
        ToSrv::CltReady {
            major,
            minor,
            patch,
            reserved,
            version,
            formspec,
        } => {
            *cc.version.write().unwrap() = VersionInfo {
                major,
                minor,
                patch,
                reserved,
                version_str: version,
                formspec_ver: formspec,
            };
            cc.set_state(SessionState::Active);
            crate::players::attach(cc.clone());
        }
        ToSrv::Interact { pointed, raw } => {
            let pointed = match pointed {
                Pointed::Object { id } => Pointed::Object {
                    id: cc.swap_aoid(id),
                },
                other => other,
            };
            crate::hooks::run_interaction_handlers(cc, &ToSrv::Interact { pointed: pointed.clone(), raw: raw.clone() });
            forward_to_server(cc, ToSrv::Interact { pointed, raw }).await;
        }
        ToSrv::ChatMsg { message } => {
            crate::chatcmd::handle_chat_msg(cc, message).await;
        }
        ToSrv::CltInfo { raw } => {
            *cc.cached_clt_info.write().unwrap() = Some(raw.clone());
            forward_to_server(cc, ToSrv::CltInfo { raw }).await;
        }
        ToSrv::JoinModChan { channel } => {
            crate::modchan::join(cc, &channel);
            forward_to_server(cc, ToSrv::JoinModChan { channel }).await;
        }
        ToSrv::LeaveModChan { channel } => {
            crate::modchan::leave(cc, &channel);
            forward_to_server(cc, ToSrv::LeaveModChan { channel }).await;
        }
        ToSrv::MsgModChan { channel, msg } => {
            crate::modchan::broadcast_local(&channel, cc, &msg).await;
            forward_to_server(cc, ToSrv::MsgModChan { channel, msg }).await;
        }
        other @ ToSrv::Other { .. } => {
            forward_to_server(cc, other).await;
        }
    }

    Ok(())
}

async fn forward_to_server(cc: &Arc<ClientSession>, pkt: ToSrv) {
    match cc.server() {
        Some(srv) => {
            let _ = srv.peer.send(pkt).await;
        }
        None => warn!(client = %cc.name(), "no server, dropping packet"),
    }
}

async fn disco_and_close(cc: &Arc<ClientSession>, reason: KickReason) {
    cc.kick(reason).await;
}

async fn handle_init(
    cc: &Arc<ClientSession>,
    ctx: &HandshakeContext,
    serialize_ver: u8,
    max_proto_ver: u16,
    player_name: String,
) {
    if cc.state() > SessionState::Created {
        warn!("duplicate init");
        return;
    }
    cc.set_state(SessionState::Init);

    if serialize_ver != LATEST_SERIALIZE_VER || max_proto_ver < LATEST_PROTO_VER {
        disco_and_close(cc, KickReason::UnsupportedVer).await;
        return;
    }

    if player_name.is_empty() || player_name.len() > MAX_PLAYER_NAME_LEN {
        disco_and_close(cc, KickReason::BadName).await;
        return;
    }
    if !valid_name_chars(&player_name) {
        disco_and_close(cc, KickReason::BadNameChars).await;
        return;
    }

    if ctx.config.servers.is_empty() {
        warn!("no servers configured");
    }

    if cc
        .auth_backend
        .banned(ctx.remote_addr, &player_name)
        .await
    {
        disco_and_close(cc, KickReason::Banned).await;
        return;
    }

    if !crate::players::try_register(&player_name) {
        disco_and_close(cc, KickReason::AlreadyConnected).await;
        return;
    }

    *cc.name.write().unwrap() = player_name.clone();

    if player_name == "singleplayer" {
        crate::players::unregister(&player_name);
        disco_and_close(cc, KickReason::BadName).await;
        return;
    }

    if crate::players::count() > ctx.config.user_limit {
        crate::players::unregister(&player_name);
        disco_and_close(cc, KickReason::TooManyClts).await;
        return;
    }

    let method = if cc.auth_backend.exists(&player_name).await {
        AuthMethod::Srp
    } else {
        AuthMethod::FirstSrp
    };
    cc.auth.lock().await.method = Some(method);

    let _ = cc
        .peer
        .send(ToClt::Hello {
            serialize_ver: LATEST_SERIALIZE_VER,
            proto_ver: LATEST_PROTO_VER,
            auth_method: method,
            username: player_name,
        })
        .await;
}

async fn handle_first_srp(
    cc: &Arc<ClientSession>,
    ctx: &HandshakeContext,
    salt: Vec<u8>,
    verifier: Vec<u8>,
    empty_passwd: bool,
) {
    if cc.state() == SessionState::Init {
        let mut auth = cc.auth.lock().await;
        if auth.method != Some(AuthMethod::FirstSrp) {
            drop(auth);
            disco_and_close(cc, KickReason::UnexpectedData).await;
            return;
        }
        *auth = AuthScratch::default();
        drop(auth);

        if empty_passwd && ctx.config.require_passwd {
            disco_and_close(cc, KickReason::EmptyPasswd).await;
            return;
        }

        if cc
            .auth_backend
            .set_passwd(&cc.name(), &salt, &verifier)
            .await
            .is_err()
        {
            disco_and_close(cc, KickReason::SrvErr).await;
            return;
        }

        let _ = cc
            .peer
            .send(ToClt::AcceptAuth {
                player_pos: (0.0, 5.0, 0.0),
                map_seed: 0,
                send_interval: ctx.config.send_interval,
                sudo_auth_method: AuthMethod::Srp,
            })
            .await;
    } else {
        if cc.state() < SessionState::Sudo {
            warn!("unauthorized sudo action");
            return;
        }
        cc.set_state(SessionState::Active);
        if cc
            .auth_backend
            .set_passwd(&cc.name(), &salt, &verifier)
            .await
            .is_err()
        {
            cc.send_chat_msg("Password change failed or unavailable.")
                .await;
            return;
        }
        cc.send_chat_msg("Password change successful.").await;
    }
}

async fn handle_srp_bytes_a(cc: &Arc<ClientSession>, a: Vec<u8>, no_sha1: bool) {
    let want_sudo = cc.state() == SessionState::Active;
    if cc.state() != SessionState::Init && cc.state() != SessionState::Active {
        warn!("unexpected authentication");
        return;
    }

    {
        let auth = cc.auth.lock().await;
        if !want_sudo && auth.method != Some(AuthMethod::Srp) {
            drop(auth);
            disco_and_close(cc, KickReason::UnexpectedData).await;
            return;
        }
    }

    if !no_sha1 {
        warn!("unsupported SHA1 auth");
        return;
    }

    let (salt, verifier) = match cc.auth_backend.passwd(&cc.name()).await {
        Ok(v) => v,
        Err(_) => {
            disco_and_close(cc, KickReason::SrvErr).await;
            return;
        }
    };

    let handshake = match crate::srp::ServerHandshake::begin(&verifier, &a) {
        Some(h) => h,
        None => {
            disco_and_close(cc, KickReason::UnexpectedData).await;
            return;
        }
    };

    let b_pub = handshake.b_pub.clone();
    {
        let mut auth = cc.auth.lock().await;
        auth.method = Some(AuthMethod::Srp);
        auth.salt = salt.clone();
        auth.srp_a = a;
        auth.handshake = Some(handshake);
    }

    let _ = cc
        .peer
        .send(ToClt::SrpBytesSaltB { salt, b: b_pub })
        .await;
}

async fn handle_srp_bytes_m(cc: &Arc<ClientSession>, m: Vec<u8>) {
    let want_sudo = cc.state() == SessionState::Active;
    if cc.state() != SessionState::Init && cc.state() != SessionState::Active {
        warn!("unexpected authentication");
        return;
    }

    let (a_pub, ok) = {
        let auth = cc.auth.lock().await;
        if auth.method != Some(AuthMethod::Srp) {
            (Vec::new(), false)
        } else {
            (auth.srp_a.clone(), true)
        }
    };
    if !ok {
        if want_sudo {
            let _ = cc.peer.send(ToClt::DenySudoMode).await;
        } else {
            disco_and_close(cc, KickReason::UnexpectedData).await;
        }
        return;
    }

    let verify_result = {
        let auth = cc.auth.lock().await;
        auth.handshake
            .as_ref()
            .map(|h| h.verify(&a_pub, &m))
    };

    match verify_result {
        Some(Ok(_key)) => {
            *cc.auth.lock().await = AuthScratch::default();
            if want_sudo {
                cc.set_state(SessionState::Sudo);
                let _ = cc.peer.send(ToClt::AcceptSudoMode).await;
            } else {
                let config = crate::config::current();
                let _ = cc
                    .peer
                    .send(ToClt::AcceptAuth {
                        player_pos: (0.0, 5.0, 0.0),
                        map_seed: 0,
                        send_interval: config.send_interval,
                        sudo_auth_method: AuthMethod::Srp,
                    })
                    .await;
            }
        }
        _ => {
            if want_sudo {
                warn!("invalid password (sudo)");
                let _ = cc
                    .auth_backend
                    .record_fail(remote_ip(cc), &cc.name(), true)
                    .await;
                let _ = cc.peer.send(ToClt::DenySudoMode).await;
            } else {
                warn!("invalid password");
                disco_and_close(cc, KickReason::WrongPasswd).await;
            }
        }
    }
}

async fn handle_init2(cc: &Arc<ClientSession>, ctx: &HandshakeContext, lang: String) {
    *cc.lang.write().unwrap() = lang;

    let dialer = crate::listen::default_dialer();
    match crate::content::mux_content(&ctx.config, &cc.name(), dialer.as_ref()).await {
        Ok(catalog) => {
            let _ = cc
                .peer
                .send(ToClt::ItemDefs {
                    defs: catalog.item_defs.clone(),
                    aliases: catalog.aliases.clone(),
                })
                .await;
            let _ = cc
                .peer
                .send(ToClt::NodeDefs {
                    defs: catalog.node_defs.clone(),
                })
                .await;
            let files = catalog
                .media
                .iter()
                .map(|f| (f.name.clone(), f.base64_sha1.clone()))
                .collect();
            let _ = cc.peer.send(ToClt::AnnounceMedia { files }).await;

            *cc.p0_map.write().unwrap() = catalog.p0_map.clone();
            *cc.p0_srv_map.write().unwrap() = catalog.p0_srv_map.clone();
            *cc.catalog.write().unwrap() = Some(Arc::new(catalog));

            if !ctx.config.drop_csmrf {
                let _ = cc
                    .peer
                    .send(ToClt::CsmRestrictionFlags {
                        flags: crate::content::csmrf_flags(&ctx.config),
                        map_range: ctx.config.map_range,
                    })
                    .await;
            }

            connect_initial_server(cc, &ctx.config).await;
        }
        Err(e) => {
            error!(error = %e, "content multiplexing failed");
            cc.kick(KickReason::Custom("Content multiplexing failed.".to_string()))
                .await;
        }
    }
}

/// Dials the client's real (non-content-mux) upstream once auth and
/// content multiplexing have both succeeded: the player's remembered
/// server if one is set and still configured, else the first configured
/// server in pool order (§4.5, §6 `lastSrv`).
async fn connect_initial_server(cc: &Arc<ClientSession>, config: &Config) {
    let remembered = cc.auth_backend.last_srv(&cc.name()).await.ok().flatten();
    let servers = config.servers_in_order();

    let target = remembered
        .filter(|name| config.servers.contains_key(name))
        .or_else(|| servers.first().map(|(name, _)| name.clone()));

    let Some(target) = target else {
        cc.kick(KickReason::SrvErr).await;
        return;
    };

    let entry = &config.servers[&target];
    let pool = config
        .media_pool_of(&target)
        .unwrap_or_else(|| target.clone());

    if let Err(e) = crate::hop::hop_to(cc, &target, &entry.addr, &pool).await {
        error!(error = %e, server = %target, "initial server connection failed");
        cc.kick(KickReason::SrvErr).await;
    }
}

/// The receive loop (`handleClt` in the original): pulls packets off the
/// peer until it closes, dispatching each through `process`.
pub async fn run(cc: Arc<ClientSession>, ctx: HandshakeContext) {
    loop {
        match cc.peer.recv().await {
            Ok(pkt) => {
                if let Err(e) = process(&cc, &ctx, pkt).await {
                    error!(error = %e, "error processing packet");
                }
            }
            Err(_) => {
                info!(client = %cc.name(), "client transport closed");
                if !cc.name().is_empty() {
                    crate::players::unregister(&cc.name());
                }
                if let Some(srv) = cc.srv.write().unwrap().take() {
                    srv.detach_client();
                    srv.peer.close();
                }
                break;
            }
        }
    }
}
