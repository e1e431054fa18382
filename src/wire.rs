//! Wire-level types: the command sum type the router dispatches on, plus the
//! handful of protocol constants the handshake validates against.
//!
//! The proxy is bit-transparent for any command it doesn't name explicitly —
//! those travel as [`Other`] and are forwarded without being decoded further,
//! mirroring how the upstream game's own wire format is a flat tagged union.

use serde::{Deserialize, Serialize};
use std::fmt;

pub const LATEST_SERIALIZE_VER: u8 = 28;
pub const LATEST_PROTO_VER: u16 = 39;
pub const MAX_PLAYER_NAME_LEN: usize = 20;
pub const MEDIA_BUNCH_BYTES: usize = 5000;

/// Node type id as it appears in serialized map blocks. Global ids and
/// per-upstream-local ids share this representation; which space a given
/// value lives in is a property of where it's stored, not of the type.
pub type Param0 = u16;

pub const CONTENT_UNKNOWN: Param0 = 125;
pub const CONTENT_AIR: Param0 = 126;
pub const CONTENT_IGNORE: Param0 = 127;

pub fn is_reserved_param0(p: Param0) -> bool {
    matches!(p, CONTENT_UNKNOWN | CONTENT_AIR | CONTENT_IGNORE)
}

/// Active object id. 0 is never assigned to a real object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AOID(pub u16);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthMethod {
    FirstSrp,
    Srp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KickReason {
    UnsupportedVer,
    BadNameChars,
    BadName,
    AlreadyConnected,
    TooManyClts,
    WrongPasswd,
    SrvErr,
    EmptyPasswd,
    UnexpectedData,
    Banned,
    Shutdown,
    Crash,
    Custom(String),
}

impl fmt::Display for KickReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KickReason::UnsupportedVer => write!(f, "unsupported version"),
            KickReason::BadNameChars => write!(f, "invalid characters in player name"),
            KickReason::BadName => write!(f, "invalid player name"),
            KickReason::AlreadyConnected => write!(f, "already connected"),
            KickReason::TooManyClts => write!(f, "too many clients"),
            KickReason::WrongPasswd => write!(f, "wrong password"),
            KickReason::SrvErr => write!(f, "server error"),
            KickReason::EmptyPasswd => write!(f, "empty password disallowed"),
            KickReason::UnexpectedData => write!(f, "unexpected data"),
            KickReason::Banned => write!(f, "banned by proxy"),
            KickReason::Shutdown => write!(f, "server shutting down"),
            KickReason::Crash => write!(f, "server crashed"),
            KickReason::Custom(s) => write!(f, "{s}"),
        }
    }
}

/// Whether an upstream-initiated close should be treated as a fallback
/// candidate (§4.5) rather than forwarded verbatim.
impl KickReason {
    pub fn triggers_fallback(&self) -> bool {
        matches!(
            self,
            KickReason::Shutdown
                | KickReason::Crash
                | KickReason::SrvErr
                | KickReason::TooManyClts
                | KickReason::UnsupportedVer
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsmRestrictionFlags {
    pub no_csms: bool,
    pub no_chat_msgs: bool,
    pub no_item_defs: bool,
    pub no_node_defs: bool,
    pub limit_map_range: bool,
    pub no_player_list: bool,
}

impl CsmRestrictionFlags {
    pub fn to_bits(self) -> u64 {
        let mut bits = 0u64;
        if self.no_csms {
            bits |= 1 << 0;
        }
        if self.no_chat_msgs {
            bits |= 1 << 1;
        }
        if self.no_item_defs {
            bits |= 1 << 2;
        }
        if self.no_node_defs {
            bits |= 1 << 3;
        }
        if self.limit_map_range {
            bits |= 1 << 4;
        }
        if self.no_player_list {
            bits |= 1 << 5;
        }
        bits
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemDef {
    pub name: String,
    pub image: String,
    pub tool_caps: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDef {
    pub name: String,
    pub param0: Param0,
    pub connect_to: Vec<Param0>,
    pub tiles: Vec<String>,
    pub sounds: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaFile {
    pub name: String,
    pub base64_sha1: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlayerListUpdate {
    Init,
    Add,
    Remove,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AoAdd {
    pub id: AOID,
    pub init_name: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AoMsg {
    pub id: AOID,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Pointed {
    Nothing,
    Node { pos: (i16, i16, i16) },
    Object { id: AOID },
}

/// Commands flowing from client toward the upstream (via the proxy).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ToSrv {
    Nil,
    Init {
        serialize_ver: u8,
        max_proto_ver: u16,
        player_name: String,
    },
    FirstSrp {
        salt: Vec<u8>,
        verifier: Vec<u8>,
        empty_passwd: bool,
    },
    SrpBytesA {
        a: Vec<u8>,
        no_sha1: bool,
    },
    SrpBytesM {
        m: Vec<u8>,
    },
    Init2 {
        lang: String,
    },
    ReqMedia {
        filenames: Vec<String>,
    },
    CltReady {
        major: u8,
        minor: u8,
        patch: u8,
        reserved: u8,
        version: String,
        formspec: u16,
    },
    Interact {
        pointed: Pointed,
        raw: Vec<u8>,
    },
    ChatMsg {
        message: String,
    },
    CltInfo {
        raw: Vec<u8>,
    },
    JoinModChan {
        channel: String,
    },
    LeaveModChan {
        channel: String,
    },
    MsgModChan {
        channel: String,
        msg: String,
    },
    /// Anything the router forwards verbatim without inspection:
    /// InvAction, InvFields, NodeMetaFields, PlayerPos, GotBlks, DeletedBlks,
    /// FallDmg, Respawn, SelectItem, and anything else unrecognized.
    Other {
        tag: String,
        raw: Vec<u8>,
    },
}

/// Commands flowing from the upstream toward the client (via the proxy).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ToClt {
    Hello {
        serialize_ver: u8,
        proto_ver: u16,
        auth_method: AuthMethod,
        username: String,
    },
    AcceptAuth {
        player_pos: (f32, f32, f32),
        map_seed: u64,
        send_interval: f32,
        sudo_auth_method: AuthMethod,
    },
    Disco {
        reason: KickReason,
    },
    SrpBytesSaltB {
        salt: Vec<u8>,
        b: Vec<u8>,
    },
    AcceptSudoMode,
    DenySudoMode,
    ItemDefs {
        defs: Vec<ItemDef>,
        aliases: Vec<(String, String)>,
    },
    NodeDefs {
        defs: Vec<NodeDef>,
    },
    AnnounceMedia {
        files: Vec<(String, String)>,
    },
    Media {
        files: Vec<MediaFile>,
    },
    CsmRestrictionFlags {
        flags: CsmRestrictionFlags,
        map_range: u32,
    },
    Inv {
        raw: Vec<u8>,
    },
    AoRmAdd {
        remove: Vec<AOID>,
        add: Vec<AoAdd>,
    },
    AoMsgs {
        messages: Vec<AoMsg>,
    },
    DetachedInv {
        name: String,
        keep: bool,
        raw: Vec<u8>,
    },
    FormspecShow {
        formspec: String,
    },
    FormspecPrepend {
        formspec: String,
    },
    NodeMetasChanged {
        raw: Vec<u8>,
    },
    BlkData {
        pos: (i16, i16, i16),
        param0: Vec<Param0>,
    },
    AddNode {
        pos: (i16, i16, i16),
        param0: Param0,
        param1: u8,
        param2: u8,
    },
    MediaPush {
        filename: String,
        token: String,
        ephemeral: bool,
    },
    HaveMedia {
        token: String,
    },
    UpdatePlayerList {
        kind: PlayerListUpdate,
        players: Vec<String>,
    },
    Kick {
        reason: KickReason,
    },
    ModChanSig {
        channel: String,
        join: bool,
        success: bool,
    },
    DelParticleSpawner {
        id: u32,
    },
    StopSound {
        id: u32,
    },
    RmHud {
        id: u32,
    },
    Breath {
        value: u16,
    },
    CloudParams,
    EyeOffset,
    Fov,
    Hp {
        value: u16,
    },
    HudFlags {
        mask: u32,
        flags: u32,
    },
    LocalPlayerAnim,
    MinimapModes,
    MoonParams,
    Movement,
    OverrideDayNightRatio {
        value: Option<f32>,
    },
    Privs {
        privs: Vec<String>,
    },
    HotbarParam {
        param: HotbarParam,
    },
    SkyParams,
    StarParams,
    SunParams,
    /// Everything else forwarded verbatim (after AO-id swap/string scan).
    Other {
        tag: String,
        raw: Vec<u8>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum HotbarParam {
    ItemCount(u16),
    Image(String),
    SelectedImage(String),
}
