//! Content multiplexer (§4.2): before a client is allowed to enter Active,
//! dial every configured upstream as a pseudo-client, fetch its item/node
//! defs and media, and merge everything into one global catalog.
//!
//! Grounded on `content.go`'s `contentConn`/`handleContent`/`muxItemDefs`/
//! `muxNodeDefs`/`muxMedia`/`muxContent`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::config::Config;
use crate::error::ContentMuxError;
use crate::peer::UpstreamPeer;
use crate::rewrite::{is_default_node, mangle_item_def, prepend, prepend_texture};
use crate::srp;
use crate::wire::{
    is_reserved_param0, AuthMethod, CsmRestrictionFlags, ItemDef, MediaFile, NodeDef, Param0,
    ToClt, ToSrv, LATEST_PROTO_VER, LATEST_SERIALIZE_VER,
};

/// upstream-name -> (upstream-local param0 -> global param0)
pub type Param0Map = HashMap<String, HashMap<Param0, Param0>>;
/// global param0 -> (upstream-name, upstream-local param0)
pub type Param0SrvMap = HashMap<Param0, (String, Param0)>;

pub struct Catalog {
    pub item_defs: Vec<ItemDef>,
    pub aliases: Vec<(String, String)>,
    pub node_defs: Vec<NodeDef>,
    pub p0_map: Param0Map,
    pub p0_srv_map: Param0SrvMap,
    pub media: Vec<MediaFile>,
}

struct PoolFetch {
    pool: String,
    server_name: String,
    item_defs: Vec<ItemDef>,
    aliases: Vec<(String, String)>,
    node_defs_raw: Vec<NodeDef>,
    media: Vec<MediaFile>,
}

const INIT_RETRANSMIT_INTERVAL: Duration = Duration::from_millis(500);
const HANDSHAKE_CEILING: Duration = Duration::from_secs(10);

/// Runs the pseudo-client handshake (Init -> Hello -> SRP -> AcceptAuth ->
/// Init2 -> content bundles) against one upstream and returns its raw
/// (unmangled) contribution. The global merge step runs afterward once
/// every pool has reported in or the ceiling elapses.
async fn fetch_pool(
    server_name: &str,
    pool: &str,
    player_name: &str,
    peer: Arc<dyn UpstreamPeer>,
) -> Result<PoolFetch, ContentMuxError> {
    let identity = srp::upstream_identity(player_name);

    let deadline = tokio::time::Instant::now() + HANDSHAKE_CEILING;
    let mut sent_init = false;

    let handshake = async {
        loop {
            if !sent_init {
                let _ = peer
                    .send(ToSrv::Init {
                        serialize_ver: LATEST_SERIALIZE_VER,
                        max_proto_ver: LATEST_PROTO_VER,
                        player_name: identity.clone(),
                    })
                    .await;
                sent_init = true;
            }

            let retransmit = tokio::time::sleep(INIT_RETRANSMIT_INTERVAL);
            tokio::select! {
                cmd = peer.recv() => {
                    match cmd {
                        Ok(ToClt::Hello { auth_method, .. }) => break Ok(auth_method),
                        Ok(_) => continue,
                        Err(e) => break Err(ContentMuxError::Unreachable(server_name.to_string(), e.to_string())),
                    }
                }
                _ = retransmit => {
                    let _ = peer
                        .send(ToSrv::Init {
                            serialize_ver: LATEST_SERIALIZE_VER,
                            max_proto_ver: LATEST_PROTO_VER,
                            player_name: identity.clone(),
                        })
                        .await;
                }
            }
        }
    };

    let auth_method = tokio::time::timeout_at(deadline, handshake)
        .await
        .map_err(|_| ContentMuxError::Timeout(server_name.to_string()))??;

    match auth_method {
        AuthMethod::FirstSrp => {
            let mut salt = vec![0u8; 16];
            use rand::RngCore;
            rand::rngs::OsRng.fill_bytes(&mut salt);
            let verifier = srp::compute_verifier(&identity, b"", &salt);
            peer.send(ToSrv::FirstSrp {
                salt,
                verifier,
                empty_passwd: true,
            })
            .await
            .map_err(|e| ContentMuxError::Handshake(server_name.to_string(), e.to_string()))?;
        }
        AuthMethod::Srp => {
            let client = srp::ClientHandshake::begin();
            peer.send(ToSrv::SrpBytesA {
                a: client.a_pub.clone(),
                no_sha1: true,
            })
            .await
            .map_err(|e| ContentMuxError::Handshake(server_name.to_string(), e.to_string()))?;

            let (salt, b_pub) = loop {
                match tokio::time::timeout_at(deadline, peer.recv()).await {
                    Ok(Ok(ToClt::SrpBytesSaltB { salt, b })) => break (salt, b),
                    Ok(Ok(_)) => continue,
                    Ok(Err(e)) => {
                        return Err(ContentMuxError::Handshake(server_name.to_string(), e.to_string()))
                    }
                    Err(_) => return Err(ContentMuxError::Timeout(server_name.to_string())),
                }
            };

            let (_verifier, proof) = client
                .finish(&identity, b"", &salt, &b_pub)
                .map_err(|_| {
                    ContentMuxError::Handshake(server_name.to_string(), "srp safety check".into())
                })?;
            peer.send(ToSrv::SrpBytesM { m: proof })
                .await
                .map_err(|e| ContentMuxError::Handshake(server_name.to_string(), e.to_string()))?;
        }
    }

    loop {
        match tokio::time::timeout_at(deadline, peer.recv()).await {
            Ok(Ok(ToClt::AcceptAuth { .. })) => break,
            Ok(Ok(_)) => continue,
            Ok(Err(e)) => {
                return Err(ContentMuxError::Handshake(server_name.to_string(), e.to_string()))
            }
            Err(_) => return Err(ContentMuxError::Timeout(server_name.to_string())),
        }
    }

    peer.send(ToSrv::Init2 {
        lang: String::new(),
    })
    .await
    .map_err(|e| ContentMuxError::Handshake(server_name.to_string(), e.to_string()))?;

    let mut item_defs = Vec::new();
    let mut aliases = Vec::new();
    let mut node_defs_raw = Vec::new();
    let mut media = Vec::new();
    let mut announced: Vec<(String, String)> = Vec::new();
    let mut got_item_defs = false;
    let mut got_node_defs = false;
    let mut got_media_announce = false;

    loop {
        if got_item_defs && got_node_defs && got_media_announce {
            if announced.len() == media.len() {
                break;
            }
        }

        match tokio::time::timeout_at(deadline, peer.recv()).await {
            Ok(Ok(ToClt::ItemDefs { defs, aliases: a })) => {
                item_defs = defs;
                aliases = a;
                got_item_defs = true;
            }
            Ok(Ok(ToClt::NodeDefs { defs })) => {
                node_defs_raw = defs;
                got_node_defs = true;
            }
            Ok(Ok(ToClt::AnnounceMedia { files })) => {
                announced = files;
                got_media_announce = true;
                if announced.is_empty() {
                    break;
                }
                let filenames = announced.iter().map(|(n, _)| n.clone()).collect();
                peer.send(ToSrv::ReqMedia { filenames })
                    .await
                    .map_err(|e| {
                        ContentMuxError::Handshake(server_name.to_string(), e.to_string())
                    })?;
            }
            Ok(Ok(ToClt::Media { files })) => {
                media.extend(files);
            }
            Ok(Ok(_)) => continue,
            Ok(Err(e)) => {
                return Err(ContentMuxError::Handshake(server_name.to_string(), e.to_string()))
            }
            Err(_) => return Err(ContentMuxError::Timeout(server_name.to_string())),
        }
    }

    peer.close();

    Ok(PoolFetch {
        pool: pool.to_string(),
        server_name: server_name.to_string(),
        item_defs,
        aliases,
        node_defs_raw,
        media,
    })
}

/// Dialer abstraction so `mux_content` doesn't need to know how a pseudo-
/// client connection to an upstream is actually established; production
/// code supplies a real UDP dialer, tests supply an in-memory pair.
#[async_trait::async_trait]
pub trait UpstreamDialer: Send + Sync {
    async fn dial(&self, addr: &str) -> Result<Arc<dyn UpstreamPeer>, ContentMuxError>;
}

pub async fn mux_content(
    config: &Config,
    player_name: &str,
    dialer: &dyn UpstreamDialer,
) -> Result<Catalog, ContentMuxError> {
    let servers = config.servers_in_order();

    let mut fetches = Vec::with_capacity(servers.len());
    for (name, entry) in &servers {
        let pool = config
            .media_pool_of(name)
            .unwrap_or_else(|| name.clone());
        let peer = dialer.dial(&entry.addr).await?;
        let fetch = fetch_pool(name, &pool, player_name, peer).await?;
        info!(server = %name, pool = %pool, "content fetched");
        fetches.push(fetch);
    }

    Ok(merge(fetches))
}

fn merge(fetches: Vec<PoolFetch>) -> Catalog {
    let mut item_defs = vec![ItemDef {
        name: "hand".to_string(),
        image: "wieldhand.png".to_string(),
        tool_caps: serde_json::json!({}),
    }];
    let mut aliases = Vec::new();
    let mut node_defs = Vec::new();
    let mut p0_map: Param0Map = HashMap::new();
    let mut p0_srv_map: Param0SrvMap = HashMap::new();
    let mut media = Vec::new();

    let mut next_param0: Param0 = 0;

    // Seed reserved values so they round-trip to themselves per server.
    for fetch in &fetches {
        let entry = p0_map.entry(fetch.server_name.clone()).or_default();
        for reserved in [
            crate::wire::CONTENT_UNKNOWN,
            crate::wire::CONTENT_AIR,
            crate::wire::CONTENT_IGNORE,
        ] {
            entry.insert(reserved, reserved);
            p0_srv_map.insert(reserved, (fetch.server_name.clone(), reserved));
        }
    }

    for fetch in &fetches {
        for mut def in fetch.item_defs.clone() {
            mangle_item_def(&fetch.pool, &mut def);
            item_defs.push(def);
        }
        for (alias, orig) in &fetch.aliases {
            aliases.push((prepend(&fetch.pool, alias), prepend(&fetch.pool, orig)));
        }
        for f in &fetch.media {
            media.push(MediaFile {
                name: prepend(&fetch.pool, &f.name),
                base64_sha1: f.base64_sha1.clone(),
                data: f.data.clone(),
            });
        }
    }

    for fetch in &fetches {
        for def in &fetch.node_defs_raw {
            while is_reserved_param0(next_param0) {
                next_param0 += 1;
            }
            let global = next_param0;
            next_param0 += 1;

            p0_map
                .entry(fetch.server_name.clone())
                .or_default()
                .insert(def.param0, global);
            p0_srv_map.insert(global, (fetch.server_name.clone(), def.param0));

            let connect_to = def
                .connect_to
                .iter()
                .map(|local| {
                    p0_map
                        .get(&fetch.server_name)
                        .and_then(|m| m.get(local))
                        .copied()
                        .unwrap_or(*local)
                })
                .collect();

            node_defs.push(NodeDef {
                name: prepend(&fetch.pool, &def.name),
                param0: global,
                connect_to,
                tiles: def
                    .tiles
                    .iter()
                    .map(|t| prepend_texture(&fetch.pool, t))
                    .collect(),
                sounds: def
                    .sounds
                    .iter()
                    .map(|s| prepend(&fetch.pool, s))
                    .collect(),
            });
        }
    }

    Catalog {
        item_defs,
        aliases,
        node_defs,
        p0_map,
        p0_srv_map,
        media,
    }
}

/// CSM restriction flags as emitted to the client: the config booleans
/// mean "allowed"; inversion to the wire's "restricted" sense happens
/// here, at emit time.
pub fn csmrf_flags(config: &Config) -> CsmRestrictionFlags {
    CsmRestrictionFlags {
        no_csms: config.csmrf.no_csms,
        no_chat_msgs: !config.csmrf.chat_msgs,
        no_item_defs: !config.csmrf.item_defs,
        no_node_defs: !config.csmrf.node_defs,
        limit_map_range: !config.csmrf.no_limit_map_range,
        no_player_list: !config.csmrf.player_list,
    }
}

pub fn is_whitelisted(name: &str) -> bool {
    is_default_node(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str, param0: Param0, connect_to: Vec<Param0>) -> NodeDef {
        NodeDef {
            name: name.to_string(),
            param0,
            connect_to,
            tiles: vec![format!("{name}.png")],
            sounds: vec![],
        }
    }

    #[test]
    fn merge_assigns_distinct_monotone_param0s() {
        let fetch_a = PoolFetch {
            pool: "a".to_string(),
            server_name: "a".to_string(),
            item_defs: vec![],
            aliases: vec![],
            node_defs_raw: vec![node("stone", 1, vec![])],
            media: vec![],
        };
        let fetch_b = PoolFetch {
            pool: "b".to_string(),
            server_name: "b".to_string(),
            item_defs: vec![],
            aliases: vec![],
            node_defs_raw: vec![node("stone", 1, vec![])],
            media: vec![],
        };

        let catalog = merge(vec![fetch_a, fetch_b]);
        assert_eq!(catalog.node_defs.len(), 2);
        assert_eq!(catalog.node_defs[0].name, "a_stone");
        assert_eq!(catalog.node_defs[1].name, "b_stone");
        assert_ne!(catalog.node_defs[0].param0, catalog.node_defs[1].param0);

        for def in &catalog.node_defs {
            let (srv, local) = &catalog.p0_srv_map[&def.param0];
            assert_eq!(catalog.p0_map[srv][local], def.param0);
        }
    }

    #[test]
    fn merge_skips_reserved_param0s() {
        let mut defs = Vec::new();
        for i in 0..5 {
            defs.push(node(&format!("n{i}"), i, vec![]));
        }
        let fetch = PoolFetch {
            pool: "a".to_string(),
            server_name: "a".to_string(),
            item_defs: vec![],
            aliases: vec![],
            node_defs_raw: defs,
            media: vec![],
        };
        let catalog = merge(vec![fetch]);
        for def in &catalog.node_defs {
            assert!(!is_reserved_param0(def.param0));
        }
    }

    #[test]
    fn merge_always_emits_synthetic_hand_first() {
        let catalog = merge(vec![]);
        assert_eq!(catalog.item_defs[0].name, "hand");
    }

    #[test]
    fn reserved_param0s_round_trip_to_themselves() {
        let fetch = PoolFetch {
            pool: "a".to_string(),
            server_name: "a".to_string(),
            item_defs: vec![],
            aliases: vec![],
            node_defs_raw: vec![],
            media: vec![],
        };
        let catalog = merge(vec![fetch]);
        for reserved in [
            crate::wire::CONTENT_UNKNOWN,
            crate::wire::CONTENT_AIR,
            crate::wire::CONTENT_IGNORE,
        ] {
            assert_eq!(catalog.p0_map["a"][&reserved], reserved);
            assert_eq!(catalog.p0_srv_map[&reserved], ("a".to_string(), reserved));
        }
    }

    #[test]
    fn csmrf_inverts_allowed_booleans_at_emit() {
        let mut config = Config::default();
        config.csmrf.chat_msgs = true;
        config.csmrf.item_defs = false;
        let flags = csmrf_flags(&config);
        assert!(!flags.no_chat_msgs);
        assert!(flags.no_item_defs);
    }
}
