//! Configuration loading and the global, atomically-replaceable snapshot.
//!
//! Serde-derived config (`rename_all = "camelCase"`, defaults everywhere)
//! generalized to the richer option set named in `config.go`, published
//! as a lock around an `Arc` swapped wholesale on reload so readers never
//! see a torn config.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use crate::error::ConfigError;

fn default_bind_addr() -> String {
    "[::]:40000".to_string()
}
fn default_send_interval() -> f32 {
    0.09
}
fn default_user_limit() -> usize {
    10
}
fn default_telnet_addr() -> String {
    "[::1]:40010".to_string()
}
fn default_cmd_prefix() -> String {
    ">".to_string()
}
fn default_list_interval() -> u64 {
    300
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerEntry {
    pub addr: String,
    #[serde(default)]
    pub media_pool: String,
    #[serde(default)]
    pub fallbacks: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CsmrfConfig {
    #[serde(default)]
    pub no_csms: bool,
    #[serde(default = "default_true")]
    pub chat_msgs: bool,
    #[serde(default = "default_true")]
    pub item_defs: bool,
    #[serde(default = "default_true")]
    pub node_defs: bool,
    #[serde(default)]
    pub no_limit_map_range: bool,
    #[serde(default = "default_true")]
    pub player_list: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListConfig {
    #[serde(default)]
    pub enable: bool,
    #[serde(default)]
    pub addr: String,
    #[serde(default = "default_list_interval")]
    pub interval: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_send_interval")]
    pub send_interval: f32,
    #[serde(default = "default_user_limit")]
    pub user_limit: usize,
    #[serde(default)]
    pub require_passwd: bool,
    #[serde(default)]
    pub servers: HashMap<String, ServerEntry>,
    #[serde(default)]
    pub fallback_servers: Vec<String>,
    #[serde(default)]
    pub force_default_srv: bool,
    #[serde(default)]
    pub kick_on_new_pool: bool,
    #[serde(default)]
    pub csmrf: CsmrfConfig,
    #[serde(default)]
    pub drop_csmrf: bool,
    #[serde(default)]
    pub map_range: u32,
    #[serde(default)]
    pub groups: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub user_groups: HashMap<String, String>,
    #[serde(default = "default_cmd_prefix")]
    pub cmd_prefix: String,
    #[serde(default)]
    pub auth_backend: String,
    #[serde(default = "default_telnet_addr")]
    pub telnet_addr: String,
    #[serde(default)]
    pub list: ListConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            send_interval: default_send_interval(),
            user_limit: default_user_limit(),
            require_passwd: false,
            servers: HashMap::new(),
            fallback_servers: Vec::new(),
            force_default_srv: false,
            kick_on_new_pool: false,
            csmrf: CsmrfConfig::default(),
            drop_csmrf: false,
            map_range: 0,
            groups: HashMap::new(),
            user_groups: HashMap::new(),
            cmd_prefix: default_cmd_prefix(),
            auth_backend: "files".to_string(),
            telnet_addr: default_telnet_addr(),
            list: ListConfig::default(),
        }
    }
}

impl Config {
    pub fn media_pool_of(&self, server_name: &str) -> Option<String> {
        self.servers.get(server_name).map(|s| {
            if s.media_pool.is_empty() {
                server_name.to_string()
            } else {
                s.media_pool.clone()
            }
        })
    }

    /// Pools present in the config, in enumeration order (§4.2's "iteration
    /// order over configured servers is fixed by the configuration's pool
    /// enumeration"). `HashMap` has no stable order, so we sort by server
    /// name to make the order deterministic and reproducible across runs.
    pub fn servers_in_order(&self) -> Vec<(String, ServerEntry)> {
        let mut names: Vec<&String> = self.servers.keys().collect();
        names.sort();
        names
            .into_iter()
            .map(|n| (n.clone(), self.servers[n].clone()))
            .collect()
    }

    pub fn fallback_chain_for(&self, server_name: &str) -> Vec<String> {
        let mut chain = self
            .servers
            .get(server_name)
            .map(|s| s.fallbacks.clone())
            .unwrap_or_default();
        chain.extend(self.fallback_servers.iter().cloned());
        chain
    }
}

pub fn load_from_path(path: &Path) -> Result<Config, ConfigError> {
    let raw = std::fs::read_to_string(path)?;
    let config: Config = serde_json::from_str(&raw)?;
    Ok(config)
}

lazy_static::lazy_static! {
    static ref CONFIG: RwLock<Arc<Config>> = RwLock::new(Arc::new(Config::default()));
}

pub fn current() -> Arc<Config> {
    CONFIG.read().unwrap().clone()
}

pub fn replace(config: Config) {
    *CONFIG.write().unwrap() = Arc::new(config);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let c = Config::default();
        assert_eq!(c.bind_addr, "[::]:40000");
        assert_eq!(c.user_limit, 10);
        assert_eq!(c.cmd_prefix, ">");
        assert!((c.send_interval - 0.09).abs() < f32::EPSILON);
    }

    #[test]
    fn media_pool_defaults_to_server_name() {
        let mut c = Config::default();
        c.servers.insert(
            "a".to_string(),
            ServerEntry {
                addr: "127.0.0.1:30000".to_string(),
                media_pool: String::new(),
                fallbacks: vec![],
            },
        );
        assert_eq!(c.media_pool_of("a").as_deref(), Some("a"));
    }

    #[test]
    fn fallback_chain_appends_global_list() {
        let mut c = Config::default();
        c.servers.insert(
            "a".to_string(),
            ServerEntry {
                addr: "x".to_string(),
                media_pool: "a".to_string(),
                fallbacks: vec!["b".to_string()],
            },
        );
        c.fallback_servers = vec!["c".to_string()];
        assert_eq!(c.fallback_chain_for("a"), vec!["b", "c"]);
    }
}
