//! Voxel-game reverse proxy: SRP authentication, content multiplexing, and
//! server-hopping across a pool of upstream game servers behind one public
//! address.

pub mod announce;
pub mod auth;
pub mod cache;
pub mod chatcmd;
pub mod client;
pub mod config;
pub mod content;
pub mod error;
pub mod fallback;
pub mod hooks;
pub mod hop;
pub mod listen;
pub mod logging;
pub mod modchan;
pub mod moderation;
pub mod peer;
pub mod perms;
pub mod players;
pub mod rewrite;
pub mod router;
pub mod server;
pub mod srp;
pub mod state;
pub mod telnet;
pub mod uptime;
pub mod wire;
