//! Chat command dispatch (§4.3): configurable-prefix command registry with
//! a pass-through interceptor for ordinary chat messages.
//!
//! Grounded on `chatcmd.go`.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use lazy_static::lazy_static;
use tracing::warn;

use crate::client::ClientSession;
use crate::wire::{KickReason, ToSrv};

type ChatFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
pub type CommandHandler = Arc<dyn Fn(Arc<ClientSession>, Vec<String>) -> ChatFuture + Send + Sync>;

/// A command running past this is not killed, just logged (§8: chat
/// commands are best-effort and never a reason to drop the connection).
const SOFT_TIMEOUT: Duration = Duration::from_secs(10);

lazy_static! {
    static ref COMMANDS: RwLock<HashMap<String, CommandHandler>> = RwLock::new(default_commands());
}

fn default_commands() -> HashMap<String, CommandHandler> {
    let mut m: HashMap<String, CommandHandler> = HashMap::new();
    m.insert("who".to_string(), Arc::new(cmd_who));
    m.insert("help".to_string(), Arc::new(cmd_help));
    m.insert("kick".to_string(), Arc::new(cmd_kick));
    m.insert("hop".to_string(), Arc::new(cmd_hop));
    m
}

/// Player-initiated server hop (§4.5). Only allowed onto a server whose
/// media pool has already been issued to this session via content
/// multiplexing — otherwise the client would be missing node/item defs for
/// it, the same precondition the original denies with `ErrNewMediaPool`.
fn cmd_hop(cc: Arc<ClientSession>, args: Vec<String>) -> ChatFuture {
    Box::pin(async move {
        let Some(target) = args.first() else {
            cc.send_chat_msg("Usage: hop <server>".to_string()).await;
            return;
        };

        let config = crate::config::current();
        let Some(entry) = config.servers.get(target) else {
            cc.send_chat_msg(format!("No such server: {target}")).await;
            return;
        };

        if !cc.p0_map.read().unwrap().contains_key(target) {
            cc.send_chat_msg(format!(
                "Media for {target} hasn't been issued to this session yet."
            ))
            .await;
            return;
        }

        let pool = config.media_pool_of(target).unwrap_or_else(|| target.clone());
        let addr = entry.addr.clone();

        let _guard = cc.hop_mutex.lock().await;
        if let Err(e) = crate::hop::hop_to(&cc, target, &addr, &pool).await {
            cc.send_chat_msg(format!("Failed to hop to {target}: {e}"))
                .await;
        }
    })
}

fn cmd_kick(cc: Arc<ClientSession>, args: Vec<String>) -> ChatFuture {
    Box::pin(async move {
        let config = crate::config::current();
        if !crate::perms::has_perms(&config, &cc.name(), &["kick"]) {
            cc.send_chat_msg("You don't have permission to do that.".to_string())
                .await;
            return;
        }

        let Some(target) = args.first() else {
            cc.send_chat_msg("Usage: kick <name>".to_string()).await;
            return;
        };

        if crate::moderation::kick(target, KickReason::Custom("Kicked by a moderator.".to_string())).await {
            cc.send_chat_msg(format!("Kicked {target}.")).await;
        } else {
            cc.send_chat_msg(format!("No such player: {target}")).await;
        }
    })
}

fn cmd_who(cc: Arc<ClientSession>, _args: Vec<String>) -> ChatFuture {
    Box::pin(async move {
        let names: Vec<String> = crate::players::clients().iter().map(|c| c.name()).collect();
        cc.send_chat_msg(format!("Online: {}", names.join(", ")))
            .await;
    })
}

fn cmd_help(cc: Arc<ClientSession>, _args: Vec<String>) -> ChatFuture {
    Box::pin(async move {
        let names: Vec<String> = COMMANDS.read().unwrap().keys().cloned().collect();
        cc.send_chat_msg(format!("Commands: {}", names.join(", ")))
            .await;
    })
}

pub fn register(name: impl Into<String>, handler: CommandHandler) {
    COMMANDS.write().unwrap().insert(name.into(), handler);
}

/// Routes a chat message: a prefix match dispatches to the command
/// registry, anything else forwards upstream unchanged.
pub async fn handle_chat_msg(cc: &Arc<ClientSession>, message: String) {
    let config = crate::config::current();
    let prefix = config.cmd_prefix.clone();

    let Some(rest) = message.strip_prefix(prefix.as_str()) else {
        forward_chat(cc, message).await;
        return;
    };

    let mut parts = rest.split_whitespace();
    let Some(cmd) = parts.next() else {
        forward_chat(cc, message).await;
        return;
    };
    let args: Vec<String> = parts.map(|s| s.to_string()).collect();

    let handler = COMMANDS.read().unwrap().get(cmd).cloned();
    match handler {
        Some(handler) => run_with_soft_timeout(cc, cmd, handler(cc.clone(), args)).await,
        None => {
            cc.send_chat_msg(format!("Unknown command: {cmd}")).await;
        }
    }
}

async fn run_with_soft_timeout(cc: &Arc<ClientSession>, cmd: &str, fut: ChatFuture) {
    let name = cc.name();
    let cmd = cmd.to_string();
    let cc = cc.clone();
    let task = tokio::spawn(fut);
    tokio::spawn(async move {
        tokio::time::sleep(SOFT_TIMEOUT).await;
        if !task.is_finished() {
            warn!(client = %name, command = %cmd, "chat command exceeded soft timeout");
            cc.send_chat_msg(format!("{cmd} is taking longer than expected..."))
                .await;
        }
    });
}

async fn forward_chat(cc: &Arc<ClientSession>, message: String) {
    if let Some(srv) = cc.server() {
        let _ = srv.peer.send(ToSrv::ChatMsg { message }).await;
    }
}
