//! Telnet admin console (ambient §6 surface): a thin line-oriented TCP
//! console bound to `telnetAddr`. The original's console runs full Lua-like
//! scripts against the live proxy; this is deliberately just enough to
//! inspect and moderate players without a client reconnect.
//!
//! Grounded on `telnet.go`.

use std::net::IpAddr;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};

use crate::auth::AuthBackend;
use crate::wire::KickReason;

pub async fn serve(addr: &str, auth_backend: Arc<dyn AuthBackend>) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr, "telnet console listening");

    loop {
        let (socket, peer) = listener.accept().await?;
        let auth_backend = auth_backend.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_conn(socket, auth_backend).await {
                warn!(client = %peer, error = %e, "telnet session ended with error");
            }
        });
    }
}

async fn handle_conn(socket: TcpStream, auth_backend: Arc<dyn AuthBackend>) -> std::io::Result<()> {
    let (read_half, mut write_half) = socket.into_split();
    let mut lines = BufReader::new(read_half).lines();

    write_half.write_all(b"voxelmux admin console\n> ").await?;

    while let Some(line) = lines.next_line().await? {
        let reply = dispatch(&line, &auth_backend).await;
        write_half.write_all(reply.as_bytes()).await?;
        write_half.write_all(b"\n> ").await?;
    }
    Ok(())
}

async fn dispatch(line: &str, auth_backend: &Arc<dyn AuthBackend>) -> String {
    let mut parts = line.split_whitespace();
    match parts.next() {
        Some("who") => crate::players::clients()
            .iter()
            .map(|c| c.name())
            .collect::<Vec<_>>()
            .join(", "),
        Some("kick") => match parts.next() {
            Some(name) => {
                if crate::moderation::kick(
                    name,
                    KickReason::Custom("Kicked by admin.".to_string()),
                )
                .await
                {
                    format!("kicked {name}")
                } else {
                    format!("no such player: {name}")
                }
            }
            None => "usage: kick <name>".to_string(),
        },
        Some("ban") => match (parts.next(), parts.next()) {
            (Some(addr), Some(name)) => match addr.parse::<IpAddr>() {
                Ok(addr) => match crate::moderation::ban(auth_backend, addr, name).await {
                    Ok(()) => format!("banned {name}"),
                    Err(e) => format!("ban failed: {e}"),
                },
                Err(_) => "invalid address".to_string(),
            },
            _ => "usage: ban <addr> <name>".to_string(),
        },
        Some("unban") => match parts.next() {
            Some(id) => match crate::moderation::unban(auth_backend, id).await {
                Ok(()) => format!("unbanned {id}"),
                Err(e) => format!("unban failed: {e}"),
            },
            None => "usage: unban <id>".to_string(),
        },
        Some("status") => format!(
            "uptime: {}s, clients: {}",
            crate::uptime::uptime().as_secs(),
            crate::players::count()
        ),
        Some("loglevel") => match parts.next() {
            Some(directive) => match crate::logging::set_filter(directive) {
                Ok(()) => format!("log level set to {directive}"),
                Err(e) => format!("failed to set log level: {e}"),
            },
            None => "usage: loglevel <directive>".to_string(),
        },
        Some("help") => {
            "commands: who, kick <name>, ban <addr> <name>, unban <id>, status, loglevel <directive>"
                .to_string()
        }
        Some(other) => format!("unknown command: {other}"),
        None => String::new(),
    }
}
