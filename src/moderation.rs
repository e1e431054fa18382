//! Moderation convenience wrappers (§6): thin glue between the chat
//! command/telnet surfaces and the auth backend and player registry.
//!
//! Grounded on `moderation.go`.

use std::net::IpAddr;
use std::sync::Arc;

use crate::auth::AuthBackend;
use crate::error::AuthError;
use crate::wire::KickReason;

/// Kicks an online player by name. Returns `false` if no such player is
/// currently connected (kicking is a no-op against an offline name).
pub async fn kick(name: &str, reason: KickReason) -> bool {
    match crate::players::find(name) {
        Some(cc) => {
            cc.kick(reason).await;
            true
        }
        None => false,
    }
}

pub async fn ban(
    auth_backend: &Arc<dyn AuthBackend>,
    addr: IpAddr,
    name: &str,
) -> Result<(), AuthError> {
    auth_backend.ban(addr, name).await?;
    kick(name, KickReason::Banned).await;
    Ok(())
}

pub async fn unban(auth_backend: &Arc<dyn AuthBackend>, id: &str) -> Result<(), AuthError> {
    auth_backend.unban(id).await
}

pub async fn banned(auth_backend: &Arc<dyn AuthBackend>, addr: IpAddr, name: &str) -> bool {
    auth_backend.banned(addr, name).await
}
