//! The transport peer contract (§2, §6): "a framed reliable-datagram
//! channel: send/receive typed commands, observe close, ack-receipts." The
//! spec treats the reliable-datagram transport itself as external; the core
//! only depends on these two traits. `InMemoryPeer` is the paired test
//! double used throughout this crate's integration tests in place of a real
//! socket; `UdpPeer` is a minimal illustrative transport for the `proxy`
//! binary (real retransmission/ordering guarantees are the external
//! contract's responsibility, not reimplemented here).

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, watch};

use crate::error::ProxyError;
use crate::wire::{KickReason, ToClt, ToSrv};

/// Resolves once the peer has acknowledged receipt of the packet it was
/// returned for. Routing code that needs to close a socket only after a
/// terminal packet is delivered awaits this racing against `closed()`.
pub type AckWait = oneshot::Receiver<()>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    TimedOut,
    Disconnected,
}

/// The client-facing half: receives [`ToSrv`] commands, sends [`ToClt`].
#[async_trait]
pub trait ClientPeer: Send + Sync {
    async fn recv(&self) -> Result<ToSrv, ProxyError>;
    async fn send(&self, cmd: ToClt) -> Result<AckWait, ProxyError>;
    fn close(&self);
    fn closed(&self) -> watch::Receiver<bool>;
    fn why_closed(&self) -> Option<CloseReason>;
    fn remote_addr(&self) -> String;
}

/// The upstream-facing half used by both the content multiplexer's
/// pseudo-clients and the server session: receives [`ToClt`], sends
/// [`ToSrv`].
#[async_trait]
pub trait UpstreamPeer: Send + Sync {
    async fn recv(&self) -> Result<ToClt, ProxyError>;
    async fn send(&self, cmd: ToSrv) -> Result<AckWait, ProxyError>;
    fn close(&self);
    fn closed(&self) -> watch::Receiver<bool>;
    fn why_closed(&self) -> Option<CloseReason>;
}

pub(crate) fn acked() -> AckWait {
    let (tx, rx) = oneshot::channel();
    let _ = tx.send(());
    rx
}

/// One end of an in-process duplex channel pair standing in for a real
/// socket. `new_pair()` returns the client-role and upstream-role ends
/// wired to each other, so tests can drive a full handshake without a UDP
/// socket.
pub struct InMemoryPeer<In, Out> {
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<In>>,
    outbound: mpsc::UnboundedSender<Out>,
    closed_tx: watch::Sender<bool>,
    closed_rx: watch::Receiver<bool>,
    why: std::sync::Mutex<Option<CloseReason>>,
    remote_addr: String,
}

impl<In, Out> InMemoryPeer<In, Out> {
    fn new(
        inbound: mpsc::UnboundedReceiver<In>,
        outbound: mpsc::UnboundedSender<Out>,
        remote_addr: String,
    ) -> Self {
        let (closed_tx, closed_rx) = watch::channel(false);
        Self {
            inbound: tokio::sync::Mutex::new(inbound),
            outbound,
            closed_tx,
            closed_rx,
            why: std::sync::Mutex::new(None),
            remote_addr,
        }
    }
}

pub fn client_and_upstream_pair(
    remote_addr: &str,
) -> (
    InMemoryPeer<ToSrv, ToClt>,
    InMemoryPeer<ToClt, ToSrv>,
) {
    let (c2s_tx, c2s_rx) = mpsc::unbounded_channel::<ToSrv>();
    let (s2c_tx, s2c_rx) = mpsc::unbounded_channel::<ToClt>();

    let client_side = InMemoryPeer::new(c2s_rx, s2c_tx, remote_addr.to_string());
    let upstream_side = InMemoryPeer::new(s2c_rx, c2s_tx, remote_addr.to_string());
    (client_side, upstream_side)
}

#[async_trait]
impl ClientPeer for InMemoryPeer<ToSrv, ToClt> {
    async fn recv(&self) -> Result<ToSrv, ProxyError> {
        let mut rx = self.inbound.lock().await;
        rx.recv().await.ok_or(ProxyError::Closed)
    }

    async fn send(&self, cmd: ToClt) -> Result<AckWait, ProxyError> {
        self.outbound.send(cmd).map_err(|_| ProxyError::Closed)?;
        Ok(acked())
    }

    fn close(&self) {
        let _ = self.closed_tx.send(true);
    }

    fn closed(&self) -> watch::Receiver<bool> {
        self.closed_rx.clone()
    }

    fn why_closed(&self) -> Option<CloseReason> {
        *self.why.lock().unwrap()
    }

    fn remote_addr(&self) -> String {
        self.remote_addr.clone()
    }
}

#[async_trait]
impl UpstreamPeer for InMemoryPeer<ToClt, ToSrv> {
    async fn recv(&self) -> Result<ToClt, ProxyError> {
        let mut rx = self.inbound.lock().await;
        rx.recv().await.ok_or(ProxyError::Closed)
    }

    async fn send(&self, cmd: ToSrv) -> Result<AckWait, ProxyError> {
        self.outbound.send(cmd).map_err(|_| ProxyError::Closed)?;
        Ok(acked())
    }

    fn close(&self) {
        let _ = self.closed_tx.send(true);
    }

    fn closed(&self) -> watch::Receiver<bool> {
        self.closed_rx.clone()
    }

    fn why_closed(&self) -> Option<CloseReason> {
        *self.why.lock().unwrap()
    }
}

/// Convenience used by the `Kick` reason mapping: not all `KickReason`s are
/// meaningful to send to an upstream (the proxy never kicks an upstream),
/// this just keeps `KickReason` import alive for peers that log it.
pub fn describe_close(reason: &KickReason) -> String {
    reason.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn paired_peers_exchange_commands() {
        let (client_side, upstream_side) = client_and_upstream_pair("127.0.0.1:1");

        client_side
            .send(ToClt::AcceptSudoMode)
            .await
            .unwrap();
        let got = upstream_side.recv().await.unwrap();
        assert!(matches!(got, ToClt::AcceptSudoMode));

        upstream_side
            .send(ToSrv::Nil)
            .await
            .unwrap();
        let got = client_side.recv().await.unwrap();
        assert!(matches!(got, ToSrv::Nil));
    }
}
