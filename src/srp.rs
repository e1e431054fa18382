//! SRP-6a wrapper around the `srp` crate, in the game's standard variant
//! (`NoSHA1=true`, i.e. the SHA-256-keyed derivation rather than the legacy
//! SHA-1 one). The proxy plays both ends of the protocol: it is the SRP
//! *server* when terminating a real client's handshake, and the SRP
//! *client* when content-multiplexing dials an upstream as a pseudo-client
//! (§4.2, §4.4).

use rand::RngCore;
use sha2::Sha256;
use srp::client::{SrpClient, SrpClientVerifier};
use srp::groups::G_2048;
use srp::server::{SrpServer, SrpServerVerifier};

const EPHEMERAL_BYTES: usize = 64;

fn random_ephemeral() -> Vec<u8> {
    let mut buf = vec![0u8; EPHEMERAL_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut buf);
    buf
}

/// Derives an identity for the SRP password verifier. The real client
/// authenticates with its name as-is; the proxy authenticates to upstreams
/// using the lowercased name (§6).
pub fn upstream_identity(player_name: &str) -> String {
    player_name.to_lowercase()
}

pub fn compute_verifier(username: &str, password: &[u8], salt: &[u8]) -> Vec<u8> {
    let client = SrpClient::<Sha256>::new(&G_2048);
    client
        .compute_verifier(username.as_bytes(), password, salt)
}

/// Server-side half of a handshake: holds the private ephemeral until the
/// client's `M` proof arrives.
pub struct ServerHandshake {
    b_priv: Vec<u8>,
    pub b_pub: Vec<u8>,
    verifier: Vec<u8>,
}

impl ServerHandshake {
    /// Begins a server-role handshake given the stored (salt, verifier) pair
    /// and the client's public ephemeral `A`. Mirrors `srp.Handshake` in the
    /// original: returns `None` (safety-check failure) if `A mod N == 0`.
    pub fn begin(verifier: &[u8], a_pub: &[u8]) -> Option<Self> {
        if a_pub.iter().all(|b| *b == 0) {
            return None;
        }

        let server = SrpServer::<Sha256>::new(&G_2048);
        let b_priv = random_ephemeral();
        let b_pub = server.compute_public_ephemeral(&b_priv, verifier);
        Some(Self {
            b_priv,
            b_pub,
            verifier: verifier.to_vec(),
        })
    }

    /// Verifies the client's proof `M` in constant time and, on success,
    /// returns the shared session key `K`. The caller is responsible for
    /// the constant-time comparison semantics the `srp` crate already
    /// provides internally.
    pub fn verify(&self, a_pub: &[u8], client_m: &[u8]) -> Result<Vec<u8>, SrpVerifyError> {
        let server = SrpServer::<Sha256>::new(&G_2048);
        let verifier: SrpServerVerifier<Sha256> = server
            .process_reply(&self.b_priv, &self.verifier, a_pub)
            .map_err(|_| SrpVerifyError::SafetyCheck)?;
        verifier
            .verify_client(client_m)
            .map(|_| verifier.key().to_vec())
            .map_err(|_| SrpVerifyError::WrongProof)
    }
}

/// Client-role handshake, used by the content multiplexer and the server
/// session when they dial an upstream as a pseudo-client.
pub struct ClientHandshake {
    a_priv: Vec<u8>,
    pub a_pub: Vec<u8>,
}

impl ClientHandshake {
    pub fn begin() -> Self {
        let client = SrpClient::<Sha256>::new(&G_2048);
        let a_priv = random_ephemeral();
        let a_pub = client.compute_public_ephemeral(&a_priv);
        Self { a_priv, a_pub }
    }

    /// Completes the handshake given the server's (salt, B) and the
    /// identity/password used to derive the private key. Returns the
    /// client proof `M` to send as `SRPBytesM`.
    pub fn finish(
        &self,
        username: &str,
        password: &[u8],
        salt: &[u8],
        b_pub: &[u8],
    ) -> Result<(SrpClientVerifier<Sha256>, Vec<u8>), SrpVerifyError> {
        let client = SrpClient::<Sha256>::new(&G_2048);
        let verifier = client
            .process_reply(&self.a_priv, username.as_bytes(), password, salt, b_pub)
            .map_err(|_| SrpVerifyError::SafetyCheck)?;
        let proof = verifier.proof().to_vec();
        Ok((verifier, proof))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SrpVerifyError {
    SafetyCheck,
    WrongProof,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_handshake_round_trips() {
        let username = "zed";
        let password = b"hunter2";
        let mut salt = vec![0u8; 16];
        rand::rngs::OsRng.fill_bytes(&mut salt);

        let verifier = compute_verifier(username, password, &salt);

        let client = ClientHandshake::begin();
        let server = ServerHandshake::begin(&verifier, &client.a_pub).expect("safety check");

        let (_client_verifier, proof) = client
            .finish(username, password, &salt, &server.b_pub)
            .expect("client handshake");

        let key = server
            .verify(&client.a_pub, &proof)
            .expect("server verify");
        assert!(!key.is_empty());
    }

    #[test]
    fn wrong_password_is_rejected() {
        let username = "zed";
        let mut salt = vec![0u8; 16];
        rand::rngs::OsRng.fill_bytes(&mut salt);
        let verifier = compute_verifier(username, b"correct", &salt);

        let client = ClientHandshake::begin();
        let server = ServerHandshake::begin(&verifier, &client.a_pub).expect("safety check");
        let (_v, proof) = client
            .finish(username, b"wrong", &salt, &server.b_pub)
            .expect("client handshake");

        assert!(server.verify(&client.a_pub, &proof).is_err());
    }
}
