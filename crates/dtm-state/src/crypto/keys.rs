//! X25519 key pair generation.
//!
//! The custodian's long-lived (per process, or per key file) key pair is a
//! static X25519 pair; every sealed message uses a fresh ephemeral pair.

use x25519_dalek::{EphemeralSecret, PublicKey as X25519PublicKey, StaticSecret};
use zeroize::Zeroizing;

/// An X25519 static key pair used as the custodian's asymmetric key.
///
/// `StaticSecret` zeroizes itself on drop.
pub struct X25519KeyPair {
    secret: StaticSecret,
    public: X25519PublicKey,
}

impl X25519KeyPair {
    /// Generate a new random X25519 key pair.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(rand::thread_rng());
        let public = X25519PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Reconstruct from secret key bytes.
    pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        let secret = StaticSecret::from(bytes);
        let public = X25519PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Return the secret key.
    pub fn secret(&self) -> &StaticSecret {
        &self.secret
    }

    /// Return the secret key bytes in a buffer that wipes itself on drop.
    pub fn secret_bytes(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.secret.to_bytes())
    }

    /// Return the public key.
    pub fn public_key(&self) -> &X25519PublicKey {
        &self.public
    }

    /// Return the public key bytes.
    pub fn public_key_bytes(&self) -> [u8; 32] {
        *self.public.as_bytes()
    }
}

/// Generate an ephemeral X25519 key pair for one-time use.
pub fn ephemeral_x25519() -> (EphemeralSecret, X25519PublicKey) {
    let secret = EphemeralSecret::random_from_rng(rand::thread_rng());
    let public = X25519PublicKey::from(&secret);
    (secret, public)
}
