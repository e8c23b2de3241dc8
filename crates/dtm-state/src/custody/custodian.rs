//! Runtime asymmetric-key custodian.
//!
//! Owns the X25519 key pair that seals every document. The private key
//! exists in plaintext only while the custodian is being built and inside a
//! single `decrypt` call. Between uses it lives in the [`SecretCell`],
//! wrapped under a random 32-character runtime passphrase via
//! PBKDF2-HMAC-SHA256 and ChaCha20-Poly1305.
//!
//! Every encrypt and decrypt holds one exclusive async lock, so at most one
//! crypto operation is in flight per custodian.

use std::sync::Mutex as StdMutex;

use tokio::sync::Mutex;
use x25519_dalek::PublicKey as X25519PublicKey;
use zeroize::Zeroizing;

use crate::crypto::encryption::{unwrap_with_passphrase, wrap_with_passphrase, MIN_PBKDF2_ROUNDS};
use crate::crypto::keys::X25519KeyPair;
use crate::crypto::random::generate_passphrase;
use crate::crypto::{seal, sha256_hex};
use crate::custody::secret_cell::{PinStatus, RuntimeIdentity, SecretCell};
use crate::error::{Result, StateError};

/// Owner of the process's asymmetric key material.
pub struct KeyCustodian {
    identity: RuntimeIdentity,
    cell: SecretCell,
    passphrase: StdMutex<Option<Zeroizing<String>>>,
    public: X25519PublicKey,
    rounds: u32,
    op_lock: Mutex<()>,
}

impl KeyCustodian {
    /// Generate a fresh key pair bound to a fresh runtime identity.
    ///
    /// This runs one PBKDF2 derivation; call it from a blocking context.
    pub fn generate(pin_memory: bool, rounds: u32) -> Result<Self> {
        Self::from_keypair(X25519KeyPair::generate(), pin_memory, rounds)
    }

    /// Take custody of an existing key pair (loaded from a key file).
    ///
    /// The pair is consumed; only its wrapped form survives this call.
    pub fn from_keypair(keypair: X25519KeyPair, pin_memory: bool, rounds: u32) -> Result<Self> {
        if rounds < MIN_PBKDF2_ROUNDS {
            return Err(StateError::InvalidConfig(format!(
                "PBKDF2 rounds {rounds} below minimum {MIN_PBKDF2_ROUNDS}"
            )));
        }

        let identity = RuntimeIdentity::generate();
        let cell = SecretCell::new(pin_memory);
        let passphrase = generate_passphrase();
        let public = *keypair.public_key();

        let secret = keypair.secret_bytes();
        drop(keypair);
        let wrapped = Zeroizing::new(wrap_with_passphrase(
            passphrase.as_bytes(),
            rounds,
            secret.as_slice(),
        )?);
        drop(secret);
        cell.store(&wrapped, &identity)?;

        log::debug!(
            "key custodian ready (public key {}, pinned: {})",
            fingerprint(&public),
            cell.pin_status().is_pinned()
        );

        Ok(Self {
            identity,
            cell,
            passphrase: StdMutex::new(Some(passphrase)),
            public,
            rounds,
            op_lock: Mutex::new(()),
        })
    }

    /// Seal `plaintext` to the custodian's public key.
    ///
    /// Needs no access to the private key, but still serializes with every
    /// other crypto operation.
    pub async fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let _guard = self.op_lock.lock().await;
        self.current_passphrase()?;
        seal::seal(&self.public, plaintext)
    }

    /// Open a sealed message with the protected private key.
    ///
    /// # Errors
    ///
    /// - `StateError::MissingKeyMaterial` after [`destroy`](Self::destroy).
    /// - `StateError::IdentityMismatch` if the cell holds another identity's key.
    /// - `StateError::DecryptionFailed` if the message was not sealed to this
    ///   key or has been altered.
    pub async fn decrypt(&self, sealed: Vec<u8>) -> Result<Vec<u8>> {
        let _guard = self.op_lock.lock().await;
        let passphrase = self.current_passphrase()?;
        let wrapped = self.cell.retrieve(&self.identity)?;
        let rounds = self.rounds;

        tokio::task::spawn_blocking(move || {
            let secret = unwrap_with_passphrase(passphrase.as_bytes(), rounds, &wrapped)?;
            let bytes: [u8; 32] = secret
                .as_slice()
                .try_into()
                .map_err(|_| StateError::MissingKeyMaterial)?;
            let keypair = X25519KeyPair::from_secret_bytes(bytes);
            seal::open(keypair.secret(), &sealed)
        })
        .await
        .map_err(|e| StateError::Worker(e.to_string()))?
    }

    /// Best-effort destruction of the key material.
    ///
    /// Waits for any in-flight operation, wipes the cell and forgets the
    /// runtime passphrase. Later encrypt/decrypt calls fail with
    /// `MissingKeyMaterial`.
    pub async fn destroy(&self) {
        let _guard = self.op_lock.lock().await;
        self.cell.clear();
        self.lock_passphrase().take();
        log::debug!("key custodian destroyed");
    }

    /// Whether key material is still held.
    pub fn is_active(&self) -> bool {
        self.lock_passphrase().is_some()
    }

    pub fn public_key(&self) -> &X25519PublicKey {
        &self.public
    }

    /// Short SHA-256 fingerprint of the public key, for logs and status output.
    pub fn public_fingerprint(&self) -> String {
        fingerprint(&self.public)
    }

    pub fn pin_status(&self) -> &PinStatus {
        self.cell.pin_status()
    }

    fn current_passphrase(&self) -> Result<Zeroizing<String>> {
        self.lock_passphrase()
            .clone()
            .ok_or(StateError::MissingKeyMaterial)
    }

    fn lock_passphrase(&self) -> std::sync::MutexGuard<'_, Option<Zeroizing<String>>> {
        self.passphrase
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for KeyCustodian {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyCustodian")
            .field("public", &self.public_fingerprint())
            .field("active", &self.is_active())
            .field("pin", self.pin_status())
            .finish()
    }
}

fn fingerprint(public: &X25519PublicKey) -> String {
    sha256_hex(public.as_bytes())[..16].to_string()
}
