//! Error types for dtm-state.
//!
//! All errors are strongly typed and propagated without panicking.
//! Key material, passphrases and document contents are never included
//! in error messages.

/// Coarse fault classes callers can branch on without matching every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Integrity or identity violation: tampering, wrong process, bad fingerprint.
    Security,
    /// Disk errors during read, write, or rename.
    Io,
    /// Missing key material, malformed stored data, bad configuration.
    Config,
}

/// State error types covering all operations.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("Runtime identity mismatch")]
    IdentityMismatch,

    #[error("Integrity verification failed for {0}")]
    IntegrityMismatch(String),

    #[error("Certificate {0} fingerprint mismatch")]
    FingerprintMismatch(String),

    #[error("Certificate not found: {0}")]
    CertificateNotFound(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Background crypto task failed: {0}")]
    Worker(String),

    #[error("Key material is not available")]
    MissingKeyMaterial,

    #[error("Malformed stored document: {0}")]
    MalformedDocument(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid name: {0:?}")]
    InvalidName(String),

    #[error("Secret of {needed} bytes exceeds cell capacity of {capacity} bytes")]
    CapacityExceeded { needed: usize, capacity: usize },

    #[error("Key derivation failed: {0}")]
    DerivationFailed(String),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid passphrase")]
    InvalidPassphrase,
}

impl StateError {
    /// Classify this error into one of the three fault classes.
    pub fn kind(&self) -> FaultKind {
        match self {
            StateError::IdentityMismatch
            | StateError::IntegrityMismatch(_)
            | StateError::FingerprintMismatch(_)
            | StateError::CertificateNotFound(_)
            | StateError::DecryptionFailed(_) => FaultKind::Security,
            StateError::Io(_) | StateError::Worker(_) => FaultKind::Io,
            StateError::MissingKeyMaterial
            | StateError::MalformedDocument(_)
            | StateError::Serialization(_)
            | StateError::InvalidName(_)
            | StateError::CapacityExceeded { .. }
            | StateError::DerivationFailed(_)
            | StateError::EncryptionFailed(_)
            | StateError::InvalidConfig(_)
            | StateError::InvalidPassphrase => FaultKind::Config,
        }
    }

    pub fn is_security_fault(&self) -> bool {
        self.kind() == FaultKind::Security
    }
}

impl From<serde_json::Error> for StateError {
    fn from(e: serde_json::Error) -> Self {
        StateError::Serialization(e.to_string())
    }
}

/// Convenience Result alias.
pub type Result<T> = std::result::Result<T, StateError>;
