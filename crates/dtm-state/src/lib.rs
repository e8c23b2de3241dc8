//! dtm-state: Encrypted, tamper-evident persistence for tunnel state.
//!
//! Stores named JSON documents and certificate material encrypted at rest
//! under a runtime X25519 key held in protected memory. Writes are atomic,
//! every document keeps a bounded set of timestamped backups, and loads
//! verify content hashes and heal from the newest backup that still
//! verifies. Certificates get a second, content-level encryption layer and
//! a SHA-256 fingerprint check.

pub mod certificate;
pub mod config;
pub mod crypto;
pub mod custody;
pub mod error;
pub mod integrity;
pub mod manager;
pub mod progress;
pub mod storage;
pub mod time;

// Re-export primary types
pub use error::{FaultKind, Result, StateError};
pub use manager::{CleanupReport, SecureState, SecureStateBuilder};

pub use certificate::{metadata_from_pairs, CertificateEnvelope, CertificateRecord, CertificateVault, Metadata};
pub use config::{KeyMode, StoreConfig, MAX_BACKUPS, ROOT_ENV};
pub use custody::{KeyCustodian, PinStatus, RuntimeIdentity, SecretCell};
pub use integrity::{canonical_json, document_hash, IntegrityIndex, Verification};
pub use progress::{LogProgress, ProgressSink, TaskId};
pub use storage::{PersistentStore, RawStore};
