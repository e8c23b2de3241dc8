//! Certificate and key material storage.
//!
//! - [`envelope`]: the inner content-encryption layer.
//! - [`vault`]: [`CertificateVault`], the indexed store with rotation.

pub mod envelope;
pub mod vault;

pub use envelope::CertificateEnvelope;
pub use vault::{metadata_from_pairs, CertificateRecord, CertificateVault, Metadata, ENCRYPTION_LABEL};
