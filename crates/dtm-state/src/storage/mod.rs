//! On-disk persistence: layout, atomic writes, backups and the two-tier
//! document store.
//!
//! # Directory layout
//!
//! The default root is `~/.dtm/`:
//!
//! ```text
//! ~/.dtm/
//! ├── custodian.key                      (persistent key mode only)
//! ├── state/
//! │   ├── {name}
//! │   ├── state_hashes.json
//! │   └── cert_index.json
//! ├── backups/
//! │   ├── {name}.{YYYYMMDDHHMMSSffffff}.bak
//! │   └── {cert_id}.cert.{YYYYMMDDHHMMSSffffff}.bak
//! └── certificates/
//!     └── {cert_id}.cert
//! ```
//!
//! # Modules
//!
//! - [`layout`]: paths and name rules.
//! - [`atomic`]: temp-then-rename writes and the startup orphan sweep.
//! - [`backup`]: timestamped backups and retention pruning.
//! - [`store`]: [`RawStore`] and the verified [`PersistentStore`].

pub mod atomic;
pub mod backup;
pub mod layout;
pub mod store;

pub use atomic::{sweep_orphans, write_atomic, write_atomic_async, SweepReport};
pub use backup::{list_backups, prune_all, prune_backups, BackupEntry};
pub use layout::{validate_name, Layout};
pub use store::{validate_document_name, PersistentStore, RawStore, CERT_INDEX_DOC};
