//! Custody of the process's key material.
//!
//! - [`secret_cell`]: single-slot protected memory bound to a runtime identity.
//! - [`custodian`]: the asymmetric key pair and its encrypt/decrypt lock.
//! - [`key_file`]: optional long-term key file for persistent key mode.

pub mod custodian;
pub mod key_file;
pub mod secret_cell;

pub use custodian::KeyCustodian;
pub use secret_cell::{PinStatus, RuntimeIdentity, SecretCell, CELL_CAPACITY};
