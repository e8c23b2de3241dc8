//! Single-slot protected memory for one wrapped secret.
//!
//! The cell owns a fixed 4096-byte heap region. A stored secret is prefixed
//! with the caller's [`RuntimeIdentity`], encrypted under a key that exists
//! only for the lifetime of the cell, and copied into the region. The
//! region is page-locked when the platform allows it; failure to lock is
//! recorded in [`PinStatus`] and is never fatal.
//!
//! This is not a keystore: a second `store` replaces the first.

use std::fmt;
use std::sync::Mutex;

use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::crypto::encryption::{decrypt_combined, encrypt_combined};
use crate::crypto::random::random_bytes;
use crate::error::{Result, StateError};

/// Size of the backing region in bytes.
pub const CELL_CAPACITY: usize = 4096;

const IDENTITY_LEN: usize = 32;

// ── RuntimeIdentity ───────────────────────────────────────────────────────────

/// Random 256-bit value binding protected secrets to one process instance.
///
/// Never serialized and never written to disk.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct RuntimeIdentity([u8; IDENTITY_LEN]);

impl RuntimeIdentity {
    /// Generate a fresh identity.
    pub fn generate() -> Self {
        Self(random_bytes())
    }

    fn as_bytes(&self) -> &[u8; IDENTITY_LEN] {
        &self.0
    }

    /// Constant-time comparison against raw bytes.
    fn matches(&self, other: &[u8]) -> bool {
        if other.len() != IDENTITY_LEN {
            return false;
        }
        self.0
            .iter()
            .zip(other)
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

impl fmt::Debug for RuntimeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RuntimeIdentity(<redacted>)")
    }
}

// ── PinStatus ─────────────────────────────────────────────────────────────────

/// Outcome of the attempt to keep the cell's pages out of swap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PinStatus {
    /// The region is locked in RAM.
    Pinned,
    /// Locking was attempted and refused; the reason is kept for diagnostics.
    Unpinned(String),
    /// Locking was not attempted (disabled by configuration).
    Disabled,
}

impl PinStatus {
    pub fn is_pinned(&self) -> bool {
        matches!(self, PinStatus::Pinned)
    }
}

impl fmt::Display for PinStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PinStatus::Pinned => f.write_str("pinned"),
            PinStatus::Unpinned(reason) => write!(f, "not pinned ({reason})"),
            PinStatus::Disabled => f.write_str("pinning disabled"),
        }
    }
}

// ── SecretCell ────────────────────────────────────────────────────────────────

struct Slot {
    region: Box<[u8; CELL_CAPACITY]>,
    len: usize,
}

/// Single-slot, best-effort anti-swap holder for one wrapped secret.
pub struct SecretCell {
    slot: Mutex<Slot>,
    cell_key: Zeroizing<[u8; 32]>,
    pin: PinStatus,
}

impl SecretCell {
    /// Allocate the region and, if `pin_memory` is set, try to lock it.
    pub fn new(pin_memory: bool) -> Self {
        let region = Box::new([0u8; CELL_CAPACITY]);
        let pin = if pin_memory {
            lock_region(region.as_ptr(), CELL_CAPACITY)
        } else {
            PinStatus::Disabled
        };
        if let PinStatus::Unpinned(reason) = &pin {
            log::warn!("secret cell not pinned in memory: {reason}");
        }

        Self {
            slot: Mutex::new(Slot { region, len: 0 }),
            cell_key: Zeroizing::new(random_bytes()),
            pin,
        }
    }

    /// Whether the region is pinned.
    pub fn pin_status(&self) -> &PinStatus {
        &self.pin
    }

    /// Store `secret`, bound to `identity`, replacing any previous content.
    ///
    /// # Errors
    ///
    /// Returns `StateError::CapacityExceeded` if the encrypted payload does
    /// not fit the region; the previous content is left in place.
    pub fn store(&self, secret: &[u8], identity: &RuntimeIdentity) -> Result<()> {
        let mut plaintext = Zeroizing::new(Vec::with_capacity(IDENTITY_LEN + secret.len()));
        plaintext.extend_from_slice(identity.as_bytes());
        plaintext.extend_from_slice(secret);

        let blob = encrypt_combined(&self.cell_key, &plaintext)?;
        if blob.len() > CELL_CAPACITY {
            return Err(StateError::CapacityExceeded {
                needed: blob.len(),
                capacity: CELL_CAPACITY,
            });
        }

        let mut slot = self.lock_slot();
        slot.region[..blob.len()].copy_from_slice(&blob);
        slot.region[blob.len()..].zeroize();
        slot.len = blob.len();
        Ok(())
    }

    /// Retrieve the stored secret, checking it was bound to `identity`.
    ///
    /// # Errors
    ///
    /// - `StateError::MissingKeyMaterial` if the cell is empty.
    /// - `StateError::DecryptionFailed` if the region content was altered.
    /// - `StateError::IdentityMismatch` if the secret belongs to another
    ///   runtime identity.
    pub fn retrieve(&self, identity: &RuntimeIdentity) -> Result<Zeroizing<Vec<u8>>> {
        let slot = self.lock_slot();
        if slot.len == 0 {
            return Err(StateError::MissingKeyMaterial);
        }
        let plaintext = Zeroizing::new(decrypt_combined(&self.cell_key, &slot.region[..slot.len])?);
        drop(slot);

        if plaintext.len() < IDENTITY_LEN || !identity.matches(&plaintext[..IDENTITY_LEN]) {
            return Err(StateError::IdentityMismatch);
        }
        Ok(Zeroizing::new(plaintext[IDENTITY_LEN..].to_vec()))
    }

    /// Wipe the region. Subsequent retrievals fail with `MissingKeyMaterial`.
    pub fn clear(&self) {
        let mut slot = self.lock_slot();
        slot.region.zeroize();
        slot.len = 0;
    }

    pub fn is_empty(&self) -> bool {
        self.lock_slot().len == 0
    }

    fn lock_slot(&self) -> std::sync::MutexGuard<'_, Slot> {
        // A panic while holding the lock cannot leave the slot half-written
        // in a way retrieve would accept; the AEAD tag covers it.
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for SecretCell {
    fn drop(&mut self) {
        let slot = self.slot.get_mut().unwrap_or_else(|p| p.into_inner());
        slot.region.zeroize();
        slot.len = 0;
        if self.pin.is_pinned() {
            unlock_region(slot.region.as_ptr(), CELL_CAPACITY);
        }
    }
}

impl fmt::Debug for SecretCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretCell")
            .field("pin", &self.pin)
            .field("empty", &self.is_empty())
            .finish()
    }
}

// ── Platform page locking ─────────────────────────────────────────────────────

#[cfg(unix)]
fn lock_region(ptr: *const u8, len: usize) -> PinStatus {
    // SAFETY: `ptr..ptr+len` is a live heap allocation owned by the cell;
    // mlock only changes residency, never contents.
    let rc = unsafe { libc::mlock(ptr as *const libc::c_void, len) };
    if rc == 0 {
        PinStatus::Pinned
    } else {
        PinStatus::Unpinned(std::io::Error::last_os_error().to_string())
    }
}

#[cfg(unix)]
fn unlock_region(ptr: *const u8, len: usize) {
    // SAFETY: same region that was passed to mlock in `lock_region`.
    unsafe {
        libc::munlock(ptr as *const libc::c_void, len);
    }
}

#[cfg(not(unix))]
fn lock_region(_ptr: *const u8, _len: usize) -> PinStatus {
    PinStatus::Unpinned("page locking not supported on this platform".into())
}

#[cfg(not(unix))]
fn unlock_region(_ptr: *const u8, _len: usize) {}
