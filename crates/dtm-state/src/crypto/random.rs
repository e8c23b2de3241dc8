//! Secure random number generation.
//!
//! Uses the operating system's cryptographic random source via `rand`.

use rand::seq::SliceRandom;
use rand::RngCore;
use zeroize::Zeroizing;

const UPPERCASE: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const LOWERCASE: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const DIGITS: &[u8] = b"0123456789";
const SYMBOLS: &[u8] = b"!@#$%^&*()_+-=[]{}|;:,.<>?";

/// Length of generated runtime passphrases.
pub const PASSPHRASE_LEN: usize = 32;

/// Fill a buffer with cryptographically secure random bytes.
pub fn fill_random(buf: &mut [u8]) {
    rand::thread_rng().fill_bytes(buf);
}

/// Generate a fixed-size array of cryptographically secure random bytes.
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut buf = [0u8; N];
    fill_random(&mut buf);
    buf
}

/// Generate a random 12-byte nonce (for ChaCha20-Poly1305).
pub fn random_nonce_12() -> [u8; 12] {
    random_bytes()
}

/// Generate a random 16-byte salt.
pub fn random_salt_16() -> [u8; 16] {
    random_bytes()
}

/// Generate a random lowercase hex suffix of `n` bytes, for temp file names.
pub fn random_hex(n: usize) -> String {
    let mut buf = vec![0u8; n];
    fill_random(&mut buf);
    hex::encode(buf)
}

/// Generate a 32-character passphrase with at least one uppercase letter,
/// lowercase letter, digit and symbol, shuffled.
pub fn generate_passphrase() -> Zeroizing<String> {
    let mut rng = rand::thread_rng();
    let all: Vec<u8> = [UPPERCASE, LOWERCASE, DIGITS, SYMBOLS].concat();

    let mut chars: Zeroizing<Vec<u8>> = Zeroizing::new(Vec::with_capacity(PASSPHRASE_LEN));
    for class in [UPPERCASE, LOWERCASE, DIGITS, SYMBOLS] {
        if let Some(&c) = class.choose(&mut rng) {
            chars.push(c);
        }
    }
    while chars.len() < PASSPHRASE_LEN {
        if let Some(&c) = all.choose(&mut rng) {
            chars.push(c);
        }
    }
    chars.shuffle(&mut rng);

    // Every byte comes from an ASCII table above.
    Zeroizing::new(chars.iter().map(|&b| b as char).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_bytes_not_zero() {
        let bytes: [u8; 32] = random_bytes();
        // Probability of all zeros is 2^-256; if this fails, something is very wrong
        assert!(bytes.iter().any(|&b| b != 0));
    }

    #[test]
    fn test_random_bytes_unique() {
        let a: [u8; 32] = random_bytes();
        let b: [u8; 32] = random_bytes();
        assert_ne!(a, b);
    }

    #[test]
    fn test_random_hex_length() {
        assert_eq!(random_hex(8).len(), 16);
        assert_ne!(random_hex(8), random_hex(8));
    }

    #[test]
    fn test_passphrase_has_every_class() {
        for _ in 0..200 {
            let pass = generate_passphrase();
            assert_eq!(pass.len(), PASSPHRASE_LEN);
            assert!(pass.bytes().any(|b| UPPERCASE.contains(&b)));
            assert!(pass.bytes().any(|b| LOWERCASE.contains(&b)));
            assert!(pass.bytes().any(|b| DIGITS.contains(&b)));
            assert!(pass.bytes().any(|b| SYMBOLS.contains(&b)));
        }
    }

    #[test]
    fn test_passphrases_differ() {
        assert_ne!(*generate_passphrase(), *generate_passphrase());
    }
}
