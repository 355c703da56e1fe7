//! Salted HKDF-SHA256 password derivation.
//!
//! Each user gets a random 16-byte salt; the stored hash is
//! HKDF-SHA256(salt, password) expanded to 32 bytes with a purpose-bound
//! info string.

use hkdf::Hkdf;
use rand::Rng;
use sha2::Sha256;

/// Info string for HKDF expansion (purpose binding)
const HKDF_INFO: &[u8] = b"teamboard-password-v1";

/// Derive the stored hash for a password under the given salt.
pub fn derive_hash(salt: &[u8], password: &str) -> [u8; 32] {
    let hk = Hkdf::<Sha256>::new(Some(salt), password.as_bytes());
    let mut okm = [0u8; 32];
    hk.expand(HKDF_INFO, &mut okm)
        .expect("HKDF expand should not fail for 32-byte output");
    okm
}

/// Hash a new password: returns (salt, hash).
pub fn hash_password(password: &str) -> (Vec<u8>, Vec<u8>) {
    let salt: [u8; 16] = rand::rng().random();
    let hash = derive_hash(&salt, password);
    (salt.to_vec(), hash.to_vec())
}

/// Verify a password attempt against the stored salt and hash.
pub fn verify_password(salt: &[u8], stored_hash: &[u8], attempt: &str) -> bool {
    let derived = derive_hash(salt, attempt);
    // Fold the comparison so it does not short-circuit on the first mismatch
    stored_hash.len() == derived.len()
        && stored_hash
            .iter()
            .zip(derived.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}
