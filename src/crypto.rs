//! Cryptographic utilities shared by the barrier, the key-gen pools and JOSE.
//!
//! Random key material, HKDF key derivation and SHA-256 fingerprints.

use hkdf::Hkdf;
use rand::RngCore;
use sha2::{Digest, Sha256};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::error::Error;

/// Derives a stable identifier from the SHA-256 of `data`.
///
/// Used as the `kid` of keys that have no row of their own, such as the
/// barrier's unseal keys.
pub fn fingerprint(data: &[u8]) -> Result<Uuid, Error> {
    let digest = Sha256::digest(data);
    Uuid::from_slice(&digest[..16]).map_err(Error::internal)
}

/// Fills a new zeroizing buffer of `len` bytes from the thread-local CSPRNG.
pub fn random_bytes(len: usize) -> Result<Zeroizing<Vec<u8>>, Error> {
    let mut buf = Zeroizing::new(vec![0u8; len]);
    rand::thread_rng()
        .try_fill_bytes(buf.as_mut_slice())
        .map_err(Error::internal)?;
    Ok(buf)
}

/// HKDF-SHA256 expansion of `secret` into a key of `len` bytes.
pub fn derive_key(
    secret: &[u8],
    salt: &[u8],
    info: &[u8],
    len: usize,
) -> Result<Zeroizing<Vec<u8>>, Error> {
    let hk = Hkdf::<Sha256>::new(Some(salt), secret);
    let mut okm = Zeroizing::new(vec![0u8; len]);
    hk.expand(info, okm.as_mut_slice())
        .map_err(|e| Error::internal(eyre::eyre!("HKDF expansion failed: {e}")))?;
    Ok(okm)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_bytes_have_requested_length_and_differ() {
        let a = random_bytes(32).unwrap();
        let b = random_bytes(32).unwrap();
        assert_eq!(a.len(), 32);
        assert_ne!(*a, *b);
    }

    #[test]
    fn derive_key_is_deterministic_per_secret() {
        let a = derive_key(b"secret-one", b"salt", b"info", 32).unwrap();
        let b = derive_key(b"secret-one", b"salt", b"info", 32).unwrap();
        let c = derive_key(b"secret-two", b"salt", b"info", 32).unwrap();
        assert_eq!(*a, *b);
        assert_ne!(*a, *c);
    }

    #[test]
    fn fingerprint_is_stable() {
        assert_eq!(fingerprint(b"abc").unwrap(), fingerprint(b"abc").unwrap());
        assert_ne!(fingerprint(b"abc").unwrap(), fingerprint(b"abd").unwrap());
    }
}
