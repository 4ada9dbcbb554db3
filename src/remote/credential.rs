//! Shared-secret proof sent in the auth frame
//!
//! The credential is `nonce ‖ HMAC-SHA256(secret, nonce)`. The secret itself
//! never crosses the wire and a fresh random nonce is drawn per connection.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::error::{Result, TallyError};

type HmacSha256 = Hmac<Sha256>;

pub const NONCE_LEN: usize = 16;
pub const DIGEST_LEN: usize = 32;
pub const CREDENTIAL_LEN: usize = NONCE_LEN + DIGEST_LEN;

/// Random nonce from the OS entropy source
pub fn fresh_nonce() -> Result<[u8; NONCE_LEN]> {
    let mut nonce = [0u8; NONCE_LEN];
    getrandom::fill(&mut nonce)
        .map_err(|e| TallyError::network(format!("entropy source unavailable: {}", e)))?;
    Ok(nonce)
}

/// Build the auth payload for `secret`
pub fn derive(secret: &str, nonce: [u8; NONCE_LEN]) -> Result<Vec<u8>> {
    let mut mac = keyed(secret)?;
    mac.update(&nonce);

    let mut out = Vec::with_capacity(CREDENTIAL_LEN);
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

/// Check an auth payload against `secret` (controller side)
pub fn verify(secret: &str, credential: &[u8]) -> bool {
    if credential.len() != CREDENTIAL_LEN {
        return false;
    }
    let (nonce, proof) = credential.split_at(NONCE_LEN);
    match keyed(secret) {
        Ok(mut mac) => {
            mac.update(nonce);
            mac.verify_slice(proof).is_ok()
        }
        Err(_) => false,
    }
}

/// Short hex tag for logs; identifies which secret is configured without
/// revealing it
pub fn fingerprint(secret: &str) -> String {
    let digest = Sha256::digest(secret.as_bytes());
    hex::encode(&digest[..4])
}

fn keyed(secret: &str) -> Result<HmacSha256> {
    HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| TallyError::protocol(format!("unusable shared secret: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_and_verify() {
        let credential = derive("hunter2", fresh_nonce().unwrap()).unwrap();
        assert_eq!(credential.len(), CREDENTIAL_LEN);
        assert!(verify("hunter2", &credential));
        assert!(!verify("hunter3", &credential));
    }

    #[test]
    fn test_tampered_or_short_credential_rejected() {
        let mut credential = derive("secret", [7u8; NONCE_LEN]).unwrap();
        assert!(!verify("secret", &credential[..CREDENTIAL_LEN - 1]));
        credential[0] ^= 0x01;
        assert!(!verify("secret", &credential));

        let mut credential = derive("secret", [7u8; NONCE_LEN]).unwrap();
        credential[CREDENTIAL_LEN - 1] ^= 0x80;
        assert!(!verify("secret", &credential));
    }

    #[test]
    fn test_secret_not_on_the_wire() {
        let credential = derive("plaintext-secret", [0u8; NONCE_LEN]).unwrap();
        let needle = b"plaintext-secret";
        assert!(!credential.windows(needle.len()).any(|w| w == needle));
    }

    #[test]
    fn test_proof_is_hmac_of_nonce() {
        let nonce = [0x42u8; NONCE_LEN];
        let credential = derive("key", nonce).unwrap();

        let mut mac = HmacSha256::new_from_slice(b"key").unwrap();
        mac.update(&nonce);
        assert_eq!(&credential[..NONCE_LEN], &nonce);
        assert_eq!(&credential[NONCE_LEN..], mac.finalize().into_bytes().as_slice());
    }

    #[test]
    fn test_nonces_are_random() {
        let nonces: Vec<_> = (0..64).map(|_| fresh_nonce().unwrap()).collect();
        for (i, a) in nonces.iter().enumerate() {
            assert_ne!(*a, [0u8; NONCE_LEN]);
            assert!(nonces[i + 1..].iter().all(|b| b != a));
        }
    }

    #[test]
    fn test_fingerprint_is_stable_hex() {
        let fp = fingerprint("secret");
        assert_eq!(fp.len(), 8);
        assert_eq!(fp, fingerprint("secret"));
        assert_ne!(fp, fingerprint("other"));
    }
}
