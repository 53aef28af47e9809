use anyhow::{anyhow, Result};
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

/// Hashes a ledger entry payload with the previous chain hash.
pub fn hash_entry(prev_hash: &[u8; 32], payload: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(prev_hash);
    hasher.update(payload);
    hasher.finalize().into()
}

/// Signs a ledger entry hash using Ed25519.
pub fn sign_entry(signing_key: &SigningKey, entry_hash: &[u8; 32]) -> [u8; 64] {
    signing_key.sign(entry_hash).to_bytes()
}

/// Verifies a ledger entry signature against its entry hash.
pub fn verify_entry_signature(
    verifying_key: &VerifyingKey,
    entry_hash: &[u8; 32],
    signature: &[u8; 64],
) -> Result<()> {
    let sig = ed25519_dalek::Signature::from_bytes(signature);
    verifying_key
        .verify(entry_hash, &sig)
        .map_err(|e| anyhow!("signature verification failed: {}", e))
}

/// Derives the ledger signing identity from a configured seed string.
pub fn signing_key_from_seed(seed: &str) -> Result<SigningKey> {
    let trimmed = seed.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("ledger signing seed is required"));
    }
    let mut hasher = Sha256::new();
    hasher.update(trimmed.as_bytes());
    let mut digest: [u8; 32] = hasher.finalize().into();
    let key = SigningKey::from_bytes(&digest);
    digest.zeroize();
    Ok(key)
}

/// Parses a hex-encoded Ed25519 verifying key.
pub fn verifying_key_from_hex(hex_key: &str) -> Result<VerifyingKey> {
    let bytes = hex::decode(hex_key.trim()).map_err(|e| anyhow!("invalid key hex: {}", e))?;
    let key_bytes: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
        anyhow!(
            "invalid verifying key bytes: expected 32 bytes, got {}",
            bytes.len()
        )
    })?;
    VerifyingKey::from_bytes(&key_bytes).map_err(|e| anyhow!("invalid verifying key: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chained_hash_depends_on_previous_entry() {
        let a = hash_entry(&[0u8; 32], b"payload");
        let b = hash_entry(&[1u8; 32], b"payload");
        assert_ne!(a, b);
        assert_eq!(a, hash_entry(&[0u8; 32], b"payload"));
    }

    #[test]
    fn signatures_verify_only_for_matching_hash() {
        let key = signing_key_from_seed("ledger:test").unwrap();
        let entry = hash_entry(&[0u8; 32], b"evidence");
        let sig = sign_entry(&key, &entry);
        assert!(verify_entry_signature(&key.verifying_key(), &entry, &sig).is_ok());

        let other = hash_entry(&[0u8; 32], b"tampered");
        assert!(verify_entry_signature(&key.verifying_key(), &other, &sig).is_err());
    }

    #[test]
    fn empty_seed_is_rejected() {
        assert!(signing_key_from_seed("   ").is_err());
    }

    #[test]
    fn verifying_key_hex_round_trips() {
        let key = signing_key_from_seed("ledger:hex").unwrap().verifying_key();
        let parsed = verifying_key_from_hex(&hex::encode(key.to_bytes())).unwrap();
        assert_eq!(parsed, key);
        assert!(verifying_key_from_hex("abcd").is_err());
    }
}
