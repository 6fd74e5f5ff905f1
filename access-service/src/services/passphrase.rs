//! Shared-passphrase secrets: validation, generation and encryption at rest.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use rand::{rngs::OsRng, Rng, RngCore};

/// Characters for generated passphrases. Omits look-alikes (0/O, 1/l/I).
pub const PASSPHRASE_CHARSET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnpqrstuvwxyz23456789";

pub const MIN_PASSPHRASE_LEN: usize = 8;
pub const MAX_PASSPHRASE_LEN: usize = 63;

const NONCE_LEN: usize = 12;

/// WPA2 passphrase rules: 8 to 63 printable ASCII characters.
pub fn validate_passphrase(passphrase: &str) -> Result<(), String> {
    let len = passphrase.len();
    if !(MIN_PASSPHRASE_LEN..=MAX_PASSPHRASE_LEN).contains(&len) {
        return Err(format!(
            "passphrase must be {}-{} characters",
            MIN_PASSPHRASE_LEN, MAX_PASSPHRASE_LEN
        ));
    }
    if !passphrase.bytes().all(|b| (0x20..=0x7e).contains(&b)) {
        return Err("passphrase must contain printable ASCII only".to_string());
    }
    Ok(())
}

pub fn generate_passphrase(length: usize) -> String {
    let length = length.clamp(MIN_PASSPHRASE_LEN, MAX_PASSPHRASE_LEN);
    let mut rng = OsRng;
    (0..length)
        .map(|_| PASSPHRASE_CHARSET[rng.gen_range(0..PASSPHRASE_CHARSET.len())] as char)
        .collect()
}

/// Opaque identifier presented to the controller instead of the owner.
pub fn generate_correlation_id() -> String {
    let mut bytes = [0u8; 12];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// AES-256-GCM with a random nonce prepended to each ciphertext.
#[derive(Clone)]
pub struct PassphraseCipher {
    key: [u8; 32],
}

impl PassphraseCipher {
    pub fn from_key(key: [u8; 32]) -> Self {
        Self { key }
    }

    pub fn from_base64_key(encoded: &str) -> Result<Self, anyhow::Error> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| anyhow::anyhow!("Passphrase key is not valid base64: {}", e))?;
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| anyhow::anyhow!("Passphrase key must be 32 bytes"))?;
        Ok(Self::from_key(key))
    }

    /// Returns base64(nonce || ciphertext).
    pub fn encrypt(&self, plaintext: &str) -> Result<String, anyhow::Error> {
        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| anyhow::anyhow!("Failed to create cipher: {}", e))?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from(nonce_bytes);

        let ciphertext = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| anyhow::anyhow!("Encryption failed: {}", e))?;

        let mut sealed = nonce_bytes.to_vec();
        sealed.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(sealed))
    }

    pub fn decrypt(&self, sealed: &str) -> Result<String, anyhow::Error> {
        let bytes = STANDARD
            .decode(sealed)
            .map_err(|e| anyhow::anyhow!("Ciphertext is not valid base64: {}", e))?;
        if bytes.len() < NONCE_LEN {
            return Err(anyhow::anyhow!("Ciphertext too short"));
        }

        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| anyhow::anyhow!("Failed to create cipher: {}", e))?;
        let (nonce_bytes, ciphertext) = bytes.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| anyhow::anyhow!("Decryption failed: {}", e))?;
        String::from_utf8(plaintext).map_err(|e| anyhow::anyhow!("Plaintext is not UTF-8: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_length_and_charset() {
        assert!(validate_passphrase("short").is_err());
        assert!(validate_passphrase(&"a".repeat(64)).is_err());
        assert!(validate_passphrase("with\ttab").is_err());
        assert!(validate_passphrase("correct horse").is_ok());
        assert!(validate_passphrase(&"a".repeat(63)).is_ok());
    }

    #[test]
    fn generated_passphrases_use_unambiguous_charset() {
        let passphrase = generate_passphrase(16);
        assert_eq!(passphrase.len(), 16);
        assert!(passphrase.bytes().all(|b| PASSPHRASE_CHARSET.contains(&b)));
        assert!(validate_passphrase(&passphrase).is_ok());
        assert_ne!(passphrase, generate_passphrase(16));
    }

    #[test]
    fn cipher_round_trip_uses_fresh_nonces() {
        let cipher = PassphraseCipher::from_key([7u8; 32]);
        let first = cipher.encrypt("hunter2hunter2").unwrap();
        let second = cipher.encrypt("hunter2hunter2").unwrap();
        assert_ne!(first, second);
        assert_eq!(cipher.decrypt(&first).unwrap(), "hunter2hunter2");
    }

    #[test]
    fn wrong_key_fails_to_decrypt() {
        let sealed = PassphraseCipher::from_key([1u8; 32]).encrypt("secret-pass").unwrap();
        assert!(PassphraseCipher::from_key([2u8; 32]).decrypt(&sealed).is_err());
    }

    #[test]
    fn rejects_short_keys() {
        assert!(PassphraseCipher::from_base64_key(&STANDARD.encode([0u8; 16])).is_err());
        assert!(PassphraseCipher::from_base64_key(&STANDARD.encode([0u8; 32])).is_ok());
    }
}
