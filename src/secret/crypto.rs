//! AEAD primitives for the saved-password cache.
//!
//! Layout is `nonce (12 bytes) || ciphertext`, with the owning user and
//! server bound in as AAD so a ciphertext cannot be replayed onto another
//! row.

use anyhow::Result;
use argon2::Argon2;
use base64ct::{Base64, Encoding};
use chacha20poly1305::{
    ChaCha20Poly1305, Key, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use rand::{RngCore, rngs::OsRng};
use uuid::Uuid;
use zeroize::Zeroize;

pub const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const PASSPHRASE_LEN: usize = 32;

/// A derived 32-byte master key. Zeroed on drop, redacted in `Debug`, and
/// never handed to any durable store owned by this crate.
pub struct KeyMaterial([u8; KEY_LEN]);

impl KeyMaterial {
    #[must_use]
    pub fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl Drop for KeyMaterial {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("KeyMaterial(***)")
    }
}

/// Derives the symmetric key from a master passphrase.
///
/// The salt is the owning user's id, so the same passphrase yields the same
/// key for that user across restarts without storing any extra material.
///
/// # Errors
/// Returns an error if key derivation fails.
pub fn derive_key(passphrase: &str, user_id: Uuid) -> Result<KeyMaterial> {
    let mut out = [0u8; KEY_LEN];
    Argon2::default()
        .hash_password_into(passphrase.as_bytes(), user_id.as_bytes(), &mut out)
        .map_err(|e| anyhow::anyhow!("key derivation failure: {e}"))?;
    Ok(KeyMaterial(out))
}

/// Fresh random passphrase for keyring-backed keys, base64-encoded.
#[must_use]
pub fn generate_passphrase() -> String {
    let mut bytes = [0u8; PASSPHRASE_LEN];
    OsRng.fill_bytes(&mut bytes);
    let passphrase = Base64::encode_string(&bytes);
    bytes.zeroize();
    passphrase
}

/// Encrypts `plaintext` under `key`. Returns `nonce || ciphertext`.
///
/// # Errors
/// Returns an error if encryption fails.
pub fn encrypt(
    key: &KeyMaterial,
    plaintext: &[u8],
    user_id: Uuid,
    server_id: Uuid,
) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let aad = construct_aad(user_id, server_id);
    let payload = Payload {
        msg: plaintext,
        aad: &aad,
    };

    let ciphertext = cipher
        .encrypt(nonce, payload)
        .map_err(|e| anyhow::anyhow!("encryption failure: {e}"))?;

    let mut result = Vec::with_capacity(nonce_bytes.len() + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);

    Ok(result)
}

/// Decrypts `nonce || ciphertext` produced by [`encrypt`].
///
/// # Errors
/// Returns an error if the data is too short, the key is wrong, or the AAD
/// does not match.
pub fn decrypt(key: &KeyMaterial, data: &[u8], user_id: Uuid, server_id: Uuid) -> Result<Vec<u8>> {
    if data.len() < NONCE_LEN {
        return Err(anyhow::anyhow!("invalid ciphertext length"));
    }

    let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
    let nonce = Nonce::from_slice(nonce_bytes);

    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));

    let aad = construct_aad(user_id, server_id);
    let payload = Payload {
        msg: ciphertext,
        aad: &aad,
    };

    cipher
        .decrypt(nonce, payload)
        .map_err(|e| anyhow::anyhow!("decryption failure: {e}"))
}

fn construct_aad(user_id: Uuid, server_id: Uuid) -> Vec<u8> {
    format!("server-secret:v1|{user_id}|{server_id}").into_bytes()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = KeyMaterial::new([42u8; KEY_LEN]);
        let user_id = Uuid::new_v4();
        let server_id = Uuid::new_v4();

        let encrypted = encrypt(&key, b"s3cret-server-pass", user_id, server_id).unwrap();
        let decrypted = decrypt(&key, &encrypted, user_id, server_id).unwrap();
        assert_eq!(decrypted, b"s3cret-server-pass");
    }

    #[test]
    fn test_wrong_key_fails() {
        let key = KeyMaterial::new([42u8; KEY_LEN]);
        let other = KeyMaterial::new([43u8; KEY_LEN]);
        let user_id = Uuid::new_v4();
        let server_id = Uuid::new_v4();

        let encrypted = encrypt(&key, b"payload", user_id, server_id).unwrap();
        assert!(decrypt(&other, &encrypted, user_id, server_id).is_err());
    }

    #[test]
    fn test_aad_binding() {
        let key = KeyMaterial::new([7u8; KEY_LEN]);
        let user_id = Uuid::new_v4();
        let server_id = Uuid::new_v4();

        let encrypted = encrypt(&key, b"payload", user_id, server_id).unwrap();
        // Same key, different server: AAD mismatch must fail.
        assert!(decrypt(&key, &encrypted, user_id, Uuid::new_v4()).is_err());
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = KeyMaterial::new([7u8; KEY_LEN]);
        let user_id = Uuid::new_v4();
        let server_id = Uuid::new_v4();

        let mut encrypted = encrypt(&key, b"payload", user_id, server_id).unwrap();
        let last = encrypted.len() - 1;
        encrypted[last] ^= 0x01;
        assert!(decrypt(&key, &encrypted, user_id, server_id).is_err());
    }

    #[test]
    fn test_short_input_rejected() {
        let key = KeyMaterial::new([7u8; KEY_LEN]);
        assert!(decrypt(&key, &[0u8; 4], Uuid::new_v4(), Uuid::new_v4()).is_err());
    }

    #[test]
    fn test_derive_key_is_deterministic_per_user() {
        let user_id = Uuid::new_v4();
        let a = derive_key("correct horse", user_id).unwrap();
        let b = derive_key("correct horse", user_id).unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());

        let other_user = derive_key("correct horse", Uuid::new_v4()).unwrap();
        assert_ne!(a.as_bytes(), other_user.as_bytes());
    }

    #[test]
    fn test_generated_passphrases_are_unique() {
        assert_ne!(generate_passphrase(), generate_passphrase());
    }
}
