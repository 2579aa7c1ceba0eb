//! Sentinel-based check that a candidate master key is correct.
//!
//! A fixed sentinel is encrypted under the key and stored on the account;
//! validating a candidate only decrypts that one blob, so wrong keys are
//! detected cheaply even before any real secret exists.

use anyhow::Result;
use uuid::Uuid;

use crate::secret::crypto::{self, KeyMaterial};

const CHECK_TEXT: &[u8] = b"saluton mondo";

/// Encrypts the sentinel under `key`, producing the blob to store.
///
/// # Errors
/// Returns an error if encryption fails.
pub fn set(key: &KeyMaterial, user_id: Uuid) -> Result<Vec<u8>> {
    crypto::encrypt(key, CHECK_TEXT, user_id, Uuid::nil())
}

/// True iff `stored` decrypts under `key` back to the sentinel.
#[must_use]
pub fn validate(key: &KeyMaterial, user_id: Uuid, stored: &[u8]) -> bool {
    crypto::decrypt(key, stored, user_id, Uuid::nil())
        .map(|plaintext| plaintext == CHECK_TEXT)
        .unwrap_or(false)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::secret::crypto::KEY_LEN;

    #[test]
    fn correct_key_validates() {
        let user_id = Uuid::new_v4();
        let key = KeyMaterial::new([5u8; KEY_LEN]);
        let stored = set(&key, user_id).unwrap();
        assert!(validate(&key, user_id, &stored));
    }

    #[test]
    fn wrong_key_is_rejected() {
        let user_id = Uuid::new_v4();
        let key = KeyMaterial::new([5u8; KEY_LEN]);
        let wrong = KeyMaterial::new([6u8; KEY_LEN]);
        let stored = set(&key, user_id).unwrap();
        assert!(!validate(&wrong, user_id, &stored));
    }

    #[test]
    fn garbage_blob_is_rejected() {
        let key = KeyMaterial::new([5u8; KEY_LEN]);
        assert!(!validate(&key, Uuid::new_v4(), b"short"));
    }
}
