use std::fmt;

use serde::{Deserialize, Serialize};
use zeroize::ZeroizeOnDrop;

use super::crypto::{SecretKey, KEY_BYTES, NONCE_BYTES};

/// One shared secret at rest.
///
/// Stored as bincode-encoded bytes. The key travels with the ciphertext: the
/// record itself is the capability, so whoever takes it can open it exactly once.
#[derive(Clone, Serialize, Deserialize, ZeroizeOnDrop)]
pub struct SecretRecord {
    /// ChaCha20Poly1305 ciphertext (payload + tag).
    pub ciphertext: Vec<u8>,
    /// Per-record random 12-byte nonce.
    pub nonce: [u8; NONCE_BYTES],
    /// Per-record random 32-byte key.
    pub key: [u8; KEY_BYTES],
    /// Unix timestamp (seconds) when the record was created. Informational.
    pub created_at: i64,
}

impl SecretRecord {
    pub fn secret_key(&self) -> SecretKey {
        SecretKey::from_bytes(self.key)
    }
}

impl fmt::Debug for SecretRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretRecord")
            .field("ciphertext_len", &self.ciphertext.len())
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// Returns true once `now` has reached `expires_at`.
pub fn is_expired(expires_at: i64, now: i64) -> bool {
    now >= expires_at
}
