use std::fmt;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chacha20poly1305::{
    aead::{Aead, KeyInit, OsRng},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::VaultError;

/// Random bytes behind a secret id (128 bits).
pub const ID_BYTES: usize = 16;
pub const KEY_BYTES: usize = 32;
pub const NONCE_BYTES: usize = 12;

/// Characters of an id that may appear in logs. An id grants access to its
/// secret, so logs carry only this prefix.
pub const LOG_TAG_CHARS: usize = 6;

/// Opaque, URL-safe identifier of a stored secret.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SecretId(String);

impl SecretId {
    /// Accept only strings shaped like a generated id: base64url, no padding,
    /// decoding to exactly [`ID_BYTES`].
    pub fn parse(s: &str) -> Option<Self> {
        let decoded = URL_SAFE_NO_PAD.decode(s).ok()?;
        (decoded.len() == ID_BYTES).then(|| Self(s.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix for log correlation; cannot be used to reveal.
    pub fn log_tag(&self) -> &str {
        log_tag(&self.0)
    }
}

/// Log-safe prefix of any stored key, including ones that never parsed.
pub fn log_tag(raw_id: &str) -> &str {
    raw_id.get(..LOG_TAG_CHARS).unwrap_or("")
}

impl fmt::Display for SecretId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-secret 256-bit ChaCha20Poly1305 key.
#[derive(ZeroizeOnDrop)]
pub struct SecretKey([u8; KEY_BYTES]);

impl SecretKey {
    pub fn from_bytes(bytes: [u8; KEY_BYTES]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_BYTES] {
        &self.0
    }
}

/// Fill `buf` from the OS CSPRNG. There is no fallback source.
fn fill_random(buf: &mut [u8]) -> Result<(), VaultError> {
    OsRng
        .try_fill_bytes(buf)
        .map_err(|_| VaultError::GenerationExhaustion)
}

/// Generate a fresh secret id.
pub fn generate_id() -> Result<SecretId, VaultError> {
    let mut bytes = [0u8; ID_BYTES];
    fill_random(&mut bytes)?;
    Ok(SecretId(URL_SAFE_NO_PAD.encode(bytes)))
}

/// Generate a fresh encryption key. Never reused across records.
pub fn generate_key() -> Result<SecretKey, VaultError> {
    let mut key = SecretKey([0u8; KEY_BYTES]);
    fill_random(&mut key.0)?;
    Ok(key)
}

/// Encrypt `plaintext` with `key` under a fresh nonce, returning `(ciphertext, nonce)`.
pub fn encrypt(
    key: &SecretKey,
    plaintext: &[u8],
) -> Result<(Vec<u8>, [u8; NONCE_BYTES]), VaultError> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));

    let mut nonce_bytes = [0u8; NONCE_BYTES];
    fill_random(&mut nonce_bytes)?;
    let nonce = Nonce::from(nonce_bytes);

    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| VaultError::EncryptionFailed)?;

    Ok((ciphertext, nonce_bytes))
}

/// Decrypt `ciphertext` with `key` and `nonce` into UTF-8 text.
///
/// Tag verification is constant time inside the AEAD. Any failure, including
/// non-UTF-8 plaintext, collapses into [`VaultError::DecryptionFailed`].
pub fn decrypt(
    key: &SecretKey,
    ciphertext: &[u8],
    nonce_bytes: &[u8; NONCE_BYTES],
) -> Result<String, VaultError> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    let nonce = Nonce::from(*nonce_bytes);

    let plaintext = cipher
        .decrypt(&nonce, ciphertext)
        .map_err(|_| VaultError::DecryptionFailed)?;

    String::from_utf8(plaintext).map_err(|e| {
        e.into_bytes().zeroize();
        VaultError::DecryptionFailed
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn round_trip() {
        let key = generate_key().unwrap();
        let (ct, nonce) = encrypt(&key, "hello, lastsecret".as_bytes()).unwrap();
        assert_eq!(decrypt(&key, &ct, &nonce).unwrap(), "hello, lastsecret");
    }

    #[test]
    fn ciphertext_carries_tag() {
        let key = generate_key().unwrap();
        let (ct, _) = encrypt(&key, b"abc").unwrap();
        assert_eq!(ct.len(), 3 + 16);
    }

    #[test]
    fn wrong_key_fails() {
        let key1 = generate_key().unwrap();
        let key2 = generate_key().unwrap();
        let (ct, nonce) = encrypt(&key1, b"secret").unwrap();
        assert_eq!(
            decrypt(&key2, &ct, &nonce),
            Err(VaultError::DecryptionFailed)
        );
    }

    #[test]
    fn wrong_nonce_fails() {
        let key = generate_key().unwrap();
        let (ct, mut nonce) = encrypt(&key, b"secret").unwrap();
        nonce[0] ^= 0x01;
        assert_eq!(decrypt(&key, &ct, &nonce), Err(VaultError::DecryptionFailed));
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let key = generate_key().unwrap();
        let (mut ct, nonce) = encrypt(&key, b"secret").unwrap();
        let last = ct.len() - 1;
        ct[last] ^= 0x80;
        assert_eq!(decrypt(&key, &ct, &nonce), Err(VaultError::DecryptionFailed));
    }

    #[test]
    fn non_utf8_plaintext_fails() {
        let key = generate_key().unwrap();
        let (ct, nonce) = encrypt(&key, &[0xff, 0xfe, 0xfd]).unwrap();
        assert_eq!(decrypt(&key, &ct, &nonce), Err(VaultError::DecryptionFailed));
    }

    #[test]
    fn ids_are_url_safe_and_distinct() {
        let mut seen = HashSet::new();
        for _ in 0..256 {
            let id = generate_id().unwrap();
            assert_eq!(id.as_str().len(), 22);
            assert!(id
                .as_str()
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
            assert!(seen.insert(id));
        }
    }

    #[test]
    fn parse_accepts_generated_ids_only() {
        let id = generate_id().unwrap();
        assert_eq!(SecretId::parse(id.as_str()), Some(id));
        assert_eq!(SecretId::parse(""), None);
        assert_eq!(SecretId::parse("short"), None);
        assert_eq!(SecretId::parse("not/a/valid/identifier"), None);
        assert_eq!(SecretId::parse(&"A".repeat(64)), None);
    }

    #[test]
    fn log_tag_is_a_short_unusable_prefix() {
        let id = generate_id().unwrap();
        let tag = id.log_tag();
        assert_eq!(tag.len(), LOG_TAG_CHARS);
        assert!(id.as_str().starts_with(tag));
        assert_eq!(SecretId::parse(tag), None);
        assert_eq!(log_tag("abc"), "");
    }

    #[test]
    fn keys_are_distinct() {
        let a = generate_key().unwrap();
        let b = generate_key().unwrap();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }
}
