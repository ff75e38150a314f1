//! Secret lifecycle: submit encrypts under a fresh key and stores with a TTL;
//! reveal atomically takes the record, then decrypts. A record is gone after
//! its first reveal attempt whether or not decryption succeeds.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::VaultError;
use crate::store::{
    crypto::{self, SecretId},
    Clock, SecretRecord, SecretStore, SystemClock,
};

pub const MIN_SECRET_CHARS: usize = 1;
pub const MAX_SECRET_CHARS: usize = 20_000;
pub const MIN_TTL_SECONDS: u64 = 60;
pub const MAX_TTL_SECONDS: u64 = 7 * 24 * 60 * 60;
pub const DEFAULT_TTL_SECONDS: u64 = 3600;

/// Outcome of a successful submit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submitted {
    pub id: SecretId,
    pub ttl_seconds: u64,
    pub created_at: i64,
    pub expires_at: i64,
}

/// Entry point for submit/reveal, holding the injected store handle.
#[derive(Clone)]
pub struct Vault {
    store: Arc<dyn SecretStore>,
    clock: Arc<dyn Clock>,
}

impl Vault {
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<dyn SecretStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Encrypt `secret` under a fresh key and store it for `ttl_seconds`
    /// (default [`DEFAULT_TTL_SECONDS`]).
    pub fn submit(&self, secret: &str, ttl_seconds: Option<u64>) -> Result<Submitted, VaultError> {
        let ttl_seconds = ttl_seconds.unwrap_or(DEFAULT_TTL_SECONDS);
        validate_secret(secret)?;
        validate_ttl(ttl_seconds)?;

        let id = crypto::generate_id()?;
        let key = crypto::generate_key()?;
        let (ciphertext, nonce) = crypto::encrypt(&key, secret.as_bytes())?;

        let created_at = self.clock.now();
        let record = SecretRecord {
            ciphertext,
            nonce,
            key: *key.as_bytes(),
            created_at,
        };
        let expires_at = self.store.create(&id, &record, ttl_seconds)?;

        debug!(id = id.log_tag(), ttl_seconds, "secret submitted");
        Ok(Submitted {
            id,
            ttl_seconds,
            created_at,
            expires_at,
        })
    }

    /// Take the record for `id` and decrypt it. The record is destroyed by the
    /// take itself, so a failed decryption cannot be retried.
    pub fn reveal(&self, id: &str) -> Result<String, VaultError> {
        let Some(id) = SecretId::parse(id) else {
            return Err(VaultError::NotFoundOrExpired);
        };
        let record = self
            .store
            .take(&id)?
            .ok_or(VaultError::NotFoundOrExpired)?;

        match crypto::decrypt(&record.secret_key(), &record.ciphertext, &record.nonce) {
            Ok(secret) => {
                debug!(id = id.log_tag(), "secret revealed and burned");
                Ok(secret)
            }
            Err(e) => {
                warn!(id = id.log_tag(), "stored secret failed authentication; burned");
                Err(e)
            }
        }
    }
}

fn validate_secret(secret: &str) -> Result<(), VaultError> {
    let chars = secret.chars().count();
    if !(MIN_SECRET_CHARS..=MAX_SECRET_CHARS).contains(&chars) {
        return Err(VaultError::InvalidPayload {
            min: MIN_SECRET_CHARS,
            max: MAX_SECRET_CHARS,
        });
    }
    Ok(())
}

fn validate_ttl(ttl_seconds: u64) -> Result<(), VaultError> {
    if !(MIN_TTL_SECONDS..=MAX_TTL_SECONDS).contains(&ttl_seconds) {
        return Err(VaultError::InvalidTtl {
            min: MIN_TTL_SECONDS,
            max: MAX_TTL_SECONDS,
        });
    }
    Ok(())
}
