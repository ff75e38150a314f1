use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition};
use tracing::{debug, info, warn};

use super::crypto::log_tag;
use super::model::{is_expired, SecretRecord};
use super::{expiry_after, Clock, SecretId, SecretStore, SystemClock};
use crate::error::VaultError;

const SECRETS: TableDefinition<&str, &[u8]> = TableDefinition::new("secrets");

/// Marker byte for the v1 on-disk layout:
/// `[RECORD_V1_MARKER, expires_at (i64 big-endian)] + bincode(record)`.
/// The expiry sits outside the bincode payload so the sweep can evict
/// without decoding key material.
const RECORD_V1_MARKER: u8 = 0x01;
const HEADER_LEN: usize = 1 + 8;

/// Thread-safe handle to the redb store.
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
    clock: Arc<dyn Clock>,
}

impl RedbStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, VaultError> {
        Self::open_with_clock(path, Arc::new(SystemClock))
    }

    /// Open (or create) the database at `path`, judging expiry with `clock`.
    pub fn open_with_clock(path: &Path, clock: Arc<dyn Clock>) -> Result<Self, VaultError> {
        let db = init(path)?;
        debug!(path = %path.display(), "opened secret database");
        Ok(Self {
            db: Arc::new(db),
            clock,
        })
    }

    fn put_raw(&self, id: &str, bytes: &[u8]) -> Result<(), redb::Error> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(SECRETS)?;
            table.insert(id, bytes)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn get_raw(&self, id: &str) -> Result<Option<Vec<u8>>, redb::Error> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SECRETS)?;
        let raw_bytes = table.get(id)?.map(|guard| guard.value().to_vec());
        Ok(raw_bytes)
    }

    /// Remove and return the raw bytes in a single write transaction.
    fn remove_raw(&self, id: &str) -> Result<Option<Vec<u8>>, redb::Error> {
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(SECRETS)?;
            // Copy out of the guard so the borrow on `table` ends before commit.
            let removed = table.remove(id)?.map(|guard| guard.value().to_vec());
            removed
        };
        write_txn.commit()?;
        Ok(removed)
    }

    fn prune_raw(&self, now: i64) -> Result<usize, redb::Error> {
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(SECRETS)?;

            let mut doomed = Vec::new();
            for item in table.iter()? {
                let (k, v) = item?;
                match read_expiry(v.value()) {
                    Some(expires_at) if !is_expired(expires_at, now) => {}
                    Some(_) => doomed.push(k.value().to_owned()),
                    None => {
                        warn!(id = log_tag(k.value()), "evicting unreadable record");
                        doomed.push(k.value().to_owned());
                    }
                }
            }

            for id in &doomed {
                table.remove(id.as_str())?;
            }
            doomed.len()
        };
        write_txn.commit()?;
        Ok(removed)
    }
}

impl SecretStore for RedbStore {
    fn create(
        &self,
        id: &SecretId,
        record: &SecretRecord,
        ttl_seconds: u64,
    ) -> Result<i64, VaultError> {
        let expires_at = expiry_after(self.clock.now(), ttl_seconds);
        let bytes = encode(record, expires_at)?;
        self.put_raw(id.as_str(), &bytes)?;
        debug!(id = id.log_tag(), expires_at, "stored secret");
        Ok(expires_at)
    }

    fn fetch(&self, id: &SecretId) -> Result<Option<SecretRecord>, VaultError> {
        let Some(bytes) = self.get_raw(id.as_str())? else {
            return Ok(None);
        };
        let (expires_at, record) = decode(&bytes)?;
        if is_expired(expires_at, self.clock.now()) {
            return Ok(None);
        }
        Ok(Some(record))
    }

    fn delete(&self, id: &SecretId) -> Result<bool, VaultError> {
        Ok(self.remove_raw(id.as_str())?.is_some())
    }

    fn take(&self, id: &SecretId) -> Result<Option<SecretRecord>, VaultError> {
        // The removal is committed before decoding, so an undecodable record
        // is burned just like one that decodes.
        let Some(bytes) = self.remove_raw(id.as_str())? else {
            return Ok(None);
        };
        let (expires_at, record) = decode(&bytes)?;
        if is_expired(expires_at, self.clock.now()) {
            debug!(id = id.log_tag(), "dropped expired secret on take");
            return Ok(None);
        }
        debug!(id = id.log_tag(), "took secret");
        Ok(Some(record))
    }

    fn prune(&self) -> Result<usize, VaultError> {
        let removed = self.prune_raw(self.clock.now())?;
        if removed > 0 {
            info!(removed, "pruned expired secrets");
        }
        Ok(removed)
    }
}

fn init(path: &Path) -> Result<Database, redb::Error> {
    let db = Database::create(path)?;

    // Ensure the table exists.
    let write_txn = db.begin_write()?;
    write_txn.open_table(SECRETS)?;
    write_txn.commit()?;

    Ok(db)
}

fn encode(record: &SecretRecord, expires_at: i64) -> Result<Vec<u8>, VaultError> {
    let payload = bincode::serde::encode_to_vec(record, bincode::config::standard())
        .map_err(|e| VaultError::StoreUnavailable(format!("bincode encode: {e}")))?;
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.push(RECORD_V1_MARKER);
    out.extend_from_slice(&expires_at.to_be_bytes());
    out.extend_from_slice(&payload);
    Ok(out)
}

fn read_expiry(bytes: &[u8]) -> Option<i64> {
    if bytes.len() < HEADER_LEN || bytes[0] != RECORD_V1_MARKER {
        return None;
    }
    let mut expiry = [0u8; 8];
    expiry.copy_from_slice(&bytes[1..HEADER_LEN]);
    Some(i64::from_be_bytes(expiry))
}

/// Decode bytes into `(expires_at, record)`.
/// A record that cannot be decoded is treated like one that fails authentication.
fn decode(bytes: &[u8]) -> Result<(i64, SecretRecord), VaultError> {
    let expires_at = read_expiry(bytes).ok_or(VaultError::DecryptionFailed)?;
    let (record, _) =
        bincode::serde::decode_from_slice(&bytes[HEADER_LEN..], bincode::config::standard())
            .map_err(|_| VaultError::DecryptionFailed)?;
    Ok((expires_at, record))
}
