//! Process-local store. Nothing survives a restart; suited to tests and
//! single-node deployments that prefer secrets never touch disk.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use super::model::{is_expired, SecretRecord};
use super::{expiry_after, Clock, SecretId, SecretStore, SystemClock};
use crate::error::VaultError;

/// In-memory store. Clones share the same map.
#[derive(Clone)]
pub struct MemoryStore {
    records: Arc<Mutex<HashMap<SecretId, (i64, SecretRecord)>>>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: Arc::new(Mutex::new(HashMap::new())),
            clock,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<SecretId, (i64, SecretRecord)>>, VaultError> {
        self.records
            .lock()
            .map_err(|_| VaultError::StoreUnavailable("memory store lock poisoned".into()))
    }
}

impl SecretStore for MemoryStore {
    fn create(
        &self,
        id: &SecretId,
        record: &SecretRecord,
        ttl_seconds: u64,
    ) -> Result<i64, VaultError> {
        let expires_at = expiry_after(self.clock.now(), ttl_seconds);
        self.lock()?
            .insert(id.clone(), (expires_at, record.clone()));
        debug!(id = id.log_tag(), expires_at, "stored secret in memory");
        Ok(expires_at)
    }

    fn fetch(&self, id: &SecretId) -> Result<Option<SecretRecord>, VaultError> {
        let now = self.clock.now();
        let records = self.lock()?;
        Ok(records
            .get(id)
            .filter(|(expires_at, _)| !is_expired(*expires_at, now))
            .map(|(_, record)| record.clone()))
    }

    fn delete(&self, id: &SecretId) -> Result<bool, VaultError> {
        Ok(self.lock()?.remove(id).is_some())
    }

    fn take(&self, id: &SecretId) -> Result<Option<SecretRecord>, VaultError> {
        let now = self.clock.now();
        let removed = self.lock()?.remove(id);
        Ok(removed
            .filter(|(expires_at, _)| !is_expired(*expires_at, now))
            .map(|(_, record)| record))
    }

    fn prune(&self) -> Result<usize, VaultError> {
        let now = self.clock.now();
        let mut records = self.lock()?;
        let before = records.len();
        records.retain(|_, (expires_at, _)| !is_expired(*expires_at, now));
        Ok(before - records.len())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;
    use std::thread;

    use super::*;
    use crate::store::crypto::{encrypt, generate_id, generate_key};
    use crate::store::testing::ManualClock;

    fn make_record() -> SecretRecord {
        let key = generate_key().unwrap();
        let (ciphertext, nonce) = encrypt(&key, b"in-memory").unwrap();
        SecretRecord {
            ciphertext,
            nonce,
            key: *key.as_bytes(),
            created_at: 0,
        }
    }

    #[test]
    fn take_consumes_and_fetch_does_not() {
        let s = MemoryStore::new();
        let id = generate_id().unwrap();
        s.create(&id, &make_record(), 3600).unwrap();
        assert!(s.fetch(&id).unwrap().is_some());
        assert!(s.take(&id).unwrap().is_some());
        assert!(s.take(&id).unwrap().is_none());
        assert!(!s.delete(&id).unwrap());
    }

    #[test]
    fn expiry_and_prune() {
        let clock = Arc::new(ManualClock::new(1_000));
        let s = MemoryStore::with_clock(clock.clone());
        let short = generate_id().unwrap();
        let long = generate_id().unwrap();
        s.create(&short, &make_record(), 60).unwrap();
        s.create(&long, &make_record(), 600).unwrap();

        clock.advance(59);
        assert!(s.fetch(&short).unwrap().is_some());
        clock.advance(2);
        assert!(s.fetch(&short).unwrap().is_none());

        assert_eq!(s.prune().unwrap(), 1);
        assert!(s.fetch(&long).unwrap().is_some());

        let forever = generate_id().unwrap();
        assert_eq!(s.create(&forever, &make_record(), u64::MAX).unwrap(), i64::MAX);
        assert!(s.fetch(&forever).unwrap().is_some());
    }

    #[test]
    fn concurrent_take_has_one_winner() {
        let s = MemoryStore::new();
        let id = generate_id().unwrap();
        s.create(&id, &make_record(), 3600).unwrap();

        let racers = 8;
        let barrier = Arc::new(Barrier::new(racers));
        let handles: Vec<_> = (0..racers)
            .map(|_| {
                let s = s.clone();
                let id = id.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    s.take(&id).unwrap().is_some()
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }
}
