pub mod crypto;
pub mod db;
pub mod memory;
pub mod model;

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::{task::JoinHandle, time};
use tracing::{info, warn};

use crate::error::VaultError;

pub use crypto::{SecretId, SecretKey};
pub use db::RedbStore;
pub use memory::MemoryStore;
pub use model::SecretRecord;

/// Bounded-lifetime holder of one [`SecretRecord`] per id.
///
/// Implementations share state internally, so a handle can be cloned into an
/// `Arc<dyn SecretStore>` and used from any thread. All methods are synchronous.
pub trait SecretStore: Send + Sync + 'static {
    /// Store `record` under `id`, readable for `ttl_seconds` from now.
    /// An existing record under the same id is replaced. Returns the absolute
    /// expiry (Unix seconds) the store will enforce.
    fn create(&self, id: &SecretId, record: &SecretRecord, ttl_seconds: u64)
        -> Result<i64, VaultError>;

    /// Return the record if present and unexpired. Never removes a live record.
    fn fetch(&self, id: &SecretId) -> Result<Option<SecretRecord>, VaultError>;

    /// Remove the record. Returns whether a record was present; absence is not an error.
    fn delete(&self, id: &SecretId) -> Result<bool, VaultError>;

    /// Atomically fetch and delete. Of any number of concurrent callers for the
    /// same id, at most one receives `Some`.
    fn take(&self, id: &SecretId) -> Result<Option<SecretRecord>, VaultError>;

    /// Physically remove every expired record. Returns how many were removed.
    fn prune(&self) -> Result<usize, VaultError>;
}

/// Source of the current Unix time in seconds.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64
    }
}

/// Absolute expiry `ttl_seconds` after `now`, saturating instead of wrapping.
pub fn expiry_after(now: i64, ttl_seconds: u64) -> i64 {
    now.saturating_add(i64::try_from(ttl_seconds).unwrap_or(i64::MAX))
}

/// Spawn a background Tokio task that calls `prune()` every `interval`.
pub fn spawn_sweep(store: Arc<dyn SecretStore>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.tick().await; // skip first immediate tick
        loop {
            ticker.tick().await;
            match store.prune() {
                Ok(0) => {}
                Ok(removed) => info!(removed, "swept expired secrets"),
                Err(e) => warn!(error = %e, "background sweep error"),
            }
        }
    })
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicI64, Ordering};

    use super::Clock;

    /// Hand-driven clock for expiry tests.
    #[derive(Debug)]
    pub struct ManualClock(AtomicI64);

    impl ManualClock {
        pub fn new(start: i64) -> Self {
            Self(AtomicI64::new(start))
        }

        pub fn advance(&self, secs: i64) {
            self.0.fetch_add(secs, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> i64 {
            self.0.load(Ordering::SeqCst)
        }
    }
}
