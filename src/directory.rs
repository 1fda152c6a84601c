//! Time-bounded cache of customer identifiers.
//!
//! One async mutex guards the snapshot. Callers take the lock, serve the
//! snapshot if it is still fresh, and otherwise refresh it while still
//! holding the lock, so concurrent misses queue behind a single upstream
//! query instead of each issuing their own.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::MutexGuard;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::records::CUSTOMERS;
use crate::store::DocumentStore;

pub const DEFAULT_TTL: Duration = Duration::from_secs(15 * 60);

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let by = TimeDelta::from_std(by).unwrap_or(TimeDelta::MAX);
        let mut now = self.now.lock().unwrap_or_else(|p| p.into_inner());
        *now = now.checked_add_signed(by).unwrap_or(*now);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Upstream list of every known customer id.
#[async_trait]
pub trait DirectorySource: Send + Sync {
    async fn customer_ids(&self) -> Result<Vec<String>, StoreError>;
}

/// Reads the ids of the `customers` collection.
pub struct StoreDirectorySource {
    store: Arc<dyn DocumentStore>,
}

impl StoreDirectorySource {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl DirectorySource for StoreDirectorySource {
    async fn customer_ids(&self) -> Result<Vec<String>, StoreError> {
        self.store.list_ids(CUSTOMERS).await
    }
}

#[derive(Debug, Default)]
struct Snapshot {
    ids: Vec<String>,
    refreshed_at: Option<DateTime<Utc>>,
}

pub struct CustomerDirectory {
    source: Arc<dyn DirectorySource>,
    clock: Arc<dyn Clock>,
    ttl: TimeDelta,
    snapshot: tokio::sync::Mutex<Snapshot>,
}

impl CustomerDirectory {
    pub fn new(source: Arc<dyn DirectorySource>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            source,
            clock,
            ttl: TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX),
            snapshot: tokio::sync::Mutex::new(Snapshot::default()),
        }
    }

    /// Wait for exclusive access to the snapshot.
    pub async fn lock(&self) -> DirectoryGuard<'_> {
        DirectoryGuard {
            directory: self,
            snapshot: self.snapshot.lock().await,
        }
    }

    /// Fresh snapshot if there is one, otherwise a refreshed one.
    pub async fn ids(&self) -> Result<Vec<String>, StoreError> {
        let mut guard = self.lock().await;
        match guard.fresh() {
            Some(ids) => Ok(ids),
            None => guard.refresh().await,
        }
    }
}

/// Exclusive handle on the directory snapshot.
pub struct DirectoryGuard<'a> {
    directory: &'a CustomerDirectory,
    snapshot: MutexGuard<'a, Snapshot>,
}

impl DirectoryGuard<'_> {
    /// The cached ids, if refreshed less than one TTL ago.
    pub fn fresh(&self) -> Option<Vec<String>> {
        let refreshed_at = self.snapshot.refreshed_at?;
        let age = self.directory.clock.now() - refreshed_at;
        if age < self.directory.ttl {
            debug!(age_secs = age.num_seconds(), "Serving customers from cache");
            Some(self.snapshot.ids.clone())
        } else {
            None
        }
    }

    /// Re-read the ids from the source and replace the snapshot. On error
    /// the previous snapshot is kept as is.
    pub async fn refresh(&mut self) -> Result<Vec<String>, StoreError> {
        let ids = self.directory.source.customer_ids().await?;
        self.snapshot.ids = ids.clone();
        self.snapshot.refreshed_at = Some(self.directory.clock.now());
        info!(count = ids.len(), "Customer directory refreshed");
        Ok(ids)
    }
}
