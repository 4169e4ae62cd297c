// src/db.rs
use crate::error::StoreError;
use crate::persistence::{load_records, save_records};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub filename: String,
    pub comment: String,
    pub timestamp: DateTime<Utc>,
}

/// Records keyed by image id. Ids are derived from the upload instant, so
/// key order follows insertion order.
pub type Records = BTreeMap<String, ImageRecord>;

pub type Db = Arc<Store>;

/// Handle to the on-disk metadata store.
///
/// Every read-modify-write runs through [`Store::begin`], which holds the
/// store lock from the load until the transaction is committed or dropped.
#[derive(Debug)]
pub struct Store {
    data_file: PathBuf,
    lock: Mutex<()>,
}

impl Store {
    pub fn new(data_file: impl Into<PathBuf>) -> Self {
        Store {
            data_file: data_file.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn shared(data_file: impl Into<PathBuf>) -> Db {
        Arc::new(Store::new(data_file))
    }

    /// Locks the store and loads its current contents.
    pub async fn begin(&self) -> Transaction<'_> {
        let guard = self.lock.lock().await;
        let records = load_records(&self.data_file).await;
        Transaction {
            store: self,
            records,
            _guard: guard,
        }
    }

    /// Consistent copy of the store, taken under the lock.
    pub async fn snapshot(&self) -> Records {
        self.begin().await.records
    }
}

/// Exclusive view of the store. Dropping it without [`Transaction::commit`]
/// discards the changes. The lock is held until the transaction is dropped,
/// so file cleanup that must follow a successful save can still happen
/// under it.
pub struct Transaction<'a> {
    store: &'a Store,
    pub records: Records,
    _guard: MutexGuard<'a, ()>,
}

impl Transaction<'_> {
    pub async fn commit(&mut self) -> Result<(), StoreError> {
        save_records(&self.store.data_file, &self.records).await
    }
}

/// Key of the oldest record: smallest timestamp, ties broken by smallest id.
pub fn oldest_id(records: &Records) -> Option<String> {
    records
        .iter()
        .min_by(|(a_id, a), (b_id, b)| a.timestamp.cmp(&b.timestamp).then_with(|| a_id.cmp(b_id)))
        .map(|(id, _)| id.clone())
}
