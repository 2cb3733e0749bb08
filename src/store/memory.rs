//! In-memory response store

use super::record::{newest_first, Record};
use super::traits::{ResponseStore, StoreError, StoreResult};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct Entries {
    next_seq: u64,
    records: Vec<(u64, Record)>,
}

/// Volatile store for tests and the demo.
///
/// `set_unavailable(true)` makes every operation fail, to exercise the
/// save error path.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<Entries>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn entries(&self) -> StoreResult<MutexGuard<'_, Entries>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store switched off".into()));
        }
        self.entries
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))
    }
}

#[async_trait]
impl ResponseStore for MemoryStore {
    async fn save(&self, record: Record) -> StoreResult<()> {
        let mut entries = self.entries()?;
        if let Some(slot) = entries.records.iter_mut().find(|(_, r)| r.id == record.id) {
            slot.1 = record;
            return Ok(());
        }
        let seq = entries.next_seq;
        entries.next_seq += 1;
        entries.records.push((seq, record));
        Ok(())
    }

    async fn list(&self) -> StoreResult<Vec<Record>> {
        let mut records = self.entries()?.records.clone();
        newest_first(&mut records, |r| r.timestamp);
        Ok(records.into_iter().map(|(_, r)| r).collect())
    }

    async fn clear(&self) -> StoreResult<()> {
        self.entries()?.records.clear();
        Ok(())
    }

    async fn delete(&self, id: &str) -> StoreResult<bool> {
        let mut entries = self.entries()?;
        let before = entries.records.len();
        entries.records.retain(|(_, r)| r.id != id);
        Ok(entries.records.len() != before)
    }
}
