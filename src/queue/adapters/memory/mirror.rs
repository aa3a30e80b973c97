//! In-memory SIM mirror and stats cache.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::queue::{
    domain::LabelField,
    ports::{HistoryRecord, MirrorError, MirrorResult, SimMirror, SimRecord, StatsCache},
};

/// Thread-safe in-memory SIM mirror with its history log.
#[derive(Debug, Clone, Default)]
pub struct InMemorySimMirror {
    state: Arc<RwLock<MirrorState>>,
}

#[derive(Debug, Default)]
struct MirrorState {
    sims: BTreeMap<String, SimRecord>,
    history: Vec<HistoryRecord>,
}

impl InMemorySimMirror {
    /// Creates an empty mirror.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a mirror pre-populated with `records`.
    #[must_use]
    pub fn with_records(records: impl IntoIterator<Item = SimRecord>) -> Self {
        let sims = records
            .into_iter()
            .map(|record| (record.msisdn.clone(), record))
            .collect();
        Self {
            state: Arc::new(RwLock::new(MirrorState {
                sims,
                history: Vec::new(),
            })),
        }
    }

    /// Returns the record for `msisdn`.
    ///
    /// # Errors
    ///
    /// Returns [`MirrorError::Persistence`] when the lock is poisoned.
    pub fn record(&self, msisdn: &str) -> MirrorResult<Option<SimRecord>> {
        Ok(self.read()?.sims.get(msisdn).cloned())
    }

    /// Returns every history entry in insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`MirrorError::Persistence`] when the lock is poisoned.
    pub fn history(&self) -> MirrorResult<Vec<HistoryRecord>> {
        Ok(self.read()?.history.clone())
    }

    fn read(&self) -> MirrorResult<RwLockReadGuard<'_, MirrorState>> {
        self.state
            .read()
            .map_err(|err| MirrorError::persistence(std::io::Error::other(err.to_string())))
    }

    fn write(&self) -> MirrorResult<RwLockWriteGuard<'_, MirrorState>> {
        self.state
            .write()
            .map_err(|err| MirrorError::persistence(std::io::Error::other(err.to_string())))
    }
}

fn label_slot(record: &mut SimRecord, field: LabelField) -> &mut String {
    match field {
        LabelField::Label1 => &mut record.label_1,
        LabelField::Label2 => &mut record.label_2,
        LabelField::Label3 => &mut record.label_3,
    }
}

fn count(n: usize) -> u64 {
    u64::try_from(n).unwrap_or(u64::MAX)
}

#[async_trait]
impl SimMirror for InMemorySimMirror {
    async fn statuses(&self, msisdns: &[String]) -> MirrorResult<HashMap<String, String>> {
        let state = self.read()?;
        Ok(msisdns
            .iter()
            .filter_map(|msisdn| {
                state
                    .sims
                    .get(msisdn)
                    .map(|record| (msisdn.clone(), record.status.clone()))
            })
            .collect())
    }

    async fn set_status(&self, msisdns: &[String], status: &str) -> MirrorResult<u64> {
        let mut state = self.write()?;
        let mut updated = 0;
        for msisdn in msisdns {
            if let Some(record) = state.sims.get_mut(msisdn) {
                status.clone_into(&mut record.status);
                updated += 1;
            }
        }
        Ok(count(updated))
    }

    async fn set_label(&self, target: &str, field: LabelField, value: &str) -> MirrorResult<u64> {
        let mut state = self.write()?;
        let mut updated = 0;
        for record in state
            .sims
            .values_mut()
            .filter(|record| record.msisdn == target || record.cli == target)
        {
            value.clone_into(label_slot(record, field));
            updated += 1;
        }
        Ok(count(updated))
    }

    async fn upsert(&self, record: SimRecord) -> MirrorResult<()> {
        self.write()?.sims.insert(record.msisdn.clone(), record);
        Ok(())
    }

    async fn append_history(&self, record: HistoryRecord) -> MirrorResult<()> {
        self.write()?.history.push(record);
        Ok(())
    }
}

/// Stats cache stand-in that counts invalidations.
#[derive(Debug, Default)]
pub struct CountingStatsCache {
    invalidations: AtomicU64,
}

impl CountingStatsCache {
    /// Creates a cache with a zero counter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns how many times the cache was invalidated.
    #[must_use]
    pub fn invalidations(&self) -> u64 {
        self.invalidations.load(Ordering::Relaxed)
    }
}

impl StatsCache for CountingStatsCache {
    fn invalidate(&self) {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }
}
