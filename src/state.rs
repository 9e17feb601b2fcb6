use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::key::AggregationKey;
use crate::metrics::RateSet;

/// Lifetime totals and decaying rates for one key.
#[derive(Clone, Debug)]
pub struct TrafficRecord {
    pub message_count: u64,
    pub byte_count: u64,
    pub rates: RateSet,
    pub first_seen: Instant,
    pub last_seen: Instant,
}

impl TrafficRecord {
    fn new(reference: Instant, now: Instant) -> Self {
        Self {
            message_count: 0,
            byte_count: 0,
            rates: RateSet::new(reference),
            first_seen: now,
            last_seen: now,
        }
    }

    fn apply(&mut self, size_bytes: u64, now: Instant) {
        self.message_count = self.message_count.saturating_add(1);
        self.byte_count = self.byte_count.saturating_add(size_bytes);
        self.rates.observe(size_bytes, now);
        self.first_seen = self.first_seen.min(now);
        self.last_seen = self.last_seen.max(now);
    }
}

pub struct TrafficTable {
    started_at: Instant,
    records: BTreeMap<AggregationKey, TrafficRecord>,
    global: TrafficRecord,
}

/// Point-in-time copy of the table, detached from the lock.
#[derive(Clone, Debug)]
pub struct TableSnapshot {
    pub started_at: Instant,
    pub global: TrafficRecord,
    pub records: Vec<(AggregationKey, TrafficRecord)>,
}

impl TableSnapshot {
    pub fn uptime(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started_at)
    }
}

impl TrafficTable {
    pub fn new() -> Self {
        Self::with_start(Instant::now())
    }

    /// Table whose rates are measured from `started_at`.
    pub fn with_start(started_at: Instant) -> Self {
        Self {
            started_at,
            records: BTreeMap::new(),
            global: TrafficRecord::new(started_at, started_at),
        }
    }

    pub fn record(&mut self, key: AggregationKey, size_bytes: u64, now: Instant) {
        let started_at = self.started_at;
        self.records
            .entry(key)
            // rates of a late key are seeded from table start, like an average with zero history
            .or_insert_with(|| TrafficRecord::new(started_at, now))
            .apply(size_bytes, now);
        self.global.apply(size_bytes, now);
    }

    pub fn snapshot(&self) -> TableSnapshot {
        TableSnapshot {
            started_at: self.started_at,
            global: self.global.clone(),
            records: self
                .records
                .iter()
                .map(|(k, r)| (k.clone(), r.clone()))
                .collect(),
        }
    }

    #[cfg(test)]
    pub fn get(&self, key: &AggregationKey) -> Option<&TrafficRecord> {
        self.records.get(key)
    }

    #[cfg(test)]
    pub fn global(&self) -> &TrafficRecord {
        &self.global
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for TrafficTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle shared by the ingestion and reporting threads. Each call holds the
/// lock for exactly one update or one snapshot.
#[derive(Clone)]
pub struct SharedTable {
    inner: Arc<Mutex<TrafficTable>>,
}

impl SharedTable {
    pub fn new(table: TrafficTable) -> Self {
        Self {
            inner: Arc::new(Mutex::new(table)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TrafficTable> {
        // a panicked holder cannot leave a half-applied record behind, so keep going
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record(&self, key: AggregationKey, size_bytes: u64, now: Instant) {
        self.lock().record(key, size_bytes, now);
    }

    pub fn snapshot(&self) -> TableSnapshot {
        self.lock().snapshot()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.lock().len()
    }
}
