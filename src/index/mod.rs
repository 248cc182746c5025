//! In-memory vector index with tombstone deletion and background compaction.
//!
//! The index is the only structure shared between ingestion and queries.
//! Every operation goes through one readers-writer lock:
//!
//! - `search` holds the read lock for the whole scan, so it observes exactly
//!   the entries present when the lock was taken. Writers wait for at most
//!   one scan.
//! - `insert`, `insert_batch` and `delete` take the write lock for an
//!   amortized O(1) append or a bitmap update.
//! - `compact` copies live entries under the read lock, rebuilds without any
//!   lock, then takes the write lock once to replay the operations recorded
//!   meanwhile and swap the new structure in.
//!
//! Changes that span the index and the metadata store (pipeline commits,
//! deletes) hold the store gate shared. A rebuild from the store holds it
//! exclusively from reading its snapshot until the new state is swapped in,
//! so no commit lands between the two.
//!
//! Vectors are normalized on insert, so similarity is a plain dot product.

mod arena;
mod partition;

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{RwLock as AsyncRwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::IndexError;
use crate::models::{IndexConfig, ScoredChunk};

use arena::{Arena, EntryMeta};
use partition::Partitions;

/// Tuning knobs for the index.
#[derive(Debug, Clone)]
pub struct IndexSettings {
    /// Tombstone fraction above which compaction is worthwhile.
    pub tombstone_ratio: f64,
    /// Live entry count from which compaction trains partitions.
    pub partition_min_entries: usize,
    /// Partitions scanned per search; zero scans all of them.
    pub nprobe: usize,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self::from(&IndexConfig::default())
    }
}

impl From<&IndexConfig> for IndexSettings {
    fn from(config: &IndexConfig) -> Self {
        Self {
            tombstone_ratio: config.tombstone_ratio,
            partition_min_entries: config.partition_min_entries,
            nprobe: config.nprobe,
        }
    }
}

/// An entry handed to `insert_batch` or `rebuild`.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub chunk_id: Uuid,
    pub sequence: u32,
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexStats {
    pub dimension: usize,
    pub entries: usize,
    pub live: usize,
    pub tombstones: usize,
    pub partitions: usize,
    pub compactions: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionOutcome {
    Completed { before: usize, after: usize },
    /// Another compaction was already running.
    AlreadyRunning,
    /// The index was rebuilt while compacting; the result was discarded.
    Superseded,
}

#[derive(Debug, Clone)]
enum PendingOp {
    Insert(EntryMeta, Vec<f32>),
    Delete(Uuid),
}

#[derive(Debug)]
struct IndexState {
    arena: Arena,
    slots: HashMap<Uuid, usize>,
    partitions: Option<Partitions>,
    /// Operations applied while a compaction is copying the arena.
    pending: Option<Vec<PendingOp>>,
    /// Bumped whenever the whole state is replaced.
    epoch: u64,
}

impl IndexState {
    fn empty(dimension: usize) -> Self {
        Self {
            arena: Arena::new(dimension),
            slots: HashMap::new(),
            partitions: None,
            pending: None,
            epoch: 0,
        }
    }

    fn build(
        dimension: usize,
        entries: Vec<(EntryMeta, Vec<f32>)>,
        settings: &IndexSettings,
    ) -> Self {
        let mut state = Self {
            arena: Arena::with_capacity(dimension, entries.len()),
            slots: HashMap::with_capacity(entries.len()),
            partitions: None,
            pending: None,
            epoch: 0,
        };
        for (meta, vector) in entries {
            state.apply_insert(meta, &vector);
        }
        if state.arena.live_len() >= settings.partition_min_entries {
            state.partitions = Partitions::train(&state.arena);
        }
        state
    }

    fn record(&mut self, op: PendingOp) {
        if let Some(pending) = self.pending.as_mut() {
            pending.push(op);
        }
    }

    fn apply_insert(&mut self, meta: EntryMeta, vector: &[f32]) {
        if let Some(old) = self.slots.get(&meta.chunk_id).copied() {
            self.arena.tombstone(old);
        }
        let slot = self.arena.push(meta, vector);
        self.slots.insert(meta.chunk_id, slot);
    }

    fn apply_delete(&mut self, chunk_id: &Uuid) -> bool {
        match self.slots.remove(chunk_id) {
            Some(slot) => self.arena.tombstone(slot),
            None => false,
        }
    }

    fn apply(&mut self, op: PendingOp) {
        match op {
            PendingOp::Insert(meta, vector) => self.apply_insert(meta, &vector),
            PendingOp::Delete(chunk_id) => {
                self.apply_delete(&chunk_id);
            }
        }
    }

    fn verify(&self) -> Result<(), String> {
        self.arena.verify()?;
        if self.slots.len() != self.arena.live_len() {
            return Err(format!(
                "slot map has {} entries but the arena has {} live slots",
                self.slots.len(),
                self.arena.live_len()
            ));
        }
        for (chunk_id, &slot) in &self.slots {
            match self.arena.meta(slot) {
                Some(meta) if meta.chunk_id == *chunk_id && self.arena.is_live(slot) => {}
                _ => return Err(format!("slot map entry for {chunk_id} points at slot {slot}")),
            }
        }
        if let Some(partitions) = &self.partitions {
            partitions.verify(self.arena.len())?;
        }
        Ok(())
    }
}

/// Ranking order: higher score first, then lower sequence, then chunk id.
#[derive(Debug, Clone, Copy)]
struct Candidate(ScoredChunk);

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .0
            .score
            .total_cmp(&self.0.score)
            .then(self.0.sequence.cmp(&other.0.sequence))
            .then(self.0.chunk_id.cmp(&other.0.chunk_id))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl Eq for Candidate {}

pub(crate) fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Scale `vector` to unit length.
pub fn normalize_vector(vector: &[f32], dimension: usize) -> Result<Vec<f32>, IndexError> {
    if vector.len() != dimension {
        return Err(IndexError::DimensionMismatch {
            expected: dimension,
            actual: vector.len(),
        });
    }
    if vector.iter().any(|x| !x.is_finite()) {
        return Err(IndexError::InvalidVector("non-finite component".into()));
    }
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm <= f32::EPSILON {
        return Err(IndexError::InvalidVector("zero-length vector".into()));
    }
    Ok(vector.iter().map(|x| x / norm).collect())
}

/// Vector index service. Share it behind an `Arc`.
#[derive(Debug)]
pub struct VectorIndex {
    dimension: usize,
    settings: IndexSettings,
    state: RwLock<IndexState>,
    store_gate: AsyncRwLock<()>,
    compacting: AtomicBool,
    compactions: AtomicU64,
}

impl VectorIndex {
    pub fn new(dimension: usize, settings: IndexSettings) -> Self {
        Self {
            dimension,
            settings,
            state: RwLock::new(IndexState::empty(dimension)),
            store_gate: AsyncRwLock::new(()),
            compacting: AtomicBool::new(false),
            compactions: AtomicU64::new(0),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Hold while changing the index and the metadata store together.
    pub async fn store_writes(&self) -> RwLockReadGuard<'_, ()> {
        self.store_gate.read().await
    }

    /// Hold while rebuilding from a store snapshot; waits for in-flight
    /// store writes and keeps new ones out until released.
    pub async fn exclusive_store_access(&self) -> RwLockWriteGuard<'_, ()> {
        self.store_gate.write().await
    }

    /// Add or replace the entry for `chunk_id`.
    pub fn insert(&self, chunk_id: Uuid, sequence: u32, vector: &[f32]) -> Result<(), IndexError> {
        let normalized = normalize_vector(vector, self.dimension)?;
        let meta = EntryMeta { chunk_id, sequence };
        let mut state = self.state.write();
        state.record(PendingOp::Insert(meta, normalized.clone()));
        state.apply_insert(meta, &normalized);
        Ok(())
    }

    /// Insert several entries atomically: either every entry is validated
    /// and becomes visible under one write lock, or none is.
    pub fn insert_batch(&self, entries: &[IndexEntry]) -> Result<(), IndexError> {
        let prepared = entries
            .iter()
            .map(|e| {
                let meta = EntryMeta {
                    chunk_id: e.chunk_id,
                    sequence: e.sequence,
                };
                normalize_vector(&e.vector, self.dimension).map(|v| (meta, v))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut state = self.state.write();
        for (meta, vector) in prepared {
            state.record(PendingOp::Insert(meta, vector.clone()));
            state.apply_insert(meta, &vector);
        }
        Ok(())
    }

    /// Tombstone `chunk_id`. Subsequent searches never return it.
    pub fn delete(&self, chunk_id: &Uuid) -> bool {
        let mut state = self.state.write();
        state.record(PendingOp::Delete(*chunk_id));
        state.apply_delete(chunk_id)
    }

    /// Tombstone several entries under one lock. Returns how many existed.
    pub fn delete_many(&self, chunk_ids: &[Uuid]) -> usize {
        let mut state = self.state.write();
        chunk_ids
            .iter()
            .filter(|id| {
                state.record(PendingOp::Delete(**id));
                state.apply_delete(id)
            })
            .count()
    }

    pub fn contains(&self, chunk_id: &Uuid) -> bool {
        self.state.read().slots.contains_key(chunk_id)
    }

    pub fn len(&self) -> usize {
        self.state.read().arena.live_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Up to `top_k` live entries with similarity at least `threshold`,
    /// best first; ties go to the smaller sequence index.
    pub fn search(
        &self,
        query: &[f32],
        top_k: usize,
        threshold: f32,
    ) -> Result<Vec<ScoredChunk>, IndexError> {
        let query = normalize_vector(query, self.dimension)?;
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let state = self.state.read();
        let arena = &state.arena;
        arena.check_shape().map_err(IndexError::Corruption)?;
        let mut heap: BinaryHeap<Candidate> = BinaryHeap::with_capacity(top_k + 1);

        let mut consider = |slot: usize| -> Result<(), IndexError> {
            if slot >= arena.len() {
                return Err(IndexError::Corruption(format!(
                    "slot {slot} beyond arena of {} entries",
                    arena.len()
                )));
            }
            if !arena.is_live(slot) {
                return Ok(());
            }
            let score = dot(arena.vector(slot), &query);
            if score < threshold {
                return Ok(());
            }
            let Some(meta) = arena.meta(slot) else {
                return Err(IndexError::Corruption(format!("slot {slot} has no entry")));
            };
            heap.push(Candidate(ScoredChunk {
                chunk_id: meta.chunk_id,
                sequence: meta.sequence,
                score,
            }));
            if heap.len() > top_k {
                heap.pop();
            }
            Ok(())
        };

        match &state.partitions {
            Some(partitions)
                if self.settings.nprobe > 0 && self.settings.nprobe < partitions.len() =>
            {
                for partition in partitions.probe(&query, self.settings.nprobe) {
                    for &slot in partitions.list(partition) {
                        consider(slot as usize)?;
                    }
                }
                for slot in partitions.covered()..arena.len() {
                    consider(slot)?;
                }
            }
            _ => {
                for slot in 0..arena.len() {
                    consider(slot)?;
                }
            }
        }

        Ok(heap.into_sorted_vec().into_iter().map(|c| c.0).collect())
    }

    pub fn needs_compaction(&self) -> bool {
        self.state.read().arena.tombstone_ratio() > self.settings.tombstone_ratio
    }

    /// Rebuild the arena without tombstones, retraining partitions when the
    /// index is large enough. Foreground operations keep running; they are
    /// only blocked while the finished structure is swapped in.
    pub fn compact(&self) -> CompactionOutcome {
        if self.compacting.swap(true, Ordering::SeqCst) {
            return CompactionOutcome::AlreadyRunning;
        }
        let outcome = self.compact_inner();
        self.compacting.store(false, Ordering::SeqCst);
        outcome
    }

    fn compact_inner(&self) -> CompactionOutcome {
        let started = Instant::now();
        let start_epoch = {
            let mut state = self.state.write();
            state.pending = Some(Vec::new());
            state.epoch
        };

        let (entries, before) = {
            let state = self.state.read();
            (state.arena.live_entries(), state.arena.len())
        };

        let mut fresh = IndexState::build(self.dimension, entries, &self.settings);

        let mut state = self.state.write();
        if state.epoch != start_epoch {
            debug!("compaction superseded by rebuild");
            return CompactionOutcome::Superseded;
        }
        for op in state.pending.take().unwrap_or_default() {
            fresh.apply(op);
        }
        fresh.epoch = state.epoch + 1;
        let after = fresh.arena.len();
        *state = fresh;
        drop(state);

        self.compactions.fetch_add(1, Ordering::Relaxed);
        info!(
            before,
            after,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "vector index compacted"
        );
        CompactionOutcome::Completed { before, after }
    }

    /// Run compaction on the blocking pool if the tombstone ratio calls for
    /// it. No-op outside a Tokio runtime.
    pub fn schedule_compaction(self: &Arc<Self>) {
        if !self.needs_compaction() || self.compacting.load(Ordering::SeqCst) {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let index = Arc::clone(self);
        handle.spawn_blocking(move || index.compact());
    }

    /// Replace the whole index with `entries`.
    pub fn rebuild(&self, entries: Vec<IndexEntry>) -> Result<(), IndexError> {
        let prepared = entries
            .into_iter()
            .map(|e| {
                normalize_vector(&e.vector, self.dimension).map(|v| {
                    (
                        EntryMeta {
                            chunk_id: e.chunk_id,
                            sequence: e.sequence,
                        },
                        v,
                    )
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let count = prepared.len();
        let mut fresh = IndexState::build(self.dimension, prepared, &self.settings);

        let mut state = self.state.write();
        fresh.epoch = state.epoch + 1;
        *state = fresh;
        drop(state);

        info!(entries = count, "vector index rebuilt");
        Ok(())
    }

    /// Check every structural invariant of the index.
    pub fn verify(&self) -> Result<(), IndexError> {
        self.state.read().verify().map_err(|reason| {
            warn!(%reason, "vector index failed verification");
            IndexError::Corruption(reason)
        })
    }

    pub fn stats(&self) -> IndexStats {
        let state = self.state.read();
        IndexStats {
            dimension: self.dimension,
            entries: state.arena.len(),
            live: state.arena.live_len(),
            tombstones: state.arena.tombstone_count(),
            partitions: state.partitions.as_ref().map_or(0, Partitions::len),
            compactions: self.compactions.load(Ordering::Relaxed),
        }
    }

    #[cfg(test)]
    pub(crate) fn corrupt_for_test(&self) {
        self.state.write().arena.truncate_vectors_for_test();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::thread;

    fn id(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    fn unit(dimension: usize, axis: usize) -> Vec<f32> {
        let mut v = vec![0.0; dimension];
        v[axis] = 1.0;
        v
    }

    fn small_index() -> VectorIndex {
        VectorIndex::new(4, IndexSettings::default())
    }

    #[test]
    fn test_round_trip_returns_inserted_chunk_first() {
        let index = small_index();
        index.insert(id(1), 0, &[0.9, 0.1, 0.0, 0.0]).unwrap();
        index.insert(id(2), 1, &[0.1, 0.9, 0.3, 0.0]).unwrap();
        index.insert(id(3), 2, &[0.0, 0.2, 0.9, 0.4]).unwrap();

        let query = [0.1, 0.9, 0.3, 0.0];
        let hits = index.search(&query, 3, -1.0).unwrap();
        assert_eq!(hits[0].chunk_id, id(2));
        assert!((hits[0].score - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_results_are_ordered_and_thresholded() {
        let index = small_index();
        index.insert(id(1), 0, &[1.0, 0.0, 0.0, 0.0]).unwrap();
        index.insert(id(2), 1, &[1.0, 1.0, 0.0, 0.0]).unwrap();
        index.insert(id(3), 2, &[0.0, 1.0, 0.0, 0.0]).unwrap();

        let hits = index.search(&[1.0, 0.0, 0.0, 0.0], 10, 0.5).unwrap();
        let ids: Vec<Uuid> = hits.iter().map(|h| h.chunk_id).collect();
        assert_eq!(ids, vec![id(1), id(2)]);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn test_ties_broken_by_sequence() {
        let index = small_index();
        index.insert(id(10), 7, &unit(4, 0)).unwrap();
        index.insert(id(11), 2, &unit(4, 0)).unwrap();
        index.insert(id(12), 5, &unit(4, 0)).unwrap();

        let hits = index.search(&unit(4, 0), 2, 0.0).unwrap();
        let seqs: Vec<u32> = hits.iter().map(|h| h.sequence).collect();
        assert_eq!(seqs, vec![2, 5]);
    }

    #[test]
    fn test_tombstoned_entries_are_invisible_before_compaction() {
        let index = small_index();
        index.insert(id(1), 0, &unit(4, 0)).unwrap();
        index.insert(id(2), 1, &unit(4, 1)).unwrap();

        assert!(index.delete(&id(1)));
        assert!(!index.delete(&id(1)));
        let hits = index.search(&unit(4, 0), 10, -1.0).unwrap();
        assert!(hits.iter().all(|h| h.chunk_id != id(1)));
        assert_eq!(index.stats().tombstones, 1);
        assert!(!index.contains(&id(1)));
    }

    #[test]
    fn test_threshold_monotonicity() {
        let index = small_index();
        for n in 0..20u128 {
            let v = [1.0, n as f32 / 10.0, (20 - n) as f32 / 20.0, 0.5];
            index.insert(id(n), n as u32, &v).unwrap();
        }
        let query = [1.0, 0.3, 0.2, 0.1];
        let mut previous = usize::MAX;
        for step in 0..=20 {
            let threshold = -1.0 + step as f32 * 0.1;
            let count = index.search(&query, 15, threshold).unwrap().len();
            assert!(count <= previous);
            previous = count;
        }
    }

    #[test]
    fn test_dimension_mismatch_and_zero_vector_rejected() {
        let index = small_index();
        assert!(matches!(
            index.insert(id(1), 0, &[1.0, 0.0]),
            Err(IndexError::DimensionMismatch {
                expected: 4,
                actual: 2
            })
        ));
        assert!(matches!(
            index.insert(id(1), 0, &[0.0; 4]),
            Err(IndexError::InvalidVector(_))
        ));
        assert!(index.search(&[f32::NAN, 0.0, 0.0, 0.0], 1, 0.0).is_err());
    }

    #[test]
    fn test_insert_batch_is_all_or_nothing() {
        let index = small_index();
        let entries = vec![
            IndexEntry {
                chunk_id: id(1),
                sequence: 0,
                vector: unit(4, 0),
            },
            IndexEntry {
                chunk_id: id(2),
                sequence: 1,
                vector: vec![1.0],
            },
        ];
        assert!(index.insert_batch(&entries).is_err());
        assert!(index.is_empty());
    }

    #[test]
    fn test_reinsert_replaces_entry() {
        let index = small_index();
        index.insert(id(1), 0, &unit(4, 0)).unwrap();
        index.insert(id(1), 0, &unit(4, 1)).unwrap();
        assert_eq!(index.len(), 1);
        let hits = index.search(&unit(4, 1), 5, 0.5).unwrap();
        assert_eq!(hits.len(), 1);
        assert!(index.search(&unit(4, 0), 5, 0.5).unwrap().is_empty());
        assert!(index.verify().is_ok());
    }

    #[test]
    fn test_compaction_drops_tombstones_and_keeps_results() {
        let index = small_index();
        for n in 0..10u128 {
            index.insert(id(n), n as u32, &unit(4, (n % 4) as usize)).unwrap();
        }
        for n in 0..5u128 {
            index.delete(&id(n));
        }
        assert!(index.needs_compaction());
        let before = index.search(&unit(4, 1), 10, 0.5).unwrap();

        let outcome = index.compact();
        assert_eq!(outcome, CompactionOutcome::Completed { before: 10, after: 5 });
        assert!(!index.needs_compaction());
        assert_eq!(index.stats().tombstones, 0);
        assert_eq!(index.search(&unit(4, 1), 10, 0.5).unwrap(), before);
        assert!(index.verify().is_ok());
    }

    #[test]
    fn test_partitioned_search_matches_exact_top_hit() {
        let settings = IndexSettings {
            tombstone_ratio: 0.1,
            partition_min_entries: 16,
            nprobe: 2,
        };
        let index = VectorIndex::new(8, settings);
        for n in 0..64u128 {
            let mut v = unit(8, (n % 8) as usize);
            v[((n + 1) % 8) as usize] = (n as f32) / 100.0;
            index.insert(id(n), n as u32, &v).unwrap();
        }
        index.delete(&id(63));
        index.compact();
        assert!(index.stats().partitions > 2);
        assert!(index.verify().is_ok());

        let mut query = unit(8, 3);
        query[4] = 0.11;
        let hits = index.search(&query, 1, 0.0).unwrap();
        assert_eq!(hits[0].chunk_id, id(11));

        // Entries added after training are still found.
        index.insert(id(100), 0, &unit(8, 5)).unwrap();
        let hits = index.search(&unit(8, 5), 1, 0.99).unwrap();
        assert_eq!(hits[0].chunk_id, id(100));
    }

    /// Deterministic values in [-1, 1).
    struct Lcg(u64);

    impl Lcg {
        fn next(&mut self) -> f32 {
            self.0 = self
                .0
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            ((self.0 >> 33) as f32 / (1u64 << 31) as f32) * 2.0 - 1.0
        }

        fn jittered(&mut self, dimension: usize, axis: usize, spread: f32) -> Vec<f32> {
            let mut v: Vec<f32> = (0..dimension).map(|_| self.next() * spread).collect();
            v[axis] += 1.0;
            v
        }
    }

    #[test]
    fn test_partitioned_top_k_matches_exact_on_clustered_data() {
        let dimension = 16;
        let clusters = 16;
        let per_cluster = 30;
        let partitioned = VectorIndex::new(
            dimension,
            IndexSettings {
                tombstone_ratio: 0.1,
                partition_min_entries: 64,
                nprobe: 6,
            },
        );
        let exact = VectorIndex::new(
            dimension,
            IndexSettings {
                tombstone_ratio: 0.1,
                partition_min_entries: 64,
                nprobe: 0,
            },
        );

        let mut rng = Lcg(7);
        for n in 0..(clusters * per_cluster) as u128 {
            let v = rng.jittered(dimension, n as usize % clusters, 0.1);
            partitioned.insert(id(n), n as u32, &v).unwrap();
            exact.insert(id(n), n as u32, &v).unwrap();
        }
        partitioned.compact();
        exact.compact();
        assert!(partitioned.verify().is_ok());

        {
            let state = partitioned.state.read();
            let partitions = state.partitions.as_ref().unwrap();
            assert!(partitions.len() >= clusters);
            let live = state.arena.live_len();
            let largest = (0..partitions.len())
                .map(|c| partitions.list(c).len())
                .max()
                .unwrap();
            assert!(
                largest * partitions.len() <= 2 * live,
                "largest list {largest} of {} partitions over {live} entries",
                partitions.len()
            );
        }

        for axis in 0..clusters {
            let query = rng.jittered(dimension, axis, 0.05);
            let expected = exact.search(&query, 5, 0.0).unwrap();
            let actual = partitioned.search(&query, 5, 0.0).unwrap();
            assert_eq!(expected.len(), 5);
            assert_eq!(actual, expected, "query near axis {axis}");
        }
    }

    #[test]
    fn test_rebuild_replaces_contents() {
        let index = small_index();
        index.insert(id(1), 0, &unit(4, 0)).unwrap();
        index
            .rebuild(vec![IndexEntry {
                chunk_id: id(2),
                sequence: 0,
                vector: unit(4, 2),
            }])
            .unwrap();
        assert!(!index.contains(&id(1)));
        assert!(index.contains(&id(2)));
    }

    #[test]
    fn test_corruption_detected_and_repaired_by_rebuild() {
        let index = small_index();
        index.insert(id(1), 0, &unit(4, 0)).unwrap();
        index.corrupt_for_test();
        assert!(matches!(index.verify(), Err(IndexError::Corruption(_))));
        assert!(matches!(
            index.search(&unit(4, 0), 1, 0.0),
            Err(IndexError::Corruption(_))
        ));
        index
            .rebuild(vec![IndexEntry {
                chunk_id: id(1),
                sequence: 0,
                vector: unit(4, 0),
            }])
            .unwrap();
        assert!(index.verify().is_ok());
    }

    #[test]
    fn test_concurrent_insert_and_search_are_consistent() {
        let dimension = 16;
        let index = Arc::new(VectorIndex::new(dimension, IndexSettings::default()));
        let writers: Vec<_> = (0..4u128)
            .map(|w| {
                let index = Arc::clone(&index);
                thread::spawn(move || {
                    for n in 0..200u128 {
                        let key = w * 1_000 + n;
                        let mut v = vec![0.1; dimension];
                        v[(key % dimension as u128) as usize] = 1.0;
                        index.insert(id(key), n as u32, &v).unwrap();
                        if n % 7 == 0 {
                            index.delete(&id(key));
                        }
                    }
                })
            })
            .collect();
        let readers: Vec<_> = (0..4)
            .map(|r| {
                let index = Arc::clone(&index);
                thread::spawn(move || {
                    for _ in 0..200 {
                        let hits = index.search(&unit(dimension, r), 20, -1.0).unwrap();
                        let unique: HashSet<Uuid> = hits.iter().map(|h| h.chunk_id).collect();
                        assert_eq!(unique.len(), hits.len());
                        assert!(hits.iter().all(|h| h.score.is_finite() && h.score <= 1.0001));
                        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
                    }
                })
            })
            .collect();
        let compactor = {
            let index = Arc::clone(&index);
            thread::spawn(move || {
                for _ in 0..20 {
                    index.compact();
                    thread::yield_now();
                }
            })
        };

        for handle in writers.into_iter().chain(readers).chain([compactor]) {
            handle.join().unwrap();
        }
        index.compact();
        assert!(index.verify().is_ok());
        // 4 writers * 200 inserts, deleting every 7th (n = 0, 7, ..., 196).
        assert_eq!(index.len(), 4 * (200 - 29));
    }
}
