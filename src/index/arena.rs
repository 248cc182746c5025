//! Dense storage for index entries.
//!
//! Vectors live back to back in one `Vec<f32>`; slot `i` owns
//! `vectors[i * dimension..(i + 1) * dimension]`. Deletion only sets the
//! slot's bit in the tombstone bitmap; compaction rebuilds the arena.

use fixedbitset::FixedBitSet;
use uuid::Uuid;

/// Identity of the chunk stored in a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EntryMeta {
    pub chunk_id: Uuid,
    pub sequence: u32,
}

#[derive(Debug, Clone)]
pub(crate) struct Arena {
    dimension: usize,
    vectors: Vec<f32>,
    entries: Vec<EntryMeta>,
    tombstones: FixedBitSet,
    tombstoned: usize,
}

impl Arena {
    pub fn new(dimension: usize) -> Self {
        Self::with_capacity(dimension, 0)
    }

    pub fn with_capacity(dimension: usize, capacity: usize) -> Self {
        Self {
            dimension,
            vectors: Vec::with_capacity(capacity * dimension),
            entries: Vec::with_capacity(capacity),
            tombstones: FixedBitSet::with_capacity(capacity),
            tombstoned: 0,
        }
    }

    /// Append an entry. `vector` must already be normalized and of the
    /// arena's dimension.
    pub fn push(&mut self, meta: EntryMeta, vector: &[f32]) -> usize {
        debug_assert_eq!(vector.len(), self.dimension);
        let slot = self.entries.len();
        self.vectors.extend_from_slice(vector);
        self.entries.push(meta);
        if self.tombstones.len() <= slot {
            self.tombstones.grow((slot + 1).next_power_of_two());
        }
        slot
    }

    /// Mark a slot deleted. Returns false if it already was.
    pub fn tombstone(&mut self, slot: usize) -> bool {
        if slot >= self.entries.len() || self.tombstones.put(slot) {
            return false;
        }
        self.tombstoned += 1;
        true
    }

    pub fn is_live(&self, slot: usize) -> bool {
        slot < self.entries.len() && !self.tombstones.contains(slot)
    }

    pub fn meta(&self, slot: usize) -> Option<&EntryMeta> {
        self.entries.get(slot)
    }

    pub fn vector(&self, slot: usize) -> &[f32] {
        let start = slot * self.dimension;
        &self.vectors[start..start + self.dimension]
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of slots, tombstoned ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn live_len(&self) -> usize {
        self.entries.len() - self.tombstoned
    }

    pub fn tombstone_count(&self) -> usize {
        self.tombstoned
    }

    pub fn tombstone_ratio(&self) -> f64 {
        if self.entries.is_empty() {
            0.0
        } else {
            self.tombstoned as f64 / self.entries.len() as f64
        }
    }

    /// Live slots in insertion order.
    pub fn live_slots(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.entries.len()).filter(move |&slot| !self.tombstones.contains(slot))
    }

    /// Copy out every live entry, for compaction.
    pub fn live_entries(&self) -> Vec<(EntryMeta, Vec<f32>)> {
        self.live_slots()
            .map(|slot| (self.entries[slot], self.vector(slot).to_vec()))
            .collect()
    }

    /// Constant-time layout check, run before every scan.
    pub fn check_shape(&self) -> Result<(), String> {
        if self.vectors.len() != self.entries.len() * self.dimension {
            return Err(format!(
                "vector buffer holds {} floats for {} entries of dimension {}",
                self.vectors.len(),
                self.entries.len(),
                self.dimension
            ));
        }
        if self.tombstones.len() < self.entries.len() {
            return Err(format!(
                "tombstone bitmap covers {} slots for {} entries",
                self.tombstones.len(),
                self.entries.len()
            ));
        }
        Ok(())
    }

    /// Check every structural invariant of the arena.
    pub fn verify(&self) -> Result<(), String> {
        self.check_shape()?;
        let counted = self.tombstones.count_ones(..self.entries.len());
        if counted != self.tombstoned {
            return Err(format!(
                "tombstone count {} disagrees with bitmap ({counted})",
                self.tombstoned
            ));
        }
        Ok(())
    }

    #[cfg(test)]
    pub fn truncate_vectors_for_test(&mut self) {
        self.vectors.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(n: u128) -> EntryMeta {
        EntryMeta {
            chunk_id: Uuid::from_u128(n),
            sequence: n as u32,
        }
    }

    #[test]
    fn test_push_and_read_back() {
        let mut arena = Arena::new(2);
        let a = arena.push(meta(1), &[1.0, 0.0]);
        let b = arena.push(meta(2), &[0.0, 1.0]);
        assert_eq!((a, b), (0, 1));
        assert_eq!(arena.vector(1), &[0.0, 1.0]);
        assert_eq!(arena.meta(0), Some(&meta(1)));
        assert_eq!(arena.live_len(), 2);
        assert!(arena.verify().is_ok());
    }

    #[test]
    fn test_tombstone_is_idempotent() {
        let mut arena = Arena::new(2);
        arena.push(meta(1), &[1.0, 0.0]);
        arena.push(meta(2), &[0.0, 1.0]);

        assert!(arena.tombstone(0));
        assert!(!arena.tombstone(0));
        assert!(!arena.tombstone(7));
        assert!(!arena.is_live(0));
        assert!(arena.is_live(1));
        assert_eq!(arena.tombstone_count(), 1);
        assert!((arena.tombstone_ratio() - 0.5).abs() < f64::EPSILON);
        assert_eq!(arena.live_slots().collect::<Vec<_>>(), vec![1]);
        assert!(arena.verify().is_ok());
    }

    #[test]
    fn test_live_entries_skip_tombstones() {
        let mut arena = Arena::new(1);
        for n in 0..5 {
            arena.push(meta(n), &[1.0]);
        }
        arena.tombstone(1);
        arena.tombstone(3);
        let ids: Vec<u128> = arena
            .live_entries()
            .iter()
            .map(|(m, _)| m.chunk_id.as_u128())
            .collect();
        assert_eq!(ids, vec![0, 2, 4]);
    }

    #[test]
    fn test_verify_detects_short_buffer() {
        let mut arena = Arena::new(2);
        arena.push(meta(1), &[1.0, 0.0]);
        arena.truncate_vectors_for_test();
        assert!(arena.check_shape().is_err());
        assert!(arena.verify().is_err());
    }
}
