//! Inverted-file partitioning for sublinear search.
//!
//! Compaction clusters the live vectors with spherical k-means. A search
//! scores the query against the centroids and scans only the closest
//! `nprobe` lists, plus every slot appended since the partitions were
//! trained.

use super::arena::Arena;
use super::dot;

const KMEANS_ITERATIONS: usize = 8;
/// Seeds closer than this to an existing seed add nothing.
const DUPLICATE_SIMILARITY: f32 = 1.0 - 1e-6;
const MAX_PARTITIONS: usize = 1024;

#[derive(Debug, Clone)]
pub(crate) struct Partitions {
    dimension: usize,
    centroids: Vec<f32>,
    lists: Vec<Vec<u32>>,
    /// Slots below this bound belong to exactly one list.
    covered: usize,
}

impl Partitions {
    /// Cluster every live slot of `arena`. Returns `None` when there is
    /// nothing to cluster.
    pub fn train(arena: &Arena) -> Option<Self> {
        let live: Vec<usize> = arena.live_slots().collect();
        if live.is_empty() {
            return None;
        }
        let dimension = arena.dimension();
        let target = ((live.len() as f64).sqrt().round() as usize).clamp(1, MAX_PARTITIONS);

        let mut centroids = seed_farthest_first(arena, &live, target);
        let k = centroids.len() / dimension;

        // Every pass ends with an assignment against the current centroids,
        // so the lists built below always agree with the centroids kept.
        let mut assignment = vec![usize::MAX; live.len()];
        for iteration in 0..=KMEANS_ITERATIONS {
            let mut changed = false;
            for (i, &slot) in live.iter().enumerate() {
                let best = nearest(&centroids, dimension, arena.vector(slot));
                if assignment[i] != best {
                    assignment[i] = best;
                    changed = true;
                }
            }
            if !changed || iteration == KMEANS_ITERATIONS {
                break;
            }
            update_centroids(arena, &live, &assignment, &mut centroids, k);
        }

        let mut buckets = vec![Vec::new(); k];
        for (i, &slot) in live.iter().enumerate() {
            buckets[assignment[i]].push(slot as u32);
        }

        // Drop clusters that ended up empty so probes never waste a slot.
        let mut kept_centroids = Vec::with_capacity(centroids.len());
        let mut lists = Vec::with_capacity(k);
        for (c, bucket) in buckets.into_iter().enumerate() {
            if !bucket.is_empty() {
                kept_centroids.extend_from_slice(&centroids[c * dimension..(c + 1) * dimension]);
                lists.push(bucket);
            }
        }

        Some(Self {
            dimension,
            centroids: kept_centroids,
            lists,
            covered: arena.len(),
        })
    }

    pub fn len(&self) -> usize {
        self.lists.len()
    }

    pub fn covered(&self) -> usize {
        self.covered
    }

    /// Indices of the `nprobe` lists whose centroids are most similar to
    /// `query`.
    pub fn probe(&self, query: &[f32], nprobe: usize) -> Vec<usize> {
        let mut scored: Vec<(usize, f32)> = (0..self.lists.len())
            .map(|c| (c, dot(self.centroid(c), query)))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored.into_iter().take(nprobe).map(|(c, _)| c).collect()
    }

    pub fn list(&self, partition: usize) -> &[u32] {
        &self.lists[partition]
    }

    fn centroid(&self, c: usize) -> &[f32] {
        &self.centroids[c * self.dimension..(c + 1) * self.dimension]
    }

    /// Every covered slot must sit in exactly one list.
    pub fn verify(&self, arena_len: usize) -> Result<(), String> {
        if self.covered > arena_len {
            return Err(format!(
                "partitions cover {} slots but the arena holds {arena_len}",
                self.covered
            ));
        }
        if self.centroids.len() != self.lists.len() * self.dimension {
            return Err("centroid buffer does not match partition count".to_string());
        }
        let mut seen = vec![false; self.covered];
        for list in &self.lists {
            for &slot in list {
                let slot = slot as usize;
                match seen.get_mut(slot) {
                    Some(flag) if !*flag => *flag = true,
                    Some(_) => return Err(format!("slot {slot} listed in two partitions")),
                    None => return Err(format!("partition references slot {slot} out of range")),
                }
            }
        }
        Ok(())
    }

    #[cfg(test)]
    pub fn push_out_of_range_for_test(&mut self) {
        let bogus = self.covered as u32 + 100;
        self.lists[0].push(bogus);
    }
}

/// Deterministic farthest-first seeding: start from the first live slot and
/// repeatedly add the vector least similar to every seed chosen so far.
/// Stops early once the remaining vectors duplicate existing seeds.
fn seed_farthest_first(arena: &Arena, live: &[usize], k: usize) -> Vec<f32> {
    let dimension = arena.dimension();
    let mut centroids = Vec::with_capacity(k * dimension);
    centroids.extend_from_slice(arena.vector(live[0]));
    let mut closest: Vec<f32> = live
        .iter()
        .map(|&slot| dot(arena.vector(slot), &centroids[..dimension]))
        .collect();

    while centroids.len() < k * dimension {
        let Some((pick, &similarity)) = closest
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.total_cmp(b.1).then(a.0.cmp(&b.0)))
        else {
            break;
        };
        if similarity >= DUPLICATE_SIMILARITY {
            break;
        }
        let seed = arena.vector(live[pick]);
        centroids.extend_from_slice(seed);
        for (score, &slot) in closest.iter_mut().zip(live) {
            *score = score.max(dot(arena.vector(slot), seed));
        }
    }
    centroids
}

/// Move each non-empty centroid to the normalized mean of its members.
/// Empty clusters keep their previous centroid.
fn update_centroids(
    arena: &Arena,
    live: &[usize],
    assignment: &[usize],
    centroids: &mut [f32],
    k: usize,
) {
    let dimension = arena.dimension();
    let mut sums = vec![0.0f32; k * dimension];
    let mut counts = vec![0usize; k];
    for (&c, &slot) in assignment.iter().zip(live) {
        counts[c] += 1;
        for (acc, x) in sums[c * dimension..(c + 1) * dimension]
            .iter_mut()
            .zip(arena.vector(slot))
        {
            *acc += x;
        }
    }
    for c in 0..k {
        if counts[c] == 0 {
            continue;
        }
        let sum = &sums[c * dimension..(c + 1) * dimension];
        let norm = sum.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for (dst, x) in centroids[c * dimension..(c + 1) * dimension]
                .iter_mut()
                .zip(sum)
            {
                *dst = x / norm;
            }
        }
    }
}

fn nearest(centroids: &[f32], dimension: usize, vector: &[f32]) -> usize {
    let mut best = 0;
    let mut best_score = f32::NEG_INFINITY;
    for (c, centroid) in centroids.chunks_exact(dimension).enumerate() {
        let score = dot(centroid, vector);
        if score > best_score {
            best = c;
            best_score = score;
        }
    }
    best
}
