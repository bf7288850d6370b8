//! Index indirection over ray and hit batches
//!
//! A [`Range`] names which slots of a [`RayList`](super::RayList) or
//! [`HitList`](super::HitList) are active. Passing ranges between stages lets
//! each stage work on a sub-population without copying the batch.
//!
//! The unpermuted range `[0, n)` is stored without an index vector, so
//! [`Range::is_trivial`] is O(1) and hot loops can skip the indirection.

use std::collections::BTreeMap;

use super::HitList;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Repr {
    /// `0..n` in order
    Trivial(usize),
    /// Anything else; never equal to `0..len` in order
    Indexed(Vec<u32>),
}

/// Ordered set of batch indices
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Range {
    repr: Repr,
}

impl Default for Range {
    fn default() -> Self {
        Self::new(0)
    }
}

/// Integer keys accepted by [`Range::partition`]
pub trait PartitionKey: Copy + Ord {}

impl PartitionKey for i32 {}
impl PartitionKey for i64 {}
impl PartitionKey for u32 {}
impl PartitionKey for u64 {}

impl Range {
    /// The trivial range `[0, size)`
    pub const fn new(size: usize) -> Self {
        Self {
            repr: Repr::Trivial(size),
        }
    }

    /// Range over explicit indices, kept in the given order
    pub fn from_indices(indices: Vec<u32>) -> Self {
        let mut range = Self {
            repr: Repr::Indexed(indices),
        };
        range.settle();
        range
    }

    /// Collapse to the trivial representation when the content is `0..len`
    fn settle(&mut self) {
        if let Repr::Indexed(indices) = &self.repr {
            let identity = indices.iter().enumerate().all(|(k, &i)| i as usize == k);
            if identity {
                self.repr = Repr::Trivial(indices.len());
            }
        }
    }

    fn indices_mut(&mut self) -> &mut Vec<u32> {
        if let Repr::Trivial(n) = self.repr {
            self.repr = Repr::Indexed((0..n as u32).collect());
        }
        match &mut self.repr {
            Repr::Indexed(indices) => indices,
            Repr::Trivial(_) => unreachable!("trivial range was just expanded"),
        }
    }

    /// Number of active indices
    pub fn len(&self) -> usize {
        match &self.repr {
            Repr::Trivial(n) => *n,
            Repr::Indexed(indices) => indices.len(),
        }
    }

    /// True when no index is active
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True iff the range is exactly `[0, len)` in order
    pub const fn is_trivial(&self) -> bool {
        matches!(self.repr, Repr::Trivial(_))
    }

    /// Index at position `k`
    #[inline]
    pub fn get(&self, k: usize) -> usize {
        match &self.repr {
            Repr::Trivial(n) => {
                debug_assert!(k < *n);
                k
            }
            Repr::Indexed(indices) => indices[k] as usize,
        }
    }

    /// Explicit indices, `None` for a trivial range
    pub fn as_slice(&self) -> Option<&[u32]> {
        match &self.repr {
            Repr::Trivial(_) => None,
            Repr::Indexed(indices) => Some(indices),
        }
    }

    /// Iterate active indices in order
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        let (count, explicit): (usize, &[u32]) = match &self.repr {
            Repr::Trivial(n) => (*n, &[]),
            Repr::Indexed(indices) => (0, indices),
        };
        (0..count).chain(explicit.iter().map(|&i| i as usize))
    }

    /// Largest index plus one; every consumer batch must be at least this long
    pub fn extent(&self) -> usize {
        match &self.repr {
            Repr::Trivial(n) => *n,
            Repr::Indexed(indices) => indices.iter().max().map_or(0, |&m| m as usize + 1),
        }
    }

    /// True when indices are strictly increasing
    pub fn is_ascending(&self) -> bool {
        match &self.repr {
            Repr::Trivial(_) => true,
            Repr::Indexed(indices) => indices.windows(2).all(|w| w[0] < w[1]),
        }
    }

    /// Keep only indices for which `keep` returns true
    pub fn retain(&mut self, mut keep: impl FnMut(usize) -> bool) {
        self.indices_mut().retain(|&i| keep(i as usize));
        self.settle();
    }

    /// Remove indices whose hit is a miss
    pub fn prune_misses(&mut self, hits: &HitList) {
        debug_assert!(self.extent() <= hits.len());
        self.retain(|i| hits[i].is_hit());
    }

    /// Remove indices whose hit found something, keeping the escaped rays
    pub fn prune_hits(&mut self, hits: &HitList) {
        debug_assert!(self.extent() <= hits.len());
        self.retain(|i| !hits[i].is_hit());
    }

    /// Remove every index contained in `removal`
    pub fn prune_range(&mut self, removal: &Self) {
        if removal.is_empty() {
            return;
        }
        if removal.is_ascending() {
            match &removal.repr {
                Repr::Trivial(n) => {
                    let n = *n;
                    self.retain(|i| i >= n);
                }
                Repr::Indexed(indices) => self.prune_sorted(indices),
            }
        } else {
            let mut sorted: Vec<u32> = removal.iter().map(|i| i as u32).collect();
            sorted.sort_unstable();
            sorted.dedup();
            self.prune_sorted(&sorted);
        }
    }

    /// Remove every index contained in the ascending list `removal`
    ///
    /// One linear merge when this range is ascending too. Otherwise the
    /// removal list is spread into a mask over the range extent first, so the
    /// range is still walked once and keeps its order.
    pub fn prune_sorted(&mut self, removal: &[u32]) {
        debug_assert!(removal.windows(2).all(|w| w[0] <= w[1]), "removal list must be sorted");
        if removal.is_empty() {
            return;
        }
        if self.is_ascending() {
            let mut cursor = 0;
            self.retain(|i| {
                let i = i as u32;
                while cursor < removal.len() && removal[cursor] < i {
                    cursor += 1;
                }
                !(cursor < removal.len() && removal[cursor] == i)
            });
        } else {
            let mut removed = vec![false; self.extent()];
            for &i in removal {
                if let Some(slot) = removed.get_mut(i as usize) {
                    *slot = true;
                }
            }
            self.retain(|i| !removed[i]);
        }
    }

    /// Bucket the range by a per-index key, skipping `ignore`
    ///
    /// Each bucket keeps the original relative order of its indices.
    pub fn partition<K: PartitionKey>(&self, mut key: impl FnMut(usize) -> K, ignore: K) -> BTreeMap<K, Self> {
        let mut buckets: BTreeMap<K, Vec<u32>> = BTreeMap::new();
        for i in self.iter() {
            let k = key(i);
            if k != ignore {
                buckets.entry(k).or_default().push(i as u32);
            }
        }
        buckets
            .into_iter()
            .map(|(k, indices)| (k, Self::from_indices(indices)))
            .collect()
    }

    /// Sort and deduplicate for traversal locality
    pub fn optimize(&mut self) {
        if self.is_trivial() {
            return;
        }
        let indices = self.indices_mut();
        indices.sort_unstable();
        indices.dedup();
        self.settle();
    }

    /// Split into at most `chunks` contiguous pieces of near-equal length
    pub fn split(&self, chunks: usize) -> Vec<Self> {
        let len = self.len();
        if len == 0 || chunks == 0 {
            return Vec::new();
        }
        let chunks = chunks.min(len);
        let base = len / chunks;
        let extra = len % chunks;
        let mut start = 0;
        (0..chunks)
            .map(|c| {
                let end = start + base + usize::from(c < extra);
                let piece = match &self.repr {
                    Repr::Trivial(_) => Self::from_indices((start as u32..end as u32).collect()),
                    Repr::Indexed(indices) => Self::from_indices(indices[start..end].to_vec()),
                };
                start = end;
                piece
            })
            .collect()
    }
}

impl FromIterator<u32> for Range {
    fn from_iter<I: IntoIterator<Item = u32>>(iter: I) -> Self {
        Self::from_indices(iter.into_iter().collect())
    }
}
