//! Specialized collection types
//!
//! Hot-path containers shared by the batch containers and accelerators.

pub use slotmap::{new_key_type, SlotMap};
use smallvec::SmallVec;

/// Hash map with the Fx hasher, used for id-keyed lookups
pub type FastMap<K, V> = rustc_hash::FxHashMap<K, V>;

/// Hash set with the Fx hasher
pub type FastSet<K> = rustc_hash::FxHashSet<K>;

/// Inline capacity of a [`SmallStack`] before it spills to the heap
pub const SMALL_STACK_INLINE: usize = 4;

/// Small-buffer sequence for short per-hit paths
///
/// Four levels cover root, instance, prototype graph and nested instance
/// without allocating; deeper nesting spills to the heap.
pub type SmallStack<T> = SmallVec<[T; SMALL_STACK_INLINE]>;
