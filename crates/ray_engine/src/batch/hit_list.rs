//! Closest-hit records parallel to a ray batch

use std::ops::{Index, IndexMut};

use super::Range;
use crate::foundation::collections::SmallStack;
use crate::foundation::math::Vec3;

/// Element value of a hit that found nothing
pub const INVALID_ELEMENT: u32 = u32::MAX;

/// Path of child and instance-copy indices from the root graph to the hit
pub type HitStack = SmallStack<u32>;

/// Candidate intersection offered to [`Hit::set`]
#[derive(Debug, Clone, Copy)]
pub struct HitRecord<'a> {
    /// Ray parameter of the intersection
    pub distance: f32,
    /// Primitive index inside the leaf geometry
    pub element: u32,
    /// Triangle within a fan or segment within a curve
    pub sub_element: u32,
    /// First parametric coordinate
    pub u: f32,
    /// Second parametric coordinate
    pub v: f32,
    /// World-space geometric normal
    pub normal: Vec3,
    /// Hierarchy path to the leaf geometry
    pub stack: &'a [u32],
}

/// Closest intersection found so far for one ray
#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    distance: f32,
    element: u32,
    sub_element: u32,
    u: f32,
    v: f32,
    normal: Vec3,
    stack: HitStack,
}

impl Default for Hit {
    fn default() -> Self {
        Self {
            distance: f32::MAX,
            element: INVALID_ELEMENT,
            sub_element: 0,
            u: 0.0,
            v: 0.0,
            normal: Vec3::zeros(),
            stack: HitStack::new(),
        }
    }
}

impl Hit {
    /// Reset to the miss state
    pub fn clear(&mut self) {
        self.distance = f32::MAX;
        self.element = INVALID_ELEMENT;
        self.sub_element = 0;
        self.u = 0.0;
        self.v = 0.0;
        self.normal = Vec3::zeros();
        self.stack.clear();
    }

    /// True when a primitive was recorded
    #[inline]
    pub fn is_hit(&self) -> bool {
        self.element != INVALID_ELEMENT
    }

    /// Distance along the ray, `f32::MAX` on a miss
    #[inline]
    pub fn distance(&self) -> f32 {
        self.distance
    }

    /// Primitive index
    pub fn element(&self) -> u32 {
        self.element
    }

    /// Sub-primitive index
    pub fn sub_element(&self) -> u32 {
        self.sub_element
    }

    /// Parametric coordinates on the primitive
    pub fn uv(&self) -> (f32, f32) {
        (self.u, self.v)
    }

    /// World-space geometric normal
    pub fn normal(&self) -> Vec3 {
        self.normal
    }

    /// Hierarchy path from the root graph
    pub fn stack(&self) -> &[u32] {
        &self.stack
    }

    /// Record a candidate if it is strictly closer than the current one
    ///
    /// Returns whether the hit changed. This is the only way to store an
    /// intersection, so the distance never grows between clears.
    pub fn set(&mut self, record: &HitRecord<'_>) -> bool {
        debug_assert!(record.element != INVALID_ELEMENT);
        if !(record.distance < self.distance) {
            return false;
        }
        self.distance = record.distance;
        self.element = record.element;
        self.sub_element = record.sub_element;
        self.u = record.u;
        self.v = record.v;
        self.normal = record.normal;
        self.stack.clear();
        self.stack.extend_from_slice(record.stack);
        debug_assert!(self.validate());
        true
    }

    /// Structural consistency check, used from debug assertions
    pub fn validate(&self) -> bool {
        if self.is_hit() {
            self.distance.is_finite() && self.distance >= 0.0 && !self.stack.is_empty()
        } else {
            self.distance == f32::MAX && self.stack.is_empty()
        }
    }
}

/// Batch of hits, slot `i` belongs to ray `i`
///
/// Unlike [`RayList`](super::RayList) the slots are whole [`Hit`] records
/// rather than column arrays. Each slot carries a hit stack of its own
/// length, and [`Hit::set`] has to see the distance and the rest of the
/// record together to keep the closest hit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HitList {
    hits: Vec<Hit>,
}

impl HitList {
    /// `size` cleared hits
    pub fn new(size: usize) -> Self {
        Self {
            hits: vec![Hit::default(); size],
        }
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.hits.len()
    }

    /// True when there are no slots
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    /// Grow or shrink, new slots are cleared
    pub fn resize(&mut self, size: usize) {
        self.hits.resize(size, Hit::default());
    }

    /// Clear every slot
    pub fn clear_all(&mut self) {
        self.hits.iter_mut().for_each(Hit::clear);
    }

    /// Clear the slots named by `range`
    pub fn clear_range(&mut self, range: &Range) {
        for i in range.iter() {
            self.hits[i].clear();
        }
    }

    /// Iterate over all slots
    pub fn iter(&self) -> std::slice::Iter<'_, Hit> {
        self.hits.iter()
    }

    /// Mutable access to all slots
    pub fn as_mut_slice(&mut self) -> &mut [Hit] {
        &mut self.hits
    }

    /// Number of hits inside `range`
    pub fn hit_count(&self, range: &Range) -> usize {
        range.iter().filter(|&i| self.hits[i].is_hit()).count()
    }

    /// Copy the slots named by `range` from `src` into the same slots here
    pub fn copy_from(&mut self, range: &Range, src: &Self) {
        if self.len() < src.len() {
            self.resize(src.len());
        }
        for i in range.iter() {
            self.hits[i].clone_from(&src.hits[i]);
        }
    }

    /// Dense list holding the slots of `src` named by `range`, in range order
    pub fn compact(range: &Range, src: &Self) -> Self {
        Self {
            hits: range.iter().map(|i| src.hits[i].clone()).collect(),
        }
    }
}

impl Index<usize> for HitList {
    type Output = Hit;

    fn index(&self, index: usize) -> &Hit {
        &self.hits[index]
    }
}

impl IndexMut<usize> for HitList {
    fn index_mut(&mut self, index: usize) -> &mut Hit {
        &mut self.hits[index]
    }
}
