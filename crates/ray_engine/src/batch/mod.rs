//! Batch containers
//!
//! Rays and hits travel through the pipeline in parallel batches: slot `i` of
//! a [`HitList`] belongs to slot `i` of the [`RayList`] it was traced from.
//! A [`Range`] selects the active slots of both.

mod hit_list;
mod range;
mod ray_list;

pub use hit_list::{Hit, HitList, HitRecord, HitStack, INVALID_ELEMENT};
pub use range::{PartitionKey, Range};
pub use ray_list::{RayList, SampleState};

use crate::foundation::math::{Mat4, Point3, Vec3};

/// A single ray, read out of a [`RayList`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    /// Ray origin
    pub origin: Point3,
    /// Ray direction, not necessarily unit length
    pub direction: Vec3,
    /// Sample time
    pub time: f32,
}

impl Ray {
    /// Create a ray
    pub const fn new(origin: Point3, direction: Vec3, time: f32) -> Self {
        Self {
            origin,
            direction,
            time,
        }
    }

    /// Point at parameter `t`
    pub fn at(&self, t: f32) -> Point3 {
        self.origin + self.direction * t
    }

    /// The same ray expressed in another space
    #[must_use]
    pub fn transformed(&self, m: &Mat4) -> Self {
        Self {
            origin: m.transform_point(&self.origin),
            direction: m.transform_vector(&self.direction),
            time: self.time,
        }
    }
}
