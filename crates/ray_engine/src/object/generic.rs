//! User-defined primitives

use std::fmt;

use super::attrib::AttribSet;
use crate::batch::Ray;
use crate::foundation::math::{Aabb, Vec3};

/// Intersection reported by a [`GenericPrimitive`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenericHit {
    /// Ray parameter of the hit
    pub distance: f32,
    /// Primitive element id
    pub element: u32,
    /// Surface parameters
    pub u: f32,
    /// Surface parameters
    pub v: f32,
    /// Geometric normal in object space
    pub normal: Vec3,
}

/// Behaviour a user-defined object provides to accelerators
pub trait GenericPrimitive: Send + Sync + fmt::Debug {
    /// Object-space bounds
    fn bounds(&self) -> Aabb;

    /// Closest intersection within `[t_min, t_max)`
    fn intersect(&self, ray: &Ray, t_min: f32, t_max: f32) -> Option<GenericHit>;

    /// Attributes exposed for shading
    fn attributes(&self) -> Option<&AttribSet> {
        None
    }
}

/// Generic object payload
#[derive(Debug)]
pub struct GenericObject {
    primitive: Box<dyn GenericPrimitive>,
}

impl GenericObject {
    /// Wrap a user primitive
    pub fn new(primitive: impl GenericPrimitive + 'static) -> Self {
        Self {
            primitive: Box::new(primitive),
        }
    }

    /// The user primitive
    pub fn primitive(&self) -> &dyn GenericPrimitive {
        self.primitive.as_ref()
    }
}
