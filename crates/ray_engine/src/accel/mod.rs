//! Acceleration structures
//!
//! An [`Accelerator`] takes a committed scene graph, builds whatever spatial
//! structure it likes, and answers batched closest-hit queries. Accelerators
//! are created by name through an [`AcceleratorRegistry`], so a host can swap
//! the structure without touching the scene.
//!
//! Two accelerators ship with the crate:
//!
//! - `"bvh"`: a two-level bounding volume hierarchy with nested instancing
//!   and incremental updates ([`BvhAccelerator`])
//! - `"linear"`: a brute force reference over a flattened scene
//!   ([`LinearAccelerator`])

mod bvh;
mod bvh_accel;
mod geometry;
pub mod intersect;
mod linear;
mod registry;

pub use bvh::Bvh;
pub use bvh_accel::{BvhAccelerator, BvhStats};
pub use linear::LinearAccelerator;
pub use registry::{AcceleratorRegistry, Factory, FactoryFn};

use bitflags::bitflags;
use once_cell::sync::Lazy;
use std::sync::Arc;

use crate::batch::{Hit, HitList, Range, RayList};
use crate::foundation::math::Color;
use crate::object::{AttribList, AttribLookup, AttribSet, GeometryError, ObjectId, ObjectRef};

/// Base colour used by [`Accelerator::headlight`] for geometry without `Cd`
pub const HEADLIGHT_GREY: f32 = 0.5;

bitflags! {
    /// What changed on an object since it was last committed
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct UpdateEvent: u32 {
        /// Object was added to the scene
        const NEW = 1 << 0;
        /// Object was removed from the scene
        const DELETE = 1 << 1;
        /// Point positions moved, topology unchanged
        const ATTRIB_P = 1 << 2;
        /// Non-position attribute values changed
        const ATTRIB = 1 << 3;
        /// Primitive connectivity or counts changed
        const TOPOLOGY = 1 << 4;
        /// Graph or instance transforms changed
        const XFORM = 1 << 5;
        /// An instance now refers to a different prototype
        const PROTOTYPE = 1 << 6;
        /// Children of a scene graph were added or removed
        const CONTENTS = 1 << 7;
        /// Non-geometric properties changed (names, light data)
        const PROPERTIES = 1 << 8;
    }
}

impl UpdateEvent {
    /// Events that change the shape of the hierarchy
    pub const STRUCTURE: Self = Self::NEW
        .union(Self::DELETE)
        .union(Self::TOPOLOGY)
        .union(Self::PROTOTYPE)
        .union(Self::CONTENTS);
}

/// Errors raised while committing or updating an accelerator
#[derive(thiserror::Error, Debug)]
pub enum AcceleratorError {
    /// The committed root is not a scene graph
    #[error("object '{0}' is not a scene graph and cannot be committed")]
    NotASceneGraph(String),

    /// An update arrived before any scene was committed
    #[error("no scene has been committed to accelerator '{0}'")]
    NotCommitted(String),

    /// The hierarchy refers back to itself
    #[error("object '{0}' contains itself")]
    Cycle(String),

    /// Geometry failed validation
    #[error("invalid geometry in '{name}': {source}")]
    Geometry {
        /// Object name
        name: String,
        /// Underlying problem
        #[source]
        source: GeometryError,
    },

    /// The accelerator cannot handle this kind of scene
    #[error("accelerator '{accelerator}' does not support {what}")]
    Unsupported {
        /// Accelerator style
        accelerator: String,
        /// What was asked of it
        what: String,
    },
}

/// Geometry data an accelerator resolved for a hit
#[derive(Debug, Clone, Copy)]
pub struct HitGeometry<'a> {
    /// Object id of the geometry as committed
    pub object: ObjectId,
    /// Attribute values of the geometry
    pub attributes: &'a AttribSet,
    /// Corners and weights of the struck primitive
    pub lookup: AttribLookup,
}

/// Pluggable spatial structure answering batched ray queries
///
/// Traversal methods take `&self`; when [`thread_safe`](Self::thread_safe)
/// reports `true` they may be called from many threads at once on disjoint
/// ranges. Mutation takes `&mut self` and so never overlaps traversal.
pub trait Accelerator: Send + Sync {
    /// Registered style name
    fn name(&self) -> &str;

    /// Build the structure for the graph rooted at `root`
    fn commit_scene(&mut self, root: &ObjectRef) -> Result<(), AcceleratorError>;

    /// Bring the structure up to date after `object` changed
    fn update_object(&mut self, object: &ObjectRef, event: UpdateEvent) -> Result<(), AcceleratorError>;

    /// Intersect the rays named by `range`
    ///
    /// Only hits strictly closer than the current hit and inside
    /// `[min_distance, max_distance)` are recorded. Misses leave the hit
    /// untouched. A negative `min_distance` is treated as zero.
    fn send_rays(&self, range: &Range, hits: &mut HitList, rays: &RayList, max_distance: f32, min_distance: f32);

    /// True when traversal may run concurrently
    fn thread_safe(&self) -> bool;

    /// True when instances of instances are traced without flattening
    fn nested_instancing(&self) -> bool;

    /// Attribute data and lookup location for a hit, if it hit this structure
    fn hit_geometry(&self, hit: &Hit) -> Option<HitGeometry<'_>>;

    /// Layout of the geometry struck by `hit`
    fn attrib_list(&self, hit: &Hit) -> Option<Arc<AttribList>> {
        self.hit_geometry(hit).map(|g| Arc::clone(g.attributes.list()))
    }

    /// Simple shading without transparency
    ///
    /// Adds `contribution * base * |N·D|` to the destination pixel of every hit
    /// ray, where `base` is the geometry's display colour or grey.
    fn headlight(&self, range: &Range, hits: &HitList, rays: &RayList, pixels: &mut [Color]) {
        let mut scratch = Vec::new();
        for i in range.iter() {
            let hit = &hits[i];
            if !hit.is_hit() {
                continue;
            }
            let pixel = rays.pixels()[i] as usize;
            if pixel >= pixels.len() {
                log::warn!("Ray {} targets pixel {} outside a {} pixel buffer", i, pixel, pixels.len());
                continue;
            }

            let base = self
                .hit_geometry(hit)
                .and_then(|geometry| {
                    let index = geometry.attributes.list().display_color()?;
                    let cd = geometry.attributes.eval::<f32>(index, &geometry.lookup, &mut scratch)?;
                    (cd.len() >= 3).then(|| Color::new(cd[0], cd[1], cd[2]))
                })
                .unwrap_or_else(|| Color::repeat(HEADLIGHT_GREY));

            let direction = rays.directions()[i];
            let normal = hit.normal();
            let denom = direction.norm() * normal.norm();
            let facing = if denom > 0.0 { (normal.dot(&direction) / denom).abs() } else { 0.0 };

            pixels[pixel] += rays.contributions()[i].component_mul(&base) * facing;
        }
    }

    /// True when the accelerator shades rays itself
    fn direct_rendering(&self) -> bool {
        false
    }

    /// Shade rays in place of the host; returns whether anything was done
    fn direct_render(&self, _range: &Range, _rays: &RayList, _pixels: &mut [Color]) -> bool {
        false
    }

    /// Reset any state kept by [`direct_render`](Self::direct_render)
    fn direct_clear(&mut self) {}

    /// Evaluate a 32-bit integer attribute at a hit
    fn eval_attribute_i32<'a>(&'a self, hit: &Hit, attrib: usize, scratch: &'a mut Vec<i32>) -> Option<&'a [i32]> {
        let geometry = self.hit_geometry(hit)?;
        geometry.attributes.eval(attrib, &geometry.lookup, scratch)
    }

    /// Evaluate a 64-bit integer attribute at a hit
    fn eval_attribute_i64<'a>(&'a self, hit: &Hit, attrib: usize, scratch: &'a mut Vec<i64>) -> Option<&'a [i64]> {
        let geometry = self.hit_geometry(hit)?;
        geometry.attributes.eval(attrib, &geometry.lookup, scratch)
    }

    /// Evaluate a 32-bit float attribute at a hit, interpolating per-corner data
    fn eval_attribute_f32<'a>(&'a self, hit: &Hit, attrib: usize, scratch: &'a mut Vec<f32>) -> Option<&'a [f32]> {
        let geometry = self.hit_geometry(hit)?;
        geometry.attributes.eval(attrib, &geometry.lookup, scratch)
    }

    /// Evaluate a 64-bit float attribute at a hit, interpolating per-corner data
    fn eval_attribute_f64<'a>(&'a self, hit: &Hit, attrib: usize, scratch: &'a mut Vec<f64>) -> Option<&'a [f64]> {
        let geometry = self.hit_geometry(hit)?;
        geometry.attributes.eval(attrib, &geometry.lookup, scratch)
    }

    /// Evaluate a string attribute at a hit
    fn eval_attribute_string<'a>(
        &'a self,
        hit: &Hit,
        attrib: usize,
        scratch: &'a mut Vec<String>,
    ) -> Option<&'a [String]> {
        let geometry = self.hit_geometry(hit)?;
        geometry.attributes.eval(attrib, &geometry.lookup, scratch)
    }
}

static REGISTRY: Lazy<AcceleratorRegistry> = Lazy::new(AcceleratorRegistry::new);

/// The process-wide accelerator registry
///
/// Empty until [`register_builtin_accelerators`] or a host registers
/// something.
pub fn registry() -> &'static AcceleratorRegistry {
    &REGISTRY
}

/// Register `"bvh"` and `"linear"` in the global registry
///
/// Styles a host already registered under those names are left alone, so
/// calling this again is harmless.
pub fn register_builtin_accelerators() {
    let registry = registry();
    if registry.find_factory(BvhAccelerator::STYLE).is_none() {
        registry.register_accelerator(BvhAccelerator::STYLE, BvhAccelerator::factory());
    }
    if registry.find_factory(LinearAccelerator::STYLE).is_none() {
        registry.register_accelerator(LinearAccelerator::STYLE, LinearAccelerator::factory());
    }
}
