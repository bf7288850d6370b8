//! # Ray Engine
//!
//! Scene description and ray intersection core for a ray tracer.
//!
//! ## Features
//!
//! - **Scene graph**: nested graphs, instances of instances, lights
//! - **Batched rays**: structure-of-arrays ray and hit lists with index ranges
//! - **Pluggable accelerators**: registry of named factories, incremental updates
//! - **Attribute evaluation**: typed, interpolated attribute lookup at hits
//!
//! ## Quick Start
//!
//! ```rust
//! use ray_engine::prelude::*;
//!
//! ray_engine::init();
//!
//! let mut scene = Scene::new("world");
//! let floor = Object::polygon_mesh(
//!     "floor",
//!     PolygonMeshData::new(
//!         vec![
//!             Point3::new(-1.0, -1.0, 0.0),
//!             Point3::new(1.0, -1.0, 0.0),
//!             Point3::new(1.0, 1.0, 0.0),
//!             Point3::new(-1.0, 1.0, 0.0),
//!         ],
//!         vec![4],
//!         vec![0, 1, 2, 3],
//!     ),
//! );
//! scene.scene_graph().unwrap().add_object(floor);
//!
//! let mut rays = RayList::new(0);
//! rays.push(
//!     Ray::new(Point3::new(0.0, 0.0, 2.0), -Vec3::z(), 0.0),
//!     Color::repeat(1.0),
//!     0,
//!     SampleState::default(),
//! );
//! let mut hits = HitList::new(rays.len());
//!
//! assert!(scene.begin_render());
//! scene.trace(&Range::new(rays.len()), &rays, &mut hits);
//! scene.end_render();
//!
//! assert!(hits[0].is_hit());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(
    clippy::module_name_repetitions,
    clippy::similar_names,
    clippy::too_many_arguments,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss
)]

pub mod accel;
pub mod batch;
pub mod config;
pub mod foundation;
pub mod object;
pub mod scene;

#[cfg(test)]
mod tests;

/// Install the default logger and register the built-in accelerators
///
/// Both steps are idempotent. Hosts with their own logger can call
/// [`accel::register_builtin_accelerators`] alone.
pub fn init() {
    foundation::logging::init();
    accel::register_builtin_accelerators();
}

/// Common imports for engine users
pub mod prelude {
    pub use crate::{
        accel::{registry, Accelerator, AcceleratorError, Factory, UpdateEvent},
        batch::{Hit, HitList, Range, Ray, RayList, SampleState},
        config::{AcceleratorOptions, Config, RenderOptions},
        foundation::math::{Aabb, Color, Mat4, Point3, Vec3},
        object::{
            AttribOwner, AttribValues, CurveMeshData, Instance, LightData, Object, ObjectRef, ObjectType,
            PolygonMeshData,
        },
        scene::{Camera, Material, Scene, SceneError, SceneGraph},
    };
}
