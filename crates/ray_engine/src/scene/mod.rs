//! Scene organisation and the render entry point
//!
//! - [`SceneGraph`]: the composite node that holds children, lights and a transform
//! - [`Scene`]: owns the root graph and the accelerator, brackets renders
//! - [`Camera`]: primary ray generation for previews
//! - [`Material`]: named surface descriptions kept by the scene

mod camera;
mod material;
mod render;
mod scene_graph;

pub use camera::Camera;
pub use material::{AlphaMode, Material};
pub use render::{RenderStats, RenderStatsSnapshot, Scene, SceneError};
pub use scene_graph::{FlatSource, Flattened, HitPath, SceneGraph, MAX_NESTING};
