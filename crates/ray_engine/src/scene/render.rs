//! Render-time entry point
//!
//! [`Scene`] owns the root scene graph, the render options, the material table
//! and the active accelerator. A render is bracketed by
//! [`begin_render`](Scene::begin_render) and [`end_render`](Scene::end_render);
//! in between the graph is committed and rays can be traced from any number
//! of threads when the accelerator allows it.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::{Camera, Flattened, HitPath, Material, SceneGraph};
use crate::accel::{self, Accelerator, AcceleratorError, BvhAccelerator, UpdateEvent};
use crate::batch::{Hit, HitList, Range, RayList};
use crate::config::{ConfigError, RenderOptions};
use crate::foundation::collections::FastMap;
use crate::foundation::math::Color;
use crate::object::{Object, ObjectRef, ObjectType};

/// Errors raised by [`Scene`]
#[derive(thiserror::Error, Debug)]
pub enum SceneError {
    /// The operation is not allowed between `begin_render` and `end_render`
    #[error("operation not allowed while a render is in progress")]
    RenderInProgress,

    /// The scene root must be a scene graph
    #[error("object '{0}' is not a scene graph")]
    NotASceneGraph(String),

    /// Render options failed validation
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The accelerator failed to commit or update
    #[error(transparent)]
    Accelerator(#[from] AcceleratorError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RenderState {
    Inactive,
    Rendering,
}

/// Counters for the current render
#[derive(Debug, Default)]
pub struct RenderStats {
    rays_traced: AtomicU64,
    hits_found: AtomicU64,
    shade_calls: AtomicU64,
}

/// Copy of [`RenderStats`] at one point in time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderStatsSnapshot {
    /// Rays handed to the accelerator
    pub rays_traced: u64,
    /// Of those, rays that hit something
    pub hits_found: u64,
    /// Calls to [`Scene::shade_samples`]
    pub shade_calls: u64,
}

impl RenderStats {
    fn reset(&self) {
        self.rays_traced.store(0, Ordering::Relaxed);
        self.hits_found.store(0, Ordering::Relaxed);
        self.shade_calls.store(0, Ordering::Relaxed);
    }

    fn record_trace(&self, rays: usize, hits: usize) {
        self.rays_traced.fetch_add(rays as u64, Ordering::Relaxed);
        self.hits_found.fetch_add(hits as u64, Ordering::Relaxed);
    }

    /// Current values
    pub fn snapshot(&self) -> RenderStatsSnapshot {
        RenderStatsSnapshot {
            rays_traced: self.rays_traced.load(Ordering::Relaxed),
            hits_found: self.hits_found.load(Ordering::Relaxed),
            shade_calls: self.shade_calls.load(Ordering::Relaxed),
        }
    }
}

/// Top-level scene
///
/// # Usage
/// ```
/// use ray_engine::prelude::*;
///
/// let mut scene = Scene::new("world");
/// assert!(scene.begin_render());
/// assert!(scene.is_rendering());
/// scene.end_render();
/// ```
pub struct Scene {
    root: ObjectRef,
    options: RenderOptions,
    state: RenderState,
    accelerator: Option<Box<dyn Accelerator>>,
    /// Single-level copy committed for accelerators without nested instancing
    flattened: Option<Flattened>,
    materials: RwLock<FastMap<String, Arc<Material>>>,
    stats: RenderStats,
}

impl std::fmt::Debug for Scene {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scene")
            .field("root", &self.root.name())
            .field("state", &self.state)
            .field("accelerator", &self.accelerator.as_ref().map(|a| a.name().to_string()))
            .field("flattened", &self.flattened.is_some())
            .finish_non_exhaustive()
    }
}

impl Scene {
    /// Create a scene with an empty root graph
    ///
    /// Makes sure the built-in accelerators are registered.
    pub fn new(name: &str) -> Self {
        Self::from_parts(Object::scene_graph(name))
    }

    /// Wrap an existing scene graph object
    pub fn with_root(root: ObjectRef) -> Result<Self, SceneError> {
        if root.object_type() != ObjectType::SceneGraph {
            return Err(SceneError::NotASceneGraph(root.name().to_string()));
        }
        Ok(Self::from_parts(root))
    }

    fn from_parts(root: ObjectRef) -> Self {
        accel::register_builtin_accelerators();
        Self {
            root,
            options: RenderOptions::default(),
            state: RenderState::Inactive,
            accelerator: None,
            flattened: None,
            materials: RwLock::new(FastMap::default()),
            stats: RenderStats::default(),
        }
    }

    /// Root object
    pub fn root(&self) -> &ObjectRef {
        &self.root
    }

    /// Root scene graph
    pub fn scene_graph(&self) -> Option<&SceneGraph> {
        self.root.as_scene_graph()
    }

    /// Current render options
    pub fn render_options(&self) -> &RenderOptions {
        &self.options
    }

    /// Replace the render options
    ///
    /// Changing the accelerator style, its options or the flatten policy
    /// drops the current accelerator; the next render recommits.
    pub fn set_render_options(&mut self, options: RenderOptions) -> Result<(), SceneError> {
        if self.is_rendering() {
            log::warn!("Render options are locked while rendering");
            return Err(SceneError::RenderInProgress);
        }
        options.validate()?;
        if options.accelerator != self.options.accelerator
            || options.accelerator_options != self.options.accelerator_options
            || options.flatten_instances != self.options.flatten_instances
        {
            self.accelerator = None;
            self.flattened = None;
        }
        self.options = options;
        Ok(())
    }

    /// Active accelerator, once a render has begun
    pub fn accelerator(&self) -> Option<&dyn Accelerator> {
        self.accelerator.as_deref()
    }

    /// True between `begin_render` and `end_render`
    pub fn is_rendering(&self) -> bool {
        self.state == RenderState::Rendering
    }

    /// Counters of the current or last render
    pub fn stats(&self) -> RenderStatsSnapshot {
        self.stats.snapshot()
    }

    fn create_accelerator(&self) -> Box<dyn Accelerator> {
        let registry = accel::registry();
        let style = self.options.accelerator.as_str();
        registry
            .new_accelerator(style, &self.options.accelerator_options)
            .or_else(|| {
                log::warn!("Accelerator '{}' unavailable, falling back to '{}'", style, BvhAccelerator::STYLE);
                registry.new_accelerator(BvhAccelerator::STYLE, &Default::default())
            })
            .unwrap_or_else(|| Box::new(BvhAccelerator::default()))
    }

    /// Commit `self.root` to `accelerator`, flattening if it cannot nest
    fn commit(&mut self, accelerator: &mut dyn Accelerator) -> Result<(), AcceleratorError> {
        if self.options.flatten_instances || !accelerator.nested_instancing() {
            let graph = self
                .root
                .as_scene_graph()
                .ok_or_else(|| AcceleratorError::NotASceneGraph(self.root.name().to_string()))?;
            let flattened = graph.flatten(self.root.name());
            accelerator.commit_scene(&flattened.root)?;
            self.flattened = Some(flattened);
        } else {
            accelerator.commit_scene(&self.root)?;
            self.flattened = None;
        }
        Ok(())
    }

    /// Start a render
    ///
    /// Creates and commits the accelerator if there is none yet. Returns
    /// `false` when a render is already in progress or the commit failed.
    pub fn begin_render(&mut self) -> bool {
        if self.is_rendering() {
            log::warn!("begin_render called while '{}' is already rendering", self.root.name());
            return false;
        }

        if self.accelerator.is_none() {
            let mut accelerator = self.create_accelerator();
            if let Err(e) = self.commit(accelerator.as_mut()) {
                log::error!("Failed to commit scene '{}': {}", self.root.name(), e);
                return false;
            }
            log::debug!(
                "Committed '{}' to '{}'{}",
                self.root.name(),
                accelerator.name(),
                if self.flattened.is_some() { " (flattened)" } else { "" }
            );
            self.accelerator = Some(accelerator);
        }

        self.stats.reset();
        self.state = RenderState::Rendering;
        log::info!("Render of '{}' started", self.root.name());
        true
    }

    /// Finish the render and log its counters
    pub fn end_render(&mut self) {
        if !self.is_rendering() {
            log::warn!("end_render called but '{}' is not rendering", self.root.name());
            return;
        }
        self.state = RenderState::Inactive;
        let stats = self.stats.snapshot();
        log::info!(
            "Render of '{}' finished: {} rays, {} hits, {} shade calls",
            self.root.name(),
            stats.rays_traced,
            stats.hits_found,
            stats.shade_calls
        );
    }

    fn rendering_accelerator(&self, operation: &str) -> Option<&dyn Accelerator> {
        if !self.is_rendering() {
            log::warn!("{} called outside begin_render/end_render", operation);
            return None;
        }
        self.accelerator.as_deref()
    }

    /// Find the closest hits for the rays in `range`
    ///
    /// `hits` grows to the length of `rays` if needed. Hit stacks describe the
    /// committed graph; use [`resolve_hit`](Self::resolve_hit) to map them back
    /// to the scene's own objects. Returns `false` outside a render.
    pub fn trace(&self, range: &Range, rays: &RayList, hits: &mut HitList) -> bool {
        let Some(accelerator) = self.rendering_accelerator("trace") else {
            return false;
        };
        if hits.len() < rays.len() {
            hits.resize(rays.len());
        }
        accelerator.send_rays(range, hits, rays, self.options.max_distance, self.options.min_distance);
        self.stats.record_trace(range.len(), hits.hit_count(range));
        true
    }

    /// Trace and shade the rays in `range` into `pixels`
    ///
    /// Uses the accelerator's own renderer when it has one, otherwise the
    /// headlight pass. Misses add the background colour weighted by the ray
    /// contribution. Returns `false` outside a render.
    pub fn shade_samples(&self, range: &Range, rays: &RayList, pixels: &mut [Color]) -> bool {
        let Some(accelerator) = self.rendering_accelerator("shade_samples") else {
            return false;
        };
        self.stats.shade_calls.fetch_add(1, Ordering::Relaxed);
        if accelerator.direct_rendering() && accelerator.direct_render(range, rays, pixels) {
            return true;
        }

        let mut hits = HitList::new(rays.len());
        accelerator.send_rays(range, &mut hits, rays, self.options.max_distance, self.options.min_distance);
        self.stats.record_trace(range.len(), hits.hit_count(range));
        accelerator.headlight(range, &hits, rays, pixels);

        let background = Color::from(self.options.background);
        for i in range.iter() {
            if hits[i].is_hit() {
                continue;
            }
            if let Some(pixel) = pixels.get_mut(rays.pixels()[i] as usize) {
                *pixel += rays.contributions()[i].component_mul(&background);
            }
        }
        true
    }

    /// Geometry, innermost instance and transform struck by `hit`
    ///
    /// Works for hits produced by [`trace`](Self::trace) whether or not the
    /// scene was flattened for the accelerator.
    pub fn resolve_hit(&self, hit: &Hit) -> Option<HitPath> {
        if !hit.is_hit() {
            return None;
        }
        let graph = self.scene_graph()?;
        match &self.flattened {
            Some(flattened) => {
                let [child] = hit.stack() else {
                    return None;
                };
                let source = flattened.sources.get(*child as usize)?;
                graph.resolve(&source.stack)
            }
            None => graph.resolve(hit.stack()),
        }
    }

    /// Tell the accelerator that `object` changed
    ///
    /// Rejected while rendering. Before the first render there is nothing to
    /// update and the call succeeds. Scenes committed flattened are flattened
    /// and committed again.
    pub fn update_object(&mut self, object: &ObjectRef, events: UpdateEvent) -> Result<(), SceneError> {
        if self.is_rendering() {
            log::warn!("Update of '{}' rejected while rendering", object.name());
            return Err(SceneError::RenderInProgress);
        }
        let Some(mut accelerator) = self.accelerator.take() else {
            return Ok(());
        };

        let result = if self.flattened.is_some() {
            self.commit(accelerator.as_mut())
        } else {
            accelerator.update_object(object, events)
        };
        self.accelerator = Some(accelerator);

        result.map_err(|e| {
            log::error!("Failed to update '{}' with {:?}: {}", object.name(), events, e);
            SceneError::from(e)
        })
    }

    /// Add or replace a material, returning the one it replaced
    pub fn add_material(&self, material: Material) -> Option<Arc<Material>> {
        let name = material.name.clone();
        self.materials.write().insert(name, Arc::new(material))
    }

    /// Material registered under `name`
    pub fn material(&self, name: &str) -> Option<Arc<Material>> {
        self.materials.read().get(name).cloned()
    }

    /// Remove a material
    pub fn remove_material(&self, name: &str) -> Option<Arc<Material>> {
        self.materials.write().remove(name)
    }

    /// Registered material names, sorted
    pub fn material_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.materials.read().keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Render a headlight preview image
    ///
    /// Begins a render if none is in progress and ends it again afterwards.
    /// Returns `width * height` pixels, row by row from the top, or an empty
    /// image when the scene cannot be committed.
    pub fn render_preview(&mut self, camera: &Camera, width: u32, height: u32, samples: u32) -> Vec<Color> {
        let started = !self.is_rendering();
        if started && !self.begin_render() {
            return Vec::new();
        }

        let rays = camera.generate(width, height, samples, 0);
        let mut pixels = vec![Color::zeros(); width as usize * height as usize];
        self.shade_samples(&Range::new(rays.len()), &rays, &mut pixels);

        if started {
            self.end_render();
        }
        pixels
    }
}
