//! Two-level bounding volume hierarchy accelerator
//!
//! Every committed object gets a node in a slot arena keyed by its
//! [`ObjectId`]. Geometry nodes own a per-primitive [`Bvh`]; scene graph and
//! instance nodes own a [`Bvh`] over their children or copies. Prototypes that
//! are shared by several instances are built once.
//!
//! Rays descend the hierarchy by mapping into each level's local space with the
//! inverse transform. Directions are not renormalised, so distances found deep
//! in the hierarchy compare directly with world-space distances.
//!
//! Options:
//! - `leaf_size` (int, default 4): primitives per leaf
//! - `parallel_threshold` (int, default 1024): ranges at least this long are
//!   traced on the rayon pool

use rayon::prelude::*;
use std::sync::Arc;

use super::geometry::PreparedGeometry;
use super::{Accelerator, AcceleratorError, Bvh, Factory, HitGeometry, UpdateEvent};
use crate::batch::{Hit, HitList, HitRecord, HitStack, Range, Ray, RayList};
use crate::config::AcceleratorOptions;
use crate::foundation::collections::{new_key_type, FastMap, FastSet, SlotMap};
use crate::foundation::math::{transform_normal, Aabb, Mat4, Vec3};
use crate::object::{ObjectId, ObjectKind, ObjectRef, ObjectType};
use crate::scene::MAX_NESTING;

new_key_type! {
    struct NodeKey;
}

const DEFAULT_LEAF_SIZE: usize = 4;
const DEFAULT_PARALLEL_THRESHOLD: usize = 1024;

#[derive(Debug)]
enum NodeData {
    Geometry {
        geometry: PreparedGeometry,
        blas: Bvh,
    },
    Graph {
        children: Vec<NodeKey>,
        inverse: Mat4,
        tlas: Bvh,
    },
    Instance {
        prototype: NodeKey,
        inverses: Vec<Mat4>,
        tlas: Bvh,
    },
    /// Lights and empty leaves
    Inert,
}

#[derive(Debug)]
struct Node {
    object: ObjectRef,
    /// Bounds in the parent's space
    bounds: Aabb,
    data: NodeData,
}

/// Work counters, useful to check which update path ran
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BvhStats {
    /// Per-geometry hierarchies built from scratch
    pub geometry_builds: usize,
    /// Per-geometry hierarchies refitted in place
    pub refits: usize,
    /// Passes over the graph and instance levels
    pub structure_builds: usize,
    /// Live nodes in the arena
    pub nodes: usize,
}

#[derive(Debug, Clone)]
struct Candidate {
    distance: f32,
    element: u32,
    sub_element: u32,
    u: f32,
    v: f32,
    normal: Vec3,
    stack: HitStack,
}

impl Candidate {
    fn record(&self) -> HitRecord<'_> {
        HitRecord {
            distance: self.distance,
            element: self.element,
            sub_element: self.sub_element,
            u: self.u,
            v: self.v,
            normal: self.normal,
            stack: &self.stack,
        }
    }
}

fn invert(m: &Mat4) -> Mat4 {
    m.try_inverse().unwrap_or_else(|| {
        log::warn!("Singular transform in scene, using identity");
        Mat4::identity()
    })
}

/// Bookkeeping for one pass over the committed graph
///
/// `replaced` and `inserted` record every arena change so a failed pass can
/// be undone.
#[derive(Default)]
struct SyncPass {
    dirty: FastSet<ObjectId>,
    visited: FastSet<ObjectId>,
    visiting: FastSet<ObjectId>,
    replaced: Vec<(NodeKey, Node)>,
    inserted: Vec<(ObjectId, NodeKey)>,
}

/// Bounding volume hierarchy accelerator with nested instancing
#[derive(Debug)]
pub struct BvhAccelerator {
    leaf_size: usize,
    parallel_threshold: usize,
    nodes: SlotMap<NodeKey, Node>,
    by_object: FastMap<ObjectId, NodeKey>,
    root: Option<NodeKey>,
    root_object: Option<ObjectRef>,
    stats: BvhStats,
}

impl Default for BvhAccelerator {
    fn default() -> Self {
        Self {
            leaf_size: DEFAULT_LEAF_SIZE,
            parallel_threshold: DEFAULT_PARALLEL_THRESHOLD,
            nodes: SlotMap::with_key(),
            by_object: FastMap::default(),
            root: None,
            root_object: None,
            stats: BvhStats::default(),
        }
    }
}

impl BvhAccelerator {
    /// Registry style name
    pub const STYLE: &'static str = "bvh";

    /// Create from an option bag; `None` when an option has an unusable value
    pub fn from_options(options: &AcceleratorOptions) -> Option<Self> {
        let mut accel = Self::default();
        if options.get("leaf_size").is_some() {
            match options.get_usize("leaf_size") {
                Some(size) if size > 0 => accel.leaf_size = size,
                _ => {
                    log::warn!("bvh: leaf_size must be a positive integer");
                    return None;
                }
            }
        }
        if options.get("parallel_threshold").is_some() {
            match options.get_usize("parallel_threshold") {
                Some(threshold) => accel.parallel_threshold = threshold.max(1),
                None => {
                    log::warn!("bvh: parallel_threshold must be a non-negative integer");
                    return None;
                }
            }
        }
        Some(accel)
    }

    /// Factory for the registry
    pub fn factory() -> Factory {
        Factory::new(Self::STYLE, |options| {
            Self::from_options(options).map(|accel| Box::new(accel) as Box<dyn Accelerator>)
        })
    }

    /// Work counters since creation
    pub fn stats(&self) -> BvhStats {
        self.stats
    }

    /// World bounds of the committed scene
    pub fn bounds(&self) -> Aabb {
        self.root
            .and_then(|key| self.nodes.get(key))
            .map_or_else(Aabb::empty, |node| node.bounds)
    }

    /// Rebuild graph and instance levels, reusing clean geometry nodes
    fn sync(&mut self, dirty: FastSet<ObjectId>) -> Result<(), AcceleratorError> {
        let root = self
            .root_object
            .clone()
            .ok_or_else(|| AcceleratorError::NotCommitted(Self::STYLE.to_string()))?;
        let mut pass = SyncPass {
            dirty,
            ..SyncPass::default()
        };
        let key = match self.build(&root, &mut pass, 0) {
            Ok(key) => key,
            Err(err) => {
                self.rollback(pass);
                log::warn!("bvh: sync of '{}' failed, kept previous structure: {}", root.name(), err);
                return Err(err);
            }
        };
        self.root = Some(key);

        let stale: Vec<ObjectId> = self
            .by_object
            .keys()
            .filter(|id| !pass.visited.contains(id))
            .copied()
            .collect();
        for id in stale {
            if let Some(key) = self.by_object.remove(&id) {
                self.nodes.remove(key);
            }
        }

        self.stats.structure_builds += 1;
        self.stats.nodes = self.nodes.len();
        log::debug!(
            "bvh: synced '{}' ({} nodes, {} geometry builds, {} refits)",
            root.name(),
            self.stats.nodes,
            self.stats.geometry_builds,
            self.stats.refits
        );
        Ok(())
    }

    fn rollback(&mut self, pass: SyncPass) {
        for (id, key) in pass.inserted {
            self.nodes.remove(key);
            self.by_object.remove(&id);
        }
        for (key, node) in pass.replaced.into_iter().rev() {
            if let Some(slot) = self.nodes.get_mut(key) {
                *slot = node;
            }
        }
        self.stats.nodes = self.nodes.len();
    }

    fn build(&mut self, object: &ObjectRef, pass: &mut SyncPass, depth: usize) -> Result<NodeKey, AcceleratorError> {
        let id = object.id();
        if pass.visiting.contains(&id) || depth > MAX_NESTING {
            return Err(AcceleratorError::Cycle(object.name().to_string()));
        }
        let existing = self.by_object.get(&id).copied();
        if let Some(key) = existing {
            let reusable = pass.visited.contains(&id)
                || (object.is_geometry()
                    && !pass.dirty.contains(&id)
                    && matches!(self.nodes.get(key).map(|n| &n.data), Some(NodeData::Geometry { .. })));
            if reusable {
                pass.visited.insert(id);
                return Ok(key);
            }
        }

        pass.visiting.insert(id);
        let (bounds, data) = match object.kind() {
            ObjectKind::SceneGraph(graph) => {
                let transform = graph.transform();
                let objects = graph.objects();
                let mut children = Vec::with_capacity(objects.len());
                let mut child_bounds = Vec::with_capacity(objects.len());
                for child in &objects {
                    let key = self.build(child, pass, depth + 1)?;
                    child_bounds.push(self.nodes[key].bounds);
                    children.push(key);
                }
                let tlas = Bvh::build(&child_bounds, self.leaf_size);
                let bounds = tlas.bounds().transformed(&transform);
                (
                    bounds,
                    NodeData::Graph {
                        children,
                        inverse: invert(&transform),
                        tlas,
                    },
                )
            }
            ObjectKind::Instance(instance) => {
                let prototype = self.build(&instance.prototype(), pass, depth + 1)?;
                let local = self.nodes[prototype].bounds;
                let transforms = instance.transforms();
                let copy_bounds: Vec<Aabb> = transforms.iter().map(|m| local.transformed(m)).collect();
                let tlas = Bvh::build(&copy_bounds, self.leaf_size);
                (
                    tlas.bounds(),
                    NodeData::Instance {
                        prototype,
                        inverses: transforms.iter().map(invert).collect(),
                        tlas,
                    },
                )
            }
            _ => match PreparedGeometry::prepare(object)? {
                Some(geometry) => {
                    let blas = Bvh::build(&geometry.prim_bounds(), self.leaf_size);
                    self.stats.geometry_builds += 1;
                    (blas.bounds(), NodeData::Geometry { geometry, blas })
                }
                None => (Aabb::empty(), NodeData::Inert),
            },
        };
        pass.visiting.remove(&id);
        pass.visited.insert(id);

        let node = Node {
            object: Arc::clone(object),
            bounds,
            data,
        };
        match existing.filter(|&key| self.nodes.contains_key(key)) {
            Some(key) => {
                let previous = std::mem::replace(&mut self.nodes[key], node);
                pass.replaced.push((key, previous));
                Ok(key)
            }
            None => {
                let key = self.nodes.insert(node);
                self.by_object.insert(id, key);
                pass.inserted.push((id, key));
                Ok(key)
            }
        }
    }

    /// Refit one geometry in place; `false` when its point count changed
    fn refit(&mut self, id: ObjectId) -> bool {
        let Some(node) = self.by_object.get(&id).and_then(|&key| self.nodes.get_mut(key)) else {
            return false;
        };
        let NodeData::Geometry { geometry, blas } = &mut node.data else {
            return false;
        };
        if !geometry.refresh_points() {
            return false;
        }
        blas.refit(&geometry.prim_bounds());
        node.bounds = blas.bounds();
        self.stats.refits += 1;
        true
    }

    fn trace_ray(&self, ray: &Ray, t_min: f32, t_max: f32) -> Option<Candidate> {
        let root = self.root?;
        let mut best = None;
        let mut stack = HitStack::new();
        self.intersect_node(root, ray, t_min, t_max, &Mat4::identity(), &mut stack, &mut best);
        best
    }

    /// Closest hit below `key`; `ray` is in the node's parent space
    #[allow(clippy::too_many_arguments)]
    fn intersect_node(
        &self,
        key: NodeKey,
        ray: &Ray,
        t_min: f32,
        t_max: f32,
        local_from_world: &Mat4,
        stack: &mut HitStack,
        best: &mut Option<Candidate>,
    ) -> f32 {
        let Some(node) = self.nodes.get(key) else {
            return t_max;
        };
        match &node.data {
            NodeData::Geometry { geometry, blas } => blas.traverse(ray, t_min, t_max, |prim, limit| {
                match geometry.intersect(prim, ray, t_min, limit) {
                    Some(hit) => {
                        let world = transform_normal(local_from_world, &hit.normal);
                        *best = Some(Candidate {
                            distance: hit.distance,
                            element: hit.element,
                            sub_element: hit.sub_element,
                            u: hit.u,
                            v: hit.v,
                            normal: world.try_normalize(f32::EPSILON).unwrap_or(world),
                            stack: stack.clone(),
                        });
                        hit.distance
                    }
                    None => limit,
                }
            }),
            NodeData::Graph {
                children,
                inverse,
                tlas,
            } => {
                let local = ray.transformed(inverse);
                let local_from_world = inverse * local_from_world;
                tlas.traverse(&local, t_min, t_max, |child, limit| {
                    stack.push(child);
                    let limit = self.intersect_node(
                        children[child as usize],
                        &local,
                        t_min,
                        limit,
                        &local_from_world,
                        stack,
                        best,
                    );
                    stack.pop();
                    limit
                })
            }
            NodeData::Instance {
                prototype,
                inverses,
                tlas,
            } => tlas.traverse(ray, t_min, t_max, |copy, limit| {
                let inverse = &inverses[copy as usize];
                stack.push(copy);
                let limit = self.intersect_node(
                    *prototype,
                    &ray.transformed(inverse),
                    t_min,
                    limit,
                    &(inverse * local_from_world),
                    stack,
                    best,
                );
                stack.pop();
                limit
            }),
            NodeData::Inert => t_max,
        }
    }
}

impl Accelerator for BvhAccelerator {
    fn name(&self) -> &str {
        Self::STYLE
    }

    fn commit_scene(&mut self, root: &ObjectRef) -> Result<(), AcceleratorError> {
        if root.object_type() != ObjectType::SceneGraph {
            return Err(AcceleratorError::NotASceneGraph(root.name().to_string()));
        }
        let nodes = std::mem::take(&mut self.nodes);
        let by_object = std::mem::take(&mut self.by_object);
        let previous_root = self.root.take();
        let previous_object = self.root_object.replace(Arc::clone(root));
        if let Err(err) = self.sync(FastSet::default()) {
            self.nodes = nodes;
            self.by_object = by_object;
            self.root = previous_root;
            self.root_object = previous_object;
            self.stats.nodes = self.nodes.len();
            return Err(err);
        }
        Ok(())
    }

    fn update_object(&mut self, object: &ObjectRef, event: UpdateEvent) -> Result<(), AcceleratorError> {
        if self.root_object.is_none() {
            return Err(AcceleratorError::NotCommitted(Self::STYLE.to_string()));
        }
        log::debug!("bvh: update '{}' {} with {:?}", object.name(), object.id(), event);

        let mut dirty = FastSet::default();
        let mut needs_sync = false;

        if event.intersects(UpdateEvent::STRUCTURE) {
            if object.is_geometry() && event.intersects(UpdateEvent::TOPOLOGY | UpdateEvent::NEW) {
                dirty.insert(object.id());
            }
            needs_sync = true;
        } else if event.contains(UpdateEvent::ATTRIB_P) {
            if !self.refit(object.id()) && object.is_geometry() {
                dirty.insert(object.id());
            }
            // Bounds above the geometry moved too
            needs_sync = true;
        }
        if event.contains(UpdateEvent::XFORM) {
            needs_sync = true;
        }
        if event.contains(UpdateEvent::ATTRIB) {
            if let Some(node) = self.by_object.get(&object.id()).and_then(|&key| self.nodes.get_mut(key)) {
                if let NodeData::Geometry { geometry, .. } = &mut node.data {
                    geometry.refresh_attributes();
                }
            }
        }

        if needs_sync {
            self.sync(dirty)?;
        }
        Ok(())
    }

    fn send_rays(&self, range: &Range, hits: &mut HitList, rays: &RayList, max_distance: f32, min_distance: f32) {
        if self.root.is_none() || range.is_empty() {
            return;
        }
        debug_assert!(range.extent() <= rays.len() && range.extent() <= hits.len());
        // Hits are never recorded behind the ray origin
        let min_distance = min_distance.max(0.0);

        if range.len() >= self.parallel_threshold {
            let current: &HitList = hits;
            let found: Vec<Option<Candidate>> = (0..range.len())
                .into_par_iter()
                .map(|k| {
                    let i = range.get(k);
                    self.trace_ray(&rays.ray(i), min_distance, max_distance.min(current[i].distance()))
                })
                .collect();
            for (k, candidate) in found.iter().enumerate() {
                if let Some(candidate) = candidate {
                    hits[range.get(k)].set(&candidate.record());
                }
            }
        } else {
            for i in range.iter() {
                let limit = max_distance.min(hits[i].distance());
                if let Some(candidate) = self.trace_ray(&rays.ray(i), min_distance, limit) {
                    hits[i].set(&candidate.record());
                }
            }
        }
    }

    fn thread_safe(&self) -> bool {
        true
    }

    fn nested_instancing(&self) -> bool {
        true
    }

    fn hit_geometry(&self, hit: &Hit) -> Option<HitGeometry<'_>> {
        if !hit.is_hit() {
            return None;
        }
        let mut key = self.root?;
        let mut entries = hit.stack().iter().copied();
        loop {
            let node = self.nodes.get(key)?;
            match &node.data {
                NodeData::Graph { children, .. } => key = *children.get(entries.next()? as usize)?,
                NodeData::Instance {
                    prototype, inverses, ..
                } => {
                    if entries.next()? as usize >= inverses.len() {
                        return None;
                    }
                    key = *prototype;
                }
                NodeData::Geometry { geometry, .. } => {
                    if entries.next().is_some() {
                        return None;
                    }
                    let (u, v) = hit.uv();
                    return Some(HitGeometry {
                        object: node.object.id(),
                        attributes: geometry.attributes()?,
                        lookup: geometry.lookup(hit.element(), hit.sub_element(), u, v)?,
                    });
                }
                NodeData::Inert => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::{Color, Point3};
    use crate::object::{AttribOwner, AttribValues, Instance, Object, PolygonMeshData};
    use crate::tests::fixtures::{colored_quad, quad, rays_down};
    use approx::assert_relative_eq;

    fn committed(root: &ObjectRef) -> BvhAccelerator {
        let mut accel = BvhAccelerator::default();
        accel.commit_scene(root).unwrap();
        accel
    }

    #[test]
    fn test_commit_requires_scene_graph() {
        let mut accel = BvhAccelerator::default();
        let err = accel.commit_scene(&quad("floor", 0.0, 1.0)).unwrap_err();
        assert!(matches!(err, AcceleratorError::NotASceneGraph(_)));
        assert!(matches!(
            accel.update_object(&quad("x", 0.0, 1.0), UpdateEvent::ATTRIB),
            Err(AcceleratorError::NotCommitted(_))
        ));
    }

    #[test]
    fn test_closest_of_two_layers() {
        let root = Object::scene_graph("root");
        let graph = root.as_scene_graph().unwrap();
        graph.add_object(quad("low", -5.0, 2.0));
        graph.add_object(quad("high", 0.0, 2.0));
        let accel = committed(&root);

        let rays = rays_down(&[(0.2, 0.3), (5.0, 5.0)], 10.0);
        let mut hits = HitList::new(2);
        accel.send_rays(&Range::new(2), &mut hits, &rays, f32::MAX, 0.0);

        assert!(hits[0].is_hit());
        assert_relative_eq!(hits[0].distance(), 10.0);
        assert_eq!(hits[0].stack(), &[1]);
        assert_relative_eq!(hits[0].normal().z.abs(), 1.0);
        assert!(!hits[1].is_hit());
    }

    #[test]
    fn test_send_rays_never_increases_distance() {
        let root = Object::scene_graph("root");
        root.as_scene_graph().unwrap().add_object(quad("floor", 0.0, 2.0));
        let accel = committed(&root);
        let rays = rays_down(&[(0.0, 0.0), (0.5, 0.5)], 4.0);

        let mut hits = HitList::new(2);
        hits[1].set(&HitRecord {
            distance: 1.0,
            element: 9,
            sub_element: 0,
            u: 0.0,
            v: 0.0,
            normal: Vec3::z(),
            stack: &[7],
        });
        for _ in 0..2 {
            accel.send_rays(&Range::new(2), &mut hits, &rays, f32::MAX, 0.0);
            assert_relative_eq!(hits[0].distance(), 4.0);
            assert_relative_eq!(hits[1].distance(), 1.0);
            assert_eq!(hits[1].element(), 9);
        }

        let mut limited = HitList::new(2);
        accel.send_rays(&Range::new(2), &mut limited, &rays, 3.0, 0.0);
        assert_eq!(limited.hit_count(&Range::new(2)), 0);
        accel.send_rays(&Range::new(2), &mut limited, &rays, f32::MAX, 4.5);
        assert_eq!(limited.hit_count(&Range::new(2)), 0);
    }

    #[test]
    fn test_negative_min_distance_ignores_hits_behind() {
        let root = Object::scene_graph("root");
        root.as_scene_graph().unwrap().add_object(quad("floor", 0.0, 2.0));
        let serial = committed(&root);
        let mut parallel = BvhAccelerator::from_options(&AcceleratorOptions::new().with("parallel_threshold", 1_i64))
            .unwrap();
        parallel.commit_scene(&root).unwrap();

        // The floor is one unit behind the first ray and two in front of the second
        let mut rays = rays_down(&[(0.0, 0.0)], -1.0);
        rays.push(
            Ray::new(Point3::new(0.5, 0.5, 2.0), -Vec3::z(), 0.0),
            Color::repeat(1.0),
            1,
            crate::batch::SampleState::new(1),
        );
        for accel in [&serial, &parallel] {
            let mut hits = HitList::new(2);
            accel.send_rays(&Range::new(2), &mut hits, &rays, f32::MAX, -5.0);
            assert!(!hits[0].is_hit());
            assert!(hits[1].is_hit());
            assert_relative_eq!(hits[1].distance(), 2.0);
            assert!(hits[1].validate());
        }
    }

    #[test]
    fn test_nested_instance_stack_and_transform() {
        let leaf = quad("leaf", 0.0, 0.5);
        let row = Object::instance(
            "row",
            Instance::new(
                Arc::clone(&leaf),
                vec![Mat4::identity(), Mat4::new_translation(&Vec3::new(2.0, 0.0, 0.0))],
            ),
        );
        let proto = Object::scene_graph("proto");
        proto.as_scene_graph().unwrap().add_object(row);
        let grid = Object::instance(
            "grid",
            Instance::new(
                proto,
                vec![
                    Mat4::identity(),
                    Mat4::new_translation(&Vec3::new(0.0, 3.0, -1.0)) * Mat4::new_scaling(2.0),
                ],
            ),
        );
        let root = Object::scene_graph("root");
        let graph = root.as_scene_graph().unwrap();
        graph.add_object(Object::light("key", Default::default()));
        graph.add_object(grid);
        let accel = committed(&root);

        // Second row copy inside the scaled grid copy sits at x = 4, y = 3, z = -1
        let rays = rays_down(&[(4.0, 3.0)], 5.0);
        let mut hits = HitList::new(1);
        accel.send_rays(&Range::new(1), &mut hits, &rays, f32::MAX, 0.0);

        assert!(hits[0].is_hit());
        assert_eq!(hits[0].stack(), &[1, 1, 0, 1]);
        assert_relative_eq!(hits[0].distance(), 6.0, epsilon = 1e-5);
        assert_relative_eq!(hits[0].normal().norm(), 1.0, epsilon = 1e-5);

        let path = graph.resolve(hits[0].stack()).unwrap();
        assert!(Arc::ptr_eq(&path.geometry, &leaf));
        assert_eq!(path.instance.map(|(_, copy)| copy), Some(1));
        assert_eq!(accel.hit_geometry(&hits[0]).map(|g| g.object), Some(leaf.id()));
        assert_eq!(accel.stats().geometry_builds, 1, "shared prototype built once");
    }

    #[test]
    fn test_root_transform_applies() {
        let root = Object::scene_graph("root");
        let graph = root.as_scene_graph().unwrap();
        graph.add_object(quad("floor", 0.0, 1.0));
        graph.set_transform(Mat4::new_translation(&Vec3::new(10.0, 0.0, 0.0)));
        let accel = committed(&root);
        assert_relative_eq!(accel.bounds().min, Point3::new(9.0, -1.0, 0.0));

        let rays = rays_down(&[(0.0, 0.0), (10.0, 0.0)], 1.0);
        let mut hits = HitList::new(2);
        accel.send_rays(&Range::new(2), &mut hits, &rays, f32::MAX, 0.0);
        assert!(!hits[0].is_hit());
        assert!(hits[1].is_hit());
    }

    #[test]
    fn test_attrib_p_refits_without_rebuild() {
        let floor = quad("floor", 0.0, 1.0);
        let root = Object::scene_graph("root");
        root.as_scene_graph().unwrap().add_object(Arc::clone(&floor));
        let mut accel = committed(&root);
        let before = accel.stats();

        floor
            .as_polygon_mesh()
            .unwrap()
            .write()
            .points
            .iter_mut()
            .for_each(|p| p.z = 2.0);
        accel.update_object(&floor, UpdateEvent::ATTRIB_P).unwrap();

        let after = accel.stats();
        assert_eq!(after.refits, before.refits + 1);
        assert_eq!(after.geometry_builds, before.geometry_builds);

        let rays = rays_down(&[(0.0, 0.0)], 5.0);
        let mut hits = HitList::new(1);
        accel.send_rays(&Range::new(1), &mut hits, &rays, f32::MAX, 0.0);
        assert_relative_eq!(hits[0].distance(), 3.0);
    }

    #[test]
    fn test_topology_update_rebuilds() {
        let floor = quad("floor", 0.0, 1.0);
        let root = Object::scene_graph("root");
        root.as_scene_graph().unwrap().add_object(Arc::clone(&floor));
        let mut accel = committed(&root);
        let rays = rays_down(&[(3.0, 0.0)], 5.0);

        let mut hits = HitList::new(1);
        accel.send_rays(&Range::new(1), &mut hits, &rays, f32::MAX, 0.0);
        assert!(!hits[0].is_hit());

        *floor.as_polygon_mesh().unwrap().write() = PolygonMeshData::new(
            vec![
                Point3::new(0.0, -1.0, 0.0),
                Point3::new(4.0, -1.0, 0.0),
                Point3::new(4.0, 1.0, 0.0),
                Point3::new(0.0, 1.0, 0.0),
                Point3::new(2.0, 3.0, 0.0),
            ],
            vec![3, 3],
            vec![0, 1, 2, 0, 2, 3],
        );
        accel.update_object(&floor, UpdateEvent::TOPOLOGY).unwrap();
        accel.send_rays(&Range::new(1), &mut hits, &rays, f32::MAX, 0.0);
        assert!(hits[0].is_hit());
        assert_eq!(hits[0].element(), 0);
    }

    #[test]
    fn test_contents_update_adds_child() {
        let root = Object::scene_graph("root");
        let graph = root.as_scene_graph().unwrap();
        graph.add_object(quad("a", 0.0, 1.0));
        let mut accel = committed(&root);

        graph.add_object(quad("b", 1.0, 1.0));
        accel.update_object(&root, UpdateEvent::CONTENTS).unwrap();

        let rays = rays_down(&[(0.0, 0.0)], 5.0);
        let mut hits = HitList::new(1);
        accel.send_rays(&Range::new(1), &mut hits, &rays, f32::MAX, 0.0);
        assert_eq!(hits[0].stack(), &[1]);
        assert_eq!(accel.stats().geometry_builds, 2);
    }

    #[test]
    fn test_xform_moves_instance_hits() {
        let copies = Object::instance("copies", Instance::new(quad("tile", 0.0, 0.5), vec![Mat4::identity()]));
        let root = Object::scene_graph("root");
        root.as_scene_graph().unwrap().add_object(Arc::clone(&copies));
        let mut accel = committed(&root);
        let rays = rays_down(&[(0.0, 0.0), (5.0, 0.0)], 5.0);

        let mut hits = HitList::new(2);
        accel.send_rays(&Range::new(2), &mut hits, &rays, f32::MAX, 0.0);
        assert!(hits[0].is_hit());
        assert!(!hits[1].is_hit());

        copies
            .as_instance()
            .unwrap()
            .set_transforms(vec![Mat4::new_translation(&Vec3::new(5.0, 0.0, 0.0))]);
        accel.update_object(&copies, UpdateEvent::XFORM).unwrap();
        assert_relative_eq!(accel.bounds().max, Point3::new(5.5, 0.5, 0.0));

        let mut hits = HitList::new(2);
        accel.send_rays(&Range::new(2), &mut hits, &rays, f32::MAX, 0.0);
        assert!(!hits[0].is_hit());
        assert!(hits[1].is_hit());
        assert_relative_eq!(hits[1].distance(), 5.0);
        assert_eq!(hits[1].stack(), &[0, 0]);

        // A graph transform moves everything below it
        root.as_scene_graph()
            .unwrap()
            .set_transform(Mat4::new_translation(&Vec3::new(0.0, 0.0, 2.0)));
        accel.update_object(&root, UpdateEvent::XFORM).unwrap();
        let mut hits = HitList::new(2);
        accel.send_rays(&Range::new(2), &mut hits, &rays, f32::MAX, 0.0);
        assert_relative_eq!(hits[1].distance(), 3.0);
        assert_eq!(accel.stats().geometry_builds, 1);
    }

    #[test]
    fn test_delete_drops_child_node() {
        let removed = quad("b", 1.0, 1.0);
        let root = Object::scene_graph("root");
        let graph = root.as_scene_graph().unwrap();
        graph.add_object(quad("a", 0.0, 1.0));
        graph.add_object(Arc::clone(&removed));
        let mut accel = committed(&root);
        let nodes = accel.stats().nodes;
        let rays = rays_down(&[(0.0, 0.0)], 5.0);

        let mut hits = HitList::new(1);
        accel.send_rays(&Range::new(1), &mut hits, &rays, f32::MAX, 0.0);
        assert_eq!(hits[0].stack(), &[1]);

        assert!(graph.remove_object(&removed));
        accel.update_object(&removed, UpdateEvent::DELETE).unwrap();
        assert_eq!(accel.stats().nodes, nodes - 1);

        let mut hits = HitList::new(1);
        accel.send_rays(&Range::new(1), &mut hits, &rays, f32::MAX, 0.0);
        assert_eq!(hits[0].stack(), &[0]);
        assert_relative_eq!(hits[0].distance(), 5.0);
    }

    #[test]
    fn test_failed_sync_keeps_previous_structure() {
        let group = Object::scene_graph("group");
        group.as_scene_graph().unwrap().add_object(quad("floor", 0.0, 1.0));
        let copies = Object::instance(
            "copies",
            Instance::new(quad("tile", 1.0, 0.5), vec![Mat4::new_translation(&Vec3::new(3.0, 0.0, 0.0))]),
        );
        let root = Object::scene_graph("root");
        let graph = root.as_scene_graph().unwrap();
        graph.add_object(group);
        graph.add_object(Arc::clone(&copies));
        let mut accel = committed(&root);
        let nodes = accel.stats().nodes;

        let rays = rays_down(&[(0.0, 0.0), (3.0, 0.0)], 5.0);
        let mut expected = HitList::new(2);
        accel.send_rays(&Range::new(2), &mut expected, &rays, f32::MAX, 0.0);
        assert_eq!(expected[0].stack(), &[0, 0]);
        assert_eq!(expected[1].stack(), &[1, 0]);
        assert_relative_eq!(expected[1].distance(), 4.0);

        // Point the instance back at the root; the group level syncs before the cycle is found
        let instance = copies.as_instance().unwrap();
        let tile = instance.prototype();
        instance.set_prototype(Arc::clone(&root));
        assert!(matches!(
            accel.update_object(&copies, UpdateEvent::PROTOTYPE),
            Err(AcceleratorError::Cycle(_))
        ));
        assert_eq!(accel.stats().nodes, nodes);

        let mut hits = HitList::new(2);
        accel.send_rays(&Range::new(2), &mut hits, &rays, f32::MAX, 0.0);
        assert_eq!(hits, expected);
        assert_eq!(accel.hit_geometry(&hits[1]).map(|g| g.object), Some(tile.id()));

        instance.set_prototype(Arc::clone(&tile));
        accel.update_object(&copies, UpdateEvent::PROTOTYPE).unwrap();

        let cyclic = Object::scene_graph("cyclic");
        cyclic.as_scene_graph().unwrap().add_object(Arc::clone(&cyclic));
        assert!(matches!(accel.commit_scene(&cyclic), Err(AcceleratorError::Cycle(_))));
        assert!(cyclic.as_scene_graph().unwrap().remove_object(&cyclic));

        let mut hits = HitList::new(2);
        accel.send_rays(&Range::new(2), &mut hits, &rays, f32::MAX, 0.0);
        assert_eq!(hits, expected);
        assert_eq!(accel.stats().nodes, nodes);
    }

    #[test]
    fn test_parallel_matches_serial() {
        let root = Object::scene_graph("root");
        let graph = root.as_scene_graph().unwrap();
        for i in 0..4 {
            graph.add_object(quad(&format!("q{i}"), i as f32 * -0.5, 1.0 + i as f32));
        }
        let serial = committed(&root);
        let mut parallel = BvhAccelerator::from_options(&AcceleratorOptions::new().with("parallel_threshold", 1_i64))
            .unwrap();
        parallel.commit_scene(&root).unwrap();

        let points: Vec<(f32, f32)> = (0..64).map(|i| ((i % 8) as f32 - 4.0, (i / 8) as f32 - 4.0)).collect();
        let rays = rays_down(&points, 3.0);
        let mut a = HitList::new(64);
        let mut b = HitList::new(64);
        serial.send_rays(&Range::new(64), &mut a, &rays, f32::MAX, 0.0);
        parallel.send_rays(&Range::new(64), &mut b, &rays, f32::MAX, 0.0);
        assert_eq!(a, b);
        assert!(a.hit_count(&Range::new(64)) > 0);
    }

    #[test]
    fn test_eval_attributes_at_hit() {
        let floor = colored_quad("floor", 0.0, 1.0, Color::new(1.0, 0.0, 0.0));
        {
            let mesh = floor.as_polygon_mesh().unwrap();
            let mut data = mesh.write();
            let heights = data.points.iter().map(|p| p.x + 1.0).collect();
            data.set_attribute("height", AttribOwner::Point, 1, AttribValues::Fp32(heights))
                .unwrap();
            data.set_attribute("id", AttribOwner::Primitive, 1, AttribValues::Int32(vec![42]))
                .unwrap();
        }
        let root = Object::scene_graph("root");
        root.as_scene_graph().unwrap().add_object(Arc::clone(&floor));
        let accel = committed(&root);

        let rays = rays_down(&[(0.5, -0.25)], 1.0);
        let mut hits = HitList::new(1);
        accel.send_rays(&Range::new(1), &mut hits, &rays, f32::MAX, 0.0);
        let list = accel.attrib_list(&hits[0]).unwrap();

        let mut floats = Vec::new();
        let cd = accel
            .eval_attribute_f32(&hits[0], list.display_color().unwrap(), &mut floats)
            .unwrap();
        assert_eq!(cd, &[1.0, 0.0, 0.0]);

        let mut floats = Vec::new();
        let height = accel
            .eval_attribute_f32(&hits[0], list.find("height").unwrap(), &mut floats)
            .unwrap();
        assert_relative_eq!(height[0], 1.5, epsilon = 1e-5);

        let mut ints = Vec::new();
        let id = accel.eval_attribute_i32(&hits[0], list.find("id").unwrap(), &mut ints).unwrap();
        assert_eq!(id, &[42]);
        let mut wrong = Vec::new();
        assert!(accel.eval_attribute_i64(&hits[0], list.find("id").unwrap(), &mut wrong).is_none());
    }

    #[test]
    fn test_factory_rejects_bad_options() {
        let factory = BvhAccelerator::factory();
        assert!(factory.create(&AcceleratorOptions::new().with("leaf_size", 0_i64)).is_none());
        assert!(factory.create(&AcceleratorOptions::new().with("leaf_size", "big")).is_none());
        let accel = factory.create(&AcceleratorOptions::new().with("leaf_size", 2_i64)).unwrap();
        assert_eq!(accel.name(), "bvh");
        assert!(accel.nested_instancing());
    }
}
