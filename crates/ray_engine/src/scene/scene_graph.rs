//! Composite scene graph
//!
//! A [`SceneGraph`] is the payload of an [`Object`] of type
//! [`ObjectType::SceneGraph`]: an ordered list of children, a light set and a
//! transform applied to everything it contains. Graphs nest, and instances
//! may use a graph as their prototype.
//!
//! Hit stacks produced by accelerators are paths through this structure:
//! a graph level contributes the index of the child entered, an instance level
//! contributes the index of the copy entered. [`SceneGraph::resolve`] walks a
//! path back to the struck geometry.

use parking_lot::Mutex;
use std::sync::{Arc, Weak};

use crate::batch::{HitStack, Ray};
use crate::foundation::math::{transform_normal, Aabb, Mat4};
use crate::object::{
    AttribSet, GenericHit, GenericPrimitive, Object, ObjectId, ObjectKind, ObjectRef, ObjectType,
};

/// Deepest graph/instance nesting followed before a path is abandoned
pub const MAX_NESTING: usize = 64;

#[derive(Debug)]
struct GraphInner {
    objects: Vec<ObjectRef>,
    lights: Vec<(ObjectId, Weak<Object>)>,
    transform: Mat4,
}

/// Children, lights and transform of a scene graph object
#[derive(Debug)]
pub struct SceneGraph {
    owner: Weak<Object>,
    inner: Mutex<GraphInner>,
}

/// Geometry reached by a hit stack
#[derive(Debug, Clone)]
pub struct HitPath {
    /// Leaf geometry object
    pub geometry: ObjectRef,
    /// Innermost instance on the path and the copy index entered
    pub instance: Option<(ObjectRef, u32)>,
    /// Geometry space to world space
    pub transform: Mat4,
}

/// Origin of one child of a flattened graph
#[derive(Debug, Clone)]
pub struct FlatSource {
    /// Geometry object the copy was baked from
    pub object: ObjectRef,
    /// Path to that object in the source graph
    pub stack: HitStack,
    /// Transform baked into the copy
    pub transform: Mat4,
}

/// Result of [`SceneGraph::flatten`]
#[derive(Debug)]
pub struct Flattened {
    /// Single-level graph of baked geometry and lights
    pub root: ObjectRef,
    /// Source of each geometry child, indexed like the children of `root`
    pub sources: Vec<FlatSource>,
}

impl SceneGraph {
    pub(crate) fn new(owner: Weak<Object>) -> Self {
        Self {
            owner,
            inner: Mutex::new(GraphInner {
                objects: Vec::new(),
                lights: Vec::new(),
                transform: Mat4::identity(),
            }),
        }
    }

    /// The object this graph belongs to
    pub fn owner(&self) -> Option<ObjectRef> {
        self.owner.upgrade()
    }

    /// Append a child and make this graph its parent
    ///
    /// Returns the child index, which is what hit stacks record.
    pub fn add_object(&self, object: ObjectRef) -> usize {
        object.set_parent_weak(self.owner.clone());
        let mut inner = self.inner.lock();
        inner.objects.push(object);
        inner.objects.len() - 1
    }

    /// Remove a child, clearing its parent and dropping it from the light set
    ///
    /// Later children shift down one place, so hit stacks recorded before the
    /// removal go stale. Notify with `DELETE` afterwards.
    pub fn remove_object(&self, object: &ObjectRef) -> bool {
        let mut inner = self.inner.lock();
        let Some(index) = inner.objects.iter().position(|child| Arc::ptr_eq(child, object)) else {
            return false;
        };
        let removed = inner.objects.remove(index);
        inner.lights.retain(|(id, _)| *id != object.id());
        drop(inner);
        removed.set_parent(None);
        true
    }

    /// Register a light that is already reachable from this graph
    ///
    /// Returns `false`, and leaves the light set unchanged, when `light` is not
    /// a light or is not a child of this graph or of a nested graph.
    pub fn add_light(&self, light: &ObjectRef) -> bool {
        if light.object_type() != ObjectType::Light {
            log::warn!("Object '{}' {} is not a light", light.name(), light.id());
            return false;
        }
        if !self.contains(light.id()) {
            log::warn!(
                "Light '{}' {} is not part of the graph, add it as an object first",
                light.name(),
                light.id()
            );
            return false;
        }
        let mut inner = self.inner.lock();
        if !inner.lights.iter().any(|(id, _)| *id == light.id()) {
            inner.lights.push((light.id(), Arc::downgrade(light)));
        }
        true
    }

    /// Remove a light from the light set; the object stays a child
    pub fn erase_light(&self, light: &ObjectRef) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.lights.len();
        inner.lights.retain(|(id, _)| *id != light.id());
        inner.lights.len() != before
    }

    /// True when `id` is a child of this graph or of a nested graph
    pub fn contains(&self, id: ObjectId) -> bool {
        self.contains_at(id, 0)
    }

    fn contains_at(&self, id: ObjectId, depth: usize) -> bool {
        if depth > MAX_NESTING {
            log::warn!("Nesting deeper than {} levels while searching for {}", MAX_NESTING, id);
            return false;
        }
        self.objects().iter().any(|child| {
            child.id() == id || child.as_scene_graph().is_some_and(|graph| graph.contains_at(id, depth + 1))
        })
    }

    /// True when `id` is in this graph's own light set
    pub fn has_light(&self, id: ObjectId) -> bool {
        self.inner.lock().lights.iter().any(|(light, _)| *light == id)
    }

    /// Snapshot of the children
    pub fn objects(&self) -> Vec<ObjectRef> {
        self.inner.lock().objects.clone()
    }

    /// Child at `index`
    pub fn object(&self, index: usize) -> Option<ObjectRef> {
        self.inner.lock().objects.get(index).cloned()
    }

    /// Live lights of the light set
    pub fn lights(&self) -> Vec<ObjectRef> {
        self.inner
            .lock()
            .lights
            .iter()
            .filter_map(|(_, light)| light.upgrade())
            .collect()
    }

    /// Number of children
    pub fn size(&self) -> usize {
        self.inner.lock().objects.len()
    }

    /// Number of registered lights
    pub fn light_count(&self) -> usize {
        self.inner.lock().lights.len()
    }

    /// Transform applied to every child
    pub fn transform(&self) -> Mat4 {
        self.inner.lock().transform
    }

    /// Replace the transform; notify with `XFORM` afterwards
    pub fn set_transform(&self, transform: Mat4) {
        self.inner.lock().transform = transform;
    }

    /// Walk a hit stack from this graph down to the struck geometry
    pub fn resolve(&self, stack: &[u32]) -> Option<HitPath> {
        let mut node = self.owner.upgrade()?;
        let mut transform = Mat4::identity();
        let mut instance = None;
        let mut entries = stack.iter().copied();

        loop {
            if node.is_geometry() {
                if entries.next().is_some() {
                    return None;
                }
                return Some(HitPath {
                    geometry: node,
                    instance,
                    transform,
                });
            }
            let next = match node.kind() {
                ObjectKind::SceneGraph(graph) => {
                    let index = entries.next()?;
                    transform *= graph.transform();
                    graph.object(index as usize)?
                }
                ObjectKind::Instance(inst) => {
                    let copy = entries.next()?;
                    transform *= *inst.transforms().get(copy as usize)?;
                    instance = Some((Arc::clone(&node), copy));
                    inst.prototype()
                }
                _ => return None,
            };
            node = next;
        }
    }

    /// Geometry object named by a hit stack
    pub fn find_geometry(&self, stack: &[u32]) -> Option<ObjectRef> {
        self.resolve(stack).map(|path| path.geometry)
    }

    /// Innermost instance named by a hit stack, with the copy index entered
    pub fn find_instance(&self, stack: &[u32]) -> Option<(ObjectRef, u32)> {
        self.resolve(stack).and_then(|path| path.instance)
    }

    /// Single-level copy with every graph and instance transform baked in
    ///
    /// Meshes and curves get transformed points, generic primitives are
    /// wrapped so rays are mapped into their space. Lights are copied with
    /// transformed position and direction; those registered in their graph are
    /// registered in the result.
    pub fn flatten(&self, name: &str) -> Flattened {
        let mut leaves = Vec::new();
        let mut lights = Vec::new();
        let mut stack = HitStack::new();
        let transform = self.transform();
        for (index, child) in self.objects().iter().enumerate() {
            stack.push(index as u32);
            collect_leaves(child, transform, self.has_light(child.id()), &mut stack, 1, &mut leaves, &mut lights);
            stack.pop();
        }

        let root = Object::scene_graph(name);
        let mut sources = Vec::with_capacity(leaves.len());
        if let Some(graph) = root.as_scene_graph() {
            for source in leaves {
                graph.add_object(bake(&source));
                sources.push(source);
            }
            for (light, transform, registered) in lights {
                let copy = bake_light(&light, &transform);
                graph.add_object(Arc::clone(&copy));
                if registered {
                    graph.add_light(&copy);
                }
            }
        }
        log::debug!("Flattened graph into '{}' with {} geometry children", name, sources.len());
        Flattened { root, sources }
    }
}

fn collect_leaves(
    node: &ObjectRef,
    transform: Mat4,
    registered: bool,
    stack: &mut HitStack,
    depth: usize,
    leaves: &mut Vec<FlatSource>,
    lights: &mut Vec<(ObjectRef, Mat4, bool)>,
) {
    if depth > MAX_NESTING {
        log::warn!("Nesting deeper than {} levels under '{}', skipped", MAX_NESTING, node.name());
        return;
    }
    match node.kind() {
        ObjectKind::SceneGraph(graph) => {
            let inner = transform * graph.transform();
            for (index, child) in graph.objects().iter().enumerate() {
                stack.push(index as u32);
                collect_leaves(child, inner, graph.has_light(child.id()), stack, depth + 1, leaves, lights);
                stack.pop();
            }
        }
        ObjectKind::Instance(instance) => {
            let prototype = instance.prototype();
            for (copy, xform) in instance.transforms().iter().enumerate() {
                stack.push(copy as u32);
                collect_leaves(&prototype, transform * xform, false, stack, depth + 1, leaves, lights);
                stack.pop();
            }
        }
        ObjectKind::Light(_) => lights.push((Arc::clone(node), transform, registered)),
        ObjectKind::PolygonMesh(_) | ObjectKind::CurveMesh(_) | ObjectKind::Generic(_) => {
            leaves.push(FlatSource {
                object: Arc::clone(node),
                stack: stack.clone(),
                transform,
            });
        }
    }
}

fn bake(source: &FlatSource) -> ObjectRef {
    let object = &source.object;
    let m = &source.transform;
    match object.kind() {
        ObjectKind::PolygonMesh(mesh) => {
            let mut data = mesh.read().clone();
            data.points.iter_mut().for_each(|p| *p = m.transform_point(p));
            Object::polygon_mesh(object.name(), data)
        }
        ObjectKind::CurveMesh(curves) => {
            let mut data = curves.read().clone();
            data.points.iter_mut().for_each(|p| *p = m.transform_point(p));
            // Widths follow the mean scale; non-uniform scaling cannot be baked exactly
            let scale = m.fixed_view::<3, 3>(0, 0).determinant().abs().cbrt();
            data.widths.iter_mut().for_each(|w| *w *= scale);
            Object::curve_mesh(object.name(), data)
        }
        _ => Object::generic(object.name(), TransformedPrimitive::new(Arc::clone(object), *m)),
    }
}

fn bake_light(light: &ObjectRef, m: &Mat4) -> ObjectRef {
    let mut data = light.as_light().map(|l| l.data()).unwrap_or_default();
    data.position = m.transform_point(&data.position);
    let direction = m.transform_vector(&data.direction);
    if direction.norm_squared() > 0.0 {
        data.direction = direction.normalize();
    }
    Object::light(light.name(), data)
}

/// A generic object seen through a transform
#[derive(Debug)]
struct TransformedPrimitive {
    source: ObjectRef,
    to_world: Mat4,
    to_local: Mat4,
}

impl TransformedPrimitive {
    fn new(source: ObjectRef, to_world: Mat4) -> Self {
        let to_local = to_world.try_inverse().unwrap_or_else(Mat4::identity);
        Self {
            source,
            to_world,
            to_local,
        }
    }

    fn inner(&self) -> Option<&dyn GenericPrimitive> {
        self.source.as_generic().map(|g| g.primitive())
    }
}

impl GenericPrimitive for TransformedPrimitive {
    fn bounds(&self) -> Aabb {
        self.inner()
            .map_or_else(Aabb::empty, |p| p.bounds().transformed(&self.to_world))
    }

    fn intersect(&self, ray: &Ray, t_min: f32, t_max: f32) -> Option<GenericHit> {
        let local = ray.transformed(&self.to_local);
        let mut hit = self.inner()?.intersect(&local, t_min, t_max)?;
        hit.normal = transform_normal(&self.to_local, &hit.normal);
        Some(hit)
    }

    fn attributes(&self) -> Option<&AttribSet> {
        self.inner()?.attributes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::{Point3, Vec3};
    use crate::object::{Instance, LightData, PolygonMeshData};
    use approx::assert_relative_eq;

    fn triangle(name: &str) -> ObjectRef {
        Object::polygon_mesh(
            name,
            PolygonMeshData::new(
                vec![Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 0.0, 0.0), Point3::new(0.0, 1.0, 0.0)],
                vec![3],
                vec![0, 1, 2],
            ),
        )
    }

    #[test]
    fn test_mesh_and_light() {
        let root = Object::scene_graph("root");
        let graph = root.as_scene_graph().unwrap();
        let mesh = triangle("tri");
        let light = Object::light("key", LightData::default());

        graph.add_object(Arc::clone(&mesh));
        assert!(!graph.add_light(&light), "unreachable light must be rejected");
        graph.add_object(Arc::clone(&light));
        assert!(graph.add_light(&light));
        assert!(graph.add_light(&light));

        assert_eq!(graph.size(), 2);
        assert_eq!(graph.light_count(), 1);
        assert_eq!(mesh.parent().map(|p| p.id()), Some(root.id()));
        assert!(!graph.add_light(&mesh));

        assert!(graph.erase_light(&light));
        assert_eq!(graph.light_count(), 0);
        assert_eq!(graph.size(), 2);
    }

    #[test]
    fn test_remove_object_clears_parent_and_light() {
        let root = Object::scene_graph("root");
        let graph = root.as_scene_graph().unwrap();
        let mesh = triangle("tri");
        let light = Object::light("key", LightData::default());
        graph.add_object(Arc::clone(&light));
        graph.add_object(Arc::clone(&mesh));
        graph.add_light(&light);

        assert!(graph.remove_object(&light));
        assert!(!graph.remove_object(&light));
        assert_eq!(graph.size(), 1);
        assert_eq!(graph.light_count(), 0);
        assert!(light.parent().is_none());
        assert!(Arc::ptr_eq(&graph.object(0).unwrap(), &mesh));
    }

    #[test]
    fn test_cyclic_graph_stops_at_nesting_limit() {
        let root = Object::scene_graph("root");
        let graph = root.as_scene_graph().unwrap();
        let mesh = triangle("tri");
        graph.add_object(Arc::clone(&mesh));
        graph.add_object(Arc::clone(&root));

        assert!(graph.contains(mesh.id()));
        assert!(!graph.contains(triangle("elsewhere").id()));
        let bounds = root.bounds();
        assert_relative_eq!(bounds.max, Point3::new(1.0, 1.0, 0.0));

        // Break the reference cycle so the graph is dropped
        assert!(graph.remove_object(&root));
    }

    #[test]
    fn test_light_in_nested_graph_is_reachable() {
        let root = Object::scene_graph("root");
        let sub = Object::scene_graph("sub");
        let light = Object::light("rim", LightData::default());
        sub.as_scene_graph().unwrap().add_object(Arc::clone(&light));
        root.as_scene_graph().unwrap().add_object(sub);
        assert!(root.as_scene_graph().unwrap().add_light(&light));
    }

    #[test]
    fn test_resolve_nested_instances() {
        let mesh = triangle("leaf");
        let inner = Object::instance(
            "inner",
            Instance::new(
                Arc::clone(&mesh),
                vec![Mat4::identity(), Mat4::new_translation(&Vec3::new(0.0, 5.0, 0.0))],
            ),
        );
        let proto = Object::scene_graph("proto");
        proto.as_scene_graph().unwrap().add_object(Arc::clone(&inner));
        let outer = Object::instance(
            "outer",
            Instance::new(proto, vec![Mat4::new_translation(&Vec3::new(10.0, 0.0, 0.0))]),
        );
        let root = Object::scene_graph("root");
        let graph = root.as_scene_graph().unwrap();
        graph.add_object(triangle("other"));
        graph.add_object(outer);

        let path = graph.resolve(&[1, 0, 0, 1]).unwrap();
        assert!(Arc::ptr_eq(&path.geometry, &mesh));
        let (instance, copy) = path.instance.unwrap();
        assert!(Arc::ptr_eq(&instance, &inner));
        assert_eq!(copy, 1);
        assert_relative_eq!(path.transform.transform_point(&Point3::origin()), Point3::new(10.0, 5.0, 0.0));

        assert!(graph.find_instance(&[0]).is_none());
        assert_eq!(graph.find_geometry(&[0]).map(|g| g.name().to_string()), Some("other".to_string()));
        assert!(graph.find_geometry(&[1, 0, 0, 2]).is_none());
        assert!(graph.find_geometry(&[1, 0]).is_none());
    }

    #[test]
    fn test_flatten_bakes_transforms() {
        let mesh = triangle("leaf");
        let instance = Object::instance(
            "copies",
            Instance::new(
                mesh,
                vec![Mat4::new_translation(&Vec3::new(2.0, 0.0, 0.0)), Mat4::new_scaling(3.0)],
            ),
        );
        let light = Object::light("sun", LightData::point(Point3::new(0.0, 1.0, 0.0), Vec3::repeat(1.0), 1.0));
        let root = Object::scene_graph("root");
        let graph = root.as_scene_graph().unwrap();
        graph.set_transform(Mat4::new_translation(&Vec3::new(0.0, 0.0, -1.0)));
        graph.add_object(instance);
        graph.add_object(Arc::clone(&light));
        graph.add_light(&light);

        let flat = graph.flatten("flat");
        let flat_graph = flat.root.as_scene_graph().unwrap();
        assert_eq!(flat.sources.len(), 2);
        assert_eq!(flat_graph.size(), 3);
        assert_eq!(flat_graph.light_count(), 1);
        assert_eq!(flat.sources[1].stack.as_slice(), &[0, 1]);

        let baked = flat_graph.object(0).unwrap();
        let points = baked.as_polygon_mesh().unwrap().read().points.clone();
        assert_relative_eq!(points[1], Point3::new(3.0, 0.0, -1.0));
        let scaled = flat_graph.object(1).unwrap();
        assert_relative_eq!(scaled.as_polygon_mesh().unwrap().read().points[2], Point3::new(0.0, 3.0, -1.0));

        let moved_light = flat_graph.lights()[0].as_light().unwrap().data();
        assert_relative_eq!(moved_light.position, Point3::new(0.0, 1.0, -1.0));
    }
}
