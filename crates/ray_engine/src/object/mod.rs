//! Renderable objects
//!
//! Every node of the scene graph is an [`Object`] shared through an
//! [`ObjectRef`]. The variant payload lives in [`ObjectKind`]; geometry
//! payloads are interior-mutable so authoring code can edit an object in place
//! and then notify the scene with the matching update event.
//!
//! Objects carry no accelerator state. Accelerators keep their private
//! per-object data in their own slot arena keyed by [`ObjectId`], so replacing
//! the accelerator drops all of it.

pub mod attrib;
mod generic;
mod instance;
mod light;
mod mesh;

pub use attrib::{
    Attrib, AttribData, AttribError, AttribList, AttribLookup, AttribOwner, AttribScalar, AttribSet,
    AttribValues, ElementCounts, StorageType, DISPLAY_COLOR,
};
pub use generic::{GenericHit, GenericObject, GenericPrimitive};
pub use instance::Instance;
pub use light::{Light, LightData, LightKind};
pub use mesh::{CurveMesh, CurveMeshData, CurveSegment, PolygonMesh, PolygonMeshData, Triangle};

use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::foundation::math::Aabb;
use crate::scene::{SceneGraph, MAX_NESTING};

/// Shared handle to an object
pub type ObjectRef = Arc<Object>;

/// Process-unique object identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u64);

impl ObjectId {
    fn next() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw id value
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Discriminant of an object's variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    /// Composite container of child objects
    SceneGraph,
    /// Polyline curves
    CurveMesh,
    /// Polygon soup
    PolygonMesh,
    /// Transformed copies of a prototype
    Instance,
    /// Light source
    Light,
    /// User-defined primitive
    Generic,
}

/// Variant payload of an object
#[derive(Debug)]
pub enum ObjectKind {
    /// Composite container of child objects
    SceneGraph(SceneGraph),
    /// Polyline curves
    CurveMesh(CurveMesh),
    /// Polygon soup
    PolygonMesh(PolygonMesh),
    /// Transformed copies of a prototype
    Instance(Instance),
    /// Light source
    Light(Light),
    /// User-defined primitive
    Generic(GenericObject),
}

/// Errors raised by malformed geometry
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum GeometryError {
    /// A vertex refers past the point array
    #[error("vertex {vertex} refers to point {point}, but only {points} points exist")]
    IndexOutOfRange {
        /// Vertex index
        vertex: usize,
        /// Point index it refers to
        point: u32,
        /// Number of points
        points: usize,
    },
    /// Face or curve counts do not add up to the vertex count
    #[error("element counts sum to {counted} vertices, but {actual} are stored")]
    CountMismatch {
        /// Sum of per-element counts
        counted: usize,
        /// Stored vertex count
        actual: usize,
    },
    /// Element with too few vertices
    #[error("element {element} has {count} vertices, needs at least {min}")]
    Degenerate {
        /// Face or curve index
        element: usize,
        /// Its vertex count
        count: u32,
        /// Minimum required
        min: u32,
    },
    /// Widths array has the wrong length
    #[error("curve widths need 1 or {points} entries, got {actual}")]
    WidthCount {
        /// Number of points
        points: usize,
        /// Number of widths
        actual: usize,
    },
    /// Attribute data does not fit the geometry
    #[error(transparent)]
    Attrib(#[from] AttribError),
}

/// A node of the scene graph
pub struct Object {
    id: ObjectId,
    name: String,
    parent: RwLock<Weak<Object>>,
    kind: ObjectKind,
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("type", &self.object_type())
            .finish_non_exhaustive()
    }
}

impl Object {
    /// Create an object from a payload
    ///
    /// Scene graphs need a back-reference to their own object and are built
    /// with [`Object::scene_graph`] instead.
    pub fn new(name: impl Into<String>, kind: ObjectKind) -> ObjectRef {
        Arc::new(Self {
            id: ObjectId::next(),
            name: name.into(),
            parent: RwLock::new(Weak::new()),
            kind,
        })
    }

    /// Create an empty scene graph object
    pub fn scene_graph(name: impl Into<String>) -> ObjectRef {
        let name = name.into();
        Arc::new_cyclic(|me| Self {
            id: ObjectId::next(),
            name,
            parent: RwLock::new(Weak::new()),
            kind: ObjectKind::SceneGraph(SceneGraph::new(me.clone())),
        })
    }

    /// Create a polygon mesh object
    pub fn polygon_mesh(name: impl Into<String>, data: PolygonMeshData) -> ObjectRef {
        Self::new(name, ObjectKind::PolygonMesh(PolygonMesh::new(data)))
    }

    /// Create a curve mesh object
    pub fn curve_mesh(name: impl Into<String>, data: CurveMeshData) -> ObjectRef {
        Self::new(name, ObjectKind::CurveMesh(CurveMesh::new(data)))
    }

    /// Create an instance object
    pub fn instance(name: impl Into<String>, instance: Instance) -> ObjectRef {
        Self::new(name, ObjectKind::Instance(instance))
    }

    /// Create a light object
    pub fn light(name: impl Into<String>, data: LightData) -> ObjectRef {
        Self::new(name, ObjectKind::Light(Light::new(data)))
    }

    /// Create a user-defined object
    pub fn generic(name: impl Into<String>, primitive: impl GenericPrimitive + 'static) -> ObjectRef {
        Self::new(name, ObjectKind::Generic(GenericObject::new(primitive)))
    }

    /// Unique id
    pub const fn id(&self) -> ObjectId {
        self.id
    }

    /// Object name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Variant payload
    pub const fn kind(&self) -> &ObjectKind {
        &self.kind
    }

    /// Variant discriminant
    pub const fn object_type(&self) -> ObjectType {
        match &self.kind {
            ObjectKind::SceneGraph(_) => ObjectType::SceneGraph,
            ObjectKind::CurveMesh(_) => ObjectType::CurveMesh,
            ObjectKind::PolygonMesh(_) => ObjectType::PolygonMesh,
            ObjectKind::Instance(_) => ObjectType::Instance,
            ObjectKind::Light(_) => ObjectType::Light,
            ObjectKind::Generic(_) => ObjectType::Generic,
        }
    }

    /// True for variants an accelerator intersects directly
    pub const fn is_geometry(&self) -> bool {
        matches!(
            self.kind,
            ObjectKind::PolygonMesh(_) | ObjectKind::CurveMesh(_) | ObjectKind::Generic(_)
        )
    }

    /// Owning parent, if it is still alive
    pub fn parent(&self) -> Option<ObjectRef> {
        self.parent.read().upgrade()
    }

    /// Reparent this object; `None` detaches it
    pub fn set_parent(&self, parent: Option<&ObjectRef>) {
        *self.parent.write() = parent.map_or_else(Weak::new, Arc::downgrade);
    }

    pub(crate) fn set_parent_weak(&self, parent: Weak<Self>) {
        *self.parent.write() = parent;
    }

    /// Scene graph payload
    pub const fn as_scene_graph(&self) -> Option<&SceneGraph> {
        match &self.kind {
            ObjectKind::SceneGraph(g) => Some(g),
            _ => None,
        }
    }

    /// Polygon mesh payload
    pub const fn as_polygon_mesh(&self) -> Option<&PolygonMesh> {
        match &self.kind {
            ObjectKind::PolygonMesh(m) => Some(m),
            _ => None,
        }
    }

    /// Curve mesh payload
    pub const fn as_curve_mesh(&self) -> Option<&CurveMesh> {
        match &self.kind {
            ObjectKind::CurveMesh(c) => Some(c),
            _ => None,
        }
    }

    /// Instance payload
    pub const fn as_instance(&self) -> Option<&Instance> {
        match &self.kind {
            ObjectKind::Instance(i) => Some(i),
            _ => None,
        }
    }

    /// Light payload
    pub const fn as_light(&self) -> Option<&Light> {
        match &self.kind {
            ObjectKind::Light(l) => Some(l),
            _ => None,
        }
    }

    /// Generic payload
    pub const fn as_generic(&self) -> Option<&GenericObject> {
        match &self.kind {
            ObjectKind::Generic(g) => Some(g),
            _ => None,
        }
    }

    /// Bounds in the space of the object's parent
    ///
    /// Scene graphs apply their own transform; instances cover every copy.
    pub fn bounds(&self) -> Aabb {
        self.bounds_at(0)
    }

    fn bounds_at(&self, depth: usize) -> Aabb {
        if depth > MAX_NESTING {
            log::warn!("Nesting deeper than {} levels under '{}', bounds cut short", MAX_NESTING, self.name());
            return Aabb::empty();
        }
        match &self.kind {
            ObjectKind::SceneGraph(graph) => graph
                .objects()
                .iter()
                .fold(Aabb::empty(), |acc, child| acc.union(&child.bounds_at(depth + 1)))
                .transformed(&graph.transform()),
            ObjectKind::PolygonMesh(mesh) => mesh.read().bounds(),
            ObjectKind::CurveMesh(curves) => curves.read().bounds(),
            ObjectKind::Instance(instance) => {
                let proto = instance.prototype().bounds_at(depth + 1);
                instance
                    .transforms()
                    .iter()
                    .fold(Aabb::empty(), |acc, xform| acc.union(&proto.transformed(xform)))
            }
            ObjectKind::Light(_) => Aabb::empty(),
            ObjectKind::Generic(generic) => generic.primitive().bounds(),
        }
    }

    /// Attribute layout of a geometry object
    pub fn attrib_list(&self) -> Option<Arc<AttribList>> {
        match &self.kind {
            ObjectKind::PolygonMesh(mesh) => Some(Arc::clone(mesh.read().attributes.list())),
            ObjectKind::CurveMesh(curves) => Some(Arc::clone(curves.read().attributes.list())),
            ObjectKind::Generic(generic) => generic.primitive().attributes().map(|a| Arc::clone(a.list())),
            _ => None,
        }
    }
}
