//! Geometry snapshots shared by the built-in accelerators
//!
//! Accelerators copy what they need out of an object's locked payload when it
//! is committed, so traversal never touches a lock and attribute evaluation
//! can hand out slices that borrow the snapshot.

use std::sync::Arc;

use super::intersect::{ray_capsule, ray_triangle, triangle_normal};
use super::AcceleratorError;
use crate::batch::Ray;
use crate::foundation::math::{Aabb, Vec3};
use crate::object::{
    AttribLookup, AttribSet, CurveMeshData, CurveSegment, ObjectKind, ObjectRef, PolygonMeshData, Triangle,
};

/// Intersection in the geometry's own space
#[derive(Debug, Clone, Copy)]
pub(crate) struct LocalHit {
    pub distance: f32,
    pub element: u32,
    pub sub_element: u32,
    pub u: f32,
    pub v: f32,
    pub normal: Vec3,
}

#[derive(Debug)]
enum Shape {
    Mesh {
        data: PolygonMeshData,
        triangles: Vec<Triangle>,
        /// First triangle of every face
        first: Vec<u32>,
    },
    Curves {
        data: CurveMeshData,
        segments: Vec<CurveSegment>,
        /// First segment of every curve
        first: Vec<u32>,
    },
    Generic,
}

/// Committed copy of one geometry object
#[derive(Debug)]
pub(crate) struct PreparedGeometry {
    object: ObjectRef,
    shape: Shape,
}

fn first_indices(counts: impl Iterator<Item = u32>) -> Vec<u32> {
    counts
        .scan(0u32, |next, count| {
            let start = *next;
            *next += count;
            Some(start)
        })
        .collect()
}

impl PreparedGeometry {
    /// Snapshot a geometry object; `None` for anything that is not geometry
    pub fn prepare(object: &ObjectRef) -> Result<Option<Self>, AcceleratorError> {
        let invalid = |source| AcceleratorError::Geometry {
            name: object.name().to_string(),
            source,
        };
        let shape = match object.kind() {
            ObjectKind::PolygonMesh(mesh) => {
                let data = mesh.read().clone();
                data.validate().map_err(invalid)?;
                let triangles = data.triangulate();
                let first = first_indices(data.face_counts.iter().map(|&c| c.saturating_sub(2)));
                Shape::Mesh { data, triangles, first }
            }
            ObjectKind::CurveMesh(curves) => {
                let data = curves.read().clone();
                data.validate().map_err(invalid)?;
                let segments = data.segments();
                let first = first_indices(data.curve_counts.iter().map(|&c| c.saturating_sub(1)));
                Shape::Curves { data, segments, first }
            }
            ObjectKind::Generic(_) => Shape::Generic,
            _ => return Ok(None),
        };
        Ok(Some(Self {
            object: Arc::clone(object),
            shape,
        }))
    }

    /// The source object
    pub fn object(&self) -> &ObjectRef {
        &self.object
    }

    /// Re-read point positions after an `ATTRIB_P` edit
    ///
    /// Returns `false` when the point count changed, in which case the
    /// snapshot is left alone and the caller must rebuild.
    pub fn refresh_points(&mut self) -> bool {
        match (&mut self.shape, self.object.kind()) {
            (Shape::Mesh { data, .. }, ObjectKind::PolygonMesh(mesh)) => {
                let source = mesh.read();
                if source.points.len() != data.points.len() {
                    return false;
                }
                data.points.clone_from(&source.points);
                data.attributes = Arc::clone(&source.attributes);
                true
            }
            (Shape::Curves { data, .. }, ObjectKind::CurveMesh(curves)) => {
                let source = curves.read();
                if source.points.len() != data.points.len() || source.widths.len() != data.widths.len() {
                    return false;
                }
                data.points.clone_from(&source.points);
                data.widths.clone_from(&source.widths);
                data.attributes = Arc::clone(&source.attributes);
                true
            }
            (Shape::Generic, _) => true,
            _ => false,
        }
    }

    /// Re-read attribute values after an `ATTRIB` edit
    pub fn refresh_attributes(&mut self) {
        match (&mut self.shape, self.object.kind()) {
            (Shape::Mesh { data, .. }, ObjectKind::PolygonMesh(mesh)) => {
                data.attributes = Arc::clone(&mesh.read().attributes);
            }
            (Shape::Curves { data, .. }, ObjectKind::CurveMesh(curves)) => {
                data.attributes = Arc::clone(&curves.read().attributes);
            }
            _ => {}
        }
    }

    /// Number of intersectable primitives
    pub fn prim_count(&self) -> usize {
        match &self.shape {
            Shape::Mesh { triangles, .. } => triangles.len(),
            Shape::Curves { segments, .. } => segments.len(),
            Shape::Generic => 1,
        }
    }

    /// Bounds of every primitive
    pub fn prim_bounds(&self) -> Vec<Aabb> {
        match &self.shape {
            Shape::Mesh { data, triangles, .. } => triangles
                .iter()
                .map(|tri| Aabb::from_points(tri.vertices.iter().map(|&v| &data.points[data.indices[v as usize] as usize])))
                .collect(),
            Shape::Curves { data, segments, .. } => segments
                .iter()
                .map(|seg| {
                    let [a, b] = seg.points.map(|p| p as usize);
                    let radius = 0.5 * data.width(a).max(data.width(b));
                    Aabb::from_points([&data.points[a], &data.points[b]]).padded(radius)
                })
                .collect(),
            Shape::Generic => vec![self.bounds()],
        }
    }

    /// Bounds of the whole geometry
    pub fn bounds(&self) -> Aabb {
        match &self.shape {
            Shape::Mesh { data, .. } => data.bounds(),
            Shape::Curves { data, .. } => data.bounds(),
            Shape::Generic => self
                .object
                .as_generic()
                .map_or_else(Aabb::empty, |g| g.primitive().bounds()),
        }
    }

    /// Intersect primitive `prim` with a ray in geometry space
    pub fn intersect(&self, prim: u32, ray: &Ray, t_min: f32, t_max: f32) -> Option<LocalHit> {
        match &self.shape {
            Shape::Mesh { data, triangles, .. } => {
                let tri = triangles.get(prim as usize)?;
                let [p0, p1, p2] = tri.vertices.map(|v| &data.points[data.indices[v as usize] as usize]);
                let hit = ray_triangle(&ray.origin, &ray.direction, p0, p1, p2, t_min, t_max)?;
                Some(LocalHit {
                    distance: hit.t,
                    element: tri.face,
                    sub_element: tri.sub,
                    u: hit.u,
                    v: hit.v,
                    normal: triangle_normal(p0, p1, p2),
                })
            }
            Shape::Curves { data, segments, .. } => {
                let seg = segments.get(prim as usize)?;
                let [a, b] = seg.points.map(|p| p as usize);
                let radius = 0.25 * (data.width(a) + data.width(b));
                let hit = ray_capsule(&ray.origin, &ray.direction, &data.points[a], &data.points[b], radius, t_min, t_max)?;
                Some(LocalHit {
                    distance: hit.t,
                    element: seg.curve,
                    sub_element: seg.sub,
                    u: hit.u,
                    v: 0.0,
                    normal: hit.normal,
                })
            }
            Shape::Generic => {
                let generic = self.object.as_generic()?;
                let hit = generic.primitive().intersect(ray, t_min, t_max)?;
                Some(LocalHit {
                    distance: hit.distance,
                    element: hit.element,
                    sub_element: 0,
                    u: hit.u,
                    v: hit.v,
                    normal: hit.normal,
                })
            }
        }
    }

    /// Attribute values of the snapshot
    pub fn attributes(&self) -> Option<&AttribSet> {
        match &self.shape {
            Shape::Mesh { data, .. } => Some(&*data.attributes),
            Shape::Curves { data, .. } => Some(&*data.attributes),
            Shape::Generic => self.object.as_generic()?.primitive().attributes(),
        }
    }

    /// Where attribute evaluation should look for a hit on this geometry
    pub fn lookup(&self, element: u32, sub_element: u32, u: f32, v: f32) -> Option<AttribLookup> {
        match &self.shape {
            Shape::Mesh { data, triangles, first } => {
                let index = first.get(element as usize)? + sub_element;
                let tri = triangles.get(index as usize)?;
                let vertices = tri.vertices.map(|v| v as usize);
                Some(AttribLookup {
                    primitive: element as usize,
                    points: vertices.map(|v| data.indices[v] as usize),
                    vertices,
                    weights: [1.0 - u - v, u, v],
                })
            }
            Shape::Curves { segments, first, .. } => {
                let index = first.get(element as usize)? + sub_element;
                let seg = segments.get(index as usize)?;
                let [a, b] = seg.points.map(|p| p as usize);
                Some(AttribLookup {
                    primitive: element as usize,
                    points: [a, b, b],
                    vertices: [a, b, b],
                    weights: [1.0 - u, u, 0.0],
                })
            }
            Shape::Generic => Some(AttribLookup {
                primitive: element as usize,
                points: [element as usize; 3],
                vertices: [element as usize; 3],
                weights: [1.0, 0.0, 0.0],
            }),
        }
    }
}

