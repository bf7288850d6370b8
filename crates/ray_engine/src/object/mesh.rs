//! Polygon and curve geometry payloads

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::Arc;

use super::attrib::{AttribOwner, AttribSet, AttribValues, ElementCounts};
use super::GeometryError;
use crate::foundation::math::{Aabb, Point3};

/// One triangle of a fan-triangulated face
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Triangle {
    /// Face the triangle came from
    pub face: u32,
    /// Position of the triangle inside the face fan
    pub sub: u32,
    /// Vertex (face corner) indices
    pub vertices: [u32; 3],
}

/// Polygon soup: points, per-face vertex counts and vertex → point indices
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolygonMeshData {
    /// Point positions
    pub points: Vec<Point3>,
    /// Vertices per face
    pub face_counts: Vec<u32>,
    /// Point index of every vertex, faces stored back to back
    pub indices: Vec<u32>,
    /// Attribute layout and values
    pub attributes: Arc<AttribSet>,
}

impl PolygonMeshData {
    /// Create a mesh without attributes
    pub fn new(points: Vec<Point3>, face_counts: Vec<u32>, indices: Vec<u32>) -> Self {
        Self {
            points,
            face_counts,
            indices,
            attributes: Arc::new(AttribSet::new()),
        }
    }

    /// Number of faces
    pub fn face_count(&self) -> usize {
        self.face_counts.len()
    }

    /// Element counts per attribute owner class
    pub fn element_counts(&self) -> ElementCounts {
        ElementCounts {
            points: self.points.len(),
            vertices: self.indices.len(),
            primitives: self.face_counts.len(),
        }
    }

    /// Add or replace an attribute
    pub fn set_attribute(
        &mut self,
        name: &str,
        owner: AttribOwner,
        tuple_size: u32,
        values: AttribValues,
    ) -> Result<(), GeometryError> {
        let counts = self.element_counts();
        Arc::make_mut(&mut self.attributes).set(name, owner, tuple_size, values, counts)?;
        Ok(())
    }

    /// Check topology and attribute sizes
    pub fn validate(&self) -> Result<(), GeometryError> {
        let counted: usize = self.face_counts.iter().map(|&c| c as usize).sum();
        if counted != self.indices.len() {
            return Err(GeometryError::CountMismatch {
                counted,
                actual: self.indices.len(),
            });
        }
        if let Some((element, &count)) = self.face_counts.iter().enumerate().find(|(_, &c)| c < 3) {
            return Err(GeometryError::Degenerate { element, count, min: 3 });
        }
        if let Some((vertex, &point)) = self
            .indices
            .iter()
            .enumerate()
            .find(|(_, &p)| p as usize >= self.points.len())
        {
            return Err(GeometryError::IndexOutOfRange {
                vertex,
                point,
                points: self.points.len(),
            });
        }
        self.attributes.validate(self.element_counts())?;
        Ok(())
    }

    /// Fan-triangulate every face
    pub fn triangulate(&self) -> Vec<Triangle> {
        let mut triangles = Vec::with_capacity(self.indices.len().saturating_sub(2 * self.face_counts.len()));
        let mut start = 0u32;
        for (face, &count) in self.face_counts.iter().enumerate() {
            for sub in 0..count.saturating_sub(2) {
                triangles.push(Triangle {
                    face: face as u32,
                    sub,
                    vertices: [start, start + sub + 1, start + sub + 2],
                });
            }
            start += count;
        }
        triangles
    }

    /// Bounds of all points
    pub fn bounds(&self) -> Aabb {
        Aabb::from_points(&self.points)
    }
}

/// Polygon mesh object payload
#[derive(Debug)]
pub struct PolygonMesh {
    data: RwLock<PolygonMeshData>,
}

impl PolygonMesh {
    /// Wrap mesh data
    pub fn new(data: PolygonMeshData) -> Self {
        Self { data: RwLock::new(data) }
    }

    /// Shared read access
    pub fn read(&self) -> RwLockReadGuard<'_, PolygonMeshData> {
        self.data.read()
    }

    /// Exclusive write access; notify the scene afterwards
    pub fn write(&self) -> RwLockWriteGuard<'_, PolygonMeshData> {
        self.data.write()
    }
}

/// One segment of a curve
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurveSegment {
    /// Curve the segment belongs to
    pub curve: u32,
    /// Segment position along its curve
    pub sub: u32,
    /// Point indices of the two ends
    pub points: [u32; 2],
}

/// Polyline curves with per-point or constant widths
///
/// Curve points are stored curve after curve, so vertices and points coincide.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CurveMeshData {
    /// Point positions
    pub points: Vec<Point3>,
    /// Points per curve
    pub curve_counts: Vec<u32>,
    /// Either a single width or one per point
    pub widths: Vec<f32>,
    /// Attribute layout and values
    pub attributes: Arc<AttribSet>,
}

impl CurveMeshData {
    /// Create curves with a constant width
    pub fn new(points: Vec<Point3>, curve_counts: Vec<u32>, width: f32) -> Self {
        Self {
            points,
            curve_counts,
            widths: vec![width],
            attributes: Arc::new(AttribSet::new()),
        }
    }

    /// Number of curves
    pub fn curve_count(&self) -> usize {
        self.curve_counts.len()
    }

    /// Element counts per attribute owner class
    pub fn element_counts(&self) -> ElementCounts {
        ElementCounts {
            points: self.points.len(),
            vertices: self.points.len(),
            primitives: self.curve_counts.len(),
        }
    }

    /// Add or replace an attribute
    pub fn set_attribute(
        &mut self,
        name: &str,
        owner: AttribOwner,
        tuple_size: u32,
        values: AttribValues,
    ) -> Result<(), GeometryError> {
        let counts = self.element_counts();
        Arc::make_mut(&mut self.attributes).set(name, owner, tuple_size, values, counts)?;
        Ok(())
    }

    /// Width at a point
    pub fn width(&self, point: usize) -> f32 {
        match self.widths.as_slice() {
            [w] => *w,
            widths => widths.get(point).copied().unwrap_or(0.0),
        }
    }

    /// Check counts and widths
    pub fn validate(&self) -> Result<(), GeometryError> {
        let counted: usize = self.curve_counts.iter().map(|&c| c as usize).sum();
        if counted != self.points.len() {
            return Err(GeometryError::CountMismatch {
                counted,
                actual: self.points.len(),
            });
        }
        if let Some((element, &count)) = self.curve_counts.iter().enumerate().find(|(_, &c)| c < 2) {
            return Err(GeometryError::Degenerate { element, count, min: 2 });
        }
        if self.widths.len() != 1 && self.widths.len() != self.points.len() {
            return Err(GeometryError::WidthCount {
                points: self.points.len(),
                actual: self.widths.len(),
            });
        }
        self.attributes.validate(self.element_counts())?;
        Ok(())
    }

    /// Split every curve into segments
    pub fn segments(&self) -> Vec<CurveSegment> {
        let mut segments = Vec::with_capacity(self.points.len().saturating_sub(self.curve_counts.len()));
        let mut start = 0u32;
        for (curve, &count) in self.curve_counts.iter().enumerate() {
            for sub in 0..count.saturating_sub(1) {
                segments.push(CurveSegment {
                    curve: curve as u32,
                    sub,
                    points: [start + sub, start + sub + 1],
                });
            }
            start += count;
        }
        segments
    }

    /// Bounds of all points padded by the widest radius
    pub fn bounds(&self) -> Aabb {
        let max_width = self.widths.iter().copied().fold(0.0f32, f32::max);
        Aabb::from_points(&self.points).padded(max_width * 0.5)
    }
}

/// Curve mesh object payload
#[derive(Debug)]
pub struct CurveMesh {
    data: RwLock<CurveMeshData>,
}

impl CurveMesh {
    /// Wrap curve data
    pub fn new(data: CurveMeshData) -> Self {
        Self { data: RwLock::new(data) }
    }

    /// Shared read access
    pub fn read(&self) -> RwLockReadGuard<'_, CurveMeshData> {
        self.data.read()
    }

    /// Exclusive write access; notify the scene afterwards
    pub fn write(&self) -> RwLockWriteGuard<'_, CurveMeshData> {
        self.data.write()
    }
}
