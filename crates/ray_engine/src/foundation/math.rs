//! Math utilities and types
//!
//! Provides the vector, point and matrix aliases used by the batch containers
//! and accelerators, plus the axis-aligned bounding box used for traversal.

pub use nalgebra::{Matrix3, Matrix4, Vector3};

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// 3D point type
pub type Point3 = nalgebra::Point3<f32>;

/// 3x3 matrix type
pub type Mat3 = Matrix3<f32>;

/// 4x4 matrix type
pub type Mat4 = Matrix4<f32>;

/// Linear RGB colour / radiance weight
pub type Color = Vector3<f32>;

/// Axis-Aligned Bounding Box used by every acceleration level
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    /// Minimum corner of the bounding box
    pub min: Point3,
    /// Maximum corner of the bounding box
    pub max: Point3,
}

impl Default for Aabb {
    fn default() -> Self {
        Self::empty()
    }
}

impl Aabb {
    /// Create a new box from min and max points
    pub const fn new(min: Point3, max: Point3) -> Self {
        Self { min, max }
    }

    /// An inverted box that any point or box will grow
    pub fn empty() -> Self {
        Self {
            min: Point3::new(f32::INFINITY, f32::INFINITY, f32::INFINITY),
            max: Point3::new(f32::NEG_INFINITY, f32::NEG_INFINITY, f32::NEG_INFINITY),
        }
    }

    /// Smallest box containing all points
    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a Point3>) -> Self {
        let mut aabb = Self::empty();
        for p in points {
            aabb.expand_point(p);
        }
        aabb
    }

    /// True while nothing has been added to the box
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    /// Grow the box to contain a point
    pub fn expand_point(&mut self, p: &Point3) {
        self.min = self.min.inf(p);
        self.max = self.max.sup(p);
    }

    /// Grow the box to contain another box
    pub fn expand(&mut self, other: &Self) {
        if other.is_empty() {
            return;
        }
        self.min = self.min.inf(&other.min);
        self.max = self.max.sup(&other.max);
    }

    /// Union of two boxes
    #[must_use]
    pub fn union(mut self, other: &Self) -> Self {
        self.expand(other);
        self
    }

    /// Pad the box by `amount` in every direction
    #[must_use]
    pub fn padded(self, amount: f32) -> Self {
        if self.is_empty() {
            return self;
        }
        let pad = Vec3::repeat(amount);
        Self::new(self.min - pad, self.max + pad)
    }

    /// Center of the box
    pub fn center(&self) -> Point3 {
        nalgebra::center(&self.min, &self.max)
    }

    /// Full edge lengths
    pub fn extent(&self) -> Vec3 {
        self.max - self.min
    }

    /// Index of the longest axis (0 = x, 1 = y, 2 = z)
    pub fn longest_axis(&self) -> usize {
        self.extent().imax()
    }

    /// Bounds of this box after an affine transform (all eight corners)
    #[must_use]
    pub fn transformed(&self, m: &Mat4) -> Self {
        if self.is_empty() {
            return *self;
        }
        let mut out = Self::empty();
        for corner in 0..8 {
            let p = Point3::new(
                if corner & 1 == 0 { self.min.x } else { self.max.x },
                if corner & 2 == 0 { self.min.y } else { self.max.y },
                if corner & 4 == 0 { self.min.z } else { self.max.z },
            );
            out.expand_point(&m.transform_point(&p));
        }
        out
    }

    /// Slab test against a ray given its reciprocal direction.
    ///
    /// Returns the entry distance when the overlap of the slab intervals
    /// intersects `[t_min, t_max]`.
    /// Based on "An Efficient and Robust Ray–Box Intersection Algorithm"
    #[inline]
    pub fn intersect_ray(&self, origin: &Point3, inv_dir: &Vec3, t_min: f32, t_max: f32) -> Option<f32> {
        if self.is_empty() {
            return None;
        }
        let mut t0 = t_min;
        let mut t1 = t_max;
        for axis in 0..3 {
            let mut near = (self.min[axis] - origin[axis]) * inv_dir[axis];
            let mut far = (self.max[axis] - origin[axis]) * inv_dir[axis];
            if near > far {
                std::mem::swap(&mut near, &mut far);
            }
            // NaN from 0 * inf fails both comparisons and leaves the interval alone
            if near > t0 {
                t0 = near;
            }
            if far < t1 {
                t1 = far;
            }
            if t0 > t1 {
                return None;
            }
        }
        Some(t0)
    }
}

/// Normal transform for a matrix given its inverse (inverse transpose)
#[inline]
pub fn transform_normal(inverse: &Mat4, n: &Vec3) -> Vec3 {
    let m = inverse.fixed_view::<3, 3>(0, 0).transpose();
    m * n
}

/// Reciprocal direction used by the slab test
#[inline]
pub fn reciprocal(dir: &Vec3) -> Vec3 {
    Vec3::new(1.0 / dir.x, 1.0 / dir.y, 1.0 / dir.z)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_aabb_expand_and_center() {
        let aabb = Aabb::from_points(&[Point3::new(-1.0, 0.0, 2.0), Point3::new(1.0, 4.0, -2.0)]);
        assert!(!aabb.is_empty());
        assert_relative_eq!(aabb.center(), Point3::new(0.0, 2.0, 0.0));
        assert_eq!(aabb.longest_axis(), 1);
    }

    #[test]
    fn test_aabb_ray_slab() {
        let aabb = Aabb::new(Point3::new(-1.0, -1.0, -1.0), Point3::new(1.0, 1.0, 1.0));
        let origin = Point3::new(-5.0, 0.0, 0.0);
        let inv = reciprocal(&Vec3::new(1.0, 0.0, 0.0));

        let t = aabb.intersect_ray(&origin, &inv, 0.0, f32::MAX).unwrap();
        assert_relative_eq!(t, 4.0);
        assert!(aabb.intersect_ray(&origin, &inv, 0.0, 3.0).is_none());

        let miss_origin = Point3::new(-5.0, 3.0, 0.0);
        assert!(aabb.intersect_ray(&miss_origin, &inv, 0.0, f32::MAX).is_none());
    }

    #[test]
    fn test_transformed_bounds() {
        let aabb = Aabb::new(Point3::origin(), Point3::new(1.0, 1.0, 1.0));
        let moved = aabb.transformed(&Mat4::new_translation(&Vec3::new(2.0, 0.0, 0.0)));
        assert_relative_eq!(moved.min, Point3::new(2.0, 0.0, 0.0));
        assert_relative_eq!(moved.max, Point3::new(3.0, 1.0, 1.0));
    }
}
