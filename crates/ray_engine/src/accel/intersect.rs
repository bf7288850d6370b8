//! Ray versus primitive tests
//!
//! All tests take the ray as origin plus an unnormalised direction and report
//! distances in units of that direction, so results stay valid after the ray
//! has been mapped into another space by an affine transform.

use crate::foundation::math::{Point3, Vec3};

const PARALLEL_EPSILON: f32 = 1e-9;

/// Triangle hit: distance and barycentrics of the second and third corners
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriangleHit {
    /// Ray parameter
    pub t: f32,
    /// Weight of `p1`
    pub u: f32,
    /// Weight of `p2`
    pub v: f32,
}

/// Möller–Trumbore ray/triangle test; both faces count
pub fn ray_triangle(
    origin: &Point3,
    direction: &Vec3,
    p0: &Point3,
    p1: &Point3,
    p2: &Point3,
    t_min: f32,
    t_max: f32,
) -> Option<TriangleHit> {
    let edge1 = p1 - p0;
    let edge2 = p2 - p0;
    let h = direction.cross(&edge2);
    let a = edge1.dot(&h);
    if a.abs() < PARALLEL_EPSILON {
        return None;
    }

    let f = 1.0 / a;
    let s = origin - p0;
    let u = f * s.dot(&h);
    if !(0.0..=1.0).contains(&u) {
        return None;
    }

    let q = s.cross(&edge1);
    let v = f * direction.dot(&q);
    if v < 0.0 || u + v > 1.0 {
        return None;
    }

    let t = f * edge2.dot(&q);
    (t >= t_min && t < t_max).then_some(TriangleHit { t, u, v })
}

/// Geometric normal of a triangle, not normalised
pub fn triangle_normal(p0: &Point3, p1: &Point3, p2: &Point3) -> Vec3 {
    (p1 - p0).cross(&(p2 - p0))
}

/// Capsule hit: distance, position along the axis and outward normal
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CapsuleHit {
    /// Ray parameter
    pub t: f32,
    /// Position of the closest axis point, 0 at `a` and 1 at `b`
    pub u: f32,
    /// Unit surface normal
    pub normal: Vec3,
}

/// Ray against the capsule swept by a sphere of `radius` from `a` to `b`
///
/// Only the entry point counts; rays starting inside a curve miss it.
pub fn ray_capsule(
    origin: &Point3,
    direction: &Vec3,
    a: &Point3,
    b: &Point3,
    radius: f32,
    t_min: f32,
    t_max: f32,
) -> Option<CapsuleHit> {
    let length = direction.norm();
    if length <= 0.0 || radius <= 0.0 {
        return None;
    }
    let rd = direction / length;

    let ba = b - a;
    let oa = origin - a;
    let baba = ba.dot(&ba);
    let bard = ba.dot(&rd);
    let baoa = ba.dot(&oa);
    let rdoa = rd.dot(&oa);
    let oaoa = oa.dot(&oa);
    let r2 = radius * radius;

    // Cylinder body
    let qa = baba - bard * bard;
    let qb = baba * rdoa - baoa * bard;
    let qc = baba * oaoa - baoa * baoa - r2 * baba;
    let mut distance = None;
    let disc = qb * qb - qa * qc;
    if disc >= 0.0 && qa.abs() > PARALLEL_EPSILON {
        let t = (-qb - disc.sqrt()) / qa;
        let y = baoa + t * bard;
        if y > 0.0 && y < baba {
            distance = Some(t);
        } else {
            // End caps
            let center = if y <= 0.0 { *a } else { *b };
            distance = ray_sphere(&(origin - center), &rd, r2);
        }
    } else if qa.abs() <= PARALLEL_EPSILON {
        // Ray runs along the axis, only the caps can be hit
        let near_a = ray_sphere(&oa, &rd, r2);
        let near_b = ray_sphere(&(origin - b), &rd, r2);
        distance = match (near_a, near_b) {
            (Some(x), Some(y)) => Some(x.min(y)),
            (x, y) => x.or(y),
        };
    }

    let t_unit = distance?;
    let t = t_unit / length;
    if !(t >= t_min && t < t_max) {
        return None;
    }

    let p = origin + rd * t_unit;
    let u = if baba > 0.0 { ((p - a).dot(&ba) / baba).clamp(0.0, 1.0) } else { 0.0 };
    let axis_point = a + ba * u;
    let normal = (p - axis_point).try_normalize(f32::EPSILON).unwrap_or_else(|| -rd);
    Some(CapsuleHit { t, u, normal })
}

/// Entry distance of a unit ray against a sphere, given `origin - center`
fn ray_sphere(oc: &Vec3, rd: &Vec3, r2: f32) -> Option<f32> {
    let b = rd.dot(oc);
    let c = oc.dot(oc) - r2;
    let h = b * b - c;
    (h > 0.0).then(|| -b - h.sqrt())
}
