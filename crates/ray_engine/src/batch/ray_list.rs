//! Structure-of-arrays ray batch

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use super::{Range, Ray};
use crate::foundation::math::{Color, Mat4, Point3, Vec3};

/// Independent random stream carried by each ray
#[derive(Debug, Clone)]
pub struct SampleState {
    rng: SmallRng,
}

impl SampleState {
    /// Seeded stream
    pub fn new(seed: u64) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    /// Uniform sample in `[0, 1)`
    pub fn next_f32(&mut self) -> f32 {
        self.rng.gen()
    }

    /// Two uniform samples in `[0, 1)`
    pub fn next_2d(&mut self) -> (f32, f32) {
        (self.rng.gen(), self.rng.gen())
    }
}

impl Default for SampleState {
    fn default() -> Self {
        Self::new(0)
    }
}

/// A batch of rays sharing one propagation depth
///
/// Every per-ray array has the same length.
#[derive(Debug, Clone, Default)]
pub struct RayList {
    origins: Vec<Point3>,
    directions: Vec<Vec3>,
    times: Vec<f32>,
    contributions: Vec<Color>,
    pixels: Vec<u32>,
    samples: Vec<SampleState>,
    level: u32,
}

impl RayList {
    /// Empty batch at bounce depth `level`
    pub fn new(level: u32) -> Self {
        Self {
            level,
            ..Self::default()
        }
    }

    /// Empty batch with room for `capacity` rays
    pub fn with_capacity(level: u32, capacity: usize) -> Self {
        Self {
            origins: Vec::with_capacity(capacity),
            directions: Vec::with_capacity(capacity),
            times: Vec::with_capacity(capacity),
            contributions: Vec::with_capacity(capacity),
            pixels: Vec::with_capacity(capacity),
            samples: Vec::with_capacity(capacity),
            level,
        }
    }

    /// Number of rays
    pub fn len(&self) -> usize {
        self.origins.len()
    }

    /// True when the batch holds no rays
    pub fn is_empty(&self) -> bool {
        self.origins.is_empty()
    }

    /// Bounce depth of the whole batch
    pub const fn level(&self) -> u32 {
        self.level
    }

    /// Set the bounce depth
    pub fn set_level(&mut self, level: u32) {
        self.level = level;
    }

    /// Append a ray
    pub fn push(&mut self, ray: Ray, contribution: Color, pixel: u32, sample: SampleState) {
        self.origins.push(ray.origin);
        self.directions.push(ray.direction);
        self.times.push(ray.time);
        self.contributions.push(contribution);
        self.pixels.push(pixel);
        self.samples.push(sample);
    }

    /// Grow or shrink; new rays are zeroed with white contribution
    pub fn resize(&mut self, size: usize) {
        self.origins.resize(size, Point3::origin());
        self.directions.resize(size, Vec3::zeros());
        self.times.resize(size, 0.0);
        self.contributions.resize(size, Color::repeat(1.0));
        self.pixels.resize(size, 0);
        self.samples.resize_with(size, SampleState::default);
    }

    /// Geometric ray at slot `i`
    #[inline]
    pub fn ray(&self, i: usize) -> Ray {
        Ray {
            origin: self.origins[i],
            direction: self.directions[i],
            time: self.times[i],
        }
    }

    /// Replace the geometric part of slot `i`
    pub fn set_ray(&mut self, i: usize, ray: Ray) {
        self.origins[i] = ray.origin;
        self.directions[i] = ray.direction;
        self.times[i] = ray.time;
    }

    /// All origins
    pub fn origins(&self) -> &[Point3] {
        &self.origins
    }

    /// All directions
    pub fn directions(&self) -> &[Vec3] {
        &self.directions
    }

    /// All times
    pub fn times(&self) -> &[f32] {
        &self.times
    }

    /// All contribution weights
    pub fn contributions(&self) -> &[Color] {
        &self.contributions
    }

    /// Mutable contribution weights
    pub fn contributions_mut(&mut self) -> &mut [Color] {
        &mut self.contributions
    }

    /// All destination slots
    pub fn pixels(&self) -> &[u32] {
        &self.pixels
    }

    /// Random stream of slot `i`
    pub fn sample_mut(&mut self, i: usize) -> &mut SampleState {
        &mut self.samples[i]
    }

    fn copy_slot(&mut self, dst: usize, src: &Self, i: usize) {
        self.origins[dst] = src.origins[i];
        self.directions[dst] = src.directions[i];
        self.times[dst] = src.times[i];
        self.contributions[dst] = src.contributions[i];
        self.pixels[dst] = src.pixels[i];
        self.samples[dst].clone_from(&src.samples[i]);
    }

    /// Copy the slots named by `range` from `src` into the same slots here
    ///
    /// Slots outside the range keep their values. The batch grows to the
    /// length of `src` if it is shorter.
    pub fn copy_from(&mut self, range: &Range, src: &Self) {
        debug_assert!(range.extent() <= src.len());
        if self.len() < src.len() {
            self.resize(src.len());
        }
        self.level = src.level;
        for i in range.iter() {
            self.copy_slot(i, src, i);
        }
    }

    /// Dense batch holding the slots of `src` named by `range`, in range order
    pub fn compact(range: &Range, src: &Self) -> Self {
        debug_assert!(range.extent() <= src.len());
        if range.is_trivial() && range.len() == src.len() {
            return src.clone();
        }
        let mut out = Self::new(src.level);
        out.resize(range.len());
        for (dst, i) in range.iter().enumerate() {
            out.copy_slot(dst, src, i);
        }
        out
    }

    /// Copy of `src` with origins and directions mapped through `matrix`
    ///
    /// Directions are not renormalised, so distances measured in the new space
    /// stay comparable with the source space.
    pub fn transform(src: &Self, matrix: &Mat4) -> Self {
        Self {
            origins: src.origins.iter().map(|o| matrix.transform_point(o)).collect(),
            directions: src.directions.iter().map(|d| matrix.transform_vector(d)).collect(),
            ..src.clone()
        }
    }
}
