//! # Pinhole camera
//!
//! Generates primary ray batches for preview renders.
//!
//! ## Conventions
//! - Right-handed, Y-up world space
//! - Pixel `(0, 0)` is the top-left corner of the image
//! - Pixels are numbered row by row, `y * width + x`

use crate::batch::{Ray, RayList, SampleState};
use crate::foundation::math::{Color, Point3, Vec3};

/// Seed mixing constant for per-ray random streams
const SEED_MIX: u64 = 0x9E37_79B9_7F4A_7C15;

/// Look-at pinhole camera
///
/// The camera looks from `position` towards `target`, with `up` giving the
/// roll. The vertical field of view is stored in radians; the horizontal one
/// follows from the image aspect ratio at generation time.
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    /// Eye position in world space
    pub position: Point3,

    /// Point the camera is looking at
    pub target: Point3,

    /// Up vector (typically [0, 1, 0])
    pub up: Vec3,

    /// Vertical field of view in radians
    pub fov: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self::new(Point3::new(0.0, 0.0, 5.0), Point3::origin(), 60.0)
    }
}

impl Camera {
    /// Create a camera looking at `target`
    ///
    /// # Arguments
    /// * `position` - Eye position in world space
    /// * `target` - Point in world space to look at
    /// * `fov_degrees` - Vertical field of view in degrees
    pub fn new(position: Point3, target: Point3, fov_degrees: f32) -> Self {
        Self {
            position,
            target,
            up: Vec3::y(),
            fov: fov_degrees.to_radians(),
        }
    }

    /// Change the target and up vector
    ///
    /// `up` does not need to be perpendicular to the view direction; the basis
    /// is orthonormalised when rays are generated.
    pub fn look_at(&mut self, target: Point3, up: Vec3) {
        self.target = target;
        self.up = up;
        log::trace!("Camera look_at updated - target: {:?}, up: {:?}", target, up);
    }

    /// Forward, right and up unit vectors
    fn basis(&self) -> (Vec3, Vec3, Vec3) {
        let forward = (self.target - self.position)
            .try_normalize(f32::EPSILON)
            .unwrap_or_else(|| -Vec3::z());
        let right = forward
            .cross(&self.up)
            .try_normalize(f32::EPSILON)
            .unwrap_or_else(Vec3::x);
        let up = right.cross(&forward);
        (forward, right, up)
    }

    /// Unit direction through image position `(sx, sy)` in pixels
    fn direction(&self, basis: &(Vec3, Vec3, Vec3), width: u32, height: u32, sx: f32, sy: f32) -> Vec3 {
        let (forward, right, up) = basis;
        let half_height = (0.5 * self.fov).tan();
        let half_width = half_height * width as f32 / height as f32;
        let x = (2.0 * sx / width as f32 - 1.0) * half_width;
        let y = (1.0 - 2.0 * sy / height as f32) * half_height;
        (forward + right * x + up * y).normalize()
    }

    /// Ray through the centre of pixel `(x, y)`
    pub fn pixel_ray(&self, width: u32, height: u32, x: u32, y: u32) -> Ray {
        let basis = self.basis();
        let direction = self.direction(&basis, width, height, x as f32 + 0.5, y as f32 + 0.5);
        Ray::new(self.position, direction, 0.0)
    }

    /// Primary rays for a `width * height` image with `samples` rays per pixel
    ///
    /// Every ray carries its own random stream derived from `seed`, the pixel
    /// and the sample index, and is jittered inside its pixel with it. Each
    /// ray contributes `1 / samples`, so shading sums to the pixel average.
    pub fn generate(&self, width: u32, height: u32, samples: u32, seed: u64) -> RayList {
        let samples = samples.max(1);
        let count = width as usize * height as usize * samples as usize;
        let mut rays = RayList::with_capacity(0, count);
        if width == 0 || height == 0 {
            return rays;
        }

        let basis = self.basis();
        let weight = Color::repeat(1.0 / samples as f32);
        for y in 0..height {
            for x in 0..width {
                let pixel = y * width + x;
                for s in 0..samples {
                    let stream = seed ^ (u64::from(pixel) << 16 | u64::from(s)).wrapping_mul(SEED_MIX);
                    let mut sample = SampleState::new(stream);
                    let (jx, jy) = if samples == 1 { (0.5, 0.5) } else { sample.next_2d() };
                    let direction = self.direction(&basis, width, height, x as f32 + jx, y as f32 + jy);
                    rays.push(Ray::new(self.position, direction, 0.0), weight, pixel, sample);
                }
            }
        }
        log::debug!("Generated {} primary rays for {}x{} image", rays.len(), width, height);
        rays
    }
}
