//! Light objects
//!
//! Lights are tracked by the scene graph for lookup; accelerators never
//! intersect them.

use parking_lot::RwLock;

use crate::foundation::math::{Color, Point3, Vec3};

/// Shape of the emitter
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LightKind {
    /// Omnidirectional point emitter
    Point,
    /// Infinitely distant parallel emitter
    Distant,
    /// Rectangular emitter of the given width and height
    Area {
        /// Width along the local X axis
        width: f32,
        /// Height along the local Y axis
        height: f32,
    },
}

/// Light description
#[derive(Debug, Clone, PartialEq)]
pub struct LightData {
    /// Emitter shape
    pub kind: LightKind,
    /// Emitted colour
    pub color: Color,
    /// Scalar intensity multiplier
    pub intensity: f32,
    /// Position (ignored for distant lights)
    pub position: Point3,
    /// Emission direction (ignored for point lights)
    pub direction: Vec3,
}

impl Default for LightData {
    fn default() -> Self {
        Self {
            kind: LightKind::Point,
            color: Color::new(1.0, 1.0, 1.0),
            intensity: 1.0,
            position: Point3::origin(),
            direction: Vec3::new(0.0, -1.0, 0.0),
        }
    }
}

impl LightData {
    /// Point light at a position
    pub fn point(position: Point3, color: Color, intensity: f32) -> Self {
        Self {
            kind: LightKind::Point,
            color,
            intensity,
            position,
            ..Self::default()
        }
    }

    /// Distant light shining along a direction
    pub fn distant(direction: Vec3, color: Color, intensity: f32) -> Self {
        Self {
            kind: LightKind::Distant,
            color,
            intensity,
            direction: direction.normalize(),
            ..Self::default()
        }
    }

    /// Emitted radiance scale
    pub fn radiance(&self) -> Color {
        self.color * self.intensity
    }
}

/// Light object payload
#[derive(Debug)]
pub struct Light {
    data: RwLock<LightData>,
}

impl Light {
    /// Wrap a light description
    pub fn new(data: LightData) -> Self {
        Self { data: RwLock::new(data) }
    }

    /// Snapshot of the description
    pub fn data(&self) -> LightData {
        self.data.read().clone()
    }

    /// Replace the description; notify with `PROPERTIES` afterwards
    pub fn set_data(&self, data: LightData) {
        *self.data.write() = data;
    }
}
