//! Named surface materials
//!
//! The core does not interpret materials; it only stores them by name so
//! shading code outside the crate can look them up while rays are in flight.

use serde::{Deserialize, Serialize};

use crate::foundation::math::Color;

/// How a material treats coverage
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub enum AlphaMode {
    /// No transparency
    #[default]
    Opaque,
    /// Alpha testing with cutoff value
    Mask(f32),
    /// Alpha blending
    Blend,
}

/// Surface description shared between objects
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Material {
    /// Lookup name
    pub name: String,
    /// Diffuse colour
    pub base_color: Color,
    /// Emitted radiance
    pub emission: Color,
    /// Microfacet roughness in `[0, 1]`
    pub roughness: f32,
    /// Metalness in `[0, 1]`
    pub metallic: f32,
    /// Coverage handling
    pub alpha_mode: AlphaMode,
}

impl Material {
    /// Grey diffuse material
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_color: Color::repeat(0.8),
            emission: Color::zeros(),
            roughness: 0.5,
            metallic: 0.0,
            alpha_mode: AlphaMode::Opaque,
        }
    }

    /// Set the diffuse colour
    #[must_use]
    pub fn with_base_color(mut self, color: Color) -> Self {
        self.base_color = color;
        self
    }

    /// Set the emitted radiance
    #[must_use]
    pub fn with_emission(mut self, emission: Color) -> Self {
        self.emission = emission;
        self
    }

    /// Set roughness and metalness, clamped to `[0, 1]`
    #[must_use]
    pub fn with_surface(mut self, roughness: f32, metallic: f32) -> Self {
        self.roughness = roughness.clamp(0.0, 1.0);
        self.metallic = metallic.clamp(0.0, 1.0);
        self
    }

    /// Set the coverage handling
    #[must_use]
    pub fn with_alpha_mode(mut self, alpha_mode: AlphaMode) -> Self {
        self.alpha_mode = alpha_mode;
        self
    }

    /// True when the material is not fully opaque
    pub fn is_transparent(&self) -> bool {
        !matches!(self.alpha_mode, AlphaMode::Opaque)
    }
}
