//! Render and accelerator option types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{Config, ConfigError};

/// A single value in an [`AcceleratorOptions`] bag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    /// Boolean switch
    Bool(bool),
    /// Integer value
    Int(i64),
    /// Floating point value
    Float(f64),
    /// Free-form string
    Str(String),
}

impl From<bool> for OptionValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for OptionValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for OptionValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for OptionValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for OptionValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

/// Opaque key/value bag handed to accelerator factories.
///
/// The crate does not fix the recognized keys; each accelerator documents
/// the ones it reads and ignores the rest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AcceleratorOptions {
    values: BTreeMap<String, OptionValue>,
}

impl AcceleratorOptions {
    /// Create an empty option bag
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a value (builder pattern)
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<OptionValue>) -> Self {
        self.set(key, value);
        self
    }

    /// Set or replace a value
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<OptionValue>) {
        self.values.insert(key.into(), value.into());
    }

    /// Raw lookup
    pub fn get(&self, key: &str) -> Option<&OptionValue> {
        self.values.get(key)
    }

    /// Boolean lookup
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get(key)? {
            OptionValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Integer lookup
    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.get(key)? {
            OptionValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Non-negative integer lookup
    pub fn get_usize(&self, key: &str) -> Option<usize> {
        self.get_int(key).and_then(|v| usize::try_from(v).ok())
    }

    /// Float lookup, integers are widened
    pub fn get_float(&self, key: &str) -> Option<f64> {
        match self.get(key)? {
            OptionValue::Float(v) => Some(*v),
            #[allow(clippy::cast_precision_loss)]
            OptionValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// String lookup
    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.get(key)? {
            OptionValue::Str(v) => Some(v.as_str()),
            _ => None,
        }
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when no option is set
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate over entries in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &OptionValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl Config for AcceleratorOptions {}

/// Options consulted when a render begins
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderOptions {
    /// Accelerator style looked up in the registry
    pub accelerator: String,
    /// Options passed to the accelerator factory
    pub accelerator_options: AcceleratorOptions,
    /// Far limit for traced rays
    pub max_distance: f32,
    /// Near limit for traced rays (self-intersection offset)
    pub min_distance: f32,
    /// Colour written for rays that miss during preview shading
    pub background: [f32; 3],
    /// Flatten instances even when the accelerator supports nesting
    pub flatten_instances: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            accelerator: "bvh".to_string(),
            accelerator_options: AcceleratorOptions::default(),
            max_distance: f32::MAX,
            min_distance: 1e-4,
            background: [0.0, 0.0, 0.0],
            flatten_instances: false,
        }
    }
}

impl RenderOptions {
    /// Select the accelerator style (builder pattern)
    #[must_use]
    pub fn with_accelerator(mut self, style: impl Into<String>) -> Self {
        self.accelerator = style.into();
        self
    }

    /// Replace the accelerator options (builder pattern)
    #[must_use]
    pub fn with_accelerator_options(mut self, options: AcceleratorOptions) -> Self {
        self.accelerator_options = options;
        self
    }

    /// Set the trace interval (builder pattern)
    #[must_use]
    pub fn with_distances(mut self, min_distance: f32, max_distance: f32) -> Self {
        self.min_distance = min_distance;
        self.max_distance = max_distance;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.accelerator.is_empty() {
            return Err(ConfigError::Invalid {
                key: "accelerator".to_string(),
                reason: "style name cannot be empty".to_string(),
            });
        }

        if !(self.min_distance >= 0.0) {
            return Err(ConfigError::Invalid {
                key: "min_distance".to_string(),
                reason: format!("must be non-negative, got {}", self.min_distance),
            });
        }

        if !(self.max_distance > self.min_distance) {
            return Err(ConfigError::Invalid {
                key: "max_distance".to_string(),
                reason: format!(
                    "must exceed min_distance ({} <= {})",
                    self.max_distance, self.min_distance
                ),
            });
        }

        Ok(())
    }
}

impl Config for RenderOptions {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_option_bag_lookups() {
        let options = AcceleratorOptions::new()
            .with("leaf_size", 8_i64)
            .with("refit", true)
            .with("quality", 0.5_f64)
            .with("split", "median");

        assert_eq!(options.get_usize("leaf_size"), Some(8));
        assert_eq!(options.get_bool("refit"), Some(true));
        assert_eq!(options.get_float("leaf_size"), Some(8.0));
        assert_eq!(options.get_str("split"), Some("median"));
        assert_eq!(options.get_bool("missing"), None);
        assert_eq!(options.len(), 4);
    }

    #[test]
    fn test_render_options_from_toml() {
        let text = r#"
            accelerator = "linear"
            min_distance = 0.001

            [accelerator_options]
            leaf_size = 2
        "#;
        let options = RenderOptions::from_toml_str(text).unwrap();
        assert_eq!(options.accelerator, "linear");
        assert_eq!(options.accelerator_options.get_usize("leaf_size"), Some(2));
        assert!(!options.flatten_instances);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_render_options_from_ron() {
        let text = r#"(accelerator: "bvh", max_distance: 100.0, accelerator_options: {"parallel_threshold": 64})"#;
        let options = RenderOptions::from_ron_str(text).unwrap();
        assert_eq!(options.max_distance, 100.0);
        assert_eq!(options.accelerator_options.get_usize("parallel_threshold"), Some(64));
    }

    #[test]
    fn test_render_options_validation() {
        let bad = RenderOptions::default().with_distances(1.0, 0.5);
        assert!(matches!(bad.validate(), Err(ConfigError::Invalid { .. })));

        let empty = RenderOptions::default().with_accelerator("");
        assert!(empty.validate().is_err());
    }
}
