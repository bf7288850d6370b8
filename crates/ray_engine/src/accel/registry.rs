//! Accelerator factories by style name

use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

use super::Accelerator;
use crate::config::AcceleratorOptions;
use crate::foundation::collections::FastMap;

/// Constructor behind a [`Factory`]; `None` rejects the options
pub type FactoryFn = dyn Fn(&AcceleratorOptions) -> Option<Box<dyn Accelerator>> + Send + Sync;

/// Named accelerator constructor
#[derive(Clone)]
pub struct Factory {
    name: String,
    create: Arc<FactoryFn>,
}

impl Factory {
    /// Wrap a constructor
    pub fn new(
        name: impl Into<String>,
        create: impl Fn(&AcceleratorOptions) -> Option<Box<dyn Accelerator>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            create: Arc::new(create),
        }
    }

    /// Style name the factory builds
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Build an accelerator, or `None` when the options are unusable
    pub fn create(&self, options: &AcceleratorOptions) -> Option<Box<dyn Accelerator>> {
        (self.create)(options)
    }
}

impl fmt::Debug for Factory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Factory").field("name", &self.name).finish_non_exhaustive()
    }
}

/// Map from style name to factory
///
/// Safe to share between threads; the crate keeps one process-wide instance
/// behind [`registry`](super::registry).
#[derive(Debug, Default)]
pub struct AcceleratorRegistry {
    factories: RwLock<FastMap<String, Factory>>,
}

impl AcceleratorRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` under `name`, returning the factory it replaced
    pub fn register_accelerator(&self, name: impl Into<String>, factory: Factory) -> Option<Factory> {
        let name = name.into();
        let previous = self.factories.write().insert(name.clone(), factory);
        if previous.is_some() {
            log::info!("Replaced accelerator factory '{}'", name);
        } else {
            log::debug!("Registered accelerator factory '{}'", name);
        }
        previous
    }

    /// Factory registered under `name`
    pub fn find_factory(&self, name: &str) -> Option<Factory> {
        self.factories.read().get(name).cloned()
    }

    /// Build an accelerator of style `name`
    ///
    /// `None` when the style is unknown or its factory rejects the options.
    pub fn new_accelerator(&self, name: &str, options: &AcceleratorOptions) -> Option<Box<dyn Accelerator>> {
        let Some(factory) = self.find_factory(name) else {
            log::warn!("Unknown accelerator style '{}'", name);
            return None;
        };
        let accel = factory.create(options);
        if accel.is_none() {
            log::warn!("Accelerator '{}' rejected options {:?}", name, options);
        }
        accel
    }

    /// Registered style names, sorted
    pub fn styles(&self) -> Vec<String> {
        let mut styles: Vec<String> = self.factories.read().keys().cloned().collect();
        styles.sort_unstable();
        styles
    }
}
