//! Instanced copies of a prototype object

use parking_lot::RwLock;
use std::sync::Arc;

use super::ObjectRef;
use crate::foundation::math::Mat4;

/// Transformed copies of a prototype
///
/// The prototype may be a geometry object or a scene graph, which in turn may
/// hold further instances. Copy `i` places the prototype with `transforms[i]`,
/// and `i` is the id pushed on a hit stack when a ray enters that copy.
#[derive(Debug)]
pub struct Instance {
    prototype: RwLock<ObjectRef>,
    transforms: RwLock<Arc<Vec<Mat4>>>,
}

impl Instance {
    /// Create an instance of `prototype` at each transform
    pub fn new(prototype: ObjectRef, transforms: Vec<Mat4>) -> Self {
        Self {
            prototype: RwLock::new(prototype),
            transforms: RwLock::new(Arc::new(transforms)),
        }
    }

    /// The instanced object
    pub fn prototype(&self) -> ObjectRef {
        Arc::clone(&*self.prototype.read())
    }

    /// Swap the instanced object; notify with `PROTOTYPE` afterwards
    pub fn set_prototype(&self, prototype: ObjectRef) {
        *self.prototype.write() = prototype;
    }

    /// Snapshot of the per-copy transforms
    pub fn transforms(&self) -> Arc<Vec<Mat4>> {
        Arc::clone(&*self.transforms.read())
    }

    /// Replace the per-copy transforms; notify with `XFORM` afterwards
    pub fn set_transforms(&self, transforms: Vec<Mat4>) {
        *self.transforms.write() = Arc::new(transforms);
    }

    /// Number of copies
    pub fn len(&self) -> usize {
        self.transforms.read().len()
    }

    /// True when there are no copies
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
