//! Brute force accelerator
//!
//! Tests every primitive of every child against every ray. Only single-level
//! graphs are accepted, so scenes with nested graphs or instances are
//! flattened before they reach it. Useful as a reference when checking other
//! accelerators and for tiny scenes.

use std::sync::Arc;

use super::geometry::{LocalHit, PreparedGeometry};
use super::{Accelerator, AcceleratorError, Factory, HitGeometry, UpdateEvent};
use crate::batch::{Hit, HitList, HitRecord, Range, Ray, RayList};
use crate::config::AcceleratorOptions;
use crate::foundation::math::{transform_normal, Mat4};
use crate::object::{ObjectKind, ObjectRef, ObjectType};

/// Accelerator that intersects everything with everything
#[derive(Debug)]
pub struct LinearAccelerator {
    root: Option<ObjectRef>,
    /// Indexed like the children of the root, `None` for lights
    children: Vec<Option<PreparedGeometry>>,
    inverse: Mat4,
}

impl Default for LinearAccelerator {
    fn default() -> Self {
        Self {
            root: None,
            children: Vec::new(),
            inverse: Mat4::identity(),
        }
    }
}

impl LinearAccelerator {
    /// Registry style name
    pub const STYLE: &'static str = "linear";

    /// Factory for the registry; the linear accelerator reads no options
    pub fn factory() -> Factory {
        Factory::new(Self::STYLE, |_options: &AcceleratorOptions| {
            Some(Box::new(Self::default()) as Box<dyn Accelerator>)
        })
    }

    /// Prepare every child of `root`, leaving the current state untouched
    fn prepare(root: &ObjectRef) -> Result<(Vec<Option<PreparedGeometry>>, Mat4), AcceleratorError> {
        let graph = root
            .as_scene_graph()
            .ok_or_else(|| AcceleratorError::NotASceneGraph(root.name().to_string()))?;

        let mut children = Vec::with_capacity(graph.size());
        for child in graph.objects() {
            match child.kind() {
                ObjectKind::SceneGraph(_) | ObjectKind::Instance(_) => {
                    return Err(AcceleratorError::Unsupported {
                        accelerator: Self::STYLE.to_string(),
                        what: format!("nested '{}' in a committed graph", child.name()),
                    });
                }
                _ => children.push(PreparedGeometry::prepare(&child)?),
            }
        }
        let inverse = graph.transform().try_inverse().unwrap_or_else(Mat4::identity);
        Ok((children, inverse))
    }

    /// Swap in a freshly prepared `root`; on error the previous scene stays live
    fn rebuild(&mut self, root: &ObjectRef) -> Result<(), AcceleratorError> {
        let (children, inverse) = Self::prepare(root)?;
        self.root = Some(Arc::clone(root));
        self.children = children;
        self.inverse = inverse;
        log::debug!("linear: built '{}' with {} children", root.name(), self.children.len());
        Ok(())
    }

    fn trace_ray(&self, ray: &Ray, t_min: f32, t_max: f32) -> Option<(u32, LocalHit)> {
        let local = ray.transformed(&self.inverse);
        let mut limit = t_max;
        let mut best = None;
        for (index, geometry) in self.children.iter().enumerate() {
            let Some(geometry) = geometry else { continue };
            for prim in 0..geometry.prim_count() as u32 {
                if let Some(hit) = geometry.intersect(prim, &local, t_min, limit) {
                    limit = hit.distance;
                    best = Some((index as u32, hit));
                }
            }
        }
        best
    }
}

impl Accelerator for LinearAccelerator {
    fn name(&self) -> &str {
        Self::STYLE
    }

    fn commit_scene(&mut self, root: &ObjectRef) -> Result<(), AcceleratorError> {
        if root.object_type() != ObjectType::SceneGraph {
            return Err(AcceleratorError::NotASceneGraph(root.name().to_string()));
        }
        self.rebuild(root)
    }

    fn update_object(&mut self, object: &ObjectRef, event: UpdateEvent) -> Result<(), AcceleratorError> {
        let Some(root) = self.root.clone() else {
            return Err(AcceleratorError::NotCommitted(Self::STYLE.to_string()));
        };
        log::trace!("linear: rebuilding after {:?} on '{}'", event, object.name());
        self.rebuild(&root)
    }

    fn send_rays(&self, range: &Range, hits: &mut HitList, rays: &RayList, max_distance: f32, min_distance: f32) {
        let min_distance = min_distance.max(0.0);
        for i in range.iter() {
            let limit = max_distance.min(hits[i].distance());
            if let Some((child, hit)) = self.trace_ray(&rays.ray(i), min_distance, limit) {
                let normal = transform_normal(&self.inverse, &hit.normal);
                hits[i].set(&HitRecord {
                    distance: hit.distance,
                    element: hit.element,
                    sub_element: hit.sub_element,
                    u: hit.u,
                    v: hit.v,
                    normal: normal.try_normalize(f32::EPSILON).unwrap_or(normal),
                    stack: &[child],
                });
            }
        }
    }

    fn thread_safe(&self) -> bool {
        true
    }

    fn nested_instancing(&self) -> bool {
        false
    }

    fn hit_geometry(&self, hit: &Hit) -> Option<HitGeometry<'_>> {
        let [child] = hit.stack() else {
            return None;
        };
        let geometry = self.children.get(*child as usize)?.as_ref()?;
        let (u, v) = hit.uv();
        Some(HitGeometry {
            object: geometry.object().id(),
            attributes: geometry.attributes()?,
            lookup: geometry.lookup(hit.element(), hit.sub_element(), u, v)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accel::BvhAccelerator;
    use crate::foundation::math::Vec3;
    use crate::object::{Instance, Object};
    use crate::tests::fixtures::{quad, rays_down};
    use approx::assert_relative_eq;

    #[test]
    fn test_matches_bvh_on_flat_scene() {
        let root = Object::scene_graph("root");
        let graph = root.as_scene_graph().unwrap();
        graph.add_object(quad("a", 0.0, 1.0));
        graph.add_object(Object::light("sun", Default::default()));
        graph.add_object(quad("b", 1.0, 0.5));
        graph.set_transform(Mat4::new_translation(&Vec3::new(0.0, 0.0, -1.0)));

        let mut linear = LinearAccelerator::default();
        linear.commit_scene(&root).unwrap();
        let mut bvh = BvhAccelerator::default();
        bvh.commit_scene(&root).unwrap();

        let rays = rays_down(&[(0.0, 0.0), (0.8, 0.8), (3.0, 3.0)], 5.0);
        let mut a = HitList::new(3);
        let mut b = HitList::new(3);
        linear.send_rays(&Range::new(3), &mut a, &rays, f32::MAX, 0.0);
        bvh.send_rays(&Range::new(3), &mut b, &rays, f32::MAX, 0.0);

        assert_eq!(a[0].stack(), &[2]);
        assert_relative_eq!(a[0].distance(), 5.0);
        assert_eq!(a[1].stack(), &[0]);
        assert!(!a[2].is_hit());
        for i in 0..3 {
            assert_eq!(a[i].is_hit(), b[i].is_hit());
            assert_eq!(a[i].stack(), b[i].stack());
            assert_relative_eq!(a[i].distance(), b[i].distance());
        }
        assert!(linear.hit_geometry(&a[0]).is_some());
    }

    #[test]
    fn test_negative_min_distance_is_clamped() {
        let root = Object::scene_graph("root");
        root.as_scene_graph().unwrap().add_object(quad("floor", 0.0, 1.0));
        let mut linear = LinearAccelerator::default();
        linear.commit_scene(&root).unwrap();

        let rays = rays_down(&[(0.0, 0.0)], -1.0);
        let mut hits = HitList::new(1);
        linear.send_rays(&Range::new(1), &mut hits, &rays, f32::MAX, -5.0);
        assert!(!hits[0].is_hit());
        assert!(hits[0].validate());
    }

    #[test]
    fn test_rejects_nested_scenes() {
        let leaf = quad("leaf", 0.0, 1.0);
        let root = Object::scene_graph("root");
        root.as_scene_graph()
            .unwrap()
            .add_object(Object::instance("copies", Instance::new(leaf, vec![Mat4::identity()])));

        let mut linear = LinearAccelerator::default();
        assert!(!linear.nested_instancing());
        assert!(matches!(
            linear.commit_scene(&root),
            Err(AcceleratorError::Unsupported { .. })
        ));
    }

    #[test]
    fn test_failed_commit_keeps_previous_scene() {
        let root = Object::scene_graph("first");
        root.as_scene_graph().unwrap().add_object(quad("a", 0.0, 1.0));
        let mut linear = LinearAccelerator::default();
        linear.commit_scene(&root).unwrap();

        let nested = Object::scene_graph("second");
        {
            let graph = nested.as_scene_graph().unwrap();
            graph.add_object(quad("b", 2.0, 1.0));
            let copies = Instance::new(quad("c", 1.0, 1.0), vec![Mat4::identity()]);
            graph.add_object(Object::instance("copies", copies));
        }
        assert!(linear.commit_scene(&nested).is_err());

        // Updates still rebuild the first scene, which a half-swapped state would refuse
        linear.update_object(&root, UpdateEvent::CONTENTS).unwrap();
        let rays = rays_down(&[(0.0, 0.0)], 5.0);
        let mut hits = HitList::new(1);
        linear.send_rays(&Range::new(1), &mut hits, &rays, f32::MAX, 0.0);
        assert_eq!(hits[0].stack(), &[0]);
        assert_relative_eq!(hits[0].distance(), 5.0);
        let geometry = linear.hit_geometry(&hits[0]).unwrap();
        assert_eq!(geometry.object, root.as_scene_graph().unwrap().object(0).unwrap().id());
    }

    #[test]
    fn test_update_rebuilds() {
        let root = Object::scene_graph("root");
        let graph = root.as_scene_graph().unwrap();
        graph.add_object(quad("a", 0.0, 1.0));
        let mut linear = LinearAccelerator::default();
        linear.commit_scene(&root).unwrap();

        let added = quad("b", 2.0, 1.0);
        graph.add_object(Arc::clone(&added));
        linear.update_object(&added, UpdateEvent::NEW).unwrap();

        let rays = rays_down(&[(0.0, 0.0)], 5.0);
        let mut hits = HitList::new(1);
        linear.send_rays(&Range::new(1), &mut hits, &rays, f32::MAX, 0.0);
        assert_eq!(hits[0].stack(), &[1]);
        assert_relative_eq!(hits[0].distance(), 3.0);
    }
}
