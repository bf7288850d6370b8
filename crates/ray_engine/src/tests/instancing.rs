//! Instancing scenarios across accelerators
//!
//! The same nested scene is traced by the hierarchy accelerator directly and
//! by the brute force accelerator over the flattened copy; both must agree on
//! what every ray hits.

use std::sync::Arc;

use crate::batch::{HitList, Range, Ray, RayList, SampleState};
use crate::config::RenderOptions;
use crate::foundation::math::{Aabb, Color, Mat4, Point3, Vec3};
use crate::object::{CurveMeshData, GenericHit, GenericPrimitive, Instance, LightData, Object, ObjectRef};
use crate::scene::Scene;
use crate::tests::fixtures::{quad, rays_down};

#[derive(Debug)]
struct Sphere {
    center: Point3,
    radius: f32,
}

impl GenericPrimitive for Sphere {
    fn bounds(&self) -> Aabb {
        let r = Vec3::repeat(self.radius);
        Aabb::new(self.center - r, self.center + r)
    }

    fn intersect(&self, ray: &Ray, t_min: f32, t_max: f32) -> Option<GenericHit> {
        let oc = ray.origin - self.center;
        let a = ray.direction.norm_squared();
        let b = oc.dot(&ray.direction);
        let c = oc.norm_squared() - self.radius * self.radius;
        let disc = b * b - a * c;
        if disc < 0.0 || a == 0.0 {
            return None;
        }
        let t = (-b - disc.sqrt()) / a;
        (t >= t_min && t < t_max).then(|| GenericHit {
            distance: t,
            element: 0,
            u: 0.0,
            v: 0.0,
            normal: (ray.at(t) - self.center) / self.radius,
        })
    }
}

/// Two rows of cards, a ball and a hair strand, with the rows instanced twice
fn nested_scene() -> ObjectRef {
    let card = quad("card", 0.0, 0.4);
    let row = Object::instance(
        "row",
        Instance::new(
            card,
            (0..3)
                .map(|i| Mat4::new_translation(&Vec3::new(i as f32, 0.0, 0.0)))
                .collect(),
        ),
    );
    let ball = Object::generic(
        "ball",
        Sphere {
            center: Point3::new(1.0, 1.0, 0.0),
            radius: 0.3,
        },
    );
    let hair = Object::curve_mesh(
        "hair",
        CurveMeshData::new(vec![Point3::new(-0.5, 2.0, 0.2), Point3::new(2.5, 2.0, 0.2)], vec![2], 0.2),
    );

    let cell = Object::scene_graph("cell");
    let cell_graph = cell.as_scene_graph().unwrap();
    cell_graph.add_object(row);
    cell_graph.add_object(ball);
    cell_graph.add_object(hair);

    let root = Object::scene_graph("root");
    let graph = root.as_scene_graph().unwrap();
    let key = Object::light("key", LightData::point(Point3::new(0.0, 5.0, 5.0), Color::repeat(1.0), 10.0));
    graph.add_object(Arc::clone(&key));
    graph.add_light(&key);
    graph.add_object(Object::instance(
        "cells",
        Instance::new(
            cell,
            vec![
                Mat4::identity(),
                Mat4::new_translation(&Vec3::new(0.0, 4.0, -1.0)) * Mat4::new_scaling(2.0),
            ],
        ),
    ));
    root
}

fn grid(step: f32) -> RayList {
    let mut points = Vec::new();
    let mut y = -0.917;
    while y < 9.0 {
        let mut x = -0.917;
        while x < 5.0 {
            points.push((x, y));
            x += step;
        }
        y += step;
    }
    rays_down(&points, 5.0)
}

fn trace_with(root: &ObjectRef, options: RenderOptions, rays: &RayList) -> (Scene, HitList) {
    let mut scene = Scene::with_root(Arc::clone(root)).unwrap();
    scene.set_render_options(options).unwrap();
    let mut hits = HitList::new(rays.len());
    assert!(scene.begin_render());
    scene.trace(&Range::new(rays.len()), rays, &mut hits);
    scene.end_render();
    (scene, hits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_nested_and_flattened_agree() {
        let root = nested_scene();
        let rays = grid(0.2311);
        let (nested, a) = trace_with(&root, RenderOptions::default(), &rays);
        let (flat, b) = trace_with(&root, RenderOptions::default().with_accelerator("linear"), &rays);

        let mut seen = std::collections::BTreeSet::new();
        for i in 0..rays.len() {
            assert_eq!(a[i].is_hit(), b[i].is_hit(), "ray {i}");
            if !a[i].is_hit() {
                continue;
            }
            assert_relative_eq!(a[i].distance(), b[i].distance(), epsilon = 1e-4);
            assert_relative_eq!(a[i].normal(), b[i].normal(), epsilon = 1e-4);

            let pa = nested.resolve_hit(&a[i]).unwrap();
            let pb = flat.resolve_hit(&b[i]).unwrap();
            assert!(Arc::ptr_eq(&pa.geometry, &pb.geometry), "ray {i}");
            assert_relative_eq!(pa.transform, pb.transform);
            seen.insert(pa.geometry.name().to_string());
        }
        let expected: std::collections::BTreeSet<String> =
            ["ball", "card", "hair"].iter().map(|s| s.to_string()).collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_flatten_policy_forces_flat_commit() {
        let root = nested_scene();
        let rays = grid(0.5011);
        let mut options = RenderOptions::default();
        options.flatten_instances = true;
        let (flat, b) = trace_with(&root, options, &rays);
        let (nested, a) = trace_with(&root, RenderOptions::default(), &rays);

        assert_eq!(flat.accelerator().map(|acc| acc.name().to_string()), Some("bvh".into()));
        let hit = (0..rays.len()).find(|&i| b[i].is_hit()).unwrap();
        assert_eq!(b[hit].stack().len(), 1, "flattened stacks have a single entry");
        assert!(a[hit].stack().len() > 1);
        assert!(Arc::ptr_eq(
            &flat.resolve_hit(&b[hit]).unwrap().geometry,
            &nested.resolve_hit(&a[hit]).unwrap().geometry
        ));
    }

    #[test]
    fn test_scaled_copy_distances() {
        let root = nested_scene();
        // Middle card of the second cell: x = 2, y = 4, z = -1
        let rays = rays_down(&[(2.0, 4.0)], 5.0);
        let (scene, hits) = trace_with(&root, RenderOptions::default(), &rays);

        assert_relative_eq!(hits[0].distance(), 6.0, epsilon = 1e-5);
        assert_eq!(hits[0].stack(), &[1, 1, 0, 1]);
        let path = scene.resolve_hit(&hits[0]).unwrap();
        assert_eq!(path.geometry.name(), "card");
        assert_eq!(path.instance.as_ref().map(|(inst, copy)| (inst.name().to_string(), *copy)), Some(("row".into(), 1)));
        assert_relative_eq!(path.transform.transform_point(&Point3::origin()), Point3::new(2.0, 4.0, -1.0));

        // Hair in the second cell: y = 8, z = -1 + 2 * 0.2, radius 2 * 0.1
        let hair = rays_down(&[(2.0, 8.0)], 5.0);
        let mut hair_hits = HitList::new(1);
        let mut scene = scene;
        assert!(scene.begin_render());
        scene.trace(&Range::new(1), &hair, &mut hair_hits);
        scene.end_render();
        assert!(hair_hits[0].is_hit());
        assert_relative_eq!(hair_hits[0].distance(), 5.0 - (-0.6 + 0.2), epsilon = 1e-4);
        assert_eq!(hair_hits[0].element(), 0);
    }

    #[test]
    fn test_light_is_not_intersected() {
        let root = nested_scene();
        let mut rays = RayList::new(0);
        rays.push(
            Ray::new(Point3::new(0.0, 5.0, 10.0), -Vec3::z(), 0.0),
            Color::repeat(1.0),
            0,
            SampleState::default(),
        );
        let (scene, hits) = trace_with(&root, RenderOptions::default(), &rays);
        assert!(hits[0].stack().first() != Some(&0));
        assert_eq!(scene.scene_graph().unwrap().light_count(), 1);
    }
}
