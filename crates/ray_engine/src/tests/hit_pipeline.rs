//! Batch pipeline scenarios through a rendering scene
//!
//! Trace, prune, compact and retrace the way a multi-bounce integrator
//! drives the core.

use std::sync::Arc;

use crate::accel::UpdateEvent;
use crate::batch::{HitList, Range, RayList};
use crate::foundation::math::Color;
use crate::scene::Scene;
use crate::tests::fixtures::{colored_quad, quad, rays_down};

fn grid_rays(n: usize, spacing: f32, height: f32) -> RayList {
    let offset = 0.5 * spacing * (n as f32 - 1.0);
    let points: Vec<(f32, f32)> = (0..n * n)
        .map(|i| ((i % n) as f32 * spacing - offset, (i / n) as f32 * spacing - offset))
        .collect();
    rays_down(&points, height)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_misses_retraced_after_scene_grows() {
        crate::foundation::logging::init_test();
        let mut scene = Scene::new("world");
        let graph = scene.scene_graph().unwrap();
        graph.add_object(quad("floor", 0.0, 2.0));

        // 10 x 10 rays over [-4.5, 4.5], 16 of them land on the floor
        let rays = grid_rays(10, 1.0, 3.0);
        let mut hits = HitList::new(rays.len());
        assert!(scene.begin_render());
        scene.trace(&Range::new(rays.len()), &rays, &mut hits);
        scene.end_render();

        let mut misses = Range::new(rays.len());
        misses.prune_hits(&hits);
        assert_eq!(misses.len(), 84);
        assert!(!misses.is_trivial());

        let secondary = RayList::compact(&misses, &rays);
        let secondary_hits = HitList::compact(&misses, &hits);
        assert_eq!(secondary.len(), 84);
        assert_eq!(secondary_hits.hit_count(&Range::new(84)), 0);
        for (k, i) in misses.iter().enumerate() {
            assert_eq!(secondary.pixels()[k], rays.pixels()[i]);
        }

        let backdrop = quad("backdrop", -1.0, 10.0);
        scene.scene_graph().unwrap().add_object(Arc::clone(&backdrop));
        let root = Arc::clone(scene.root());
        scene.update_object(&root, UpdateEvent::CONTENTS).unwrap();

        let mut retraced = secondary_hits;
        assert!(scene.begin_render());
        scene.trace(&Range::new(secondary.len()), &secondary, &mut retraced);
        scene.end_render();

        assert_eq!(retraced.hit_count(&Range::new(84)), 84);
        for hit in retraced.iter() {
            assert_relative_eq!(hit.distance(), 4.0);
            assert_eq!(hit.stack(), &[1]);
        }

        // Scatter the secondary results back into the primary slots
        let mut merged = hits.clone();
        for (k, i) in misses.iter().enumerate() {
            merged[i] = retraced[k].clone();
        }
        assert_eq!(merged.hit_count(&Range::new(100)), 100);
    }

    #[test]
    fn test_partition_hits_by_child() {
        let mut scene = Scene::new("world");
        let graph = scene.scene_graph().unwrap();
        graph.add_object(colored_quad("inner", 1.0, 1.0, Color::new(1.0, 0.0, 0.0)));
        graph.add_object(colored_quad("outer", 0.0, 3.0, Color::new(0.0, 1.0, 0.0)));

        // 8 x 8 rays over [-3.5, 3.5]
        let rays = grid_rays(8, 1.0, 5.0);
        let mut hits = HitList::new(rays.len());
        assert!(scene.begin_render());
        scene.trace(&Range::new(rays.len()), &rays, &mut hits);
        scene.end_render();

        let groups = Range::new(rays.len()).partition(|i| hits[i].stack().first().map_or(-1, |&c| c as i32), -1);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[&0].len(), 4);
        assert_eq!(groups[&1].len(), 36 - 4);
        assert!(groups[&0].iter().all(|i| hits[i].distance() < 4.5));
        assert!(groups.values().all(Range::is_ascending));

        let total: usize = groups.values().map(Range::len).sum();
        assert_eq!(total, hits.hit_count(&Range::new(rays.len())));
    }

    #[test]
    fn test_threads_on_disjoint_ranges() {
        let mut scene = Scene::new("world");
        scene.scene_graph().unwrap().add_object(quad("floor", 0.0, 5.0));
        let rays = grid_rays(16, 0.75, 2.0);
        let all = Range::new(rays.len());

        assert!(scene.begin_render());
        assert!(scene.accelerator().is_some_and(|a| a.thread_safe()));

        let mut serial = HitList::new(rays.len());
        scene.trace(&all, &rays, &mut serial);

        let mut merged = HitList::new(rays.len());
        let pieces = all.split(4);
        let results: Vec<(Range, HitList)> = std::thread::scope(|s| {
            let handles: Vec<_> = pieces
                .iter()
                .map(|piece| {
                    let scene = &scene;
                    let rays = &rays;
                    s.spawn(move || {
                        let mut local = HitList::new(rays.len());
                        scene.trace(piece, rays, &mut local);
                        (piece.clone(), local)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        for (piece, local) in &results {
            merged.copy_from(piece, local);
        }
        scene.end_render();

        assert_eq!(merged, serial);
        assert_eq!(scene.stats().rays_traced, 2 * rays.len() as u64);
    }
}
