//! Median-split bounding volume hierarchy over boxes
//!
//! The tree stores only item indices; callers keep the items and supply an
//! intersection callback during traversal. Nodes are laid out depth first,
//! so every child sits after its parent and [`Bvh::refit`] can sweep the node
//! array backwards.

use smallvec::SmallVec;

use crate::batch::Ray;
use crate::foundation::math::{reciprocal, Aabb};

#[derive(Debug, Clone)]
enum NodeKind {
    Leaf { first: u32, count: u32 },
    Inner { left: u32, right: u32 },
}

#[derive(Debug, Clone)]
struct Node {
    bounds: Aabb,
    kind: NodeKind,
}

/// Hierarchy over a list of item bounds
#[derive(Debug, Clone, Default)]
pub struct Bvh {
    nodes: Vec<Node>,
    items: Vec<u32>,
}

impl Bvh {
    /// Build over `bounds`, item `i` having box `bounds[i]`
    pub fn build(bounds: &[Aabb], leaf_size: usize) -> Self {
        let leaf_size = leaf_size.max(1);
        let mut items: Vec<u32> = (0..bounds.len() as u32).collect();
        let mut nodes = Vec::with_capacity((2 * bounds.len() / leaf_size).max(1));
        if !items.is_empty() {
            build_node(&mut nodes, bounds, &mut items, 0, leaf_size);
        }
        Self { nodes, items }
    }

    /// Number of nodes
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of items the tree was built over
    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    /// Bounds of everything in the tree
    pub fn bounds(&self) -> Aabb {
        self.nodes.first().map_or_else(Aabb::empty, |n| n.bounds)
    }

    /// Recompute node boxes after item boxes moved, keeping the topology
    ///
    /// `bounds` must have as many entries as the tree was built over.
    pub fn refit(&mut self, bounds: &[Aabb]) {
        debug_assert_eq!(bounds.len(), self.items.len());
        for index in (0..self.nodes.len()).rev() {
            let fitted = match self.nodes[index].kind {
                NodeKind::Leaf { first, count } => self.items[first as usize..(first + count) as usize]
                    .iter()
                    .fold(Aabb::empty(), |acc, &item| acc.union(&bounds[item as usize])),
                NodeKind::Inner { left, right } => {
                    self.nodes[left as usize].bounds.union(&self.nodes[right as usize].bounds)
                }
            };
            self.nodes[index].bounds = fitted;
        }
    }

    /// Visit every item whose box the ray enters before `t_max`
    ///
    /// `visit` receives the item index and the current far limit and returns
    /// the new far limit, which prunes the rest of the traversal. The final
    /// limit is returned.
    pub fn traverse(&self, ray: &Ray, t_min: f32, mut t_max: f32, mut visit: impl FnMut(u32, f32) -> f32) -> f32 {
        if self.nodes.is_empty() {
            return t_max;
        }
        let inv_dir = reciprocal(&ray.direction);
        let mut stack: SmallVec<[u32; 64]> = SmallVec::new();
        stack.push(0);

        while let Some(index) = stack.pop() {
            let node = &self.nodes[index as usize];
            if node.bounds.intersect_ray(&ray.origin, &inv_dir, t_min, t_max).is_none() {
                continue;
            }
            match node.kind {
                NodeKind::Leaf { first, count } => {
                    for &item in &self.items[first as usize..(first + count) as usize] {
                        t_max = visit(item, t_max);
                    }
                }
                NodeKind::Inner { left, right } => {
                    // Visit the nearer child first
                    let axis = node.bounds.longest_axis();
                    if ray.direction[axis] < 0.0 {
                        stack.push(left);
                        stack.push(right);
                    } else {
                        stack.push(right);
                        stack.push(left);
                    }
                }
            }
        }
        t_max
    }
}

fn build_node(nodes: &mut Vec<Node>, bounds: &[Aabb], items: &mut [u32], offset: u32, leaf_size: usize) -> u32 {
    let node_bounds = items
        .iter()
        .fold(Aabb::empty(), |acc, &item| acc.union(&bounds[item as usize]));
    let index = nodes.len() as u32;

    if items.len() <= leaf_size {
        nodes.push(Node {
            bounds: node_bounds,
            kind: NodeKind::Leaf {
                first: offset,
                count: items.len() as u32,
            },
        });
        return index;
    }

    // Split at the median centroid along the longest axis of the centroid box
    let centroids = items
        .iter()
        .fold(Aabb::empty(), |mut acc, &item| {
            acc.expand_point(&bounds[item as usize].center());
            acc
        });
    let axis = centroids.longest_axis();
    let mid = items.len() / 2;
    items.select_nth_unstable_by(mid, |&a, &b| {
        let ca = bounds[a as usize].center()[axis];
        let cb = bounds[b as usize].center()[axis];
        ca.total_cmp(&cb)
    });

    nodes.push(Node {
        bounds: node_bounds,
        kind: NodeKind::Inner { left: 0, right: 0 },
    });
    let (left_items, right_items) = items.split_at_mut(mid);
    let left = build_node(nodes, bounds, left_items, offset, leaf_size);
    let right = build_node(nodes, bounds, right_items, offset + mid as u32, leaf_size);
    nodes[index as usize].kind = NodeKind::Inner { left, right };
    index
}
