use crate::bounds::{Aabb, BoundsPolicy};
use crate::structures::PointSource;
use std::array;

#[derive(Debug, Clone)]
pub struct OctreeNode {
    pub bounds: Aabb,
    /// Arena indices of the non-empty octants, empty for leaves.
    pub children: Vec<usize>,
    /// Point indices owned by a leaf. Internal nodes drop theirs once split.
    pub indices: Vec<usize>,
    /// Leaf kept above capacity because its points could not be separated.
    pub forced: bool,
}

impl OctreeNode {
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// Octree of point indices, stored as a flat arena in pre-order.
#[derive(Debug, Clone, Default)]
pub struct Octree {
    nodes: Vec<OctreeNode>,
}

#[inline]
fn octant(position: glam::Vec3A, center: glam::Vec3A) -> usize {
    (position.x > center.x) as usize
        | ((position.y > center.y) as usize) << 1
        | ((position.z > center.z) as usize) << 2
}

fn bucket_by_octant<P: PointSource>(
    points: &P,
    indices: Vec<usize>,
    center: glam::Vec3A,
) -> [Vec<usize>; 8] {
    let mut buckets: [Vec<usize>; 8] = array::from_fn(|_| Vec::new());
    for i in indices {
        buckets[octant(points.position(i), center)].push(i);
    }
    buckets
}

/// Center of `bounds`, moved to `min` on any axis where rounding left it
/// outside `[min, max)`, so distinct values always land on both sides.
fn split_center(bounds: &Aabb) -> glam::Vec3A {
    let center = bounds.center();
    let stuck = (center.cmpge(bounds.max) | center.cmplt(bounds.min)) & bounds.min.cmplt(bounds.max);
    glam::Vec3A::select(stuck, bounds.min, center)
}

impl Octree {
    /// Panics if `max_points` is 0.
    pub fn build<P: PointSource>(
        points: &P,
        indices: Vec<usize>,
        max_points: usize,
        policy: BoundsPolicy,
    ) -> Self {
        assert!(max_points > 0, "max_points must be at least 1");
        let mut tree = Octree::default();
        if !indices.is_empty() {
            tree.build_node(points, indices, max_points, policy);
        }
        tree
    }

    fn build_node<P: PointSource>(
        &mut self,
        points: &P,
        indices: Vec<usize>,
        max_points: usize,
        policy: BoundsPolicy,
    ) -> usize {
        let bounds = policy.node_bounds(points, &indices);
        let id = self.nodes.len();
        if indices.len() <= max_points {
            self.nodes.push(OctreeNode {
                bounds,
                children: Vec::new(),
                indices,
                forced: false,
            });
            return id;
        }

        let count = indices.len();
        let mut buckets = bucket_by_octant(points, indices, bounds.center());

        // A wide splat can pull the node center past every position. Retry
        // at the middle of the positions themselves.
        if buckets.iter().any(|b| b.len() == count) {
            let all: Vec<usize> = buckets.iter_mut().flat_map(std::mem::take).collect();
            let positions = BoundsPolicy::Tight.node_bounds(points, &all);
            buckets = bucket_by_octant(points, all, split_center(&positions));
        }

        // Still no octant smaller than the node: the positions coincide.
        if let Some(full) = buckets.iter_mut().find(|b| b.len() == count) {
            log::debug!(
                "octree: forcing leaf of {} inseparable points at {:?}",
                count,
                bounds.center()
            );
            self.nodes.push(OctreeNode {
                bounds,
                children: Vec::new(),
                indices: std::mem::take(full),
                forced: true,
            });
            return id;
        }

        self.nodes.push(OctreeNode {
            bounds,
            children: Vec::new(),
            indices: Vec::new(),
            forced: false,
        });
        let mut children = Vec::with_capacity(8);
        for bucket in buckets.into_iter().filter(|b| !b.is_empty()) {
            children.push(self.build_node(points, bucket, max_points, policy));
        }
        self.nodes[id].children = children;
        id
    }

    pub fn root(&self) -> Option<&OctreeNode> {
        self.nodes.first()
    }

    pub fn node(&self, id: usize) -> &OctreeNode {
        &self.nodes[id]
    }

    pub fn nodes(&self) -> &[OctreeNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Leaves in pre-order.
    pub fn leaves(&self) -> Vec<&OctreeNode> {
        let mut leaves = Vec::new();
        let mut stack = if self.nodes.is_empty() { vec![] } else { vec![0] };
        while let Some(id) = stack.pop() {
            let node = &self.nodes[id];
            if node.is_leaf() {
                leaves.push(node);
            } else {
                stack.extend(node.children.iter().rev());
            }
        }
        leaves
    }

    /// Number of levels, 0 for an empty tree.
    pub fn depth(&self) -> usize {
        fn level(tree: &Octree, id: usize) -> usize {
            1 + tree.nodes[id]
                .children
                .iter()
                .map(|&c| level(tree, c))
                .max()
                .unwrap_or(0)
        }
        if self.nodes.is_empty() {
            0
        } else {
            level(self, 0)
        }
    }
}
