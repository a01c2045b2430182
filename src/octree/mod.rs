mod node;
pub use node::*;

mod level;
pub use level::*;

use glam::{ UVec3, Vec3 };
#[cfg(feature = "multi-thread")]
use rayon::prelude::*;
use crate::{
    error::{ Error, Result },
    utils::timed,
    BoundingBox,
    Index,
    PointCloud,
};

/// Sparse voxel octree stored as one [`Level`] per depth.
///
/// Depth 0 holds the root, depth `max_depth - 1` holds the deepest nodes.
/// The children of those nodes are the leaf voxels: they have no `Node`
/// of their own and their indices carry `max_depth` bits per axis.
/// Parents and children are never linked directly; they are found by
/// index arithmetic and a lookup in the neighbouring level.
#[derive(Debug)]
pub struct Octree {
    levels: Vec<Level>,
    bbox: BoundingBox,
    leaf_cell_size: Vec3,
}

impl Octree {
    /// Deepest tree whose sub-octree roots still fit a 64 bit address.
    pub const MAX_DEPTH: u8 = 21;

    /// Tree with no nodes covering `bbox`.
    pub fn empty(max_depth: u8, bbox: BoundingBox) -> Result<Self> {
        if max_depth == 0 || max_depth > Self::MAX_DEPTH {
            return Err(Error::InvalidDepth { depth: max_depth, max: Self::MAX_DEPTH });
        }

        Ok(Self {
            levels: (0..max_depth).map(|_| Level::new()).collect(),
            bbox,
            leaf_cell_size: bbox.leaf_cell_size(max_depth),
        })
    }

    /// Voxelizes `cloud` at `max_depth`. Points are inserted in parallel when
    /// the `multi-thread` feature is on; the result does not depend on order.
    pub fn from_point_cloud(max_depth: u8, cloud: &PointCloud) -> Result<Self> {
        let octree = Self::empty(max_depth, cloud.bounding_box())?;

        timed!({
            let insert = |pos: &Vec3| {
                if let Some(leaf) = octree.leaf_address(*pos) {
                    octree.add_leaf(leaf);
                }
            };
            #[cfg(feature = "multi-thread")]
            cloud.positions.par_iter().for_each(insert);
            #[cfg(not(feature = "multi-thread"))]
            cloud.positions.iter().for_each(insert);
        }, "octree build");

        tracing::debug!(points = cloud.len(), nodes = octree.node_count(), max_depth, "built octree");
        Ok(octree)
    }

    #[inline(always)]
    pub fn max_depth(&self) -> u8 {
        self.levels.len() as u8
    }

    #[inline(always)]
    pub fn bounding_box(&self) -> BoundingBox {
        self.bbox
    }

    #[inline(always)]
    pub fn leaf_cell_size(&self) -> Vec3 {
        self.leaf_cell_size
    }

    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    pub fn level(&self, depth: u8) -> Option<&Level> {
        self.levels.get(depth as usize)
    }

    pub fn node_count(&self) -> usize {
        self.levels.iter().map(Level::len).sum()
    }

    /// Leaf voxel holding `point`, or `None` if it lies outside the scene.
    ///
    /// Points on the max face of the box fall into the last voxel. An axis
    /// with zero extent maps everything to voxel 0.
    pub fn leaf_address(&self, point: Vec3) -> Option<Index> {
        if !self.bbox.contains(point) {
            return None;
        }

        let last = ((1u64 << self.max_depth()) - 1) as f32;
        let cell = (point - self.bbox.min) / self.leaf_cell_size;
        let axis = |v: f32| if v.is_finite() { v.floor().clamp(0.0, last) } else { 0.0 };
        let cell = Vec3::new(axis(cell.x), axis(cell.y), axis(cell.z));

        Some(Index::from(cell.as_uvec3()))
    }

    /// Center of leaf voxel `leaf` in scene coordinates.
    pub fn leaf_center(&self, leaf: Index) -> Vec3 {
        self.bbox.min + (UVec3::from(leaf).as_vec3() + Vec3::splat(0.5)) * self.leaf_cell_size
    }

    /// Marks leaf voxel `leaf` as occupied, creating any missing ancestors.
    pub fn add_leaf(&self, leaf: Index) {
        debug_assert!(leaf.fits_bits(self.max_depth()));
        self.add_path(self.max_depth() - 1, leaf.parent(), leaf.child_id());
    }

    /// Sets `child_id` on the node at (`depth`, `index`) and climbs toward the
    /// root, creating nodes as it goes. The climb stops at the first node that
    /// already existed: its own ancestors are either in place already or are
    /// being created by whichever thread made it.
    pub(crate) fn add_path(&self, depth: u8, index: Index, child_id: u8) {
        let (mut depth, mut index, mut child_id) = (depth, index, child_id);

        loop {
            let (node, created) = self.levels[depth as usize].get_or_insert(index);
            node.add_child(child_id);

            if !created || depth == 0 {
                break;
            }

            child_id = index.child_id();
            index = index.parent();
            depth -= 1;
        }
    }

    pub fn contains_leaf(&self, leaf: Index) -> bool {
        self.levels[self.levels.len() - 1]
            .get(leaf.parent())
            .is_some_and(|node| node.has_child(leaf.child_id()))
    }

    /// Every occupied leaf voxel, sorted.
    pub fn leaves(&self) -> Vec<Index> {
        let mut leaves: Vec<Index> = self.levels[self.levels.len() - 1]
            .snapshot()
            .into_iter()
            .flat_map(|(index, mask)| index.children(mask).into_iter().map(|(_, leaf)| leaf))
            .collect();
        leaves.sort_unstable();
        leaves
    }

    /// One point per occupied leaf voxel, at the voxel center.
    pub fn to_point_cloud(&self) -> PointCloud {
        PointCloud::from_positions(
            self.leaves().into_iter().map(|leaf| self.leaf_center(leaf)).collect()
        )
    }
}

#[cfg(test)]
pub(crate) fn random_cloud(seed: u64, len: usize, extent: f32) -> PointCloud {
    use rand::{ Rng, SeedableRng, rngs::StdRng };

    let mut rng = StdRng::seed_from_u64(seed);
    PointCloud::from_positions(
        (0..len)
            .map(|_| Vec3::new(
                rng.random_range(0.0..extent),
                rng.random_range(0.0..extent * 0.5),
                rng.random_range(0.0..extent * 0.25),
            ))
            .collect()
    )
}

#[test]
fn single_leaf_builds_single_chain() {
    let octree = Octree::empty(3, BoundingBox::new(Vec3::ZERO, Vec3::splat(8.0))).unwrap();
    octree.add_leaf(Index::new(3, 3, 3));

    assert_eq!(octree.node_count(), 3);
    assert_eq!(octree.levels()[2].snapshot(), vec![(Index::new(1, 1, 1), 0b1000_0000)]);
    assert_eq!(octree.levels()[1].snapshot(), vec![(Index::new(0, 0, 0), 0b1000_0000)]);
    assert_eq!(octree.levels()[0].snapshot(), vec![(Index::new(0, 0, 0), 0b0000_0001)]);
    assert_eq!(octree.leaves(), vec![Index::new(3, 3, 3)]);
}

#[test]
fn repeated_insertion_changes_nothing() {
    let octree = Octree::empty(4, BoundingBox::new(Vec3::ZERO, Vec3::splat(16.0))).unwrap();
    octree.add_leaf(Index::new(9, 2, 14));
    octree.add_leaf(Index::new(1, 1, 1));
    let before: Vec<_> = octree.levels().iter().map(Level::snapshot).collect();

    for _ in 0..5 {
        octree.add_leaf(Index::new(9, 2, 14));
    }
    let after: Vec<_> = octree.levels().iter().map(Level::snapshot).collect();
    assert_eq!(before, after);
}

#[test]
fn every_node_has_a_parent_bit() {
    let octree = Octree::from_point_cloud(6, &random_cloud(7, 2_000, 10.0)).unwrap();
    assert!(octree.levels()[0].len() <= 1);

    for depth in 1..octree.max_depth() {
        for (index, mask) in octree.levels()[depth as usize].snapshot() {
            assert_ne!(mask, 0);
            let parent = octree.levels()[depth as usize - 1].get(index.parent()).unwrap();
            assert!(parent.has_child(index.child_id()));
        }
    }
}

#[test]
fn build_is_order_independent() {
    let cloud = random_cloud(11, 5_000, 3.0);
    let mut reversed = cloud.clone();
    reversed.positions.reverse();

    let a = Octree::from_point_cloud(7, &cloud).unwrap();
    let b = Octree::from_point_cloud(7, &reversed).unwrap();
    for (left, right) in a.levels().iter().zip(b.levels()) {
        assert_eq!(left.snapshot(), right.snapshot());
    }
}

#[test]
fn every_point_lands_in_a_leaf() {
    let cloud = random_cloud(3, 500, 1.0);
    let octree = Octree::from_point_cloud(5, &cloud).unwrap();
    for pos in &cloud.positions {
        let leaf = octree.leaf_address(*pos).unwrap();
        assert!(octree.contains_leaf(leaf));
    }
    assert!(octree.leaf_address(Vec3::splat(-1.0)).is_none());
}

#[test]
fn max_corner_maps_to_last_voxel() {
    let octree = Octree::empty(2, BoundingBox::new(Vec3::ZERO, Vec3::ONE)).unwrap();
    assert_eq!(octree.leaf_address(Vec3::ONE), Some(Index::new(3, 3, 3)));
    assert_eq!(octree.leaf_address(Vec3::ZERO), Some(Index::ORIGIN));
}

#[test]
fn flat_cloud_maps_to_voxel_zero() {
    let cloud = PointCloud::from_positions(vec![Vec3::new(0.0, 1.0, 2.0), Vec3::new(4.0, 1.0, 2.0)]);
    let octree = Octree::from_point_cloud(3, &cloud).unwrap();
    assert_eq!(octree.leaves(), vec![Index::new(0, 0, 0), Index::new(7, 0, 0)]);
}

#[test]
fn point_cloud_export_uses_voxel_centers() {
    let octree = Octree::empty(1, BoundingBox::new(Vec3::ZERO, Vec3::splat(2.0))).unwrap();
    octree.add_leaf(Index::new(1, 0, 1));
    assert_eq!(octree.to_point_cloud().positions, vec![Vec3::new(1.5, 0.5, 1.5)]);
}

#[test]
fn rejects_bad_depths() {
    assert!(matches!(Octree::empty(0, BoundingBox::default()), Err(Error::InvalidDepth { .. })));
    assert!(matches!(Octree::empty(22, BoundingBox::default()), Err(Error::InvalidDepth { .. })));
}
