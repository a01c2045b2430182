use arrayvec::ArrayVec;
use glam::{ UVec3, uvec3 };

/// Integer coordinate of a voxel at some depth of the octree.
///
/// Ordering is lexicographic on (x, y, z), which is the order levels are
/// iterated in and therefore the order sub-octrees appear in a stream.
///
/// ```text
/// child slot ids, by coordinate parity
///   z even   z odd
///   |0|1|    |4|5|
///   -----    -----
///   |2|3|    |6|7|
/// ```
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Index {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl Index {
    pub const ORIGIN: Self = Self::new(0, 0, 0);

    #[inline(always)]
    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    #[inline(always)]
    pub fn to_array(self) -> [u32; 3] {
        [self.x, self.y, self.z]
    }

    #[inline(always)]
    pub fn from_array([x, y, z]: [u32; 3]) -> Self {
        Self::new(x, y, z)
    }

    /// Index of the cell one depth up that contains this one.
    #[inline(always)]
    pub fn parent(self) -> Self {
        Self::new(self.x / 2, self.y / 2, self.z / 2)
    }

    /// Index of the ancestor `levels` depths up.
    pub fn ancestor(self, levels: u8) -> Self {
        if levels >= 32 {
            return Self::ORIGIN;
        }
        Self::new(self.x >> levels, self.y >> levels, self.z >> levels)
    }

    /// Slot (0-7) this cell occupies inside its parent.
    #[inline(always)]
    pub fn child_id(self) -> u8 {
        ((self.x % 2) + 2 * (self.y % 2) + 4 * (self.z % 2)) as u8
    }

    /// Index of child `child_id` one depth down.
    #[inline(always)]
    pub fn child(self, child_id: u8) -> Self {
        Self::from(UVec3::from(self) * 2 + child_offset(child_id))
    }

    /// Children named by the set bits of `mask`, in ascending slot order.
    pub fn children(self, mask: u8) -> ArrayVec<(u8, Index), 8> {
        (0..8u8)
            .filter(|child_id| mask & (1 << child_id) != 0)
            .map(|child_id| (child_id, self.child(child_id)))
            .collect()
    }

    /// True if every coordinate fits in `bits` bits.
    pub fn fits_bits(self, bits: u8) -> bool {
        if bits >= 32 {
            return true;
        }
        let limit = 1u32 << bits;
        self.x < limit && self.y < limit && self.z < limit
    }
}

/// Unit offset of a child slot, one axis per bit of `child_id`.
#[inline(always)]
pub fn child_offset(child_id: u8) -> UVec3 {
    uvec3(
        (child_id & 1) as u32,
        ((child_id >> 1) & 1) as u32,
        ((child_id >> 2) & 1) as u32,
    )
}

impl From<UVec3> for Index {
    fn from(v: UVec3) -> Self {
        Self::new(v.x, v.y, v.z)
    }
}

impl From<Index> for UVec3 {
    fn from(index: Index) -> Self {
        uvec3(index.x, index.y, index.z)
    }
}

#[test]
fn child_id_matches_offset() {
    for child_id in 0..8u8 {
        let child = Index::new(5, 2, 9).child(child_id);
        assert_eq!(child.child_id(), child_id);
        assert_eq!(child.parent(), Index::new(5, 2, 9));
    }
}

#[test]
fn child_id_from_parity() {
    assert_eq!(Index::new(0, 0, 0).child_id(), 0);
    assert_eq!(Index::new(1, 0, 0).child_id(), 1);
    assert_eq!(Index::new(0, 1, 0).child_id(), 2);
    assert_eq!(Index::new(3, 3, 3).child_id(), 7);
    assert_eq!(Index::new(4, 7, 2).child_id(), 2);
}

#[test]
fn ancestor_shifts_every_axis() {
    let leaf = Index::new(13, 6, 255);
    assert_eq!(leaf.ancestor(0), leaf);
    assert_eq!(leaf.ancestor(1), leaf.parent());
    assert_eq!(leaf.ancestor(3), Index::new(1, 0, 31));
    assert_eq!(leaf.ancestor(40), Index::ORIGIN);
}

#[test]
fn children_follow_mask_bits() {
    let children = Index::new(1, 1, 1).children(0b1000_0101);
    let ids: Vec<u8> = children.iter().map(|(id, _)| *id).collect();
    assert_eq!(ids, vec![0, 2, 7]);
    assert_eq!(children[2].1, Index::new(3, 3, 3));
}

#[test]
fn ordering_is_lexicographic() {
    let mut indices = vec![Index::new(1, 0, 0), Index::new(0, 5, 5), Index::new(0, 5, 1), Index::new(0, 0, 9)];
    indices.sort();
    assert_eq!(indices, vec![Index::new(0, 0, 9), Index::new(0, 5, 1), Index::new(0, 5, 5), Index::new(1, 0, 0)]);
}
