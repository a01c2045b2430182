use glam::Vec3;

/// Axis aligned box enclosing a scene.
///
/// The default box is inverted (min at `f32::MAX`, max at `f32::MIN`) so the
/// first call to [`BoundingBox::expand`] snaps it onto that point.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct BoundingBox {
    pub min: Vec3,
    pub max: Vec3,
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self {
            min: Vec3::splat(f32::MAX),
            max: Vec3::splat(f32::MIN),
        }
    }
}

impl BoundingBox {
    pub const ONE_CUBIC_METER: Self = Self {
        min: Vec3::ZERO,
        max: Vec3::ONE,
    };

    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    pub fn from_points<'a, I: IntoIterator<Item = &'a Vec3>>(points: I) -> Self {
        let mut bbox = Self::default();
        points.into_iter().for_each(|point| bbox.expand(*point));
        bbox
    }

    pub fn expand(&mut self, point: Vec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    /// Inclusive on both faces.
    pub fn contains(&self, point: Vec3) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.min.cmpgt(self.max).any()
    }

    #[inline]
    pub fn size(&self) -> Vec3 {
        if self.is_empty() {
            return Vec3::ZERO;
        }
        self.max - self.min
    }

    /// Edge lengths of one voxel after halving the box `max_depth` times.
    pub fn leaf_cell_size(&self, max_depth: u8) -> Vec3 {
        self.size() / (1u64 << max_depth) as f32
    }
}

#[test]
fn default_box_is_empty_until_expanded() {
    let mut bbox = BoundingBox::default();
    assert!(bbox.is_empty());
    assert_eq!(bbox.size(), Vec3::ZERO);

    bbox.expand(Vec3::new(1.0, -2.0, 3.0));
    assert!(!bbox.is_empty());
    assert_eq!(bbox.min, bbox.max);

    bbox.expand(Vec3::new(-1.0, 2.0, 0.0));
    assert_eq!(bbox.min, Vec3::new(-1.0, -2.0, 0.0));
    assert_eq!(bbox.max, Vec3::new(1.0, 2.0, 3.0));
}

#[test]
fn contains_is_inclusive() {
    let bbox = BoundingBox::ONE_CUBIC_METER;
    assert!(bbox.contains(Vec3::ZERO));
    assert!(bbox.contains(Vec3::ONE));
    assert!(bbox.contains(Vec3::splat(0.5)));
    assert!(!bbox.contains(Vec3::new(0.5, 1.01, 0.5)));
}

#[test]
fn leaf_cell_size_halves_per_depth() {
    let bbox = BoundingBox::new(Vec3::ZERO, Vec3::new(8.0, 16.0, 4.0));
    assert_eq!(bbox.leaf_cell_size(0), Vec3::new(8.0, 16.0, 4.0));
    assert_eq!(bbox.leaf_cell_size(3), Vec3::new(1.0, 2.0, 0.5));
}
