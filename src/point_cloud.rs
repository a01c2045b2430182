use glam::Vec3;
use crate::BoundingBox;

/// Positions plus optional per-point attributes.
///
/// Attribute arrays, when present, are kept the same length as `positions`.
/// The codec only reads positions; attributes are carried along untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointCloud {
    pub positions: Vec<Vec3>,
    pub normals: Option<Vec<Vec3>>,
    pub colors: Option<Vec<[u8; 3]>>,
    pub scalars: Option<Vec<f32>>,
}

impl PointCloud {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_attributes(has_normals: bool, has_colors: bool, has_scalars: bool) -> Self {
        Self {
            positions: Vec::new(),
            normals: has_normals.then(Vec::new),
            colors: has_colors.then(Vec::new),
            scalars: has_scalars.then(Vec::new),
        }
    }

    pub fn from_positions(positions: Vec<Vec3>) -> Self {
        Self {
            positions,
            ..Default::default()
        }
    }

    pub fn resize(&mut self, len: usize) {
        self.positions.resize(len, Vec3::ZERO);
        if let Some(normals) = self.normals.as_mut() {
            normals.resize(len, Vec3::ZERO);
        }
        if let Some(colors) = self.colors.as_mut() {
            colors.resize(len, [0; 3]);
        }
        if let Some(scalars) = self.scalars.as_mut() {
            scalars.resize(len, 0.0);
        }
    }

    pub fn shrink_to_fit(&mut self) {
        self.positions.shrink_to_fit();
        if let Some(normals) = self.normals.as_mut() {
            normals.shrink_to_fit();
        }
        if let Some(colors) = self.colors.as_mut() {
            colors.shrink_to_fit();
        }
        if let Some(scalars) = self.scalars.as_mut() {
            scalars.shrink_to_fit();
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn bounding_box(&self) -> BoundingBox {
        BoundingBox::from_points(&self.positions)
    }
}

#[test]
fn resize_keeps_attributes_aligned() {
    let mut cloud = PointCloud::with_attributes(true, false, true);
    cloud.resize(4);
    assert_eq!(cloud.len(), 4);
    assert_eq!(cloud.normals.as_ref().map(Vec::len), Some(4));
    assert!(cloud.colors.is_none());
    assert_eq!(cloud.scalars.as_ref().map(Vec::len), Some(4));

    cloud.resize(1);
    assert_eq!(cloud.scalars.as_ref().map(Vec::len), Some(1));
}
