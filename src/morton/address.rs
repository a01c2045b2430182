use glam::{ IVec3, ivec3 };
use super::key::{ encode32, decode32, encode64, decode64, MORTON64_AXIS_BITS };
use crate::{
    codec::EncodedData,
    error::{ Error, Result },
    Index,
};

/// Largest per-axis delta an offset address can carry.
pub const MAX_OFFSET: i32 = 511;

const FULL_FLAG: u64 = 1 << 63;

/// Location of a sub-octree root as it appears on the wire.
///
/// ```text
/// Full   u64: 1 | 63 bit Morton code of the root index
/// Offset u32: 0 | 0 | 30 bit Morton code of (delta + MAX_OFFSET) per axis
/// ```
/// Both are written big-endian, so the first byte's top bit tells a reader
/// which width follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Address {
    Full(Index),
    Offset(IVec3),
}

impl Address {
    pub const FULL_LEN: usize = 8;
    pub const OFFSET_LEN: usize = 4;

    /// Picks the narrowest address that locates `current` given the root
    /// written before it.
    pub fn between(previous: Option<Index>, current: Index) -> Self {
        let Some(previous) = previous else {
            return Self::Full(current);
        };

        let delta = [current.x, current.y, current.z]
            .into_iter()
            .zip([previous.x, previous.y, previous.z])
            .map(|(cur, prev)| cur as i64 - prev as i64);

        let mut axes = [0i32; 3];
        for (axis, delta) in axes.iter_mut().zip(delta) {
            if delta.abs() > MAX_OFFSET as i64 {
                return Self::Full(current);
            }
            *axis = delta as i32;
        }

        Self::Offset(IVec3::from(axes))
    }

    /// Turns the address back into a root index.
    pub fn resolve(&self, previous: Option<Index>) -> Result<Index> {
        match *self {
            Self::Full(index) => Ok(index),
            Self::Offset(delta) => {
                let previous = previous.ok_or_else(|| Error::StructuralInvariant(
                    "offset address with no preceding sub-octree root".into()
                ))?;
                let apply = |base: u32, delta: i32| {
                    u32::try_from(base as i64 + delta as i64).map_err(|_| Error::StructuralInvariant(
                        format!("offset {delta} moves root coordinate {base} out of range")
                    ))
                };
                Ok(Index::new(
                    apply(previous.x, delta.x)?,
                    apply(previous.y, delta.y)?,
                    apply(previous.z, delta.z)?,
                ))
            }
        }
    }

    #[inline(always)]
    pub fn encoded_len(&self) -> usize {
        match self {
            Self::Full(_) => Self::FULL_LEN,
            Self::Offset(_) => Self::OFFSET_LEN,
        }
    }

    pub fn write(&self, data: &mut EncodedData) {
        match *self {
            Self::Full(index) => data.add_u64(encode_full(index)),
            Self::Offset(delta) => data.add_u32(encode_offset(delta)),
        }
    }

    pub fn read(data: &mut EncodedData) -> Result<Self> {
        if data.peek_flag()? {
            Ok(Self::Full(decode_full(data.read_u64()?)))
        }
        else {
            Ok(Self::Offset(decode_offset(data.read_u32()?)))
        }
    }
}

/// Morton code of `index` with the full-address flag set.
pub fn encode_full(index: Index) -> u64 {
    debug_assert!(index.fits_bits(MORTON64_AXIS_BITS as u8));
    encode64(index) | FULL_FLAG
}

pub fn decode_full(code: u64) -> Index {
    decode64(code & !FULL_FLAG)
}

/// Packs a per-axis delta. Every axis must lie within `±MAX_OFFSET`.
pub fn encode_offset(delta: IVec3) -> u32 {
    debug_assert!(delta.abs().max_element() <= MAX_OFFSET);
    let biased = delta + IVec3::splat(MAX_OFFSET);
    encode32(Index::new(biased.x as u32, biased.y as u32, biased.z as u32))
}

pub fn decode_offset(code: u32) -> IVec3 {
    let biased = decode32(code);
    ivec3(biased.x as i32, biased.y as i32, biased.z as i32) - IVec3::splat(MAX_OFFSET)
}

#[test]
fn offset_round_trip_covers_range() {
    for delta in [
        IVec3::ZERO,
        IVec3::splat(MAX_OFFSET),
        IVec3::splat(-MAX_OFFSET),
        ivec3(-MAX_OFFSET, 0, MAX_OFFSET),
        ivec3(1, -2, 3),
        ivec3(-300, 17, 499),
    ] {
        let code = encode_offset(delta);
        assert_eq!(code >> 31, 0, "offset address must keep the flag bit clear");
        assert_eq!(decode_offset(code), delta);
    }
}

#[test]
fn full_address_sets_flag() {
    for index in [Index::ORIGIN, Index::new(7, 0, 3), Index::new((1 << 20) - 1, 1 << 19, 42)] {
        let code = encode_full(index);
        assert_eq!(code >> 63, 1);
        assert_eq!(decode_full(code), index);
    }
}

#[test]
fn between_picks_kind() {
    let first = Index::new(10, 10, 10);
    assert_eq!(Address::between(None, first), Address::Full(first));

    let near = Index::new(10 + MAX_OFFSET as u32, 0, 10);
    assert_eq!(Address::between(Some(first), near), Address::Offset(ivec3(MAX_OFFSET, -10, 0)));

    let far = Index::new(11 + MAX_OFFSET as u32, 10, 10);
    assert_eq!(Address::between(Some(first), far), Address::Full(far));
}

#[test]
fn resolve_applies_delta() {
    let previous = Index::new(100, 5, 0);
    let address = Address::between(Some(previous), Index::new(40, 6, 511));
    assert!(matches!(address, Address::Offset(_)));
    assert_eq!(address.resolve(Some(previous)).unwrap(), Index::new(40, 6, 511));
}

#[test]
fn resolve_rejects_orphan_offset() {
    assert!(matches!(
        Address::Offset(ivec3(1, 1, 1)).resolve(None),
        Err(Error::StructuralInvariant(_))
    ));
    assert!(matches!(
        Address::Offset(ivec3(-2, 0, 0)).resolve(Some(Index::new(1, 0, 0))),
        Err(Error::StructuralInvariant(_))
    ));
}

#[test]
fn address_wire_round_trip() {
    use crate::BoundingBox;

    let mut data = EncodedData::new(BoundingBox::default(), 8, 4);
    let roots = [Index::new(3, 4, 5), Index::new(4, 4, 5), Index::new(900, 4, 5), Index::new(899, 0, 0)];
    let mut previous = None;
    for root in roots {
        Address::between(previous, root).write(&mut data);
        previous = Some(root);
    }
    assert_eq!(data.len(), 8 + 4 + 8 + 4);

    let mut previous = None;
    for root in roots {
        let address = Address::read(&mut data).unwrap();
        let resolved = address.resolve(previous).unwrap();
        assert_eq!(resolved, root);
        previous = Some(resolved);
    }
    assert_eq!(data.remaining(), 0);
}
