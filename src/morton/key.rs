use bitvec::prelude::*;
use crate::Index;

/// Bits per axis held by a 32 bit Morton code.
pub const MORTON32_AXIS_BITS: usize = 10;
/// Bits per axis held by a 64 bit Morton code.
pub const MORTON64_AXIS_BITS: usize = 21;

/// Interleaves coordinate bits into a Z-order code.
///
/// ```text
/// Bit layout (low bits first)
/// ... z2 y2 x2 z1 y1 x1 z0 y0 x0
///
/// Bit i of axis a lands at position 3i + a. Coordinate bits past
/// the axis width are dropped; callers check the range first.
/// ```
macro_rules! morton_codec {
    ($encode:ident, $decode:ident, $ty:ty, $axis_bits:expr) => {
        pub fn $encode(index: Index) -> $ty {
            let mut code: $ty = 0;
            let bits = code.view_bits_mut::<Lsb0>();
            for (axis, coord) in index.to_array().into_iter().enumerate() {
                let coord_bits = coord.view_bits::<Lsb0>();
                for i in 0..$axis_bits {
                    bits.set(3 * i + axis, coord_bits[i]);
                }
            }
            code
        }

        pub fn $decode(code: $ty) -> Index {
            let bits = code.view_bits::<Lsb0>();
            let mut coords = [0u32; 3];
            for (axis, coord) in coords.iter_mut().enumerate() {
                let coord_bits = coord.view_bits_mut::<Lsb0>();
                for i in 0..$axis_bits {
                    coord_bits.set(i, bits[3 * i + axis]);
                }
            }
            Index::from_array(coords)
        }
    };
}

morton_codec!(encode32, decode32, u32, MORTON32_AXIS_BITS);
morton_codec!(encode64, decode64, u64, MORTON64_AXIS_BITS);

#[test]
fn morton_bit_placement() {
    assert_eq!(encode32(Index::new(1, 0, 0)), 0b001);
    assert_eq!(encode32(Index::new(0, 1, 0)), 0b010);
    assert_eq!(encode32(Index::new(0, 0, 1)), 0b100);
    assert_eq!(encode32(Index::new(3, 3, 3)), 0b111_111);
    assert_eq!(encode32(Index::new(2, 0, 1)), 0b001_100);
    assert_eq!(encode64(Index::new(0, 0, 1 << 20)), 1 << 62);
}

#[test]
fn morton_decode_inverts_encode() {
    let samples = [
        Index::new(0, 0, 0),
        Index::new(1023, 0, 511),
        Index::new(17, 900, 3),
    ];
    for index in samples {
        assert_eq!(decode32(encode32(index)), index);
        assert_eq!(decode64(encode64(index)), index);
    }

    let wide = Index::new((1 << 21) - 1, 123_456, 1 << 20);
    assert_eq!(decode64(encode64(wide)), wide);
}

#[test]
fn morton_top_bits_stay_clear() {
    let max32 = Index::new(1023, 1023, 1023);
    assert_eq!(encode32(max32) >> 30, 0);

    let max64 = Index::new((1 << 21) - 1, (1 << 21) - 1, (1 << 21) - 1);
    assert_eq!(encode64(max64) >> 63, 0);
}

#[test]
fn morton_order_is_z_order() {
    let order: Vec<u32> = (0..8u8)
        .map(|child_id| encode32(Index::ORIGIN.child(child_id)))
        .collect();
    assert_eq!(order, (0..8).collect::<Vec<u32>>());
}
