use crate::{
    counter::StepCounter,
    error::{ Error, Result },
    morton::Address,
    octree::Node,
    utils::timed,
    Index,
    Octree,
};
use super::EncodedData;

/// Rebuilds an [`Octree`] from a whole stream, front to back.
#[derive(Debug, Default)]
pub struct Decoder<C: StepCounter = ()> {
    counter: C,
}

impl Decoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<C: StepCounter> Decoder<C> {
    pub fn with_counter<N: StepCounter>(self, counter: N) -> Decoder<N> {
        Decoder { counter }
    }

    /// Decodes every sub-octree in `data`, starting from the beginning of the
    /// payload. The cursor is left at the end.
    pub fn decode(&self, data: &mut EncodedData) -> Result<Octree> {
        check_depths(data)?;
        let octree = Octree::empty(data.max_depth, data.scene_bounding_box)?;
        data.rewind();

        timed!({
            let mut previous = None;
            while data.remaining() > 0 {
                let header = SubOctreeHeader::read(data, previous)?;
                previous = Some(header.root);
                replay_sub_octree(data, &octree, header, &self.counter)?;
            }
        }, "octree decode");

        tracing::debug!(nodes = octree.node_count(), "decoded octree");
        Ok(octree)
    }
}

/// Rejects depth pairs no encoder could have produced.
pub(crate) fn check_depths(data: &EncodedData) -> Result<()> {
    if data.max_depth == 0 || data.max_depth > Octree::MAX_DEPTH {
        return Err(Error::StructuralInvariant(format!(
            "max depth {} outside 1..={}", data.max_depth, Octree::MAX_DEPTH
        )));
    }
    if data.sub_octree_depth >= data.max_depth {
        return Err(Error::StructuralInvariant(format!(
            "sub-octree depth {} is not above max depth {}", data.sub_octree_depth, data.max_depth
        )));
    }
    Ok(())
}

/// What precedes a sub-octree's mask bytes, plus where those bytes start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubOctreeHeader {
    pub root: Index,
    pub offset: usize,
    pub size: u32,
}

impl SubOctreeHeader {
    /// Reads node size and address at the cursor. `previous` is the root of
    /// the sub-octree before this one, which offset addresses are relative to.
    pub(crate) fn read(data: &mut EncodedData, previous: Option<Index>) -> Result<Self> {
        let size = data.read_u32()?;
        let root = Address::read(data)?.resolve(previous)?;

        if !root.fits_bits(data.sub_octree_depth) {
            return Err(Error::StructuralInvariant(format!(
                "sub-octree root {root:?} lies outside depth {}", data.sub_octree_depth
            )));
        }
        if size == 0 {
            return Err(Error::StructuralInvariant(format!("sub-octree {root:?} has no nodes")));
        }

        Ok(Self { root, offset: data.cursor(), size })
    }
}

struct Frame {
    depth: u8,
    index: Index,
    /// Children of this node not yet read from the stream.
    remaining: u8,
}

/// Reads one sub-octree's mask bytes at the cursor and inserts its nodes.
///
/// The encoder's stack walk is replayed: the top frame gives up its highest
/// remaining child, that child's mask is the next byte, and the frame is
/// dropped once it has no children left. Nodes are collected first and only
/// reach `octree` once the whole sub-octree has read cleanly, together with
/// the path from the root of the tree down to the sub-octree root.
pub(crate) fn replay_sub_octree<C: StepCounter>(
    data: &mut EncodedData,
    octree: &Octree,
    header: SubOctreeHeader,
    counter: &C,
) -> Result<()> {
    let nodes = read_sub_octree(data, octree.max_depth(), header, counter)?;
    let split_depth = data.sub_octree_depth;
    let root = header.root;

    let levels = octree.levels();
    if levels[split_depth as usize].contains(root) {
        return Err(Error::StructuralInvariant(format!("sub-octree {root:?} appears twice")));
    }
    for (depth, index, mask) in nodes {
        if !levels[depth as usize].insert_new(index, Node::new(mask)) {
            return Err(Error::StructuralInvariant(format!(
                "node {index:?} at depth {depth} decoded twice"
            )));
        }
    }
    if split_depth > 0 {
        octree.add_path(split_depth - 1, root.parent(), root.child_id());
    }

    tracing::trace!(?root, size = header.size, "decoded sub-octree");
    Ok(())
}

/// (depth, index, mask) of every node in one sub-octree, root first.
fn read_sub_octree<C: StepCounter>(
    data: &mut EncodedData,
    max_depth: u8,
    header: SubOctreeHeader,
    counter: &C,
) -> Result<Vec<(u8, Index, u8)>> {
    let split_depth = data.sub_octree_depth;
    let SubOctreeHeader { root, offset, size } = header;

    let root_mask = read_mask(data, counter, split_depth, root)?;
    let mut nodes = Vec::with_capacity((size as usize).min(data.remaining() + 1));
    nodes.push((split_depth, root, root_mask));

    let mut stack = Vec::with_capacity(8 * max_depth as usize);
    if split_depth + 1 < max_depth {
        stack.push(Frame { depth: split_depth, index: root, remaining: root_mask });
    }

    while let Some(frame) = stack.last_mut() {
        let child_id = match frame.remaining.checked_ilog2() {
            Some(bit) => bit as u8,
            None => return Err(Error::StructuralInvariant(format!(
                "frame for {:?} at depth {} has no child left to read", frame.index, frame.depth
            ))),
        };
        frame.remaining &= !(1 << child_id);

        let depth = frame.depth + 1;
        let child = frame.index.child(child_id);
        if frame.remaining == 0 {
            stack.pop();
        }

        let mask = read_mask(data, counter, depth, child)?;
        nodes.push((depth, child, mask));
        if depth + 1 < max_depth {
            stack.push(Frame { depth, index: child, remaining: mask });
        }
    }

    let consumed = data.cursor() - offset;
    if consumed != size as usize {
        return Err(Error::Format(format!(
            "sub-octree {root:?} announced {size} bytes but held {consumed}"
        )));
    }
    Ok(nodes)
}

fn read_mask<C: StepCounter>(data: &mut EncodedData, counter: &C, depth: u8, index: Index) -> Result<u8> {
    let mask = data.read_u8()?;
    if mask == 0 {
        return Err(Error::StructuralInvariant(format!(
            "node {index:?} at depth {depth} has an empty child mask"
        )));
    }
    counter.step(depth);
    Ok(mask)
}

#[cfg(test)]
use crate::{
    codec::{ Encoder, EncoderConfig, SplitDepth },
    octree::random_cloud,
    BoundingBox,
};

#[cfg(test)]
fn assert_same_tree(left: &Octree, right: &Octree) {
    assert_eq!(left.max_depth(), right.max_depth());
    for (depth, (a, b)) in left.levels().iter().zip(right.levels()).enumerate() {
        assert_eq!(a.snapshot(), b.snapshot(), "levels differ at depth {depth}");
    }
}

#[cfg(test)]
fn chain_stream(split: u8) -> EncodedData {
    use glam::Vec3;

    let octree = Octree::empty(3, BoundingBox::new(Vec3::ZERO, Vec3::splat(8.0))).unwrap();
    octree.add_leaf(Index::new(3, 3, 3));
    let config = EncoderConfig { split_depth: SplitDepth::Fixed(split) };
    Encoder::with_config(config).encode(&octree).unwrap()
}

#[test]
fn single_chain_decodes_to_same_chain() {
    for split in 0..3 {
        let mut data = chain_stream(split);
        let octree = Decoder::new().decode(&mut data).unwrap();

        assert_eq!(octree.node_count(), 3);
        assert_eq!(octree.levels()[0].snapshot(), vec![(Index::new(0, 0, 0), 0b0000_0001)]);
        assert_eq!(octree.levels()[1].snapshot(), vec![(Index::new(0, 0, 0), 0b1000_0000)]);
        assert_eq!(octree.levels()[2].snapshot(), vec![(Index::new(1, 1, 1), 0b1000_0000)]);
        assert_eq!(octree.leaves(), vec![Index::new(3, 3, 3)]);
    }
}

#[test]
fn round_trip_reproduces_every_mask() {
    for (seed, depth) in [(21, 1), (22, 3), (23, 6), (24, 9)] {
        let original = Octree::from_point_cloud(depth, &random_cloud(seed, 5_000, 20.0)).unwrap();
        let mut data = Encoder::new().encode(&original).unwrap();
        let decoded = Decoder::new().decode(&mut data).unwrap();
        assert_same_tree(&original, &decoded);
        assert_eq!(original.leaves(), decoded.leaves());
    }
}

#[test]
fn round_trip_at_every_split() {
    let original = Octree::from_point_cloud(6, &random_cloud(31, 2_000, 1.0)).unwrap();
    for split in 0..6 {
        let config = EncoderConfig { split_depth: SplitDepth::Fixed(split) };
        let mut data = Encoder::with_config(config).encode(&original).unwrap();
        assert_same_tree(&original, &Decoder::new().decode(&mut data).unwrap());
    }
}

#[test]
fn round_trip_through_bytes() {
    let original = Octree::from_point_cloud(8, &random_cloud(41, 3_000, 100.0)).unwrap();
    let bytes = Encoder::new().encode(&original).unwrap().to_bytes();
    let mut data = EncodedData::from_bytes(&bytes).unwrap();
    let decoded = Decoder::new().decode(&mut data).unwrap();

    assert_same_tree(&original, &decoded);
    assert_eq!(decoded.bounding_box(), original.bounding_box());
}

#[test]
fn sparse_roots_fall_back_to_full_addresses() {
    use glam::Vec3;

    let octree = Octree::empty(12, BoundingBox::new(Vec3::ZERO, Vec3::splat(4096.0))).unwrap();
    for leaf in [Index::new(0, 0, 0), Index::new(4000, 10, 3), Index::new(4001, 11, 3), Index::new(5, 4095, 4095)] {
        octree.add_leaf(leaf);
    }
    let config = EncoderConfig { split_depth: SplitDepth::Fixed(11) };
    let mut data = Encoder::with_config(config).encode(&octree).unwrap();
    assert_same_tree(&octree, &Decoder::new().decode(&mut data).unwrap());
}

#[test]
fn counter_sees_every_decoded_node() {
    use std::sync::atomic::{ AtomicUsize, Ordering };

    let original = Octree::from_point_cloud(5, &random_cloud(51, 800, 1.0)).unwrap();
    let mut data = Encoder::new().encode(&original).unwrap();
    let counter = AtomicUsize::new(0);
    Decoder::new().with_counter(&counter).decode(&mut data).unwrap();

    let below_split: usize = original.levels()[data.sub_octree_depth as usize..]
        .iter()
        .map(|level| level.len())
        .sum();
    assert_eq!(counter.load(Ordering::Relaxed), below_split);
}

#[test]
fn truncated_stream_overruns() {
    let data = chain_stream(0);
    let mut truncated = EncodedData::new(data.scene_bounding_box, data.max_depth, data.sub_octree_depth);
    for byte in &data.payload()[..data.len() - 1] {
        truncated.add_u8(*byte);
    }
    assert!(matches!(Decoder::new().decode(&mut truncated), Err(Error::StreamOverrun { .. })));
}

#[test]
fn empty_mask_is_an_invariant_violation() {
    let data = chain_stream(0);
    let mut corrupt = EncodedData::new(data.scene_bounding_box, data.max_depth, data.sub_octree_depth);
    let payload = data.payload();
    for byte in &payload[..payload.len() - 2] {
        corrupt.add_u8(*byte);
    }
    corrupt.add_u8(0);
    corrupt.add_u8(payload[payload.len() - 1]);
    assert!(matches!(Decoder::new().decode(&mut corrupt), Err(Error::StructuralInvariant(_))));
}

#[test]
fn depth_mismatch_is_an_invariant_violation() {
    let data = chain_stream(0);

    // Read as if the tree were one level shallower: the last byte is left over.
    let mut shallow = EncodedData::new(data.scene_bounding_box, 2, 0);
    for byte in data.payload() {
        shallow.add_u8(*byte);
    }
    assert!(Decoder::new().decode(&mut shallow).is_err());

    let mut inverted = data.clone();
    inverted.sub_octree_depth = 3;
    assert!(matches!(Decoder::new().decode(&mut inverted), Err(Error::StructuralInvariant(_))));
}

#[test]
fn size_mismatch_is_a_format_error() {
    let mut data = chain_stream(0);
    data.patch_u32(0, 2).unwrap();
    assert!(matches!(Decoder::new().decode(&mut data), Err(Error::Format(_))));
}
