#[cfg(feature = "multi-thread")]
use rayon::prelude::*;
use crate::{
    counter::StepCounter,
    error::{ Error, Result },
    morton::Address,
    utils::timed,
    Index,
    Octree,
};
use super::EncodedData;

/// Bytes a sub-octree header spends on its payload size.
pub(crate) const NODE_SIZE_LEN: usize = 4;

/// Encoded size of the tree when split at `depth`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BestStats {
    pub size: usize,
    pub depth: u8,
}

/// Where the encoder cuts the tree into independently addressed sub-octrees.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SplitDepth {
    /// Whichever depth gives the smallest stream.
    #[default]
    Auto,
    Fixed(u8),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncoderConfig {
    pub split_depth: SplitDepth,
}

#[derive(Debug, Default)]
pub struct Encoder<C: StepCounter = ()> {
    config: EncoderConfig,
    counter: C,
}

impl Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: EncoderConfig) -> Self {
        Self { config, counter: () }
    }
}

impl<C: StepCounter> Encoder<C> {
    /// Swaps in a counter that sees every node written.
    pub fn with_counter<N: StepCounter>(self, counter: N) -> Encoder<N> {
        Encoder { config: self.config, counter }
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    pub fn encode(&self, octree: &Octree) -> Result<EncodedData> {
        let max_depth = octree.max_depth();
        let best = match self.config.split_depth {
            SplitDepth::Auto => compute_best_sub_octree_level(octree),
            SplitDepth::Fixed(depth) if depth < max_depth => BestStats {
                size: sub_octree_cost(octree, depth),
                depth,
            },
            SplitDepth::Fixed(depth) => return Err(Error::InvalidDepth { depth, max: max_depth - 1 }),
        };
        tracing::debug!(split_depth = best.depth, size = best.size, "selected sub-octree depth");

        let mut data = EncodedData::with_capacity(octree.bounding_box(), max_depth, best.depth, best.size);
        timed!(depth_first_traversal(octree, best.depth, &mut data, &self.counter)?, "octree encode");

        if data.len() != best.size {
            return Err(Error::StructuralInvariant(format!(
                "encoded {} bytes, cost search predicted {}", data.len(), best.size
            )));
        }
        Ok(data)
    }
}

/// Bytes the payload takes when sub-octrees start at `depth`: one header per
/// node at `depth` plus one mask byte per node at `depth` and below.
pub fn sub_octree_cost(octree: &Octree, depth: u8) -> usize {
    let levels = octree.levels();

    let mut previous = None;
    let headers: usize = levels[depth as usize]
        .indices()
        .into_iter()
        .map(|root| {
            let len = NODE_SIZE_LEN + Address::between(previous, root).encoded_len();
            previous = Some(root);
            len
        })
        .sum();

    let payload: usize = levels[depth as usize..].iter().map(|level| level.len()).sum();
    headers + payload
}

/// Tries every split depth and keeps the cheapest; ties go to the shallower one.
pub fn compute_best_sub_octree_level(octree: &Octree) -> BestStats {
    let cost = |depth: u8| BestStats { size: sub_octree_cost(octree, depth), depth };

    #[cfg(feature = "multi-thread")]
    let best = (0..octree.max_depth()).into_par_iter().map(cost).min_by_key(|s| (s.size, s.depth));
    #[cfg(not(feature = "multi-thread"))]
    let best = (0..octree.max_depth()).map(cost).min_by_key(|s| (s.size, s.depth));

    best.unwrap_or(BestStats { size: 0, depth: 0 })
}

struct Frame {
    depth: u8,
    index: Index,
    mask: u8,
}

/// Writes every sub-octree rooted at `split_depth`, roots in ascending index
/// order.
///
/// Each one is a node size, an address, then its mask bytes in the order an
/// explicit stack pops them. Children are pushed in ascending slot order, so
/// they come back off the stack highest slot first. The decoder relies on
/// exactly this order.
fn depth_first_traversal<C: StepCounter>(
    octree: &Octree,
    split_depth: u8,
    data: &mut EncodedData,
    counter: &C,
) -> Result<()> {
    let levels = octree.levels();
    let max_depth = octree.max_depth();
    let mut stack = Vec::with_capacity(8 * max_depth as usize);
    let mut previous = None;

    for (root, mask) in levels[split_depth as usize].snapshot() {
        let size_offset = data.len();
        data.add_u32(0);
        Address::between(previous, root).write(data);
        previous = Some(root);

        let payload_start = data.len();
        stack.push(Frame { depth: split_depth, index: root, mask });

        while let Some(frame) = stack.pop() {
            data.add_u8(frame.mask);
            counter.step(frame.depth);

            let child_depth = frame.depth + 1;
            if child_depth >= max_depth {
                continue;
            }
            for (child_id, child) in frame.index.children(frame.mask) {
                let node = levels[child_depth as usize].get(child).ok_or_else(|| Error::StructuralInvariant(
                    format!("child {child_id} of {:?} at depth {} has no node", frame.index, frame.depth)
                ))?;
                stack.push(Frame { depth: child_depth, index: child, mask: node.mask() });
            }
        }

        let node_size = u32::try_from(data.len() - payload_start).map_err(|_| Error::Format(
            format!("sub-octree at {root:?} exceeds {} bytes", u32::MAX)
        ))?;
        data.patch_u32(size_offset, node_size)?;
        tracing::trace!(?root, node_size, "encoded sub-octree");
    }

    Ok(())
}

#[cfg(test)]
use crate::{ octree::random_cloud, BoundingBox };

#[cfg(test)]
fn chain_octree() -> Octree {
    use glam::Vec3;

    let octree = Octree::empty(3, BoundingBox::new(Vec3::ZERO, Vec3::splat(8.0))).unwrap();
    octree.add_leaf(Index::new(3, 3, 3));
    octree
}

#[test]
fn single_chain_at_root_split() {
    let config = EncoderConfig { split_depth: SplitDepth::Fixed(0) };
    let data = Encoder::with_config(config).encode(&chain_octree()).unwrap();

    assert_eq!(data.max_depth, 3);
    assert_eq!(data.sub_octree_depth, 0);
    let expected: [u8; 15] = [
        0, 0, 0, 3,                      // node size
        0x80, 0, 0, 0, 0, 0, 0, 0,       // full address of (0, 0, 0)
        0b0000_0001,                     // depth 0
        0b1000_0000,                     // depth 1
        0b1000_0000,                     // depth 2
    ];
    assert_eq!(data.payload(), &expected[..]);
}

#[test]
fn single_chain_prefers_deepest_split() {
    let octree = chain_octree();
    assert_eq!(sub_octree_cost(&octree, 0), 15);
    assert_eq!(sub_octree_cost(&octree, 1), 14);
    assert_eq!(sub_octree_cost(&octree, 2), 13);
    assert_eq!(compute_best_sub_octree_level(&octree), BestStats { size: 13, depth: 2 });

    let data = Encoder::new().encode(&octree).unwrap();
    assert_eq!(data.sub_octree_depth, 2);
    assert_eq!(data.len(), 13);
}

#[test]
fn best_split_never_loses_to_the_extremes() {
    for (seed, depth) in [(1, 4), (2, 6), (3, 8)] {
        let octree = Octree::from_point_cloud(depth, &random_cloud(seed, 3_000, 5.0)).unwrap();
        let best = compute_best_sub_octree_level(&octree);
        assert!(best.size <= sub_octree_cost(&octree, 0));
        assert!(best.size <= sub_octree_cost(&octree, depth - 1));
        assert_eq!(best.size, sub_octree_cost(&octree, best.depth));
    }
}

#[test]
fn encoded_length_matches_cost() {
    let octree = Octree::from_point_cloud(7, &random_cloud(5, 4_000, 2.0)).unwrap();
    for split in 0..7 {
        let config = EncoderConfig { split_depth: SplitDepth::Fixed(split) };
        let data = Encoder::with_config(config).encode(&octree).unwrap();
        assert_eq!(data.len(), sub_octree_cost(&octree, split));
    }
}

#[test]
fn counter_sees_every_node() {
    use std::sync::atomic::{ AtomicUsize, Ordering };

    let octree = Octree::from_point_cloud(6, &random_cloud(9, 1_000, 1.0)).unwrap();
    let counter = AtomicUsize::new(0);
    let config = EncoderConfig { split_depth: SplitDepth::Fixed(2) };
    Encoder::with_config(config).with_counter(&counter).encode(&octree).unwrap();

    let below_split: usize = octree.levels()[2..].iter().map(|level| level.len()).sum();
    assert_eq!(counter.load(Ordering::Relaxed), below_split);
}

#[test]
fn split_must_be_above_leaf_level() {
    let config = EncoderConfig { split_depth: SplitDepth::Fixed(3) };
    assert!(matches!(
        Encoder::with_config(config).encode(&chain_octree()),
        Err(Error::InvalidDepth { depth: 3, max: 2 })
    ));
}

#[test]
fn empty_octree_encodes_to_nothing() {
    let octree = Octree::empty(5, BoundingBox::default()).unwrap();
    let data = Encoder::new().encode(&octree).unwrap();
    assert!(data.is_empty());
    assert_eq!(data.sub_octree_depth, 0);
}
