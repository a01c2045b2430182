use std::{
    collections::BTreeMap,
    sync::{ Mutex, MutexGuard, PoisonError },
};
use ahash::AHashSet;
use glam::Vec3;
use crate::{
    error::{ Error, Result },
    Index,
    Octree,
};
use super::{
    decoder::{ check_depths, replay_sub_octree, SubOctreeHeader },
    EncodedData,
};

/// Outcome of a point query against a partially decoded stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intersection {
    /// The sub-octree was decoded by an earlier query and holds the point.
    AlreadyExist,
    /// No sub-octree covers the point, so it lies in empty space.
    SubnodeNotFound,
    /// The covering sub-octree was decoded and holds the point.
    DecodeFound,
    /// The covering sub-octree is decoded but the point's voxel is empty.
    DecodeNotFound,
}

impl Intersection {
    pub fn is_hit(self) -> bool {
        matches!(self, Self::AlreadyExist | Self::DecodeFound)
    }
}

/// Sub-octree roots of a stream and where each one's mask bytes start.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderIndex {
    entries: BTreeMap<Index, SubOctreeHeader>,
}

impl HeaderIndex {
    pub fn get(&self, root: Index) -> Option<&SubOctreeHeader> {
        self.entries.get(&root)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SubOctreeHeader> + '_ {
        self.entries.values()
    }
}

/// Walks the headers of every sub-octree in `data` without decoding a node,
/// skipping each body by its recorded size.
pub fn decode_node_headers(data: &mut EncodedData) -> Result<HeaderIndex> {
    check_depths(data)?;
    data.rewind();

    let mut entries = BTreeMap::new();
    let mut previous = None;
    while data.remaining() > 0 {
        let header = SubOctreeHeader::read(data, previous)?;
        data.skip(header.size as usize)?;
        previous = Some(header.root);
        if entries.insert(header.root, header).is_some() {
            return Err(Error::StructuralInvariant(format!("sub-octree {:?} appears twice", header.root)));
        }
    }

    tracing::debug!(sub_octrees = entries.len(), "indexed sub-octree headers");
    Ok(HeaderIndex { entries })
}

struct LazyState {
    data: EncodedData,
    decoded: AHashSet<Index>,
}

/// Decodes sub-octrees only when a query needs them.
///
/// The stream and the set of decoded roots share one lock, held for the
/// whole of a sub-octree decode. Queries from several threads are safe. A
/// query whose sub-octree is already decoded holds the lock only to check the
/// set; the ones that trigger a decode run one at a time.
///
/// A sub-octree that fails to decode adds nothing to the tree and stays
/// undecoded, so asking again reports the same error.
pub struct LazyDecoder {
    octree: Octree,
    headers: HeaderIndex,
    sub_octree_depth: u8,
    state: Mutex<LazyState>,
}

impl LazyDecoder {
    /// Indexes the headers of `data`. Nothing is decoded yet.
    pub fn new(mut data: EncodedData) -> Result<Self> {
        let headers = decode_node_headers(&mut data)?;
        let octree = Octree::empty(data.max_depth, data.scene_bounding_box)?;

        Ok(Self {
            octree,
            headers,
            sub_octree_depth: data.sub_octree_depth,
            state: Mutex::new(LazyState {
                data,
                decoded: AHashSet::new(),
            }),
        })
    }

    /// The part of the tree decoded so far.
    pub fn octree(&self) -> &Octree {
        &self.octree
    }

    pub fn headers(&self) -> &HeaderIndex {
        &self.headers
    }

    pub fn into_octree(self) -> Octree {
        self.octree
    }

    pub fn decoded_count(&self) -> usize {
        self.state().decoded.len()
    }

    pub fn is_decoded(&self, root: Index) -> bool {
        self.state().decoded.contains(&root)
    }

    fn state(&self) -> MutexGuard<'_, LazyState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Decodes the sub-octree rooted at `root`. Returns false, doing nothing,
    /// if there is no such sub-octree or it was decoded already.
    pub fn decode_node(&self, root: Index) -> Result<bool> {
        let Some(header) = self.headers.get(root).copied() else {
            return Ok(false);
        };
        let mut state = self.state();
        self.decode_locked(&mut state, header)
    }

    fn decode_locked(&self, state: &mut LazyState, header: SubOctreeHeader) -> Result<bool> {
        if state.decoded.contains(&header.root) {
            return Ok(false);
        }
        state.data.seek(header.offset)?;
        replay_sub_octree(&mut state.data, &self.octree, header, &())?;
        state.decoded.insert(header.root);
        Ok(true)
    }

    /// Decodes every sub-octree not decoded yet, leaving the full tree.
    pub fn decode_all(&self) -> Result<()> {
        let mut state = self.state();
        for header in self.headers.iter() {
            self.decode_locked(&mut state, *header)?;
        }
        Ok(())
    }

    /// Tells whether `point` falls in an occupied leaf voxel, decoding the one
    /// sub-octree that covers it if that has not happened yet.
    pub fn intersect(&self, point: Vec3) -> Result<Intersection> {
        let Some(leaf) = self.octree.leaf_address(point) else {
            return Ok(Intersection::SubnodeNotFound);
        };
        let root = leaf.ancestor(self.octree.max_depth() - self.sub_octree_depth);

        let mut state = self.state();
        let already_decoded = state.decoded.contains(&root);
        if !already_decoded {
            let Some(header) = self.headers.get(root).copied() else {
                return Ok(Intersection::SubnodeNotFound);
            };
            self.decode_locked(&mut state, header)?;
            tracing::trace!(?root, ?leaf, "decoded sub-octree for query");
        }
        drop(state);

        Ok(match (already_decoded, self.octree.contains_leaf(leaf)) {
            (true, true) => Intersection::AlreadyExist,
            (false, true) => Intersection::DecodeFound,
            (_, false) => Intersection::DecodeNotFound,
        })
    }
}

#[cfg(test)]
use crate::{
    codec::{ Decoder, Encoder, EncoderConfig, SplitDepth },
    octree::random_cloud,
    PointCloud,
};

#[cfg(test)]
fn lazy_for(cloud: &PointCloud, max_depth: u8, split: SplitDepth) -> (Octree, LazyDecoder) {
    let original = Octree::from_point_cloud(max_depth, cloud).unwrap();
    let data = Encoder::with_config(EncoderConfig { split_depth: split }).encode(&original).unwrap();
    (original, LazyDecoder::new(data).unwrap())
}

#[test]
fn headers_index_every_root() {
    let original = Octree::from_point_cloud(7, &random_cloud(61, 3_000, 10.0)).unwrap();
    let config = EncoderConfig { split_depth: SplitDepth::Fixed(3) };
    let mut data = Encoder::with_config(config).encode(&original).unwrap();

    let headers = decode_node_headers(&mut data).unwrap();
    let roots: Vec<Index> = headers.iter().map(|header| header.root).collect();
    assert_eq!(roots, original.levels()[3].indices());

    let body_bytes: usize = headers.iter().map(|header| header.size as usize).sum();
    let nodes_below: usize = original.levels()[3..].iter().map(|level| level.len()).sum();
    assert_eq!(body_bytes, nodes_below);
}

#[test]
fn every_original_point_is_found() {
    let cloud = random_cloud(71, 2_000, 4.0);
    let (_, lazy) = lazy_for(&cloud, 6, SplitDepth::Fixed(2));

    for pos in &cloud.positions {
        assert!(lazy.intersect(*pos).unwrap().is_hit());
    }
    assert_eq!(lazy.decoded_count(), lazy.headers().len());
}

#[test]
fn queries_match_full_decode() {
    use rand::{ Rng, SeedableRng, rngs::StdRng };

    let cloud = random_cloud(81, 300, 8.0);
    let (original, lazy) = lazy_for(&cloud, 7, SplitDepth::Auto);
    let bbox = original.bounding_box();

    let mut rng = StdRng::seed_from_u64(82);
    for _ in 0..2_000 {
        let point = Vec3::new(
            rng.random_range(bbox.min.x..=bbox.max.x),
            rng.random_range(bbox.min.y..=bbox.max.y),
            rng.random_range(bbox.min.z..=bbox.max.z),
        );
        let leaf = original.leaf_address(point).unwrap();
        let result = lazy.intersect(point).unwrap();
        assert_eq!(result.is_hit(), original.contains_leaf(leaf), "{point:?} gave {result:?}");
    }
}

#[test]
fn second_query_reuses_decoded_sub_octree() {
    let cloud = random_cloud(91, 500, 2.0);
    let (_, lazy) = lazy_for(&cloud, 6, SplitDepth::Fixed(3));
    let point = cloud.positions[0];

    assert_eq!(lazy.intersect(point).unwrap(), Intersection::DecodeFound);
    let nodes = lazy.octree().node_count();
    assert_eq!(lazy.intersect(point).unwrap(), Intersection::AlreadyExist);
    assert_eq!(lazy.octree().node_count(), nodes);
    assert_eq!(lazy.decoded_count(), 1);

    let root = lazy.octree().leaf_address(point).unwrap().ancestor(3);
    assert!(lazy.is_decoded(root));
    assert!(!lazy.decode_node(root).unwrap());
}

#[test]
fn empty_space_needs_no_decode() {
    let cloud = PointCloud::from_positions(vec![Vec3::ZERO, Vec3::splat(0.1), Vec3::splat(10.0)]);
    let (_, lazy) = lazy_for(&cloud, 5, SplitDepth::Fixed(2));

    assert_eq!(lazy.intersect(Vec3::new(10.0, 0.0, 0.0)).unwrap(), Intersection::SubnodeNotFound);
    assert_eq!(lazy.intersect(Vec3::splat(-3.0)).unwrap(), Intersection::SubnodeNotFound);
    assert_eq!(lazy.decoded_count(), 0);

    assert_eq!(lazy.intersect(Vec3::splat(0.1)).unwrap(), Intersection::DecodeFound);
    assert_eq!(lazy.intersect(Vec3::splat(0.7)).unwrap(), Intersection::DecodeNotFound);
}

#[test]
fn decode_all_matches_full_decoder() {
    let cloud = random_cloud(101, 4_000, 30.0);
    let original = Octree::from_point_cloud(8, &cloud).unwrap();
    let mut data = Encoder::new().encode(&original).unwrap();
    let full = Decoder::new().decode(&mut data).unwrap();

    let lazy = LazyDecoder::new(data).unwrap();
    lazy.intersect(cloud.positions[17]).unwrap();
    lazy.decode_all().unwrap();

    let lazy = lazy.into_octree();
    for (a, b) in full.levels().iter().zip(lazy.levels()) {
        assert_eq!(a.snapshot(), b.snapshot());
    }
}

#[test]
fn concurrent_queries_agree() {
    let cloud = random_cloud(111, 3_000, 5.0);
    let (original, lazy) = lazy_for(&cloud, 7, SplitDepth::Fixed(3));

    std::thread::scope(|scope| {
        for chunk in cloud.positions.chunks(500) {
            let lazy = &lazy;
            scope.spawn(move || {
                for pos in chunk {
                    assert!(lazy.intersect(*pos).unwrap().is_hit());
                }
            });
        }
    });
    assert_eq!(original.leaves(), lazy.octree().leaves());
}

#[test]
fn repeated_root_is_rejected() {
    let octree = Octree::empty(3, crate::BoundingBox::new(Vec3::ZERO, Vec3::splat(8.0))).unwrap();
    octree.add_leaf(Index::new(3, 3, 3));
    let config = EncoderConfig { split_depth: SplitDepth::Fixed(0) };
    let data = Encoder::with_config(config).encode(&octree).unwrap();

    let mut doubled = EncodedData::new(data.scene_bounding_box, data.max_depth, data.sub_octree_depth);
    for byte in data.payload().iter().chain(data.payload()) {
        doubled.add_u8(*byte);
    }
    assert!(matches!(decode_node_headers(&mut doubled), Err(Error::StructuralInvariant(_))));
    assert!(LazyDecoder::new(doubled).is_err());
}

#[cfg(test)]
fn corrupt_last_mask() -> LazyDecoder {
    let octree = Octree::empty(4, crate::BoundingBox::new(Vec3::ZERO, Vec3::splat(16.0))).unwrap();
    octree.add_leaf(Index::new(1, 1, 1));
    octree.add_leaf(Index::new(15, 15, 15));
    let config = EncoderConfig { split_depth: SplitDepth::Fixed(1) };
    let data = Encoder::with_config(config).encode(&octree).unwrap();

    // Roots come in ascending order, so the last byte belongs to (1, 1, 1).
    let payload = data.payload();
    let mut corrupt = EncodedData::new(data.scene_bounding_box, data.max_depth, data.sub_octree_depth);
    for byte in &payload[..payload.len() - 1] {
        corrupt.add_u8(*byte);
    }
    corrupt.add_u8(0);
    LazyDecoder::new(corrupt).unwrap()
}

#[test]
fn failed_decode_leaves_no_nodes_behind() {
    let lazy = corrupt_last_mask();
    let point = Vec3::splat(15.5);

    let first = lazy.intersect(point).unwrap_err();
    assert!(matches!(first, Error::StructuralInvariant(_)));
    assert_eq!(lazy.octree().node_count(), 0);
    assert!(!lazy.is_decoded(Index::new(1, 1, 1)));

    let second = lazy.intersect(point).unwrap_err();
    assert_eq!(second.to_string(), first.to_string());
    assert_eq!(lazy.octree().node_count(), 0);

    // The intact sub-octree still decodes on its own.
    assert_eq!(lazy.intersect(Vec3::splat(1.5)).unwrap(), Intersection::DecodeFound);
    assert_eq!(lazy.octree().leaves(), vec![Index::new(1, 1, 1)]);
    assert!(lazy.decode_all().is_err());
    assert_eq!(lazy.octree().leaves(), vec![Index::new(1, 1, 1)]);
}

#[test]
fn decoded_queries_do_not_wait_on_stream() {
    let cloud = random_cloud(121, 1_000, 3.0);
    let (_, lazy) = lazy_for(&cloud, 6, SplitDepth::Fixed(2));
    lazy.decode_all().unwrap();

    // With every sub-octree decoded, queries only touch the memo set.
    let hits = std::sync::atomic::AtomicUsize::new(0);
    std::thread::scope(|scope| {
        for chunk in cloud.positions.chunks(250) {
            let (lazy, hits) = (&lazy, &hits);
            scope.spawn(move || {
                for pos in chunk {
                    if lazy.intersect(*pos).unwrap() == Intersection::AlreadyExist {
                        hits.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    }
                }
            });
        }
    });
    assert_eq!(hits.into_inner(), cloud.len());
}
