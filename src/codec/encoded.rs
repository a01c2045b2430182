use std::io::{ ErrorKind, Read, Write };
use byteorder::{ BigEndian, ByteOrder, WriteBytesExt };
use glam::Vec3;
use crate::{
    error::{ Error, Result },
    BoundingBox,
    Octree,
};

/// An encoded octree: header fields plus the sub-octree payload, with a read
/// cursor over the payload.
///
/// Writes always append at the end; reads start at the cursor and advance
/// it. All integers are big-endian.
///
/// ```text
/// Header (34 bytes)
///   bbox min      3 x f32
///   bbox max      3 x f32
///   max depth     u8
///   split depth   u8
///   payload size  u64
/// Payload
///   per sub-octree: node size (u32), address (u32 | u64), mask bytes
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedData {
    pub scene_bounding_box: BoundingBox,
    pub max_depth: u8,
    pub sub_octree_depth: u8,
    buffer: Vec<u8>,
    cursor: usize,
}

impl EncodedData {
    pub const HEADER_LEN: usize = 6 * 4 + 1 + 1 + 8;

    pub fn new(scene_bounding_box: BoundingBox, max_depth: u8, sub_octree_depth: u8) -> Self {
        Self {
            scene_bounding_box,
            max_depth,
            sub_octree_depth,
            buffer: Vec::new(),
            cursor: 0,
        }
    }

    pub fn with_capacity(scene_bounding_box: BoundingBox, max_depth: u8, sub_octree_depth: u8, capacity: usize) -> Self {
        let mut data = Self::new(scene_bounding_box, max_depth, sub_octree_depth);
        data.buffer.reserve_exact(capacity);
        data
    }

    pub fn payload(&self) -> &[u8] {
        &self.buffer
    }

    /// Payload length in bytes.
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    #[inline(always)]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    #[inline(always)]
    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.cursor
    }

    pub fn rewind(&mut self) {
        self.cursor = 0;
    }

    pub fn seek(&mut self, offset: usize) -> Result<()> {
        if offset > self.buffer.len() {
            return Err(self.overrun_at(offset, 0));
        }
        self.cursor = offset;
        Ok(())
    }

    pub fn skip(&mut self, len: usize) -> Result<()> {
        self.take(len).map(|_| ())
    }

    /// Drops spare capacity left over from encoding.
    pub fn shrink(&mut self) {
        self.buffer.shrink_to_fit();
    }

    pub fn add_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    pub fn add_u32(&mut self, value: u32) {
        let mut bytes = [0; 4];
        BigEndian::write_u32(&mut bytes, value);
        self.buffer.extend_from_slice(&bytes);
    }

    pub fn add_u64(&mut self, value: u64) {
        let mut bytes = [0; 8];
        BigEndian::write_u64(&mut bytes, value);
        self.buffer.extend_from_slice(&bytes);
    }

    /// Overwrites four already written bytes at `offset`.
    pub fn patch_u32(&mut self, offset: usize, value: u32) -> Result<()> {
        let len = self.buffer.len();
        let slot = self.buffer
            .get_mut(offset..offset + 4)
            .ok_or(Error::StreamOverrun { offset, requested: 4, len })?;
        BigEndian::write_u32(slot, value);
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(BigEndian::read_u32(self.take(4)?))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(BigEndian::read_u64(self.take(8)?))
    }

    /// Top bit of the next byte, without moving the cursor.
    pub fn peek_flag(&self) -> Result<bool> {
        self.buffer
            .get(self.cursor)
            .map(|byte| byte & 0x80 != 0)
            .ok_or_else(|| self.overrun_at(self.cursor, 1))
    }

    fn take(&mut self, len: usize) -> Result<&[u8]> {
        let start = self.cursor;
        let end = start.checked_add(len).filter(|end| *end <= self.buffer.len())
            .ok_or_else(|| self.overrun_at(start, len))?;
        self.cursor = end;
        Ok(&self.buffer[start..end])
    }

    fn overrun_at(&self, offset: usize, requested: usize) -> Error {
        Error::StreamOverrun { offset, requested, len: self.buffer.len() }
    }

    /// Writes header and payload.
    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<()> {
        for v in [self.scene_bounding_box.min, self.scene_bounding_box.max] {
            for c in v.to_array() {
                writer.write_f32::<BigEndian>(c)?;
            }
        }
        writer.write_u8(self.max_depth)?;
        writer.write_u8(self.sub_octree_depth)?;
        writer.write_u64::<BigEndian>(self.buffer.len() as u64)?;
        writer.write_all(&self.buffer)?;
        Ok(())
    }

    /// Reads what [`EncodedData::write_to`] wrote. The payload must be exactly
    /// as long as the header says, with nothing after it.
    pub fn read_from<R: Read>(mut reader: R) -> Result<Self> {
        let mut header = [0; EncodedData::HEADER_LEN];
        reader.read_exact(&mut header).map_err(|err| match err.kind() {
            ErrorKind::UnexpectedEof => Error::Format(format!(
                "stream ends inside the {} byte header", Self::HEADER_LEN
            )),
            _ => Error::Io(err),
        })?;

        let mut coords = [0.0; 6];
        BigEndian::read_f32_into(&header[..24], &mut coords);
        let min = Vec3::new(coords[0], coords[1], coords[2]);
        let max = Vec3::new(coords[3], coords[4], coords[5]);
        let max_depth = header[24];
        let sub_octree_depth = header[25];
        let payload_len = BigEndian::read_u64(&header[26..34]);

        if max_depth == 0 || max_depth > Octree::MAX_DEPTH {
            return Err(Error::Format(format!("max depth {max_depth} outside 1..={}", Octree::MAX_DEPTH)));
        }
        if sub_octree_depth >= max_depth {
            return Err(Error::Format(format!(
                "sub-octree depth {sub_octree_depth} must be below max depth {max_depth}"
            )));
        }

        let mut buffer = Vec::new();
        reader.read_to_end(&mut buffer)?;
        if buffer.len() as u64 != payload_len {
            return Err(Error::Format(format!(
                "header announces {payload_len} payload bytes, stream holds {}", buffer.len()
            )));
        }

        Ok(Self {
            scene_bounding_box: BoundingBox::new(min, max),
            max_depth,
            sub_octree_depth,
            buffer,
            cursor: 0,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(Self::HEADER_LEN + self.buffer.len());
        bytes.extend_from_slice(&self.header_bytes());
        bytes.extend_from_slice(&self.buffer);
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::read_from(bytes)
    }

    fn header_bytes(&self) -> [u8; EncodedData::HEADER_LEN] {
        let mut header = [0; EncodedData::HEADER_LEN];
        let coords = self.scene_bounding_box.min.to_array()
            .into_iter()
            .chain(self.scene_bounding_box.max.to_array());
        for (i, c) in coords.enumerate() {
            BigEndian::write_f32(&mut header[i * 4..i * 4 + 4], c);
        }
        header[24] = self.max_depth;
        header[25] = self.sub_octree_depth;
        BigEndian::write_u64(&mut header[26..34], self.buffer.len() as u64);
        header
    }
}

#[cfg(test)]
fn sample() -> EncodedData {
    let mut data = EncodedData::new(BoundingBox::new(Vec3::splat(-1.0), Vec3::new(2.0, 3.0, 4.5)), 9, 4);
    data.add_u32(0xdead_beef);
    data.add_u8(0x7f);
    data.add_u64(u64::MAX - 1);
    data
}

#[test]
fn typed_reads_follow_writes() {
    let mut data = sample();
    assert_eq!(data.len(), 13);
    assert_eq!(data.read_u32().unwrap(), 0xdead_beef);
    assert!(!data.peek_flag().unwrap());
    assert_eq!(data.read_u8().unwrap(), 0x7f);
    assert!(data.peek_flag().unwrap());
    assert_eq!(data.read_u64().unwrap(), u64::MAX - 1);
    assert_eq!(data.remaining(), 0);
}

#[test]
fn reading_past_end_overruns() {
    let mut data = sample();
    data.seek(11).unwrap();
    assert!(matches!(
        data.read_u32(),
        Err(Error::StreamOverrun { offset: 11, requested: 4, len: 13 })
    ));
    // A failed read leaves the cursor alone.
    assert_eq!(data.cursor(), 11);

    data.skip(2).unwrap();
    assert!(matches!(data.peek_flag(), Err(Error::StreamOverrun { .. })));
    assert!(matches!(data.seek(14), Err(Error::StreamOverrun { .. })));
    assert!(matches!(data.patch_u32(12, 0), Err(Error::StreamOverrun { .. })));
}

#[test]
fn patch_overwrites_in_place() {
    let mut data = sample();
    data.patch_u32(0, 7).unwrap();
    assert_eq!(data.read_u32().unwrap(), 7);
    assert_eq!(data.len(), 13);
}

#[test]
fn persistence_round_trip() {
    let data = sample();
    let bytes = data.to_bytes();
    assert_eq!(bytes.len(), EncodedData::HEADER_LEN + 13);

    let mut written = Vec::new();
    data.write_to(&mut written).unwrap();
    assert_eq!(written, bytes);

    assert_eq!(EncodedData::from_bytes(&bytes).unwrap(), data);
}

#[test]
fn inconsistent_header_is_a_format_error() {
    let bytes = sample().to_bytes();
    assert!(matches!(EncodedData::from_bytes(&bytes[..bytes.len() - 1]), Err(Error::Format(_))));
    assert!(matches!(EncodedData::from_bytes(&bytes[..10]), Err(Error::Format(_))));

    let mut trailing = bytes.clone();
    trailing.push(0);
    assert!(matches!(EncodedData::from_bytes(&trailing), Err(Error::Format(_))));

    let mut bad_depth = bytes;
    bad_depth[25] = 9;
    assert!(matches!(EncodedData::from_bytes(&bad_depth), Err(Error::Format(_))));
}

#[test]
fn truncated_header_is_a_format_error() {
    let bytes = sample().to_bytes();
    for len in [0, 1, 10, EncodedData::HEADER_LEN - 1] {
        assert!(matches!(EncodedData::read_from(&bytes[..len]), Err(Error::Format(_))), "{len} bytes");
    }
    assert!(EncodedData::read_from(&bytes[..]).is_ok());
}
