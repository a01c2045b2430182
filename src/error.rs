use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Header fields disagree with the buffer they describe.
    #[error("Malformed stream: {0}")]
    Format(String),

    /// A read, peek or skip would move the cursor past the end of the buffer.
    #[error("Read of {requested} bytes at offset {offset} overruns a stream of {len} bytes")]
    StreamOverrun {
        offset: usize,
        requested: usize,
        len: usize,
    },

    /// The stream contradicts the octree being built from it, or the octree
    /// contradicts itself during encoding.
    #[error("Structural invariant violated: {0}")]
    StructuralInvariant(String),

    #[error("Depth {depth} is out of range (maximum {max})")]
    InvalidDepth {
        depth: u8,
        max: u8,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
