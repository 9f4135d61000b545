use thiserror::Error;

/// Enum with all errors in this crate.
#[derive(Error, Debug)]
pub enum RTreeError {
    #[error("Cannot build an RTree from zero items.")]
    EmptyInput,

    #[error("Expected {expected} items, got {actual}.")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("Data not in RTree format.")]
    BadMagic,

    #[error("Got v{found} data when expected v{expected}.")]
    UnsupportedVersion { expected: u32, found: u32 },

    #[error("Invalid RTree header: {0}")]
    InvalidHeader(String),

    #[error("Page data out of bounds: need {needed} bytes from offset {offset}, have {available}.")]
    OutOfBounds {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("Page data is not aligned for in-place access.")]
    Misaligned,

    #[error("Node {node} points to {ptr}, outside the level below it.")]
    CorruptPage { node: usize, ptr: u32 },

    #[error("Triangle {triangle} refers to vertex {index} of {num_vertices}.")]
    InvalidVertexIndex {
        triangle: usize,
        index: u32,
        num_vertices: usize,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RTreeError>;
