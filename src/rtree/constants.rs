/// Number of nodes per page. The transposed page layout and the 8-lane overlap tests depend on
/// this exact value.
pub const PAGE_SIZE: usize = 8;

/// Magic bytes at the start of a serialized tree. The last byte also carries the byte order flag,
/// see [`ENDIAN_LITTLE_FLAG`].
pub const MAGIC: [u8; 4] = *b"RTRE";

/// Set on the last magic byte when the stream body is little endian.
pub const ENDIAN_LITTLE_FLAG: u8 = 0x80;

/// Serialization format version. Loading any other version fails.
pub const VERSION: u32 = 1;

/// Size in bytes of a stream header, magic included.
pub const HEADER_BYTE_LENGTH: usize = 4 + 4 + 16 * 4 + 6 * 4;

/// Alignment of the page array when embedded in an external blob.
pub const EXTRA_DATA_ALIGNMENT: usize = 128;

/// Depth of the explicit traversal stack.
pub const MAX_STACK: usize = 128;

/// Absolute inflation applied to the tree bounds so that no axis is zero-width.
pub(crate) const MINIMUM_BOUNDS_EPSILON: f32 = 1e-4;

/// Largest quantized coordinate.
pub(crate) const QUANTIZED_MAX: f32 = 65535.0;

/// Quantized queries are clamped to this range, leaving 0 and 65535 free for sentinels.
pub(crate) const QUERY_CLAMP_LO: f32 = 1.0;
pub(crate) const QUERY_CLAMP_HI: f32 = 65534.0;

/// Sentinel bounds of an empty slot. Nothing can overlap `[EMPTY_MIN, EMPTY_MAX]`.
pub(crate) const EMPTY_MIN: u16 = 0xFFFF;
pub(crate) const EMPTY_MAX: u16 = 0;
