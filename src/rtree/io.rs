//! Stream persistence and zero-copy embedding of the page array.
//!
//! A stream is a fixed 96 byte header followed by the pages, every field in one byte order:
//!
//! | bytes | content |
//! |-------|---------|
//! | 4 | magic `RTRE`, high bit of the last byte set for little endian |
//! | 4 | format version |
//! | 64 | tree min, tree max, inverse diagonal, diagonal scaler; 4 `f32` each, `w = 0` |
//! | 24 | page size, root pages, levels, total nodes, total pages, first bottom node; `u32` each |
//! | 128 × pages | each page field-major: `minx`, `miny`, `minz`, `maxx`, `maxy`, `maxz`, `ptrs` |

use std::io::{Read, Write};

use bytemuck::Zeroable;
use glam::Vec3;
use tracing::debug;

use crate::error::{RTreeError, Result};
use crate::rtree::constants::{
    ENDIAN_LITTLE_FLAG, EXTRA_DATA_ALIGNMENT, HEADER_BYTE_LENGTH, MAGIC, VERSION,
};
use crate::rtree::index::{check_child_pointers, OwnedRTree, RTreeMetadata, RTreeRef};
use crate::rtree::page::{RTreePage, PAGE_BYTE_LENGTH};
use crate::rtree::quantize::Quantizer;
use crate::rtree::r#trait::RTreeIndex;

/// Byte order of a serialized stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endianness {
    #[default]
    Big,
    Little,
}

impl Endianness {
    /// The byte order of the running machine.
    pub const fn native() -> Self {
        if cfg!(target_endian = "little") {
            Endianness::Little
        } else {
            Endianness::Big
        }
    }

    fn magic(self) -> [u8; 4] {
        let mut magic = MAGIC;
        if self == Endianness::Little {
            magic[3] |= ENDIAN_LITTLE_FLAG;
        }
        magic
    }

    fn from_magic(magic: [u8; 4]) -> Result<Self> {
        if magic[..3] != MAGIC[..3] {
            return Err(RTreeError::BadMagic);
        }
        if magic[3] == MAGIC[3] {
            Ok(Endianness::Big)
        } else if magic[3] == MAGIC[3] | ENDIAN_LITTLE_FLAG {
            Ok(Endianness::Little)
        } else {
            Err(RTreeError::BadMagic)
        }
    }
}

struct HeaderWriter {
    bytes: Vec<u8>,
    endianness: Endianness,
}

impl HeaderWriter {
    fn u32(&mut self, v: u32) {
        let b = match self.endianness {
            Endianness::Big => v.to_be_bytes(),
            Endianness::Little => v.to_le_bytes(),
        };
        self.bytes.extend_from_slice(&b);
    }

    fn vec3(&mut self, v: Vec3) {
        for f in v.extend(0.).to_array() {
            self.u32(f.to_bits());
        }
    }
}

struct HeaderReader<'a> {
    bytes: &'a [u8],
    pos: usize,
    endianness: Endianness,
}

impl HeaderReader<'_> {
    fn u32(&mut self) -> u32 {
        let mut b = [0u8; 4];
        b.copy_from_slice(&self.bytes[self.pos..self.pos + 4]);
        self.pos += 4;
        match self.endianness {
            Endianness::Big => u32::from_be_bytes(b),
            Endianness::Little => u32::from_le_bytes(b),
        }
    }

    fn vec3(&mut self) -> Vec3 {
        let x = f32::from_bits(self.u32());
        let y = f32::from_bits(self.u32());
        let z = f32::from_bits(self.u32());
        let _w = self.u32();
        Vec3::new(x, y, z)
    }
}

fn encode_header(metadata: &RTreeMetadata, endianness: Endianness) -> Vec<u8> {
    let mut w = HeaderWriter {
        bytes: Vec::with_capacity(HEADER_BYTE_LENGTH),
        endianness,
    };
    w.bytes.extend_from_slice(&endianness.magic());
    w.u32(VERSION);
    let q = metadata.quantizer();
    w.vec3(q.bounds_min);
    w.vec3(q.bounds_max);
    w.vec3(q.inv_diagonal);
    w.vec3(q.diagonal_scaler);
    w.u32(metadata.page_size());
    w.u32(metadata.num_root_pages());
    w.u32(metadata.num_levels());
    w.u32(metadata.total_nodes());
    w.u32(metadata.total_pages());
    w.u32(metadata.bottom_level_first_node_index());
    debug_assert_eq!(w.bytes.len(), HEADER_BYTE_LENGTH);
    w.bytes
}

fn decode_header(bytes: &[u8; HEADER_BYTE_LENGTH]) -> Result<(RTreeMetadata, Endianness)> {
    let endianness = Endianness::from_magic([bytes[0], bytes[1], bytes[2], bytes[3]])?;
    let mut r = HeaderReader {
        bytes,
        pos: 4,
        endianness,
    };
    let version = r.u32();
    if version != VERSION {
        return Err(RTreeError::UnsupportedVersion {
            expected: VERSION,
            found: version,
        });
    }
    let quantizer = Quantizer::from_parts(r.vec3(), r.vec3(), r.vec3(), r.vec3());
    let metadata = RTreeMetadata::try_new(
        quantizer,
        r.u32(),
        r.u32(),
        r.u32(),
        r.u32(),
        r.u32(),
        r.u32(),
    )?;
    Ok((metadata, endianness))
}

fn write_tree<T: RTreeIndex, W: Write>(
    tree: &T,
    mut writer: W,
    endianness: Endianness,
) -> Result<()> {
    let metadata = tree.metadata();
    let pages = tree.pages();
    if pages.len() != metadata.total_pages() as usize {
        return Err(RTreeError::LengthMismatch {
            expected: metadata.total_pages() as usize,
            actual: pages.len(),
        });
    }

    writer.write_all(&encode_header(metadata, endianness))?;
    if endianness == Endianness::native() {
        writer.write_all(bytemuck::cast_slice(pages))?;
    } else {
        for page in pages {
            let mut swapped = *page;
            swapped.swap_bytes();
            writer.write_all(bytemuck::bytes_of(&swapped))?;
        }
    }
    Ok(())
}

fn export_pages<T: RTreeIndex>(tree: &T, sink: &mut Vec<u8>) -> usize {
    let start = sink.len().next_multiple_of(EXTRA_DATA_ALIGNMENT);
    sink.resize(start, 0);
    sink.extend_from_slice(bytemuck::cast_slice(tree.pages()));
    start
}

impl OwnedRTree {
    /// Write this tree to `writer` in the given byte order.
    ///
    /// Fails if the tree has been released.
    pub fn save<W: Write>(&self, writer: W, endianness: Endianness) -> Result<()> {
        write_tree(self, writer, endianness)
    }

    /// Write this tree to `writer` big endian.
    pub fn save_be<W: Write>(&self, writer: W) -> Result<()> {
        self.save(writer, Endianness::Big)
    }

    /// Read a tree written by [`OwnedRTree::save`] in either byte order.
    pub fn load<R: Read>(mut reader: R) -> Result<Self> {
        let mut header = [0u8; HEADER_BYTE_LENGTH];
        reader.read_exact(&mut header)?;
        let (metadata, endianness) = decode_header(&header)?;

        // grow page by page so a corrupt page count fails on the short read, not the allocation
        let total_pages = metadata.total_pages() as usize;
        let mut pages = Vec::with_capacity(total_pages.min(1 << 16));
        let swap = endianness != Endianness::native();
        for _ in 0..total_pages {
            let mut page = RTreePage::zeroed();
            reader.read_exact(bytemuck::bytes_of_mut(&mut page))?;
            if swap {
                page.swap_bytes();
            }
            pages.push(page);
        }
        check_child_pointers(&metadata, &pages)?;
        debug!(
            total_pages,
            num_levels = metadata.num_levels(),
            ?endianness,
            "loaded rtree"
        );
        Ok(Self { pages, metadata })
    }

    /// Append the page array to `sink` in native byte order, padded to start on a multiple of
    /// 128 bytes. Returns the offset the pages start at.
    ///
    /// The metadata is not written; keep it alongside to import the pages again with
    /// [`RTreeRef::import_extra_data`].
    pub fn export_extra_data(&self, sink: &mut Vec<u8>) -> usize {
        export_pages(self, sink)
    }
}

/// A tree imported in place from a larger blob.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImportedExtraData<'a> {
    pub tree: RTreeRef<'a>,
    /// Offset in the blob right after the pages.
    pub next_offset: usize,
    /// Bytes skipped to reach the aligned start of the pages.
    pub padding: usize,
}

impl<'a> RTreeRef<'a> {
    /// Write this tree to `writer` in the given byte order.
    pub fn save<W: Write>(&self, writer: W, endianness: Endianness) -> Result<()> {
        write_tree(self, writer, endianness)
    }

    /// Write this tree to `writer` big endian.
    pub fn save_be<W: Write>(&self, writer: W) -> Result<()> {
        self.save(writer, Endianness::Big)
    }

    /// See [`OwnedRTree::export_extra_data`].
    pub fn export_extra_data(&self, sink: &mut Vec<u8>) -> usize {
        export_pages(self, sink)
    }

    /// Use the pages stored in `blob` in place, starting at the first multiple of 128 at or after
    /// `offset`, as written by [`OwnedRTree::export_extra_data`].
    ///
    /// Offsets are relative to the start of `blob`, whose address must be at least 16-byte
    /// aligned.
    pub fn import_extra_data(
        metadata: RTreeMetadata,
        blob: &'a [u8],
        offset: usize,
    ) -> Result<ImportedExtraData<'a>> {
        let start = offset.next_multiple_of(EXTRA_DATA_ALIGNMENT);
        let needed = metadata.total_pages() as usize * PAGE_BYTE_LENGTH;
        let end = start
            .checked_add(needed)
            .filter(|end| *end <= blob.len())
            .ok_or(RTreeError::OutOfBounds {
                offset: start,
                needed,
                available: blob.len(),
            })?;
        let pages: &[RTreePage] =
            bytemuck::try_cast_slice(&blob[start..end]).map_err(|_| RTreeError::Misaligned)?;
        check_child_pointers(&metadata, pages)?;
        debug!(
            offset = start,
            total_pages = pages.len(),
            "imported rtree pages"
        );
        Ok(ImportedExtraData {
            tree: RTreeRef { pages, metadata },
            next_offset: end,
            padding: start - offset,
        })
    }
}
