//! The transposed 8-node page, the unit of storage and of batched overlap tests.

use bytemuck::{Pod, Zeroable};

use crate::rtree::constants::{EMPTY_MAX, EMPTY_MIN, PAGE_SIZE};

/// Eight sibling nodes stored field-major: all eight `minx` values, then all eight `miny`, and so
/// on, ending with the eight pointers.
///
/// The pointer of a node is the flat node index of its first child page for internal nodes, or
/// the payload given at build time for bottom-level nodes. Which one applies is decided by the
/// page position relative to
/// [`RTreeMetadata::bottom_level_first_node_index`][crate::rtree::RTreeMetadata::bottom_level_first_node_index].
#[repr(C, align(16))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct RTreePage {
    pub minx: [u16; PAGE_SIZE],
    pub miny: [u16; PAGE_SIZE],
    pub minz: [u16; PAGE_SIZE],
    pub maxx: [u16; PAGE_SIZE],
    pub maxy: [u16; PAGE_SIZE],
    pub maxz: [u16; PAGE_SIZE],
    pub ptrs: [u32; PAGE_SIZE],
}

/// Byte size of one page.
pub const PAGE_BYTE_LENGTH: usize = std::mem::size_of::<RTreePage>();

const _: () = assert!(PAGE_BYTE_LENGTH == 128);

/// A single quantized node, only used while building and for inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuantizedNode {
    pub min: [u16; 3],
    pub max: [u16; 3],
    pub ptr: u32,
}

impl QuantizedNode {
    /// An empty slot whose pointer refers to the node at `empty_index`.
    #[inline]
    pub fn empty(empty_index: u32) -> Self {
        Self {
            min: [EMPTY_MIN; 3],
            max: [EMPTY_MAX; 3],
            ptr: empty_index,
        }
    }

    /// Returns `true` if this is exactly the empty slot encoding written by the builder.
    #[inline]
    pub fn is_sentinel(&self) -> bool {
        self.min == [EMPTY_MIN; 3] && self.max == [EMPTY_MAX; 3]
    }

    /// Returns `true` if this node carries an inverted range on any axis.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.min[0] > self.max[0] || self.min[1] > self.max[1] || self.min[2] > self.max[2]
    }
}

impl RTreePage {
    /// Transpose eight node-major entries into a page.
    pub fn from_nodes(nodes: &[QuantizedNode; PAGE_SIZE]) -> Self {
        let mut page = Self::zeroed();
        for (k, n) in nodes.iter().enumerate() {
            page.minx[k] = n.min[0];
            page.miny[k] = n.min[1];
            page.minz[k] = n.min[2];
            page.maxx[k] = n.max[0];
            page.maxy[k] = n.max[1];
            page.maxz[k] = n.max[2];
            page.ptrs[k] = n.ptr;
        }
        page
    }

    /// Read back the node in lane `k`.
    #[inline]
    pub fn node(&self, k: usize) -> QuantizedNode {
        QuantizedNode {
            min: [self.minx[k], self.miny[k], self.minz[k]],
            max: [self.maxx[k], self.maxy[k], self.maxz[k]],
            ptr: self.ptrs[k],
        }
    }

    /// Reverse the byte order of every field in place.
    pub(crate) fn swap_bytes(&mut self) {
        for lane in [
            &mut self.minx,
            &mut self.miny,
            &mut self.minz,
            &mut self.maxx,
            &mut self.maxy,
            &mut self.maxz,
        ] {
            for v in lane.iter_mut() {
                *v = v.swap_bytes();
            }
        }
        for p in self.ptrs.iter_mut() {
            *p = p.swap_bytes();
        }
    }
}
