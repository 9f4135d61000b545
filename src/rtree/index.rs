use glam::Vec3;

use crate::error::{RTreeError, Result};
use crate::rtree::constants::PAGE_SIZE;
use crate::rtree::page::RTreePage;
use crate::rtree::quantize::Quantizer;
use crate::rtree::r#trait::RTreeIndex;

/// Tree-level metadata. Immutable after build.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RTreeMetadata {
    pub(crate) quantizer: Quantizer,
    pub(crate) page_size: u32,
    pub(crate) num_root_pages: u32,
    pub(crate) num_levels: u32,
    pub(crate) total_nodes: u32,
    pub(crate) total_pages: u32,
    pub(crate) bottom_level_first_node_index: u32,
}

impl RTreeMetadata {
    /// Create metadata from its serialized fields, checking that they describe a well-formed
    /// tree.
    pub fn try_new(
        quantizer: Quantizer,
        page_size: u32,
        num_root_pages: u32,
        num_levels: u32,
        total_nodes: u32,
        total_pages: u32,
        bottom_level_first_node_index: u32,
    ) -> Result<Self> {
        if page_size as usize != PAGE_SIZE {
            return Err(RTreeError::InvalidHeader(format!(
                "page size {} when expected {}",
                page_size, PAGE_SIZE
            )));
        }
        if total_pages.checked_mul(page_size) != Some(total_nodes) {
            return Err(RTreeError::InvalidHeader(format!(
                "{} nodes do not fill {} pages",
                total_nodes, total_pages
            )));
        }
        if num_root_pages == 0 || num_root_pages > total_pages {
            return Err(RTreeError::InvalidHeader(format!(
                "{} root pages out of {}",
                num_root_pages, total_pages
            )));
        }
        if bottom_level_first_node_index >= total_nodes
            || bottom_level_first_node_index % page_size != 0
        {
            return Err(RTreeError::InvalidHeader(format!(
                "bottom level starts at node {} of {}",
                bottom_level_first_node_index, total_nodes
            )));
        }
        if num_levels == 0 {
            return Err(RTreeError::InvalidHeader("zero levels".to_string()));
        }
        let levels = level_node_counts(total_nodes - bottom_level_first_node_index);
        if levels.len() != num_levels as usize
            || levels[0] != num_root_pages * page_size
            || levels.iter().map(|&c| c as u64).sum::<u64>() != total_nodes as u64
        {
            return Err(RTreeError::InvalidHeader(format!(
                "{} levels with {} root pages do not fit {} bottom nodes of {}",
                num_levels,
                num_root_pages,
                total_nodes - bottom_level_first_node_index,
                total_nodes
            )));
        }
        Ok(Self {
            quantizer,
            page_size,
            num_root_pages,
            num_levels,
            total_nodes,
            total_pages,
            bottom_level_first_node_index,
        })
    }

    /// Quantization coefficients.
    pub fn quantizer(&self) -> &Quantizer {
        &self.quantizer
    }
    /// Inflated minimum corner of the tree.
    pub fn bounds_min(&self) -> Vec3 {
        self.quantizer.bounds_min
    }
    /// Inflated maximum corner of the tree.
    pub fn bounds_max(&self) -> Vec3 {
        self.quantizer.bounds_max
    }
    pub fn page_size(&self) -> u32 {
        self.page_size
    }
    pub fn num_root_pages(&self) -> u32 {
        self.num_root_pages
    }
    pub fn num_levels(&self) -> u32 {
        self.num_levels
    }
    pub fn total_nodes(&self) -> u32 {
        self.total_nodes
    }
    pub fn total_pages(&self) -> u32 {
        self.total_pages
    }
    /// Flat index of the first node whose pointer is a payload rather than a child offset.
    pub fn bottom_level_first_node_index(&self) -> u32 {
        self.bottom_level_first_node_index
    }

    /// Returns `true` if the page starting at node `first_node_index` holds payloads.
    #[inline]
    pub fn is_bottom_page(&self, first_node_index: u32) -> bool {
        first_node_index >= self.bottom_level_first_node_index
    }
}

/// Node counts per level, root level first, of a tree with `bottom_nodes` bottom-level nodes.
///
/// Every level is padded to whole pages, and parents are added until a level fits in two pages.
pub(crate) fn level_node_counts(bottom_nodes: u32) -> Vec<u32> {
    let mut counts = vec![bottom_nodes];
    let mut current = bottom_nodes;
    while current as usize > 2 * PAGE_SIZE {
        let parents = current.div_ceil(PAGE_SIZE as u32);
        current = parents.next_multiple_of(PAGE_SIZE as u32);
        counts.push(current);
    }
    counts.reverse();
    counts
}

/// Check that every internal node points at a page of the level right below its own.
///
/// Queries index pages through these pointers, so this keeps a corrupt page array from sending
/// a traversal out of bounds or around in a cycle. Sentinel slots are skipped, no query visits
/// them.
pub(crate) fn check_child_pointers(
    metadata: &RTreeMetadata,
    pages: &[RTreePage],
) -> Result<()> {
    let bottom_nodes = metadata.total_nodes - metadata.bottom_level_first_node_index;
    let levels = level_node_counts(bottom_nodes);
    let mut level_start = 0u32;
    for pair in levels.windows(2) {
        let child_start = level_start + pair[0];
        let child_end = child_start + pair[1];
        let first_page = level_start as usize / PAGE_SIZE;
        let last_page = child_start as usize / PAGE_SIZE;
        for (j, page) in pages[first_page..last_page].iter().enumerate() {
            for k in 0..PAGE_SIZE {
                let node = page.node(k);
                if node.is_sentinel() {
                    continue;
                }
                let ptr = node.ptr;
                if ptr as usize % PAGE_SIZE != 0 || ptr < child_start || ptr >= child_end {
                    return Err(RTreeError::CorruptPage {
                        node: (first_page + j) * PAGE_SIZE + k,
                        ptr,
                    });
                }
            }
        }
        level_start = child_start;
    }
    Ok(())
}

/// An RTree owning its page array.
///
/// Usually this will be created from scratch via [`RTreeBuilder`][crate::rtree::RTreeBuilder] or
/// read from a stream with [`OwnedRTree::load`].
#[derive(Debug, Clone, PartialEq)]
pub struct OwnedRTree {
    pub(crate) pages: Vec<RTreePage>,
    pub(crate) metadata: RTreeMetadata,
}

impl OwnedRTree {
    /// Wrap an existing page array.
    pub fn try_new(metadata: RTreeMetadata, pages: Vec<RTreePage>) -> Result<Self> {
        check_pages(&metadata, &pages)?;
        Ok(Self { pages, metadata })
    }

    /// Free the page array. The tree answers every query with no results afterwards, like a
    /// tree that failed to load.
    pub fn release(&mut self) {
        self.pages = Vec::new();
    }

    pub fn into_inner(self) -> (RTreeMetadata, Vec<RTreePage>) {
        (self.metadata, self.pages)
    }

    /// Borrow this tree as an [`RTreeRef`].
    pub fn as_rtree_ref(&self) -> RTreeRef<'_> {
        RTreeRef {
            pages: &self.pages,
            metadata: self.metadata,
        }
    }
}

/// An RTree whose pages live in memory owned by someone else, for example a larger blob the
/// tree was imported from with [`RTreeRef::import_extra_data`].
///
/// Dropping it never frees the pages.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RTreeRef<'a> {
    pub(crate) pages: &'a [RTreePage],
    pub(crate) metadata: RTreeMetadata,
}

impl<'a> RTreeRef<'a> {
    pub fn try_new(metadata: RTreeMetadata, pages: &'a [RTreePage]) -> Result<Self> {
        check_pages(&metadata, &pages)?;
        Ok(Self { pages, metadata })
    }
}

fn check_pages(metadata: &RTreeMetadata, pages: &[RTreePage]) -> Result<()> {
    if pages.len() != metadata.total_pages as usize {
        return Err(RTreeError::LengthMismatch {
            expected: metadata.total_pages as usize,
            actual: pages.len(),
        });
    }
    check_child_pointers(metadata, pages)
}

impl RTreeIndex for OwnedRTree {
    fn pages(&self) -> &[RTreePage] {
        &self.pages
    }

    fn metadata(&self) -> &RTreeMetadata {
        &self.metadata
    }

    fn is_user_allocated(&self) -> bool {
        false
    }
}

impl RTreeIndex for RTreeRef<'_> {
    fn pages(&self) -> &[RTreePage] {
        self.pages
    }

    fn metadata(&self) -> &RTreeMetadata {
        &self.metadata
    }

    fn is_user_allocated(&self) -> bool {
        true
    }
}
