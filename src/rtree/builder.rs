use glam::Vec3;
use tracing::{debug, trace};

use crate::bounds::Aabb;
use crate::error::{RTreeError, Result};
use crate::rtree::constants::PAGE_SIZE;
use crate::rtree::index::{OwnedRTree, RTreeMetadata};
use crate::rtree::page::{QuantizedNode, RTreePage};
use crate::rtree::quantize::Quantizer;
use crate::rtree::sort::sort_binary;

/// Options controlling how a tree is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildOptions {
    /// Round quantized node boxes outward so they always enclose the input boxes.
    ///
    /// When `false`, node bounds round to nearest, which can drop hits on boxes that only touch
    /// the query.
    pub fix_quantized_boxes: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            fix_quantized_boxes: true,
        }
    }
}

/// A builder to create an [`OwnedRTree`].
///
/// ```
/// use glam::Vec3;
/// use quantized_rtree::bounds::Aabb;
/// use quantized_rtree::rtree::{RTreeBuilder, RTreeIndex};
///
/// let mut builder = RTreeBuilder::new(3);
/// builder.add(Vec3::new(0., 0., 0.), Vec3::new(2., 2., 2.));
/// builder.add(Vec3::new(1., 1., 1.), Vec3::new(3., 3., 3.));
/// builder.add(Vec3::new(2., 2., 2.), Vec3::new(4., 4., 4.));
/// let tree = builder.finish().unwrap();
/// let mut hits = tree.search_aabb(&Aabb::from_point(Vec3::splat(1.5)));
/// hits.sort();
/// assert_eq!(hits, vec![0, 1]);
/// ```
#[derive(Debug, Clone)]
pub struct RTreeBuilder {
    num_items: u32,
    boxes: Vec<Aabb>,
    payloads: Vec<u32>,
    options: BuildOptions,
}

/// A node before quantization. `ptr` is `None` for padding slots.
#[derive(Debug, Clone, Copy)]
struct UnquantizedNode {
    bounds: Aabb,
    ptr: Option<u32>,
}

impl UnquantizedNode {
    const EMPTY: Self = Self {
        bounds: Aabb::EMPTY,
        ptr: None,
    };
}

impl RTreeBuilder {
    /// Create a new builder with the provided number of items and default options.
    pub fn new(num_items: u32) -> Self {
        Self::with_options(num_items, BuildOptions::default())
    }

    /// Create a new builder with the provided number of items and options.
    pub fn with_options(num_items: u32, options: BuildOptions) -> Self {
        Self {
            num_items,
            boxes: Vec::with_capacity(num_items as usize),
            payloads: Vec::with_capacity(num_items as usize),
            options,
        }
    }

    /// The options this builder was created with.
    pub fn options(&self) -> &BuildOptions {
        &self.options
    }

    /// Add a box. Its payload is the insertion index, which is also returned.
    #[inline]
    pub fn add(&mut self, min: Vec3, max: Vec3) -> u32 {
        let index = self.boxes.len() as u32;
        self.add_with_payload(Aabb::new(min, max), index);
        index
    }

    /// Add a box carrying an arbitrary payload, returned by queries that hit it.
    #[inline]
    pub fn add_with_payload(&mut self, aabb: Aabb, payload: u32) {
        self.boxes.push(aabb);
        self.payloads.push(payload);
    }

    /// Add the bounds of a triangle, using the insertion index as payload.
    #[inline]
    pub fn add_triangle(&mut self, v0: Vec3, v1: Vec3, v2: Vec3) -> u32 {
        let index = self.boxes.len() as u32;
        self.add_with_payload(Aabb::from_triangle(v0, v1, v2), index);
        index
    }

    /// Consume this builder, sorting the boxes and generating a tree ready for queries.
    pub fn finish(self) -> Result<OwnedRTree> {
        if self.num_items == 0 {
            return Err(RTreeError::EmptyInput);
        }
        if self.boxes.len() != self.num_items as usize {
            return Err(RTreeError::LengthMismatch {
                expected: self.num_items as usize,
                actual: self.boxes.len(),
            });
        }

        let mut tree_bounds = Aabb::EMPTY;
        for b in self.boxes.iter() {
            tree_bounds.include(b);
        }
        if tree_bounds.is_empty() {
            // nothing but empty boxes; every node becomes a sentinel anyway
            tree_bounds = Aabb::from_point(Vec3::ZERO);
        }

        // start off with an identity permutation and shuffle it into spatial order
        let mut permute: Vec<u32> = (0..self.num_items).collect();
        sort_binary(&self.boxes, &mut permute);

        let bottom_level: Vec<UnquantizedNode> = permute
            .iter()
            .map(|&i| UnquantizedNode {
                bounds: self.boxes[i as usize],
                ptr: Some(self.payloads[i as usize]),
            })
            .collect();
        let levels = build_levels(bottom_level);

        let quantizer = Quantizer::from_tree_bounds(&tree_bounds);
        let (pages, bottom_level_first_node_index) =
            quantize_levels(&levels, &quantizer, self.options.fix_quantized_boxes);

        let total_pages = pages.len() as u32;
        let metadata = RTreeMetadata {
            quantizer,
            page_size: PAGE_SIZE as u32,
            num_root_pages: (levels[levels.len() - 1].len() / PAGE_SIZE) as u32,
            num_levels: levels.len() as u32,
            total_nodes: total_pages * PAGE_SIZE as u32,
            total_pages,
            bottom_level_first_node_index,
        };
        debug!(
            num_items = self.num_items,
            num_levels = metadata.num_levels,
            total_pages,
            "built rtree"
        );

        Ok(OwnedRTree { pages, metadata })
    }
}

impl OwnedRTree {
    /// Build a tree from parallel slices of boxes and payloads.
    pub fn from_bounds(boxes: &[Aabb], payloads: &[u32]) -> Result<Self> {
        Self::from_bounds_with_options(boxes, payloads, BuildOptions::default())
    }

    /// Build a tree from parallel slices of boxes and payloads with non-default options.
    pub fn from_bounds_with_options(
        boxes: &[Aabb],
        payloads: &[u32],
        options: BuildOptions,
    ) -> Result<Self> {
        if boxes.len() != payloads.len() {
            return Err(RTreeError::LengthMismatch {
                expected: boxes.len(),
                actual: payloads.len(),
            });
        }
        let mut builder = RTreeBuilder::with_options(boxes.len() as u32, options);
        for (b, p) in boxes.iter().zip(payloads) {
            builder.add_with_payload(*b, *p);
        }
        builder.finish()
    }

    /// Build a tree over the bounds of indexed triangles. Payloads are triangle indices.
    pub fn from_triangles(vertices: &[Vec3], triangles: &[[u32; 3]]) -> Result<Self> {
        let mut builder = RTreeBuilder::new(triangles.len() as u32);
        for (i, tri) in triangles.iter().enumerate() {
            let v = |k: usize| -> Result<Vec3> {
                vertices
                    .get(tri[k] as usize)
                    .copied()
                    .ok_or(RTreeError::InvalidVertexIndex {
                        triangle: i,
                        index: tri[k],
                        num_vertices: vertices.len(),
                    })
            };
            builder.add_with_payload(Aabb::from_triangle(v(0)?, v(1)?, v(2)?), i as u32);
        }
        builder.finish()
    }
}

/// Pad `level` with empty slots up to a multiple of the page size.
fn pad_level(level: &mut Vec<UnquantizedNode>) {
    while level.len() % PAGE_SIZE != 0 {
        level.push(UnquantizedNode::EMPTY);
    }
}

/// Build parent levels bottom-up until the top level fits in at most two pages.
///
/// Returns the levels bottom first. Parent pointers are offsets into the child level.
fn build_levels(mut bottom_level: Vec<UnquantizedNode>) -> Vec<Vec<UnquantizedNode>> {
    pad_level(&mut bottom_level);
    let mut levels = vec![bottom_level];

    loop {
        let current = &levels[levels.len() - 1];
        if current.len() <= 2 * PAGE_SIZE {
            break;
        }
        let mut parent_level: Vec<UnquantizedNode> = current
            .chunks(PAGE_SIZE)
            .enumerate()
            .map(|(page, children)| {
                let mut bounds = Aabb::EMPTY;
                for child in children {
                    bounds.include(&child.bounds);
                }
                UnquantizedNode {
                    bounds,
                    ptr: Some((page * PAGE_SIZE) as u32),
                }
            })
            .collect();
        pad_level(&mut parent_level);
        trace!(
            level = levels.len(),
            num_nodes = parent_level.len(),
            "built rtree level"
        );
        levels.push(parent_level);
    }
    levels
}

/// Quantize all levels into pages, root level first.
///
/// Returns the pages and the flat index of the first bottom-level node.
fn quantize_levels(
    levels: &[Vec<UnquantizedNode>],
    quantizer: &Quantizer,
    conservative: bool,
) -> (Vec<RTreePage>, u32) {
    let total_nodes: usize = levels.iter().map(|l| l.len()).sum();
    let mut nodes: Vec<QuantizedNode> = Vec::with_capacity(total_nodes);
    let mut first_empty_index: Option<u32> = None;
    let mut sum_level_counts = 0;
    let mut bottom_level_first_node_index = 0;

    for (l, level) in levels.iter().enumerate().rev() {
        if l == 0 {
            bottom_level_first_node_index = sum_level_counts as u32;
        }
        // children of this level start right after it
        sum_level_counts += level.len();

        for node in level {
            let q = match node.ptr {
                None => {
                    let empty_index = *first_empty_index.get_or_insert(nodes.len() as u32);
                    QuantizedNode::empty(empty_index)
                }
                Some(ptr) => {
                    let (min, max) = quantizer.quantize_node(&node.bounds, conservative);
                    let ptr = if l == 0 {
                        ptr
                    } else {
                        let child = (sum_level_counts as u32) + ptr;
                        debug_assert_eq!(child as usize % PAGE_SIZE, 0);
                        child
                    };
                    QuantizedNode { min, max, ptr }
                }
            };
            nodes.push(q);
        }
    }

    debug_assert_eq!(nodes.len() % PAGE_SIZE, 0);
    let mut pages = Vec::with_capacity(nodes.len() / PAGE_SIZE);
    for chunk in nodes.chunks_exact(PAGE_SIZE) {
        let chunk: [QuantizedNode; PAGE_SIZE] = std::array::from_fn(|k| chunk[k]);
        pages.push(RTreePage::from_nodes(&chunk));
    }
    (pages, bottom_level_first_node_index)
}
