//! A static bounding volume hierarchy for broad-phase collision detection.
//!
//! Boxes are packed into a quantized, page-based RTree once, then queried by axis-aligned boxes,
//! oriented boxes and (optionally swept) rays. All queries are conservative: an overlapping box
//! is never missed, while a box that only overlaps after quantization may be reported.
//!
//! ```
//! use glam::Vec3;
//! use quantized_rtree::bounds::Aabb;
//! use quantized_rtree::rtree::{OwnedRTree, RTreeIndex};
//!
//! let boxes = [
//!     Aabb::new(Vec3::ZERO, Vec3::ONE),
//!     Aabb::new(Vec3::splat(5.), Vec3::splat(6.)),
//! ];
//! let tree = OwnedRTree::from_bounds(&boxes, &[10, 20]).unwrap();
//! assert_eq!(tree.search_aabb(&Aabb::from_point(Vec3::splat(0.5))), vec![10]);
//! ```

pub mod bounds;
mod error;
pub mod rtree;

pub use error::{RTreeError, Result};

#[cfg(test)]
pub(crate) mod test;
