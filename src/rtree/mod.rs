//! A static, quantized, page-based 3D RTree for broad-phase collision queries.
//!
//! Nodes are stored eight to a page in transposed form with 16-bit coordinates relative to the
//! tree bounds. Queries walk the pages iteratively and test all eight children of a page at once.
//!
//! Creation:
//!
//! - Use [`RTreeBuilder`] to add boxes and build an [`OwnedRTree`].
//! - Use [`OwnedRTree::load`] to read one written with [`OwnedRTree::save`].
//! - Use [`RTreeRef::import_extra_data`] to use pages embedded in a larger blob in place.
//!
//! Queries are available through the [`RTreeIndex`] trait, implemented by both tree types.

mod builder;
pub mod constants;
mod index;
mod io;
mod page;
mod quantize;
mod sort;
mod r#trait;
mod traversal;

pub use builder::{BuildOptions, RTreeBuilder};
pub use index::{OwnedRTree, RTreeMetadata, RTreeRef};
pub use io::{Endianness, ImportedExtraData};
pub use page::{QuantizedNode, RTreePage, PAGE_BYTE_LENGTH};
pub use quantize::Quantizer;
pub use r#trait::RTreeIndex;
pub use traversal::{AabbFilter, ObbFilter, PageFilter, QueryCallback, RayFilter};
