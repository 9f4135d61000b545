#[cfg(feature = "rayon")]
use rayon::prelude::*;

use crate::bounds::{Aabb, Obb, Ray};
use crate::rtree::constants::PAGE_SIZE;
use crate::rtree::index::RTreeMetadata;
use crate::rtree::page::{QuantizedNode, RTreePage};
use crate::rtree::traversal::{traverse, traverse_ray, AabbFilter, ObbFilter, QueryCallback};

/// Size of the on-stack result buffer used by the collecting searches.
const SEARCH_BUFFER_LEN: usize = 64;

/// A trait for searching and accessing data out of an RTree.
///
/// All queries are conservative: they never miss a box that overlaps the query, but may report a
/// few that only overlap after quantization.
pub trait RTreeIndex: Sized {
    /// All pages of the tree, root level first.
    ///
    /// Empty after the tree has been released.
    fn pages(&self) -> &[RTreePage];

    /// Access the metadata describing this RTree.
    fn metadata(&self) -> &RTreeMetadata;

    /// Whether the pages are owned by someone else, e.g. a blob the tree was imported from.
    fn is_user_allocated(&self) -> bool;

    /// The total number of node slots, padding included.
    fn num_nodes(&self) -> usize {
        self.metadata().total_nodes() as usize
    }

    fn num_pages(&self) -> usize {
        self.metadata().total_pages() as usize
    }

    /// The number of levels (height) of the tree.
    fn num_levels(&self) -> usize {
        self.metadata().num_levels() as usize
    }

    /// Read the node at flat index `index`, if the tree has one there.
    fn node(&self, index: usize) -> Option<QuantizedNode> {
        let page = self.pages().get(index / PAGE_SIZE)?;
        Some(page.node(index % PAGE_SIZE))
    }

    /// Conservative world-space bounds of the node at flat index `index`. Empty slots yield an
    /// empty box.
    fn node_bounds(&self, index: usize) -> Option<Aabb> {
        let node = self.node(index)?;
        Some(self.metadata().quantizer().dequantize(node.min, node.max))
    }

    /// Inflated bounds of everything in the tree.
    fn root_bounds(&self) -> Aabb {
        Aabb::new(self.metadata().bounds_min(), self.metadata().bounds_max())
    }

    /// Stream the payloads of all boxes overlapping `aabb` through `results` to `callback`.
    ///
    /// `callback` is called whenever `results` is close to full and once at the end; returning
    /// `false` from it stops the query. Touching boxes overlap. An empty query box, or one
    /// entirely outside [`RTreeIndex::root_bounds`], matches nothing.
    ///
    /// # Panics
    ///
    /// If `results` holds fewer than eight entries.
    fn query_aabb<C: QueryCallback + ?Sized>(
        &self,
        aabb: &Aabb,
        results: &mut [u32],
        callback: &mut C,
    ) {
        // quantized queries are clamped to the tree range, so a query beyond it on any axis
        // would collapse onto the boxes along that edge
        if aabb.is_empty() || !aabb.intersects(&self.root_bounds()) {
            return;
        }
        let filter = AabbFilter::new(self.metadata().quantizer(), aabb);
        traverse(self, &filter, results, callback);
    }

    /// Stream the payloads of all boxes overlapping an oriented box.
    ///
    /// See [`RTreeIndex::query_aabb`] for the callback contract.
    fn query_obb<C: QueryCallback + ?Sized>(
        &self,
        obb: &Obb,
        results: &mut [u32],
        callback: &mut C,
    ) {
        let filter = ObbFilter::new(self.metadata().quantizer(), obb);
        traverse(self, &filter, results, callback);
    }

    /// Stream the payloads of all boxes hit by a ray or segment, optionally swept.
    ///
    /// Results are not ordered by distance along the ray. See [`RTreeIndex::query_aabb`] for the
    /// callback contract.
    fn query_ray<C: QueryCallback + ?Sized>(
        &self,
        ray: &Ray,
        results: &mut [u32],
        callback: &mut C,
    ) {
        traverse_ray(self, ray, results, callback);
    }

    /// Collect the payloads of all boxes overlapping `aabb`.
    fn search_aabb(&self, aabb: &Aabb) -> Vec<u32> {
        let mut out = vec![];
        let mut buffer = [0u32; SEARCH_BUFFER_LEN];
        self.query_aabb(aabb, &mut buffer, &mut |r: &[u32]| {
            out.extend_from_slice(r);
            true
        });
        out
    }

    /// Collect the payloads of all boxes overlapping an oriented box.
    fn search_obb(&self, obb: &Obb) -> Vec<u32> {
        let mut out = vec![];
        let mut buffer = [0u32; SEARCH_BUFFER_LEN];
        self.query_obb(obb, &mut buffer, &mut |r: &[u32]| {
            out.extend_from_slice(r);
            true
        });
        out
    }

    /// Collect the payloads of all boxes hit by a ray.
    fn search_ray(&self, ray: &Ray) -> Vec<u32> {
        let mut out = vec![];
        let mut buffer = [0u32; SEARCH_BUFFER_LEN];
        self.query_ray(ray, &mut buffer, &mut |r: &[u32]| {
            out.extend_from_slice(r);
            true
        });
        out
    }

    /// Returns any one payload overlapping `aabb`, stopping at the first bottom page with a hit.
    fn intersects_any_aabb(&self, aabb: &Aabb) -> Option<u32> {
        let mut hit = None;
        let mut buffer = [0u32; PAGE_SIZE];
        self.query_aabb(aabb, &mut buffer, &mut |r: &[u32]| {
            hit = r.first().copied();
            hit.is_none()
        });
        hit
    }

    /// Run many box searches in parallel.
    ///
    /// Queries only read the tree, so a single tree can serve all worker threads.
    #[cfg(feature = "rayon")]
    fn par_search_aabb(&self, queries: &[Aabb]) -> Vec<Vec<u32>>
    where
        Self: Sync,
    {
        queries.par_iter().map(|q| self.search_aabb(q)).collect()
    }
}

#[cfg(test)]
mod test {
    use glam::Vec3;

    use super::*;
    use crate::rtree::OwnedRTree;
    use crate::test::{brute_force_aabb, random_boxes};

    #[test]
    fn empty_query_matches_nothing() {
        let (boxes, payloads) = random_boxes(100, 3);
        let tree = OwnedRTree::from_bounds(&boxes, &payloads).unwrap();
        let mut calls = 0;
        let mut buffer = [0u32; 16];
        tree.query_aabb(&Aabb::EMPTY, &mut buffer, &mut |_: &[u32]| {
            calls += 1;
            true
        });
        assert_eq!(calls, 0);
    }

    #[test]
    fn queries_beyond_the_tree_match_nothing() {
        let boxes = [
            Aabb::new(Vec3::ZERO, Vec3::ONE),
            Aabb::new(Vec3::splat(999.), Vec3::splat(1000.)),
        ];
        let tree = OwnedRTree::from_bounds(&boxes, &[10, 20]).unwrap();

        let far = Aabb::new(Vec3::splat(1e6), Vec3::splat(1e6 + 1.));
        let neg = Aabb::new(Vec3::splat(-1e6 - 1.), Vec3::splat(-1e6));
        assert!(tree.search_aabb(&far).is_empty());
        assert!(tree.search_aabb(&neg).is_empty());
        assert_eq!(tree.intersects_any_aabb(&far), None);

        // outside on a single axis only
        let beside = Aabb::new(Vec3::new(2000., 999.5, 999.5), Vec3::new(3000., 1000., 1000.));
        assert!(tree.search_aabb(&beside).is_empty());
        let below = Aabb::new(Vec3::new(0., -50., 0.), Vec3::new(1., -10., 1.));
        assert!(tree.search_aabb(&below).is_empty());

        // reaching past the edge still finds the boxes inside
        let across = Aabb::new(Vec3::splat(999.5), Vec3::splat(1e6));
        assert_eq!(tree.search_aabb(&across), vec![20]);
        let from_below = Aabb::new(Vec3::splat(-1e6), Vec3::splat(0.5));
        assert_eq!(tree.search_aabb(&from_below), vec![10]);
    }

    #[test]
    fn released_tree_matches_nothing() {
        let (boxes, payloads) = random_boxes(100, 3);
        let mut tree = OwnedRTree::from_bounds(&boxes, &payloads).unwrap();
        tree.release();
        assert!(tree.pages().is_empty());
        assert!(tree.search_aabb(&tree.root_bounds()).is_empty());
        assert!(tree
            .search_ray(&Ray::new(Vec3::splat(-1.), Vec3::ONE))
            .is_empty());
        assert_eq!(tree.node(0), None);
    }

    #[test]
    fn callback_blocks_fill_the_buffer() {
        let (boxes, payloads) = random_boxes(500, 5);
        let tree = OwnedRTree::from_bounds(&boxes, &payloads).unwrap();
        let query = Aabb::new(Vec3::splat(-1.), Vec3::splat(200.));

        let mut buffer = [0u32; 20];
        let mut blocks = vec![];
        tree.query_aabb(&query, &mut buffer, &mut |r: &[u32]| {
            blocks.push(r.len());
            true
        });
        let (last, full) = blocks.split_last().unwrap();
        assert!(*last > 0);
        // a flush happens once fewer than a page of free slots remain
        for len in full {
            assert!(*len > 20 - PAGE_SIZE && *len <= 20);
        }
        assert_eq!(blocks.iter().sum::<usize>(), 500);
    }

    #[test]
    fn exact_page_sized_buffer() {
        let (boxes, payloads) = random_boxes(300, 9);
        let tree = OwnedRTree::from_bounds(&boxes, &payloads).unwrap();
        let query = Aabb::new(Vec3::splat(20.), Vec3::splat(60.));

        let mut buffer = [0u32; PAGE_SIZE];
        let mut found = vec![];
        tree.query_aabb(&query, &mut buffer, &mut |r: &[u32]| {
            found.extend_from_slice(r);
            true
        });
        found.sort();
        let mut expected = tree.search_aabb(&query);
        expected.sort();
        assert_eq!(found, expected);
        for p in brute_force_aabb(&boxes, &payloads, &query) {
            assert!(found.contains(&p));
        }
    }

    #[test]
    fn first_hit() {
        let boxes = [
            Aabb::new(Vec3::ZERO, Vec3::ONE),
            Aabb::new(Vec3::splat(5.), Vec3::splat(6.)),
        ];
        let tree = OwnedRTree::from_bounds(&boxes, &[10, 20]).unwrap();
        assert_eq!(
            tree.intersects_any_aabb(&Aabb::from_point(Vec3::splat(5.5))),
            Some(20)
        );
        assert_eq!(
            tree.intersects_any_aabb(&Aabb::new(Vec3::splat(2.), Vec3::splat(3.))),
            None
        );
    }

    #[test]
    fn node_accessors() {
        let (boxes, payloads) = random_boxes(50, 2);
        let tree = OwnedRTree::from_bounds(&boxes, &payloads).unwrap();
        assert_eq!(tree.num_nodes(), tree.num_pages() * PAGE_SIZE);
        assert!(tree.node(tree.num_nodes()).is_none());

        let root = tree.root_bounds();
        for b in &boxes {
            assert!(root.contains(b));
        }
        for i in 0..tree.metadata().num_root_pages() as usize * PAGE_SIZE {
            let bounds = tree.node_bounds(i).unwrap();
            if !bounds.is_empty() {
                assert!(bounds.intersects(&root));
            }
        }
    }

    #[cfg(feature = "rayon")]
    #[test]
    fn parallel_search_matches_serial() {
        let (boxes, payloads) = random_boxes(1000, 4);
        let tree = OwnedRTree::from_bounds(&boxes, &payloads).unwrap();
        let queries: Vec<Aabb> = boxes.iter().take(64).copied().collect();
        let parallel = tree.par_search_aabb(&queries);
        for (q, hits) in queries.iter().zip(parallel) {
            assert_eq!(hits, tree.search_aabb(q));
        }
    }
}
