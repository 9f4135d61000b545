//! Spatial ordering of the leaves before they are packed into pages.

use crate::bounds::Aabb;

/// Reorder `permute` (indices into `boxes`) so that spatially close boxes end up next to each
/// other.
///
/// Each cluster is partitioned along the longest axis of its bounds by box center into a
/// power-of-two sized first half and the remainder, then both halves are ordered recursively.
/// Since the first half always has a power-of-two length, consecutive runs of eight leaves are
/// themselves spatially coherent clusters.
pub(crate) fn sort_binary(boxes: &[Aabb], permute: &mut [u32]) {
    let cluster_size = permute.len();
    if cluster_size <= 1 {
        return;
    }

    let mut cluster_bounds = Aabb::EMPTY;
    for &i in permute.iter() {
        cluster_bounds.include(&boxes[i as usize]);
    }

    let half_size = split_point(cluster_size);

    // an all-empty cluster has no meaningful axis; any order will do
    if !cluster_bounds.is_empty() {
        let axis = cluster_bounds.longest_axis();
        permute.select_nth_unstable_by(half_size, |&a, &b| {
            let ca = boxes[a as usize].center()[axis];
            let cb = boxes[b as usize].center()[axis];
            ca.total_cmp(&cb)
        });
    }

    let (first, second) = permute.split_at_mut(half_size);
    #[cfg(feature = "rayon")]
    if cluster_size >= PARALLEL_THRESHOLD {
        rayon::join(|| sort_binary(boxes, first), || sort_binary(boxes, second));
        return;
    }
    sort_binary(boxes, first);
    sort_binary(boxes, second);
}

/// Clusters at least this large sort their halves on separate threads.
#[cfg(feature = "rayon")]
const PARALLEL_THRESHOLD: usize = 4096;

/// Largest power of two strictly smaller than `cluster_size` (which must be at least 2).
#[inline]
fn split_point(cluster_size: usize) -> usize {
    debug_assert!(cluster_size >= 2);
    let mut half_size = 1;
    while half_size * 2 < cluster_size {
        half_size *= 2;
    }
    half_size
}
