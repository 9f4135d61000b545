//! Iterative page traversal shared by every query shape.
//!
//! A query is a [`PageFilter`] producing an accept mask for the eight children of a page. The
//! traversal itself only deals with page indices, an explicit stack and the caller's result
//! buffer, so any filter gets the same flushing and early-out behaviour.

use glam::Vec3;

use crate::bounds::{Aabb, Obb, Ray};
use crate::rtree::constants::{MAX_STACK, PAGE_SIZE};
use crate::rtree::page::RTreePage;
use crate::rtree::quantize::Quantizer;
use crate::rtree::r#trait::RTreeIndex;

/// Receives query results in blocks.
pub trait QueryCallback {
    /// Called with the payloads collected so far. Return `false` to stop the traversal
    /// immediately.
    fn process_results(&mut self, results: &[u32]) -> bool;
}

impl<F: FnMut(&[u32]) -> bool> QueryCallback for F {
    #[inline]
    fn process_results(&mut self, results: &[u32]) -> bool {
        self(results)
    }
}

/// The per-page overlap predicate of a query shape.
pub trait PageFilter {
    /// Test a single child of `page`.
    fn accepts(&self, page: &RTreePage, lane: usize) -> bool;

    /// Test all children of `page` at once, `1` for accepted lanes and `0` otherwise.
    ///
    /// Must agree with [`PageFilter::accepts`] on every lane.
    #[inline]
    fn accept_mask(&self, page: &RTreePage) -> [u32; PAGE_SIZE] {
        std::array::from_fn(|k| self.accepts(page, k) as u32)
    }
}

/// Exclusive prefix sum of an accept mask: the compacted output slot of every lane, and the
/// number of accepted lanes.
#[inline]
pub(crate) fn prefix_sum(mask: &[u32; PAGE_SIZE]) -> ([u32; PAGE_SIZE], u32) {
    let mut offsets = [0u32; PAGE_SIZE];
    let mut sum = 0;
    for k in 0..PAGE_SIZE {
        offsets[k] = sum;
        sum += mask[k];
    }
    (offsets, sum)
}

/// Write the pointers of accepted lanes to the front of `out` without branching on the mask.
///
/// Rejected lanes are written too, but always land on a slot that a later accepted lane (or
/// the next write position) overwrites. `out` must hold at least one page worth of entries.
#[inline]
pub(crate) fn compact(ptrs: &[u32; PAGE_SIZE], offsets: &[u32; PAGE_SIZE], out: &mut [u32]) {
    let out = &mut out[..PAGE_SIZE];
    for k in 0..PAGE_SIZE {
        out[offsets[k] as usize] = ptrs[k];
    }
}

/// Walk `tree` with `filter`, streaming bottom-level payloads through `results` to `callback`.
///
/// The callback fires as soon as fewer than one page of free slots remain in `results`, and
/// once more at the end if anything is left over.
///
/// # Panics
///
/// If `results` holds fewer than [`PAGE_SIZE`] entries.
pub(crate) fn traverse<T, F, C>(tree: &T, filter: &F, results: &mut [u32], callback: &mut C)
where
    T: RTreeIndex,
    F: PageFilter + ?Sized,
    C: QueryCallback + ?Sized,
{
    let max_results = results.len();
    assert!(
        max_results >= PAGE_SIZE,
        "result buffer must hold at least {} entries, got {}",
        PAGE_SIZE,
        max_results
    );

    let metadata = tree.metadata();
    let pages = tree.pages();
    if pages.is_empty() || pages.len() != metadata.total_pages as usize {
        return;
    }

    // one extra page of headroom for the unconditional writes in `compact`
    let mut stack = [0u32; MAX_STACK + PAGE_SIZE];
    let mut stack_len = 0;
    for j in (0..metadata.num_root_pages).rev() {
        stack[stack_len] = j * PAGE_SIZE as u32;
        stack_len += 1;
    }

    // a single surviving child is visited next without a round trip through the stack
    let mut next: Option<u32> = None;
    let mut num_results = 0;

    loop {
        let top = match next.take() {
            Some(top) => top,
            None if stack_len > 0 => {
                stack_len -= 1;
                stack[stack_len]
            }
            None => break,
        };

        let page = &pages[top as usize / PAGE_SIZE];
        let mask = filter.accept_mask(page);
        let (offsets, accepted) = prefix_sum(&mask);

        if metadata.is_bottom_page(top) {
            compact(&page.ptrs, &offsets, &mut results[num_results..]);
            num_results += accepted as usize;
            if num_results + PAGE_SIZE > max_results {
                if !callback.process_results(&results[..num_results]) {
                    return;
                }
                num_results = 0;
            }
        } else if accepted == 1 {
            let lane = mask.iter().position(|&m| m != 0).unwrap_or(0);
            next = Some(page.ptrs[lane]);
        } else {
            debug_assert!(stack_len + accepted as usize <= MAX_STACK);
            compact(&page.ptrs, &offsets, &mut stack[stack_len..]);
            stack_len += accepted as usize;
        }
    }

    if num_results > 0 {
        callback.process_results(&results[..num_results]);
    }
}

/// Overlap test of an axis-aligned box in quantized space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AabbFilter {
    qmin: [u16; 3],
    qmax: [u16; 3],
}

impl AabbFilter {
    pub fn new(quantizer: &Quantizer, aabb: &Aabb) -> Self {
        let (qmin, qmax) = quantizer.quantize_query(aabb);
        Self { qmin, qmax }
    }
}

impl PageFilter for AabbFilter {
    #[inline]
    fn accepts(&self, page: &RTreePage, k: usize) -> bool {
        if self.qmin[0] > page.maxx[k] {
            return false;
        }
        if self.qmin[1] > page.maxy[k] {
            return false;
        }
        if self.qmin[2] > page.maxz[k] {
            return false;
        }
        if page.minx[k] > self.qmax[0] {
            return false;
        }
        if page.miny[k] > self.qmax[1] {
            return false;
        }
        if page.minz[k] > self.qmax[2] {
            return false;
        }
        true
    }

    #[inline]
    fn accept_mask(&self, page: &RTreePage) -> [u32; PAGE_SIZE] {
        // lane-wise compares over the transposed arrays, no per-child branches
        let mut reject = [false; PAGE_SIZE];
        for k in 0..PAGE_SIZE {
            reject[k] = (self.qmin[0] > page.maxx[k])
                | (self.qmin[1] > page.maxy[k])
                | (self.qmin[2] > page.maxz[k])
                | (page.minx[k] > self.qmax[0])
                | (page.miny[k] > self.qmax[1])
                | (page.minz[k] > self.qmax[2]);
        }
        std::array::from_fn(|k| (!reject[k]) as u32)
    }
}

/// Conservative oriented box test against dequantized children.
///
/// Instead of all fifteen separating axis candidates, only two witness axes are tried. Both are
/// derived from closest points: `p1` is the point of the child box closest to the OBB center,
/// `q1` the OBB point closest to `p1`, and `p2` the child point closest to `q1`. The axes are
/// `q1 - p1` and `q1 - p2`. This never rejects an overlapping child but can accept a few that
/// an exact test would reject.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObbFilter {
    quantizer: Quantizer,
    center: Vec3,
    extents: Vec3,
    axes: [Vec3; 3],
    /// Axes scaled by the matching extent.
    half_axes: [Vec3; 3],
}

const OBB_EPSILON: f32 = 1e-6;

impl ObbFilter {
    pub fn new(quantizer: &Quantizer, obb: &Obb) -> Self {
        let axes = [obb.rot.x_axis, obb.rot.y_axis, obb.rot.z_axis];
        Self {
            quantizer: *quantizer,
            center: obb.center,
            extents: obb.extents,
            axes,
            half_axes: [
                axes[0] * obb.extents.x,
                axes[1] * obb.extents.y,
                axes[2] * obb.extents.z,
            ],
        }
    }

    /// Test one dequantized child box.
    pub fn overlaps(&self, aabb: &Aabb) -> bool {
        if aabb.is_empty() {
            return false;
        }
        let (min, max) = (aabb.min, aabb.max);

        // child point closest to the OBB center
        let p1_abb = self.center.min(max).max(min);

        // OBB point closest to that, computed in OBB space and transformed back
        let rel = p1_abb - self.center;
        let prj = Vec3::new(
            rel.dot(self.axes[0]),
            rel.dot(self.axes[1]),
            rel.dot(self.axes[2]),
        );
        let p_obb = prj.min(self.extents).max(-self.extents);
        let p1_obb = self.center
            + self.axes[0] * p_obb.x
            + self.axes[1] * p_obb.y
            + self.axes[2] * p_obb.z;

        // child point closest to the OBB point
        let p2_abb = p1_obb.min(max).max(min);

        let abb_center = (max + min) * 0.5;
        let abb_extents = max - abb_center;

        let separated = |d: Vec3| -> bool {
            let origin_diff = (d.dot(abb_center) - d.dot(self.center)).abs();
            let abb_radius = (d * abb_extents).abs().element_sum();
            let obb_radius = d.dot(self.half_axes[0]).abs()
                + d.dot(self.half_axes[1]).abs()
                + d.dot(self.half_axes[2]).abs();
            origin_diff - OBB_EPSILON > abb_radius + obb_radius && origin_diff > OBB_EPSILON
        };

        !(separated(p1_obb - p1_abb) || separated(p1_obb - p2_abb))
    }
}

impl PageFilter for ObbFilter {
    #[inline]
    fn accepts(&self, page: &RTreePage, k: usize) -> bool {
        let aabb = self.quantizer.dequantize(
            [page.minx[k], page.miny[k], page.minz[k]],
            [page.maxx[k], page.maxy[k], page.maxz[k]],
        );
        self.overlaps(&aabb)
    }

    #[inline]
    fn accept_mask(&self, page: &RTreePage) -> [u32; PAGE_SIZE] {
        let boxes = self.quantizer.dequantize_page(page);
        std::array::from_fn(|k| self.overlaps(&boxes[k]) as u32)
    }
}

/// Slab test of a ray against dequantized children.
///
/// `INFLATE` grows every child by a per-axis amount (swept sphere), `SEGMENT` limits hits to
/// `t <= 1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayFilter<const INFLATE: bool, const SEGMENT: bool> {
    quantizer: Quantizer,
    inv_dir: Vec3,
    /// `-origin / dir`, so that `t = a * inv_dir + origin_inv_dir`.
    origin_inv_dir: Vec3,
    inflation: Vec3,
}

const RAY_DIR_EPSILON: f32 = 1e-9;
const RAY_T_EPSILON: f32 = 1e-9;
const SEGMENT_T_MAX: f32 = 0.9999999;

impl<const INFLATE: bool, const SEGMENT: bool> RayFilter<INFLATE, SEGMENT> {
    pub fn new(quantizer: &Quantizer, origin: Vec3, dir: Vec3, inflation: Vec3) -> Self {
        // clamp near-zero components away from zero, keeping the sign
        let clamped = Vec3::new(
            dir.x.abs().max(RAY_DIR_EPSILON).copysign(dir.x),
            dir.y.abs().max(RAY_DIR_EPSILON).copysign(dir.y),
            dir.z.abs().max(RAY_DIR_EPSILON).copysign(dir.z),
        );
        let inv_dir = clamped.recip();
        Self {
            quantizer: *quantizer,
            inv_dir,
            origin_inv_dir: -origin * inv_dir,
            inflation,
        }
    }

    /// Test one dequantized child box.
    pub fn overlaps(&self, aabb: &Aabb) -> bool {
        if aabb.is_empty() {
            return false;
        }
        let (mut min, mut max) = (aabb.min, aabb.max);
        if INFLATE {
            min -= self.inflation;
            max += self.inflation;
        }

        let t0 = min * self.inv_dir + self.origin_inv_dir;
        let t1 = max * self.inv_dir + self.origin_inv_dir;
        let t_near = t0.min(t1).max_element();
        let t_far = t0.max(t1).min_element();

        // the box is entirely behind the origin
        if t_far < RAY_T_EPSILON {
            return false;
        }
        if SEGMENT && t_near > SEGMENT_T_MAX {
            return false;
        }
        t_near <= t_far
    }
}

impl<const INFLATE: bool, const SEGMENT: bool> PageFilter for RayFilter<INFLATE, SEGMENT> {
    #[inline]
    fn accepts(&self, page: &RTreePage, k: usize) -> bool {
        let aabb = self.quantizer.dequantize(
            [page.minx[k], page.miny[k], page.minz[k]],
            [page.maxx[k], page.maxy[k], page.maxz[k]],
        );
        self.overlaps(&aabb)
    }

    #[inline]
    fn accept_mask(&self, page: &RTreePage) -> [u32; PAGE_SIZE] {
        let boxes = self.quantizer.dequantize_page(page);
        std::array::from_fn(|k| self.overlaps(&boxes[k]) as u32)
    }
}

/// Dispatch a [`Ray`] to the matching [`RayFilter`] instantiation.
pub(crate) fn traverse_ray<T, C>(
    tree: &T,
    ray: &Ray,
    results: &mut [u32],
    callback: &mut C,
) where
    T: RTreeIndex,
    C: QueryCallback + ?Sized,
{
    let q = tree.metadata().quantizer();
    let inflation = ray.inflation.unwrap_or(Vec3::ZERO);
    match (ray.inflation.is_some(), ray.segment) {
        (false, false) => {
            let f = RayFilter::<false, false>::new(q, ray.origin, ray.dir, inflation);
            traverse(tree, &f, results, callback)
        }
        (false, true) => {
            let f = RayFilter::<false, true>::new(q, ray.origin, ray.dir, inflation);
            traverse(tree, &f, results, callback)
        }
        (true, false) => {
            let f = RayFilter::<true, false>::new(q, ray.origin, ray.dir, inflation);
            traverse(tree, &f, results, callback)
        }
        (true, true) => {
            let f = RayFilter::<true, true>::new(q, ray.origin, ray.dir, inflation);
            traverse(tree, &f, results, callback)
        }
    }
}
