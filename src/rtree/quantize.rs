//! Mapping between world-space boxes and the 16-bit local coordinates stored in pages.
//!
//! Offline, the tree bounds are inflated so that every real box quantizes into `[1, 65534]`.
//! That leaves `0` and `65535` free: an empty slot stores the inverted range `[65535, 0]`, and a
//! query clamped to `[1, 65534]` can never overlap it, with no extra test.

use float_next_after::NextAfter;
use glam::Vec3;

use crate::bounds::Aabb;
use crate::rtree::constants::{
    EMPTY_MAX, EMPTY_MIN, MINIMUM_BOUNDS_EPSILON, PAGE_SIZE, QUANTIZED_MAX, QUERY_CLAMP_HI,
    QUERY_CLAMP_LO,
};
use crate::rtree::page::RTreePage;

/// Quantization coefficients of a tree.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quantizer {
    /// Inflated tree minimum; quantized coordinate 0 maps here.
    pub bounds_min: Vec3,
    /// Inflated tree maximum; quantized coordinate 65535 maps here.
    pub bounds_max: Vec3,
    /// `1 / (bounds_max - bounds_min)` per axis.
    pub inv_diagonal: Vec3,
    /// Size of one quantization step per axis, `(bounds_max - bounds_min) / 65535`.
    pub diagonal_scaler: Vec3,
}

impl Quantizer {
    /// Inflate the bounds of all input boxes and derive the scale factors.
    ///
    /// The bounds are first grown by a small absolute epsilon so that a flat input still has a
    /// non-zero extent on every axis, then by one and a half quantization steps on each side.
    pub fn from_tree_bounds(tree_bounds: &Aabb) -> Self {
        let eps = Vec3::splat(MINIMUM_BOUNDS_EPSILON);
        let mut min = tree_bounds.min - eps;
        let mut max = tree_bounds.max + eps;

        let step = (max - min) / 65536.0;
        min -= step * 1.5;
        max += step * 1.5;

        let diagonal = max - min;
        Self {
            bounds_min: min,
            bounds_max: max,
            inv_diagonal: diagonal.recip(),
            diagonal_scaler: diagonal / QUANTIZED_MAX,
        }
    }

    /// Rebuild a quantizer from serialized coefficients.
    pub fn from_parts(
        bounds_min: Vec3,
        bounds_max: Vec3,
        inv_diagonal: Vec3,
        diagonal_scaler: Vec3,
    ) -> Self {
        Self {
            bounds_min,
            bounds_max,
            inv_diagonal,
            diagonal_scaler,
        }
    }

    #[inline]
    fn scale(&self, v: Vec3) -> Vec3 {
        (v - self.bounds_min) * self.inv_diagonal * QUANTIZED_MAX
    }

    /// Quantize a node box.
    ///
    /// With `conservative` set, minimums round down and maximums round up so the quantized box
    /// always encloses the input. Otherwise both round to nearest. Empty boxes get the sentinel
    /// range.
    pub fn quantize_node(&self, aabb: &Aabb, conservative: bool) -> ([u16; 3], [u16; 3]) {
        if aabb.is_empty() {
            return ([EMPTY_MIN; 3], [EMPTY_MAX; 3]);
        }
        let scaled_min = self.scale(aabb.min);
        let scaled_max = self.scale(aabb.max);
        let (qmin, qmax) = if conservative {
            (scaled_min.floor(), scaled_max.ceil())
        } else {
            (scaled_min.round(), scaled_max.round())
        };
        (to_u16(qmin, 0.0, QUANTIZED_MAX), to_u16(qmax, 0.0, QUANTIZED_MAX))
    }

    /// Quantize a query box, widened by one step on each side and clamped to `[1, 65534]`.
    pub fn quantize_query(&self, aabb: &Aabb) -> ([u16; 3], [u16; 3]) {
        let qmin = self.scale(aabb.min).floor() - Vec3::ONE;
        let qmax = self.scale(aabb.max).ceil() + Vec3::ONE;
        (
            to_u16(qmin, QUERY_CLAMP_LO, QUERY_CLAMP_HI),
            to_u16(qmax, QUERY_CLAMP_LO, QUERY_CLAMP_HI),
        )
    }

    /// Map quantized bounds back to a world-space box widened by one quantization step on each
    /// side. The sentinel range dequantizes to a box with `min > max`.
    #[inline]
    pub fn dequantize(&self, min: [u16; 3], max: [u16; 3]) -> Aabb {
        let qmin = Vec3::new(min[0] as f32, min[1] as f32, min[2] as f32) - Vec3::ONE;
        let qmax = Vec3::new(max[0] as f32, max[1] as f32, max[2] as f32) + Vec3::ONE;
        let lo = qmin * self.diagonal_scaler + self.bounds_min;
        let hi = qmax * self.diagonal_scaler + self.bounds_min;
        Aabb::new(
            Vec3::new(
                lo.x.next_after(f32::NEG_INFINITY),
                lo.y.next_after(f32::NEG_INFINITY),
                lo.z.next_after(f32::NEG_INFINITY),
            ),
            Vec3::new(
                hi.x.next_after(f32::INFINITY),
                hi.y.next_after(f32::INFINITY),
                hi.z.next_after(f32::INFINITY),
            ),
        )
    }

    /// Dequantize all eight lanes of a page.
    pub fn dequantize_page(&self, page: &RTreePage) -> [Aabb; PAGE_SIZE] {
        std::array::from_fn(|k| {
            self.dequantize(
                [page.minx[k], page.miny[k], page.minz[k]],
                [page.maxx[k], page.maxy[k], page.maxz[k]],
            )
        })
    }
}

#[inline]
fn to_u16(v: Vec3, lo: f32, hi: f32) -> [u16; 3] {
    let v = v.clamp(Vec3::splat(lo), Vec3::splat(hi));
    [v.x as u16, v.y as u16, v.z as u16]
}
