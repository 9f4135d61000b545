//! Shared fixtures for tests.

mod integration;

use glam::Vec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::bounds::Aabb;

/// `n` random boxes inside `[0, 100]^3`, none larger than 5 on any axis, with payloads distinct
/// from their insertion index.
pub(crate) fn random_boxes(n: usize, seed: u64) -> (Vec<Aabb>, Vec<u32>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let boxes = (0..n)
        .map(|_| {
            let min = random_point(&mut rng, 95.);
            let size = Vec3::new(rng.gen(), rng.gen(), rng.gen()) * 5.;
            Aabb::new(min, min + size)
        })
        .collect();
    let payloads = (0..n as u32).map(|i| i * 3 + 7).collect();
    (boxes, payloads)
}

pub(crate) fn random_point(rng: &mut StdRng, scale: f32) -> Vec3 {
    Vec3::new(rng.gen(), rng.gen(), rng.gen()) * scale
}

/// Exact overlap test against every box.
pub(crate) fn brute_force_aabb(boxes: &[Aabb], payloads: &[u32], query: &Aabb) -> Vec<u32> {
    boxes
        .iter()
        .zip(payloads)
        .filter(|(b, _)| !b.is_empty() && b.intersects(query))
        .map(|(_, p)| *p)
        .collect()
}
