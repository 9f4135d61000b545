use std::collections::{HashMap, HashSet};
use std::f32::consts::FRAC_PI_3;

use glam::{Mat3, Vec3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::bounds::{Aabb, Obb, Ray};
use crate::rtree::constants::PAGE_SIZE;
use crate::rtree::{BuildOptions, OwnedRTree, RTreeBuilder, RTreeIndex};
use crate::test::{brute_force_aabb, random_boxes, random_point};

fn sorted(mut v: Vec<u32>) -> Vec<u32> {
    v.sort();
    v
}

fn assert_superset(found: &[u32], expected: &[u32]) {
    let found: HashSet<u32> = found.iter().copied().collect();
    for p in expected {
        assert!(found.contains(p), "missing payload {}", p);
    }
}

fn assert_no_duplicates(found: &[u32]) {
    let unique: HashSet<u32> = found.iter().copied().collect();
    assert_eq!(unique.len(), found.len());
}

#[test]
fn two_boxes() {
    let boxes = [
        Aabb::new(Vec3::ZERO, Vec3::ONE),
        Aabb::new(Vec3::splat(5.), Vec3::splat(6.)),
    ];
    let tree = OwnedRTree::from_bounds(&boxes, &[10, 20]).unwrap();

    assert_eq!(tree.search_aabb(&Aabb::from_point(Vec3::splat(0.5))), vec![10]);
    assert_eq!(
        sorted(tree.search_aabb(&Aabb::new(Vec3::splat(-1.), Vec3::splat(10.)))),
        vec![10, 20]
    );
    assert!(tree
        .search_aabb(&Aabb::new(Vec3::splat(2.), Vec3::splat(3.)))
        .is_empty());

    // touching boxes overlap
    assert_eq!(
        tree.search_aabb(&Aabb::new(Vec3::splat(6.), Vec3::splat(7.))),
        vec![20]
    );
}

#[test]
fn aabb_queries_never_miss() {
    let (boxes, payloads) = random_boxes(5000, 1);
    let tree = OwnedRTree::from_bounds(&boxes, &payloads).unwrap();
    assert!(tree.num_levels() >= 3);

    let mut rng = StdRng::seed_from_u64(2);
    for _ in 0..200 {
        let min = random_point(&mut rng, 100.);
        let query = Aabb::new(min, min + random_point(&mut rng, 15.));
        let found = tree.search_aabb(&query);
        assert_no_duplicates(&found);
        assert_superset(&found, &brute_force_aabb(&boxes, &payloads, &query));
    }
}

#[test]
fn obb_queries_never_miss() {
    let (boxes, payloads) = random_boxes(3000, 5);
    let tree = OwnedRTree::from_bounds(&boxes, &payloads).unwrap();

    let mut rng = StdRng::seed_from_u64(6);
    for _ in 0..100 {
        let min = random_point(&mut rng, 100.);
        let aabb = Aabb::new(min, min + random_point(&mut rng, 15.));

        // axis aligned: exactly the boxes a box query must find
        let found = tree.search_obb(&Obb::from_aabb(&aabb));
        assert_no_duplicates(&found);
        assert_superset(&found, &brute_force_aabb(&boxes, &payloads, &aabb));

        // rotated: at least every box holding the center or a corner
        let obb = Obb::new(
            aabb.center(),
            aabb.dimensions() * 0.5,
            Mat3::from_rotation_x(rng.gen::<f32>() * FRAC_PI_3)
                * Mat3::from_rotation_z(rng.gen::<f32>() * FRAC_PI_3),
        );
        let mut witnesses = vec![obb.center];
        for i in 0..8 {
            let sign = Vec3::new(
                if i & 1 == 0 { -1. } else { 1. },
                if i & 2 == 0 { -1. } else { 1. },
                if i & 4 == 0 { -1. } else { 1. },
            );
            witnesses.push(obb.center + obb.rot * (sign * obb.extents));
        }
        let expected: Vec<u32> = boxes
            .iter()
            .zip(&payloads)
            .filter(|(b, _)| witnesses.iter().any(|w| b.contains(&Aabb::from_point(*w))))
            .map(|(_, p)| *p)
            .collect();

        let found = tree.search_obb(&obb);
        assert_no_duplicates(&found);
        assert_superset(&found, &expected);
    }
}

/// Payloads of boxes that, grown by `radius`, contain a point sampled along the ray.
fn sampled_ray_hits(boxes: &[Aabb], payloads: &[u32], ray: &Ray, t_max: f32) -> Vec<u32> {
    let grow = ray.inflation.unwrap_or(Vec3::ZERO);
    let samples: Vec<Vec3> = (0..=400)
        .map(|i| ray.origin + ray.dir * (t_max * i as f32 / 400.))
        .collect();
    boxes
        .iter()
        .zip(payloads)
        .filter(|(b, _)| {
            let grown = Aabb::new(b.min - grow, b.max + grow);
            samples.iter().any(|s| grown.contains(&Aabb::from_point(*s)))
        })
        .map(|(_, p)| *p)
        .collect()
}

#[test]
fn ray_queries_never_miss() {
    let (boxes, payloads) = random_boxes(3000, 8);
    let tree = OwnedRTree::from_bounds(&boxes, &payloads).unwrap();

    let mut rng = StdRng::seed_from_u64(9);
    for _ in 0..50 {
        let start = random_point(&mut rng, 100.);
        let end = random_point(&mut rng, 100.);

        let segment = Ray::segment(start, end);
        let found = tree.search_ray(&segment);
        assert_no_duplicates(&found);
        assert_superset(&found, &sampled_ray_hits(&boxes, &payloads, &segment, 1.));

        // the unbounded ray finds everything the segment does
        let ray = Ray::new(start, end - start);
        assert_superset(&tree.search_ray(&ray), &found);
        assert_superset(
            &tree.search_ray(&ray),
            &sampled_ray_hits(&boxes, &payloads, &ray, 3.),
        );

        let swept = Ray::segment(start, end).with_radius(2.);
        let found_swept = tree.search_ray(&swept);
        assert_superset(&found_swept, &found);
        assert_superset(
            &found_swept,
            &sampled_ray_hits(&boxes, &payloads, &swept, 1.),
        );
    }
}

#[test]
fn segment_stops_at_its_end() {
    let boxes = [
        Aabb::new(Vec3::new(2., -1., -1.), Vec3::new(3., 1., 1.)),
        Aabb::new(Vec3::new(8., -1., -1.), Vec3::new(9., 1., 1.)),
    ];
    let tree = OwnedRTree::from_bounds(&boxes, &[0, 1]).unwrap();
    let segment = Ray::segment(Vec3::ZERO, Vec3::new(5., 0., 0.));
    assert_eq!(tree.search_ray(&segment), vec![0]);
    assert_eq!(
        sorted(tree.search_ray(&Ray::new(Vec3::ZERO, Vec3::X))),
        vec![0, 1]
    );
    assert!(tree.search_ray(&Ray::new(Vec3::ZERO, -Vec3::X)).is_empty());
}

#[test]
fn every_payload_stored_once_with_enclosing_bounds() {
    let (boxes, payloads) = random_boxes(1000, 12);
    let tree = OwnedRTree::from_bounds(&boxes, &payloads).unwrap();
    let by_payload: HashMap<u32, Aabb> = payloads.iter().copied().zip(boxes.iter().copied()).collect();

    let m = tree.metadata();
    let mut seen = HashSet::new();
    for index in m.bottom_level_first_node_index() as usize..tree.num_nodes() {
        let node = tree.node(index).unwrap();
        if node.is_empty() {
            continue;
        }
        assert!(seen.insert(node.ptr), "payload {} stored twice", node.ptr);
        let bounds = tree.node_bounds(index).unwrap();
        let input = by_payload[&node.ptr];
        assert!(bounds.contains(&input), "{:?} does not contain {:?}", bounds, input);
    }
    assert_eq!(seen.len(), payloads.len());

    // internal nodes enclose their children
    for index in 0..m.bottom_level_first_node_index() as usize {
        let node = tree.node(index).unwrap();
        if node.is_empty() {
            continue;
        }
        let parent = tree.node_bounds(index).unwrap();
        for child in node.ptr as usize..node.ptr as usize + PAGE_SIZE {
            let child_bounds = tree.node_bounds(child).unwrap();
            if !child_bounds.is_empty() {
                assert!(parent.contains(&child_bounds));
            }
        }
    }
}

#[test]
fn empty_boxes_never_match() {
    let mut builder = RTreeBuilder::new(20);
    for i in 0..20 {
        if i % 4 == 0 {
            builder.add_with_payload(Aabb::EMPTY, 1000 + i);
        } else {
            let p = Vec3::splat(i as f32);
            builder.add_with_payload(Aabb::new(p, p + Vec3::ONE), i);
        }
    }
    let tree = builder.finish().unwrap();
    let everything = Aabb::new(Vec3::splat(-100.), Vec3::splat(100.));

    let found = tree.search_aabb(&everything);
    assert_eq!(found.len(), 15);
    assert!(found.iter().all(|p| *p < 1000));
    assert!(tree
        .search_obb(&Obb::from_aabb(&everything))
        .iter()
        .all(|p| *p < 1000));
    assert!(tree
        .search_ray(&Ray::new(Vec3::splat(-1.), Vec3::ONE).with_radius(50.))
        .iter()
        .all(|p| *p < 1000));
}

#[test]
fn only_empty_boxes() {
    let tree = OwnedRTree::from_bounds(&[Aabb::EMPTY; 3], &[1, 2, 3]).unwrap();
    assert!(tree
        .search_aabb(&Aabb::new(Vec3::splat(-1e3), Vec3::splat(1e3)))
        .is_empty());
}

#[test]
fn degenerate_point_boxes() {
    let p = Vec3::new(3., -2., 7.);
    let boxes = vec![Aabb::from_point(p); 30];
    let payloads: Vec<u32> = (0..30).collect();
    let tree = OwnedRTree::from_bounds(&boxes, &payloads).unwrap();

    assert_eq!(sorted(tree.search_aabb(&Aabb::from_point(p))), payloads);
    assert!(tree
        .search_aabb(&Aabb::from_point(p + Vec3::splat(1.)))
        .is_empty());
    assert_eq!(
        sorted(tree.search_ray(&Ray::segment(p - Vec3::X, p + Vec3::X))),
        payloads
    );
}

#[test]
fn flat_boxes_are_found() {
    // zero thickness along z, like a floor made of triangles
    let vertices = vec![
        Vec3::new(0., 0., 0.),
        Vec3::new(10., 0., 0.),
        Vec3::new(0., 10., 0.),
        Vec3::new(10., 10., 0.),
    ];
    let tree = OwnedRTree::from_triangles(&vertices, &[[0, 1, 2], [1, 3, 2]]).unwrap();
    let found = tree.search_ray(&Ray::segment(Vec3::new(2., 2., 5.), Vec3::new(2., 2., -5.)));
    assert!(found.contains(&0));
    assert_eq!(
        sorted(tree.search_aabb(&Aabb::from_point(Vec3::new(5., 5., 0.)))),
        vec![0, 1]
    );
}

#[test]
fn nearest_rounding_still_finds_own_box() {
    let (boxes, payloads) = random_boxes(500, 13);
    let options = BuildOptions {
        fix_quantized_boxes: false,
    };
    let tree = OwnedRTree::from_bounds_with_options(&boxes, &payloads, options).unwrap();
    for (b, p) in boxes.iter().zip(&payloads) {
        assert!(tree.search_aabb(b).contains(p));
    }
}

#[test]
fn borrowed_tree_matches_owned() {
    let (boxes, payloads) = random_boxes(700, 14);
    let tree = OwnedRTree::from_bounds(&boxes, &payloads).unwrap();
    let tree_ref = tree.as_rtree_ref();
    let query = Aabb::new(Vec3::splat(30.), Vec3::splat(50.));
    assert_eq!(tree_ref.search_aabb(&query), tree.search_aabb(&query));

    let mut buf: Vec<u8> = vec![];
    tree_ref.save_be(&mut buf).unwrap();
    let loaded = OwnedRTree::load(buf.as_slice()).unwrap();
    assert_eq!(loaded.search_aabb(&query), tree.search_aabb(&query));
}

#[test]
fn concurrent_queries() {
    let (boxes, payloads) = random_boxes(4000, 15);
    let tree = OwnedRTree::from_bounds(&boxes, &payloads).unwrap();
    let queries: Vec<Aabb> = boxes.iter().step_by(37).copied().collect();
    let serial: Vec<Vec<u32>> = queries.iter().map(|q| tree.search_aabb(q)).collect();

    std::thread::scope(|s| {
        let handles: Vec<_> = (0..4)
            .map(|_| s.spawn(|| queries.iter().map(|q| tree.search_aabb(q)).collect::<Vec<_>>()))
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), serial);
        }
    });
}
