extern crate cutforest;

use cutforest::errors::ForestError;
use cutforest::pointstore::{PointStoreView, ShingledPointStore};
use cutforest::tree::randomcuttree::RandomCutTree;
use cutforest::visitor::scorevisitor::ScalarScoreVisitor;
use cutforest::visitor::visitor::VisitorInfo;

type Tree = RandomCutTree<usize, usize, usize>;

fn store_with_points(points: &[Vec<f32>]) -> (ShingledPointStore<usize>, Vec<usize>) {
    let dimensions = points[0].len();
    let mut store = ShingledPointStore::new(
        dimensions,
        1,
        points.len() + 1,
        points.len() + 1,
        false,
        false,
        true,
    )
    .unwrap();
    let handles = points
        .iter()
        .enumerate()
        .map(|(i, point)| store.add(point, i as u64).unwrap())
        .collect();
    (store, handles)
}

fn grid_points(count: usize) -> Vec<Vec<f32>> {
    (0..count)
        .map(|i| vec![i as f32, ((i * 7) % 13) as f32])
        .collect()
}

#[test]
fn structural_invariants_hold_through_adds_and_deletes() {
    let points = grid_points(40);
    let (store, handles) = store_with_points(&points);
    let mut tree: Tree = RandomCutTree::new(2, 64, 1.0, 271828).unwrap();

    for (i, handle) in handles.iter().enumerate() {
        tree.add(*handle, i as u64, &store).unwrap();
        tree.verify_structure().unwrap();
    }
    assert_eq!(tree.mass(), 40);

    for (i, handle) in handles.iter().take(20).enumerate() {
        tree.delete(*handle, i as u64, &store).unwrap();
        tree.verify_structure().unwrap();
    }
    assert_eq!(tree.mass(), 20);

    let remaining: Vec<usize> = tree.leaves().iter().map(|(handle, _)| *handle).collect();
    for handle in handles.iter().take(20) {
        assert!(!remaining.contains(handle));
    }
}

#[test]
fn duplicate_points_merge_into_one_leaf() {
    let mut points = grid_points(10);
    points.push(points[3].clone());
    let (store, handles) = store_with_points(&points);
    let mut tree: Tree = RandomCutTree::new(2, 16, 1.0, 31).unwrap();
    for (i, handle) in handles.iter().enumerate() {
        let held = tree.add(*handle, i as u64, &store).unwrap();
        if i == 10 {
            // the duplicate resolves to the leaf added for point 3
            assert_eq!(held, handles[3]);
        }
    }
    assert_eq!(tree.mass(), 11);
    let leaves = tree.leaves();
    assert_eq!(leaves.len(), 10);
    let duplicated = leaves
        .iter()
        .find(|(handle, _)| *handle == handles[3])
        .unwrap();
    assert_eq!(duplicated.1, 2);
    tree.verify_structure().unwrap();

    // removing one copy keeps the leaf, removing the second removes it
    tree.delete(handles[3], 0, &store).unwrap();
    assert_eq!(tree.mass(), 10);
    tree.delete(handles[3], 0, &store).unwrap();
    assert_eq!(tree.mass(), 9);
    assert!(!tree
        .leaves()
        .iter()
        .any(|(handle, _)| *handle == handles[3]));
    tree.verify_structure().unwrap();
}

#[test]
fn deleting_an_absent_point_is_an_error() {
    let points = grid_points(6);
    let (mut store, handles) = store_with_points(&points);
    let mut tree: Tree = RandomCutTree::new(2, 8, 1.0, 5).unwrap();
    for (i, handle) in handles.iter().take(5).enumerate() {
        tree.add(*handle, i as u64, &store).unwrap();
    }
    // handle 5 is live in the store but was never added to the tree
    assert!(matches!(
        tree.delete(handles[5], 9, &store),
        Err(ForestError::InvalidArgument { .. })
    ));
    // a dead handle cannot be resolved at all
    store.dec(handles[5]).unwrap();
    assert!(tree.delete(handles[5], 9, &store).is_err());

    let mut empty: Tree = RandomCutTree::new(2, 8, 1.0, 5).unwrap();
    assert!(matches!(
        empty.delete(handles[0], 0, &store),
        Err(ForestError::InvalidArgument { .. })
    ));
}

#[test]
fn cache_fraction_does_not_change_the_shape() {
    let points = grid_points(30);
    let (store, handles) = store_with_points(&points);
    let mut cached: Tree = RandomCutTree::new(2, 32, 1.0, 777).unwrap();
    let mut uncached: Tree = RandomCutTree::new(2, 32, 0.0, 777).unwrap();
    for (i, handle) in handles.iter().enumerate() {
        cached.add(*handle, i as u64, &store).unwrap();
        uncached.add(*handle, i as u64, &store).unwrap();
    }
    let mut a = cached.leaves();
    let mut b = uncached.leaves();
    a.sort_unstable();
    b.sort_unstable();
    assert_eq!(a, b);

    for (i, handle) in handles.iter().take(10).enumerate() {
        cached.delete(*handle, i as u64, &store).unwrap();
        uncached.delete(*handle, i as u64, &store).unwrap();
    }
    let mut a = cached.leaves();
    let mut b = uncached.leaves();
    a.sort_unstable();
    b.sort_unstable();
    assert_eq!(a, b);
    cached.verify_structure().unwrap();
    uncached.verify_structure().unwrap();
}

#[test]
fn score_traversal_distinguishes_inliers() {
    let points = grid_points(50);
    let (store, handles) = store_with_points(&points);
    let mut tree: Tree = RandomCutTree::new(2, 64, 1.0, 2024).unwrap();
    for (i, handle) in handles.iter().enumerate() {
        tree.add(*handle, i as u64, &store).unwrap();
    }
    let info = VisitorInfo::default();
    let seen = tree
        .traverse(
            &[5.0, 9.0], // a stored grid point
            &Vec::new(),
            ScalarScoreVisitor::create_visitor,
            &info,
            &store,
            &0.0,
        )
        .unwrap();
    let outlier = tree
        .traverse(
            &[500.0, -400.0],
            &Vec::new(),
            ScalarScoreVisitor::create_visitor,
            &info,
            &store,
            &0.0,
        )
        .unwrap();
    assert!(seen > 0.0);
    assert!(outlier > seen);
}

#[test]
fn conditional_traversal_reaches_a_near_neighbor() {
    let points = grid_points(50);
    let (store, handles) = store_with_points(&points);
    let mut tree: Tree = RandomCutTree::new(2, 64, 1.0, 99).unwrap();
    for (i, handle) in handles.iter().enumerate() {
        tree.add(*handle, i as u64, &store).unwrap();
    }
    let info = VisitorInfo::default();
    // the first coordinate is unknown; the traversal forks over it
    let (score, handle, distance) = tree
        .conditional_traversal(&[0], &[0.0, 9.0], &store, 1.0, 13, &info)
        .unwrap();
    assert!(handle != usize::MAX);
    assert!(score > 0.0);
    // the missing coordinate is filled from the leaf, so the distance is
    // purely the known-coordinate gap
    let neighbor = store.copy(handle).unwrap();
    let expected = ((9.0f32 - neighbor[1]).abs()) as f64;
    assert!((distance - expected).abs() < 1e-6);
}
