extern crate cutforest;

use cutforest::errors::ForestError;
use cutforest::pointstore::{PointStoreView, ShingledPointStore};

const NOT_READY: usize = usize::MAX;

fn direct_store(dimensions: usize, capacity: usize) -> ShingledPointStore<usize> {
    ShingledPointStore::new(dimensions, 1, capacity, capacity, false, false, true).unwrap()
}

fn overlapping_store(shingle_size: usize, capacity: usize) -> ShingledPointStore<usize> {
    // base dimension one, internal shingling, location list enabled
    ShingledPointStore::new(shingle_size, shingle_size, capacity, 2, true, false, false).unwrap()
}

#[test]
fn add_round_trips_fresh_points() {
    let mut store = direct_store(2, 8);
    let points = [[1.0f32, 1.0], [2.0, 2.0], [3.0, 3.0], [4.0, 4.0]];
    let mut handles = Vec::new();
    for (i, point) in points.iter().enumerate() {
        let handle = store.add(point, i as u64).unwrap();
        assert_ne!(handle, NOT_READY);
        assert_eq!(store.ref_count(handle).unwrap(), 1);
        assert!(store.is_equal(point, handle).unwrap());
        assert_eq!(store.copy(handle).unwrap(), point.to_vec());
        handles.push(handle);
    }
    assert_eq!(store.active_points(), 4);
    assert_eq!(store.total_reference_count(), 4);
    // all four handles are distinct
    let mut sorted = handles.clone();
    sorted.sort_unstable();
    sorted.dedup();
    assert_eq!(sorted.len(), 4);
}

#[test]
fn sequence_index_must_not_move_backwards() {
    let mut store = direct_store(2, 8);
    store.add(&[1.0, 1.0], 10).unwrap();
    assert!(matches!(
        store.add(&[2.0, 2.0], 3),
        Err(ForestError::InvalidArgument { .. })
    ));
}

#[test]
fn internal_shingle_warms_up_then_shares_overlap() {
    let mut store = overlapping_store(4, 64);
    // the shingle needs four base tuples; the first three are not ready
    for i in 0..3 {
        assert_eq!(store.add(&[(i + 1) as f32], i as u64).unwrap(), NOT_READY);
    }
    let first = store.add(&[4.0], 3).unwrap();
    assert_ne!(first, NOT_READY);
    assert_eq!(store.copy(first).unwrap(), vec![1.0, 2.0, 3.0, 4.0]);

    let mut handles = vec![first];
    for i in 4..8 {
        let handle = store.add(&[(i + 1) as f32], i as u64).unwrap();
        assert_ne!(handle, NOT_READY);
        handles.push(handle);
    }
    // five full shingles would need 20 slots; overlap sharing appends one
    // value per point after the first
    assert!(store.occupied_store_units() < 8 * 4);
    assert_eq!(store.copy(handles[4]).unwrap(), vec![5.0, 6.0, 7.0, 8.0]);
    for handle in handles {
        assert_eq!(store.ref_count(handle).unwrap(), 1);
    }
}

#[test]
fn decrement_to_zero_frees_the_handle() {
    let mut store = direct_store(2, 4);
    let handle = store.add(&[1.0, 2.0], 0).unwrap();
    assert_eq!(store.inc(handle).unwrap(), 2);
    assert_eq!(store.dec(handle).unwrap(), 1);
    assert_eq!(store.dec(handle).unwrap(), 0);
    assert!(store.copy(handle).is_err());
    assert!(matches!(
        store.dec(handle),
        Err(ForestError::CorruptState { .. })
    ));
    assert_eq!(store.active_points(), 0);
}

#[test]
fn compaction_preserves_live_points() {
    let mut store =
        ShingledPointStore::<usize>::new(2, 1, 64, 8, false, false, false).unwrap();
    let mut live = Vec::new();
    for i in 0..32 {
        let point = [i as f32, (i * i) as f32];
        let handle = store.add(&point, i as u64).unwrap();
        if i % 3 == 0 {
            live.push((handle, point.to_vec()));
        } else {
            store.dec(handle).unwrap();
        }
    }
    let before: Vec<Vec<f32>> = live
        .iter()
        .map(|(handle, _)| store.copy(*handle).unwrap())
        .collect();
    store.compact().unwrap();
    for ((handle, original), old_copy) in live.iter().zip(&before) {
        let fresh = store.copy(*handle).unwrap();
        assert_eq!(&fresh, original);
        assert_eq!(&fresh, old_copy);
    }
    // the live prefix is dense after compaction
    assert_eq!(store.occupied_store_units(), live.len() * 2);
}

#[test]
fn compaction_is_a_no_op_for_direct_stores() {
    let mut store = direct_store(3, 8);
    let handle = store.add(&[1.0, 2.0, 3.0], 0).unwrap();
    store.compact().unwrap();
    assert_eq!(store.copy(handle).unwrap(), vec![1.0, 2.0, 3.0]);
}

#[test]
fn store_grows_from_small_initial_allocation() {
    let mut store =
        ShingledPointStore::<usize>::new(2, 1, 256, 2, false, false, false).unwrap();
    let mut handles = Vec::new();
    for i in 0..200 {
        let handle = store.add(&[i as f32, -(i as f32)], i as u64).unwrap();
        handles.push(handle);
    }
    assert_eq!(store.active_points(), 200);
    for (i, handle) in handles.iter().enumerate() {
        assert_eq!(
            store.copy(*handle).unwrap(),
            vec![i as f32, -(i as f32)]
        );
    }
}

#[test]
fn capacity_exhaustion_is_an_error_not_a_panic() {
    let mut store = direct_store(2, 4);
    for i in 0..4 {
        store.add(&[i as f32, i as f32], i as u64).unwrap();
    }
    assert!(matches!(
        store.add(&[9.0, 9.0], 4),
        Err(ForestError::CapacityExhausted { .. })
    ));
}

#[test]
fn rotation_keeps_shingles_aligned() {
    let mut store =
        ShingledPointStore::<usize>::new(4, 4, 32, 2, true, true, false).unwrap();
    let dimensions = 4;
    for i in 0..3 {
        assert_eq!(store.add(&[(i + 1) as f32], i as u64).unwrap(), NOT_READY);
    }
    let mut handles = Vec::new();
    for i in 3..10 {
        let handle = store.add(&[(i + 1) as f32], i as u64).unwrap();
        assert_ne!(handle, NOT_READY);
        assert_eq!(store.occupied_store_units() % dimensions, 0);
        handles.push(handle);
    }
    // rotational write: slot j always holds the tuple of time j mod 4
    let first = store.copy(handles[0]).unwrap();
    assert_eq!(first, vec![1.0, 2.0, 3.0, 4.0]);
    let second = store.copy(handles[1]).unwrap();
    assert_eq!(second, vec![5.0, 2.0, 3.0, 4.0]);
}

#[test]
fn shingled_query_matches_stream_state() {
    let mut store = overlapping_store(3, 16);
    for i in 0..5 {
        store.add(&[i as f32], i as u64).unwrap();
    }
    // stream so far ends ...2, 3, 4; the query for 9 would shingle as 3, 4, 9
    let query = store.shingled_point(&[9.0]).unwrap();
    assert_eq!(query, vec![3.0, 4.0, 9.0]);
}
