extern crate cutforest;

use cutforest::errors::ForestError;
use cutforest::indexmanager::{IntervalIndexManager, StackIndexManager};

#[test]
fn stack_manager_hands_out_ascending_handles() {
    let mut manager: StackIndexManager<u16> = StackIndexManager::new(8);
    for expected in 0..8 {
        assert_eq!(manager.take().unwrap(), expected);
        assert!(manager.is_occupied(expected));
    }
    assert_eq!(manager.occupied(), 8);
    assert!(manager.is_exhausted());
    assert!(matches!(
        manager.take(),
        Err(ForestError::CapacityExhausted { .. })
    ));
}

#[test]
fn stack_manager_recycles_released_handles() {
    let mut manager: StackIndexManager<usize> = StackIndexManager::new(4);
    let a = manager.take().unwrap();
    let b = manager.take().unwrap();
    manager.release(a).unwrap();
    assert!(!manager.is_occupied(a));
    assert!(manager.is_occupied(b));
    // the freed handle is on top of the stack
    assert_eq!(manager.take().unwrap(), a);
    assert_eq!(manager.occupied(), 2);
}

#[test]
fn stack_manager_detects_double_free() {
    let mut manager: StackIndexManager<u8> = StackIndexManager::new(4);
    let a = manager.take().unwrap();
    manager.release(a).unwrap();
    assert!(matches!(
        manager.release(a),
        Err(ForestError::CorruptState { .. })
    ));
    // a handle that was never taken is just as fatal
    assert!(matches!(
        manager.release(3),
        Err(ForestError::CorruptState { .. })
    ));
    assert!(matches!(
        manager.release(100),
        Err(ForestError::InvalidArgument { .. })
    ));
}

#[test]
fn stack_manager_growth_preserves_occupancy() {
    let mut manager: StackIndexManager<u16> = StackIndexManager::new(2);
    let a = manager.take().unwrap();
    let b = manager.take().unwrap();
    manager.grow(5).unwrap();
    assert_eq!(manager.capacity(), 5);
    assert!(manager.is_occupied(a) && manager.is_occupied(b));
    // fresh handles arrive in ascending order
    assert_eq!(manager.take().unwrap(), 2);
    assert_eq!(manager.take().unwrap(), 3);
    assert_eq!(manager.take().unwrap(), 4);
    assert!(matches!(
        manager.grow(1),
        Err(ForestError::InvalidArgument { .. })
    ));
}

#[test]
fn stack_manager_serialization_accessors() {
    let mut manager: StackIndexManager<u16> = StackIndexManager::new(4);
    let _ = manager.take().unwrap();
    let free = manager.free_handles();
    assert_eq!(free.len(), 3);
    assert!(!free.contains(&0));
    assert_eq!(manager.occupancy_words()[0], 1);
}

#[test]
fn interval_manager_take_and_release_coalesce() {
    let mut manager: IntervalIndexManager<usize> = IntervalIndexManager::new(10);
    let mut taken = Vec::new();
    for _ in 0..10 {
        taken.push(manager.take().unwrap());
    }
    assert_eq!(manager.occupied(), 10);
    assert!(manager.is_exhausted());

    // adjacent releases collapse back into one interval
    manager.release(4).unwrap();
    manager.release(5).unwrap();
    manager.release(3).unwrap();
    assert_eq!(manager.occupied(), 7);
    let reused = manager.take().unwrap();
    assert!((3..=5).contains(&reused));
}

#[test]
fn interval_manager_detects_double_free() {
    let mut manager: IntervalIndexManager<usize> = IntervalIndexManager::new(6);
    for _ in 0..6 {
        manager.take().unwrap();
    }
    manager.release(2).unwrap();
    assert!(matches!(
        manager.release(2),
        Err(ForestError::CorruptState { .. })
    ));
}

#[test]
fn interval_manager_growth_appends_fresh_interval() {
    let mut manager: IntervalIndexManager<usize> = IntervalIndexManager::new(3);
    for _ in 0..3 {
        manager.take().unwrap();
    }
    manager.grow(6).unwrap();
    assert_eq!(manager.capacity(), 6);
    assert_eq!(manager.occupied(), 3);
    let next = manager.take().unwrap();
    assert!(next >= 3);
}
