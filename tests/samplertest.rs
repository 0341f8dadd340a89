extern crate cutforest;

use cutforest::errors::ForestError;
use cutforest::sampler::TimeDecayedSampler;

fn drive(
    sampler: &mut TimeDecayedSampler<usize>,
    stream: u64,
) -> Vec<(u64, usize, Option<usize>)> {
    // feeds sequence indices 0..stream with handle == sequence index,
    // recording (sequence, committed handle, evicted handle)
    let mut log = Vec::new();
    for s in 0..stream {
        if let Some(token) = sampler.offer(s).unwrap() {
            let evicted = if token.evicts() {
                Some(sampler.evict_max().unwrap().handle)
            } else {
                None
            };
            sampler.commit(token, s as usize).unwrap();
            log.push((s, s as usize, evicted));
        }
    }
    log
}

#[test]
fn reservoir_never_exceeds_capacity() {
    let mut sampler: TimeDecayedSampler<usize> =
        TimeDecayedSampler::new(16, 0.01, 0.5, false, 99).unwrap();
    for s in 0..1000u64 {
        if let Some(token) = sampler.offer(s).unwrap() {
            if token.evicts() {
                sampler.evict_max().unwrap();
            }
            sampler.commit(token, s as usize).unwrap();
        }
        assert!(sampler.size() <= sampler.capacity());
    }
    assert!(sampler.is_full());
}

#[test]
fn max_weight_is_non_increasing_without_decay() {
    let mut sampler: TimeDecayedSampler<usize> =
        TimeDecayedSampler::new(8, 0.0, 1.0, false, 7).unwrap();
    let mut last_max: Option<f32> = None;
    for s in 0..500u64 {
        if let Some(token) = sampler.offer(s).unwrap() {
            if token.evicts() {
                sampler.evict_max().unwrap();
            }
            sampler.commit(token, s as usize).unwrap();
        }
        if sampler.is_full() {
            let current = sampler.max_weight().unwrap();
            if let Some(previous) = last_max {
                assert!(current <= previous);
            }
            last_max = Some(current);
        }
    }
}

#[test]
fn identical_seeds_make_identical_decisions() {
    let mut first: TimeDecayedSampler<usize> =
        TimeDecayedSampler::new(32, 0.002, 0.125, true, 1234).unwrap();
    let mut second: TimeDecayedSampler<usize> =
        TimeDecayedSampler::new(32, 0.002, 0.125, true, 1234).unwrap();
    let log_a = drive(&mut first, 2000);
    let log_b = drive(&mut second, 2000);
    assert_eq!(log_a, log_b);
    assert_eq!(first.samples(), second.samples());
    assert_eq!(
        first.stored_sequence_indexes().unwrap(),
        second.stored_sequence_indexes().unwrap()
    );
}

#[test]
fn recent_points_dominate_under_heavy_decay() {
    let mut sampler: TimeDecayedSampler<usize> =
        TimeDecayedSampler::new(10, 0.5, 1.0, false, 5).unwrap();
    drive(&mut sampler, 5000);
    let recent = sampler
        .handles()
        .filter(|handle| *handle >= 4000)
        .count();
    assert!(recent > 5, "expected a recency-biased reservoir");
}

#[test]
fn stored_sequence_indexes_follow_the_samples() {
    let mut sampler: TimeDecayedSampler<usize> =
        TimeDecayedSampler::new(8, 0.1, 1.0, true, 11).unwrap();
    drive(&mut sampler, 300);
    let handles: Vec<usize> = sampler.handles().collect();
    let stamps = sampler.stored_sequence_indexes().unwrap();
    assert_eq!(handles.len(), stamps.len());
    for (handle, stamp) in handles.iter().zip(stamps) {
        // the drive loop used the sequence index as the handle
        assert_eq!(*handle as u64, *stamp);
    }
}

#[test]
fn sampler_without_stamps_returns_none() {
    let sampler: TimeDecayedSampler<usize> =
        TimeDecayedSampler::new(8, 0.1, 1.0, false, 11).unwrap();
    assert!(sampler.stored_sequence_indexes().is_none());
}

#[test]
fn time_decay_updates_fold_into_the_offset() {
    let mut sampler: TimeDecayedSampler<usize> =
        TimeDecayedSampler::new(8, 0.25, 1.0, false, 3).unwrap();
    drive(&mut sampler, 100);
    let before = sampler.samples();
    sampler.set_time_decay(0.5, 100).unwrap();
    assert_eq!(sampler.time_decay(), 0.5);
    assert_eq!(sampler.accumulated_time_decay(), 25.0);
    // held samples are untouched by the rate change
    assert_eq!(sampler.samples(), before);
    // a stamp in the past is rejected
    assert!(matches!(
        sampler.set_time_decay(0.1, 50),
        Err(ForestError::InvalidArgument { .. })
    ));
}

#[test]
fn offers_must_be_monotone() {
    let mut sampler: TimeDecayedSampler<usize> =
        TimeDecayedSampler::new(8, 0.0, 1.0, false, 21).unwrap();
    sampler.offer(10).unwrap();
    assert!(matches!(
        sampler.offer(4),
        Err(ForestError::InvalidArgument { .. })
    ));
}

#[test]
fn rejected_offers_leave_the_reservoir_unchanged() {
    let mut sampler: TimeDecayedSampler<usize> =
        TimeDecayedSampler::new(4, 0.0, 1.0, false, 17).unwrap();
    drive(&mut sampler, 400);
    assert_eq!(sampler.size(), 4);
    assert_eq!(sampler.fill_fraction(), 1.0);
}
