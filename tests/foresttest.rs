extern crate cutforest;
extern crate rand;
extern crate rand_chacha;

use num::abs;

use cutforest::datagen::SyntheticSeries;
use cutforest::{ForestBuilder, RandomCutForest};

/// try cargo test --release
/// these tests are designed to be longish

#[test]
fn tiny_stream_direct_mapping() {
    let mut forest = ForestBuilder::new(2)
        .sample_size(4)
        .number_of_trees(1)
        .time_decay(0.0)
        .initial_accept_fraction(1.0)
        .output_after(1)
        .random_seed(7)
        .build()
        .unwrap();

    for i in 1..=4 {
        forest.update(&[i as f32, i as f32]).unwrap();
    }
    assert_eq!(forest.active_points(), 4);
    assert_eq!(forest.total_reference_count(), 4);
    assert_eq!(forest.tree_masses(), vec![4]);
    assert_eq!(forest.sampler_sizes(), vec![4]);
    forest.verify_consistency().unwrap();

    // traversal is read-only; masses are identical before and after
    let masses = forest.tree_masses();
    let first = forest.score(&[2.5, 2.5]).unwrap();
    let second = forest.score(&[2.5, 2.5]).unwrap();
    assert!(first > 0.0);
    assert_eq!(first, second);
    assert_eq!(forest.tree_masses(), masses);
}

#[test]
fn reference_counts_match_reservoirs() {
    let mut forest = ForestBuilder::new(3)
        .sample_size(4)
        .number_of_trees(2)
        .time_decay(0.01)
        .random_seed(11)
        .build()
        .unwrap();

    for i in 0..100 {
        forest
            .update(&[i as f32, (2 * i) as f32, -(i as f32)])
            .unwrap();
    }
    let held: usize = forest.sampler_sizes().iter().sum();
    assert_eq!(forest.total_reference_count(), held);
    // distinct points are never shared across handles
    assert!(forest.active_points() <= held);
    forest.verify_consistency().unwrap();
}

#[test]
fn eviction_applies_to_the_tree_before_the_next_round() {
    let mut forest = ForestBuilder::new(2)
        .sample_size(2)
        .number_of_trees(1)
        .time_decay(0.5)
        .initial_accept_fraction(1.0)
        .random_seed(13)
        .build()
        .unwrap();

    for i in 0..10 {
        forest.update(&[i as f32, (i * i) as f32]).unwrap();
        // each accepted point evicts one once full; the invariants hold at
        // every step
        assert!(forest.tree_masses()[0] <= 2);
        assert_eq!(
            forest.tree_masses()[0],
            forest.sampler_sizes()[0]
        );
        forest.verify_consistency().unwrap();
    }
}

#[test]
fn identical_configurations_are_deterministic() {
    let build = || {
        ForestBuilder::new(4)
            .sample_size(64)
            .number_of_trees(10)
            .time_decay(0.001)
            .random_seed(20222022)
            .build()
            .unwrap()
    };
    let mut first = build();
    let mut second = build();

    let series = SyntheticSeries::sinusoid(4000, 60, 50.0, 3.0, 9, 4);
    for (i, point) in series.data.iter().enumerate() {
        first.update(point).unwrap();
        second.update(point).unwrap();
        if i % 500 == 0 {
            assert_eq!(first.tree_masses(), second.tree_masses());
            assert_eq!(first.sampler_sizes(), second.sampler_sizes());
            assert_eq!(
                first.score(point).unwrap(),
                second.score(point).unwrap()
            );
        }
    }
    assert_eq!(first.tree_masses(), second.tree_masses());
    assert_eq!(
        first.total_reference_count(),
        second.total_reference_count()
    );
}

#[test]
fn negative_zero_is_normalized() {
    let mut forest = ForestBuilder::new(2)
        .sample_size(8)
        .number_of_trees(2)
        .initial_accept_fraction(1.0)
        .output_after(1)
        .random_seed(3)
        .build()
        .unwrap();
    forest.update(&[-0.0, 1.0]).unwrap();
    forest.update(&[0.0, 1.0]).unwrap();
    // both inputs resolve to the same stored point
    assert_eq!(forest.active_points(), 1);
    forest.verify_consistency().unwrap();
}

#[cfg(test)]
parameterized_test::create! { two_distribution_scores, (parallel_enabled, number_of_trees), {
    let data_size = 20000;
    let dimensions = 10;
    let mut center1 = vec![0.0f32; dimensions];
    let mut center2 = vec![0.0f32; dimensions];
    center1[0] = 5.0;
    center2[0] = -5.0;
    let scale = vec![vec![0.1f32; dimensions], vec![0.1f32; dimensions]];
    let means = vec![center1, center2];
    let series = SyntheticSeries::mixture(
        data_size,
        &means,
        &scale,
        &[0.5f32, 0.5f32],
        0,
    );

    let sample_size = 128;
    let mut forest = ForestBuilder::new(dimensions)
        .sample_size(sample_size)
        .number_of_trees(number_of_trees)
        .time_decay(0.1 / sample_size as f64)
        .initial_accept_fraction(0.1)
        .parallel_enabled(parallel_enabled)
        .random_seed(17)
        .build()
        .unwrap();

    for point in series.data.iter() {
        forest.update(point).unwrap();
    }

    // the gap between the clusters is far from every sample
    assert!(forest.score(&vec![0.0f32; dimensions]).unwrap() > 1.5);
    // cluster centers are unsurprising
    assert!(forest.score(&means[0]).unwrap() < 1.5);
    forest.verify_consistency().unwrap();
}}

two_distribution_scores! {
    sequential: (false, 20),
    parallel: (true, 20),
}

#[test]
fn attribution_decomposes_the_score() {
    let data_size = 8000;
    let dimensions = 6;
    let series = SyntheticSeries::sinusoid(data_size, 60, 40.0, 2.0, 31, dimensions);

    let mut forest = ForestBuilder::new(dimensions)
        .sample_size(128)
        .number_of_trees(20)
        .time_decay(0.0005)
        .random_seed(5)
        .build()
        .unwrap();
    for point in series.data.iter() {
        forest.update(point).unwrap();
    }

    let mut query = vec![0.0f32; dimensions];
    query[2] = 300.0; // a spike in one dimension
    let score = forest.score(&query).unwrap();
    let attribution = forest.attribution(&query).unwrap();
    assert!(abs(attribution.total() - score) < 0.2 * score);
    // the spiked dimension dominates the blame
    let spiked = attribution.high_low_sum(2);
    for d in 0..dimensions {
        if d != 2 {
            assert!(spiked > attribution.high_low_sum(d));
        }
    }
}

#[test]
fn shingled_stream_with_near_neighbors_and_imputation() {
    let shingle_size = 4;
    let base_dimension = 2;
    let dimensions = shingle_size * base_dimension;
    let series = SyntheticSeries::sinusoid(6000, 60, 80.0, 3.0, 1, base_dimension);

    let mut forest = ForestBuilder::new(dimensions)
        .shingle_size(shingle_size)
        .sample_size(128)
        .number_of_trees(15)
        .internal_shingling(true)
        .time_decay(0.0005)
        .random_seed(23)
        .build()
        .unwrap();

    for point in series.data.iter() {
        forest.update(point).unwrap();
    }
    forest.verify_consistency().unwrap();

    let query = &series.data[5990];
    let neighbors = forest.near_neighbor_list(query, 50).unwrap();
    assert!(!neighbors.is_empty());
    for (score, neighbor, distance) in neighbors.iter() {
        assert!(*score >= 0.0);
        assert_eq!(neighbor.len(), dimensions);
        assert!(*distance >= 0.0);
    }

    // impute the upcoming base tuple from the rolling shingle
    let positions: Vec<usize> = (0..base_dimension).collect();
    let imputed = forest.impute_missing(&positions, query).unwrap();
    assert_eq!(imputed.len(), base_dimension);
    for value in imputed.iter() {
        assert!(value.is_finite());
        assert!(value.abs() < 500.0);
    }
}

#[test]
fn displacement_score_is_available() {
    let series = SyntheticSeries::sinusoid(3000, 60, 30.0, 2.0, 77, 3);
    let mut forest = ForestBuilder::new(3)
        .sample_size(64)
        .number_of_trees(10)
        .random_seed(29)
        .build()
        .unwrap();
    for point in series.data.iter() {
        forest.update(point).unwrap();
    }
    let inlier = forest.displacement_score(&series.data[2999]).unwrap();
    let outlier = forest
        .displacement_score(&[1000.0, -1000.0, 1000.0])
        .unwrap();
    assert!(outlier > inlier);
}

#[test]
fn time_decay_can_change_mid_stream() {
    let mut forest = ForestBuilder::new(2)
        .sample_size(32)
        .number_of_trees(4)
        .time_decay(0.0)
        .random_seed(41)
        .build()
        .unwrap();
    for i in 0..200 {
        forest.update(&[i as f32, -(i as f32)]).unwrap();
    }
    forest.set_time_decay(0.25).unwrap();
    for i in 200..400 {
        forest.update(&[i as f32, -(i as f32)]).unwrap();
    }
    forest.verify_consistency().unwrap();
}

#[test]
fn invalid_configurations_are_rejected() {
    assert!(ForestBuilder::new(0).build().is_err());
    assert!(ForestBuilder::new(6).shingle_size(4).build().is_err());
    assert!(ForestBuilder::new(2).sample_size(1).build().is_err());
    assert!(ForestBuilder::new(2).number_of_trees(0).build().is_err());
    // rotation without internal shingling
    assert!(ForestBuilder::new(4)
        .shingle_size(4)
        .internal_rotation(true)
        .build()
        .is_err());
}

#[test]
fn update_rejects_wrong_lengths() {
    let mut forest = ForestBuilder::new(4)
        .sample_size(16)
        .number_of_trees(2)
        .random_seed(2)
        .build()
        .unwrap();
    assert!(forest.update(&[1.0, 2.0]).is_err());
    assert!(forest.update(&[1.0, 2.0, 3.0, 4.0, 5.0]).is_err());
}
