use cutforest::datagen::SyntheticSeries;
use cutforest::{ForestBuilder, RandomCutForest};

fn main() {
    let shingle_size = 8;
    let base_dimension = 5;
    let data_size = 100000;
    let number_of_trees = 30;
    let sample_size = 256;
    let dimensions = shingle_size * base_dimension;
    let time_decay = 0.1 / sample_size as f64;
    let noise = 5.0;

    let mut forest: Box<dyn RandomCutForest> = ForestBuilder::new(dimensions)
        .shingle_size(shingle_size)
        .sample_size(sample_size)
        .number_of_trees(number_of_trees)
        .time_decay(time_decay)
        .random_seed(17)
        .internal_shingling(true)
        .build()
        .expect("valid configuration");

    let series = SyntheticSeries::sinusoid(data_size, 60, 100.0, noise, 0, base_dimension);

    let mut score: f64 = 0.0;
    for point in series.data.iter() {
        score += forest.score(point).expect("scoring failed");
        forest.update(point).expect("update failed");
    }

    println!(
        "average score {} over {} entries",
        score / series.data.len() as f64,
        forest.entries_seen()
    );
    println!("point store size {} bytes", forest.point_store_size_in_bytes());
    println!("total size {} bytes (approx)", forest.size_in_bytes());
}
