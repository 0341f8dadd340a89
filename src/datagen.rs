use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

/// Seeded synthetic streams for the demo binary and the integration tests:
/// noisy sinusoids with occasional injected level shifts, and gaussian
/// mixtures.
pub struct SyntheticSeries {
    pub data: Vec<Vec<f32>>,
    pub change_indices: Vec<usize>,
    pub changes: Vec<Vec<f32>>,
}

struct Wave {
    phase: f64,
    amplitude: f32,
}

impl SyntheticSeries {
    /// One jittered sine wave per dimension over a shared period, with
    /// zero-centered noise and, on roughly one round in a hundred, a level
    /// shift injected into a random subset of dimensions. Shift rounds and
    /// their shifts are reported so tests can line scores up against the
    /// injections.
    pub fn sinusoid(
        num: usize,
        period: usize,
        amplitude: f32,
        noise: f32,
        seed: u64,
        base_dimension: usize,
    ) -> Self {
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        let waves: Vec<Wave> = (0..base_dimension)
            .map(|_| Wave {
                phase: rng.gen::<f64>() * 2.0 * std::f64::consts::PI,
                amplitude: amplitude * (1.0 + 0.2 * rng.gen::<f32>()),
            })
            .collect();

        let mut data = Vec::with_capacity(num);
        let mut change_indices = Vec::new();
        let mut changes = Vec::new();

        for i in 0..num {
            let angle = 2.0 * std::f64::consts::PI * i as f64 / period as f64;
            let shift_round = rng.gen::<f64>() < 0.01;
            let mut shift = vec![0.0f32; base_dimension];
            let mut shifted = false;

            let mut element = Vec::with_capacity(base_dimension);
            for (j, wave) in waves.iter().enumerate() {
                let mut value = wave.amplitude * (angle + wave.phase).sin() as f32
                    + noise * (rng.gen::<f32>() - 0.5);
                if shift_round && rng.gen::<f64>() < 0.3 {
                    let magnitude = noise * (5.0 + 5.0 * rng.gen::<f32>());
                    let signed = if rng.gen::<bool>() {
                        magnitude
                    } else {
                        -magnitude
                    };
                    value += signed;
                    shift[j] = signed;
                    shifted = true;
                }
                element.push(value);
            }
            data.push(element);
            if shifted {
                change_indices.push(i);
                changes.push(shift);
            }
        }
        SyntheticSeries {
            data,
            change_indices,
            changes,
        }
    }

    /// A mixture of axis-aligned gaussians; `weights` need not be
    /// normalized.
    pub fn mixture(
        num: usize,
        means: &[Vec<f32>],
        scales: &[Vec<f32>],
        weights: &[f32],
        seed: u64,
    ) -> Self {
        assert!(
            means.len() == scales.len() && means.len() == weights.len(),
            "mixture components disagree"
        );
        let total: f32 = weights.iter().sum();
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        let base_dimension = means[0].len();

        let mut data: Vec<Vec<f32>> = Vec::new();
        let mut change_indices: Vec<usize> = Vec::new();
        for i in 0..num {
            let mut toss = rng.gen::<f32>() * total;
            let mut component = 0;
            while component + 1 < weights.len() && toss >= weights[component] {
                toss -= weights[component];
                component += 1;
            }
            let mut element = vec![0.0; base_dimension];
            for j in 0..base_dimension {
                element[j] = means[component][j] + scales[component][j] * gaussian(&mut rng);
            }
            data.push(element);
            if component != 0 {
                change_indices.push(i);
            }
        }
        SyntheticSeries {
            data,
            change_indices,
            changes: Vec::new(),
        }
    }
}

/// Box-Muller transform over the chained generator.
fn gaussian(rng: &mut ChaCha20Rng) -> f32 {
    let mut u: f64 = rng.gen();
    while u == 0.0 {
        u = rng.gen();
    }
    let v: f64 = rng.gen();
    ((-2.0 * u.ln()).sqrt() * (2.0 * std::f64::consts::PI * v).cos()) as f32
}
