use crate::tree::boundingbox::BoundingBox;

/// A pair of per-dimension vectors splitting a quantity into contributions
/// above (`high`) and below (`low`) the queried point; the unit of anomaly
/// attribution.
#[repr(C)]
#[derive(Clone)]
pub struct DiVector {
    pub high: Vec<f64>,
    pub low: Vec<f64>,
}

impl DiVector {
    pub fn empty(dimension: usize) -> Self {
        DiVector {
            high: vec![0.0; dimension],
            low: vec![0.0; dimension],
        }
    }

    pub fn dimensions(&self) -> usize {
        self.high.len()
    }

    /// Overwrites this vector with the per-dimension probability that a
    /// random cut separates `point` from the box.
    pub fn assign_as_probability_of_cut(&mut self, bounding_box: &BoundingBox, point: &[f32]) {
        let minsum: f64 = self
            .low
            .iter_mut()
            .zip(bounding_box.min_values())
            .zip(point)
            .map(|((x, &y), &z)| {
                *x = if y - z > 0.0 { (y - z) as f64 } else { 0.0 };
                *x
            })
            .sum();
        let maxsum: f64 = self
            .high
            .iter_mut()
            .zip(point)
            .zip(bounding_box.max_values())
            .map(|((x, &y), &z)| {
                *x = if y - z > 0.0 { (y - z) as f64 } else { 0.0 };
                *x
            })
            .sum();
        let sum = minsum + maxsum;
        if sum != 0.0 {
            self.scale(1.0 / (bounding_box.range_sum() + sum));
        }
    }

    pub fn total(&self) -> f64 {
        self.high.iter().sum::<f64>() + self.low.iter().sum::<f64>()
    }

    pub fn scale(&mut self, factor: f64) {
        for x in self.high.iter_mut() {
            *x *= factor;
        }
        for x in self.low.iter_mut() {
            *x *= factor;
        }
    }

    /// Scales so the total equals `value`; a vector with nothing to scale
    /// spreads the value evenly across every cell instead.
    pub fn normalize(&mut self, value: f64) {
        let total = self.total();
        if total > 0.0 {
            self.scale(value / total);
        } else {
            let share = value / (2.0 * self.high.len() as f64);
            for x in self.high.iter_mut() {
                *x = share;
            }
            for x in self.low.iter_mut() {
                *x = share;
            }
        }
    }

    pub fn add_from(&mut self, other: &DiVector, factor: f64) {
        for (x, &y) in self.high.iter_mut().zip(&other.high) {
            *x += y * factor;
        }
        for (x, &y) in self.low.iter_mut().zip(&other.low) {
            *x += y * factor;
        }
    }

    pub fn add_to(&self, other: &mut DiVector) {
        for (x, &y) in other.high.iter_mut().zip(&self.high) {
            *x += y;
        }
        for (x, &y) in other.low.iter_mut().zip(&self.low) {
            *x += y;
        }
    }

    pub fn divide(&mut self, n: usize) {
        self.scale(1.0 / n as f64);
    }

    pub fn high_low_sum(&self, dimension: usize) -> f64 {
        self.high[dimension] + self.low[dimension]
    }
}
