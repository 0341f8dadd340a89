use crate::types::Result;
use crate::util::check_argument;

/// Axis-aligned box over `f32` coordinates with a cached sum of
/// per-dimension ranges; the range sum drives cut probabilities.
#[repr(C)]
#[derive(Clone)]
pub struct BoundingBox {
    range_sum: f64,
    min_values: Vec<f32>,
    max_values: Vec<f32>,
}

impl BoundingBox {
    /// The degenerate box around a single point, the state of every leaf.
    pub fn from_point(point: &[f32]) -> Self {
        BoundingBox {
            range_sum: 0.0,
            min_values: point.to_vec(),
            max_values: point.to_vec(),
        }
    }

    /// The smallest box containing both corner slices.
    pub fn new(first_values: &[f32], second_values: &[f32]) -> Result<Self> {
        check_argument(
            first_values.len() == second_values.len(),
            "mismatched lengths",
        )?;
        let mut bounding_box = BoundingBox::from_point(first_values);
        bounding_box.extend(second_values, second_values);
        Ok(bounding_box)
    }

    /// Grows the box to contain the point; true when it already did, so
    /// ancestors need no further attention.
    pub fn check_contains_and_add_point(&mut self, values: &[f32]) -> bool {
        self.extend(values, values)
    }

    pub fn add_box(&mut self, other: &BoundingBox) {
        self.extend(&other.min_values, &other.max_values);
    }

    fn extend(&mut self, low: &[f32], high: &[f32]) -> bool {
        let mut contained = true;
        for d in 0..self.min_values.len() {
            if low[d] < self.min_values[d] {
                self.min_values[d] = low[d];
                contained = false;
            }
            if high[d] > self.max_values[d] {
                self.max_values[d] = high[d];
                contained = false;
            }
        }
        if !contained {
            self.range_sum = self
                .min_values
                .iter()
                .zip(&self.max_values)
                .map(|(low, high)| (high - low) as f64)
                .sum();
        }
        contained
    }

    pub fn range_sum(&self) -> f64 {
        self.range_sum
    }

    pub fn min_values(&self) -> &[f32] {
        &self.min_values
    }

    pub fn max_values(&self) -> &[f32] {
        &self.max_values
    }

    /// Total growth the box would need to admit the point; zero when the
    /// point is inside.
    fn extension_to(&self, point: &[f32]) -> f64 {
        let mut extension = 0.0f64;
        for d in 0..self.min_values.len() {
            if point[d] < self.min_values[d] {
                extension += (self.min_values[d] - point[d]) as f64;
            } else if point[d] > self.max_values[d] {
                extension += (point[d] - self.max_values[d]) as f64;
            }
        }
        extension
    }

    fn probability_from_extension(&self, extension: f64) -> f64 {
        if extension == 0.0 {
            0.0
        } else if self.range_sum == 0.0 {
            1.0
        } else {
            extension / (self.range_sum + extension)
        }
    }

    /// Probability that a random cut over the box grown to the point
    /// separates the point from the box.
    pub fn probability_of_cut(&self, point: &[f32]) -> f64 {
        self.probability_from_extension(self.extension_to(point))
    }

    pub fn probability_of_cut_with_missing_coordinates(
        &self,
        point: &[f32],
        missing_coordinates: &[bool],
    ) -> f64 {
        let mut extension = 0.0f64;
        for d in 0..self.min_values.len() {
            if missing_coordinates[d] {
                continue;
            }
            if point[d] < self.min_values[d] {
                extension += (self.min_values[d] - point[d]) as f64;
            } else if point[d] > self.max_values[d] {
                extension += (point[d] - self.max_values[d]) as f64;
            }
        }
        self.probability_from_extension(extension)
    }
}
