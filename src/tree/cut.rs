use crate::tree::boundingbox::BoundingBox;

/// An axis-aligned split; interior nodes store this as two columns, the
/// struct only travels during insertion.
pub struct Cut {
    pub dimension: usize,
    pub value: f32,
}

impl Cut {
    pub fn new(dimension: usize, value: f32) -> Self {
        Cut { dimension, value }
    }

    /// Draws a cut over the box grown to contain `point`, placing `factor`
    /// (the caller's uniform draw) along the concatenated per-dimension
    /// spreads so each dimension is hit with probability proportional to
    /// its spread. Returns the cut only when it lands between the point and
    /// the original box; `None` means this level cannot separate and the
    /// caller should keep walking up.
    pub fn separating(bounding_box: &BoundingBox, factor: f64, point: &[f32]) -> Option<Cut> {
        let min_values = bounding_box.min_values();
        let max_values = bounding_box.max_values();

        let mut extension = 0.0f64;
        for d in 0..point.len() {
            if point[d] < min_values[d] {
                extension += (min_values[d] - point[d]) as f64;
            } else if point[d] > max_values[d] {
                extension += (point[d] - max_values[d]) as f64;
            }
        }
        if extension == 0.0 {
            // the box already contains the point
            return None;
        }

        let mut remainder = factor * (bounding_box.range_sum() + extension);
        let mut last_spread = None;
        for d in 0..point.len() {
            let low = f32::min(point[d], min_values[d]);
            let high = f32::max(point[d], max_values[d]);
            let gap = (high - low) as f64;
            if gap <= 0.0 {
                continue;
            }
            if remainder < gap {
                return Self::settle(d, low, high, remainder, bounding_box, point);
            }
            last_spread = Some(d);
            remainder -= gap;
        }
        // floating slack carried the draw past the final spread dimension;
        // settle there at its low end
        let d = last_spread?;
        let low = f32::min(point[d], min_values[d]);
        let high = f32::max(point[d], max_values[d]);
        Self::settle(d, low, high, 0.0, bounding_box, point)
    }

    fn settle(
        dimension: usize,
        low: f32,
        high: f32,
        remainder: f64,
        bounding_box: &BoundingBox,
        point: &[f32],
    ) -> Option<Cut> {
        let mut value = low + remainder as f32; // precision narrows here
        if value <= low || value >= high {
            value = low;
        }
        let coordinate = point[dimension];
        let box_min = bounding_box.min_values()[dimension];
        let box_max = bounding_box.max_values()[dimension];
        let separates = (coordinate <= value && value < box_min)
            || (box_max <= value && value < coordinate);
        if separates {
            Some(Cut::new(dimension, value))
        } else {
            None
        }
    }
}
