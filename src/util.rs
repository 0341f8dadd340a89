use crate::{errors::ForestError, types::Result};

/// If the test condition is false, return an InvalidArgument error with
/// the given error message. Otherwise return Ok.
pub(crate) fn check_argument(test: bool, msg: &'static str) -> Result<()> {
    if test {
        Ok(())
    } else {
        Err(ForestError::InvalidArgument { msg })
    }
}

/// Like check_argument, but for conditions that can only fail if the model
/// itself is corrupted.
pub(crate) fn check_state(test: bool, msg: &'static str) -> Result<()> {
    if test {
        Ok(())
    } else {
        Err(ForestError::CorruptState { msg })
    }
}

pub fn l1distance(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| f64::abs((x - y) as f64))
        .sum()
}

pub fn linfinitydistance(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| f64::abs((x - y) as f64))
        .fold(0.0, f64::max)
}

// accumulators used by the per-tree fold in the forest executor

pub(crate) fn add_to(a: &f64, b: &mut f64) {
    *b += *a;
}

pub(crate) fn divide(a: &mut f64, b: usize) {
    *a /= b as f64;
}

pub(crate) fn add_nbr(a: &(f64, usize, f64), b: &mut Vec<(f64, usize, f64)>) {
    b.push(*a)
}

pub(crate) fn nbr_finish(_a: &mut Vec<(f64, usize, f64)>, _b: usize) {}
