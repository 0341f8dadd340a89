use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use rand_core::RngCore;

use crate::types::{HandleWidth, Result};
use crate::util::{check_argument, check_state};

/// Proof that an `offer` was accepted; carries the weight (and stamp) to be
/// committed once the tree has placed the point.
pub struct AcceptToken {
    weight: f32,
    sequence_index: u64,
    evicts: bool,
}

impl AcceptToken {
    pub fn evicts(&self) -> bool {
        self.evicts
    }

    pub fn weight(&self) -> f32 {
        self.weight
    }
}

/// A sample pushed out of a full reservoir; exposed exactly once so the
/// owning tree can drop the corresponding leaf.
#[derive(Clone, Copy, Debug)]
pub struct EvictedSample {
    pub handle: usize,
    pub weight: f32,
    pub sequence_index: u64,
}

/// A weighted reservoir of fixed capacity biased toward recent arrivals.
///
/// Samples are kept in a max-heap keyed on
/// `weight(s) = -(s - last_decay_update) * lambda - accumulated_decay + ln(-ln u)`
/// with `u` uniform in `(0, 1]`; lower weight means the sample survives
/// longer, so evicting the heap maximum retains the recency-biased set.
/// Admission is two-phase: `offer` draws the weight and decides, `commit`
/// inserts the handle the tree actually placed (which may differ from the
/// offered one when the tree folded a duplicate point into an existing
/// leaf). All randomness flows from a chained `ChaCha20Rng` seed, so a
/// sampler replayed with the same seed and stream makes identical decisions.
#[repr(C)]
pub struct TimeDecayedSampler<P>
where
    P: HandleWidth,
{
    capacity: usize,
    time_decay: f64,
    accumulated_decay: f64,
    last_decay_update: u64,
    max_sequence_index: u64,
    initial_accept_fraction: f64,
    store_sequence_indexes: bool,
    weights: Vec<f32>,
    handles: Vec<P>,
    sequence_indexes: Vec<u64>,
    current_size: usize,
    random_seed: u64,
}

impl<P> TimeDecayedSampler<P>
where
    P: HandleWidth,
{
    pub fn new(
        capacity: usize,
        time_decay: f64,
        initial_accept_fraction: f64,
        store_sequence_indexes: bool,
        random_seed: u64,
    ) -> Result<Self> {
        check_argument(capacity > 0, "sampler capacity must be positive")?;
        check_argument(time_decay >= 0.0, "time decay cannot be negative")?;
        check_argument(
            initial_accept_fraction > 0.0 && initial_accept_fraction <= 1.0,
            "initial accept fraction must be in (0, 1]",
        )?;
        Ok(TimeDecayedSampler {
            capacity,
            time_decay,
            accumulated_decay: 0.0,
            last_decay_update: 0,
            max_sequence_index: 0,
            initial_accept_fraction,
            store_sequence_indexes,
            weights: vec![0.0; capacity],
            handles: vec![P::NULL; capacity],
            sequence_indexes: if store_sequence_indexes {
                vec![u64::MAX; capacity]
            } else {
                Vec::new()
            },
            current_size: 0,
            random_seed,
        })
    }

    /// Decides whether the point arriving at `sequence_index` enters the
    /// reservoir. Nothing but the RNG chain mutates here; an accepted offer
    /// must be followed by `commit` (after any eviction and tree work).
    pub fn offer(&mut self, sequence_index: u64) -> Result<Option<AcceptToken>> {
        check_argument(
            sequence_index >= self.max_sequence_index,
            "sequence index moved backwards",
        )?;
        self.max_sequence_index = sequence_index;
        let mut rng = ChaCha20Rng::seed_from_u64(self.random_seed);
        self.random_seed = rng.next_u64();

        let weight = self.compute_weight(sequence_index, rng.gen::<f64>());
        if self.current_size < self.capacity {
            let toss: f64 = rng.gen();
            if toss < self.initial_accept_probability(self.fill_fraction()) {
                return Ok(Some(AcceptToken {
                    weight,
                    sequence_index,
                    evicts: false,
                }));
            }
            return Ok(None);
        }
        if weight < self.weights[0] {
            return Ok(Some(AcceptToken {
                weight,
                sequence_index,
                evicts: true,
            }));
        }
        Ok(None)
    }

    fn compute_weight(&self, sequence_index: u64, uniform: f64) -> f32 {
        let elapsed = (sequence_index - self.last_decay_update) as f64;
        (f64::ln(-f64::ln(uniform)) - elapsed * self.time_decay - self.accumulated_decay) as f32
    }

    fn initial_accept_probability(&self, fill_fraction: f64) -> f64 {
        if fill_fraction < self.initial_accept_fraction {
            1.0
        } else if self.initial_accept_fraction >= 1.0 {
            0.0
        } else {
            1.0 - (fill_fraction - self.initial_accept_fraction)
                / (1.0 - self.initial_accept_fraction)
        }
    }

    /// Pops the maximum-weight sample. Valid only when the matching
    /// `AcceptToken` reported `evicts()`.
    pub fn evict_max(&mut self) -> Result<EvictedSample> {
        check_state(self.current_size > 0, "eviction from an empty sampler")?;
        let evicted = EvictedSample {
            handle: self.handles[0].index(),
            weight: self.weights[0],
            sequence_index: if self.store_sequence_indexes {
                self.sequence_indexes[0]
            } else {
                u64::MAX
            },
        };
        self.current_size -= 1;
        let last = self.current_size;
        self.weights[0] = self.weights[last];
        self.handles[0] = self.handles[last];
        if self.store_sequence_indexes {
            self.sequence_indexes[0] = self.sequence_indexes[last];
        }
        self.swap_down(0);
        Ok(evicted)
    }

    /// Inserts the handle placed by the tree under the offered weight.
    pub fn commit(&mut self, token: AcceptToken, handle: usize) -> Result<()> {
        self.insert(token.weight, handle, token.sequence_index)
    }

    /// Restores a previously evicted sample; rollback path for a failed
    /// tree update.
    pub fn readmit(&mut self, evicted: EvictedSample) -> Result<()> {
        self.insert(evicted.weight, evicted.handle, evicted.sequence_index)
    }

    fn insert(&mut self, weight: f32, handle: usize, sequence_index: u64) -> Result<()> {
        check_state(self.current_size < self.capacity, "sampler overflow")?;
        let mut current = self.current_size;
        self.weights[current] = weight;
        self.handles[current] = P::from_index(handle);
        if self.store_sequence_indexes {
            self.sequence_indexes[current] = sequence_index;
        }
        self.current_size += 1;
        while current > 0 {
            let parent = (current - 1) / 2;
            if self.weights[parent] < self.weights[current] {
                self.swap(current, parent);
                current = parent;
            } else {
                break;
            }
        }
        Ok(())
    }

    fn swap_down(&mut self, start: usize) {
        let mut current = start;
        while 2 * current + 1 < self.current_size {
            let mut max_index = 2 * current + 1;
            if 2 * current + 2 < self.current_size
                && self.weights[2 * current + 2] > self.weights[max_index]
            {
                max_index = 2 * current + 2;
            }
            if self.weights[max_index] > self.weights[current] {
                self.swap(current, max_index);
                current = max_index;
            } else {
                break;
            }
        }
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.weights.swap(a, b);
        self.handles.swap(a, b);
        if self.store_sequence_indexes {
            self.sequence_indexes.swap(a, b);
        }
    }

    /// Folds the current decay rate into the accumulated offset so that the
    /// relative order of held samples is unchanged by the new rate.
    pub fn set_time_decay(&mut self, new_lambda: f64, sequence_index: u64) -> Result<()> {
        check_argument(new_lambda >= 0.0, "time decay cannot be negative")?;
        check_argument(
            sequence_index >= self.last_decay_update,
            "time decay stamp moved backwards",
        )?;
        self.accumulated_decay +=
            (sequence_index - self.last_decay_update) as f64 * self.time_decay;
        self.last_decay_update = sequence_index;
        self.max_sequence_index = u64::max(self.max_sequence_index, sequence_index);
        self.time_decay = new_lambda;
        Ok(())
    }

    pub fn size(&self) -> usize {
        self.current_size
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.current_size == self.capacity
    }

    pub fn fill_fraction(&self) -> f64 {
        if self.current_size == self.capacity {
            return 1.0;
        }
        self.current_size as f64 / self.capacity as f64
    }

    pub fn max_weight(&self) -> Option<f32> {
        if self.current_size == 0 {
            None
        } else {
            Some(self.weights[0])
        }
    }

    pub fn time_decay(&self) -> f64 {
        self.time_decay
    }

    pub fn accumulated_time_decay(&self) -> f64 {
        self.accumulated_decay
    }

    pub fn handles(&self) -> impl Iterator<Item = usize> + '_ {
        self.handles[0..self.current_size].iter().map(|h| h.index())
    }

    pub fn samples(&self) -> Vec<(usize, f32)> {
        self.handles[0..self.current_size]
            .iter()
            .zip(&self.weights)
            .map(|(h, w)| (h.index(), *w))
            .collect()
    }

    pub fn stored_sequence_indexes(&self) -> Option<&[u64]> {
        if self.store_sequence_indexes {
            Some(&self.sequence_indexes[0..self.current_size])
        } else {
            None
        }
    }

    pub fn size_in_bytes(&self) -> usize {
        self.weights.len() * std::mem::size_of::<f32>()
            + self.handles.len() * std::mem::size_of::<P>()
            + self.sequence_indexes.len() * std::mem::size_of::<u64>()
            + std::mem::size_of::<TimeDecayedSampler<P>>()
    }
}
