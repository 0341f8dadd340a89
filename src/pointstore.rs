use std::collections::HashMap;

use crate::errors::ForestError;
use crate::indexmanager::IntervalIndexManager;
use crate::types::{HandleWidth, Result};
use crate::util::{check_argument, check_state};

/// The read-only face of the point store handed to trees and visitors.
/// Handles are plain `usize` values; ownership of the underlying point is
/// expressed exclusively through reference counts on the mutable side.
pub trait PointStoreView {
    /// Returned by `ShingledPointStore::add` while an internal shingle is
    /// still filling; callers treat it as "skip this round".
    const NOT_READY: usize = usize::MAX;

    fn dimensions(&self) -> usize;
    fn shingle_size(&self) -> usize;
    fn base_dimension(&self) -> usize {
        self.dimensions() / self.shingle_size()
    }
    fn active_points(&self) -> usize;
    fn ref_count(&self, handle: usize) -> Result<usize>;
    /// Deep copy of the stored point.
    fn copy(&self, handle: usize) -> Result<Vec<f32>>;
    /// Element-wise exact equality against the stored point.
    fn is_equal(&self, point: &[f32], handle: usize) -> Result<bool>;
    /// Borrowed storage plus the rotation offset of the stored shingle.
    fn reference_and_offset(&self, handle: usize) -> Result<(&[f32], usize)>;
    /// Expands a raw input to a full query shingle; the identity when
    /// internal shingling is off.
    fn shingled_point(&self, point: &[f32]) -> Result<Vec<f32>>;
    /// Maps base-tuple positions to positions inside the shingle emitted
    /// `look_ahead` steps from now.
    fn missing_point_indices(&self, look_ahead: usize, values: &[usize]) -> Result<Vec<usize>>;
}

/// A reference-counted arena of shingled points shared by every tree in a
/// forest. Values live in one flat `f32` buffer; a handle resolves through
/// `location` (kept in base-dimension units) unless the store is
/// direct-mapped, in which case handle `h` lives at `h * dimensions` and no
/// bookkeeping beyond the reference count exists.
///
/// With a shingled stream and indirect mapping, consecutive points usually
/// share `dimensions - base_dimension` values; `add` detects that overlap
/// and appends only the fresh base tuple. The buffer fragments as handles
/// die, so an append that would run off the end first compacts the live
/// prefix and only then grows the buffer.
#[repr(C)]
pub struct ShingledPointStore<L>
where
    L: HandleWidth,
{
    dimensions: usize,
    shingle_size: usize,
    capacity: usize,
    internal_shingling: bool,
    internal_rotation: bool,
    direct_location_map: bool,
    store: Vec<f32>,
    ref_count: Vec<u8>,
    overflow_counts: HashMap<usize, usize>,
    location: Vec<L>,
    start_free_segment: usize,
    last_shingle: Vec<f32>,
    entries_seen: u64,
    last_sequence_index: u64,
    index_manager: IntervalIndexManager<usize>,
}

impl<L> ShingledPointStore<L>
where
    L: HandleWidth,
{
    pub fn new(
        dimensions: usize,
        shingle_size: usize,
        capacity: usize,
        initial_capacity: usize,
        internal_shingling: bool,
        internal_rotation: bool,
        direct_location_map: bool,
    ) -> Result<Self> {
        check_argument(dimensions > 0, "dimensions must be positive")?;
        check_argument(shingle_size > 0, "shingle size must be positive")?;
        check_argument(
            dimensions % shingle_size == 0,
            "shingle size must divide dimensions",
        )?;
        check_argument(capacity > 0, "capacity must be positive")?;
        check_argument(
            !internal_rotation || internal_shingling,
            "rotation requires internal shingling",
        )?;
        check_argument(
            !internal_rotation || !direct_location_map,
            "rotation requires the location list",
        )?;
        let initial = usize::max(1, usize::min(initial_capacity, capacity));
        Ok(ShingledPointStore {
            dimensions,
            shingle_size,
            capacity,
            internal_shingling,
            internal_rotation,
            direct_location_map,
            store: vec![0.0; initial * dimensions],
            ref_count: vec![0; initial],
            overflow_counts: HashMap::new(),
            location: if direct_location_map {
                Vec::new()
            } else {
                vec![L::NULL; initial]
            },
            start_free_segment: 0,
            last_shingle: if internal_shingling {
                vec![0.0; dimensions]
            } else {
                Vec::new()
            },
            entries_seen: 0,
            last_sequence_index: 0,
            index_manager: IntervalIndexManager::new(initial),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_internal_shingling_enabled(&self) -> bool {
        self.internal_shingling
    }

    pub fn is_internal_rotation_enabled(&self) -> bool {
        self.internal_rotation
    }

    pub fn is_direct_location_map(&self) -> bool {
        self.direct_location_map
    }

    pub fn next_sequence_index(&self) -> u64 {
        self.entries_seen
    }

    /// Number of `f32` slots in use at the front of the buffer; gaps from
    /// dead handles are still counted until the next compaction.
    pub fn occupied_store_units(&self) -> usize {
        self.start_free_segment
    }

    pub fn size_in_bytes(&self) -> usize {
        self.store.len() * std::mem::size_of::<f32>()
            + self.location.len() * std::mem::size_of::<L>()
            + self.ref_count.len() * std::mem::size_of::<u8>()
            + self.index_manager.size_in_bytes()
            + std::mem::size_of::<ShingledPointStore<L>>()
    }

    fn max_store_units(&self) -> usize {
        if self.internal_rotation {
            2 * self.capacity * self.dimensions
        } else {
            self.capacity * self.dimensions
        }
    }

    fn inc_count(
        handle: usize,
        counts: &mut [u8],
        overflow: &mut HashMap<usize, usize>,
    ) -> Result<()> {
        check_argument(handle < counts.len(), "handle out of range at increment")?;
        if counts[handle] == u8::MAX {
            *overflow.entry(handle).or_insert(0) += 1;
        } else {
            counts[handle] += 1;
        }
        Ok(())
    }

    fn dec_count(
        handle: usize,
        counts: &mut [u8],
        overflow: &mut HashMap<usize, usize>,
    ) -> Result<()> {
        check_argument(handle < counts.len(), "handle out of range at decrement")?;
        check_state(counts[handle] != 0, "decrement of a dead handle")?;
        if let Some(extra) = overflow.remove(&handle) {
            if extra > 1 {
                overflow.insert(handle, extra - 1);
            }
        } else {
            counts[handle] -= 1;
        }
        Ok(())
    }

    /// True when the tail of the most recently written shingle equals the
    /// prefix of the incoming one, so only the fresh base tuple needs to be
    /// appended. Never true under rotation or direct mapping.
    fn shares_overlap(&self, point: &[f32]) -> bool {
        if self.shingle_size == 1 || self.direct_location_map || self.internal_rotation {
            return false;
        }
        let extra = self.dimensions - self.base_dimension();
        if self.start_free_segment < extra {
            return false;
        }
        let tail = self.start_free_segment - extra;
        (0..extra).all(|i| self.store[tail + i] == point[i])
    }

    fn base_dimension(&self) -> usize {
        self.dimensions / self.shingle_size
    }

    /// Zero padding needed so a rotated shingle lands on a
    /// dimensions-aligned address.
    fn rotation_padding(&self) -> usize {
        if self.internal_rotation {
            (self.dimensions - self.start_free_segment % self.dimensions) % self.dimensions
        } else {
            0
        }
    }

    fn grow_handle_columns(&mut self) -> Result<()> {
        check_state(
            self.ref_count.len() == self.index_manager.capacity(),
            "handle columns out of step with index manager",
        )?;
        let old = self.ref_count.len();
        if old >= self.capacity {
            return Err(ForestError::CapacityExhausted {
                msg: "point store is at configured capacity",
            });
        }
        let new_size = usize::min(self.capacity, old + usize::max(1, old / 5));
        self.ref_count.resize(new_size, 0);
        if !self.direct_location_map {
            self.location.resize(new_size, L::NULL);
        } else {
            self.store.resize(new_size * self.dimensions, 0.0);
        }
        self.index_manager.grow(new_size)
    }

    // the padding is recomputed after compaction moves start_free_segment
    fn ensure_store_room(&mut self) -> Result<()> {
        let needed = self.rotation_padding() + self.dimensions;
        if self.start_free_segment + needed <= self.store.len() {
            return Ok(());
        }
        self.compact()?;
        let needed = self.rotation_padding() + self.dimensions;
        while self.start_free_segment + needed > self.store.len() {
            if self.store.len() >= self.max_store_units() {
                return Err(ForestError::CapacityExhausted {
                    msg: "point store buffer cannot grow further",
                });
            }
            let new_size = usize::min(
                self.max_store_units(),
                self.store.len() + usize::max(self.dimensions, self.store.len() / 5),
            );
            self.store.resize(new_size, 0.0);
        }
        Ok(())
    }

    /// Adds a point to the store with `ref_count == 1`. When internal
    /// shingling is on, `point` is one base tuple and `NOT_READY` is
    /// returned until a full shingle has been assembled. `sequence_index`
    /// must be non-decreasing across calls.
    pub fn add(&mut self, point: &[f32], sequence_index: u64) -> Result<usize> {
        check_argument(
            self.entries_seen == 0 || sequence_index >= self.last_sequence_index,
            "sequence index moved backwards",
        )?;
        self.last_sequence_index = sequence_index;
        let base = self.base_dimension();

        if self.internal_shingling {
            check_argument(point.len() == base, "expected one base tuple")?;
            if self.internal_rotation {
                let offset = (self.entries_seen as usize * base) % self.dimensions;
                self.last_shingle[offset..offset + base].copy_from_slice(point);
            } else {
                for i in 0..(self.dimensions - base) {
                    self.last_shingle[i] = self.last_shingle[i + base];
                }
                self.last_shingle[self.dimensions - base..].copy_from_slice(point);
            }
            self.entries_seen += 1;
            if self.entries_seen < self.shingle_size as u64 {
                return Ok(Self::NOT_READY);
            }
        } else {
            check_argument(point.len() == self.dimensions, "incorrect point length")?;
            self.entries_seen += 1;
        }

        if self.direct_location_map {
            return self.add_direct(point);
        }

        // all growth and compaction happens before a handle is taken, so a
        // failed add leaves no trace
        self.ensure_store_room()?;
        if self.index_manager.is_exhausted() {
            self.grow_handle_columns()?;
        }

        let position = self.index_manager.take()?;
        check_state(self.ref_count[position] == 0, "fresh handle already live")?;

        let new_point: &[f32] = if self.internal_shingling {
            &self.last_shingle
        } else {
            point
        };
        if self.shares_overlap(new_point) {
            let extra = self.dimensions - base;
            let index = self.start_free_segment;
            self.location[position] = L::from_index((index - extra) / base);
            self.store[index..index + base].copy_from_slice(&new_point[extra..]);
            self.start_free_segment += base;
        } else {
            for _ in 0..self.rotation_padding() {
                self.store[self.start_free_segment] = 0.0;
                self.start_free_segment += 1;
            }
            let index = self.start_free_segment;
            self.location[position] = L::from_index(index / base);
            self.store[index..index + self.dimensions].copy_from_slice(new_point);
            self.start_free_segment += self.dimensions;
        }
        self.ref_count[position] = 1;
        Ok(position)
    }

    fn add_direct(&mut self, point: &[f32]) -> Result<usize> {
        if self.index_manager.is_exhausted() {
            self.grow_handle_columns()?;
        }
        let position = self.index_manager.take()?;
        check_state(self.ref_count[position] == 0, "fresh handle already live")?;
        let address = position * self.dimensions;
        let new_point: &[f32] = if self.internal_shingling {
            &self.last_shingle
        } else {
            point
        };
        self.store[address..address + self.dimensions].copy_from_slice(new_point);
        self.ref_count[position] = 1;
        Ok(position)
    }

    pub fn inc(&mut self, handle: usize) -> Result<usize> {
        Self::inc_count(handle, &mut self.ref_count, &mut self.overflow_counts)?;
        self.ref_count(handle)
    }

    /// Drops one reference; the handle is destroyed exactly when the count
    /// reaches zero, and its address becomes infeasible.
    pub fn dec(&mut self, handle: usize) -> Result<usize> {
        Self::dec_count(handle, &mut self.ref_count, &mut self.overflow_counts)?;
        if self.ref_count[handle] == 0 {
            self.index_manager.release(handle)?;
            if !self.direct_location_map {
                self.location[handle] = L::NULL;
            }
            return Ok(0);
        }
        self.ref_count(handle)
    }

    /// Applies the (added, deleted) handle pairs reported by the per-tree
    /// updates. Runs on the writer after the tree phase, which keeps every
    /// reference-count mutation serial.
    pub fn adjust_count(&mut self, results: &[(usize, usize)]) -> Result<()> {
        for (added, deleted) in results {
            if *added != Self::NOT_READY {
                self.inc(*added)?;
                if *deleted != Self::NOT_READY {
                    self.dec(*deleted)?;
                }
            }
        }
        Ok(())
    }

    pub fn total_reference_count(&self) -> usize {
        let mut total: usize = self.ref_count.iter().map(|c| *c as usize).sum();
        total += self.overflow_counts.values().sum::<usize>();
        total
    }

    /// Rewrites the live shingles into a dense prefix, preserving overlap
    /// sharing inside each contiguous block and the rotation alignment of
    /// every block start. A no-op for direct-mapped stores.
    pub fn compact(&mut self) -> Result<()> {
        if self.direct_location_map {
            return Ok(());
        }
        let base = self.base_dimension();
        let mut reverse_reference: Vec<(usize, usize)> = Vec::new();
        for i in 0..self.location.len() {
            if !self.location[i].is_null() {
                reverse_reference.push((self.location[i].index(), i));
            }
        }
        reverse_reference.sort();
        let mut fresh_start: usize = 0;
        let mut j_static: usize = 0;
        let mut j_dynamic: usize;
        let end: usize = reverse_reference.len();
        while j_static < end {
            let block_start: usize = reverse_reference[j_static].0 * base;
            let mut block_end: usize = block_start + self.dimensions;
            let alignment_pad = if self.internal_rotation {
                (self.dimensions - fresh_start % self.dimensions + block_start) % self.dimensions
            } else {
                0
            };

            let mut k = j_static + 1;
            j_dynamic = j_static + 1;
            while k < end {
                let next_element: usize = base * reverse_reference[k].0;
                if block_end >= next_element {
                    k += 1;
                    j_dynamic += 1;
                    if block_end < next_element + self.dimensions {
                        block_end = next_element + self.dimensions;
                    }
                } else {
                    k = end;
                }
            }

            for _ in 0..alignment_pad {
                self.store[fresh_start] = 0.0;
                fresh_start += 1;
            }

            for i in block_start..block_end {
                self.store[fresh_start] = self.store[i];
                check_state(
                    !self.internal_rotation
                        || fresh_start % self.dimensions == i % self.dimensions,
                    "rotation alignment lost in compaction",
                )?;
                if j_static < end {
                    let location: usize = reverse_reference[j_static].0;
                    if i == base * location {
                        let handle: usize = reverse_reference[j_static].1;
                        self.location[handle] = L::from_index(fresh_start / base);
                        j_static += 1;
                    }
                }
                fresh_start += 1;
            }

            check_state(j_static == j_dynamic, "compaction lost a live handle")?;
        }
        self.start_free_segment = fresh_start;
        Ok(())
    }
}

impl<L> PointStoreView for ShingledPointStore<L>
where
    L: HandleWidth,
{
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn shingle_size(&self) -> usize {
        self.shingle_size
    }

    fn active_points(&self) -> usize {
        self.index_manager.occupied()
    }

    fn ref_count(&self, handle: usize) -> Result<usize> {
        check_argument(handle < self.ref_count.len(), "handle out of range")?;
        let extra = self.overflow_counts.get(&handle).copied().unwrap_or(0);
        Ok(self.ref_count[handle] as usize + extra)
    }

    fn copy(&self, handle: usize) -> Result<Vec<f32>> {
        let (reference, offset) = self.reference_and_offset(handle)?;
        let mut new_point = vec![0.0; self.dimensions];
        if self.internal_rotation {
            for i in 0..self.dimensions {
                new_point[(i + offset) % self.dimensions] = reference[i];
            }
        } else {
            new_point.copy_from_slice(reference);
        }
        Ok(new_point)
    }

    fn is_equal(&self, point: &[f32], handle: usize) -> Result<bool> {
        check_argument(point.len() == self.dimensions, "incorrect point length")?;
        let (reference, offset) = self.reference_and_offset(handle)?;
        if self.internal_rotation {
            for i in 0..self.dimensions {
                if point[(i + offset) % self.dimensions] != reference[i] {
                    return Ok(false);
                }
            }
            Ok(true)
        } else {
            Ok(point.eq(reference))
        }
    }

    fn reference_and_offset(&self, handle: usize) -> Result<(&[f32], usize)> {
        check_argument(handle < self.ref_count.len(), "handle out of range")?;
        check_state(self.ref_count[handle] != 0, "handle not in use")?;
        let address = if self.direct_location_map {
            handle * self.dimensions
        } else {
            self.location[handle].index() * self.base_dimension()
        };
        let offset = if self.internal_rotation {
            address % self.dimensions
        } else {
            0
        };
        Ok((&self.store[address..address + self.dimensions], offset))
    }

    fn shingled_point(&self, point: &[f32]) -> Result<Vec<f32>> {
        let base = self.base_dimension();
        if point.len() == self.dimensions {
            return Ok(Vec::from(point));
        }
        check_argument(
            self.internal_shingling && point.len() == base,
            "expected a full shingle or one base tuple with internal shingling",
        )?;
        let mut new_point = self.last_shingle.clone();
        if self.internal_rotation {
            let offset = (self.entries_seen as usize * base) % self.dimensions;
            new_point[offset..offset + base].copy_from_slice(point);
        } else {
            for i in 0..(self.dimensions - base) {
                new_point[i] = self.last_shingle[i + base];
            }
            new_point[self.dimensions - base..].copy_from_slice(point);
        }
        Ok(new_point)
    }

    fn missing_point_indices(&self, look_ahead: usize, values: &[usize]) -> Result<Vec<usize>> {
        if !self.internal_shingling {
            for v in values {
                check_argument(*v < self.dimensions, "position beyond dimensions")?;
            }
            return Ok(Vec::from(values));
        }
        let base = self.base_dimension();
        let mut answer = Vec::new();
        for v in values {
            check_argument(*v < base, "position beyond base dimension")?;
            if self.internal_rotation {
                answer.push(
                    ((self.entries_seen as usize + look_ahead) * base + v) % self.dimensions,
                );
            } else {
                answer.push(self.dimensions - base + v);
            }
        }
        Ok(answer)
    }
}
