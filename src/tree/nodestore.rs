use std::{collections::HashMap, mem};

use crate::indexmanager::StackIndexManager;
use crate::pointstore::PointStoreView;
use crate::tree::{boundingbox::BoundingBox, cut::Cut};
use crate::types::{HandleWidth, Result};
use crate::util::{check_argument, check_state};

/// Fraction of cached boxes below which traversals maintain the box on the
/// path instead of asking the store.
const PATH_BOX_THRESHOLD: f64 = 0.5;

/// Read surface of a node store, consumed by traversal views.
pub trait NodeStore {
    fn null_node(&self) -> usize;
    fn is_leaf(&self, index: usize) -> bool;
    fn mass(&self, index: usize) -> usize;
    fn leaf_point_index(&self, index: usize) -> Result<usize>;
    fn left_index(&self, index: usize) -> usize;
    fn right_index(&self, index: usize) -> usize;
    fn sibling(&self, node: usize, parent: usize) -> usize;
    fn is_left_of(&self, index: usize, point: &[f32]) -> bool;
    fn use_path_for_box(&self) -> bool;
    /// `(cut_dimension, cut_value, left, right)`, sentinels for a leaf.
    fn cut_and_children(&self, index: usize) -> (usize, f32, usize, usize);
    fn bounding_box<PS: PointStoreView>(
        &self,
        index: usize,
        point_store: &PS,
    ) -> Result<BoundingBox>;
    fn grow_node_box<PS: PointStoreView>(
        &self,
        bounding_box: &mut BoundingBox,
        point_store: &PS,
        node: usize,
        sibling: usize,
    ) -> Result<()>;
    fn probability_of_cut<PS: PointStoreView>(
        &self,
        index: usize,
        point: &[f32],
        point_store: &PS,
    ) -> Result<f64>;
    fn probability_of_cut_with_missing_coordinates<PS: PointStoreView>(
        &self,
        index: usize,
        point: &[f32],
        missing_coordinates: &[bool],
        point_store: &PS,
    ) -> Result<f64>;
}

/// One random-cut tree as parallel columns.
///
/// `capacity` is the number of leaves (the per-tree sample size). Handles in
/// `[0, capacity - 1)` are interior nodes, `capacity - 1` is null, and a leaf
/// holding point-store handle `p` is encoded as `p + capacity`. A regular
/// binary tree with `capacity` leaves has at most `capacity - 1` interior
/// nodes, so the interior columns are exactly that long.
///
/// Every node in use has mass at least 1, so the mass column stores
/// `mass - 1` and the same compact width serves both mass and pointers. Leaf
/// masses are implicitly 1 with a hash map carrying the extra copies of
/// duplicated points.
///
/// The parent column exists only when the bounding-box cache does; without
/// the cache, upward walks use the traversal path stack instead.
#[repr(C)]
pub struct CompactNodeStore<C, P, N>
where
    C: HandleWidth,
    P: HandleWidth,
    N: HandleWidth,
{
    capacity: usize,
    dimensions: usize,
    bounding_box_cache_fraction: f64,
    parent_index: Vec<N>,
    mass: Vec<N>,
    left_index: Vec<P>,
    right_index: Vec<P>,
    cut_dimension: Vec<C>,
    cut_value: Vec<f32>,
    bounding_box_data: Vec<f32>,
    range_sum_data: Vec<f64>,
    leaf_mass_overflow: HashMap<usize, usize>,
    internal_node_manager: StackIndexManager<usize>,
}

impl<C, P, N> CompactNodeStore<C, P, N>
where
    C: HandleWidth,
    P: HandleWidth,
    N: HandleWidth,
{
    pub fn new(
        capacity: usize,
        dimensions: usize,
        bounding_box_cache_fraction: f64,
    ) -> Result<Self> {
        check_argument(capacity > 1, "a tree needs at least two leaves")?;
        check_argument(
            capacity - 1 <= N::NULL.index(),
            "node width too narrow for this capacity",
        )?;
        check_argument(
            (0.0..=1.0).contains(&bounding_box_cache_fraction),
            "cache fraction must lie in [0, 1]",
        )?;
        let cache_limit: usize = (bounding_box_cache_fraction * capacity as f64) as usize;
        let null_node = Self::null_value(capacity);
        Ok(CompactNodeStore {
            capacity,
            dimensions,
            bounding_box_cache_fraction,
            left_index: vec![P::from_index(null_node); capacity - 1],
            right_index: vec![P::from_index(null_node); capacity - 1],
            mass: vec![N::from_index(0); capacity - 1],
            parent_index: if bounding_box_cache_fraction > 0.0 {
                vec![N::from_index(null_node); capacity - 1]
            } else {
                Vec::new()
            },
            cut_value: vec![0.0; capacity - 1],
            cut_dimension: vec![C::NULL; capacity - 1],
            bounding_box_data: vec![0.0; dimensions * 2 * cache_limit],
            range_sum_data: vec![0.0; cache_limit],
            leaf_mass_overflow: HashMap::new(),
            internal_node_manager: StackIndexManager::new(capacity - 1),
        })
    }

    fn null_value(capacity: usize) -> usize {
        capacity - 1
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn leaf_index(&self, point_index: usize) -> usize {
        point_index + self.capacity
    }

    fn is_internal(&self, index: usize) -> bool {
        index != self.null_node() && index < self.capacity
    }

    /// Maps a node to its cache slot, or `usize::MAX` on a miss.
    fn translate(&self, index: usize) -> usize {
        if index != self.null_node() && self.range_sum_data.len() <= index {
            usize::MAX
        } else {
            index
        }
    }

    fn copy_box_to_cache(&mut self, index: usize, bounding_box: &BoundingBox) {
        let idx = self.translate(index);
        if idx != usize::MAX {
            let base = 2 * idx * self.dimensions;
            let mid = base + self.dimensions;
            self.bounding_box_data[base..mid].copy_from_slice(bounding_box.min_values());
            self.bounding_box_data[mid..mid + self.dimensions]
                .copy_from_slice(bounding_box.max_values());
            self.range_sum_data[idx] = bounding_box.range_sum();
        }
    }

    /// Grows the cached box to the point; returns true when the cached box
    /// already contained it (so no ancestor needs touching).
    fn check_contains_and_add_point(&mut self, index: usize, point: &[f32]) -> bool {
        let idx = self.translate(index);
        if idx != usize::MAX {
            let base = 2 * idx * self.dimensions;
            let mid = base + self.dimensions;
            let minarray = &mut self.bounding_box_data[base..mid];
            for (x, y) in minarray.iter_mut().zip(point) {
                *x = if *x > *y { *y } else { *x };
            }
            let maxarray = &mut self.bounding_box_data[mid..mid + self.dimensions];
            for (x, y) in maxarray.iter_mut().zip(point) {
                *x = if *x < *y { *y } else { *x };
            }
            let newmin = &self.bounding_box_data[base..mid];
            let newmax = &self.bounding_box_data[mid..mid + self.dimensions];
            let newsum: f64 = newmin
                .iter()
                .zip(newmax)
                .map(|(x, y)| (y - x) as f64)
                .sum();
            let unchanged = self.range_sum_data[idx] == newsum;
            self.range_sum_data[idx] = newsum;
            return unchanged;
        }
        false
    }

    fn check_strictly_contains(&self, index: usize, point: &[f32]) -> bool {
        let idx = self.translate(index);
        if idx != usize::MAX {
            let base = 2 * idx * self.dimensions;
            let mid = base + self.dimensions;
            let minarray = &self.bounding_box_data[base..mid];
            let maxarray = &self.bounding_box_data[mid..mid + self.dimensions];
            let outside = minarray
                .iter()
                .zip(point)
                .zip(maxarray)
                .any(|((x, y), z)| x >= y || y >= z);
            return !outside;
        }
        false
    }

    fn box_from_cache(&self, idx: usize) -> BoundingBox {
        let base = 2 * idx * self.dimensions;
        BoundingBox::new(
            &self.bounding_box_data[base..base + self.dimensions],
            &self.bounding_box_data[base + self.dimensions..base + 2 * self.dimensions],
        )
        .expect("cache slices share one length")
    }

    pub fn reconstruct_box<PS: PointStoreView>(
        &self,
        index: usize,
        point_store: &PS,
    ) -> Result<BoundingBox> {
        let mut bounding_box = self.bounding_box(self.left_index(index), point_store)?;
        self.grow_node_box(&mut bounding_box, point_store, index, self.right_index(index))?;
        Ok(bounding_box)
    }

    /// After a deletion the cached box may be stale; rebuild it from the
    /// children unless it still strictly contains the removed point (in
    /// which case nothing above changes either).
    fn check_contains_and_rebuild_box<PS: PointStoreView>(
        &mut self,
        index: usize,
        point: &[f32],
        point_store: &PS,
    ) -> Result<bool> {
        let idx = self.translate(index);
        if idx != usize::MAX {
            if !self.check_strictly_contains(index, point) {
                let rebuilt = self.reconstruct_box(index, point_store)?;
                self.copy_box_to_cache(index, &rebuilt);
                return Ok(false);
            }
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Creates an interior node splitting `child` (or the leaf for
    /// `point_index`) along `cut`, splicing it under `parent_index`.
    pub fn add_node(
        &mut self,
        parent_index: usize,
        point: &[f32],
        child: usize,
        point_index: usize,
        cut: Cut,
        saved_box: &BoundingBox,
    ) -> Result<usize> {
        let index = self.internal_node_manager.take().map_err(|_| {
            crate::errors::ForestError::CorruptState {
                msg: "interior nodes exhausted below leaf capacity",
            }
        })?;
        self.cut_value[index] = cut.value;
        self.cut_dimension[index] = C::from_index(cut.dimension);
        if point[cut.dimension] <= cut.value {
            self.left_index[index] = P::from_index(self.leaf_index(point_index));
            self.right_index[index] = P::from_index(child);
        } else {
            self.left_index[index] = P::from_index(child);
            self.right_index[index] = P::from_index(self.leaf_index(point_index));
        }
        // the new leaf is not counted here: the column stores mass - 1
        self.mass[index] = N::from_index(self.mass(child));
        if self.bounding_box_cache_fraction > 0.0 {
            self.copy_box_to_cache(index, saved_box);
            self.check_contains_and_add_point(index, point);
            self.parent_index[index] = N::from_index(parent_index);
            if !self.is_leaf(child) {
                self.parent_index[child] = N::from_index(index);
            }
        }
        if parent_index != self.null_node() {
            self.replace_node(parent_index, child, index);
        }
        Ok(index)
    }

    pub fn set_root(&mut self, index: usize) {
        if !self.is_leaf(index) && self.bounding_box_cache_fraction > 0.0 {
            let null_node = self.null_node();
            self.parent_index[index] = N::from_index(null_node);
        }
    }

    pub fn increase_leaf_mass(&mut self, index: usize) -> Result<()> {
        check_argument(self.is_leaf(index), "not a leaf")?;
        let point = index - self.capacity;
        *self.leaf_mass_overflow.entry(point).or_insert(0) += 1;
        Ok(())
    }

    /// Returns the remaining mass of the leaf; zero means the last copy was
    /// removed and the leaf itself must go.
    pub fn decrease_leaf_mass(&mut self, index: usize) -> Result<usize> {
        check_argument(self.is_leaf(index), "not a leaf")?;
        let point = index - self.capacity;
        if let Some(extra) = self.leaf_mass_overflow.remove(&point) {
            if extra > 1 {
                self.leaf_mass_overflow.insert(point, extra - 1);
            }
            Ok(extra)
        } else {
            Ok(0)
        }
    }

    pub fn manage_ancestors_add<PS: PointStoreView>(
        &mut self,
        path: &mut Vec<(usize, usize)>,
        point: &[f32],
        _point_store: &PS,
        box_resolved: bool,
    ) -> Result<()> {
        let mut resolved = box_resolved;
        while let Some((index, _)) = path.pop() {
            let mass = self.mass[index].index();
            self.mass[index] = N::from_index(mass + 1);
            if self.bounding_box_cache_fraction > 0.0 && !resolved {
                resolved = self.check_contains_and_add_point(index, point);
            }
        }
        Ok(())
    }

    pub fn manage_ancestors_delete<PS: PointStoreView>(
        &mut self,
        path: &mut Vec<(usize, usize)>,
        point: &[f32],
        point_store: &PS,
        box_resolved: bool,
    ) -> Result<()> {
        let mut resolved = box_resolved;
        while let Some((index, _)) = path.pop() {
            let mass = self.mass[index].index();
            check_state(mass > 0, "ancestor mass underflow")?;
            self.mass[index] = N::from_index(mass - 1);
            if self.bounding_box_cache_fraction > 0.0 && !resolved {
                resolved = self.check_contains_and_rebuild_box(index, point, point_store)?;
            }
        }
        Ok(())
    }

    pub fn delete_internal_node(&mut self, index: usize) -> Result<()> {
        let null_node = self.null_node();
        self.left_index[index] = P::from_index(null_node);
        self.right_index[index] = P::from_index(null_node);
        self.mass[index] = N::from_index(0);
        if self.bounding_box_cache_fraction > 0.0 {
            self.parent_index[index] = N::from_index(null_node);
        }
        self.cut_dimension[index] = C::NULL;
        self.cut_value[index] = 0.0;
        self.internal_node_manager.release(index)
    }

    pub fn replace_node(&mut self, grand_parent: usize, parent: usize, node: usize) {
        if parent == self.left_index[grand_parent].index() {
            self.left_index[grand_parent] = P::from_index(node);
        } else {
            self.right_index[grand_parent] = P::from_index(node);
        }
        if !self.is_leaf(node) && self.bounding_box_cache_fraction > 0.0 {
            self.parent_index[node] = N::from_index(grand_parent);
        }
    }

    /// Records the root-to-leaf path for `point` as `(node, sibling)` pairs,
    /// the leaf on top.
    pub fn set_path(&self, answer: &mut Vec<(usize, usize)>, root: usize, point: &[f32]) {
        let mut node = root;
        answer.push((root, self.null_node()));
        while !self.is_leaf(node) {
            if self.is_left_of(node, point) {
                answer.push((self.left_index[node].index(), self.right_index[node].index()));
                node = self.left_index[node].index();
            } else {
                answer.push((self.right_index[node].index(), self.left_index[node].index()));
                node = self.right_index[node].index();
            }
        }
    }

    pub fn size_in_bytes(&self) -> usize {
        self.internal_node_manager.size_in_bytes()
            + (self.left_index.len() + self.right_index.len()) * mem::size_of::<P>()
            + (self.parent_index.len() + self.mass.len()) * mem::size_of::<N>()
            + self.cut_dimension.len() * mem::size_of::<C>()
            + self.cut_value.len() * mem::size_of::<f32>()
            + self.bounding_box_data.len() * mem::size_of::<f32>()
            + self.range_sum_data.len() * mem::size_of::<f64>()
            + mem::size_of::<CompactNodeStore<C, P, N>>()
    }
}

impl<C, P, N> NodeStore for CompactNodeStore<C, P, N>
where
    C: HandleWidth,
    P: HandleWidth,
    N: HandleWidth,
{
    fn null_node(&self) -> usize {
        Self::null_value(self.capacity)
    }

    fn is_leaf(&self, index: usize) -> bool {
        index != self.null_node() && index >= self.capacity
    }

    fn mass(&self, index: usize) -> usize {
        if self.is_leaf(index) {
            let point = index - self.capacity;
            return 1 + self.leaf_mass_overflow.get(&point).copied().unwrap_or(0);
        }
        self.mass[index].index() + 1
    }

    fn leaf_point_index(&self, index: usize) -> Result<usize> {
        check_argument(self.is_leaf(index), "not a leaf")?;
        Ok(index - self.capacity)
    }

    fn left_index(&self, index: usize) -> usize {
        self.left_index[index].index()
    }

    fn right_index(&self, index: usize) -> usize {
        self.right_index[index].index()
    }

    fn sibling(&self, node: usize, parent: usize) -> usize {
        let mut sibling = self.left_index[parent].index();
        if node == sibling {
            sibling = self.right_index[parent].index();
        }
        sibling
    }

    fn is_left_of(&self, index: usize, point: &[f32]) -> bool {
        point[self.cut_dimension[index].index()] <= self.cut_value[index]
    }

    fn use_path_for_box(&self) -> bool {
        self.bounding_box_cache_fraction < PATH_BOX_THRESHOLD
    }

    fn cut_and_children(&self, index: usize) -> (usize, f32, usize, usize) {
        if self.is_internal(index) {
            (
                self.cut_dimension[index].index(),
                self.cut_value[index],
                self.left_index[index].index(),
                self.right_index[index].index(),
            )
        } else {
            (usize::MAX, f32::MAX, usize::MAX, usize::MAX)
        }
    }

    fn bounding_box<PS: PointStoreView>(
        &self,
        index: usize,
        point_store: &PS,
    ) -> Result<BoundingBox> {
        if self.is_leaf(index) {
            let point = point_store
                .reference_and_offset(self.leaf_point_index(index)?)?
                .0;
            Ok(BoundingBox::from_point(point))
        } else {
            let idx = self.translate(index);
            if idx != usize::MAX {
                return Ok(self.box_from_cache(idx));
            }
            self.reconstruct_box(index, point_store)
        }
    }

    fn grow_node_box<PS: PointStoreView>(
        &self,
        bounding_box: &mut BoundingBox,
        point_store: &PS,
        _node: usize,
        sibling: usize,
    ) -> Result<()> {
        if self.is_leaf(sibling) {
            let point = point_store
                .reference_and_offset(self.leaf_point_index(sibling)?)?
                .0;
            bounding_box.check_contains_and_add_point(point);
            Ok(())
        } else {
            let idx = self.translate(sibling);
            if idx != usize::MAX {
                let base = 2 * idx * self.dimensions;
                bounding_box.check_contains_and_add_point(
                    &self.bounding_box_data[base..base + self.dimensions],
                );
                bounding_box.check_contains_and_add_point(
                    &self.bounding_box_data[base + self.dimensions..base + 2 * self.dimensions],
                );
                Ok(())
            } else {
                self.grow_node_box(
                    bounding_box,
                    point_store,
                    sibling,
                    self.left_index(sibling),
                )?;
                self.grow_node_box(
                    bounding_box,
                    point_store,
                    sibling,
                    self.right_index(sibling),
                )
            }
        }
    }

    fn probability_of_cut<PS: PointStoreView>(
        &self,
        index: usize,
        point: &[f32],
        point_store: &PS,
    ) -> Result<f64> {
        let idx = self.translate(index);
        if idx != usize::MAX && !self.is_leaf(index) {
            let base = 2 * idx * self.dimensions;
            let mid = base + self.dimensions;
            let minsum: f32 = self.bounding_box_data[base..mid]
                .iter()
                .zip(point)
                .map(|(&x, &y)| if x - y > 0.0 { x - y } else { 0.0 })
                .sum();
            let maxsum: f32 = point
                .iter()
                .zip(&self.bounding_box_data[mid..mid + self.dimensions])
                .map(|(&x, &y)| if x - y > 0.0 { x - y } else { 0.0 })
                .sum();
            let sum = maxsum + minsum;
            if sum == 0.0 {
                return Ok(0.0);
            }
            Ok(sum as f64 / (self.range_sum_data[idx] + sum as f64))
        } else {
            let bounding_box = self.bounding_box(index, point_store)?;
            Ok(bounding_box.probability_of_cut(point))
        }
    }

    fn probability_of_cut_with_missing_coordinates<PS: PointStoreView>(
        &self,
        index: usize,
        point: &[f32],
        missing_coordinates: &[bool],
        point_store: &PS,
    ) -> Result<f64> {
        let idx = self.translate(index);
        if idx != usize::MAX && !self.is_leaf(index) {
            let base = 2 * idx * self.dimensions;
            let mid = base + self.dimensions;
            let minsum: f32 = self.bounding_box_data[base..mid]
                .iter()
                .zip(point)
                .zip(missing_coordinates)
                .map(|((&x, &y), &b)| if !b && x - y > 0.0 { x - y } else { 0.0 })
                .sum();
            let maxsum: f32 = point
                .iter()
                .zip(&self.bounding_box_data[mid..mid + self.dimensions])
                .zip(missing_coordinates)
                .map(|((&x, &y), &b)| if !b && x - y > 0.0 { x - y } else { 0.0 })
                .sum();
            let sum = maxsum + minsum;
            if sum == 0.0 {
                return Ok(0.0);
            }
            Ok(sum as f64 / (self.range_sum_data[idx] + sum as f64))
        } else {
            let bounding_box = self.bounding_box(index, point_store)?;
            Ok(bounding_box.probability_of_cut_with_missing_coordinates(point, missing_coordinates))
        }
    }
}
