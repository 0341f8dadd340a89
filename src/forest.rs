use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use rand_core::RngCore;
use rayon::prelude::*;

use crate::divector::DiVector;
use crate::pointstore::{PointStoreView, ShingledPointStore};
use crate::samplerplustree::SamplerPlusTree;
use crate::tree::nodeview::PathView;
use crate::types::{HandleWidth, Result};
use crate::util::{add_nbr, add_to, check_argument, divide, nbr_finish};
use crate::visitor::attributionvisitor::AttributionVisitor;
use crate::visitor::scorevisitor::ScalarScoreVisitor;
use crate::visitor::visitor::{Visitor, VisitorInfo};

/// The streaming surface of a forest: one writer feeding points, any number
/// of read-only queries in between.
pub trait RandomCutForest {
    /// Feeds one input: the point store assigns a handle, every component
    /// sees the same `(handle, sequence_index)`, and reference counts are
    /// settled afterwards on this thread.
    fn update(&mut self, point: &[f32]) -> Result<()>;

    fn score(&self, point: &[f32]) -> Result<f64>;
    fn displacement_score(&self, point: &[f32]) -> Result<f64>;
    fn generic_score(
        &self,
        point: &[f32],
        ignore_mass: usize,
        score_seen: fn(usize, usize) -> f64,
        score_unseen: fn(usize, usize) -> f64,
        damp: fn(usize, usize) -> f64,
        normalizer: fn(f64, usize) -> f64,
    ) -> Result<f64>;
    fn attribution(&self, point: &[f32]) -> Result<DiVector>;
    /// Per tree, `(score, neighbor point, distance)` for the closest
    /// retained sample at the given percentile of centrality.
    fn near_neighbor_list(&self, point: &[f32], percentile: usize)
        -> Result<Vec<(f64, Vec<f32>, f64)>>;
    /// Fills the values at `positions` (base-tuple positions under internal
    /// shingling) from the median-scored imputation across trees.
    fn impute_missing(&self, positions: &[usize], point: &[f32]) -> Result<Vec<f32>>;

    fn set_time_decay(&mut self, time_decay: f64) -> Result<()>;
    fn shingled_point(&self, point: &[f32]) -> Result<Vec<f32>>;

    fn dimensions(&self) -> usize;
    fn shingle_size(&self) -> usize;
    fn sample_size(&self) -> usize;
    fn number_of_trees(&self) -> usize;
    fn entries_seen(&self) -> u64;
    fn is_internal_shingling_enabled(&self) -> bool;
    /// Root mass of every tree, in component order.
    fn tree_masses(&self) -> Vec<usize>;
    /// Reservoir fill of every sampler, in component order.
    fn sampler_sizes(&self) -> Vec<usize>;
    fn active_points(&self) -> usize;
    fn total_reference_count(&self) -> usize;
    /// Cross-component invariants: every tree is structurally sound, each
    /// sampler holds exactly its tree's leaves, and the reference counts in
    /// the point store add up to the reservoir fills.
    fn verify_consistency(&self) -> Result<()>;
    fn point_store_size_in_bytes(&self) -> usize;
    fn size_in_bytes(&self) -> usize;
}

/// Configuration for a forest; `build` picks the narrowest index widths the
/// settings allow and hides them behind the trait object.
#[derive(Clone)]
pub struct ForestBuilder {
    dimensions: usize,
    shingle_size: usize,
    sample_size: usize,
    number_of_trees: usize,
    time_decay: Option<f64>,
    initial_accept_fraction: f64,
    random_seed: u64,
    parallel_enabled: bool,
    internal_shingling: bool,
    internal_rotation: bool,
    direct_location_map: Option<bool>,
    store_sequence_indexes: bool,
    bounding_box_cache_fraction: f64,
    output_after: Option<usize>,
}

impl ForestBuilder {
    pub fn new(dimensions: usize) -> Self {
        ForestBuilder {
            dimensions,
            shingle_size: 1,
            sample_size: 256,
            number_of_trees: 30,
            time_decay: None,
            initial_accept_fraction: 0.125,
            random_seed: 42,
            parallel_enabled: false,
            internal_shingling: false,
            internal_rotation: false,
            direct_location_map: None,
            store_sequence_indexes: false,
            bounding_box_cache_fraction: 1.0,
            output_after: None,
        }
    }

    pub fn shingle_size(mut self, shingle_size: usize) -> Self {
        self.shingle_size = shingle_size;
        self
    }

    pub fn sample_size(mut self, sample_size: usize) -> Self {
        self.sample_size = sample_size;
        self
    }

    pub fn number_of_trees(mut self, number_of_trees: usize) -> Self {
        self.number_of_trees = number_of_trees;
        self
    }

    pub fn time_decay(mut self, time_decay: f64) -> Self {
        self.time_decay = Some(time_decay);
        self
    }

    pub fn initial_accept_fraction(mut self, fraction: f64) -> Self {
        self.initial_accept_fraction = fraction;
        self
    }

    pub fn random_seed(mut self, random_seed: u64) -> Self {
        self.random_seed = random_seed;
        self
    }

    pub fn parallel_enabled(mut self, parallel_enabled: bool) -> Self {
        self.parallel_enabled = parallel_enabled;
        self
    }

    pub fn internal_shingling(mut self, internal_shingling: bool) -> Self {
        self.internal_shingling = internal_shingling;
        self
    }

    pub fn internal_rotation(mut self, internal_rotation: bool) -> Self {
        self.internal_rotation = internal_rotation;
        self
    }

    pub fn direct_location_map(mut self, direct_location_map: bool) -> Self {
        self.direct_location_map = Some(direct_location_map);
        self
    }

    pub fn store_sequence_indexes(mut self, store_sequence_indexes: bool) -> Self {
        self.store_sequence_indexes = store_sequence_indexes;
        self
    }

    pub fn bounding_box_cache_fraction(mut self, fraction: f64) -> Self {
        self.bounding_box_cache_fraction = fraction;
        self
    }

    pub fn output_after(mut self, output_after: usize) -> Self {
        self.output_after = Some(output_after);
        self
    }

    fn point_store_capacity(&self) -> usize {
        usize::max(
            self.sample_size * self.number_of_trees + 1,
            2 * self.sample_size,
        )
    }

    pub fn build(&self) -> Result<Box<dyn RandomCutForest>> {
        check_argument(self.dimensions > 0, "dimensions must be positive")?;
        check_argument(
            self.shingle_size == 1 || self.dimensions % self.shingle_size == 0,
            "shingle size must divide dimensions",
        )?;
        check_argument(self.sample_size > 1, "sample size must exceed one")?;
        check_argument(self.number_of_trees > 0, "need at least one tree")?;
        check_argument(
            !self.internal_rotation || self.internal_shingling,
            "internal shingling required for rotation",
        )?;

        let leaf_bound = self.point_store_capacity() + self.sample_size;
        if self.dimensions < u8::MAX as usize
            && self.sample_size - 1 <= u8::MAX as usize
            && leaf_bound < u16::MAX as usize
        {
            Ok(Box::new(ForestSmall::from_builder(self)?))
        } else if self.dimensions < u16::MAX as usize && self.sample_size - 1 <= u16::MAX as usize
        {
            Ok(Box::new(ForestMedium::from_builder(self)?))
        } else {
            Ok(Box::new(ForestLarge::from_builder(self)?))
        }
    }
}

/// The forest executor: a shared point store plus independent
/// sampler-and-tree components, fanned out sequentially or with rayon.
#[repr(C)]
pub struct ForestCore<C, L, P, N>
where
    C: HandleWidth,
    L: HandleWidth,
    P: HandleWidth,
    N: HandleWidth,
{
    dimensions: usize,
    shingle_size: usize,
    sample_size: usize,
    number_of_trees: usize,
    internal_shingling: bool,
    parallel_enabled: bool,
    output_after: usize,
    entries_seen: u64,
    random_seed: u64,
    components: Vec<SamplerPlusTree<C, P, N>>,
    point_store: ShingledPointStore<L>,
}

pub type ForestSmall = ForestCore<u8, usize, u16, u8>;
pub type ForestMedium = ForestCore<u16, usize, usize, u16>;
pub type ForestLarge = ForestCore<usize, usize, usize, usize>;

impl<C, L, P, N> ForestCore<C, L, P, N>
where
    C: HandleWidth,
    L: HandleWidth,
    P: HandleWidth,
    N: HandleWidth,
{
    fn from_builder(builder: &ForestBuilder) -> Result<Self> {
        let point_store_capacity = builder.point_store_capacity();
        let initial_capacity = 2 * builder.sample_size;
        let time_decay = builder
            .time_decay
            .unwrap_or(0.1 / builder.sample_size as f64);
        let output_after = builder.output_after.unwrap_or(builder.sample_size / 4);
        let direct_location_map = builder
            .direct_location_map
            .unwrap_or(builder.shingle_size == 1);

        let mut rng = ChaCha20Rng::seed_from_u64(builder.random_seed);
        let _reserved = rng.next_u64();
        let mut components = Vec::with_capacity(builder.number_of_trees);
        for _ in 0..builder.number_of_trees {
            components.push(SamplerPlusTree::<C, P, N>::new(
                builder.dimensions,
                builder.sample_size,
                time_decay,
                builder.initial_accept_fraction,
                builder.store_sequence_indexes,
                builder.bounding_box_cache_fraction,
                rng.next_u64(),
            )?);
        }
        Ok(ForestCore {
            dimensions: builder.dimensions,
            shingle_size: builder.shingle_size,
            sample_size: builder.sample_size,
            number_of_trees: builder.number_of_trees,
            internal_shingling: builder.internal_shingling,
            parallel_enabled: builder.parallel_enabled,
            output_after,
            entries_seen: 0,
            random_seed: builder.random_seed,
            components,
            point_store: ShingledPointStore::<L>::new(
                builder.dimensions,
                builder.shingle_size,
                point_store_capacity,
                initial_capacity,
                builder.internal_shingling,
                builder.internal_rotation,
                direct_location_map,
            )?,
        })
    }

    fn not_ready(&self) -> usize {
        <ShingledPointStore<L> as PointStoreView>::NOT_READY
    }

    fn expected_input_length(&self) -> usize {
        if self.internal_shingling {
            self.dimensions / self.shingle_size
        } else {
            self.dimensions
        }
    }

    /// Folds per-tree visitor results: `collect_to` accumulates each tree's
    /// answer, `finish` normalizes by the component count.
    fn simple_traversal<V, R, S>(
        &self,
        point: &[f32],
        parameters: &[usize],
        visitor_info: &VisitorInfo,
        visitor_factory: fn(usize, &[usize], &VisitorInfo) -> V,
        default: &R,
        initial: &S,
        collect_to: fn(&R, &mut S),
        finish: fn(&mut S, usize),
    ) -> Result<S>
    where
        V: Visitor<PathView, R>,
        R: Clone + Send + Sync,
        S: Clone,
    {
        check_argument(
            point.len() == self.dimensions
                || point.len() * self.shingle_size == self.dimensions,
            "invalid input length",
        )?;
        let new_point = self.point_store.shingled_point(point)?;
        let mut answer = initial.clone();
        if self.parallel_enabled {
            let list: Vec<R> = self
                .components
                .par_iter()
                .map(|m| {
                    m.traverse(
                        &new_point,
                        &self.point_store,
                        parameters,
                        visitor_info,
                        visitor_factory,
                        default,
                    )
                })
                .collect::<Result<Vec<R>>>()?;
            list.iter().for_each(|r| collect_to(r, &mut answer));
        } else {
            for m in self.components.iter() {
                let r = m.traverse(
                    &new_point,
                    &self.point_store,
                    parameters,
                    visitor_info,
                    visitor_factory,
                    default,
                )?;
                collect_to(&r, &mut answer);
            }
        }
        finish(&mut answer, self.components.len());
        Ok(answer)
    }

    fn score_traversal(&self, point: &[f32], visitor_info: &VisitorInfo) -> Result<f64> {
        if self.output_after as u64 > self.entries_seen {
            return Ok(0.0);
        }
        self.simple_traversal(
            point,
            &Vec::new(),
            visitor_info,
            ScalarScoreVisitor::create_visitor,
            &0.0,
            &0.0,
            add_to,
            divide,
        )
    }

    /// Per-tree imputation answers `(score, handle, distance)`, sorted by
    /// distance.
    fn conditional_answers(
        &self,
        positions: &[usize],
        point: &[f32],
        centrality: f64,
        visitor_info: &VisitorInfo,
    ) -> Result<Vec<(f64, usize, f64)>> {
        let new_point = self.point_store.shingled_point(point)?;
        let seed = self.random_seed;
        let mut list: Vec<(f64, usize, f64)> = if self.parallel_enabled {
            self.components
                .par_iter()
                .map(|m| {
                    m.conditional_traversal(
                        positions,
                        &new_point,
                        &self.point_store,
                        centrality,
                        seed,
                        visitor_info,
                    )
                })
                .collect::<Result<Vec<_>>>()?
        } else {
            let mut answers = Vec::with_capacity(self.components.len());
            for m in self.components.iter() {
                answers.push(m.conditional_traversal(
                    positions,
                    &new_point,
                    &self.point_store,
                    centrality,
                    seed,
                    visitor_info,
                )?);
            }
            answers
        };
        list.retain(|entry| entry.1 != usize::MAX);
        list.sort_by(|a, b| a.2.partial_cmp(&b.2).expect("distances are finite"));
        Ok(list)
    }
}

impl<C, L, P, N> RandomCutForest for ForestCore<C, L, P, N>
where
    C: HandleWidth,
    L: HandleWidth,
    P: HandleWidth,
    N: HandleWidth,
{
    fn update(&mut self, point: &[f32]) -> Result<()> {
        check_argument(
            point.len() == self.expected_input_length(),
            "invalid input length",
        )?;
        // only negative zero is rewritten; every other value is untouched
        let shifted: Vec<f32> = point
            .iter()
            .map(|x| if *x == 0.0 { 0.0 } else { *x })
            .collect();
        let sequence_index = self.entries_seen;
        let handle = self.point_store.add(&shifted, sequence_index)?;
        if handle == self.not_ready() {
            return Ok(());
        }
        let results: Vec<(usize, usize)> = if self.parallel_enabled {
            self.components
                .par_iter_mut()
                .map(|m| m.update(handle, sequence_index, &self.point_store))
                .collect::<Result<Vec<_>>>()?
        } else {
            let mut answers = Vec::with_capacity(self.components.len());
            for m in self.components.iter_mut() {
                answers.push(m.update(handle, sequence_index, &self.point_store)?);
            }
            answers
        };
        self.point_store.adjust_count(&results)?;
        // drop the coordinator's reference; accepted trees keep theirs
        self.point_store.dec(handle)?;
        self.entries_seen += 1;
        Ok(())
    }

    fn score(&self, point: &[f32]) -> Result<f64> {
        self.score_traversal(point, &VisitorInfo::default())
    }

    fn displacement_score(&self, point: &[f32]) -> Result<f64> {
        self.score_traversal(point, &VisitorInfo::displacement())
    }

    fn generic_score(
        &self,
        point: &[f32],
        ignore_mass: usize,
        score_seen: fn(usize, usize) -> f64,
        score_unseen: fn(usize, usize) -> f64,
        damp: fn(usize, usize) -> f64,
        normalizer: fn(f64, usize) -> f64,
    ) -> Result<f64> {
        self.score_traversal(
            point,
            &VisitorInfo::use_score(ignore_mass, score_seen, score_unseen, damp, normalizer),
        )
    }

    fn attribution(&self, point: &[f32]) -> Result<DiVector> {
        if self.output_after as u64 > self.entries_seen {
            return Ok(DiVector::empty(self.dimensions));
        }
        let parameters = vec![self.dimensions];
        self.simple_traversal(
            point,
            &parameters,
            &VisitorInfo::default(),
            AttributionVisitor::create_visitor,
            &DiVector::empty(self.dimensions),
            &DiVector::empty(self.dimensions),
            DiVector::add_to,
            DiVector::divide,
        )
    }

    fn near_neighbor_list(
        &self,
        point: &[f32],
        percentile: usize,
    ) -> Result<Vec<(f64, Vec<f32>, f64)>> {
        let default = (0.0f64, usize::MAX, f64::MAX);
        let parameters = vec![percentile];
        let list = self.simple_traversal(
            point,
            &parameters,
            &VisitorInfo::default(),
            crate::visitor::neighborvisitor::NeighborVisitor::create_visitor,
            &default,
            &Vec::new(),
            add_nbr,
            nbr_finish,
        )?;
        let mut answer = Vec::new();
        for entry in list.iter() {
            if entry.1 != usize::MAX {
                answer.push((entry.0, self.point_store.copy(entry.1)?, entry.2));
            }
        }
        Ok(answer)
    }

    fn impute_missing(&self, positions: &[usize], point: &[f32]) -> Result<Vec<f32>> {
        check_argument(!positions.is_empty(), "nothing to impute")?;
        check_argument(
            point.len() == self.dimensions
                || point.len() * self.shingle_size == self.dimensions,
            "invalid input length",
        )?;
        let new_positions = if point.len() == self.dimensions {
            Vec::from(positions)
        } else {
            self.point_store.missing_point_indices(0, positions)?
        };
        let answers = self.conditional_answers(
            &new_positions,
            point,
            1.0,
            &VisitorInfo::default(),
        )?;
        check_argument(!answers.is_empty(), "no samples to impute from")?;
        let median = &answers[answers.len() / 2];
        let neighbor = self.point_store.copy(median.1)?;
        Ok(new_positions.iter().map(|i| neighbor[*i]).collect())
    }

    fn set_time_decay(&mut self, time_decay: f64) -> Result<()> {
        let stamp = self.entries_seen;
        for m in self.components.iter_mut() {
            m.set_time_decay(time_decay, stamp)?;
        }
        Ok(())
    }

    fn shingled_point(&self, point: &[f32]) -> Result<Vec<f32>> {
        check_argument(
            self.internal_shingling,
            "shingled queries need internal shingling",
        )?;
        self.point_store.shingled_point(point)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn shingle_size(&self) -> usize {
        self.shingle_size
    }

    fn sample_size(&self) -> usize {
        self.sample_size
    }

    fn number_of_trees(&self) -> usize {
        self.number_of_trees
    }

    fn entries_seen(&self) -> u64 {
        self.entries_seen
    }

    fn is_internal_shingling_enabled(&self) -> bool {
        self.internal_shingling
    }

    fn tree_masses(&self) -> Vec<usize> {
        self.components.iter().map(|m| m.tree_mass()).collect()
    }

    fn sampler_sizes(&self) -> Vec<usize> {
        self.components.iter().map(|m| m.sampler_size()).collect()
    }

    fn active_points(&self) -> usize {
        self.point_store.active_points()
    }

    fn total_reference_count(&self) -> usize {
        self.point_store.total_reference_count()
    }

    fn verify_consistency(&self) -> Result<()> {
        let mut held = 0;
        for m in self.components.iter() {
            m.verify_consistency()?;
            held += m.sampler_size();
        }
        crate::util::check_state(
            held == self.point_store.total_reference_count(),
            "reference counts out of step with reservoirs",
        )?;
        Ok(())
    }

    fn point_store_size_in_bytes(&self) -> usize {
        self.point_store.size_in_bytes()
    }

    fn size_in_bytes(&self) -> usize {
        let mut total = std::mem::size_of::<ForestCore<C, L, P, N>>();
        for m in self.components.iter() {
            total += m.size_in_bytes();
        }
        total + self.point_store.size_in_bytes()
    }
}
