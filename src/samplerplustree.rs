use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use rand_core::RngCore;

use crate::pointstore::PointStoreView;
use crate::sampler::TimeDecayedSampler;
use crate::tree::nodeview::PathView;
use crate::tree::randomcuttree::RandomCutTree;
use crate::types::{HandleWidth, Result};
use crate::visitor::visitor::{Visitor, VisitorInfo};

/// The no-op result of an update round: nothing added, nothing deleted.
const SKIP: (usize, usize) = (usize::MAX, usize::MAX);

/// One sampler coupled to one tree, kept mutually consistent: every handle
/// the sampler holds has exactly one leaf in the tree, and each such
/// holding contributes one reference in the point store.
///
/// The component never touches reference counts itself; it reports the
/// (added, deleted) handle pair of each round and the forest settles the
/// counts on the writer thread afterwards.
#[repr(C)]
pub struct SamplerPlusTree<C, P, N>
where
    C: HandleWidth,
    P: HandleWidth,
    N: HandleWidth,
{
    tree: RandomCutTree<C, P, N>,
    sampler: TimeDecayedSampler<P>,
}

impl<C, P, N> SamplerPlusTree<C, P, N>
where
    C: HandleWidth,
    P: HandleWidth,
    N: HandleWidth,
{
    pub fn new(
        dimensions: usize,
        sample_size: usize,
        time_decay: f64,
        initial_accept_fraction: f64,
        store_sequence_indexes: bool,
        bounding_box_cache_fraction: f64,
        random_seed: u64,
    ) -> Result<Self> {
        let mut rng = ChaCha20Rng::seed_from_u64(random_seed);
        let sampler_seed = rng.next_u64();
        let tree_seed = rng.next_u64();
        Ok(SamplerPlusTree {
            tree: RandomCutTree::<C, P, N>::new(
                dimensions,
                sample_size,
                bounding_box_cache_fraction,
                tree_seed,
            )?,
            sampler: TimeDecayedSampler::new(
                sample_size,
                time_decay,
                initial_accept_fraction,
                store_sequence_indexes,
                sampler_seed,
            )?,
        })
    }

    /// Runs one stream round: the sampler decides, the tree follows.
    /// Returns the (added, deleted) handle pair for the forest's deferred
    /// reference-count settlement; both are sentinels when the point was
    /// rejected or not ready.
    pub fn update<PS: PointStoreView>(
        &mut self,
        point_index: usize,
        sequence_index: u64,
        point_store: &PS,
    ) -> Result<(usize, usize)> {
        if point_index == PS::NOT_READY {
            return Ok(SKIP);
        }
        let token = match self.sampler.offer(sequence_index)? {
            Some(token) => token,
            None => return Ok(SKIP),
        };

        let evicted = if token.evicts() {
            Some(self.sampler.evict_max()?)
        } else {
            None
        };

        let deleted_ref = match evicted {
            Some(sample) => {
                match self
                    .tree
                    .delete(sample.handle, sample.sequence_index, point_store)
                {
                    Ok(handle) => handle,
                    Err(error) => {
                        // the reservoir still owns the sample; put it back
                        // before surfacing the failure
                        self.sampler.readmit(sample)?;
                        return Err(error);
                    }
                }
            }
            None => usize::MAX,
        };

        // the tree may hand back an existing leaf's handle when the point
        // is a duplicate; that handle is what the sampler must own
        let added_ref = match self.tree.add(point_index, sequence_index, point_store) {
            Ok(handle) => handle,
            Err(error) => {
                if let Some(sample) = evicted {
                    self.tree
                        .add(sample.handle, sample.sequence_index, point_store)?;
                    self.sampler.readmit(sample)?;
                }
                return Err(error);
            }
        };
        self.sampler.commit(token, added_ref)?;
        Ok((added_ref, deleted_ref))
    }

    pub fn set_time_decay(&mut self, time_decay: f64, sequence_index: u64) -> Result<()> {
        self.sampler.set_time_decay(time_decay, sequence_index)
    }

    pub fn traverse<PS, V, R>(
        &self,
        point: &[f32],
        point_store: &PS,
        parameters: &[usize],
        visitor_info: &VisitorInfo,
        visitor_factory: fn(usize, &[usize], &VisitorInfo) -> V,
        default: &R,
    ) -> Result<R>
    where
        PS: PointStoreView,
        V: Visitor<PathView, R>,
        R: Clone,
    {
        self.tree.traverse(
            point,
            parameters,
            visitor_factory,
            visitor_info,
            point_store,
            default,
        )
    }

    pub fn conditional_traversal<PS: PointStoreView>(
        &self,
        missing: &[usize],
        point: &[f32],
        point_store: &PS,
        centrality: f64,
        seed: u64,
        visitor_info: &VisitorInfo,
    ) -> Result<(f64, usize, f64)> {
        self.tree
            .conditional_traversal(missing, point, point_store, centrality, seed, visitor_info)
    }

    pub fn sampler_size(&self) -> usize {
        self.sampler.size()
    }

    pub fn sample_handles(&self) -> Vec<usize> {
        self.sampler.handles().collect()
    }

    pub fn tree_mass(&self) -> usize {
        self.tree.mass()
    }

    pub fn tree_leaves(&self) -> Vec<(usize, usize)> {
        self.tree.leaves()
    }

    /// Structural and coupling invariants: the tree is internally sound and
    /// the sampler's multiset of handles equals the tree's leaf multiset.
    pub fn verify_consistency(&self) -> Result<()> {
        self.tree.verify_structure()?;
        let mut sampled = self.sample_handles();
        sampled.sort_unstable();
        let mut leaves = Vec::new();
        for (handle, mass) in self.tree.leaves() {
            for _ in 0..mass {
                leaves.push(handle);
            }
        }
        leaves.sort_unstable();
        crate::util::check_state(sampled == leaves, "sampler and tree hold different points")?;
        Ok(())
    }

    pub fn size_in_bytes(&self) -> usize {
        self.tree.size_in_bytes()
            + self.sampler.size_in_bytes()
            + std::mem::size_of::<SamplerPlusTree<C, P, N>>()
    }
}
