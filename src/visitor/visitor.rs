use crate::types::Result;
use crate::util::l1distance;

// the standard scoring functions; expected inverse path length for seen and
// unseen points, with log-mass damping

pub(crate) fn score_seen(depth: usize, mass: usize) -> f64 {
    1.0 / (depth as f64 + f64::log2(1.0 + mass as f64))
}

pub(crate) fn score_unseen(depth: usize, _mass: usize) -> f64 {
    1.0 / (depth as f64 + 1.0)
}

pub(crate) fn normalizer(score: f64, mass: usize) -> f64 {
    score * f64::log2(1.0 + mass as f64)
}

pub(crate) fn damp(leaf_mass: usize, tree_mass: usize) -> f64 {
    1.0 - (leaf_mass as f64) / (2.0 * tree_mass as f64)
}

// the displacement variants measure the mass displaced by the point rather
// than path length; seen and unseen are deliberately close because density
// style uses care about similarity, not novelty

pub(crate) fn score_seen_displacement(_depth: usize, mass: usize) -> f64 {
    1.0 / (1.0 + mass as f64)
}

pub(crate) fn score_unseen_displacement(_depth: usize, mass: usize) -> f64 {
    mass as f64
}

pub(crate) fn displacement_normalizer(score: f64, mass: usize) -> f64 {
    score * 1.0 / (1.0 + mass as f64)
}

/// The tunable pieces of a traversal, as plain function pointers so a
/// visitor stays `Send` and a forest can fan the same recipe across trees.
#[repr(C)]
pub struct VisitorInfo {
    pub ignore_mass: usize,
    pub score_seen: fn(usize, usize) -> f64,
    pub score_unseen: fn(usize, usize) -> f64,
    pub damp: fn(usize, usize) -> f64,
    pub normalizer: fn(f64, usize) -> f64,
    pub distance: fn(&[f32], &[f32]) -> f64,
}

impl VisitorInfo {
    pub fn default() -> Self {
        VisitorInfo {
            ignore_mass: 0,
            score_seen,
            score_unseen,
            damp,
            normalizer,
            distance: l1distance,
        }
    }

    pub fn displacement() -> Self {
        VisitorInfo {
            ignore_mass: 0,
            score_seen: score_seen_displacement,
            score_unseen: score_unseen_displacement,
            damp: identity_damp,
            normalizer: displacement_normalizer,
            distance: l1distance,
        }
    }

    pub fn use_score(
        ignore_mass: usize,
        score_seen: fn(usize, usize) -> f64,
        score_unseen: fn(usize, usize) -> f64,
        damp: fn(usize, usize) -> f64,
        normalizer: fn(f64, usize) -> f64,
    ) -> Self {
        VisitorInfo {
            ignore_mass,
            score_seen,
            score_unseen,
            damp,
            normalizer,
            distance: l1distance,
        }
    }

    pub fn use_distance(distance: fn(&[f32], &[f32]) -> f64) -> Self {
        VisitorInfo {
            ignore_mass: 0,
            score_seen,
            score_unseen,
            damp,
            normalizer,
            distance,
        }
    }
}

fn identity_damp(_leaf_mass: usize, _tree_mass: usize) -> f64 {
    1.0
}

/// A bottom-up traversal: the leaf is accepted first, then every ancestor on
/// the way back to the root; `result` reads the final value.
pub trait Visitor<NodeView, R> {
    fn accept_leaf(
        &mut self,
        point: &[f32],
        visitor_info: &VisitorInfo,
        node_view: &NodeView,
    ) -> Result<()>;
    fn accept(
        &mut self,
        point: &[f32],
        visitor_info: &VisitorInfo,
        node_view: &NodeView,
    ) -> Result<()>;
    fn result(&self, visitor_info: &VisitorInfo) -> Result<R>;
    fn is_converged(&self) -> bool;
    /// True once the visitor wants the sibling boxes of the remaining path
    /// merged into a shadow box (mass-ignoring scores).
    fn use_shadow_box(&self) -> bool {
        false
    }
    /// True when the visitor reads the merged path box itself, forcing the
    /// view to maintain it even when the cache could serve probabilities.
    fn needs_box(&self) -> bool {
        false
    }
}

/// A visitor that can follow both children where a traversal forks, folding
/// the two branch results into one.
pub trait MultiVisitor<NodeView, R>: Visitor<NodeView, R> {
    fn combine_branches(
        &mut self,
        point: &[f32],
        visitor_info: &VisitorInfo,
        node_view: &NodeView,
    ) -> Result<()>;
}
