use num::abs;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

use crate::tree::nodeview::PathView;
use crate::types::Result;
use crate::util::{check_argument, check_state};
use crate::visitor::visitor::{MultiVisitor, Visitor, VisitorInfo};

/// Finds a representative close sample of one tree: the leaf reached by the
/// traversal, scored like the scalar score and blended with a random key by
/// `centrality`. With missing coordinates the traversal forks wherever the
/// cut dimension is unknown and the better branch survives, which turns the
/// same visitor into the imputation workhorse.
///
/// The per-branch state lives on a stack so forked branches settle
/// independently before `combine_branches` folds them.
#[repr(C)]
pub struct NeighborVisitor {
    centrality: f64,
    tree_mass: usize,
    rng: ChaCha20Rng,
    missing: Vec<usize>,
    stack: Vec<BranchElement>,
    use_shadow_box: bool,
}

#[repr(C)]
struct BranchElement {
    converged: bool,
    score: f64,
    random: f32,
    index: usize,
    distance: f64,
}

impl NeighborVisitor {
    pub fn new(missing: &[usize], centrality: f64, tree_mass: usize, seed: u64) -> Self {
        NeighborVisitor {
            tree_mass,
            centrality,
            rng: ChaCha20Rng::seed_from_u64(seed),
            missing: Vec::from(missing),
            stack: Vec::new(),
            use_shadow_box: false,
        }
    }

    /// `parameters[0]` is a percentile in `[0, 100]`, `parameters[1]` an
    /// optional seed. Extreme percentiles drop the score blend entirely.
    pub fn create_visitor(
        tree_mass: usize,
        parameters: &[usize],
        _visitor_info: &VisitorInfo,
    ) -> Self {
        let percentile = if !parameters.is_empty() {
            parameters[0]
        } else {
            50
        };
        let seed = if parameters.len() > 1 {
            parameters[1] as u64
        } else {
            0
        };
        let centrality = if !(5..=95).contains(&percentile) {
            0.0
        } else {
            1.0 - abs(1.0 - percentile as f64 / 50.0)
        };
        NeighborVisitor::new(&Vec::new(), centrality, tree_mass, seed)
    }

    /// Blends the normalized score with the branch's random key; centrality
    /// one is pure anomaly score, zero a uniformly random sample.
    fn adjusted_score(&self, element: &BranchElement, visitor_info: &VisitorInfo) -> f64 {
        self.centrality * (visitor_info.normalizer)(element.score, self.tree_mass)
            + (1.0 - self.centrality) * element.random as f64
    }
}

impl Visitor<PathView, (f64, usize, f64)> for NeighborVisitor {
    fn accept_leaf(
        &mut self,
        point: &[f32],
        visitor_info: &VisitorInfo,
        node_view: &PathView,
    ) -> Result<()> {
        let mass = node_view.mass();
        let leaf_point = node_view.leaf_point();
        let mut filled_point = Vec::from(point);
        for i in self.missing.iter() {
            filled_point[*i] = leaf_point[*i];
        }

        let mut converged = false;
        let score: f64;
        if mass > visitor_info.ignore_mass || !self.missing.is_empty() {
            if node_view.is_duplicate() {
                score = (visitor_info.damp)(mass, self.tree_mass)
                    * (visitor_info.score_seen)(node_view.depth(), mass);
                converged = true;
            } else {
                score = (visitor_info.score_unseen)(node_view.depth(), mass);
            }
        } else {
            // the shadow box is undefined under missing coordinates, which
            // is why the branch above ignores ignore_mass when imputing
            score = (visitor_info.score_unseen)(node_view.depth(), mass);
            self.use_shadow_box = true;
        }
        let distance = (visitor_info.distance)(&filled_point, leaf_point);
        self.stack.push(BranchElement {
            converged,
            score,
            index: node_view.leaf_index(),
            random: self.rng.gen::<f32>(),
            distance,
        });
        Ok(())
    }

    fn accept(
        &mut self,
        _point: &[f32],
        visitor_info: &VisitorInfo,
        node_view: &PathView,
    ) -> Result<()> {
        let mut top = match self.stack.pop() {
            Some(element) => element,
            None => {
                return Err(crate::errors::ForestError::CorruptState {
                    msg: "branch stack empty in traversal",
                })
            }
        };
        if !top.converged {
            let prob = if !self.use_shadow_box {
                node_view.probability_of_cut()
            } else {
                node_view.shadow_probability_of_cut()
            };
            if prob == 0.0 {
                top.converged = true;
            } else {
                top.score = (1.0 - prob) * top.score
                    + prob * (visitor_info.score_unseen)(node_view.depth(), node_view.mass());
            }
        }
        self.stack.push(top);
        Ok(())
    }

    fn result(&self, visitor_info: &VisitorInfo) -> Result<(f64, usize, f64)> {
        check_state(self.stack.len() == 1, "unbalanced branch stack")?;
        let top = self.stack.last().expect("nonempty by the check above");
        let score = (visitor_info.normalizer)(top.score, self.tree_mass);
        Ok((score, top.index, top.distance))
    }

    fn is_converged(&self) -> bool {
        !self.stack.is_empty() && self.stack.last().expect("nonempty").converged
    }

    fn use_shadow_box(&self) -> bool {
        self.use_shadow_box
    }
}

impl MultiVisitor<PathView, (f64, usize, f64)> for NeighborVisitor {
    fn combine_branches(
        &mut self,
        _point: &[f32],
        visitor_info: &VisitorInfo,
        _node_view: &PathView,
    ) -> Result<()> {
        check_argument(self.stack.len() >= 2, "fork returned a single branch")?;
        let top = self.stack.pop().expect("checked above");
        let next = self.stack.pop().expect("checked above");
        let either_converged = top.converged || next.converged;

        let mut winner = if self.adjusted_score(&top, visitor_info)
            < self.adjusted_score(&next, visitor_info)
        {
            top
        } else {
            next
        };
        winner.converged = either_converged;
        self.stack.push(winner);
        Ok(())
    }
}
