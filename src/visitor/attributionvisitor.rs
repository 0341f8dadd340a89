use num::abs;

use crate::divector::DiVector;
use crate::tree::nodeview::PathView;
use crate::types::Result;
use crate::visitor::visitor::{Visitor, VisitorInfo};

/// Splits the anomaly score into per-dimension contributions above and
/// below the query point, following the same convergence rules as the
/// scalar score.
#[repr(C)]
pub struct AttributionVisitor {
    tree_mass: usize,
    converged: bool,
    leaf_index: usize,
    score: f64,
    hit_duplicate: bool,
    use_shadow_box: bool,
    attribution: DiVector,
    probability: DiVector,
}

impl AttributionVisitor {
    pub fn new(tree_mass: usize, dimensions: usize) -> Self {
        AttributionVisitor {
            tree_mass,
            leaf_index: usize::MAX,
            converged: false,
            score: 0.0,
            hit_duplicate: false,
            use_shadow_box: false,
            attribution: DiVector::empty(dimensions),
            probability: DiVector::empty(dimensions),
        }
    }

    /// `parameters[0]` carries the expected dimensions.
    pub fn create_visitor(
        tree_mass: usize,
        parameters: &[usize],
        _visitor_info: &VisitorInfo,
    ) -> Self {
        AttributionVisitor::new(tree_mass, parameters[0])
    }
}

impl Visitor<PathView, DiVector> for AttributionVisitor {
    fn accept_leaf(
        &mut self,
        point: &[f32],
        visitor_info: &VisitorInfo,
        node_view: &PathView,
    ) -> Result<()> {
        let mass = node_view.mass();
        self.leaf_index = node_view.leaf_index();
        if mass > visitor_info.ignore_mass {
            if node_view.is_duplicate() {
                self.score = (visitor_info.damp)(mass, self.tree_mass)
                    * (visitor_info.score_seen)(node_view.depth(), mass);
                self.hit_duplicate = true;
                self.use_shadow_box = true;
            } else {
                self.score = (visitor_info.score_unseen)(node_view.depth(), mass);
                node_view.assign_probability_of_cut(&mut self.probability, point)?;
                debug_assert!(abs(self.probability.total() - 1.0) < 1e-6);
                self.attribution.add_from(&self.probability, self.score);
            }
        } else {
            self.score = (visitor_info.score_unseen)(node_view.depth(), mass);
            self.use_shadow_box = true;
        }
        Ok(())
    }

    fn accept(
        &mut self,
        point: &[f32],
        visitor_info: &VisitorInfo,
        node_view: &PathView,
    ) -> Result<()> {
        if !self.converged {
            if !self.use_shadow_box {
                node_view.assign_probability_of_cut(&mut self.probability, point)?;
            } else {
                node_view.assign_shadow_probability_of_cut(&mut self.probability, point)?;
            }
            let prob = self.probability.total();
            if prob == 0.0 {
                self.converged = true;
            } else {
                let new_value = (visitor_info.score_unseen)(node_view.depth(), node_view.mass());
                if !self.hit_duplicate {
                    self.score = (1.0 - prob) * self.score + prob * new_value;
                }
                self.attribution.scale(1.0 - prob);
                self.attribution.add_from(&self.probability, new_value);
            }
        }
        Ok(())
    }

    fn result(&self, visitor_info: &VisitorInfo) -> Result<DiVector> {
        let normalized = (visitor_info.normalizer)(self.score, self.tree_mass);
        let mut answer = self.attribution.clone();
        answer.normalize(normalized);
        Ok(answer)
    }

    fn is_converged(&self) -> bool {
        self.converged
    }

    fn use_shadow_box(&self) -> bool {
        self.use_shadow_box
    }

    fn needs_box(&self) -> bool {
        true
    }
}
