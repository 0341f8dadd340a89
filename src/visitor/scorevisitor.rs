use crate::tree::nodeview::PathView;
use crate::types::Result;
use crate::visitor::visitor::{Visitor, VisitorInfo};

/// Computes the classic anomaly score of one tree: the expected inverse path
/// length of the query point, damped when the point is already present and
/// mixed along the path by the probability that a random cut would have
/// separated the point earlier.
#[repr(C)]
pub struct ScalarScoreVisitor {
    tree_mass: usize,
    converged: bool,
    leaf_index: usize,
    score: f64,
    use_shadow_box: bool,
}

impl ScalarScoreVisitor {
    pub fn new(tree_mass: usize) -> Self {
        ScalarScoreVisitor {
            tree_mass,
            leaf_index: usize::MAX,
            converged: false,
            score: 0.0,
            use_shadow_box: false,
        }
    }

    pub fn create_visitor(
        tree_mass: usize,
        _parameters: &[usize],
        _visitor_info: &VisitorInfo,
    ) -> Self {
        ScalarScoreVisitor::new(tree_mass)
    }
}

impl Visitor<PathView, f64> for ScalarScoreVisitor {
    fn accept_leaf(
        &mut self,
        _point: &[f32],
        visitor_info: &VisitorInfo,
        node_view: &PathView,
    ) -> Result<()> {
        let mass = node_view.mass();
        self.leaf_index = node_view.leaf_index();
        if mass > visitor_info.ignore_mass {
            if node_view.is_duplicate() {
                self.score = (visitor_info.damp)(mass, self.tree_mass)
                    * (visitor_info.score_seen)(node_view.depth(), mass);
                self.converged = true;
            } else {
                self.score = (visitor_info.score_unseen)(node_view.depth(), mass);
            }
        } else {
            // too small to count as seen; score against the rest of the tree
            self.score = (visitor_info.score_unseen)(node_view.depth(), mass);
            self.use_shadow_box = true;
        }
        Ok(())
    }

    fn accept(
        &mut self,
        _point: &[f32],
        visitor_info: &VisitorInfo,
        node_view: &PathView,
    ) -> Result<()> {
        if !self.converged {
            let prob = if !self.use_shadow_box {
                node_view.probability_of_cut()
            } else {
                node_view.shadow_probability_of_cut()
            };
            if prob == 0.0 {
                self.converged = true;
            } else {
                self.score = (1.0 - prob) * self.score
                    + prob * (visitor_info.score_unseen)(node_view.depth(), node_view.mass());
            }
        }
        Ok(())
    }

    fn result(&self, visitor_info: &VisitorInfo) -> Result<f64> {
        Ok((visitor_info.normalizer)(self.score, self.tree_mass))
    }

    fn is_converged(&self) -> bool {
        self.converged
    }

    fn use_shadow_box(&self) -> bool {
        self.use_shadow_box
    }
}
