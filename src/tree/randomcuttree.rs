use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use rand_core::RngCore;

use crate::errors::ForestError;
use crate::pointstore::PointStoreView;
use crate::tree::{
    boundingbox::BoundingBox,
    cut::Cut,
    nodestore::{CompactNodeStore, NodeStore},
    nodeview::PathView,
};
use crate::types::{HandleWidth, Result};
use crate::util::{check_argument, check_state};
use crate::visitor::neighborvisitor::NeighborVisitor;
use crate::visitor::visitor::{MultiVisitor, Visitor, VisitorInfo};

/// One random-cut tree over point-store handles.
///
/// The tree owns only its node store and a chained random seed; points are
/// read through the shared store view. Leaves hold handles, interior nodes
/// hold cuts, and every structural change flows through `add` and `delete`.
#[repr(C)]
pub struct RandomCutTree<C, P, N>
where
    C: HandleWidth,
    P: HandleWidth,
    N: HandleWidth,
{
    dimensions: usize,
    capacity: usize,
    node_store: CompactNodeStore<C, P, N>,
    random_seed: u64,
    root: usize,
    tree_mass: usize,
}

impl<C, P, N> RandomCutTree<C, P, N>
where
    C: HandleWidth,
    P: HandleWidth,
    N: HandleWidth,
{
    pub fn new(
        dimensions: usize,
        capacity: usize,
        bounding_box_cache_fraction: f64,
        random_seed: u64,
    ) -> Result<Self> {
        let node_store =
            CompactNodeStore::<C, P, N>::new(capacity, dimensions, bounding_box_cache_fraction)?;
        let root = node_store.null_node();
        Ok(RandomCutTree {
            dimensions,
            capacity,
            node_store,
            random_seed,
            root,
            tree_mass: 0,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.root == self.node_store.null_node()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn mass(&self) -> usize {
        self.tree_mass
    }

    /// Inserts the point at `point_index`. Returns the handle the tree
    /// actually holds, which is the handle of an existing leaf when the new
    /// point duplicates it; the caller owns the reference-count
    /// consequences. The sequence index travels with the call for parity
    /// with `delete`, the structure itself is order-free.
    pub fn add<PS: PointStoreView>(
        &mut self,
        point_index: usize,
        _sequence_index: u64,
        point_store: &PS,
    ) -> Result<usize> {
        if self.is_empty() {
            self.root = self.node_store.leaf_index(point_index);
            self.tree_mass = 1;
            return Ok(point_index);
        }

        let point = &point_store.copy(point_index)?;
        let mut path_to_root = Vec::new();
        self.node_store.set_path(&mut path_to_root, self.root, point);
        let (mut node, mut sibling) = path_to_root.pop().expect("path includes the leaf");

        let leaf_point_index = self.node_store.leaf_point_index(node)?;
        let old_point = &point_store.copy(leaf_point_index)?;

        self.tree_mass += 1;
        if point.eq(old_point) {
            self.node_store.increase_leaf_mass(node)?;
            self.node_store
                .manage_ancestors_add(&mut path_to_root, point, point_store, true)?;
            return Ok(leaf_point_index);
        }

        let mut saved_parent = match path_to_root.last() {
            Some(entry) => entry.0,
            None => self.node_store.null_node(),
        };
        let mut saved_node = node;
        let mut current_box = BoundingBox::from_point(old_point);
        let mut saved_box = current_box.clone();
        let mut parent_path: Vec<(usize, usize)> = Vec::new();
        let mut rng = ChaCha20Rng::seed_from_u64(self.random_seed);
        self.random_seed = rng.next_u64();

        let mut parent = saved_parent;
        let mut saved_cut: Option<Cut> = None;
        // walk to the root, remembering the highest separating cut; the
        // first iteration always separates because the leaf box is a point
        loop {
            let factor: f64 = rng.gen();
            match Cut::separating(&current_box, factor, point) {
                Some(cut) => {
                    saved_cut = Some(cut);
                    saved_parent = parent;
                    saved_node = node;
                    saved_box = current_box.clone();
                    parent_path.clear();
                }
                None => parent_path.push((node, sibling)),
            }
            check_state(saved_cut.is_some(), "no separating cut found")?;

            if parent == self.node_store.null_node() {
                break;
            }
            self.node_store
                .grow_node_box(&mut current_box, point_store, parent, sibling)?;
            let (next_node, next_sibling) = path_to_root.pop().expect("parent is on the path");
            node = next_node;
            sibling = next_sibling;
            parent = match path_to_root.last() {
                Some(entry) => entry.0,
                None => self.node_store.null_node(),
            };
        }

        if saved_parent != self.node_store.null_node() {
            while let Some(entry) = parent_path.pop() {
                path_to_root.push(entry);
            }
            check_state(
                path_to_root.last().expect("nonempty by construction").0 == saved_parent,
                "insertion path out of order",
            )?;
        } else {
            check_state(path_to_root.is_empty(), "insertion path out of order")?;
        }

        let cut = saved_cut.ok_or(ForestError::CorruptState {
            msg: "no separating cut found",
        })?;
        let merged_node = self.node_store.add_node(
            saved_parent,
            point,
            saved_node,
            point_index,
            cut,
            &saved_box,
        )?;

        if saved_parent != self.node_store.null_node() {
            self.node_store
                .manage_ancestors_add(&mut path_to_root, point, point_store, false)?;
        } else {
            self.root = merged_node;
        }
        Ok(point_index)
    }

    /// Removes one copy of the point at `point_index`, locating the leaf by
    /// value. Deleting a point that is not in the tree corrupts nothing and
    /// reports `InvalidArgument`.
    pub fn delete<PS: PointStoreView>(
        &mut self,
        point_index: usize,
        _sequence_index: u64,
        point_store: &PS,
    ) -> Result<usize> {
        check_argument(!self.is_empty(), "deleting from an empty tree")?;

        let point = &point_store.copy(point_index)?;
        let mut leaf_path = Vec::new();
        self.node_store.set_path(&mut leaf_path, self.root, point);
        let (leaf_node, leaf_saved_sibling) = leaf_path.pop().expect("path includes the leaf");

        let leaf_point_index = self.node_store.leaf_point_index(leaf_node)?;
        if leaf_point_index != point_index && !point_store.is_equal(point, leaf_point_index)? {
            return Err(ForestError::InvalidArgument {
                msg: "point absent from this tree",
            });
        }

        self.tree_mass -= 1;
        if self.node_store.decrease_leaf_mass(leaf_node)? == 0 {
            if leaf_path.is_empty() {
                self.root = self.node_store.null_node();
            } else {
                let (parent, _sibling) = leaf_path.pop().expect("checked nonempty");
                let grand_parent = match leaf_path.last() {
                    Some(entry) => entry.0,
                    None => self.node_store.null_node(),
                };

                if grand_parent == self.node_store.null_node() {
                    self.root = leaf_saved_sibling;
                    self.node_store.set_root(self.root);
                } else {
                    self.node_store
                        .replace_node(grand_parent, parent, leaf_saved_sibling);
                    self.node_store.manage_ancestors_delete(
                        &mut leaf_path,
                        point,
                        point_store,
                        false,
                    )?;
                }

                self.node_store.delete_internal_node(parent)?;
            }
        } else {
            self.node_store
                .manage_ancestors_delete(&mut leaf_path, point, point_store, true)?;
        }
        Ok(leaf_point_index)
    }

    /// Bottom-up visitor traversal along the cut path of `point`.
    pub fn traverse<PS, V, R>(
        &self,
        point: &[f32],
        parameters: &[usize],
        visitor_factory: fn(usize, &[usize], &VisitorInfo) -> V,
        visitor_info: &VisitorInfo,
        point_store: &PS,
        default: &R,
    ) -> Result<R>
    where
        PS: PointStoreView,
        V: Visitor<PathView, R>,
        R: Clone,
    {
        if self.is_empty() {
            return Ok(default.clone());
        }
        let mut visitor = visitor_factory(self.tree_mass, parameters, visitor_info);
        let mut node_view = PathView::new(self.root, &self.node_store, visitor.needs_box());
        self.traverse_recursive(point, &mut node_view, &mut visitor, visitor_info, point_store)?;
        visitor.result(visitor_info)
    }

    fn traverse_recursive<PS, V, R>(
        &self,
        point: &[f32],
        node_view: &mut PathView,
        visitor: &mut V,
        visitor_info: &VisitorInfo,
        point_store: &PS,
    ) -> Result<()>
    where
        PS: PointStoreView,
        V: Visitor<PathView, R>,
    {
        let current_node = node_view.current_node();
        if self.node_store.is_leaf(current_node) {
            node_view.update_at_leaf(point, current_node, &self.node_store, point_store)?;
            visitor.accept_leaf(point, visitor_info, node_view)?;
            if visitor.use_shadow_box() {
                node_view.set_use_shadow_box(&self.node_store, point_store)?;
            }
        } else {
            node_view.update_traversing_down(point, &self.node_store);
            self.traverse_recursive(point, node_view, visitor, visitor_info, point_store)?;
            if !visitor.is_converged() {
                node_view.update_traversing_up(point, current_node, &self.node_store, point_store)?;
                visitor.accept(point, visitor_info, node_view)?;
            }
        }
        Ok(())
    }

    /// Near-neighbor / imputation query: forks wherever the cut dimension is
    /// flagged missing and lets the visitor keep the better branch. Returns
    /// `(score, point_handle, distance)`.
    pub fn conditional_traversal<PS: PointStoreView>(
        &self,
        missing: &[usize],
        point: &[f32],
        point_store: &PS,
        centrality: f64,
        seed: u64,
        visitor_info: &VisitorInfo,
    ) -> Result<(f64, usize, f64)> {
        if self.is_empty() {
            return Ok((0.0, usize::MAX, 0.0));
        }
        for position in missing {
            check_argument(*position < self.dimensions, "position beyond dimensions")?;
        }
        let mut visitor = NeighborVisitor::new(missing, centrality, self.tree_mass, seed);
        let mut node_view = PathView::new(self.root, &self.node_store, false);
        let mut missing_coordinates = vec![false; self.dimensions];
        for position in missing.iter() {
            missing_coordinates[*position] = true;
        }
        self.traverse_multi_recursive(
            point,
            &mut node_view,
            &mut visitor,
            visitor_info,
            &missing_coordinates,
            point_store,
        )?;
        visitor.result(visitor_info)
    }

    fn traverse_multi_recursive<PS, V, R>(
        &self,
        point: &[f32],
        node_view: &mut PathView,
        visitor: &mut V,
        visitor_info: &VisitorInfo,
        missing_coordinates: &[bool],
        point_store: &PS,
    ) -> Result<()>
    where
        PS: PointStoreView,
        V: MultiVisitor<PathView, R>,
    {
        let node = node_view.current_node();
        if self.node_store.is_leaf(node) {
            node_view.update_at_leaf(point, node, &self.node_store, point_store)?;
            visitor.accept_leaf(point, visitor_info, node_view)?;
            return Ok(());
        }
        let parent = node;
        node_view.refresh_cut(&self.node_store);
        if missing_coordinates[self.node_store.cut_and_children(parent).0] {
            let second = self.node_store.left_index(parent);
            let first = self.node_store.right_index(parent);
            node_view.set_current_node(first);
            self.traverse_multi_recursive(
                point,
                node_view,
                visitor,
                visitor_info,
                missing_coordinates,
                point_store,
            )?;
            let saved_box = node_view.bounding_box();
            node_view.set_current_node(second);
            self.traverse_multi_recursive(
                point,
                node_view,
                visitor,
                visitor_info,
                missing_coordinates,
                point_store,
            )?;
            visitor.combine_branches(point, visitor_info, node_view)?;
            if !visitor.is_converged() {
                node_view.merge_paths(
                    parent,
                    saved_box,
                    point,
                    missing_coordinates,
                    &self.node_store,
                    point_store,
                )?;
            }
        } else {
            node_view.update_traversing_down(point, &self.node_store);
            self.traverse_multi_recursive(
                point,
                node_view,
                visitor,
                visitor_info,
                missing_coordinates,
                point_store,
            )?;
            if !visitor.is_converged() {
                node_view.update_to_parent_with_missing_coordinates(
                    parent,
                    point,
                    missing_coordinates,
                    &self.node_store,
                    point_store,
                )?;
            }
        }
        if !visitor.is_converged() {
            visitor.accept(point, visitor_info, node_view)?;
        }
        Ok(())
    }

    /// The multiset of `(point_handle, leaf_mass)` pairs over the leaves.
    pub fn leaves(&self) -> Vec<(usize, usize)> {
        let mut answer = Vec::new();
        if !self.is_empty() {
            self.collect_leaves(self.root, &mut answer);
        }
        answer
    }

    fn collect_leaves(&self, node: usize, answer: &mut Vec<(usize, usize)>) {
        if self.node_store.is_leaf(node) {
            let point = self
                .node_store
                .leaf_point_index(node)
                .expect("checked leaf");
            answer.push((point, self.node_store.mass(node)));
        } else {
            self.collect_leaves(self.node_store.left_index(node), answer);
            self.collect_leaves(self.node_store.right_index(node), answer);
        }
    }

    /// Walks the whole tree checking mass additivity and that the leaf count
    /// matches the recorded tree mass.
    pub fn verify_structure(&self) -> Result<()> {
        if self.is_empty() {
            check_state(self.tree_mass == 0, "empty tree with nonzero mass")?;
            return Ok(());
        }
        let total = self.verify_node(self.root)?;
        check_state(total == self.tree_mass, "tree mass out of step with leaves")?;
        Ok(())
    }

    fn verify_node(&self, node: usize) -> Result<usize> {
        if self.node_store.is_leaf(node) {
            return Ok(self.node_store.mass(node));
        }
        let left = self.verify_node(self.node_store.left_index(node))?;
        let right = self.verify_node(self.node_store.right_index(node))?;
        check_state(
            left + right == self.node_store.mass(node),
            "interior mass is not the sum of its children",
        )?;
        Ok(left + right)
    }

    pub fn size_in_bytes(&self) -> usize {
        self.node_store.size_in_bytes() + std::mem::size_of::<RandomCutTree<C, P, N>>()
    }
}
