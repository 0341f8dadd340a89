use crate::divector::DiVector;
use crate::pointstore::PointStoreView;
use crate::tree::boundingbox::BoundingBox;
use crate::tree::nodestore::NodeStore;
use crate::types::Result;
use crate::util::check_state;

/// What a visitor sees at each step of a traversal.
///
/// The view descends by cut side and is then rewound bottom-up; on the way
/// up it either maintains the merged bounding box of the visited subtree on
/// the path, or reads cut probabilities straight from the node store's box
/// cache. Visitors that need the box itself (attribution) say so up front
/// and force the maintained box.
#[repr(C)]
pub struct PathView {
    current_node: usize,
    probability_of_cut: f64,
    shadow_probability_of_cut: f64,
    mass: usize,
    depth: usize,
    leaf_index: usize,
    leaf_duplicate: bool,
    use_shadow_box: bool,
    maintain_box: bool,
    current_box: Option<BoundingBox>,
    shadow_box: Option<BoundingBox>,
    cut_dimension: usize,
    cut_value: f32,
    point_at_leaf: Vec<f32>,
}

impl PathView {
    pub fn new<NS: NodeStore>(root: usize, node_store: &NS, maintain_box: bool) -> Self {
        let (cut_dimension, cut_value, _left, _right) = node_store.cut_and_children(root);
        PathView {
            current_node: root,
            probability_of_cut: f64::MAX, // never read before the first leaf
            shadow_probability_of_cut: f64::MAX,
            mass: node_store.mass(root),
            depth: 0,
            leaf_index: usize::MAX,
            leaf_duplicate: false,
            use_shadow_box: false,
            maintain_box,
            current_box: None,
            shadow_box: None,
            cut_dimension,
            cut_value,
            point_at_leaf: Vec::new(),
        }
    }

    pub fn probability_of_cut(&self) -> f64 {
        self.probability_of_cut
    }

    pub fn shadow_probability_of_cut(&self) -> f64 {
        self.shadow_probability_of_cut
    }

    pub fn mass(&self) -> usize {
        self.mass
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn leaf_index(&self) -> usize {
        self.leaf_index
    }

    pub fn is_duplicate(&self) -> bool {
        self.leaf_duplicate
    }

    pub fn cut_dimension(&self) -> usize {
        self.cut_dimension
    }

    pub fn cut_value(&self) -> f32 {
        self.cut_value
    }

    pub fn leaf_point(&self) -> &[f32] {
        &self.point_at_leaf
    }

    pub fn current_node(&self) -> usize {
        self.current_node
    }

    pub fn assign_probability_of_cut(&self, di_vector: &mut DiVector, point: &[f32]) -> Result<()> {
        check_state(self.current_box.is_some(), "path box not maintained")?;
        di_vector.assign_as_probability_of_cut(self.current_box.as_ref().unwrap(), point);
        Ok(())
    }

    pub fn assign_shadow_probability_of_cut(
        &self,
        di_vector: &mut DiVector,
        point: &[f32],
    ) -> Result<()> {
        check_state(self.shadow_box.is_some(), "shadow box not in use")?;
        di_vector.assign_as_probability_of_cut(self.shadow_box.as_ref().unwrap(), point);
        Ok(())
    }

    pub(crate) fn update_at_leaf<NS: NodeStore, PS: PointStoreView>(
        &mut self,
        point: &[f32],
        index: usize,
        node_store: &NS,
        point_store: &PS,
    ) -> Result<()> {
        self.leaf_index = node_store.leaf_point_index(index)?;
        self.point_at_leaf = point_store.copy(self.leaf_index)?;
        self.mass = node_store.mass(index);
        self.probability_of_cut = if self.point_at_leaf.eq(point) {
            self.leaf_duplicate = true;
            0.0
        } else {
            self.leaf_duplicate = false;
            1.0
        };
        if self.maintain_box || node_store.use_path_for_box() {
            self.current_box = Some(BoundingBox::from_point(&self.point_at_leaf));
        }
        Ok(())
    }

    pub(crate) fn update_traversing_down<NS: NodeStore>(
        &mut self,
        point: &[f32],
        node_store: &NS,
    ) {
        if node_store.is_left_of(self.current_node, point) {
            self.current_node = node_store.left_index(self.current_node);
        } else {
            self.current_node = node_store.right_index(self.current_node);
        }
        let (cut_dimension, cut_value, _left, _right) =
            node_store.cut_and_children(self.current_node);
        self.cut_dimension = cut_dimension;
        self.cut_value = cut_value;
        self.depth += 1;
    }

    pub(crate) fn update_traversing_up<NS: NodeStore, PS: PointStoreView>(
        &mut self,
        point: &[f32],
        parent: usize,
        node_store: &NS,
        point_store: &PS,
    ) -> Result<()> {
        self.probability_of_cut = match &mut self.current_box {
            Some(current) => {
                let sibling = node_store.sibling(self.current_node, parent);
                if self.use_shadow_box {
                    let sibling_box = node_store.bounding_box(sibling, point_store)?;
                    current.add_box(&sibling_box);
                    match &mut self.shadow_box {
                        Some(shadow) => shadow.add_box(&sibling_box),
                        None => self.shadow_box = Some(sibling_box),
                    }
                    self.shadow_probability_of_cut =
                        self.shadow_box.as_ref().unwrap().probability_of_cut(point);
                } else {
                    node_store.grow_node_box(current, point_store, parent, sibling)?;
                }
                current.probability_of_cut(point)
            }
            None => node_store.probability_of_cut(parent, point, point_store)?,
        };
        self.current_node = parent;
        let (cut_dimension, cut_value, _left, _right) = node_store.cut_and_children(parent);
        self.cut_dimension = cut_dimension;
        self.cut_value = cut_value;
        self.mass = node_store.mass(parent);
        self.depth -= 1;
        Ok(())
    }

    /// Turns on the shadow box below the accepting leaf; the path box is
    /// materialized here because the shadow can only start growing one level
    /// up.
    pub(crate) fn set_use_shadow_box<NS: NodeStore, PS: PointStoreView>(
        &mut self,
        node_store: &NS,
        point_store: &PS,
    ) -> Result<()> {
        self.use_shadow_box = true;
        if self.current_box.is_none() {
            self.current_box = Some(node_store.bounding_box(self.current_node, point_store)?);
        }
        Ok(())
    }

    // support for forked traversals

    pub(crate) fn set_current_node(&mut self, index: usize) {
        self.current_node = index;
    }

    pub(crate) fn refresh_cut<NS: NodeStore>(&mut self, node_store: &NS) {
        let (cut_dimension, cut_value, _left, _right) =
            node_store.cut_and_children(self.current_node);
        self.cut_dimension = cut_dimension;
        self.cut_value = cut_value;
    }

    pub(crate) fn bounding_box(&self) -> Option<BoundingBox> {
        self.current_box.clone()
    }

    pub(crate) fn update_to_parent_with_missing_coordinates<NS: NodeStore, PS: PointStoreView>(
        &mut self,
        parent: usize,
        point: &[f32],
        missing_coordinates: &[bool],
        node_store: &NS,
        point_store: &PS,
    ) -> Result<()> {
        if node_store.use_path_for_box() {
            let sibling = node_store.sibling(self.current_node, parent);
            check_state(self.current_box.is_some(), "path box not maintained")?;
            node_store.grow_node_box(
                self.current_box.as_mut().unwrap(),
                point_store,
                parent,
                sibling,
            )?;
            self.probability_of_cut = self
                .current_box
                .as_ref()
                .unwrap()
                .probability_of_cut_with_missing_coordinates(point, missing_coordinates);
        } else {
            self.probability_of_cut = node_store.probability_of_cut_with_missing_coordinates(
                parent,
                point,
                missing_coordinates,
                point_store,
            )?;
        }
        self.current_node = parent;
        Ok(())
    }

    /// After both branches of a fork return, folds the saved first-branch
    /// box into the current one and recomputes the cut probability at the
    /// fork.
    pub(crate) fn merge_paths<NS: NodeStore, PS: PointStoreView>(
        &mut self,
        parent: usize,
        saved_box: Option<BoundingBox>,
        point: &[f32],
        missing_coordinates: &[bool],
        node_store: &NS,
        point_store: &PS,
    ) -> Result<()> {
        if node_store.use_path_for_box() {
            check_state(
                self.current_box.is_some() && saved_box.is_some(),
                "fork lost a path box",
            )?;
            self.current_box
                .as_mut()
                .unwrap()
                .add_box(saved_box.as_ref().unwrap());
            self.probability_of_cut = self
                .current_box
                .as_ref()
                .unwrap()
                .probability_of_cut_with_missing_coordinates(point, missing_coordinates);
        } else {
            self.probability_of_cut = node_store.probability_of_cut_with_missing_coordinates(
                parent,
                point,
                missing_coordinates,
                point_store,
            )?;
        }
        self.current_node = parent;
        Ok(())
    }
}
