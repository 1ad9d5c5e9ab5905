use serde::{Deserialize, Serialize};
use std::fmt;

/// The split a level node has committed to. Held by a
/// [`NodeRecord`] once the split search accepts a candidate.
#[derive(Debug, Clone)]
pub struct NodeSplit {
    pub feature: usize,
    pub bin: u16,
    /// Rows routed left by `code <= bin`. After the partition
    /// phase exactly this many rows sit at the start of the
    /// node's range.
    pub left_count: usize,
    pub impurity_decrease: f64,
}

/// One active node during level wise growth. Level node lists
/// are created in bulk per level, the split search writes
/// `split` once, the partition phase consumes it, and the list
/// is replaced wholesale at the level transition.
#[derive(Debug, Clone)]
pub struct NodeRecord {
    /// Index of the owning tree within the current tree block.
    pub tree: usize,
    /// Index of this node in its tree's persisted node vector.
    pub tree_node: usize,
    pub depth: usize,
    /// Start of this node's range in the shared tree order array.
    pub row_offset: usize,
    pub row_count: usize,
    /// `None` iff this node is a leaf.
    pub split: Option<NodeSplit>,
}

impl NodeRecord {
    pub fn new(
        tree: usize,
        tree_node: usize,
        depth: usize,
        row_offset: usize,
        row_count: usize,
    ) -> Self {
        NodeRecord {
            tree,
            tree_node,
            depth,
            row_offset,
            row_count,
            split: None,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.split.is_none()
    }
}

/// A persisted tree node, as consumed by inference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeNode {
    pub num: usize,
    pub depth: usize,
    pub sample_count: usize,
    /// Leaf response, the winning class for classification or
    /// the mean for regression. Internal nodes keep the value
    /// they would predict if growth had stopped here.
    pub response: f64,
    /// Per class counts, classification only.
    pub class_counts_: Option<Vec<u32>>,
    pub split_feature_: Option<usize>,
    pub split_bin_: Option<u16>,
    pub left_child_: Option<usize>,
    pub right_child_: Option<usize>,
}

impl TreeNode {
    pub fn new_leaf(
        num: usize,
        depth: usize,
        sample_count: usize,
        response: f64,
        class_counts: Option<Vec<u32>>,
    ) -> Self {
        TreeNode {
            num,
            depth,
            sample_count,
            response,
            class_counts_: class_counts,
            split_feature_: None,
            split_bin_: None,
            left_child_: None,
            right_child_: None,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.split_feature_.is_none()
    }

    pub fn update_children(
        &mut self,
        left_child: usize,
        right_child: usize,
        feature: usize,
        bin: u16,
    ) {
        self.left_child_ = Some(left_child);
        self.right_child_ = Some(right_child);
        self.split_feature_ = Some(feature);
        self.split_bin_ = Some(bin);
    }
}

impl fmt::Display for TreeNode {
    // This trait requires `fmt` with this exact signature.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_leaf() {
            write!(
                f,
                "{}:leaf={},count={}",
                self.num, self.response, self.sample_count
            )
        } else {
            write!(
                f,
                "{}:[f{} <= bin {}] yes={},no={},count={}",
                self.num,
                self.split_feature_.unwrap(),
                self.split_bin_.unwrap(),
                self.left_child_.unwrap(),
                self.right_child_.unwrap(),
                self.sample_count
            )
        }
    }
}
