//! Hierarchical description of the target blocks and their capacities.
//!
//! A [`CommTree`] describes the communication topology the partition should
//! map onto: leaves are the target blocks, inner levels group blocks that
//! communicate cheaply with each other. Every node carries one capacity per
//! vertex-weight dimension; at every level the node weights sum to the same
//! per-dimension total. The tree is replicated on every process and
//! immutable after construction, except for a single optional
//! [`CommTree::adapt_weights`] call before partitioning.

use itertools::Itertools;
use log::warn;

use crate::types::{Error, Result, Scalar};

/// One node of the communication tree.
///
/// The hierarchy label identifies the path from the root: node `[2, 0]` is
/// the first child of the root's third child. All leaves carry labels of
/// equal length, the tree depth.
#[derive(Clone, Debug, PartialEq)]
pub struct CommNode<T> {
    /// Path from the root; empty for the root itself.
    pub label: Vec<u32>,
    /// Capacity per vertex-weight dimension.
    pub weights: Vec<T>,
    /// Number of direct children; zero for leaves.
    pub num_children: usize,
    /// Dense id in `[0, k)` for leaves, `None` for inner nodes.
    pub leaf_id: Option<usize>,
}

impl<T: Scalar> CommNode<T> {
    /// A leaf with the given label and capacities.
    pub fn leaf(label: Vec<u32>, weights: Vec<T>) -> Self {
        Self {
            label,
            weights,
            num_children: 0,
            leaf_id: None,
        }
    }

    /// Number of weight dimensions carried by this node.
    pub fn num_weights(&self) -> usize {
        self.weights.len()
    }

    fn absorb(&mut self, other: &CommNode<T>) {
        for w in 0..self.weights.len() {
            self.weights[w] = self.weights[w] + other.weights[w];
        }
        self.num_children += 1;
    }
}

/// The communication tree: per-level node vectors, root first.
///
/// Nodes hold no parent or child references; the parent of a node is the
/// node on the level above whose label is a prefix of its own. This keeps
/// the tree cheap to copy and safe to replicate.
#[derive(Clone, Debug)]
pub struct CommTree<T> {
    /// `levels[0]` is the root alone, `levels.last()` are the leaves.
    levels: Vec<Vec<CommNode<T>>>,
    num_weights: usize,
    /// Per weight dimension: does the capacity scale with the input total?
    proportional: Vec<bool>,
    adapted: bool,
}

impl<T: Scalar> CommTree<T> {
    /// Flat tree with `num_leaves` equal leaves carrying unit capacity in
    /// each of `num_weights` dimensions. All weights are proportional.
    pub fn flat_homogeneous(num_leaves: usize, num_weights: usize) -> Result<Self> {
        let sizes = vec![vec![T::one(); num_leaves]; num_weights];
        Self::flat_heterogeneous(&sizes, &vec![true; num_weights])
    }

    /// Flat tree with explicit per-leaf capacities. `sizes[w][i]` is the
    /// capacity of leaf `i` in weight dimension `w`.
    pub fn flat_heterogeneous(sizes: &[Vec<T>], proportional: &[bool]) -> Result<Self> {
        let num_weights = sizes.len();
        if num_weights == 0 {
            return Err(Error::InvalidArgument(
                "no capacity weights were provided".into(),
            ));
        }
        if proportional.len() != num_weights {
            return Err(Error::InvalidArgument(
                "proportionality flags and capacity weights differ in number".into(),
            ));
        }
        let num_leaves = sizes[0].len();
        if num_leaves == 0 {
            return Err(Error::InvalidArgument("no leaf capacities given".into()));
        }

        let leaves = (0..num_leaves)
            .map(|i| {
                let weights = (0..num_weights).map(|w| sizes[w][i]).collect();
                CommNode::leaf(vec![i as u32], weights)
            })
            .collect();

        Self::from_leaves(leaves, proportional.to_vec())
    }

    /// Balanced tree with `levels[h]` children per node at depth `h`. The
    /// number of leaves is the product of all entries; each leaf carries
    /// unit capacities.
    pub fn from_levels(levels: &[usize], num_weights: usize) -> Result<Self> {
        if levels.is_empty() || levels.contains(&0) {
            return Err(Error::InvalidArgument(
                "every hierarchy level needs at least one child".into(),
            ));
        }
        let num_leaves: usize = levels.iter().product();

        let mut label = vec![0u32; levels.len()];
        let mut leaves = Vec::with_capacity(num_leaves);
        for _ in 0..num_leaves {
            leaves.push(CommNode::leaf(label.clone(), vec![T::one(); num_weights]));

            // odometer increment over the level sizes
            for h in (0..levels.len()).rev() {
                label[h] += 1;
                if (label[h] as usize) < levels[h] {
                    break;
                }
                label[h] = 0;
            }
        }

        Self::from_leaves(leaves, vec![true; num_weights])
    }

    /// Build a tree from its leaves; the intermediate levels are created by
    /// grouping nodes with a common label prefix and summing their weights.
    /// Leaf ids are allocated densely in input order.
    pub fn from_leaves(mut leaves: Vec<CommNode<T>>, proportional: Vec<bool>) -> Result<Self> {
        let depth = leaves
            .first()
            .map(|l| l.label.len())
            .ok_or_else(|| Error::InvalidArgument("a tree needs at least one leaf".into()))?;
        let num_weights = leaves[0].num_weights();
        for leaf in &leaves {
            if leaf.label.len() != depth {
                return Err(Error::InvalidArgument(
                    "every leaf must have the same label length".into(),
                ));
            }
            if leaf.num_weights() != num_weights {
                return Err(Error::InvalidArgument(
                    "every leaf must carry the same number of weights".into(),
                ));
            }
        }
        if proportional.len() != num_weights {
            return Err(Error::InvalidArgument(
                "proportionality flags and leaf weights differ in number".into(),
            ));
        }

        for (id, leaf) in leaves.iter_mut().enumerate() {
            leaf.leaf_id = Some(id);
        }

        let mut levels = vec![leaves];
        for _ in 0..depth {
            let above = Self::level_above(levels.first().unwrap());
            levels.insert(0, above);
        }

        let tree = Self {
            levels,
            num_weights,
            proportional,
            adapted: false,
        };
        tree.check_consistency()?;
        Ok(tree)
    }

    /// Group the nodes of a level by their label prefix into parent nodes,
    /// preserving first-seen order.
    fn level_above(level_below: &[CommNode<T>]) -> Vec<CommNode<T>> {
        let mut above: Vec<CommNode<T>> = Vec::new();
        for node in level_below {
            let prefix = &node.label[..node.label.len() - 1];
            match above.iter_mut().find(|p| p.label == prefix) {
                Some(parent) => parent.absorb(node),
                None => {
                    let mut parent = node.clone();
                    parent.label = prefix.to_vec();
                    parent.num_children = 1;
                    parent.leaf_id = None;
                    above.push(parent);
                }
            }
        }
        above
    }

    /// Number of hierarchy levels, including the root level.
    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    /// Number of leaves, the target block count k.
    pub fn num_leaves(&self) -> usize {
        self.levels.last().map(|l| l.len()).unwrap_or(0)
    }

    /// Number of weight dimensions.
    pub fn num_weights(&self) -> usize {
        self.num_weights
    }

    /// The leaf nodes, in leaf-id order.
    pub fn leaves(&self) -> &[CommNode<T>] {
        self.levels.last().map(|l| l.as_slice()).unwrap_or(&[])
    }

    /// The nodes at hierarchy depth `h`; depth 0 is the root alone.
    pub fn level(&self, h: usize) -> &[CommNode<T>] {
        &self.levels[h]
    }

    /// The root node.
    pub fn root(&self) -> &CommNode<T> {
        &self.levels[0][0]
    }

    /// Rescale the proportional capacities so every proportional weight's
    /// leaf capacities sum to the actual input total, and verify the
    /// absolute weights can hold the input. The inner levels are rebuilt by
    /// summation. Calling this twice is a no-op.
    pub fn adapt_weights(&mut self, input_totals: &[T]) -> Result<()> {
        if self.adapted {
            warn!("tree node weights are already adapted, skipping adapt_weights");
            return Ok(());
        }
        if input_totals.len() != self.num_weights {
            return Err(Error::DimensionMismatch("input weight totals".into()));
        }

        let mut leaves = self.levels.last().unwrap().clone();
        for w in 0..self.num_weights {
            let capacity_sum = leaves
                .iter()
                .map(|l| l.weights[w])
                .fold(T::zero(), |a, b| a + b);

            if self.proportional[w] {
                let scale = input_totals[w] / capacity_sum;
                for leaf in leaves.iter_mut() {
                    leaf.weights[w] = leaf.weights[w] * scale;
                }
            } else if capacity_sum < input_totals[w] {
                return Err(Error::Infeasible {
                    target: capacity_sum.to_f64().unwrap_or(f64::NAN),
                    input: input_totals[w].to_f64().unwrap_or(f64::NAN),
                });
            }
        }

        // rebuild the inner levels from the rescaled leaves
        let rebuilt = Self::from_leaves(leaves, self.proportional.clone())?;
        self.levels = rebuilt.levels;
        self.adapted = true;
        Ok(())
    }

    /// Per-node capacities at depth `h` for every weight:
    /// `result[w][node]`. `None` selects the leaves.
    pub fn balance_vectors(&self, level: Option<usize>) -> Vec<Vec<T>> {
        let nodes = match level {
            Some(h) => &self.levels[h],
            None => self.levels.last().unwrap(),
        };
        (0..self.num_weights)
            .map(|w| nodes.iter().map(|n| n.weights[w]).collect_vec())
            .collect_vec()
    }

    /// For each parent of the given level nodes, the number of its children
    /// among them, in parent order. The sum equals the number of nodes.
    /// This is the signature hierarchical k-means uses to place centers.
    pub fn grouping(level_nodes: &[CommNode<T>]) -> Vec<usize> {
        Self::level_above(level_nodes)
            .iter()
            .map(|parent| parent.num_children)
            .collect()
    }

    /// Hierarchy distance between two nodes: depth minus the length of the
    /// common prefix of their labels.
    pub fn distance(a: &CommNode<T>, b: &CommNode<T>) -> usize {
        let common = a
            .label
            .iter()
            .zip(&b.label)
            .take_while(|(x, y)| x == y)
            .count();
        a.label.len().max(b.label.len()) - common
    }

    /// The complete k-by-k matrix of hierarchy distances between leaves,
    /// with zeros on the diagonal. Replicated, purely local.
    pub fn export_as_graph_local(&self) -> Vec<Vec<T>> {
        let leaves = self.leaves();
        leaves
            .iter()
            .map(|a| {
                leaves
                    .iter()
                    .map(|b| {
                        if a.leaf_id == b.leaf_id {
                            T::zero()
                        } else {
                            T::from(Self::distance(a, b)).unwrap()
                        }
                    })
                    .collect_vec()
            })
            .collect_vec()
    }

    /// Imbalance of a partition against the leaf capacities, one entry per
    /// weight dimension. The tree weights should be adapted first.
    pub fn compute_imbalance<C: crate::parallel::Collectives>(
        &self,
        partition: &[usize],
        node_weights: &[Vec<T>],
        comm: &C,
    ) -> Vec<f64> {
        if !self.adapted {
            warn!("tree weights are not adapted to the input, imbalances may be meaningless");
        }
        crate::metrics::imbalance(
            partition,
            self.num_leaves(),
            node_weights,
            &self.balance_vectors(None),
            comm,
        )
    }

    /// Verify the structural invariants: one root, label lengths equal to
    /// their depth, dense leaf ids, and per-dimension weight sums constant
    /// across levels.
    pub fn check_consistency(&self) -> Result<()> {
        if self.levels.first().map(|l| l.len()) != Some(1) {
            return Err(Error::InternalInvariant(
                "the top level must contain exactly the root".into(),
            ));
        }

        for (h, level) in self.levels.iter().enumerate() {
            for node in level {
                if node.label.len() != h {
                    return Err(Error::InternalInvariant(format!(
                        "node at depth {h} has a label of length {}",
                        node.label.len()
                    )));
                }
            }
        }

        for (id, leaf) in self.leaves().iter().enumerate() {
            if leaf.leaf_id != Some(id) {
                return Err(Error::InternalInvariant("leaf ids are not dense".into()));
            }
        }

        let tolerance = T::from(1e-5).unwrap();
        for w in 0..self.num_weights {
            let leaf_sum = self
                .leaves()
                .iter()
                .map(|l| l.weights[w])
                .fold(T::zero(), |a, b| a + b);
            for level in &self.levels {
                let level_sum = level
                    .iter()
                    .map(|n| n.weights[w])
                    .fold(T::zero(), |a, b| a + b);
                if (level_sum - leaf_sum).abs() > tolerance * leaf_sum.max(T::one()) {
                    return Err(Error::InternalInvariant(format!(
                        "weight {w} sums differ between levels: {level_sum} != {leaf_sum}"
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_flat_homogeneous() {
        let tree = CommTree::<f64>::flat_homogeneous(4, 2).unwrap();
        assert_eq!(tree.num_levels(), 2);
        assert_eq!(tree.num_leaves(), 4);
        assert_eq!(tree.root().num_children, 4);
        assert_eq!(tree.root().weights, vec![4.0, 4.0]);
        assert_eq!(
            tree.leaves().iter().map(|l| l.leaf_id).collect_vec(),
            (0..4).map(Some).collect_vec()
        );
    }

    #[test]
    fn test_from_levels() {
        let tree = CommTree::<f64>::from_levels(&[2, 3], 1).unwrap();
        assert_eq!(tree.num_levels(), 3);
        assert_eq!(tree.num_leaves(), 6);
        assert_eq!(tree.level(1).len(), 2);
        for node in tree.level(1) {
            assert_eq!(node.num_children, 3);
            assert_relative_eq!(node.weights[0], 3.0);
        }

        // leaf labels enumerate the tree in odometer order
        assert_eq!(tree.leaves()[0].label, vec![0, 0]);
        assert_eq!(tree.leaves()[3].label, vec![1, 0]);
        assert_eq!(tree.leaves()[5].label, vec![1, 2]);
    }

    #[test]
    fn test_from_levels_rejects_empty() {
        assert!(CommTree::<f64>::from_levels(&[], 1).is_err());
        assert!(CommTree::<f64>::from_levels(&[2, 0], 1).is_err());
    }

    #[test]
    fn test_adapt_weights_proportional() {
        let sizes = vec![vec![1.0, 2.0, 1.0]];
        let mut tree = CommTree::<f64>::flat_heterogeneous(&sizes, &[true]).unwrap();
        tree.adapt_weights(&[100.0]).unwrap();

        let capacities = tree.balance_vectors(None);
        assert_relative_eq!(capacities[0][0], 25.0);
        assert_relative_eq!(capacities[0][1], 50.0);
        assert_relative_eq!(capacities[0][2], 25.0);
        assert_relative_eq!(tree.root().weights[0], 100.0);

        // adaptation is idempotent
        tree.adapt_weights(&[100.0]).unwrap();
        assert_relative_eq!(tree.balance_vectors(None)[0][1], 50.0);
    }

    #[test]
    fn test_adapt_weights_absolute_infeasible() {
        let sizes = vec![vec![1.0, 1.0]];
        let mut tree = CommTree::<f64>::flat_heterogeneous(&sizes, &[false]).unwrap();
        assert!(matches!(
            tree.adapt_weights(&[5.0]),
            Err(Error::Infeasible { .. })
        ));
    }

    #[test]
    fn test_grouping() {
        let tree = CommTree::<f64>::from_levels(&[2, 3], 1).unwrap();
        let grouping = CommTree::grouping(tree.leaves());
        assert_eq!(grouping, vec![3, 3]);
        assert_eq!(grouping.iter().sum::<usize>(), tree.num_leaves());

        let grouping = CommTree::grouping(tree.level(1));
        assert_eq!(grouping, vec![2]);
    }

    #[test]
    fn test_distance_and_graph() {
        let tree = CommTree::<f64>::from_levels(&[2, 2], 1).unwrap();
        let leaves = tree.leaves();
        assert_eq!(CommTree::distance(&leaves[0], &leaves[1]), 1);
        assert_eq!(CommTree::distance(&leaves[0], &leaves[3]), 2);
        assert_eq!(CommTree::distance(&leaves[2], &leaves[2]), 0);

        let graph = tree.export_as_graph_local();
        assert_eq!(graph.len(), 4);
        assert_relative_eq!(graph[0][1], 1.0);
        assert_relative_eq!(graph[1][0], 1.0);
        assert_relative_eq!(graph[0][3], 2.0);
        assert_relative_eq!(graph[2][2], 0.0);
    }
}
