//! Shallow regression tree for the seasonal model
//!
//! linfa's decision trees only cover classification, so the seasonal model
//! carries its own CART-style regressor. Splits are axis-aligned thresholds on
//! the midpoint between consecutive distinct feature values.

use ndarray::{ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

use super::model::TrainingError;

/// Impurity measure minimised when choosing a split.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitCriterion {
    /// Sum of absolute deviations from the median; leaves predict the median.
    #[default]
    AbsoluteError,
    /// Sum of squared deviations from the mean; leaves predict the mean.
    SquaredError,
}

impl SplitCriterion {
    fn leaf_value(&self, values: &mut [f64]) -> f64 {
        match self {
            SplitCriterion::AbsoluteError => median(values),
            SplitCriterion::SquaredError => mean(values),
        }
    }

    /// Impurity of a node holding `values` (reorders the slice).
    fn impurity(&self, values: &mut [f64]) -> f64 {
        if values.is_empty() {
            return 0.0;
        }
        let center = self.leaf_value(values);
        match self {
            SplitCriterion::AbsoluteError => values.iter().map(|v| (v - center).abs()).sum(),
            SplitCriterion::SquaredError => values.iter().map(|v| (v - center).powi(2)).sum(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TreeNode {
    Leaf {
        value: f64,
        samples: usize,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
    },
}

impl TreeNode {
    fn depth(&self) -> usize {
        match self {
            TreeNode::Leaf { .. } => 0,
            TreeNode::Split { left, right, .. } => 1 + left.depth().max(right.depth()),
        }
    }

    fn leaves(&self) -> usize {
        match self {
            TreeNode::Leaf { .. } => 1,
            TreeNode::Split { left, right, .. } => left.leaves() + right.leaves(),
        }
    }

    fn splits_below(&self, width: usize) -> bool {
        match self {
            TreeNode::Leaf { .. } => true,
            TreeNode::Split {
                feature,
                left,
                right,
                ..
            } => *feature < width && left.splits_below(width) && right.splits_below(width),
        }
    }
}

/// A fitted regression tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    root: TreeNode,
    n_features: usize,
    /// Number of rows the tree was fitted on
    pub training_samples: usize,
}

impl RegressionTree {
    /// Predict a single record. Records shorter than the training width panic.
    pub fn predict(&self, record: &[f64]) -> f64 {
        let mut node = &self.root;
        loop {
            match node {
                TreeNode::Leaf { value, .. } => return *value,
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if record[*feature] <= *threshold { left } else { right };
                }
            }
        }
    }

    pub fn depth(&self) -> usize {
        self.root.depth()
    }

    pub fn leaf_count(&self) -> usize {
        self.root.leaves()
    }

    /// Whether the tree was grown on `width` inputs and every split reads
    /// one of them. Trees from outside a training run are checked with this
    /// before [`predict`](Self::predict) can index past a record.
    pub fn accepts_inputs(&self, width: usize) -> bool {
        self.n_features == width && self.root.splits_below(width)
    }

    pub fn root(&self) -> &TreeNode {
        &self.root
    }
}

/// Hyperparameters for growing a [`RegressionTree`].
#[derive(Debug, Clone, PartialEq)]
pub struct TreeParams {
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub criterion: SplitCriterion,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            max_depth: 4,
            min_samples_split: 2,
            min_samples_leaf: 1,
            criterion: SplitCriterion::AbsoluteError,
        }
    }
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    cost: f64,
    left: Vec<usize>,
    right: Vec<usize>,
}

impl TreeParams {
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn criterion(mut self, criterion: SplitCriterion) -> Self {
        self.criterion = criterion;
        self
    }

    pub fn min_samples_split(mut self, samples: usize) -> Self {
        self.min_samples_split = samples;
        self
    }

    pub fn min_samples_leaf(mut self, samples: usize) -> Self {
        self.min_samples_leaf = samples;
        self
    }

    /// Grow a tree on `records` (one row per sample) and `targets`.
    pub fn fit(
        &self,
        records: ArrayView2<'_, f64>,
        targets: ArrayView1<'_, f64>,
    ) -> Result<RegressionTree, TrainingError> {
        let n_samples = records.nrows();
        if n_samples == 0 {
            return Err(TrainingError::InsufficientData {
                rows: 0,
                required: 1,
            });
        }
        if n_samples != targets.len() {
            return Err(TrainingError::MismatchedLengths {
                features: n_samples,
                targets: targets.len(),
            });
        }
        if records.iter().chain(targets.iter()).any(|v| !v.is_finite()) {
            return Err(TrainingError::FitError("non-finite training value".to_string()));
        }

        let indices: Vec<usize> = (0..n_samples).collect();
        let root = self.grow(&records, &targets, indices, 0);

        Ok(RegressionTree {
            root,
            n_features: records.ncols(),
            training_samples: n_samples,
        })
    }

    fn grow(
        &self,
        records: &ArrayView2<'_, f64>,
        targets: &ArrayView1<'_, f64>,
        indices: Vec<usize>,
        depth: usize,
    ) -> TreeNode {
        let mut values: Vec<f64> = indices.iter().map(|&i| targets[i]).collect();
        let value = self.criterion.leaf_value(&mut values);
        let impurity = self.criterion.impurity(&mut values);
        let leaf = TreeNode::Leaf {
            value,
            samples: indices.len(),
        };

        if depth >= self.max_depth
            || indices.len() < self.min_samples_split
            || impurity <= f64::EPSILON
        {
            return leaf;
        }

        match self.best_split(records, targets, &indices) {
            Some(split) if split.cost < impurity - 1e-9 => TreeNode::Split {
                feature: split.feature,
                threshold: split.threshold,
                left: Box::new(self.grow(records, targets, split.left, depth + 1)),
                right: Box::new(self.grow(records, targets, split.right, depth + 1)),
            },
            _ => leaf,
        }
    }

    fn best_split(
        &self,
        records: &ArrayView2<'_, f64>,
        targets: &ArrayView1<'_, f64>,
        indices: &[usize],
    ) -> Option<SplitCandidate> {
        let n = indices.len();
        let mut best: Option<SplitCandidate> = None;
        let mut scratch = Vec::with_capacity(n);

        for feature in 0..records.ncols() {
            let mut order = indices.to_vec();
            order.sort_by(|&a, &b| records[[a, feature]].total_cmp(&records[[b, feature]]));

            for k in self.min_samples_leaf.max(1)..=n.saturating_sub(self.min_samples_leaf.max(1)) {
                let lower = records[[order[k - 1], feature]];
                let upper = records[[order[k], feature]];
                if lower >= upper {
                    continue;
                }

                scratch.clear();
                scratch.extend(order[..k].iter().map(|&i| targets[i]));
                let left_cost = self.criterion.impurity(&mut scratch);
                scratch.clear();
                scratch.extend(order[k..].iter().map(|&i| targets[i]));
                let right_cost = self.criterion.impurity(&mut scratch);
                let cost = left_cost + right_cost;

                if best.as_ref().is_none_or(|b| cost < b.cost) {
                    best = Some(SplitCandidate {
                        feature,
                        threshold: (lower + upper) / 2.0,
                        cost,
                        left: order[..k].to_vec(),
                        right: order[k..].to_vec(),
                    });
                }
            }
        }

        best
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Median of a non-empty slice; averages the two middle values for even lengths.
fn median(values: &mut [f64]) -> f64 {
    let n = values.len();
    let mid = n / 2;
    let (lower, upper, _) = values.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
    let upper = *upper;
    if n % 2 == 1 {
        upper
    } else {
        let below = lower.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        (below + upper) / 2.0
    }
}
