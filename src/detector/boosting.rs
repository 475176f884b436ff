//! Gradient-boosted decision trees for binary classification.
//!
//! Trees are grown with second-order (Newton) logistic boosting: every round
//! fits one regression tree to the per-sample gradient/hessian of the log-loss,
//! with L1/L2-regularised leaf weights. Positive samples are weighted by
//! `scale_pos_weight`.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

const MIN_HESSIAN: f64 = 1e-16;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostingParams {
    /// Number of boosting rounds (trees)
    pub n_estimators: usize,
    /// Shrinkage applied to every tree's output
    pub learning_rate: f64,
    pub max_depth: usize,
    /// Fraction of rows sampled per tree
    pub subsample: f64,
    /// Fraction of features sampled per tree
    pub colsample_bytree: f64,
    /// Minimum hessian sum in each child
    pub min_child_weight: f64,
    /// Minimum loss reduction to make a split
    pub gamma: f64,
    /// L2 penalty on leaf weights
    pub reg_lambda: f64,
    /// L1 penalty on leaf weights
    pub reg_alpha: f64,
    /// Weight of positive samples relative to negatives
    pub scale_pos_weight: f64,
    pub seed: u64,
}

impl Default for BoostingParams {
    fn default() -> Self {
        BoostingParams {
            n_estimators: 600,
            learning_rate: 0.05,
            max_depth: 6,
            subsample: 0.85,
            colsample_bytree: 0.8,
            min_child_weight: 4.,
            gamma: 0.5,
            reg_lambda: 1.5,
            reg_alpha: 0.1,
            scale_pos_weight: 1.,
            seed: 42,
        }
    }
}

impl BoostingParams {
    pub fn validate(&self) -> Result<()> {
        let fraction = |name: &str, v: f64| {
            if v > 0. && v <= 1. { Ok(()) } else { Err(Error::configuration(format!("{} must be in (0, 1], got {}", name, v))) }
        };
        let non_negative = |name: &str, v: f64| {
            if v >= 0. && v.is_finite() { Ok(()) } else { Err(Error::configuration(format!("{} must be non-negative, got {}", name, v))) }
        };

        if self.n_estimators == 0 {
            return Err(Error::configuration("n_estimators must be positive"));
        }
        if self.max_depth == 0 {
            return Err(Error::configuration("max_depth must be positive"));
        }
        if !(self.learning_rate > 0.) || !self.learning_rate.is_finite() {
            return Err(Error::configuration(format!("learning_rate must be positive, got {}", self.learning_rate)));
        }
        if !(self.scale_pos_weight > 0.) || !self.scale_pos_weight.is_finite() {
            return Err(Error::configuration(format!("scale_pos_weight must be positive, got {}", self.scale_pos_weight)));
        }
        fraction("subsample", self.subsample)?;
        fraction("colsample_bytree", self.colsample_bytree)?;
        non_negative("min_child_weight", self.min_child_weight)?;
        non_negative("gamma", self.gamma)?;
        non_negative("reg_lambda", self.reg_lambda)?;
        non_negative("reg_alpha", self.reg_alpha)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TreeNode {
    Leaf { weight: f64 },
    Split { feature: usize, threshold: f64, left: Box<TreeNode>, right: Box<TreeNode> },
}

impl TreeNode {
    pub fn predict(&self, row: &[f64]) -> f64 {
        let mut node = self;
        loop {
            match node {
                TreeNode::Leaf { weight } => return *weight,
                TreeNode::Split { feature, threshold, left, right } => {
                    node = if row[*feature] <= *threshold { left } else { right };
                }
            }
        }
    }

    pub fn depth(&self) -> usize {
        match self {
            TreeNode::Leaf { .. } => 0,
            TreeNode::Split { left, right, .. } => 1 + left.depth().max(right.depth()),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct SplitCandidate {
    feature: usize,
    threshold: f64,
    gain: f64,
}

impl SplitCandidate {
    /// Higher gain wins, lower feature index breaks ties.
    fn better(self, other: SplitCandidate) -> SplitCandidate {
        if other.gain > self.gain || (other.gain == self.gain && other.feature < self.feature) { other } else { self }
    }
}

/// Per-round training state shared by all nodes of one tree.
struct TreeBuilder<'a> {
    rows: &'a [Vec<f64>],
    grad: &'a [f64],
    hess: &'a [f64],
    features: Vec<usize>,
    params: &'a BoostingParams,
}

impl<'a> TreeBuilder<'a> {
    fn soft_threshold(&self, g: f64) -> f64 {
        let alpha = self.params.reg_alpha;
        if g > alpha { g - alpha } else if g < -alpha { g + alpha } else { 0. }
    }

    fn score(&self, g: f64, h: f64) -> f64 {
        let t = self.soft_threshold(g);
        t * t / (h + self.params.reg_lambda)
    }

    fn leaf_weight(&self, g: f64, h: f64) -> f64 {
        -self.soft_threshold(g) / (h + self.params.reg_lambda) * self.params.learning_rate
    }

    fn build(&self, idx: &[usize], depth: usize) -> TreeNode {
        let g: f64 = idx.iter().map(|&i| self.grad[i]).sum();
        let h: f64 = idx.iter().map(|&i| self.hess[i]).sum();

        if depth < self.params.max_depth && idx.len() >= 2 {
            if let Some(split) = self.best_split(idx, g, h) {
                let (left, right): (Vec<usize>, Vec<usize>) = idx.iter()
                    .partition(|&&i| self.rows[i][split.feature] <= split.threshold);

                return TreeNode::Split {
                    feature: split.feature,
                    threshold: split.threshold,
                    left: Box::new(self.build(&left, depth + 1)),
                    right: Box::new(self.build(&right, depth + 1)),
                };
            }
        }

        TreeNode::Leaf { weight: self.leaf_weight(g, h) }
    }

    fn best_split(&self, idx: &[usize], g: f64, h: f64) -> Option<SplitCandidate> {
        let parent = self.score(g, h);

        self.features
            .par_iter()
            .filter_map(|&f| self.best_split_for_feature(idx, f, g, h, parent))
            .reduce_with(SplitCandidate::better)
            .filter(|s| s.gain > 0.)
    }

    fn best_split_for_feature(&self, idx: &[usize], feature: usize, g: f64, h: f64, parent: f64) -> Option<SplitCandidate> {
        let mut sorted: Vec<(f64, usize)> = idx.iter().map(|&i| (self.rows[i][feature], i)).collect();
        sorted.sort_by(|a, b| a.0.total_cmp(&b.0));

        let min_child = self.params.min_child_weight;
        let mut best: Option<SplitCandidate> = None;
        let (mut gl, mut hl) = (0f64, 0f64);

        for k in 0..sorted.len() - 1 {
            let (value, i) = sorted[k];
            gl += self.grad[i];
            hl += self.hess[i];

            let next = sorted[k + 1].0;
            if next <= value { continue; }

            let (gr, hr) = (g - gl, h - hl);
            if hl < min_child || hr < min_child { continue; }

            let gain = 0.5 * (self.score(gl, hl) + self.score(gr, hr) - parent) - self.params.gamma;

            // Midpoint, falling back to the left value when the two are adjacent floats
            let mut threshold = value + (next - value) / 2.;
            if threshold >= next { threshold = value; }

            let candidate = SplitCandidate { feature, threshold, gain };
            best = Some(match best {
                Some(b) if b.gain >= gain => b,
                _ => candidate,
            });
        }

        best
    }
}

fn sigmoid(x: f64) -> f64 {
    1. / (1. + (-x).exp())
}

/// Fitted ensemble; the prediction is sigmoid(sum of tree outputs).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoostedTrees {
    params: BoostingParams,
    n_features: usize,
    trees: Vec<TreeNode>,
}

impl GradientBoostedTrees {
    pub fn fit(rows: &[Vec<f64>], labels: &[u8], params: &BoostingParams) -> Result<Self> {
        params.validate()?;
        if rows.is_empty() || rows.len() != labels.len() {
            return Err(Error::validation(format!("{} rows for {} labels", rows.len(), labels.len())));
        }
        let n_features = rows[0].len();
        if n_features == 0 || rows.iter().any(|r| r.len() != n_features) {
            return Err(Error::validation("Rows must share a non-empty feature dimension"));
        }

        let n = rows.len();
        let mut rng = ChaCha8Rng::seed_from_u64(params.seed);
        let mut margin = vec![0.; n];
        let mut grad = vec![0.; n];
        let mut hess = vec![0.; n];
        let mut trees = Vec::with_capacity(params.n_estimators);

        let n_rows = ((params.subsample * n as f64).round() as usize).max(1).min(n);
        let n_cols = ((params.colsample_bytree * n_features as f64).round() as usize).max(1).min(n_features);
        let mut all_rows: Vec<usize> = (0..n).collect();
        let mut all_cols: Vec<usize> = (0..n_features).collect();

        for round in 0..params.n_estimators {
            for i in 0..n {
                let p = sigmoid(margin[i]);
                let y = labels[i] as f64;
                let w = if labels[i] != 0 { params.scale_pos_weight } else { 1. };
                grad[i] = w * (p - y);
                hess[i] = (w * p * (1. - p)).max(MIN_HESSIAN);
            }

            all_rows.shuffle(&mut rng);
            let mut sample: Vec<usize> = all_rows[..n_rows].to_vec();
            sample.sort_unstable();

            all_cols.shuffle(&mut rng);
            let mut features: Vec<usize> = all_cols[..n_cols].to_vec();
            features.sort_unstable();

            let builder = TreeBuilder { rows, grad: &grad, hess: &hess, features, params };
            let tree = builder.build(&sample, 0);

            for (m, row) in margin.iter_mut().zip(rows.iter()) {
                *m += tree.predict(row);
            }

            if round % 100 == 0 {
                debug!(round, depth = tree.depth(), "boosting round");
            }
            trees.push(tree);
        }

        Ok(GradientBoostedTrees { params: params.clone(), n_features, trees })
    }

    pub fn params(&self) -> &BoostingParams {
        &self.params
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Caller guarantees `row.len() == n_features`.
    pub(crate) fn predict_proba_row(&self, row: &[f64]) -> f64 {
        sigmoid(self.trees.iter().map(|t| t.predict(row)).sum())
    }

    pub fn predict_proba(&self, rows: &[Vec<f64>]) -> Result<Vec<f64>> {
        if let Some(bad) = rows.iter().find(|r| r.len() != self.n_features) {
            return Err(Error::validation(format!(
                "Row has {} features, model was fit on {}", bad.len(), self.n_features
            )));
        }
        Ok(rows.par_iter().map(|r| self.predict_proba_row(r)).collect())
    }
}
