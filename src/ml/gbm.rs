use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, ServiceError};

/// Direction classes: 0 = down, 1 = neutral, 2 = up.
pub const NUM_CLASSES: usize = 3;

const MIN_SAMPLES_SPLIT: usize = 4;

pub fn class_to_label(class: usize) -> i32 {
    class as i32 - 1
}

pub fn label_to_class(label: i32) -> usize {
    (label + 1) as usize
}

/// Boosting hyperparameters. The service trains with the fixed production
/// set (100 trees, depth 5, learning rate 0.1); the fallback model uses a
/// 10-tree variant of the same.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GbmParams {
    pub n_trees: usize,
    pub max_depth: usize,
    pub learning_rate: f64,
}

impl Default for GbmParams {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: 5,
            learning_rate: 0.1,
        }
    }
}

impl GbmParams {
    pub fn fallback() -> Self {
        Self {
            n_trees: 10,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        value: f64,
    },
}

/// Depth-limited regression tree fit to per-class residuals.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RegressionTree {
    nodes: Vec<Node>,
}

impl RegressionTree {
    fn fit(x: &Array2<f64>, residuals: &[f64], max_depth: usize) -> Self {
        let rows: Vec<usize> = (0..x.nrows()).collect();
        let mut tree = Self { nodes: Vec::new() };
        tree.build(x, residuals, &rows, max_depth);
        tree
    }

    fn build(&mut self, x: &Array2<f64>, residuals: &[f64], rows: &[usize], depth: usize) -> usize {
        let mean = rows.iter().map(|&i| residuals[i]).sum::<f64>() / rows.len() as f64;

        if depth == 0 || rows.len() < MIN_SAMPLES_SPLIT {
            return self.push_leaf(mean);
        }

        let Some((feature, threshold)) = best_split(x, residuals, rows) else {
            return self.push_leaf(mean);
        };

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) =
            rows.iter().partition(|&&i| x[[i, feature]] <= threshold);

        if left_rows.is_empty() || right_rows.is_empty() {
            return self.push_leaf(mean);
        }

        // reserve the split slot before recursing so child indices are known
        let index = self.nodes.len();
        self.nodes.push(Node::Leaf { value: mean });
        let left = self.build(x, residuals, &left_rows, depth - 1);
        let right = self.build(x, residuals, &right_rows, depth - 1);
        self.nodes[index] = Node::Split {
            feature,
            threshold,
            left,
            right,
        };
        index
    }

    fn push_leaf(&mut self, value: f64) -> usize {
        self.nodes.push(Node::Leaf { value });
        self.nodes.len() - 1
    }

    fn predict_row(&self, features: &[f64]) -> f64 {
        let mut index = 0;
        loop {
            match &self.nodes[index] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    index = if features[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }
}

/// Pick the (feature, threshold) pair maximizing variance reduction over the
/// given rows. Candidate thresholds are subsampled from the sorted values to
/// bound the scan. Fully deterministic: ties keep the first best.
fn best_split(x: &Array2<f64>, residuals: &[f64], rows: &[usize]) -> Option<(usize, f64)> {
    let n = rows.len() as f64;
    let total: f64 = rows.iter().map(|&i| residuals[i]).sum();
    let parent_score = total * total / n;

    let mut best: Option<(usize, f64)> = None;
    let mut best_gain = 1e-12;

    for feature in 0..x.ncols() {
        let mut pairs: Vec<(f64, f64)> = rows
            .iter()
            .map(|&i| (x[[i, feature]], residuals[i]))
            .collect();
        pairs.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

        let step = (pairs.len() / 16).max(1);
        let mut left_sum = 0.0;

        for (idx, (value, residual)) in pairs.iter().enumerate() {
            left_sum += residual;
            let left_n = (idx + 1) as f64;
            let right_n = n - left_n;
            if right_n == 0.0 {
                break;
            }
            // only split between distinct values, at the sampled positions
            if idx % step != 0 || *value == pairs[idx + 1].0 {
                continue;
            }

            let right_sum = total - left_sum;
            let gain = left_sum * left_sum / left_n + right_sum * right_sum / right_n
                - parent_score;
            if gain > best_gain {
                best_gain = gain;
                best = Some((feature, *value));
            }
        }
    }

    best
}

/// Multiclass gradient-boosted classifier over depth-limited regression
/// trees, one tree per class per boosting round, softmax readout.
///
/// Serializable as a self-contained artifact; loading it back reproduces
/// predictions exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradientBoostedClassifier {
    params: GbmParams,
    n_features: usize,
    base_scores: [f64; NUM_CLASSES],
    /// trees[round][class]
    trees: Vec<Vec<RegressionTree>>,
}

impl GradientBoostedClassifier {
    /// Fit on a feature matrix and direction labels (-1, 0, 1).
    pub fn fit(x: &Array2<f64>, labels: &[i32], params: GbmParams) -> Result<Self> {
        let n = x.nrows();
        if n == 0 {
            return Err(ServiceError::InvalidInput(
                "empty training matrix".to_string(),
            ));
        }
        if labels.len() != n {
            return Err(ServiceError::InvalidInput(format!(
                "feature/label length mismatch: {} vs {}",
                n,
                labels.len()
            )));
        }

        let classes: Vec<usize> = labels.iter().map(|&l| label_to_class(l)).collect();
        if classes.iter().any(|&c| c >= NUM_CLASSES) {
            return Err(ServiceError::InvalidInput(
                "labels must be -1, 0 or 1".to_string(),
            ));
        }

        // log-prior base scores; empty classes get a floor instead of -inf
        let mut counts = [0usize; NUM_CLASSES];
        for &c in &classes {
            counts[c] += 1;
        }
        let mut base_scores = [0.0; NUM_CLASSES];
        for k in 0..NUM_CLASSES {
            let prior = (counts[k] as f64 / n as f64).max(1e-6);
            base_scores[k] = prior.ln();
        }

        let mut model = Self {
            params,
            n_features: x.ncols(),
            base_scores,
            trees: Vec::with_capacity(params.n_trees),
        };

        let mut scores = vec![base_scores; n];
        let mut residuals = vec![0.0; n];

        for round in 0..params.n_trees {
            let probs: Vec<[f64; NUM_CLASSES]> = scores.iter().map(softmax).collect();

            let mut round_trees = Vec::with_capacity(NUM_CLASSES);
            for k in 0..NUM_CLASSES {
                for i in 0..n {
                    let target = if classes[i] == k { 1.0 } else { 0.0 };
                    residuals[i] = target - probs[i][k];
                }
                round_trees.push(RegressionTree::fit(x, &residuals, params.max_depth));
            }
            for i in 0..n {
                let row: Vec<f64> = x.row(i).to_vec();
                for k in 0..NUM_CLASSES {
                    scores[i][k] += params.learning_rate * round_trees[k].predict_row(&row);
                }
            }
            model.trees.push(round_trees);

            if (round + 1) % 25 == 0 {
                debug!("boosting round {}/{}", round + 1, params.n_trees);
            }
        }

        Ok(model)
    }

    /// Class posterior probabilities for one feature row.
    pub fn predict_proba(&self, features: &[f64]) -> Result<[f64; NUM_CLASSES]> {
        if features.len() != self.n_features {
            return Err(ServiceError::InvalidInput(format!(
                "expected {} features, got {}",
                self.n_features,
                features.len()
            )));
        }

        let mut scores = self.base_scores;
        for round in &self.trees {
            for (k, tree) in round.iter().enumerate() {
                scores[k] += self.params.learning_rate * tree.predict_row(features);
            }
        }
        Ok(softmax(&scores))
    }

    /// Predicted direction label (-1, 0, 1) with its posterior probability.
    pub fn predict(&self, features: &[f64]) -> Result<(i32, f64)> {
        let probs = self.predict_proba(features)?;
        let (class, prob) = probs
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(k, p)| (k, *p))
            .unwrap_or((1, 1.0 / NUM_CLASSES as f64));
        Ok((class_to_label(class), prob))
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }
}

fn softmax(scores: &[f64; NUM_CLASSES]) -> [f64; NUM_CLASSES] {
    let max = scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let mut out = [0.0; NUM_CLASSES];
    let mut sum = 0.0;
    for k in 0..NUM_CLASSES {
        out[k] = (scores[k] - max).exp();
        sum += out[k];
    }
    for value in &mut out {
        *value /= sum;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    /// Three clusters along the first feature, one per class.
    fn separable_dataset() -> (Array2<f64>, Vec<i32>) {
        let n = 150;
        let mut x = Array2::zeros((n, 4));
        let mut labels = Vec::with_capacity(n);
        for i in 0..n {
            let label = (i % 3) as i32 - 1;
            let center = label as f64 * 10.0;
            x[[i, 0]] = center + (i as f64 * 0.037).sin();
            x[[i, 1]] = (i as f64 * 0.11).cos();
            x[[i, 2]] = i as f64 / n as f64;
            x[[i, 3]] = 1.0;
            labels.push(label);
        }
        (x, labels)
    }

    #[test]
    fn fits_separable_data() {
        let (x, labels) = separable_dataset();
        let params = GbmParams {
            n_trees: 20,
            max_depth: 3,
            learning_rate: 0.1,
        };
        let model = GradientBoostedClassifier::fit(&x, &labels, params).unwrap();

        let mut correct = 0;
        for i in 0..x.nrows() {
            let row: Vec<f64> = x.row(i).to_vec();
            let (label, prob) = model.predict(&row).unwrap();
            assert!((0.0..=1.0).contains(&prob));
            if label == labels[i] {
                correct += 1;
            }
        }
        assert!(correct as f64 / x.nrows() as f64 > 0.9);
    }

    #[test]
    fn probabilities_sum_to_one() {
        let (x, labels) = separable_dataset();
        let params = GbmParams {
            n_trees: 5,
            max_depth: 2,
            learning_rate: 0.1,
        };
        let model = GradientBoostedClassifier::fit(&x, &labels, params).unwrap();
        let probs = model.predict_proba(&[0.0, 0.0, 0.5, 1.0]).unwrap();
        let sum: f64 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn fit_is_deterministic() {
        let (x, labels) = separable_dataset();
        let params = GbmParams {
            n_trees: 8,
            max_depth: 3,
            learning_rate: 0.1,
        };
        let a = GradientBoostedClassifier::fit(&x, &labels, params).unwrap();
        let b = GradientBoostedClassifier::fit(&x, &labels, params).unwrap();
        for i in 0..x.nrows() {
            let row: Vec<f64> = x.row(i).to_vec();
            assert_eq!(
                a.predict_proba(&row).unwrap(),
                b.predict_proba(&row).unwrap()
            );
        }
    }

    #[test]
    fn serialization_round_trip_preserves_predictions() {
        let (x, labels) = separable_dataset();
        let params = GbmParams {
            n_trees: 5,
            max_depth: 3,
            learning_rate: 0.1,
        };
        let model = GradientBoostedClassifier::fit(&x, &labels, params).unwrap();
        let json = serde_json::to_string(&model).unwrap();
        let restored: GradientBoostedClassifier = serde_json::from_str(&json).unwrap();

        assert_eq!(restored.n_trees(), model.n_trees());
        assert_eq!(restored.n_features(), model.n_features());
        let row: Vec<f64> = x.row(7).to_vec();
        assert_eq!(
            model.predict_proba(&row).unwrap(),
            restored.predict_proba(&row).unwrap()
        );
    }

    #[test]
    fn rejects_wrong_feature_width() {
        let (x, labels) = separable_dataset();
        let params = GbmParams {
            n_trees: 2,
            max_depth: 2,
            learning_rate: 0.1,
        };
        let model = GradientBoostedClassifier::fit(&x, &labels, params).unwrap();
        assert!(matches!(
            model.predict_proba(&[1.0, 2.0]),
            Err(ServiceError::InvalidInput(_))
        ));
    }

    #[test]
    fn rejects_mismatched_labels() {
        let x = Array2::zeros((10, 2));
        let labels = vec![0; 9];
        assert!(matches!(
            GradientBoostedClassifier::fit(&x, &labels, GbmParams::default()),
            Err(ServiceError::InvalidInput(_))
        ));
    }
}
