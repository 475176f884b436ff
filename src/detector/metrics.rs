use serde::{Deserialize, Serialize};

// Guards the F1 denominator
const F1_EPSILON: f64 = 1e-12;

/// Validation-split scores of the positive (accident) class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationMetrics {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub roc_auc: f64,
    /// [[TN, FP], [FN, TP]]
    pub confusion_matrix: [[u64; 2]; 2],
}

impl ClassificationMetrics {
    /// Scores of hard predictions `predicted` against `truth`, plus ROC-AUC over `scores`.
    pub fn compute(truth: &[u8], predicted: &[u8], scores: &[f64]) -> Self {
        let mut cm = [[0u64; 2]; 2];
        for (&t, &p) in truth.iter().zip(predicted.iter()) {
            cm[(t != 0) as usize][(p != 0) as usize] += 1;
        }
        let [[tn, fp], [fn_, tp]] = cm;

        let precision = ratio(tp, tp + fp);
        let recall = ratio(tp, tp + fn_);
        let f1 = if precision + recall > 0. { 2. * precision * recall / (precision + recall) } else { 0. };

        ClassificationMetrics {
            accuracy: ratio(tp + tn, tp + tn + fp + fn_),
            precision,
            recall,
            f1,
            roc_auc: roc_auc(truth, scores),
            confusion_matrix: cm,
        }
    }
}

fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 { 0. } else { num as f64 / den as f64 }
}

/// Area under the ROC curve as the normalized Mann-Whitney U statistic.
///
/// Tied scores share their average rank. Returns 0.5 when `truth` holds a
/// single class.
pub fn roc_auc(truth: &[u8], scores: &[f64]) -> f64 {
    let n_pos = truth.iter().filter(|&&t| t != 0).count();
    let n_neg = truth.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return 0.5;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut pos_rank_sum = 0.;
    let mut i = 0;
    while i < order.len() {
        let tie = order[i..].iter().take_while(|&&k| scores[k] == scores[order[i]]).count();
        // Ranks are 1-based: i+1 ..= i+tie
        let avg_rank = i as f64 + (tie as f64 + 1.) / 2.;
        pos_rank_sum += avg_rank * order[i..i + tie].iter().filter(|&&k| truth[k] != 0).count() as f64;
        i += tie;
    }

    let (n_pos, n_neg) = (n_pos as f64, n_neg as f64);
    (pos_rank_sum - n_pos * (n_pos + 1.) / 2.) / (n_pos * n_neg)
}

/// Precision-recall pairs for every distinct score used as a cutoff (`score >= t`).
///
/// Thresholds are increasing. `precision` and `recall` have one more entry than
/// `thresholds`: the terminal point (precision 1, recall 0) with no threshold.
/// When `truth` holds no positives, recall is 1 at every threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct PrecisionRecallCurve {
    pub precision: Vec<f64>,
    pub recall: Vec<f64>,
    pub thresholds: Vec<f64>,
}

impl PrecisionRecallCurve {
    pub fn compute(truth: &[u8], scores: &[f64]) -> Self {
        let mut order: Vec<usize> = (0..scores.len()).collect();
        order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

        // Cumulative true/false positives at the last index of each distinct score
        let mut tps = Vec::new();
        let mut fps = Vec::new();
        let mut thresholds = Vec::new();
        let (mut tp, mut fp) = (0u64, 0u64);
        for (pos, &k) in order.iter().enumerate() {
            if truth[k] != 0 { tp += 1; } else { fp += 1; }
            let last_of_run = order.get(pos + 1).map_or(true, |&next| scores[next] != scores[k]);
            if last_of_run {
                tps.push(tp);
                fps.push(fp);
                thresholds.push(scores[k]);
            }
        }

        let total_pos = tp;
        let mut precision: Vec<f64> = tps.iter().zip(fps.iter()).rev().map(|(&tp, &fp)| ratio(tp, tp + fp)).collect();
        let mut recall: Vec<f64> = tps.iter().rev()
            .map(|&tp| if total_pos == 0 { 1. } else { tp as f64 / total_pos as f64 })
            .collect();
        thresholds.reverse();

        precision.push(1.);
        recall.push(0.);

        PrecisionRecallCurve { precision, recall, thresholds }
    }

    /// `[0.0]` followed by the curve thresholds; index-aligned with `precision`/`recall`.
    pub fn threshold_candidates(&self) -> Vec<f64> {
        std::iter::once(0.).chain(self.thresholds.iter().cloned()).collect()
    }

    pub fn f1_scores(&self) -> Vec<f64> {
        self.precision.iter().zip(self.recall.iter())
            .map(|(p, r)| 2. * p * r / (p + r + F1_EPSILON))
            .collect()
    }
}

/// Decision threshold maximizing F1.
#[prefix_all("optimal_")]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OptimalOperatingPoint {
    pub threshold: f64,
    pub precision: f64,
    pub recall: f64,
}

/// Smallest candidate threshold reaching the target recall.
#[prefix_all("recall_")]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecallOperatingPoint {
    pub threshold: f64,
    pub precision: f64,
    pub recall: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdSelection {
    #[serde(flatten)]
    pub optimal: OptimalOperatingPoint,
    #[serde(flatten)]
    pub at_recall: RecallOperatingPoint,
}

/// Pick the F1-optimal threshold and the threshold reaching `target_recall`.
///
/// If no candidate reaches `target_recall`, the recall point falls back to the
/// F1-optimal one.
pub fn select_thresholds(truth: &[u8], scores: &[f64], target_recall: f64) -> ThresholdSelection {
    let curve = PrecisionRecallCurve::compute(truth, scores);
    let candidates = curve.threshold_candidates();
    let candidate = |idx: usize| candidates[idx.min(candidates.len() - 1)];

    // First maximum, like argmax
    let f1 = curve.f1_scores();
    let best = f1.iter().enumerate()
        .fold(0, |best, (i, &v)| if v > f1[best] { i } else { best });

    let optimal = OptimalOperatingPoint {
        threshold: candidate(best),
        precision: curve.precision[best],
        recall: curve.recall[best],
    };

    let at_recall = match curve.recall.iter().position(|&r| r >= target_recall) {
        Some(idx) => RecallOperatingPoint {
            threshold: candidate(idx),
            precision: curve.precision[idx],
            recall: curve.recall[idx],
        },
        None => RecallOperatingPoint {
            threshold: optimal.threshold,
            precision: optimal.precision,
            recall: optimal.recall,
        },
    };

    ThresholdSelection { optimal, at_recall }
}

/// Mean and population standard deviation of per-fold scores.
#[prefix_all("cv_")]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CrossValidationSummary {
    pub auc_mean: f64,
    pub auc_std: f64,
    pub recall_mean: f64,
    pub recall_std: f64,
}

impl CrossValidationSummary {
    pub fn from_folds(aucs: &[f64], recalls: &[f64]) -> Self {
        let (auc_mean, auc_std) = mean_std(aucs);
        let (recall_mean, recall_std) = mean_std(recalls);
        CrossValidationSummary { auc_mean, auc_std, recall_mean, recall_std }
    }
}

fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0., 0.);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

/// The metrics document written next to a trained model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorMetrics {
    #[serde(flatten)]
    pub classification: ClassificationMetrics,
    #[serde(flatten)]
    pub thresholds: ThresholdSelection,
    pub positive_weight: f64,
    pub n_train: usize,
    pub n_validation: usize,
    #[serde(flatten)]
    pub cross_validation: Option<CrossValidationSummary>,
}


#[cfg(test)]
mod tests {
    use crate::detector::metrics::{ClassificationMetrics, CrossValidationSummary, DetectorMetrics,
                                   PrecisionRecallCurve, roc_auc, select_thresholds};

    #[test]
    fn confusion_matrix_layout() {
        let truth = [0, 0, 1, 1, 1];
        let predicted = [0, 1, 0, 1, 1];
        let m = ClassificationMetrics::compute(&truth, &predicted, &[0.1, 0.6, 0.4, 0.8, 0.9]);

        assert_eq!(m.confusion_matrix, [[1, 1], [1, 2]]);
        assert_eq!(m.accuracy, 0.6);
        assert!((m.precision - 2. / 3.).abs() < 1e-12);
        assert!((m.recall - 2. / 3.).abs() < 1e-12);
        assert!((m.f1 - 2. / 3.).abs() < 1e-12);
        assert!((m.roc_auc - 5. / 6.).abs() < 1e-12);
    }

    #[test]
    fn no_predicted_positives() {
        let m = ClassificationMetrics::compute(&[0, 1], &[0, 0], &[0.1, 0.2]);
        assert_eq!(m.precision, 0.);
        assert_eq!(m.f1, 0.);
    }

    #[test]
    fn auc_with_ties() {
        assert_eq!(roc_auc(&[0, 0, 1, 1], &[0.1, 0.2, 0.3, 0.4]), 1.);
        assert_eq!(roc_auc(&[1, 1, 0, 0], &[0.1, 0.2, 0.3, 0.4]), 0.);
        assert_eq!(roc_auc(&[0, 1], &[0.5, 0.5]), 0.5);
        assert_eq!(roc_auc(&[1, 1, 1], &[0.1, 0.2, 0.3]), 0.5);
    }

    #[test]
    fn precision_recall_curve() {
        let curve = PrecisionRecallCurve::compute(&[0, 0, 1, 1], &[0.1, 0.4, 0.35, 0.8]);

        assert_eq!(curve.thresholds, vec![0.1, 0.35, 0.4, 0.8]);
        assert_eq!(curve.precision, vec![0.5, 2. / 3., 0.5, 1., 1.]);
        assert_eq!(curve.recall, vec![1., 1., 0.5, 0.5, 0.]);
        assert_eq!(curve.threshold_candidates(), vec![0., 0.1, 0.35, 0.4, 0.8]);
    }

    #[test]
    fn curve_without_positives() {
        let curve = PrecisionRecallCurve::compute(&[0, 0], &[0.2, 0.7]);
        assert_eq!(curve.recall, vec![1., 1., 0.]);
        assert_eq!(curve.precision, vec![0., 0., 1.]);
    }

    #[test]
    fn thresholds_follow_candidate_alignment() {
        let selection = select_thresholds(&[0, 0, 1, 1], &[0.1, 0.4, 0.35, 0.8], 0.9);

        // Best F1 at index 1 (P=2/3, R=1), paired with candidate[1]
        assert_eq!(selection.optimal.threshold, 0.1);
        assert_eq!(selection.optimal.precision, 2. / 3.);
        assert_eq!(selection.optimal.recall, 1.);

        assert_eq!(selection.at_recall.threshold, 0.);
        assert_eq!(selection.at_recall.recall, 1.);
        assert!(selection.at_recall.threshold <= selection.optimal.threshold);
    }

    #[test]
    fn unreachable_recall_falls_back_to_f1() {
        let selection = select_thresholds(&[0, 0, 1, 1], &[0.1, 0.4, 0.35, 0.8], 1.5);
        assert_eq!(selection.at_recall.threshold, selection.optimal.threshold);
        assert_eq!(selection.at_recall.precision, selection.optimal.precision);
        assert_eq!(selection.at_recall.recall, selection.optimal.recall);
    }

    #[test]
    fn cv_summary() {
        let cv = CrossValidationSummary::from_folds(&[0.8, 1.0], &[0.5, 0.5]);
        assert!((cv.auc_mean - 0.9).abs() < 1e-12);
        assert!((cv.auc_std - 0.1).abs() < 1e-12);
        assert_eq!(cv.recall_std, 0.);
    }

    #[test]
    fn metrics_document_keys() {
        let truth = [0, 0, 1, 1];
        let scores = [0.1, 0.4, 0.35, 0.8];
        let metrics = DetectorMetrics {
            classification: ClassificationMetrics::compute(&truth, &[0, 0, 0, 1], &scores),
            thresholds: select_thresholds(&truth, &scores, 0.9),
            positive_weight: 1.,
            n_train: 16,
            n_validation: 4,
            cross_validation: None,
        };

        let json = serde_json::to_value(&metrics).unwrap();
        for key in &["accuracy", "precision", "recall", "f1", "roc_auc", "confusion_matrix",
                     "optimal_threshold", "optimal_precision", "optimal_recall",
                     "recall_threshold", "recall_precision", "recall_recall",
                     "positive_weight", "n_train", "n_validation"] {
            assert!(json.get(key).is_some(), "missing {}", key);
        }
        assert!(json.get("cv_auc_mean").is_none());
        assert_eq!(json["confusion_matrix"], serde_json::json!([[2, 0], [1, 1]]));

        let with_cv = DetectorMetrics {
            cross_validation: Some(CrossValidationSummary::from_folds(&[0.9], &[0.8])),
            ..metrics
        };
        let text = serde_json::to_string(&with_cv).unwrap();
        assert!(text.contains("\"cv_recall_mean\":0.8"));
        assert_eq!(serde_json::from_str::<DetectorMetrics>(&text).unwrap(), with_cv);
    }
}
