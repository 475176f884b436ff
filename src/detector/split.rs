use counter::Counter;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::error::{Error, Result};

/// Row indices per class (0, 1), each shuffled with the same seeded generator.
fn shuffled_classes(labels: &[u8], seed: u64) -> [Vec<usize>; 2] {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut classes = [Vec::new(), Vec::new()];
    for (i, &label) in labels.iter().enumerate() {
        classes[(label != 0) as usize].push(i);
    }
    for class in classes.iter_mut() {
        class.shuffle(&mut rng);
    }
    classes
}

/// Class counts, keyed by label.
pub fn class_counts(labels: &[u8]) -> Counter<u8> {
    labels.iter().map(|&l| (l != 0) as u8).collect()
}

/// Stratified train/validation split; returns sorted (train, validation) indices.
///
/// Each class keeps its proportion: max(1, round(test_size * count)) of its
/// members go to validation, leaving at least one for training.
pub fn stratified_split(labels: &[u8], test_size: f64, seed: u64) -> Result<(Vec<usize>, Vec<usize>)> {
    if !(test_size > 0. && test_size < 1.) {
        return Err(Error::configuration(format!("test_size must be in (0, 1), got {}", test_size)));
    }

    let counts = class_counts(labels);
    if counts.len() < 2 {
        return Err(Error::configuration("Need at least two label classes to stratify"));
    }
    if let Some((class, count)) = counts.iter().find(|&(_, &count)| count < 2) {
        return Err(Error::configuration(format!(
            "Class {} has only {} member, need at least 2 to stratify", class, count
        )));
    }

    let mut train = Vec::new();
    let mut validation = Vec::new();
    for class in shuffled_classes(labels, seed).iter() {
        let n_test = ((test_size * class.len() as f64).round() as usize).max(1).min(class.len() - 1);
        validation.extend_from_slice(&class[..n_test]);
        train.extend_from_slice(&class[n_test..]);
    }

    train.sort_unstable();
    validation.sort_unstable();
    Ok((train, validation))
}

/// Stratified k-fold: per class, shuffled members are dealt round-robin into folds.
/// Returns (train, validation) index pairs, one per fold.
pub fn stratified_k_fold(labels: &[u8], n_splits: usize, seed: u64) -> Result<Vec<(Vec<usize>, Vec<usize>)>> {
    if n_splits < 2 {
        return Err(Error::configuration(format!("n_splits must be at least 2, got {}", n_splits)));
    }

    let counts = class_counts(labels);
    if counts.len() < 2 {
        return Err(Error::configuration("Need at least two label classes for cross-validation"));
    }
    if let Some((class, count)) = counts.iter().find(|&(_, &count)| count < n_splits) {
        return Err(Error::configuration(format!(
            "Class {} has {} members, fewer than n_splits={}", class, count, n_splits
        )));
    }

    let mut folds: Vec<Vec<usize>> = vec![Vec::new(); n_splits];
    for class in shuffled_classes(labels, seed).iter() {
        for (i, &idx) in class.iter().enumerate() {
            folds[i % n_splits].push(idx);
        }
    }

    Ok((0..n_splits).map(|k| {
        let mut validation = folds[k].clone();
        let mut train: Vec<usize> = folds.iter().enumerate()
            .filter(|(j, _)| *j != k)
            .flat_map(|(_, fold)| fold.iter().cloned())
            .collect();
        validation.sort_unstable();
        train.sort_unstable();
        (train, validation)
    }).collect())
}
