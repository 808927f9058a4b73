use std::path::PathBuf;

use chrono::Utc;
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::info;

use super::gbm::{label_to_class, GbmParams, GradientBoostedClassifier, NUM_CLASSES};
use super::store::{ModelArtifact, ModelStore};
use crate::data::TrainingDataSource;
use crate::error::{Result, ServiceError};
use crate::features::{derive_labels, FeatureSet};

/// Minimum historical rows and aligned samples for a training run.
const MIN_SAMPLES: usize = 100;

/// Seed for the train/test split, fixed for reproducible runs.
const SPLIT_SEED: u64 = 42;

const TEST_FRACTION: f64 = 0.2;

/// Metrics and artifact location returned by a training run.
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub accuracy: f64,
    pub training_samples: usize,
    pub test_samples: usize,
    pub model_path: PathBuf,
}

/// One-shot batch trainer: fetch history, derive features and labels, fit a
/// fresh classifier, and persist it. Each run fully replaces the "latest"
/// artifact for its symbol/timeframe.
pub struct Trainer {
    data_source: TrainingDataSource,
    store: ModelStore,
    params: GbmParams,
    look_ahead: usize,
    threshold: f64,
}

impl Trainer {
    pub fn new(
        data_source: TrainingDataSource,
        store: ModelStore,
        look_ahead: usize,
        threshold: f64,
    ) -> Self {
        Self {
            data_source,
            store,
            params: GbmParams::default(),
            look_ahead,
            threshold,
        }
    }

    #[cfg(test)]
    fn with_params(mut self, params: GbmParams) -> Self {
        self.params = params;
        self
    }

    pub async fn train(
        &self,
        symbol: &str,
        timeframe: &str,
        lookback_periods: usize,
    ) -> Result<TrainingOutcome> {
        info!("starting model training for {} {}", symbol, timeframe);

        let rows = self
            .data_source
            .fetch(symbol, timeframe, lookback_periods)
            .await;
        if rows.len() < MIN_SAMPLES {
            return Err(ServiceError::DataUnavailable(format!(
                "{} rows for {} {}, need at least {}",
                rows.len(),
                symbol,
                timeframe,
                MIN_SAMPLES
            )));
        }
        info!("retrieved {} rows of training data", rows.len());

        let features: Vec<[f64; FeatureSet::NUM_FEATURES]> = rows
            .iter()
            .map(|row| FeatureSet::from_snapshot(&row.to_snapshot()).to_array())
            .collect();
        let closes: Vec<f64> = rows.iter().map(|row| row.close).collect();
        let labels = derive_labels(&closes, self.look_ahead, self.threshold)?;

        let aligned = features.len().min(labels.len());
        if aligned < MIN_SAMPLES {
            return Err(ServiceError::InsufficientData(format!(
                "{} aligned feature/label samples, need at least {}",
                aligned, MIN_SAMPLES
            )));
        }
        let features = &features[..aligned];
        let labels = &labels[..aligned];

        let (train_idx, test_idx) = stratified_split(labels, TEST_FRACTION, SPLIT_SEED);
        info!(
            "training set size: {}, test set size: {}",
            train_idx.len(),
            test_idx.len()
        );

        let x_train = matrix_from(features, &train_idx);
        let y_train: Vec<i32> = train_idx.iter().map(|&i| labels[i]).collect();
        let model = GradientBoostedClassifier::fit(&x_train, &y_train, self.params)?;

        let mut correct = 0;
        let mut class_counts = [0usize; NUM_CLASSES];
        for &i in &test_idx {
            let (predicted, _) = model.predict(&features[i])?;
            class_counts[label_to_class(labels[i])] += 1;
            if predicted == labels[i] {
                correct += 1;
            }
        }
        let accuracy = if test_idx.is_empty() {
            0.0
        } else {
            correct as f64 / test_idx.len() as f64
        };
        info!(
            "model accuracy: {:.4} (test distribution down/neutral/up: {}/{}/{})",
            accuracy, class_counts[0], class_counts[1], class_counts[2]
        );

        let artifact = ModelArtifact {
            model,
            feature_names: FeatureSet::feature_names(),
            symbol: symbol.to_string(),
            timeframe: timeframe.to_string(),
            accuracy,
            trained_at: Utc::now().to_rfc3339(),
        };
        let model_path = self.store.save(&artifact)?;

        Ok(TrainingOutcome {
            accuracy,
            training_samples: train_idx.len(),
            test_samples: test_idx.len(),
            model_path,
        })
    }
}

fn matrix_from(features: &[[f64; FeatureSet::NUM_FEATURES]], idx: &[usize]) -> Array2<f64> {
    let mut x = Array2::zeros((idx.len(), FeatureSet::NUM_FEATURES));
    for (row, &i) in idx.iter().enumerate() {
        for (col, value) in features[i].iter().enumerate() {
            x[[row, col]] = *value;
        }
    }
    x
}

/// Shuffle within each class and carve off the test fraction per class, so
/// the held-out set keeps the label distribution of the full sample.
fn stratified_split(labels: &[i32], test_fraction: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut rng = StdRng::seed_from_u64(seed);

    let mut by_class: [Vec<usize>; NUM_CLASSES] = Default::default();
    for (i, &label) in labels.iter().enumerate() {
        by_class[label_to_class(label)].push(i);
    }

    let mut train = Vec::new();
    let mut test = Vec::new();
    for group in &mut by_class {
        group.shuffle(&mut rng);
        let test_n = if group.len() < 2 {
            0
        } else {
            ((group.len() as f64 * test_fraction).round() as usize).max(1)
        };
        test.extend_from_slice(&group[..test_n]);
        train.extend_from_slice(&group[test_n..]);
    }

    (train, test)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store(tag: &str) -> (ModelStore, std::path::PathBuf) {
        let dir = std::env::temp_dir().join(format!("mlsvc_train_{}_{}", tag, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        (ModelStore::new(dir.clone()), dir)
    }

    #[test]
    fn stratified_split_preserves_class_proportions() {
        let mut labels = Vec::new();
        labels.extend(std::iter::repeat(1).take(50));
        labels.extend(std::iter::repeat(0).take(30));
        labels.extend(std::iter::repeat(-1).take(20));

        let (train, test) = stratified_split(&labels, 0.2, 42);
        assert_eq!(train.len() + test.len(), labels.len());
        assert_eq!(test.len(), 20);

        let test_up = test.iter().filter(|&&i| labels[i] == 1).count();
        let test_neutral = test.iter().filter(|&&i| labels[i] == 0).count();
        let test_down = test.iter().filter(|&&i| labels[i] == -1).count();
        assert_eq!((test_up, test_neutral, test_down), (10, 6, 4));
    }

    #[test]
    fn stratified_split_is_reproducible() {
        let labels: Vec<i32> = (0..200).map(|i| (i % 3) - 1).collect();
        let a = stratified_split(&labels, 0.2, 42);
        let b = stratified_split(&labels, 0.2, 42);
        assert_eq!(a, b);
    }

    #[test]
    fn too_few_rows_fails_without_persisting() {
        let (store, dir) = temp_store("short");
        let trainer = Trainer::new(TrainingDataSource::new(None), store, 5, 0.005);

        let err = tokio_test::block_on(trainer.train("ETHUSDT", "1h", 50)).unwrap_err();
        assert!(matches!(err, ServiceError::DataUnavailable(_)));
        assert!(!dir.exists());
    }

    #[test]
    fn mock_training_run_persists_latest_and_archive() {
        let (store, dir) = temp_store("full");
        let trainer = Trainer::new(TrainingDataSource::new(None), store.clone(), 5, 0.005)
            .with_params(GbmParams {
                n_trees: 10,
                max_depth: 3,
                learning_rate: 0.1,
            });

        let outcome = tokio_test::block_on(trainer.train("ETHUSDT", "1h", 300)).unwrap();
        assert!(outcome.training_samples >= 200);
        assert!(outcome.test_samples >= 50);
        assert!((0.0..=1.0).contains(&outcome.accuracy));
        assert!(outcome.model_path.exists());

        let loaded = store.load_latest("ETHUSDT", "1h").unwrap();
        assert_eq!(loaded.symbol, "ETHUSDT");
        assert_eq!(loaded.timeframe, "1h");
        assert_eq!(loaded.accuracy, outcome.accuracy);
        assert_eq!(loaded.feature_names.len(), FeatureSet::NUM_FEATURES);

        let _ = std::fs::remove_dir_all(dir);
    }
}
