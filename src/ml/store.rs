use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::gbm::GradientBoostedClassifier;
use crate::error::{Result, ServiceError};

/// Trained classifier plus the metadata needed to serve and describe it.
///
/// `trained_at` is RFC 3339, or the literal "fallback" for the synthetic
/// stand-in model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub model: GradientBoostedClassifier,
    pub feature_names: Vec<String>,
    pub symbol: String,
    pub timeframe: String,
    pub accuracy: f64,
    pub trained_at: String,
}

/// Filesystem persistence for model artifacts, keyed by symbol + timeframe.
///
/// Each training run writes an immutable timestamped archive and overwrites
/// the "latest" pointer the predictor loads from.
#[derive(Debug, Clone)]
pub struct ModelStore {
    model_dir: PathBuf,
}

impl ModelStore {
    pub fn new(model_dir: impl Into<PathBuf>) -> Self {
        Self {
            model_dir: model_dir.into(),
        }
    }

    pub fn latest_path(&self, symbol: &str, timeframe: &str) -> PathBuf {
        self.model_dir
            .join(format!("latest_model_{}_{}.json", symbol, timeframe))
    }

    pub fn archive_path(&self, symbol: &str, timeframe: &str) -> PathBuf {
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
        self.model_dir
            .join(format!("xgb_model_{}_{}_{}.json", symbol, timeframe, timestamp))
    }

    /// Persist the artifact under both the archive and latest paths.
    /// Returns the archive path.
    pub fn save(&self, artifact: &ModelArtifact) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.model_dir)?;

        let json = serde_json::to_string(artifact)?;

        let archive = self.archive_path(&artifact.symbol, &artifact.timeframe);
        std::fs::write(&archive, &json)?;

        let latest = self.latest_path(&artifact.symbol, &artifact.timeframe);
        std::fs::write(&latest, &json)?;

        info!(
            "saved model for {} {} (accuracy {:.4}) to {}",
            artifact.symbol,
            artifact.timeframe,
            artifact.accuracy,
            archive.display()
        );

        Ok(archive)
    }

    /// Load the latest artifact for a symbol/timeframe.
    pub fn load_latest(&self, symbol: &str, timeframe: &str) -> Result<ModelArtifact> {
        self.load(&self.latest_path(symbol, timeframe))
    }

    pub fn load(&self, path: &Path) -> Result<ModelArtifact> {
        if !path.exists() {
            return Err(ServiceError::Persistence(format!(
                "model file not found: {}",
                path.display()
            )));
        }
        let json = std::fs::read_to_string(path)?;
        let artifact = serde_json::from_str(&json)?;
        info!("loaded model artifact from {}", path.display());
        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::gbm::{GbmParams, GradientBoostedClassifier};
    use ndarray::Array2;

    fn tiny_artifact() -> ModelArtifact {
        let mut x = Array2::zeros((30, 2));
        let mut labels = Vec::new();
        for i in 0..30 {
            x[[i, 0]] = i as f64;
            labels.push((i % 3) as i32 - 1);
        }
        let params = GbmParams {
            n_trees: 2,
            max_depth: 2,
            learning_rate: 0.1,
        };
        ModelArtifact {
            model: GradientBoostedClassifier::fit(&x, &labels, params).unwrap(),
            feature_names: vec!["a".to_string(), "b".to_string()],
            symbol: "ETHUSDT".to_string(),
            timeframe: "1h".to_string(),
            accuracy: 0.61,
            trained_at: Utc::now().to_rfc3339(),
        }
    }

    fn temp_store(tag: &str) -> ModelStore {
        let dir = std::env::temp_dir().join(format!("mlsvc_store_{}_{}", tag, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        ModelStore::new(dir)
    }

    #[test]
    fn save_then_load_latest_round_trips_metadata() {
        let store = temp_store("roundtrip");
        let artifact = tiny_artifact();

        let archive = store.save(&artifact).unwrap();
        assert!(archive.file_name().unwrap().to_string_lossy().starts_with("xgb_model_ETHUSDT_1h_"));

        let loaded = store.load_latest("ETHUSDT", "1h").unwrap();
        assert_eq!(loaded.symbol, artifact.symbol);
        assert_eq!(loaded.timeframe, artifact.timeframe);
        assert_eq!(loaded.accuracy, artifact.accuracy);
        assert_eq!(loaded.feature_names, artifact.feature_names);
        assert_eq!(loaded.model.n_trees(), artifact.model.n_trees());
    }

    #[test]
    fn latest_pointer_is_overwritten_per_key() {
        let store = temp_store("overwrite");
        let mut artifact = tiny_artifact();
        store.save(&artifact).unwrap();

        artifact.accuracy = 0.75;
        store.save(&artifact).unwrap();

        let loaded = store.load_latest("ETHUSDT", "1h").unwrap();
        assert_eq!(loaded.accuracy, 0.75);
    }

    #[test]
    fn missing_artifact_is_a_persistence_error() {
        let store = temp_store("missing");
        assert!(matches!(
            store.load_latest("BTCUSDT", "4h"),
            Err(ServiceError::Persistence(_))
        ));
    }

    #[test]
    fn paths_are_keyed_by_symbol_and_timeframe() {
        let store = ModelStore::new("./models");
        assert_eq!(
            store.latest_path("ETHUSDT", "1h"),
            PathBuf::from("./models/latest_model_ETHUSDT_1h.json")
        );
        assert!(store
            .archive_path("ETHUSDT", "1h")
            .to_string_lossy()
            .contains("xgb_model_ETHUSDT_1h_"));
    }
}
