use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{info, warn};

use super::gbm::{GbmParams, GradientBoostedClassifier};
use super::store::{ModelArtifact, ModelStore};
use crate::error::{Result, ServiceError};
use crate::features::FeatureSet;

const FALLBACK_SAMPLES: usize = 100;
const FALLBACK_SEED: u64 = 42;

/// Where the model in memory came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelOrigin {
    /// Deserialized from a persisted "latest" artifact
    Artifact,
    /// Synthesized degraded-mode stand-in; predictions carry no signal
    Fallback,
}

/// A single prediction. Not persisted anywhere.
#[derive(Debug, Clone)]
pub struct PredictionResult {
    pub direction: i32,
    pub probability: f64,
    pub confidence_score: f64,
}

/// Metadata about the model currently serving predictions.
#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub loaded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeframe: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trained_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feature_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<ModelOrigin>,
}

enum ModelState {
    Unloaded,
    Loaded {
        artifact: ModelArtifact,
        origin: ModelOrigin,
    },
}

/// Serves predictions from one in-memory model.
///
/// Starts unloaded; `load_model` either restores the latest persisted
/// artifact or degrades to a synthetic fallback, so the service always
/// answers. Reloading after a training run hot-swaps the model.
pub struct Predictor {
    store: ModelStore,
    state: ModelState,
}

impl Predictor {
    pub fn new(store: ModelStore) -> Self {
        Self {
            store,
            state: ModelState::Unloaded,
        }
    }

    /// Load the latest artifact for the symbol/timeframe, or degrade to the
    /// fallback model. Idempotent; safe to call after every training run.
    pub fn load_model(&mut self, symbol: &str, timeframe: &str) {
        match self.store.load_latest(symbol, timeframe) {
            Ok(artifact) => {
                info!(
                    "model loaded for {} {} (accuracy {:.4}, trained at {})",
                    artifact.symbol, artifact.timeframe, artifact.accuracy, artifact.trained_at
                );
                self.state = ModelState::Loaded {
                    artifact,
                    origin: ModelOrigin::Artifact,
                };
            }
            Err(e) => {
                warn!(
                    "no usable model for {} {} ({}), switching to fallback model",
                    symbol, timeframe, e
                );
                self.state = ModelState::Loaded {
                    artifact: fallback_artifact(symbol, timeframe),
                    origin: ModelOrigin::Fallback,
                };
            }
        }
    }

    /// Run inference on a derived feature vector.
    pub fn predict(&self, features: &FeatureSet) -> Result<PredictionResult> {
        let ModelState::Loaded { artifact, .. } = &self.state else {
            return Err(ServiceError::ModelNotLoaded);
        };

        let (direction, probability) = artifact.model.predict(&features.to_array())?;

        Ok(PredictionResult {
            direction,
            probability,
            confidence_score: probability,
        })
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.state, ModelState::Loaded { .. })
    }

    pub fn origin(&self) -> Option<ModelOrigin> {
        match &self.state {
            ModelState::Loaded { origin, .. } => Some(*origin),
            ModelState::Unloaded => None,
        }
    }

    pub fn model_info(&self) -> ModelInfo {
        match &self.state {
            ModelState::Unloaded => ModelInfo {
                loaded: false,
                symbol: None,
                timeframe: None,
                accuracy: None,
                trained_at: None,
                feature_count: None,
                origin: None,
            },
            ModelState::Loaded { artifact, origin } => ModelInfo {
                loaded: true,
                symbol: Some(artifact.symbol.clone()),
                timeframe: Some(artifact.timeframe.clone()),
                accuracy: Some(artifact.accuracy),
                trained_at: Some(artifact.trained_at.clone()),
                feature_count: Some(artifact.feature_names.len()),
                origin: Some(*origin),
            },
        }
    }
}

/// Train a small throwaway classifier on seeded random data so the service
/// can keep answering when no artifact exists. Accuracy is nominal.
fn fallback_artifact(symbol: &str, timeframe: &str) -> ModelArtifact {
    let mut rng = StdRng::seed_from_u64(FALLBACK_SEED);

    let mut x = Array2::zeros((FALLBACK_SAMPLES, FeatureSet::NUM_FEATURES));
    let mut labels = Vec::with_capacity(FALLBACK_SAMPLES);
    for i in 0..FALLBACK_SAMPLES {
        for j in 0..FeatureSet::NUM_FEATURES {
            x[[i, j]] = rng.gen::<f64>();
        }
        labels.push(rng.gen_range(0..3) - 1);
    }

    let model = GradientBoostedClassifier::fit(&x, &labels, GbmParams::fallback())
        .expect("fallback training data is always well-formed");

    ModelArtifact {
        model,
        feature_names: Vec::new(),
        symbol: symbol.to_string(),
        timeframe: timeframe.to_string(),
        accuracy: 0.5,
        trained_at: "fallback".to_string(),
    }
}
