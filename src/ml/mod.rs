pub mod gbm;
pub mod predictor;
pub mod store;
pub mod trainer;

pub use gbm::{GbmParams, GradientBoostedClassifier};
pub use predictor::{ModelInfo, ModelOrigin, PredictionResult, Predictor};
pub use store::{ModelArtifact, ModelStore};
pub use trainer::{Trainer, TrainingOutcome};
