use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info};

use super::AppState;
use crate::error::ServiceError;
use crate::features::{FeatureSet, IndicatorSnapshot};

const SERVICE_NAME: &str = "Trading ML Service";
const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

type ApiError = (StatusCode, Json<Value>);

fn failure(status: StatusCode, message: String) -> ApiError {
    (status, Json(json!({ "success": false, "error": message })))
}

#[derive(Debug, Deserialize)]
pub struct PredictionRequest {
    pub symbol: String,
    pub timeframe: String,
    pub indicators: serde_json::Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct TrainRequest {
    #[serde(default = "default_symbol")]
    pub symbol: String,
    #[serde(default = "default_timeframe")]
    pub timeframe: String,
    #[serde(default = "default_lookback")]
    pub lookback_periods: usize,
}

fn default_symbol() -> String {
    "ETHUSDT".to_string()
}

fn default_timeframe() -> String {
    "1h".to_string()
}

fn default_lookback() -> usize {
    500
}

#[derive(Debug, Serialize)]
pub struct PredictionResponse {
    pub direction: String,
    pub probability: f64,
    pub confidence: String,
    pub features_used: FeatureSet,
    pub timestamp: i64,
}

/// Typed so the feature mapping keeps its declaration order on the wire.
#[derive(Debug, Serialize)]
pub struct EngineerFeaturesResponse {
    pub success: bool,
    pub features: FeatureSet,
}

pub async fn root() -> Json<Value> {
    Json(json!({
        "service": SERVICE_NAME,
        "status": "running",
        "version": SERVICE_VERSION,
    }))
}

pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    let model_loaded = state.predictor.read().await.is_loaded();
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
        "model_loaded": model_loaded,
    }))
}

/// Predict price direction from technical indicators.
pub async fn predict(
    State(state): State<AppState>,
    Json(request): Json<PredictionRequest>,
) -> Result<Json<PredictionResponse>, ApiError> {
    info!(
        "prediction request for {} {}",
        request.symbol, request.timeframe
    );

    let result = async {
        let snapshot = IndicatorSnapshot::from_json_map(&request.indicators)?;
        let features = FeatureSet::from_snapshot(&snapshot);
        let prediction = state.predictor.read().await.predict(&features)?;
        Ok::<_, ServiceError>((features, prediction))
    }
    .await;

    match result {
        Ok((features, prediction)) => {
            let direction = match prediction.direction {
                1 => "up",
                -1 => "down",
                _ => "neutral",
            };
            let confidence = if prediction.probability > 0.75 {
                "high"
            } else if prediction.probability > 0.6 {
                "medium"
            } else {
                "low"
            };

            Ok(Json(PredictionResponse {
                direction: direction.to_string(),
                probability: round4(prediction.probability),
                confidence: confidence.to_string(),
                features_used: features,
                timestamp: Utc::now().timestamp_millis(),
            }))
        }
        Err(e) => {
            error!("prediction error: {}", e);
            Err(failure(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Prediction failed: {}", e),
            ))
        }
    }
}

/// Train a new model on historical data and hot-swap it into the predictor.
pub async fn train(
    State(state): State<AppState>,
    Json(request): Json<TrainRequest>,
) -> Result<Json<Value>, ApiError> {
    info!(
        "training model for {} {} over {} periods",
        request.symbol, request.timeframe, request.lookback_periods
    );

    let outcome = state
        .trainer
        .train(&request.symbol, &request.timeframe, request.lookback_periods)
        .await
        .map_err(|e| {
            error!("training error: {}", e);
            failure(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Training failed: {}", e),
            )
        })?;

    state
        .predictor
        .write()
        .await
        .load_model(&request.symbol, &request.timeframe);

    Ok(Json(json!({
        "success": true,
        "message": "Model trained successfully",
        "metrics": {
            "accuracy": outcome.accuracy,
            "training_samples": outcome.training_samples,
            "test_samples": outcome.test_samples,
        },
        "model_path": outcome.model_path.to_string_lossy(),
    })))
}

pub async fn model_info(State(state): State<AppState>) -> Json<Value> {
    let info = state.predictor.read().await.model_info();
    Json(json!({
        "success": true,
        "data": info,
    }))
}

/// Transform raw indicators into the derived feature vector.
pub async fn engineer_features(
    Json(indicators): Json<serde_json::Map<String, Value>>,
) -> Result<Json<EngineerFeaturesResponse>, ApiError> {
    let snapshot = IndicatorSnapshot::from_json_map(&indicators).map_err(|e| {
        error!("feature engineering error: {}", e);
        failure(StatusCode::BAD_REQUEST, e.to_string())
    })?;
    Ok(Json(EngineerFeaturesResponse {
        success: true,
        features: FeatureSet::from_snapshot(&snapshot),
    }))
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}
