use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, ServiceError};

/// Raw indicator readings for one candle, keyed by indicator name.
///
/// Keys the feed emits: rsi, macd, macdSignal, ema9, ema21, ema50, vwap, atr.
/// Unknown keys are carried along but ignored by feature derivation.
#[derive(Debug, Clone, Default)]
pub struct IndicatorSnapshot {
    values: HashMap<String, f64>,
}

impl IndicatorSnapshot {
    pub fn new(values: HashMap<String, f64>) -> Self {
        Self { values }
    }

    /// Build a snapshot from a JSON object, rejecting non-numeric values.
    pub fn from_json_map(map: &serde_json::Map<String, Value>) -> Result<Self> {
        let mut values = HashMap::with_capacity(map.len());
        for (key, value) in map {
            let number = value.as_f64().ok_or_else(|| {
                ServiceError::InvalidInput(format!(
                    "indicator '{}' is not numeric: {}",
                    key, value
                ))
            })?;
            values.insert(key.clone(), number);
        }
        Ok(Self { values })
    }

    pub fn get_or(&self, key: &str, default: f64) -> f64 {
        self.values.get(key).copied().unwrap_or(default)
    }
}

/// The fixed 16-wide feature vector fed to the classifier.
///
/// Field order is the model's input order; serde serializes the struct in
/// declaration order, so API responses expose the same ordering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSet {
    pub rsi: f64,
    pub rsi_normalized: f64,
    pub macd: f64,
    pub macd_signal: f64,
    pub macd_histogram: f64,
    pub ema9: f64,
    pub ema21: f64,
    pub ema50: f64,
    pub ema_short_long_ratio: f64,
    pub ema_trend_strength: f64,
    pub vwap: f64,
    pub atr: f64,
    pub atr_normalized: f64,
    pub price_to_ema9: f64,
    pub price_to_ema21: f64,
    pub price_to_vwap: f64,
}

impl FeatureSet {
    pub const NUM_FEATURES: usize = 16;

    pub const FEATURE_NAMES: [&'static str; Self::NUM_FEATURES] = [
        "rsi",
        "rsi_normalized",
        "macd",
        "macd_signal",
        "macd_histogram",
        "ema9",
        "ema21",
        "ema50",
        "ema_short_long_ratio",
        "ema_trend_strength",
        "vwap",
        "atr",
        "atr_normalized",
        "price_to_ema9",
        "price_to_ema21",
        "price_to_vwap",
    ];

    pub fn feature_names() -> Vec<String> {
        Self::FEATURE_NAMES.iter().map(|n| n.to_string()).collect()
    }

    /// Derive the feature vector from one indicator snapshot.
    ///
    /// Pure and deterministic. Missing keys take the defaults below; a value
    /// of exactly 0.0 counts as missing in every ratio guard, matching the
    /// upstream feed which emits 0.0 for indicators it could not compute.
    pub fn from_snapshot(snapshot: &IndicatorSnapshot) -> Self {
        let rsi = snapshot.get_or("rsi", 50.0);
        let macd = snapshot.get_or("macd", 0.0);
        let macd_signal = snapshot.get_or("macdSignal", 0.0);
        let ema9 = snapshot.get_or("ema9", 0.0);
        let ema21 = snapshot.get_or("ema21", 0.0);
        let ema50 = snapshot.get_or("ema50", 0.0);
        let vwap = snapshot.get_or("vwap", 0.0);
        let atr = snapshot.get_or("atr", 0.0);

        let macd_histogram = if macd != 0.0 && macd_signal != 0.0 {
            macd - macd_signal
        } else {
            0.0
        };

        // rsi == 0.0 is treated as missing, not as an extreme reading
        let rsi_normalized = if rsi != 0.0 { (rsi - 50.0) / 50.0 } else { 0.0 };

        let ema_short_long_ratio = if ema9 != 0.0 && ema50 != 0.0 {
            ema9 / ema50
        } else {
            1.0
        };

        // ema21 gates this feature but never enters the formula; the upstream
        // implementation behaves the same way, so it is reproduced verbatim
        let ema_trend_strength = if ema9 != 0.0 && ema21 != 0.0 && ema50 != 0.0 {
            ((ema9 - ema50) / ema50) * 100.0
        } else {
            0.0
        };

        let price_to_ema9 = if vwap != 0.0 && ema9 != 0.0 {
            vwap / ema9
        } else {
            1.0
        };
        let price_to_ema21 = if vwap != 0.0 && ema21 != 0.0 {
            vwap / ema21
        } else {
            1.0
        };
        // constant placeholder carried in the trained models' input layout
        let price_to_vwap = 1.0;

        let avg_price = if ema9 != 0.0 && ema21 != 0.0 {
            (ema9 + ema21) / 2.0
        } else if vwap != 0.0 {
            vwap
        } else {
            1.0
        };
        let atr_normalized = if atr != 0.0 && avg_price != 0.0 {
            (atr / avg_price) * 100.0
        } else {
            0.0
        };

        Self {
            rsi,
            rsi_normalized,
            macd,
            macd_signal,
            macd_histogram,
            ema9,
            ema21,
            ema50,
            ema_short_long_ratio,
            ema_trend_strength,
            vwap,
            atr,
            atr_normalized,
            price_to_ema9,
            price_to_ema21,
            price_to_vwap,
        }
    }

    pub fn to_array(&self) -> [f64; Self::NUM_FEATURES] {
        [
            self.rsi,
            self.rsi_normalized,
            self.macd,
            self.macd_signal,
            self.macd_histogram,
            self.ema9,
            self.ema21,
            self.ema50,
            self.ema_short_long_ratio,
            self.ema_trend_strength,
            self.vwap,
            self.atr,
            self.atr_normalized,
            self.price_to_ema9,
            self.price_to_ema21,
            self.price_to_vwap,
        ]
    }
}
