use crate::error::{Result, ServiceError};

/// Label each close by the relative price move `look_ahead` rows later:
/// 1 above `threshold`, -1 below `-threshold`, 0 otherwise.
///
/// The final `look_ahead` rows have no future price and are labeled 0.
pub fn derive_labels(closes: &[f64], look_ahead: usize, threshold: f64) -> Result<Vec<i32>> {
    let mut labels = Vec::with_capacity(closes.len());

    let horizon = closes.len().saturating_sub(look_ahead);
    for i in 0..horizon {
        let current = closes[i];
        if current == 0.0 {
            return Err(ServiceError::InvalidInput(format!(
                "zero close price at row {}",
                i
            )));
        }
        let future = closes[i + look_ahead];
        let change = (future - current) / current;

        labels.push(if change > threshold {
            1
        } else if change < -threshold {
            -1
        } else {
            0
        });
    }

    labels.resize(closes.len(), 0);

    Ok(labels)
}
