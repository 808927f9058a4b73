use std::sync::Arc;

use tokio::sync::RwLock;

use crate::ml::{Predictor, Trainer};

/// Shared state handed to every request handler.
///
/// The predictor is the one mutable resource in the process: predictions
/// take the read guard, a post-training reload takes the write guard, so a
/// hot swap can never tear an in-flight prediction.
#[derive(Clone)]
pub struct AppState {
    pub predictor: Arc<RwLock<Predictor>>,
    pub trainer: Arc<Trainer>,
}
