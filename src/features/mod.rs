pub mod labels;
pub mod vector;

pub use labels::derive_labels;
pub use vector::{FeatureSet, IndicatorSnapshot};
