//! Supervised dataset construction from a close-price series.
//!
//! Each observation is labelled with the close `forecast_out` steps ahead.
//! Inputs are standardized over every labelled observation, then the last
//! `forecast_out` rows are held back as the inference window.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DatasetError {
    #[error("requested {requested} forecast steps but only {available} observations are available")]
    InsufficientData { requested: usize, available: usize },

    #[error("dataset is empty after preprocessing")]
    Empty,

    #[error("forecast horizon must be at least one step")]
    ZeroHorizon,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    /// Standardized training inputs.
    pub features: Vec<f64>,
    /// Close price `forecast_out` steps after each training input.
    pub labels: Vec<f64>,
    /// Standardized inputs for the future steps, oldest first.
    pub forecast_input: Vec<f64>,
}

impl Dataset {
    pub fn horizon(&self) -> usize {
        self.forecast_input.len()
    }
}

/// Builds the dataset, enforcing `forecast_out < closes.len()` before any
/// work is done.
pub fn build_dataset(closes: &[f64], forecast_out: usize) -> Result<Dataset, DatasetError> {
    if forecast_out == 0 {
        return Err(DatasetError::ZeroHorizon);
    }
    if forecast_out >= closes.len() {
        return Err(DatasetError::InsufficientData {
            requested: forecast_out,
            available: closes.len(),
        });
    }

    // Observations with a label `forecast_out` steps ahead
    let labelled = closes.len() - forecast_out;
    let inputs = &closes[..labelled];
    let shifted = &closes[forecast_out..];

    let scaled = standardize(inputs);
    if scaled.is_empty() || scaled.len() <= forecast_out {
        return Err(DatasetError::Empty);
    }

    let split = scaled.len() - forecast_out;
    let forecast_input = scaled[split..].to_vec();
    let features = scaled[..split].to_vec();
    let labels = shifted[..split].to_vec();

    if features.is_empty() || labels.is_empty() {
        return Err(DatasetError::Empty);
    }

    Ok(Dataset { features, labels, forecast_input })
}

/// Zero mean, unit population variance. A constant column is only centered.
pub fn standardize(values: &[f64]) -> Vec<f64> {
    if values.is_empty() {
        return Vec::new();
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let std = variance.sqrt();
    let divisor = if std > f64::EPSILON { std } else { 1.0 };
    values.iter().map(|v| (v - mean) / divisor).collect()
}
