use crate::features::Dataset;
use rayon::prelude::*;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("model is not fitted")]
    NotFitted,

    #[error("training set is empty")]
    EmptyTrainingSet,

    #[error("features and labels differ in length ({features} vs {labels})")]
    ShapeMismatch { features: usize, labels: usize },

    #[error("expected {expected} predictions, got {actual}")]
    WrongHorizon { expected: usize, actual: usize },

    #[error("{0}")]
    Other(String),
}

/// A fit-then-predict regression model. Instances carry fitted state and are
/// not reused across tickers: callers build one per computation and call
/// `release` once the predictions are taken.
pub trait ForecastEngine: Send {
    fn fit(&mut self, features: &[f64], labels: &[f64]) -> Result<(), EngineError>;

    fn predict(&self, inputs: &[f64]) -> Result<Vec<f64>, EngineError>;

    /// Drops fitted parameters and any buffered training data.
    fn release(&mut self);

    /// Fits on the training rows and predicts the forecast window.
    fn forecast(&mut self, dataset: &Dataset) -> Result<Vec<f64>, EngineError> {
        self.fit(&dataset.features, &dataset.labels)?;
        let predictions = self.predict(&dataset.forecast_input)?;
        if predictions.len() != dataset.horizon() {
            return Err(EngineError::WrongHorizon {
                expected: dataset.horizon(),
                actual: predictions.len(),
            });
        }
        Ok(predictions)
    }
}

pub type EngineFactory = Arc<dyn Fn() -> Box<dyn ForecastEngine> + Send + Sync>;

/// Factory for the production ensemble.
pub fn default_engine_factory() -> EngineFactory {
    Arc::new(|| Box::new(EnsembleEngine::standard()) as Box<dyn ForecastEngine>)
}

fn check_shape(features: &[f64], labels: &[f64]) -> Result<(), EngineError> {
    if features.len() != labels.len() {
        return Err(EngineError::ShapeMismatch {
            features: features.len(),
            labels: labels.len(),
        });
    }
    if features.is_empty() {
        return Err(EngineError::EmptyTrainingSet);
    }
    Ok(())
}

// --- Linear Regression ---

/// Ordinary least squares on a single standardized input.
#[derive(Debug, Default)]
pub struct LinearRegression {
    coefficients: Option<(f64, f64)>, // (slope, intercept)
}

impl LinearRegression {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ForecastEngine for LinearRegression {
    fn fit(&mut self, features: &[f64], labels: &[f64]) -> Result<(), EngineError> {
        check_shape(features, labels)?;
        let n = features.len() as f64;
        let mean_x = features.iter().sum::<f64>() / n;
        let mean_y = labels.iter().sum::<f64>() / n;

        let mut covariance = 0.0;
        let mut variance = 0.0;
        for (x, y) in features.iter().zip(labels) {
            covariance += (x - mean_x) * (y - mean_y);
            variance += (x - mean_x).powi(2);
        }

        // Degenerate input: fall back to predicting the mean label
        let slope = if variance > f64::EPSILON { covariance / variance } else { 0.0 };
        let intercept = mean_y - slope * mean_x;
        self.coefficients = Some((slope, intercept));
        Ok(())
    }

    fn predict(&self, inputs: &[f64]) -> Result<Vec<f64>, EngineError> {
        let (slope, intercept) = self.coefficients.ok_or(EngineError::NotFitted)?;
        Ok(inputs.iter().map(|x| slope * x + intercept).collect())
    }

    fn release(&mut self) {
        self.coefficients = None;
    }
}

// --- k-Nearest Neighbours ---

/// Averages the labels of the `k` training inputs closest to each query.
/// Keeps a copy of the training set until released.
#[derive(Debug)]
pub struct KNearestNeighbors {
    k: usize,
    training: Vec<(f64, f64)>,
}

impl KNearestNeighbors {
    pub fn new(k: usize) -> Self {
        Self { k: k.max(1), training: Vec::new() }
    }

    fn predict_one(&self, query: f64) -> f64 {
        let mut distances: Vec<(f64, f64)> = self
            .training
            .iter()
            .map(|&(x, y)| ((x - query).abs(), y))
            .collect();
        let k = self.k.min(distances.len());
        distances.select_nth_unstable_by(k - 1, |a, b| a.0.total_cmp(&b.0));
        distances[..k].iter().map(|&(_, y)| y).sum::<f64>() / k as f64
    }
}

impl ForecastEngine for KNearestNeighbors {
    fn fit(&mut self, features: &[f64], labels: &[f64]) -> Result<(), EngineError> {
        check_shape(features, labels)?;
        self.training = features.iter().copied().zip(labels.iter().copied()).collect();
        Ok(())
    }

    fn predict(&self, inputs: &[f64]) -> Result<Vec<f64>, EngineError> {
        if self.training.is_empty() {
            return Err(EngineError::NotFitted);
        }
        Ok(inputs.par_iter().map(|&query| self.predict_one(query)).collect())
    }

    fn release(&mut self) {
        self.training = Vec::new();
    }
}

// --- Ensemble ---

/// Equal-weight average of its members' predictions.
pub struct EnsembleEngine {
    members: Vec<Box<dyn ForecastEngine>>,
}

impl EnsembleEngine {
    pub fn new(members: Vec<Box<dyn ForecastEngine>>) -> Self {
        Self { members }
    }

    pub fn standard() -> Self {
        Self::new(vec![Box::new(LinearRegression::new()), Box::new(KNearestNeighbors::new(5))])
    }
}

impl ForecastEngine for EnsembleEngine {
    fn fit(&mut self, features: &[f64], labels: &[f64]) -> Result<(), EngineError> {
        if self.members.is_empty() {
            return Err(EngineError::Other("ensemble has no members".to_string()));
        }
        for member in self.members.iter_mut() {
            member.fit(features, labels)?;
        }
        Ok(())
    }

    fn predict(&self, inputs: &[f64]) -> Result<Vec<f64>, EngineError> {
        let mut totals = vec![0.0; inputs.len()];
        for member in &self.members {
            let predictions = member.predict(inputs)?;
            if predictions.len() != inputs.len() {
                return Err(EngineError::WrongHorizon {
                    expected: inputs.len(),
                    actual: predictions.len(),
                });
            }
            for (total, value) in totals.iter_mut().zip(predictions) {
                *total += value;
            }
        }
        let count = self.members.len().max(1) as f64;
        Ok(totals.into_iter().map(|t| t / count).collect())
    }

    fn release(&mut self) {
        for member in self.members.iter_mut() {
            member.release();
        }
    }
}
