//! Predictor outputs and the scalar membership statistic derived from them.

use serde::{Deserialize, Serialize};

/// One prediction from an external predictor.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PredictorOutput {
    /// Point prediction (regression value or class-1 probability).
    pub prediction: f64,
    /// Dispersion estimate for stochastic predictors.
    #[serde(default)]
    pub dispersion: Option<f64>,
}

impl PredictorOutput {
    /// A deterministic point prediction.
    pub fn point(prediction: f64) -> Self {
        Self {
            prediction,
            dispersion: None,
        }
    }

    /// A prediction with a dispersion estimate.
    pub fn with_dispersion(prediction: f64, dispersion: f64) -> Self {
        Self {
            prediction,
            dispersion: Some(dispersion),
        }
    }
}

/// Map from a predictor output and label to a scalar statistic.
///
/// Higher values look more like training members.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputTransform {
    /// Negative squared error.
    #[default]
    NegSquaredError,
    /// Negative absolute error.
    NegAbsError,
    /// Gaussian log-likelihood of the label under `N(prediction, dispersion)`.
    GaussianLogLikelihood,
    /// Logit of the probability assigned to the true class.
    LogitConfidence,
}

const PROB_EPS: f64 = 1e-12;

impl OutputTransform {
    /// Compute the statistic. Non-finite outputs map to `f64::NEG_INFINITY`.
    pub fn apply(self, output: &PredictorOutput, label: f64) -> f64 {
        let pred = output.prediction;
        if !pred.is_finite() {
            return f64::NEG_INFINITY;
        }
        let err = pred - label;
        match self {
            Self::NegSquaredError => -(err * err),
            Self::NegAbsError => -err.abs(),
            Self::GaussianLogLikelihood => {
                let sigma = output
                    .dispersion
                    .filter(|s| s.is_finite() && *s > 0.0)
                    .unwrap_or(1.0);
                let z = err / sigma;
                -0.5 * z * z - sigma.ln()
            }
            Self::LogitConfidence => {
                let p_one = pred.clamp(PROB_EPS, 1.0 - PROB_EPS);
                let p_true = if label >= 0.5 { p_one } else { 1.0 - p_one };
                p_true.ln() - (1.0 - p_true).ln()
            }
        }
    }
}
