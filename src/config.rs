use crate::candidates::{CandidateStrategy, FlowConfig};
use crate::error::TrackError;
use crate::matching::AssignmentStrategy;
use crate::similarity::{CombinedWeights, SimilarityMetric};
use serde::{Deserialize, Serialize};

/// Tracker settings. Every field has a default, so a partial JSON object
/// is a valid config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Number of past frames kept for candidate generation.
    pub history_window_size: usize,
    pub candidate_strategy: CandidateStrategy,
    pub assignment_strategy: AssignmentStrategy,
    pub similarity_metric: SimilarityMetric,
    /// Pairs scoring below this are never matched.
    pub min_similarity_threshold: Option<f64>,
    /// Candidates with fewer present points are ignored.
    pub min_present_points: usize,
    /// Quantile of a track's candidate scores used as the track score;
    /// 1.0 takes the best candidate.
    pub robust_quantile: f64,
    pub flow: FlowConfig,
    pub combined_weights: CombinedWeights,
    pub oks_stddev: f64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            history_window_size: 5,
            candidate_strategy: CandidateStrategy::Simple,
            assignment_strategy: AssignmentStrategy::Optimal,
            similarity_metric: SimilarityMetric::Combined,
            min_similarity_threshold: None,
            min_present_points: 0,
            robust_quantile: 1.0,
            flow: FlowConfig::default(),
            combined_weights: CombinedWeights::default(),
            oks_stddev: 1.0,
        }
    }
}

impl TrackerConfig {
    pub fn from_json_str(json: &str) -> Result<Self, TrackError> {
        let cfg: TrackerConfig = serde_json::from_str(json)
            .map_err(|e| TrackError::InvalidConfig(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn with_history_window_size(self, history_window_size: usize) -> Self {
        Self {
            history_window_size,
            ..self
        }
    }

    pub fn with_candidate_strategy(self, candidate_strategy: CandidateStrategy) -> Self {
        Self {
            candidate_strategy,
            ..self
        }
    }

    pub fn with_assignment_strategy(self, assignment_strategy: AssignmentStrategy) -> Self {
        Self {
            assignment_strategy,
            ..self
        }
    }

    pub fn with_similarity_metric(self, similarity_metric: SimilarityMetric) -> Self {
        Self {
            similarity_metric,
            ..self
        }
    }

    pub fn with_min_similarity_threshold(self, threshold: f64) -> Self {
        Self {
            min_similarity_threshold: Some(threshold),
            ..self
        }
    }

    pub fn with_min_present_points(self, min_present_points: usize) -> Self {
        Self {
            min_present_points,
            ..self
        }
    }

    pub fn with_robust_quantile(self, robust_quantile: f64) -> Self {
        Self {
            robust_quantile,
            ..self
        }
    }

    pub fn with_flow(self, flow: FlowConfig) -> Self {
        Self { flow, ..self }
    }

    pub fn validate(&self) -> Result<(), TrackError> {
        if self.history_window_size == 0 {
            return Err(TrackError::InvalidConfig(
                "history_window_size must be positive".to_string(),
            ));
        }
        if !(self.robust_quantile > 0.0 && self.robust_quantile <= 1.0) {
            return Err(TrackError::InvalidConfig(format!(
                "robust_quantile must be in (0, 1], got {}",
                self.robust_quantile
            )));
        }
        if let Some(t) = self.min_similarity_threshold {
            if t.is_nan() {
                return Err(TrackError::InvalidConfig(
                    "min_similarity_threshold is NaN".to_string(),
                ));
            }
        }
        let w = &self.combined_weights;
        if w.centroid_scale <= 0.0 || w.point_sigma <= 0.0 {
            return Err(TrackError::InvalidConfig(
                "combined_weights scales must be positive".to_string(),
            ));
        }
        if self.oks_stddev <= 0.0 {
            return Err(TrackError::InvalidConfig(
                "oks_stddev must be positive".to_string(),
            ));
        }
        if self.candidate_strategy == CandidateStrategy::Flow {
            self.flow.validate()?;
        }
        Ok(())
    }
}
