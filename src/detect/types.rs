//! Shared types for the detection pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::DetectionMode;
use crate::detect::consistency::ConsistencyReport;
use crate::detect::entropy::EntropyReport;
use crate::detect::evidence::EvidenceReport;
use crate::detect::fusion::{FusionAssessment, RecommendedAction, RiskLevel};
use crate::detect::judge::JudgeReport;

/// Immutable input to one detection call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionRequest {
    /// The question that produced the answer under check.
    pub question: String,
    /// The answer being checked for hallucination.
    pub answer: String,
    /// Reference context chunks (empty = nothing to verify claims against).
    #[serde(default)]
    pub context: Vec<String>,
    /// Model identifier for sampling and probing (None = client default).
    pub model: Option<String>,
    /// Pre-supplied generation samples; when non-empty the uncertainty
    /// detector skips its own sampling.
    #[serde(default)]
    pub samples: Vec<String>,
}

impl DetectionRequest {
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
            context: Vec::new(),
            model: None,
            samples: Vec::new(),
        }
    }

    pub fn with_context(mut self, context: Vec<String>) -> Self {
        self.context = context;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_samples(mut self, samples: Vec<String>) -> Self {
        self.samples = samples;
        self
    }

    pub fn has_context(&self) -> bool {
        !self.context.is_empty()
    }
}

/// Aggregate result of one detection call. Immutable after construction;
/// persistence is a collaborator concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionResult {
    /// Unique ID for this detection run.
    pub id: Uuid,
    /// Mode the run executed under.
    pub mode: DetectionMode,
    /// Calibrated hallucination probability in [0, 1].
    pub risk_probability: f64,
    /// Ordinal risk tier derived from the probability.
    pub risk_level: RiskLevel,
    /// Recommended handling of the answer.
    pub action: RecommendedAction,
    /// Deterministic, rule-based explanation of the score.
    pub explanation: String,
    /// Uncertainty detector output, if it ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub semantic_entropy: Option<EntropyReport>,
    /// Judge output, if it ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub judge: Option<JudgeReport>,
    /// Claim-level evidence output, if it ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claims: Option<EvidenceReport>,
    /// Self-consistency output, if it ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub self_check: Option<ConsistencyReport>,
    /// Full fusion assessment, including the feature vector.
    pub assessment: FusionAssessment,
    /// Human-readable run summary.
    pub summary: DetectionSummary,
    /// When the run completed.
    pub completed_at: DateTime<Utc>,
    /// Wall-clock latency of the whole run.
    pub latency_ms: u64,
}

/// Which checks ran and what they found.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetectionSummary {
    /// Names of the detectors that executed.
    pub checks_run: Vec<String>,
    /// Issues surfaced by those detectors ("No issues detected" when clean).
    pub issues_found: Vec<String>,
    /// Recommended action, repeated here for display convenience.
    pub recommendation: RecommendedAction,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let req = DetectionRequest::new("What is the capital of France?", "Paris.")
            .with_context(vec!["Paris is the capital of France.".to_string()])
            .with_model("gpt-4o-mini");

        assert!(req.has_context());
        assert_eq!(req.model.as_deref(), Some("gpt-4o-mini"));
        assert!(req.samples.is_empty());
    }

    #[test]
    fn test_request_without_context() {
        let req = DetectionRequest::new("q", "a");
        assert!(!req.has_context());
    }
}
