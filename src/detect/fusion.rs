//! Risk fusion.
//!
//! Combines the detector outputs into one calibrated hallucination
//! probability. Different detectors catch different failure modes, so the
//! fusion layer weighs them jointly: a heuristic linear combination by
//! default, or a trained logistic model loaded from disk. Detectors that
//! did not run contribute neutral values, never penalties.

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::detect::consistency::ConsistencyReport;
use crate::detect::entropy::EntropyReport;
use crate::detect::evidence::EvidenceReport;
use crate::detect::judge::JudgeReport;
use crate::error::{Error, Result};

/// Canonical feature order. Serialized models must match it exactly.
pub const FEATURE_NAMES: [&str; 10] = [
    "semantic_entropy",
    "num_clusters",
    "consensus_strength",
    "judge_score",
    "claim_support_rate",
    "has_contradiction",
    "self_similarity",
    "num_contradictions",
    "answer_length",
    "citation_density",
];

/// Normalized detector signals, all in [0, 1] except raw entropy.
///
/// Defaults are neutral: a detector that did not run looks like a detector
/// that found nothing wrong.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureVector {
    pub semantic_entropy: f64,
    /// Cluster count over 5, capped at 1.
    pub num_clusters: f64,
    pub consensus_strength: f64,
    pub judge_score: f64,
    pub claim_support_rate: f64,
    /// 1.0 when any claim was contradicted by evidence.
    pub has_contradiction: f64,
    pub self_similarity: f64,
    /// Self-contradiction count over 3, capped at 1.
    pub num_contradictions: f64,
    /// Word count over 500, capped at 1.
    pub answer_length: f64,
    /// Citation markers per word, capped at 1.
    pub citation_density: f64,
}

impl Default for FeatureVector {
    fn default() -> Self {
        Self {
            semantic_entropy: 0.5,
            num_clusters: 1.0 / 5.0,
            consensus_strength: 1.0,
            judge_score: 0.5,
            claim_support_rate: 1.0,
            has_contradiction: 0.0,
            self_similarity: 1.0,
            num_contradictions: 0.0,
            answer_length: 0.0,
            citation_density: 0.0,
        }
    }
}

impl FeatureVector {
    /// Build the feature vector from whatever detectors actually ran.
    pub fn extract(
        answer: &str,
        entropy: Option<&EntropyReport>,
        judge: Option<&JudgeReport>,
        claims: Option<&EvidenceReport>,
        self_check: Option<&ConsistencyReport>,
    ) -> Self {
        let mut features = Self::default();

        if let Some(entropy) = entropy {
            features.semantic_entropy = entropy.semantic_entropy;
            features.num_clusters = (entropy.num_clusters as f64 / 5.0).min(1.0);
            features.consensus_strength = entropy.consensus_strength;
        }
        if let Some(judge) = judge {
            features.judge_score = judge.score;
        }
        if let Some(claims) = claims {
            features.claim_support_rate = claims.support_rate;
            features.has_contradiction = if claims.has_contradiction { 1.0 } else { 0.0 };
        }
        if let Some(self_check) = self_check {
            features.self_similarity = self_check.similarity_score;
            features.num_contradictions =
                (self_check.num_contradictions as f64 / 3.0).min(1.0);
        }

        let words = answer.split_whitespace().count();
        features.answer_length = (words as f64 / 500.0).min(1.0);
        features.citation_density =
            (count_citations(answer) as f64 / words.max(1) as f64).min(1.0);

        features
    }

    /// Values in the canonical [`FEATURE_NAMES`] order.
    pub fn as_array(&self) -> [f64; 10] {
        [
            self.semantic_entropy,
            self.num_clusters,
            self.consensus_strength,
            self.judge_score,
            self.claim_support_rate,
            self.has_contradiction,
            self.self_similarity,
            self.num_contradictions,
            self.answer_length,
            self.citation_density,
        ]
    }
}

/// Count inline citation markers: bracketed reference lists and
/// parenthesized years.
fn count_citations(answer: &str) -> usize {
    static CITATION: OnceLock<Regex> = OnceLock::new();
    let pattern = CITATION.get_or_init(|| Regex::new(r"\[[\d,\s]+\]|\(\d{4}\)").unwrap());
    pattern.find_iter(answer).count()
}

/// Ordinal risk tier. Band boundaries belong to the higher tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Safe,
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn from_probability(prob: f64) -> Self {
        if prob < 0.2 {
            Self::Safe
        } else if prob < 0.4 {
            Self::Low
        } else if prob < 0.6 {
            Self::Medium
        } else if prob < 0.8 {
            Self::High
        } else {
            Self::Critical
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Safe => write!(f, "safe"),
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// What the caller should do with the answer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    #[default]
    Show,
    ShowWithWarning,
    BlockAndRegenerate,
}

impl RecommendedAction {
    pub fn from_probability(prob: f64) -> Self {
        if prob < 0.2 {
            Self::Show
        } else if prob < 0.6 {
            Self::ShowWithWarning
        } else {
            Self::BlockAndRegenerate
        }
    }
}

impl std::fmt::Display for RecommendedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Show => write!(f, "show"),
            Self::ShowWithWarning => write!(f, "show_with_warning"),
            Self::BlockAndRegenerate => write!(f, "block_and_regenerate"),
        }
    }
}

/// Fusion output: the score plus everything needed to audit it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionAssessment {
    pub risk_probability: f64,
    pub risk_level: RiskLevel,
    pub action: RecommendedAction,
    pub features: FeatureVector,
    pub explanation: String,
    /// Whether a trained model produced the score (false = heuristic).
    pub used_trained_model: bool,
}

/// Optional sigmoid recalibration applied on top of the raw logit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Calibration {
    pub scale: f64,
    pub offset: f64,
}

/// A trained logistic model serialized as JSON.
///
/// The feature-name list is stored alongside the weights; a mismatch with
/// the canonical order means the model was trained against a different
/// feature schema and silently produces garbage, so loading fails hard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticModel {
    pub feature_names: Vec<String>,
    pub weights: Vec<f64>,
    pub intercept: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calibration: Option<Calibration>,
}

impl LogisticModel {
    pub fn new(weights: Vec<f64>, intercept: f64) -> Self {
        Self {
            feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
            weights,
            intercept,
            calibration: None,
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let model: Self = serde_json::from_str(&data)?;
        model.validate()?;
        Ok(model)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        self.validate()?;
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path, data)?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.feature_names != FEATURE_NAMES {
            return Err(Error::ModelSchema(format!(
                "feature names do not match the expected schema: got {:?}",
                self.feature_names
            )));
        }
        if self.weights.len() != FEATURE_NAMES.len() {
            return Err(Error::ModelSchema(format!(
                "expected {} weights, got {}",
                FEATURE_NAMES.len(),
                self.weights.len()
            )));
        }
        Ok(())
    }

    /// Probability of hallucination for one feature vector.
    pub fn predict(&self, features: &FeatureVector) -> f64 {
        let x = features.as_array();
        let logit: f64 = self
            .weights
            .iter()
            .zip(x.iter())
            .map(|(w, v)| w * v)
            .sum::<f64>()
            + self.intercept;
        let logit = match &self.calibration {
            Some(cal) => cal.scale * logit + cal.offset,
            None => logit,
        };
        sigmoid(logit)
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Scores feature vectors, with a trained model when one is available.
pub struct RiskScorer {
    model: Option<LogisticModel>,
}

impl RiskScorer {
    /// Heuristic-only scorer.
    pub fn heuristic() -> Self {
        Self { model: None }
    }

    /// Scorer backed by a trained model loaded from `path`.
    pub fn from_model_path(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            model: Some(LogisticModel::load(path)?),
        })
    }

    pub fn with_model(model: LogisticModel) -> Self {
        Self { model: Some(model) }
    }

    /// Fuse a feature vector into the final assessment.
    pub fn assess(&self, features: FeatureVector) -> FusionAssessment {
        let risk_probability = match &self.model {
            Some(model) => model.predict(&features),
            None => heuristic_score(&features),
        };

        FusionAssessment {
            risk_probability,
            risk_level: RiskLevel::from_probability(risk_probability),
            action: RecommendedAction::from_probability(risk_probability),
            explanation: explain(&features),
            features,
            used_trained_model: self.model.is_some(),
        }
    }
}

/// Linear fallback scoring around a 0.5 baseline. Negative weights reward
/// reassuring signals, positive weights punish alarming ones.
pub fn heuristic_score(features: &FeatureVector) -> f64 {
    let score = 0.5
        + 0.25 * features.semantic_entropy
        - 0.30 * features.judge_score
        - 0.20 * features.claim_support_rate
        + 0.15 * features.has_contradiction
        - 0.10 * features.self_similarity
        + 0.10 * features.num_contradictions;
    score.clamp(0.0, 1.0)
}

/// Deterministic, rule-based explanation of the score. Same features in,
/// same text out.
pub fn explain(features: &FeatureVector) -> String {
    let mut issues = Vec::new();

    if features.semantic_entropy > 0.5 {
        issues.push("high uncertainty across samples");
    }
    if features.judge_score < 0.5 {
        issues.push("low factuality score");
    }
    if features.claim_support_rate < 0.6 {
        issues.push("many unsupported claims");
    }
    if features.has_contradiction > 0.0 {
        issues.push("contradictions detected");
    }
    if features.self_similarity < 0.7 {
        issues.push("inconsistent answers");
    }

    if issues.is_empty() {
        "All checks passed - response appears reliable".to_string()
    } else {
        format!("Risk factors: {}", issues.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn clean_features() -> FeatureVector {
        FeatureVector {
            semantic_entropy: 0.05,
            num_clusters: 0.2,
            consensus_strength: 1.0,
            judge_score: 0.9,
            claim_support_rate: 1.0,
            has_contradiction: 0.0,
            self_similarity: 0.95,
            num_contradictions: 0.0,
            answer_length: 0.1,
            citation_density: 0.02,
        }
    }

    fn alarming_features() -> FeatureVector {
        FeatureVector {
            semantic_entropy: 0.9,
            num_clusters: 0.8,
            consensus_strength: 0.3,
            judge_score: 0.2,
            claim_support_rate: 0.3,
            has_contradiction: 1.0,
            self_similarity: 0.5,
            num_contradictions: 0.67,
            answer_length: 0.2,
            citation_density: 0.0,
        }
    }

    #[test]
    fn test_heuristic_clean_answer_scores_low() {
        let prob = heuristic_score(&clean_features());
        assert!(prob < 0.2, "clean features scored {}", prob);
    }

    #[test]
    fn test_heuristic_alarming_answer_scores_high() {
        let prob = heuristic_score(&alarming_features());
        assert!(prob > 0.6, "alarming features scored {}", prob);
    }

    #[test]
    fn test_neutral_defaults_stay_safe() {
        // A run where only fusion executed must not raise alarms.
        let prob = heuristic_score(&FeatureVector::default());
        assert!(prob < 0.2);
    }

    #[test]
    fn test_risk_bands_and_boundaries() {
        assert_eq!(RiskLevel::from_probability(0.0), RiskLevel::Safe);
        assert_eq!(RiskLevel::from_probability(0.19), RiskLevel::Safe);
        // Boundary values go to the higher band.
        assert_eq!(RiskLevel::from_probability(0.2), RiskLevel::Low);
        assert_eq!(RiskLevel::from_probability(0.4), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_probability(0.6), RiskLevel::High);
        assert_eq!(RiskLevel::from_probability(0.8), RiskLevel::Critical);
        assert_eq!(RiskLevel::from_probability(1.0), RiskLevel::Critical);
    }

    #[test]
    fn test_action_bands() {
        assert_eq!(
            RecommendedAction::from_probability(0.1),
            RecommendedAction::Show
        );
        assert_eq!(
            RecommendedAction::from_probability(0.2),
            RecommendedAction::ShowWithWarning
        );
        assert_eq!(
            RecommendedAction::from_probability(0.6),
            RecommendedAction::BlockAndRegenerate
        );
    }

    #[test]
    fn test_explanation_is_deterministic() {
        let features = alarming_features();
        let first = explain(&features);
        let second = explain(&features);
        assert_eq!(first, second);
        assert!(first.contains("contradictions detected"));
        assert!(first.contains("low factuality score"));
    }

    #[test]
    fn test_explanation_clean() {
        assert_eq!(
            explain(&clean_features()),
            "All checks passed - response appears reliable"
        );
    }

    #[test]
    fn test_citation_counting() {
        assert_eq!(count_citations("Known result [1] and also [2, 3]."), 2);
        assert_eq!(count_citations("As shown by Smith (2019)."), 1);
        assert_eq!(count_citations("No citations here."), 0);
    }

    #[test]
    fn test_feature_extraction_uses_neutral_defaults() {
        let features = FeatureVector::extract("short answer", None, None, None, None);
        assert_eq!(features.semantic_entropy, 0.5);
        assert_eq!(features.judge_score, 0.5);
        assert_eq!(features.claim_support_rate, 1.0);
        assert_eq!(features.self_similarity, 1.0);
        assert!(features.answer_length > 0.0);
    }

    #[test]
    fn test_model_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fusion.json");

        let model = LogisticModel::new(
            vec![2.0, 0.5, -1.0, -2.5, -1.5, 1.2, -0.8, 0.9, 0.1, -0.2],
            0.3,
        );
        model.save(&path).unwrap();

        let loaded = LogisticModel::load(&path).unwrap();
        assert_eq!(loaded.weights, model.weights);
        assert_eq!(loaded.intercept, model.intercept);

        let features = alarming_features();
        assert_eq!(loaded.predict(&features), model.predict(&features));
    }

    #[test]
    fn test_model_schema_mismatch_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");

        let mut model = LogisticModel::new(vec![0.0; 10], 0.0);
        model.feature_names[0] = "renamed_feature".to_string();
        let data = serde_json::to_string(&model).unwrap();
        std::fs::write(&path, data).unwrap();

        let err = LogisticModel::load(&path).unwrap_err();
        assert!(matches!(err, Error::ModelSchema(_)));
    }

    #[test]
    fn test_model_weight_count_mismatch_is_fatal() {
        let model = LogisticModel {
            feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
            weights: vec![0.0; 3],
            intercept: 0.0,
            calibration: None,
        };
        assert!(matches!(model.validate(), Err(Error::ModelSchema(_))));
    }

    #[test]
    fn test_trained_model_orders_clean_below_alarming() {
        // Signs follow the heuristic: alarming signals positive, reassuring
        // signals negative.
        let model = LogisticModel::new(
            vec![2.0, 0.5, -1.0, -2.5, -1.5, 1.2, -0.8, 0.9, 0.1, -0.2],
            0.5,
        );
        let scorer = RiskScorer::with_model(model);
        let clean = scorer.assess(clean_features());
        let alarming = scorer.assess(alarming_features());
        assert!(clean.risk_probability < alarming.risk_probability);
        assert!(clean.used_trained_model);
    }

    proptest! {
        #[test]
        fn prop_risk_level_monotone_in_probability(a in 0.0f64..=1.0, b in 0.0f64..=1.0) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(RiskLevel::from_probability(lo) <= RiskLevel::from_probability(hi));
        }

        #[test]
        fn prop_heuristic_score_in_unit_interval(
            entropy in 0.0f64..=2.0,
            judge in 0.0f64..=1.0,
            support in 0.0f64..=1.0,
            contra in 0.0f64..=1.0,
            sim in 0.0f64..=1.0,
            num_contra in 0.0f64..=1.0,
        ) {
            let features = FeatureVector {
                semantic_entropy: entropy,
                judge_score: judge,
                claim_support_rate: support,
                has_contradiction: contra,
                self_similarity: sim,
                num_contradictions: num_contra,
                ..FeatureVector::default()
            };
            let prob = heuristic_score(&features);
            prop_assert!((0.0..=1.0).contains(&prob));
        }
    }
}
