//! Hallucination detectors and the pipeline that orchestrates them.
//!
//! Four complementary signals feed one fused risk score:
//! - [`entropy`]: does the model keep changing its answer?
//! - [`evidence`]: do the answer's claims hold up against the context?
//! - [`consistency`]: does the model stand by its claims when probed?
//! - [`judge`]: what does a strong model grading against a rubric say?
//!
//! [`fusion`] combines whatever subset ran into a probability, and
//! [`pipeline`] decides which subset runs.

pub mod claims;
pub mod consistency;
pub mod entropy;
pub mod evidence;
pub mod fusion;
pub mod judge;
pub mod pipeline;
pub mod types;

pub use claims::ClaimExtractor;
pub use consistency::{ConsistencyDetector, ConsistencyReport, ProbeStance};
pub use entropy::{EntropyConfig, EntropyDetector, EntropyReport};
pub use evidence::{
    ClaimCheck, ClaimVerdict, Entailment, EntailmentClassifier, EvidenceDetector, EvidenceReport,
    LlmEntailmentClassifier,
};
pub use fusion::{
    FeatureVector, FusionAssessment, LogisticModel, RecommendedAction, RiskLevel, RiskScorer,
};
pub use judge::{JudgeReport, JudgeVerdict, LlmJudge};
pub use pipeline::DetectionPipeline;
pub use types::{DetectionRequest, DetectionResult, DetectionSummary};
