//! # veracity
//!
//! Hallucination detection for LLM answers: multiple complementary
//! detectors fused into one calibrated risk score with a recommended
//! action.
//!
//! ## Core Components
//!
//! - **Entropy**: semantic-entropy uncertainty check over repeated samples
//! - **Evidence**: claim-level entailment verification against context
//! - **Consistency**: self-consistency probing when no context exists
//! - **Judge**: rubric-based factuality scoring by a strong model
//! - **Fusion**: risk score, tier, and action from whatever checks ran
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use veracity::{ClientConfig, DetectionPipeline, DetectionProfile, DetectionRequest, OpenAIClient};
//!
//! let client = Arc::new(OpenAIClient::new(ClientConfig::new("sk-..."))?);
//! let pipeline = DetectionPipeline::new(client, DetectionProfile::balanced())?;
//!
//! let request = DetectionRequest::new(
//!     "What is the capital of France?",
//!     "Paris is the capital of France.",
//! )
//! .with_context(vec!["Paris is the capital of France.".to_string()]);
//!
//! let result = pipeline.detect(&request).await?;
//! println!("{}: {}", result.risk_level, result.explanation);
//! ```

pub mod config;
pub mod detect;
pub mod error;
pub mod llm;

// Re-exports for convenience
pub use config::{CostEnvelope, DetectionMode, DetectionProfile};
pub use detect::{
    ClaimCheck, ClaimExtractor, ClaimVerdict, ConsistencyDetector, ConsistencyReport,
    DetectionPipeline, DetectionRequest, DetectionResult, DetectionSummary, Entailment,
    EntailmentClassifier, EntropyConfig, EntropyDetector, EntropyReport, EvidenceDetector,
    EvidenceReport, FeatureVector, FusionAssessment, JudgeReport, JudgeVerdict, LlmJudge,
    LogisticModel, LlmEntailmentClassifier, ProbeStance, RecommendedAction, RiskLevel, RiskScorer,
};
pub use error::{Error, Result};
pub use llm::{
    AnthropicClient, BatchExecutor, BatchItem, BatchResults, ChatMessage, ChatRole, ClientConfig,
    CompletionRequest, CompletionResponse, EmbeddingRequest, EmbeddingResponse, LLMClient,
    OpenAIClient, PromptBatch, Provider, TokenUsage,
};
