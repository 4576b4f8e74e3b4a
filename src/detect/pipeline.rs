//! Detection pipeline.
//!
//! Orchestrates the detectors according to the active profile: the cheap
//! uncertainty check always runs first and its outcome gates the expensive
//! checks. Detector failures degrade the run (the fusion layer substitutes
//! neutral features) instead of failing it; only unusable input is an error.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::{DetectionMode, DetectionProfile};
use crate::detect::claims::ClaimExtractor;
use crate::detect::consistency::{ConsistencyDetector, ConsistencyReport};
use crate::detect::entropy::{EntropyConfig, EntropyDetector, EntropyReport};
use crate::detect::evidence::{
    EntailmentClassifier, EvidenceDetector, EvidenceReport, LlmEntailmentClassifier,
};
use crate::detect::fusion::{FeatureVector, RiskScorer};
use crate::detect::judge::{JudgeReport, JudgeVerdict, LlmJudge};
use crate::detect::types::{DetectionRequest, DetectionResult, DetectionSummary};
use crate::error::{Error, Result};
use crate::llm::LLMClient;

/// Support rate below which the self-consistency fallback kicks in even
/// when context was available.
const LOW_SUPPORT_RATE: f64 = 0.6;

/// Full hallucination-detection pipeline.
pub struct DetectionPipeline {
    client: Arc<dyn LLMClient>,
    profile: DetectionProfile,
    classifier: Arc<dyn EntailmentClassifier>,
    scorer: RiskScorer,
}

impl DetectionPipeline {
    /// Build a pipeline for the given profile. Fails only on an unusable
    /// fusion model file; a missing path just selects heuristic scoring.
    pub fn new(client: Arc<dyn LLMClient>, profile: DetectionProfile) -> Result<Self> {
        let scorer = match &profile.fusion_model_path {
            Some(path) => RiskScorer::from_model_path(path)?,
            None => RiskScorer::heuristic(),
        };
        let classifier: Arc<dyn EntailmentClassifier> =
            Arc::new(LlmEntailmentClassifier::new(Arc::clone(&client)));
        Ok(Self {
            client,
            profile,
            classifier,
            scorer,
        })
    }

    /// Swap the entailment backend (tests use a canned classifier).
    pub fn with_entailment_classifier(mut self, classifier: Arc<dyn EntailmentClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn profile(&self) -> &DetectionProfile {
        &self.profile
    }

    /// Run the full detection pass over one question/answer pair.
    #[instrument(skip(self, request), fields(mode = %self.profile.mode))]
    pub async fn detect(&self, request: &DetectionRequest) -> Result<DetectionResult> {
        if request.question.trim().is_empty() {
            return Err(Error::insufficient_input("question must not be empty"));
        }
        if request.answer.trim().is_empty() {
            return Err(Error::insufficient_input("answer must not be empty"));
        }

        let started = Instant::now();
        let model = request.model.as_deref();

        let entropy = if self.profile.use_uncertainty {
            self.run_entropy(request, model).await
        } else {
            None
        };

        let judge = if should_run_judge(&self.profile, entropy.as_ref()) {
            Some(self.run_judge(request).await)
        } else {
            None
        };

        let claims = if should_run_evidence(&self.profile, request) {
            self.run_evidence(request).await
        } else {
            None
        };

        let self_check = if should_run_consistency(&self.profile, request, claims.as_ref()) {
            self.run_consistency(request, model).await
        } else {
            None
        };

        let features = FeatureVector::extract(
            &request.answer,
            entropy.as_ref(),
            judge.as_ref(),
            claims.as_ref(),
            self_check.as_ref(),
        );
        let assessment = self.scorer.assess(features);

        let summary = build_summary(
            entropy.as_ref(),
            judge.as_ref(),
            claims.as_ref(),
            self_check.as_ref(),
            &assessment,
        );

        let latency_ms = started.elapsed().as_millis() as u64;
        info!(
            risk = assessment.risk_probability,
            level = %assessment.risk_level,
            latency_ms,
            "detection complete"
        );

        Ok(DetectionResult {
            id: Uuid::new_v4(),
            mode: self.profile.mode,
            risk_probability: assessment.risk_probability,
            risk_level: assessment.risk_level,
            action: assessment.action,
            explanation: assessment.explanation.clone(),
            semantic_entropy: entropy,
            judge,
            claims,
            self_check,
            assessment,
            summary,
            completed_at: Utc::now(),
            latency_ms,
        })
    }

    async fn run_entropy(
        &self,
        request: &DetectionRequest,
        model: Option<&str>,
    ) -> Option<EntropyReport> {
        let config = EntropyConfig {
            sample_count: self.profile.sample_count,
            temperature: self.profile.sample_temperature,
            max_samples: self.profile.max_samples,
            ..EntropyConfig::default()
        };
        let detector = EntropyDetector::new(Arc::clone(&self.client), config);

        let outcome = if self.profile.adaptive_resampling {
            detector
                .detect_adaptive(
                    &request.question,
                    model,
                    &request.samples,
                    self.profile.sample_count,
                )
                .await
        } else {
            detector
                .detect(
                    &request.question,
                    model,
                    &request.samples,
                    self.profile.sample_count,
                )
                .await
        };

        match outcome {
            Ok(report) => Some(report),
            Err(e) => {
                warn!(error = %e, "uncertainty check failed, continuing without it");
                None
            }
        }
    }

    async fn run_judge(&self, request: &DetectionRequest) -> JudgeReport {
        let mut judge = LlmJudge::new(Arc::clone(&self.client));
        if let Some(model) = &self.profile.judge_model {
            judge = judge.with_model(model);
        }
        judge.judge(&request.answer, &request.context).await
    }

    async fn run_evidence(&self, request: &DetectionRequest) -> Option<EvidenceReport> {
        let extractor = if self.profile.use_llm_claim_extraction {
            ClaimExtractor::with_llm(Arc::clone(&self.client))
        } else {
            ClaimExtractor::new()
        };
        let detector = EvidenceDetector::new(extractor, Arc::clone(&self.classifier));
        match detector.detect(&request.answer, &request.context).await {
            Ok(report) => Some(report),
            Err(e) => {
                warn!(error = %e, "evidence check failed, continuing without it");
                None
            }
        }
    }

    async fn run_consistency(
        &self,
        request: &DetectionRequest,
        model: Option<&str>,
    ) -> Option<ConsistencyReport> {
        let detector = ConsistencyDetector::new(Arc::clone(&self.client))
            .with_variations(self.profile.consistency_variations);
        match detector
            .detect(&request.question, &request.answer, model)
            .await
        {
            Ok(report) => Some(report),
            Err(e) => {
                warn!(error = %e, "consistency check failed, continuing without it");
                None
            }
        }
    }
}

/// The judge runs unconditionally in thorough mode, and in balanced mode
/// only once the cheap uncertainty check has raised suspicion.
pub fn should_run_judge(profile: &DetectionProfile, entropy: Option<&EntropyReport>) -> bool {
    if !profile.use_judge {
        return false;
    }
    match profile.mode {
        DetectionMode::Thorough => true,
        _ => entropy.map(|e| e.suspicious).unwrap_or(false),
    }
}

/// Claim verification needs context to verify against.
pub fn should_run_evidence(profile: &DetectionProfile, request: &DetectionRequest) -> bool {
    profile.use_evidence_check && request.has_context()
}

/// Self-consistency is the fallback check: it runs when there is no context
/// at all, when the evidence check found weak support, or unconditionally in
/// thorough mode.
pub fn should_run_consistency(
    profile: &DetectionProfile,
    request: &DetectionRequest,
    claims: Option<&EvidenceReport>,
) -> bool {
    if !profile.use_consistency_check {
        return false;
    }
    if profile.mode == DetectionMode::Thorough {
        return true;
    }
    if !request.has_context() {
        return true;
    }
    claims
        .map(|c| c.support_rate < LOW_SUPPORT_RATE)
        .unwrap_or(false)
}

fn build_summary(
    entropy: Option<&EntropyReport>,
    judge: Option<&JudgeReport>,
    claims: Option<&EvidenceReport>,
    self_check: Option<&ConsistencyReport>,
    assessment: &crate::detect::fusion::FusionAssessment,
) -> DetectionSummary {
    let mut checks_run = Vec::new();
    let mut issues_found = Vec::new();

    if let Some(entropy) = entropy {
        checks_run.push("semantic_entropy".to_string());
        if entropy.suspicious {
            issues_found.push(format!(
                "High semantic entropy ({:.2}) across {} samples",
                entropy.semantic_entropy, entropy.num_samples
            ));
        }
    }
    if let Some(judge) = judge {
        checks_run.push("judge".to_string());
        if matches!(judge.verdict, JudgeVerdict::ReviewRequired | JudgeVerdict::Reject) {
            issues_found.push(format!(
                "Judge scored factuality at {:.2} ({})",
                judge.score, judge.verdict
            ));
        }
    }
    if let Some(claims) = claims {
        checks_run.push("claim_verification".to_string());
        for claim in &claims.unsupported_claims {
            issues_found.push(format!("Claim {}: {}", claim.verdict, claim.claim));
        }
    }
    if let Some(self_check) = self_check {
        checks_run.push("self_consistency".to_string());
        if self_check.disagrees {
            issues_found.push(format!(
                "Model gives divergent answers to rephrased questions (similarity {:.2})",
                self_check.similarity_score
            ));
        }
        for contradiction in &self_check.contradictions {
            issues_found.push(format!(
                "Model denies its own claim when probed: {}",
                contradiction.claim
            ));
        }
    }

    if issues_found.is_empty() {
        issues_found.push("No issues detected".to_string());
    }

    DetectionSummary {
        checks_run,
        issues_found,
        recommendation: assessment.action,
    }
}
