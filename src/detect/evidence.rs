//! Claim-level evidence verification.
//!
//! Checks each extracted claim against the supplied context via natural
//! language inference: does the evidence entail the claim, contradict it,
//! or say nothing about it? The per-claim verdicts pinpoint exactly which
//! statement went wrong instead of flagging the whole answer.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::detect::claims::{strip_code_fences, ClaimExtractor};
use crate::error::Result;
use crate::llm::{ChatMessage, CompletionRequest, LLMClient, DEFAULT_MAX_PARALLEL};

/// How many context chunks to concatenate as evidence for one claim.
const TOP_EVIDENCE_CHUNKS: usize = 3;

/// Verdicts below this confidence are downgraded to unverifiable.
const MIN_VERDICT_CONFIDENCE: f64 = 0.5;

/// Relationship between evidence and a claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimVerdict {
    /// The evidence entails the claim.
    Supported,
    /// The evidence contradicts the claim.
    Contradicted,
    /// The evidence says nothing either way.
    Unverifiable,
}

impl std::fmt::Display for ClaimVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Supported => write!(f, "supported"),
            Self::Contradicted => write!(f, "contradicted"),
            Self::Unverifiable => write!(f, "unverifiable"),
        }
    }
}

/// An entailment judgment with its confidence.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Entailment {
    pub label: ClaimVerdict,
    pub confidence: f64,
}

/// Classifies whether a premise entails a hypothesis.
///
/// Abstracted behind a trait so the inference backend can be swapped: a
/// prompted LLM in production, a canned table in tests.
#[async_trait]
pub trait EntailmentClassifier: Send + Sync {
    async fn entail(&self, premise: &str, hypothesis: &str) -> Result<Entailment>;
}

const ENTAILMENT_PROMPT: &str = "Given the evidence below, classify the claim as one of: \
entailment (the evidence supports the claim), contradiction (the evidence contradicts the \
claim), or neutral (the evidence says nothing about the claim).\n\n\
Evidence:\n{premise}\n\n\
Claim:\n{hypothesis}\n\n\
Respond with JSON only: {\"label\": \"entailment|contradiction|neutral\", \"confidence\": 0.0-1.0}";

/// Entailment via a zero-temperature LLM classification prompt.
pub struct LlmEntailmentClassifier {
    client: Arc<dyn LLMClient>,
    model: Option<String>,
}

impl LlmEntailmentClassifier {
    pub fn new(client: Arc<dyn LLMClient>) -> Self {
        Self {
            client,
            model: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

#[derive(Deserialize)]
struct EntailmentJson {
    label: String,
    confidence: f64,
}

#[async_trait]
impl EntailmentClassifier for LlmEntailmentClassifier {
    async fn entail(&self, premise: &str, hypothesis: &str) -> Result<Entailment> {
        let prompt = ENTAILMENT_PROMPT
            .replace("{premise}", premise)
            .replace("{hypothesis}", hypothesis);

        let mut request = CompletionRequest::new()
            .with_message(ChatMessage::user(prompt))
            .with_temperature(0.0)
            .with_max_tokens(100);
        if let Some(ref model) = self.model {
            request = request.with_model(model);
        }

        let response = self.client.complete(request).await?;
        let parsed: EntailmentJson =
            serde_json::from_str(strip_code_fences(&response.content).trim())?;

        let label = match parsed.label.to_lowercase().as_str() {
            "entailment" => ClaimVerdict::Supported,
            "contradiction" => ClaimVerdict::Contradicted,
            _ => ClaimVerdict::Unverifiable,
        };

        Ok(Entailment {
            label,
            confidence: parsed.confidence.clamp(0.0, 1.0),
        })
    }
}

/// One claim with its verdict and the evidence it was judged against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimCheck {
    pub claim: String,
    pub verdict: ClaimVerdict,
    pub confidence: f64,
    pub evidence: String,
}

/// Aggregate output of the evidence check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceReport {
    /// Every checked claim with its verdict.
    pub claims: Vec<ClaimCheck>,
    /// Fraction of claims supported by the evidence. 1.0 when the answer
    /// contained nothing checkable.
    pub support_rate: f64,
    /// Whether any claim was contradicted outright.
    pub has_contradiction: bool,
    /// Claims that were not supported, for display.
    pub unsupported_claims: Vec<ClaimCheck>,
    pub num_claims: u32,
    pub num_supported: u32,
    pub num_contradicted: u32,
    pub num_unverifiable: u32,
}

impl EvidenceReport {
    fn empty() -> Self {
        Self {
            claims: Vec::new(),
            support_rate: 1.0,
            has_contradiction: false,
            unsupported_claims: Vec::new(),
            num_claims: 0,
            num_supported: 0,
            num_contradicted: 0,
            num_unverifiable: 0,
        }
    }
}

/// Verifies extracted claims against context chunks.
pub struct EvidenceDetector {
    extractor: ClaimExtractor,
    classifier: Arc<dyn EntailmentClassifier>,
}

impl EvidenceDetector {
    pub fn new(extractor: ClaimExtractor, classifier: Arc<dyn EntailmentClassifier>) -> Self {
        Self {
            extractor,
            classifier,
        }
    }

    /// Check every claim in `answer` against `context`.
    ///
    /// An answer with no checkable claims is vacuously fully supported.
    /// A claim judged with low confidence is treated as unverifiable rather
    /// than trusted either way.
    pub async fn detect(&self, answer: &str, context: &[String]) -> Result<EvidenceReport> {
        let claims = self.extractor.extract(answer).await;
        if claims.is_empty() {
            debug!("no checkable claims extracted");
            return Ok(EvidenceReport::empty());
        }

        // Each entailment check is an independent, latency-dominated
        // sub-request; issue them concurrently under the same cap the
        // batch executor uses. join_all preserves claim order.
        let semaphore = Arc::new(Semaphore::new(DEFAULT_MAX_PARALLEL));
        let tasks: Vec<_> = claims
            .into_iter()
            .map(|claim| {
                let evidence = find_evidence(&claim, context);
                let classifier = Arc::clone(&self.classifier);
                let semaphore = Arc::clone(&semaphore);

                async move {
                    if evidence.is_empty() {
                        return ClaimCheck {
                            claim,
                            verdict: ClaimVerdict::Unverifiable,
                            confidence: 1.0,
                            evidence,
                        };
                    }

                    let _permit = semaphore
                        .acquire()
                        .await
                        .expect("Semaphore closed unexpectedly");

                    match classifier.entail(&evidence, &claim).await {
                        Ok(entailment) => {
                            let verdict = if entailment.confidence < MIN_VERDICT_CONFIDENCE {
                                ClaimVerdict::Unverifiable
                            } else {
                                entailment.label
                            };
                            ClaimCheck {
                                claim,
                                verdict,
                                confidence: entailment.confidence,
                                evidence,
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "entailment check failed, marking unverifiable");
                            ClaimCheck {
                                claim,
                                verdict: ClaimVerdict::Unverifiable,
                                confidence: 0.0,
                                evidence,
                            }
                        }
                    }
                }
            })
            .collect();

        let checks = join_all(tasks).await;

        let num_claims = checks.len() as u32;
        let num_supported = count_verdict(&checks, ClaimVerdict::Supported);
        let num_contradicted = count_verdict(&checks, ClaimVerdict::Contradicted);
        let num_unverifiable = count_verdict(&checks, ClaimVerdict::Unverifiable);
        let unsupported_claims: Vec<ClaimCheck> = checks
            .iter()
            .filter(|c| c.verdict != ClaimVerdict::Supported)
            .cloned()
            .collect();

        Ok(EvidenceReport {
            support_rate: num_supported as f64 / num_claims as f64,
            has_contradiction: num_contradicted > 0,
            unsupported_claims,
            num_claims,
            num_supported,
            num_contradicted,
            num_unverifiable,
            claims: checks,
        })
    }
}

fn count_verdict(checks: &[ClaimCheck], verdict: ClaimVerdict) -> u32 {
    checks.iter().filter(|c| c.verdict == verdict).count() as u32
}

/// Select the evidence for one claim by lexical overlap: concatenate the
/// top chunks that share words with the claim, or fall back to all context
/// when nothing overlaps. Empty context yields empty evidence.
pub fn find_evidence(claim: &str, context: &[String]) -> String {
    if context.is_empty() {
        return String::new();
    }

    let claim_words: HashSet<String> = claim
        .to_lowercase()
        .split_whitespace()
        .map(String::from)
        .collect();

    let mut scored: Vec<(usize, &String)> = context
        .iter()
        .filter_map(|chunk| {
            let overlap = chunk
                .to_lowercase()
                .split_whitespace()
                .collect::<HashSet<_>>()
                .iter()
                .filter(|w| claim_words.contains(**w))
                .count();
            (overlap > 0).then_some((overlap, chunk))
        })
        .collect();

    if scored.is_empty() {
        return context.join(" ");
    }

    scored.sort_by(|a, b| b.0.cmp(&a.0));
    scored
        .into_iter()
        .take(TOP_EVIDENCE_CHUNKS)
        .map(|(_, chunk)| chunk.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}
