//! Self-consistency probing.
//!
//! The fallback check for answers with no context to verify against: re-ask
//! the question in different phrasings and compare the answers, then probe
//! the answer's key claims directly. A model that backs off its own claims
//! under light pressure was probably hallucinating them.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::detect::claims::ClaimExtractor;
use crate::error::Result;
use crate::llm::{cosine_similarity, BatchExecutor, EmbeddingRequest, LLMClient, PromptBatch};

/// Answers less similar than this on average count as disagreement.
const DISAGREEMENT_THRESHOLD: f64 = 0.7;

/// How many leading claims to probe.
const MAX_PROBED_CLAIMS: usize = 3;

/// Low temperature: variations should disagree only when the model is
/// genuinely unsure, not because we asked it to be creative.
const VARIATION_TEMPERATURE: f64 = 0.3;
const VARIATION_MAX_TOKENS: u32 = 300;

/// Rephrasing templates applied to the original question.
const VARIATION_TEMPLATES: &[&str] = &["Answer concisely: ", "Briefly explain: ", "In simple terms: "];

/// The model's stance when asked point-blank whether its claim is true.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeStance {
    Affirm,
    Deny,
    Unknown,
}

/// One probed claim with the model's reaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimProbe {
    pub claim: String,
    pub probe_answer: String,
    pub stance: ProbeStance,
}

/// A claim the model denied when probed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contradiction {
    pub claim: String,
    pub probe_answer: String,
    pub reason: String,
}

/// Aggregate output of the self-consistency check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsistencyReport {
    /// Mean similarity between the original answer and the variant answers.
    /// 1.0 when no variants survived.
    pub similarity_score: f64,
    /// Whether the mean similarity fell below the disagreement threshold.
    pub disagrees: bool,
    /// Answers to the rephrased questions.
    pub alt_answers: Vec<String>,
    /// Per-variant similarity to the original answer.
    pub similarity_scores: Vec<f64>,
    /// The claims that were probed.
    pub key_claims: Vec<String>,
    /// Per-claim probe outcomes.
    pub probe_results: Vec<ClaimProbe>,
    /// Claims the model denied under probing.
    pub contradictions: Vec<Contradiction>,
    pub num_contradictions: u32,
    /// "consistent" or "inconsistent", for display.
    pub verdict: String,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.verdict == "consistent"
    }
}

/// Checks whether the model stands by its own answer.
pub struct ConsistencyDetector {
    client: Arc<dyn LLMClient>,
    extractor: ClaimExtractor,
    num_variations: u32,
}

impl ConsistencyDetector {
    pub fn new(client: Arc<dyn LLMClient>) -> Self {
        Self {
            client,
            extractor: ClaimExtractor::new(),
            num_variations: 2,
        }
    }

    pub fn with_variations(mut self, num_variations: u32) -> Self {
        self.num_variations = num_variations;
        self
    }

    /// Run both consistency checks: variant re-asking and claim probing.
    ///
    /// Failed variant requests are dropped; with none surviving, similarity
    /// defaults to full agreement and the verdict rests on the probes alone.
    pub async fn detect(
        &self,
        question: &str,
        answer: &str,
        model: Option<&str>,
    ) -> Result<ConsistencyReport> {
        let alt_answers = self.ask_variations(question, model).await;

        let (similarity_scores, similarity_score) =
            self.compare_answers(answer, &alt_answers).await?;

        let key_claims = self.extractor.key_claims(answer, MAX_PROBED_CLAIMS);
        let probe_results = self.probe_claims(&key_claims, model).await;
        let contradictions = find_contradictions(&probe_results);

        let disagrees = similarity_score < DISAGREEMENT_THRESHOLD;
        let inconsistent = disagrees || !contradictions.is_empty();

        Ok(ConsistencyReport {
            similarity_score,
            disagrees,
            alt_answers,
            similarity_scores,
            key_claims,
            num_contradictions: contradictions.len() as u32,
            probe_results,
            contradictions,
            verdict: if inconsistent {
                "inconsistent".to_string()
            } else {
                "consistent".to_string()
            },
        })
    }

    async fn ask_variations(&self, question: &str, model: Option<&str>) -> Vec<String> {
        let prompts: Vec<String> = VARIATION_TEMPLATES
            .iter()
            .take(self.num_variations as usize)
            .map(|template| format!("{}{}", template, question))
            .collect();

        let mut batch = PromptBatch::new(prompts)
            .with_temperature(VARIATION_TEMPERATURE)
            .with_max_tokens(VARIATION_MAX_TOKENS);
        if let Some(model) = model {
            batch = batch.with_model(model);
        }

        let results = BatchExecutor::new(Arc::clone(&self.client))
            .execute(batch)
            .await;
        if results.failure_count() > 0 {
            warn!(
                failed = results.failure_count(),
                "dropped failed question variations"
            );
        }
        results.successes()
    }

    async fn compare_answers(
        &self,
        answer: &str,
        alt_answers: &[String],
    ) -> Result<(Vec<f64>, f64)> {
        if alt_answers.is_empty() {
            return Ok((Vec::new(), 1.0));
        }

        let mut texts = vec![answer.to_string()];
        texts.extend_from_slice(alt_answers);
        let embeddings = self.client.embed(EmbeddingRequest::new(texts)).await?.embeddings;

        let original = &embeddings[0];
        let scores: Vec<f64> = embeddings[1..]
            .iter()
            .map(|alt| cosine_similarity(original, alt))
            .collect();
        let mean = scores.iter().sum::<f64>() / scores.len() as f64;
        Ok((scores, mean))
    }

    async fn probe_claims(&self, claims: &[String], model: Option<&str>) -> Vec<ClaimProbe> {
        if claims.is_empty() {
            return Vec::new();
        }

        let prompts: Vec<String> = claims
            .iter()
            .map(|claim| {
                format!(
                    "Is this statement true? '{}' Answer with Yes/No/Unknown and explain briefly in 1 sentence.",
                    claim
                )
            })
            .collect();

        let mut batch = PromptBatch::new(prompts)
            .with_temperature(VARIATION_TEMPERATURE)
            .with_max_tokens(VARIATION_MAX_TOKENS);
        if let Some(model) = model {
            batch = batch.with_model(model);
        }

        let results = BatchExecutor::new(Arc::clone(&self.client))
            .execute(batch)
            .await;

        claims
            .iter()
            .zip(results.items.iter())
            .map(|(claim, item)| match &item.outcome {
                Ok(probe_answer) => ClaimProbe {
                    claim: claim.clone(),
                    probe_answer: probe_answer.clone(),
                    stance: extract_stance(probe_answer),
                },
                Err(e) => {
                    warn!(error = %e, "claim probe failed");
                    ClaimProbe {
                        claim: claim.clone(),
                        probe_answer: format!("Error: {}", e),
                        stance: ProbeStance::Unknown,
                    }
                }
            })
            .collect()
    }
}

/// Read the model's stance from the opening of its probe answer. Only the
/// first few words matter; later mentions of "no" or "yes" are usually part
/// of the explanation.
pub fn extract_stance(probe_answer: &str) -> ProbeStance {
    let lower = probe_answer.to_lowercase();
    let head: String = lower.chars().take(20).collect();

    if ["yes", "true", "correct"].iter().any(|w| head.contains(w)) {
        ProbeStance::Affirm
    } else if ["no", "false", "incorrect"].iter().any(|w| head.contains(w)) {
        ProbeStance::Deny
    } else {
        ProbeStance::Unknown
    }
}

/// A denied probe is a self-contradiction: the model stated the claim and
/// now says it is false.
fn find_contradictions(probes: &[ClaimProbe]) -> Vec<Contradiction> {
    probes
        .iter()
        .filter(|p| p.stance == ProbeStance::Deny)
        .map(|p| Contradiction {
            claim: p.claim.clone(),
            probe_answer: p.probe_answer.clone(),
            reason: "Model contradicts its own claim when probed".to_string(),
        })
        .collect()
}
