//! LLM-as-judge factuality scoring.
//!
//! Asks a strong model to grade the answer against a fixed rubric and return
//! a structured score. Judges align well with human factuality ratings when
//! the rubric is explicit, and the score feeds the fusion layer as one
//! signal among several. A judge failure never fails the run; it degrades
//! to a neutral score.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::detect::claims::strip_code_fences;
use crate::llm::{ChatMessage, CompletionRequest, LLMClient};

/// At most this many context chunks are shown to the judge.
const MAX_CONTEXT_CHUNKS: usize = 5;

const JUDGE_SYSTEM_PROMPT: &str =
    "You are a factuality evaluation expert. Respond only with valid JSON.";

const JUDGE_PROMPT_TEMPLATE: &str = "You are a factuality judge. Evaluate the Answer's factuality and grounding.\n\n\
Score from 0.0 to 1.0:\n\
- 1.0 = Fully supported by context, internally consistent, specific and verifiable\n\
- 0.7 = Mostly supported with minor unsupported details\n\
- 0.5 = Partially supported or contains unverifiable claims\n\
- 0.3 = Largely unsupported or contradicts context\n\
- 0.0 = Contradicted by context or clearly fabricated\n\n\
Evaluation criteria:\n\
1. **Grounding**: Are claims supported by the provided context?\n\
2. **Internal consistency**: Does the answer contradict itself?\n\
3. **Entity correctness**: Are names, dates, numbers accurate?\n\
4. **Citation quality**: Are sources/evidence properly referenced?\n\
5. **Confidence calibration**: Does hedging match claim strength?\n\n\
Context:\n{context}\n\n\
Answer to evaluate:\n{answer}\n\n\
Respond ONLY with valid JSON in this exact format:\n\
{\"score\": <float between 0.0 and 1.0>, \"rationale\": \"<1-2 sentence explanation>\", \"issues\": [\"<issue1>\", \"<issue2>\"]}";

/// Verdict band derived from the judge score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JudgeVerdict {
    Trusted,
    Acceptable,
    ReviewRequired,
    Reject,
    /// The judge itself failed; the score is a neutral placeholder.
    Unknown,
}

impl JudgeVerdict {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.8 {
            Self::Trusted
        } else if score >= 0.6 {
            Self::Acceptable
        } else if score >= 0.4 {
            Self::ReviewRequired
        } else {
            Self::Reject
        }
    }
}

impl std::fmt::Display for JudgeVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trusted => write!(f, "trusted"),
            Self::Acceptable => write!(f, "acceptable"),
            Self::ReviewRequired => write!(f, "review_required"),
            Self::Reject => write!(f, "reject"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Structured output of one judge call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeReport {
    /// Factuality score in [0, 1].
    pub score: f64,
    /// The judge's short explanation.
    pub rationale: String,
    /// Specific problems the judge identified.
    pub issues: Vec<String>,
    /// Band the score falls into.
    pub verdict: JudgeVerdict,
    /// Model that produced the judgment.
    pub judge_model: String,
}

impl JudgeReport {
    /// Neutral report used when the judge call or its parsing fails.
    fn neutral(rationale: String, judge_model: String) -> Self {
        Self {
            score: 0.5,
            rationale,
            issues: Vec::new(),
            verdict: JudgeVerdict::Unknown,
            judge_model,
        }
    }
}

#[derive(Deserialize)]
struct JudgeJson {
    score: f64,
    #[serde(default = "default_rationale")]
    rationale: String,
    #[serde(default)]
    issues: Vec<String>,
}

fn default_rationale() -> String {
    "No rationale provided".to_string()
}

/// Scores answers against the factuality rubric.
pub struct LlmJudge {
    client: Arc<dyn LLMClient>,
    model: Option<String>,
}

impl LlmJudge {
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

    /// Judge one answer. Never errors; failures degrade to a neutral score
    /// with an unknown verdict so the pipeline can keep going.
    pub async fn judge(&self, answer: &str, context: &[String]) -> JudgeReport {
        let prompt = JUDGE_PROMPT_TEMPLATE
            .replace("{context}", &format_context(context))
            .replace("{answer}", answer);

        let mut request = CompletionRequest::new()
            .with_system(JUDGE_SYSTEM_PROMPT)
            .with_message(ChatMessage::user(prompt))
            .with_temperature(0.0)
            .with_max_tokens(300);
        if let Some(ref model) = self.model {
            request = request.with_model(model);
        }

        let response = match self.client.complete(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "judge call failed, using neutral score");
                return JudgeReport::neutral(
                    format!("Judge failed: {}", e),
                    self.model_name(),
                );
            }
        };

        match serde_json::from_str::<JudgeJson>(strip_code_fences(&response.content).trim()) {
            Ok(parsed) => {
                let score = parsed.score.clamp(0.0, 1.0);
                JudgeReport {
                    score,
                    rationale: parsed.rationale,
                    issues: parsed.issues,
                    verdict: JudgeVerdict::from_score(score),
                    judge_model: response.model,
                }
            }
            Err(e) => {
                warn!(error = %e, raw = %response.content, "failed to parse judge response");
                JudgeReport::neutral(
                    "Failed to parse judge response".to_string(),
                    response.model,
                )
            }
        }
    }

    fn model_name(&self) -> String {
        self.model.clone().unwrap_or_else(|| "default".to_string())
    }
}

/// Number the context chunks so the judge can reference them.
fn format_context(context: &[String]) -> String {
    if context.is_empty() {
        return "No context provided".to_string();
    }
    context
        .iter()
        .take(MAX_CONTEXT_CHUNKS)
        .enumerate()
        .map(|(i, chunk)| format!("[{}] {}", i + 1, chunk))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use crate::llm::{CompletionResponse, EmbeddingRequest, EmbeddingResponse, Provider, TokenUsage};
    use async_trait::async_trait;
    use chrono::Utc;

    struct CannedClient {
        reply: Result<String>,
    }

    #[async_trait]
    impl LLMClient for CannedClient {
        async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse> {
            let content = match &self.reply {
                Ok(content) => content.clone(),
                Err(_) => return Err(Error::Llm("canned failure".to_string())),
            };
            Ok(CompletionResponse {
                id: "canned".to_string(),
                model: "judge-model".to_string(),
                content,
                usage: TokenUsage::default(),
                timestamp: Utc::now(),
            })
        }

        async fn embed(&self, _request: EmbeddingRequest) -> Result<EmbeddingResponse> {
            Err(Error::Llm("no embeddings".to_string()))
        }

        fn provider(&self) -> Provider {
            Provider::OpenAI
        }
    }

    fn judge_with_reply(reply: Result<String>) -> LlmJudge {
        LlmJudge::new(Arc::new(CannedClient { reply }))
    }

    #[tokio::test]
    async fn test_well_formed_response() {
        let judge = judge_with_reply(Ok(
            r#"{"score": 0.9, "rationale": "Fully grounded.", "issues": []}"#.to_string(),
        ));
        let report = judge.judge("Paris is the capital.", &[]).await;
        assert!((report.score - 0.9).abs() < 1e-9);
        assert_eq!(report.verdict, JudgeVerdict::Trusted);
        assert_eq!(report.judge_model, "judge-model");
    }

    #[tokio::test]
    async fn test_fenced_response_is_parsed() {
        let judge = judge_with_reply(Ok(
            "```json\n{\"score\": 0.3, \"rationale\": \"Unsupported.\", \"issues\": [\"bad date\"]}\n```"
                .to_string(),
        ));
        let report = judge.judge("answer", &[]).await;
        assert_eq!(report.verdict, JudgeVerdict::Reject);
        assert_eq!(report.issues, vec!["bad date".to_string()]);
    }

    #[tokio::test]
    async fn test_out_of_range_score_is_clamped() {
        let judge =
            judge_with_reply(Ok(r#"{"score": 1.7, "rationale": "r", "issues": []}"#.to_string()));
        let report = judge.judge("answer", &[]).await;
        assert_eq!(report.score, 1.0);
    }

    #[tokio::test]
    async fn test_call_failure_degrades_to_neutral() {
        let judge = judge_with_reply(Err(Error::Llm("down".to_string())));
        let report = judge.judge("answer", &[]).await;
        assert_eq!(report.score, 0.5);
        assert_eq!(report.verdict, JudgeVerdict::Unknown);
    }

    #[tokio::test]
    async fn test_garbage_response_degrades_to_neutral() {
        let judge = judge_with_reply(Ok("I think it looks fine!".to_string()));
        let report = judge.judge("answer", &[]).await;
        assert_eq!(report.score, 0.5);
        assert_eq!(report.verdict, JudgeVerdict::Unknown);
    }

    #[test]
    fn test_verdict_bands() {
        assert_eq!(JudgeVerdict::from_score(0.8), JudgeVerdict::Trusted);
        assert_eq!(JudgeVerdict::from_score(0.79), JudgeVerdict::Acceptable);
        assert_eq!(JudgeVerdict::from_score(0.6), JudgeVerdict::Acceptable);
        assert_eq!(JudgeVerdict::from_score(0.5), JudgeVerdict::ReviewRequired);
        assert_eq!(JudgeVerdict::from_score(0.1), JudgeVerdict::Reject);
    }

    #[test]
    fn test_context_formatting() {
        assert_eq!(format_context(&[]), "No context provided");
        let chunks = vec!["a".to_string(), "b".to_string()];
        assert_eq!(format_context(&chunks), "[1] a\n\n[2] b");
    }
}
