//! Claim extraction.
//!
//! Breaks an answer into atomic factual claims so downstream checks can
//! attribute problems to specific statements instead of the whole answer.
//! Two paths: a fast rule-based sentence filter, and an optional LLM
//! extraction prompt that falls back to the rule-based path on any failure.

use std::sync::Arc;

use regex::Regex;
use tracing::warn;

use crate::llm::{ChatMessage, CompletionRequest, LLMClient};

const EXTRACTION_PROMPT: &str = "Extract atomic factual claims from the following text. Each claim should be:\n\
- A single, verifiable fact\n\
- Self-contained (understandable without context)\n\
- Maximum 20 words\n\
- No opinions or subjective statements\n\n\
Text:\n{answer}\n\n\
Respond with a JSON list of claims:\n[\"claim 1\", \"claim 2\", ...]";

/// Sentences opening with these are framing, not facts.
const META_PHRASES: &[&str] = &[
    "let me",
    "i will",
    "here is",
    "here are",
    "in summary",
    "in conclusion",
    "to summarize",
];

/// Extracts verifiable factual claims from answer text.
pub struct ClaimExtractor {
    client: Option<Arc<dyn LLMClient>>,
    entity: Regex,
    number: Regex,
    date: Regex,
    sentence_end: Regex,
}

impl ClaimExtractor {
    /// Rule-based extractor. No LLM calls.
    pub fn new() -> Self {
        Self {
            client: None,
            entity: Regex::new(r"[A-Z][a-z]+(?:\s+[A-Z][a-z]+)*").unwrap(),
            number: Regex::new(r"\d+").unwrap(),
            date: Regex::new(
                r"\b\d{4}\b|\b(?:January|February|March|April|May|June|July|August|September|October|November|December)\b",
            )
            .unwrap(),
            sentence_end: Regex::new(r"[.!?]+\s+").unwrap(),
        }
    }

    /// Extractor that prefers an LLM prompt, falling back to rules.
    pub fn with_llm(client: Arc<dyn LLMClient>) -> Self {
        let mut extractor = Self::new();
        extractor.client = Some(client);
        extractor
    }

    /// Extract claims. Uses the LLM path when a client is attached; any
    /// failure there degrades silently to the rule-based filter.
    pub async fn extract(&self, answer: &str) -> Vec<String> {
        if let Some(client) = &self.client {
            match self.extract_llm(client.as_ref(), answer).await {
                Ok(claims) => return claims,
                Err(e) => {
                    warn!(error = %e, "LLM claim extraction failed, using rule-based filter");
                }
            }
        }
        self.extract_rule_based(answer)
    }

    /// Split into sentences and keep only those that look like factual
    /// claims.
    pub fn extract_rule_based(&self, answer: &str) -> Vec<String> {
        self.split_sentences(answer)
            .into_iter()
            .filter(|s| self.is_factual_claim(s))
            .collect()
    }

    /// A sentence counts as a factual claim when it is not a question, is
    /// long enough to carry a fact, is not meta framing, and anchors to an
    /// entity, number, or date.
    pub fn is_factual_claim(&self, sentence: &str) -> bool {
        let trimmed = sentence.trim();
        if trimmed.ends_with('?') {
            return false;
        }
        if trimmed.split_whitespace().count() < 4 {
            return false;
        }
        let lower = trimmed.to_lowercase();
        if META_PHRASES.iter().any(|p| lower.contains(p)) {
            return false;
        }
        self.entity.is_match(trimmed)
            || self.number.is_match(trimmed)
            || self.date.is_match(trimmed)
    }

    /// The first few sentences of an answer, unfiltered. These are the
    /// claims worth probing in a self-consistency check.
    pub fn key_claims(&self, answer: &str, limit: usize) -> Vec<String> {
        answer
            .split('.')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .take(limit)
            .map(String::from)
            .collect()
    }

    fn split_sentences(&self, text: &str) -> Vec<String> {
        let mut sentences = Vec::new();
        let mut last = 0;
        for m in self.sentence_end.find_iter(text) {
            let sentence = text[last..m.end()].trim();
            if !sentence.is_empty() {
                sentences.push(sentence.to_string());
            }
            last = m.end();
        }
        let tail = text[last..].trim();
        if !tail.is_empty() {
            sentences.push(tail.to_string());
        }
        sentences
    }

    async fn extract_llm(
        &self,
        client: &dyn LLMClient,
        answer: &str,
    ) -> crate::error::Result<Vec<String>> {
        let prompt = EXTRACTION_PROMPT.replace("{answer}", answer);
        let request = CompletionRequest::new()
            .with_message(ChatMessage::user(prompt))
            .with_temperature(0.0)
            .with_max_tokens(500);
        let response = client.complete(request).await?;
        let content = strip_code_fences(&response.content);
        let claims: Vec<String> = serde_json::from_str(content.trim())?;
        Ok(claims)
    }
}

impl Default for ClaimExtractor {
    fn default() -> Self {
        Self::new()
    }
}

/// Models habitually wrap JSON in markdown fences even when told not to.
pub(crate) fn strip_code_fences(content: &str) -> &str {
    if let Some(rest) = content.split("```json").nth(1) {
        return rest.split("```").next().unwrap_or(rest);
    }
    if let Some(rest) = content.split("```").nth(1) {
        return rest;
    }
    content
}
