//! LLM client abstraction shared by all detectors.
//!
//! Provides a unified completion + embedding interface over multiple
//! providers, plus a bounded-concurrency batch executor for the fan-out
//! request patterns the detectors rely on (sampling, probing, re-asking).

mod batch;
mod client;
mod types;

pub use batch::{
    BatchExecutor, BatchItem, BatchResults, PromptBatch, DEFAULT_MAX_PARALLEL,
    DEFAULT_REQUEST_TIMEOUT_MS,
};
pub use client::{AnthropicClient, ClientConfig, LLMClient, OpenAIClient};
pub use types::{
    cosine_similarity, ChatMessage, ChatRole, CompletionRequest, CompletionResponse,
    EmbeddingRequest, EmbeddingResponse, Provider, TokenUsage,
};
