//! Concurrent prompt fan-out with bounded parallelism.
//!
//! Sampling k generations, probing claims, and re-asking question variants
//! are all latency-dominated, mutually independent requests. This executor
//! issues them concurrently under a semaphore and joins the results in the
//! original order. A failed or timed-out request never aborts the batch; the
//! caller drops failures from its aggregate.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::warn;

use super::types::{ChatMessage, CompletionRequest};
use super::LLMClient;
use crate::error::Error;

/// Default maximum parallel requests.
pub const DEFAULT_MAX_PARALLEL: usize = 5;

/// Default per-request timeout. Sub-request timeouts apply individually so
/// one stalled probe does not block the whole detection call.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

/// A batch of independent prompts sharing generation parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptBatch {
    /// Prompts to execute.
    pub prompts: Vec<String>,
    /// Model for all prompts (None = client default).
    pub model: Option<String>,
    /// Temperature for all prompts.
    pub temperature: Option<f64>,
    /// Max tokens per completion.
    pub max_tokens: Option<u32>,
}

impl PromptBatch {
    pub fn new(prompts: Vec<String>) -> Self {
        Self {
            prompts,
            model: None,
            temperature: None,
            max_tokens: None,
        }
    }

    /// Repeat one prompt n times (independent sampling of the same question).
    pub fn repeated(prompt: impl Into<String>, n: usize) -> Self {
        let prompt = prompt.into();
        Self::new(vec![prompt; n])
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.prompts.len()
    }
}

/// Outcome of one prompt in a batch, in original order.
#[derive(Debug)]
pub struct BatchItem {
    /// Index in the original batch.
    pub index: usize,
    /// Completion text, or the error that replaced it.
    pub outcome: Result<String, Error>,
}

/// Ordered outcomes of a batch execution.
#[derive(Debug)]
pub struct BatchResults {
    pub items: Vec<BatchItem>,
}

impl BatchResults {
    /// Successful completion texts, in original order, failures dropped.
    pub fn successes(&self) -> Vec<String> {
        self.items
            .iter()
            .filter_map(|item| item.outcome.as_ref().ok().cloned())
            .collect()
    }

    pub fn success_count(&self) -> usize {
        self.items.iter().filter(|i| i.outcome.is_ok()).count()
    }

    pub fn failure_count(&self) -> usize {
        self.items.len() - self.success_count()
    }
}

/// Executor issuing batched prompts with a concurrency cap and per-request
/// timeout.
pub struct BatchExecutor {
    client: Arc<dyn LLMClient>,
    max_parallel: usize,
    request_timeout: Duration,
}

impl BatchExecutor {
    pub fn new(client: Arc<dyn LLMClient>) -> Self {
        Self {
            client,
            max_parallel: DEFAULT_MAX_PARALLEL,
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
        }
    }

    pub fn with_max_parallel(mut self, max: usize) -> Self {
        self.max_parallel = max.max(1);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Execute all prompts concurrently. Results keep the original order;
    /// failed prompts carry their error instead of aborting the batch.
    pub async fn execute(&self, batch: PromptBatch) -> BatchResults {
        if batch.is_empty() {
            return BatchResults { items: Vec::new() };
        }

        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        let timeout = self.request_timeout;

        let tasks: Vec<_> = batch
            .prompts
            .into_iter()
            .enumerate()
            .map(|(index, prompt)| {
                let client = Arc::clone(&self.client);
                let semaphore = Arc::clone(&semaphore);
                let model = batch.model.clone();
                let temperature = batch.temperature;
                let max_tokens = batch.max_tokens;

                async move {
                    let _permit = semaphore
                        .acquire()
                        .await
                        .expect("Semaphore closed unexpectedly");

                    let mut request =
                        CompletionRequest::new().with_message(ChatMessage::user(&prompt));
                    if let Some(ref model) = model {
                        request = request.with_model(model);
                    }
                    if let Some(temp) = temperature {
                        request = request.with_temperature(temp);
                    }
                    if let Some(tokens) = max_tokens {
                        request = request.with_max_tokens(tokens);
                    }

                    let outcome =
                        match tokio::time::timeout(timeout, client.complete(request)).await {
                            Ok(Ok(response)) => Ok(response.content),
                            Ok(Err(e)) => {
                                warn!(index, error = %e, "batch prompt failed");
                                Err(e)
                            }
                            Err(_) => {
                                warn!(index, "batch prompt timed out");
                                Err(Error::timeout(timeout.as_millis() as u64))
                            }
                        };

                    BatchItem { index, outcome }
                }
            })
            .collect();

        let mut items = join_all(tasks).await;
        items.sort_by_key(|item| item.index);

        BatchResults { items }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::llm::types::{
        CompletionResponse, EmbeddingRequest, EmbeddingResponse, Provider, TokenUsage,
    };
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Echoes prompts back, failing every prompt that contains "fail".
    struct EchoClient {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LLMClient for EchoClient {
        async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let prompt = request.messages.last().map(|m| m.content.clone()).unwrap();
            if prompt.contains("fail") {
                return Err(Error::Llm("simulated failure".to_string()));
            }
            Ok(CompletionResponse {
                id: "test".to_string(),
                model: "echo".to_string(),
                content: format!("echo: {}", prompt),
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

    #[tokio::test]
    async fn test_batch_preserves_order_and_drops_failures() {
        let client = Arc::new(EchoClient {
            calls: AtomicUsize::new(0),
        });
        let executor = BatchExecutor::new(client.clone()).with_max_parallel(2);

        let batch = PromptBatch::new(vec![
            "one".to_string(),
            "fail now".to_string(),
            "three".to_string(),
        ]);
        let results = executor.execute(batch).await;

        assert_eq!(results.items.len(), 3);
        assert_eq!(results.success_count(), 2);
        assert_eq!(results.failure_count(), 1);
        assert_eq!(
            results.successes(),
            vec!["echo: one".to_string(), "echo: three".to_string()]
        );
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_failed_item_keeps_its_error_in_place() {
        let client = Arc::new(EchoClient {
            calls: AtomicUsize::new(0),
        });
        let executor = BatchExecutor::new(client);

        let batch = PromptBatch::new(vec!["fine".to_string(), "fail".to_string()]);
        let results = executor.execute(batch).await;

        assert_eq!(results.items[1].index, 1);
        match &results.items[1].outcome {
            Err(Error::Llm(msg)) => assert_eq!(msg, "simulated failure"),
            other => panic!("expected Llm error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let client = Arc::new(EchoClient {
            calls: AtomicUsize::new(0),
        });
        let executor = BatchExecutor::new(client);
        let results = executor.execute(PromptBatch::new(Vec::new())).await;
        assert!(results.items.is_empty());
    }

    #[test]
    fn test_repeated_batch() {
        let batch = PromptBatch::repeated("What is the capital of France?", 5)
            .with_temperature(0.8)
            .with_max_tokens(500);
        assert_eq!(batch.len(), 5);
        assert_eq!(batch.temperature, Some(0.8));
    }
}
