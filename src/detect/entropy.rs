//! Semantic-entropy uncertainty detector.
//!
//! Samples the generation model several times for the same question, embeds
//! the samples, clusters them by meaning, and measures dispersion as Shannon
//! entropy over the cluster-size distribution. A model that keeps changing
//! its answer is uncertain, and uncertainty correlates with hallucination.
//!
//! This is the cheapest detector and runs first, gating the expensive ones.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::llm::{BatchExecutor, EmbeddingRequest, LLMClient, PromptBatch};

/// Reserved cluster label for noise points.
pub const NOISE: i32 = -1;

/// Configuration for the uncertainty detector.
///
/// The suspicion threshold and ambiguous band are empirically chosen decision
/// boundaries; treat them as tunable, not as invariants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntropyConfig {
    /// Initial number of samples to draw.
    pub sample_count: u32,
    /// Sampling temperature (diverse samples separate meanings better).
    pub temperature: f64,
    /// Max tokens per sample.
    pub max_sample_tokens: u32,
    /// Entropy above this flags the answer as suspicious.
    pub suspicion_threshold: f64,
    /// Entropy band within which resampling is requested.
    pub ambiguous_band: (f64, f64),
    /// Hard cap on total samples after adaptive resampling.
    pub max_samples: u32,
    /// Maximum cosine distance between neighbors in one cluster.
    pub cluster_epsilon: f64,
    /// Minimum neighborhood size (including the point itself) for a cluster.
    /// At 1, every sample belongs to some cluster and singletons are allowed;
    /// above 1, isolated samples are labeled noise.
    pub min_cluster_size: usize,
    /// Per-sample request timeout.
    pub request_timeout: Duration,
}

impl Default for EntropyConfig {
    fn default() -> Self {
        Self {
            sample_count: 5,
            temperature: 0.8,
            max_sample_tokens: 500,
            suspicion_threshold: 0.5,
            ambiguous_band: (0.4, 0.6),
            max_samples: 8,
            cluster_epsilon: 0.25,
            min_cluster_size: 1,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Output of one uncertainty check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntropyReport {
    /// Shannon entropy (nats) over the non-noise cluster distribution.
    pub semantic_entropy: f64,
    /// Whether entropy exceeded the suspicion threshold.
    pub suspicious: bool,
    /// Number of non-noise clusters.
    pub num_clusters: u32,
    /// Number of samples that survived generation.
    pub num_samples: u32,
    /// Size of the largest cluster over total samples.
    pub consensus_strength: f64,
    /// The samples themselves, retained for auditability.
    pub samples: Vec<String>,
    /// Cluster label per sample ([`NOISE`] marks unclustered points).
    pub clusters: Vec<i32>,
    /// The threshold the suspicion flag was derived from.
    pub threshold: f64,
    /// Human-readable confidence band. Display only, never control flow.
    pub interpretation: String,
}

impl EntropyReport {
    /// Degenerate result for sample sets too small to cluster.
    fn degenerate(samples: Vec<String>, threshold: f64) -> Self {
        let n = samples.len();
        Self {
            semantic_entropy: 0.0,
            suspicious: false,
            num_clusters: 1,
            num_samples: n as u32,
            consensus_strength: 1.0,
            clusters: vec![0; n],
            samples,
            threshold,
            interpretation: interpret_entropy(0.0),
        }
    }
}

/// Detects uncertainty via semantic clustering of repeated samples.
pub struct EntropyDetector {
    client: Arc<dyn LLMClient>,
    config: EntropyConfig,
}

impl EntropyDetector {
    pub fn new(client: Arc<dyn LLMClient>, config: EntropyConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &EntropyConfig {
        &self.config
    }

    /// Run the uncertainty check.
    ///
    /// Pre-supplied samples skip generation entirely. Otherwise `k` samples
    /// are drawn concurrently; individual failures are dropped. With fewer
    /// than 2 surviving samples the result degenerates to a single cluster
    /// with zero entropy.
    pub async fn detect(
        &self,
        question: &str,
        model: Option<&str>,
        presupplied: &[String],
        k: u32,
    ) -> Result<EntropyReport> {
        let samples = if !presupplied.is_empty() {
            presupplied.to_vec()
        } else {
            if k == 0 {
                return Err(Error::insufficient_input(
                    "sampling requested with neither pre-supplied samples nor a sample budget",
                ));
            }
            self.generate_samples(question, model, k).await
        };

        if samples.len() < 2 {
            warn!(
                surviving = samples.len(),
                "too few samples to cluster, returning degenerate result"
            );
            return Ok(EntropyReport::degenerate(
                samples,
                self.config.suspicion_threshold,
            ));
        }

        let embeddings = self
            .client
            .embed(EmbeddingRequest::new(samples.clone()))
            .await?
            .embeddings;

        if embeddings.len() != samples.len() {
            return Err(Error::Internal(format!(
                "embedding count {} does not match sample count {}",
                embeddings.len(),
                samples.len()
            )));
        }

        let clusters = cluster_embeddings(
            &embeddings,
            self.config.cluster_epsilon,
            self.config.min_cluster_size,
        );
        let entropy = cluster_entropy(&clusters);
        let num_clusters = count_clusters(&clusters);
        let consensus_strength = consensus_strength(&clusters, samples.len());

        debug!(
            entropy,
            num_clusters,
            consensus_strength,
            "semantic entropy computed"
        );

        Ok(EntropyReport {
            semantic_entropy: entropy,
            suspicious: entropy > self.config.suspicion_threshold,
            num_clusters,
            num_samples: samples.len() as u32,
            consensus_strength,
            samples,
            clusters,
            threshold: self.config.suspicion_threshold,
            interpretation: interpret_entropy(entropy),
        })
    }

    /// Run the check with adaptive resampling: when the first estimate lands
    /// in the ambiguous band, draw more samples (up to the cap) and
    /// re-cluster the combined set. Clearly safe or clearly suspicious
    /// estimates return immediately.
    pub async fn detect_adaptive(
        &self,
        question: &str,
        model: Option<&str>,
        presupplied: &[String],
        k: u32,
    ) -> Result<EntropyReport> {
        let report = self.detect(question, model, presupplied, k).await?;

        let extra = self.additional_samples(report.semantic_entropy, report.num_samples);
        if extra == 0 {
            return Ok(report);
        }

        debug!(
            extra,
            entropy = report.semantic_entropy,
            "entropy in ambiguous band, resampling"
        );
        let mut samples = report.samples.clone();
        samples.extend(self.generate_samples(question, model, extra).await);
        if samples.len() <= report.samples.len() {
            return Ok(report);
        }
        self.detect(question, model, &samples, 0).await
    }

    /// How many additional samples to draw after an initial estimate.
    ///
    /// Zero when the estimate is clearly on either side of the boundary;
    /// otherwise enough to reach the configured cap.
    pub fn additional_samples(&self, initial_entropy: f64, initial_k: u32) -> u32 {
        let (low, high) = self.config.ambiguous_band;
        if initial_entropy < low || initial_entropy > high {
            return 0;
        }
        self.config.max_samples.saturating_sub(initial_k).min(5)
    }

    async fn generate_samples(&self, question: &str, model: Option<&str>, k: u32) -> Vec<String> {
        let mut batch = PromptBatch::repeated(question, k as usize)
            .with_temperature(self.config.temperature)
            .with_max_tokens(self.config.max_sample_tokens);
        if let Some(model) = model {
            batch = batch.with_model(model);
        }

        let executor = BatchExecutor::new(Arc::clone(&self.client))
            .with_request_timeout(self.config.request_timeout);
        let results = executor.execute(batch).await;

        if results.failure_count() > 0 {
            warn!(
                failed = results.failure_count(),
                requested = k,
                "dropped failed generation samples"
            );
        }

        results.successes()
    }
}

/// Density-based clustering over embedding vectors (DBSCAN on cosine
/// distance). Unlike a fixed-k method this does not assume the number of
/// distinct meanings in advance, and it tolerates noise points.
///
/// If every point comes out as noise the whole set is treated as one
/// cluster; an all-noise reading would otherwise produce an artificially
/// maximal entropy from no usable signal.
pub fn cluster_embeddings(embeddings: &[Vec<f32>], epsilon: f64, min_points: usize) -> Vec<i32> {
    let n = embeddings.len();
    if n < 2 {
        return vec![0; n];
    }

    // Pairwise cosine distances.
    let mut dist = vec![vec![0.0f64; n]; n];
    for i in 0..n {
        for j in (i + 1)..n {
            let d = 1.0 - crate::llm::cosine_similarity(&embeddings[i], &embeddings[j]);
            dist[i][j] = d;
            dist[j][i] = d;
        }
    }

    let neighbors = |i: usize| -> Vec<usize> {
        (0..n).filter(|&j| dist[i][j] <= epsilon).collect()
    };

    let mut labels = vec![i32::MIN; n]; // unvisited
    let mut next_cluster = 0i32;

    for i in 0..n {
        if labels[i] != i32::MIN {
            continue;
        }
        let seed = neighbors(i);
        if seed.len() < min_points {
            labels[i] = NOISE;
            continue;
        }
        let cluster = next_cluster;
        next_cluster += 1;
        labels[i] = cluster;

        let mut queue: Vec<usize> = seed;
        while let Some(j) = queue.pop() {
            if labels[j] == NOISE {
                labels[j] = cluster; // border point adopted by the cluster
            }
            if labels[j] != i32::MIN {
                continue;
            }
            labels[j] = cluster;
            let reachable = neighbors(j);
            if reachable.len() >= min_points {
                queue.extend(reachable);
            }
        }
    }

    if labels.iter().all(|&l| l == NOISE) {
        return vec![0; n];
    }

    labels
}

/// Shannon entropy (nats) of the cluster-size distribution, noise points
/// excluded from the normalization denominator.
pub fn cluster_entropy(clusters: &[i32]) -> f64 {
    let mut counts = std::collections::HashMap::new();
    for &label in clusters {
        if label != NOISE {
            *counts.entry(label).or_insert(0usize) += 1;
        }
    }
    if counts.is_empty() {
        return 0.0;
    }
    let total: usize = counts.values().sum();
    let mut entropy = 0.0;
    for &count in counts.values() {
        let p = count as f64 / total as f64;
        if p > 0.0 {
            entropy -= p * p.ln();
        }
    }
    entropy
}

/// Count of non-noise clusters.
pub fn count_clusters(clusters: &[i32]) -> u32 {
    let mut labels: Vec<i32> = clusters.iter().copied().filter(|&l| l != NOISE).collect();
    labels.sort_unstable();
    labels.dedup();
    labels.len() as u32
}

/// Largest non-noise cluster size over total samples.
pub fn consensus_strength(clusters: &[i32], total_samples: usize) -> f64 {
    if total_samples == 0 {
        return 0.0;
    }
    let mut counts = std::collections::HashMap::new();
    for &label in clusters {
        if label != NOISE {
            *counts.entry(label).or_insert(0usize) += 1;
        }
    }
    let max = counts.values().copied().max().unwrap_or(0);
    max as f64 / total_samples as f64
}

/// Confidence band for display. Never used for control flow.
fn interpret_entropy(entropy: f64) -> String {
    if entropy < 0.3 {
        "High confidence - model responses are very consistent".to_string()
    } else if entropy < 0.5 {
        "Moderate confidence - some variation in responses".to_string()
    } else if entropy < 0.7 {
        "Low confidence - significant disagreement between responses".to_string()
    } else {
        "Very low confidence - model is highly uncertain".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{
        CompletionRequest, CompletionResponse, EmbeddingResponse, Provider, TokenUsage,
    };
    use async_trait::async_trait;
    use chrono::Utc;

    /// Deterministic fake: completions cycle through canned answers and
    /// embeddings map known texts to fixed vectors.
    struct FakeClient {
        answers: Vec<String>,
        counter: std::sync::atomic::AtomicUsize,
    }

    impl FakeClient {
        fn new(answers: Vec<&str>) -> Self {
            Self {
                answers: answers.into_iter().map(String::from).collect(),
                counter: std::sync::atomic::AtomicUsize::new(0),
            }
        }

        fn vector_for(text: &str) -> Vec<f32> {
            // Texts mentioning Paris share a direction; others get their own.
            if text.contains("Paris") {
                vec![1.0, 0.0, 0.0]
            } else if text.contains("Lyon") {
                vec![0.0, 1.0, 0.0]
            } else {
                vec![0.0, 0.0, 1.0]
            }
        }
    }

    #[async_trait]
    impl crate::llm::LLMClient for FakeClient {
        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> crate::error::Result<CompletionResponse> {
            let i = self
                .counter
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let content = self.answers[i % self.answers.len()].clone();
            Ok(CompletionResponse {
                id: format!("fake-{}", i),
                model: "fake".to_string(),
                content,
                usage: TokenUsage::default(),
                timestamp: Utc::now(),
            })
        }

        async fn embed(
            &self,
            request: EmbeddingRequest,
        ) -> crate::error::Result<EmbeddingResponse> {
            Ok(EmbeddingResponse {
                model: "fake-embed".to_string(),
                embeddings: request.texts.iter().map(|t| Self::vector_for(t)).collect(),
                usage: TokenUsage::default(),
            })
        }

        fn provider(&self) -> Provider {
            Provider::OpenAI
        }
    }

    fn detector(answers: Vec<&str>) -> EntropyDetector {
        EntropyDetector::new(Arc::new(FakeClient::new(answers)), EntropyConfig::default())
    }

    #[tokio::test]
    async fn test_identical_samples_zero_entropy() {
        let d = detector(vec!["Paris is the capital."]);
        let report = d.detect("capital of France?", None, &[], 5).await.unwrap();

        assert!(report.semantic_entropy.abs() < 1e-9);
        assert_eq!(report.num_clusters, 1);
        assert!((report.consensus_strength - 1.0).abs() < 1e-9);
        assert!(!report.suspicious);
        assert_eq!(report.num_samples, 5);
    }

    #[tokio::test]
    async fn test_dissimilar_samples_maximal_entropy() {
        // Three mutually orthogonal meanings -> three singleton clusters.
        let d = detector(vec!["Paris", "Lyon", "Marseille"]);
        let report = d.detect("capital of France?", None, &[], 3).await.unwrap();

        assert_eq!(report.num_clusters, 3);
        let max_entropy = (3.0f64).ln();
        assert!((report.semantic_entropy - max_entropy).abs() < 1e-6);
        assert!(report.suspicious);
    }

    #[tokio::test]
    async fn test_presupplied_samples_skip_generation() {
        let d = detector(vec!["should never be generated"]);
        let samples = vec![
            "Paris is the capital.".to_string(),
            "The capital is Paris.".to_string(),
        ];
        let report = d.detect("q", None, &samples, 5).await.unwrap();
        assert_eq!(report.num_samples, 2);
        assert_eq!(report.samples, samples);
    }

    #[tokio::test]
    async fn test_zero_budget_without_samples_is_contract_violation() {
        let d = detector(vec!["x"]);
        let err = d.detect("q", None, &[], 0).await.unwrap_err();
        assert!(matches!(err, Error::InsufficientInput(_)));
    }

    #[tokio::test]
    async fn test_single_sample_degenerates() {
        let d = detector(vec!["only answer"]);
        let report = d
            .detect("q", None, &["one".to_string()], 5)
            .await
            .unwrap();
        assert_eq!(report.semantic_entropy, 0.0);
        assert_eq!(report.num_clusters, 1);
        assert_eq!(report.consensus_strength, 1.0);
    }

    #[test]
    fn test_all_noise_remapped_to_single_cluster() {
        // min_points = 2 makes mutually distant points all noise.
        let embeddings = vec![
            vec![1.0, 0.0, 0.0],
            vec![0.0, 1.0, 0.0],
            vec![0.0, 0.0, 1.0],
        ];
        let labels = cluster_embeddings(&embeddings, 0.25, 2);
        assert_eq!(labels, vec![0, 0, 0]);
        assert_eq!(cluster_entropy(&labels), 0.0);
    }

    #[test]
    fn test_partial_noise_excluded_from_entropy() {
        // Two tight pairs plus one isolated noise point.
        let labels = vec![0, 0, 1, 1, NOISE];
        let entropy = cluster_entropy(&labels);
        assert!((entropy - (2.0f64).ln()).abs() < 1e-9);
        assert_eq!(count_clusters(&labels), 2);
        // Noise still counts in the consensus denominator.
        assert!((consensus_strength(&labels, 5) - 0.4).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_adaptive_detection_resamples_ambiguous_estimates() {
        // 4-of-5 agreement lands at ~0.50 entropy, inside the ambiguous
        // band, so the detector tops up to the cap of 8 samples.
        let d = detector(vec!["Paris", "Paris", "Paris", "Paris", "Lyon"]);
        let report = d
            .detect_adaptive("capital of France?", None, &[], 5)
            .await
            .unwrap();
        assert_eq!(report.num_samples, 8);
    }

    #[tokio::test]
    async fn test_adaptive_detection_skips_clear_estimates() {
        let d = detector(vec!["Paris is the capital."]);
        let report = d
            .detect_adaptive("capital of France?", None, &[], 5)
            .await
            .unwrap();
        assert_eq!(report.num_samples, 5);
    }

    #[test]
    fn test_adaptive_resampling_band() {
        let d = detector(vec!["x"]);
        // Clearly safe and clearly suspicious: no extra samples.
        assert_eq!(d.additional_samples(0.1, 5), 0);
        assert_eq!(d.additional_samples(0.9, 5), 0);
        // Ambiguous band: top up toward the cap.
        assert_eq!(d.additional_samples(0.5, 5), 3);
        assert_eq!(d.additional_samples(0.5, 3), 5);
        // Already at the cap.
        assert_eq!(d.additional_samples(0.5, 8), 0);
    }
}
