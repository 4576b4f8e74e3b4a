//! Detection profiles and cost envelopes.
//!
//! A profile selects which detectors run and how hard they work. Three named
//! presets trade accuracy against latency and call count; every field can be
//! overridden individually after choosing a preset.

use serde::{Deserialize, Serialize};

/// Named detection mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMode {
    /// Semantic entropy only.
    Fast,
    /// Entropy always, judge and consistency gated on intermediate signals.
    Balanced,
    /// Every detector, unconditionally.
    Thorough,
}

impl std::fmt::Display for DetectionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fast => write!(f, "fast"),
            Self::Balanced => write!(f, "balanced"),
            Self::Thorough => write!(f, "thorough"),
        }
    }
}

impl std::str::FromStr for DetectionMode {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fast" => Ok(Self::Fast),
            "balanced" => Ok(Self::Balanced),
            "thorough" => Ok(Self::Thorough),
            other => Err(crate::error::Error::Config(format!(
                "unknown detection mode: {}",
                other
            ))),
        }
    }
}

/// Configuration for one detection run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionProfile {
    /// Mode this profile was derived from.
    pub mode: DetectionMode,

    /// Run the semantic-entropy detector.
    pub use_uncertainty: bool,
    /// Initial sample count (3-8 is the useful range).
    pub sample_count: u32,
    /// Sampling temperature.
    pub sample_temperature: f64,
    /// Collect more samples when entropy lands near the decision boundary.
    pub adaptive_resampling: bool,
    /// Hard cap on total samples after resampling.
    pub max_samples: u32,

    /// Run the LLM-as-judge factuality scorer.
    pub use_judge: bool,
    /// Model for judging (None = client default).
    pub judge_model: Option<String>,

    /// Run claim-level entailment verification when context is available.
    pub use_evidence_check: bool,
    /// Extract claims via an LLM prompt instead of the rule-based filter.
    pub use_llm_claim_extraction: bool,

    /// Run the self-consistency prober.
    pub use_consistency_check: bool,
    /// Number of rephrased question variants.
    pub consistency_variations: u32,

    /// Path to a trained fusion model (None = heuristic scoring).
    pub fusion_model_path: Option<String>,
}

impl Default for DetectionProfile {
    fn default() -> Self {
        Self::balanced()
    }
}

impl DetectionProfile {
    /// Fast mode: semantic entropy only, no adaptive resampling.
    pub fn fast() -> Self {
        Self {
            mode: DetectionMode::Fast,
            use_uncertainty: true,
            sample_count: 3,
            sample_temperature: 0.8,
            adaptive_resampling: false,
            max_samples: 3,
            use_judge: false,
            judge_model: None,
            use_evidence_check: false,
            use_llm_claim_extraction: false,
            use_consistency_check: false,
            consistency_variations: 0,
            fusion_model_path: None,
        }
    }

    /// Balanced mode: entropy always, expensive checks gated on signals.
    pub fn balanced() -> Self {
        Self {
            mode: DetectionMode::Balanced,
            use_uncertainty: true,
            sample_count: 5,
            sample_temperature: 0.8,
            adaptive_resampling: true,
            max_samples: 8,
            use_judge: true,
            judge_model: None,
            use_evidence_check: true,
            use_llm_claim_extraction: false,
            use_consistency_check: true,
            consistency_variations: 2,
            fusion_model_path: None,
        }
    }

    /// Thorough mode: everything on, maximum sampling.
    pub fn thorough() -> Self {
        Self {
            mode: DetectionMode::Thorough,
            use_uncertainty: true,
            sample_count: 8,
            sample_temperature: 0.8,
            adaptive_resampling: true,
            max_samples: 8,
            use_judge: true,
            judge_model: None,
            use_evidence_check: true,
            use_llm_claim_extraction: true,
            use_consistency_check: true,
            consistency_variations: 3,
            fusion_model_path: None,
        }
    }

    /// Build a preset from a mode name.
    pub fn for_mode(mode: DetectionMode) -> Self {
        match mode {
            DetectionMode::Fast => Self::fast(),
            DetectionMode::Balanced => Self::balanced(),
            DetectionMode::Thorough => Self::thorough(),
        }
    }

    /// Expected latency and call-count envelope for this profile's mode.
    ///
    /// Empirical per-mode estimates; actual numbers vary with adaptive
    /// branching and provider latency.
    pub fn cost_envelope(&self) -> CostEnvelope {
        match self.mode {
            DetectionMode::Fast => CostEnvelope {
                latency_ms: 1_000,
                llm_calls: 3,
            },
            DetectionMode::Balanced => CostEnvelope {
                latency_ms: 2_500,
                llm_calls: 8,
            },
            DetectionMode::Thorough => CostEnvelope {
                latency_ms: 5_000,
                llm_calls: 16,
            },
        }
    }
}

/// Expected resource envelope for a detection mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostEnvelope {
    /// Rough expected wall-clock latency in milliseconds.
    pub latency_ms: u64,
    /// Rough expected number of LLM calls.
    pub llm_calls: u32,
}
