//! Tunable configuration for every pipeline stage.
//!
//! Each stage gets its own struct with sensible defaults and `with_*`
//! setters, so tests can tighten a single knob without spelling out the
//! rest. [`PipelineConfig`] bundles them for the end-to-end driver.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Controls TOC-anchored chapter splitting and its heuristic fallback.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SplitConfig {
    /// Minimum fraction of TOC entries that must be located in the text
    /// before the TOC is trusted for splitting. Below this the splitter
    /// falls back to content-heuristic windows.
    pub min_located_fraction: f64,
    /// Target window size, in characters, for fallback splitting.
    pub fallback_window_chars: usize,
    /// How far past the window target the fallback may drift to end a
    /// segment on a paragraph boundary.
    pub fallback_max_drift: usize,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            min_located_fraction: 0.5,
            fallback_window_chars: 50_000,
            fallback_max_drift: 1_000,
        }
    }
}

impl SplitConfig {
    #[must_use]
    pub fn with_min_located_fraction(mut self, fraction: f64) -> Self {
        self.min_located_fraction = fraction;
        self
    }

    #[must_use]
    pub fn with_fallback_window_chars(mut self, chars: usize) -> Self {
        self.fallback_window_chars = chars;
        self
    }

    #[must_use]
    pub fn with_fallback_max_drift(mut self, chars: usize) -> Self {
        self.fallback_max_drift = chars;
        self
    }
}

/// Controls how chapter segments are cut into retrieval-sized chunks.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Hard upper bound on chunk size, in characters.
    pub max_chars: usize,
    /// Characters of trailing context repeated at the start of the next
    /// chunk. Must be smaller than `max_chars`.
    pub overlap_chars: usize,
    /// How far below `max_chars` a paragraph or sentence boundary may sit
    /// and still be preferred over a hard cut.
    pub boundary_tolerance: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: 1_000,
            overlap_chars: 200,
            boundary_tolerance: 200,
        }
    }
}

impl ChunkingConfig {
    #[must_use]
    pub fn with_max_chars(mut self, chars: usize) -> Self {
        self.max_chars = chars;
        self
    }

    #[must_use]
    pub fn with_overlap_chars(mut self, chars: usize) -> Self {
        self.overlap_chars = chars;
        self
    }

    #[must_use]
    pub fn with_boundary_tolerance(mut self, chars: usize) -> Self {
        self.boundary_tolerance = chars;
        self
    }
}

/// Controls per-chapter retrieval.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Number of chunks returned per query.
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { top_k: 5 }
    }
}

impl RetrievalConfig {
    #[must_use]
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }
}

/// Controls the per-chapter analysis orchestrator and the worker pool.
#[derive(Clone, Debug)]
pub struct AnalysisConfig {
    /// Maximum attempts per stage before the stage degrades to a
    /// placeholder.
    pub max_attempts: u32,
    /// First backoff delay; doubles on each subsequent attempt.
    pub base_backoff: Duration,
    /// Upper bound on chapters analyzed concurrently. Also caps concurrent
    /// external API calls.
    pub max_concurrent_chapters: usize,
    /// Optional wall-clock budget for the whole analysis phase. Chapters
    /// still in flight at the deadline are recorded as failed at their
    /// current stage and placeholdered.
    pub time_budget: Option<Duration>,
    /// Maximum characters of chunk text assembled into one model call.
    pub context_budget_chars: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(250),
            max_concurrent_chapters: 4,
            time_budget: None,
            context_budget_chars: 6_000,
        }
    }
}

impl AnalysisConfig {
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    #[must_use]
    pub fn with_base_backoff(mut self, delay: Duration) -> Self {
        self.base_backoff = delay;
        self
    }

    #[must_use]
    pub fn with_max_concurrent_chapters(mut self, workers: usize) -> Self {
        self.max_concurrent_chapters = workers;
        self
    }

    #[must_use]
    pub fn with_time_budget(mut self, budget: Duration) -> Self {
        self.time_budget = Some(budget);
        self
    }

    #[must_use]
    pub fn with_context_budget_chars(mut self, chars: usize) -> Self {
        self.context_budget_chars = chars;
        self
    }
}

/// Bundled configuration for [`crate::pipeline::BookPipeline`].
#[derive(Clone, Debug, Default)]
pub struct PipelineConfig {
    pub split: SplitConfig,
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    pub analysis: AnalysisConfig,
}

impl PipelineConfig {
    #[must_use]
    pub fn with_split(mut self, split: SplitConfig) -> Self {
        self.split = split;
        self
    }

    #[must_use]
    pub fn with_chunking(mut self, chunking: ChunkingConfig) -> Self {
        self.chunking = chunking;
        self
    }

    #[must_use]
    pub fn with_retrieval(mut self, retrieval: RetrievalConfig) -> Self {
        self.retrieval = retrieval;
        self
    }

    #[must_use]
    pub fn with_analysis(mut self, analysis: AnalysisConfig) -> Self {
        self.analysis = analysis;
        self
    }
}
