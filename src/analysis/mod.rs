//! Multi-stage chapter analysis.
//!
//! Each chapter runs three model stages (summary, highlights, must-read
//! passages) over retrieved context. Stage failures degrade locally: the
//! chapter keeps whatever stages succeeded and records the rest as
//! [`StageFailure`]s instead of failing the run.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

mod orchestrator;
mod prompts;

pub use orchestrator::ChapterAnalyzer;
pub(crate) use prompts::{highlights_prompt, must_read_prompt, summary_prompt};
pub(crate) use prompts::{parse_highlights, parse_must_read};

/// The model-facing stages of a chapter analysis.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Retrieval,
    Summary,
    Highlights,
    MustRead,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Retrieval => "retrieval",
            Stage::Summary => "summary",
            Stage::Highlights => "highlights",
            Stage::MustRead => "must-read",
        };
        f.write_str(name)
    }
}

/// Observable progress of one chapter's analysis.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChapterState {
    Pending,
    Retrieving,
    Summarizing,
    ExtractingHighlights,
    ExtractingMustRead,
    Done,
    /// Terminal only for time-budget cutoffs; stage failures alone never
    /// put a chapter here.
    Failed(Stage),
}

/// Shared handle onto a chapter's current state.
#[derive(Clone, Default)]
pub struct ChapterProgress(Arc<Mutex<ChapterState>>);

impl ChapterProgress {
    pub fn current(&self) -> ChapterState {
        *self.0.lock()
    }

    pub(crate) fn set(&self, state: ChapterState) {
        *self.0.lock() = state;
    }
}

impl Default for ChapterState {
    fn default() -> Self {
        ChapterState::Pending
    }
}

/// A stage that exhausted its retries.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFailure {
    pub stage: Stage,
    pub attempts: u32,
    pub message: String,
}

/// A passage the model singled out as worth reading verbatim.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MustRead {
    pub excerpt: String,
    pub reason: String,
}

/// Everything analysis produced for one chapter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub chapter_order: usize,
    pub title: String,
    pub summary: Option<String>,
    pub highlights: Vec<String>,
    pub must_read: Vec<MustRead>,
    pub failures: Vec<StageFailure>,
}

impl AnalysisResult {
    pub fn empty(chapter_order: usize, title: impl Into<String>) -> Self {
        Self {
            chapter_order,
            title: title.into(),
            summary: None,
            highlights: Vec::new(),
            must_read: Vec::new(),
            failures: Vec::new(),
        }
    }

    /// True when any stage gave up.
    pub fn is_degraded(&self) -> bool {
        !self.failures.is_empty()
    }
}
