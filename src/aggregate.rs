//! Report assembly from per-chapter analysis results.
//!
//! Aggregation is strict: chapter orders must form exactly `0..n`, so a
//! lost or duplicated chapter is a pipeline bug that fails the run rather
//! than silently producing a report with holes.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::analysis::AnalysisResult;
use crate::config::AnalysisConfig;
use crate::model::LanguageModel;
use crate::types::PipelineError;

/// The final structured report for one book run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    /// Whole-book overview synthesized from the chapter summaries.
    pub overview: String,
    pub chapters: Vec<AnalysisResult>,
}

impl Report {
    /// How many chapters came back with at least one failed stage.
    pub fn degraded_chapters(&self) -> usize {
        self.chapters.iter().filter(|c| c.is_degraded()).count()
    }
}

/// Orders results by chapter and checks completeness.
///
/// Errors are fatal: `MissingChapter` when the orders have a hole,
/// `DuplicateChapter` when two results claim the same order.
#[instrument(skip_all, fields(chapters = results.len()))]
pub fn aggregate(results: Vec<AnalysisResult>) -> Result<Report, PipelineError> {
    let total = results.len();
    let mut results = results;
    results.sort_by_key(|r| r.chapter_order);

    for (position, result) in results.iter().enumerate() {
        if result.chapter_order < position {
            return Err(PipelineError::DuplicateChapter {
                order: result.chapter_order,
            });
        }
        if result.chapter_order > position {
            // `position` is the first order with no result.
            return Err(PipelineError::MissingChapter {
                expected: position,
                found: total,
            });
        }
    }

    Ok(Report {
        run_id: Uuid::new_v4(),
        generated_at: Utc::now(),
        overview: String::new(),
        chapters: results,
    })
}

const OVERVIEW_PLACEHOLDER: &str = "Overview unavailable.";

/// Synthesizes the whole-book overview from the chapter summaries, under
/// the same bounded-backoff retry policy the chapter stages use.
///
/// Best-effort: when the model stays down past its retries the report
/// keeps a placeholder overview instead of failing.
pub async fn synthesize_overview(
    report: &mut Report,
    model: &dyn LanguageModel,
    config: &AnalysisConfig,
) {
    let summaries: Vec<String> = report
        .chapters
        .iter()
        .filter_map(|c| {
            c.summary
                .as_ref()
                .map(|s| format!("{}. {}: {s}", c.chapter_order + 1, c.title))
        })
        .collect();

    if summaries.is_empty() {
        warn!("no chapter summaries available for an overview");
        report.overview = OVERVIEW_PLACEHOLDER.to_string();
        return;
    }

    let prompt = "Below are per-chapter summaries of a book, in order. Write a \
                  single-paragraph overview of the whole book based on them. \
                  Answer with the overview text only.";
    let context = summaries.join("\n\n");
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match model.complete(prompt, &context).await {
            Ok(text) => {
                report.overview = text.trim().to_string();
                return;
            }
            Err(err) if attempt >= max_attempts => {
                warn!(attempts = attempt, error = %err, "overview synthesis exhausted retries; keeping placeholder");
                report.overview = OVERVIEW_PLACEHOLDER.to_string();
                return;
            }
            Err(err) => {
                let backoff = config.base_backoff * 2u32.saturating_pow(attempt - 1);
                let jitter: f64 = rand::thread_rng().gen_range(0.9..1.1);
                debug!(attempt, error = %err, "overview attempt failed; backing off");
                tokio::time::sleep(backoff.mul_f64(jitter)).await;
            }
        }
    }
}
