//! End-to-end pipeline: structure a book, analyze it, write the report.
//!
//! A [`BookPipeline`] owns the model and embedding providers, an optional
//! content cleaner, the artifact store and the configuration. One call to
//! [`BookPipeline::run`] takes the converted Markdown text of a book and
//! leaves `toc.json`, `chapters.json`, per-chapter Markdown files and the
//! final `report.json` under the artifact root.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::aggregate::{Report, aggregate, synthesize_overview};
use crate::analysis::{
    AnalysisResult, ChapterAnalyzer, ChapterProgress, ChapterState, Stage, StageFailure,
};
use crate::artifacts::{ArtifactStore, slug};
use crate::model::LanguageModel;
use crate::retrieval::EmbeddingProvider;
use crate::splitter::{ChapterSegment, split};
use crate::toc;
use crate::types::{FormatHint, PipelineError};

#[derive(Debug, Error)]
pub enum CleanError {
    #[error("content cleaning failed: {0}")]
    Failed(String),
}

/// Optional per-chapter text cleanup between splitting and analysis.
///
/// Cleaning is best-effort: a failing cleaner is logged and the original
/// text is analyzed instead.
#[async_trait]
pub trait ContentCleaner: Send + Sync {
    async fn clean(&self, chapter_title: &str, text: &str) -> Result<String, CleanError>;
}

/// Cleaner that hands the text back untouched.
pub struct NoopCleaner;

#[async_trait]
impl ContentCleaner for NoopCleaner {
    async fn clean(&self, _chapter_title: &str, text: &str) -> Result<String, CleanError> {
        Ok(text.to_string())
    }
}

#[derive(Debug, Error)]
pub enum PipelineBuildError {
    #[error("pipeline is missing its {0}")]
    MissingComponent(&'static str),
}

/// Builder for [`BookPipeline`]. Model, embeddings and artifact store are
/// required; everything else has defaults.
#[derive(Default)]
pub struct BookPipelineBuilder {
    model: Option<Arc<dyn LanguageModel>>,
    embeddings: Option<Arc<dyn EmbeddingProvider>>,
    cleaner: Option<Arc<dyn ContentCleaner>>,
    artifacts: Option<ArtifactStore>,
    config: crate::config::PipelineConfig,
    format_hint: FormatHint,
}

impl BookPipelineBuilder {
    #[must_use]
    pub fn with_model(mut self, model: Arc<dyn LanguageModel>) -> Self {
        self.model = Some(model);
        self
    }

    #[must_use]
    pub fn with_embeddings(mut self, embeddings: Arc<dyn EmbeddingProvider>) -> Self {
        self.embeddings = Some(embeddings);
        self
    }

    #[must_use]
    pub fn with_cleaner(mut self, cleaner: Arc<dyn ContentCleaner>) -> Self {
        self.cleaner = Some(cleaner);
        self
    }

    #[must_use]
    pub fn with_artifacts(mut self, artifacts: ArtifactStore) -> Self {
        self.artifacts = Some(artifacts);
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: crate::config::PipelineConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_format_hint(mut self, hint: FormatHint) -> Self {
        self.format_hint = hint;
        self
    }

    pub fn build(self) -> Result<BookPipeline, PipelineBuildError> {
        Ok(BookPipeline {
            model: self
                .model
                .ok_or(PipelineBuildError::MissingComponent("language model"))?,
            embeddings: self
                .embeddings
                .ok_or(PipelineBuildError::MissingComponent("embedding provider"))?,
            cleaner: self.cleaner,
            artifacts: self
                .artifacts
                .ok_or(PipelineBuildError::MissingComponent("artifact store"))?,
            config: self.config,
            format_hint: self.format_hint,
        })
    }
}

pub struct BookPipeline {
    model: Arc<dyn LanguageModel>,
    embeddings: Arc<dyn EmbeddingProvider>,
    cleaner: Option<Arc<dyn ContentCleaner>>,
    artifacts: ArtifactStore,
    config: crate::config::PipelineConfig,
    format_hint: FormatHint,
}

impl BookPipeline {
    pub fn builder() -> BookPipelineBuilder {
        BookPipelineBuilder::default()
    }

    /// Runs the whole pipeline over one book's converted Markdown text.
    #[instrument(skip_all, fields(chars = document_text.len(), hint = ?self.format_hint))]
    pub async fn run(&self, document_text: &str) -> Result<Report, PipelineError> {
        let toc = toc::extract(document_text, self.format_hint);
        info!(entries = toc.len(), "toc extracted");
        self.artifacts.write_json("toc.json", &toc).await?;

        let segments = split(document_text, &toc, &self.config.split);
        info!(chapters = segments.len(), "document split");
        self.artifacts.write_json("chapters.json", &segments).await?;
        for segment in &segments {
            let name = format!("chapters/{:03}-{}.md", segment.order, slug(&segment.title));
            self.artifacts.write_text(&name, &segment.text).await?;
        }

        let segments = self.clean_segments(segments).await;
        let results = self.analyze_segments(&segments).await;

        let mut report = aggregate(results)?;
        synthesize_overview(&mut report, self.model.as_ref(), &self.config.analysis).await;
        self.artifacts.write_json("report.json", &report).await?;
        info!(
            run_id = %report.run_id,
            degraded = report.degraded_chapters(),
            "report written"
        );
        Ok(report)
    }

    /// Applies the cleaner chapter by chapter; a failing cleaner keeps the
    /// original text.
    async fn clean_segments(&self, segments: Vec<ChapterSegment>) -> Vec<ChapterSegment> {
        let Some(cleaner) = &self.cleaner else {
            return segments;
        };
        let mut cleaned = Vec::with_capacity(segments.len());
        for mut segment in segments {
            match cleaner.clean(&segment.title, &segment.text).await {
                Ok(text) => segment.text = text,
                Err(err) => {
                    warn!(chapter = segment.order, error = %err, "cleaner failed; keeping original text");
                }
            }
            cleaned.push(segment);
        }
        cleaned
    }

    /// Analyzes chapters concurrently, bounded by
    /// `max_concurrent_chapters` and the optional run time budget.
    async fn analyze_segments(&self, segments: &[ChapterSegment]) -> Vec<AnalysisResult> {
        let analyzer = ChapterAnalyzer::new(self.model.clone(), self.embeddings.clone(), &self.config);
        let deadline = self
            .config
            .analysis
            .time_budget
            .map(|budget| tokio::time::Instant::now() + budget);

        let mut results: Vec<AnalysisResult> = futures_util::stream::iter(segments)
            .map(|segment| {
                let analyzer = &analyzer;
                async move {
                    let progress = ChapterProgress::default();
                    let work = analyzer.analyze_chapter(segment, &progress);
                    match deadline {
                        None => work.await,
                        Some(deadline) => match tokio::time::timeout_at(deadline, work).await {
                            Ok(result) => result,
                            Err(_) => timed_out_result(segment, &progress),
                        },
                    }
                }
            })
            .buffer_unordered(self.config.analysis.max_concurrent_chapters.max(1))
            .collect()
            .await;

        results.sort_by_key(|r| r.chapter_order);
        results
    }
}

/// Placeholder result for a chapter cut off by the run time budget. The
/// stage it was in when the budget ran out is recorded as the failure.
fn timed_out_result(segment: &ChapterSegment, progress: &ChapterProgress) -> AnalysisResult {
    let stage = match progress.current() {
        ChapterState::Pending | ChapterState::Retrieving => Stage::Retrieval,
        ChapterState::Summarizing => Stage::Summary,
        ChapterState::ExtractingHighlights => Stage::Highlights,
        ChapterState::ExtractingMustRead | ChapterState::Done => Stage::MustRead,
        ChapterState::Failed(stage) => stage,
    };
    progress.set(ChapterState::Failed(stage));
    warn!(chapter = segment.order, %stage, "chapter timed out");

    let mut result = AnalysisResult::empty(segment.order, segment.title.clone());
    result.failures.push(StageFailure {
        stage,
        attempts: 0,
        message: format!("run time budget exhausted during {stage}"),
    });
    result
}

/// Convenience wrapper over `run` that also loads the book text from a
/// file.
pub async fn run_from_file(
    pipeline: &BookPipeline,
    path: &std::path::Path,
) -> Result<Report, PipelineError> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| crate::artifacts::ArtifactError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    pipeline.run(&text).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MockLanguageModel;
    use crate::retrieval::MockEmbeddingProvider;
    use tempfile::tempdir;

    #[test]
    fn builder_requires_model() {
        let err = BookPipeline::builder()
            .with_embeddings(Arc::new(MockEmbeddingProvider::new()))
            .with_artifacts(ArtifactStore::new("/tmp/unused"))
            .build()
            .err()
            .expect("build should fail without a model");
        assert!(matches!(err, PipelineBuildError::MissingComponent("language model")));
    }

    #[tokio::test]
    async fn noop_cleaner_passes_text_through() {
        let out = NoopCleaner.clean("Title", "body text").await.unwrap();
        assert_eq!(out, "body text");
    }

    #[tokio::test]
    async fn failing_cleaner_keeps_original_text() {
        struct BadCleaner;

        #[async_trait]
        impl ContentCleaner for BadCleaner {
            async fn clean(&self, _t: &str, _x: &str) -> Result<String, CleanError> {
                Err(CleanError::Failed("nope".into()))
            }
        }

        let dir = tempdir().unwrap();
        let pipeline = BookPipeline::builder()
            .with_model(Arc::new(MockLanguageModel::fixed("fine")))
            .with_embeddings(Arc::new(MockEmbeddingProvider::new()))
            .with_cleaner(Arc::new(BadCleaner))
            .with_artifacts(ArtifactStore::new(dir.path()))
            .build()
            .unwrap();

        let segments = vec![ChapterSegment {
            title: "One".into(),
            order: 0,
            text: "original".into(),
            start_offset: 0,
            end_offset: 8,
            source: crate::splitter::SegmentSource::TocDerived,
        }];
        let cleaned = pipeline.clean_segments(segments).await;
        assert_eq!(cleaned[0].text, "original");
    }
}
