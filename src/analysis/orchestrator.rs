//! Per-chapter stage orchestration with retries and local degradation.

use std::sync::Arc;

use rand::Rng;
use tracing::{debug, info, instrument, warn};

use crate::chunking::{Chunk, chunk_segment};
use crate::config::{AnalysisConfig, ChunkingConfig, PipelineConfig, RetrievalConfig};
use crate::model::{LanguageModel, ModelError};
use crate::retrieval::{ChapterIndex, EmbeddingProvider};
use crate::splitter::ChapterSegment;

use super::{
    AnalysisResult, ChapterProgress, ChapterState, MustRead, Stage, StageFailure,
    highlights_prompt, must_read_prompt, parse_highlights, parse_must_read, summary_prompt,
};

/// Runs the full stage sequence for single chapters.
///
/// `analyze_chapter` never errors: a stage that exhausts its retries is
/// recorded as a [`StageFailure`] on the result and the remaining stages
/// still run.
pub struct ChapterAnalyzer {
    model: Arc<dyn LanguageModel>,
    embeddings: Arc<dyn EmbeddingProvider>,
    chunking: ChunkingConfig,
    retrieval: RetrievalConfig,
    analysis: AnalysisConfig,
}

impl ChapterAnalyzer {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        embeddings: Arc<dyn EmbeddingProvider>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            model,
            embeddings,
            chunking: config.chunking.clone(),
            retrieval: config.retrieval.clone(),
            analysis: config.analysis.clone(),
        }
    }

    /// Chunks, indexes and analyzes one chapter.
    #[instrument(skip_all, fields(chapter = segment.order, title = %segment.title))]
    pub async fn analyze_chapter(
        &self,
        segment: &ChapterSegment,
        progress: &ChapterProgress,
    ) -> AnalysisResult {
        let mut result = AnalysisResult::empty(segment.order, segment.title.clone());

        let chunks = chunk_segment(segment, &self.chunking);
        if chunks.is_empty() {
            debug!("chapter has no analyzable text");
            progress.set(ChapterState::Done);
            return result;
        }

        progress.set(ChapterState::Retrieving);
        let context_source = self.build_context_source(chunks, &mut result).await;

        progress.set(ChapterState::Summarizing);
        self.run_summary(segment, &context_source, &mut result).await;

        progress.set(ChapterState::ExtractingHighlights);
        self.run_highlights(segment, &context_source, &mut result).await;

        progress.set(ChapterState::ExtractingMustRead);
        self.run_must_read(segment, &context_source, &mut result).await;

        progress.set(ChapterState::Done);
        info!(
            degraded = result.is_degraded(),
            highlights = result.highlights.len(),
            must_read = result.must_read.len(),
            "chapter analysis finished"
        );
        result
    }

    /// Builds the embedding index, or falls back to the chapter's leading
    /// chunks in document order when the provider stays down.
    async fn build_context_source(
        &self,
        chunks: Vec<Chunk>,
        result: &mut AnalysisResult,
    ) -> ContextSource {
        let build = self
            .with_retry(|| ChapterIndex::build(self.embeddings.clone(), chunks.clone()))
            .await;
        match build {
            Ok(index) => ContextSource::Indexed(index),
            Err((attempts, err)) => {
                warn!(attempts, error = %err, "retrieval index unavailable; using leading chunks");
                result.failures.push(StageFailure {
                    stage: Stage::Retrieval,
                    attempts,
                    message: err.to_string(),
                });
                ContextSource::Raw(chunks)
            }
        }
    }

    async fn run_summary(
        &self,
        segment: &ChapterSegment,
        source: &ContextSource,
        result: &mut AnalysisResult,
    ) {
        let query = format!("main ideas and events of the chapter {}", segment.title);
        let batches = self.stage_batches(source, &query).await;
        let prompt = summary_prompt(&segment.title);

        let mut parts = Vec::new();
        for context in &batches {
            match self
                .with_retry(|| self.model.complete(&prompt, context))
                .await
            {
                Ok(text) => parts.push(text.trim().to_string()),
                Err((attempts, err)) => {
                    self.record_failure(result, Stage::Summary, attempts, err);
                    return;
                }
            }
        }
        if !parts.is_empty() {
            result.summary = Some(parts.join("\n\n"));
        }
    }

    async fn run_highlights(
        &self,
        segment: &ChapterSegment,
        source: &ContextSource,
        result: &mut AnalysisResult,
    ) {
        let query = format!("key points and arguments of the chapter {}", segment.title);
        let batches = self.stage_batches(source, &query).await;
        let prompt = highlights_prompt(&segment.title);

        for context in &batches {
            let answer = self
                .with_retry(|| async {
                    let raw = self.model.complete(&prompt, context).await?;
                    parse_highlights(&raw)
                })
                .await;
            match answer {
                Ok(points) => result.highlights.extend(points),
                Err((attempts, err)) => {
                    self.record_failure(result, Stage::Highlights, attempts, err);
                    return;
                }
            }
        }
    }

    async fn run_must_read(
        &self,
        segment: &ChapterSegment,
        source: &ContextSource,
        result: &mut AnalysisResult,
    ) {
        let query = format!(
            "memorable or pivotal passages of the chapter {}",
            segment.title
        );
        let batches = self.stage_batches(source, &query).await;
        let prompt = must_read_prompt(&segment.title);

        for context in &batches {
            let answer: Result<Vec<MustRead>, _> = self
                .with_retry(|| async {
                    let raw = self.model.complete(&prompt, context).await?;
                    parse_must_read(&raw)
                })
                .await;
            match answer {
                Ok(items) => result.must_read.extend(items),
                Err((attempts, err)) => {
                    self.record_failure(result, Stage::MustRead, attempts, err);
                    return;
                }
            }
        }
    }

    /// Context batches for one stage, each at most `context_budget_chars`.
    ///
    /// Indexed chapters retrieve top-k for the stage query and re-sort the
    /// hits by chunk index so batch text reads in document order; a failed
    /// in-flight query degrades to the raw chunks for that stage only.
    async fn stage_batches(&self, source: &ContextSource, query: &str) -> Vec<String> {
        let chunks: Vec<Chunk> = match source {
            ContextSource::Indexed(index) => {
                match index.query(query, self.retrieval.top_k).await {
                    Ok(hits) => {
                        let mut hits: Vec<Chunk> =
                            hits.into_iter().map(|h| h.chunk).collect();
                        hits.sort_by_key(|c| c.index);
                        hits
                    }
                    Err(err) => {
                        warn!(error = %err, "stage query failed; using leading chunks");
                        self.leading_chunks(index.chunks())
                    }
                }
            }
            ContextSource::Raw(chunks) => self.leading_chunks(chunks),
        };
        pack_batches(&chunks, self.analysis.context_budget_chars)
    }

    /// First chunks of the chapter, capped at one context budget.
    fn leading_chunks(&self, all: &[Chunk]) -> Vec<Chunk> {
        let mut taken = Vec::new();
        let mut used = 0;
        for chunk in all {
            if used + chunk.char_count > self.analysis.context_budget_chars && !taken.is_empty() {
                break;
            }
            used += chunk.char_count;
            taken.push(chunk.clone());
        }
        taken
    }

    fn record_failure(
        &self,
        result: &mut AnalysisResult,
        stage: Stage,
        attempts: u32,
        err: ModelError,
    ) {
        warn!(%stage, attempts, error = %err, "stage exhausted retries");
        result.failures.push(StageFailure {
            stage,
            attempts,
            message: err.to_string(),
        });
    }

    /// Retries an operation up to `max_attempts` with doubling, jittered
    /// backoff. Returns the attempt count alongside the final error.
    async fn with_retry<T, E, Fut, F>(&self, mut op: F) -> Result<T, (u32, E)>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let max_attempts = self.analysis.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt >= max_attempts => return Err((attempt, err)),
                Err(err) => {
                    let backoff = self.analysis.base_backoff * 2u32.saturating_pow(attempt - 1);
                    let jitter: f64 = rand::thread_rng().gen_range(0.9..1.1);
                    debug!(attempt, error = %err, "attempt failed; backing off");
                    tokio::time::sleep(backoff.mul_f64(jitter)).await;
                }
            }
        }
    }
}

enum ContextSource {
    Indexed(ChapterIndex),
    Raw(Vec<Chunk>),
}

/// Joins chunks into newline-separated batches, each within `budget`
/// characters. A single oversized chunk still becomes its own batch.
fn pack_batches(chunks: &[Chunk], budget: usize) -> Vec<String> {
    let mut batches = Vec::new();
    let mut current = String::new();
    let mut current_chars = 0;

    for chunk in chunks {
        if current_chars > 0 && current_chars + chunk.char_count > budget {
            batches.push(std::mem::take(&mut current));
            current_chars = 0;
        }
        if current_chars > 0 {
            current.push_str("\n\n");
        }
        current.push_str(&chunk.text);
        current_chars += chunk.char_count;
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::model::MockLanguageModel;
    use crate::retrieval::MockEmbeddingProvider;
    use crate::splitter::SegmentSource;

    fn segment(order: usize, text: &str) -> ChapterSegment {
        ChapterSegment {
            title: format!("Chapter {}", order + 1),
            order,
            text: text.to_string(),
            start_offset: 0,
            end_offset: text.len(),
            source: SegmentSource::TocDerived,
        }
    }

    fn fast_config() -> PipelineConfig {
        PipelineConfig::default().with_analysis(
            AnalysisConfig::default()
                .with_max_attempts(3)
                .with_base_backoff(Duration::from_millis(1)),
        )
    }

    fn analyzer(model: MockLanguageModel, config: &PipelineConfig) -> ChapterAnalyzer {
        ChapterAnalyzer::new(
            Arc::new(model),
            Arc::new(MockEmbeddingProvider::new()),
            config,
        )
    }

    fn json_answer(prompt: &str) -> Result<String, ModelError> {
        if prompt.contains("JSON array of strings") {
            Ok(r#"["point one", "point two"]"#.to_string())
        } else if prompt.contains("worth reading verbatim") {
            Ok(r#"[{"excerpt": "a line", "reason": "it sings"}]"#.to_string())
        } else {
            Ok("A short faithful summary.".to_string())
        }
    }

    #[tokio::test]
    async fn all_stages_succeed() {
        let config = fast_config();
        let analyzer = analyzer(MockLanguageModel::handler(|p, _| json_answer(p)), &config);
        let progress = ChapterProgress::default();
        let result = analyzer
            .analyze_chapter(&segment(0, "Some chapter text worth analyzing."), &progress)
            .await;

        assert_eq!(result.summary.as_deref(), Some("A short faithful summary."));
        assert_eq!(result.highlights, vec!["point one", "point two"]);
        assert_eq!(result.must_read.len(), 1);
        assert!(!result.is_degraded());
        assert_eq!(progress.current(), ChapterState::Done);
    }

    #[tokio::test]
    async fn empty_chapter_skips_all_stages() {
        let config = fast_config();
        let model = MockLanguageModel::fixed("unused");
        let analyzer = analyzer(model, &config);
        let progress = ChapterProgress::default();
        let result = analyzer.analyze_chapter(&segment(2, "   "), &progress).await;

        assert!(result.summary.is_none());
        assert!(result.failures.is_empty());
        assert_eq!(progress.current(), ChapterState::Done);
    }

    #[tokio::test]
    async fn stage_failure_degrades_without_aborting() {
        let config = fast_config();
        // Summary prompts always fail; list stages answer fine.
        let model = MockLanguageModel::handler(|prompt, _| {
            if prompt.contains("summary") {
                Err(ModelError::Unavailable("down".into()))
            } else {
                json_answer(prompt)
            }
        });
        let analyzer = analyzer(model, &config);
        let progress = ChapterProgress::default();
        let result = analyzer
            .analyze_chapter(&segment(1, "Body text for a chapter."), &progress)
            .await;

        assert!(result.summary.is_none());
        assert_eq!(result.highlights.len(), 2);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].stage, Stage::Summary);
        assert_eq!(result.failures[0].attempts, 3);
        assert_eq!(progress.current(), ChapterState::Done);
    }

    #[tokio::test]
    async fn malformed_answer_is_retried_then_recovers() {
        let config = fast_config();
        let model = MockLanguageModel::handler({
            let flip = std::sync::atomic::AtomicBool::new(false);
            move |prompt, _| {
                if prompt.contains("JSON array of strings")
                    && !flip.swap(true, std::sync::atomic::Ordering::SeqCst)
                {
                    Ok("not json at all,".to_string())
                } else {
                    json_answer(prompt)
                }
            }
        });
        let analyzer = analyzer(model, &config);
        let progress = ChapterProgress::default();
        let result = analyzer
            .analyze_chapter(&segment(0, "Chapter body."), &progress)
            .await;

        assert_eq!(result.highlights, vec!["point one", "point two"]);
        assert!(!result.is_degraded());
    }

    #[tokio::test]
    async fn dead_embeddings_fall_back_to_raw_chunks() {
        let config = fast_config();
        let model = MockLanguageModel::handler(|p, _| json_answer(p));
        let analyzer = ChapterAnalyzer::new(
            Arc::new(model),
            Arc::new(MockEmbeddingProvider::failing()),
            &config,
        );
        let progress = ChapterProgress::default();
        let result = analyzer
            .analyze_chapter(&segment(0, "Chapter body still gets analyzed."), &progress)
            .await;

        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].stage, Stage::Retrieval);
        // Model stages still ran over raw chunks.
        assert!(result.summary.is_some());
        assert_eq!(result.highlights.len(), 2);
    }

    #[test]
    fn batches_respect_the_budget() {
        let chunks: Vec<Chunk> = (0..4)
            .map(|i| Chunk {
                chapter_order: 0,
                index: i,
                text: "x".repeat(30),
                char_count: 30,
            })
            .collect();
        let batches = pack_batches(&chunks, 70);
        assert_eq!(batches.len(), 2);
        assert!(batches.iter().all(|b| b.chars().count() <= 70 + 2));
    }

    #[test]
    fn oversized_chunk_gets_its_own_batch() {
        let chunks = vec![Chunk {
            chapter_order: 0,
            index: 0,
            text: "y".repeat(100),
            char_count: 100,
        }];
        assert_eq!(pack_batches(&chunks, 10).len(), 1);
    }
}
