//! End-to-end pipeline runs against mock model and embedding providers.

use std::sync::Arc;
use std::time::Duration;

use bookwright::artifacts::ArtifactStore;
use bookwright::model::{MockLanguageModel, ModelError};
use bookwright::pipeline::BookPipeline;
use bookwright::retrieval::MockEmbeddingProvider;
use bookwright::{
    AnalysisConfig, ChapterSegment, FormatHint, PipelineConfig, Report, Stage, TocEntry,
};
use tempfile::tempdir;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bookwright=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

const BOOK: &str = "\
A short preface with no heading of its own.

# The Sea

The tide came in before dawn and the harbor woke slowly. Fishermen argued
about the weather while the gulls argued about the fishermen.

# The Mountain

The climb began at the tree line. XYZZY. Every switchback felt steeper than
the last, and the summit never seemed to move closer.

# The Return

Coming home took one afternoon and felt longer than the whole journey out.
";

fn scripted_model() -> MockLanguageModel {
    MockLanguageModel::handler(|prompt, context| {
        if context.contains("XYZZY") {
            return Err(ModelError::RateLimited);
        }
        if prompt.contains("overview of the whole book") {
            Ok("A journey out and back again.".to_string())
        } else if prompt.contains("JSON array of strings") {
            Ok(r#"["a key point", "another key point"]"#.to_string())
        } else if prompt.contains("worth reading verbatim") {
            Ok(r#"[{"excerpt": "The tide came in before dawn", "reason": "sets the tone"}]"#
                .to_string())
        } else {
            Ok("A concise chapter summary.".to_string())
        }
    })
}

fn fast_config() -> PipelineConfig {
    PipelineConfig::default().with_analysis(
        AnalysisConfig::default()
            .with_max_attempts(2)
            .with_base_backoff(Duration::from_millis(1))
            .with_max_concurrent_chapters(1),
    )
}

fn pipeline(store: ArtifactStore, model: MockLanguageModel, config: PipelineConfig) -> BookPipeline {
    BookPipeline::builder()
        .with_model(Arc::new(model))
        .with_embeddings(Arc::new(MockEmbeddingProvider::new()))
        .with_artifacts(store)
        .with_config(config)
        .with_format_hint(FormatHint::Markdown)
        .build()
        .unwrap()
}

#[tokio::test]
async fn full_run_produces_report_and_artifacts() {
    init_tracing();
    let dir = tempdir().unwrap();
    let store = ArtifactStore::new(dir.path());
    let pipeline = pipeline(store, scripted_model(), fast_config());

    let report = pipeline.run(BOOK).await.unwrap();

    // Preface becomes a synthetic front-matter chapter ahead of the three
    // headed ones.
    assert_eq!(report.chapters.len(), 4);
    let orders: Vec<usize> = report.chapters.iter().map(|c| c.chapter_order).collect();
    assert_eq!(orders, vec![0, 1, 2, 3]);
    assert_eq!(report.chapters[0].title, "Front Matter");
    assert_eq!(report.chapters[2].title, "The Mountain");
    assert_eq!(report.overview, "A journey out and back again.");

    let store = ArtifactStore::new(dir.path());
    let toc: Vec<TocEntry> = store.read_json("toc.json").await.unwrap();
    assert_eq!(toc.len(), 3);
    let segments: Vec<ChapterSegment> = store.read_json("chapters.json").await.unwrap();
    assert_eq!(segments.len(), 4);
    assert!(store.exists("chapters/000-front-matter.md").await);
    assert!(store.exists("chapters/002-the-mountain.md").await);

    let persisted: Report = store.read_json("report.json").await.unwrap();
    assert_eq!(persisted, report);
}

#[tokio::test]
async fn rate_limited_chapter_degrades_while_others_complete() {
    init_tracing();
    let dir = tempdir().unwrap();
    let pipeline = pipeline(
        ArtifactStore::new(dir.path()),
        scripted_model(),
        fast_config(),
    );

    let report = pipeline.run(BOOK).await.unwrap();

    let mountain = report
        .chapters
        .iter()
        .find(|c| c.title == "The Mountain")
        .unwrap();
    assert!(mountain.is_degraded());
    assert!(mountain.summary.is_none());
    assert_eq!(mountain.failures.len(), 3);
    for failure in &mountain.failures {
        assert_eq!(failure.attempts, 2);
        assert!(failure.message.contains("rate limited"));
    }
    let failed_stages: Vec<Stage> = mountain.failures.iter().map(|f| f.stage).collect();
    assert_eq!(
        failed_stages,
        vec![Stage::Summary, Stage::Highlights, Stage::MustRead]
    );

    for chapter in report.chapters.iter().filter(|c| c.title != "The Mountain") {
        assert!(!chapter.is_degraded());
        assert_eq!(chapter.summary.as_deref(), Some("A concise chapter summary."));
        assert_eq!(chapter.highlights.len(), 2);
    }
    assert_eq!(report.degraded_chapters(), 1);
}

#[tokio::test]
async fn exhausted_time_budget_yields_placeholder_chapters() {
    init_tracing();
    let dir = tempdir().unwrap();
    let config = fast_config().with_analysis(
        AnalysisConfig::default()
            .with_max_attempts(2)
            .with_base_backoff(Duration::from_millis(50))
            .with_max_concurrent_chapters(1)
            .with_time_budget(Duration::ZERO),
    );
    // A model that keeps failing forces every chapter into retry backoff,
    // where the already-expired budget cuts it off.
    let model = MockLanguageModel::script(vec![Err(ModelError::Unavailable("down".into()))]);
    let pipeline = pipeline(ArtifactStore::new(dir.path()), model, config);

    let report = pipeline.run(BOOK).await.unwrap();

    assert_eq!(report.chapters.len(), 4);
    for chapter in &report.chapters {
        assert!(chapter.is_degraded());
        assert!(chapter.summary.is_none());
        assert!(chapter.failures[0].message.contains("time budget"));
    }
    assert_eq!(report.overview, "Overview unavailable.");
}

#[tokio::test]
async fn unstructured_text_falls_back_to_heuristic_parts() {
    init_tracing();
    let dir = tempdir().unwrap();
    let pipeline = pipeline(
        ArtifactStore::new(dir.path()),
        scripted_model(),
        fast_config(),
    );

    let text = "plain prose with no headings at all.\n\njust paragraphs.\n";
    let report = pipeline.run(text).await.unwrap();

    assert_eq!(report.chapters.len(), 1);
    assert_eq!(report.chapters[0].title, "Part 1");
    assert!(!report.chapters[0].is_degraded());
}

#[tokio::test]
async fn run_from_file_loads_the_book_from_disk() {
    init_tracing();
    let book_dir = tempdir().unwrap();
    let book_path = book_dir.path().join("book.md");
    tokio::fs::write(&book_path, BOOK).await.unwrap();

    let out_dir = tempdir().unwrap();
    let pipeline = pipeline(
        ArtifactStore::new(out_dir.path()),
        scripted_model(),
        fast_config(),
    );

    let report = bookwright::pipeline::run_from_file(&pipeline, &book_path)
        .await
        .unwrap();
    assert_eq!(report.chapters.len(), 4);

    let missing = book_dir.path().join("absent.md");
    assert!(bookwright::pipeline::run_from_file(&pipeline, &missing)
        .await
        .is_err());
}

#[tokio::test]
async fn dead_embeddings_still_produce_a_full_report() {
    init_tracing();
    let dir = tempdir().unwrap();
    let pipeline = BookPipeline::builder()
        .with_model(Arc::new(scripted_model()))
        .with_embeddings(Arc::new(MockEmbeddingProvider::failing()))
        .with_artifacts(ArtifactStore::new(dir.path()))
        .with_config(fast_config())
        .with_format_hint(FormatHint::Markdown)
        .build()
        .unwrap();

    let report = pipeline.run(BOOK).await.unwrap();

    assert_eq!(report.chapters.len(), 4);
    for chapter in &report.chapters {
        assert!(chapter
            .failures
            .iter()
            .any(|f| f.stage == Stage::Retrieval));
    }
    // Model stages still ran over raw chunks for the healthy chapters.
    let sea = report.chapters.iter().find(|c| c.title == "The Sea").unwrap();
    assert!(sea.summary.is_some());
}
