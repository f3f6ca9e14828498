//! # bookwright
//!
//! Structuring and analysis pipeline for book-length documents that have
//! already been converted to Markdown-ish text.
//!
//! ```text
//!   book text ──► toc::extract ──► splitter::split ──► chunking
//!                                                        │
//!                              ┌─────────────────────────┘
//!                              ▼
//!                    retrieval::ChapterIndex ◄── EmbeddingProvider
//!                              │
//!                              ▼
//!                    analysis::ChapterAnalyzer ◄── LanguageModel
//!                       summary / highlights / must-read
//!                              │
//!                              ▼
//!                    aggregate::Report ──► artifacts (report.json)
//! ```
//!
//! The [`pipeline::BookPipeline`] drives the whole flow; each module is
//! also usable on its own. Model failures degrade locally: a chapter keeps
//! whatever stages succeeded and records the rest as failures, and only
//! structural bugs (a lost or duplicated chapter) fail a run.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use bookwright::artifacts::ArtifactStore;
//! use bookwright::model::{OpenAiCompatEmbeddings, OpenAiCompatModel};
//! use bookwright::pipeline::BookPipeline;
//! use bookwright::types::FormatHint;
//!
//! # async fn demo(book_text: &str) -> Result<(), Box<dyn std::error::Error>> {
//! let pipeline = BookPipeline::builder()
//!     .with_model(Arc::new(OpenAiCompatModel::from_env()?))
//!     .with_embeddings(Arc::new(OpenAiCompatEmbeddings::from_env()?))
//!     .with_artifacts(ArtifactStore::new("out/run-1"))
//!     .with_format_hint(FormatHint::Epub)
//!     .build()?;
//! let report = pipeline.run(book_text).await?;
//! println!("{} chapters analyzed", report.chapters.len());
//! # Ok(())
//! # }
//! ```

pub mod aggregate;
pub mod analysis;
pub mod artifacts;
pub mod chunking;
pub mod config;
pub mod model;
pub mod pipeline;
pub mod retrieval;
pub mod splitter;
pub mod toc;
pub mod types;

pub use aggregate::Report;
pub use analysis::{AnalysisResult, ChapterProgress, ChapterState, MustRead, Stage, StageFailure};
pub use chunking::Chunk;
pub use config::{AnalysisConfig, ChunkingConfig, PipelineConfig, RetrievalConfig, SplitConfig};
pub use pipeline::{BookPipeline, BookPipelineBuilder, ContentCleaner, NoopCleaner};
pub use splitter::{ChapterSegment, SegmentSource};
pub use toc::{TocAnchor, TocEntry};
pub use types::{FormatHint, PipelineError};
