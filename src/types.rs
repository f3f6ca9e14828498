//! Shared types and the crate-wide error taxonomy.
//!
//! Collaborator failures (model, embeddings, cleaner) live next to their
//! traits; this module holds only what crosses stage boundaries: the format
//! hint carried from conversion, and the fatal invariant violations that
//! abort a run instead of degrading it.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::artifacts::ArtifactError;

/// Hint about the upstream format the document text was converted from.
///
/// The converter is an external collaborator; the hint only steers which
/// structural TOC extraction is attempted first. Unknown or absent hints
/// behave like [`FormatHint::Markdown`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatHint {
    Pdf,
    Epub,
    #[default]
    Markdown,
}

/// Fatal pipeline failures.
///
/// Stage-local problems (unlocatable TOC entries, unavailable providers,
/// exhausted retries) degrade in place and are recorded on the chapter
/// result. `PipelineError` is reserved for invariant violations that
/// indicate a programming error upstream, plus artifact I/O the run cannot
/// proceed without.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A chapter order value was skipped; aggregation refuses to paper over
    /// the gap because every segment must yield exactly one result.
    #[error("chapter order {expected} missing from analysis results ({found} results present)")]
    MissingChapter { expected: usize, found: usize },

    /// Two analysis results claim the same chapter order.
    #[error("duplicate analysis result for chapter order {order}")]
    DuplicateChapter { order: usize },

    /// Persisting or reloading a stage artifact failed.
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}
