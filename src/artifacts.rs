//! Filesystem persistence for intermediate and final pipeline artifacts.
//!
//! Every run writes its artifacts under one root directory: the extracted
//! TOC, the chapter segments, one Markdown file per chapter, and the final
//! report. Names are fixed by the pipeline so a rerun overwrites in place.

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::fs;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact io for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("encoding artifact {name}: {source}")]
    Encode {
        name: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("decoding artifact {name}: {source}")]
    Decode {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Named-blob store rooted at one directory.
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_of(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub async fn write_text(&self, name: &str, text: &str) -> Result<(), ArtifactError> {
        let path = self.path_of(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| ArtifactError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        fs::write(&path, text)
            .await
            .map_err(|source| ArtifactError::Io {
                path: path.clone(),
                source,
            })?;
        debug!(path = %path.display(), bytes = text.len(), "artifact written");
        Ok(())
    }

    pub async fn read_text(&self, name: &str) -> Result<String, ArtifactError> {
        let path = self.path_of(name);
        fs::read_to_string(&path)
            .await
            .map_err(|source| ArtifactError::Io { path, source })
    }

    pub async fn write_json<T: Serialize>(
        &self,
        name: &str,
        value: &T,
    ) -> Result<(), ArtifactError> {
        let text =
            serde_json::to_string_pretty(value).map_err(|source| ArtifactError::Encode {
                name: name.to_string(),
                source,
            })?;
        self.write_text(name, &text).await
    }

    pub async fn read_json<T: DeserializeOwned>(&self, name: &str) -> Result<T, ArtifactError> {
        let text = self.read_text(name).await?;
        serde_json::from_str(&text).map_err(|source| ArtifactError::Decode {
            name: name.to_string(),
            source,
        })
    }

    pub async fn exists(&self, name: &str) -> bool {
        fs::try_exists(self.path_of(name)).await.unwrap_or(false)
    }
}

/// Filesystem-safe slug from a chapter title, capped at 50 characters.
pub fn slug(title: &str) -> String {
    let mut out = String::new();
    for ch in title.chars() {
        if ch.is_alphanumeric() {
            out.extend(ch.to_lowercase());
        } else if !out.ends_with('-') && !out.is_empty() {
            out.push('-');
        }
        if out.chars().count() >= 50 {
            break;
        }
    }
    let out: String = out.chars().take(50).collect();
    let trimmed = out.trim_matches('-');
    if trimmed.is_empty() {
        "untitled".to_string()
    } else {
        trimmed.to_string()
    }
}
