//! Component 1 – reading the input document.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("no input file given")]
    MissingInput,
    #[error("{} is not a regular file", .0.display())]
    NotAFile(PathBuf),
    #[error("reading {}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl LoaderError {
    /// Usage errors, as opposed to I/O failures on a valid path.
    pub fn is_usage(&self) -> bool {
        matches!(self, LoaderError::MissingInput | LoaderError::NotAFile(_))
    }
}

/// The connector source as read from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDocument {
    pub path: PathBuf,
    pub text: String,
    pub line_count: usize,
}

impl SourceDocument {
    pub fn from_text(path: impl Into<PathBuf>, text: String) -> Self {
        Self {
            path: path.into(),
            line_count: text.lines().count(),
            text,
        }
    }

    /// File name recorded in the IR root.
    pub fn display_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

pub fn load(path: Option<&Path>) -> Result<SourceDocument, LoaderError> {
    let path = path.ok_or(LoaderError::MissingInput)?;
    if !path.is_file() {
        return Err(LoaderError::NotAFile(path.to_path_buf()));
    }
    let text = fs::read_to_string(path).map_err(|source| LoaderError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let document = SourceDocument::from_text(path, text);
    info!(
        path = %document.path.display(),
        bytes = document.text.len(),
        lines = document.line_count,
        "document loaded"
    );
    Ok(document)
}
