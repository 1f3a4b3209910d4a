//! Component 4 – output writers.
//!
//! Every format renders a finished [`Bundle`] to text; [`emit`] writes the
//! selected formats into the output directory.
pub mod dot;
pub mod json;
pub mod markdown;
pub mod ndjson;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::ValueEnum;
use tracing::info;

use crate::model::Bundle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum Format {
    Json,
    Md,
    Dot,
    Ndjson,
}

impl Format {
    pub const ALL: [Format; 4] = [Format::Json, Format::Md, Format::Dot, Format::Ndjson];

    /// `(stem suffix, extension)` appended to the base name.
    pub fn file_suffix(self) -> (&'static str, &'static str) {
        match self {
            Format::Json => (".ir", ".json"),
            Format::Md => (".summary", ".md"),
            Format::Dot => (".graph", ".dot"),
            Format::Ndjson => (".events", ".ndjson"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmitOptions {
    pub formats: Vec<Format>,
    pub base: String,
    pub pretty: bool,
    pub graph_name: String,
}

impl Default for EmitOptions {
    fn default() -> Self {
        Self {
            formats: Format::ALL.to_vec(),
            base: "connector".to_string(),
            pretty: true,
            graph_name: "Connector".to_string(),
        }
    }
}

/// `base` with every run of characters outside `[A-Za-z0-9_.-]` replaced by
/// one `_`, followed by `ext`.
pub fn safe_filename(base: &str, ext: &str) -> String {
    let mut name = String::with_capacity(base.len() + ext.len());
    let mut in_run = false;
    for c in base.chars() {
        if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
            name.push(c);
            in_run = false;
        } else if !in_run {
            name.push('_');
            in_run = true;
        }
    }
    name.push_str(ext);
    name
}

pub fn render(bundle: &Bundle, format: Format, options: &EmitOptions) -> anyhow::Result<String> {
    Ok(match format {
        Format::Json => json::render(bundle, options.pretty)?,
        Format::Md => markdown::render(bundle)?,
        Format::Dot => dot::render(bundle.graph(), &options.graph_name)?,
        Format::Ndjson => ndjson::render(bundle)?,
    })
}

/// Writes each selected format once, in the order given, and returns the
/// paths written.
pub fn emit(bundle: &Bundle, out_dir: &Path, options: &EmitOptions) -> anyhow::Result<Vec<PathBuf>> {
    fs::create_dir_all(out_dir).with_context(|| format!("Creating {}", out_dir.display()))?;

    let mut written = Vec::new();
    let mut done = Vec::new();
    for &format in &options.formats {
        if done.contains(&format) {
            continue;
        }
        done.push(format);

        let (stem, ext) = format.file_suffix();
        let path = out_dir.join(safe_filename(&format!("{}{stem}", options.base), ext));
        let text = render(bundle, format, options)
            .with_context(|| format!("Rendering {format:?} output"))?;
        fs::write(&path, text).with_context(|| format!("Writing {}", path.display()))?;
        info!(path = %path.display(), "wrote output");
        written.push(path);
    }
    Ok(written)
}
