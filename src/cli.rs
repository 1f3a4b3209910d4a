use clap::Parser;
use std::path::PathBuf;

use crate::processor::{DEFAULT_MAX_WARNINGS, Settings};
use crate::writer::{EmitOptions, Format};

/// Static analysis of connector source documents.
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Connector source file
    pub path: Option<PathBuf>,
    /// Output directory
    #[arg(long, default_value = "./out")]
    pub outdir: PathBuf,
    /// Base name of the output files
    #[arg(long, default_value = "connector")]
    pub base: String,
    /// Outputs to write, comma separated
    #[arg(long, value_enum, value_delimiter = ',', default_values_t = Format::ALL)]
    pub emit: Vec<Format>,
    /// Pretty-print the JSON bundle (default)
    #[arg(long, overrides_with = "no_pretty")]
    pub pretty: bool,
    /// Write compact JSON
    #[arg(long, overrides_with = "pretty")]
    pub no_pretty: bool,
    /// Name of the DOT graph
    #[arg(long, default_value = "Connector")]
    pub graph_name: String,
    /// Keep at most this many warnings; the rest are only counted
    #[arg(long, default_value_t = DEFAULT_MAX_WARNINGS)]
    pub max_warnings: usize,
}

impl Cli {
    pub fn settings(&self, filename: String) -> Settings {
        Settings {
            filename,
            max_warnings: self.max_warnings,
            ..Settings::default()
        }
    }

    pub fn emit_options(&self) -> EmitOptions {
        EmitOptions {
            formats: self.emit.clone(),
            base: self.base.clone(),
            pretty: !self.no_pretty,
            graph_name: self.graph_name.clone(),
        }
    }
}
