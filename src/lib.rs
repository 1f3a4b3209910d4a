pub mod cli;
pub mod loader;
pub mod model;
pub mod processor;
pub mod writer;

use std::path::PathBuf;

use anyhow::Context;

pub use model::Bundle;
pub use processor::{Settings, analyze};

/// Loads, analyzes and writes. Returns the paths of the files written.
pub fn run(args: &cli::Cli) -> anyhow::Result<Vec<PathBuf>> {
    // 1. ── Load ───────────────────────────────────────────────────────
    let document = loader::load(args.path.as_deref())?;

    // 2. ── Analyze ────────────────────────────────────────────────────
    let settings = args.settings(document.display_name());
    let bundle = processor::analyze(&document.text, &settings);

    // 3. ── Write outputs ──────────────────────────────────────────────
    writer::emit(&bundle, &args.outdir, &args.emit_options())
        .with_context(|| format!("Writing outputs to {}", args.outdir.display()))
}
