use std::process::ExitCode;

use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

use connector_inspect::cli::Cli;
use connector_inspect::loader::LoaderError;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let args = Cli::parse();
    match connector_inspect::run(&args) {
        Ok(_) => {
            println!("Wrote outputs to {}", args.outdir.display());
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("error: {err:#}");
            if err.downcast_ref::<LoaderError>().is_some_and(LoaderError::is_usage) {
                eprintln!("{}", Cli::command().render_usage());
                return ExitCode::from(2);
            }
            ExitCode::FAILURE
        }
    }
}
