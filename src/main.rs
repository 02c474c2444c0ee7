use clap::Parser;
use herald::cli::Cli;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    herald::cli::run(cli).await
}

/// File log at $HERALD_LOG if set, stderr with RUST_LOG or `--verbose`.
fn init_logging(verbose: bool) {
    if let Ok(path) = std::env::var("HERALD_LOG") {
        use std::fs::File;
        use tracing_subscriber::prelude::*;
        match File::create(&path) {
            Ok(file) => {
                let file_layer = tracing_subscriber::fmt::layer()
                    .with_writer(file)
                    .with_ansi(false);
                let filter = tracing_subscriber::EnvFilter::new("herald=debug");
                let _ = tracing_subscriber::registry()
                    .with(file_layer.with_filter(filter))
                    .try_init();
            }
            Err(err) => {
                eprintln!("Failed to create log file: {err}");
            }
        }
    } else if std::env::var("RUST_LOG").is_ok() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_writer(std::io::stderr)
            .try_init();
    } else if verbose {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::new("herald=debug"))
            .with_writer(std::io::stderr)
            .try_init();
    }
}
