use anyhow::Result;
use clap::Parser;
use layersave::cli;
use layersave::Decision;
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: bool) {
    let default = if verbose { "layersave=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    init_tracing(args.verbose);

    match cli::run(args).await? {
        Decision::Proceed => Ok(()),
        // The destructive operation should not go ahead.
        decision => {
            tracing::debug!(?decision, "not proceeding");
            std::process::exit(1);
        }
    }
}
