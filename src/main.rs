use anyhow::Result;
use clap::Parser;
use imgpress::cli;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Args::parse();
    if let Err(err) = cli::dispatch(args).await {
        // Logging may not be initialized yet when the manifest or config fails to load.
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
    Ok(())
}
