//! simsweep CLI: parameter sweeps over an external simulation program.

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "simsweep",
    version,
    about = "Parameter-sweep orchestration: replicate groups, samplings, trials, cached builds"
)]
struct Cli {
    #[command(subcommand)]
    command: simsweep::cli::Commands,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("SIMSWEEP_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = simsweep::cli::dispatch(cli.command) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
