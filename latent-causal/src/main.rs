use anyhow::Result;
use clap::Parser;
use latent_causal::cli::{fit_synthetic, Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::FitSynthetic(args) => {
            if args.verbose {
                std::env::set_var("RUST_LOG", "info");
            }
            env_logger::init();
            fit_synthetic::fit_synthetic(args)?;
        }
    }

    Ok(())
}
