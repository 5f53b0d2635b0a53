//! Negotiator CLI binary

use clap::Parser;
use negotiator::cli::{self, Cli, Commands, NegotiatorApp};
use negotiator::config;
use negotiator::types::ItemId;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    config::load_env();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    cli.settings.validate()?;

    match cli.command {
        Commands::Decide(args) => {
            let report = cli::decide(&args, &cli.settings)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::Simulate(args) => {
            let listing = cli::simulation_listing(&args);
            tracing::info!(
                title = %listing.title,
                price = listing.listing_price,
                buyers = args.buyers,
                immediate = args.immediate,
                "Starting simulation"
            );

            let mut app = NegotiatorApp::new(cli.settings, listing, args.reasoning).await?;
            let report = app.simulate(&args, ItemId(1)).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}
