//! CLI command definitions

use clap::{Args, Parser, Subcommand};

use crate::config::{AgentSettings, Aggressiveness};

#[derive(Parser, Debug)]
#[command(name = "negotiator")]
#[command(about = "Autonomous seller-side negotiation agent", long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub settings: AgentSettings,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Evaluate one offer offline and print the decision as JSON
    Decide(DecideArgs),

    /// Run buyers against a listing through the queue workers or the immediate path
    Simulate(SimulateArgs),
}

#[derive(Args, Debug, Clone)]
pub struct DecideArgs {
    /// Listing price
    #[arg(short, long)]
    pub listing_price: f64,

    /// Buyer's current offer
    #[arg(short, long)]
    pub offer: f64,

    /// Earlier buyer offers, oldest first
    #[arg(long, value_delimiter = ',')]
    pub history: Vec<f64>,

    /// Seller's target price (defaults to the listing price)
    #[arg(short, long)]
    pub target: Option<f64>,

    /// Seller urgency in [0, 1] (defaults to 0.5)
    #[arg(short, long)]
    pub urgency: Option<f64>,

    /// Current offers from other buyers on the same item
    #[arg(long, value_delimiter = ',')]
    pub competing: Vec<f64>,

    #[arg(long, default_value = "furniture")]
    pub category: String,

    #[arg(long, default_value = "good")]
    pub condition: String,

    #[arg(long, default_value_t = 0)]
    pub days_on_market: i64,

    /// Negotiation round of the offer
    #[arg(long, default_value_t = 1)]
    pub round: u32,

    #[arg(long, value_enum, default_value_t = Aggressiveness::Moderate)]
    pub aggressiveness: Aggressiveness,

    #[arg(long, default_value_t = 0.95)]
    pub auto_accept_threshold: f64,

    #[arg(long, default_value_t = 0.70)]
    pub min_acceptable_ratio: f64,
}

#[derive(Args, Debug, Clone)]
pub struct SimulateArgs {
    /// Listing price
    #[arg(short, long, default_value_t = 1000.0)]
    pub listing_price: f64,

    /// Number of competing buyers
    #[arg(short, long, default_value_t = 4)]
    pub buyers: u32,

    #[arg(long, default_value = "couch")]
    pub category: String,

    #[arg(long, default_value = "good")]
    pub condition: String,

    #[arg(short, long)]
    pub target: Option<f64>,

    #[arg(short, long)]
    pub urgency: Option<f64>,

    /// Buyer rounds before the simulation stops
    #[arg(long, default_value_t = 6)]
    pub rounds: u32,

    /// Seed for buyer budgets and opening offers
    #[arg(long)]
    pub seed: Option<u64>,

    /// Answer offers synchronously instead of through the queue workers
    #[arg(long)]
    pub immediate: bool,

    /// Run decisions through the deterministic reasoning step
    #[arg(long)]
    pub reasoning: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_decide() {
        let cli = Cli::try_parse_from([
            "negotiator",
            "decide",
            "--listing-price",
            "1000",
            "--offer",
            "700",
            "--history",
            "600,650",
            "--competing",
            "680",
        ])
        .unwrap();

        let Commands::Decide(args) = cli.command else {
            panic!("expected decide");
        };
        assert_eq!(args.history, vec![600.0, 650.0]);
        assert_eq!(args.competing, vec![680.0]);
        assert_eq!(args.aggressiveness, Aggressiveness::Moderate);
        assert!(args.target.is_none());
    }

    #[test]
    fn test_parse_simulate_with_settings() {
        let cli = Cli::try_parse_from([
            "negotiator",
            "--workers",
            "3",
            "simulate",
            "--buyers",
            "2",
            "--immediate",
        ])
        .unwrap();

        assert_eq!(cli.settings.workers, 3);
        let Commands::Simulate(args) = cli.command else {
            panic!("expected simulate");
        };
        assert_eq!(args.buyers, 2);
        assert!(args.immediate);
        assert!(!args.reasoning);
    }
}
