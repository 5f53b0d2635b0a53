//! CLI module for the negotiator

pub mod app;
pub mod commands;

pub use app::{decide, simulation_listing, NegotiatorApp};
pub use commands::{Cli, Commands, DecideArgs, SimulateArgs};
