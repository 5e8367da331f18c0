pub mod allocation;
pub mod cli;
pub mod config;
pub mod cycle;
pub mod delivery;
pub mod engine;
pub mod lattice;
pub mod logging;
pub mod store;
pub mod types;
pub mod valuation;
