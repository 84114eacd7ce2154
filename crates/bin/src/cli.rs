//! CLI argument definitions for the Arbor binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Arbor replicated file tree
#[derive(Parser, Debug)]
#[command(name = "arbor")]
#[command(about = "Arbor: a replicated file tree that converges without coordination")]
#[command(version)]
pub struct Cli {
    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run replicas in-process with random edits and partitions, then check convergence
    Simulate(SimulateArgs),
    /// Recover a replica from a saved store and print its visible tree
    Tree(TreeArgs),
    /// Print the stored operations in timestamp order
    Log(LogArgs),
}

/// Arguments for the simulate command
#[derive(clap::Args, Debug)]
pub struct SimulateArgs {
    /// Number of replicas
    #[arg(short, long, default_value_t = 3, env = "ARBOR_REPLICAS")]
    pub replicas: usize,

    /// Number of intents issued across all replicas
    #[arg(short = 'n', long, default_value_t = 200, env = "ARBOR_OPERATIONS")]
    pub operations: usize,

    /// Seed for the choice of intents and partitions
    #[arg(short, long, default_value_t = 42, env = "ARBOR_SEED")]
    pub seed: u64,

    /// Chance per step that a replica's connection flips
    #[arg(long, default_value_t = 0.1)]
    pub partition_rate: f64,

    /// Write the shared store to this file afterwards
    #[arg(long, env = "ARBOR_DATA")]
    pub save: Option<PathBuf>,
}

/// Arguments for the tree command
#[derive(clap::Args, Debug)]
pub struct TreeArgs {
    /// Store file written by `simulate --save`
    #[arg(short = 'D', long, env = "ARBOR_DATA")]
    pub data: PathBuf,

    /// Replica to recover as
    #[arg(short, long, default_value = "arbor-cli", env = "ARBOR_REPLICA_ID")]
    pub replica: String,
}

/// Arguments for the log command
#[derive(clap::Args, Debug)]
pub struct LogArgs {
    /// Store file written by `simulate --save`
    #[arg(short = 'D', long, env = "ARBOR_DATA")]
    pub data: PathBuf,

    /// Only operations newer than this raw HLC value
    #[arg(long)]
    pub since: Option<u64>,
}
