//! # CLI Interface
//!
//! Command-line argument structure for `claimtree-server` via `clap`
//! derive. Every configurable value has an environment-variable fallback so
//! container deployments do not need a wall of flags.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Claimtree whitelist-to-Merkle-tree service.
///
/// Stores operator-uploaded whitelists, builds keccak256 Merkle trees over
/// them, and serves roots and membership proofs for on-chain verification.
#[derive(Parser, Debug)]
#[command(
    name = "claimtree-server",
    about = "Whitelist-to-Merkle-tree service",
    version,
    propagate_version = true
)]
pub struct ClaimtreeCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the HTTP service.
    Run(RunArgs),
    /// Force a tree row stuck in CREATING or DELETING to FAILED so a
    /// subsequent DeleteTree can clean it up. Run against the same data
    /// directory while the service is stopped.
    Repair(RepairArgs),
    /// Query a running instance's tree catalog as a liveness check.
    Status(StatusArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Data directory for the embedded store.
    #[arg(long, short = 'd', env = "CLAIMTREE_DATA_DIR", default_value = "./claimtree-data")]
    pub data_dir: PathBuf,

    /// Bind address for the HTTP API.
    #[arg(long, env = "CLAIMTREE_HTTP_ADDR", default_value = "0.0.0.0:8080")]
    pub http_addr: String,

    /// Bind address for the Prometheus metrics endpoint.
    #[arg(long, env = "CLAIMTREE_METRICS_ADDR", default_value = "0.0.0.0:9090")]
    pub metrics_addr: String,

    /// Log verbosity: trace, debug, info, warn, error.
    #[arg(long, env = "CLAIMTREE_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log format: pretty or json.
    #[arg(long, env = "CLAIMTREE_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,

    /// Development mode: temporary in-memory store, built-in configuration,
    /// no group gating. Never point this at anything that matters.
    #[arg(long)]
    pub dev: bool,
}

/// Arguments for the `repair` subcommand.
#[derive(Parser, Debug, Clone)]
pub struct RepairArgs {
    /// Data directory of the stopped service instance.
    #[arg(long, short = 'd', env = "CLAIMTREE_DATA_DIR", default_value = "./claimtree-data")]
    pub data_dir: PathBuf,

    /// Whitelist name whose root row is stuck.
    #[arg(long)]
    pub whitelist_name: String,
}

/// Arguments for the `status` subcommand.
#[derive(Parser, Debug, Clone)]
pub struct StatusArgs {
    /// Base URL of the running instance.
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli_structure() {
        // Ensures the derive macros produce a valid CLI definition.
        ClaimtreeCli::command().debug_assert();
    }

    #[test]
    fn run_subcommand_defaults() {
        let args = ClaimtreeCli::parse_from(["claimtree-server", "run"]);
        match args.command {
            Commands::Run(run) => {
                assert_eq!(run.http_addr, "0.0.0.0:8080");
                assert_eq!(run.metrics_addr, "0.0.0.0:9090");
                assert_eq!(run.log_level, "info");
                assert_eq!(run.log_format, "pretty");
                assert!(!run.dev);
            }
            _ => panic!("expected Run subcommand"),
        }
    }

    #[test]
    fn run_subcommand_custom_values() {
        let args = ClaimtreeCli::parse_from([
            "claimtree-server",
            "run",
            "--http-addr",
            "127.0.0.1:9000",
            "--data-dir",
            "/tmp/claimtree-test",
            "--log-format",
            "json",
            "--dev",
        ]);
        match args.command {
            Commands::Run(run) => {
                assert_eq!(run.http_addr, "127.0.0.1:9000");
                assert_eq!(run.data_dir, PathBuf::from("/tmp/claimtree-test"));
                assert_eq!(run.log_format, "json");
                assert!(run.dev);
            }
            _ => panic!("expected Run subcommand"),
        }
    }

    #[test]
    fn repair_subcommand_requires_name() {
        assert!(ClaimtreeCli::try_parse_from(["claimtree-server", "repair"]).is_err());

        let args = ClaimtreeCli::parse_from([
            "claimtree-server",
            "repair",
            "--whitelist-name",
            "w0",
        ]);
        match args.command {
            Commands::Repair(repair) => assert_eq!(repair.whitelist_name, "w0"),
            _ => panic!("expected Repair subcommand"),
        }
    }

    #[test]
    fn status_subcommand_defaults() {
        let args = ClaimtreeCli::parse_from(["claimtree-server", "status"]);
        match args.command {
            Commands::Status(status) => {
                assert_eq!(status.url, "http://127.0.0.1:8080");
            }
            _ => panic!("expected Status subcommand"),
        }
    }

    #[test]
    fn version_subcommand_parses() {
        let args = ClaimtreeCli::parse_from(["claimtree-server", "version"]);
        assert!(matches!(args.command, Commands::Version));
    }
}
