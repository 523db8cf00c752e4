//! Workload Builder CLI
//!
//! A command-line tool for building Kubernetes workload manifests from plan
//! files, classifying existing manifests by QoS class, and inspecting the
//! resource defaults used for QoS auto-upgrade.

mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{build, classify, defaults};
use std::path::PathBuf;
use tracing::debug;
use workload_lib::observability::init_tracing;
use workload_lib::ResourceDefaults;

/// Workload Builder CLI
#[derive(Parser)]
#[command(name = "wlb")]
#[command(author, version, about = "Build and classify Kubernetes workloads", long_about = None)]
pub struct Cli {
    /// Output format (defaults to the configured format, else yaml)
    #[arg(long, short, global = true)]
    pub format: Option<output::OutputFormat>,

    /// Enable verbose output
    #[arg(long, short, global = true)]
    pub verbose: bool,

    /// Path to a config file (can also be set via WLB_CONFIG env var)
    #[arg(long, env = "WLB_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build a workload manifest from a plan file
    Build {
        /// Plan file (YAML or JSON)
        plan: PathBuf,

        /// Write the manifest to a file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Report the QoS class of a workload manifest
    Classify {
        /// Deployment, StatefulSet or DaemonSet manifest (YAML or JSON)
        manifest: PathBuf,

        /// Fail when the qos annotation disagrees with the computed class
        #[arg(long)]
        strict: bool,
    },

    /// Show the registered resource defaults
    Defaults,
}

fn run(cli: Cli) -> Result<()> {
    let config = config::Config::load(cli.config.as_deref())?;
    let registry = ResourceDefaults::global();
    config.register_defaults(&registry)?;

    let format = match cli.format {
        Some(format) => format,
        None => config.format()?.unwrap_or_default(),
    };
    debug!(event = "cli_configured", format = ?format, "Loaded configuration");

    match cli.command {
        Commands::Build { plan, output } => build::build_workload(&plan, output, format),
        Commands::Classify { manifest, strict } => {
            classify::classify_manifest(&manifest, strict, format)
        }
        Commands::Defaults => defaults::show_defaults(&registry.snapshot(), format),
    }
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    init_tracing(cli.log_json, level);

    if let Err(err) = run(cli) {
        output::print_error(&format!("{err:#}"));
        std::process::exit(1);
    }
}
