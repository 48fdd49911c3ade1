// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand};
use gpu_grid_aggregator::BackendKind;
use gpu_grid_aggregator::points::LasAttribute;
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "grid-aggregate")]
#[command(about = "Aggregate 2D points into grid cells on the GPU")]
#[command(version = env!("GIT_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the render passes a request resolves to
    Plan {
        /// Aggregation request document (JSON)
        #[arg(short, long)]
        request: PathBuf,

        /// Plan for a backend without multi-slot blending
        #[arg(long)]
        no_multi_slot: bool,
    },

    /// Aggregate points and print the per-channel grids as JSON
    Run {
        /// Aggregation request document (JSON)
        #[arg(short, long)]
        request: PathBuf,

        /// Points file (.json, .las or .laz)
        #[arg(short, long)]
        points: PathBuf,

        /// Rasterization backend
        #[arg(short, long, value_enum, default_value = "auto")]
        backend: BackendArg,

        /// LAS attributes filling the channel components in order (default: one)
        #[arg(short, long = "weight", value_parser = parse_las_attribute)]
        weights: Vec<LasAttribute>,

        /// Write results to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List GPU adapters and whether they can blend float32 targets
    Devices,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum BackendArg {
    Auto,
    Gpu,
    Reference,
}

impl From<BackendArg> for BackendKind {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Auto => BackendKind::Auto,
            BackendArg::Gpu => BackendKind::Gpu,
            BackendArg::Reference => BackendKind::Reference,
        }
    }
}

fn parse_las_attribute(s: &str) -> Result<LasAttribute, String> {
    s.parse().map_err(|e| format!("{}", e))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set RUST_LOG to control log level, e.g. RUST_LOG=gpu_grid_aggregator=debug
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Plan {
            request,
            no_multi_slot,
        } => cli::print_plan(&request, no_multi_slot),
        Commands::Run {
            request,
            points,
            backend,
            weights,
            output,
        } => cli::run_aggregation(&request, &points, backend.into(), &weights, output),
        Commands::Devices => cli::list_devices(),
    }
}
