// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands
//!
//! - Printing the pass plan of a request
//! - Running an aggregation over a points file
//! - Listing GPU adapters

use gpu_grid_aggregator::aggregation::planner::{AggregationPlan, SlotContent};
use gpu_grid_aggregator::backends::{BackendCapabilities, BackendKind, create_backend};
use gpu_grid_aggregator::points::{LasAttribute, PointCloud, PointSource, las_channel_layout};
use gpu_grid_aggregator::{AggregationRequest, Aggregator, gpu};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Print the resolved plan without touching a GPU
pub fn print_plan(
    request_path: &Path,
    no_multi_slot: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let request = AggregationRequest::load(request_path)?;
    let capabilities = BackendCapabilities {
        name: "planner".to_string(),
        supports_multi_slot_equations: !no_multi_slot,
        ..Default::default()
    };
    let plan = AggregationPlan::build(
        request.geometry()?,
        &request.channels,
        &capabilities,
        &request.config,
    )?;

    let geometry = &plan.geometry;
    println!(
        "Grid: {}x{} cells of {}x{} over [{}, {}] - [{}, {}]",
        geometry.cols,
        geometry.rows,
        geometry.cell_size[0],
        geometry.cell_size[1],
        geometry.bounds.min[0],
        geometry.bounds.min[1],
        geometry.bounds.max[0],
        geometry.bounds.max[1],
    );
    println!("Passes: {}", plan.pass_count());
    println!();

    for (index, pass) in plan.passes.iter().enumerate() {
        println!("  [{}] {:?} {} ({:?} target)", index, pass.kind, pass.binding, pass.role);
        for (slot, content) in pass.slots.iter().enumerate() {
            let description = match content {
                Some(SlotContent::Weight {
                    channel,
                    statistic,
                    component,
                }) => format!("channel {} {:?} component {}", channel, statistic, component),
                Some(SlotContent::Count) => "point count".to_string(),
                None => "-".to_string(),
            };
            println!("      slot {}: {}", slot, description);
        }
    }

    Ok(())
}

/// Aggregate a points file and write the results as JSON
pub fn run_aggregation(
    request_path: &Path,
    points_path: &Path,
    backend: BackendKind,
    weights: &[LasAttribute],
    output: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let request = AggregationRequest::load(request_path)?;

    // LAS weights fill the request channels component by component
    let sizes: Vec<usize> = request.channels.iter().map(|c| c.components()).collect();
    let las_channels = las_channel_layout(&sizes, weights)?;
    let points = PointCloud::load(points_path, &las_channels)?;

    let mut aggregator = Aggregator::with_config(create_backend(backend)?, request.config);
    let plan = aggregator.configure(request.bounds, request.cell_size, &request.channels)?;

    let start = Instant::now();
    let result = aggregator.run(&points, &plan)?;
    eprintln!(
        "Aggregated {} points into {}x{} cells in {} passes ({:.2} ms)",
        points.len(),
        plan.geometry.cols,
        plan.geometry.rows,
        plan.pass_count(),
        start.elapsed().as_secs_f64() * 1000.0
    );

    let json = serde_json::to_string_pretty(&result)?;
    match output {
        Some(path) => {
            std::fs::write(&path, json)?;
            eprintln!("Results written to {}", path.display());
        }
        None => println!("{}", json),
    }

    Ok(())
}

/// List GPU adapters
pub fn list_devices() -> Result<(), Box<dyn std::error::Error>> {
    let adapters = gpu::list_adapters();

    if adapters.is_empty() {
        println!("No GPU adapters found.");
        return Ok(());
    }

    println!("Available adapters:");
    println!();
    for (index, adapter) in adapters.iter().enumerate() {
        println!("  [{}] {}", index, adapter.name);
        println!(
            "      {} {}, max texture {}",
            adapter.backend, adapter.device_type, adapter.max_texture_dimension_2d
        );
        println!(
            "      Float32 blending: {}",
            if adapter.float32_blendable {
                "yes"
            } else {
                "no (unusable for aggregation)"
            }
        );
        println!();
    }

    Ok(())
}
