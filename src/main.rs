//! fftocean - headless Tessendorf ocean simulation
//!
//! Builds a JONSWAP spectrum, evolves it for a number of frames with GPU
//! inverse FFTs and writes the resulting fields as PNG previews.

mod cli;

use std::time::Instant;

use clap::Parser;
use log::warn;

use cli::Args;
use fftocean::backend::{ComputeBackend, CpuBackend, GpuBackend};
use fftocean::export;
use fftocean::params::{ExportConfig, OceanConfig};
use fftocean::OceanSimulation;

fn run<B: ComputeBackend>(
    backend: B,
    config: OceanConfig,
    output: &ExportConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut ocean = OceanSimulation::new(backend, config)?;
    let grid = ocean.grid();
    std::fs::create_dir_all(&output.output_dir)?;

    if output.debug_fields {
        export::save_magnitude(
            &output.field_path("noise"),
            &ocean.read_gauss_noise()?,
            grid,
        )?;
        export::save_magnitude(&output.field_path("h0"), &ocean.read_h0()?, grid)?;
    }

    let start = Instant::now();
    for frame in 0..output.frames {
        ocean.step(output.frame_time(frame))?;
    }
    let elapsed = start.elapsed();

    let last = output.frames.saturating_sub(1);
    let displacement = ocean.read_displacement()?;
    export::save_height(&output.frame_path(last, "height"), &displacement, grid)?;
    export::save_rgb(&output.frame_path(last, "displacement"), &displacement, grid)?;
    export::save_rgb(
        &output.frame_path(last, "derivatives"),
        &ocean.read_derivatives()?,
        grid,
    )?;
    export::save_scalar(
        &output.frame_path(last, "turbulence"),
        &ocean.read_turbulence()?,
        grid,
    )?;

    println!("  Backend: {}", ocean.backend().name());
    println!("  Frames: {} ({:.2}s simulated)", ocean.frame(), output.duration());
    println!("  Output: {}", output.output_dir.display());
    println!(
        "  Time: {:.2}ms ({:.3}ms/frame)",
        elapsed.as_secs_f64() * 1000.0,
        elapsed.as_secs_f64() * 1000.0 / output.frames.max(1) as f64
    );
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let base = match &args.config {
        Some(path) => OceanConfig::load(path)?,
        None => OceanConfig::default(),
    };
    let config = args.apply(base);
    let output = args.export_config();

    println!("FFT Ocean");
    println!("  Size: {}x{}", config.size[0], config.size[1]);
    println!("  Length: {} m", config.length);
    println!(
        "  Wind: {} m/s toward ({}, {})",
        config.waves.wind_speed, config.waves.wind_direction[0], config.waves.wind_direction[1]
    );

    if args.cpu {
        return run(CpuBackend::new(), config, &output);
    }
    match GpuBackend::new_blocking() {
        Ok(gpu) => run(gpu, config, &output),
        Err(err) => {
            warn!("{}; falling back to the CPU backend", err);
            run(CpuBackend::new(), config, &output)
        }
    }
}
