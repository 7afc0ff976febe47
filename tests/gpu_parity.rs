//! GPU backend against the CPU reference. Skips when no adapter is available.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use fftocean::backend::{ComputeBackend, CpuBackend, GpuBackend};
use fftocean::params::OceanConfig;
use fftocean::{Fft2d, FieldFormat, GridSize, OceanSimulation};

fn gpu() -> Option<GpuBackend> {
    match GpuBackend::new_blocking() {
        Ok(backend) => Some(backend),
        Err(err) => {
            eprintln!("skipping GPU test: {}", err);
            None
        }
    }
}

fn assert_close(label: &str, cpu: &[f32], gpu: &[f32], tolerance: f32) {
    assert_eq!(cpu.len(), gpu.len(), "{}", label);
    let scale = cpu.iter().fold(1e-6f32, |m, v| m.max(v.abs()));
    for (i, (a, b)) in cpu.iter().zip(gpu).enumerate() {
        assert!(
            (a - b).abs() <= tolerance * scale,
            "{} index {}: cpu {} gpu {}",
            label,
            i,
            a,
            b
        );
    }
}

#[test]
fn test_gpu_fft_round_trip() {
    let Some(mut backend) = gpu() else {
        return;
    };
    let grid = GridSize::new(64, 32).unwrap();
    let fft = Fft2d::new(&mut backend, grid).unwrap();
    let buffer = backend.create_field("buffer", grid, FieldFormat::Rg).unwrap();
    let mut rng = StdRng::seed_from_u64(5);
    let input: Vec<f32> = (0..grid.len() * 2).map(|_| rng.gen_range(-1.0..1.0)).collect();
    backend.write_field(&buffer, &input).unwrap();

    fft.forward(&mut backend, &buffer).unwrap();
    fft.inverse(&mut backend, &buffer, true).unwrap();

    assert_close("round trip", &input, &backend.read_field(&buffer).unwrap(), 1e-4);
}

#[test]
fn test_gpu_forward_matches_cpu() {
    let Some(mut gpu) = gpu() else {
        return;
    };
    let mut cpu = CpuBackend::new();
    let grid = GridSize::new(32, 64).unwrap();
    let mut rng = StdRng::seed_from_u64(6);
    let input: Vec<f32> = (0..grid.len() * 2).map(|_| rng.gen_range(-1.0..1.0)).collect();

    let transform = |backend: &mut dyn ComputeBackend| {
        let fft = Fft2d::new(backend, grid).unwrap();
        let buffer = backend.create_field("buffer", grid, FieldFormat::Rg).unwrap();
        backend.write_field(&buffer, &input).unwrap();
        fft.forward(backend, &buffer).unwrap();
        backend.read_field(&buffer).unwrap()
    };

    let expected = transform(&mut cpu);
    let actual = transform(&mut gpu);
    assert_close("forward", &expected, &actual, 1e-4);
}

#[test]
fn test_gpu_ocean_matches_cpu() {
    let Some(gpu) = gpu() else {
        return;
    };
    let config = OceanConfig {
        size: [64, 64],
        length: 128.0,
        debug_introspection: true,
        ..OceanConfig::default()
    };
    let mut on_gpu = OceanSimulation::new(gpu, config.clone()).unwrap();
    let mut on_cpu = OceanSimulation::new(CpuBackend::new(), config).unwrap();

    assert_close(
        "noise",
        &on_cpu.read_gauss_noise().unwrap(),
        &on_gpu.read_gauss_noise().unwrap(),
        0.0,
    );
    assert_close(
        "h0",
        &on_cpu.read_h0().unwrap(),
        &on_gpu.read_h0().unwrap(),
        1e-3,
    );

    for time in [0.0, 2.5] {
        on_cpu.step(time).unwrap();
        on_gpu.step(time).unwrap();
        assert_close(
            "displacement",
            &on_cpu.read_displacement().unwrap(),
            &on_gpu.read_displacement().unwrap(),
            1e-3,
        );
        assert_close(
            "derivatives",
            &on_cpu.read_derivatives().unwrap(),
            &on_gpu.read_derivatives().unwrap(),
            1e-3,
        );
        assert_close(
            "turbulence",
            &on_cpu.read_turbulence().unwrap(),
            &on_gpu.read_turbulence().unwrap(),
            1e-3,
        );
    }
}
