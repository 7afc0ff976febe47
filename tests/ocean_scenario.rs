//! End-to-end ocean behaviour on the CPU backend.

use rustfft::num_complex::Complex32;

use fftocean::backend::{ComputeBackend, CpuBackend};
use fftocean::params::{OceanConfig, WaveParameters};
use fftocean::spectrum::{spectrum_texel, SpectrumSettings};
use fftocean::wave::time_evolved_amplitude;
use fftocean::{Fft2d, FieldFormat, OceanSimulation};

fn reference_config(size: u32) -> OceanConfig {
    OceanConfig {
        size: [size, size],
        length: 256.0,
        choppiness: 1.0,
        seed: 42,
        debug_introspection: true,
        waves: WaveParameters {
            wind_direction: [1.0, 0.0],
            wind_speed: 10.0,
            gravity: 9.81,
            ..WaveParameters::default()
        },
    }
}

fn heights(displacement: &[f32]) -> Vec<f32> {
    displacement.chunks_exact(4).map(|d| d[1]).collect()
}

fn mean_and_variance(values: &[f32]) -> (f32, f32) {
    let n = values.len() as f32;
    let mean = values.iter().sum::<f32>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n;
    (mean, variance)
}

#[test]
fn test_reference_ocean_evolves_around_zero() {
    let mut ocean = OceanSimulation::new(CpuBackend::new(), reference_config(256)).unwrap();

    ocean.step(0.0).unwrap();
    let first = ocean.read_displacement().unwrap();
    ocean.step(5.0).unwrap();
    let later = ocean.read_displacement().unwrap();

    assert!(first.iter().chain(&later).all(|v| v.is_finite()));
    let changed = first
        .iter()
        .zip(&later)
        .filter(|(a, b)| (*a - *b).abs() > 1e-4)
        .count();
    assert!(changed > first.len() / 4, "only {} values changed", changed);

    let (mean, variance) = mean_and_variance(&heights(&later));
    assert!(variance > 0.0);
    assert!(mean.abs() < 1e-3 * variance.sqrt() + 1e-5, "mean height {}", mean);

    let turbulence = ocean.read_turbulence().unwrap();
    let (mean_jacobian, _) = mean_and_variance(&turbulence);
    assert!((mean_jacobian - 1.0).abs() < 0.1, "mean Jacobian {}", mean_jacobian);
}

#[test]
fn test_height_field_is_real() {
    let config = reference_config(64);
    let ocean = OceanSimulation::new(CpuBackend::new(), config.clone()).unwrap();
    let grid = ocean.grid();
    let h0 = ocean.read_h0().unwrap();
    let h0_at = |x: u32, y: u32| {
        let i = grid.index(x, y) * 2;
        Complex32::new(h0[i], h0[i + 1])
    };
    let settings = SpectrumSettings {
        waves: config.waves,
        length: config.length,
    };

    let mut backend = CpuBackend::new();
    let fft = Fft2d::new(&mut backend, grid).unwrap();
    let buffer = backend.create_field("height", grid, FieldFormat::Rg).unwrap();

    for time in [0.0, 1.7, 12.0] {
        let mut spectrum = Vec::with_capacity(grid.len() * 2);
        for y in 0..grid.height() {
            for x in 0..grid.width() {
                let (_, frequency) =
                    spectrum_texel(&settings, grid, x, y, Complex32::new(0.0, 0.0));
                let (mx, my) = grid.mirror(x, y);
                let h = time_evolved_amplitude(h0_at(x, y), h0_at(mx, my), frequency[3], time);
                spectrum.push(h.re);
                spectrum.push(h.im);
            }
        }
        backend.write_field(&buffer, &spectrum).unwrap();
        fft.inverse(&mut backend, &buffer, false).unwrap();

        let field = backend.read_field(&buffer).unwrap();
        let real = field.iter().step_by(2).fold(0.0f32, |m, v| m.max(v.abs()));
        let imaginary = field.iter().skip(1).step_by(2).fold(0.0f32, |m, v| m.max(v.abs()));
        assert!(real > 0.0);
        assert!(imaginary < 1e-4 * real, "t = {}: {} vs {}", time, imaginary, real);
    }
}

#[test]
fn test_variance_grows_with_amplitude() {
    let mut previous = 0.0;
    for wave_amplitude in [0.25, 1.0, 4.0] {
        let mut config = reference_config(64);
        config.waves.wave_amplitude = wave_amplitude;
        let mut ocean = OceanSimulation::new(CpuBackend::new(), config).unwrap();
        ocean.step(3.0).unwrap();
        let (_, variance) = mean_and_variance(&heights(&ocean.read_displacement().unwrap()));
        assert!(
            variance > previous,
            "variance {} at amplitude {}",
            variance,
            wave_amplitude
        );
        previous = variance;
    }
}

#[test]
fn test_degenerate_wind_stays_finite() {
    for waves in [
        WaveParameters {
            wind_speed: 0.0,
            ..WaveParameters::default()
        },
        WaveParameters {
            fetch: 0.0,
            ..WaveParameters::default()
        },
        WaveParameters {
            wind_direction: [0.0, 0.0],
            depth: 0.0,
            ..WaveParameters::default()
        },
    ] {
        let mut config = reference_config(32);
        config.waves = waves;
        let mut ocean = OceanSimulation::new(CpuBackend::new(), config).unwrap();
        ocean.step(1.0).unwrap();
        for field in [
            ocean.read_displacement().unwrap(),
            ocean.read_derivatives().unwrap(),
            ocean.read_turbulence().unwrap(),
        ] {
            assert!(field.iter().all(|v| v.is_finite()), "{:?}", waves);
        }
    }
}

#[test]
fn test_parameter_update_regenerates_spectrum() {
    let mut ocean = OceanSimulation::new(CpuBackend::new(), reference_config(32)).unwrap();
    let noise = ocean.read_gauss_noise().unwrap();
    let before = ocean.read_h0().unwrap();
    let waves = WaveParameters {
        wind_speed: 20.0,
        ..ocean.config().waves
    };
    ocean.set_wave_parameters(waves).unwrap();
    assert_ne!(before, ocean.read_h0().unwrap());
    // Regeneration reuses the noise field
    assert_eq!(noise, ocean.read_gauss_noise().unwrap());
    assert_eq!(ocean.backend().name(), "cpu");
}
