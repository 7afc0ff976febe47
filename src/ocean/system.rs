//! High-level ocean simulation driving the spectral pipeline on a backend.

use log::{debug, info, trace};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::backend::ComputeBackend;
use crate::error::{OceanError, Result};
use crate::fft::Fft2d;
use crate::graph::{CommandGraph, FieldHandle, Kernel};
use crate::grid::{FieldFormat, GridSize};
use crate::params::{OceanConfig, WaveParameters};
use crate::spectrum::{generate_noise, SpectrumSettings};
use crate::wave::{ComponentFields, OutputFields};

/// Tessendorf ocean: static spectrum, per-frame evolution, inverse FFTs and merge
///
/// Owns the backend and every field it allocates. The static spectrum is
/// computed at construction and again only when parameters or noise change.
pub struct OceanSimulation<B: ComputeBackend> {
    backend: B,
    config: OceanConfig,
    grid: GridSize,
    fft: Fft2d,
    rng: StdRng,
    noise: FieldHandle,
    h0: FieldHandle,
    frequency: FieldHandle,
    components: ComponentFields,
    outputs: OutputFields,
    frame: u64,
}

impl<B: ComputeBackend> OceanSimulation<B> {
    /// Validate `config`, allocate every field and build the static spectrum
    pub fn new(mut backend: B, config: OceanConfig) -> Result<Self> {
        config.validate()?;
        let grid = config.grid()?;

        let noise = backend.create_field("ocean.noise", grid, FieldFormat::Rg)?;
        let h0 = backend.create_field("ocean.h0", grid, FieldFormat::Rg)?;
        let frequency = backend.create_field("ocean.frequency", grid, FieldFormat::Rgba)?;
        let components = ComponentFields {
            dy_dxz: backend.create_field("ocean.dy_dxz", grid, FieldFormat::Rg)?,
            dx_dz: backend.create_field("ocean.dx_dz", grid, FieldFormat::Rg)?,
            dyx_dyz: backend.create_field("ocean.dyx_dyz", grid, FieldFormat::Rg)?,
            dxx_dzz: backend.create_field("ocean.dxx_dzz", grid, FieldFormat::Rg)?,
        };
        let outputs = OutputFields {
            displacement: backend.create_field("ocean.displacement", grid, FieldFormat::Rgba)?,
            derivatives: backend.create_field("ocean.derivatives", grid, FieldFormat::Rgba)?,
            turbulence: backend.create_field("ocean.turbulence", grid, FieldFormat::R)?,
        };
        let fft = Fft2d::new(&mut backend, grid)?;

        info!(
            "Ocean {} over {} m on {} backend (seed {})",
            grid,
            config.length,
            backend.name(),
            config.seed
        );

        let mut simulation = Self {
            backend,
            rng: StdRng::seed_from_u64(config.seed),
            config,
            grid,
            fft,
            noise,
            h0,
            frequency,
            components,
            outputs,
            frame: 0,
        };
        simulation.upload_noise()?;
        simulation.regenerate_static_spectrum()?;
        Ok(simulation)
    }

    /// Record and submit one frame at simulation time `time` (seconds)
    pub fn step(&mut self, time: f32) -> Result<()> {
        let graph = self.record_frame(time)?;
        self.backend.submit(&graph)?;
        self.frame += 1;
        trace!("frame {} at t = {:.3}s", self.frame, time);
        Ok(())
    }

    /// The frame graph: evolve, four unnormalized inverse FFTs, barrier, merge
    pub fn record_frame(&self, time: f32) -> Result<CommandGraph> {
        let mut graph = CommandGraph::new("ocean.frame");
        graph.dispatch(Kernel::Evolve {
            h0: self.h0,
            frequency: self.frequency,
            components: self.components,
            time,
        });
        // The spectrum amplitudes already carry the physical scale
        for field in self.components.handles() {
            self.fft.record_inverse(&mut graph, &field, false)?;
        }
        graph.barrier("components ready");
        graph.dispatch(Kernel::Merge {
            components: self.components,
            outputs: self.outputs,
            choppiness: self.config.choppiness,
        });
        Ok(graph)
    }

    /// Replace the wave parameters and rebuild the static spectrum
    pub fn set_wave_parameters(&mut self, waves: WaveParameters) -> Result<()> {
        waves.validate()?;
        self.config.waves = waves;
        self.regenerate_static_spectrum()
    }

    /// Recompute H0 and the frequency table from the current noise and parameters
    pub fn regenerate_static_spectrum(&mut self) -> Result<()> {
        let mut graph = CommandGraph::new("ocean.static_spectrum");
        graph.dispatch(Kernel::StaticSpectrum {
            noise: self.noise,
            h0: self.h0,
            frequency: self.frequency,
            settings: self.settings(),
        });
        self.backend.submit(&graph)?;
        info!(
            "Static spectrum regenerated: wind {} m/s at {:.1}°, amplitude {}",
            self.config.waves.wind_speed,
            self.config.waves.wind_angle().to_degrees(),
            self.config.waves.wave_amplitude
        );
        Ok(())
    }

    /// Draw a fresh noise field from the simulation RNG and rebuild the spectrum
    pub fn reseed_noise(&mut self) -> Result<()> {
        self.upload_noise()?;
        self.regenerate_static_spectrum()
    }

    /// Horizontal displacement scale; applied at the next merge
    pub fn set_choppiness(&mut self, choppiness: f32) -> Result<()> {
        if !choppiness.is_finite() {
            return Err(OceanError::InvalidConfig(format!(
                "choppiness must be finite, got {}",
                choppiness
            )));
        }
        self.config.choppiness = choppiness;
        Ok(())
    }

    pub fn outputs(&self) -> OutputFields {
        self.outputs
    }

    /// `(λ·Dx, Dy, λ·Dz, 0)` per cell
    pub fn read_displacement(&self) -> Result<Vec<f32>> {
        self.backend.read_field(&self.outputs.displacement)
    }

    /// `(∂Dy/∂x, ∂Dy/∂z, λ·∂Dx/∂x, λ·∂Dz/∂z)` per cell
    pub fn read_derivatives(&self) -> Result<Vec<f32>> {
        self.backend.read_field(&self.outputs.derivatives)
    }

    pub fn read_turbulence(&self) -> Result<Vec<f32>> {
        self.backend.read_field(&self.outputs.turbulence)
    }

    /// Complex Gaussian noise behind the current spectrum
    pub fn read_gauss_noise(&self) -> Result<Vec<f32>> {
        self.introspect(&self.noise)
    }

    /// Static spectrum amplitudes H0(k)
    pub fn read_h0(&self) -> Result<Vec<f32>> {
        self.introspect(&self.h0)
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn config(&self) -> &OceanConfig {
        &self.config
    }

    pub fn grid(&self) -> GridSize {
        self.grid
    }

    /// Frames stepped so far
    pub fn frame(&self) -> u64 {
        self.frame
    }

    fn settings(&self) -> SpectrumSettings {
        SpectrumSettings {
            waves: self.config.waves,
            length: self.config.length,
        }
    }

    fn upload_noise(&mut self) -> Result<()> {
        let data = generate_noise(&mut self.rng, self.grid);
        self.backend.write_field(&self.noise, &data)?;
        debug!("Uploaded {} noise samples", self.grid.len());
        Ok(())
    }

    fn introspect(&self, field: &FieldHandle) -> Result<Vec<f32>> {
        if !self.config.debug_introspection {
            return Err(OceanError::IntrospectionDisabled);
        }
        self.backend.read_field(field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::CpuBackend;
    use crate::graph::{KernelKind, Node};

    fn small_config() -> OceanConfig {
        OceanConfig {
            size: [16, 16],
            length: 64.0,
            ..OceanConfig::default()
        }
    }

    #[test]
    fn test_frame_graph_fences_merge() {
        let ocean = OceanSimulation::new(CpuBackend::new(), small_config()).unwrap();
        let graph = ocean.record_frame(1.0).unwrap();
        graph.validate().unwrap();

        let kinds: Vec<KernelKind> = graph.kernels().map(|k| k.kind()).collect();
        assert_eq!(kinds.first(), Some(&KernelKind::Evolve));
        assert_eq!(kinds.last(), Some(&KernelKind::Merge));
        assert_eq!(
            kinds.iter().filter(|k| **k == KernelKind::Butterfly).count(),
            4 * 8
        );
        // Unnormalized inverse transforms
        assert!(!kinds.contains(&KernelKind::Scale));
        let barrier = graph.nodes().len() - 2;
        assert!(matches!(graph.nodes()[barrier], Node::Barrier(_)));
    }

    #[test]
    fn test_introspection_is_gated() {
        let ocean = OceanSimulation::new(CpuBackend::new(), small_config()).unwrap();
        assert!(matches!(
            ocean.read_gauss_noise(),
            Err(OceanError::IntrospectionDisabled)
        ));
        assert!(matches!(ocean.read_h0(), Err(OceanError::IntrospectionDisabled)));

        let config = OceanConfig {
            debug_introspection: true,
            ..small_config()
        };
        let ocean = OceanSimulation::new(CpuBackend::new(), config).unwrap();
        assert_eq!(ocean.read_gauss_noise().unwrap().len(), 16 * 16 * 2);
        assert_eq!(ocean.read_h0().unwrap().len(), 16 * 16 * 2);
    }

    #[test]
    fn test_reseed_changes_spectrum() {
        let config = OceanConfig {
            debug_introspection: true,
            ..small_config()
        };
        let mut ocean = OceanSimulation::new(CpuBackend::new(), config).unwrap();
        let before = ocean.read_h0().unwrap();
        ocean.reseed_noise().unwrap();
        assert_ne!(before, ocean.read_h0().unwrap());
    }

    #[test]
    fn test_zero_wind_gives_flat_finite_ocean() {
        let mut ocean = OceanSimulation::new(CpuBackend::new(), small_config()).unwrap();
        ocean
            .set_wave_parameters(WaveParameters {
                wind_speed: 0.0,
                ..WaveParameters::default()
            })
            .unwrap();
        ocean.step(2.0).unwrap();
        assert!(ocean.read_displacement().unwrap().iter().all(|v| *v == 0.0));
        assert!(ocean.read_turbulence().unwrap().iter().all(|v| *v == 1.0));
        assert_eq!(ocean.frame(), 1);
    }

    #[test]
    fn test_choppiness_scales_horizontal_displacement() {
        let mut ocean = OceanSimulation::new(CpuBackend::new(), small_config()).unwrap();
        ocean.step(1.0).unwrap();
        let base = ocean.read_displacement().unwrap();
        ocean.set_choppiness(2.0).unwrap();
        ocean.step(1.0).unwrap();
        let doubled = ocean.read_displacement().unwrap();
        for (a, b) in base.chunks(4).zip(doubled.chunks(4)) {
            assert!((b[0] - 2.0 * a[0]).abs() < 1e-5);
            assert_eq!(a[1], b[1]);
        }
        assert!(ocean.set_choppiness(f32::NAN).is_err());
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = OceanConfig {
            size: [24, 16],
            ..OceanConfig::default()
        };
        assert!(matches!(
            OceanSimulation::new(CpuBackend::new(), config),
            Err(OceanError::InvalidSize { .. })
        ));
    }
}
