//! Command-line argument parsing.

use std::path::PathBuf;

use clap::Parser;

use fftocean::params::{ExportConfig, OceanConfig};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "fftocean")]
#[command(about = "Headless FFT ocean simulation with PNG previews", long_about = None)]
pub struct Args {
    /// TOML config file; flags below override its values
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Grid resolution per side (power of two)
    #[arg(long, value_name = "CELLS")]
    pub size: Option<u32>,

    /// Physical extent of the grid (meters)
    #[arg(long, value_name = "METERS")]
    pub length: Option<f32>,

    /// Wind speed (m/s)
    #[arg(long, value_name = "M/S")]
    pub wind_speed: Option<f32>,

    /// Wind direction as "x,z"
    #[arg(
        long,
        value_name = "X,Z",
        value_delimiter = ',',
        num_args = 2,
        allow_negative_numbers = true
    )]
    pub wind_dir: Option<Vec<f32>>,

    /// Wave energy multiplier
    #[arg(long)]
    pub amplitude: Option<f32>,

    /// Horizontal displacement scale
    #[arg(long)]
    pub choppiness: Option<f32>,

    /// Number of frames to simulate
    #[arg(long, default_value_t = 1)]
    pub frames: usize,

    /// Simulated seconds between frames
    #[arg(long, default_value_t = 1.0 / 30.0)]
    pub dt: f32,

    /// Output directory for PNG previews
    #[arg(long, value_name = "DIR", default_value = "ocean_output")]
    pub out: PathBuf,

    /// Run on the CPU reference backend instead of the GPU
    #[arg(long)]
    pub cpu: bool,

    /// Also export the noise and H0 fields
    #[arg(long)]
    pub debug: bool,
}

impl Args {
    /// Merge flags into a base config (file or defaults)
    pub fn apply(&self, mut config: OceanConfig) -> OceanConfig {
        if let Some(size) = self.size {
            config.size = [size, size];
        }
        if let Some(length) = self.length {
            config.length = length;
        }
        if let Some(wind_speed) = self.wind_speed {
            config.waves.wind_speed = wind_speed;
        }
        if let Some([x, z]) = self.wind_dir.as_deref() {
            config.waves.wind_direction = [*x, *z];
        }
        if let Some(amplitude) = self.amplitude {
            config.waves.wave_amplitude = amplitude;
        }
        if let Some(choppiness) = self.choppiness {
            config.choppiness = choppiness;
        }
        if self.debug {
            config.debug_introspection = true;
        }
        config
    }

    pub fn export_config(&self) -> ExportConfig {
        ExportConfig {
            frames: self.frames,
            dt: self.dt,
            output_dir: self.out.clone(),
            debug_fields: self.debug,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let args = Args::parse_from([
            "fftocean",
            "--size",
            "64",
            "--wind-dir",
            "0,1",
            "--choppiness",
            "0.5",
            "--debug",
        ]);
        let config = args.apply(OceanConfig::default());
        assert_eq!(config.size, [64, 64]);
        assert_eq!(config.waves.wind_direction, [0.0, 1.0]);
        assert_eq!(config.choppiness, 0.5);
        assert!(config.debug_introspection);
        assert_eq!(config.length, 256.0);

        let export = args.export_config();
        assert_eq!(export.frames, 1);
        assert!(export.debug_fields);
    }

    #[test]
    fn test_wind_dir_takes_two_components() {
        let args = Args::try_parse_from(["fftocean", "--wind-dir", "0.5,-1"]).unwrap();
        assert_eq!(
            args.apply(OceanConfig::default()).waves.wind_direction,
            [0.5, -1.0]
        );
        assert!(Args::try_parse_from(["fftocean", "--wind-dir", "1"]).is_err());
        assert!(Args::try_parse_from(["fftocean", "--wind-dir", "1,0,2"]).is_err());
    }
}
