//! Headless run and image export configuration.

use std::path::PathBuf;

/// Frame loop and PNG output settings for the `fftocean` binary
#[derive(Debug, Clone)]
pub struct ExportConfig {
    /// Number of simulated frames
    pub frames: usize,

    /// Simulated time between frames (seconds)
    pub dt: f32,

    /// Output directory for preview images
    pub output_dir: PathBuf,

    /// Also write the noise and H0 fields
    pub debug_fields: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            frames: 1,
            dt: 1.0 / 30.0,
            output_dir: PathBuf::from("ocean_output"),
            debug_fields: false,
        }
    }
}

impl ExportConfig {
    /// Simulation time of frame `index`
    pub fn frame_time(&self, index: usize) -> f32 {
        index as f32 * self.dt
    }

    /// Total simulated duration (seconds)
    pub fn duration(&self) -> f32 {
        self.frames as f32 * self.dt
    }

    /// Path of one preview image, e.g. `ocean_output/frame_0003_height.png`
    pub fn frame_path(&self, index: usize, field: &str) -> PathBuf {
        self.output_dir.join(format!("frame_{:04}_{}.png", index, field))
    }

    /// Path of a frame-independent image
    pub fn field_path(&self, field: &str) -> PathBuf {
        self.output_dir.join(format!("{}.png", field))
    }
}
