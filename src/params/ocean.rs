//! Ocean physics and simulation parameters.

use std::path::Path;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::{OceanError, Result};
use crate::grid::GridSize;

/// Physical wave-field parameters feeding the static spectrum
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaveParameters {
    /// Horizontal wind direction (x, z); only its angle matters
    pub wind_direction: [f32; 2],

    /// Wind speed 10 m above the surface (m/s)
    pub wind_speed: f32,

    /// Energy multiplier (dimensionless); heights scale with its square root
    pub wave_amplitude: f32,

    /// Gravitational acceleration (m/s²)
    pub gravity: f32,

    /// Distance the wind has blown over open water (meters)
    pub fetch: f32,

    /// Water depth (meters); zero or infinite means deep water
    pub depth: f32,
}

impl Default for WaveParameters {
    fn default() -> Self {
        Self {
            wind_direction: [1.0, 0.0],
            wind_speed: 10.0,
            wave_amplitude: 1.0,
            gravity: 9.81,
            fetch: 100_000.0,
            depth: 500.0,
        }
    }
}

impl WaveParameters {
    /// Wind angle from +x (radians)
    pub fn wind_angle(&self) -> f32 {
        self.wind_direction[1].atan2(self.wind_direction[0])
    }

    /// Reject NaN; warn about values that produce a flat ocean
    pub fn validate(&self) -> Result<()> {
        let values = [
            ("wind_direction.x", self.wind_direction[0]),
            ("wind_direction.z", self.wind_direction[1]),
            ("wind_speed", self.wind_speed),
            ("wave_amplitude", self.wave_amplitude),
            ("gravity", self.gravity),
            ("fetch", self.fetch),
        ];
        for (name, value) in values {
            if !value.is_finite() {
                return Err(OceanError::InvalidConfig(format!(
                    "{} must be finite, got {}",
                    name, value
                )));
            }
        }
        if self.depth.is_nan() {
            return Err(OceanError::InvalidConfig("depth is NaN".to_string()));
        }

        if self.wind_speed <= 0.0 || self.fetch <= 0.0 || self.gravity <= 0.0 {
            warn!(
                "wind speed {} m/s, fetch {} m, gravity {} m/s² produce no waves",
                self.wind_speed, self.fetch, self.gravity
            );
        }
        if self.wave_amplitude <= 0.0 {
            warn!("wave amplitude {} flattens the ocean", self.wave_amplitude);
        }
        if self.wind_direction == [0.0, 0.0] {
            warn!("zero wind direction, spreading around +x");
        }
        Ok(())
    }
}

/// Simulation setup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OceanConfig {
    /// Grid resolution `[width, height]` (cells, powers of two)
    pub size: [u32; 2],

    /// Physical extent along x (meters); z extent follows the aspect ratio
    pub length: f32,

    /// Horizontal displacement scale λ (dimensionless)
    pub choppiness: f32,

    /// Seed of the Gaussian noise field
    pub seed: u64,

    /// Allow reading back the noise and H0 fields
    pub debug_introspection: bool,

    pub waves: WaveParameters,
}

impl Default for OceanConfig {
    fn default() -> Self {
        Self {
            size: [256, 256],
            length: 256.0,
            choppiness: 1.0,
            seed: 42,
            debug_introspection: false,
            waves: WaveParameters::default(),
        }
    }
}

impl OceanConfig {
    /// Square grid of `size` cells per side
    pub fn square(size: u32) -> Self {
        Self {
            size: [size, size],
            ..Self::default()
        }
    }

    pub fn grid(&self) -> Result<GridSize> {
        GridSize::new(self.size[0], self.size[1])
    }

    pub fn validate(&self) -> Result<()> {
        self.grid()?;
        if !self.length.is_finite() || self.length <= 0.0 {
            return Err(OceanError::InvalidConfig(format!(
                "length must be positive, got {}",
                self.length
            )));
        }
        if !self.choppiness.is_finite() {
            return Err(OceanError::InvalidConfig(format!(
                "choppiness must be finite, got {}",
                self.choppiness
            )));
        }
        self.waves.validate()
    }

    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }
}
