//! Parameter definitions with physical units and documented semantics.
//!
//! All tunable values live here with:
//! - Physical units (meters, seconds, m/s, etc.)
//! - Documented ranges and meanings
//! - `Default` values that produce a plausible open-ocean swell

mod export;
mod ocean;

// Re-export all types
pub use export::ExportConfig;
pub use ocean::{OceanConfig, WaveParameters};
