//! fftocean library - FFT-based Tessendorf ocean simulation
//!
//! A JONSWAP wave spectrum is built once, evolved in frequency space every
//! frame and brought back to the spatial domain with 2D inverse FFTs. The work
//! is recorded as a [`graph::CommandGraph`] and executed by a
//! [`backend::ComputeBackend`] (wgpu compute or a CPU reference).

pub mod backend;
pub mod error;
pub mod export;
pub mod fft;
pub mod graph;
pub mod grid;
pub mod ocean;
pub mod params;
pub mod spectrum;
pub mod surface;
pub mod wave;

pub use error::{OceanError, Result};
pub use fft::Fft2d;
pub use grid::{FieldFormat, GridSize};
pub use ocean::OceanSimulation;
pub use surface::ReferencePlane;
