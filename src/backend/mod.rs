//! Compute backends that execute recorded command graphs.
//!
//! [`GpuBackend`] runs every kernel as a wgpu compute dispatch. [`CpuBackend`]
//! runs the same kernels serially on host memory; it is the reference the GPU
//! path is checked against and the fallback when no adapter is available.

mod cpu;
mod gpu;

pub use cpu::CpuBackend;
pub use gpu::{GpuBackend, KernelParams};

use crate::error::Result;
use crate::graph::{CommandGraph, FieldHandle, TableHandle};
use crate::grid::{FieldFormat, GridSize};

/// Buffer allocation, upload, readback and graph execution
pub trait ComputeBackend {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Allocate a zero-initialized field
    fn create_field(
        &mut self,
        label: &str,
        grid: GridSize,
        format: FieldFormat,
    ) -> Result<FieldHandle>;

    /// Allocate and upload a read-only `u32` table
    fn create_table(&mut self, label: &str, data: &[u32]) -> Result<TableHandle>;

    /// Overwrite a field; `data` must hold exactly [`FieldHandle::value_count`] values
    fn write_field(&mut self, field: &FieldHandle, data: &[f32]) -> Result<()>;

    /// Copy a field back to host memory
    fn read_field(&self, field: &FieldHandle) -> Result<Vec<f32>>;

    /// Validate and execute a graph in recording order
    fn submit(&mut self, graph: &CommandGraph) -> Result<()>;
}
