//! Serial host-memory executor for command graphs.

use std::collections::HashMap;

use log::trace;
use rustfft::num_complex::Complex32;

use super::ComputeBackend;
use crate::error::{OceanError, Result};
use crate::fft::{butterfly, checkerboard};
use crate::graph::{CommandGraph, FieldHandle, Kernel, Node, ResourceId, TableHandle};
use crate::grid::{Axis, FieldFormat, GridSize};
use crate::spectrum::{spectrum_texel, SpectrumSettings};
use crate::wave::{evolve_texel, merge_texel, ComponentFields, OutputFields};

/// Reference backend: every kernel runs on `Vec<f32>` storage
#[derive(Debug, Default)]
pub struct CpuBackend {
    fields: HashMap<ResourceId, Vec<f32>>,
    tables: HashMap<ResourceId, Vec<u32>>,
    next_id: u32,
}

impl CpuBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&mut self) -> ResourceId {
        let id = ResourceId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Storage behind `handle`, which must describe it exactly
    fn field(&self, handle: &FieldHandle) -> Result<&[f32]> {
        let data = self
            .fields
            .get(&handle.id)
            .ok_or(OceanError::UnknownResource(handle.id))?;
        check_len(handle.value_count(), data.len())?;
        Ok(data)
    }

    fn table(&self, handle: &TableHandle) -> Result<&[u32]> {
        let data = self
            .tables
            .get(&handle.id)
            .ok_or(OceanError::UnknownResource(handle.id))?;
        check_len(handle.len as usize, data.len())?;
        Ok(data)
    }

    /// Remove a destination field so sources can be borrowed while it is filled
    fn take(&mut self, handle: &FieldHandle) -> Result<Vec<f32>> {
        self.field(handle)?;
        self.fields
            .remove(&handle.id)
            .ok_or(OceanError::UnknownResource(handle.id))
    }

    fn field_mut(&mut self, handle: &FieldHandle) -> Result<&mut Vec<f32>> {
        self.field(handle)?;
        self.fields
            .get_mut(&handle.id)
            .ok_or(OceanError::UnknownResource(handle.id))
    }

    fn put(&mut self, handle: &FieldHandle, data: Vec<f32>) {
        self.fields.insert(handle.id, data);
    }

    fn execute(&mut self, kernel: &Kernel) -> Result<()> {
        match kernel {
            Kernel::BitReverse {
                axis,
                src,
                dst,
                table,
            } => {
                let mut out = self.take(dst)?;
                let result = self.bit_reverse(*axis, src, table, &mut out);
                self.put(dst, out);
                result
            }
            Kernel::Butterfly {
                axis,
                stage,
                direction,
                src,
                dst,
            } => {
                let mut out = self.take(dst)?;
                let result = self.field(src).map(|input| {
                    run_butterfly(*axis, *stage, direction.sign(), src.grid, input, &mut out)
                });
                self.put(dst, out);
                result
            }
            Kernel::Modulate { target } => {
                let grid = target.grid;
                let data = self.field_mut(target)?;
                for y in 0..grid.height() {
                    for x in 0..grid.width() {
                        let i = grid.index(x, y) * 2;
                        let sign = checkerboard(x, y);
                        data[i] *= sign;
                        data[i + 1] *= sign;
                    }
                }
                Ok(())
            }
            Kernel::Scale { target, factor } => {
                let data = self.field_mut(target)?;
                data.iter_mut().for_each(|v| *v *= *factor);
                Ok(())
            }
            Kernel::Copy { src, dst } => {
                let mut out = self.take(dst)?;
                let result = self.field(src).map(|input| out.copy_from_slice(input));
                self.put(dst, out);
                result
            }
            Kernel::StaticSpectrum {
                noise,
                h0,
                frequency,
                settings,
            } => {
                let mut h0_out = self.take(h0)?;
                let mut frequency_out = match self.take(frequency) {
                    Ok(data) => data,
                    Err(err) => {
                        self.put(h0, h0_out);
                        return Err(err);
                    }
                };
                let result = self.field(noise).map(|noise| {
                    static_spectrum(settings, h0.grid, noise, &mut h0_out, &mut frequency_out)
                });
                self.put(h0, h0_out);
                self.put(frequency, frequency_out);
                result
            }
            Kernel::Evolve {
                h0,
                frequency,
                components,
                time,
            } => {
                let mut outs = self.take_all(&components.handles())?;
                let result = match (self.field(h0), self.field(frequency)) {
                    (Ok(h0_data), Ok(freq_data)) => {
                        evolve(h0.grid, h0_data, freq_data, *time, &mut outs);
                        Ok(())
                    }
                    (Err(err), _) | (_, Err(err)) => Err(err),
                };
                self.put_all(&components.handles(), outs);
                result
            }
            Kernel::Merge {
                components,
                outputs,
                choppiness,
            } => self.merge(components, outputs, *choppiness),
        }
    }

    fn take_all<const N: usize>(&mut self, handles: &[FieldHandle; N]) -> Result<Vec<Vec<f32>>> {
        let mut taken = Vec::with_capacity(N);
        for handle in handles {
            match self.take(handle) {
                Ok(data) => taken.push(data),
                Err(err) => {
                    self.put_all(&handles[..taken.len()], taken);
                    return Err(err);
                }
            }
        }
        Ok(taken)
    }

    fn put_all(&mut self, handles: &[FieldHandle], data: Vec<Vec<f32>>) {
        for (handle, values) in handles.iter().zip(data) {
            self.put(handle, values);
        }
    }

    fn bit_reverse(
        &self,
        axis: Axis,
        src: &FieldHandle,
        table: &TableHandle,
        out: &mut [f32],
    ) -> Result<()> {
        let input = self.field(src)?;
        let table = self.table(table)?;
        let grid = src.grid;
        for y in 0..grid.height() {
            for x in 0..grid.width() {
                let (sx, sy) = match axis {
                    Axis::Horizontal => (table[x as usize], y),
                    Axis::Vertical => (x, table[y as usize]),
                };
                let from = grid.index(sx, sy) * 2;
                let to = grid.index(x, y) * 2;
                out[to] = input[from];
                out[to + 1] = input[from + 1];
            }
        }
        Ok(())
    }

    fn merge(
        &mut self,
        components: &ComponentFields,
        outputs: &OutputFields,
        choppiness: f32,
    ) -> Result<()> {
        let handles = [outputs.displacement, outputs.derivatives, outputs.turbulence];
        let mut outs = self.take_all(&handles)?;
        let inputs: Result<Vec<&[f32]>> = components
            .handles()
            .iter()
            .map(|handle| self.field(handle))
            .collect();
        let result = inputs.map(|inputs| {
            let grid = outputs.displacement.grid;
            for i in 0..grid.len() {
                let sample = |field: &[f32]| Complex32::new(field[i * 2], field[i * 2 + 1]);
                let texel = merge_texel(
                    [
                        sample(inputs[0]),
                        sample(inputs[1]),
                        sample(inputs[2]),
                        sample(inputs[3]),
                    ],
                    choppiness,
                );
                outs[0][i * 4..i * 4 + 4].copy_from_slice(&texel.displacement);
                outs[1][i * 4..i * 4 + 4].copy_from_slice(&texel.derivatives);
                outs[2][i] = texel.turbulence;
            }
        });
        self.put_all(&handles, outs);
        result
    }
}

fn check_len(expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(OceanError::DataLength { expected, actual });
    }
    Ok(())
}

fn run_butterfly(
    axis: Axis,
    stage: u32,
    sign: f32,
    grid: GridSize,
    input: &[f32],
    out: &mut [f32],
) {
    for y in 0..grid.height() {
        for x in 0..grid.width() {
            let pos = match axis {
                Axis::Horizontal => x,
                Axis::Vertical => y,
            };
            let value = butterfly(pos, stage, sign, |p| {
                let i = match axis {
                    Axis::Horizontal => grid.index(p, y),
                    Axis::Vertical => grid.index(x, p),
                } * 2;
                Complex32::new(input[i], input[i + 1])
            });
            let i = grid.index(x, y) * 2;
            out[i] = value.re;
            out[i + 1] = value.im;
        }
    }
}

fn static_spectrum(
    settings: &SpectrumSettings,
    grid: GridSize,
    noise: &[f32],
    h0: &mut [f32],
    frequency: &mut [f32],
) {
    for y in 0..grid.height() {
        for x in 0..grid.width() {
            let i = grid.index(x, y);
            let sample = Complex32::new(noise[i * 2], noise[i * 2 + 1]);
            let (amplitude, texel) = spectrum_texel(settings, grid, x, y, sample);
            h0[i * 2] = amplitude.re;
            h0[i * 2 + 1] = amplitude.im;
            frequency[i * 4..i * 4 + 4].copy_from_slice(&texel);
        }
    }
}

fn evolve(grid: GridSize, h0: &[f32], frequency: &[f32], time: f32, outs: &mut [Vec<f32>]) {
    let h0_at = |i: usize| Complex32::new(h0[i * 2], h0[i * 2 + 1]);
    for y in 0..grid.height() {
        for x in 0..grid.width() {
            let i = grid.index(x, y);
            let (mx, my) = grid.mirror(x, y);
            let texel = [
                frequency[i * 4],
                frequency[i * 4 + 1],
                frequency[i * 4 + 2],
                frequency[i * 4 + 3],
            ];
            let packed = evolve_texel(h0_at(i), h0_at(grid.index(mx, my)), texel, time);
            for (out, value) in outs.iter_mut().zip(packed) {
                out[i * 2] = value.re;
                out[i * 2 + 1] = value.im;
            }
        }
    }
}

impl ComputeBackend for CpuBackend {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn create_field(
        &mut self,
        label: &str,
        grid: GridSize,
        format: FieldFormat,
    ) -> Result<FieldHandle> {
        let handle = FieldHandle {
            id: self.allocate_id(),
            grid,
            format,
        };
        trace!("cpu: field '{}' {} {} as {}", label, grid, format, handle.id);
        self.fields.insert(handle.id, vec![0.0; handle.value_count()]);
        Ok(handle)
    }

    fn create_table(&mut self, label: &str, data: &[u32]) -> Result<TableHandle> {
        let handle = TableHandle {
            id: self.allocate_id(),
            len: data.len() as u32,
        };
        trace!("cpu: table '{}' of {} as {}", label, data.len(), handle.id);
        self.tables.insert(handle.id, data.to_vec());
        Ok(handle)
    }

    fn write_field(&mut self, field: &FieldHandle, data: &[f32]) -> Result<()> {
        if data.len() != field.value_count() {
            return Err(OceanError::DataLength {
                expected: field.value_count(),
                actual: data.len(),
            });
        }
        self.field_mut(field)?.copy_from_slice(data);
        Ok(())
    }

    fn read_field(&self, field: &FieldHandle) -> Result<Vec<f32>> {
        self.field(field).map(<[f32]>::to_vec)
    }

    fn submit(&mut self, graph: &CommandGraph) -> Result<()> {
        graph.validate()?;
        trace!("cpu: executing '{}' ({} nodes)", graph.label(), graph.len());
        for node in graph.nodes() {
            match node {
                Node::Dispatch(kernel) => self.execute(kernel)?,
                // Execution is already serial
                Node::Barrier(_) => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_checks_length() {
        let mut backend = CpuBackend::new();
        let grid = GridSize::square(4).unwrap();
        let field = backend.create_field("f", grid, FieldFormat::Rg).unwrap();
        assert!(matches!(
            backend.write_field(&field, &[0.0; 31]),
            Err(OceanError::DataLength {
                expected: 32,
                actual: 31
            })
        ));
        assert_eq!(backend.read_field(&field).unwrap(), vec![0.0; 32]);
    }

    #[test]
    fn test_bit_reverse_permutes_rows() {
        let mut backend = CpuBackend::new();
        let grid = GridSize::new(8, 4).unwrap();
        let src = backend.create_field("src", grid, FieldFormat::Rg).unwrap();
        let dst = backend.create_field("dst", grid, FieldFormat::Rg).unwrap();
        let table = backend
            .create_table("table", &crate::fft::bit_reversal_table(8))
            .unwrap();
        let data: Vec<f32> = (0..grid.len()).flat_map(|i| [i as f32, 0.0]).collect();
        backend.write_field(&src, &data).unwrap();

        let mut graph = CommandGraph::new("test");
        graph.dispatch(Kernel::BitReverse {
            axis: Axis::Horizontal,
            src,
            dst,
            table,
        });
        backend.submit(&graph).unwrap();

        let out = backend.read_field(&dst).unwrap();
        let row: Vec<f32> = out[..16].iter().step_by(2).copied().collect();
        assert_eq!(row, vec![0.0, 4.0, 2.0, 6.0, 1.0, 5.0, 3.0, 7.0]);
        // second row keeps its own values
        assert_eq!(out[16], 8.0);
    }

    #[test]
    fn test_unknown_resource_is_reported() {
        let mut backend = CpuBackend::new();
        let mut other = CpuBackend::new();
        let grid = GridSize::square(4).unwrap();
        let _ = other.create_field("a", grid, FieldFormat::Rg).unwrap();
        let foreign = other.create_field("b", grid, FieldFormat::Rg).unwrap();
        assert!(matches!(
            backend.read_field(&foreign),
            Err(OceanError::UnknownResource(_))
        ));
    }

    #[test]
    fn test_incompatible_fields_are_errors() {
        let mut backend = CpuBackend::new();
        let large = backend
            .create_field("large", GridSize::square(8).unwrap(), FieldFormat::Rg)
            .unwrap();
        let small = backend
            .create_field("small", GridSize::square(4).unwrap(), FieldFormat::Rg)
            .unwrap();
        let scalar = backend
            .create_field("scalar", GridSize::square(4).unwrap(), FieldFormat::R)
            .unwrap();

        let mut graph = CommandGraph::new("test");
        graph.dispatch(Kernel::Copy {
            src: large,
            dst: small,
        });
        assert!(matches!(
            backend.submit(&graph),
            Err(OceanError::SizeMismatch { .. })
        ));

        let mut graph = CommandGraph::new("test");
        graph.dispatch(Kernel::Modulate { target: scalar });
        assert!(matches!(
            backend.submit(&graph),
            Err(OceanError::FormatMismatch { .. })
        ));
        assert_eq!(backend.read_field(&small).unwrap(), vec![0.0; 32]);
    }

    #[test]
    fn test_handle_must_describe_its_storage() {
        let mut backend = CpuBackend::new();
        let field = backend
            .create_field("f", GridSize::square(4).unwrap(), FieldFormat::Rg)
            .unwrap();
        let relabelled = FieldHandle {
            grid: GridSize::square(8).unwrap(),
            ..field
        };
        assert!(matches!(
            backend.read_field(&relabelled),
            Err(OceanError::DataLength { .. })
        ));

        let mut graph = CommandGraph::new("test");
        graph.dispatch(Kernel::Scale {
            target: relabelled,
            factor: 2.0,
        });
        assert!(backend.submit(&graph).is_err());
        assert!(backend.read_field(&field).is_ok());
    }

    #[test]
    fn test_failed_kernel_keeps_destination() {
        let mut backend = CpuBackend::new();
        let grid = GridSize::square(4).unwrap();
        let dst = backend.create_field("dst", grid, FieldFormat::Rg).unwrap();
        let missing = FieldHandle {
            id: ResourceId(99),
            ..dst
        };
        let mut graph = CommandGraph::new("test");
        graph.dispatch(Kernel::Copy { src: missing, dst });
        assert!(backend.submit(&graph).is_err());
        assert!(backend.read_field(&dst).is_ok());
    }
}
