//! 2D radix-2 FFT recorded as compute dispatches.
//!
//! Decimation-in-time per axis: bit-reversal scatter, then `log2(n)` butterfly
//! passes, horizontal axis first. The working buffer and the engine's single
//! scratch buffer form a two-slot arena; every pass reads slot `current` and
//! writes slot `current ^ 1`, so no pass reads and writes the same buffer.
//!
//! The frequency layout is centred (zero frequency at `(width/2, height/2)`).
//! That is the `(-1)^(x+y)` modulation of the spatial signal, applied before
//! the forward transform and after the inverse one, which keeps
//! forward-then-inverse the identity.

use std::f32::consts::PI;

use log::debug;
use rustfft::num_complex::Complex32;

use crate::backend::ComputeBackend;
use crate::error::{OceanError, Result};
use crate::graph::{CommandGraph, Direction, FieldHandle, Kernel, TableHandle};
use crate::grid::{Axis, FieldFormat, GridSize};

/// Reversed-index table for an axis of length `len` (a power of two).
///
/// Built with the recurrence `rev[i] = rev[i >> 1] >> 1 | (i & 1) * (len >> 1)`.
pub fn bit_reversal_table(len: u32) -> Vec<u32> {
    let mut table = vec![0u32; len as usize];
    for i in 1..len {
        table[i as usize] = table[(i >> 1) as usize] >> 1 | (i & 1) * (len >> 1);
    }
    table
}

/// Output of one butterfly pass at position `pos` of its axis.
///
/// Blocks of `2^(stage+1)` samples combine their lower and upper halves with
/// the twiddle `exp(sign * 2πi * k / span)`.
pub(crate) fn butterfly(
    pos: u32,
    stage: u32,
    sign: f32,
    sample: impl Fn(u32) -> Complex32,
) -> Complex32 {
    let half = 1u32 << stage;
    let span = half << 1;
    let j = pos & (span - 1);
    let k = j & (half - 1);
    let even_pos = pos - j + k;
    let angle = sign * 2.0 * PI * k as f32 / span as f32;
    let twiddle = Complex32::new(angle.cos(), angle.sin());
    let even = sample(even_pos);
    let odd = twiddle * sample(even_pos + half);
    if j < half {
        even + odd
    } else {
        even - odd
    }
}

/// `(-1)^(x+y)`
pub(crate) fn checkerboard(x: u32, y: u32) -> f32 {
    if (x + y) & 1 == 0 {
        1.0
    } else {
        -1.0
    }
}

/// 2D FFT engine bound to one grid size
///
/// Owns one scratch field and the two bit-reversal tables. Calls on the same
/// engine share the scratch field, so they are serialized through the
/// `&mut` backend borrow or by recording them into one graph in order.
#[derive(Clone, Debug)]
pub struct Fft2d {
    grid: GridSize,
    scratch: FieldHandle,
    horizontal_table: TableHandle,
    vertical_table: TableHandle,
}

impl Fft2d {
    /// Allocate the scratch field and upload both bit-reversal tables
    pub fn new<B: ComputeBackend + ?Sized>(backend: &mut B, grid: GridSize) -> Result<Self> {
        let scratch = backend.create_field("fft.scratch", grid, FieldFormat::Rg)?;
        let horizontal_table = backend.create_table(
            "fft.bitrev.horizontal",
            &bit_reversal_table(grid.width()),
        )?;
        let vertical_table =
            backend.create_table("fft.bitrev.vertical", &bit_reversal_table(grid.height()))?;
        debug!(
            "FFT engine {} on {}: {} butterfly passes",
            grid,
            backend.name(),
            grid.log2(Axis::Horizontal) + grid.log2(Axis::Vertical)
        );
        Ok(Self {
            grid,
            scratch,
            horizontal_table,
            vertical_table,
        })
    }

    pub fn grid(&self) -> GridSize {
        self.grid
    }

    /// Forward transform of `buffer`, submitted immediately
    pub fn forward<B: ComputeBackend + ?Sized>(
        &self,
        backend: &mut B,
        buffer: &FieldHandle,
    ) -> Result<()> {
        let mut graph = CommandGraph::new("fft.forward");
        self.record_forward(&mut graph, buffer)?;
        backend.submit(&graph)
    }

    /// Inverse transform of `buffer`, submitted immediately
    pub fn inverse<B: ComputeBackend + ?Sized>(
        &self,
        backend: &mut B,
        buffer: &FieldHandle,
        normalize: bool,
    ) -> Result<()> {
        let mut graph = CommandGraph::new("fft.inverse");
        self.record_inverse(&mut graph, buffer, normalize)?;
        backend.submit(&graph)
    }

    /// Record a forward transform into a deferred command graph
    pub fn record_forward(&self, graph: &mut CommandGraph, buffer: &FieldHandle) -> Result<()> {
        self.check(buffer)?;
        graph.dispatch(Kernel::Modulate { target: *buffer });
        self.record_passes(graph, buffer, Direction::Forward);
        Ok(())
    }

    /// Record an inverse transform into a deferred command graph.
    ///
    /// With `normalize` the result is divided by the total sample count;
    /// without it the caller owns the scale.
    pub fn record_inverse(
        &self,
        graph: &mut CommandGraph,
        buffer: &FieldHandle,
        normalize: bool,
    ) -> Result<()> {
        self.check(buffer)?;
        self.record_passes(graph, buffer, Direction::Inverse);
        graph.dispatch(Kernel::Modulate { target: *buffer });
        if normalize {
            graph.dispatch(Kernel::Scale {
                target: *buffer,
                factor: 1.0 / self.grid.len() as f32,
            });
        }
        Ok(())
    }

    fn check(&self, buffer: &FieldHandle) -> Result<()> {
        if buffer.grid != self.grid {
            return Err(OceanError::SizeMismatch {
                expected: self.grid,
                actual: buffer.grid,
            });
        }
        if buffer.format != FieldFormat::Rg {
            return Err(OceanError::FormatMismatch {
                expected: FieldFormat::Rg,
                actual: buffer.format,
            });
        }
        Ok(())
    }

    fn record_passes(&self, graph: &mut CommandGraph, buffer: &FieldHandle, direction: Direction) {
        let arena = [*buffer, self.scratch];
        let mut current = 0usize;

        for (axis, table) in [
            (Axis::Horizontal, self.horizontal_table),
            (Axis::Vertical, self.vertical_table),
        ] {
            graph.dispatch(Kernel::BitReverse {
                axis,
                src: arena[current],
                dst: arena[current ^ 1],
                table,
            });
            current ^= 1;

            for stage in 0..self.grid.log2(axis) {
                graph.dispatch(Kernel::Butterfly {
                    axis,
                    stage,
                    direction,
                    src: arena[current],
                    dst: arena[current ^ 1],
                });
                current ^= 1;
            }
        }

        if current == 1 {
            graph.dispatch(Kernel::Copy {
                src: self.scratch,
                dst: *buffer,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::CpuBackend;
    use crate::graph::{KernelKind, Node};

    fn reverse_bits(i: u32, bits: u32) -> u32 {
        i.reverse_bits() >> (32 - bits)
    }

    #[test]
    fn test_bit_reversal_table_eight() {
        assert_eq!(bit_reversal_table(8), vec![0, 4, 2, 6, 1, 5, 3, 7]);
    }

    #[test]
    fn test_bit_reversal_matches_direct_computation() {
        for len in [8u32, 16, 256] {
            let bits = len.trailing_zeros();
            let table = bit_reversal_table(len);
            for (i, &rev) in table.iter().enumerate() {
                assert_eq!(rev, reverse_bits(i as u32, bits), "len {} index {}", len, i);
            }
        }
    }

    #[test]
    fn test_butterfly_first_stage_is_sum_and_difference() {
        let samples = [Complex32::new(1.0, 0.0), Complex32::new(3.0, 0.0)];
        let lower = butterfly(0, 0, -1.0, |p| samples[p as usize]);
        let upper = butterfly(1, 0, -1.0, |p| samples[p as usize]);
        assert!((lower - Complex32::new(4.0, 0.0)).norm() < 1e-6);
        assert!((upper - Complex32::new(-2.0, 0.0)).norm() < 1e-6);
    }

    #[test]
    fn test_recorded_passes_end_in_working_buffer() {
        let mut backend = CpuBackend::new();
        for (w, h) in [(8, 8), (16, 8), (4, 32)] {
            let grid = GridSize::new(w, h).unwrap();
            let fft = Fft2d::new(&mut backend, grid).unwrap();
            let buffer = backend.create_field("buffer", grid, FieldFormat::Rg).unwrap();

            let mut graph = CommandGraph::new("test");
            fft.record_inverse(&mut graph, &buffer, true).unwrap();
            graph.validate().unwrap();

            let butterflies = graph
                .kernels()
                .filter(|k| k.kind() == KernelKind::Butterfly)
                .count() as u32;
            assert_eq!(butterflies, grid.log2(Axis::Horizontal) + grid.log2(Axis::Vertical));

            // Last writes before modulate/scale must land in the caller's buffer
            let last_pass = graph
                .kernels()
                .filter(|k| {
                    matches!(
                        k.kind(),
                        KernelKind::Butterfly | KernelKind::Copy | KernelKind::BitReverse
                    )
                })
                .last()
                .unwrap();
            assert_eq!(last_pass.writes(), vec![buffer.id]);
            assert!(matches!(
                graph.nodes().last(),
                Some(Node::Dispatch(Kernel::Scale { .. }))
            ));
        }
    }

    #[test]
    fn test_rejects_mismatched_field() {
        let mut backend = CpuBackend::new();
        let fft = Fft2d::new(&mut backend, GridSize::square(16).unwrap()).unwrap();
        let other = backend
            .create_field("other", GridSize::square(32).unwrap(), FieldFormat::Rg)
            .unwrap();
        let mut graph = CommandGraph::new("test");
        assert!(matches!(
            fft.record_forward(&mut graph, &other),
            Err(OceanError::SizeMismatch { .. })
        ));

        let rgba = backend
            .create_field("rgba", GridSize::square(16).unwrap(), FieldFormat::Rgba)
            .unwrap();
        assert!(matches!(
            fft.record_forward(&mut graph, &rgba),
            Err(OceanError::FormatMismatch { .. })
        ));
    }

    #[test]
    fn test_small_round_trip() {
        let mut backend = CpuBackend::new();
        let grid = GridSize::square(4).unwrap();
        let fft = Fft2d::new(&mut backend, grid).unwrap();
        let buffer = backend.create_field("buffer", grid, FieldFormat::Rg).unwrap();
        let input: Vec<f32> = (0..32).map(|i| (i as f32 * 0.37).sin()).collect();
        backend.write_field(&buffer, &input).unwrap();

        fft.forward(&mut backend, &buffer).unwrap();
        fft.inverse(&mut backend, &buffer, true).unwrap();

        let output = backend.read_field(&buffer).unwrap();
        for (a, b) in input.iter().zip(&output) {
            assert!((a - b).abs() < 1e-5, "{} vs {}", a, b);
        }
    }
}
