//! Lattice dimensions shared by every spectral and spatial field.

use std::fmt;

use crate::error::{OceanError, Result};

/// Smallest axis length the radix-2 FFT accepts
pub const MIN_FFT_SIZE: u32 = 4;

/// Threads per workgroup along each axis (matches `@workgroup_size(8, 8)` in the shaders)
pub const WORKGROUP_SIZE: u32 = 8;

/// Transform axis
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Axis {
    /// Along x (rows)
    Horizontal,
    /// Along y (columns)
    Vertical,
}

impl Axis {
    pub fn index(self) -> u32 {
        match self {
            Axis::Horizontal => 0,
            Axis::Vertical => 1,
        }
    }
}

/// Channel layout of a field
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FieldFormat {
    /// One f32 per cell
    R,
    /// Two f32 per cell (complex real, imaginary)
    Rg,
    /// Four f32 per cell
    Rgba,
}

impl FieldFormat {
    pub fn channels(self) -> usize {
        match self {
            FieldFormat::R => 1,
            FieldFormat::Rg => 2,
            FieldFormat::Rgba => 4,
        }
    }
}

impl fmt::Display for FieldFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldFormat::R => "R32Float",
            FieldFormat::Rg => "RG32Float",
            FieldFormat::Rgba => "RGBA32Float",
        };
        f.write_str(name)
    }
}

/// Validated grid dimensions: both axes are powers of two no smaller than [`MIN_FFT_SIZE`].
///
/// Square grids are the `width == height` case; nothing downstream assumes squareness.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GridSize {
    width: u32,
    height: u32,
}

impl GridSize {
    /// Validate and create a grid. Invalid sizes are rejected, never rounded.
    pub fn new(width: u32, height: u32) -> Result<Self> {
        let valid = |n: u32| n >= MIN_FFT_SIZE && n.is_power_of_two();
        if !valid(width) || !valid(height) {
            return Err(OceanError::InvalidSize {
                width,
                height,
                min: MIN_FFT_SIZE,
            });
        }
        Ok(Self { width, height })
    }

    /// Square grid of side `size`
    pub fn square(size: u32) -> Result<Self> {
        Self::new(size, size)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn is_square(&self) -> bool {
        self.width == self.height
    }

    /// Total number of cells
    pub fn len(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Always false for a validated grid
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Samples along `axis`
    pub fn axis_len(&self, axis: Axis) -> u32 {
        match axis {
            Axis::Horizontal => self.width,
            Axis::Vertical => self.height,
        }
    }

    /// Butterfly passes needed along `axis`
    pub fn log2(&self, axis: Axis) -> u32 {
        self.axis_len(axis).trailing_zeros()
    }

    /// Row-major cell index
    pub fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    /// Cell holding the negated wave vector in the centred frequency layout
    pub fn mirror(&self, x: u32, y: u32) -> (u32, u32) {
        ((self.width - x) % self.width, (self.height - y) % self.height)
    }

    /// Workgroup counts, each derived from its own axis length
    pub fn workgroups(&self) -> (u32, u32) {
        (
            self.width.div_ceil(WORKGROUP_SIZE).max(1),
            self.height.div_ceil(WORKGROUP_SIZE).max(1),
        )
    }
}

impl fmt::Display for GridSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}
