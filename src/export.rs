//! PNG previews of simulation fields.

use std::path::Path;

use image::{GrayImage, Luma, Rgb, RgbImage};

use crate::error::{OceanError, Result};
use crate::grid::{FieldFormat, GridSize};

/// Min/max of a channel, widened so a constant field maps to mid-gray
fn value_range(values: impl Iterator<Item = f32>) -> (f32, f32) {
    let (min, max) = values
        .filter(|v| v.is_finite())
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
    if !min.is_finite() || max - min <= f32::EPSILON {
        let centre = if min.is_finite() { min } else { 0.0 };
        (centre - 1.0, centre + 1.0)
    } else {
        (min, max)
    }
}

fn to_byte(value: f32, (min, max): (f32, f32)) -> u8 {
    ((value - min) / (max - min) * 255.0).clamp(0.0, 255.0) as u8
}

fn check_len(data: &[f32], grid: GridSize, format: FieldFormat) -> Result<()> {
    let expected = grid.len() * format.channels();
    if data.len() != expected {
        return Err(OceanError::DataLength {
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}

/// Grayscale image of one channel, normalized to its own range
pub fn channel_image(
    data: &[f32],
    grid: GridSize,
    format: FieldFormat,
    channel: usize,
) -> Result<GrayImage> {
    check_len(data, grid, format)?;
    let stride = format.channels();
    let channel = channel.min(stride - 1);
    let range = value_range(data.iter().skip(channel).step_by(stride).copied());

    let mut img = GrayImage::new(grid.width(), grid.height());
    for y in 0..grid.height() {
        for x in 0..grid.width() {
            let value = data[grid.index(x, y) * stride + channel];
            img.put_pixel(x, y, Luma([to_byte(value, range)]));
        }
    }
    Ok(img)
}

/// Grayscale image of complex magnitudes from an RG field
pub fn magnitude_image(data: &[f32], grid: GridSize) -> Result<GrayImage> {
    check_len(data, grid, FieldFormat::Rg)?;
    let magnitudes: Vec<f32> = data
        .chunks_exact(2)
        .map(|c| (c[0] * c[0] + c[1] * c[1]).sqrt())
        .collect();
    channel_image(&magnitudes, grid, FieldFormat::R, 0)
}

/// RGB image of the first three channels of an RGBA field, each normalized separately
pub fn rgb_image(data: &[f32], grid: GridSize) -> Result<RgbImage> {
    check_len(data, grid, FieldFormat::Rgba)?;
    let ranges: Vec<(f32, f32)> = (0..3)
        .map(|c| value_range(data.iter().skip(c).step_by(4).copied()))
        .collect();

    let mut img = RgbImage::new(grid.width(), grid.height());
    for y in 0..grid.height() {
        for x in 0..grid.width() {
            let i = grid.index(x, y) * 4;
            img.put_pixel(
                x,
                y,
                Rgb([
                    to_byte(data[i], ranges[0]),
                    to_byte(data[i + 1], ranges[1]),
                    to_byte(data[i + 2], ranges[2]),
                ]),
            );
        }
    }
    Ok(img)
}

/// Write the height channel of a displacement field
pub fn save_height(path: &Path, displacement: &[f32], grid: GridSize) -> Result<()> {
    channel_image(displacement, grid, FieldFormat::Rgba, 1)?.save(path)?;
    Ok(())
}

pub fn save_rgb(path: &Path, data: &[f32], grid: GridSize) -> Result<()> {
    rgb_image(data, grid)?.save(path)?;
    Ok(())
}

pub fn save_scalar(path: &Path, data: &[f32], grid: GridSize) -> Result<()> {
    channel_image(data, grid, FieldFormat::R, 0)?.save(path)?;
    Ok(())
}

pub fn save_magnitude(path: &Path, data: &[f32], grid: GridSize) -> Result<()> {
    magnitude_image(data, grid)?.save(path)?;
    Ok(())
}
