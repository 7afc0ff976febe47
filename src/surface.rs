//! Reference plane the displacement field is applied to.

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

use crate::error::{OceanError, Result};
use crate::grid::GridSize;

/// Vertex data for the ocean mesh (position + UV coordinates)
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub uv: [f32; 2],
}

/// Flat XZ plane with one vertex per field cell, centred on the origin
#[derive(Clone, Debug)]
pub struct ReferencePlane {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    grid: GridSize,
}

impl ReferencePlane {
    /// Plane of `length_x × length_z` meters sampled on `grid`
    pub fn new(grid: GridSize, length_x: f32, length_z: f32) -> Self {
        let width = grid.width() as usize;
        let height = grid.height() as usize;
        let offset_x = (width / 2) as f32 - 0.5;
        let offset_z = (height / 2) as f32 - 0.5;
        let spacing_x = length_x / width as f32;
        let spacing_z = length_z / height as f32;

        let mut vertices = Vec::with_capacity(grid.len());
        for z in 0..height {
            for x in 0..width {
                vertices.push(Vertex {
                    position: [
                        (x as f32 - offset_x) * spacing_x,
                        0.0,
                        (z as f32 - offset_z) * spacing_z,
                    ],
                    uv: [x as f32 / width as f32, z as f32 / height as f32],
                });
            }
        }

        // Counter-clockwise winding, two triangles per quad
        let mut indices = Vec::with_capacity((width - 1) * (height - 1) * 6);
        for z in 0..height - 1 {
            for x in 0..width - 1 {
                let top_left = (z * width + x) as u32;
                let top_right = top_left + 1;
                let bottom_left = top_left + width as u32;
                let bottom_right = bottom_left + 1;

                indices.extend_from_slice(&[
                    top_left,
                    bottom_left,
                    top_right,
                    top_right,
                    bottom_left,
                    bottom_right,
                ]);
            }
        }

        Self {
            vertices,
            indices,
            grid,
        }
    }

    pub fn grid(&self) -> GridSize {
        self.grid
    }

    /// Vertex positions offset by an RGBA displacement field
    pub fn displaced_positions(&self, displacement: &[f32]) -> Result<Vec<Vec3>> {
        self.check_rgba(displacement)?;
        Ok(self
            .vertices
            .iter()
            .zip(displacement.chunks_exact(4))
            .map(|(vertex, d)| Vec3::from_array(vertex.position) + Vec3::new(d[0], d[1], d[2]))
            .collect())
    }

    /// Surface normals from an RGBA derivatives field
    ///
    /// Slopes are divided by the horizontal compression `1 + λ·∂D/∂x` so
    /// choppy crests lean the same way as the displaced geometry.
    pub fn normals(&self, derivatives: &[f32]) -> Result<Vec<Vec3>> {
        self.check_rgba(derivatives)?;
        Ok(derivatives
            .chunks_exact(4)
            .map(|d| {
                let slope_x = d[0] / (1.0 + d[2]).max(f32::EPSILON);
                let slope_z = d[1] / (1.0 + d[3]).max(f32::EPSILON);
                Vec3::new(-slope_x, 1.0, -slope_z).normalize()
            })
            .collect())
    }

    fn check_rgba(&self, field: &[f32]) -> Result<()> {
        let expected = self.vertices.len() * 4;
        if field.len() != expected {
            return Err(OceanError::DataLength {
                expected,
                actual: field.len(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plane_layout() {
        let grid = GridSize::new(8, 4).unwrap();
        let plane = ReferencePlane::new(grid, 16.0, 8.0);
        assert_eq!(plane.vertices.len(), 32);
        assert_eq!(plane.indices.len(), 7 * 3 * 6);
        assert!(plane.indices.iter().all(|&i| (i as usize) < plane.vertices.len()));

        // Centred: x spans [-3.5, 3.5] cells of 2 m
        assert_eq!(plane.vertices[0].position, [-7.0, 0.0, -3.0]);
        assert_eq!(plane.vertices[31].position, [7.0, 0.0, 3.0]);
        assert_eq!(plane.vertices[9].uv, [0.125, 0.25]);
    }

    #[test]
    fn test_displacement_offsets_vertices() {
        let grid = GridSize::square(4).unwrap();
        let plane = ReferencePlane::new(grid, 4.0, 4.0);
        let mut field = vec![0.0; 16 * 4];
        field[5 * 4..5 * 4 + 4].copy_from_slice(&[0.5, 2.0, -0.25, 0.0]);

        let positions = plane.displaced_positions(&field).unwrap();
        let rest = Vec3::from_array(plane.vertices[5].position);
        assert_eq!(positions[5], rest + Vec3::new(0.5, 2.0, -0.25));
        assert_eq!(positions[0], Vec3::from_array(plane.vertices[0].position));

        assert!(matches!(
            plane.displaced_positions(&field[..8]),
            Err(OceanError::DataLength { .. })
        ));
    }

    #[test]
    fn test_flat_derivatives_point_up() {
        let plane = ReferencePlane::new(GridSize::square(4).unwrap(), 4.0, 4.0);
        let normals = plane.normals(&vec![0.0; 64]).unwrap();
        assert!(normals.iter().all(|n| *n == Vec3::Y));

        let mut tilted = vec![0.0; 64];
        tilted[0] = 1.0;
        let n = plane.normals(&tilted).unwrap()[0];
        assert!(n.x < 0.0 && n.y > 0.0);
    }
}
