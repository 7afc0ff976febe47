//! Per-frame wave evolution and field merging.
//!
//! The evolver turns the static spectrum into four packed component spectra.
//! Each packs two real-valued spatial quantities as `a + i·b`, so after the
//! inverse FFT `a` is the real part and `b` the imaginary part.

use rustfft::num_complex::Complex32;

use crate::graph::{FieldHandle, ResourceId};
use crate::spectrum::K_EPSILON;

/// The four frequency-domain component fields, consumed by the inverse FFT
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ComponentFields {
    /// Height `Dy` + i·`∂Dx/∂z`
    pub dy_dxz: FieldHandle,
    /// Choppiness `Dx` + i·`Dz`
    pub dx_dz: FieldHandle,
    /// Slopes `∂Dy/∂x` + i·`∂Dy/∂z`
    pub dyx_dyz: FieldHandle,
    /// `∂Dx/∂x` + i·`∂Dz/∂z`
    pub dxx_dzz: FieldHandle,
}

impl ComponentFields {
    pub fn handles(&self) -> [FieldHandle; 4] {
        [self.dy_dxz, self.dx_dz, self.dyx_dyz, self.dxx_dzz]
    }

    pub fn ids(&self) -> [ResourceId; 4] {
        self.handles().map(|h| h.id)
    }
}

/// Spatial-domain outputs, overwritten every frame
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OutputFields {
    /// `(λ·Dx, Dy, λ·Dz, 0)` offsets from the reference plane
    pub displacement: FieldHandle,
    /// `(∂Dy/∂x, ∂Dy/∂z, λ·∂Dx/∂x, λ·∂Dz/∂z)`
    pub derivatives: FieldHandle,
    /// Jacobian determinant of the horizontal displacement; below 1 where the surface folds
    pub turbulence: FieldHandle,
}

impl OutputFields {
    pub fn ids(&self) -> [ResourceId; 3] {
        [
            self.displacement.id,
            self.derivatives.id,
            self.turbulence.id,
        ]
    }
}

/// `h(k, t) = H0(k)·e^{iωt} + conj(H0(-k))·e^{-iωt}`
///
/// Hermitian in `k`, so the spatial field it transforms to is real.
pub fn time_evolved_amplitude(
    h0_k: Complex32,
    h0_minus_k: Complex32,
    omega: f32,
    time: f32,
) -> Complex32 {
    let phase = omega * time;
    let rotation = Complex32::new(phase.cos(), phase.sin());
    h0_k * rotation + h0_minus_k.conj() * rotation.conj()
}

/// `a + i·b`
fn pack(a: Complex32, b: Complex32) -> Complex32 {
    Complex32::new(a.re - b.im, a.im + b.re)
}

/// Component spectra for one cell, in [`ComponentFields`] order.
///
/// `frequency` is the `(kx, kz, |k|, ω)` texel from the static spectrum.
pub fn evolve_texel(
    h0_k: Complex32,
    h0_minus_k: Complex32,
    frequency: [f32; 4],
    time: f32,
) -> [Complex32; 4] {
    let [kx, kz, k_len, omega] = frequency;
    let h = time_evolved_amplitude(h0_k, h0_minus_k, omega, time);
    let ih = Complex32::new(-h.im, h.re);
    let inv_k = if k_len < K_EPSILON { 0.0 } else { 1.0 / k_len };

    let dx = ih * (kx * inv_k);
    let dz = ih * (kz * inv_k);
    let dyx = ih * kx;
    let dyz = ih * kz;
    let dxx = -h * (kx * kx * inv_k);
    let dzz = -h * (kz * kz * inv_k);
    let dxz = -h * (kx * kz * inv_k);

    [pack(h, dxz), pack(dx, dz), pack(dyx, dyz), pack(dxx, dzz)]
}

/// Output texels for one cell
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MergedTexel {
    pub displacement: [f32; 4],
    pub derivatives: [f32; 4],
    pub turbulence: f32,
}

/// Combine spatial-domain component samples (in [`ComponentFields`] order)
pub fn merge_texel(components: [Complex32; 4], choppiness: f32) -> MergedTexel {
    let [dy_dxz, dx_dz, dyx_dyz, dxx_dzz] = components;
    let lambda = choppiness;

    let jacobian = (1.0 + lambda * dxx_dzz.re) * (1.0 + lambda * dxx_dzz.im)
        - lambda * lambda * dy_dxz.im * dy_dxz.im;

    MergedTexel {
        displacement: [lambda * dx_dz.re, dy_dxz.re, lambda * dx_dz.im, 0.0],
        derivatives: [
            dyx_dyz.re,
            dyx_dyz.im,
            lambda * dxx_dzz.re,
            lambda * dxx_dzz.im,
        ],
        turbulence: jacobian,
    }
}
