//! Static wave spectrum: Gaussian noise, JONSWAP energy model and dispersion relation.
//!
//! Everything here runs at initialization or when wave parameters change,
//! never per frame.

use std::f32::consts::PI;

use glam::Vec2;
use rand::Rng;
use rustfft::num_complex::Complex32;

use crate::grid::GridSize;
use crate::params::WaveParameters;

/// Wave vectors shorter than this carry no energy (DC cutoff)
pub const K_EPSILON: f32 = 1e-4;

/// Guard for divisions by wind speed, fetch, gravity and frequency
const EPSILON: f32 = 1e-6;

/// JONSWAP peak enhancement factor
const JONSWAP_GAMMA: f32 = 3.3;

/// `k * depth` beyond which `tanh` is 1 to f32 precision
const MAX_KH: f32 = 20.0;

/// Inputs of the static spectrum kernel
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SpectrumSettings {
    pub waves: WaveParameters,
    /// Physical extent of the grid along x (meters)
    pub length: f32,
}

impl SpectrumSettings {
    /// Physical extents `(Lx, Lz)`; cells stay square on rectangular grids
    pub fn extent(&self, grid: GridSize) -> Vec2 {
        Vec2::new(
            self.length,
            self.length * grid.height() as f32 / grid.width() as f32,
        )
    }

    /// Wave-number spacing `(Δkx, Δkz)`
    pub fn delta_k(&self, grid: GridSize) -> Vec2 {
        Vec2::splat(2.0 * PI) / self.extent(grid)
    }

    /// Wave vector of cell `(x, y)` in the centred layout
    pub fn wave_vector(&self, grid: GridSize, x: u32, y: u32) -> Vec2 {
        let n = x as f32 - (grid.width() / 2) as f32;
        let m = y as f32 - (grid.height() / 2) as f32;
        Vec2::new(n, m) * self.delta_k(grid)
    }
}

/// One complex standard-normal sample via Box–Muller
pub fn gaussian_pair<R: Rng + ?Sized>(rng: &mut R) -> Complex32 {
    let u1: f32 = rng.gen_range(f32::EPSILON..1.0);
    let u2: f32 = rng.gen();
    let radius = (-2.0 * u1.ln()).sqrt();
    let angle = 2.0 * PI * u2;
    Complex32::new(radius * angle.cos(), radius * angle.sin())
}

/// Interleaved `(re, im)` noise for every cell of `grid`
pub fn generate_noise<R: Rng + ?Sized>(rng: &mut R, grid: GridSize) -> Vec<f32> {
    let mut data = Vec::with_capacity(grid.len() * 2);
    for _ in 0..grid.len() {
        let sample = gaussian_pair(rng);
        data.push(sample.re);
        data.push(sample.im);
    }
    data
}

fn is_deep(depth: f32) -> bool {
    !depth.is_finite() || depth <= 0.0
}

/// Angular frequency of a gravity wave with wave number `k`
pub fn dispersion(k: f32, gravity: f32, depth: f32) -> f32 {
    if gravity <= EPSILON || k <= 0.0 {
        return 0.0;
    }
    if is_deep(depth) {
        (gravity * k).sqrt()
    } else {
        (gravity * k * (k * depth).min(MAX_KH).tanh()).sqrt()
    }
}

/// `dω/dk` of [`dispersion`]
pub fn dispersion_derivative(k: f32, gravity: f32, depth: f32) -> f32 {
    let omega = dispersion(k, gravity, depth);
    if omega <= EPSILON {
        return 0.0;
    }
    if is_deep(depth) {
        gravity / (2.0 * omega)
    } else {
        let kh = (k * depth).min(MAX_KH);
        let cosh = kh.cosh();
        gravity * (kh.tanh() + kh / (cosh * cosh)) / (2.0 * omega)
    }
}

/// JONSWAP frequency spectrum `S(ω)` for fetch-limited wind seas
pub fn jonswap(omega: f32, waves: &WaveParameters) -> f32 {
    let u = waves.wind_speed;
    let fetch = waves.fetch;
    let g = waves.gravity;
    if u <= EPSILON || fetch <= EPSILON || g <= EPSILON || omega <= EPSILON {
        return 0.0;
    }

    let alpha = 0.076 * (u * u / (fetch * g)).powf(0.22);
    let peak = 22.0 * (g * g / (u * fetch)).powf(1.0 / 3.0);

    let decay = (-1.25 * (peak / omega).powi(4)).exp();
    if decay == 0.0 {
        return 0.0;
    }

    let sigma = if omega <= peak { 0.07 } else { 0.09 };
    let r = (-(omega - peak).powi(2) / (2.0 * sigma * sigma * peak * peak)).exp();

    alpha * g * g / omega.powi(5) * decay * JONSWAP_GAMMA.powf(r)
}

/// Finite-depth (TMA) attenuation of a deep-water spectrum
pub fn depth_attenuation(omega: f32, gravity: f32, depth: f32) -> f32 {
    if is_deep(depth) || gravity <= EPSILON {
        return 1.0;
    }
    let omega_h = omega * (depth / gravity).sqrt();
    if omega_h <= 1.0 {
        0.5 * omega_h * omega_h
    } else if omega_h < 2.0 {
        1.0 - 0.5 * (2.0 - omega_h).powi(2)
    } else {
        1.0
    }
}

/// `cos²` spreading around the wind, normalized over the full circle
pub fn directional_spread(theta: f32, wind_angle: f32) -> f32 {
    let c = (theta - wind_angle).cos();
    c * c / PI
}

/// Energy density per unit wave-vector area
pub fn wave_vector_density(waves: &WaveParameters, k: Vec2) -> f32 {
    let k_len = k.length();
    if k_len < K_EPSILON {
        return 0.0;
    }
    let omega = dispersion(k_len, waves.gravity, waves.depth);
    let d_omega = dispersion_derivative(k_len, waves.gravity, waves.depth);
    let theta = k.y.atan2(k.x);

    jonswap(omega, waves)
        * depth_attenuation(omega, waves.gravity, waves.depth)
        * directional_spread(theta, waves.wind_angle())
        * d_omega
        / k_len
}

/// H0 amplitude and frequency texel `(kx, kz, |k|, ω)` for one cell
pub fn spectrum_texel(
    settings: &SpectrumSettings,
    grid: GridSize,
    x: u32,
    y: u32,
    noise: Complex32,
) -> (Complex32, [f32; 4]) {
    let waves = &settings.waves;
    let k = settings.wave_vector(grid, x, y);
    let k_len = k.length();
    let zero = Complex32::new(0.0, 0.0);

    if k_len < K_EPSILON {
        return (zero, [k.x, k.y, k_len, 0.0]);
    }

    let omega = dispersion(k_len, waves.gravity, waves.depth);
    let frequency = [k.x, k.y, k_len, omega];

    // The Nyquist row and column have no conjugate partner
    if x == 0 || y == 0 {
        return (zero, frequency);
    }

    let dk = settings.delta_k(grid);
    let density = wave_vector_density(waves, k);
    let amplitude =
        (density * dk.x * dk.y * 0.5).max(0.0).sqrt() * waves.wave_amplitude.max(0.0).sqrt();

    (noise * amplitude, frequency)
}
