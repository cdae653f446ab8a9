//! Temporal blend and variance-weighted bilateral filter over the
//! accumulated image.

use crate::accum::Accumulator;
use glam::Vec3;

pub const MIN_ALPHA: f32 = 0.05;
pub const SIGMA_SPATIAL: f32 = 1.0;
pub const SIGMA_COLOR: f32 = 0.25;

const LUMA: Vec3 = Vec3::new(0.2126, 0.7152, 0.0722);

pub fn luminance(color: Vec3) -> f32 {
    color.dot(LUMA)
}

/// Blend factor of the temporal filter for a pixel with `n` samples.
pub fn temporal_alpha(n: u32) -> f32 {
    (1.0 / n as f32).clamp(MIN_ALPHA, 1.0)
}

/// Move `previous` towards `current`. A pixel without samples keeps the
/// previous value.
pub fn temporal_blend(previous: Vec3, current: Vec3, n: u32) -> Vec3 {
    if n == 0 {
        previous
    } else {
        previous + (current - previous) * temporal_alpha(n)
    }
}

/// Kernel weight of a neighbor at squared pixel distance `distance2`.
pub fn bilateral_weight(
    distance2: f32,
    center: Vec3,
    neighbor: Vec3,
    variance_center: f32,
    variance_neighbor: f32,
) -> f32 {
    let spatial = (-distance2 / (2.0 * SIGMA_SPATIAL * SIGMA_SPATIAL)).exp();
    let dl = luminance(center) - luminance(neighbor);
    let range = (-(dl * dl) / (2.0 * SIGMA_COLOR * SIGMA_COLOR)).exp();
    let variance = 1.0 / (1.0 + (variance_center + variance_neighbor) * 0.5);
    spatial * range * variance
}

#[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum DenoiseLevel {
    #[default]
    Off,
    Temporal,
    TemporalSpatial,
}

impl DenoiseLevel {
    pub fn from_config(level: u32) -> Self {
        match level {
            0 => Self::Off,
            1 => Self::Temporal,
            _ => Self::TemporalSpatial,
        }
    }
}

#[derive(Debug, Default)]
pub struct Denoiser {
    history: Vec<Vec3>,
    output: Vec<Vec3>,
}

impl Denoiser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn output(&self) -> &[Vec3] {
        &self.output
    }

    pub fn reset(&mut self) {
        self.history.clear();
        self.output.clear();
    }

    /// Filter the accumulator into `output()`.
    #[profiling::function]
    pub fn apply(&mut self, accumulator: &Accumulator, level: DenoiseLevel) -> &[Vec3] {
        let means = accumulator.means();
        if self.history.len() != means.len() {
            self.history = means.to_vec();
        }
        match level {
            DenoiseLevel::Off => {
                self.output.clear();
                self.output.extend_from_slice(means);
            }
            DenoiseLevel::Temporal | DenoiseLevel::TemporalSpatial => {
                self.output.clear();
                self.output.extend(
                    self.history
                        .iter()
                        .zip(means)
                        .zip(accumulator.counts())
                        .map(|((&previous, &current), &n)| temporal_blend(previous, current, n)),
                );
                self.history.copy_from_slice(&self.output);
                if level == DenoiseLevel::TemporalSpatial {
                    self.output = spatial_filter(accumulator, &self.output);
                }
            }
        }
        &self.output
    }
}

/// 3x3 bilateral pass over `image`, weighted by the accumulator variance.
pub fn spatial_filter(accumulator: &Accumulator, image: &[Vec3]) -> Vec<Vec3> {
    let extent = accumulator.extent();
    let (width, height) = (extent.width as i32, extent.height as i32);
    let mut filtered = Vec::with_capacity(image.len());
    for y in 0..height {
        for x in 0..width {
            let ci = (y * width + x) as usize;
            let center = image[ci];
            let variance_center = accumulator.variance_at(ci);
            let mut sum = Vec3::ZERO;
            let mut total = 0.0;
            for dy in -1..=1 {
                for dx in -1..=1 {
                    let (nx, ny) = (x + dx, y + dy);
                    if nx < 0 || ny < 0 || nx >= width || ny >= height {
                        continue;
                    }
                    let ni = (ny * width + nx) as usize;
                    let weight = bilateral_weight(
                        (dx * dx + dy * dy) as f32,
                        center,
                        image[ni],
                        variance_center,
                        accumulator.variance_at(ni),
                    );
                    sum += image[ni] * weight;
                    total += weight;
                }
            }
            filtered.push(if total > 0.0 { sum / total } else { center });
        }
    }
    filtered
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_graphics as gpu;

    #[test]
    fn alpha_is_clamped() {
        assert_eq!(temporal_alpha(1), 1.0);
        assert_eq!(temporal_alpha(4), 0.25);
        assert_eq!(temporal_alpha(1000), MIN_ALPHA);
        assert_eq!(temporal_blend(Vec3::ONE, Vec3::ZERO, 0), Vec3::ONE);
    }

    #[test]
    fn weights_prefer_similar_low_variance_neighbors() {
        let c = Vec3::splat(0.5);
        let near = bilateral_weight(1.0, c, c, 0.0, 0.0);
        let diagonal = bilateral_weight(2.0, c, c, 0.0, 0.0);
        let different = bilateral_weight(1.0, c, Vec3::splat(2.0), 0.0, 0.0);
        let noisy = bilateral_weight(1.0, c, c, 1.0, 1.0);
        assert_eq!(bilateral_weight(0.0, c, c, 0.0, 0.0), 1.0);
        assert!(near > diagonal);
        assert!(near > different);
        assert!((noisy - near * 0.5).abs() < 1e-6);
    }

    #[test]
    fn spatial_filter_keeps_flat_images() {
        let mut accumulator = Accumulator::new(gpu::Extent::new_2d(3, 3));
        for y in 0..3 {
            for x in 0..3 {
                accumulator.add_sample(x, y, Vec3::splat(0.3));
            }
        }
        let mut denoiser = Denoiser::new();
        let output = denoiser.apply(&accumulator, DenoiseLevel::TemporalSpatial);
        assert!(output.iter().all(|c| (*c - Vec3::splat(0.3)).abs().max_element() < 1e-6));
    }
}
