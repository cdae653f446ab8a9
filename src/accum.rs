//! Per-pixel Welford accumulation.

use crate::config::{Config, LightMode};
use glam::Vec3;
use prism_graphics as gpu;

/// Channels outside this range, or non-finite, are treated as zero.
pub const MAX_SAMPLE_VALUE: f32 = 1.0e6;

fn sanitize(color: Vec3) -> Vec3 {
    let clean = |c: f32| {
        if c.is_finite() && c.abs() <= MAX_SAMPLE_VALUE {
            c
        } else {
            0.0
        }
    };
    Vec3::new(clean(color.x), clean(color.y), clean(color.z))
}

/// Everything whose change invalidates the accumulated history.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AccumulationKey {
    pub extent: gpu::Extent,
    pub mode: LightMode,
    pub bounces: u32,
    pub samples: u32,
    pub quality: u32,
    pub light_hash: u64,
    pub temporal: bool,
}

impl AccumulationKey {
    pub fn new(config: &Config, extent: gpu::Extent, light_hash: u64) -> Self {
        Self {
            extent,
            mode: config.mode,
            bounces: config.bounces,
            samples: config.samples,
            quality: config.quality,
            light_hash,
            temporal: config.temporal,
        }
    }
}

#[derive(Debug, Default)]
pub struct Accumulator {
    extent: gpu::Extent,
    mean: Vec<Vec3>,
    m2: Vec<Vec3>,
    count: Vec<u32>,
    key: Option<AccumulationKey>,
}

impl Accumulator {
    pub fn new(extent: gpu::Extent) -> Self {
        let mut accumulator = Self::default();
        accumulator.resize(extent);
        accumulator
    }

    pub fn extent(&self) -> gpu::Extent {
        self.extent
    }

    /// Reallocate for `extent`, dropping all history.
    pub fn resize(&mut self, extent: gpu::Extent) {
        let pixels = extent.pixel_count();
        self.extent = extent;
        self.mean = vec![Vec3::ZERO; pixels];
        self.m2 = vec![Vec3::ZERO; pixels];
        self.count = vec![0; pixels];
    }

    pub fn reset(&mut self) {
        self.mean.fill(Vec3::ZERO);
        self.m2.fill(Vec3::ZERO);
        self.count.fill(0);
    }

    /// Compare against the state of the current frame and drop history on
    /// any change. Returns `true` if the history was dropped.
    pub fn sync(&mut self, key: AccumulationKey) -> bool {
        if self.key == Some(key) {
            return false;
        }
        if key.extent != self.extent {
            self.resize(key.extent);
        } else {
            self.reset();
        }
        let had_history = self.key.is_some();
        self.key = Some(key);
        if had_history {
            log::debug!("Accumulation reset for {:?}", key);
        }
        true
    }

    fn index(&self, x: u32, y: u32) -> Option<usize> {
        if x < self.extent.width && y < self.extent.height {
            Some(y as usize * self.extent.width as usize + x as usize)
        } else {
            None
        }
    }

    pub fn add_sample(&mut self, x: u32, y: u32, color: Vec3) {
        let Some(i) = self.index(x, y) else {
            return;
        };
        let sample = sanitize(color);
        self.count[i] += 1;
        let delta = sample - self.mean[i];
        self.mean[i] += delta / self.count[i] as f32;
        let delta2 = sample - self.mean[i];
        self.m2[i] += delta * delta2;
    }

    pub fn mean(&self, x: u32, y: u32) -> Vec3 {
        self.index(x, y).map_or(Vec3::ZERO, |i| self.mean[i])
    }

    pub fn sample_count(&self, x: u32, y: u32) -> u32 {
        self.index(x, y).map_or(0, |i| self.count[i])
    }

    /// Scalar variance of the pixel, averaged over channels.
    pub fn variance(&self, x: u32, y: u32) -> f32 {
        self.index(x, y).map_or(0.0, |i| self.variance_at(i))
    }

    pub(crate) fn variance_at(&self, i: usize) -> f32 {
        let n = self.count[i];
        if n > 1 {
            self.m2[i].element_sum() / (3.0 * (n - 1) as f32)
        } else {
            0.0
        }
    }

    pub fn means(&self) -> &[Vec3] {
        &self.mean
    }

    pub fn counts(&self) -> &[u32] {
        &self.count
    }
}
