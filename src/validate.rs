//! Cross-backend parity checks against the software reference.

use crate::{backend::Backend, config::Config};
use glam::Vec3;
use prism_graphics as gpu;
use rustc_hash::{FxHashMap, FxHasher};
use std::hash::Hasher;

/// RMSE difference between backends above which a regression is reported.
pub const RMSE_REGRESSION: f32 = 0.0025;

/// Running error between reference and observed colors.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ErrorStats {
    sum_sq: f64,
    max_abs_error: f32,
    samples: u32,
}

impl ErrorStats {
    pub fn add(&mut self, reference: Vec3, observed: Vec3) {
        let diff = (observed - reference).abs();
        self.sum_sq += diff.length_squared() as f64;
        self.max_abs_error = self.max_abs_error.max(diff.max_element());
        self.samples += 1;
    }

    pub fn samples(&self) -> u32 {
        self.samples
    }

    pub fn max_abs_error(&self) -> f32 {
        self.max_abs_error
    }

    /// Root mean square over all sampled channels.
    pub fn rmse(&self) -> f32 {
        if self.samples == 0 {
            return 0.0;
        }
        (self.sum_sq / (3.0 * self.samples as f64)).sqrt() as f32
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ValidationRecord {
    pub backend: Backend,
    pub map: String,
    pub width: u32,
    pub height: u32,
    pub frame: u32,
    pub samples: u32,
    pub rmse: f32,
    pub max_error: f32,
    /// Content address of the sampled observed colors.
    pub hash: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Comparison {
    pub map: String,
    pub width: u32,
    pub height: u32,
    pub delta_rmse: f32,
    pub delta_max: f32,
    pub regression: bool,
}

/// What one validation pass looks at.
#[derive(Clone, Copy, Debug)]
pub struct ValidationTarget<'a> {
    pub backend: Backend,
    pub map: &'a str,
    pub extent: gpu::Extent,
    pub frame: u32,
    pub stride: u32,
}

impl<'a> ValidationTarget<'a> {
    /// `None` unless validation is enabled and `map` is one of the
    /// configured targets.
    pub fn from_config(
        config: &Config,
        backend: Backend,
        map: &'a str,
        extent: gpu::Extent,
        frame: u32,
    ) -> Option<Self> {
        if config.gpu_validate == 0 || !config.is_validate_map(map) {
            return None;
        }
        Some(Self {
            backend,
            map,
            extent,
            frame,
            stride: config.gpu_validate,
        })
    }

    /// Pixels sampled by the pass, every `stride`-th in both dimensions.
    pub fn positions(&self) -> impl Iterator<Item = (u32, u32)> {
        let stride = self.stride.max(1) as usize;
        let width = self.extent.width;
        (0..self.extent.height)
            .step_by(stride)
            .flat_map(move |y| (0..width).step_by(stride).map(move |x| (x, y)))
    }
}

type RecordKey = (Backend, String, u32, u32);

#[derive(Debug, Default)]
pub struct Validator {
    records: FxHashMap<RecordKey, ValidationRecord>,
    last_comparison: Option<Comparison>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare `observed` (row-major over the target extent) with the
    /// reference colors at the sampled pixels and record the result.
    #[profiling::function]
    pub fn validate(
        &mut self,
        target: &ValidationTarget,
        observed: &[Vec3],
        mut reference: impl FnMut(u32, u32) -> Vec3,
    ) -> Option<&ValidationRecord> {
        let extent = target.extent;
        if extent.is_empty() || observed.len() != extent.pixel_count() {
            log::debug!(
                "Skipping validation: {} observed colors for {}x{}",
                observed.len(),
                extent.width,
                extent.height
            );
            return None;
        }
        let mut stats = ErrorStats::default();
        let mut hasher = FxHasher::default();
        for (x, y) in target.positions() {
            let color = observed[(y * extent.width + x) as usize];
            for channel in color.to_array() {
                hasher.write_u32(channel.to_bits());
            }
            stats.add(reference(x, y), color);
        }
        let record = ValidationRecord {
            backend: target.backend,
            map: target.map.to_string(),
            width: extent.width,
            height: extent.height,
            frame: target.frame,
            samples: stats.samples(),
            rmse: stats.rmse(),
            max_error: stats.max_abs_error(),
            hash: hasher.finish(),
        };
        log::debug!(
            "Validation {} on {} {}x{} frame {}: rmse {:.5}, max {:.5} over {} samples",
            record.backend,
            record.map,
            record.width,
            record.height,
            record.frame,
            record.rmse,
            record.max_error,
            record.samples
        );
        let key = (
            target.backend,
            target.map.to_string(),
            extent.width,
            extent.height,
        );
        self.records.insert(key.clone(), record);
        self.last_comparison = self.compare(target.map, extent);
        self.records.get(&key)
    }

    pub fn record(&self, backend: Backend, map: &str, extent: gpu::Extent) -> Option<&ValidationRecord> {
        self.records
            .get(&(backend, map.to_string(), extent.width, extent.height))
    }

    /// Compare both backends on `map` at `extent`, if both have run.
    pub fn compare(&self, map: &str, extent: gpu::Extent) -> Option<Comparison> {
        let hardware = self.record(Backend::Hardware, map, extent)?;
        let software = self.record(Backend::Software, map, extent)?;
        let delta_rmse = (hardware.rmse - software.rmse).abs();
        let delta_max = (hardware.max_error - software.max_error).abs();
        let regression = delta_rmse > RMSE_REGRESSION;
        if regression {
            log::warn!(
                "RMSE regression on {} {}x{}: hardware {:.5}, software {:.5} (max error delta {:.5})",
                map,
                extent.width,
                extent.height,
                hardware.rmse,
                software.rmse,
                delta_max
            );
        } else {
            log::debug!(
                "Backends agree on {} {}x{}: rmse delta {:.5}, max error delta {:.5}",
                map,
                extent.width,
                extent.height,
                delta_rmse,
                delta_max
            );
        }
        Some(Comparison {
            map: map.to_string(),
            width: extent.width,
            height: extent.height,
            delta_rmse,
            delta_max,
            regression,
        })
    }

    pub fn last_comparison(&self) -> Option<&Comparison> {
        self.last_comparison.as_ref()
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.last_comparison = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(backend: Backend, stride: u32) -> ValidationTarget<'static> {
        ValidationTarget {
            backend,
            map: "q3dm1",
            extent: gpu::Extent::new_2d(8, 4),
            frame: 1,
            stride,
        }
    }

    #[test]
    fn stride_samples_both_dimensions() {
        let positions = target(Backend::Software, 4).positions().collect::<Vec<_>>();
        assert_eq!(positions, vec![(0, 0), (4, 0)]);
        assert_eq!(target(Backend::Software, 1).positions().count(), 32);
    }

    #[test]
    fn only_configured_maps_are_validated() {
        let mut config = Config::default();
        let extent = gpu::Extent::new_2d(8, 8);
        assert!(ValidationTarget::from_config(&config, Backend::Software, "q3dm1", extent, 0).is_none());
        config.gpu_validate = 2;
        assert!(ValidationTarget::from_config(&config, Backend::Software, "q3dm1", extent, 0).is_some());
        assert!(ValidationTarget::from_config(&config, Backend::Software, "q3ctf1", extent, 0).is_none());
    }

    #[test]
    fn rmse_spans_all_channels() {
        let mut stats = ErrorStats::default();
        stats.add(Vec3::ZERO, Vec3::new(0.3, 0.0, 0.0));
        stats.add(Vec3::ZERO, Vec3::ZERO);
        assert!((stats.rmse() - (0.09f32 / 6.0).sqrt()).abs() < 1e-6);
        assert_eq!(stats.max_abs_error(), 0.3);
    }

    #[test]
    fn zero_output_is_a_regression() {
        let mut validator = Validator::new();
        let colors = vec![Vec3::splat(0.5); 32];
        let zeros = vec![Vec3::ZERO; 32];
        let reference = |_, _| Vec3::splat(0.5);

        let record = validator
            .validate(&target(Backend::Software, 2), &colors, reference)
            .unwrap();
        assert_eq!(record.rmse, 0.0);
        assert_eq!(record.samples, 8);
        assert!(validator.last_comparison().is_none());

        validator.validate(&target(Backend::Hardware, 2), &colors, reference);
        assert!(!validator.last_comparison().unwrap().regression);

        validator.validate(&target(Backend::Hardware, 2), &zeros, reference);
        let comparison = validator.last_comparison().unwrap();
        assert!(comparison.regression);
        assert!((comparison.delta_rmse - 0.5).abs() < 1e-6);
    }
}
