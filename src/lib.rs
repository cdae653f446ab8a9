#![allow(
    // Conflicts with `pattern_type_mismatch`
    clippy::needless_borrowed_reference,
    // Explicit lifetimes are often easier to reason about.
    clippy::needless_lifetimes,
    clippy::new_without_default,
)]
#![warn(
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_qualifications,
    // We don't match on a reference, unless required.
    clippy::pattern_type_mismatch,
)]

pub use prism_graphics as gpu;

pub mod accel;
pub mod accum;
pub mod backend;
pub mod batch;
pub mod bindings;
pub mod config;
mod context;
pub mod denoise;
pub mod dispatch;
mod error;
pub mod geometry;
pub mod pipeline;
pub mod trace;
pub mod validate;
pub mod world;

pub use accel::{AccelStore, BlasId, InstanceId};
pub use accum::Accumulator;
pub use backend::Backend;
pub use config::Config;
pub use context::{CoreContext, FrameOutput};
pub use error::{Error, WarnCategory, WarnOnce};

/// Viewpoint of the engine for the current frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Camera {
    pub origin: mint::Vector3<f32>,
    pub forward: mint::Vector3<f32>,
    pub right: mint::Vector3<f32>,
    pub up: mint::Vector3<f32>,
    /// Vertical field of view, in degrees.
    pub fov_y: f32,
    pub z_near: f32,
    pub z_far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            origin: [0.0; 3].into(),
            forward: [1.0, 0.0, 0.0].into(),
            right: [0.0, -1.0, 0.0].into(),
            up: [0.0, 0.0, 1.0].into(),
            fov_y: 90.0,
            z_near: 4.0,
            z_far: 65536.0,
        }
    }
}

impl Camera {
    /// Camera at `origin` looking at `target` with +Z up.
    pub fn look_at(origin: mint::Vector3<f32>, target: mint::Vector3<f32>, fov_y: f32) -> Self {
        let eye = glam::Vec3::from(origin);
        let forward = (glam::Vec3::from(target) - eye).normalize_or_zero();
        let world_up = if forward.z.abs() > 0.999 {
            glam::Vec3::X
        } else {
            glam::Vec3::Z
        };
        let right = forward.cross(world_up).normalize_or_zero();
        let up = right.cross(forward);
        Self {
            origin,
            forward: forward.into(),
            right: right.into(),
            up: up.into(),
            fov_y,
            ..Self::default()
        }
    }

    pub fn aspect_fov_x(&self, extent: gpu::Extent) -> f32 {
        let aspect = extent.width as f32 / extent.height.max(1) as f32;
        2.0 * ((self.fov_y.to_radians() * 0.5).tan() * aspect).atan()
    }

    /// Primary ray direction through the normalized film position `[0,1]^2`.
    pub fn ray_direction(&self, extent: gpu::Extent, film: [f32; 2]) -> glam::Vec3 {
        let tan_y = (self.fov_y.to_radians() * 0.5).tan();
        let tan_x = (self.aspect_fov_x(extent) * 0.5).tan();
        let sx = (film[0] * 2.0 - 1.0) * tan_x;
        let sy = (1.0 - film[1] * 2.0) * tan_y;
        (glam::Vec3::from(self.forward)
            + glam::Vec3::from(self.right) * sx
            + glam::Vec3::from(self.up) * sy)
            .normalize()
    }
}
