//! Cook-Torrance microfacet BRDF with a Lambert diffuse lobe.

use crate::world::PbrParams;
use glam::Vec3;
use std::f32::consts::PI;

const MIN_ROUGHNESS: f32 = 0.04;

/// Surface parameters seen by the tracer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Material {
    pub albedo: Vec3,
    pub emission: Vec3,
    pub roughness: f32,
    pub metallic: f32,
}

impl Default for Material {
    fn default() -> Self {
        Self::from_pbr(&PbrParams::default())
    }
}

impl Material {
    pub fn from_pbr(pbr: &PbrParams) -> Self {
        Self {
            albedo: Vec3::new(pbr.albedo[0], pbr.albedo[1], pbr.albedo[2]),
            emission: Vec3::new(pbr.emission[0], pbr.emission[1], pbr.emission[2]),
            roughness: pbr.roughness.clamp(0.0, 1.0),
            metallic: pbr.metallic.clamp(0.0, 1.0),
        }
    }
}

pub fn fresnel_schlick(cos_theta: f32, f0: Vec3) -> Vec3 {
    f0 + (Vec3::ONE - f0) * (1.0 - cos_theta).clamp(0.0, 1.0).powi(5)
}

pub fn distribution_ggx(n_dot_h: f32, roughness: f32) -> f32 {
    let a = roughness * roughness;
    let a2 = a * a;
    let d = n_dot_h * n_dot_h * (a2 - 1.0) + 1.0;
    a2 / (PI * d * d)
}

fn geometry_schlick_ggx(n_dot_v: f32, roughness: f32) -> f32 {
    let r = roughness + 1.0;
    let k = r * r / 8.0;
    n_dot_v / (n_dot_v * (1.0 - k) + k)
}

pub fn geometry_smith(n_dot_v: f32, n_dot_l: f32, roughness: f32) -> f32 {
    geometry_schlick_ggx(n_dot_v, roughness) * geometry_schlick_ggx(n_dot_l, roughness)
}

/// Reflected radiance per unit irradiance for light arriving along `wi`
/// and leaving along `wo`. Both point away from the surface.
pub fn cook_torrance(material: &Material, n: Vec3, wi: Vec3, wo: Vec3) -> Vec3 {
    let n_dot_l = n.dot(wi);
    let n_dot_v = n.dot(wo);
    if n_dot_l <= 0.0 || n_dot_v <= 0.0 {
        return Vec3::ZERO;
    }
    let roughness = material.roughness.max(MIN_ROUGHNESS);
    let h = (wi + wo).normalize();
    let f0 = Vec3::splat(0.04).lerp(material.albedo, material.metallic);
    let f = fresnel_schlick(h.dot(wo).max(0.0), f0);
    let d = distribution_ggx(n.dot(h).max(0.0), roughness);
    let g = geometry_smith(n_dot_v, n_dot_l, roughness);
    let specular = f * (d * g / (4.0 * n_dot_v * n_dot_l).max(1e-4));
    let kd = (Vec3::ONE - f) * (1.0 - material.metallic);
    kd * material.albedo / PI + specular
}

/// Diffuse-only BRDF, used for indirect bounces.
pub fn lambert(material: &Material) -> Vec3 {
    material.albedo * (1.0 - material.metallic) / PI
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn brdf_is_zero_below_horizon() {
        let material = Material::default();
        let n = Vec3::Z;
        assert_eq!(
            cook_torrance(&material, n, Vec3::NEG_Z, Vec3::Z),
            Vec3::ZERO
        );
    }

    #[test]
    fn rough_dielectric_is_close_to_lambert() {
        let material = Material {
            roughness: 1.0,
            ..Material::default()
        };
        let n = Vec3::Z;
        let value = cook_torrance(&material, n, n, n);
        let diffuse = lambert(&material);
        assert!(value.x >= diffuse.x * 0.9);
        assert!(value.x < diffuse.x * 1.2);
    }
}
