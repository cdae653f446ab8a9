//! Software path tracer.
//!
//! This is the reference the hardware path is validated against, and the
//! fallback when the device cannot trace rays.

mod brdf;
mod bsp;
mod light_cache;
mod probes;
mod sampling;

pub use brdf::{cook_torrance, lambert, Material};
pub use bsp::BspTree;
pub use light_cache::{CacheEntry, LightCache};
pub use probes::{Probe, ProbeGrid, FACE_DIRECTIONS};
pub use sampling::{
    cosine_pdf, cosine_sample_hemisphere, hash_u32, orthonormal_basis, u01,
    uniform_sample_hemisphere, Rng,
};

use crate::{
    accum::Accumulator,
    batch::WorldTriangle,
    bindings::MAX_MATERIAL_INDEX,
    config::Config,
    geometry::{Hit, Ray},
    world::{SceneLight, Shader},
    Camera, Error, WarnCategory, WarnOnce,
};
use glam::Vec3;
use prism_graphics as gpu;

pub const SKY_COLOR: Vec3 = Vec3::new(0.5, 0.7, 1.0);
pub const SHADOW_BIAS: f32 = 0.001;
pub const RUSSIAN_ROULETTE_DEPTH: u32 = 2;
pub const RUSSIAN_ROULETTE_SURVIVAL: f32 = 0.5;
const PROBE_RAYS: u32 = 4;

/// Shadow ray record, shared with the bulk query compute shader.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Zeroable, bytemuck::Pod)]
pub struct ShadowQuery {
    pub origin: [f32; 3],
    pub pad0: f32,
    pub direction: [f32; 3],
    pub pad1: f32,
    pub max_distance: f32,
    pub occluded: u32,
    pub pad2: [u32; 2],
}

impl ShadowQuery {
    pub fn new(origin: Vec3, direction: Vec3, max_distance: f32) -> Self {
        Self {
            origin: origin.into(),
            direction: direction.into(),
            max_distance,
            ..Self::default()
        }
    }

    pub fn is_occluded(&self) -> bool {
        self.occluded != 0
    }
}

/// Resolves a batch of shadow queries in place.
pub trait ShadowResolver {
    fn resolve(&mut self, scene: &BspTree, queries: &mut [ShadowQuery]) -> Result<(), Error>;
}

/// Walks the BSP for every query.
#[derive(Clone, Copy, Debug, Default)]
pub struct CpuShadowResolver;

impl ShadowResolver for CpuShadowResolver {
    fn resolve(&mut self, scene: &BspTree, queries: &mut [ShadowQuery]) -> Result<(), Error> {
        for query in queries.iter_mut() {
            let ray = Ray::new(query.origin.into(), query.direction.into());
            query.occluded = scene.is_occluded(&ray, query.max_distance) as u32;
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TraceSettings {
    pub max_bounces: u32,
    pub gi_bounces: u32,
    pub samples: u32,
    pub use_cache: bool,
    pub use_probes: bool,
    pub probe_grid: u32,
}

impl Default for TraceSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl TraceSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_bounces: config.bounces.max(1),
            gi_bounces: config.gi_bounces,
            samples: config.samples.max(1),
            use_cache: config.cache,
            use_probes: config.probes,
            probe_grid: config.probe_grid,
        }
    }
}

pub struct PathTracer {
    scene: BspTree,
    materials: Vec<Material>,
    lights: Vec<SceneLight>,
    settings: TraceSettings,
    cache: LightCache,
    probes: Option<ProbeGrid>,
    frame: u32,
    warnings: WarnOnce,
}

impl PathTracer {
    pub fn new(triangles: Vec<WorldTriangle>, settings: TraceSettings) -> Self {
        Self {
            scene: BspTree::build(triangles),
            materials: Vec::new(),
            lights: Vec::new(),
            settings,
            cache: LightCache::new(),
            probes: None,
            frame: 0,
            warnings: WarnOnce::default(),
        }
    }

    pub fn scene(&self) -> &BspTree {
        &self.scene
    }

    pub fn settings(&self) -> TraceSettings {
        self.settings
    }

    pub fn set_settings(&mut self, settings: TraceSettings) {
        if settings.probe_grid != self.settings.probe_grid || !settings.use_probes {
            self.probes = None;
        }
        self.settings = settings;
    }

    /// Material table indexed by material index. Unknown indices use the
    /// default material.
    pub fn set_materials(&mut self, materials: Vec<Material>) {
        self.materials = materials;
    }

    pub fn set_materials_from_shaders<'a>(&mut self, shaders: impl IntoIterator<Item = &'a Shader>) {
        for shader in shaders {
            if shader.material_index() > MAX_MATERIAL_INDEX {
                if self.warnings.first(WarnCategory::MATERIAL_INDEX) {
                    log::warn!(
                        "Material index {} of {} is out of range for the software path",
                        shader.material_index(),
                        shader.name
                    );
                }
                continue;
            }
            let index = shader.material_index() as usize;
            if self.materials.len() <= index {
                self.materials.resize(index + 1, Material::default());
            }
            self.materials[index] = shader.pbr.as_ref().map_or_else(Material::default, Material::from_pbr);
        }
    }

    pub fn material(&self, index: u32) -> Material {
        self.materials.get(index as usize).copied().unwrap_or_default()
    }

    pub fn set_lights(&mut self, lights: &[SceneLight]) {
        self.lights.clear();
        self.lights.extend_from_slice(lights);
    }

    pub fn lights(&self) -> &[SceneLight] {
        &self.lights
    }

    pub fn light_cache(&self) -> &LightCache {
        &self.cache
    }

    pub fn probes(&self) -> Option<&ProbeGrid> {
        self.probes.as_ref()
    }

    pub fn frame(&self) -> u32 {
        self.frame
    }

    pub fn trace_ray(&self, ray: &Ray) -> Option<Hit> {
        self.scene.trace_ray(ray, f32::MAX)
    }

    pub fn trace_shadow_ray(&self, origin: Vec3, target: Vec3, max_distance: f32) -> bool {
        self.scene.trace_shadow_ray(origin, target, max_distance)
    }

    fn resolve_shadows(&mut self, resolver: &mut dyn ShadowResolver, queries: &mut [ShadowQuery]) {
        if queries.is_empty() {
            return;
        }
        if let Err(error) = resolver.resolve(&self.scene, queries) {
            if self.warnings.first(WarnCategory::SHADOW_FALLBACK) {
                log::warn!("Bulk shadow queries failed, tracing on the CPU: {}", error);
            }
            // The CPU walk cannot fail.
            let _ = CpuShadowResolver.resolve(&self.scene, queries);
        }
    }

    /// Direct lighting at `hit` seen from `wo`.
    pub fn direct_light(
        &mut self,
        hit: &Hit,
        normal: Vec3,
        wo: Vec3,
        material: &Material,
        resolver: &mut dyn ShadowResolver,
    ) -> Vec3 {
        let origin = hit.position + normal * SHADOW_BIAS;
        let mut radiance = Vec3::ZERO;
        let mut shadowed = Vec::new();
        let mut queries = Vec::new();
        for light in self.lights.iter() {
            let Some((to_light, distance, attenuation)) = light.illuminate(hit.position) else {
                continue;
            };
            let cos_theta = normal.dot(to_light);
            if cos_theta <= 0.0 {
                continue;
            }
            let brdf = cook_torrance(material, normal, to_light, wo);
            let contribution = light.color * light.intensity * attenuation * brdf * cos_theta;
            if contribution.max_element() <= 0.0 {
                continue;
            }
            if light.casts_shadows {
                shadowed.push(contribution);
                queries.push(ShadowQuery::new(origin, to_light, distance));
            } else {
                radiance += contribution;
            }
        }
        self.resolve_shadows(resolver, &mut queries);
        for (query, contribution) in queries.iter().zip(shadowed) {
            if !query.is_occluded() {
                radiance += contribution;
            }
        }
        radiance
    }

    /// Radiance arriving along `ray`. `depth` starts at 1 for camera rays.
    pub fn trace_path(
        &mut self,
        ray: &Ray,
        depth: u32,
        rng: &mut Rng,
        resolver: &mut dyn ShadowResolver,
    ) -> Vec3 {
        let Some(hit) = self.scene.trace_ray(ray, f32::MAX) else {
            return SKY_COLOR;
        };
        let material = self.material(hit.material);
        let normal = if hit.normal.dot(ray.direction) > 0.0 {
            -hit.normal
        } else {
            hit.normal
        };
        let wo = -ray.direction;
        let mut radiance = material.emission;
        radiance += self.direct_light(&hit, normal, wo, &material, resolver);

        let settings = self.settings;
        if depth >= settings.max_bounces || depth > settings.gi_bounces {
            return radiance;
        }
        let mut weight = 1.0;
        if depth > RUSSIAN_ROULETTE_DEPTH {
            if rng.next_f32() >= RUSSIAN_ROULETTE_SURVIVAL {
                return radiance;
            }
            weight /= RUSSIAN_ROULETTE_SURVIVAL;
        }

        if settings.use_cache {
            if let Some(cached) = self.cache.query(hit.position, normal) {
                return radiance + cached * weight;
            }
        }
        let indirect = match self.probes {
            Some(ref probes) if settings.use_probes => {
                lambert(&material) * probes.sample(hit.position, normal)
            }
            _ => {
                let dir = cosine_sample_hemisphere(normal, rng.next_f32(), rng.next_f32());
                let pdf = cosine_pdf(normal, dir);
                if pdf <= 1e-6 {
                    Vec3::ZERO
                } else {
                    let origin = hit.position + normal * SHADOW_BIAS;
                    let incoming = self.trace_path(&Ray::new(origin, dir), depth + 1, rng, resolver);
                    let brdf = cook_torrance(&material, normal, dir, wo);
                    brdf * incoming * normal.dot(dir) / pdf
                }
            }
        };
        if settings.use_cache {
            self.cache.update(hit.position, normal, indirect, self.frame);
        }
        radiance + indirect * weight
    }

    fn ensure_probes(&mut self) {
        if self.settings.use_probes && self.probes.is_none() && self.scene.triangle_count() != 0 {
            self.probes = Some(ProbeGrid::new(self.scene.bounds(), self.settings.probe_grid));
        }
    }

    /// Refresh this frame's share of the probe grid with direct lighting.
    fn refresh_probes(&mut self, resolver: &mut dyn ShadowResolver) {
        self.ensure_probes();
        let Some(mut probes) = self.probes.take() else {
            return;
        };
        let frame = self.frame;
        let mut rng = Rng::new(frame);
        probes.refresh(frame, |position, dir| {
            let mut irradiance = Vec3::ZERO;
            let mut visible = 0;
            for _ in 0..PROBE_RAYS {
                let sample = cosine_sample_hemisphere(dir, rng.next_f32(), rng.next_f32());
                let ray = Ray::new(position, sample);
                match self.scene.trace_ray(&ray, f32::MAX) {
                    Some(hit) => {
                        let material = self.material(hit.material);
                        let normal = if hit.normal.dot(sample) > 0.0 {
                            -hit.normal
                        } else {
                            hit.normal
                        };
                        irradiance += material.emission
                            + self.direct_light(&hit, normal, -sample, &material, resolver);
                    }
                    None => {
                        irradiance += SKY_COLOR;
                        visible += 1;
                    }
                }
            }
            (
                irradiance / PROBE_RAYS as f32,
                visible as f32 / PROBE_RAYS as f32,
            )
        });
        self.probes = Some(probes);
    }

    #[allow(clippy::too_many_arguments)]
    fn sample_pixel(
        &mut self,
        camera: &Camera,
        extent: gpu::Extent,
        x: u32,
        y: u32,
        sample: u32,
        seed: u32,
        resolver: &mut dyn ShadowResolver,
    ) -> Vec3 {
        let mut rng = Rng::for_pixel(seed, x, y, sample);
        let jitter = if sample == 0 {
            [0.5, 0.5]
        } else {
            [rng.next_f32(), rng.next_f32()]
        };
        let film = [
            (x as f32 + jitter[0]) / extent.width as f32,
            (y as f32 + jitter[1]) / extent.height as f32,
        ];
        let ray = Ray::new(camera.origin.into(), camera.ray_direction(extent, film));
        self.trace_path(&ray, 1, &mut rng, resolver)
    }

    /// Average of `samples` paths through pixel `(x, y)`. The first
    /// sample goes through the pixel center.
    pub fn render_pixel(
        &mut self,
        camera: &Camera,
        extent: gpu::Extent,
        x: u32,
        y: u32,
        seed: u32,
        resolver: &mut dyn ShadowResolver,
    ) -> Vec3 {
        let samples = self.settings.samples;
        let mut sum = Vec3::ZERO;
        for sample in 0..samples {
            sum += self.sample_pixel(camera, extent, x, y, sample, seed, resolver);
        }
        sum / samples as f32
    }

    /// Trace every pixel and feed the samples into `accumulator`.
    #[profiling::function]
    pub fn render_frame(
        &mut self,
        camera: &Camera,
        extent: gpu::Extent,
        accumulator: &mut Accumulator,
        seed: u32,
        resolver: &mut dyn ShadowResolver,
    ) {
        if extent.is_empty() {
            return;
        }
        if accumulator.extent() != extent {
            accumulator.resize(extent);
        }
        self.frame = self.frame.wrapping_add(1);
        if self.settings.use_probes {
            self.refresh_probes(resolver);
        }
        let first_sample = accumulator.sample_count(0, 0);
        for y in 0..extent.height {
            for x in 0..extent.width {
                for s in 0..self.settings.samples {
                    let sample = first_sample + s;
                    let color = self.sample_pixel(camera, extent, x, y, sample, seed, resolver);
                    accumulator.add_sample(x, y, color);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn floor() -> Vec<WorldTriangle> {
        let p = |x: f32, y: f32| Vec3::new(x, y, 0.0);
        vec![
            WorldTriangle {
                positions: [p(-100.0, -100.0), p(100.0, -100.0), p(-100.0, 100.0)],
                material: 1,
            },
            WorldTriangle {
                positions: [p(100.0, -100.0), p(100.0, 100.0), p(-100.0, 100.0)],
                material: 1,
            },
        ]
    }

    #[test]
    fn wild_material_index_is_skipped() {
        let mut tracer = PathTracer::new(Vec::new(), TraceSettings::default());
        let shader = Shader {
            name: "wild".to_string(),
            material_index: u32::MAX,
            ..Shader::default()
        };
        tracer.set_materials_from_shaders([&shader]);
        assert!(tracer.materials.is_empty());
        assert!(tracer.warnings.has_fired(WarnCategory::MATERIAL_INDEX));
        assert_eq!(tracer.material(u32::MAX), Material::default());
    }

    #[test]
    fn miss_returns_sky() {
        let mut tracer = PathTracer::new(Vec::new(), TraceSettings::default());
        let mut rng = Rng::new(0);
        let ray = Ray::new(Vec3::ZERO, Vec3::Z);
        let color = tracer.trace_path(&ray, 1, &mut rng, &mut CpuShadowResolver);
        assert_eq!(color, SKY_COLOR);
    }

    #[test]
    fn directional_light_on_floor() {
        let settings = TraceSettings {
            max_bounces: 1,
            ..TraceSettings::default()
        };
        let mut tracer = PathTracer::new(floor(), settings);
        let light = SceneLight::directional(Vec3::NEG_Z, Vec3::ONE, 2.0);
        tracer.set_lights(&[light]);
        let mut rng = Rng::new(0);
        let ray = Ray::new(Vec3::new(0.0, 0.0, 10.0), Vec3::NEG_Z);
        let color = tracer.trace_path(&ray, 1, &mut rng, &mut CpuShadowResolver);
        let material = Material::default();
        let expected = 2.0 * cook_torrance(&material, Vec3::Z, Vec3::Z, Vec3::Z);
        assert!((color - expected).abs().max_element() < 1e-5);
    }

    #[test]
    fn shadow_queries_are_packed() {
        assert_eq!(std::mem::size_of::<ShadowQuery>(), 12 * 4);
    }

    #[test]
    fn failing_resolver_falls_back_to_cpu() {
        struct Broken;
        impl ShadowResolver for Broken {
            fn resolve(&mut self, _: &BspTree, _: &mut [ShadowQuery]) -> Result<(), Error> {
                Err(Error::Unsupported)
            }
        }
        let mut tracer = PathTracer::new(floor(), TraceSettings::default());
        tracer.set_lights(&[SceneLight::directional(Vec3::NEG_Z, Vec3::ONE, 1.0)]);
        let mut rng = Rng::new(0);
        let ray = Ray::new(Vec3::new(0.0, 0.0, 10.0), Vec3::NEG_Z);
        let color = tracer.trace_path(&ray, 1, &mut rng, &mut Broken);
        assert!(color.x > 0.0);
        assert!(tracer.warnings.has_fired(WarnCategory::SHADOW_FALLBACK));
    }
}
