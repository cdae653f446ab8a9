//! GPU-side layouts of the uniform and storage buffers.

use crate::{
    accel::Instance,
    config::{Composite, Config},
    world::{Shader, SurfaceFlags},
    Camera, WarnCategory, WarnOnce,
};
use glam::{Mat4, Vec3};
use prism_graphics as gpu;

pub const NO_TEXTURE: u32 = !0;
pub const MATERIAL_TEXTURE_SLOTS: usize = 6;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Zeroable, bytemuck::Pod)]
pub struct CameraUniform {
    pub view_inverse: [[f32; 4]; 4],
    pub proj_inverse: [[f32; 4]; 4],
    pub prev_view_proj: [[f32; 4]; 4],
    /// `w` is the vertical field of view in radians.
    pub origin: [f32; 4],
    /// `w` is the near plane.
    pub forward: [f32; 4],
    /// `w` is the far plane.
    pub right: [f32; 4],
    pub up: [f32; 4],
    pub jitter: [f32; 2],
    pub prev_jitter: [f32; 2],
    pub frame_index: u32,
    pub bounces: u32,
    pub samples: u32,
    pub surface_debug: u32,
}

pub fn view_matrix(camera: &Camera) -> Mat4 {
    Mat4::look_to_rh(camera.origin.into(), camera.forward.into(), camera.up.into())
}

pub fn projection_matrix(camera: &Camera, extent: gpu::Extent) -> Mat4 {
    let aspect = extent.width.max(1) as f32 / extent.height.max(1) as f32;
    Mat4::perspective_rh(camera.fov_y.to_radians(), aspect, camera.z_near, camera.z_far)
}

impl CameraUniform {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        camera: &Camera,
        extent: gpu::Extent,
        prev_view_proj: Mat4,
        jitter: [f32; 2],
        prev_jitter: [f32; 2],
        frame_index: u32,
        config: &Config,
    ) -> Self {
        let with_w = |v: mint::Vector3<f32>, w: f32| {
            let v = Vec3::from(v);
            [v.x, v.y, v.z, w]
        };
        Self {
            view_inverse: view_matrix(camera).inverse().to_cols_array_2d(),
            proj_inverse: projection_matrix(camera, extent).inverse().to_cols_array_2d(),
            prev_view_proj: prev_view_proj.to_cols_array_2d(),
            origin: with_w(camera.origin, camera.fov_y.to_radians()),
            forward: with_w(camera.forward, camera.z_near),
            right: with_w(camera.right, camera.z_far),
            up: with_w(camera.up, 0.0),
            jitter,
            prev_jitter,
            frame_index,
            bounces: config.bounces,
            samples: config.samples,
            surface_debug: config.surface_debug,
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Zeroable, bytemuck::Pod)]
pub struct RenderSettingsUniform {
    pub shadows: u32,
    pub reflections: u32,
    pub global_illumination: u32,
    pub ambient_occlusion: u32,
    pub shadow_bias: f32,
    pub reflection_roughness_cutoff: f32,
    pub gi_intensity: f32,
    pub ao_radius: f32,
    pub debug_mode: u32,
    pub denoiser: u32,
    pub dlss: u32,
    pub motion_blur: u32,
}

impl RenderSettingsUniform {
    pub fn from_config(config: &Config) -> Self {
        Self {
            shadows: 1,
            reflections: (config.bounces > 1) as u32,
            global_illumination: (config.gi_bounces > 0) as u32,
            ambient_occlusion: 1,
            shadow_bias: crate::trace::SHADOW_BIAS,
            reflection_roughness_cutoff: 0.6,
            gi_intensity: 1.0,
            ao_radius: 32.0,
            debug_mode: config.debug,
            denoiser: config.denoise,
            dlss: config.dlss,
            motion_blur: 0,
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Zeroable, bytemuck::Pod)]
pub struct EnvironmentUniform {
    pub sky_color: [f32; 4],
    pub ambient: [f32; 4],
    pub has_environment_map: u32,
    pub light_count: u32,
    pub composite: u32,
    pub hybrid_intensity: f32,
}

impl EnvironmentUniform {
    pub fn new(config: &Config, light_count: u32, has_environment_map: bool) -> Self {
        let sky = crate::trace::SKY_COLOR;
        Self {
            sky_color: [sky.x, sky.y, sky.z, 1.0],
            ambient: [0.0; 4],
            has_environment_map: has_environment_map as u32,
            light_count,
            composite: match config.composite {
                Composite::Replace => 0,
                Composite::Hybrid => 1,
            },
            hybrid_intensity: crate::config::clamp_hybrid_intensity(config.hybrid_intensity),
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Zeroable, bytemuck::Pod)]
pub struct DebugUniform {
    pub mode: u32,
    pub surface_debug: u32,
    pub overlay: u32,
    pub frame_index: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Zeroable, bytemuck::Pod)]
pub struct MaterialEntry {
    pub albedo: [f32; 4],
    pub specular: [f32; 4],
    pub emission: [f32; 4],
    pub roughness: f32,
    pub metallic: f32,
    pub normal_scale: f32,
    pub occlusion_strength: f32,
    pub texture_indices: [u32; MATERIAL_TEXTURE_SLOTS],
    pub lightmap_index: u32,
    pub flags: u32,
}

impl MaterialEntry {
    pub const HAS_PBR: u32 = 1;
    pub const NO_DLIGHT: u32 = 2;
    pub const SKY: u32 = 4;

    pub fn from_shader(shader: &Shader) -> Self {
        let pbr = shader.pbr.unwrap_or_default();
        let mut texture_indices = [NO_TEXTURE; MATERIAL_TEXTURE_SLOTS];
        for (slot, index) in texture_indices.iter_mut().zip(shader.texture_indices()) {
            *slot = index;
        }
        let mut flags = 0;
        if shader.pbr.is_some() {
            flags |= Self::HAS_PBR;
        }
        if shader.surface_flags.contains(SurfaceFlags::NODLIGHT) {
            flags |= Self::NO_DLIGHT;
        }
        if shader.surface_flags.contains(SurfaceFlags::SKY) {
            flags |= Self::SKY;
        }
        Self {
            albedo: pbr.albedo,
            specular: pbr.specular,
            emission: pbr.emission,
            roughness: pbr.roughness,
            metallic: pbr.metallic,
            normal_scale: pbr.normal_scale,
            occlusion_strength: pbr.occlusion_strength,
            texture_indices,
            lightmap_index: shader.lightmap_index().unwrap_or(NO_TEXTURE),
            flags,
        }
    }
}

/// Largest material index a shader may carry.
pub const MAX_MATERIAL_INDEX: u32 = (1 << 14) - 1;

/// Material entries by material index. Entry 0 stays zeroed.
#[derive(Clone, Debug)]
pub struct MaterialTable {
    entries: Vec<MaterialEntry>,
    dirty: bool,
    warnings: WarnOnce,
}

impl Default for MaterialTable {
    fn default() -> Self {
        Self {
            entries: vec![MaterialEntry::default()],
            dirty: true,
            warnings: WarnOnce::default(),
        }
    }
}

impl MaterialTable {
    pub fn from_shaders<'a>(shaders: impl IntoIterator<Item = &'a Shader>) -> Self {
        let mut table = Self::default();
        for shader in shaders {
            table.set(shader);
        }
        table
    }

    pub fn set(&mut self, shader: &Shader) {
        let index = shader.material_index();
        if index > MAX_MATERIAL_INDEX {
            if self.warnings.first(WarnCategory::MATERIAL_INDEX) {
                log::warn!(
                    "Shader {} has material index {} beyond {}, ignoring it",
                    shader.name,
                    index,
                    MAX_MATERIAL_INDEX
                );
            }
            return;
        }
        let index = index as usize;
        if index == 0 {
            return;
        }
        if self.entries.len() <= index {
            self.entries.resize(index + 1, MaterialEntry::default());
        }
        let entry = MaterialEntry::from_shader(shader);
        if self.entries[index] != entry {
            self.entries[index] = entry;
            self.dirty = true;
        }
    }

    pub fn entries(&self) -> &[MaterialEntry] {
        &self.entries
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Zeroable, bytemuck::Pod)]
pub struct InstanceData {
    pub material_offset: u32,
    pub material_count: u32,
    pub material: u32,
    pub flags: u32,
}

impl From<&Instance> for InstanceData {
    fn from(instance: &Instance) -> Self {
        Self {
            material_offset: instance.triangle_material_offset(),
            material_count: instance.triangle_material_count,
            material: instance.material,
            flags: instance.flags.bits() as u32,
        }
    }
}

/// Sub-pixel jitter from the (2, 3) Halton sequence, in pixels.
pub fn halton_jitter(frame_index: u32) -> [f32; 2] {
    fn halton(mut index: u32, base: u32) -> f32 {
        let mut result = 0.0;
        let mut f = 1.0;
        while index > 0 {
            f /= base as f32;
            result += f * (index % base) as f32;
            index /= base;
        }
        result
    }
    let i = frame_index % 16 + 1;
    [halton(i, 2) - 0.5, halton(i, 3) - 0.5]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::size_of;

    #[test]
    fn layouts_are_packed() {
        assert_eq!(size_of::<RenderSettingsUniform>(), 48);
        assert_eq!(size_of::<MaterialEntry>(), 96);
        assert_eq!(size_of::<InstanceData>(), 16);
        assert_eq!(size_of::<CameraUniform>() % 16, 0);
        assert_eq!(size_of::<EnvironmentUniform>() % 16, 0);
    }

    #[test]
    fn material_zero_stays_reserved() {
        let mut lit = Shader {
            name: "lit".to_string(),
            material_index: 3,
            ..Shader::default()
        };
        lit.surface_flags = SurfaceFlags::NODLIGHT;
        let none = Shader::default();
        let mut table = MaterialTable::from_shaders([&lit, &none]);
        assert_eq!(table.entries().len(), 4);
        assert_eq!(table.entries()[0], MaterialEntry::default());
        assert_eq!(table.entries()[3].flags, MaterialEntry::NO_DLIGHT);
        assert_eq!(table.entries()[3].roughness, 0.5);
        table.mark_clean();
        table.set(&lit);
        assert!(!table.is_dirty());
    }

    #[test]
    fn out_of_range_material_is_ignored() {
        let mut table = MaterialTable::default();
        let wild = Shader {
            name: "wild".to_string(),
            material_index: u32::MAX,
            ..Shader::default()
        };
        table.set(&wild);
        assert_eq!(table.entries().len(), 1);
        assert!(table.warnings.has_fired(WarnCategory::MATERIAL_INDEX));

        let last = Shader {
            material_index: MAX_MATERIAL_INDEX,
            ..wild
        };
        table.set(&last);
        assert_eq!(table.entries().len(), MAX_MATERIAL_INDEX as usize + 1);
    }

    #[test]
    fn jitter_stays_inside_pixel() {
        for frame in 0..32 {
            let [x, y] = halton_jitter(frame);
            assert!((-0.5..0.5).contains(&x));
            assert!((-0.5..0.5).contains(&y));
        }
    }
}
