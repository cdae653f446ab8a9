//! Borrowed views of the engine's world data.
//!
//! Everything here points into memory owned by the engine for the lifetime
//! `'w` of one loaded world. Consumers copy what they need before the world
//! is reset, and the [`WorldEpoch`] tells them when that happens.

mod entity;
mod light;

pub use entity::{EntityError, EntityParser, Lexer, Token};
pub use light::{
    extract_static_lights, hash_lights, DynamicLight, GpuSceneLight, SceneLight, SceneLightKind,
    SceneLightList, DIRECTIONAL_RADIUS, MAX_LIGHT_RADIUS, MIN_LIGHT_RADIUS,
};

bitflags::bitflags! {
    /// Surface parameter bits, as stored in the shader.
    #[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq)]
    pub struct SurfaceFlags: u32 {
        const NODAMAGE = 0x1;
        const SLICK = 0x2;
        const SKY = 0x4;
        const LADDER = 0x8;
        const NOIMPACT = 0x10;
        const NOMARKS = 0x20;
        const FLESH = 0x40;
        const NODRAW = 0x80;
        const HINT = 0x100;
        const SKIP = 0x200;
        const NOLIGHTMAP = 0x400;
        const POINTLIGHT = 0x800;
        const METALSTEPS = 0x1000;
        const NOSTEPS = 0x2000;
        const NONSOLID = 0x4000;
        const LIGHTFILTER = 0x8000;
        const ALPHASHADOW = 0x10000;
        const NODLIGHT = 0x20000;
    }
}

#[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum SortClass {
    Portal,
    Environment,
    #[default]
    Opaque,
    Decal,
    SeeThrough,
    Banner,
    Fog,
    Underwater,
    Blend,
    Nearest,
}

/// One texture bundle of a shader stage.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ShaderStage {
    pub texture_index: Option<u32>,
    pub is_lightmap: bool,
}

/// Physically based parameters a shader may expose.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PbrParams {
    pub albedo: [f32; 4],
    pub specular: [f32; 4],
    pub emission: [f32; 4],
    pub roughness: f32,
    pub metallic: f32,
    pub normal_scale: f32,
    pub occlusion_strength: f32,
}

impl Default for PbrParams {
    fn default() -> Self {
        Self {
            albedo: [1.0; 4],
            specular: [0.04, 0.04, 0.04, 1.0],
            emission: [0.0, 0.0, 0.0, 1.0],
            roughness: 0.5,
            metallic: 0.0,
            normal_scale: 1.0,
            occlusion_strength: 1.0,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Shader {
    pub name: String,
    pub surface_flags: SurfaceFlags,
    pub sort: SortClass,
    pub stages: Vec<ShaderStage>,
    pub pbr: Option<PbrParams>,
    pub material_index: u32,
}

impl Shader {
    pub fn material_index(&self) -> u32 {
        self.material_index
    }

    /// Surfaces with this shader never reach the acceleration structures.
    pub fn is_invisible(&self) -> bool {
        self.surface_flags
            .intersects(SurfaceFlags::SKY | SurfaceFlags::NODRAW)
    }

    pub fn texture_indices(&self) -> impl Iterator<Item = u32> + '_ {
        self.stages
            .iter()
            .filter(|stage| !stage.is_lightmap)
            .filter_map(|stage| stage.texture_index)
    }

    pub fn lightmap_index(&self) -> Option<u32> {
        self.stages
            .iter()
            .find(|stage| stage.is_lightmap)
            .and_then(|stage| stage.texture_index)
    }
}

/// Vertex layout of world geometry.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Zeroable, bytemuck::Pod)]
pub struct DrawVert {
    pub xyz: [f32; 3],
    pub st: [f32; 2],
    pub lightmap: [f32; 2],
    pub normal: [f32; 3],
    pub color: [u8; 4],
}

impl DrawVert {
    pub fn at(xyz: [f32; 3]) -> Self {
        Self {
            xyz,
            ..Self::default()
        }
    }
}

/// A world surface, tagged by kind.
#[derive(Clone, Copy, Debug)]
pub enum Surface<'w> {
    Face {
        points: &'w [DrawVert],
        indices: &'w [u32],
        shader: &'w Shader,
    },
    Grid {
        width: u32,
        height: u32,
        verts: &'w [DrawVert],
        shader: &'w Shader,
    },
    Triangles {
        verts: &'w [DrawVert],
        indices: &'w [u32],
        shader: &'w Shader,
    },
    Poly {
        verts: &'w [DrawVert],
        shader: &'w Shader,
    },
    Other(u32),
}

impl<'w> Surface<'w> {
    pub fn shader(&self) -> Option<&'w Shader> {
        match *self {
            Self::Face { shader, .. }
            | Self::Grid { shader, .. }
            | Self::Triangles { shader, .. }
            | Self::Poly { shader, .. } => Some(shader),
            Self::Other(_) => None,
        }
    }
}

/// Generation counter of loaded worlds.
#[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct WorldEpoch(pub u32);

impl WorldEpoch {
    pub fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

/// The engine's world, valid for one epoch.
#[derive(Clone, Copy, Debug)]
pub struct WorldView<'w> {
    pub epoch: WorldEpoch,
    pub name: &'w str,
    pub surfaces: &'w [Surface<'w>],
    pub entity_string: &'w str,
}

impl<'w> WorldView<'w> {
    pub fn shaders(&self) -> impl Iterator<Item = &'w Shader> + 'w {
        self.surfaces.iter().filter_map(|surface| surface.shader())
    }
}
