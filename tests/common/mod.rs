#![allow(dead_code)]

use prism::{
    dispatch::EngineFrame,
    gpu,
    pipeline::{shaders, ShaderLibrary},
    world::{DrawVert, PbrParams, Shader, Surface, WorldEpoch, WorldView},
    Camera,
};

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A syntactically valid, empty SPIR-V module.
pub fn dummy_module() -> Vec<u32> {
    vec![0x0723_0203, 0x0001_0000, 0, 1, 0]
}

pub fn shader_library() -> ShaderLibrary {
    let mut library = ShaderLibrary::new();
    for &name in shaders::REQUIRED.iter().chain(shaders::OPTIONAL) {
        library.insert(name, dummy_module());
    }
    library
}

pub fn shader(material_index: u32) -> Shader {
    Shader {
        name: format!("textures/test/{}", material_index),
        material_index,
        ..Shader::default()
    }
}

pub fn emissive_shader(material_index: u32, emission: [f32; 3]) -> Shader {
    Shader {
        pbr: Some(PbrParams {
            emission: [emission[0], emission[1], emission[2], 1.0],
            ..PbrParams::default()
        }),
        ..shader(material_index)
    }
}

/// Two triangles spanning `[-half, half]^2` at height `z`, facing up.
pub struct Quad {
    pub verts: [DrawVert; 4],
    pub indices: [u32; 6],
}

impl Quad {
    pub fn new(center: [f32; 2], half: f32, z: f32) -> Self {
        let [x, y] = center;
        Self {
            verts: [
                DrawVert::at([x - half, y - half, z]),
                DrawVert::at([x + half, y - half, z]),
                DrawVert::at([x + half, y + half, z]),
                DrawVert::at([x - half, y + half, z]),
            ],
            indices: [0, 1, 2, 0, 2, 3],
        }
    }

    pub fn surface<'w>(&'w self, shader: &'w Shader) -> Surface<'w> {
        Surface::Triangles {
            verts: &self.verts,
            indices: &self.indices,
            shader,
        }
    }
}

pub fn world<'w>(name: &'w str, epoch: u32, surfaces: &'w [Surface<'w>]) -> WorldView<'w> {
    WorldView {
        epoch: WorldEpoch(epoch),
        name,
        surfaces,
        entity_string: "",
    }
}

/// Camera high above the origin, looking straight down.
pub fn top_down_camera() -> Camera {
    Camera::look_at([0.0, 0.0, 100.0].into(), [0.0, 0.0, 0.0].into(), 60.0)
}

/// Color and depth targets owned by the "engine".
pub struct EngineTargets {
    pub color: gpu::Texture,
    pub color_view: gpu::TextureView,
    pub depth: gpu::Texture,
    pub depth_view: gpu::TextureView,
    pub extent: gpu::Extent,
}

impl EngineTargets {
    pub fn new<G: gpu::Device>(gpu: &G, extent: gpu::Extent, format: gpu::TextureFormat) -> Self {
        let color = gpu
            .create_texture(gpu::TextureDesc {
                name: "engine color",
                format,
                size: extent,
                usage: gpu::TextureUsage::COPY | gpu::TextureUsage::RESOURCE | gpu::TextureUsage::STORAGE,
            })
            .unwrap();
        let depth = gpu
            .create_texture(gpu::TextureDesc {
                name: "engine depth",
                format: gpu::TextureFormat::Depth32Float,
                size: extent,
                usage: gpu::TextureUsage::RESOURCE | gpu::TextureUsage::TARGET,
            })
            .unwrap();
        Self {
            color,
            color_view: gpu.create_texture_view(color, "engine color").unwrap(),
            depth,
            depth_view: gpu.create_texture_view(depth, "engine depth").unwrap(),
            extent,
        }
    }

    pub fn frame<'a>(&self, camera: &'a Camera, frame_index: u32) -> EngineFrame<'a> {
        EngineFrame {
            color: self.color,
            color_view: self.color_view,
            depth_view: self.depth_view,
            extent: self.extent,
            camera,
            frame_index,
            environment: None,
            textures: &[],
            lightmaps: &[],
        }
    }
}

/// A core over a single floor quad centered on the origin, on map `q3dm1`.
pub fn floor_world(gpu: &gpu::null::Context, config: prism::Config, shader: &Shader) -> prism::CoreContext {
    let mut core = prism::CoreContext::with_library(config, shader_library());
    let floor = Quad::new([0.0, 0.0], 200.0, 0.0);
    let surfaces = [floor.surface(shader)];
    core.prepare_for_world(gpu);
    core.populate_world(gpu, &world("q3dm1", 1, &surfaces));
    core
}

pub fn texels(color: [f32; 4], count: usize) -> Vec<u8> {
    bytemuck::cast_slice(&vec![color; count]).to_vec()
}
