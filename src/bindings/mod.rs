//! The descriptor set shared by the ray tracing pipeline and the auxiliary
//! compute passes, together with the buffers behind its bindings.
//!
//! All descriptor writes happen on the host before any command touching
//! them is recorded.

mod uniforms;

pub use uniforms::{
    halton_jitter, projection_matrix, view_matrix, CameraUniform, DebugUniform,
    EnvironmentUniform, InstanceData, MaterialEntry, MaterialTable, RenderSettingsUniform,
    MATERIAL_TEXTURE_SLOTS, MAX_MATERIAL_INDEX, NO_TEXTURE,
};

use crate::{
    accel::AccelStore, config::Config, trace::ShadowQuery, world::SceneLightList, Camera, Error,
};
use glam::Mat4;
use prism_graphics as gpu;
use std::mem;
use strum::IntoEnumIterator as _;

const MIN_STORAGE_SIZE: u64 = 256;

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, strum::EnumIter, strum::Display)]
#[repr(u32)]
pub enum Binding {
    Tlas = 0,
    Color = 1,
    Albedo = 2,
    Normal = 3,
    Motion = 4,
    Depth = 5,
    Camera = 6,
    RenderSettings = 7,
    EnvironmentMap = 8,
    Environment = 9,
    Instances = 10,
    Materials = 11,
    Textures = 12,
    Lightmaps = 13,
    SceneLights = 14,
    Direct = 15,
    Indirect = 16,
    LightmapContribution = 17,
    Debug = 18,
    ShadowQueries = 19,
    TriangleMaterials = 20,
}

impl Binding {
    pub fn index(self) -> u32 {
        self as u32
    }

    pub fn ty(self) -> gpu::BindingType {
        match self {
            Self::Tlas => gpu::BindingType::AccelerationStructure,
            Self::Color
            | Self::Albedo
            | Self::Normal
            | Self::Motion
            | Self::Depth
            | Self::Direct
            | Self::Indirect
            | Self::LightmapContribution => gpu::BindingType::StorageImage,
            Self::EnvironmentMap | Self::Textures | Self::Lightmaps => {
                gpu::BindingType::SampledImage
            }
            Self::Camera | Self::RenderSettings | Self::Environment | Self::Debug => {
                gpu::BindingType::UniformBuffer
            }
            Self::Instances
            | Self::Materials
            | Self::SceneLights
            | Self::ShadowQueries
            | Self::TriangleMaterials => gpu::BindingType::StorageBuffer,
        }
    }

    pub fn count(self) -> u32 {
        match self {
            Self::Textures => gpu::limits::TEXTURE_ARRAY_SIZE,
            Self::Lightmaps => gpu::limits::LIGHTMAP_ARRAY_SIZE,
            _ => 1,
        }
    }

    pub fn desc(self) -> gpu::BindingDesc {
        gpu::BindingDesc {
            binding: self.index(),
            ty: self.ty(),
            count: self.count(),
            partially_bound: matches!(
                self,
                Self::Textures | Self::Lightmaps | Self::TriangleMaterials
            ),
        }
    }
}

pub fn layout_bindings() -> Vec<gpu::BindingDesc> {
    Binding::iter().map(Binding::desc).collect()
}

/// Engine state feeding the uniform and storage buffers of one frame.
#[derive(Clone, Copy, Debug)]
pub struct FrameData<'a> {
    pub camera: &'a Camera,
    pub extent: gpu::Extent,
    pub frame_index: u32,
    pub config: &'a Config,
    pub lights: &'a SceneLightList,
    pub store: &'a AccelStore,
    pub has_environment_map: bool,
}

/// Image views bound for one frame. Missing lighting channels fall back
/// to the color view.
#[derive(Clone, Copy, Debug)]
pub struct FrameImages<'a> {
    pub color: gpu::TextureView,
    pub albedo: gpu::TextureView,
    pub normal: gpu::TextureView,
    pub motion: gpu::TextureView,
    pub depth: gpu::TextureView,
    pub direct: Option<gpu::TextureView>,
    pub indirect: Option<gpu::TextureView>,
    pub lightmap: Option<gpu::TextureView>,
    pub environment: Option<gpu::TextureView>,
    pub textures: &'a [gpu::TextureView],
    pub lightmaps: &'a [gpu::TextureView],
}

fn create_uniform<G: gpu::Device, T>(gpu: &G, name: &str) -> Result<gpu::Buffer, Error> {
    Ok(gpu.create_buffer(gpu::BufferDesc {
        name,
        size: mem::size_of::<T>() as u64,
        memory: gpu::Memory::Shared,
        usage: gpu::BufferUsage::UNIFORM,
    })?)
}

fn create_storage<G: gpu::Device>(gpu: &G, name: &str, size: u64) -> Result<gpu::Buffer, Error> {
    Ok(gpu.create_buffer(gpu::BufferDesc {
        name,
        size: size.max(MIN_STORAGE_SIZE).next_power_of_two(),
        memory: gpu::Memory::Shared,
        usage: gpu::BufferUsage::STORAGE,
    })?)
}

/// Make `buffer` hold at least `size` bytes. Returns `true` if it was
/// replaced, which invalidates its descriptor.
fn grow_storage<G: gpu::Device>(
    gpu: &G,
    buffer: &mut gpu::Buffer,
    name: &str,
    size: u64,
) -> Result<bool, Error> {
    if buffer.size() >= size {
        return Ok(false);
    }
    let new = create_storage(gpu, name, size)?;
    gpu.destroy_buffer(mem::replace(buffer, new));
    Ok(true)
}

fn upload_storage<G: gpu::Device>(
    gpu: &G,
    buffer: &mut gpu::Buffer,
    name: &str,
    data: &[u8],
) -> Result<(), Error> {
    grow_storage(gpu, buffer, name, data.len() as u64)?;
    if !data.is_empty() {
        gpu.write_buffer(buffer.at(0), data);
    }
    Ok(())
}

fn whole(buffer: gpu::Buffer) -> (gpu::BufferPiece, u64) {
    (buffer.into(), buffer.size())
}

/// Buffers behind the uniform and storage bindings.
#[derive(Clone, Copy, Debug)]
struct PlaneBuffers {
    camera: gpu::Buffer,
    settings: gpu::Buffer,
    environment: gpu::Buffer,
    debug: gpu::Buffer,
    instances: gpu::Buffer,
    materials: gpu::Buffer,
    lights: gpu::Buffer,
    shadow_queries: gpu::Buffer,
    triangle_materials: gpu::Buffer,
}

impl PlaneBuffers {
    /// All or nothing: buffers made before a failure are destroyed again.
    fn new<G: gpu::Device>(gpu: &G) -> Result<Self, Error> {
        let mut created = Vec::new();
        let result = Self::create(gpu, &mut created);
        if result.is_err() {
            for buffer in created {
                gpu.destroy_buffer(buffer);
            }
        }
        result
    }

    fn create<G: gpu::Device>(gpu: &G, created: &mut Vec<gpu::Buffer>) -> Result<Self, Error> {
        let mut track = |buffer: Result<gpu::Buffer, Error>| {
            let buffer = buffer?;
            created.push(buffer);
            Ok::<_, Error>(buffer)
        };
        Ok(Self {
            camera: track(create_uniform::<G, CameraUniform>(gpu, "camera"))?,
            settings: track(create_uniform::<G, RenderSettingsUniform>(gpu, "render settings"))?,
            environment: track(create_uniform::<G, EnvironmentUniform>(gpu, "environment"))?,
            debug: track(create_uniform::<G, DebugUniform>(gpu, "debug"))?,
            instances: track(create_storage(gpu, "instances", 0))?,
            materials: track(create_storage(gpu, "materials", 0))?,
            lights: track(create_storage(gpu, "scene lights", 0))?,
            shadow_queries: track(create_storage(gpu, "shadow queries", 0))?,
            triangle_materials: track(create_storage(gpu, "triangle materials", 0))?,
        })
    }
}

fn create_default_environment<G: gpu::Device>(
    gpu: &G,
) -> Result<(gpu::Texture, gpu::TextureView), Error> {
    let texture = gpu.create_texture(gpu::TextureDesc {
        name: "default environment",
        format: gpu::TextureFormat::Rgba8Unorm,
        size: gpu::Extent::new_2d(1, 1),
        usage: gpu::TextureUsage::RESOURCE | gpu::TextureUsage::COPY,
    })?;
    match gpu.create_texture_view(texture, "default environment") {
        Ok(view) => Ok((texture, view)),
        Err(e) => {
            gpu.destroy_texture(texture);
            Err(e.into())
        }
    }
}

#[derive(Debug)]
pub struct BindingPlane {
    layout: gpu::PipelineLayout,
    set: gpu::DescriptorSet,
    camera: gpu::Buffer,
    settings: gpu::Buffer,
    environment: gpu::Buffer,
    debug: gpu::Buffer,
    instances: gpu::Buffer,
    materials: gpu::Buffer,
    lights: gpu::Buffer,
    shadow_queries: gpu::Buffer,
    shadow_queries_bound: bool,
    triangle_materials: gpu::Buffer,
    default_environment: gpu::Texture,
    default_environment_view: gpu::TextureView,
    material_table: MaterialTable,
    geometry_key: Option<(usize, usize)>,
    light_hash: Option<u64>,
    prev_view_proj: Mat4,
    prev_jitter: [f32; 2],
    bound_tlas: Option<gpu::AccelerationStructure>,
}

impl BindingPlane {
    pub fn new<G: gpu::Device>(gpu: &G) -> Result<Self, Error> {
        let bindings = layout_bindings();
        let mut layout = gpu.create_pipeline_layout(gpu::PipelineLayoutDesc {
            name: "rt",
            bindings: &bindings,
            push_constant_size: gpu::limits::PUSH_CONSTANTS_SIZE,
        })?;
        let set = match gpu.allocate_descriptor_set(&layout) {
            Ok(set) => set,
            Err(e) => {
                log::error!("Descriptor set allocation failed: {}", e);
                gpu.destroy_pipeline_layout(&mut layout);
                return Err(Error::DescriptorAllocFailed);
            }
        };
        let (default_environment, default_environment_view) =
            match create_default_environment(gpu) {
                Ok(environment) => environment,
                Err(e) => {
                    gpu.free_descriptor_set(set);
                    gpu.destroy_pipeline_layout(&mut layout);
                    return Err(e);
                }
            };
        let buffers = match PlaneBuffers::new(gpu) {
            Ok(buffers) => buffers,
            Err(e) => {
                gpu.destroy_texture_view(default_environment_view);
                gpu.destroy_texture(default_environment);
                gpu.free_descriptor_set(set);
                gpu.destroy_pipeline_layout(&mut layout);
                return Err(e);
            }
        };

        let PlaneBuffers {
            camera,
            settings,
            environment,
            debug,
            instances,
            materials,
            lights,
            shadow_queries,
            triangle_materials,
        } = buffers;
        Ok(Self {
            layout,
            set,
            camera,
            settings,
            environment,
            debug,
            instances,
            materials,
            lights,
            shadow_queries,
            shadow_queries_bound: false,
            triangle_materials,
            default_environment,
            default_environment_view,
            material_table: MaterialTable::default(),
            geometry_key: None,
            light_hash: None,
            prev_view_proj: Mat4::IDENTITY,
            prev_jitter: [0.0; 2],
            bound_tlas: None,
        })
    }

    pub fn layout(&self) -> &gpu::PipelineLayout {
        &self.layout
    }

    pub fn descriptor_set(&self) -> gpu::DescriptorSet {
        self.set
    }

    pub fn material_table(&self) -> &MaterialTable {
        &self.material_table
    }

    pub fn set_material_table(&mut self, table: MaterialTable) {
        self.material_table = table;
        self.material_table.mark_dirty();
    }

    pub fn light_hash(&self) -> Option<u64> {
        self.light_hash
    }

    pub fn bound_tlas(&self) -> Option<gpu::AccelerationStructure> {
        self.bound_tlas
    }

    pub fn shadow_query_buffer(&self) -> gpu::Buffer {
        self.shadow_queries
    }

    /// Forget everything uploaded for the previous world.
    pub fn invalidate_world(&mut self) {
        self.geometry_key = None;
        self.light_hash = None;
        self.bound_tlas = None;
        self.material_table = MaterialTable::default();
    }

    /// Write the uniforms and any stale storage buffers. Returns `true` if
    /// the scene-light content changed since the last upload.
    #[profiling::function]
    pub fn prepare_frame_data<G: gpu::Device>(
        &mut self,
        gpu: &G,
        frame: &FrameData,
    ) -> Result<bool, Error> {
        let config = frame.config;
        let jitter = if config.temporal {
            halton_jitter(frame.frame_index)
        } else {
            [0.0; 2]
        };
        let camera = CameraUniform::new(
            frame.camera,
            frame.extent,
            self.prev_view_proj,
            jitter,
            self.prev_jitter,
            frame.frame_index,
            config,
        );
        gpu.write_buffer(self.camera.into(), bytemuck::bytes_of(&camera));
        self.prev_view_proj =
            projection_matrix(frame.camera, frame.extent) * view_matrix(frame.camera);
        self.prev_jitter = jitter;

        let settings = RenderSettingsUniform::from_config(config);
        gpu.write_buffer(self.settings.into(), bytemuck::bytes_of(&settings));
        let environment = EnvironmentUniform::new(
            config,
            frame.lights.len() as u32,
            frame.has_environment_map,
        );
        gpu.write_buffer(self.environment.into(), bytemuck::bytes_of(&environment));
        let debug = DebugUniform {
            mode: config.debug,
            surface_debug: config.surface_debug,
            overlay: (config.debug != 0) as u32,
            frame_index: frame.frame_index,
        };
        gpu.write_buffer(self.debug.into(), bytemuck::bytes_of(&debug));

        if self.material_table.is_dirty() {
            upload_storage(
                gpu,
                &mut self.materials,
                "materials",
                bytemuck::cast_slice(self.material_table.entries()),
            )?;
            self.material_table.mark_clean();
        }

        let store = frame.store;
        let geometry_key = (store.instance_count(), store.flattened_materials().len());
        if self.geometry_key != Some(geometry_key) {
            let instances = store
                .instances()
                .iter()
                .map(InstanceData::from)
                .collect::<Vec<_>>();
            upload_storage(
                gpu,
                &mut self.instances,
                "instances",
                bytemuck::cast_slice(&instances),
            )?;
            upload_storage(
                gpu,
                &mut self.triangle_materials,
                "triangle materials",
                bytemuck::cast_slice(store.flattened_materials()),
            )?;
            self.geometry_key = Some(geometry_key);
        }

        let light_hash = frame.lights.hash();
        let lights_changed = self.light_hash != Some(light_hash);
        if lights_changed {
            upload_storage(
                gpu,
                &mut self.lights,
                "scene lights",
                bytemuck::cast_slice(frame.lights.records()),
            )?;
            log::debug!(
                "Uploaded {} scene lights, hash {:#x}",
                frame.lights.len(),
                light_hash
            );
            self.light_hash = Some(light_hash);
        }
        Ok(lights_changed)
    }

    pub fn bind_tlas<G: gpu::Device>(&mut self, gpu: &G, tlas: gpu::AccelerationStructure) {
        if self.bound_tlas == Some(tlas) {
            return;
        }
        gpu.update_descriptor_set(
            self.set,
            &[gpu::DescriptorWrite {
                binding: Binding::Tlas.index(),
                array_element: 0,
                resource: gpu::DescriptorResource::AccelerationStructure(tlas),
            }],
        );
        self.bound_tlas = Some(tlas);
    }

    /// Point every binding at this frame's resources.
    #[profiling::function]
    pub fn update_descriptor_sets<G: gpu::Device>(
        &mut self,
        gpu: &G,
        tlas: gpu::AccelerationStructure,
        images: &FrameImages,
    ) {
        self.bind_tlas(gpu, tlas);

        let storage_image = |binding: Binding, view: gpu::TextureView| gpu::DescriptorWrite {
            binding: binding.index(),
            array_element: 0,
            resource: gpu::DescriptorResource::StorageImage(view),
        };
        let uniform = |binding: Binding, buffer: gpu::Buffer| {
            let (piece, size) = whole(buffer);
            gpu::DescriptorWrite {
                binding: binding.index(),
                array_element: 0,
                resource: gpu::DescriptorResource::UniformBuffer { piece, size },
            }
        };
        let storage = |binding: Binding, buffer: gpu::Buffer| {
            let (piece, size) = whole(buffer);
            gpu::DescriptorWrite {
                binding: binding.index(),
                array_element: 0,
                resource: gpu::DescriptorResource::StorageBuffer { piece, size },
            }
        };

        let mut writes = vec![
            storage_image(Binding::Color, images.color),
            storage_image(Binding::Albedo, images.albedo),
            storage_image(Binding::Normal, images.normal),
            storage_image(Binding::Motion, images.motion),
            storage_image(Binding::Depth, images.depth),
            uniform(Binding::Camera, self.camera),
            uniform(Binding::RenderSettings, self.settings),
            gpu::DescriptorWrite {
                binding: Binding::EnvironmentMap.index(),
                array_element: 0,
                resource: gpu::DescriptorResource::SampledImage(
                    images
                        .environment
                        .unwrap_or(self.default_environment_view),
                ),
            },
            uniform(Binding::Environment, self.environment),
            storage(Binding::Instances, self.instances),
            storage(Binding::Materials, self.materials),
            storage(Binding::SceneLights, self.lights),
            storage_image(Binding::Direct, images.direct.unwrap_or(images.color)),
            storage_image(Binding::Indirect, images.indirect.unwrap_or(images.color)),
            storage_image(
                Binding::LightmapContribution,
                images.lightmap.unwrap_or(images.color),
            ),
            uniform(Binding::Debug, self.debug),
            storage(Binding::ShadowQueries, self.shadow_queries),
            storage(Binding::TriangleMaterials, self.triangle_materials),
        ];
        self.shadow_queries_bound = true;

        let textures = &images.textures
            [..images.textures.len().min(Binding::Textures.count() as usize)];
        if !textures.is_empty() {
            writes.push(gpu::DescriptorWrite {
                binding: Binding::Textures.index(),
                array_element: 0,
                resource: gpu::DescriptorResource::SampledImages(textures),
            });
        }
        let lightmaps = &images.lightmaps
            [..images.lightmaps.len().min(Binding::Lightmaps.count() as usize)];
        if !lightmaps.is_empty() {
            writes.push(gpu::DescriptorWrite {
                binding: Binding::Lightmaps.index(),
                array_element: 0,
                resource: gpu::DescriptorResource::SampledImages(lightmaps),
            });
        }

        gpu.update_descriptor_set(self.set, &writes);
    }

    /// Make room for `count` shadow queries, rebinding the buffer if it
    /// had to grow.
    pub fn ensure_shadow_capacity<G: gpu::Device>(
        &mut self,
        gpu: &G,
        count: usize,
    ) -> Result<gpu::Buffer, Error> {
        let size = (count.max(1) * mem::size_of::<ShadowQuery>()) as u64;
        let grown = grow_storage(gpu, &mut self.shadow_queries, "shadow queries", size)?;
        if grown || !self.shadow_queries_bound {
            let (piece, size) = whole(self.shadow_queries);
            gpu.update_descriptor_set(
                self.set,
                &[gpu::DescriptorWrite {
                    binding: Binding::ShadowQueries.index(),
                    array_element: 0,
                    resource: gpu::DescriptorResource::StorageBuffer { piece, size },
                }],
            );
            self.shadow_queries_bound = true;
        }
        Ok(self.shadow_queries)
    }

    pub fn destroy<G: gpu::Device>(&mut self, gpu: &G) {
        for buffer in [
            self.camera,
            self.settings,
            self.environment,
            self.debug,
            self.instances,
            self.materials,
            self.lights,
            self.shadow_queries,
            self.triangle_materials,
        ] {
            gpu.destroy_buffer(buffer);
        }
        gpu.destroy_texture_view(self.default_environment_view);
        gpu.destroy_texture(self.default_environment);
        gpu.free_descriptor_set(self.set);
        gpu.destroy_pipeline_layout(&mut self.layout);
        self.bound_tlas = None;
        self.shadow_queries_bound = false;
    }
}
