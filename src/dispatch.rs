//! Per-frame recording of the hardware path: acceleration structure
//! maintenance, auxiliary image passes, the ray dispatch, and the copy back
//! into the engine's color target.

use crate::{
    accel::AccelStore,
    bindings::{BindingPlane, FrameData, FrameImages},
    config::{clamp_hybrid_intensity, Composite, Config},
    pipeline::{
        AuxPass, AuxPipelines, CompositeParams, DebugParams, DepthParams, RtPipeline, ShaderLibrary,
        ShadowPipeline, ShadowQueryBatch,
    },
    world::SceneLightList,
    Camera, Error,
};
use glam::Vec3;
use prism_graphics as gpu;
use std::fmt;

pub const COLOR_FORMAT: gpu::TextureFormat = gpu::TextureFormat::Rgba32Float;
pub const ALBEDO_FORMAT: gpu::TextureFormat = gpu::TextureFormat::Rgba8Unorm;
pub const NORMAL_FORMAT: gpu::TextureFormat = gpu::TextureFormat::Rgba16Float;
pub const MOTION_FORMAT: gpu::TextureFormat = gpu::TextureFormat::Rgba16Float;
pub const DEPTH_FORMAT: gpu::TextureFormat = gpu::TextureFormat::R32Float;
pub const CHANNEL_FORMAT: gpu::TextureFormat = gpu::TextureFormat::Rgba16Float;

/// Outcome of the last recorded frame.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum FrameStatus {
    #[default]
    Ok,
    NoWorld,
    NoTlas,
    ZeroExtent,
    TlasBuildFailed(String),
    Failed(String),
}

impl fmt::Display for FrameStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Self::Ok => write!(f, "ok"),
            Self::NoWorld => write!(f, "no world geometry loaded"),
            Self::NoTlas => write!(f, "skipped: no TLAS"),
            Self::ZeroExtent => write!(f, "skipped: zero extent"),
            Self::TlasBuildFailed(ref reason) => write!(f, "TLAS build failed: {}", reason),
            Self::Failed(ref reason) => write!(f, "failed: {}", reason),
        }
    }
}

impl FrameStatus {
    pub fn is_ok(&self) -> bool {
        *self == Self::Ok
    }
}

/// Engine-owned inputs of one frame. The color target is expected in
/// `ShaderRead` layout and is returned in it.
#[derive(Clone, Copy, Debug)]
pub struct EngineFrame<'a> {
    pub color: gpu::Texture,
    pub color_view: gpu::TextureView,
    pub depth_view: gpu::TextureView,
    pub extent: gpu::Extent,
    pub camera: &'a Camera,
    pub frame_index: u32,
    pub environment: Option<gpu::TextureView>,
    pub textures: &'a [gpu::TextureView],
    pub lightmaps: &'a [gpu::TextureView],
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RtImage {
    pub texture: gpu::Texture,
    pub view: gpu::TextureView,
}

impl RtImage {
    fn new<G: gpu::Device>(
        gpu: &G,
        name: &str,
        format: gpu::TextureFormat,
        extent: gpu::Extent,
        usage: gpu::TextureUsage,
    ) -> Result<Self, Error> {
        let texture = gpu.create_texture(gpu::TextureDesc {
            name,
            format,
            size: extent,
            usage,
        })?;
        match gpu.create_texture_view(texture, name) {
            Ok(view) => Ok(Self { texture, view }),
            Err(e) => {
                gpu.destroy_texture(texture);
                Err(e.into())
            }
        }
    }

    fn destroy<G: gpu::Device>(&self, gpu: &G) {
        gpu.destroy_texture_view(self.view);
        gpu.destroy_texture(self.texture);
    }
}

/// Images written by the ray tracing pipeline, sized to the render extent.
#[derive(Debug)]
pub struct RtImages {
    extent: gpu::Extent,
    pub color: RtImage,
    pub albedo: RtImage,
    pub normal: RtImage,
    pub motion: RtImage,
    pub depth: RtImage,
    /// Separate direct, indirect, and lightmap channels, for debugging.
    pub channels: Option<[RtImage; 3]>,
    /// The color image has been through a dispatch and sits in
    /// `TransferSrc`.
    output_initialized: bool,
}

impl RtImages {
    pub fn new<G: gpu::Device>(
        gpu: &G,
        extent: gpu::Extent,
        with_channels: bool,
    ) -> Result<Self, Error> {
        let mut created = Vec::new();
        let result = Self::create_all(gpu, extent, with_channels, &mut created);
        if result.is_err() {
            for image in created {
                image.destroy(gpu);
            }
        }
        result
    }

    fn create_all<G: gpu::Device>(
        gpu: &G,
        extent: gpu::Extent,
        with_channels: bool,
        created: &mut Vec<RtImage>,
    ) -> Result<Self, Error> {
        use gpu::TextureUsage as Tu;
        let mut image = |name: &str,
                         format: gpu::TextureFormat,
                         usage: gpu::TextureUsage|
         -> Result<RtImage, Error> {
            let image = RtImage::new(gpu, name, format, extent, usage)?;
            created.push(image);
            Ok(image)
        };
        let color = image("rt color", COLOR_FORMAT, Tu::STORAGE | Tu::COPY)?;
        let albedo = image(
            "rt albedo",
            ALBEDO_FORMAT,
            Tu::STORAGE | Tu::COPY | Tu::RESOURCE,
        )?;
        let normal = image("rt normal", NORMAL_FORMAT, Tu::STORAGE | Tu::RESOURCE)?;
        let motion = image("rt motion", MOTION_FORMAT, Tu::STORAGE)?;
        let depth = image("rt depth", DEPTH_FORMAT, Tu::STORAGE | Tu::RESOURCE)?;
        let channels = if with_channels {
            Some([
                image("rt direct", CHANNEL_FORMAT, Tu::STORAGE)?,
                image("rt indirect", CHANNEL_FORMAT, Tu::STORAGE)?,
                image("rt lightmap", CHANNEL_FORMAT, Tu::STORAGE)?,
            ])
        } else {
            None
        };
        Ok(Self {
            extent,
            color,
            albedo,
            normal,
            motion,
            depth,
            channels,
            output_initialized: false,
        })
    }

    pub fn extent(&self) -> gpu::Extent {
        self.extent
    }

    pub fn has_channels(&self) -> bool {
        self.channels.is_some()
    }

    pub fn is_output_initialized(&self) -> bool {
        self.output_initialized
    }

    fn all(&self) -> impl Iterator<Item = &RtImage> {
        [&self.color, &self.albedo, &self.normal, &self.motion, &self.depth]
            .into_iter()
            .chain(self.channels.iter().flatten())
    }

    pub fn destroy<G: gpu::Device>(&mut self, gpu: &G) {
        for image in self.all() {
            image.destroy(gpu);
        }
        self.output_initialized = false;
    }
}

/// The hardware backend: binding plane, pipelines, and frame images.
pub struct RtRenderer {
    plane: BindingPlane,
    pipeline: RtPipeline,
    aux: AuxPipelines,
    shadow: Option<ShadowPipeline>,
    images: Option<RtImages>,
    pipeline_key: (u32, u32),
    last_status: FrameStatus,
    composite_fallback_logged: bool,
}

impl RtRenderer {
    pub fn new<G: gpu::Device>(
        gpu: &G,
        library: &ShaderLibrary,
        config: &Config,
    ) -> Result<Self, Error> {
        let mut plane = BindingPlane::new(gpu)?;
        let mut pipeline =
            match RtPipeline::new(gpu, library, plane.layout(), config.bounces, config.quality) {
                Ok(pipeline) => pipeline,
                Err(e) => {
                    plane.destroy(gpu);
                    return Err(e);
                }
            };
        let aux = match AuxPipelines::new(gpu, library) {
            Ok(aux) => aux,
            Err(e) => {
                pipeline.destroy(gpu);
                plane.destroy(gpu);
                return Err(e);
            }
        };
        let shadow = match ShadowPipeline::new(gpu, library, plane.layout()) {
            Ok(shadow) => Some(shadow),
            Err(e) => {
                log::info!("Bulk shadow queries are unavailable: {}", e);
                None
            }
        };
        Ok(Self {
            plane,
            pipeline,
            aux,
            shadow,
            images: None,
            pipeline_key: (config.bounces, config.quality),
            last_status: FrameStatus::Ok,
            composite_fallback_logged: false,
        })
    }

    pub fn plane(&self) -> &BindingPlane {
        &self.plane
    }

    pub fn plane_mut(&mut self) -> &mut BindingPlane {
        &mut self.plane
    }

    pub fn pipeline(&self) -> &RtPipeline {
        &self.pipeline
    }

    pub fn images(&self) -> Option<&RtImages> {
        self.images.as_ref()
    }

    pub fn last_status(&self) -> &FrameStatus {
        &self.last_status
    }

    pub fn has_shadow_queries(&self) -> bool {
        self.shadow.is_some()
    }

    /// Bulk shadow resolver against the currently bound TLAS.
    pub fn shadow_resolver<'a, G: gpu::Device>(
        &'a mut self,
        gpu: &'a G,
    ) -> Option<ShadowQueryBatch<'a, G>> {
        let pipeline = self.shadow.as_ref()?;
        self.plane.bound_tlas()?;
        Some(ShadowQueryBatch::new(gpu, pipeline, &mut self.plane))
    }

    /// Recreate the ray tracing pipeline when recursion or quality change.
    pub fn update_pipeline<G: gpu::Device>(
        &mut self,
        gpu: &G,
        library: &ShaderLibrary,
        config: &Config,
    ) -> Result<(), Error> {
        let key = (config.bounces, config.quality);
        if key == self.pipeline_key {
            return Ok(());
        }
        let pipeline =
            RtPipeline::new(gpu, library, self.plane.layout(), config.bounces, config.quality)?;
        self.pipeline.destroy(gpu);
        self.pipeline = pipeline;
        self.pipeline_key = key;
        Ok(())
    }

    fn ensure_images<G: gpu::Device>(
        &mut self,
        gpu: &G,
        extent: gpu::Extent,
        with_channels: bool,
    ) -> Result<(), Error> {
        if let Some(ref images) = self.images {
            if images.extent == extent && images.has_channels() == with_channels {
                return Ok(());
            }
        }
        if let Some(mut images) = self.images.take() {
            images.destroy(gpu);
        }
        log::debug!("Creating RT images of {}x{}", extent.width, extent.height);
        self.images = Some(RtImages::new(gpu, extent, with_channels)?);
        Ok(())
    }

    /// Record all ray tracing work of the frame into `encoder`.
    #[profiling::function]
    pub fn record_commands<G: gpu::Device>(
        &mut self,
        gpu: &G,
        encoder: &mut gpu::CommandEncoder,
        store: &mut AccelStore,
        frame: &EngineFrame,
        config: &Config,
        lights: &SceneLightList,
    ) -> &FrameStatus {
        self.last_status = match self.record_inner(gpu, encoder, store, frame, config, lights) {
            Ok(status) => status,
            Err(e) => FrameStatus::Failed(e.to_string()),
        };
        &self.last_status
    }

    fn record_inner<G: gpu::Device>(
        &mut self,
        gpu: &G,
        encoder: &mut gpu::CommandEncoder,
        store: &mut AccelStore,
        frame: &EngineFrame,
        config: &Config,
        lights: &SceneLightList,
    ) -> Result<FrameStatus, Error> {
        let extent = frame.extent;
        if extent.is_empty() {
            return Ok(FrameStatus::ZeroExtent);
        }
        if store.needs_rebuild() {
            if let Err(e) = store.build_tlas(gpu) {
                return Ok(FrameStatus::TlasBuildFailed(e.to_string()));
            }
        }
        if store.instance_count() == 0 {
            return Ok(FrameStatus::NoWorld);
        }
        let Some(tlas) = store.active_tlas() else {
            return Ok(FrameStatus::NoTlas);
        };

        self.ensure_images(gpu, extent, config.debug != 0)?;
        let Some(ref mut images) = self.images else {
            return Ok(FrameStatus::Failed("no RT images".to_string()));
        };

        // Host-side buffer and descriptor updates. These come first so that
        // nothing is recorded for a frame that fails here.
        let lights_changed = self.plane.prepare_frame_data(
            gpu,
            &FrameData {
                camera: frame.camera,
                extent,
                frame_index: frame.frame_index,
                config,
                lights,
                store,
                has_environment_map: frame.environment.is_some(),
            },
        )?;
        if lights_changed {
            log::debug!("Scene lights changed at frame {}", frame.frame_index);
        }
        let channel = |i: usize| images.channels.as_ref().map(|c| c[i].view);
        self.plane.update_descriptor_sets(
            gpu,
            tlas,
            &FrameImages {
                color: images.color.view,
                albedo: images.albedo.view,
                normal: images.normal.view,
                motion: images.motion.view,
                depth: images.depth.view,
                direct: channel(0),
                indirect: channel(1),
                lightmap: channel(2),
                environment: frame.environment,
                textures: frame.textures,
                lightmaps: frame.lightmaps,
            },
        );

        // Albedo proxy from the raster target.
        encoder.transition(
            frame.color,
            gpu::ImageLayout::ShaderRead,
            gpu::ImageLayout::TransferSrc,
        );
        encoder.transition(
            images.albedo.texture,
            gpu::ImageLayout::Undefined,
            gpu::ImageLayout::TransferDst,
        );
        if frame.color.format() == ALBEDO_FORMAT && frame.color.size() == extent {
            encoder.copy_texture_to_texture(frame.color, images.albedo.texture, extent);
        } else {
            encoder.blit_texture(frame.color, images.albedo.texture, gpu::Filter::Linear);
        }
        encoder.transition(
            frame.color,
            gpu::ImageLayout::TransferSrc,
            gpu::ImageLayout::ShaderRead,
        );
        encoder.transition(
            images.albedo.texture,
            gpu::ImageLayout::TransferDst,
            gpu::ImageLayout::General,
        );

        // Depth and normal reconstruction.
        let depth_params = DepthParams {
            z_near: frame.camera.z_near,
            z_far: frame.camera.z_far,
            tan_half_fov: (frame.camera.fov_y.to_radians() * 0.5).tan(),
            aspect: extent.width as f32 / extent.height as f32,
        };
        encoder.transition(
            images.depth.texture,
            gpu::ImageLayout::Undefined,
            gpu::ImageLayout::General,
        );
        self.aux.record(
            gpu,
            encoder,
            AuxPass::LinearizeDepth,
            frame.depth_view,
            images.depth.view,
            extent,
            &depth_params,
        );
        encoder.transition(
            images.normal.texture,
            gpu::ImageLayout::Undefined,
            gpu::ImageLayout::General,
        );
        self.aux.record(
            gpu,
            encoder,
            AuxPass::ReconstructNormal,
            frame.depth_view,
            images.normal.view,
            extent,
            &depth_params,
        );
        encoder.transition(
            images.motion.texture,
            gpu::ImageLayout::Undefined,
            gpu::ImageLayout::General,
        );
        if let Some(ref channels) = images.channels {
            for channel in channels.iter() {
                encoder.transition(
                    channel.texture,
                    gpu::ImageLayout::Undefined,
                    gpu::ImageLayout::General,
                );
            }
        }
        encoder.barrier(
            gpu::PipelineStages::COMPUTE,
            gpu::Access::SHADER_WRITE,
            gpu::PipelineStages::RAY_TRACING,
            gpu::Access::SHADER_READ,
        );

        // Ray dispatch.
        let color_layout = if images.output_initialized {
            gpu::ImageLayout::TransferSrc
        } else {
            gpu::ImageLayout::Undefined
        };
        encoder.transition(images.color.texture, color_layout, gpu::ImageLayout::General);
        encoder.bind_ray_tracing_pipeline(self.pipeline.raw());
        encoder.bind_descriptor_set(
            gpu::BindPoint::RayTracing,
            self.plane.layout(),
            self.plane.descriptor_set(),
        );
        encoder.trace_rays(
            self.pipeline.regions(),
            [extent.width, extent.height, 1],
        );

        // Hybrid mode adds the RT result onto the raster albedo in place,
        // so the copy below carries both.
        if config.composite == Composite::Hybrid {
            if self.aux.has(AuxPass::Composite) {
                encoder.barrier(
                    gpu::PipelineStages::RAY_TRACING,
                    gpu::Access::SHADER_WRITE,
                    gpu::PipelineStages::COMPUTE,
                    gpu::Access::SHADER_READ | gpu::Access::SHADER_WRITE,
                );
                let params = CompositeParams {
                    intensity: clamp_hybrid_intensity(config.hybrid_intensity),
                    ..Default::default()
                };
                self.aux.record(
                    gpu,
                    encoder,
                    AuxPass::Composite,
                    images.albedo.view,
                    images.color.view,
                    extent,
                    &params,
                );
            } else if !self.composite_fallback_logged {
                log::warn!("Hybrid composite shader is missing, copying RT output as is");
                self.composite_fallback_logged = true;
            }
        }

        // Copy back into the engine target.
        encoder.transition(
            images.color.texture,
            gpu::ImageLayout::General,
            gpu::ImageLayout::TransferSrc,
        );
        encoder.transition(
            frame.color,
            gpu::ImageLayout::ShaderRead,
            gpu::ImageLayout::TransferDst,
        );
        if frame.color.format() == COLOR_FORMAT && frame.color.size() == extent {
            encoder.copy_texture_to_texture(images.color.texture, frame.color, extent);
        } else {
            encoder.blit_texture(images.color.texture, frame.color, gpu::Filter::Nearest);
        }
        encoder.transition(
            frame.color,
            gpu::ImageLayout::TransferDst,
            gpu::ImageLayout::ShaderRead,
        );
        images.output_initialized = true;
        Ok(FrameStatus::Ok)
    }

    /// Record the debug overlay onto the engine's color target. Returns
    /// `false` when nothing was recorded.
    pub fn apply_debug_overlay<G: gpu::Device>(
        &mut self,
        gpu: &G,
        encoder: &mut gpu::CommandEncoder,
        color: gpu::Texture,
        color_view: gpu::TextureView,
        config: &Config,
    ) -> bool {
        if config.debug == 0 {
            return false;
        }
        let Some(ref images) = self.images else {
            return false;
        };
        if !self.aux.has(AuxPass::DebugOverlay) {
            return false;
        }
        let params = DebugParams {
            mode: config.debug,
            surface_debug: config.surface_debug,
            ..Default::default()
        };
        encoder.transition(color, gpu::ImageLayout::ShaderRead, gpu::ImageLayout::General);
        self.aux.record(
            gpu,
            encoder,
            AuxPass::DebugOverlay,
            images.normal.view,
            color_view,
            color.size(),
            &params,
        );
        encoder.transition(color, gpu::ImageLayout::General, gpu::ImageLayout::ShaderRead);
        true
    }

    /// Read back the last RT color output.
    pub fn read_output<G: gpu::Device>(&self, gpu: &G) -> Result<Option<Vec<Vec3>>, Error> {
        let Some(ref images) = self.images else {
            return Ok(None);
        };
        if !images.output_initialized {
            return Ok(None);
        }
        let extent = images.extent;
        let size = extent.pixel_count() as u64 * COLOR_FORMAT.block_size() as u64;
        let buffer = gpu.create_buffer(gpu::BufferDesc {
            name: "rt readback",
            size,
            memory: gpu::Memory::Shared,
            usage: gpu::BufferUsage::TRANSFER_DST,
        })?;
        let mut encoder = gpu::CommandEncoder::new("rt readback");
        encoder.copy_texture_to_buffer(images.color.texture, buffer.into(), extent);
        let submitted = gpu.submit_and_wait(&mut encoder, gpu::Fence::Readback);
        let mut texels = vec![[0f32; 4]; extent.pixel_count()];
        if submitted.is_ok() {
            gpu.read_buffer(buffer.into(), bytemuck::cast_slice_mut(&mut texels));
        }
        gpu.destroy_buffer(buffer);
        submitted?;
        Ok(Some(
            texels
                .iter()
                .map(|t| Vec3::new(t[0], t[1], t[2]))
                .collect(),
        ))
    }

    pub fn destroy<G: gpu::Device>(&mut self, gpu: &G) {
        if let Some(mut images) = self.images.take() {
            images.destroy(gpu);
        }
        if let Some(ref mut shadow) = self.shadow {
            shadow.destroy(gpu);
        }
        self.shadow = None;
        self.aux.destroy(gpu);
        self.pipeline.destroy(gpu);
        self.plane.destroy(gpu);
    }
}
