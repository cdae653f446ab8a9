use crate::{
    accel::AccelStore,
    accum::{AccumulationKey, Accumulator},
    backend::{Backend, BackendSelector, SoftwareReason},
    batch::{BatchBuilder, BatchStats},
    bindings::MaterialTable,
    config::Config,
    denoise::{DenoiseLevel, Denoiser},
    dispatch::{EngineFrame, FrameStatus, RtRenderer},
    pipeline::ShaderLibrary,
    trace::{CpuShadowResolver, PathTracer, TraceSettings},
    validate::{ValidationRecord, ValidationTarget, Validator},
    world::{extract_static_lights, DynamicLight, SceneLight, SceneLightList, Shader, WorldEpoch, WorldView},
    Camera, Error, WarnCategory, WarnOnce,
};
use glam::Vec3;
use prism_graphics as gpu;

/// Seed of the software sampling sequence. Sample indices vary per frame,
/// the seed stays fixed so the reference is reproducible.
const SOFTWARE_SEED: u32 = 0x5eed;

/// Result of [`CoreContext::render_frame`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FrameOutput<'a> {
    /// Ray tracing work was recorded into the engine's encoder.
    Recorded,
    /// Nothing was recorded and the raster image stands. Carries the reason.
    Skipped(&'a str),
    /// Software radiance, row-major over the frame extent.
    Software(&'a [Vec3]),
}

/// Everything the tracer owns, from world load to shutdown.
pub struct CoreContext {
    config: Config,
    store: AccelStore,
    batches: BatchBuilder,
    batch_stats: BatchStats,
    selector: BackendSelector,
    backend: Backend,
    renderer: Option<RtRenderer>,
    library: ShaderLibrary,
    materials: MaterialTable,
    tracer: PathTracer,
    accumulator: Accumulator,
    denoiser: Denoiser,
    validator: Validator,
    static_lights: Vec<SceneLight>,
    lights: SceneLightList,
    warnings: WarnOnce,
    world: Option<(WorldEpoch, String)>,
    frame_index: u32,
    last_status: String,
}

impl CoreContext {
    /// Create the core, loading shader modules from `config.shader_path`
    /// when the device can trace rays.
    pub fn new<G: gpu::Device>(gpu: &G, config: Config) -> Self {
        let mut library = ShaderLibrary::new();
        let mut missing = false;
        if gpu.capabilities().ray_tracing.is_some() {
            match ShaderLibrary::load(&config.shader_path) {
                Ok(loaded) => library = loaded,
                Err(e) => {
                    log::warn!("Hardware tracing unavailable: {}", e);
                    missing = true;
                }
            }
        }
        let mut context = Self::with_library(config, library);
        if missing {
            context.selector.force_software(SoftwareReason::ShaderMissing);
        }
        context
    }

    /// Create the core over an already loaded shader library.
    pub fn with_library(mut config: Config, library: ShaderLibrary) -> Self {
        config.sanitize();
        let settings = TraceSettings::from_config(&config);
        Self {
            config,
            store: AccelStore::new(),
            batches: BatchBuilder::new(),
            batch_stats: BatchStats::default(),
            selector: BackendSelector::new(),
            backend: Backend::Software,
            renderer: None,
            library,
            materials: MaterialTable::default(),
            tracer: PathTracer::new(Vec::new(), settings),
            accumulator: Accumulator::default(),
            denoiser: Denoiser::new(),
            validator: Validator::new(),
            static_lights: Vec::new(),
            lights: SceneLightList::default(),
            warnings: WarnOnce::default(),
            world: None,
            frame_index: 0,
            last_status: FrameStatus::NoWorld.to_string(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &AccelStore {
        &self.store
    }

    /// Direct access for dynamic geometry and refits.
    pub fn store_mut(&mut self) -> &mut AccelStore {
        &mut self.store
    }

    pub fn batch_stats(&self) -> BatchStats {
        self.batch_stats
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn renderer(&self) -> Option<&RtRenderer> {
        self.renderer.as_ref()
    }

    pub fn renderer_mut(&mut self) -> Option<&mut RtRenderer> {
        self.renderer.as_mut()
    }

    pub fn tracer(&self) -> &PathTracer {
        &self.tracer
    }

    pub fn accumulator(&self) -> &Accumulator {
        &self.accumulator
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    pub fn lights(&self) -> &SceneLightList {
        &self.lights
    }

    pub fn static_lights(&self) -> &[SceneLight] {
        &self.static_lights
    }

    pub fn world_name(&self) -> Option<&str> {
        self.world.as_ref().map(|&(_, ref name)| name.as_str())
    }

    pub fn frame_index(&self) -> u32 {
        self.frame_index
    }

    /// Update one parameter by name.
    pub fn set_config(&mut self, name: &str, value: &str) -> Result<(), Error> {
        self.config.set(name, value)?;
        self.apply_config(name == "shader_path");
        Ok(())
    }

    pub fn replace_config(&mut self, mut config: Config) {
        config.sanitize();
        let reload = config.shader_path != self.config.shader_path;
        self.config = config;
        self.apply_config(reload);
    }

    fn apply_config(&mut self, reload_shaders: bool) {
        if reload_shaders {
            match ShaderLibrary::load(&self.config.shader_path) {
                Ok(library) => self.library = library,
                Err(e) => log::warn!("Keeping the previous shaders: {}", e),
            }
        }
        self.selector.reconfigure();
        self.tracer.set_settings(TraceSettings::from_config(&self.config));
    }

    /// Drop everything built for the previous world.
    pub fn prepare_for_world<G: gpu::Device>(&mut self, gpu: &G) {
        self.store.reset(gpu);
        self.batches.begin_world_load();
        self.batch_stats = BatchStats::default();
        self.materials = MaterialTable::default();
        self.static_lights.clear();
        self.lights = SceneLightList::default();
        self.tracer = PathTracer::new(Vec::new(), TraceSettings::from_config(&self.config));
        self.accumulator = Accumulator::default();
        self.denoiser.reset();
        self.validator.clear();
        self.warnings.reset();
        if let Some(ref mut renderer) = self.renderer {
            renderer.plane_mut().invalidate_world();
        }
        self.world = None;
        self.last_status = FrameStatus::NoWorld.to_string();
    }

    /// Batch the world surfaces into acceleration structures and rebuild
    /// the software scene, materials, and static lights.
    #[profiling::function]
    pub fn populate_world<G: gpu::Device>(&mut self, gpu: &G, world: &WorldView) -> BatchStats {
        if let Some((epoch, _)) = self.world {
            if epoch == world.epoch {
                log::warn!("World {} is already populated", world.name);
                return self.batch_stats;
            }
            log::debug!("Populating over world epoch {:?} without a reset", epoch);
        }
        for surface in world.surfaces {
            self.batches.process_surface(&mut self.store, surface);
        }
        self.batch_stats = self.batches.end_world_load(&mut self.store, gpu);

        self.materials = MaterialTable::from_shaders(world.shaders());
        if let Some(ref mut renderer) = self.renderer {
            renderer.plane_mut().set_material_table(self.materials.clone());
        }
        let triangles = self.batches.take_triangles();
        self.tracer = PathTracer::new(triangles, TraceSettings::from_config(&self.config));
        self.tracer.set_materials_from_shaders(world.shaders());
        self.static_lights = extract_static_lights(world.entity_string, &mut self.warnings);
        log::info!(
            "World {}: {} static lights, {} triangles for the software path",
            world.name,
            self.static_lights.len(),
            self.tracer.scene().triangle_count()
        );

        self.world = Some((world.epoch, world.name.to_string()));
        self.last_status = if self.store.instance_count() == 0 {
            FrameStatus::NoWorld.to_string()
        } else {
            FrameStatus::Ok.to_string()
        };
        self.batch_stats
    }

    /// Rebuild the TLAS over unchanged transforms on the next frame.
    pub fn request_world_refit(&mut self) {
        self.store.request_world_refit();
    }

    /// Pick up a changed shader, then refit the world.
    pub fn update_shader(&mut self, shader: &Shader) {
        self.materials.set(shader);
        if let Some(ref mut renderer) = self.renderer {
            renderer.plane_mut().set_material_table(self.materials.clone());
        }
        self.tracer.set_materials_from_shaders([shader]);
        self.request_world_refit();
    }

    fn init_hardware<G: gpu::Device>(&mut self, gpu: &G) -> bool {
        match RtRenderer::new(gpu, &self.library, &self.config) {
            Ok(mut renderer) => {
                renderer.plane_mut().set_material_table(self.materials.clone());
                self.renderer = Some(renderer);
                self.selector.init_hardware();
                true
            }
            Err(e) => {
                log::warn!("Hardware backend initialization failed: {}", e);
                let reason = match e {
                    Error::ShaderMissing(_) => SoftwareReason::ShaderMissing,
                    _ => SoftwareReason::HardwareFailed,
                };
                self.selector.force_software(reason);
                false
            }
        }
    }

    fn shutdown_hardware<G: gpu::Device>(&mut self, gpu: &G) {
        if let Some(mut renderer) = self.renderer.take() {
            renderer.destroy(gpu);
            log::info!("Hardware backend shut down");
        }
        self.selector.shutdown_hardware();
    }

    /// Select the backend and assemble the scene lights for a new frame.
    pub fn begin_frame<G: gpu::Device>(&mut self, gpu: &G, dynamic_lights: &[DynamicLight]) -> Backend {
        self.frame_index = self.frame_index.wrapping_add(1);
        let supported = gpu.capabilities().ray_tracing.is_some();
        let mut backend = self.selector.select(&self.config, supported);
        if backend == Backend::Hardware && self.renderer.is_none() && !self.init_hardware(gpu) {
            backend = self.selector.select(&self.config, supported);
        }
        match backend {
            Backend::Hardware => {
                if let Some(ref mut renderer) = self.renderer {
                    if let Err(e) = renderer.update_pipeline(gpu, &self.library, &self.config) {
                        log::warn!("Keeping the previous pipeline: {}", e);
                    }
                }
            }
            Backend::Software => self.shutdown_hardware(gpu),
        }
        self.backend = backend;

        self.lights = SceneLightList::build(dynamic_lights, &self.static_lights, self.config.mode);
        self.tracer.set_lights(self.lights.lights());
        backend
    }

    /// Record the hardware path for `frame` into `encoder`.
    pub fn record_commands<G: gpu::Device>(
        &mut self,
        gpu: &G,
        encoder: &mut gpu::CommandEncoder,
        frame: &EngineFrame,
    ) -> &str {
        self.record_hardware(gpu, encoder, frame);
        &self.last_status
    }

    /// `None` if the hardware backend is not initialized.
    fn record_hardware<G: gpu::Device>(
        &mut self,
        gpu: &G,
        encoder: &mut gpu::CommandEncoder,
        frame: &EngineFrame,
    ) -> Option<FrameStatus> {
        let Some(ref mut renderer) = self.renderer else {
            self.last_status = "skipped: hardware backend inactive".to_string();
            return None;
        };
        let status = renderer
            .record_commands(gpu, encoder, &mut self.store, frame, &self.config, &self.lights)
            .clone();
        if let FrameStatus::TlasBuildFailed(ref reason) = status {
            if self.warnings.first(WarnCategory::BUILD_FAILED) {
                log::warn!("Skipping ray traced frames: TLAS build failed: {}", reason);
            }
        }
        self.last_status = status.to_string();
        Some(status)
    }

    /// Trace the frame on the CPU, accumulate, and denoise.
    #[profiling::function]
    pub fn render_software<G: gpu::Device>(&mut self, gpu: &G, camera: &Camera, extent: gpu::Extent) -> &[Vec3] {
        if extent.is_empty() {
            self.last_status = FrameStatus::ZeroExtent.to_string();
            return &[];
        }
        let key = AccumulationKey::new(&self.config, extent, self.lights.hash());
        if self.accumulator.sync(key) {
            self.denoiser.reset();
        } else if !self.config.temporal {
            self.accumulator.reset();
        }

        let bulk = match self.renderer {
            Some(ref mut renderer) => renderer.shadow_resolver(gpu),
            None => None,
        };
        match bulk {
            Some(mut resolver) => {
                self.tracer
                    .render_frame(camera, extent, &mut self.accumulator, SOFTWARE_SEED, &mut resolver)
            }
            None => self.tracer.render_frame(
                camera,
                extent,
                &mut self.accumulator,
                SOFTWARE_SEED,
                &mut CpuShadowResolver,
            ),
        }
        self.last_status = FrameStatus::Ok.to_string();
        self.denoiser
            .apply(&self.accumulator, DenoiseLevel::from_config(self.config.denoise))
    }

    /// Last software output, row-major over the accumulator extent.
    pub fn software_output(&self) -> &[Vec3] {
        self.denoiser.output()
    }

    /// Run the selected backend for `frame`.
    pub fn render_frame<G: gpu::Device>(
        &mut self,
        gpu: &G,
        encoder: &mut gpu::CommandEncoder,
        frame: &EngineFrame,
    ) -> FrameOutput {
        if !self.config.enable {
            self.last_status = "skipped: disabled".to_string();
            return FrameOutput::Skipped(&self.last_status);
        }
        match self.backend {
            Backend::Hardware => match self.record_hardware(gpu, encoder, frame) {
                Some(FrameStatus::Ok) => FrameOutput::Recorded,
                _ => FrameOutput::Skipped(&self.last_status),
            },
            Backend::Software => {
                FrameOutput::Software(self.render_software(gpu, frame.camera, frame.extent))
            }
        }
    }

    /// Record the debug overlay onto the engine's color target.
    pub fn apply_debug_overlay<G: gpu::Device>(
        &mut self,
        gpu: &G,
        encoder: &mut gpu::CommandEncoder,
        color: gpu::Texture,
        color_view: gpu::TextureView,
    ) -> bool {
        match self.renderer {
            Some(ref mut renderer) => {
                renderer.apply_debug_overlay(gpu, encoder, color, color_view, &self.config)
            }
            None => false,
        }
    }

    /// Compare the active backend's last output against the software
    /// reference, when validation targets the current world.
    pub fn validate_frame<G: gpu::Device>(
        &mut self,
        gpu: &G,
        camera: &Camera,
        extent: gpu::Extent,
    ) -> Option<ValidationRecord> {
        let map = self.world.as_ref().map(|&(_, ref name)| name.as_str())?;
        let target =
            ValidationTarget::from_config(&self.config, self.backend, map, extent, self.frame_index)?;
        let observed = match self.backend {
            Backend::Hardware => {
                let renderer = self.renderer.as_ref()?;
                match renderer.read_output(gpu) {
                    Ok(Some(colors)) => colors,
                    Ok(None) => return None,
                    Err(e) => {
                        log::warn!("Validation readback failed: {}", e);
                        return None;
                    }
                }
            }
            Backend::Software => self.denoiser.output().to_vec(),
        };
        let tracer = &mut self.tracer;
        self.validator
            .validate(&target, &observed, |x, y| {
                tracer.render_pixel(camera, extent, x, y, SOFTWARE_SEED, &mut CpuShadowResolver)
            })
            .cloned()
    }

    pub fn get_backend_status(&self) -> &str {
        self.selector.status()
    }

    pub fn get_last_status(&self) -> &str {
        &self.last_status
    }

    /// Release every GPU resource. The context can be used again after a
    /// new `prepare_for_world`.
    pub fn shutdown<G: gpu::Device>(&mut self, gpu: &G) {
        self.shutdown_hardware(gpu);
        self.store.destroy(gpu);
        self.world = None;
        log::info!("Tracer shut down");
    }
}
