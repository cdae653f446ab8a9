mod common;

use common::{
    emissive_shader, floor_world, init_logger, shader, shader_library, texels, top_down_camera,
    EngineTargets,
};
use glam::Vec3;
use prism::{
    backend::SoftwareReason,
    config::BackendPolicy,
    gpu::{self, null::BoundResource, ResourceDevice as _},
    pipeline::{register_null_kernels, shaders, ShaderLibrary},
    world::DynamicLight,
    Backend, Camera, Config, CoreContext, FrameOutput, InstanceId,
};

const EXTENT: gpu::Extent = gpu::Extent {
    width: 8,
    height: 8,
    depth: 1,
};

fn engine_targets(gpu: &gpu::null::Context, format: gpu::TextureFormat) -> EngineTargets {
    let targets = EngineTargets::new(gpu, EXTENT, format);
    gpu.set_texture_layout(targets.color, gpu::ImageLayout::ShaderRead);
    targets
}

fn count_commands(encoder: &gpu::CommandEncoder, predicate: impl Fn(&gpu::Command) -> bool) -> usize {
    encoder.commands().iter().filter(|&command| predicate(command)).count()
}

fn is_dispatch(command: &gpu::Command) -> bool {
    matches!(*command, gpu::Command::Dispatch { .. })
}

#[test]
fn hardware_frames_keep_layouts_consistent() {
    init_logger();
    let gpu = gpu::null::Context::default();
    let wall = shader(1);
    let mut core = floor_world(&gpu, Config::default(), &wall);
    let camera = top_down_camera();
    let targets = engine_targets(&gpu, gpu::TextureFormat::Rgba32Float);

    for frame_index in 1..=2 {
        assert_eq!(core.begin_frame(&gpu, &[]), Backend::Hardware);
        let mut encoder = gpu::CommandEncoder::new("frame");
        let output = core.render_frame(&gpu, &mut encoder, &targets.frame(&camera, frame_index));
        assert_eq!(output, FrameOutput::Recorded);
        assert_eq!(
            count_commands(&encoder, |c| matches!(*c, gpu::Command::TraceRays { .. })),
            1
        );
        gpu.execute(&encoder).unwrap();
    }
    assert!(gpu.violations().is_empty(), "{:?}", gpu.violations());
    assert_eq!(gpu.trace_count(), 2);
    assert_eq!(gpu.texture_layout(targets.color), gpu::ImageLayout::ShaderRead);

    let renderer = core.renderer().unwrap();
    let images = renderer.images().unwrap();
    assert!(images.is_output_initialized());
    assert_eq!(gpu.texture_layout(images.color.texture), gpu::ImageLayout::TransferSrc);
    assert_eq!(core.get_last_status(), "ok");
    assert_eq!(core.get_backend_status(), "hardware");
}

#[test]
fn rt_output_is_copied_into_engine_target() {
    let gpu = gpu::null::Context::default();
    let wall = shader(1);
    let mut core = floor_world(&gpu, Config::default(), &wall);
    let camera = top_down_camera();
    let targets = engine_targets(&gpu, gpu::TextureFormat::Rgba32Float);

    core.begin_frame(&gpu, &[]);
    let mut encoder = gpu::CommandEncoder::new("first");
    core.render_frame(&gpu, &mut encoder, &targets.frame(&camera, 1));
    gpu.execute(&encoder).unwrap();

    // Stand in for the ray dispatch of the second frame.
    let color = core.renderer().unwrap().images().unwrap().color.texture;
    let radiance = texels([0.25, 0.5, 1.0, 1.0], EXTENT.pixel_count());
    gpu.write_texture(color, &radiance);
    let mut encoder = gpu::CommandEncoder::new("second");
    core.render_frame(&gpu, &mut encoder, &targets.frame(&camera, 2));
    gpu.execute(&encoder).unwrap();
    assert_eq!(gpu.texture_data(targets.color), radiance);
}

#[test]
fn blit_path_for_mismatched_targets() {
    let gpu = gpu::null::Context::default();
    let wall = shader(1);
    let mut core = floor_world(&gpu, Config::default(), &wall);
    let camera = top_down_camera();
    let targets = engine_targets(&gpu, gpu::TextureFormat::Bgra8Unorm);

    core.begin_frame(&gpu, &[]);
    let mut encoder = gpu::CommandEncoder::new("frame");
    assert_eq!(
        core.render_frame(&gpu, &mut encoder, &targets.frame(&camera, 1)),
        FrameOutput::Recorded
    );
    let blits = count_commands(&encoder, |c| matches!(*c, gpu::Command::BlitTexture { .. }));
    assert_eq!(blits, 2);
    gpu.execute(&encoder).unwrap();
    assert!(gpu.violations().is_empty(), "{:?}", gpu.violations());
}

#[test]
fn descriptors_point_at_frame_resources() {
    let gpu = gpu::null::Context::default();
    let wall = shader(1);
    let mut core = floor_world(&gpu, Config::default(), &wall);
    let camera = top_down_camera();
    let targets = engine_targets(&gpu, gpu::TextureFormat::Rgba32Float);
    let texture = gpu
        .create_texture(gpu::TextureDesc {
            name: "wall",
            format: gpu::TextureFormat::Rgba8Unorm,
            size: gpu::Extent::new_2d(2, 2),
            usage: gpu::TextureUsage::RESOURCE,
        })
        .unwrap();
    let texture_view = gpu.create_texture_view(texture, "wall").unwrap();
    let textures = [texture_view];

    core.begin_frame(&gpu, &[]);
    let mut encoder = gpu::CommandEncoder::new("frame");
    let engine_frame = prism::dispatch::EngineFrame {
        textures: &textures,
        ..targets.frame(&camera, 1)
    };
    core.render_frame(&gpu, &mut encoder, &engine_frame);

    let tlas = core.store().active_tlas().unwrap();
    let renderer = core.renderer().unwrap();
    let set = renderer.plane().descriptor_set();
    let images = renderer.images().unwrap();
    assert_eq!(
        gpu.descriptor(set, 0, 0),
        Some(BoundResource::AccelerationStructure(tlas.raw()))
    );
    assert_eq!(
        gpu.descriptor(set, 1, 0),
        Some(BoundResource::StorageImage(images.color.view.raw()))
    );
    assert_eq!(
        gpu.descriptor(set, 12, 0),
        Some(BoundResource::SampledImage(texture_view.raw()))
    );
    assert_eq!(gpu.descriptor(set, 12, 1), None);
    for binding in [6, 7, 9, 18] {
        assert!(matches!(
            gpu.descriptor(set, binding, 0),
            Some(BoundResource::UniformBuffer { .. })
        ));
    }
    for binding in [10, 11, 14, 19, 20] {
        assert!(matches!(
            gpu.descriptor(set, binding, 0),
            Some(BoundResource::StorageBuffer { .. })
        ));
    }
    assert_eq!(renderer.plane().bound_tlas(), Some(tlas));
}

#[test]
fn zero_extent_is_skipped() {
    let gpu = gpu::null::Context::default();
    let wall = shader(1);
    let mut core = floor_world(&gpu, Config::default(), &wall);
    let camera = top_down_camera();
    let targets = engine_targets(&gpu, gpu::TextureFormat::Rgba32Float);
    let frame = prism::dispatch::EngineFrame {
        extent: gpu::Extent::new_2d(0, 4),
        ..targets.frame(&camera, 1)
    };

    assert_eq!(core.begin_frame(&gpu, &[]), Backend::Hardware);
    let mut encoder = gpu::CommandEncoder::new("frame");
    let output = core.render_frame(&gpu, &mut encoder, &frame);
    assert_eq!(output, FrameOutput::Skipped("skipped: zero extent"));
    assert!(encoder.is_empty());

    core.set_config("backend", "software").unwrap();
    core.begin_frame(&gpu, &[]);
    assert!(core.render_software(&gpu, &camera, frame.extent).is_empty());
    assert_eq!(core.get_last_status(), "skipped: zero extent");
}

#[test]
fn failed_tlas_build_skips_until_recovered() {
    init_logger();
    let gpu = gpu::null::Context::default();
    let wall = shader(1);
    let mut core = floor_world(&gpu, Config::default(), &wall);
    let camera = top_down_camera();
    let targets = engine_targets(&gpu, gpu::TextureFormat::Rgba32Float);
    let active = core.store().active_tlas();

    let mut moved = gpu::IDENTITY_TRANSFORM;
    moved[2][3] = 4.0;
    core.store_mut().queue_refit(InstanceId(0), Some(moved), false).unwrap();
    gpu.set_fail_builds(true);
    core.begin_frame(&gpu, &[]);
    let mut encoder = gpu::CommandEncoder::new("frame");
    match core.render_frame(&gpu, &mut encoder, &targets.frame(&camera, 1)) {
        FrameOutput::Skipped(status) => assert!(status.starts_with("TLAS build failed"), "{}", status),
        other => panic!("unexpected output {:?}", other),
    }
    assert_eq!(core.store().active_tlas(), active);
    assert!(core.store().needs_rebuild());

    gpu.set_fail_builds(false);
    core.begin_frame(&gpu, &[]);
    let mut encoder = gpu::CommandEncoder::new("frame");
    assert_eq!(
        core.render_frame(&gpu, &mut encoder, &targets.frame(&camera, 2)),
        FrameOutput::Recorded
    );
    assert_ne!(core.store().active_tlas(), active);
    assert_eq!(core.store().instance(InstanceId(0)).unwrap().transform, moved);
}

#[test]
fn hybrid_composite_adds_a_pass() {
    let gpu = gpu::null::Context::default();
    let wall = shader(1);
    let camera = top_down_camera();
    let targets = engine_targets(&gpu, gpu::TextureFormat::Rgba32Float);

    let mut core = floor_world(&gpu, Config::default(), &wall);
    core.begin_frame(&gpu, &[]);
    let mut encoder = gpu::CommandEncoder::new("replace");
    core.render_frame(&gpu, &mut encoder, &targets.frame(&camera, 1));
    assert_eq!(count_commands(&encoder, is_dispatch), 2);

    core.set_config("composite", "hybrid").unwrap();
    core.set_config("hybrid_intensity", "20").unwrap();
    assert_eq!(core.config().hybrid_intensity, 8.0);
    core.begin_frame(&gpu, &[]);
    let mut encoder = gpu::CommandEncoder::new("hybrid");
    core.render_frame(&gpu, &mut encoder, &targets.frame(&camera, 2));
    assert_eq!(count_commands(&encoder, is_dispatch), 3);
    gpu.execute(&encoder).unwrap();
    assert!(gpu.violations().is_empty(), "{:?}", gpu.violations());
}

#[test]
fn hybrid_without_composite_shader_copies() {
    let gpu = gpu::null::Context::default();
    let mut library = ShaderLibrary::new();
    for &name in shaders::REQUIRED {
        library.insert(name, common::dummy_module());
    }
    let config = Config {
        composite: prism::config::Composite::Hybrid,
        ..Config::default()
    };
    let mut core = CoreContext::with_library(config, library);
    let floor = common::Quad::new([0.0, 0.0], 200.0, 0.0);
    let wall = shader(1);
    let surfaces = [floor.surface(&wall)];
    core.prepare_for_world(&gpu);
    core.populate_world(&gpu, &common::world("q3dm1", 1, &surfaces));

    let camera = top_down_camera();
    let targets = engine_targets(&gpu, gpu::TextureFormat::Rgba32Float);
    assert_eq!(core.begin_frame(&gpu, &[]), Backend::Hardware);
    assert!(!core.renderer().unwrap().has_shadow_queries());
    let mut encoder = gpu::CommandEncoder::new("frame");
    assert_eq!(
        core.render_frame(&gpu, &mut encoder, &targets.frame(&camera, 1)),
        FrameOutput::Recorded
    );
    assert_eq!(count_commands(&encoder, is_dispatch), 2);
    assert!(count_commands(&encoder, |c| matches!(*c, gpu::Command::CopyTextureToTexture { .. })) >= 1);
}

#[test]
fn debug_overlay_needs_debug_mode() {
    let gpu = gpu::null::Context::default();
    let wall = shader(1);
    let mut core = floor_world(&gpu, Config::default(), &wall);
    let camera = top_down_camera();
    let targets = engine_targets(&gpu, gpu::TextureFormat::Rgba32Float);

    core.begin_frame(&gpu, &[]);
    let mut encoder = gpu::CommandEncoder::new("frame");
    core.render_frame(&gpu, &mut encoder, &targets.frame(&camera, 1));
    assert!(!core.apply_debug_overlay(&gpu, &mut encoder, targets.color, targets.color_view));

    core.set_config("debug", "2").unwrap();
    core.begin_frame(&gpu, &[]);
    let mut encoder = gpu::CommandEncoder::new("frame");
    core.render_frame(&gpu, &mut encoder, &targets.frame(&camera, 2));
    assert!(core.renderer().unwrap().images().unwrap().has_channels());
    let before = count_commands(&encoder, is_dispatch);
    assert!(core.apply_debug_overlay(&gpu, &mut encoder, targets.color, targets.color_view));
    assert_eq!(count_commands(&encoder, is_dispatch), before + 1);
    gpu.execute(&encoder).unwrap();
    assert!(gpu.violations().is_empty(), "{:?}", gpu.violations());
    assert_eq!(gpu.texture_layout(targets.color), gpu::ImageLayout::ShaderRead);
}

#[test]
fn unsupported_device_falls_back_to_software() {
    init_logger();
    let gpu = gpu::null::Context::without_ray_tracing();
    let config = Config {
        backend: BackendPolicy::Hardware,
        ..Config::default()
    };
    let mut core = CoreContext::new(&gpu, config);
    let floor = common::Quad::new([0.0, 0.0], 200.0, 0.0);
    let wall = shader(1);
    let surfaces = [floor.surface(&wall)];
    core.prepare_for_world(&gpu);
    core.populate_world(&gpu, &common::world("q3dm1", 1, &surfaces));
    assert_eq!(core.store().instance_count(), 1);
    assert!(core.store().active_tlas().is_none());

    assert_eq!(core.begin_frame(&gpu, &[]), Backend::Software);
    assert_eq!(core.get_backend_status(), "software (hardware unsupported)");
    assert!(core.renderer().is_none());

    let camera = top_down_camera();
    let targets = EngineTargets::new(&gpu, EXTENT, gpu::TextureFormat::Rgba32Float);
    let mut encoder = gpu::CommandEncoder::new("frame");
    match core.render_frame(&gpu, &mut encoder, &targets.frame(&camera, 1)) {
        FrameOutput::Software(colors) => assert_eq!(colors.len(), EXTENT.pixel_count()),
        other => panic!("unexpected output {:?}", other),
    }
    assert!(encoder.is_empty());
    assert_eq!(
        core.record_commands(&gpu, &mut encoder, &targets.frame(&camera, 1)),
        "skipped: hardware backend inactive"
    );
}

#[test]
fn missing_shaders_force_software_until_reconfigured() {
    let gpu = gpu::null::Context::default();
    let mut core = CoreContext::with_library(Config::default(), ShaderLibrary::new());
    assert_eq!(core.begin_frame(&gpu, &[]), Backend::Software);
    assert_eq!(core.get_backend_status(), "software (shaders missing)");
    assert!(core.renderer().is_none());
    core.begin_frame(&gpu, &[]);
    assert_eq!(core.get_backend_status(), "software (shaders missing)");

    core.set_config("backend", "software").unwrap();
    assert_eq!(core.begin_frame(&gpu, &[]), Backend::Software);
    assert_eq!(core.get_backend_status(), "software (requested)");
}

#[test]
fn shaders_load_from_disk() {
    init_logger();
    let gpu = gpu::null::Context::default();
    let dir = tempfile::tempdir().unwrap();
    let bytes = common::dummy_module()
        .iter()
        .flat_map(|word| word.to_le_bytes())
        .collect::<Vec<_>>();

    let config = Config {
        shader_path: dir.path().to_path_buf(),
        ..Config::default()
    };
    let mut core = CoreContext::new(&gpu, config.clone());
    assert_eq!(core.begin_frame(&gpu, &[]), Backend::Software);
    assert_eq!(core.get_backend_status(), "software (shaders missing)");

    for &name in shaders::REQUIRED {
        std::fs::write(dir.path().join(format!("{name}.spv")), &bytes).unwrap();
    }
    let mut core = CoreContext::new(&gpu, config);
    assert_eq!(core.begin_frame(&gpu, &[]), Backend::Hardware);
    assert!(!core.renderer().unwrap().has_shadow_queries());
    core.shutdown(&gpu);
    assert!(core.renderer().is_none());
}

#[test]
fn disabled_tracer_skips_frames() {
    let gpu = gpu::null::Context::default();
    let wall = shader(1);
    let config = Config {
        enable: false,
        ..Config::default()
    };
    let mut core = floor_world(&gpu, config, &wall);
    let camera = top_down_camera();
    let targets = engine_targets(&gpu, gpu::TextureFormat::Rgba32Float);
    assert_eq!(core.begin_frame(&gpu, &[]), Backend::Software);
    let mut encoder = gpu::CommandEncoder::new("frame");
    assert_eq!(
        core.render_frame(&gpu, &mut encoder, &targets.frame(&camera, 1)),
        FrameOutput::Skipped("skipped: disabled")
    );
    assert_eq!(core.get_backend_status(), format!("software ({})", SoftwareReason::Disabled));
}

#[test]
fn backends_agree_on_validation_map() {
    init_logger();
    let gpu = gpu::null::Context::default();
    register_null_kernels(&gpu);
    let emission = [0.5, 0.5, 0.5];
    let floor = emissive_shader(1, emission);
    let config = Config {
        backend: BackendPolicy::Software,
        bounces: 1,
        denoise: 0,
        gpu_validate: 4,
        ..Config::default()
    };
    let mut core = floor_world(&gpu, config, &floor);
    let camera = top_down_camera();

    for _ in 0..8 {
        assert_eq!(core.begin_frame(&gpu, &[]), Backend::Software);
        core.render_software(&gpu, &camera, EXTENT);
    }
    assert_eq!(core.accumulator().sample_count(0, 0), 8);
    let software = core.validate_frame(&gpu, &camera, EXTENT).unwrap();
    assert_eq!(software.backend, Backend::Software);
    assert_eq!(software.samples, 4);
    assert!(software.rmse <= 1e-6);
    assert!(core.validator().last_comparison().is_none());

    core.set_config("backend", "auto").unwrap();
    assert_eq!(core.begin_frame(&gpu, &[]), Backend::Hardware);
    let targets = engine_targets(&gpu, gpu::TextureFormat::Rgba32Float);
    let mut encoder = gpu::CommandEncoder::new("frame");
    assert_eq!(
        core.render_frame(&gpu, &mut encoder, &targets.frame(&camera, 9)),
        FrameOutput::Recorded
    );
    gpu.execute(&encoder).unwrap();
    assert_eq!(gpu.trace_count(), 1);

    let hardware = core.validate_frame(&gpu, &camera, EXTENT).unwrap();
    assert_eq!(hardware.backend, Backend::Hardware);
    assert!(hardware.rmse <= 1e-6);
    let comparison = core.validator().last_comparison().unwrap();
    assert!(!comparison.regression);
    assert!(comparison.delta_rmse <= prism::validate::RMSE_REGRESSION);

    let color = core.renderer().unwrap().images().unwrap().color.texture;
    gpu.write_texture(color, &texels([0.0; 4], EXTENT.pixel_count()));
    core.validate_frame(&gpu, &camera, EXTENT).unwrap();
    let comparison = core.validator().last_comparison().unwrap();
    assert!(comparison.regression);
    assert!((comparison.delta_rmse - 0.5).abs() < 1e-5);
}

#[test]
fn traced_horizon_passes_validation() {
    init_logger();
    let gpu = gpu::null::Context::default();
    register_null_kernels(&gpu);
    let floor = emissive_shader(1, [0.2, 0.4, 0.1]);
    let config = Config {
        backend: BackendPolicy::Software,
        bounces: 1,
        denoise: 0,
        gpu_validate: 1,
        ..Config::default()
    };
    let mut core = floor_world(&gpu, config, &floor);
    // The floor ends 200 units out, so the upper rows see the sky.
    let camera = Camera::look_at([0.0, 0.0, 100.0].into(), [400.0, 0.0, 0.0].into(), 60.0);

    core.begin_frame(&gpu, &[]);
    let colors = core.render_software(&gpu, &camera, EXTENT);
    let near = |a: Vec3, b: Vec3| (a - b).abs().max_element() < 1e-5;
    assert!(near(colors[0], prism::trace::SKY_COLOR), "{}", colors[0]);
    let last = colors[EXTENT.pixel_count() - 1];
    assert!(near(last, Vec3::new(0.2, 0.4, 0.1)), "{}", last);
    let software = core.validate_frame(&gpu, &camera, EXTENT).unwrap();
    assert_eq!(software.samples, 64);

    core.set_config("backend", "auto").unwrap();
    assert_eq!(core.begin_frame(&gpu, &[]), Backend::Hardware);
    let targets = engine_targets(&gpu, gpu::TextureFormat::Rgba32Float);
    let mut encoder = gpu::CommandEncoder::new("frame");
    assert_eq!(
        core.render_frame(&gpu, &mut encoder, &targets.frame(&camera, 2)),
        FrameOutput::Recorded
    );
    gpu.execute(&encoder).unwrap();

    let hardware = core.validate_frame(&gpu, &camera, EXTENT).unwrap();
    assert_eq!(hardware.backend, Backend::Hardware);
    let comparison = core.validator().last_comparison().unwrap();
    assert!(!comparison.regression, "{:?}", comparison);
    assert!(comparison.delta_rmse <= prism::validate::RMSE_REGRESSION);
}

#[test]
fn failed_uploads_record_nothing() {
    init_logger();
    let gpu = gpu::null::Context::default();
    let wall = shader(1);
    let mut core = floor_world(&gpu, Config::default(), &wall);
    let camera = top_down_camera();
    let targets = engine_targets(&gpu, gpu::TextureFormat::Rgba32Float);
    assert_eq!(core.begin_frame(&gpu, &[]), Backend::Hardware);
    let mut encoder = gpu::CommandEncoder::new("frame");
    assert_eq!(
        core.render_frame(&gpu, &mut encoder, &targets.frame(&camera, 1)),
        FrameOutput::Recorded
    );
    gpu.execute(&encoder).unwrap();

    // Enough lights that the light buffer has to grow.
    let lights = (0..32)
        .map(|i| DynamicLight::Omni {
            origin: Vec3::new(i as f32 * 10.0, 0.0, 50.0),
            color: Vec3::ONE,
            intensity: 1.0,
            radius: 300.0,
        })
        .collect::<Vec<_>>();
    assert_eq!(core.begin_frame(&gpu, &lights), Backend::Hardware);
    gpu.set_allocation_limit(Some(0));
    let mut encoder = gpu::CommandEncoder::new("frame");
    match core.render_frame(&gpu, &mut encoder, &targets.frame(&camera, 2)) {
        FrameOutput::Skipped(status) => assert!(status.starts_with("failed:"), "{}", status),
        other => panic!("unexpected {:?}", other),
    }
    assert!(encoder.is_empty());
    gpu.set_allocation_limit(None);

    let mut encoder = gpu::CommandEncoder::new("frame");
    assert_eq!(
        core.render_frame(&gpu, &mut encoder, &targets.frame(&camera, 3)),
        FrameOutput::Recorded
    );
    gpu.execute(&encoder).unwrap();
    assert!(gpu.violations().is_empty(), "{:?}", gpu.violations());
}

#[test]
fn validation_ignores_other_maps() {
    let gpu = gpu::null::Context::default();
    let config = Config {
        backend: BackendPolicy::Software,
        gpu_validate: 1,
        validate_maps: vec!["q3dm17".to_string()],
        ..Config::default()
    };
    let wall = shader(1);
    let mut core = floor_world(&gpu, config, &wall);
    let camera = top_down_camera();
    core.begin_frame(&gpu, &[]);
    core.render_software(&gpu, &camera, EXTENT);
    assert!(core.validate_frame(&gpu, &camera, EXTENT).is_none());
}

#[test]
fn shutdown_releases_gpu_resources() {
    let gpu = gpu::null::Context::default();
    let wall = shader(1);
    let mut core = floor_world(&gpu, Config::default(), &wall);
    let camera = top_down_camera();
    let targets = engine_targets(&gpu, gpu::TextureFormat::Rgba32Float);
    core.begin_frame(&gpu, &[]);
    let mut encoder = gpu::CommandEncoder::new("frame");
    core.render_frame(&gpu, &mut encoder, &targets.frame(&camera, 1));
    let rt_color = core.renderer().unwrap().images().unwrap().color.texture;
    assert!(gpu.live_acceleration_structure_count() > 0);

    core.shutdown(&gpu);
    assert!(core.renderer().is_none());
    assert!(core.world_name().is_none());
    assert_eq!(gpu.live_acceleration_structure_count(), 0);
    assert!(!gpu.is_texture_alive(rt_color));
    assert!(gpu.is_texture_alive(targets.color));
}
