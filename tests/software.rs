mod common;

use common::{
    floor_world, init_logger, shader, shader_library, top_down_camera, world, EngineTargets, Quad,
};
use glam::Vec3;
use prism::{
    accum::Accumulator,
    batch::WorldTriangle,
    config::BackendPolicy,
    denoise::luminance,
    geometry::Ray,
    gpu,
    pipeline::register_null_kernels,
    trace::{cook_torrance, CpuShadowResolver, Material, PathTracer, Rng, TraceSettings},
    world::{DynamicLight, SceneLight},
    Backend, Config, CoreContext, FrameOutput,
};

fn direct_only() -> TraceSettings {
    TraceSettings {
        max_bounces: 1,
        samples: 1,
        ..TraceSettings::default()
    }
}

fn quad(center: [f32; 2], half: f32, z: f32, material: u32) -> [WorldTriangle; 2] {
    let [x, y] = center;
    let p = |dx: f32, dy: f32| Vec3::new(x + dx * half, y + dy * half, z);
    [
        WorldTriangle {
            positions: [p(-1.0, -1.0), p(1.0, -1.0), p(1.0, 1.0)],
            material,
        },
        WorldTriangle {
            positions: [p(-1.0, -1.0), p(1.0, 1.0), p(-1.0, 1.0)],
            material,
        },
    ]
}

#[test]
fn occluder_casts_directional_shadow() {
    init_logger();
    let mut triangles = quad([0.0, 0.0], 100.0, 0.0, 0).to_vec();
    triangles.extend(quad([0.0, 0.0], 2.0, 5.0, 0));
    let mut tracer = PathTracer::new(triangles, direct_only());
    let travel = Vec3::new(1.0, 0.0, -1.0).normalize();
    let intensity = 3.0;
    tracer.set_lights(&[SceneLight::directional(travel, Vec3::ONE, intensity)]);

    let mut rng = Rng::new(1);
    let shadowed = tracer.trace_path(
        &Ray::new(Vec3::new(5.0, 0.0, 50.0), Vec3::NEG_Z),
        1,
        &mut rng,
        &mut CpuShadowResolver,
    );
    assert!(luminance(shadowed) < 1e-4, "{}", shadowed);

    let lit = tracer.trace_path(
        &Ray::new(Vec3::new(-10.0, 0.0, 50.0), Vec3::NEG_Z),
        1,
        &mut rng,
        &mut CpuShadowResolver,
    );
    let to_light = -travel;
    let expected = intensity
        * cook_torrance(&Material::default(), Vec3::Z, to_light, Vec3::Z)
        * to_light.dot(Vec3::Z);
    assert!(
        (luminance(lit) - luminance(expected)).abs() <= 0.05 * luminance(expected),
        "{} vs {}",
        lit,
        expected
    );
}

#[test]
fn open_sky_is_returned_on_miss() {
    let mut tracer = PathTracer::new(quad([0.0, 0.0], 10.0, 0.0, 0).to_vec(), direct_only());
    let color = tracer.trace_path(
        &Ray::new(Vec3::new(0.0, 0.0, 5.0), Vec3::Z),
        1,
        &mut Rng::new(0),
        &mut CpuShadowResolver,
    );
    assert_eq!(color, prism::trace::SKY_COLOR);
}

#[test]
fn welford_mean_matches_average() {
    let extent = gpu::Extent::new_2d(2, 1);
    let mut accumulator = Accumulator::new(extent);
    let samples = [0.25, 1.5, 0.0, 3.0, 0.75];
    for &value in samples.iter() {
        accumulator.add_sample(1, 0, Vec3::splat(value));
    }
    let average = samples.iter().sum::<f32>() / samples.len() as f32;
    assert_eq!(accumulator.sample_count(1, 0), 5);
    assert_eq!(accumulator.sample_count(0, 0), 0);
    assert!((accumulator.mean(1, 0) - Vec3::splat(average)).abs().max_element() < 1e-6);
    assert!(accumulator.variance(1, 0) > 0.0);

    // Out of range samples are ignored.
    accumulator.add_sample(2, 0, Vec3::ONE);
    assert_eq!(accumulator.sample_count(1, 0), 5);
}

#[test]
fn light_change_restarts_accumulation() {
    init_logger();
    let gpu = gpu::null::Context::default();
    let config = Config {
        backend: BackendPolicy::Software,
        bounces: 1,
        denoise: 0,
        ..Config::default()
    };
    let wall = shader(1);
    let mut core = floor_world(&gpu, config, &wall);
    let camera = top_down_camera();
    let extent = gpu::Extent::new_2d(8, 8);
    let l1 = DynamicLight::Omni {
        origin: Vec3::new(0.0, 0.0, 50.0),
        color: Vec3::ONE,
        intensity: 100.0,
        radius: 1000.0,
    };
    let l2 = DynamicLight::Directional {
        direction: Vec3::new(0.5, 0.0, -1.0),
        color: Vec3::new(1.0, 0.9, 0.8),
        intensity: 2.0,
    };

    for _ in 0..16 {
        assert_eq!(core.begin_frame(&gpu, &[l1]), Backend::Software);
        core.render_software(&gpu, &camera, extent);
    }
    assert_eq!(core.accumulator().sample_count(1, 2), 16);

    core.begin_frame(&gpu, &[l1, l2]);
    core.render_software(&gpu, &camera, extent);
    assert_eq!(core.accumulator().sample_count(0, 0), 1);
    assert_eq!(core.accumulator().sample_count(1, 2), 1);

    // Direct lighting through the pixel center is deterministic.
    let floor = common::Quad::new([0.0, 0.0], 200.0, 0.0);
    let triangles = floor
        .indices
        .chunks_exact(3)
        .map(|tri| WorldTriangle {
            positions: [0, 1, 2].map(|i| Vec3::from(floor.verts[tri[i] as usize].xyz)),
            material: 1,
        })
        .collect();
    let mut reference = PathTracer::new(triangles, direct_only());
    reference.set_lights(core.lights().lights());
    assert_eq!(core.lights().len(), 2);
    let expected = reference.render_pixel(&camera, extent, 1, 2, 99, &mut CpuShadowResolver);
    let mean = core.accumulator().mean(1, 2);
    assert!(luminance(expected) > 0.0);
    assert!(
        (mean - expected).abs().max_element() <= 1e-4 * expected.max_element().max(1.0),
        "{} vs {}",
        mean,
        expected
    );
}

#[test]
fn disabling_temporal_keeps_one_sample() {
    let gpu = gpu::null::Context::default();
    let config = Config {
        backend: BackendPolicy::Software,
        temporal: false,
        denoise: 0,
        ..Config::default()
    };
    let wall = shader(1);
    let mut core = floor_world(&gpu, config, &wall);
    let camera = top_down_camera();
    let extent = gpu::Extent::new_2d(4, 4);
    for _ in 0..3 {
        core.begin_frame(&gpu, &[]);
        let colors = core.render_software(&gpu, &camera, extent);
        assert_eq!(colors.len(), 16);
    }
    assert_eq!(core.accumulator().sample_count(3, 3), 1);
}

#[test]
fn denoised_output_keeps_extent() {
    let gpu = gpu::null::Context::default();
    let config = Config {
        backend: BackendPolicy::Software,
        denoise: 2,
        ..Config::default()
    };
    let wall = shader(1);
    let mut core = floor_world(&gpu, config, &wall);
    let camera = top_down_camera();
    let extent = gpu::Extent::new_2d(6, 4);
    core.begin_frame(&gpu, &[]);
    let colors = core.render_software(&gpu, &camera, extent).to_vec();
    assert_eq!(colors.len(), extent.pixel_count());
    assert!(colors.iter().all(|c| c.is_finite()));
    assert_eq!(core.software_output(), colors.as_slice());
}

#[test]
fn hardware_tlas_answers_shadow_queries() {
    init_logger();
    let gpu = gpu::null::Context::default();
    let wall = shader(1);
    let mut core = floor_world(&gpu, Config::default(), &wall);
    let camera = top_down_camera();
    let extent = gpu::Extent::new_2d(4, 4);
    let targets = EngineTargets::new(&gpu, extent, gpu::TextureFormat::Rgba32Float);
    gpu.set_texture_layout(targets.color, gpu::ImageLayout::ShaderRead);
    let sun = DynamicLight::Directional {
        direction: Vec3::new(0.0, 0.0, -1.0),
        color: Vec3::ONE,
        intensity: 1.0,
    };

    assert_eq!(core.begin_frame(&gpu, &[sun]), Backend::Hardware);
    assert!(core.renderer().unwrap().has_shadow_queries());
    let mut encoder = gpu::CommandEncoder::new("frame");
    core.render_frame(&gpu, &mut encoder, &targets.frame(&camera, 1));
    assert!(core.renderer().unwrap().plane().bound_tlas().is_some());

    let dispatches = gpu.dispatch_count();
    let submissions = gpu.submission_count(gpu::Fence::AccelerationBuild);
    let colors = core.render_software(&gpu, &camera, extent);
    assert_eq!(colors.len(), 16);
    assert!(gpu.dispatch_count() > dispatches);
    assert!(gpu.submission_count(gpu::Fence::AccelerationBuild) > submissions);
}

#[test]
fn bulk_shadow_queries_match_the_bsp() {
    init_logger();
    let gpu = gpu::null::Context::default();
    register_null_kernels(&gpu);
    let wall = shader(1);
    let floor = Quad::new([0.0, 0.0], 100.0, 0.0);
    let blocker = Quad::new([0.0, 0.0], 2.0, 5.0);
    let surfaces = [floor.surface(&wall), blocker.surface(&wall)];
    let mut core = CoreContext::with_library(Config::default(), shader_library());
    core.prepare_for_world(&gpu);
    core.populate_world(&gpu, &world("q3dm1", 1, &surfaces));

    let travel = Vec3::new(1.0, 0.0, -1.0).normalize();
    let intensity = 3.0;
    let sun = DynamicLight::Directional {
        direction: travel,
        color: Vec3::ONE,
        intensity,
    };
    let camera = top_down_camera();
    let extent = gpu::Extent::new_2d(4, 4);
    let targets = EngineTargets::new(&gpu, extent, gpu::TextureFormat::Rgba32Float);
    gpu.set_texture_layout(targets.color, gpu::ImageLayout::ShaderRead);
    assert_eq!(core.begin_frame(&gpu, &[sun]), Backend::Hardware);
    let mut encoder = gpu::CommandEncoder::new("frame");
    assert_eq!(
        core.render_frame(&gpu, &mut encoder, &targets.frame(&camera, 1)),
        FrameOutput::Recorded
    );
    gpu.execute(&encoder).unwrap();

    let mut triangles = quad([0.0, 0.0], 100.0, 0.0, 0).to_vec();
    triangles.extend(quad([0.0, 0.0], 2.0, 5.0, 0));
    let mut tracer = PathTracer::new(triangles, direct_only());
    tracer.set_lights(&[SceneLight::directional(travel, Vec3::ONE, intensity)]);
    let shadowed_ray = Ray::new(Vec3::new(5.0, 0.0, 50.0), Vec3::NEG_Z);
    let lit_ray = Ray::new(Vec3::new(-10.0, 0.0, 50.0), Vec3::NEG_Z);
    let mut rng = Rng::new(1);
    let cpu_shadowed = tracer.trace_path(&shadowed_ray, 1, &mut rng, &mut CpuShadowResolver);
    let cpu_lit = tracer.trace_path(&lit_ray, 1, &mut rng, &mut CpuShadowResolver);

    let dispatches = gpu.dispatch_count();
    let renderer = core.renderer_mut().unwrap();
    let mut batch = renderer.shadow_resolver(&gpu).unwrap();
    let gpu_shadowed = tracer.trace_path(&shadowed_ray, 1, &mut rng, &mut batch);
    let gpu_lit = tracer.trace_path(&lit_ray, 1, &mut rng, &mut batch);
    assert_eq!(batch.submissions(), 2);
    assert_eq!(gpu.dispatch_count(), dispatches + 2);

    for shadowed in [cpu_shadowed, gpu_shadowed] {
        assert!(luminance(shadowed) < 1e-4, "{}", shadowed);
    }
    assert!(luminance(cpu_lit) > 0.0);
    assert!(
        (luminance(gpu_lit) - luminance(cpu_lit)).abs() <= 0.05 * luminance(cpu_lit),
        "{} vs {}",
        gpu_lit,
        cpu_lit
    );
}
