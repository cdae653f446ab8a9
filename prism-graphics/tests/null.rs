use prism_graphics::{
    self as gpu, null, AccelerationStructureDevice as _, CommandDevice as _, ResourceDevice as _,
    ShaderDevice as _,
};

fn texture(
    gpu: &null::Context,
    format: gpu::TextureFormat,
    extent: gpu::Extent,
) -> gpu::Texture {
    gpu.create_texture(gpu::TextureDesc {
        name: "test",
        format,
        size: extent,
        usage: gpu::TextureUsage::COPY | gpu::TextureUsage::STORAGE,
    })
    .unwrap()
}

fn shared_buffer(gpu: &null::Context, data: &[u8]) -> gpu::Buffer {
    let buffer = gpu
        .create_buffer(gpu::BufferDesc {
            name: "shared",
            size: data.len() as u64,
            memory: gpu::Memory::Shared,
            usage: gpu::BufferUsage::STORAGE,
        })
        .unwrap();
    gpu.write_buffer(buffer.into(), data);
    buffer
}

#[test]
fn device_budget_is_enforced() {
    let _ = env_logger::builder().is_test(true).try_init();
    let gpu = null::Context::new(null::ContextDesc {
        device_memory_budget: Some(1024),
        ..Default::default()
    });
    let desc = |size| gpu::BufferDesc {
        name: "scratch",
        size,
        memory: gpu::Memory::Device,
        usage: gpu::BufferUsage::STORAGE,
    };
    let buffer = gpu.create_buffer(desc(768)).unwrap();
    assert!(matches!(
        gpu.create_buffer(desc(512)),
        Err(gpu::DeviceError::OutOfMemory)
    ));
    // Host memory does not count against the budget.
    let staging = gpu
        .create_buffer(gpu::BufferDesc {
            memory: gpu::Memory::Upload,
            ..desc(4096)
        })
        .unwrap();
    assert_eq!(gpu.device_memory_used(), 768);
    gpu.destroy_buffer(buffer);
    gpu.destroy_buffer(staging);
    assert_eq!(gpu.device_memory_used(), 0);
    assert_eq!(gpu.live_buffer_count(), 0);
}

#[test]
fn copies_move_texels() {
    let gpu = null::Context::default();
    let extent = gpu::Extent::new_2d(2, 2);
    let src = texture(&gpu, gpu::TextureFormat::Rgba32Float, extent);
    let copy = texture(&gpu, gpu::TextureFormat::Rgba32Float, extent);
    let blit = texture(&gpu, gpu::TextureFormat::Bgra8Unorm, extent);
    let texels = [[1.0f32, 0.5, 0.0, 1.0]; 4];
    gpu.write_texture(src, bytemuck::cast_slice(&texels));

    let readback = gpu
        .create_buffer(gpu::BufferDesc {
            name: "readback",
            size: 64,
            memory: gpu::Memory::Shared,
            usage: gpu::BufferUsage::TRANSFER_DST,
        })
        .unwrap();
    let mut encoder = gpu::CommandEncoder::new("copies");
    encoder.copy_texture_to_texture(src, copy, extent);
    encoder.blit_texture(src, blit, gpu::Filter::Linear);
    encoder.copy_texture_to_buffer(copy, readback.into(), extent);
    gpu.submit_and_wait(&mut encoder, gpu::Fence::Readback).unwrap();
    assert!(encoder.is_empty());

    assert_eq!(gpu.texture_data(copy), gpu.texture_data(src));
    let mut data = [[0f32; 4]; 4];
    gpu.read_buffer(readback.into(), bytemuck::cast_slice_mut(&mut data));
    assert_eq!(data, texels);

    let bgra = gpu.texture_data(blit);
    let texel = null::read_texel(gpu::TextureFormat::Bgra8Unorm, &bgra[..4]);
    for (got, want) in texel.iter().zip(texels[0].iter()) {
        assert!((got - want).abs() <= 1.0 / 255.0, "{:?}", texel);
    }
    assert_eq!(bgra[2], 255);
}

#[test]
fn layout_mismatch_is_recorded() {
    let gpu = null::Context::default();
    let image = texture(&gpu, gpu::TextureFormat::Rgba8Unorm, gpu::Extent::new_2d(1, 1));
    let mut encoder = gpu::CommandEncoder::new("layouts");
    encoder.transition(image, gpu::ImageLayout::Undefined, gpu::ImageLayout::General);
    encoder.transition(image, gpu::ImageLayout::General, gpu::ImageLayout::TransferSrc);
    gpu.execute(&encoder).unwrap();
    assert!(gpu.violations().is_empty());
    assert_eq!(gpu.texture_layout(image), gpu::ImageLayout::TransferSrc);

    let mut encoder = gpu::CommandEncoder::new("stale");
    encoder.transition(image, gpu::ImageLayout::ShaderRead, gpu::ImageLayout::General);
    gpu.execute(&encoder).unwrap();
    assert_eq!(gpu.violations().len(), 1);
    assert_eq!(gpu.texture_layout(image), gpu::ImageLayout::General);
}

#[test]
fn descriptor_writes_are_visible() {
    let gpu = null::Context::default();
    let bindings = [
        gpu::BindingDesc {
            binding: 0,
            ty: gpu::BindingType::StorageImage,
            count: 1,
            partially_bound: false,
        },
        gpu::BindingDesc {
            binding: 1,
            ty: gpu::BindingType::SampledImage,
            count: 2,
            partially_bound: true,
        },
    ];
    let mut layout = gpu
        .create_pipeline_layout(gpu::PipelineLayoutDesc {
            name: "test",
            bindings: &bindings,
            push_constant_size: 0,
        })
        .unwrap();
    let set = gpu.allocate_descriptor_set(&layout).unwrap();
    let image = texture(&gpu, gpu::TextureFormat::Rgba8Unorm, gpu::Extent::new_2d(1, 1));
    let view = gpu.create_texture_view(image, "view").unwrap();
    let views = [view, view, view];
    gpu.update_descriptor_set(
        set,
        &[
            gpu::DescriptorWrite {
                binding: 0,
                array_element: 0,
                resource: gpu::DescriptorResource::StorageImage(view),
            },
            gpu::DescriptorWrite {
                binding: 1,
                array_element: 0,
                resource: gpu::DescriptorResource::SampledImages(&views),
            },
            gpu::DescriptorWrite {
                binding: 5,
                array_element: 0,
                resource: gpu::DescriptorResource::SampledImage(view),
            },
        ],
    );
    assert_eq!(
        gpu.descriptor(set, 0, 0),
        Some(null::BoundResource::StorageImage(view.raw()))
    );
    assert_eq!(
        gpu.descriptor(set, 1, 1),
        Some(null::BoundResource::SampledImage(view.raw()))
    );
    assert_eq!(gpu.descriptor(set, 1, 2), None);
    assert_eq!(gpu.violations(), vec!["write to unknown binding 5".to_string()]);

    gpu.free_descriptor_set(set);
    gpu.destroy_pipeline_layout(&mut layout);
}

#[test]
fn submissions_are_counted_per_fence() {
    let gpu = null::Context::default();
    let mut encoder = gpu::CommandEncoder::new("work");
    encoder.dispatch([1, 1, 1]);
    gpu.submit_and_wait(&mut encoder, gpu::Fence::AccelerationBuild).unwrap();
    gpu.submit_and_wait(&mut encoder, gpu::Fence::AccelerationBuild).unwrap();
    gpu.submit_and_wait(&mut encoder, gpu::Fence::Readback).unwrap();
    assert_eq!(gpu.submission_count(gpu::Fence::AccelerationBuild), 2);
    assert_eq!(gpu.submission_count(gpu::Fence::Readback), 1);
    // The encoder is drained by the first submission.
    assert_eq!(gpu.dispatch_count(), 1);
}

#[test]
fn pipelines_need_spirv_and_ray_tracing() {
    let plain = null::Context::without_ray_tracing();
    let mut layout = plain
        .create_pipeline_layout(gpu::PipelineLayoutDesc {
            name: "empty",
            bindings: &[],
            push_constant_size: 0,
        })
        .unwrap();
    let module = [0x0723_0203u32, 0x0001_0000, 0, 1, 0];
    let source = gpu::ShaderSource {
        name: "raygen",
        spirv: &module,
    };
    assert!(matches!(
        plain.create_ray_tracing_pipeline(gpu::RayTracingPipelineDesc {
            name: "rt",
            layout: &layout,
            raygen: source,
            miss: &[source],
            closest_hit: source,
            max_recursion_depth: 1,
        }),
        Err(gpu::DeviceError::Unsupported)
    ));
    let garbage = gpu::ShaderSource {
        name: "garbage",
        spirv: &[1, 2, 3],
    };
    assert!(matches!(
        plain.create_compute_pipeline(gpu::ComputePipelineDesc {
            name: "compute",
            layout: &layout,
            shader: garbage,
            workgroup_size: [8, 8, 1],
        }),
        Err(gpu::DeviceError::InvalidShader(_))
    ));
    plain.destroy_pipeline_layout(&mut layout);
}

#[test]
fn allocation_limit_fails_later_requests() {
    let gpu = null::Context::default();
    gpu.set_allocation_limit(Some(1));
    let buffer = shared_buffer(&gpu, &[0; 16]);
    assert!(matches!(
        gpu.create_texture(gpu::TextureDesc {
            name: "late",
            format: gpu::TextureFormat::Rgba8Unorm,
            size: gpu::Extent::new_2d(1, 1),
            usage: gpu::TextureUsage::RESOURCE,
        }),
        Err(gpu::DeviceError::OutOfMemory)
    ));
    gpu.set_allocation_limit(None);
    let image = texture(&gpu, gpu::TextureFormat::Rgba8Unorm, gpu::Extent::new_2d(1, 1));
    assert_eq!(gpu.live_resource_count(), 2);
    gpu.destroy_texture(image);
    gpu.destroy_buffer(buffer);
    assert_eq!(gpu.live_resource_count(), 0);
}

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Zeroable, bytemuck::Pod)]
struct Query {
    origin: [f32; 3],
    t_max: f32,
    hit: u32,
}

/// One triangle covering the unit corner of the z = `height` plane.
fn corner_blas(gpu: &null::Context, height: f32) -> gpu::AccelerationStructure {
    let positions = [[0.0f32, 0.0, height], [4.0, 0.0, height], [0.0, 4.0, height]];
    let vertices = shared_buffer(gpu, bytemuck::cast_slice(&positions));
    let indices = shared_buffer(gpu, bytemuck::cast_slice(&[0u32, 1, 2]));
    let mesh = gpu::TriangleMesh {
        vertex_data: vertices.into(),
        vertex_count: 3,
        vertex_stride: 12,
        index_data: indices.into(),
        triangle_count: 1,
        opaque: true,
    };
    let sizes = gpu.get_bottom_level_acceleration_structure_sizes(&mesh, gpu::BuildFlags::empty());
    let blas = gpu
        .create_acceleration_structure(gpu::AccelerationStructureDesc {
            name: "corner",
            ty: gpu::AccelerationStructureType::BottomLevel,
            size: sizes.data,
        })
        .unwrap();
    let scratch = shared_buffer(gpu, &vec![0; sizes.scratch as usize]);
    let mut encoder = gpu::CommandEncoder::new("blas");
    encoder.build_bottom_level(blas, &mesh, gpu::BuildFlags::empty(), scratch.into(), false);
    gpu.submit_and_wait(&mut encoder, gpu::Fence::AccelerationBuild)
        .unwrap();
    blas
}

#[test]
fn kernels_answer_ray_queries() {
    let _ = env_logger::builder().is_test(true).try_init();
    let gpu = null::Context::default();
    let blas = corner_blas(&gpu, 0.0);
    let mut transform = gpu::IDENTITY_TRANSFORM;
    transform[2][3] = 2.0;
    let instance = gpu::RawInstance::from(&gpu::AccelerationStructureInstance {
        acceleration_structure_address: gpu.get_acceleration_structure_address(blas),
        transform,
        custom_index: 0,
        mask: 0xFF,
        sbt_offset: 0,
        flags: gpu::InstanceFlags::empty(),
    });
    let instances = shared_buffer(&gpu, bytemuck::bytes_of(&instance));
    let tlas = gpu
        .create_acceleration_structure(gpu::AccelerationStructureDesc {
            name: "scene",
            ty: gpu::AccelerationStructureType::TopLevel,
            size: 256,
        })
        .unwrap();
    let scratch = shared_buffer(&gpu, &[0; 256]);
    let mut encoder = gpu::CommandEncoder::new("tlas");
    encoder.build_top_level(tlas, instances.into(), 1, gpu::BuildFlags::empty(), scratch.into());
    gpu.submit_and_wait(&mut encoder, gpu::Fence::AccelerationBuild)
        .unwrap();

    let bindings = [
        gpu::BindingDesc {
            binding: 0,
            ty: gpu::BindingType::AccelerationStructure,
            count: 1,
            partially_bound: false,
        },
        gpu::BindingDesc {
            binding: 1,
            ty: gpu::BindingType::StorageBuffer,
            count: 1,
            partially_bound: false,
        },
    ];
    let layout = gpu
        .create_pipeline_layout(gpu::PipelineLayoutDesc {
            name: "queries",
            bindings: &bindings,
            push_constant_size: 16,
        })
        .unwrap();
    let set = gpu.allocate_descriptor_set(&layout).unwrap();
    // Straight down from above the raised triangle: once inside it, once
    // beside it, and once inside it with the ray cut short.
    let queries = [
        Query { origin: [1.0, 1.0, 5.0], t_max: 10.0, hit: 0 },
        Query { origin: [6.0, 6.0, 5.0], t_max: 10.0, hit: 0 },
        Query { origin: [1.0, 1.0, 5.0], t_max: 2.5, hit: 0 },
    ];
    let buffer = shared_buffer(&gpu, bytemuck::cast_slice(&queries));
    gpu.update_descriptor_set(
        set,
        &[
            gpu::DescriptorWrite {
                binding: 0,
                array_element: 0,
                resource: gpu::DescriptorResource::AccelerationStructure(tlas),
            },
            gpu::DescriptorWrite {
                binding: 1,
                array_element: 0,
                resource: gpu::DescriptorResource::StorageBuffer {
                    piece: buffer.into(),
                    size: buffer.size(),
                },
            },
        ],
    );

    gpu.register_kernel("occlusion", |invocation| {
        let count: u32 = invocation.push_constants();
        let Some(bytes) = invocation.storage_buffer(1) else {
            return;
        };
        let mut queries: Vec<Query> = bytes
            .chunks_exact(std::mem::size_of::<Query>())
            .take(count as usize)
            .map(bytemuck::pod_read_unaligned)
            .collect();
        for query in queries.iter_mut() {
            query.hit = invocation.ray_occluded(0, query.origin, [0.0, 0.0, -1.0], 0.0, query.t_max) as u32;
        }
        if let Some(bytes) = invocation.storage_buffer(1) {
            bytes[..queries.len() * std::mem::size_of::<Query>()]
                .copy_from_slice(bytemuck::cast_slice(&queries));
        }
    });
    let module = [0x0723_0203u32, 0x0001_0000, 0, 1, 0];
    let pipeline = gpu
        .create_compute_pipeline(gpu::ComputePipelineDesc {
            name: "occlusion",
            layout: &layout,
            shader: gpu::ShaderSource {
                name: "occlusion",
                spirv: &module,
            },
            workgroup_size: [64, 1, 1],
        })
        .unwrap();
    let mut encoder = gpu::CommandEncoder::new("queries");
    encoder.bind_compute_pipeline(&pipeline);
    encoder.bind_descriptor_set(gpu::BindPoint::Compute, &layout, set);
    encoder.push_constants(&layout, gpu::ShaderStages::COMPUTE, &(queries.len() as u32));
    encoder.dispatch([1, 1, 1]);
    gpu.submit_and_wait(&mut encoder, gpu::Fence::AccelerationBuild)
        .unwrap();

    let mut answers = queries;
    gpu.read_buffer(buffer.into(), bytemuck::cast_slice_mut(&mut answers));
    let hits = answers.iter().map(|q| q.hit).collect::<Vec<_>>();
    assert_eq!(hits, vec![1, 0, 0]);
}
