use ash::vk;

fn color_subresource_range(format: crate::TextureFormat) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: super::map_aspects(format),
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

fn subresource_layers(format: crate::TextureFormat) -> vk::ImageSubresourceLayers {
    vk::ImageSubresourceLayers {
        aspect_mask: super::map_aspects(format),
        mip_level: 0,
        base_array_layer: 0,
        layer_count: 1,
    }
}

fn far_corner(extent: &crate::Extent) -> vk::Offset3D {
    vk::Offset3D {
        x: extent.width as i32,
        y: extent.height as i32,
        z: extent.depth as i32,
    }
}

fn map_region(region: &crate::SbtRegion) -> vk::StridedDeviceAddressRegionKHR {
    vk::StridedDeviceAddressRegionKHR {
        device_address: region.address,
        stride: region.stride,
        size: region.size,
    }
}

impl super::Context {
    /// Replay recorded commands into a command buffer owned by the caller.
    ///
    /// # Safety
    /// `cmd_buf` must be in the recording state and belong to this device.
    pub unsafe fn encode(&self, encoder: &crate::CommandEncoder, cmd_buf: vk::CommandBuffer) {
        use crate::{Command as C, ResourceDevice as _};
        let device = &self.device;
        for command in encoder.commands() {
            match *command {
                C::Barrier {
                    src_stages,
                    src_access,
                    dst_stages,
                    dst_access,
                } => {
                    let barrier = vk::MemoryBarrier::default()
                        .src_access_mask(super::map_access(src_access))
                        .dst_access_mask(super::map_access(dst_access));
                    device.cmd_pipeline_barrier(
                        cmd_buf,
                        super::map_stages(src_stages),
                        super::map_stages(dst_stages),
                        vk::DependencyFlags::empty(),
                        &[barrier],
                        &[],
                        &[],
                    );
                }
                C::ImageBarrier {
                    texture,
                    old_layout,
                    new_layout,
                    src_stages,
                    src_access,
                    dst_stages,
                    dst_access,
                } => {
                    let barrier = vk::ImageMemoryBarrier::default()
                        .src_access_mask(super::map_access(src_access))
                        .dst_access_mask(super::map_access(dst_access))
                        .old_layout(super::map_layout(old_layout))
                        .new_layout(super::map_layout(new_layout))
                        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                        .image(<vk::Image as vk::Handle>::from_raw(texture.raw))
                        .subresource_range(color_subresource_range(texture.format));
                    device.cmd_pipeline_barrier(
                        cmd_buf,
                        super::map_stages(src_stages),
                        super::map_stages(dst_stages),
                        vk::DependencyFlags::empty(),
                        &[],
                        &[],
                        &[barrier],
                    );
                }
                C::CopyBufferToBuffer { src, dst, size } => {
                    let copy = vk::BufferCopy {
                        src_offset: src.offset,
                        dst_offset: dst.offset,
                        size,
                    };
                    device.cmd_copy_buffer(
                        cmd_buf,
                        <vk::Buffer as vk::Handle>::from_raw(src.buffer.raw),
                        <vk::Buffer as vk::Handle>::from_raw(dst.buffer.raw),
                        &[copy],
                    );
                }
                C::CopyTextureToTexture { src, dst, size } => {
                    let copy = vk::ImageCopy {
                        src_subresource: subresource_layers(src.format),
                        src_offset: vk::Offset3D::default(),
                        dst_subresource: subresource_layers(dst.format),
                        dst_offset: vk::Offset3D::default(),
                        extent: super::map_extent_3d(&size),
                    };
                    device.cmd_copy_image(
                        cmd_buf,
                        <vk::Image as vk::Handle>::from_raw(src.raw),
                        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                        <vk::Image as vk::Handle>::from_raw(dst.raw),
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &[copy],
                    );
                }
                C::CopyTextureToBuffer { src, dst, size } => {
                    let copy = vk::BufferImageCopy {
                        buffer_offset: dst.offset,
                        buffer_row_length: 0,
                        buffer_image_height: 0,
                        image_subresource: subresource_layers(src.format),
                        image_offset: vk::Offset3D::default(),
                        image_extent: super::map_extent_3d(&size),
                    };
                    device.cmd_copy_image_to_buffer(
                        cmd_buf,
                        <vk::Image as vk::Handle>::from_raw(src.raw),
                        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                        <vk::Buffer as vk::Handle>::from_raw(dst.buffer.raw),
                        &[copy],
                    );
                }
                C::BlitTexture { src, dst, filter } => {
                    let blit = vk::ImageBlit {
                        src_subresource: subresource_layers(src.format),
                        src_offsets: [vk::Offset3D::default(), far_corner(&src.size)],
                        dst_subresource: subresource_layers(dst.format),
                        dst_offsets: [vk::Offset3D::default(), far_corner(&dst.size)],
                    };
                    device.cmd_blit_image(
                        cmd_buf,
                        <vk::Image as vk::Handle>::from_raw(src.raw),
                        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                        <vk::Image as vk::Handle>::from_raw(dst.raw),
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &[blit],
                        match filter {
                            crate::Filter::Nearest => vk::Filter::NEAREST,
                            crate::Filter::Linear => vk::Filter::LINEAR,
                        },
                    );
                }
                C::FillBuffer { dst, size, value } => {
                    device.cmd_fill_buffer(
                        cmd_buf,
                        <vk::Buffer as vk::Handle>::from_raw(dst.buffer.raw),
                        dst.offset,
                        size,
                        value,
                    );
                }
                C::BuildBottomLevel {
                    dst,
                    ref mesh,
                    flags,
                    scratch,
                    update,
                } => {
                    let geometries = [self.bottom_level_geometry(mesh)];
                    let raw = <vk::AccelerationStructureKHR as vk::Handle>::from_raw(dst.raw);
                    let mut build_info = vk::AccelerationStructureBuildGeometryInfoKHR::default()
                        .ty(vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL)
                        .flags(super::map_build_flags(flags))
                        .dst_acceleration_structure(raw)
                        .geometries(&geometries)
                        .scratch_data(vk::DeviceOrHostAddressKHR {
                            device_address: self.get_buffer_address(scratch.buffer)
                                + scratch.offset,
                        });
                    build_info = if update {
                        build_info
                            .mode(vk::BuildAccelerationStructureModeKHR::UPDATE)
                            .src_acceleration_structure(raw)
                    } else {
                        build_info.mode(vk::BuildAccelerationStructureModeKHR::BUILD)
                    };
                    let range = vk::AccelerationStructureBuildRangeInfoKHR {
                        primitive_count: mesh.triangle_count,
                        primitive_offset: 0,
                        first_vertex: 0,
                        transform_offset: 0,
                    };
                    self.extensions
                        .acceleration_structure
                        .cmd_build_acceleration_structures(cmd_buf, &[build_info], &[&[range]]);
                }
                C::BuildTopLevel {
                    dst,
                    instance_data,
                    instance_count,
                    flags,
                    scratch,
                } => {
                    let geometries = [self.top_level_geometry(instance_data)];
                    let build_info = vk::AccelerationStructureBuildGeometryInfoKHR::default()
                        .ty(vk::AccelerationStructureTypeKHR::TOP_LEVEL)
                        .flags(super::map_build_flags(flags))
                        .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
                        .dst_acceleration_structure(
                            <vk::AccelerationStructureKHR as vk::Handle>::from_raw(dst.raw),
                        )
                        .geometries(&geometries)
                        .scratch_data(vk::DeviceOrHostAddressKHR {
                            device_address: self.get_buffer_address(scratch.buffer)
                                + scratch.offset,
                        });
                    let range = vk::AccelerationStructureBuildRangeInfoKHR {
                        primitive_count: instance_count,
                        primitive_offset: 0,
                        first_vertex: 0,
                        transform_offset: 0,
                    };
                    self.extensions
                        .acceleration_structure
                        .cmd_build_acceleration_structures(cmd_buf, &[build_info], &[&[range]]);
                }
                C::BindComputePipeline { raw } => {
                    device.cmd_bind_pipeline(
                        cmd_buf,
                        vk::PipelineBindPoint::COMPUTE,
                        <vk::Pipeline as vk::Handle>::from_raw(raw),
                    );
                }
                C::BindRayTracingPipeline { raw } => {
                    device.cmd_bind_pipeline(
                        cmd_buf,
                        vk::PipelineBindPoint::RAY_TRACING_KHR,
                        <vk::Pipeline as vk::Handle>::from_raw(raw),
                    );
                }
                C::BindDescriptorSet {
                    bind_point,
                    layout_raw,
                    set,
                } => {
                    let point = match bind_point {
                        crate::BindPoint::Compute => vk::PipelineBindPoint::COMPUTE,
                        crate::BindPoint::RayTracing => vk::PipelineBindPoint::RAY_TRACING_KHR,
                    };
                    device.cmd_bind_descriptor_sets(
                        cmd_buf,
                        point,
                        <vk::PipelineLayout as vk::Handle>::from_raw(layout_raw),
                        0,
                        &[<vk::DescriptorSet as vk::Handle>::from_raw(set.raw)],
                        &[],
                    );
                }
                C::PushConstants {
                    layout_raw,
                    stages: _,
                    ref data,
                } => {
                    // Layouts declare a single range visible to every stage.
                    device.cmd_push_constants(
                        cmd_buf,
                        <vk::PipelineLayout as vk::Handle>::from_raw(layout_raw),
                        super::map_shader_stages(
                            crate::ShaderStages::RAY_TRACING | crate::ShaderStages::COMPUTE,
                        ),
                        0,
                        encoder.plain_data(data.clone()),
                    );
                }
                C::Dispatch { groups } => {
                    device.cmd_dispatch(cmd_buf, groups[0], groups[1], groups[2]);
                }
                C::TraceRays { ref regions, size } => {
                    self.extensions.ray_tracing_pipeline.cmd_trace_rays(
                        cmd_buf,
                        &map_region(&regions.raygen),
                        &map_region(&regions.miss),
                        &map_region(&regions.hit),
                        &map_region(&regions.callable),
                        size[0],
                        size[1],
                        size[2],
                    );
                }
            }
        }
    }
}

impl crate::CommandDevice for super::Context {
    fn submit_and_wait(
        &self,
        encoder: &mut crate::CommandEncoder,
        fence: crate::Fence,
    ) -> Result<(), crate::DeviceError> {
        profiling::scope!("submit_and_wait");
        let submission = self.submission.lock().unwrap();
        let raw_fence = match fence {
            crate::Fence::AccelerationBuild => submission.acceleration_build_fence,
            crate::Fence::Readback => submission.readback_fence,
        };
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(submission.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let cmd_buf = unsafe { self.device.allocate_command_buffers(&alloc_info) }
            .map_err(super::map_result)?[0];
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        let result = unsafe {
            self.device
                .begin_command_buffer(cmd_buf, &begin_info)
                .and_then(|()| {
                    self.encode(encoder, cmd_buf);
                    self.device.end_command_buffer(cmd_buf)
                })
                .and_then(|()| {
                    let command_buffers = [cmd_buf];
                    let submit_info =
                        vk::SubmitInfo::default().command_buffers(&command_buffers);
                    self.device
                        .queue_submit(submission.queue, &[submit_info], raw_fence)
                })
                .and_then(|()| self.device.wait_for_fences(&[raw_fence], true, !0))
                .and_then(|()| self.device.reset_fences(&[raw_fence]))
        };
        unsafe {
            self.device
                .free_command_buffers(submission.command_pool, &[cmd_buf])
        };
        encoder.start();
        result.map_err(|err| {
            log::error!("Submission on {:?} failed: {:?}", fence, err);
            super::map_result(err)
        })
    }
}
