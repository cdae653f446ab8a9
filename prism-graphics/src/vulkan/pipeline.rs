use ash::vk;

const ENTRY_POINT: &std::ffi::CStr = c"main";

impl super::Context {
    fn create_shader_module(
        &self,
        source: &crate::ShaderSource,
    ) -> Result<vk::ShaderModule, crate::DeviceError> {
        let info = vk::ShaderModuleCreateInfo::default().code(source.spirv);
        match unsafe { self.device.create_shader_module(&info, None) } {
            Ok(module) => {
                self.set_object_name(module, source.name);
                Ok(module)
            }
            Err(err) => {
                log::error!("Shader module {:?}: {:?}", source.name, err);
                Err(crate::DeviceError::InvalidShader(source.name.to_string()))
            }
        }
    }

    fn destroy_shader_modules(&self, modules: &[vk::ShaderModule]) {
        for &module in modules {
            unsafe { self.device.destroy_shader_module(module, None) };
        }
    }
}

impl crate::ShaderDevice for super::Context {
    fn create_pipeline_layout(
        &self,
        desc: crate::PipelineLayoutDesc,
    ) -> Result<crate::PipelineLayout, crate::DeviceError> {
        let set_layout = self.create_descriptor_set_layout(desc.bindings)?;
        let set_layouts = [set_layout];
        let push_constant_ranges = [vk::PushConstantRange {
            stage_flags: super::map_shader_stages(
                crate::ShaderStages::RAY_TRACING | crate::ShaderStages::COMPUTE,
            ),
            offset: 0,
            size: desc.push_constant_size,
        }];
        let mut info = vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts);
        if desc.push_constant_size != 0 {
            info = info.push_constant_ranges(&push_constant_ranges);
        }
        let raw = match unsafe { self.device.create_pipeline_layout(&info, None) } {
            Ok(raw) => raw,
            Err(err) => {
                unsafe { self.device.destroy_descriptor_set_layout(set_layout, None) };
                return Err(super::map_result(err));
            }
        };
        self.set_object_name(raw, desc.name);
        Ok(crate::PipelineLayout {
            raw: vk::Handle::as_raw(raw),
            set_layout_raw: vk::Handle::as_raw(set_layout),
            handle: 0,
            bindings: desc.bindings.to_vec(),
            push_constant_size: desc.push_constant_size,
        })
    }

    fn destroy_pipeline_layout(&self, layout: &mut crate::PipelineLayout) {
        unsafe {
            self.device.destroy_pipeline_layout(
                <vk::PipelineLayout as vk::Handle>::from_raw(layout.raw),
                None,
            );
            self.device.destroy_descriptor_set_layout(
                <vk::DescriptorSetLayout as vk::Handle>::from_raw(layout.set_layout_raw),
                None,
            );
        }
        layout.raw = 0;
        layout.set_layout_raw = 0;
    }

    fn allocate_descriptor_set(
        &self,
        layout: &crate::PipelineLayout,
    ) -> Result<crate::DescriptorSet, crate::DeviceError> {
        let raw = self.allocate_set(<vk::DescriptorSetLayout as vk::Handle>::from_raw(
            layout.set_layout_raw,
        ))?;
        Ok(crate::DescriptorSet {
            raw: vk::Handle::as_raw(raw),
            handle: 0,
        })
    }

    fn free_descriptor_set(&self, set: crate::DescriptorSet) {
        self.free_set(<vk::DescriptorSet as vk::Handle>::from_raw(set.raw));
    }

    fn update_descriptor_set(&self, set: crate::DescriptorSet, writes: &[crate::DescriptorWrite]) {
        self.write_set(<vk::DescriptorSet as vk::Handle>::from_raw(set.raw), writes);
    }

    fn create_ray_tracing_pipeline(
        &self,
        desc: crate::RayTracingPipelineDesc,
    ) -> Result<crate::RayTracingPipeline, crate::DeviceError> {
        let caps = self
            .capabilities
            .ray_tracing
            .ok_or(crate::DeviceError::Unsupported)?;

        let mut sources = Vec::with_capacity(desc.miss.len() + 2);
        sources.push((desc.raygen, vk::ShaderStageFlags::RAYGEN_KHR));
        for miss in desc.miss {
            sources.push((*miss, vk::ShaderStageFlags::MISS_KHR));
        }
        sources.push((desc.closest_hit, vk::ShaderStageFlags::CLOSEST_HIT_KHR));

        let mut modules = Vec::with_capacity(sources.len());
        for &(ref source, _) in sources.iter() {
            match self.create_shader_module(source) {
                Ok(module) => modules.push(module),
                Err(err) => {
                    self.destroy_shader_modules(&modules);
                    return Err(err);
                }
            }
        }

        let stages = sources
            .iter()
            .zip(modules.iter())
            .map(|(&(_, stage), &module)| {
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(stage)
                    .module(module)
                    .name(ENTRY_POINT)
            })
            .collect::<Vec<_>>();
        let hit_index = stages.len() as u32 - 1;
        let groups = (0..stages.len() as u32)
            .map(|index| {
                let group = vk::RayTracingShaderGroupCreateInfoKHR::default()
                    .general_shader(vk::SHADER_UNUSED_KHR)
                    .closest_hit_shader(vk::SHADER_UNUSED_KHR)
                    .any_hit_shader(vk::SHADER_UNUSED_KHR)
                    .intersection_shader(vk::SHADER_UNUSED_KHR);
                if index == hit_index {
                    group
                        .ty(vk::RayTracingShaderGroupTypeKHR::TRIANGLES_HIT_GROUP)
                        .closest_hit_shader(index)
                } else {
                    group
                        .ty(vk::RayTracingShaderGroupTypeKHR::GENERAL)
                        .general_shader(index)
                }
            })
            .collect::<Vec<_>>();

        let max_recursion_depth = desc
            .max_recursion_depth
            .clamp(1, caps.max_ray_recursion_depth.max(1));
        let info = vk::RayTracingPipelineCreateInfoKHR::default()
            .stages(&stages)
            .groups(&groups)
            .max_pipeline_ray_recursion_depth(max_recursion_depth)
            .layout(<vk::PipelineLayout as vk::Handle>::from_raw(desc.layout.raw));
        let result = unsafe {
            self.extensions
                .ray_tracing_pipeline
                .create_ray_tracing_pipelines(
                    vk::DeferredOperationKHR::null(),
                    vk::PipelineCache::null(),
                    &[info],
                    None,
                )
        };
        self.destroy_shader_modules(&modules);
        let raw = match result {
            Ok(pipelines) => pipelines[0],
            Err((_, err)) => {
                log::error!("Ray tracing pipeline {:?}: {:?}", desc.name, err);
                return Err(super::map_result(err));
            }
        };
        self.set_object_name(raw, desc.name);

        Ok(crate::RayTracingPipeline {
            raw: vk::Handle::as_raw(raw),
            handle: 0,
            layout_raw: desc.layout.raw,
            group_count: groups.len() as u32,
            max_recursion_depth,
        })
    }

    fn destroy_ray_tracing_pipeline(&self, pipeline: &mut crate::RayTracingPipeline) {
        unsafe {
            self.device
                .destroy_pipeline(<vk::Pipeline as vk::Handle>::from_raw(pipeline.raw), None)
        };
        pipeline.raw = 0;
    }

    fn get_shader_group_handles(
        &self,
        pipeline: &crate::RayTracingPipeline,
    ) -> Result<Vec<u8>, crate::DeviceError> {
        let caps = self
            .capabilities
            .ray_tracing
            .ok_or(crate::DeviceError::Unsupported)?;
        let data_size = (caps.shader_group_handle_size * pipeline.group_count) as usize;
        unsafe {
            self.extensions
                .ray_tracing_pipeline
                .get_ray_tracing_shader_group_handles(
                    <vk::Pipeline as vk::Handle>::from_raw(pipeline.raw),
                    0,
                    pipeline.group_count,
                    data_size,
                )
        }
        .map_err(super::map_result)
    }

    fn create_compute_pipeline(
        &self,
        desc: crate::ComputePipelineDesc,
    ) -> Result<crate::ComputePipeline, crate::DeviceError> {
        let module = self.create_shader_module(&desc.shader)?;
        let stage = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(module)
            .name(ENTRY_POINT);
        let info = vk::ComputePipelineCreateInfo::default()
            .stage(stage)
            .layout(<vk::PipelineLayout as vk::Handle>::from_raw(desc.layout.raw));
        let result = unsafe {
            self.device
                .create_compute_pipelines(vk::PipelineCache::null(), &[info], None)
        };
        self.destroy_shader_modules(&[module]);
        let raw = match result {
            Ok(pipelines) => pipelines[0],
            Err((_, err)) => {
                log::error!("Compute pipeline {:?}: {:?}", desc.name, err);
                return Err(super::map_result(err));
            }
        };
        self.set_object_name(raw, desc.name);

        Ok(crate::ComputePipeline {
            raw: vk::Handle::as_raw(raw),
            handle: 0,
            layout_raw: desc.layout.raw,
            wg_size: desc.workgroup_size,
        })
    }

    fn destroy_compute_pipeline(&self, pipeline: &mut crate::ComputePipeline) {
        unsafe {
            self.device
                .destroy_pipeline(<vk::Pipeline as vk::Handle>::from_raw(pipeline.raw), None)
        };
        pipeline.raw = 0;
    }
}
