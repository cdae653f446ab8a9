use ash::vk;

const MAX_SETS: u32 = 64;

/// Fixed pool for the long-lived descriptor sets of the core.
pub struct DescriptorPool {
    raw: vk::DescriptorPool,
}

impl DescriptorPool {
    pub fn new(device: &ash::Device) -> Result<Self, crate::DeviceError> {
        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::ACCELERATION_STRUCTURE_KHR,
                descriptor_count: MAX_SETS,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_IMAGE,
                descriptor_count: MAX_SETS * 12,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::SAMPLED_IMAGE,
                descriptor_count: MAX_SETS
                    + crate::limits::TEXTURE_ARRAY_SIZE
                    + crate::limits::LIGHTMAP_ARRAY_SIZE,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: MAX_SETS * 6,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_BUFFER,
                descriptor_count: MAX_SETS * 6,
            },
        ];
        let info = vk::DescriptorPoolCreateInfo::default()
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .max_sets(MAX_SETS)
            .pool_sizes(&pool_sizes);
        let raw = unsafe { device.create_descriptor_pool(&info, None) }.map_err(|err| {
            log::error!("Descriptor pool creation: {:?}", err);
            crate::DeviceError::DescriptorPool
        })?;
        Ok(Self { raw })
    }

    pub fn destroy(&mut self, device: &ash::Device) {
        unsafe { device.destroy_descriptor_pool(self.raw, None) };
        self.raw = vk::DescriptorPool::null();
    }
}

fn map_binding_type(ty: crate::BindingType) -> vk::DescriptorType {
    match ty {
        crate::BindingType::AccelerationStructure => vk::DescriptorType::ACCELERATION_STRUCTURE_KHR,
        crate::BindingType::StorageImage => vk::DescriptorType::STORAGE_IMAGE,
        crate::BindingType::SampledImage => vk::DescriptorType::SAMPLED_IMAGE,
        crate::BindingType::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
        crate::BindingType::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
    }
}

impl super::Context {
    pub(super) fn create_descriptor_set_layout(
        &self,
        bindings: &[crate::BindingDesc],
    ) -> Result<vk::DescriptorSetLayout, crate::DeviceError> {
        let stages = vk::ShaderStageFlags::RAYGEN_KHR
            | vk::ShaderStageFlags::MISS_KHR
            | vk::ShaderStageFlags::CLOSEST_HIT_KHR
            | vk::ShaderStageFlags::COMPUTE;
        let vk_bindings = bindings
            .iter()
            .map(|binding| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(binding.binding)
                    .descriptor_type(map_binding_type(binding.ty))
                    .descriptor_count(binding.count)
                    .stage_flags(stages)
            })
            .collect::<Vec<_>>();
        let binding_flags = bindings
            .iter()
            .map(|binding| {
                if binding.partially_bound {
                    vk::DescriptorBindingFlags::PARTIALLY_BOUND
                } else {
                    vk::DescriptorBindingFlags::empty()
                }
            })
            .collect::<Vec<_>>();
        let mut flags_info =
            vk::DescriptorSetLayoutBindingFlagsCreateInfo::default().binding_flags(&binding_flags);
        let info = vk::DescriptorSetLayoutCreateInfo::default()
            .bindings(&vk_bindings)
            .push_next(&mut flags_info);
        unsafe { self.device.create_descriptor_set_layout(&info, None) }
            .map_err(super::map_result)
    }
}

/// Descriptor payload, kept alive until the update call.
enum Payload {
    AccelerationStructure(vk::AccelerationStructureKHR),
    Images(Vec<vk::DescriptorImageInfo>),
    Buffer(vk::DescriptorBufferInfo),
}

impl super::Context {
    pub(super) fn allocate_set(
        &self,
        set_layout: vk::DescriptorSetLayout,
    ) -> Result<vk::DescriptorSet, crate::DeviceError> {
        let pool = self.descriptors.lock().unwrap();
        let set_layouts = [set_layout];
        let info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool.raw)
            .set_layouts(&set_layouts);
        let sets = unsafe { self.device.allocate_descriptor_sets(&info) }.map_err(|err| {
            log::error!("Descriptor set allocation: {:?}", err);
            crate::DeviceError::DescriptorPool
        })?;
        Ok(sets[0])
    }

    pub(super) fn free_set(&self, set: vk::DescriptorSet) {
        let pool = self.descriptors.lock().unwrap();
        let _ = unsafe { self.device.free_descriptor_sets(pool.raw, &[set]) };
    }

    pub(super) fn write_set(&self, set: vk::DescriptorSet, writes: &[crate::DescriptorWrite]) {
        use crate::DescriptorResource as Dr;
        let image_info = |view: &crate::TextureView, layout: vk::ImageLayout| {
            vk::DescriptorImageInfo {
                sampler: vk::Sampler::null(),
                image_view: <vk::ImageView as vk::Handle>::from_raw(view.raw),
                image_layout: layout,
            }
        };
        let payloads = writes
            .iter()
            .map(|write| match write.resource {
                Dr::AccelerationStructure(acs) => Payload::AccelerationStructure(
                    <vk::AccelerationStructureKHR as vk::Handle>::from_raw(acs.raw),
                ),
                Dr::StorageImage(ref view) => {
                    Payload::Images(vec![image_info(view, vk::ImageLayout::GENERAL)])
                }
                Dr::SampledImage(ref view) => Payload::Images(vec![image_info(
                    view,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                )]),
                Dr::SampledImages(views) => Payload::Images(
                    views
                        .iter()
                        .map(|view| image_info(view, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL))
                        .collect(),
                ),
                Dr::UniformBuffer { piece, size } | Dr::StorageBuffer { piece, size } => {
                    Payload::Buffer(vk::DescriptorBufferInfo {
                        buffer: <vk::Buffer as vk::Handle>::from_raw(piece.buffer.raw),
                        offset: piece.offset,
                        range: size,
                    })
                }
            })
            .collect::<Vec<_>>();

        let mut acceleration_structures = payloads
            .iter()
            .map(|payload| match *payload {
                Payload::AccelerationStructure(ref raw) => Some(std::slice::from_ref(raw)),
                _ => None,
            })
            .map(|list| {
                list.map(|list| {
                    vk::WriteDescriptorSetAccelerationStructureKHR::default()
                        .acceleration_structures(list)
                })
            })
            .collect::<Vec<_>>();

        let mut vk_writes = Vec::with_capacity(writes.len());
        for ((write, payload), acs_write) in writes
            .iter()
            .zip(payloads.iter())
            .zip(acceleration_structures.iter_mut())
        {
            let base = vk::WriteDescriptorSet::default()
                .dst_set(set)
                .dst_binding(write.binding)
                .dst_array_element(write.array_element);
            let vk_write = match *payload {
                Payload::AccelerationStructure(_) => {
                    let acs_write = match acs_write.as_mut() {
                        Some(acs_write) => acs_write,
                        None => continue,
                    };
                    let mut vk_write = base
                        .descriptor_type(vk::DescriptorType::ACCELERATION_STRUCTURE_KHR)
                        .push_next(acs_write);
                    vk_write.descriptor_count = 1;
                    vk_write
                }
                Payload::Images(ref infos) => {
                    let ty = match write.resource {
                        Dr::StorageImage(_) => vk::DescriptorType::STORAGE_IMAGE,
                        _ => vk::DescriptorType::SAMPLED_IMAGE,
                    };
                    base.descriptor_type(ty).image_info(infos)
                }
                Payload::Buffer(ref info) => {
                    let ty = match write.resource {
                        Dr::UniformBuffer { .. } => vk::DescriptorType::UNIFORM_BUFFER,
                        _ => vk::DescriptorType::STORAGE_BUFFER,
                    };
                    base.descriptor_type(ty)
                        .buffer_info(std::slice::from_ref(info))
                }
            };
            vk_writes.push(vk_write);
        }
        unsafe { self.device.update_descriptor_sets(&vk_writes, &[]) };
    }
}
