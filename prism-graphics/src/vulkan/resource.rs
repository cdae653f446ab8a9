use ash::vk;
use gpu_alloc_ash::AshMemoryDevice;
use std::ptr;

struct Allocation {
    memory: vk::DeviceMemory,
    offset: u64,
    handle: usize,
}

fn map_buffer_usage(usage: crate::BufferUsage) -> vk::BufferUsageFlags {
    use crate::BufferUsage as Bu;
    use vk::BufferUsageFlags as Buf;
    let mut flags = Buf::empty();
    if usage.contains(Bu::TRANSFER_SRC) {
        flags |= Buf::TRANSFER_SRC;
    }
    if usage.contains(Bu::TRANSFER_DST) {
        flags |= Buf::TRANSFER_DST;
    }
    if usage.contains(Bu::UNIFORM) {
        flags |= Buf::UNIFORM_BUFFER;
    }
    if usage.contains(Bu::STORAGE) {
        flags |= Buf::STORAGE_BUFFER;
    }
    if usage.contains(Bu::VERTEX) {
        flags |= Buf::VERTEX_BUFFER;
    }
    if usage.contains(Bu::INDEX) {
        flags |= Buf::INDEX_BUFFER;
    }
    if usage.contains(Bu::ACCELERATION_STRUCTURE_INPUT) {
        flags |= Buf::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR;
    }
    if usage.contains(Bu::ACCELERATION_STRUCTURE_STORAGE) {
        flags |= Buf::ACCELERATION_STRUCTURE_STORAGE_KHR;
    }
    if usage.contains(Bu::SHADER_BINDING_TABLE) {
        flags |= Buf::SHADER_BINDING_TABLE_KHR;
    }
    if usage.contains(Bu::DEVICE_ADDRESS) {
        flags |= Buf::SHADER_DEVICE_ADDRESS;
    }
    flags
}

fn map_texture_usage(usage: crate::TextureUsage, format: crate::TextureFormat) -> vk::ImageUsageFlags {
    let mut flags = vk::ImageUsageFlags::empty();
    if usage.contains(crate::TextureUsage::COPY) {
        flags |= vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST;
    }
    if usage.contains(crate::TextureUsage::RESOURCE) {
        flags |= vk::ImageUsageFlags::SAMPLED;
    }
    if usage.contains(crate::TextureUsage::STORAGE) {
        flags |= vk::ImageUsageFlags::STORAGE;
    }
    if usage.contains(crate::TextureUsage::TARGET) {
        flags |= if format.is_depth() {
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT
        } else {
            vk::ImageUsageFlags::COLOR_ATTACHMENT
        };
    }
    flags
}

impl super::Context {
    fn allocate_memory(
        &self,
        requirements: vk::MemoryRequirements,
        memory: crate::Memory,
        device_address: bool,
    ) -> Result<Allocation, crate::DeviceError> {
        let mut manager = self.memory.lock().unwrap();
        let mut alloc_usage = match memory {
            crate::Memory::Device => gpu_alloc::UsageFlags::FAST_DEVICE_ACCESS,
            crate::Memory::Shared => {
                gpu_alloc::UsageFlags::HOST_ACCESS
                    | gpu_alloc::UsageFlags::DOWNLOAD
                    | gpu_alloc::UsageFlags::UPLOAD
                    | gpu_alloc::UsageFlags::FAST_DEVICE_ACCESS
            }
            crate::Memory::Upload => {
                gpu_alloc::UsageFlags::HOST_ACCESS | gpu_alloc::UsageFlags::UPLOAD
            }
        };
        if device_address {
            alloc_usage |= gpu_alloc::UsageFlags::DEVICE_ADDRESS;
        }
        let memory_types = requirements.memory_type_bits & manager.valid_ash_memory_types;
        let mut block = unsafe {
            manager.allocator.alloc(
                AshMemoryDevice::wrap(&self.device),
                gpu_alloc::Request {
                    size: requirements.size,
                    align_mask: requirements.alignment - 1,
                    usage: alloc_usage,
                    memory_types,
                },
            )
        }
        .map_err(|err| {
            log::error!("Memory allocation of {} bytes: {:?}", requirements.size, err);
            crate::DeviceError::OutOfMemory
        })?;
        let mapped = if memory.is_host_visible() {
            let size = block.size() as usize;
            match unsafe { block.map(AshMemoryDevice::wrap(&self.device), 0, size) } {
                Ok(ptr) => ptr.as_ptr(),
                Err(err) => {
                    log::error!("Memory mapping: {:?}", err);
                    unsafe {
                        manager
                            .allocator
                            .dealloc(AshMemoryDevice::wrap(&self.device), block)
                    };
                    return Err(crate::DeviceError::OutOfMemory);
                }
            }
        } else {
            ptr::null_mut()
        };
        let memory = *block.memory();
        let offset = block.offset();
        Ok(Allocation {
            memory,
            offset,
            handle: manager.slab.insert(super::Allocation { block, mapped }),
        })
    }

    fn free_memory(&self, handle: usize) {
        let mut manager = self.memory.lock().unwrap();
        let allocation = manager.slab.remove(handle);
        unsafe {
            manager
                .allocator
                .dealloc(AshMemoryDevice::wrap(&self.device), allocation.block);
        }
    }

    fn mapped_ptr(&self, piece: crate::BufferPiece) -> *mut u8 {
        let manager = self.memory.lock().unwrap();
        let base = manager.slab[piece.buffer.handle].mapped;
        assert!(!base.is_null());
        unsafe { base.add(piece.offset as usize) }
    }
}

impl crate::ResourceDevice for super::Context {
    fn create_buffer(&self, desc: crate::BufferDesc) -> Result<crate::Buffer, crate::DeviceError> {
        let vk_info = vk::BufferCreateInfo::default()
            .size(desc.size)
            .usage(map_buffer_usage(desc.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let raw = unsafe { self.device.create_buffer(&vk_info, None) }.map_err(super::map_result)?;
        let requirements = unsafe { self.device.get_buffer_memory_requirements(raw) };
        let allocation = match self.allocate_memory(
            requirements,
            desc.memory,
            desc.usage.contains(crate::BufferUsage::DEVICE_ADDRESS),
        ) {
            Ok(allocation) => allocation,
            Err(err) => {
                unsafe { self.device.destroy_buffer(raw, None) };
                return Err(err);
            }
        };

        unsafe {
            self.device
                .bind_buffer_memory(raw, allocation.memory, allocation.offset)
                .map_err(super::map_result)?;
        }
        if !desc.name.is_empty() {
            self.set_object_name(raw, desc.name);
        }

        Ok(crate::Buffer {
            raw: vk::Handle::as_raw(raw),
            handle: allocation.handle,
            size: desc.size,
            memory: desc.memory,
        })
    }

    fn destroy_buffer(&self, buffer: crate::Buffer) {
        let raw = <vk::Buffer as vk::Handle>::from_raw(buffer.raw);
        unsafe { self.device.destroy_buffer(raw, None) };
        self.free_memory(buffer.handle);
    }

    fn write_buffer(&self, piece: crate::BufferPiece, data: &[u8]) {
        assert!(piece.offset + data.len() as u64 <= piece.buffer.size);
        let dst = self.mapped_ptr(piece);
        unsafe { ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len()) };
    }

    fn read_buffer(&self, piece: crate::BufferPiece, data: &mut [u8]) {
        assert!(piece.offset + data.len() as u64 <= piece.buffer.size);
        let src = self.mapped_ptr(piece);
        unsafe { ptr::copy_nonoverlapping(src, data.as_mut_ptr(), data.len()) };
    }

    fn get_buffer_address(&self, buffer: crate::Buffer) -> u64 {
        let info = vk::BufferDeviceAddressInfo::default()
            .buffer(<vk::Buffer as vk::Handle>::from_raw(buffer.raw));
        unsafe { self.device.get_buffer_device_address(&info) }
    }

    fn create_texture(
        &self,
        desc: crate::TextureDesc,
    ) -> Result<crate::Texture, crate::DeviceError> {
        let create_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(super::map_format(desc.format))
            .extent(super::map_extent_3d(&desc.size))
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(map_texture_usage(desc.usage, desc.format))
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let raw =
            unsafe { self.device.create_image(&create_info, None) }.map_err(super::map_result)?;
        let requirements = unsafe { self.device.get_image_memory_requirements(raw) };
        let allocation = match self.allocate_memory(requirements, crate::Memory::Device, false) {
            Ok(allocation) => allocation,
            Err(err) => {
                unsafe { self.device.destroy_image(raw, None) };
                return Err(err);
            }
        };
        unsafe {
            self.device
                .bind_image_memory(raw, allocation.memory, allocation.offset)
                .map_err(super::map_result)?;
        }
        if !desc.name.is_empty() {
            self.set_object_name(raw, desc.name);
        }

        Ok(crate::Texture {
            raw: vk::Handle::as_raw(raw),
            handle: allocation.handle,
            format: desc.format,
            size: desc.size,
        })
    }

    fn destroy_texture(&self, texture: crate::Texture) {
        let raw = <vk::Image as vk::Handle>::from_raw(texture.raw);
        unsafe { self.device.destroy_image(raw, None) };
        self.free_memory(texture.handle);
    }

    fn create_texture_view(
        &self,
        texture: crate::Texture,
        name: &str,
    ) -> Result<crate::TextureView, crate::DeviceError> {
        let subresource_range = vk::ImageSubresourceRange {
            aspect_mask: super::map_aspects(texture.format),
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        };
        let create_info = vk::ImageViewCreateInfo::default()
            .image(<vk::Image as vk::Handle>::from_raw(texture.raw))
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(super::map_format(texture.format))
            .subresource_range(subresource_range);
        let raw = unsafe { self.device.create_image_view(&create_info, None) }
            .map_err(super::map_result)?;
        if !name.is_empty() {
            self.set_object_name(raw, name);
        }
        Ok(crate::TextureView {
            raw: vk::Handle::as_raw(raw),
            handle: 0,
            texture,
        })
    }

    fn destroy_texture_view(&self, view: crate::TextureView) {
        let raw = <vk::ImageView as vk::Handle>::from_raw(view.raw);
        unsafe { self.device.destroy_image_view(raw, None) };
    }
}

fn make_triangle_geometry<'a>(
    device: &impl crate::ResourceDevice,
    mesh: &crate::TriangleMesh,
) -> vk::AccelerationStructureGeometryKHR<'a> {
    let triangles = vk::AccelerationStructureGeometryTrianglesDataKHR::default()
        .vertex_format(vk::Format::R32G32B32_SFLOAT)
        .vertex_data(vk::DeviceOrHostAddressConstKHR {
            device_address: device.get_buffer_address(mesh.vertex_data.buffer)
                + mesh.vertex_data.offset,
        })
        .vertex_stride(mesh.vertex_stride as u64)
        .max_vertex(mesh.vertex_count.saturating_sub(1))
        .index_type(vk::IndexType::UINT32)
        .index_data(vk::DeviceOrHostAddressConstKHR {
            device_address: device.get_buffer_address(mesh.index_data.buffer)
                + mesh.index_data.offset,
        });
    vk::AccelerationStructureGeometryKHR::default()
        .geometry_type(vk::GeometryTypeKHR::TRIANGLES)
        .geometry(vk::AccelerationStructureGeometryDataKHR { triangles })
        .flags(if mesh.opaque {
            vk::GeometryFlagsKHR::OPAQUE
        } else {
            vk::GeometryFlagsKHR::empty()
        })
}

impl super::Context {
    pub(super) fn bottom_level_geometry<'a>(
        &self,
        mesh: &crate::TriangleMesh,
    ) -> vk::AccelerationStructureGeometryKHR<'a> {
        make_triangle_geometry(self, mesh)
    }

    pub(super) fn top_level_geometry<'a>(
        &self,
        instance_data: crate::BufferPiece,
    ) -> vk::AccelerationStructureGeometryKHR<'a> {
        use crate::ResourceDevice as _;
        let instances = vk::AccelerationStructureGeometryInstancesDataKHR::default().data(
            vk::DeviceOrHostAddressConstKHR {
                device_address: self.get_buffer_address(instance_data.buffer)
                    + instance_data.offset,
            },
        );
        vk::AccelerationStructureGeometryKHR::default()
            .geometry_type(vk::GeometryTypeKHR::INSTANCES)
            .geometry(vk::AccelerationStructureGeometryDataKHR { instances })
    }

    fn get_sizes(
        &self,
        ty: vk::AccelerationStructureTypeKHR,
        geometry: vk::AccelerationStructureGeometryKHR,
        primitive_count: u32,
        flags: crate::BuildFlags,
    ) -> crate::AccelerationStructureSizes {
        let geometries = [geometry];
        let build_info = vk::AccelerationStructureBuildGeometryInfoKHR::default()
            .ty(ty)
            .flags(super::map_build_flags(flags))
            .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
            .geometries(&geometries);
        let mut sizes = vk::AccelerationStructureBuildSizesInfoKHR::default();
        unsafe {
            self.extensions
                .acceleration_structure
                .get_acceleration_structure_build_sizes(
                    vk::AccelerationStructureBuildTypeKHR::DEVICE,
                    &build_info,
                    &[primitive_count],
                    &mut sizes,
                )
        };
        crate::AccelerationStructureSizes {
            data: sizes.acceleration_structure_size,
            scratch: sizes.build_scratch_size,
            update_scratch: sizes.update_scratch_size,
        }
    }
}

impl crate::AccelerationStructureDevice for super::Context {
    fn get_bottom_level_acceleration_structure_sizes(
        &self,
        mesh: &crate::TriangleMesh,
        flags: crate::BuildFlags,
    ) -> crate::AccelerationStructureSizes {
        self.get_sizes(
            vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL,
            self.bottom_level_geometry(mesh),
            mesh.triangle_count,
            flags,
        )
    }

    fn get_top_level_acceleration_structure_sizes(
        &self,
        instance_count: u32,
        flags: crate::BuildFlags,
    ) -> crate::AccelerationStructureSizes {
        let instances = vk::AccelerationStructureGeometryInstancesDataKHR::default();
        let geometry = vk::AccelerationStructureGeometryKHR::default()
            .geometry_type(vk::GeometryTypeKHR::INSTANCES)
            .geometry(vk::AccelerationStructureGeometryDataKHR { instances });
        self.get_sizes(
            vk::AccelerationStructureTypeKHR::TOP_LEVEL,
            geometry,
            instance_count,
            flags,
        )
    }

    fn create_acceleration_structure(
        &self,
        desc: crate::AccelerationStructureDesc,
    ) -> Result<crate::AccelerationStructure, crate::DeviceError> {
        use crate::ResourceDevice as _;
        let buffer = self.create_buffer(crate::BufferDesc {
            name: desc.name,
            size: desc.size,
            memory: crate::Memory::Device,
            usage: crate::BufferUsage::ACCELERATION_STRUCTURE_STORAGE
                | crate::BufferUsage::DEVICE_ADDRESS,
        })?;
        let ty = match desc.ty {
            crate::AccelerationStructureType::TopLevel => {
                vk::AccelerationStructureTypeKHR::TOP_LEVEL
            }
            crate::AccelerationStructureType::BottomLevel => {
                vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL
            }
        };
        let create_info = vk::AccelerationStructureCreateInfoKHR::default()
            .ty(ty)
            .buffer(<vk::Buffer as vk::Handle>::from_raw(buffer.raw))
            .size(desc.size);
        let raw = match unsafe {
            self.extensions
                .acceleration_structure
                .create_acceleration_structure(&create_info, None)
        } {
            Ok(raw) => raw,
            Err(err) => {
                self.destroy_buffer(buffer);
                return Err(super::map_result(err));
            }
        };
        if !desc.name.is_empty() {
            self.set_object_name(raw, desc.name);
        }
        let handle = self
            .objects
            .lock()
            .unwrap()
            .acceleration_structures
            .insert(buffer);
        Ok(crate::AccelerationStructure {
            raw: vk::Handle::as_raw(raw),
            handle,
            ty: desc.ty,
            size: desc.size,
        })
    }

    fn destroy_acceleration_structure(&self, acceleration_structure: crate::AccelerationStructure) {
        use crate::ResourceDevice as _;
        let raw = <vk::AccelerationStructureKHR as vk::Handle>::from_raw(acceleration_structure.raw);
        unsafe {
            self.extensions
                .acceleration_structure
                .destroy_acceleration_structure(raw, None)
        };
        let buffer = self
            .objects
            .lock()
            .unwrap()
            .acceleration_structures
            .remove(acceleration_structure.handle);
        self.destroy_buffer(buffer);
    }

    fn get_acceleration_structure_address(
        &self,
        acceleration_structure: crate::AccelerationStructure,
    ) -> u64 {
        let info = vk::AccelerationStructureDeviceAddressInfoKHR::default().acceleration_structure(
            <vk::AccelerationStructureKHR as vk::Handle>::from_raw(acceleration_structure.raw),
        );
        unsafe {
            self.extensions
                .acceleration_structure
                .get_acceleration_structure_device_address(&info)
        }
    }
}
