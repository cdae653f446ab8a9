use ash::vk;
use std::sync::Mutex;

mod command;
mod descriptor;
mod init;
mod pipeline;
mod resource;

#[derive(Debug)]
pub struct ContextDesc {
    pub validation: bool,
}

/// Every extension entry point the core needs, loaded once.
struct Extensions {
    acceleration_structure: ash::khr::acceleration_structure::Device,
    ray_tracing_pipeline: ash::khr::ray_tracing_pipeline::Device,
    debug_utils: Option<ash::ext::debug_utils::Device>,
}

struct Allocation {
    block: gpu_alloc::MemoryBlock<vk::DeviceMemory>,
    mapped: *mut u8,
}

struct MemoryManager {
    allocator: gpu_alloc::GpuAllocator<vk::DeviceMemory>,
    slab: slab::Slab<Allocation>,
    valid_ash_memory_types: u32,
}

struct Submission {
    command_pool: vk::CommandPool,
    queue: vk::Queue,
    acceleration_build_fence: vk::Fence,
    readback_fence: vk::Fence,
}

#[derive(Default)]
struct Objects {
    /// Storage buffers backing acceleration structures.
    acceleration_structures: slab::Slab<crate::Buffer>,
}

pub struct Context {
    memory: Mutex<MemoryManager>,
    descriptors: Mutex<descriptor::DescriptorPool>,
    submission: Mutex<Submission>,
    objects: Mutex<Objects>,
    extensions: Extensions,
    capabilities: crate::Capabilities,
    device: ash::Device,
    physical_device: vk::PhysicalDevice,
    instance: ash::Instance,
    _entry: ash::Entry,
}

fn map_format(format: crate::TextureFormat) -> vk::Format {
    use crate::TextureFormat as Tf;
    match format {
        Tf::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        Tf::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
        Tf::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,
        Tf::Rgba32Float => vk::Format::R32G32B32A32_SFLOAT,
        Tf::R32Float => vk::Format::R32_SFLOAT,
        Tf::Depth32Float => vk::Format::D32_SFLOAT,
    }
}

fn map_aspects(format: crate::TextureFormat) -> vk::ImageAspectFlags {
    if format.is_depth() {
        vk::ImageAspectFlags::DEPTH
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

fn map_layout(layout: crate::ImageLayout) -> vk::ImageLayout {
    use crate::ImageLayout as L;
    match layout {
        L::Undefined => vk::ImageLayout::UNDEFINED,
        L::General => vk::ImageLayout::GENERAL,
        L::TransferSrc => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        L::TransferDst => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        L::ShaderRead => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    }
}

fn map_stages(stages: crate::PipelineStages) -> vk::PipelineStageFlags {
    use crate::PipelineStages as S;
    let mut flags = vk::PipelineStageFlags::empty();
    if stages.contains(S::TOP) {
        flags |= vk::PipelineStageFlags::TOP_OF_PIPE;
    }
    if stages.contains(S::HOST) {
        flags |= vk::PipelineStageFlags::HOST;
    }
    if stages.contains(S::TRANSFER) {
        flags |= vk::PipelineStageFlags::TRANSFER;
    }
    if stages.contains(S::COMPUTE) {
        flags |= vk::PipelineStageFlags::COMPUTE_SHADER;
    }
    if stages.contains(S::RAY_TRACING) {
        flags |= vk::PipelineStageFlags::RAY_TRACING_SHADER_KHR;
    }
    if stages.contains(S::ACCELERATION_STRUCTURE_BUILD) {
        flags |= vk::PipelineStageFlags::ACCELERATION_STRUCTURE_BUILD_KHR;
    }
    if stages.contains(S::FRAGMENT) {
        flags |= vk::PipelineStageFlags::FRAGMENT_SHADER;
    }
    if stages.contains(S::BOTTOM) {
        flags |= vk::PipelineStageFlags::BOTTOM_OF_PIPE;
    }
    flags
}

fn map_access(access: crate::Access) -> vk::AccessFlags {
    use crate::Access as A;
    let mut flags = vk::AccessFlags::empty();
    if access.contains(A::HOST_WRITE) {
        flags |= vk::AccessFlags::HOST_WRITE;
    }
    if access.contains(A::TRANSFER_READ) {
        flags |= vk::AccessFlags::TRANSFER_READ;
    }
    if access.contains(A::TRANSFER_WRITE) {
        flags |= vk::AccessFlags::TRANSFER_WRITE;
    }
    if access.contains(A::SHADER_READ) {
        flags |= vk::AccessFlags::SHADER_READ;
    }
    if access.contains(A::SHADER_WRITE) {
        flags |= vk::AccessFlags::SHADER_WRITE;
    }
    if access.contains(A::UNIFORM_READ) {
        flags |= vk::AccessFlags::UNIFORM_READ;
    }
    if access.contains(A::ACCELERATION_STRUCTURE_READ) {
        flags |= vk::AccessFlags::ACCELERATION_STRUCTURE_READ_KHR;
    }
    if access.contains(A::ACCELERATION_STRUCTURE_WRITE) {
        flags |= vk::AccessFlags::ACCELERATION_STRUCTURE_WRITE_KHR;
    }
    flags
}

fn map_shader_stages(stages: crate::ShaderStages) -> vk::ShaderStageFlags {
    use crate::ShaderStages as Ss;
    let mut flags = vk::ShaderStageFlags::empty();
    if stages.contains(Ss::RAYGEN) {
        flags |= vk::ShaderStageFlags::RAYGEN_KHR;
    }
    if stages.contains(Ss::MISS) {
        flags |= vk::ShaderStageFlags::MISS_KHR;
    }
    if stages.contains(Ss::CLOSEST_HIT) {
        flags |= vk::ShaderStageFlags::CLOSEST_HIT_KHR;
    }
    if stages.contains(Ss::COMPUTE) {
        flags |= vk::ShaderStageFlags::COMPUTE;
    }
    flags
}

fn map_build_flags(flags: crate::BuildFlags) -> vk::BuildAccelerationStructureFlagsKHR {
    let mut vk_flags = vk::BuildAccelerationStructureFlagsKHR::empty();
    if flags.contains(crate::BuildFlags::PREFER_FAST_TRACE) {
        vk_flags |= vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE;
    }
    if flags.contains(crate::BuildFlags::ALLOW_UPDATE) {
        vk_flags |= vk::BuildAccelerationStructureFlagsKHR::ALLOW_UPDATE;
    }
    vk_flags
}

fn map_extent_3d(extent: &crate::Extent) -> vk::Extent3D {
    vk::Extent3D {
        width: extent.width,
        height: extent.height,
        depth: extent.depth,
    }
}

fn map_result(result: vk::Result) -> crate::DeviceError {
    match result {
        vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY => {
            crate::DeviceError::OutOfMemory
        }
        vk::Result::ERROR_DEVICE_LOST => crate::DeviceError::DeviceLost,
        vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL => {
            crate::DeviceError::DescriptorPool
        }
        other => crate::DeviceError::Build(format!("{:?}", other)),
    }
}

impl crate::Device for Context {
    fn capabilities(&self) -> crate::Capabilities {
        self.capabilities
    }
}
