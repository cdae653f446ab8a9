use crate::DeviceError;

pub trait ResourceDevice {
    fn create_buffer(&self, desc: crate::BufferDesc) -> Result<crate::Buffer, DeviceError>;
    fn destroy_buffer(&self, buffer: crate::Buffer);
    /// Write into a host-visible buffer.
    fn write_buffer(&self, piece: crate::BufferPiece, data: &[u8]);
    /// Read back from a host-visible buffer.
    fn read_buffer(&self, piece: crate::BufferPiece, data: &mut [u8]);
    fn get_buffer_address(&self, buffer: crate::Buffer) -> u64;
    fn create_texture(&self, desc: crate::TextureDesc) -> Result<crate::Texture, DeviceError>;
    fn destroy_texture(&self, texture: crate::Texture);
    fn create_texture_view(
        &self,
        texture: crate::Texture,
        name: &str,
    ) -> Result<crate::TextureView, DeviceError>;
    fn destroy_texture_view(&self, view: crate::TextureView);
}

pub trait AccelerationStructureDevice {
    fn get_bottom_level_acceleration_structure_sizes(
        &self,
        mesh: &crate::TriangleMesh,
        flags: crate::BuildFlags,
    ) -> crate::AccelerationStructureSizes;
    fn get_top_level_acceleration_structure_sizes(
        &self,
        instance_count: u32,
        flags: crate::BuildFlags,
    ) -> crate::AccelerationStructureSizes;
    fn create_acceleration_structure(
        &self,
        desc: crate::AccelerationStructureDesc,
    ) -> Result<crate::AccelerationStructure, DeviceError>;
    fn destroy_acceleration_structure(&self, acceleration_structure: crate::AccelerationStructure);
    fn get_acceleration_structure_address(
        &self,
        acceleration_structure: crate::AccelerationStructure,
    ) -> u64;
}

pub trait ShaderDevice {
    fn create_pipeline_layout(
        &self,
        desc: crate::PipelineLayoutDesc,
    ) -> Result<crate::PipelineLayout, DeviceError>;
    fn destroy_pipeline_layout(&self, layout: &mut crate::PipelineLayout);
    fn allocate_descriptor_set(
        &self,
        layout: &crate::PipelineLayout,
    ) -> Result<crate::DescriptorSet, DeviceError>;
    fn free_descriptor_set(&self, set: crate::DescriptorSet);
    /// Host-side descriptor writes, visible to the next submitted work.
    fn update_descriptor_set(&self, set: crate::DescriptorSet, writes: &[crate::DescriptorWrite]);
    fn create_ray_tracing_pipeline(
        &self,
        desc: crate::RayTracingPipelineDesc,
    ) -> Result<crate::RayTracingPipeline, DeviceError>;
    fn destroy_ray_tracing_pipeline(&self, pipeline: &mut crate::RayTracingPipeline);
    /// Opaque group handles, `group_count * handle_size` bytes.
    fn get_shader_group_handles(
        &self,
        pipeline: &crate::RayTracingPipeline,
    ) -> Result<Vec<u8>, DeviceError>;
    fn create_compute_pipeline(
        &self,
        desc: crate::ComputePipelineDesc,
    ) -> Result<crate::ComputePipeline, DeviceError>;
    fn destroy_compute_pipeline(&self, pipeline: &mut crate::ComputePipeline);
}

pub trait CommandDevice {
    /// Replay `encoder` on a one-shot submission and block on `fence`.
    fn submit_and_wait(
        &self,
        encoder: &mut crate::CommandEncoder,
        fence: crate::Fence,
    ) -> Result<(), DeviceError>;
}

pub trait Device:
    ResourceDevice + AccelerationStructureDevice + ShaderDevice + CommandDevice
{
    fn capabilities(&self) -> crate::Capabilities;
}
