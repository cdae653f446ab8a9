use std::ops::Range;

/// Pipeline bind point of descriptor sets and push constants.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum BindPoint {
    Compute,
    RayTracing,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Barrier {
        src_stages: crate::PipelineStages,
        src_access: crate::Access,
        dst_stages: crate::PipelineStages,
        dst_access: crate::Access,
    },
    ImageBarrier {
        texture: crate::Texture,
        old_layout: crate::ImageLayout,
        new_layout: crate::ImageLayout,
        src_stages: crate::PipelineStages,
        src_access: crate::Access,
        dst_stages: crate::PipelineStages,
        dst_access: crate::Access,
    },
    CopyBufferToBuffer {
        src: crate::BufferPiece,
        dst: crate::BufferPiece,
        size: u64,
    },
    CopyTextureToTexture {
        src: crate::Texture,
        dst: crate::Texture,
        size: crate::Extent,
    },
    CopyTextureToBuffer {
        src: crate::Texture,
        dst: crate::BufferPiece,
        size: crate::Extent,
    },
    BlitTexture {
        src: crate::Texture,
        dst: crate::Texture,
        filter: crate::Filter,
    },
    FillBuffer {
        dst: crate::BufferPiece,
        size: u64,
        value: u32,
    },
    BuildBottomLevel {
        dst: crate::AccelerationStructure,
        mesh: crate::TriangleMesh,
        flags: crate::BuildFlags,
        scratch: crate::BufferPiece,
        update: bool,
    },
    BuildTopLevel {
        dst: crate::AccelerationStructure,
        instance_data: crate::BufferPiece,
        instance_count: u32,
        flags: crate::BuildFlags,
        scratch: crate::BufferPiece,
    },
    BindComputePipeline {
        raw: u64,
    },
    BindRayTracingPipeline {
        raw: u64,
    },
    BindDescriptorSet {
        bind_point: BindPoint,
        layout_raw: u64,
        set: crate::DescriptorSet,
    },
    PushConstants {
        layout_raw: u64,
        stages: crate::ShaderStages,
        data: Range<usize>,
    },
    Dispatch {
        groups: [u32; 3],
    },
    TraceRays {
        regions: crate::SbtRegions,
        size: [u32; 3],
    },
}

/// Commands recorded on the host and replayed by a backend.
#[derive(Debug, Default)]
pub struct CommandEncoder {
    name: String,
    commands: Vec<Command>,
    plain_data: Vec<u8>,
}

/// Stages and access masks that synchronize a layout transition.
pub fn layout_sync(layout: crate::ImageLayout) -> (crate::PipelineStages, crate::Access) {
    use crate::{Access as A, ImageLayout as L, PipelineStages as S};
    match layout {
        L::Undefined => (S::TOP, A::empty()),
        L::General => (
            S::COMPUTE | S::RAY_TRACING,
            A::SHADER_READ | A::SHADER_WRITE,
        ),
        L::TransferSrc => (S::TRANSFER, A::TRANSFER_READ),
        L::TransferDst => (S::TRANSFER, A::TRANSFER_WRITE),
        L::ShaderRead => (
            S::FRAGMENT | S::COMPUTE | S::RAY_TRACING,
            A::SHADER_READ,
        ),
    }
}

impl CommandEncoder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            commands: Vec::new(),
            plain_data: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Drop everything recorded so far.
    pub fn start(&mut self) {
        self.commands.clear();
        self.plain_data.clear();
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn plain_data(&self, range: Range<usize>) -> &[u8] {
        &self.plain_data[range]
    }

    pub fn barrier(
        &mut self,
        src_stages: crate::PipelineStages,
        src_access: crate::Access,
        dst_stages: crate::PipelineStages,
        dst_access: crate::Access,
    ) {
        self.commands.push(Command::Barrier {
            src_stages,
            src_access,
            dst_stages,
            dst_access,
        });
    }

    /// Move `texture` between layouts with the matching stage/access masks.
    pub fn transition(
        &mut self,
        texture: crate::Texture,
        old_layout: crate::ImageLayout,
        new_layout: crate::ImageLayout,
    ) {
        let (src_stages, src_access) = layout_sync(old_layout);
        let (dst_stages, dst_access) = layout_sync(new_layout);
        self.commands.push(Command::ImageBarrier {
            texture,
            old_layout,
            new_layout,
            src_stages,
            src_access,
            dst_stages,
            dst_access,
        });
    }

    pub fn copy_buffer_to_buffer(
        &mut self,
        src: crate::BufferPiece,
        dst: crate::BufferPiece,
        size: u64,
    ) {
        self.commands
            .push(Command::CopyBufferToBuffer { src, dst, size });
    }

    pub fn copy_texture_to_texture(
        &mut self,
        src: crate::Texture,
        dst: crate::Texture,
        size: crate::Extent,
    ) {
        self.commands
            .push(Command::CopyTextureToTexture { src, dst, size });
    }

    pub fn copy_texture_to_buffer(
        &mut self,
        src: crate::Texture,
        dst: crate::BufferPiece,
        size: crate::Extent,
    ) {
        self.commands
            .push(Command::CopyTextureToBuffer { src, dst, size });
    }

    pub fn blit_texture(&mut self, src: crate::Texture, dst: crate::Texture, filter: crate::Filter) {
        self.commands
            .push(Command::BlitTexture { src, dst, filter });
    }

    pub fn fill_buffer(&mut self, dst: crate::BufferPiece, size: u64, value: u32) {
        self.commands.push(Command::FillBuffer { dst, size, value });
    }

    pub fn build_bottom_level(
        &mut self,
        dst: crate::AccelerationStructure,
        mesh: &crate::TriangleMesh,
        flags: crate::BuildFlags,
        scratch: crate::BufferPiece,
        update: bool,
    ) {
        self.commands.push(Command::BuildBottomLevel {
            dst,
            mesh: *mesh,
            flags,
            scratch,
            update,
        });
    }

    pub fn build_top_level(
        &mut self,
        dst: crate::AccelerationStructure,
        instance_data: crate::BufferPiece,
        instance_count: u32,
        flags: crate::BuildFlags,
        scratch: crate::BufferPiece,
    ) {
        self.commands.push(Command::BuildTopLevel {
            dst,
            instance_data,
            instance_count,
            flags,
            scratch,
        });
    }

    pub fn bind_compute_pipeline(&mut self, pipeline: &crate::ComputePipeline) {
        self.commands
            .push(Command::BindComputePipeline { raw: pipeline.raw });
    }

    pub fn bind_ray_tracing_pipeline(&mut self, pipeline: &crate::RayTracingPipeline) {
        self.commands
            .push(Command::BindRayTracingPipeline { raw: pipeline.raw });
    }

    pub fn bind_descriptor_set(
        &mut self,
        bind_point: BindPoint,
        layout: &crate::PipelineLayout,
        set: crate::DescriptorSet,
    ) {
        self.commands.push(Command::BindDescriptorSet {
            bind_point,
            layout_raw: layout.raw,
            set,
        });
    }

    pub fn push_constants<P: bytemuck::Pod>(
        &mut self,
        layout: &crate::PipelineLayout,
        stages: crate::ShaderStages,
        data: &P,
    ) {
        let bytes = bytemuck::bytes_of(data);
        assert!(bytes.len() as u32 <= layout.push_constant_size);
        let start = self.plain_data.len();
        self.plain_data.extend_from_slice(bytes);
        self.commands.push(Command::PushConstants {
            layout_raw: layout.raw,
            stages,
            data: start..self.plain_data.len(),
        });
    }

    pub fn dispatch(&mut self, groups: [u32; 3]) {
        self.commands.push(Command::Dispatch { groups });
    }

    pub fn trace_rays(&mut self, regions: &crate::SbtRegions, size: [u32; 3]) {
        self.commands.push(Command::TraceRays {
            regions: *regions,
            size,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_masks_follow_layouts() {
        let texture = crate::Texture {
            raw: 1,
            handle: 0,
            format: crate::TextureFormat::Rgba32Float,
            size: crate::Extent::new_2d(4, 4),
        };
        let mut encoder = CommandEncoder::new("test");
        encoder.transition(
            texture,
            crate::ImageLayout::TransferSrc,
            crate::ImageLayout::General,
        );
        match encoder.commands()[0] {
            Command::ImageBarrier {
                src_stages,
                src_access,
                dst_stages,
                ..
            } => {
                assert_eq!(src_stages, crate::PipelineStages::TRANSFER);
                assert_eq!(src_access, crate::Access::TRANSFER_READ);
                assert!(dst_stages.contains(crate::PipelineStages::RAY_TRACING));
            }
            ref other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn push_constants_are_stored_inline() {
        let layout = crate::PipelineLayout {
            raw: 7,
            set_layout_raw: 8,
            handle: 0,
            bindings: Vec::new(),
            push_constant_size: 16,
        };
        let mut encoder = CommandEncoder::new("test");
        encoder.push_constants(&layout, crate::ShaderStages::COMPUTE, &[1.5f32, 2.5]);
        let range = match encoder.commands()[0] {
            Command::PushConstants { ref data, .. } => data.clone(),
            ref other => panic!("unexpected {:?}", other),
        };
        let values: [f32; 2] = bytemuck::pod_read_unaligned(encoder.plain_data(range));
        assert_eq!(values, [1.5, 2.5]);
    }
}
