use super::shaders::{self, ShaderLibrary};
use crate::{
    bindings::{Binding, BindingPlane},
    geometry::MIN_HIT_DISTANCE,
    trace::{BspTree, ShadowQuery, ShadowResolver},
    Error,
};
use prism_graphics as gpu;
use std::mem;

pub const SHADOW_WORKGROUP: u32 = 64;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, bytemuck::Zeroable, bytemuck::Pod)]
struct ShadowQueryParams {
    count: u32,
    pad: [u32; 3],
}

/// Compute pipeline answering shadow queries with inline ray queries
/// against the bound TLAS.
pub struct ShadowPipeline {
    pipeline: gpu::ComputePipeline,
}

impl ShadowPipeline {
    /// Uses the ray tracing pipeline layout, so the same descriptor set
    /// serves both.
    pub fn new<G: gpu::Device>(
        gpu: &G,
        library: &ShaderLibrary,
        layout: &gpu::PipelineLayout,
    ) -> Result<Self, Error> {
        match gpu.capabilities().ray_tracing {
            Some(ref caps) if caps.ray_query => {}
            _ => return Err(Error::Unsupported),
        }
        let pipeline = gpu.create_compute_pipeline(gpu::ComputePipelineDesc {
            name: shaders::SHADOW_QUERY,
            layout,
            shader: library.require(shaders::SHADOW_QUERY)?,
            workgroup_size: [SHADOW_WORKGROUP, 1, 1],
        })?;
        Ok(Self { pipeline })
    }

    pub fn raw(&self) -> &gpu::ComputePipeline {
        &self.pipeline
    }

    pub fn destroy<G: gpu::Device>(&mut self, gpu: &G) {
        gpu.destroy_compute_pipeline(&mut self.pipeline);
    }
}

/// Every query is traced against the TLAS bound at [`Binding::Tlas`].
pub(super) fn register_null_kernel(gpu: &gpu::null::Context) {
    gpu.register_kernel(shaders::SHADOW_QUERY, |invocation| {
        let params: ShadowQueryParams = invocation.push_constants();
        let binding = Binding::ShadowQueries.index();
        let Some(bytes) = invocation.storage_buffer(binding) else {
            return;
        };
        let mut queries = bytes
            .chunks_exact(mem::size_of::<ShadowQuery>())
            .take(params.count as usize)
            .map(bytemuck::pod_read_unaligned::<ShadowQuery>)
            .collect::<Vec<_>>();
        for query in queries.iter_mut() {
            let occluded = invocation.ray_occluded(
                Binding::Tlas.index(),
                query.origin,
                query.direction,
                MIN_HIT_DISTANCE,
                query.max_distance,
            );
            query.occluded = occluded as u32;
        }
        if let Some(bytes) = invocation.storage_buffer(binding) {
            let len = queries.len() * mem::size_of::<ShadowQuery>();
            bytes[..len].copy_from_slice(bytemuck::cast_slice(&queries));
        }
    });
}

/// Submits each batch of queries as its own dispatch and waits for it.
pub struct ShadowQueryBatch<'a, G> {
    gpu: &'a G,
    pipeline: &'a ShadowPipeline,
    plane: &'a mut BindingPlane,
    encoder: gpu::CommandEncoder,
    submissions: u32,
}

impl<'a, G: gpu::Device> ShadowQueryBatch<'a, G> {
    pub fn new(gpu: &'a G, pipeline: &'a ShadowPipeline, plane: &'a mut BindingPlane) -> Self {
        Self {
            gpu,
            pipeline,
            plane,
            encoder: gpu::CommandEncoder::new("shadow queries"),
            submissions: 0,
        }
    }

    pub fn submissions(&self) -> u32 {
        self.submissions
    }
}

impl<G: gpu::Device> ShadowResolver for ShadowQueryBatch<'_, G> {
    #[profiling::function]
    fn resolve(&mut self, _scene: &BspTree, queries: &mut [ShadowQuery]) -> Result<(), Error> {
        if queries.is_empty() {
            return Ok(());
        }
        if self.plane.bound_tlas().is_none() {
            return Err(Error::Unsupported);
        }
        let buffer = self.plane.ensure_shadow_capacity(self.gpu, queries.len())?;
        self.gpu
            .write_buffer(buffer.into(), bytemuck::cast_slice(queries));

        let params = ShadowQueryParams {
            count: queries.len() as u32,
            ..Default::default()
        };
        let layout = self.plane.layout();
        self.encoder.start();
        self.encoder.barrier(
            gpu::PipelineStages::HOST,
            gpu::Access::HOST_WRITE,
            gpu::PipelineStages::COMPUTE,
            gpu::Access::SHADER_READ | gpu::Access::SHADER_WRITE,
        );
        self.encoder.bind_compute_pipeline(&self.pipeline.pipeline);
        self.encoder.bind_descriptor_set(
            gpu::BindPoint::Compute,
            layout,
            self.plane.descriptor_set(),
        );
        self.encoder
            .push_constants(layout, gpu::ShaderStages::COMPUTE, &params);
        self.encoder
            .dispatch([params.count.div_ceil(SHADOW_WORKGROUP), 1, 1]);
        self.encoder.barrier(
            gpu::PipelineStages::COMPUTE,
            gpu::Access::SHADER_WRITE,
            gpu::PipelineStages::HOST,
            gpu::Access::empty(),
        );
        self.gpu
            .submit_and_wait(&mut self.encoder, gpu::Fence::AccelerationBuild)?;
        self.submissions += 1;

        self.gpu
            .read_buffer(buffer.into(), bytemuck::cast_slice_mut(queries));
        Ok(())
    }
}
