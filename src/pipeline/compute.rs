use super::shaders::{self, ShaderLibrary};
use crate::Error;
use prism_graphics as gpu;

pub const AUX_WORKGROUP: [u32; 3] = [8, 8, 1];

const SOURCE_BINDING: u32 = 0;
const TARGET_BINDING: u32 = 1;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Zeroable, bytemuck::Pod)]
pub struct DepthParams {
    pub z_near: f32,
    pub z_far: f32,
    /// Tangent of half the vertical field of view.
    pub tan_half_fov: f32,
    pub aspect: f32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Zeroable, bytemuck::Pod)]
pub struct CompositeParams {
    pub intensity: f32,
    pub pad: [u32; 3],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Zeroable, bytemuck::Pod)]
pub struct DebugParams {
    pub mode: u32,
    pub surface_debug: u32,
    pub pad: [u32; 2],
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum AuxPass {
    LinearizeDepth,
    ReconstructNormal,
    Composite,
    DebugOverlay,
}

/// A compute pipeline reading one sampled image and writing one storage
/// image, with its own descriptor set.
pub struct ComputePass {
    pipeline: gpu::ComputePipeline,
    set: gpu::DescriptorSet,
    bound: Option<(gpu::TextureView, gpu::TextureView)>,
}

impl ComputePass {
    fn new<G: gpu::Device>(
        gpu: &G,
        layout: &gpu::PipelineLayout,
        shader: gpu::ShaderSource,
    ) -> Result<Self, Error> {
        let set = gpu.allocate_descriptor_set(layout)?;
        match gpu.create_compute_pipeline(gpu::ComputePipelineDesc {
            name: shader.name,
            layout,
            shader,
            workgroup_size: AUX_WORKGROUP,
        }) {
            Ok(pipeline) => Ok(Self {
                pipeline,
                set,
                bound: None,
            }),
            Err(e) => {
                gpu.free_descriptor_set(set);
                Err(e.into())
            }
        }
    }

    pub fn raw(&self) -> &gpu::ComputePipeline {
        &self.pipeline
    }

    pub fn descriptor_set(&self) -> gpu::DescriptorSet {
        self.set
    }

    pub fn bind<G: gpu::Device>(
        &mut self,
        gpu: &G,
        source: gpu::TextureView,
        target: gpu::TextureView,
    ) {
        if self.bound == Some((source, target)) {
            return;
        }
        gpu.update_descriptor_set(
            self.set,
            &[
                gpu::DescriptorWrite {
                    binding: SOURCE_BINDING,
                    array_element: 0,
                    resource: gpu::DescriptorResource::SampledImage(source),
                },
                gpu::DescriptorWrite {
                    binding: TARGET_BINDING,
                    array_element: 0,
                    resource: gpu::DescriptorResource::StorageImage(target),
                },
            ],
        );
        self.bound = Some((source, target));
    }

    /// Record a dispatch covering `extent`.
    pub fn record<P: bytemuck::Pod>(
        &self,
        encoder: &mut gpu::CommandEncoder,
        layout: &gpu::PipelineLayout,
        extent: gpu::Extent,
        params: &P,
    ) {
        encoder.bind_compute_pipeline(&self.pipeline);
        encoder.bind_descriptor_set(gpu::BindPoint::Compute, layout, self.set);
        encoder.push_constants(layout, gpu::ShaderStages::COMPUTE, params);
        encoder.dispatch(self.pipeline.get_dispatch_for(extent));
    }

    fn destroy<G: gpu::Device>(&mut self, gpu: &G) {
        gpu.destroy_compute_pipeline(&mut self.pipeline);
        gpu.free_descriptor_set(self.set);
    }
}

/// Image passes around the ray dispatch: depth linearization, normal
/// reconstruction, and the optional composite and debug overlay.
pub struct AuxPipelines {
    layout: gpu::PipelineLayout,
    linearize_depth: ComputePass,
    reconstruct_normal: ComputePass,
    composite: Option<ComputePass>,
    debug_overlay: Option<ComputePass>,
}

impl AuxPipelines {
    pub fn new<G: gpu::Device>(gpu: &G, library: &ShaderLibrary) -> Result<Self, Error> {
        let mut layout = gpu.create_pipeline_layout(gpu::PipelineLayoutDesc {
            name: "aux",
            bindings: &[
                gpu::BindingDesc {
                    binding: SOURCE_BINDING,
                    ty: gpu::BindingType::SampledImage,
                    count: 1,
                    partially_bound: false,
                },
                gpu::BindingDesc {
                    binding: TARGET_BINDING,
                    ty: gpu::BindingType::StorageImage,
                    count: 1,
                    partially_bound: false,
                },
            ],
            push_constant_size: gpu::limits::PUSH_CONSTANTS_SIZE,
        })?;

        let linearize_depth = match library
            .require(shaders::LINEARIZE_DEPTH)
            .and_then(|source| ComputePass::new(gpu, &layout, source))
        {
            Ok(pass) => pass,
            Err(e) => {
                gpu.destroy_pipeline_layout(&mut layout);
                return Err(e);
            }
        };
        let reconstruct_normal = match library
            .require(shaders::RECONSTRUCT_NORMAL)
            .and_then(|source| ComputePass::new(gpu, &layout, source))
        {
            Ok(pass) => pass,
            Err(e) => {
                let mut depth = linearize_depth;
                depth.destroy(gpu);
                gpu.destroy_pipeline_layout(&mut layout);
                return Err(e);
            }
        };

        let optional = |name: &str| {
            let source = library.get(name)?;
            match ComputePass::new(gpu, &layout, source) {
                Ok(pass) => Some(pass),
                Err(e) => {
                    log::warn!("Pass {} is unavailable: {}", name, e);
                    None
                }
            }
        };
        let composite = optional(shaders::COMPOSITE);
        let debug_overlay = optional(shaders::DEBUG_OVERLAY);

        Ok(Self {
            layout,
            linearize_depth,
            reconstruct_normal,
            composite,
            debug_overlay,
        })
    }

    pub fn layout(&self) -> &gpu::PipelineLayout {
        &self.layout
    }

    pub fn pass(&self, pass: AuxPass) -> Option<&ComputePass> {
        match pass {
            AuxPass::LinearizeDepth => Some(&self.linearize_depth),
            AuxPass::ReconstructNormal => Some(&self.reconstruct_normal),
            AuxPass::Composite => self.composite.as_ref(),
            AuxPass::DebugOverlay => self.debug_overlay.as_ref(),
        }
    }

    pub fn has(&self, pass: AuxPass) -> bool {
        self.pass(pass).is_some()
    }

    /// Bind `source` and `target` to `pass` and record its dispatch over
    /// `extent`. Returns `false` if the pass is unavailable.
    #[allow(clippy::too_many_arguments)]
    pub fn record<G: gpu::Device, P: bytemuck::Pod>(
        &mut self,
        gpu: &G,
        encoder: &mut gpu::CommandEncoder,
        pass: AuxPass,
        source: gpu::TextureView,
        target: gpu::TextureView,
        extent: gpu::Extent,
        params: &P,
    ) -> bool {
        let compute = match pass {
            AuxPass::LinearizeDepth => Some(&mut self.linearize_depth),
            AuxPass::ReconstructNormal => Some(&mut self.reconstruct_normal),
            AuxPass::Composite => self.composite.as_mut(),
            AuxPass::DebugOverlay => self.debug_overlay.as_mut(),
        };
        let Some(compute) = compute else {
            return false;
        };
        compute.bind(gpu, source, target);
        compute.record(encoder, &self.layout, extent, params);
        true
    }

    pub fn destroy<G: gpu::Device>(&mut self, gpu: &G) {
        self.linearize_depth.destroy(gpu);
        self.reconstruct_normal.destroy(gpu);
        if let Some(ref mut pass) = self.composite {
            pass.destroy(gpu);
        }
        if let Some(ref mut pass) = self.debug_overlay {
            pass.destroy(gpu);
        }
        gpu.destroy_pipeline_layout(&mut self.layout);
    }
}
