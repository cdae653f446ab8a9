//! Ray tracing pipeline, its shader binding table, and the compute passes
//! that share the frame with it.

mod compute;
mod sbt;
pub mod shaders;
mod shadow;

pub use compute::{
    AuxPass, AuxPipelines, CompositeParams, ComputePass, DebugParams, DepthParams, AUX_WORKGROUP,
};
pub use sbt::{align_up, max_recursion_depth, SbtLayout, GROUP_COUNT, MISS_GROUP_COUNT};
pub use shaders::ShaderLibrary;
pub use shadow::{ShadowPipeline, ShadowQueryBatch, SHADOW_WORKGROUP};

use crate::{
    bindings::{Binding, CameraUniform, MaterialEntry},
    geometry::MIN_HIT_DISTANCE,
    trace::SKY_COLOR,
    Error,
};
use glam::Vec3;
use prism_graphics as gpu;

pub const RAY_TRACING_PIPELINE: &str = "main";

/// Teach the null device to run the frame's shaders on the host.
///
/// The ray tracing stand-in shoots one primary ray through each pixel
/// center and writes the emission of the closest hit, or the sky color
/// on a miss. Shadow queries are answered against the bound TLAS.
pub fn register_null_kernels(gpu: &gpu::null::Context) {
    shadow::register_null_kernel(gpu);
    gpu.register_kernel(RAY_TRACING_PIPELINE, |invocation| {
        let Some(camera) = invocation.load::<CameraUniform>(Binding::Camera.index(), 0) else {
            return;
        };
        let xyz = |v: [f32; 4]| Vec3::new(v[0], v[1], v[2]);
        let [width, height, _] = invocation.grid();
        let tan_y = (camera.origin[3] * 0.5).tan();
        let tan_x = tan_y * width as f32 / height.max(1) as f32;
        for y in 0..height {
            for x in 0..width {
                let sx = ((x as f32 + 0.5) / width as f32 * 2.0 - 1.0) * tan_x;
                let sy = (1.0 - (y as f32 + 0.5) / height as f32 * 2.0) * tan_y;
                let direction =
                    (xyz(camera.forward) + xyz(camera.right) * sx + xyz(camera.up) * sy).normalize();
                let hit = invocation.trace_closest(
                    Binding::Tlas.index(),
                    xyz(camera.origin).into(),
                    direction.into(),
                    MIN_HIT_DISTANCE,
                    f32::MAX,
                );
                let color = match hit {
                    Some(hit) => invocation
                        .load::<u32>(
                            Binding::TriangleMaterials.index(),
                            (hit.custom_index + hit.primitive) as usize,
                        )
                        .and_then(|material| {
                            invocation.load::<MaterialEntry>(Binding::Materials.index(), material as usize)
                        })
                        .map_or(Vec3::ZERO, |entry| xyz(entry.emission)),
                    None => SKY_COLOR,
                };
                invocation.store_texel(Binding::Color.index(), x, y, color.extend(1.0).into());
            }
        }
    });
}

pub struct RtPipeline {
    pipeline: gpu::RayTracingPipeline,
    sbt: gpu::Buffer,
    sbt_layout: SbtLayout,
    regions: gpu::SbtRegions,
    quality: u32,
}

impl RtPipeline {
    /// Create the pipeline for `quality` and fill its binding table.
    pub fn new<G: gpu::Device>(
        gpu: &G,
        library: &ShaderLibrary,
        layout: &gpu::PipelineLayout,
        bounces: u32,
        quality: u32,
    ) -> Result<Self, Error> {
        let caps = gpu.capabilities().ray_tracing.ok_or(Error::Unsupported)?;
        let miss = [
            library.require(shaders::MISS)?,
            library.require(shaders::SHADOW_MISS)?,
        ];
        let mut pipeline = gpu.create_ray_tracing_pipeline(gpu::RayTracingPipelineDesc {
            name: RAY_TRACING_PIPELINE,
            layout,
            raygen: library.raygen_for_quality(quality)?,
            miss: &miss,
            closest_hit: library.require(shaders::CLOSEST_HIT)?,
            max_recursion_depth: max_recursion_depth(bounces, caps.max_ray_recursion_depth),
        })?;

        let sbt_layout = SbtLayout::new(&caps);
        let sbt = gpu
            .get_shader_group_handles(&pipeline)
            .and_then(|handles| {
                let sbt = gpu.create_buffer(gpu::BufferDesc {
                    name: "sbt",
                    size: sbt_layout.size,
                    memory: gpu::Memory::Shared,
                    usage: gpu::BufferUsage::SHADER_BINDING_TABLE
                        | gpu::BufferUsage::DEVICE_ADDRESS,
                })?;
                gpu.write_buffer(sbt.into(), &sbt_layout.pack(&handles));
                Ok(sbt)
            });
        let sbt = match sbt {
            Ok(sbt) => sbt,
            Err(e) => {
                gpu.destroy_ray_tracing_pipeline(&mut pipeline);
                return Err(e.into());
            }
        };
        let regions = sbt_layout.regions(gpu.get_buffer_address(sbt));
        log::info!(
            "Ray tracing pipeline ready: quality {}, recursion {}, SBT stride {}",
            quality,
            pipeline.max_recursion_depth(),
            sbt_layout.stride
        );
        Ok(Self {
            pipeline,
            sbt,
            sbt_layout,
            regions,
            quality,
        })
    }

    pub fn raw(&self) -> &gpu::RayTracingPipeline {
        &self.pipeline
    }

    pub fn regions(&self) -> &gpu::SbtRegions {
        &self.regions
    }

    pub fn sbt_layout(&self) -> &SbtLayout {
        &self.sbt_layout
    }

    pub fn sbt_buffer(&self) -> gpu::Buffer {
        self.sbt
    }

    pub fn quality(&self) -> u32 {
        self.quality
    }

    pub fn max_recursion_depth(&self) -> u32 {
        self.pipeline.max_recursion_depth()
    }

    pub fn destroy<G: gpu::Device>(&mut self, gpu: &G) {
        gpu.destroy_buffer(self.sbt);
        gpu.destroy_ray_tracing_pipeline(&mut self.pipeline);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use prism_graphics::ResourceDevice;

    pub(crate) fn dummy_module() -> Vec<u32> {
        vec![0x0723_0203, 0x0001_0000, 0, 1, 0]
    }

    pub(crate) fn full_library() -> ShaderLibrary {
        let mut library = ShaderLibrary::new();
        for &name in shaders::REQUIRED.iter().chain(shaders::OPTIONAL) {
            library.insert(name, dummy_module());
        }
        library
    }

    #[test]
    fn table_holds_group_handles() {
        let gpu = gpu::null::Context::default();
        let plane = crate::bindings::BindingPlane::new(&gpu).unwrap();
        let mut pipeline = RtPipeline::new(&gpu, &full_library(), plane.layout(), 4, 0).unwrap();
        assert_eq!(pipeline.raw().group_count(), GROUP_COUNT);
        assert_eq!(pipeline.max_recursion_depth(), 4);
        let data = gpu.buffer_data(pipeline.sbt_buffer());
        for (group, offset) in pipeline.sbt_layout().group_offsets().iter().enumerate() {
            assert_eq!(data[*offset as usize], group as u8 + 1);
        }
        let address = gpu.get_buffer_address(pipeline.sbt_buffer());
        assert_eq!(pipeline.regions().raygen.address, address);
        pipeline.destroy(&gpu);
    }

    #[test]
    fn missing_shader_is_reported() {
        let gpu = gpu::null::Context::default();
        let plane = crate::bindings::BindingPlane::new(&gpu).unwrap();
        let mut library = ShaderLibrary::new();
        library.insert(shaders::RAYGEN, dummy_module());
        library.insert(shaders::MISS, dummy_module());
        match RtPipeline::new(&gpu, &library, plane.layout(), 1, 0) {
            Err(Error::ShaderMissing(name)) => assert_eq!(name, shaders::SHADOW_MISS),
            Err(other) => panic!("unexpected {}", other),
            Ok(_) => panic!("pipeline without a shadow miss shader"),
        }
    }

    #[test]
    fn requires_ray_tracing() {
        let gpu = gpu::null::Context::without_ray_tracing();
        let plane = crate::bindings::BindingPlane::new(&gpu).unwrap();
        assert!(matches!(
            RtPipeline::new(&gpu, &full_library(), plane.layout(), 1, 0),
            Err(Error::Unsupported)
        ));
    }
}
