use super::{blas::Blas, BlasId};
use crate::Error;
use prism_graphics as gpu;
use std::mem;

const INSTANCE_SIZE: u64 = mem::size_of::<gpu::RawInstance>() as u64;

/// One entry of the top-level instance list.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Instance {
    pub blas: BlasId,
    pub transform: gpu::Transform,
    /// Offset of this instance's slice in the flattened material array.
    pub custom_index: u32,
    pub triangle_material_count: u32,
    pub mask: u8,
    pub sbt_offset: u32,
    pub flags: gpu::InstanceFlags,
    pub material: u32,
}

impl Instance {
    pub fn triangle_material_offset(&self) -> u32 {
        self.custom_index
    }
}

/// Double-buffered top-level structure.
///
/// Builds always write the inactive slot and only swap `active` on
/// success, so readers keep seeing the previous structure on failure.
#[derive(Debug, Default)]
pub(super) struct Tlas {
    pub instances: Vec<Instance>,
    pub slots: [Option<gpu::AccelerationStructure>; 2],
    pub active: usize,
    pub built: bool,
    pub needs_rebuild: bool,
    pub dirty_transforms: bool,
    pub scratch_size: u64,
    pub instance_buffer: Option<gpu::Buffer>,
}

impl Tlas {
    pub fn active_structure(&self) -> Option<gpu::AccelerationStructure> {
        if self.built {
            self.slots[self.active]
        } else {
            None
        }
    }

    fn inactive(&self) -> usize {
        if self.built {
            1 - self.active
        } else {
            // Nothing is visible yet, either slot may be written.
            self.active
        }
    }

    fn raw_instances(&self, blases: &[Blas]) -> Result<Vec<gpu::RawInstance>, Error> {
        self.instances
            .iter()
            .map(|instance| {
                let address = blases
                    .get(instance.blas.index())
                    .and_then(Blas::device_address)
                    .ok_or(Error::InvalidBlas(instance.blas))?;
                Ok(gpu::RawInstance::from(&gpu::AccelerationStructureInstance {
                    acceleration_structure_address: address,
                    transform: instance.transform,
                    custom_index: instance.custom_index,
                    mask: instance.mask,
                    sbt_offset: instance.sbt_offset,
                    flags: instance.flags | gpu::InstanceFlags::TRIANGLE_FACING_CULL_DISABLE,
                }))
            })
            .collect()
    }

    fn upload_instances<G: gpu::Device>(
        &mut self,
        gpu: &G,
        records: &[gpu::RawInstance],
    ) -> Result<gpu::Buffer, Error> {
        let size = records.len() as u64 * INSTANCE_SIZE;
        let buffer = match self.instance_buffer {
            Some(buffer) if buffer.size() >= size => buffer,
            previous => {
                if let Some(buffer) = previous {
                    gpu.destroy_buffer(buffer);
                    self.instance_buffer = None;
                }
                let buffer = gpu.create_buffer(gpu::BufferDesc {
                    name: "tlas instances",
                    size: size.next_power_of_two(),
                    memory: gpu::Memory::Upload,
                    usage: gpu::BufferUsage::ACCELERATION_STRUCTURE_INPUT
                        | gpu::BufferUsage::DEVICE_ADDRESS,
                })?;
                self.instance_buffer = Some(buffer);
                buffer
            }
        };
        gpu.write_buffer(buffer.into(), bytemuck::cast_slice(records));
        Ok(buffer)
    }

    #[profiling::function]
    pub fn build<G: gpu::Device>(&mut self, gpu: &G, blases: &[Blas]) -> Result<(), Error> {
        let records = self.raw_instances(blases)?;
        let instance_buffer = self.upload_instances(gpu, &records)?;
        let count = records.len() as u32;
        let flags = gpu::BuildFlags::PREFER_FAST_TRACE;
        let sizes = gpu.get_top_level_acceleration_structure_sizes(count, flags);
        self.scratch_size = sizes.scratch;

        let target = self.inactive();
        let mut created = false;
        let structure = match self.slots[target] {
            Some(structure) if structure.size() >= sizes.data => structure,
            previous => {
                if let Some(structure) = previous {
                    log::debug!(
                        "Growing TLAS slot {} from {} to {} bytes",
                        target,
                        structure.size(),
                        sizes.data
                    );
                    gpu.destroy_acceleration_structure(structure);
                    self.slots[target] = None;
                }
                let structure = gpu
                    .create_acceleration_structure(gpu::AccelerationStructureDesc {
                        name: if target == 0 { "tlas 0" } else { "tlas 1" },
                        ty: gpu::AccelerationStructureType::TopLevel,
                        size: sizes.data,
                    })
                    .map_err(Error::build)?;
                created = true;
                structure
            }
        };

        let result = Self::record_and_submit(gpu, structure, instance_buffer, count, flags, sizes);
        match result {
            Ok(()) => {
                self.slots[target] = Some(structure);
                self.active = target;
                self.built = true;
                self.needs_rebuild = false;
                self.dirty_transforms = false;
                Ok(())
            }
            Err(error) => {
                if created {
                    gpu.destroy_acceleration_structure(structure);
                } else {
                    self.slots[target] = Some(structure);
                }
                Err(error)
            }
        }
    }

    fn record_and_submit<G: gpu::Device>(
        gpu: &G,
        structure: gpu::AccelerationStructure,
        instance_buffer: gpu::Buffer,
        count: u32,
        flags: gpu::BuildFlags,
        sizes: gpu::AccelerationStructureSizes,
    ) -> Result<(), Error> {
        let scratch = gpu
            .create_buffer(gpu::BufferDesc {
                name: "tlas scratch",
                size: sizes.scratch,
                memory: gpu::Memory::Device,
                usage: gpu::BufferUsage::STORAGE | gpu::BufferUsage::DEVICE_ADDRESS,
            })
            .map_err(Error::build)?;
        let mut encoder = gpu::CommandEncoder::new("tlas build");
        encoder.build_top_level(structure, instance_buffer.into(), count, flags, scratch.into());
        encoder.barrier(
            gpu::PipelineStages::ACCELERATION_STRUCTURE_BUILD,
            gpu::Access::ACCELERATION_STRUCTURE_WRITE,
            gpu::PipelineStages::RAY_TRACING | gpu::PipelineStages::COMPUTE,
            gpu::Access::ACCELERATION_STRUCTURE_READ,
        );
        let submitted = gpu.submit_and_wait(&mut encoder, gpu::Fence::AccelerationBuild);
        gpu.destroy_buffer(scratch);
        submitted.map_err(Error::build)
    }

    pub fn destroy<G: gpu::Device>(&mut self, gpu: &G) {
        for slot in self.slots.iter_mut() {
            if let Some(structure) = slot.take() {
                gpu.destroy_acceleration_structure(structure);
            }
        }
        if let Some(buffer) = self.instance_buffer.take() {
            gpu.destroy_buffer(buffer);
        }
        *self = Self::default();
    }
}
