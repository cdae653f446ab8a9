use crate::{geometry::Aabb, Error};
use prism_graphics as gpu;
use std::mem;

const VERTEX_STRIDE: u32 = mem::size_of::<[f32; 3]>() as u32;

/// GPU side of a built bottom-level structure.
#[derive(Clone, Copy, Debug)]
pub(super) struct BlasGpu {
    pub vertex_buffer: gpu::Buffer,
    pub index_buffer: gpu::Buffer,
    pub acceleration_structure: gpu::AccelerationStructure,
    pub address: u64,
    pub sizes: gpu::AccelerationStructureSizes,
}

/// Bottom-level acceleration structure with its source geometry.
#[derive(Debug)]
pub struct Blas {
    pub(super) vertices: Vec<[f32; 3]>,
    pub(super) indices: Vec<u32>,
    pub(super) triangle_materials: Option<Vec<u32>>,
    pub(super) is_dynamic: bool,
    pub(super) aabb: Aabb,
    pub(super) gpu: Option<BlasGpu>,
}

impl Blas {
    pub(super) fn new(
        vertices: &[[f32; 3]],
        indices: &[u32],
        triangle_materials: Option<&[u32]>,
        is_dynamic: bool,
    ) -> Result<Self, Error> {
        if indices.is_empty() || indices.len() % 3 != 0 {
            return Err(Error::InvalidGeometry(format!(
                "{} indices do not form triangles",
                indices.len()
            )));
        }
        if let Some(&index) = indices.iter().find(|&&i| i as usize >= vertices.len()) {
            return Err(Error::InvalidGeometry(format!(
                "index {} is out of {} vertices",
                index,
                vertices.len()
            )));
        }
        let triangle_count = indices.len() / 3;
        if let Some(materials) = triangle_materials {
            if materials.len() != triangle_count {
                return Err(Error::InvalidGeometry(format!(
                    "{} materials for {} triangles",
                    materials.len(),
                    triangle_count
                )));
            }
        }
        Ok(Self {
            vertices: vertices.to_vec(),
            indices: indices.to_vec(),
            triangle_materials: triangle_materials.map(<[u32]>::to_vec),
            is_dynamic,
            aabb: compute_aabb(vertices),
            gpu: None,
        })
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertices.len() as u32
    }

    pub fn triangle_count(&self) -> u32 {
        (self.indices.len() / 3) as u32
    }

    pub fn vertices(&self) -> &[[f32; 3]] {
        &self.vertices
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn triangle_materials(&self) -> Option<&[u32]> {
        self.triangle_materials.as_deref()
    }

    pub fn is_dynamic(&self) -> bool {
        self.is_dynamic
    }

    pub fn aabb(&self) -> Aabb {
        self.aabb
    }

    pub fn build_flags(&self) -> gpu::BuildFlags {
        if self.is_dynamic {
            gpu::BuildFlags::PREFER_FAST_TRACE | gpu::BuildFlags::ALLOW_UPDATE
        } else {
            gpu::BuildFlags::PREFER_FAST_TRACE
        }
    }

    pub fn is_built(&self) -> bool {
        self.gpu.is_some()
    }

    pub fn acceleration_structure(&self) -> Option<gpu::AccelerationStructure> {
        self.gpu.map(|g| g.acceleration_structure)
    }

    pub fn device_address(&self) -> Option<u64> {
        self.gpu.map(|g| g.address)
    }

    fn mesh(&self, vertex_buffer: gpu::Buffer, index_buffer: gpu::Buffer) -> gpu::TriangleMesh {
        gpu::TriangleMesh {
            vertex_data: vertex_buffer.into(),
            vertex_count: self.vertex_count(),
            vertex_stride: VERTEX_STRIDE,
            index_data: index_buffer.into(),
            triangle_count: self.triangle_count(),
            opaque: true,
        }
    }

    #[profiling::function]
    pub(super) fn build_gpu<G: gpu::Device>(&mut self, gpu: &G, name: &str) -> Result<(), Error> {
        if self.gpu.is_some() {
            return Ok(());
        }
        let vertex_bytes: &[u8] = bytemuck::cast_slice(&self.vertices);
        let index_bytes: &[u8] = bytemuck::cast_slice(&self.indices);
        let (memory, extra_usage) = if self.is_dynamic {
            (gpu::Memory::Shared, gpu::BufferUsage::empty())
        } else {
            (gpu::Memory::Device, gpu::BufferUsage::TRANSFER_DST)
        };
        let usage = gpu::BufferUsage::ACCELERATION_STRUCTURE_INPUT
            | gpu::BufferUsage::DEVICE_ADDRESS
            | gpu::BufferUsage::STORAGE
            | extra_usage;

        let mut created = Vec::with_capacity(4);
        let result = self.build_gpu_inner(
            gpu,
            name,
            vertex_bytes.len() as u64,
            index_bytes.len() as u64,
            memory,
            usage,
            &mut created,
        );
        match result {
            Ok(gpu_side) => {
                self.gpu = Some(gpu_side);
                Ok(())
            }
            Err(error) => {
                for buffer in created {
                    gpu.destroy_buffer(buffer);
                }
                Err(error)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn build_gpu_inner<G: gpu::Device>(
        &self,
        gpu: &G,
        name: &str,
        vertex_size: u64,
        index_size: u64,
        memory: gpu::Memory,
        usage: gpu::BufferUsage,
        created: &mut Vec<gpu::Buffer>,
    ) -> Result<BlasGpu, Error> {
        let vertex_buffer = gpu.create_buffer(gpu::BufferDesc {
            name: &format!("{name} vertices"),
            size: vertex_size,
            memory,
            usage,
        })?;
        created.push(vertex_buffer);
        let index_buffer = gpu.create_buffer(gpu::BufferDesc {
            name: &format!("{name} indices"),
            size: index_size,
            memory,
            usage,
        })?;
        created.push(index_buffer);

        let mut encoder = gpu::CommandEncoder::new(name);
        let mut staging = None;
        if memory.is_host_visible() {
            gpu.write_buffer(vertex_buffer.into(), bytemuck::cast_slice(&self.vertices));
            gpu.write_buffer(index_buffer.into(), bytemuck::cast_slice(&self.indices));
        } else {
            let buffer = gpu.create_buffer(gpu::BufferDesc {
                name: &format!("{name} staging"),
                size: vertex_size + index_size,
                memory: gpu::Memory::Upload,
                usage: gpu::BufferUsage::TRANSFER_SRC,
            })?;
            created.push(buffer);
            staging = Some(buffer);
            gpu.write_buffer(buffer.at(0), bytemuck::cast_slice(&self.vertices));
            gpu.write_buffer(buffer.at(vertex_size), bytemuck::cast_slice(&self.indices));
            encoder.copy_buffer_to_buffer(buffer.at(0), vertex_buffer.at(0), vertex_size);
            encoder.copy_buffer_to_buffer(buffer.at(vertex_size), index_buffer.at(0), index_size);
            encoder.barrier(
                gpu::PipelineStages::TRANSFER,
                gpu::Access::TRANSFER_WRITE,
                gpu::PipelineStages::ACCELERATION_STRUCTURE_BUILD,
                gpu::Access::ACCELERATION_STRUCTURE_READ,
            );
        }

        let flags = self.build_flags();
        let mesh = self.mesh(vertex_buffer, index_buffer);
        let sizes = gpu.get_bottom_level_acceleration_structure_sizes(&mesh, flags);
        let acceleration_structure = gpu
            .create_acceleration_structure(gpu::AccelerationStructureDesc {
                name,
                ty: gpu::AccelerationStructureType::BottomLevel,
                size: sizes.data,
            })
            .map_err(Error::build)?;

        let scratch = match gpu.create_buffer(gpu::BufferDesc {
            name: &format!("{name} scratch"),
            size: sizes.scratch,
            memory: gpu::Memory::Device,
            usage: gpu::BufferUsage::STORAGE | gpu::BufferUsage::DEVICE_ADDRESS,
        }) {
            Ok(buffer) => buffer,
            Err(error) => {
                gpu.destroy_acceleration_structure(acceleration_structure);
                return Err(error.into());
            }
        };
        encoder.build_bottom_level(acceleration_structure, &mesh, flags, scratch.into(), false);
        encoder.barrier(
            gpu::PipelineStages::ACCELERATION_STRUCTURE_BUILD,
            gpu::Access::ACCELERATION_STRUCTURE_WRITE,
            gpu::PipelineStages::ACCELERATION_STRUCTURE_BUILD
                | gpu::PipelineStages::RAY_TRACING
                | gpu::PipelineStages::COMPUTE,
            gpu::Access::ACCELERATION_STRUCTURE_READ,
        );
        let submitted = gpu.submit_and_wait(&mut encoder, gpu::Fence::AccelerationBuild);
        gpu.destroy_buffer(scratch);
        if let Some(buffer) = staging {
            gpu.destroy_buffer(buffer);
            created.pop();
        }
        if let Err(error) = submitted {
            gpu.destroy_acceleration_structure(acceleration_structure);
            return Err(Error::build(error));
        }
        Ok(BlasGpu {
            vertex_buffer,
            index_buffer,
            acceleration_structure,
            address: gpu.get_acceleration_structure_address(acceleration_structure),
            sizes,
        })
    }

    /// Rebuild the structure in place from the current vertices.
    #[profiling::function]
    pub(super) fn update_gpu<G: gpu::Device>(&mut self, gpu: &G, name: &str) -> Result<(), Error> {
        let gpu_side = match self.gpu {
            Some(gpu_side) if self.is_dynamic => gpu_side,
            _ => return Err(Error::BuildFailed(format!("{name} is not updatable"))),
        };
        let mesh = self.mesh(gpu_side.vertex_buffer, gpu_side.index_buffer);
        let scratch = gpu.create_buffer(gpu::BufferDesc {
            name: &format!("{name} update scratch"),
            size: gpu_side.sizes.update_scratch.max(1),
            memory: gpu::Memory::Device,
            usage: gpu::BufferUsage::STORAGE | gpu::BufferUsage::DEVICE_ADDRESS,
        })?;
        let mut encoder = gpu::CommandEncoder::new(name);
        encoder.build_bottom_level(
            gpu_side.acceleration_structure,
            &mesh,
            self.build_flags(),
            scratch.into(),
            true,
        );
        encoder.barrier(
            gpu::PipelineStages::ACCELERATION_STRUCTURE_BUILD,
            gpu::Access::ACCELERATION_STRUCTURE_WRITE,
            gpu::PipelineStages::ACCELERATION_STRUCTURE_BUILD | gpu::PipelineStages::RAY_TRACING,
            gpu::Access::ACCELERATION_STRUCTURE_READ,
        );
        let submitted = gpu.submit_and_wait(&mut encoder, gpu::Fence::AccelerationBuild);
        gpu.destroy_buffer(scratch);
        submitted.map_err(Error::build)
    }

    /// Release the GPU side. Safe to call on a structure that was never built.
    pub(super) fn destroy_gpu<G: gpu::Device>(&mut self, gpu: &G) {
        if let Some(gpu_side) = self.gpu.take() {
            gpu.destroy_acceleration_structure(gpu_side.acceleration_structure);
            gpu.destroy_buffer(gpu_side.vertex_buffer);
            gpu.destroy_buffer(gpu_side.index_buffer);
        }
    }

    pub(super) fn set_vertices<G: gpu::Device>(&mut self, gpu: &G, vertices: &[[f32; 3]]) {
        self.vertices.copy_from_slice(vertices);
        self.aabb = compute_aabb(vertices);
        if let Some(gpu_side) = self.gpu {
            gpu.write_buffer(
                gpu_side.vertex_buffer.into(),
                bytemuck::cast_slice(&self.vertices),
            );
        }
    }
}

pub fn compute_aabb(vertices: &[[f32; 3]]) -> Aabb {
    Aabb::from_points(vertices.iter().map(|&v| glam::Vec3::from(v)))
}
