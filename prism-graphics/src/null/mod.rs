//! Host-memory device.
//!
//! Every resource lives in system memory. Submissions are executed
//! immediately: copies and blits move bytes, acceleration structure builds
//! snapshot their inputs, and dispatches are counted. Image layouts are
//! tracked so that mismatched transitions can be inspected. Dispatches and
//! ray traces run the host kernel registered for the bound pipeline, if
//! any.

use rustc_hash::FxHashMap;
use std::sync::Mutex;

mod kernel;
mod texel;

pub use kernel::{HostKernel, Invocation, RayHit};
pub use texel::{read_texel, write_texel};

const SPIRV_MAGIC: u32 = 0x0723_0203;

mod tag {
    pub const BUFFER: u64 = 1;
    pub const TEXTURE: u64 = 2;
    pub const VIEW: u64 = 3;
    pub const ACCELERATION_STRUCTURE: u64 = 4;
    pub const PIPELINE_LAYOUT: u64 = 5;
    pub const SET_LAYOUT: u64 = 6;
    pub const DESCRIPTOR_SET: u64 = 7;
    pub const PIPELINE: u64 = 8;
}

fn make_raw(tag: u64, handle: usize) -> u64 {
    tag << 48 | (handle as u64 + 1)
}

fn handle_of(raw: u64) -> usize {
    ((raw & ((1 << 48) - 1)) as usize).wrapping_sub(1)
}

pub const DEFAULT_RAY_TRACING: crate::RayTracingCapabilities = crate::RayTracingCapabilities {
    shader_group_handle_size: 32,
    shader_group_handle_alignment: 32,
    shader_group_base_alignment: 64,
    max_ray_recursion_depth: 31,
    ray_query: true,
};

#[derive(Clone, Debug)]
pub struct ContextDesc {
    pub ray_tracing: Option<crate::RayTracingCapabilities>,
    /// Limit on device-local bytes; `None` is unlimited.
    pub device_memory_budget: Option<u64>,
    pub max_descriptor_sets: usize,
}

impl Default for ContextDesc {
    fn default() -> Self {
        Self {
            ray_tracing: Some(DEFAULT_RAY_TRACING),
            device_memory_budget: None,
            max_descriptor_sets: 64,
        }
    }
}

/// What a descriptor slot currently points at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoundResource {
    AccelerationStructure(u64),
    StorageImage(u64),
    SampledImage(u64),
    UniformBuffer { buffer: u64, offset: u64, size: u64 },
    StorageBuffer { buffer: u64, offset: u64, size: u64 },
}

struct BufferEntry {
    data: Vec<u8>,
    memory: crate::Memory,
}

struct TextureEntry {
    data: Vec<u8>,
    format: crate::TextureFormat,
    size: crate::Extent,
    layout: crate::ImageLayout,
}

struct AccelerationStructureEntry {
    name: String,
    size: u64,
    content: Vec<u8>,
    triangles: Vec<kernel::HostTriangle>,
    build_count: u32,
}

struct SetEntry {
    layout: usize,
    writes: FxHashMap<(u32, u32), BoundResource>,
}

#[derive(Default)]
struct State {
    buffers: slab::Slab<BufferEntry>,
    textures: slab::Slab<TextureEntry>,
    views: slab::Slab<usize>,
    acceleration_structures: slab::Slab<AccelerationStructureEntry>,
    layouts: slab::Slab<Vec<crate::BindingDesc>>,
    sets: slab::Slab<SetEntry>,
    pipelines: slab::Slab<String>,
    device_memory: u64,
    submissions: FxHashMap<crate::Fence, u32>,
    dispatch_count: u32,
    trace_count: u32,
    violations: Vec<String>,
    fail_builds: bool,
    allocations_left: Option<u32>,
}

/// Pipeline state carried between commands of one submission.
#[derive(Default)]
struct Bound {
    compute_pipeline: Option<usize>,
    compute_set: Option<usize>,
    ray_tracing_pipeline: Option<usize>,
    ray_tracing_set: Option<usize>,
    push_constants: Vec<u8>,
}

pub struct Context {
    desc: ContextDesc,
    state: Mutex<State>,
    kernels: Mutex<FxHashMap<String, HostKernel>>,
}

impl Default for Context {
    fn default() -> Self {
        Self::new(ContextDesc::default())
    }
}

impl Context {
    pub fn new(desc: ContextDesc) -> Self {
        Self {
            desc,
            state: Mutex::new(State::default()),
            kernels: Mutex::new(FxHashMap::default()),
        }
    }

    /// A device without any ray tracing support.
    pub fn without_ray_tracing() -> Self {
        Self::new(ContextDesc {
            ray_tracing: None,
            ..ContextDesc::default()
        })
    }

    fn take_allocation(state: &mut State) -> Result<(), crate::DeviceError> {
        match state.allocations_left {
            Some(0) => Err(crate::DeviceError::OutOfMemory),
            Some(ref mut left) => {
                *left -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn reserve_device_memory(&self, state: &mut State, size: u64) -> Result<(), crate::DeviceError> {
        if let Some(budget) = self.desc.device_memory_budget {
            if state.device_memory + size > budget {
                log::warn!(
                    "Device memory budget {} exceeded by a request of {} bytes",
                    budget,
                    size
                );
                return Err(crate::DeviceError::OutOfMemory);
            }
        }
        state.device_memory += size;
        Ok(())
    }

    /// Make every subsequent acceleration structure build fail.
    pub fn set_fail_builds(&self, fail: bool) {
        self.state.lock().unwrap().fail_builds = fail;
    }

    /// Allow `count` more buffer, texture, or acceleration structure
    /// allocations before reporting out of memory. `None` lifts the limit.
    pub fn set_allocation_limit(&self, count: Option<u32>) {
        self.state.lock().unwrap().allocations_left = count;
    }

    /// Run `kernel` for every dispatch or trace of the pipeline named
    /// `entry`.
    pub fn register_kernel(
        &self,
        entry: &str,
        kernel: impl Fn(&mut Invocation<'_>) + Send + Sync + 'static,
    ) {
        self.kernels
            .lock()
            .unwrap()
            .insert(entry.to_string(), Box::new(kernel));
    }

    /// Objects of every kind that are currently alive.
    pub fn live_resource_count(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.buffers.len()
            + state.textures.len()
            + state.views.len()
            + state.acceleration_structures.len()
            + state.layouts.len()
            + state.sets.len()
            + state.pipelines.len()
    }

    pub fn device_memory_used(&self) -> u64 {
        self.state.lock().unwrap().device_memory
    }

    pub fn buffer_data(&self, buffer: crate::Buffer) -> Vec<u8> {
        self.state.lock().unwrap().buffers[buffer.handle].data.clone()
    }

    pub fn is_buffer_alive(&self, buffer: crate::Buffer) -> bool {
        self.state.lock().unwrap().buffers.contains(buffer.handle)
    }

    pub fn live_buffer_count(&self) -> usize {
        self.state.lock().unwrap().buffers.len()
    }

    pub fn texture_data(&self, texture: crate::Texture) -> Vec<u8> {
        self.state.lock().unwrap().textures[texture.handle].data.clone()
    }

    pub fn write_texture(&self, texture: crate::Texture, data: &[u8]) {
        let mut state = self.state.lock().unwrap();
        let entry = &mut state.textures[texture.handle];
        entry.data[..data.len()].copy_from_slice(data);
    }

    pub fn texture_layout(&self, texture: crate::Texture) -> crate::ImageLayout {
        self.state.lock().unwrap().textures[texture.handle].layout
    }

    /// Pretend the owner of `texture` left it in `layout`.
    pub fn set_texture_layout(&self, texture: crate::Texture, layout: crate::ImageLayout) {
        self.state.lock().unwrap().textures[texture.handle].layout = layout;
    }

    pub fn is_texture_alive(&self, texture: crate::Texture) -> bool {
        self.state.lock().unwrap().textures.contains(texture.handle)
    }

    pub fn acceleration_structure_content(
        &self,
        acceleration_structure: crate::AccelerationStructure,
    ) -> Vec<u8> {
        let state = self.state.lock().unwrap();
        state.acceleration_structures[acceleration_structure.handle]
            .content
            .clone()
    }

    pub fn acceleration_structure_build_count(
        &self,
        acceleration_structure: crate::AccelerationStructure,
    ) -> u32 {
        let state = self.state.lock().unwrap();
        state.acceleration_structures[acceleration_structure.handle].build_count
    }

    pub fn is_acceleration_structure_alive(
        &self,
        acceleration_structure: crate::AccelerationStructure,
    ) -> bool {
        let state = self.state.lock().unwrap();
        state
            .acceleration_structures
            .contains(acceleration_structure.handle)
    }

    pub fn live_acceleration_structure_count(&self) -> usize {
        self.state.lock().unwrap().acceleration_structures.len()
    }

    pub fn descriptor(
        &self,
        set: crate::DescriptorSet,
        binding: u32,
        array_element: u32,
    ) -> Option<BoundResource> {
        let state = self.state.lock().unwrap();
        state.sets[set.handle]
            .writes
            .get(&(binding, array_element))
            .copied()
    }

    pub fn submission_count(&self, fence: crate::Fence) -> u32 {
        let state = self.state.lock().unwrap();
        state.submissions.get(&fence).copied().unwrap_or(0)
    }

    pub fn dispatch_count(&self) -> u32 {
        self.state.lock().unwrap().dispatch_count
    }

    pub fn trace_count(&self) -> u32 {
        self.state.lock().unwrap().trace_count
    }

    /// Layout mismatches and dangling references seen during execution.
    pub fn violations(&self) -> Vec<String> {
        self.state.lock().unwrap().violations.clone()
    }

    /// Execute recorded commands, as the engine would on its own queue.
    pub fn execute(&self, encoder: &crate::CommandEncoder) -> Result<(), crate::DeviceError> {
        let mut state = self.state.lock().unwrap();
        let mut bound = Bound::default();
        for command in encoder.commands() {
            self.execute_command(&mut state, &mut bound, encoder, command)?;
        }
        Ok(())
    }

    fn execute_command(
        &self,
        state: &mut State,
        bound: &mut Bound,
        encoder: &crate::CommandEncoder,
        command: &crate::Command,
    ) -> Result<(), crate::DeviceError> {
        use crate::Command as C;
        match *command {
            C::Barrier { .. } => {}
            C::BindComputePipeline { raw } => bound.compute_pipeline = Some(handle_of(raw)),
            C::BindRayTracingPipeline { raw } => {
                bound.ray_tracing_pipeline = Some(handle_of(raw))
            }
            C::BindDescriptorSet {
                bind_point, set, ..
            } => match bind_point {
                crate::BindPoint::Compute => bound.compute_set = Some(set.handle),
                crate::BindPoint::RayTracing => bound.ray_tracing_set = Some(set.handle),
            },
            C::PushConstants { ref data, .. } => {
                bound.push_constants = encoder.plain_data(data.clone()).to_vec();
            }
            C::ImageBarrier {
                texture,
                old_layout,
                new_layout,
                ..
            } => {
                let entry = &mut state.textures[texture.handle];
                if old_layout != crate::ImageLayout::Undefined && entry.layout != old_layout {
                    let message = format!(
                        "texture {:x} transitioned from {:?} while in {:?}",
                        texture.raw, old_layout, entry.layout
                    );
                    state.violations.push(message);
                }
                state.textures[texture.handle].layout = new_layout;
            }
            C::CopyBufferToBuffer { src, dst, size } => {
                let size = size as usize;
                let start = src.offset as usize;
                let bytes = state.buffers[src.buffer.handle].data[start..start + size].to_vec();
                let start = dst.offset as usize;
                state.buffers[dst.buffer.handle].data[start..start + size]
                    .copy_from_slice(&bytes);
            }
            C::CopyTextureToTexture { src, dst, size } => {
                let row = (size.width * src.format.block_size()) as usize;
                let src_pitch = (src.size.width * src.format.block_size()) as usize;
                let dst_pitch = (dst.size.width * dst.format.block_size()) as usize;
                let bytes = state.textures[src.handle].data.clone();
                let target = &mut state.textures[dst.handle].data;
                for y in 0..size.height as usize {
                    target[y * dst_pitch..y * dst_pitch + row]
                        .copy_from_slice(&bytes[y * src_pitch..y * src_pitch + row]);
                }
            }
            C::CopyTextureToBuffer { src, dst, size } => {
                let length = size.pixel_count() * src.format.block_size() as usize;
                let bytes = state.textures[src.handle].data[..length].to_vec();
                let start = dst.offset as usize;
                state.buffers[dst.buffer.handle].data[start..start + length]
                    .copy_from_slice(&bytes);
            }
            C::BlitTexture { src, dst, filter: _ } => {
                // Both filters resolve to the nearest texel on the host.
                let bytes = state.textures[src.handle].data.clone();
                let target = &mut state.textures[dst.handle].data;
                let (src_bs, dst_bs) = (src.format.block_size(), dst.format.block_size());
                for y in 0..dst.size.height {
                    let sy = y * src.size.height / dst.size.height.max(1);
                    for x in 0..dst.size.width {
                        let sx = x * src.size.width / dst.size.width.max(1);
                        let so = ((sy * src.size.width + sx) * src_bs) as usize;
                        let texel = read_texel(src.format, &bytes[so..so + src_bs as usize]);
                        let d = ((y * dst.size.width + x) * dst_bs) as usize;
                        write_texel(dst.format, texel, &mut target[d..d + dst_bs as usize]);
                    }
                }
            }
            C::FillBuffer { dst, size, value } => {
                let start = dst.offset as usize;
                let data = &mut state.buffers[dst.buffer.handle].data[start..start + size as usize];
                for chunk in data.chunks_mut(4) {
                    let len = chunk.len();
                    chunk.copy_from_slice(&value.to_le_bytes()[..len]);
                }
            }
            C::BuildBottomLevel {
                dst, ref mesh, update, ..
            } => {
                if state.fail_builds {
                    return Err(crate::DeviceError::Build(
                        "bottom level build rejected".to_string(),
                    ));
                }
                if update && state.acceleration_structures[dst.handle].build_count == 0 {
                    return Err(crate::DeviceError::Build(
                        "update of a structure that was never built".to_string(),
                    ));
                }
                let vertex_start = mesh.vertex_data.offset as usize;
                let vertex_len = (mesh.vertex_count * mesh.vertex_stride) as usize;
                let index_start = mesh.index_data.offset as usize;
                let index_len = mesh.triangle_count as usize * 3 * 4;
                let mut content = state.buffers[mesh.vertex_data.buffer.handle].data
                    [vertex_start..vertex_start + vertex_len]
                    .to_vec();
                content.extend_from_slice(
                    &state.buffers[mesh.index_data.buffer.handle].data
                        [index_start..index_start + index_len],
                );
                let stride = mesh.vertex_stride as usize;
                let position = |index: u32| -> Option<[f32; 3]> {
                    if index >= mesh.vertex_count {
                        return None;
                    }
                    let at = index as usize * stride;
                    Some(bytemuck::pod_read_unaligned(&content[at..at + 12]))
                };
                let triangles = content[vertex_len..]
                    .chunks_exact(12)
                    .enumerate()
                    .filter_map(|(primitive, chunk)| {
                        let indices: [u32; 3] = bytemuck::pod_read_unaligned(chunk);
                        Some(kernel::HostTriangle {
                            primitive: primitive as u32,
                            positions: [
                                position(indices[0])?,
                                position(indices[1])?,
                                position(indices[2])?,
                            ],
                        })
                    })
                    .collect();
                let entry = &mut state.acceleration_structures[dst.handle];
                entry.content = content;
                entry.triangles = triangles;
                entry.build_count += 1;
            }
            C::BuildTopLevel {
                dst,
                instance_data,
                instance_count,
                ..
            } => {
                if state.fail_builds {
                    return Err(crate::DeviceError::Build(
                        "top level build rejected".to_string(),
                    ));
                }
                let start = instance_data.offset as usize;
                let length = instance_count as usize * std::mem::size_of::<crate::RawInstance>();
                let content =
                    state.buffers[instance_data.buffer.handle].data[start..start + length].to_vec();
                for (index, chunk) in content
                    .chunks_exact(std::mem::size_of::<crate::RawInstance>())
                    .enumerate()
                {
                    let instance: crate::RawInstance = bytemuck::pod_read_unaligned(chunk);
                    let address = instance.acceleration_structure_reference;
                    let known = state
                        .acceleration_structures
                        .iter()
                        .any(|(handle, entry)| {
                            make_raw(tag::ACCELERATION_STRUCTURE, handle) == address
                                && entry.build_count != 0
                        });
                    if !known {
                        let message = format!(
                            "instance {} of {:?} references unbuilt structure {:x}",
                            index, state.acceleration_structures[dst.handle].name, address
                        );
                        state.violations.push(message);
                    }
                }
                let entry = &mut state.acceleration_structures[dst.handle];
                entry.content = content;
                entry.build_count += 1;
            }
            C::Dispatch { groups } => {
                state.dispatch_count += 1;
                self.run_kernel(state, bound.compute_pipeline, bound.compute_set, bound, groups);
            }
            C::TraceRays { size, .. } => {
                state.trace_count += 1;
                let (pipeline, set) = (bound.ray_tracing_pipeline, bound.ray_tracing_set);
                self.run_kernel(state, pipeline, set, bound, size);
            }
        }
        Ok(())
    }

    fn run_kernel(
        &self,
        state: &mut State,
        pipeline: Option<usize>,
        set: Option<usize>,
        bound: &Bound,
        grid: [u32; 3],
    ) {
        let (Some(pipeline), Some(set)) = (pipeline, set) else {
            return;
        };
        if !state.sets.contains(set) {
            return;
        }
        let kernels = self.kernels.lock().unwrap();
        let kernel = state
            .pipelines
            .get(pipeline)
            .and_then(|name| kernels.get(name));
        if let Some(kernel) = kernel {
            kernel(&mut Invocation {
                state,
                set,
                push_constants: &bound.push_constants,
                grid,
            });
        }
    }

    fn check_spirv(source: &crate::ShaderSource) -> Result<(), crate::DeviceError> {
        match source.spirv.first() {
            Some(&SPIRV_MAGIC) => Ok(()),
            _ => Err(crate::DeviceError::InvalidShader(source.name.to_string())),
        }
    }
}

impl crate::ResourceDevice for Context {
    fn create_buffer(&self, desc: crate::BufferDesc) -> Result<crate::Buffer, crate::DeviceError> {
        let mut state = self.state.lock().unwrap();
        Self::take_allocation(&mut state)?;
        if desc.memory == crate::Memory::Device {
            self.reserve_device_memory(&mut state, desc.size)?;
        }
        let handle = state.buffers.insert(BufferEntry {
            data: vec![0; desc.size as usize],
            memory: desc.memory,
        });
        log::trace!("Created buffer {:?} of {} bytes", desc.name, desc.size);
        Ok(crate::Buffer {
            raw: make_raw(tag::BUFFER, handle),
            handle,
            size: desc.size,
            memory: desc.memory,
        })
    }

    fn destroy_buffer(&self, buffer: crate::Buffer) {
        let mut state = self.state.lock().unwrap();
        let entry = state.buffers.remove(buffer.handle);
        if entry.memory == crate::Memory::Device {
            state.device_memory -= entry.data.len() as u64;
        }
    }

    fn write_buffer(&self, piece: crate::BufferPiece, data: &[u8]) {
        let mut state = self.state.lock().unwrap();
        let entry = &mut state.buffers[piece.buffer.handle];
        assert!(entry.memory.is_host_visible());
        let start = piece.offset as usize;
        entry.data[start..start + data.len()].copy_from_slice(data);
    }

    fn read_buffer(&self, piece: crate::BufferPiece, data: &mut [u8]) {
        let state = self.state.lock().unwrap();
        let entry = &state.buffers[piece.buffer.handle];
        assert!(entry.memory.is_host_visible());
        let start = piece.offset as usize;
        data.copy_from_slice(&entry.data[start..start + data.len()]);
    }

    fn get_buffer_address(&self, buffer: crate::Buffer) -> u64 {
        buffer.raw
    }

    fn create_texture(
        &self,
        desc: crate::TextureDesc,
    ) -> Result<crate::Texture, crate::DeviceError> {
        let mut state = self.state.lock().unwrap();
        let size = desc.size.pixel_count() as u64 * desc.format.block_size() as u64;
        Self::take_allocation(&mut state)?;
        self.reserve_device_memory(&mut state, size)?;
        let handle = state.textures.insert(TextureEntry {
            data: vec![0; size as usize],
            format: desc.format,
            size: desc.size,
            layout: crate::ImageLayout::Undefined,
        });
        log::trace!("Created texture {:?} {:?}", desc.name, desc.size);
        Ok(crate::Texture {
            raw: make_raw(tag::TEXTURE, handle),
            handle,
            format: desc.format,
            size: desc.size,
        })
    }

    fn destroy_texture(&self, texture: crate::Texture) {
        let mut state = self.state.lock().unwrap();
        let entry = state.textures.remove(texture.handle);
        state.device_memory -= entry.data.len() as u64;
    }

    fn create_texture_view(
        &self,
        texture: crate::Texture,
        _name: &str,
    ) -> Result<crate::TextureView, crate::DeviceError> {
        let mut state = self.state.lock().unwrap();
        let handle = state.views.insert(texture.handle);
        Ok(crate::TextureView {
            raw: make_raw(tag::VIEW, handle),
            handle,
            texture,
        })
    }

    fn destroy_texture_view(&self, view: crate::TextureView) {
        self.state.lock().unwrap().views.remove(view.handle);
    }
}

impl crate::AccelerationStructureDevice for Context {
    fn get_bottom_level_acceleration_structure_sizes(
        &self,
        mesh: &crate::TriangleMesh,
        _flags: crate::BuildFlags,
    ) -> crate::AccelerationStructureSizes {
        let count = mesh.triangle_count as u64;
        crate::AccelerationStructureSizes {
            data: (256 + count * 64).next_multiple_of(256),
            scratch: 256 + count * 32,
            update_scratch: 256 + count * 8,
        }
    }

    fn get_top_level_acceleration_structure_sizes(
        &self,
        instance_count: u32,
        _flags: crate::BuildFlags,
    ) -> crate::AccelerationStructureSizes {
        let count = instance_count as u64;
        crate::AccelerationStructureSizes {
            data: (256 + count * 128).next_multiple_of(256),
            scratch: 256 + count * 64,
            update_scratch: 256 + count * 16,
        }
    }

    fn create_acceleration_structure(
        &self,
        desc: crate::AccelerationStructureDesc,
    ) -> Result<crate::AccelerationStructure, crate::DeviceError> {
        let mut state = self.state.lock().unwrap();
        Self::take_allocation(&mut state)?;
        self.reserve_device_memory(&mut state, desc.size)?;
        let handle = state
            .acceleration_structures
            .insert(AccelerationStructureEntry {
                name: desc.name.to_string(),
                size: desc.size,
                content: Vec::new(),
                triangles: Vec::new(),
                build_count: 0,
            });
        Ok(crate::AccelerationStructure {
            raw: make_raw(tag::ACCELERATION_STRUCTURE, handle),
            handle,
            ty: desc.ty,
            size: desc.size,
        })
    }

    fn destroy_acceleration_structure(&self, acceleration_structure: crate::AccelerationStructure) {
        let mut state = self.state.lock().unwrap();
        let entry = state
            .acceleration_structures
            .remove(acceleration_structure.handle);
        state.device_memory -= entry.size;
    }

    fn get_acceleration_structure_address(
        &self,
        acceleration_structure: crate::AccelerationStructure,
    ) -> u64 {
        acceleration_structure.raw
    }
}

impl crate::ShaderDevice for Context {
    fn create_pipeline_layout(
        &self,
        desc: crate::PipelineLayoutDesc,
    ) -> Result<crate::PipelineLayout, crate::DeviceError> {
        let mut state = self.state.lock().unwrap();
        let handle = state.layouts.insert(desc.bindings.to_vec());
        Ok(crate::PipelineLayout {
            raw: make_raw(tag::PIPELINE_LAYOUT, handle),
            set_layout_raw: make_raw(tag::SET_LAYOUT, handle),
            handle,
            bindings: desc.bindings.to_vec(),
            push_constant_size: desc.push_constant_size,
        })
    }

    fn destroy_pipeline_layout(&self, layout: &mut crate::PipelineLayout) {
        self.state.lock().unwrap().layouts.remove(layout.handle);
    }

    fn allocate_descriptor_set(
        &self,
        layout: &crate::PipelineLayout,
    ) -> Result<crate::DescriptorSet, crate::DeviceError> {
        let mut state = self.state.lock().unwrap();
        if state.sets.len() >= self.desc.max_descriptor_sets {
            return Err(crate::DeviceError::DescriptorPool);
        }
        let handle = state.sets.insert(SetEntry {
            layout: layout.handle,
            writes: FxHashMap::default(),
        });
        Ok(crate::DescriptorSet {
            raw: make_raw(tag::DESCRIPTOR_SET, handle),
            handle,
        })
    }

    fn free_descriptor_set(&self, set: crate::DescriptorSet) {
        self.state.lock().unwrap().sets.remove(set.handle);
    }

    fn update_descriptor_set(&self, set: crate::DescriptorSet, writes: &[crate::DescriptorWrite]) {
        use crate::DescriptorResource as Dr;
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        let bindings = &state.layouts[state.sets[set.handle].layout];
        for write in writes {
            let desc = match bindings.iter().find(|b| b.binding == write.binding) {
                Some(desc) => *desc,
                None => {
                    state
                        .violations
                        .push(format!("write to unknown binding {}", write.binding));
                    continue;
                }
            };
            let entry = &mut state.sets[set.handle];
            let mut bind = |element: u32, resource: BoundResource| {
                if element < desc.count {
                    entry.writes.insert((write.binding, element), resource);
                }
            };
            match write.resource {
                Dr::AccelerationStructure(acs) => {
                    bind(write.array_element, BoundResource::AccelerationStructure(acs.raw))
                }
                Dr::StorageImage(view) => {
                    bind(write.array_element, BoundResource::StorageImage(view.raw))
                }
                Dr::SampledImage(view) => {
                    bind(write.array_element, BoundResource::SampledImage(view.raw))
                }
                Dr::SampledImages(views) => {
                    for (i, view) in views.iter().enumerate() {
                        bind(
                            write.array_element + i as u32,
                            BoundResource::SampledImage(view.raw),
                        );
                    }
                }
                Dr::UniformBuffer { piece, size } => bind(
                    write.array_element,
                    BoundResource::UniformBuffer {
                        buffer: piece.buffer.raw,
                        offset: piece.offset,
                        size,
                    },
                ),
                Dr::StorageBuffer { piece, size } => bind(
                    write.array_element,
                    BoundResource::StorageBuffer {
                        buffer: piece.buffer.raw,
                        offset: piece.offset,
                        size,
                    },
                ),
            }
        }
    }

    fn create_ray_tracing_pipeline(
        &self,
        desc: crate::RayTracingPipelineDesc,
    ) -> Result<crate::RayTracingPipeline, crate::DeviceError> {
        let caps = self
            .desc
            .ray_tracing
            .ok_or(crate::DeviceError::Unsupported)?;
        Self::check_spirv(&desc.raygen)?;
        for miss in desc.miss {
            Self::check_spirv(miss)?;
        }
        Self::check_spirv(&desc.closest_hit)?;
        let mut state = self.state.lock().unwrap();
        let handle = state.pipelines.insert(desc.name.to_string());
        Ok(crate::RayTracingPipeline {
            raw: make_raw(tag::PIPELINE, handle),
            handle,
            layout_raw: desc.layout.raw,
            group_count: 2 + desc.miss.len() as u32,
            max_recursion_depth: desc.max_recursion_depth.min(caps.max_ray_recursion_depth),
        })
    }

    fn destroy_ray_tracing_pipeline(&self, pipeline: &mut crate::RayTracingPipeline) {
        self.state.lock().unwrap().pipelines.remove(pipeline.handle);
    }

    fn get_shader_group_handles(
        &self,
        pipeline: &crate::RayTracingPipeline,
    ) -> Result<Vec<u8>, crate::DeviceError> {
        let caps = self
            .desc
            .ray_tracing
            .ok_or(crate::DeviceError::Unsupported)?;
        let handle_size = caps.shader_group_handle_size as usize;
        let mut data = vec![0; handle_size * pipeline.group_count as usize];
        for (group, chunk) in data.chunks_exact_mut(handle_size).enumerate() {
            chunk.fill(group as u8 + 1);
        }
        Ok(data)
    }

    fn create_compute_pipeline(
        &self,
        desc: crate::ComputePipelineDesc,
    ) -> Result<crate::ComputePipeline, crate::DeviceError> {
        Self::check_spirv(&desc.shader)?;
        let mut state = self.state.lock().unwrap();
        let handle = state.pipelines.insert(desc.name.to_string());
        Ok(crate::ComputePipeline {
            raw: make_raw(tag::PIPELINE, handle),
            handle,
            layout_raw: desc.layout.raw,
            wg_size: desc.workgroup_size,
        })
    }

    fn destroy_compute_pipeline(&self, pipeline: &mut crate::ComputePipeline) {
        self.state.lock().unwrap().pipelines.remove(pipeline.handle);
    }
}

impl crate::CommandDevice for Context {
    fn submit_and_wait(
        &self,
        encoder: &mut crate::CommandEncoder,
        fence: crate::Fence,
    ) -> Result<(), crate::DeviceError> {
        profiling::scope!("submit_and_wait");
        let result = self.execute(encoder);
        *self
            .state
            .lock()
            .unwrap()
            .submissions
            .entry(fence)
            .or_default() += 1;
        encoder.start();
        result
    }
}

impl crate::Device for Context {
    fn capabilities(&self) -> crate::Capabilities {
        crate::Capabilities {
            ray_tracing: self.desc.ray_tracing,
        }
    }
}
