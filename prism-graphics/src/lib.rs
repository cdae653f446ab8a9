#![allow(
    // We don't use syntax sugar where it's not necessary.
    clippy::match_like_matches_macro,
    // Redundant matching is more explicit.
    clippy::redundant_pattern_matching,
    // Explicit lifetimes are often easier to reason about.
    clippy::needless_lifetimes,
    // No need for defaults in the internal types.
    clippy::new_without_default,
    // Matches are good and extendable, no need to make an exception here.
    clippy::single_match,
    // Push commands are more regular than macros.
    clippy::vec_init_then_push,
)]
#![warn(
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_qualifications,
    // We don't match on a reference, unless required.
    clippy::pattern_type_mismatch,
)]

mod command;
pub mod null;
mod traits;
#[cfg(feature = "vulkan")]
pub mod vulkan;

pub use command::*;
pub use traits::*;

pub mod limits {
    /// Size of the sampled texture array.
    pub const TEXTURE_ARRAY_SIZE: u32 = 256;
    /// Size of the lightmap array.
    pub const LIGHTMAP_ARRAY_SIZE: u32 = 64;
    /// Push constant block shared by all pipelines of a layout.
    pub const PUSH_CONSTANTS_SIZE: u32 = 128;
    /// Instance custom indices are 24-bit.
    pub const MAX_CUSTOM_INDEX: u32 = (1 << 24) - 1;
}

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("out of device memory")]
    OutOfMemory,
    #[error("device lost")]
    DeviceLost,
    #[error("ray tracing is not supported by the device")]
    Unsupported,
    #[error("invalid shader module `{0}`")]
    InvalidShader(String),
    #[error("descriptor pool exhausted")]
    DescriptorPool,
    #[error("acceleration structure build failed: {0}")]
    Build(String),
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum Memory {
    /// Device-local, not host visible.
    Device,
    /// Host-visible and coherent, usable by the GPU directly.
    Shared,
    /// Host-visible staging memory.
    Upload,
}

impl Memory {
    pub fn is_host_visible(self) -> bool {
        match self {
            Self::Device => false,
            Self::Shared | Self::Upload => true,
        }
    }
}

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq)]
    pub struct BufferUsage: u32 {
        const TRANSFER_SRC = 1 << 0;
        const TRANSFER_DST = 1 << 1;
        const UNIFORM = 1 << 2;
        const STORAGE = 1 << 3;
        const VERTEX = 1 << 4;
        const INDEX = 1 << 5;
        const ACCELERATION_STRUCTURE_INPUT = 1 << 6;
        const ACCELERATION_STRUCTURE_STORAGE = 1 << 7;
        const SHADER_BINDING_TABLE = 1 << 8;
        const DEVICE_ADDRESS = 1 << 9;
    }
}

#[derive(Debug)]
pub struct BufferDesc<'a> {
    pub name: &'a str,
    pub size: u64,
    pub memory: Memory,
    pub usage: BufferUsage,
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct Buffer {
    pub(crate) raw: u64,
    pub(crate) handle: usize,
    pub(crate) size: u64,
    pub(crate) memory: Memory,
}

impl Buffer {
    pub fn raw(&self) -> u64 {
        self.raw
    }
    pub fn size(&self) -> u64 {
        self.size
    }
    pub fn memory(&self) -> Memory {
        self.memory
    }
    pub fn at(self, offset: u64) -> BufferPiece {
        BufferPiece {
            buffer: self,
            offset,
        }
    }
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct BufferPiece {
    pub buffer: Buffer,
    pub offset: u64,
}

impl From<Buffer> for BufferPiece {
    fn from(buffer: Buffer) -> Self {
        Self { buffer, offset: 0 }
    }
}

#[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq)]
pub struct Extent {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl Extent {
    pub fn new_2d(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            depth: 1,
        }
    }
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.depth == 0
    }
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize * self.depth as usize
    }
}

#[derive(Clone, Copy, Debug, Hash, Eq, Ord, PartialEq, PartialOrd)]
pub enum TextureFormat {
    Rgba8Unorm,
    Bgra8Unorm,
    Rgba16Float,
    Rgba32Float,
    R32Float,
    Depth32Float,
}

impl TextureFormat {
    pub fn block_size(self) -> u32 {
        match self {
            Self::Rgba8Unorm | Self::Bgra8Unorm | Self::R32Float | Self::Depth32Float => 4,
            Self::Rgba16Float => 8,
            Self::Rgba32Float => 16,
        }
    }
    pub fn is_depth(self) -> bool {
        self == Self::Depth32Float
    }
}

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq)]
    pub struct TextureUsage: u32 {
        const COPY = 1 << 0;
        const RESOURCE = 1 << 1;
        const STORAGE = 1 << 2;
        const TARGET = 1 << 3;
    }
}

#[derive(Debug)]
pub struct TextureDesc<'a> {
    pub name: &'a str,
    pub format: TextureFormat,
    pub size: Extent,
    pub usage: TextureUsage,
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct Texture {
    pub(crate) raw: u64,
    pub(crate) handle: usize,
    pub(crate) format: TextureFormat,
    pub(crate) size: Extent,
}

impl Texture {
    pub fn raw(&self) -> u64 {
        self.raw
    }
    pub fn format(&self) -> TextureFormat {
        self.format
    }
    pub fn size(&self) -> Extent {
        self.size
    }
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct TextureView {
    pub(crate) raw: u64,
    pub(crate) handle: usize,
    pub(crate) texture: Texture,
}

impl TextureView {
    pub fn raw(&self) -> u64 {
        self.raw
    }
    pub fn texture(&self) -> Texture {
        self.texture
    }
}

/// Image layouts the core moves its images through.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum ImageLayout {
    Undefined,
    General,
    TransferSrc,
    TransferDst,
    ShaderRead,
}

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq)]
    pub struct PipelineStages: u32 {
        const TOP = 1 << 0;
        const HOST = 1 << 1;
        const TRANSFER = 1 << 2;
        const COMPUTE = 1 << 3;
        const RAY_TRACING = 1 << 4;
        const ACCELERATION_STRUCTURE_BUILD = 1 << 5;
        const FRAGMENT = 1 << 6;
        const BOTTOM = 1 << 7;
    }
}

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq)]
    pub struct Access: u32 {
        const HOST_WRITE = 1 << 0;
        const TRANSFER_READ = 1 << 1;
        const TRANSFER_WRITE = 1 << 2;
        const SHADER_READ = 1 << 3;
        const SHADER_WRITE = 1 << 4;
        const UNIFORM_READ = 1 << 5;
        const ACCELERATION_STRUCTURE_READ = 1 << 6;
        const ACCELERATION_STRUCTURE_WRITE = 1 << 7;
    }
}

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq)]
    pub struct ShaderStages: u32 {
        const RAYGEN = 1 << 0;
        const MISS = 1 << 1;
        const CLOSEST_HIT = 1 << 2;
        const COMPUTE = 1 << 3;
    }
}

impl ShaderStages {
    pub const RAY_TRACING: Self = Self::RAYGEN.union(Self::MISS).union(Self::CLOSEST_HIT);
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum AccelerationStructureType {
    TopLevel,
    BottomLevel,
}

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq)]
    pub struct BuildFlags: u32 {
        const PREFER_FAST_TRACE = 1 << 0;
        const ALLOW_UPDATE = 1 << 1;
    }
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct AccelerationStructure {
    pub(crate) raw: u64,
    pub(crate) handle: usize,
    pub(crate) ty: AccelerationStructureType,
    pub(crate) size: u64,
}

impl AccelerationStructure {
    pub fn raw(&self) -> u64 {
        self.raw
    }
    pub fn ty(&self) -> AccelerationStructureType {
        self.ty
    }
    /// Storage capacity in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }
}

#[derive(Debug)]
pub struct AccelerationStructureDesc<'a> {
    pub name: &'a str,
    pub ty: AccelerationStructureType,
    pub size: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AccelerationStructureSizes {
    /// Size of the structure itself.
    pub data: u64,
    /// Scratch size for a full build.
    pub scratch: u64,
    /// Scratch size for an update of an existing structure.
    pub update_scratch: u64,
}

/// Indexed triangle geometry with `f32x3` positions.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TriangleMesh {
    pub vertex_data: BufferPiece,
    pub vertex_count: u32,
    pub vertex_stride: u32,
    pub index_data: BufferPiece,
    pub triangle_count: u32,
    pub opaque: bool,
}

/// Row-major 3x4 affine transform.
pub type Transform = [[f32; 4]; 3];

pub const IDENTITY_TRANSFORM: Transform = [
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
];

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq)]
    pub struct InstanceFlags: u8 {
        const TRIANGLE_FACING_CULL_DISABLE = 0x1;
        const TRIANGLE_FLIP_FACING = 0x2;
        const FORCE_OPAQUE = 0x4;
        const FORCE_NO_OPAQUE = 0x8;
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AccelerationStructureInstance {
    pub acceleration_structure_address: u64,
    pub transform: Transform,
    pub custom_index: u32,
    pub mask: u8,
    pub sbt_offset: u32,
    pub flags: InstanceFlags,
}

/// Instance record in the layout consumed by top-level builds.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, bytemuck::Zeroable, bytemuck::Pod)]
pub struct RawInstance {
    pub transform: [f32; 12],
    pub custom_index_and_mask: u32,
    pub sbt_offset_and_flags: u32,
    pub acceleration_structure_reference: u64,
}

impl RawInstance {
    pub fn custom_index(&self) -> u32 {
        self.custom_index_and_mask & limits::MAX_CUSTOM_INDEX
    }
    pub fn mask(&self) -> u8 {
        (self.custom_index_and_mask >> 24) as u8
    }
    pub fn sbt_offset(&self) -> u32 {
        self.sbt_offset_and_flags & 0x00FF_FFFF
    }
    pub fn flags(&self) -> InstanceFlags {
        InstanceFlags::from_bits_truncate((self.sbt_offset_and_flags >> 24) as u8)
    }
}

impl From<&AccelerationStructureInstance> for RawInstance {
    fn from(instance: &AccelerationStructureInstance) -> Self {
        let mut transform = [0.0; 12];
        for (dst, row) in transform.chunks_exact_mut(4).zip(instance.transform.iter()) {
            dst.copy_from_slice(row);
        }
        Self {
            transform,
            custom_index_and_mask: (instance.custom_index & limits::MAX_CUSTOM_INDEX)
                | (instance.mask as u32) << 24,
            sbt_offset_and_flags: (instance.sbt_offset & 0x00FF_FFFF)
                | (instance.flags.bits() as u32) << 24,
            acceleration_structure_reference: instance.acceleration_structure_address,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RayTracingCapabilities {
    pub shader_group_handle_size: u32,
    pub shader_group_handle_alignment: u32,
    pub shader_group_base_alignment: u32,
    pub max_ray_recursion_depth: u32,
    /// Inline ray queries are available to compute shaders.
    pub ray_query: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub ray_tracing: Option<RayTracingCapabilities>,
}

#[derive(Clone, Copy, Debug)]
pub struct ShaderSource<'a> {
    pub name: &'a str,
    pub spirv: &'a [u32],
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum BindingType {
    AccelerationStructure,
    StorageImage,
    SampledImage,
    UniformBuffer,
    StorageBuffer,
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct BindingDesc {
    pub binding: u32,
    pub ty: BindingType,
    pub count: u32,
    pub partially_bound: bool,
}

#[derive(Debug)]
pub struct PipelineLayoutDesc<'a> {
    pub name: &'a str,
    pub bindings: &'a [BindingDesc],
    pub push_constant_size: u32,
}

#[derive(Debug, PartialEq)]
pub struct PipelineLayout {
    pub(crate) raw: u64,
    pub(crate) set_layout_raw: u64,
    pub(crate) handle: usize,
    pub(crate) bindings: Vec<BindingDesc>,
    pub(crate) push_constant_size: u32,
}

impl PipelineLayout {
    pub fn bindings(&self) -> &[BindingDesc] {
        &self.bindings
    }
    pub fn push_constant_size(&self) -> u32 {
        self.push_constant_size
    }
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct DescriptorSet {
    pub(crate) raw: u64,
    pub(crate) handle: usize,
}

impl DescriptorSet {
    pub fn raw(&self) -> u64 {
        self.raw
    }
}

#[derive(Clone, Copy, Debug)]
pub enum DescriptorResource<'a> {
    AccelerationStructure(AccelerationStructure),
    StorageImage(TextureView),
    SampledImage(TextureView),
    SampledImages(&'a [TextureView]),
    UniformBuffer { piece: BufferPiece, size: u64 },
    StorageBuffer { piece: BufferPiece, size: u64 },
}

#[derive(Clone, Copy, Debug)]
pub struct DescriptorWrite<'a> {
    pub binding: u32,
    pub array_element: u32,
    pub resource: DescriptorResource<'a>,
}

#[derive(Debug)]
pub struct RayTracingPipelineDesc<'a> {
    pub name: &'a str,
    pub layout: &'a PipelineLayout,
    pub raygen: ShaderSource<'a>,
    pub miss: &'a [ShaderSource<'a>],
    pub closest_hit: ShaderSource<'a>,
    pub max_recursion_depth: u32,
}

#[derive(Debug, PartialEq)]
pub struct RayTracingPipeline {
    pub(crate) raw: u64,
    pub(crate) handle: usize,
    pub(crate) layout_raw: u64,
    pub(crate) group_count: u32,
    pub(crate) max_recursion_depth: u32,
}

impl RayTracingPipeline {
    /// Shader groups in creation order: raygen, misses, closest hit.
    pub fn group_count(&self) -> u32 {
        self.group_count
    }
    pub fn max_recursion_depth(&self) -> u32 {
        self.max_recursion_depth
    }
}

#[derive(Debug)]
pub struct ComputePipelineDesc<'a> {
    pub name: &'a str,
    pub layout: &'a PipelineLayout,
    pub shader: ShaderSource<'a>,
    pub workgroup_size: [u32; 3],
}

#[derive(Debug, PartialEq)]
pub struct ComputePipeline {
    pub(crate) raw: u64,
    pub(crate) handle: usize,
    pub(crate) layout_raw: u64,
    pub(crate) wg_size: [u32; 3],
}

impl ComputePipeline {
    pub fn get_workgroup_size(&self) -> [u32; 3] {
        self.wg_size
    }

    pub fn get_dispatch_for(&self, extent: Extent) -> [u32; 3] {
        let wg_size = self.get_workgroup_size();
        [
            extent.width.div_ceil(wg_size[0]),
            extent.height.div_ceil(wg_size[1]),
            extent.depth.div_ceil(wg_size[2]),
        ]
    }
}

/// A strided device-address region of a shader binding table.
#[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq)]
pub struct SbtRegion {
    pub address: u64,
    pub stride: u64,
    pub size: u64,
}

#[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq)]
pub struct SbtRegions {
    pub raygen: SbtRegion,
    pub miss: SbtRegion,
    pub hit: SbtRegion,
    pub callable: SbtRegion,
}

/// Fences a one-shot submission can wait on.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum Fence {
    AccelerationBuild,
    Readback,
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum Filter {
    Nearest,
    Linear,
}
