use prism_graphics as gpu;

/// Number of shader groups: raygen, primary miss, shadow miss, closest hit.
pub const GROUP_COUNT: u32 = 4;
pub const MISS_GROUP_COUNT: u32 = 2;

pub fn align_up(value: u64, alignment: u64) -> u64 {
    if alignment == 0 {
        value
    } else {
        value.div_ceil(alignment) * alignment
    }
}

/// Placement of the shader group handles inside the binding table buffer.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct SbtLayout {
    pub handle_size: u64,
    pub stride: u64,
    pub raygen_offset: u64,
    pub miss_offset: u64,
    pub hit_offset: u64,
    pub size: u64,
}

impl SbtLayout {
    pub fn new(caps: &gpu::RayTracingCapabilities) -> Self {
        let handle_size = caps.shader_group_handle_size as u64;
        let base = caps.shader_group_base_alignment as u64;
        let stride =
            align_up(handle_size, caps.shader_group_handle_alignment as u64).max(base);
        let raygen_offset = 0;
        let miss_offset = align_up(raygen_offset + stride, base);
        let hit_offset = align_up(miss_offset + MISS_GROUP_COUNT as u64 * stride, base);
        Self {
            handle_size,
            stride,
            raygen_offset,
            miss_offset,
            hit_offset,
            size: hit_offset + stride,
        }
    }

    /// Buffer offsets of each group, in pipeline group order.
    pub fn group_offsets(&self) -> [u64; GROUP_COUNT as usize] {
        [
            self.raygen_offset,
            self.miss_offset,
            self.miss_offset + self.stride,
            self.hit_offset,
        ]
    }

    pub fn regions(&self, address: u64) -> gpu::SbtRegions {
        gpu::SbtRegions {
            raygen: gpu::SbtRegion {
                address: address + self.raygen_offset,
                stride: self.stride,
                size: self.stride,
            },
            miss: gpu::SbtRegion {
                address: address + self.miss_offset,
                stride: self.stride,
                size: MISS_GROUP_COUNT as u64 * self.stride,
            },
            hit: gpu::SbtRegion {
                address: address + self.hit_offset,
                stride: self.stride,
                size: self.stride,
            },
            callable: gpu::SbtRegion::default(),
        }
    }

    /// Spread tightly packed group handles into the table layout.
    pub fn pack(&self, handles: &[u8]) -> Vec<u8> {
        let handle_size = self.handle_size as usize;
        let mut data = vec![0; self.size as usize];
        for (handle, &offset) in handles
            .chunks_exact(handle_size)
            .zip(self.group_offsets().iter())
        {
            let offset = offset as usize;
            data[offset..offset + handle_size].copy_from_slice(handle);
        }
        data
    }
}

/// Recursion depth requested from the pipeline, never below 1.
pub fn max_recursion_depth(bounces: u32, device_max: u32) -> u32 {
    bounces.min(device_max).max(1)
}
