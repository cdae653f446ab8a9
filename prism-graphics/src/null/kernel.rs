//! Host stand-ins for shaders.
//!
//! The null device cannot run SPIR-V. A kernel registered under a compute
//! or ray tracing pipeline's name runs on every dispatch or trace of that
//! pipeline instead, with access to the bound descriptor set and the built
//! acceleration structures.

use super::{handle_of, BoundResource, State};

pub type HostKernel = Box<dyn Fn(&mut Invocation<'_>) + Send + Sync>;

/// One triangle of a built bottom-level structure, in object space.
#[derive(Clone, Copy, Debug)]
pub(super) struct HostTriangle {
    pub primitive: u32,
    pub positions: [[f32; 3]; 3],
}

const PARALLEL_EPSILON: f32 = 1e-7;

/// Closest intersection found by [`Invocation::trace_closest`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RayHit {
    pub t: f32,
    pub instance: u32,
    pub custom_index: u32,
    pub primitive: u32,
}

pub struct Invocation<'a> {
    pub(super) state: &'a mut State,
    pub(super) set: usize,
    pub(super) push_constants: &'a [u8],
    pub(super) grid: [u32; 3],
}

impl Invocation<'_> {
    /// Workgroup counts of a dispatch, or the launch size of a trace.
    pub fn grid(&self) -> [u32; 3] {
        self.grid
    }

    /// Last pushed constants, zero-extended to `P`.
    pub fn push_constants<P: bytemuck::Pod>(&self) -> P {
        let mut value = P::zeroed();
        let bytes = bytemuck::bytes_of_mut(&mut value);
        let len = bytes.len().min(self.push_constants.len());
        bytes[..len].copy_from_slice(&self.push_constants[..len]);
        value
    }

    fn bound(&self, binding: u32) -> Option<BoundResource> {
        self.state.sets[self.set].writes.get(&(binding, 0)).copied()
    }

    fn buffer_range(&self, binding: u32) -> Option<(usize, usize, usize)> {
        let (buffer, offset, size) = match self.bound(binding)? {
            BoundResource::UniformBuffer {
                buffer,
                offset,
                size,
            }
            | BoundResource::StorageBuffer {
                buffer,
                offset,
                size,
            } => (buffer, offset, size),
            _ => return None,
        };
        let handle = handle_of(buffer);
        let len = self.state.buffers.get(handle)?.data.len();
        let start = (offset as usize).min(len);
        let end = (start + size as usize).min(len);
        Some((handle, start, end))
    }

    /// Element `index` of the uniform or storage buffer bound at `binding`.
    pub fn load<T: bytemuck::Pod>(&self, binding: u32, index: usize) -> Option<T> {
        let (handle, start, end) = self.buffer_range(binding)?;
        let size = std::mem::size_of::<T>();
        let at = start + index * size;
        if at + size > end {
            return None;
        }
        let data = &self.state.buffers[handle].data;
        Some(bytemuck::pod_read_unaligned(&data[at..at + size]))
    }

    /// Contents of the buffer range bound at `binding`.
    pub fn storage_buffer(&mut self, binding: u32) -> Option<&mut [u8]> {
        let (handle, start, end) = self.buffer_range(binding)?;
        Some(&mut self.state.buffers[handle].data[start..end])
    }

    /// Write one texel of the storage image bound at `binding`. Returns
    /// `false` if nothing is bound there or the texel is out of bounds.
    pub fn store_texel(&mut self, binding: u32, x: u32, y: u32, texel: [f32; 4]) -> bool {
        let Some(BoundResource::StorageImage(raw)) = self.bound(binding) else {
            return false;
        };
        let Some(&texture) = self.state.views.get(handle_of(raw)) else {
            return false;
        };
        let Some(entry) = self.state.textures.get_mut(texture) else {
            return false;
        };
        if x >= entry.size.width || y >= entry.size.height {
            return false;
        }
        let block = entry.format.block_size() as usize;
        let at = (y * entry.size.width + x) as usize * block;
        super::write_texel(entry.format, texel, &mut entry.data[at..at + block]);
        true
    }

    /// Any-hit query against the top-level structure bound at `binding`.
    /// Hits count for `t_min < t < t_max`, on either face.
    pub fn ray_occluded(
        &self,
        binding: u32,
        origin: [f32; 3],
        direction: [f32; 3],
        t_min: f32,
        t_max: f32,
    ) -> bool {
        self.traverse(binding, origin, direction, t_min, t_max, true)
            .is_some()
    }

    /// Closest hit against the top-level structure bound at `binding`.
    pub fn trace_closest(
        &self,
        binding: u32,
        origin: [f32; 3],
        direction: [f32; 3],
        t_min: f32,
        t_max: f32,
    ) -> Option<RayHit> {
        self.traverse(binding, origin, direction, t_min, t_max, false)
    }

    fn traverse(
        &self,
        binding: u32,
        origin: [f32; 3],
        direction: [f32; 3],
        t_min: f32,
        mut t_max: f32,
        any_hit: bool,
    ) -> Option<RayHit> {
        let Some(BoundResource::AccelerationStructure(raw)) = self.bound(binding) else {
            log::warn!("Ray query without a structure at binding {}", binding);
            return None;
        };
        let tlas = self.state.acceleration_structures.get(handle_of(raw))?;
        let stride = std::mem::size_of::<crate::RawInstance>();
        let mut best = None;
        for (index, chunk) in tlas.content.chunks_exact(stride).enumerate() {
            let instance: crate::RawInstance = bytemuck::pod_read_unaligned(chunk);
            if instance.mask() == 0 {
                continue;
            }
            let handle = handle_of(instance.acceleration_structure_reference);
            let Some(blas) = self.state.acceleration_structures.get(handle) else {
                continue;
            };
            for triangle in blas.triangles.iter() {
                let world = triangle
                    .positions
                    .map(|p| transform_point(&instance.transform, p));
                let Some(t) = intersect(origin, direction, &world) else {
                    continue;
                };
                if t <= t_min || t >= t_max {
                    continue;
                }
                t_max = t;
                best = Some(RayHit {
                    t,
                    instance: index as u32,
                    custom_index: instance.custom_index(),
                    primitive: triangle.primitive,
                });
                if any_hit {
                    return best;
                }
            }
        }
        best
    }
}

fn transform_point(m: &[f32; 12], p: [f32; 3]) -> [f32; 3] {
    let row = |r: usize| m[r * 4] * p[0] + m[r * 4 + 1] * p[1] + m[r * 4 + 2] * p[2] + m[r * 4 + 3];
    [row(0), row(1), row(2)]
}

fn sub(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn dot(a: [f32; 3], b: [f32; 3]) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn cross(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

/// Ray parameter of the hit with `triangle`, if any.
fn intersect(origin: [f32; 3], direction: [f32; 3], triangle: &[[f32; 3]; 3]) -> Option<f32> {
    let [v0, v1, v2] = *triangle;
    let edge1 = sub(v1, v0);
    let edge2 = sub(v2, v0);
    let h = cross(direction, edge2);
    let a = dot(edge1, h);
    if a.abs() < PARALLEL_EPSILON {
        return None;
    }
    let f = 1.0 / a;
    let s = sub(origin, v0);
    let u = f * dot(s, h);
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let q = cross(s, edge1);
    let v = f * dot(direction, q);
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    Some(f * dot(edge2, q))
}
