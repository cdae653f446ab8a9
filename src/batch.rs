//! Groups world surfaces into BLAS-sized batches.

use crate::{
    accel::AccelStore,
    world::{DrawVert, Surface},
    Error,
};
use glam::Vec3;
use prism_graphics as gpu;
use rustc_hash::FxHashSet;

pub const MAX_BATCH_VERTS: usize = 8192;
pub const MAX_BATCH_INDICES: usize = 3 * MAX_BATCH_VERTS;

/// CPU copy of one world triangle, kept for the software tracer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WorldTriangle {
    pub positions: [Vec3; 3],
    pub material: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub accepted_surfaces: u32,
    pub skipped_surfaces: u32,
    pub triangles: u32,
    pub batches: u32,
    pub dropped_batches: u32,
}

#[derive(Debug, Default)]
pub struct BatchBuilder {
    vertices: Vec<[f32; 3]>,
    indices: Vec<u32>,
    materials: Vec<u32>,
    triangles: Vec<WorldTriangle>,
    stats: BatchStats,
    reported_kinds: FxHashSet<u32>,
}

impl BatchBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_world_load(&mut self) {
        self.vertices.clear();
        self.indices.clear();
        self.materials.clear();
        self.triangles.clear();
        self.stats = BatchStats::default();
        self.reported_kinds.clear();
    }

    pub fn stats(&self) -> BatchStats {
        self.stats
    }

    pub fn pending_vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn pending_index_count(&self) -> usize {
        self.indices.len()
    }

    pub fn triangles(&self) -> &[WorldTriangle] {
        &self.triangles
    }

    pub fn take_triangles(&mut self) -> Vec<WorldTriangle> {
        std::mem::take(&mut self.triangles)
    }

    fn skip(&mut self) {
        self.stats.skipped_surfaces += 1;
    }

    pub fn process_surface(&mut self, store: &mut AccelStore, surface: &Surface) {
        let (verts, indices, shader) = match *surface {
            Surface::Face {
                points,
                indices,
                shader,
            } => (points, indices.to_vec(), shader),
            Surface::Triangles {
                verts,
                indices,
                shader,
            } => (verts, indices.to_vec(), shader),
            Surface::Grid {
                width,
                height,
                verts,
                shader,
            } => match grid_indices(width, height, verts.len()) {
                Some(indices) => (verts, indices, shader),
                None => {
                    log::debug!("Skipping malformed {}x{} grid", width, height);
                    return self.skip();
                }
            },
            Surface::Poly { .. } => return self.skip(),
            Surface::Other(kind) => {
                if self.reported_kinds.insert(kind) {
                    log::debug!("Skipping surfaces of unknown kind {}", kind);
                }
                return self.skip();
            }
        };
        if shader.is_invisible() {
            return self.skip();
        }
        if indices.len() % 3 != 0 || indices.iter().any(|&i| i as usize >= verts.len()) {
            log::debug!("Skipping surface with bad indices, shader {:?}", shader.name);
            return self.skip();
        }
        if verts.len() > MAX_BATCH_VERTS || indices.len() > MAX_BATCH_INDICES {
            log::debug!(
                "Skipping surface of {} vertices that exceeds the batch cap",
                verts.len()
            );
            return self.skip();
        }

        if self.vertices.len() + verts.len() > MAX_BATCH_VERTS
            || self.indices.len() + indices.len() > MAX_BATCH_INDICES
        {
            self.flush(store);
        }
        self.append(verts, &indices, shader.material_index());
        self.stats.accepted_surfaces += 1;
    }

    fn append(&mut self, verts: &[DrawVert], indices: &[u32], material: u32) {
        let base = self.vertices.len() as u32;
        self.vertices.extend(verts.iter().map(|v| v.xyz));
        self.indices.extend(indices.iter().map(|&i| base + i));
        for triangle in indices.chunks_exact(3) {
            self.materials.push(material);
            self.triangles.push(WorldTriangle {
                positions: [0, 1, 2].map(|k| Vec3::from(verts[triangle[k] as usize].xyz)),
                material,
            });
        }
        self.stats.triangles += (indices.len() / 3) as u32;
    }

    /// Hand the current batch to the store as one static BLAS.
    #[profiling::function]
    fn flush(&mut self, store: &mut AccelStore) {
        if self.indices.is_empty() {
            self.vertices.clear();
            return;
        }
        match self.submit(store) {
            Ok(()) => self.stats.batches += 1,
            Err(error) => {
                log::debug!("Dropping batch of {} triangles: {}", self.materials.len(), error);
                self.stats.dropped_batches += 1;
            }
        }
        self.vertices.clear();
        self.indices.clear();
        self.materials.clear();
    }

    fn submit(&self, store: &mut AccelStore) -> Result<(), Error> {
        let blas = store.create_blas(&self.vertices, &self.indices, Some(&self.materials), false)?;
        store.add_instance(blas, gpu::IDENTITY_TRANSFORM, 0)?;
        Ok(())
    }

    /// Flush the residual batch and build the TLAS.
    pub fn end_world_load<G: gpu::Device>(&mut self, store: &mut AccelStore, gpu: &G) -> BatchStats {
        self.flush(store);
        let stats = self.stats;
        if store.blas_count() == 0 {
            log::warn!("no world geometry loaded");
        } else if gpu.capabilities().ray_tracing.is_some() {
            if let Err(error) = store.build_tlas(gpu) {
                log::warn!("Initial TLAS build failed: {}", error);
            }
        }
        log::info!(
            "World batches: {} surfaces in {} BLAS ({} triangles), {} skipped",
            stats.accepted_surfaces,
            stats.batches,
            stats.triangles,
            stats.skipped_surfaces
        );
        stats
    }
}

/// Two triangles per cell of a `width` by `height` vertex grid.
fn grid_indices(width: u32, height: u32, vertex_count: usize) -> Option<Vec<u32>> {
    if width < 2 || height < 2 || (width as usize) * (height as usize) > vertex_count {
        return None;
    }
    let mut indices = Vec::with_capacity(6 * (width as usize - 1) * (height as usize - 1));
    for y in 0..height - 1 {
        for x in 0..width - 1 {
            let v0 = y * width + x;
            let v1 = v0 + 1;
            let v2 = v0 + width;
            let v3 = v2 + 1;
            indices.extend_from_slice(&[v0, v2, v1, v1, v2, v3]);
        }
    }
    Some(indices)
}
