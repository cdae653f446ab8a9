//! Bottom- and top-level acceleration structures.
//!
//! The store owns a fixed pool of BLAS, the instance list of one
//! double-buffered TLAS, and the bounded refit queue. GPU work is submitted
//! on one-shot command buffers and waited on with the acceleration build
//! fence.

mod blas;
mod refit;
mod tlas;

pub use blas::{compute_aabb, Blas};
pub use refit::{RefitQueue, RefitRequest};
pub use tlas::Instance;

use crate::{Error, WarnCategory, WarnOnce};
use prism_graphics as gpu;

pub const MAX_BLAS: usize = 1024;
pub const MAX_INSTANCES: usize = 4096;
pub const MAX_REFIT_QUEUE: usize = 256;

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct BlasId(pub u32);

impl BlasId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct InstanceId(pub u32);

impl InstanceId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Default)]
pub struct AccelStore {
    blases: Vec<Blas>,
    tlas: tlas::Tlas,
    refits: RefitQueue,
    flattened_materials: Vec<u32>,
    warnings: WarnOnce,
}

impl AccelStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a mesh. GPU resources are created by the first build.
    pub fn create_blas(
        &mut self,
        vertices: &[[f32; 3]],
        indices: &[u32],
        triangle_materials: Option<&[u32]>,
        is_dynamic: bool,
    ) -> Result<BlasId, Error> {
        if self.blases.len() >= MAX_BLAS {
            if self.warnings.first(WarnCategory::POOL_EXHAUSTED) {
                log::warn!("BLAS pool exhausted at {} entries", MAX_BLAS);
            }
            return Err(Error::PoolExhausted);
        }
        let blas = Blas::new(vertices, indices, triangle_materials, is_dynamic)?;
        let id = BlasId(self.blases.len() as u32);
        self.blases.push(blas);
        Ok(id)
    }

    fn blas_mut(&mut self, id: BlasId) -> Result<&mut Blas, Error> {
        self.blases.get_mut(id.index()).ok_or(Error::InvalidBlas(id))
    }

    pub fn build_blas_gpu<G: gpu::Device>(&mut self, gpu: &G, id: BlasId) -> Result<(), Error> {
        let name = format!("blas {}", id.0);
        self.blas_mut(id)?.build_gpu(gpu, &name)
    }

    pub fn destroy_blas_gpu<G: gpu::Device>(&mut self, gpu: &G, id: BlasId) -> Result<(), Error> {
        self.blas_mut(id)?.destroy_gpu(gpu);
        Ok(())
    }

    /// Replace the vertices of a dynamic BLAS. The GPU structure is left
    /// alone until a refit with `rebuild_blas` reaches it.
    pub fn update_blas<G: gpu::Device>(
        &mut self,
        gpu: &G,
        id: BlasId,
        vertices: &[[f32; 3]],
    ) -> Result<(), Error> {
        let blas = self.blas_mut(id)?;
        if !blas.is_dynamic() {
            return Err(Error::InvalidBlas(id));
        }
        if vertices.len() != blas.vertices().len() {
            return Err(Error::InvalidGeometry(format!(
                "expected {} vertices, got {}",
                blas.vertices().len(),
                vertices.len()
            )));
        }
        blas.set_vertices(gpu, vertices);
        Ok(())
    }

    /// Update a dynamic BLAS in place, or rebuild a static one.
    fn refit_blas_gpu<G: gpu::Device>(&mut self, gpu: &G, id: BlasId) -> Result<(), Error> {
        let name = format!("blas {}", id.0);
        let blas = self.blas_mut(id)?;
        if blas.is_dynamic() && blas.is_built() {
            blas.update_gpu(gpu, &name)
        } else {
            blas.destroy_gpu(gpu);
            blas.build_gpu(gpu, &name)
        }
    }

    pub fn add_instance(
        &mut self,
        blas_id: BlasId,
        transform: gpu::Transform,
        material: u32,
    ) -> Result<InstanceId, Error> {
        let blas = self
            .blases
            .get(blas_id.index())
            .ok_or(Error::InvalidBlas(blas_id))?;
        let offset = self.flattened_materials.len() as u32;
        let count = blas.triangle_count();
        if self.tlas.instances.len() >= MAX_INSTANCES
            || offset + count > gpu::limits::MAX_CUSTOM_INDEX
        {
            if self.warnings.first(WarnCategory::INSTANCE_LIMIT) {
                log::warn!(
                    "TLAS instance limit reached ({} instances, {} triangles)",
                    self.tlas.instances.len(),
                    offset
                );
            }
            return Err(Error::InstanceLimit);
        }
        match blas.triangle_materials() {
            Some(materials) => self.flattened_materials.extend_from_slice(materials),
            None => self
                .flattened_materials
                .extend(std::iter::repeat(material).take(count as usize)),
        }
        let id = InstanceId(self.tlas.instances.len() as u32);
        self.tlas.instances.push(Instance {
            blas: blas_id,
            transform,
            custom_index: offset,
            triangle_material_count: count,
            mask: 0xFF,
            sbt_offset: 0,
            flags: gpu::InstanceFlags::empty(),
            material,
        });
        self.tlas.needs_rebuild = true;
        Ok(id)
    }

    pub fn queue_refit(
        &mut self,
        instance: InstanceId,
        transform: Option<gpu::Transform>,
        rebuild_blas: bool,
    ) -> Result<(), Error> {
        let accepted = self.refits.push(RefitRequest {
            instance,
            transform,
            rebuild_blas,
        });
        if !accepted {
            if self.warnings.first(WarnCategory::QUEUE_FULL) {
                log::warn!("Refit queue is full, dropping requests");
            }
            return Err(Error::QueueFull);
        }
        if transform.is_some() {
            self.tlas.dirty_transforms = true;
        }
        self.tlas.needs_rebuild = true;
        Ok(())
    }

    /// Apply queued refits in insertion order. Requests for instances that
    /// no longer exist are skipped. Every request is processed, the first
    /// BLAS failure is returned.
    #[profiling::function]
    pub fn process_pending_refits<G: gpu::Device>(&mut self, gpu: &G) -> Result<(), Error> {
        let mut result = Ok(());
        for request in self.refits.drain() {
            let Some(instance) = self.tlas.instances.get_mut(request.instance.index()) else {
                log::debug!("Skipping refit of missing instance {:?}", request.instance);
                continue;
            };
            if let Some(transform) = request.transform {
                instance.transform = transform;
            }
            if request.rebuild_blas {
                let blas = instance.blas;
                if let Err(error) = self.refit_blas_gpu(gpu, blas) {
                    if self.warnings.first(WarnCategory::BUILD_FAILED) {
                        log::warn!("Refit of {:?} failed: {}", blas, error);
                    }
                    if result.is_ok() {
                        result = Err(error);
                    }
                }
            }
        }
        self.refits.reset();
        result
    }

    /// Rebuild the TLAS into its inactive slot and make it active.
    #[profiling::function]
    pub fn build_tlas<G: gpu::Device>(&mut self, gpu: &G) -> Result<(), Error> {
        if !self.tlas.needs_rebuild {
            return Ok(());
        }
        if gpu.capabilities().ray_tracing.is_none() {
            return Err(Error::Unsupported);
        }
        self.process_pending_refits(gpu)?;
        if self.tlas.instances.is_empty() {
            self.tlas.needs_rebuild = false;
            self.tlas.dirty_transforms = false;
            return Ok(());
        }
        for index in 0..self.blases.len() {
            if !self.blases[index].is_built() {
                self.build_blas_gpu(gpu, BlasId(index as u32))?;
            }
        }
        self.tlas.build(gpu, &self.blases).inspect_err(|error| {
            log::warn!("TLAS build failed: {}", error);
        })?;
        log::debug!(
            "TLAS built in slot {} with {} instances",
            self.tlas.active,
            self.tlas.instances.len()
        );
        Ok(())
    }

    /// Force a TLAS rebuild over the current transforms, for when the
    /// material table changes under the instances.
    pub fn request_world_refit(&mut self) {
        if !self.tlas.instances.is_empty() {
            self.tlas.needs_rebuild = true;
        }
    }

    pub fn active_tlas(&self) -> Option<gpu::AccelerationStructure> {
        self.tlas.active_structure()
    }

    /// Index of the slot readers see.
    pub fn active_slot(&self) -> usize {
        self.tlas.active
    }

    pub fn tlas_slot(&self, slot: usize) -> Option<gpu::AccelerationStructure> {
        self.tlas.slots.get(slot).copied().flatten()
    }

    pub fn tlas_scratch_size(&self) -> u64 {
        self.tlas.scratch_size
    }

    pub fn needs_rebuild(&self) -> bool {
        self.tlas.needs_rebuild
    }

    pub fn dirty_transforms(&self) -> bool {
        self.tlas.dirty_transforms
    }

    pub fn refit_queue(&self) -> &RefitQueue {
        &self.refits
    }

    pub fn instance(&self, id: InstanceId) -> Option<&Instance> {
        self.tlas.instances.get(id.index())
    }

    pub fn instances(&self) -> &[Instance] {
        &self.tlas.instances
    }

    pub fn instance_count(&self) -> usize {
        self.tlas.instances.len()
    }

    pub fn blas(&self, id: BlasId) -> Option<&Blas> {
        self.blases.get(id.index())
    }

    pub fn blas_count(&self) -> usize {
        self.blases.len()
    }

    /// Per-triangle materials of all instances, end to end.
    pub fn flattened_materials(&self) -> &[u32] {
        &self.flattened_materials
    }

    pub fn warnings(&self) -> &WarnOnce {
        &self.warnings
    }

    /// Drop all structures and start a new world.
    pub fn reset<G: gpu::Device>(&mut self, gpu: &G) {
        for blas in self.blases.iter_mut() {
            blas.destroy_gpu(gpu);
        }
        self.blases.clear();
        self.tlas.destroy(gpu);
        self.refits.reset();
        self.flattened_materials.clear();
        self.warnings.reset();
    }

    pub fn destroy<G: gpu::Device>(&mut self, gpu: &G) {
        self.reset(gpu);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_graphics::null;

    const TRIANGLE: [[f32; 3]; 3] = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];

    fn translate(x: f32) -> gpu::Transform {
        let mut transform = gpu::IDENTITY_TRANSFORM;
        transform[0][3] = x;
        transform
    }

    #[test]
    fn rejects_malformed_geometry() {
        let mut store = AccelStore::new();
        assert!(matches!(
            store.create_blas(&TRIANGLE, &[0, 1], None, false),
            Err(Error::InvalidGeometry(_))
        ));
        assert!(matches!(
            store.create_blas(&TRIANGLE, &[0, 1, 3], None, false),
            Err(Error::InvalidGeometry(_))
        ));
        assert!(matches!(
            store.create_blas(&TRIANGLE, &[0, 1, 2], Some(&[1, 2]), false),
            Err(Error::InvalidGeometry(_))
        ));
        assert_eq!(store.blas_count(), 0);
    }

    #[test]
    fn pool_exhaustion_is_reported_once() {
        let mut store = AccelStore::new();
        for _ in 0..MAX_BLAS {
            store.create_blas(&TRIANGLE, &[0, 1, 2], None, false).unwrap();
        }
        assert!(matches!(
            store.create_blas(&TRIANGLE, &[0, 1, 2], None, false),
            Err(Error::PoolExhausted)
        ));
        assert!(store.warnings().has_fired(WarnCategory::POOL_EXHAUSTED));
    }

    #[test]
    fn custom_indices_partition_materials() {
        let mut store = AccelStore::new();
        let quad = [
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [1.0, 1.0, 0.0],
        ];
        let a = store.create_blas(&quad, &[0, 1, 2, 2, 1, 3], Some(&[4, 5]), false).unwrap();
        let b = store.create_blas(&TRIANGLE, &[0, 1, 2], None, false).unwrap();
        store.add_instance(a, gpu::IDENTITY_TRANSFORM, 0).unwrap();
        store.add_instance(b, gpu::IDENTITY_TRANSFORM, 9).unwrap();
        store.add_instance(a, gpu::IDENTITY_TRANSFORM, 0).unwrap();

        let mut expected = 0;
        for instance in store.instances() {
            assert_eq!(instance.custom_index, expected);
            expected += instance.triangle_material_count;
        }
        assert_eq!(expected as usize, store.flattened_materials().len());
        assert_eq!(store.flattened_materials(), &[4, 5, 9, 4, 5]);
    }

    #[test]
    fn blas_rebuild_is_byte_equivalent() {
        let gpu = null::Context::default();
        let mut store = AccelStore::new();
        let id = store.create_blas(&TRIANGLE, &[0, 1, 2], None, false).unwrap();
        store.build_blas_gpu(&gpu, id).unwrap();
        let first = store.blas(id).unwrap().acceleration_structure().unwrap();
        let content = gpu.acceleration_structure_content(first);

        store.destroy_blas_gpu(&gpu, id).unwrap();
        store.destroy_blas_gpu(&gpu, id).unwrap();
        assert!(!gpu.is_acceleration_structure_alive(first));
        store.build_blas_gpu(&gpu, id).unwrap();
        let second = store.blas(id).unwrap().acceleration_structure().unwrap();
        assert_eq!(gpu.acceleration_structure_content(second), content);
    }

    #[test]
    fn update_requires_dynamic_blas() {
        let gpu = null::Context::default();
        let mut store = AccelStore::new();
        let fixed = store.create_blas(&TRIANGLE, &[0, 1, 2], None, false).unwrap();
        let moving = store.create_blas(&TRIANGLE, &[0, 1, 2], None, true).unwrap();
        assert!(matches!(
            store.update_blas(&gpu, fixed, &TRIANGLE),
            Err(Error::InvalidBlas(_))
        ));
        let raised = TRIANGLE.map(|[x, y, z]| [x, y, z + 2.0]);
        store.update_blas(&gpu, moving, &raised).unwrap();
        assert_eq!(store.blas(moving).unwrap().aabb().min.z, 2.0);
    }

    #[test]
    fn tlas_swaps_slots_and_keeps_previous() {
        let gpu = null::Context::default();
        let mut store = AccelStore::new();
        let blas = store.create_blas(&TRIANGLE, &[0, 1, 2], None, false).unwrap();
        let instance = store.add_instance(blas, gpu::IDENTITY_TRANSFORM, 1).unwrap();
        store.build_tlas(&gpu).unwrap();
        let first_slot = store.active_slot();
        let first = store.active_tlas().unwrap();

        store.queue_refit(instance, Some(translate(5.0)), false).unwrap();
        assert!(store.dirty_transforms());
        store.build_tlas(&gpu).unwrap();
        assert_ne!(store.active_slot(), first_slot);
        assert!(gpu.is_acceleration_structure_alive(first));
        assert!(!store.needs_rebuild());
        assert!(!store.dirty_transforms());
        assert_eq!(store.instance(instance).unwrap().transform, translate(5.0));
        assert!(gpu.violations().is_empty());
    }

    #[test]
    fn failed_tlas_build_keeps_active_handle() {
        let gpu = null::Context::default();
        let mut store = AccelStore::new();
        let blas = store.create_blas(&TRIANGLE, &[0, 1, 2], None, false).unwrap();
        let instance = store.add_instance(blas, gpu::IDENTITY_TRANSFORM, 1).unwrap();
        store.build_tlas(&gpu).unwrap();
        let active = store.active_tlas();
        let live = gpu.live_acceleration_structure_count();

        gpu.set_fail_builds(true);
        store.queue_refit(instance, Some(translate(1.0)), false).unwrap();
        assert!(matches!(store.build_tlas(&gpu), Err(Error::BuildFailed(_))));
        assert_eq!(store.active_tlas(), active);
        assert!(store.needs_rebuild());
        assert_eq!(gpu.live_acceleration_structure_count(), live);
    }

    #[test]
    fn refit_of_missing_instance_changes_nothing() {
        let gpu = null::Context::default();
        let mut store = AccelStore::new();
        let blas = store.create_blas(&TRIANGLE, &[0, 1, 2], None, false).unwrap();
        store.add_instance(blas, gpu::IDENTITY_TRANSFORM, 1).unwrap();
        store.build_tlas(&gpu).unwrap();
        let buffers = gpu.live_buffer_count();
        let structures = gpu.live_acceleration_structure_count();

        store.queue_refit(InstanceId(7), Some(translate(3.0)), true).unwrap();
        store.process_pending_refits(&gpu).unwrap();
        assert_eq!(gpu.live_buffer_count(), buffers);
        assert_eq!(gpu.live_acceleration_structure_count(), structures);
        assert_eq!(
            store.instance(InstanceId(0)).unwrap().transform,
            gpu::IDENTITY_TRANSFORM
        );
    }

    #[test]
    fn dynamic_refit_updates_in_place() {
        let gpu = null::Context::default();
        let mut store = AccelStore::new();
        let blas = store.create_blas(&TRIANGLE, &[0, 1, 2], None, true).unwrap();
        let instance = store.add_instance(blas, gpu::IDENTITY_TRANSFORM, 1).unwrap();
        store.build_tlas(&gpu).unwrap();
        let structure = store.blas(blas).unwrap().acceleration_structure().unwrap();

        let raised = TRIANGLE.map(|[x, y, z]| [x, y, z + 1.0]);
        store.update_blas(&gpu, blas, &raised).unwrap();
        store.queue_refit(instance, None, true).unwrap();
        store.build_tlas(&gpu).unwrap();
        assert_eq!(
            store.blas(blas).unwrap().acceleration_structure(),
            Some(structure)
        );
        assert_eq!(gpu.acceleration_structure_build_count(structure), 2);
    }

    #[test]
    fn reset_releases_everything() {
        let gpu = null::Context::default();
        let mut store = AccelStore::new();
        let blas = store.create_blas(&TRIANGLE, &[0, 1, 2], None, false).unwrap();
        store.add_instance(blas, gpu::IDENTITY_TRANSFORM, 1).unwrap();
        store.build_tlas(&gpu).unwrap();
        store.reset(&gpu);
        assert_eq!(store.blas_count(), 0);
        assert_eq!(store.instance_count(), 0);
        assert!(store.active_tlas().is_none());
        assert_eq!(gpu.live_acceleration_structure_count(), 0);
        assert_eq!(gpu.live_buffer_count(), 0);
    }
}
