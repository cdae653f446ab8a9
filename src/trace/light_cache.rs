use super::sampling::hash_u32;
use glam::Vec3;

pub const CACHE_SIZE: usize = 1 << 14;
pub const CELL_SIZE: f32 = 10.0;
const NORMAL_THRESHOLD: f32 = 0.9;
const MIN_CONFIDENCE: f32 = 0.3;
const BLEND: f32 = 0.1;
const INITIAL_CONFIDENCE: f32 = 0.5;
const CONFIDENCE_STEP: f32 = 0.05;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CacheEntry {
    pub position: Vec3,
    pub normal: Vec3,
    pub irradiance: Vec3,
    pub confidence: f32,
    pub last_update_frame: u32,
    pub sample_count: u32,
}

/// Indirect lighting cached in a fixed hash table keyed by grid cell.
#[derive(Debug)]
pub struct LightCache {
    entries: Vec<Option<CacheEntry>>,
}

impl Default for LightCache {
    fn default() -> Self {
        Self {
            entries: vec![None; CACHE_SIZE],
        }
    }
}

fn slot(position: Vec3) -> usize {
    let cell = (position / CELL_SIZE).floor().as_ivec3();
    let a = (cell.x as u32).wrapping_mul(0x9e37_79b1);
    let b = (cell.y as u32).wrapping_mul(0x85eb_ca6b);
    let c = (cell.z as u32).wrapping_mul(0xc2b2_ae35);
    hash_u32(a ^ b ^ c) as usize % CACHE_SIZE
}

impl LightCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.entries.fill(None);
    }

    pub fn entry(&self, position: Vec3) -> Option<&CacheEntry> {
        self.entries[slot(position)].as_ref()
    }

    pub fn query(&self, position: Vec3, normal: Vec3) -> Option<Vec3> {
        let entry = self.entries[slot(position)].as_ref()?;
        let usable = entry.position.distance(position) <= CELL_SIZE
            && entry.normal.dot(normal) > NORMAL_THRESHOLD
            && entry.confidence > MIN_CONFIDENCE;
        usable.then_some(entry.irradiance)
    }

    pub fn update(&mut self, position: Vec3, normal: Vec3, irradiance: Vec3, frame: u32) {
        let cached = &mut self.entries[slot(position)];
        match *cached {
            Some(ref mut entry) if entry.position.distance(position) <= CELL_SIZE => {
                entry.irradiance = entry.irradiance.lerp(irradiance, BLEND);
                entry.confidence = (entry.confidence + CONFIDENCE_STEP).min(1.0);
                entry.last_update_frame = frame;
                entry.sample_count += 1;
            }
            _ => {
                *cached = Some(CacheEntry {
                    position,
                    normal,
                    irradiance,
                    confidence: INITIAL_CONFIDENCE,
                    last_update_frame: frame,
                    sample_count: 1,
                });
            }
        }
    }
}
