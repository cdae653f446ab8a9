use crate::geometry::Aabb;
use glam::{UVec3, Vec3};

pub const FACE_DIRECTIONS: [Vec3; 6] = [
    Vec3::X,
    Vec3::NEG_X,
    Vec3::Y,
    Vec3::NEG_Y,
    Vec3::Z,
    Vec3::NEG_Z,
];

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Probe {
    pub position: Vec3,
    pub irradiance: [Vec3; 6],
    pub visibility: [f32; 6],
    pub last_update_frame: u32,
    pub dynamic: bool,
}

impl Probe {
    /// Irradiance arriving at a surface facing `normal`.
    pub fn evaluate(&self, normal: Vec3) -> Vec3 {
        FACE_DIRECTIONS
            .iter()
            .zip(self.irradiance.iter())
            .map(|(dir, irradiance)| *irradiance * normal.dot(*dir).max(0.0))
            .sum()
    }
}

/// Cubic lattice of irradiance probes spanning the world bounds.
#[derive(Debug)]
pub struct ProbeGrid {
    resolution: u32,
    bounds: Aabb,
    probes: Vec<Probe>,
    cursor: usize,
}

impl ProbeGrid {
    pub fn new(bounds: Aabb, resolution: u32) -> Self {
        let resolution = resolution.max(2);
        let step = bounds.extent() / (resolution - 1) as f32;
        let mut probes = Vec::with_capacity(resolution.pow(3) as usize);
        for z in 0..resolution {
            for y in 0..resolution {
                for x in 0..resolution {
                    probes.push(Probe {
                        position: bounds.min + step * UVec3::new(x, y, z).as_vec3(),
                        irradiance: [Vec3::ZERO; 6],
                        visibility: [1.0; 6],
                        last_update_frame: 0,
                        dynamic: false,
                    });
                }
            }
        }
        Self {
            resolution,
            bounds,
            probes,
            cursor: 0,
        }
    }

    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    pub fn probes(&self) -> &[Probe] {
        &self.probes
    }

    fn index(&self, cell: UVec3) -> usize {
        let n = self.resolution as usize;
        (cell.z as usize * n + cell.y as usize) * n + cell.x as usize
    }

    /// Number of probes refreshed per frame.
    pub fn refresh_budget(&self) -> usize {
        (self.probes.len() / 16).max(1)
    }

    /// Refresh the next round-robin subset. `shade` returns the irradiance
    /// and visibility seen from a probe position along a face direction.
    pub fn refresh(&mut self, frame: u32, mut shade: impl FnMut(Vec3, Vec3) -> (Vec3, f32)) {
        let count = self.refresh_budget().min(self.probes.len());
        for _ in 0..count {
            let probe = &mut self.probes[self.cursor];
            for (face, dir) in FACE_DIRECTIONS.iter().enumerate() {
                let (irradiance, visibility) = shade(probe.position, *dir);
                probe.irradiance[face] = irradiance;
                probe.visibility[face] = visibility;
            }
            probe.last_update_frame = frame;
            self.cursor = (self.cursor + 1) % self.probes.len();
        }
    }

    /// Trilinear blend of the eight probes around `position`.
    pub fn sample(&self, position: Vec3, normal: Vec3) -> Vec3 {
        let extent = self.bounds.extent();
        let last = (self.resolution - 1) as f32;
        let mut coords = Vec3::ZERO;
        for axis in 0..3 {
            if extent[axis] > 0.0 {
                coords[axis] =
                    ((position[axis] - self.bounds.min[axis]) / extent[axis] * last).clamp(0.0, last);
            }
        }
        let base = coords.floor().min(Vec3::splat(last - 1.0));
        let t = coords - base;
        let base = base.as_uvec3();
        let mut result = Vec3::ZERO;
        for corner in 0..8u32 {
            let offset = UVec3::new(corner & 1, (corner >> 1) & 1, (corner >> 2) & 1);
            let weight = (0..3).fold(1.0, |w, axis| {
                if offset[axis] == 1 {
                    w * t[axis]
                } else {
                    w * (1.0 - t[axis])
                }
            });
            if weight > 0.0 {
                result += self.probes[self.index(base + offset)].evaluate(normal) * weight;
            }
        }
        result
    }
}
