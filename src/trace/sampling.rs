use glam::Vec3;
use std::f32::consts::PI;

#[inline]
pub fn hash_u32(mut v: u32) -> u32 {
    v ^= v >> 16;
    v = v.wrapping_mul(0x7feb_352d);
    v ^= v >> 15;
    v = v.wrapping_mul(0x846c_a68b);
    v ^= v >> 16;
    v
}

#[inline]
pub fn u01(v: u32) -> f32 {
    (v as f32) * (1.0 / 4294967296.0)
}

/// Counter-based random stream, reproducible from its seed.
#[derive(Clone, Copy, Debug)]
pub struct Rng {
    state: u32,
}

impl Rng {
    pub fn new(seed: u32) -> Self {
        Self {
            state: hash_u32(seed ^ 0x9e37_79b9),
        }
    }

    /// Stream for one pixel sample of one frame.
    pub fn for_pixel(seed: u32, x: u32, y: u32, sample: u32) -> Self {
        let a = x.wrapping_mul(0x9e37_79b1);
        let b = y.wrapping_mul(0x85eb_ca6b);
        let c = sample.wrapping_mul(0xc2b2_ae35);
        Self::new(seed ^ a ^ b ^ c)
    }

    pub fn next_u32(&mut self) -> u32 {
        self.state = hash_u32(self.state.wrapping_add(0x6d2b_79f5));
        self.state
    }

    /// Uniform in `[0, 1)`.
    pub fn next_f32(&mut self) -> f32 {
        u01(self.next_u32())
    }
}

/// Orthonormal basis around `n`, built from the world axis least aligned
/// with it.
pub fn orthonormal_basis(n: Vec3) -> (Vec3, Vec3) {
    let abs = n.abs();
    let axis = if abs.x <= abs.y && abs.x <= abs.z {
        Vec3::X
    } else if abs.y <= abs.z {
        Vec3::Y
    } else {
        Vec3::Z
    };
    let tangent = n.cross(axis).normalize();
    let bitangent = n.cross(tangent);
    (tangent, bitangent)
}

fn to_world(n: Vec3, local: Vec3) -> Vec3 {
    let (tangent, bitangent) = orthonormal_basis(n);
    (tangent * local.x + bitangent * local.y + n * local.z).normalize()
}

/// Cosine-weighted direction around `n`. The pdf is `cos θ / π`.
pub fn cosine_sample_hemisphere(n: Vec3, u1: f32, u2: f32) -> Vec3 {
    let r = u1.sqrt();
    let phi = 2.0 * PI * u2;
    let z = (1.0 - u1).max(0.0).sqrt();
    to_world(n, Vec3::new(r * phi.cos(), r * phi.sin(), z))
}

/// Uniform direction around `n`. The pdf is `1 / 2π`.
pub fn uniform_sample_hemisphere(n: Vec3, u1: f32, u2: f32) -> Vec3 {
    let z = u1;
    let r = (1.0 - z * z).max(0.0).sqrt();
    let phi = 2.0 * PI * u2;
    to_world(n, Vec3::new(r * phi.cos(), r * phi.sin(), z))
}

pub fn cosine_pdf(n: Vec3, dir: Vec3) -> f32 {
    n.dot(dir).max(0.0) / PI
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basis_is_orthonormal() {
        for n in [Vec3::X, Vec3::NEG_Z, Vec3::new(0.3, -0.5, 0.8).normalize()] {
            let (t, b) = orthonormal_basis(n);
            assert!(t.dot(n).abs() < 1e-5);
            assert!(b.dot(n).abs() < 1e-5);
            assert!(t.dot(b).abs() < 1e-5);
            assert!((t.length() - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn samples_stay_in_hemisphere() {
        let n = Vec3::new(0.2, 0.9, -0.1).normalize();
        let mut rng = Rng::new(7);
        for _ in 0..256 {
            let c = cosine_sample_hemisphere(n, rng.next_f32(), rng.next_f32());
            let u = uniform_sample_hemisphere(n, rng.next_f32(), rng.next_f32());
            assert!(c.dot(n) >= -1e-5);
            assert!(u.dot(n) >= -1e-5);
        }
    }

    #[test]
    fn rng_is_reproducible() {
        let mut a = Rng::for_pixel(3, 10, 20, 0);
        let mut b = Rng::for_pixel(3, 10, 20, 0);
        let mut c = Rng::for_pixel(3, 10, 20, 1);
        let (x, y, z) = (a.next_u32(), b.next_u32(), c.next_u32());
        assert_eq!(x, y);
        assert_ne!(x, z);
    }
}
