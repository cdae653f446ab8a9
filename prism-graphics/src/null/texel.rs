use crate::TextureFormat as Tf;

fn f16_to_f32(bits: u16) -> f32 {
    let exponent = (bits >> 10) & 0x1F;
    let mantissa = (bits & 0x3FF) as f32;
    let value = match exponent {
        0 => mantissa * 2f32.powi(-24),
        0x1F if mantissa == 0.0 => f32::INFINITY,
        0x1F => f32::NAN,
        _ => (1.0 + mantissa / 1024.0) * 2f32.powi(exponent as i32 - 15),
    };
    if bits & 0x8000 != 0 {
        -value
    } else {
        value
    }
}

fn f32_to_f16(value: f32) -> u16 {
    let sign = if value.is_sign_negative() { 0x8000 } else { 0 };
    let magnitude = value.abs();
    if magnitude.is_nan() {
        return sign | 0x7E00;
    }
    if magnitude >= 65520.0 {
        return sign | 0x7C00;
    }
    if magnitude < 2f32.powi(-14) {
        return sign | (magnitude * 2f32.powi(24)).round() as u16;
    }
    let mut exponent = magnitude.log2().floor() as i32;
    let mut mantissa = ((magnitude / 2f32.powi(exponent) - 1.0) * 1024.0).round() as u16;
    if mantissa == 1024 {
        mantissa = 0;
        exponent += 1;
    }
    sign | ((exponent + 15) as u16) << 10 | mantissa
}

fn unorm(byte: u8) -> f32 {
    byte as f32 / 255.0
}

fn to_unorm(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Decode one texel into RGBA.
pub fn read_texel(format: Tf, bytes: &[u8]) -> [f32; 4] {
    match format {
        Tf::Rgba8Unorm => [unorm(bytes[0]), unorm(bytes[1]), unorm(bytes[2]), unorm(bytes[3])],
        Tf::Bgra8Unorm => [unorm(bytes[2]), unorm(bytes[1]), unorm(bytes[0]), unorm(bytes[3])],
        Tf::Rgba16Float => {
            let mut texel = [0.0; 4];
            for (out, chunk) in texel.iter_mut().zip(bytes.chunks_exact(2)) {
                *out = f16_to_f32(u16::from_le_bytes([chunk[0], chunk[1]]));
            }
            texel
        }
        Tf::Rgba32Float => bytemuck::pod_read_unaligned(&bytes[..16]),
        Tf::R32Float | Tf::Depth32Float => {
            let value: f32 = bytemuck::pod_read_unaligned(&bytes[..4]);
            [value, 0.0, 0.0, 1.0]
        }
    }
}

/// Encode RGBA into one texel of `format`.
pub fn write_texel(format: Tf, texel: [f32; 4], bytes: &mut [u8]) {
    match format {
        Tf::Rgba8Unorm => {
            for (out, &value) in bytes.iter_mut().zip(texel.iter()) {
                *out = to_unorm(value);
            }
        }
        Tf::Bgra8Unorm => {
            let swizzled = [texel[2], texel[1], texel[0], texel[3]];
            for (out, &value) in bytes.iter_mut().zip(swizzled.iter()) {
                *out = to_unorm(value);
            }
        }
        Tf::Rgba16Float => {
            for (chunk, &value) in bytes.chunks_exact_mut(2).zip(texel.iter()) {
                chunk.copy_from_slice(&f32_to_f16(value).to_le_bytes());
            }
        }
        Tf::Rgba32Float => bytes[..16].copy_from_slice(bytemuck::bytes_of(&texel)),
        Tf::R32Float | Tf::Depth32Float => {
            bytes[..4].copy_from_slice(&texel[0].to_le_bytes());
        }
    }
}

#[test]
fn half_float_round_trip() {
    for &value in &[0.0f32, 1.0, -2.5, 0.333, 1000.0] {
        let back = f16_to_f32(f32_to_f16(value));
        assert!((back - value).abs() <= value.abs() * 1e-3, "{value} -> {back}");
    }
}
