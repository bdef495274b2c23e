// Float readback through 8-bit channels
//
// Many substrates can only read back RGBA8 render targets. Each result float
// is spread over the four channels of one texel, low byte in R, and the host
// reassembles the bits. The encoding is exact.

use deepbelief_core::{Error, Result};

pub fn encode_rgba8(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_bits().to_le_bytes()).collect()
}

pub fn decode_rgba8(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(Error::Substrate(format!(
            "RGBA8 readback of {} bytes is not whole texels",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|px| f32::from_bits(u32::from_le_bytes([px[0], px[1], px[2], px[3]])))
        .collect())
}
