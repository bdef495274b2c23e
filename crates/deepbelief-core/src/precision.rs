use std::fmt;

use crate::error::{Error, Result};

// Precision — how buffer elements are stored
//
// Weights are usually shipped as 8 or 16 bit codes plus a (min, max) range.
// A code maps back to a float through an affine transform:
//
//   spread = (max - min) / 2^bits
//   value  = code * spread + min
//
// Kernels read codes and apply this transform element by element, so a
// quantized weight matrix never has to be expanded in memory.

/// Element storage precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Precision {
    F32,
    Q16,
    Q8,
}

impl Precision {
    /// Map a `float_bits` value from a model file.
    pub fn from_bits(bits: u32) -> Result<Precision> {
        match bits {
            32 => Ok(Precision::F32),
            16 => Ok(Precision::Q16),
            8 => Ok(Precision::Q8),
            _ => Err(Error::UnsupportedPrecision { bits }),
        }
    }

    pub fn bits(&self) -> u32 {
        match self {
            Precision::F32 => 32,
            Precision::Q16 => 16,
            Precision::Q8 => 8,
        }
    }

    pub fn bytes_per_element(&self) -> usize {
        self.bits() as usize / 8
    }

    pub fn is_quantized(&self) -> bool {
        !matches!(self, Precision::F32)
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Precision::F32 => "f32",
            Precision::Q16 => "q16",
            Precision::Q8 => "q8",
        };
        write!(f, "{s}")
    }
}

/// Affine range of a quantized buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuantParams {
    pub min: f32,
    pub max: f32,
    pub bits: u32,
}

impl QuantParams {
    pub fn new(min: f32, max: f32, bits: u32) -> Result<Self> {
        if bits != 8 && bits != 16 {
            return Err(Error::UnsupportedPrecision { bits });
        }
        Ok(QuantParams { min, max, bits })
    }

    /// Range covered by a single code step.
    pub fn spread(&self) -> f32 {
        (self.max - self.min) / (1u32 << self.bits) as f32
    }

    /// Largest representable code.
    pub fn max_code(&self) -> u32 {
        (1u32 << self.bits) - 1
    }

    #[inline]
    pub fn dequantize(&self, code: u32) -> f32 {
        code as f32 * self.spread() + self.min
    }

    /// Nearest code for `value`, clamped into the code range.
    #[inline]
    pub fn quantize(&self, value: f32) -> u32 {
        let recip = 1.0 / self.spread().max(1e-8);
        let code = ((value - self.min) * recip).round();
        if code.is_nan() || code <= 0.0 {
            0
        } else {
            (code as u32).min(self.max_code())
        }
    }
}
