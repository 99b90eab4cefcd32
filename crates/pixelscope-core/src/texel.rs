//! Texel values as they travel between kernels and the host.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::resource::CompKind;

/// Raw bits of a four-channel texel, interpreted per [`CompKind`].
pub type TexelBits = [u32; 4];

/// Converts raw texel bits to floats, numerically for integer kinds.
#[allow(clippy::cast_precision_loss, clippy::cast_possible_wrap)]
pub fn texel_to_f32(kind: CompKind, bits: TexelBits) -> [f32; 4] {
    bits.map(|b| match kind {
        CompKind::Float => f32::from_bits(b),
        CompKind::UInt => b as f32,
        CompKind::SInt => (b as i32) as f32,
    })
}

/// Reduction identity for the running minimum (the largest value).
#[allow(clippy::cast_sign_loss)]
pub fn min_identity(kind: CompKind) -> TexelBits {
    [match kind {
        CompKind::Float => f32::MAX.to_bits(),
        CompKind::UInt => u32::MAX,
        CompKind::SInt => i32::MAX as u32,
    }; 4]
}

/// Reduction identity for the running maximum (the smallest value).
#[allow(clippy::cast_sign_loss)]
pub fn max_identity(kind: CompKind) -> TexelBits {
    [match kind {
        CompKind::Float => (-f32::MAX).to_bits(),
        CompKind::UInt => 0,
        CompKind::SInt => i32::MIN as u32,
    }; 4]
}

/// Per-channel minimum in the component domain.
pub fn texel_min(kind: CompKind, a: TexelBits, b: TexelBits) -> TexelBits {
    combine(kind, a, b, Ordering::Less)
}

/// Per-channel maximum in the component domain.
pub fn texel_max(kind: CompKind, a: TexelBits, b: TexelBits) -> TexelBits {
    combine(kind, a, b, Ordering::Greater)
}

#[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
fn combine(kind: CompKind, a: TexelBits, b: TexelBits, keep: Ordering) -> TexelBits {
    std::array::from_fn(|i| {
        let (x, y) = (a[i], b[i]);
        match kind {
            CompKind::Float => {
                let (fx, fy) = (f32::from_bits(x), f32::from_bits(y));
                let v = if keep == Ordering::Less {
                    fx.min(fy)
                } else {
                    fx.max(fy)
                };
                v.to_bits()
            }
            CompKind::UInt => {
                if x.cmp(&y) == keep {
                    x
                } else {
                    y
                }
            }
            CompKind::SInt => {
                if (x as i32).cmp(&(y as i32)) == keep {
                    x
                } else {
                    y
                }
            }
        }
    })
}

/// Per-channel range of an image, converted to floats.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MinMax {
    pub min: [f32; 4],
    pub max: [f32; 4],
}

impl MinMax {
    pub fn from_bits(kind: CompKind, min: TexelBits, max: TexelBits) -> Self {
        Self {
            min: texel_to_f32(kind, min),
            max: texel_to_f32(kind, max),
        }
    }
}

/// A fetched texel in its component domain.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PixelValue {
    Float([f32; 4]),
    UInt([u32; 4]),
    SInt([i32; 4]),
}

impl PixelValue {
    /// Interprets fetch output. With `raw_bits` the target aliased the texel
    /// bits unchanged; otherwise integer texels arrived as float values.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_possible_wrap)]
    pub fn from_fetch(kind: CompKind, bits: TexelBits, raw_bits: bool) -> Self {
        match (kind, raw_bits) {
            (CompKind::Float, _) => PixelValue::Float(bits.map(f32::from_bits)),
            (CompKind::UInt, true) => PixelValue::UInt(bits),
            (CompKind::UInt, false) => PixelValue::UInt(bits.map(|b| f32::from_bits(b) as u32)),
            (CompKind::SInt, true) => PixelValue::SInt(bits.map(|b| b as i32)),
            (CompKind::SInt, false) => PixelValue::SInt(bits.map(|b| f32::from_bits(b) as i32)),
        }
    }

    /// Channels converted to floats.
    #[allow(clippy::cast_precision_loss)]
    pub fn to_f32(&self) -> [f32; 4] {
        match *self {
            PixelValue::Float(v) => v,
            PixelValue::UInt(v) => v.map(|c| c as f32),
            PixelValue::SInt(v) => v.map(|c| c as f32),
        }
    }
}
