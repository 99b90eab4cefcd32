//! Host-side histogram math.
//!
//! The histogram kernel and the software device both bucket through
//! [`bucket_index`]; the engine compresses the four-lane device counters with
//! [`compress_lanes`].

use bitflags::bitflags;

use crate::error::{Result, StatsError};

/// Relative nudge applied to the histogram maximum so that values equal to
/// the maximum land in the last bucket.
pub const MAX_NUDGE: f32 = 1e-6;

/// Counter lanes per bucket in the device histogram buffer.
pub const LANES_PER_BUCKET: usize = 4;

bitflags! {
    /// Channels averaged into the histogram value.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ChannelMask: u32 {
        const R = 0x1;
        const G = 0x2;
        const B = 0x4;
        const A = 0x8;
        const RGB = Self::R.bits() | Self::G.bits() | Self::B.bits();
        const RGBA = Self::RGB.bits() | Self::A.bits();
    }
}

impl ChannelMask {
    /// Builds a mask from per-channel flags.
    pub fn from_channels(r: bool, g: bool, b: bool, a: bool) -> Self {
        let mut mask = ChannelMask::empty();
        mask.set(ChannelMask::R, r);
        mask.set(ChannelMask::G, g);
        mask.set(ChannelMask::B, b);
        mask.set(ChannelMask::A, a);
        mask
    }

    /// Mean of the selected channels, or `None` for an empty mask.
    pub fn mean(self, texel: [f32; 4]) -> Option<f32> {
        let mut sum = 0.0;
        let mut count = 0u32;
        for (i, value) in texel.iter().enumerate() {
            if self.bits() & (1 << i) != 0 {
                sum += value;
                count += 1;
            }
        }
        #[allow(clippy::cast_precision_loss)]
        (count > 0).then(|| sum / count as f32)
    }
}

/// Validated `[min, max]` value range of a histogram query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistogramRange {
    min: f32,
    max: f32,
}

impl HistogramRange {
    /// Rejects `min >= max` and non-finite bounds.
    pub fn new(min: f32, max: f32) -> Result<Self> {
        if !(min.is_finite() && max.is_finite()) || min >= max {
            return Err(StatsError::EmptyRange { min, max });
        }
        Ok(Self { min, max })
    }

    pub fn min(&self) -> f32 {
        self.min
    }

    pub fn max(&self) -> f32 {
        self.max
    }

    /// Upper bound handed to the kernel.
    pub fn kernel_max(&self) -> f32 {
        let nudged = self.max + self.max * MAX_NUDGE;
        if nudged > self.min {
            nudged
        } else {
            self.max
        }
    }
}

/// Bucket for `value` in `[min, kernel_max)`, clamped to `[0, buckets - 1]`.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn bucket_index(value: f32, min: f32, kernel_max: f32, buckets: u32) -> u32 {
    let last = buckets.saturating_sub(1);
    let norm = (value - min) / (kernel_max - min);
    let bucket = (norm * buckets as f32).floor();
    if bucket.is_nan() || bucket <= 0.0 {
        0
    } else if bucket >= last as f32 {
        last
    } else {
        bucket as u32
    }
}

/// Collapses four-lane device counters to one count per bucket.
pub fn compress_lanes(raw: &[u32]) -> Vec<u32> {
    raw.chunks_exact(LANES_PER_BUCKET).map(|lanes| lanes[0]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_range_rejects_empty() {
        assert!(HistogramRange::new(1.0, 1.0).is_err());
        assert!(HistogramRange::new(2.0, 1.0).is_err());
        assert!(HistogramRange::new(0.0, f32::INFINITY).is_err());
        assert!(HistogramRange::new(f32::NAN, 1.0).is_err());
        assert!(HistogramRange::new(0.0, 1.0).is_ok());
    }

    #[test]
    fn test_one_value_per_bucket() {
        let range = HistogramRange::new(0.0, 15.0).unwrap();
        for v in 0..16u8 {
            let b = bucket_index(f32::from(v), range.min(), range.kernel_max(), 16);
            assert_eq!(b, u32::from(v));
        }
    }

    #[test]
    fn test_out_of_range_values_clamp() {
        assert_eq!(bucket_index(-5.0, 0.0, 1.0, 8), 0);
        assert_eq!(bucket_index(7.0, 0.0, 1.0, 8), 7);
        assert_eq!(bucket_index(f32::NAN, 0.0, 1.0, 8), 0);
    }

    #[test]
    fn test_channel_mean() {
        let texel = [1.0, 2.0, 3.0, 10.0];
        assert_eq!(ChannelMask::R.mean(texel), Some(1.0));
        assert_eq!(ChannelMask::RGB.mean(texel), Some(2.0));
        assert_eq!(ChannelMask::from_channels(false, false, false, true).mean(texel), Some(10.0));
        assert_eq!(ChannelMask::empty().mean(texel), None);
    }

    #[test]
    fn test_compress_lanes_takes_first() {
        let raw = [3, 9, 9, 9, 0, 1, 1, 1, 5, 0, 0, 0];
        assert_eq!(compress_lanes(&raw), vec![3, 0, 5]);
    }

    proptest! {
        #[test]
        fn prop_max_lands_in_last_bucket(min in -1.0e4f32..1.0e4, span in 1.0e-2f32..1.0e4, buckets in 1u32..1024) {
            let range = HistogramRange::new(min, min + span).unwrap();
            let b = bucket_index(range.max(), range.min(), range.kernel_max(), buckets);
            prop_assert_eq!(b, buckets - 1);
        }

        #[test]
        fn prop_bucket_in_bounds(value in proptest::num::f32::ANY, buckets in 1u32..1024) {
            let b = bucket_index(value, -1.0, 1.0, buckets);
            prop_assert!(b < buckets);
        }
    }
}
