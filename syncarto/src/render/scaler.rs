//! Value-range scaling for single-file multiband scenes.
//!
//! Index-style bands (NDVI and friends) carry values in a small signed range.
//! They are mapped onto a red/green ramp: low values red, high values green.

use serde::{Deserialize, Serialize};

use crate::cog::Samples;

use super::RenderError;

/// Default lower bound of the scaled range.
pub const DEFAULT_SCALE_MIN: f64 = -0.2;

/// Default upper bound of the scaled range.
pub const DEFAULT_SCALE_MAX: f64 = 0.7;

/// Value range mapped onto the 8-bit ramp.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScaleRange {
    pub min: f64,
    pub max: f64,
}

impl ScaleRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Position of `v` in the range, unclamped.
    #[inline]
    fn fraction(&self, v: f64) -> f64 {
        (v - self.min) / (self.max - self.min)
    }
}

impl Default for ScaleRange {
    fn default() -> Self {
        Self::new(DEFAULT_SCALE_MIN, DEFAULT_SCALE_MAX)
    }
}

#[inline]
fn is_nodata(v: f64, fill_value: f64) -> bool {
    v == fill_value || v == 0.0
}

/// Red channel: 255 at `min` falling to 0 at `max`.
#[inline]
pub fn scale_red(v: f64, range: ScaleRange, fill_value: f64) -> u8 {
    if is_nodata(v, fill_value) {
        0
    } else if v < range.min {
        255
    } else if v > range.max {
        0
    } else {
        (255.0 - range.fraction(v) * 255.0) as u8
    }
}

/// Green channel: 0 at `min` rising to 255 at `max`.
#[inline]
pub fn scale_green(v: f64, range: ScaleRange, fill_value: f64) -> u8 {
    if is_nodata(v, fill_value) {
        0
    } else if v < range.min {
        0
    } else if v > range.max {
        255
    } else {
        (range.fraction(v) * 255.0) as u8
    }
}

/// Three 8-bit channels produced by [`scale_multiband`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScaledBands {
    pub red: Vec<u8>,
    pub green: Vec<u8>,
    pub blue: Vec<u8>,
}

/// Scale the three selected bands of a multiband window. Blue is always 0.
pub fn scale_multiband(
    red: &Samples,
    green: &Samples,
    blue: &Samples,
    range: ScaleRange,
    fill_value: f64,
) -> Result<ScaledBands, RenderError> {
    let len = red.len();
    for (channel, band) in [("green", green), ("blue", blue)] {
        if band.len() != len {
            return Err(RenderError::LengthMismatch {
                channel,
                expected: len,
                actual: band.len(),
            });
        }
    }

    Ok(ScaledBands {
        red: (0..len)
            .map(|i| scale_red(red.value(i), range, fill_value))
            .collect(),
        green: (0..len)
            .map(|i| scale_green(green.value(i), range, fill_value))
            .collect(),
        blue: vec![0; len],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::DEFAULT_FILL_VALUE;
    use proptest::prelude::*;

    const FILL: f64 = DEFAULT_FILL_VALUE;

    #[test]
    fn test_saturation_outside_range() {
        let range = ScaleRange::default();
        assert_eq!(scale_red(-0.3, range, FILL), 255);
        assert_eq!(scale_green(-0.3, range, FILL), 0);
        assert_eq!(scale_red(0.8, range, FILL), 0);
        assert_eq!(scale_green(0.8, range, FILL), 255);
    }

    #[test]
    fn test_nodata_is_black() {
        let range = ScaleRange::default();
        for v in [0.0, FILL] {
            assert_eq!(scale_red(v, range, FILL), 0);
            assert_eq!(scale_green(v, range, FILL), 0);
        }
    }

    #[test]
    fn test_fraction_truncates() {
        let range = ScaleRange::new(0.0, 1.0);
        // 0.5 * 255 = 127.5
        assert_eq!(scale_green(0.5, range, FILL), 127);
        assert_eq!(scale_red(0.5, range, FILL), 127);
        assert_eq!(scale_green(1.0, range, FILL), 255);
    }

    #[test]
    fn test_scale_multiband() {
        let red = Samples::F32(vec![-0.3, 0.0, 0.8, FILL as f32]);
        let green = red.clone();
        let blue = red.clone();

        let scaled = scale_multiband(&red, &green, &blue, ScaleRange::default(), FILL).unwrap();
        assert_eq!(scaled.red, vec![255, 0, 0, 0]);
        assert_eq!(scaled.green, vec![0, 0, 255, 0]);
        assert_eq!(scaled.blue, vec![0; 4]);
    }

    #[test]
    fn test_scale_multiband_length_mismatch() {
        let red = Samples::F32(vec![0.1; 4]);
        let green = Samples::F32(vec![0.1; 3]);
        let result = scale_multiband(&red, &green, &red, ScaleRange::default(), FILL);
        assert_eq!(
            result,
            Err(RenderError::LengthMismatch {
                channel: "green",
                expected: 4,
                actual: 3
            })
        );
    }

    proptest! {
        #[test]
        fn prop_red_and_green_are_complementary(v in -0.19f64..0.69) {
            prop_assume!(v != 0.0);
            let range = ScaleRange::default();
            let sum = scale_red(v, range, FILL) as i32 + scale_green(v, range, FILL) as i32;
            // Each side truncates independently
            prop_assert!((254..=255).contains(&sum));
        }

        #[test]
        fn prop_green_is_monotonic(a in -1.0f64..1.0, b in -1.0f64..1.0) {
            prop_assume!(a != 0.0 && b != 0.0);
            let range = ScaleRange::default();
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(scale_green(lo, range, FILL) <= scale_green(hi, range, FILL));
        }
    }
}
