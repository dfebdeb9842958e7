//! Channel composition and pipeline application into RGBA buffers.

use image::RgbaImage;
use rayon::prelude::*;

use crate::cog::Samples;

use super::operation::{Channel, Pipeline};
use super::RenderError;

/// Decoded channels handed to [`render_data`].
#[derive(Debug, Clone, Copy)]
pub enum ChannelInput<'a> {
    /// Bands of a direct RGB decode. A pixel is opaque when any raw sample is
    /// non-zero.
    Precomposed {
        red: &'a Samples,
        green: &'a Samples,
        blue: &'a Samples,
    },
    /// Already-scaled 8-bit channels.
    Scaled {
        red: &'a [u8],
        green: &'a [u8],
        blue: &'a [u8],
    },
    /// One band from each of three resources, normalised by sample type.
    Composed {
        red: &'a Samples,
        green: &'a Samples,
        blue: &'a Samples,
    },
}

impl ChannelInput<'_> {
    fn lengths(&self) -> [usize; 3] {
        match self {
            ChannelInput::Precomposed { red, green, blue }
            | ChannelInput::Composed { red, green, blue } => [red.len(), green.len(), blue.len()],
            ChannelInput::Scaled { red, green, blue } => [red.len(), green.len(), blue.len()],
        }
    }

    /// 8-bit channel values and alpha of pixel `i`.
    #[inline]
    fn pixel(&self, i: usize) -> ([u8; 3], u8) {
        match self {
            ChannelInput::Precomposed { red, green, blue } => {
                let rgb = [red.to_u8(i), green.to_u8(i), blue.to_u8(i)];
                let opaque = red.value(i) != 0.0 || green.value(i) != 0.0 || blue.value(i) != 0.0;
                (rgb, if opaque { 255 } else { 0 })
            }
            ChannelInput::Scaled { red, green, blue } => opaque_unless_black([red[i], green[i], blue[i]]),
            ChannelInput::Composed { red, green, blue } => {
                opaque_unless_black([red.to_u8(i), green.to_u8(i), blue.to_u8(i)])
            }
        }
    }
}

#[inline]
fn opaque_unless_black(rgb: [u8; 3]) -> ([u8; 3], u8) {
    let alpha = if rgb == [0, 0, 0] { 0 } else { 255 };
    (rgb, alpha)
}

/// Per-channel lookup tables for a pipeline over 8-bit inputs.
pub struct ChannelTables([[u8; 256]; 3]);

impl ChannelTables {
    pub fn new(pipeline: &Pipeline) -> Self {
        let mut tables = [[0u8; 256]; 3];
        for channel in Channel::ALL {
            let table = &mut tables[channel.index()];
            for (value, out) in table.iter_mut().enumerate() {
                *out = quantize(pipeline.apply(channel, value as f64 / 255.0));
            }
        }
        Self(tables)
    }

    #[inline]
    pub fn lookup(&self, channel: Channel, value: u8) -> u8 {
        self.0[channel.index()][value as usize]
    }
}

/// Clamp to `[0, 1]` and round to 8 bits. NaN maps to 0.
#[inline]
pub fn quantize(x: f64) -> u8 {
    if x.is_nan() {
        return 0;
    }
    (x.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Compose `input` into `target` and apply `pipeline`.
///
/// `target` is replaced by a `width` x `height` image; every input channel
/// must hold exactly `width * height` samples.
pub fn render_data(
    target: &mut RgbaImage,
    pipeline: &Pipeline,
    width: u32,
    height: u32,
    input: ChannelInput<'_>,
) -> Result<(), RenderError> {
    let pixel_count = (width as usize)
        .checked_mul(height as usize)
        .ok_or(RenderError::InvalidDimensions { width, height })?;

    for (channel, len) in ["red", "green", "blue"].into_iter().zip(input.lengths()) {
        if len != pixel_count {
            return Err(RenderError::LengthMismatch {
                channel,
                expected: pixel_count,
                actual: len,
            });
        }
    }

    let tables = ChannelTables::new(pipeline);
    let mut image = RgbaImage::new(width, height);
    let pixels: &mut [u8] = &mut image;

    pixels
        .par_chunks_mut(4)
        .enumerate()
        .for_each(|(i, out)| {
            let (rgb, alpha) = input.pixel(i);
            for channel in Channel::ALL {
                out[channel.index()] = tables.lookup(channel, rgb[channel.index()]);
            }
            out[3] = alpha;
        });

    *target = image;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::Operation;

    #[test]
    fn test_precomposed_shifts_16_bit() {
        let red = Samples::U16(vec![0, 0x1234, 0xff00, 0]);
        let green = Samples::U16(vec![0, 0, 0x8000, 0x00ff]);
        let blue = Samples::U16(vec![0, 0, 0, 0]);

        let mut target = RgbaImage::new(1, 1);
        render_data(
            &mut target,
            &Pipeline::default(),
            2,
            2,
            ChannelInput::Precomposed {
                red: &red,
                green: &green,
                blue: &blue,
            },
        )
        .unwrap();

        assert_eq!(target.dimensions(), (2, 2));
        assert_eq!(target.get_pixel(0, 0).0, [0, 0, 0, 0]);
        assert_eq!(target.get_pixel(1, 0).0, [0x12, 0, 0, 255]);
        assert_eq!(target.get_pixel(0, 1).0, [0xff, 0x80, 0, 255]);
        // Non-zero raw value that shifts to 0 still counts as data
        assert_eq!(target.get_pixel(1, 1).0, [0, 0, 0, 255]);
    }

    #[test]
    fn test_scaled_black_is_transparent() {
        let red = [0u8, 200];
        let green = [0u8, 10];
        let blue = [0u8, 0];

        let mut target = RgbaImage::new(0, 0);
        render_data(
            &mut target,
            &Pipeline::default(),
            2,
            1,
            ChannelInput::Scaled {
                red: &red,
                green: &green,
                blue: &blue,
            },
        )
        .unwrap();

        assert_eq!(target.get_pixel(0, 0).0[3], 0);
        assert_eq!(target.get_pixel(1, 0).0, [200, 10, 0, 255]);
    }

    #[test]
    fn test_pipeline_applied_per_channel() {
        let pipeline = Pipeline::new(vec![Operation::Gamma {
            bands: Some("r".parse().unwrap()),
            value: 2.0,
        }]);
        let red = Samples::U8(vec![64]);
        let green = Samples::U8(vec![64]);
        let blue = Samples::U8(vec![64]);

        let mut target = RgbaImage::new(1, 1);
        render_data(
            &mut target,
            &pipeline,
            1,
            1,
            ChannelInput::Composed {
                red: &red,
                green: &green,
                blue: &blue,
            },
        )
        .unwrap();

        let expected_red = quantize((64.0f64 / 255.0).sqrt());
        assert_eq!(target.get_pixel(0, 0).0, [expected_red, 64, 64, 255]);
    }

    #[test]
    fn test_length_mismatch_leaves_target() {
        let red = Samples::U8(vec![1; 4]);
        let short = Samples::U8(vec![1; 3]);
        let mut target = RgbaImage::new(7, 7);

        let result = render_data(
            &mut target,
            &Pipeline::default(),
            2,
            2,
            ChannelInput::Composed {
                red: &red,
                green: &red,
                blue: &short,
            },
        );

        assert_eq!(
            result,
            Err(RenderError::LengthMismatch {
                channel: "blue",
                expected: 4,
                actual: 3
            })
        );
        assert_eq!(target.dimensions(), (7, 7));
    }

    #[test]
    fn test_quantize() {
        assert_eq!(quantize(-0.5), 0);
        assert_eq!(quantize(2.0), 255);
        assert_eq!(quantize(0.5), 128);
        assert_eq!(quantize(f64::NAN), 0);
    }
}
