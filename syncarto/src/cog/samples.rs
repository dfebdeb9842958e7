//! Typed sample buffers returned by window decodes.

use tiff::decoder::DecodingResult;

use super::CogError;

/// Numeric type of a band's samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleKind {
    U8,
    U16,
    U32,
    I8,
    I16,
    I32,
    F32,
    F64,
}

impl SampleKind {
    /// Sample kind for a TIFF `BitsPerSample`/`SampleFormat` pair.
    ///
    /// Sample format 1 is unsigned, 2 signed and 3 IEEE float.
    pub fn from_tiff(bits_per_sample: u16, sample_format: u16) -> Option<Self> {
        match (sample_format, bits_per_sample) {
            (1, 8) => Some(Self::U8),
            (1, 16) => Some(Self::U16),
            (1, 32) => Some(Self::U32),
            (2, 8) => Some(Self::I8),
            (2, 16) => Some(Self::I16),
            (2, 32) => Some(Self::I32),
            (3, 16) | (3, 32) => Some(Self::F32),
            (3, 64) => Some(Self::F64),
            _ => None,
        }
    }
}

/// One band of decoded samples, kept in the source's numeric type.
#[derive(Debug, Clone, PartialEq)]
pub enum Samples {
    U8(Vec<u8>),
    U16(Vec<u16>),
    U32(Vec<u32>),
    I8(Vec<i8>),
    I16(Vec<i16>),
    I32(Vec<i32>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

macro_rules! for_each_variant {
    ($samples:expr, $v:ident => $body:expr) => {
        match $samples {
            Samples::U8($v) => $body,
            Samples::U16($v) => $body,
            Samples::U32($v) => $body,
            Samples::I8($v) => $body,
            Samples::I16($v) => $body,
            Samples::I32($v) => $body,
            Samples::F32($v) => $body,
            Samples::F64($v) => $body,
        }
    };
}

impl Samples {
    /// A buffer of `len` samples all set to `fill`, saturated into the type.
    pub fn filled(kind: SampleKind, len: usize, fill: f64) -> Self {
        match kind {
            SampleKind::U8 => Samples::U8(vec![fill as u8; len]),
            SampleKind::U16 => Samples::U16(vec![fill as u16; len]),
            SampleKind::U32 => Samples::U32(vec![fill as u32; len]),
            SampleKind::I8 => Samples::I8(vec![fill as i8; len]),
            SampleKind::I16 => Samples::I16(vec![fill as i16; len]),
            SampleKind::I32 => Samples::I32(vec![fill as i32; len]),
            SampleKind::F32 => Samples::F32(vec![fill as f32; len]),
            SampleKind::F64 => Samples::F64(vec![fill; len]),
        }
    }

    pub fn kind(&self) -> SampleKind {
        match self {
            Samples::U8(_) => SampleKind::U8,
            Samples::U16(_) => SampleKind::U16,
            Samples::U32(_) => SampleKind::U32,
            Samples::I8(_) => SampleKind::I8,
            Samples::I16(_) => SampleKind::I16,
            Samples::I32(_) => SampleKind::I32,
            Samples::F32(_) => SampleKind::F32,
            Samples::F64(_) => SampleKind::F64,
        }
    }

    pub fn len(&self) -> usize {
        for_each_variant!(self, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sample `i` widened to `f64`.
    #[inline]
    pub fn value(&self, i: usize) -> f64 {
        for_each_variant!(self, v => v[i] as f64)
    }

    /// Sample `i` normalised to 8 bits.
    ///
    /// 8-bit data passes through, wider unsigned integers keep their high
    /// byte, negative integers clamp to 0 and floats are read as `[0, 1]`.
    #[inline]
    pub fn to_u8(&self, i: usize) -> u8 {
        match self {
            Samples::U8(v) => v[i],
            Samples::U16(v) => (v[i] >> 8) as u8,
            Samples::U32(v) => (v[i] >> 24) as u8,
            Samples::I8(v) => (v[i].max(0) as u8) << 1,
            Samples::I16(v) => (v[i].max(0) >> 7) as u8,
            Samples::I32(v) => (v[i].max(0) >> 23) as u8,
            Samples::F32(v) => (v[i].clamp(0.0, 1.0) * 255.0).round() as u8,
            Samples::F64(v) => (v[i].clamp(0.0, 1.0) * 255.0).round() as u8,
        }
    }

    /// Copy `count` samples from `src`, starting at `src_start` and stepping
    /// by `src_stride`, into consecutive slots starting at `dst_start`.
    pub fn copy_strided(
        &mut self,
        dst_start: usize,
        src: &Samples,
        src_start: usize,
        src_stride: usize,
        count: usize,
    ) -> Result<(), CogError> {
        if count == 0 {
            return Ok(());
        }
        let src_end = src_start + (count - 1) * src_stride;
        if dst_start + count > self.len() || src_end >= src.len() {
            return Err(CogError::Tiff(format!(
                "chunk copy out of bounds (dst {}+{} of {}, src {} of {})",
                dst_start,
                count,
                self.len(),
                src_end,
                src.len()
            )));
        }

        macro_rules! copy {
            ($dst:expr, $src:expr) => {{
                for (i, slot) in $dst[dst_start..dst_start + count].iter_mut().enumerate() {
                    *slot = $src[src_start + i * src_stride];
                }
                Ok(())
            }};
        }

        match (self, src) {
            (Samples::U8(d), Samples::U8(s)) => copy!(d, s),
            (Samples::U16(d), Samples::U16(s)) => copy!(d, s),
            (Samples::U32(d), Samples::U32(s)) => copy!(d, s),
            (Samples::I8(d), Samples::I8(s)) => copy!(d, s),
            (Samples::I16(d), Samples::I16(s)) => copy!(d, s),
            (Samples::I32(d), Samples::I32(s)) => copy!(d, s),
            (Samples::F32(d), Samples::F32(s)) => copy!(d, s),
            (Samples::F64(d), Samples::F64(s)) => copy!(d, s),
            (d, s) => Err(CogError::Unsupported(format!(
                "chunk sample type {:?} does not match image type {:?}",
                s.kind(),
                d.kind()
            ))),
        }
    }
}

impl TryFrom<DecodingResult> for Samples {
    type Error = CogError;

    fn try_from(result: DecodingResult) -> Result<Self, Self::Error> {
        Ok(match result {
            DecodingResult::U8(v) => Samples::U8(v),
            DecodingResult::U16(v) => Samples::U16(v),
            DecodingResult::U32(v) => Samples::U32(v),
            DecodingResult::I8(v) => Samples::I8(v),
            DecodingResult::I16(v) => Samples::I16(v),
            DecodingResult::I32(v) => Samples::I32(v),
            DecodingResult::F16(v) => Samples::F32(v.into_iter().map(f32::from).collect()),
            DecodingResult::F32(v) => Samples::F32(v),
            DecodingResult::F64(v) => Samples::F64(v),
            other => {
                return Err(CogError::Unsupported(format!(
                    "sample type of {} samples",
                    decoding_result_name(&other)
                )))
            }
        })
    }
}

fn decoding_result_name(result: &DecodingResult) -> &'static str {
    match result {
        DecodingResult::U64(_) => "u64",
        DecodingResult::I64(_) => "i64",
        _ => "unknown",
    }
}

/// A decoded pixel window: one sample buffer per band, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterWindow {
    pub width: usize,
    pub height: usize,
    /// Band buffers, each `width * height` samples long
    pub bands: Vec<Samples>,
    /// Source sample index of each band, parallel to `bands`
    pub sample_indices: Vec<usize>,
    /// Value written for pixels outside the image
    pub fill_value: f64,
}

impl RasterWindow {
    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    /// Band decoded from the given source sample.
    pub fn band_for_sample(&self, sample: usize) -> Option<&Samples> {
        self.sample_indices
            .iter()
            .position(|&s| s == sample)
            .and_then(|i| self.bands.get(i))
    }

    /// Approximate heap size in bytes.
    pub fn size_bytes(&self) -> usize {
        self.bands
            .iter()
            .map(|b| {
                let width = match b.kind() {
                    SampleKind::U8 | SampleKind::I8 => 1,
                    SampleKind::U16 | SampleKind::I16 => 2,
                    SampleKind::U32 | SampleKind::I32 | SampleKind::F32 => 4,
                    SampleKind::F64 => 8,
                };
                b.len() * width
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filled_saturates_fill_into_type() {
        assert_eq!(Samples::filled(SampleKind::U8, 2, -999.0), Samples::U8(vec![0, 0]));
        assert_eq!(
            Samples::filled(SampleKind::I16, 1, -999.0),
            Samples::I16(vec![-999])
        );
        assert_eq!(
            Samples::filled(SampleKind::F32, 1, -999.0),
            Samples::F32(vec![-999.0])
        );
    }

    #[test]
    fn test_to_u8_shifts_sixteen_bit() {
        let samples = Samples::U16(vec![0, 255, 256, 65535]);
        let normalised: Vec<u8> = (0..4).map(|i| samples.to_u8(i)).collect();
        assert_eq!(normalised, vec![0, 0, 1, 255]);
    }

    #[test]
    fn test_copy_strided_picks_interleaved_sample() {
        let src = Samples::U8(vec![1, 2, 3, 4, 5, 6]);
        let mut dst = Samples::filled(SampleKind::U8, 3, 0.0);
        dst.copy_strided(1, &src, 1, 3, 2).unwrap();
        assert_eq!(dst, Samples::U8(vec![0, 2, 5]));
    }

    #[test]
    fn test_copy_strided_rejects_type_mismatch() {
        let src = Samples::U16(vec![1, 2]);
        let mut dst = Samples::filled(SampleKind::U8, 2, 0.0);
        assert!(dst.copy_strided(0, &src, 0, 1, 2).is_err());
    }

    #[test]
    fn test_band_for_sample() {
        let window = RasterWindow {
            width: 1,
            height: 1,
            bands: vec![Samples::F32(vec![0.1]), Samples::F32(vec![0.9])],
            sample_indices: vec![2, 5],
            fill_value: -999.0,
        };
        assert_eq!(window.band_for_sample(5), Some(&Samples::F32(vec![0.9])));
        assert_eq!(window.band_for_sample(0), None);
        assert_eq!(window.size_bytes(), 8);
    }

    #[test]
    fn test_sample_kind_from_tiff() {
        assert_eq!(SampleKind::from_tiff(16, 1), Some(SampleKind::U16));
        assert_eq!(SampleKind::from_tiff(32, 3), Some(SampleKind::F32));
        assert_eq!(SampleKind::from_tiff(12, 1), None);
    }
}
