//! Per-level image directory metadata.

use std::io::{Read, Seek};

use tiff::decoder::Decoder;
use tiff::tags::Tag;

use super::geokeys::{
    GeoKeys, GEO_ASCII_PARAMS_TAG, GEO_DOUBLE_PARAMS_TAG, GEO_KEY_DIRECTORY_TAG,
};
use super::samples::SampleKind;
use super::CogError;
use crate::tile::Extent;

/// TIFF compression code for LZW.
pub const COMPRESSION_LZW: u16 = 5;

/// ModelPixelScale tag.
pub const MODEL_PIXEL_SCALE_TAG: u16 = 33550;
/// ModelTiepoint tag.
pub const MODEL_TIEPOINT_TAG: u16 = 33922;

/// Photometric interpretations the RGB decode understands.
pub const PHOTOMETRIC_WHITE_IS_ZERO: u16 = 0;
pub const PHOTOMETRIC_BLACK_IS_ZERO: u16 = 1;
pub const PHOTOMETRIC_RGB: u16 = 2;

const SUBFILE_MASK_BIT: u32 = 4;

/// Metadata of one pyramid level, read once when the resource opens.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    /// Tile (or strip) width in pixels
    pub tile_width: u32,
    /// Tile height, or rows per strip for stripped images
    pub tile_height: u32,
    pub samples_per_pixel: u16,
    pub bits_per_sample: u16,
    /// TIFF SampleFormat (1 unsigned, 2 signed, 3 float)
    pub sample_format: u16,
    pub compression: u16,
    /// TIFF PlanarConfiguration (1 chunky, 2 planar)
    pub planar_configuration: u16,
    pub photometric: u16,
    /// ModelPixelScale `[sx, sy, sz]`
    pub pixel_scale: Option<[f64; 3]>,
    /// ModelTiepoint `[i, j, k, x, y, z]`
    pub tiepoint: Option<[f64; 6]>,
    pub geo_keys: GeoKeys,
    /// Transparency mask rather than a pyramid level
    pub is_mask: bool,
}

impl ImageInfo {
    /// Single-band, 8-bit, uncompressed level with no georeference.
    pub fn new(width: u32, height: u32, tile_width: u32, tile_height: u32) -> Self {
        Self {
            width,
            height,
            tile_width,
            tile_height,
            samples_per_pixel: 1,
            bits_per_sample: 8,
            sample_format: 1,
            compression: 1,
            planar_configuration: 1,
            photometric: PHOTOMETRIC_BLACK_IS_ZERO,
            pixel_scale: None,
            tiepoint: None,
            geo_keys: GeoKeys::default(),
            is_mask: false,
        }
    }

    /// Set the sample layout.
    pub fn with_samples(mut self, samples_per_pixel: u16, bits: u16, format: u16) -> Self {
        self.samples_per_pixel = samples_per_pixel;
        self.bits_per_sample = bits;
        self.sample_format = format;
        if samples_per_pixel >= 3 {
            self.photometric = PHOTOMETRIC_RGB;
        }
        self
    }

    /// Set the compression code.
    pub fn with_compression(mut self, compression: u16) -> Self {
        self.compression = compression;
        self
    }

    /// Set the pixel scale and the tiepoint's model coordinates.
    pub fn with_georeference(mut self, scale: (f64, f64), tiepoint: (f64, f64)) -> Self {
        self.pixel_scale = Some([scale.0, scale.1, 0.0]);
        self.tiepoint = Some([0.0, 0.0, 0.0, tiepoint.0, tiepoint.1, 0.0]);
        self
    }

    /// Set the GeoKeys.
    pub fn with_geo_keys(mut self, geo_keys: GeoKeys) -> Self {
        self.geo_keys = geo_keys;
        self
    }

    /// Read the current image directory of a decoder.
    pub fn from_decoder<R: Read + Seek>(decoder: &mut Decoder<R>) -> Result<Self, CogError> {
        let (width, height) = decoder.dimensions()?;
        let (tile_width, tile_height) = decoder.chunk_dimensions();

        let samples_per_pixel = find_u16(decoder, Tag::SamplesPerPixel)?.unwrap_or(1);
        let bits_per_sample = find_u16_vec(decoder, Tag::BitsPerSample)?
            .and_then(|v| v.first().copied())
            .unwrap_or(1);
        let sample_format = find_u16_vec(decoder, Tag::SampleFormat)?
            .and_then(|v| v.first().copied())
            .unwrap_or(1);
        let compression = find_u16(decoder, Tag::Compression)?.unwrap_or(1);
        let planar_configuration = find_u16(decoder, Tag::PlanarConfiguration)?.unwrap_or(1);
        let photometric =
            find_u16(decoder, Tag::PhotometricInterpretation)?.unwrap_or(PHOTOMETRIC_BLACK_IS_ZERO);
        let subfile_type = match decoder.find_tag(Tag::NewSubfileType)? {
            Some(value) => value.into_u32()?,
            None => 0,
        };

        let pixel_scale = find_f64_vec(decoder, MODEL_PIXEL_SCALE_TAG)?
            .filter(|v| v.len() >= 2)
            .map(|v| [v[0], v[1], v.get(2).copied().unwrap_or(0.0)]);
        let tiepoint = find_f64_vec(decoder, MODEL_TIEPOINT_TAG)?
            .filter(|v| v.len() >= 6)
            .map(|v| [v[0], v[1], v[2], v[3], v[4], v[5]]);

        let geo_keys = match find_u16_vec(decoder, Tag::from_u16_exhaustive(GEO_KEY_DIRECTORY_TAG))? {
            Some(directory) => {
                let doubles = find_f64_vec(decoder, GEO_DOUBLE_PARAMS_TAG)?.unwrap_or_default();
                let ascii = match decoder.find_tag(Tag::from_u16_exhaustive(GEO_ASCII_PARAMS_TAG))? {
                    Some(value) => value.into_string()?,
                    None => String::new(),
                };
                GeoKeys::parse(&directory, &doubles, &ascii)?
            }
            None => GeoKeys::default(),
        };

        Ok(Self {
            width,
            height,
            tile_width,
            tile_height,
            samples_per_pixel,
            bits_per_sample,
            sample_format,
            compression,
            planar_configuration,
            photometric,
            pixel_scale,
            tiepoint,
            geo_keys,
            is_mask: subfile_type & SUBFILE_MASK_BIT != 0,
        })
    }

    /// Numeric type of this level's samples.
    pub fn sample_kind(&self) -> Result<SampleKind, CogError> {
        SampleKind::from_tiff(self.bits_per_sample, self.sample_format).ok_or_else(|| {
            CogError::Unsupported(format!(
                "{}-bit samples with sample format {}",
                self.bits_per_sample, self.sample_format
            ))
        })
    }

    /// Whether decodes of this level go through the shared decode pool.
    pub fn uses_pool(&self) -> bool {
        self.compression == COMPRESSION_LZW
    }

    pub fn has_georeference(&self) -> bool {
        self.pixel_scale.is_some() && self.tiepoint.is_some()
    }

    /// Number of tile columns.
    pub fn tiles_across(&self) -> u32 {
        self.width.div_ceil(self.tile_width.max(1))
    }

    /// Number of tile rows.
    pub fn tiles_down(&self) -> u32 {
        self.height.div_ceil(self.tile_height.max(1))
    }

    /// Pixel size `(x, y)` in model units; `y` is negative for north-up images.
    ///
    /// Levels without their own georeference (overviews) derive it from the
    /// reference level, scaled by the size ratio.
    pub fn resolution(&self, reference: &ImageInfo) -> Result<(f64, f64), CogError> {
        if let Some(scale) = self.pixel_scale {
            return Ok((scale[0], -scale[1]));
        }
        let scale = reference.pixel_scale.ok_or(CogError::MissingGeoreference)?;
        Ok((
            scale[0] * reference.width as f64 / self.width as f64,
            -scale[1] * reference.height as f64 / self.height as f64,
        ))
    }

    /// Model coordinates of the tiepoint.
    pub fn origin(&self) -> Result<(f64, f64), CogError> {
        let tiepoint = self.tiepoint.ok_or(CogError::MissingGeoreference)?;
        Ok((tiepoint[3], tiepoint[4]))
    }

    /// Extent of the level in model coordinates.
    pub fn bounding_box(&self) -> Result<Extent, CogError> {
        let (x1, y1) = self.origin()?;
        let (rx, ry) = self.resolution(self)?;
        let x2 = x1 + rx * self.width as f64;
        let y2 = y1 + ry * self.height as f64;
        Ok(Extent::new(x1, y1, x2, y2))
    }
}

fn find_u16<R: Read + Seek>(decoder: &mut Decoder<R>, tag: Tag) -> Result<Option<u16>, CogError> {
    Ok(match decoder.find_tag(tag)? {
        Some(value) => Some(value.into_u16()?),
        None => None,
    })
}

fn find_u16_vec<R: Read + Seek>(
    decoder: &mut Decoder<R>,
    tag: Tag,
) -> Result<Option<Vec<u16>>, CogError> {
    Ok(match decoder.find_tag(tag)? {
        Some(value) => Some(value.into_u16_vec()?),
        None => None,
    })
}

fn find_f64_vec<R: Read + Seek>(
    decoder: &mut Decoder<R>,
    code: u16,
) -> Result<Option<Vec<f64>>, CogError> {
    Ok(match decoder.find_tag(Tag::from_u16_exhaustive(code))? {
        Some(value) => Some(value.into_f64_vec()?),
        None => None,
    })
}
