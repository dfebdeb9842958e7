//! GeoTIFF datasets decoded with the `tiff` crate.
//!
//! A dataset is a main file plus an optional `.ovr` sidecar. Their image
//! directories are concatenated into one finest-first pyramid when the
//! dataset opens; transparency masks are skipped.
//!
//! Window decodes run on the blocking pool. Each decode opens a fresh
//! decoder over the shared range readers, seeks to the level's directory and
//! copies the intersecting tiles (or strips) into planar band buffers.

use std::io::{Read, Seek};
use std::sync::Arc;

use tiff::decoder::{Decoder, Limits};
use tiff::tags::Tag;
use tokio::runtime::Handle;

use super::image::{PHOTOMETRIC_BLACK_IS_ZERO, PHOTOMETRIC_RGB, PHOTOMETRIC_WHITE_IS_ZERO};
use super::range::{BlockingCursor, RangeReader};
use super::samples::{RasterWindow, Samples};
use super::{CogError, CogResource, ImageInfo};
use crate::tile::PixelWindow;
use crate::BoxFuture;

/// Location of a pyramid level: which file and which directory in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LevelRef {
    source: usize,
    ifd: usize,
}

/// What a window decode produces.
#[derive(Debug, Clone, PartialEq)]
enum WindowRequest {
    /// Three colour bands, zero outside the image
    Rgb,
    /// The listed samples (all when `None`), `fill_value` outside the image
    Rasters {
        samples: Option<Vec<usize>>,
        fill_value: f64,
    },
}

/// An opened COG: main file, optional overview file and their pyramid.
pub struct CogDataset {
    key: String,
    sources: Vec<Arc<dyn RangeReader>>,
    levels: Vec<LevelRef>,
    images: Vec<ImageInfo>,
    /// Byte range of every tile or strip, per level
    chunks: Vec<Vec<(u64, u64)>>,
}

impl std::fmt::Debug for CogDataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CogDataset")
            .field("key", &self.key)
            .field("sources", &self.sources.len())
            .field("levels", &self.levels.len())
            .finish()
    }
}

impl CogDataset {
    /// Open a dataset and read the metadata of every pyramid level.
    pub async fn open(
        key: impl Into<String>,
        main: Arc<dyn RangeReader>,
        overviews: Option<Arc<dyn RangeReader>>,
    ) -> Result<Self, CogError> {
        let key = key.into();
        let mut sources = vec![main];
        sources.extend(overviews);

        let handle = Handle::current();
        let readers = sources.clone();
        let (levels, images, chunks) =
            tokio::task::spawn_blocking(move || read_pyramid(&readers, &handle)).await??;

        if images.is_empty() {
            return Err(CogError::Unsupported(format!("{} contains no images", key)));
        }

        tracing::debug!(
            key = %key,
            levels = images.len(),
            width = images[0].width,
            height = images[0].height,
            "Opened COG dataset"
        );

        Ok(Self {
            key,
            sources,
            levels,
            images,
            chunks,
        })
    }

    fn location(&self, level: usize) -> Result<LevelRef, CogError> {
        self.levels.get(level).copied().ok_or(CogError::InvalidLevel {
            level,
            levels: self.levels.len(),
        })
    }

    fn read_window(
        &self,
        level: usize,
        window: PixelWindow,
        request: WindowRequest,
    ) -> BoxFuture<'_, Result<RasterWindow, CogError>> {
        Box::pin(async move {
            let location = self.location(level)?;
            let info = self.images[level].clone();
            let reader = Arc::clone(&self.sources[location.source]);
            let handle = Handle::current();

            tokio::task::spawn_blocking(move || {
                let mut decoder = open_decoder(reader, &handle)?;
                decoder.seek_to_image(location.ifd)?;
                match request {
                    WindowRequest::Rgb => decode_rgb(&mut decoder, &info, window),
                    WindowRequest::Rasters {
                        samples,
                        fill_value,
                    } => {
                        let samples = samples
                            .unwrap_or_else(|| (0..info.samples_per_pixel as usize).collect());
                        decode_window(&mut decoder, &info, window, &samples, fill_value)
                    }
                }
            })
            .await?
        })
    }
}

impl CogResource for CogDataset {
    fn key(&self) -> &str {
        &self.key
    }

    fn images(&self) -> &[ImageInfo] {
        &self.images
    }

    fn has_overviews(&self) -> bool {
        self.sources.len() > 1
    }

    fn read_rgb(
        &self,
        level: usize,
        window: PixelWindow,
    ) -> BoxFuture<'_, Result<RasterWindow, CogError>> {
        self.read_window(level, window, WindowRequest::Rgb)
    }

    fn read_rasters(
        &self,
        level: usize,
        window: PixelWindow,
        samples: Option<Vec<usize>>,
        fill_value: f64,
    ) -> BoxFuture<'_, Result<RasterWindow, CogError>> {
        self.read_window(
            level,
            window,
            WindowRequest::Rasters {
                samples,
                fill_value,
            },
        )
    }

    fn prefetch(&self, level: usize, window: PixelWindow) -> BoxFuture<'_, Result<(), CogError>> {
        Box::pin(async move {
            let location = self.location(level)?;
            let reader = &self.sources[location.source];
            let table = &self.chunks[level];
            let reads = chunk_indices(&self.images[level], window)
                .into_iter()
                .filter_map(|index| table.get(index).copied())
                .filter(|&(_, length)| length > 0)
                .map(|(offset, length)| reader.read_range(offset, length));
            futures::future::try_join_all(reads).await?;
            Ok(())
        })
    }
}

fn open_decoder(
    reader: Arc<dyn RangeReader>,
    handle: &Handle,
) -> Result<Decoder<BlockingCursor>, CogError> {
    let cursor = BlockingCursor::new(reader, handle.clone());
    Ok(Decoder::new(cursor)?.with_limits(Limits::unlimited()))
}

type Pyramid = (Vec<LevelRef>, Vec<ImageInfo>, Vec<Vec<(u64, u64)>>);

fn read_pyramid(sources: &[Arc<dyn RangeReader>], handle: &Handle) -> Result<Pyramid, CogError> {
    let mut levels = Vec::new();
    let mut images = Vec::new();
    let mut chunks = Vec::new();

    for (source, reader) in sources.iter().enumerate() {
        let mut decoder = open_decoder(Arc::clone(reader), handle)?;
        let mut ifd = 0;
        loop {
            let info = ImageInfo::from_decoder(&mut decoder)?;
            if info.is_mask {
                tracing::debug!(url = reader.url(), ifd, "Skipping mask image");
            } else {
                levels.push(LevelRef { source, ifd });
                images.push(info);
                chunks.push(chunk_table(&mut decoder)?);
            }
            if !decoder.more_images() {
                break;
            }
            decoder.next_image()?;
            ifd += 1;
        }
    }

    Ok((levels, images, chunks))
}

/// Byte ranges of the tiles (or strips) of the current image directory.
fn chunk_table<R: Read + Seek>(decoder: &mut Decoder<R>) -> Result<Vec<(u64, u64)>, CogError> {
    let (offsets, counts) = match decoder.find_tag(Tag::TileOffsets)? {
        Some(offsets) => (offsets, decoder.find_tag(Tag::TileByteCounts)?),
        None => match decoder.find_tag(Tag::StripOffsets)? {
            Some(offsets) => (offsets, decoder.find_tag(Tag::StripByteCounts)?),
            None => return Ok(Vec::new()),
        },
    };
    let Some(counts) = counts else {
        return Ok(Vec::new());
    };
    Ok(offsets
        .into_u64_vec()?
        .into_iter()
        .zip(counts.into_u64_vec()?)
        .collect())
}

/// Chunk indices a window touches, every plane included.
fn chunk_indices(info: &ImageInfo, window: PixelWindow) -> Vec<usize> {
    let Some(clip) = window.clip(info.width, info.height) else {
        return Vec::new();
    };
    let tile_width = info.tile_width.max(1) as i64;
    let tile_height = info.tile_height.max(1) as i64;
    let across = info.tiles_across() as i64;
    let down = info.tiles_down() as i64;
    let planes = if info.planar_configuration == 2 {
        info.samples_per_pixel as i64
    } else {
        1
    };

    let mut indices = Vec::new();
    for plane in 0..planes {
        for row in clip.y0 / tile_height..=(clip.y1 - 1) / tile_height {
            for col in clip.x0 / tile_width..=(clip.x1 - 1) / tile_width {
                indices.push((plane * across * down + row * across + col) as usize);
            }
        }
    }
    indices
}

/// Decode three colour bands, replicating grey images into all three.
fn decode_rgb<R: Read + Seek>(
    decoder: &mut Decoder<R>,
    info: &ImageInfo,
    window: PixelWindow,
) -> Result<RasterWindow, CogError> {
    match (info.photometric, info.samples_per_pixel) {
        (PHOTOMETRIC_RGB, spp) if spp >= 3 => decode_window(decoder, info, window, &[0, 1, 2], 0.0),
        (PHOTOMETRIC_BLACK_IS_ZERO, _) => {
            let mut grey = decode_window(decoder, info, window, &[0], 0.0)?;
            let band = grey.bands.remove(0);
            grey.bands = vec![band.clone(), band.clone(), band];
            grey.sample_indices = vec![0, 0, 0];
            Ok(grey)
        }
        (PHOTOMETRIC_WHITE_IS_ZERO, _) => Err(CogError::Unsupported(
            "RGB decode of WhiteIsZero greyscale".to_string(),
        )),
        (photometric, spp) => Err(CogError::Unsupported(format!(
            "RGB decode of photometric interpretation {} with {} samples",
            photometric, spp
        ))),
    }
}

/// A decoded tile or strip.
struct Chunk {
    samples: Samples,
    /// Pixel position of the chunk's top-left corner
    x: i64,
    y: i64,
    width: i64,
    height: i64,
    /// Interleaved samples per pixel in `samples`
    stride: usize,
}

fn read_chunk<R: Read + Seek>(
    decoder: &mut Decoder<R>,
    index: u32,
    x: i64,
    y: i64,
    stride: usize,
) -> Result<Chunk, CogError> {
    let (width, height) = decoder.chunk_data_dimensions(index);
    let samples = Samples::try_from(decoder.read_chunk(index)?)?;
    let expected = width as usize * height as usize * stride;
    if samples.len() != expected {
        return Err(CogError::Tiff(format!(
            "chunk {} decoded {} samples, expected {}",
            index,
            samples.len(),
            expected
        )));
    }
    Ok(Chunk {
        samples,
        x,
        y,
        width: width as i64,
        height: height as i64,
        stride,
    })
}

/// Copy one sample of `chunk` into the part of `band` it overlaps.
fn copy_chunk(
    band: &mut Samples,
    chunk: &Chunk,
    sample_offset: usize,
    clip: PixelWindow,
    window: PixelWindow,
) -> Result<(), CogError> {
    let x_start = clip.x0.max(chunk.x);
    let x_end = clip.x1.min(chunk.x + chunk.width);
    let y_start = clip.y0.max(chunk.y);
    let y_end = clip.y1.min(chunk.y + chunk.height);
    if x_start >= x_end || y_start >= y_end {
        return Ok(());
    }

    let out_width = window.width();
    let count = (x_end - x_start) as usize;
    for y in y_start..y_end {
        let src_pixel = ((y - chunk.y) * chunk.width + (x_start - chunk.x)) as usize;
        let dst = (y - window.y0) as usize * out_width + (x_start - window.x0) as usize;
        band.copy_strided(
            dst,
            &chunk.samples,
            src_pixel * chunk.stride + sample_offset,
            chunk.stride,
            count,
        )?;
    }
    Ok(())
}

/// Decode the given samples of a window; pixels outside the image keep
/// `fill_value`.
fn decode_window<R: Read + Seek>(
    decoder: &mut Decoder<R>,
    info: &ImageInfo,
    window: PixelWindow,
    samples: &[usize],
    fill_value: f64,
) -> Result<RasterWindow, CogError> {
    let samples_per_pixel = info.samples_per_pixel as usize;
    if let Some(&sample) = samples.iter().find(|&&s| s >= samples_per_pixel) {
        return Err(CogError::InvalidSample {
            sample,
            samples_per_pixel,
        });
    }

    let kind = info.sample_kind()?;
    let mut bands: Vec<Samples> = samples
        .iter()
        .map(|_| Samples::filled(kind, window.pixel_count(), fill_value))
        .collect();

    if let Some(clip) = window.clip(info.width, info.height) {
        let tile_width = info.tile_width.max(1) as i64;
        let tile_height = info.tile_height.max(1) as i64;
        let across = info.tiles_across() as i64;
        let down = info.tiles_down() as i64;
        let planar = info.planar_configuration == 2;

        for row in clip.y0 / tile_height..=(clip.y1 - 1) / tile_height {
            for col in clip.x0 / tile_width..=(clip.x1 - 1) / tile_width {
                let (x, y) = (col * tile_width, row * tile_height);
                if planar {
                    for (band, &sample) in bands.iter_mut().zip(samples) {
                        let index = sample as i64 * across * down + row * across + col;
                        let chunk = read_chunk(decoder, index as u32, x, y, 1)?;
                        copy_chunk(band, &chunk, 0, clip, window)?;
                    }
                } else {
                    let index = row * across + col;
                    let chunk = read_chunk(decoder, index as u32, x, y, samples_per_pixel)?;
                    for (band, &sample) in bands.iter_mut().zip(samples) {
                        copy_chunk(band, &chunk, sample, clip, window)?;
                    }
                }
            }
        }
    }

    Ok(RasterWindow {
        width: window.width(),
        height: window.height(),
        bands,
        sample_indices: samples.to_vec(),
        fill_value,
    })
}
