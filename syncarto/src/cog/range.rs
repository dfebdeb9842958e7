//! Byte-range access to remote and in-memory COG files.
//!
//! ```text
//! tiff Decoder ──► BlockingCursor ──► CachedRangeReader ──► HttpRangeReader
//!  (Read + Seek,    (block_on on       (moka block cache,     (Range requests)
//!   blocking pool)   the runtime)       coalesced loads)
//! ```
//!
//! The decoder is synchronous, so it runs on the blocking pool and pulls
//! bytes through [`BlockingCursor`], which drives the async readers with the
//! runtime handle it was created with.

use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use moka::future::Cache as MokaCache;
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, RANGE};
use reqwest::StatusCode;
use tokio::runtime::Handle;

use super::CogError;
use crate::BoxFuture;

/// Default block size for the range block cache (64 KiB).
pub const DEFAULT_BLOCK_SIZE: u64 = 64 * 1024;

/// Default memory budget of the range block cache (256 MiB).
pub const DEFAULT_BLOCK_CACHE_BYTES: u64 = 256 * 1024 * 1024;

/// Random access to the bytes of one file.
pub trait RangeReader: Send + Sync {
    /// Location of the file, used in errors and cache keys.
    fn url(&self) -> &str;

    /// Total file size in bytes.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read exactly `length` bytes starting at `offset`.
    fn read_range(&self, offset: u64, length: u64) -> BoxFuture<'_, Result<Bytes, CogError>>;
}

fn check_bounds(url: &str, offset: u64, length: u64, size: u64) -> Result<(), CogError> {
    match offset.checked_add(length) {
        Some(end) if end <= size => Ok(()),
        _ => Err(CogError::RangeOutOfBounds {
            url: url.to_string(),
            offset,
            length,
            size,
        }),
    }
}

// =============================================================================
// HTTP
// =============================================================================

/// Range reader over HTTP using `Range` requests.
#[derive(Debug, Clone)]
pub struct HttpRangeReader {
    client: reqwest::Client,
    url: String,
    len: u64,
}

impl HttpRangeReader {
    /// Connect to a remote file and determine its size.
    ///
    /// Uses the `Content-Length` of a HEAD request, falling back to the
    /// `Content-Range` total of a one-byte range request for servers that do
    /// not answer HEAD.
    pub async fn connect(client: reqwest::Client, url: impl Into<String>) -> Result<Self, CogError> {
        let url = url.into();
        let len = match Self::head_length(&client, &url).await {
            Some(len) => len,
            None => Self::probe_length(&client, &url).await?,
        };
        tracing::debug!(url = %url, size = len, "Connected HTTP range reader");
        Ok(Self { client, url, len })
    }

    async fn head_length(client: &reqwest::Client, url: &str) -> Option<u64> {
        let response = client.head(url).send().await.ok()?;
        if !response.status().is_success() {
            return None;
        }
        response
            .headers()
            .get(CONTENT_LENGTH)?
            .to_str()
            .ok()?
            .parse::<u64>()
            .ok()
            .filter(|&len| len > 0)
    }

    async fn probe_length(client: &reqwest::Client, url: &str) -> Result<u64, CogError> {
        let response = client
            .get(url)
            .header(RANGE, "bytes=0-0")
            .send()
            .await
            .map_err(|e| http_error(url, e))?;
        if !response.status().is_success() {
            return Err(CogError::Http {
                url: url.to_string(),
                message: format!("HTTP {}", response.status()),
            });
        }
        response
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range_total)
            .ok_or_else(|| CogError::UnknownLength(url.to_string()))
    }
}

/// Total size from a `Content-Range: bytes 0-0/12345` header.
fn parse_content_range_total(value: &str) -> Option<u64> {
    value.rsplit('/').next()?.trim().parse().ok()
}

fn http_error(url: &str, e: reqwest::Error) -> CogError {
    CogError::Http {
        url: url.to_string(),
        message: e.to_string(),
    }
}

impl RangeReader for HttpRangeReader {
    fn url(&self) -> &str {
        &self.url
    }

    fn len(&self) -> u64 {
        self.len
    }

    fn read_range(&self, offset: u64, length: u64) -> BoxFuture<'_, Result<Bytes, CogError>> {
        Box::pin(async move {
            check_bounds(&self.url, offset, length, self.len)?;
            if length == 0 {
                return Ok(Bytes::new());
            }

            let range = format!("bytes={}-{}", offset, offset + length - 1);
            let response = self
                .client
                .get(&self.url)
                .header(RANGE, range)
                .send()
                .await
                .map_err(|e| http_error(&self.url, e))?;

            let status = response.status();
            let body = response
                .bytes()
                .await
                .map_err(|e| http_error(&self.url, e))?;

            let data = match status {
                StatusCode::PARTIAL_CONTENT => body,
                // Server ignored the range and sent the whole file
                StatusCode::OK if body.len() as u64 >= offset + length => {
                    body.slice(offset as usize..(offset + length) as usize)
                }
                _ => {
                    return Err(CogError::Http {
                        url: self.url.clone(),
                        message: format!("HTTP {} for range {}+{}", status, offset, length),
                    })
                }
            };

            if data.len() as u64 != length {
                return Err(CogError::Http {
                    url: self.url.clone(),
                    message: format!("expected {} bytes, received {}", length, data.len()),
                });
            }
            Ok(data)
        })
    }
}

// =============================================================================
// In-memory
// =============================================================================

/// Range reader over bytes already in memory.
#[derive(Debug, Clone)]
pub struct MemoryRangeReader {
    url: String,
    data: Bytes,
}

impl MemoryRangeReader {
    pub fn new(url: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            url: url.into(),
            data: data.into(),
        }
    }
}

impl RangeReader for MemoryRangeReader {
    fn url(&self) -> &str {
        &self.url
    }

    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_range(&self, offset: u64, length: u64) -> BoxFuture<'_, Result<Bytes, CogError>> {
        Box::pin(async move {
            check_bounds(&self.url, offset, length, self.len())?;
            Ok(self.data.slice(offset as usize..(offset + length) as usize))
        })
    }
}

// =============================================================================
// Block cache
// =============================================================================

type BlockKey = (Arc<str>, u64);

/// Memory-bounded cache of fixed-size file blocks, shared by every reader of
/// a session.
///
/// Concurrent loads of the same block are coalesced by moka.
#[derive(Clone)]
pub struct BlockCache {
    cache: MokaCache<BlockKey, Bytes>,
    block_size: u64,
    max_size_bytes: u64,
}

impl BlockCache {
    /// Create a cache holding at most `max_size_bytes` of `block_size` blocks.
    pub fn new(max_size_bytes: u64, block_size: u64) -> Self {
        let cache = MokaCache::builder()
            .weigher(|_key: &BlockKey, value: &Bytes| -> u32 {
                value.len().min(u32::MAX as usize) as u32
            })
            .max_capacity(max_size_bytes)
            .build();

        Self {
            cache,
            block_size: block_size.max(1),
            max_size_bytes,
        }
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_bytes
    }

    /// Number of cached blocks.
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Wrap a reader so its reads go through this cache.
    pub fn wrap(&self, inner: Arc<dyn RangeReader>) -> Arc<dyn RangeReader> {
        Arc::new(CachedRangeReader {
            key: Arc::from(inner.url()),
            inner,
            cache: self.clone(),
        })
    }
}

impl Default for BlockCache {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCK_CACHE_BYTES, DEFAULT_BLOCK_SIZE)
    }
}

/// Range reader that serves reads from whole cached blocks.
pub struct CachedRangeReader {
    key: Arc<str>,
    inner: Arc<dyn RangeReader>,
    cache: BlockCache,
}

impl CachedRangeReader {
    async fn block(&self, index: u64) -> Result<Bytes, CogError> {
        let block_size = self.cache.block_size;
        let start = index * block_size;
        let length = block_size.min(self.inner.len() - start);
        self.cache
            .cache
            .try_get_with((self.key.clone(), index), async {
                self.inner.read_range(start, length).await
            })
            .await
            .map_err(|e: Arc<CogError>| (*e).clone())
    }
}

impl RangeReader for CachedRangeReader {
    fn url(&self) -> &str {
        self.inner.url()
    }

    fn len(&self) -> u64 {
        self.inner.len()
    }

    fn read_range(&self, offset: u64, length: u64) -> BoxFuture<'_, Result<Bytes, CogError>> {
        Box::pin(async move {
            check_bounds(self.inner.url(), offset, length, self.inner.len())?;
            if length == 0 {
                return Ok(Bytes::new());
            }

            let block_size = self.cache.block_size;
            let end = offset + length;
            let first = offset / block_size;
            let last = (end - 1) / block_size;

            if first == last {
                let block = self.block(first).await?;
                let start = (offset - first * block_size) as usize;
                return Ok(block.slice(start..start + length as usize));
            }

            let blocks =
                futures::future::try_join_all((first..=last).map(|index| self.block(index))).await?;
            let mut out = BytesMut::with_capacity(length as usize);
            for (index, block) in (first..=last).zip(blocks) {
                let block_start = index * block_size;
                let from = offset.saturating_sub(block_start) as usize;
                let to = (end - block_start).min(block.len() as u64) as usize;
                out.extend_from_slice(&block[from..to]);
            }
            Ok(out.freeze())
        })
    }
}

// =============================================================================
// Blocking cursor
// =============================================================================

/// Synchronous `Read + Seek` view of a range reader.
///
/// Must only be used from a blocking thread (for example inside
/// `tokio::task::spawn_blocking`), never from an async task.
pub struct BlockingCursor {
    reader: Arc<dyn RangeReader>,
    handle: Handle,
    position: u64,
}

impl BlockingCursor {
    pub fn new(reader: Arc<dyn RangeReader>, handle: Handle) -> Self {
        Self {
            reader,
            handle,
            position: 0,
        }
    }
}

impl Read for BlockingCursor {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.reader.len().saturating_sub(self.position);
        let length = remaining.min(buf.len() as u64);
        if length == 0 {
            return Ok(0);
        }
        let data = self
            .handle
            .block_on(self.reader.read_range(self.position, length))?;
        buf[..data.len()].copy_from_slice(&data);
        self.position += data.len() as u64;
        Ok(data.len())
    }
}

impl Seek for BlockingCursor {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => self.reader.len().checked_add_signed(delta),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
        };
        match target {
            Some(position) => {
                self.position = position;
                Ok(position)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of file",
            )),
        }
    }
}
