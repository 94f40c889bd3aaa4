//! Range-based reader interface for raster files
//!
//! COGs are laid out so a reader only needs the header, the IFDs and the chunks it touches.
//! [`RangeReader`] abstracts "give me bytes `offset..offset+length`" over local files, HTTP
//! (Range requests) and in-memory buffers; [`RangeCursor`] adapts it to `Read + Seek` for the
//! `tiff` decoder, fetching fixed-size blocks through a shared [`BlockCache`].

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use lru::LruCache;
use tracing::trace;

use crate::error::AnyResult;

/// Bytes fetched per block read.
pub const BLOCK_SIZE: u64 = 64 * 1024;

/// Default number of blocks kept per source.
pub const DEFAULT_BLOCK_CAPACITY: usize = 256;

/// Trait for reading byte ranges from any source
pub trait RangeReader: Send + Sync {
    /// Read a range of bytes from the source. May return fewer bytes at the end of the source.
    fn read_range(&self, offset: u64, length: usize) -> AnyResult<Vec<u8>>;

    /// Total size of the source in bytes, `None` when the server did not say.
    fn size(&self) -> Option<u64>;

    /// Get a human-readable identifier for this source (for logging/errors)
    fn identifier(&self) -> &str;

    /// Check if this is a local file (fast random access) or remote (expensive reads)
    fn is_local(&self) -> bool {
        let id = self.identifier();
        !id.starts_with("http://") && !id.starts_with("https://")
    }
}

/// Local file range reader
pub struct LocalRangeReader {
    path: PathBuf,
    size: u64,
}

impl LocalRangeReader {
    pub fn new(path: impl AsRef<Path>) -> AnyResult<Self> {
        let path = path.as_ref().to_path_buf();
        let metadata = std::fs::metadata(&path)?;
        Ok(Self {
            path,
            size: metadata.len(),
        })
    }
}

impl RangeReader for LocalRangeReader {
    fn read_range(&self, offset: u64, length: usize) -> AnyResult<Vec<u8>> {
        let length = clamp_length(offset, length, self.size);
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(offset))?;
        let mut buffer = vec![0u8; length];
        file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    fn size(&self) -> Option<u64> {
        Some(self.size)
    }

    fn identifier(&self) -> &str {
        self.path.to_str().unwrap_or("<invalid path>")
    }
}

/// HTTP range reader for remote files
/// Uses the blocking reqwest client; callers run it on blocking threads
pub struct HttpRangeReader {
    url: String,
    size: Option<u64>,
    client: reqwest::blocking::Client,
}

impl HttpRangeReader {
    pub fn new(url: &str) -> AnyResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        // Get file size via HEAD request
        let response = client.head(url).send()?;
        if !response.status().is_success() {
            return Err(format!("HTTP HEAD failed: {}", response.status()).into());
        }
        let size = response
            .headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());

        Ok(Self {
            url: url.to_string(),
            size,
            client,
        })
    }
}

impl RangeReader for HttpRangeReader {
    fn read_range(&self, offset: u64, length: usize) -> AnyResult<Vec<u8>> {
        let length = self.size.map_or(length, |size| clamp_length(offset, length, size));
        if length == 0 {
            return Ok(Vec::new());
        }
        let range = format!("bytes={}-{}", offset, offset + length as u64 - 1);
        let response = self
            .client
            .get(&self.url)
            .header(reqwest::header::RANGE, range)
            .send()?;

        if !response.status().is_success() {
            return Err(format!("HTTP request failed: {}", response.status()).into());
        }

        Ok(response.bytes()?.to_vec())
    }

    fn size(&self) -> Option<u64> {
        self.size
    }

    fn identifier(&self) -> &str {
        &self.url
    }
}

/// In-memory range reader
pub struct MemoryRangeReader {
    id: String,
    bytes: Arc<[u8]>,
}

impl MemoryRangeReader {
    pub fn new(id: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            id: id.into(),
            bytes: bytes.into(),
        }
    }
}

impl RangeReader for MemoryRangeReader {
    fn read_range(&self, offset: u64, length: usize) -> AnyResult<Vec<u8>> {
        let length = clamp_length(offset, length, self.bytes.len() as u64);
        let start = usize::try_from(offset)?;
        Ok(self.bytes.get(start..start + length).unwrap_or_default().to_vec())
    }

    fn size(&self) -> Option<u64> {
        Some(self.bytes.len() as u64)
    }

    fn identifier(&self) -> &str {
        &self.id
    }

    fn is_local(&self) -> bool {
        true
    }
}

fn clamp_length(offset: u64, length: usize, size: u64) -> usize {
    let available = size.saturating_sub(offset);
    length.min(usize::try_from(available).unwrap_or(usize::MAX))
}

/// Create a range reader from a path or URL
pub fn create_range_reader(source: &str) -> AnyResult<Arc<dyn RangeReader>> {
    match url::Url::parse(source) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(Arc::new(HttpRangeReader::new(source)?)),
        Ok(url) if url.scheme() == "file" => {
            let path = url.to_file_path().map_err(|()| format!("invalid file URL: {source}"))?;
            Ok(Arc::new(LocalRangeReader::new(path)?))
        }
        Ok(url) if url.scheme().len() > 1 => Err(format!("unsupported URL scheme: {}", url.scheme()).into()),
        // relative paths and drive letters
        _ => Ok(Arc::new(LocalRangeReader::new(source)?)),
    }
}

/// Blocks of one source, shared by every cursor over it.
pub struct BlockCache {
    reader: Arc<dyn RangeReader>,
    blocks: Mutex<LruCache<u64, Arc<Vec<u8>>>>,
}

impl BlockCache {
    pub fn new(reader: Arc<dyn RangeReader>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            reader,
            blocks: Mutex::new(LruCache::new(capacity)),
        }
    }

    #[must_use]
    pub fn reader(&self) -> &Arc<dyn RangeReader> {
        &self.reader
    }

    fn block(&self, index: u64) -> AnyResult<Arc<Vec<u8>>> {
        if let Some(block) = self.blocks.lock().unwrap_or_else(PoisonError::into_inner).get(&index) {
            return Ok(Arc::clone(block));
        }
        trace!(source = self.reader.identifier(), index, "fetching block");
        let block = Arc::new(self.reader.read_range(index * BLOCK_SIZE, BLOCK_SIZE as usize)?);
        self.blocks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .put(index, Arc::clone(&block));
        Ok(block)
    }
}

/// `Read + Seek` view of a [`BlockCache`].
pub struct RangeCursor {
    cache: Arc<BlockCache>,
    position: u64,
}

impl RangeCursor {
    pub fn new(cache: Arc<BlockCache>) -> Self {
        Self { cache, position: 0 }
    }
}

impl Read for RangeCursor {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.cache.reader.size().is_some_and(|size| self.position >= size) {
            return Ok(0);
        }
        let block = self.cache.block(self.position / BLOCK_SIZE).map_err(io::Error::other)?;
        let start = (self.position % BLOCK_SIZE) as usize;
        let Some(available) = block.get(start..) else {
            return Ok(0);
        };
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.position += n as u64;
        Ok(n)
    }
}

impl Seek for RangeCursor {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
            SeekFrom::End(delta) => {
                let size = self.cache.reader.size().ok_or_else(|| {
                    io::Error::new(io::ErrorKind::Unsupported, "source size is unknown")
                })?;
                size.checked_add_signed(delta)
            }
        };
        self.position = target.ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "seek before start"))?;
        Ok(self.position)
    }
}
