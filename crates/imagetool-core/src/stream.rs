//! Lazy chunked byte streams.
//!
//! Every byte source (local file, HTTP response body, registry download) is
//! exposed through the narrow [`ChunkSource`] interface. [`ChunkReader`] adds
//! the progress callback and the cancellation check on top, and is what the
//! transfer code consumes. Streams are forward-only: re-reading requires
//! opening the source again.

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::{BoxStream, Stream, StreamExt};
use tokio::io::AsyncReadExt;
use url::Url;

use crate::cancel::CancelFlag;
use crate::checksum::ChecksumAlgorithm;
use crate::error::{Error, Result};
use crate::progress::ProgressObserver;

/// Default block size for file reads (1 MiB).
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Boxed stream of chunks, as handed to registry uploads.
pub type ChunkStream = BoxStream<'static, Result<Bytes>>;

/// A finite, forward-only producer of byte chunks.
#[async_trait]
pub trait ChunkSource: Send {
    /// Returns the next chunk, or `None` once the source is exhausted.
    async fn next_chunk(&mut self) -> Result<Option<Bytes>>;
}

/// Opens the chunk source behind a location URI.
#[async_trait]
pub trait SourceOpener: Send + Sync {
    /// Opens `location` for reading.
    async fn open(&self, location: &Url) -> Result<Box<dyn ChunkSource>>;
}

/// Reads a local file in fixed-size blocks.
///
/// A short or empty read marks the end of the stream.
#[derive(Debug)]
pub struct FileSource {
    file: tokio::fs::File,
    path: PathBuf,
    chunk_size: usize,
    done: bool,
}

impl FileSource {
    /// Opens a file with the default chunk size.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| Error::io(&path, e))?;
        Ok(Self {
            file,
            path,
            chunk_size: DEFAULT_CHUNK_SIZE,
            done: false,
        })
    }

    /// Sets the block size. Zero is treated as one byte.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }
}

#[async_trait]
impl ChunkSource for FileSource {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        if self.done {
            return Ok(None);
        }

        let mut buf = BytesMut::zeroed(self.chunk_size);
        let mut filled = 0;
        while filled < self.chunk_size {
            let n = self
                .file
                .read(&mut buf[filled..])
                .await
                .map_err(|e| Error::io(&self.path, e))?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        if filled < self.chunk_size {
            self.done = true;
        }
        if filled == 0 {
            return Ok(None);
        }
        buf.truncate(filled);
        Ok(Some(buf.freeze()))
    }
}

/// Source over an iterator of pre-chunked buffers.
#[derive(Debug)]
pub struct IterSource<I> {
    iter: I,
}

impl<I> IterSource<I>
where
    I: Iterator<Item = Bytes> + Send,
{
    /// Wraps an iterator.
    pub const fn new(iter: I) -> Self {
        Self { iter }
    }
}

#[async_trait]
impl<I> ChunkSource for IterSource<I>
where
    I: Iterator<Item = Bytes> + Send,
{
    async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        Ok(self.iter.next())
    }
}

/// Source over an async stream of chunks, e.g. an HTTP response body.
pub struct StreamSource {
    stream: ChunkStream,
}

impl StreamSource {
    /// Wraps a stream.
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes>> + Send + 'static,
    {
        Self {
            stream: stream.boxed(),
        }
    }
}

impl fmt::Debug for StreamSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSource").finish_non_exhaustive()
    }
}

#[async_trait]
impl ChunkSource for StreamSource {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        self.stream.next().await.transpose()
    }
}

/// Opens `file://` locations.
#[derive(Debug, Clone)]
pub struct LocalOpener {
    chunk_size: usize,
}

impl Default for LocalOpener {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl LocalOpener {
    /// Creates an opener with the default chunk size.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the block size used for file reads.
    #[must_use]
    pub const fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Resolves a `file://` location to a local path.
    ///
    /// # Errors
    ///
    /// Returns an error for other schemes or paths that are not absolute.
    pub fn local_path(location: &Url) -> Result<PathBuf> {
        if location.scheme() != "file" {
            return Err(Error::UnsupportedScheme {
                scheme: location.scheme().to_string(),
                location: location.to_string(),
            });
        }
        location
            .to_file_path()
            .map_err(|()| Error::InvalidLocation {
                location: location.to_string(),
                reason: "not a local file path".to_string(),
            })
    }
}

#[async_trait]
impl SourceOpener for LocalOpener {
    async fn open(&self, location: &Url) -> Result<Box<dyn ChunkSource>> {
        let path = Self::local_path(location)?;
        let source = FileSource::open(path).await?.with_chunk_size(self.chunk_size);
        Ok(Box::new(source))
    }
}

/// Uniform consumer side of a [`ChunkSource`].
///
/// Checks the cancellation flag before every read and hands each chunk to the
/// progress observer before yielding it.
pub struct ChunkReader {
    source: Box<dyn ChunkSource>,
    observer: Option<Box<dyn ProgressObserver>>,
    cancel: CancelFlag,
    finished: bool,
}

impl ChunkReader {
    /// Creates a reader without progress reporting.
    #[must_use]
    pub fn new(source: Box<dyn ChunkSource>) -> Self {
        Self {
            source,
            observer: None,
            cancel: CancelFlag::new(),
            finished: false,
        }
    }

    /// Registers the progress observer.
    #[must_use]
    pub fn with_observer(mut self, observer: Box<dyn ProgressObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Registers the cancellation flag.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Returns the next chunk, or `None` at end of stream.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Interrupted`] once cancellation was requested, or the
    /// source's read error.
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        if self.finished {
            return Ok(None);
        }
        self.cancel.check()?;

        match self.source.next_chunk().await? {
            Some(chunk) => {
                if let Some(observer) = self.observer.as_mut() {
                    observer.observe(&chunk);
                }
                Ok(Some(chunk))
            }
            None => {
                self.finished = true;
                if let Some(observer) = self.observer.as_mut() {
                    observer.finish();
                }
                Ok(None)
            }
        }
    }

    /// Reads the stream to the end and returns its hex digest.
    ///
    /// # Errors
    ///
    /// Returns any read or cancellation error.
    pub async fn digest(&mut self, algorithm: ChecksumAlgorithm) -> Result<String> {
        let mut hasher = algorithm.hasher();
        while let Some(chunk) = self.next_chunk().await? {
            hasher.update(&chunk);
        }
        Ok(hasher.finalize_hex())
    }

    /// Converts the reader into a boxed stream.
    #[must_use]
    pub fn into_stream(self) -> ChunkStream {
        futures::stream::try_unfold(self, |mut reader| async move {
            Ok::<_, Error>(reader.next_chunk().await?.map(|chunk| (chunk, reader)))
        })
        .boxed()
    }
}

impl fmt::Debug for ChunkReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkReader")
            .field("has_observer", &self.observer.is_some())
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}
