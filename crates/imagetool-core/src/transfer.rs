//! Moving image bytes to a local file or into an image registry.
//!
//! Both destinations are idempotent: an identical file or a registry record
//! with the same checksum short-circuits the transfer unless forced. A
//! registry upload stays provisional until verified; any failure in between
//! deletes the created record.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};

use crate::cancel::CancelFlag;
use crate::checksum::ChecksumAlgorithm;
use crate::descriptor::{absolute_path, ImageDescriptor};
use crate::error::{Error, Result};
use crate::progress::{ProgressObserver, ProgressReporter};
use crate::record::{keys, ImageFilter, NewImage, Visibility};
use crate::registry::ImageRegistry;
use crate::stream::{ChunkReader, ChunkSource, FileSource, SourceOpener};

/// How transfer progress is displayed on stderr.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProgressMode {
    /// Interactive when stderr is a terminal.
    #[default]
    Auto,
    /// Always update a single line in place.
    Interactive,
    /// One line per whole percent.
    Plain,
    /// No progress output.
    Disabled,
}

/// Parameters of an upload into the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOptions {
    /// Display name, also stored as the original name.
    pub name: String,
    /// Re-download and compare the checksum after upload.
    pub verify: bool,
    /// Image group tag.
    pub image_group: Option<String>,
    /// Disk format hint.
    pub disk_format: String,
    /// Container format hint.
    pub container_format: String,
    /// Minimum disk size in gigabytes.
    pub min_disk: Option<u64>,
    /// Minimum RAM in megabytes.
    pub min_ram: Option<u64>,
    /// Additional string properties.
    pub properties: BTreeMap<String, String>,
    /// Upload even when a record with the same checksum exists.
    pub force: bool,
    /// Initial visibility.
    pub visibility: Visibility,
}

impl UploadOptions {
    /// Creates options for a private `qcow2`/`bare` upload named `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            verify: false,
            image_group: None,
            disk_format: "qcow2".to_string(),
            container_format: "bare".to_string(),
            min_disk: None,
            min_ram: None,
            properties: BTreeMap::new(),
            force: false,
            visibility: Visibility::Private,
        }
    }

    /// Enables or disables verification.
    #[must_use]
    pub const fn with_verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    /// Sets the image group.
    #[must_use]
    pub fn with_image_group(mut self, group: impl Into<String>) -> Self {
        self.image_group = Some(group.into());
        self
    }

    /// Sets the disk format.
    #[must_use]
    pub fn with_disk_format(mut self, format: impl Into<String>) -> Self {
        self.disk_format = format.into();
        self
    }

    /// Sets the container format.
    #[must_use]
    pub fn with_container_format(mut self, format: impl Into<String>) -> Self {
        self.container_format = format.into();
        self
    }

    /// Sets the minimum disk size.
    #[must_use]
    pub const fn with_min_disk(mut self, gigabytes: u64) -> Self {
        self.min_disk = Some(gigabytes);
        self
    }

    /// Sets the minimum RAM.
    #[must_use]
    pub const fn with_min_ram(mut self, megabytes: u64) -> Self {
        self.min_ram = Some(megabytes);
        self
    }

    /// Sets the additional properties.
    #[must_use]
    pub fn with_properties(mut self, properties: BTreeMap<String, String>) -> Self {
        self.properties = properties;
        self
    }

    /// Enables or disables forced upload.
    #[must_use]
    pub const fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Sets the initial visibility.
    #[must_use]
    pub const fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    fn new_image(&self, image: &ImageDescriptor) -> NewImage {
        let mut properties = self.properties.clone();
        if let Some(group) = &self.image_group {
            properties.insert(keys::IMAGE_GROUP.to_string(), group.clone());
        }
        if let Some((algorithm, checksum)) = image.checksum_pair() {
            properties.insert(keys::checksum(algorithm), checksum.to_string());
        }
        properties.insert(keys::ORIGINAL_NAME.to_string(), self.name.clone());

        NewImage {
            name: self.name.clone(),
            disk_format: self.disk_format.clone(),
            container_format: self.container_format.clone(),
            visibility: self.visibility,
            min_disk: self.min_disk,
            min_ram: self.min_ram,
            properties,
        }
    }
}

/// Streams images from their location to a destination.
pub struct TransferEngine {
    opener: Arc<dyn SourceOpener>,
    cancel: CancelFlag,
    progress: ProgressMode,
}

impl TransferEngine {
    /// Creates an engine reading sources through `opener`.
    #[must_use]
    pub fn new(opener: Arc<dyn SourceOpener>) -> Self {
        Self {
            opener,
            cancel: CancelFlag::new(),
            progress: ProgressMode::Auto,
        }
    }

    /// Sets the cancellation flag checked at every chunk.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Sets the progress display mode.
    #[must_use]
    pub const fn with_progress(mut self, progress: ProgressMode) -> Self {
        self.progress = progress;
        self
    }

    /// Copies `image` to `destination`.
    ///
    /// Unless `force` is set, an existing destination whose checksum matches
    /// is left alone and `None` is returned. With `verify`, the written file
    /// is read back and compared; a mismatching file stays on disk.
    ///
    /// # Errors
    ///
    /// Returns [`Error::VerifyMismatch`] on a failed verify,
    /// [`Error::UnsupportedChecksumAlgorithm`] when verification is requested
    /// but the algorithm is undetermined, or any read/write error.
    pub async fn download_to_file(
        &self,
        image: &ImageDescriptor,
        destination: impl AsRef<Path>,
        verify: bool,
        force: bool,
    ) -> Result<Option<PathBuf>> {
        let destination = destination.as_ref();
        let verify_with = Self::verify_algorithm(image, verify)?;

        if !force && Self::file_matches(image, destination).await? {
            info!(path = %destination.display(), "Image already exists with same checksum, skipping");
            return Ok(None);
        }

        info!(location = %image.location, path = %destination.display(), "Starting download");
        let mut reader = self.open(image).await?;
        let mut file = tokio::fs::File::create(destination)
            .await
            .map_err(|e| Error::io(destination, e))?;
        while let Some(chunk) = reader.next_chunk().await? {
            file.write_all(&chunk)
                .await
                .map_err(|e| Error::io(destination, e))?;
        }
        file.flush().await.map_err(|e| Error::io(destination, e))?;
        drop(file);
        info!("Download done");

        if let Some((algorithm, expected)) = verify_with {
            let actual = file_digest(destination, algorithm).await?;
            if actual != expected {
                return Err(Error::VerifyMismatch {
                    subject: destination.display().to_string(),
                    expected,
                    actual,
                });
            }
            info!("Image verify ok");
        }

        Ok(Some(absolute_path(destination)?))
    }

    /// Uploads `image` into `registry` and returns the new record's id.
    ///
    /// Returns `None` without uploading when a record with the same checksum
    /// exists and `options.force` is unset. The created record is deleted if
    /// upload or verification fails, interruption included.
    ///
    /// # Errors
    ///
    /// Returns [`Error::VerifyMismatch`] on a failed verify, or any registry,
    /// source or cancellation error.
    pub async fn download_to_registry(
        &self,
        registry: &dyn ImageRegistry,
        image: &ImageDescriptor,
        options: &UploadOptions,
    ) -> Result<Option<String>> {
        let verify_with = Self::verify_algorithm(image, options.verify)?;

        if let Some((algorithm, checksum)) = image.checksum_pair() {
            let existing = registry
                .list(&ImageFilter::new().with_checksum(algorithm, checksum))
                .await?;
            if !existing.is_empty() && !options.force {
                info!(checksum, "Image with same checksum already exists, skipping");
                return Ok(None);
            }
        }

        self.cancel.check()?;
        let record = registry.create(&options.new_image(image)).await?;
        info!(image_id = %record.id, name = %record.name, "Created image");
        let pending = PendingImage::new(registry, record.id);

        match self.upload_and_verify(registry, pending.id(), image, verify_with).await {
            Ok(()) => Ok(Some(pending.commit())),
            Err(e) => {
                pending.rollback(&e).await;
                Err(e)
            }
        }
    }

    async fn upload_and_verify(
        &self,
        registry: &dyn ImageRegistry,
        id: &str,
        image: &ImageDescriptor,
        verify_with: Option<(ChecksumAlgorithm, String)>,
    ) -> Result<()> {
        info!(location = %image.location, image_id = id, "Uploading image");
        let reader = self.open(image).await?;
        registry
            .upload(id, reader.into_stream())
            .await
            .map_err(|e| {
                if self.cancel.is_cancelled() {
                    Error::Interrupted
                } else {
                    e
                }
            })?;
        self.cancel.check()?;

        let Some((algorithm, expected)) = verify_with else {
            return Ok(());
        };
        info!(image_id = id, "Downloading image from registry for verify");
        let source = registry.fetch_bytes(id).await?;
        let actual = self.reader(source, image.size).digest(algorithm).await?;
        if actual != expected {
            error!(image_id = id, "Image verify failed");
            return Err(Error::VerifyMismatch {
                subject: id.to_string(),
                expected,
                actual,
            });
        }
        info!(image_id = id, "Image verify ok");
        Ok(())
    }

    /// Resolves what verification needs before any bytes move.
    fn verify_algorithm(
        image: &ImageDescriptor,
        verify: bool,
    ) -> Result<Option<(ChecksumAlgorithm, String)>> {
        if !verify {
            return Ok(None);
        }
        let Some(checksum) = image.checksum() else {
            warn!(image = %image.name, "No checksum known, skipping verify");
            return Ok(None);
        };
        Ok(Some((image.require_algorithm()?, checksum.to_string())))
    }

    async fn file_matches(image: &ImageDescriptor, path: &Path) -> Result<bool> {
        let Some((algorithm, expected)) = image.checksum_pair() else {
            return Ok(false);
        };
        let exists = tokio::fs::try_exists(path)
            .await
            .map_err(|e| Error::io(path, e))?;
        if !exists {
            return Ok(false);
        }
        debug!(path = %path.display(), "Computing checksum of existing file");
        Ok(file_digest(path, algorithm).await? == expected)
    }

    async fn open(&self, image: &ImageDescriptor) -> Result<ChunkReader> {
        let source = self.opener.open(&image.location).await?;
        Ok(self.reader(source, image.size))
    }

    fn reader(&self, source: Box<dyn ChunkSource>, total: Option<u64>) -> ChunkReader {
        let reader = ChunkReader::new(source).with_cancel(self.cancel.clone());
        match self.observer(total) {
            Some(observer) => reader.with_observer(observer),
            None => reader,
        }
    }

    fn observer(&self, total: Option<u64>) -> Option<Box<dyn ProgressObserver>> {
        match self.progress {
            ProgressMode::Auto => Some(Box::new(ProgressReporter::stderr(total))),
            ProgressMode::Interactive => {
                Some(Box::new(ProgressReporter::new(std::io::stderr(), total, true)))
            }
            ProgressMode::Plain => Some(Box::new(ProgressReporter::new(
                std::io::stderr(),
                total,
                false,
            ))),
            ProgressMode::Disabled => None,
        }
    }
}

impl std::fmt::Debug for TransferEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferEngine")
            .field("progress", &self.progress)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

async fn file_digest(path: &Path, algorithm: ChecksumAlgorithm) -> Result<String> {
    let source = FileSource::open(path).await?;
    ChunkReader::new(Box::new(source)).digest(algorithm).await
}

/// A created registry record that has not been verified yet.
///
/// Must end in [`commit`](Self::commit) or [`rollback`](Self::rollback).
struct PendingImage<'a> {
    registry: &'a dyn ImageRegistry,
    id: String,
    resolved: bool,
}

impl<'a> PendingImage<'a> {
    fn new(registry: &'a dyn ImageRegistry, id: String) -> Self {
        Self {
            registry,
            id,
            resolved: false,
        }
    }

    fn id(&self) -> &str {
        &self.id
    }

    /// Keeps the record and returns its id.
    fn commit(mut self) -> String {
        self.resolved = true;
        std::mem::take(&mut self.id)
    }

    /// Deletes the record. A failed delete is logged; `cause` stays the error.
    async fn rollback(mut self, cause: &Error) {
        self.resolved = true;
        match self.registry.delete(&self.id).await {
            Ok(()) => error!(image_id = %self.id, error = %cause, "Deleted unverified image"),
            Err(e) => error!(
                image_id = %self.id,
                error = %e,
                "Could not delete unverified image, remove it manually"
            ),
        }
    }
}

impl Drop for PendingImage<'_> {
    fn drop(&mut self) {
        if !self.resolved {
            warn!(image_id = %self.id, "Unverified image left in registry, verify it manually");
        }
    }
}
