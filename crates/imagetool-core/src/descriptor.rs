//! Image descriptor model.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use url::Url;

use crate::checksum::ChecksumAlgorithm;
use crate::error::{Error, Result};
use crate::stream::{ChunkReader, FileSource};

/// Identity, location and checksum of one transferable image.
///
/// The checksum is always stored as lowercase hex. When no algorithm is set
/// explicitly it is inferred from the digest length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDescriptor {
    /// Human-readable name, usually the file name.
    pub name: String,

    /// Byte source (`file://`, `http://` or `https://`).
    pub location: Url,

    /// Size in bytes, if known before transfer.
    pub size: Option<u64>,

    /// Last modification time, used to pick the latest repository image.
    pub last_modified: Option<DateTime<Utc>>,

    checksum: Option<String>,
    checksum_type: Option<ChecksumAlgorithm>,
}

impl ImageDescriptor {
    /// Creates a descriptor without checksum, size or timestamp.
    ///
    /// # Examples
    ///
    /// ```
    /// use imagetool_core::ImageDescriptor;
    /// use url::Url;
    ///
    /// let location = Url::parse("https://example.com/images/centos.qcow2").unwrap();
    /// let image = ImageDescriptor::new("centos.qcow2", location)
    ///     .with_checksum("ABCDEF0123456789ABCDEF0123456789");
    /// assert_eq!(image.checksum(), Some("abcdef0123456789abcdef0123456789"));
    /// assert_eq!(image.checksum_algorithm().map(|a| a.as_str()), Some("md5"));
    /// ```
    #[must_use]
    pub fn new(name: impl Into<String>, location: Url) -> Self {
        Self {
            name: name.into(),
            location,
            size: None,
            last_modified: None,
            checksum: None,
            checksum_type: None,
        }
    }

    /// Sets the checksum, normalised to lowercase.
    #[must_use]
    pub fn with_checksum(mut self, checksum: impl AsRef<str>) -> Self {
        self.set_checksum(checksum);
        self
    }

    /// Sets the checksum algorithm explicitly.
    #[must_use]
    pub const fn with_checksum_type(mut self, algorithm: ChecksumAlgorithm) -> Self {
        self.checksum_type = Some(algorithm);
        self
    }

    /// Sets the size.
    #[must_use]
    pub const fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    /// Sets the last modification time.
    #[must_use]
    pub const fn with_last_modified(mut self, last_modified: DateTime<Utc>) -> Self {
        self.last_modified = Some(last_modified);
        self
    }

    /// Replaces the checksum, normalised to lowercase.
    pub fn set_checksum(&mut self, checksum: impl AsRef<str>) {
        self.checksum = Some(checksum.as_ref().trim().to_ascii_lowercase());
    }

    /// Returns the lowercase hex checksum.
    #[must_use]
    pub fn checksum(&self) -> Option<&str> {
        self.checksum.as_deref()
    }

    /// Returns the explicit algorithm, or the one inferred from the digest length.
    #[must_use]
    pub fn checksum_algorithm(&self) -> Option<ChecksumAlgorithm> {
        self.checksum_type.or_else(|| {
            self.checksum
                .as_deref()
                .and_then(|c| ChecksumAlgorithm::from_digest_len(c.len()))
        })
    }

    /// Returns the checksum and its algorithm, if both are known.
    #[must_use]
    pub fn checksum_pair(&self) -> Option<(ChecksumAlgorithm, &str)> {
        Some((self.checksum_algorithm()?, self.checksum()?))
    }

    /// Returns the algorithm needed to verify this image.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedChecksumAlgorithm`] when the algorithm is
    /// neither set nor inferable.
    pub fn require_algorithm(&self) -> Result<ChecksumAlgorithm> {
        self.checksum_algorithm()
            .ok_or_else(|| Error::UnsupportedChecksumAlgorithm {
                algorithm: "undetermined".to_string(),
            })
    }

    /// Builds a descriptor for a local file, computing its sha256 checksum.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_file_with(path, ChecksumAlgorithm::Sha256).await
    }

    /// Builds a descriptor for a local file using the given algorithm.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub async fn from_file_with(
        path: impl AsRef<Path>,
        algorithm: ChecksumAlgorithm,
    ) -> Result<Self> {
        let path = path.as_ref();
        let absolute = absolute_path(path)?;
        let metadata = tokio::fs::metadata(&absolute)
            .await
            .map_err(|e| Error::io(&absolute, e))?;

        let location = Url::from_file_path(&absolute).map_err(|()| Error::InvalidLocation {
            location: absolute.display().to_string(),
            reason: "cannot be expressed as a file URL".to_string(),
        })?;
        let name = path
            .file_name()
            .or_else(|| absolute.file_name())
            .map_or_else(|| absolute.display().to_string(), |n| n.to_string_lossy().into_owned());

        let mut reader = ChunkReader::new(Box::new(FileSource::open(&absolute).await?));
        let checksum = reader.digest(algorithm).await?;

        let mut image = Self::new(name, location)
            .with_size(metadata.len())
            .with_checksum(checksum)
            .with_checksum_type(algorithm);
        image.last_modified = metadata.modified().ok().map(DateTime::<Utc>::from);
        Ok(image)
    }
}

/// Makes `path` absolute against the working directory without resolving
/// symlinks.
pub(crate) fn absolute_path(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).map_err(|e| Error::io(path, e))
}

impl fmt::Display for ImageDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<Image name={} checksum={} checksum_type={} location={}",
            self.name,
            self.checksum().unwrap_or("-"),
            self.checksum_algorithm().map_or("-", ChecksumAlgorithm::as_str),
            self.location
        )?;
        match self.last_modified {
            Some(ts) => write!(f, " last_modified=\"{}\"", ts.to_rfc3339())?,
            None => f.write_str(" last_modified=-")?,
        }
        match self.size {
            Some(size) => write!(f, " size={size}>"),
            None => f.write_str(" size=->"),
        }
    }
}
