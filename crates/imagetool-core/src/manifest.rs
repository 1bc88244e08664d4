//! Checksum manifests of remote image repositories.
//!
//! A manifest is a text resource with one `<checksum> <name>` entry per line,
//! fields separated by runs of whitespace. A leading `*` on the name marks a
//! binary-mode checksum and is stripped.

use regex::Regex;
use url::Url;

use crate::descriptor::ImageDescriptor;
use crate::error::{Error, Result};

/// One parsed manifest line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    /// Checksum as listed.
    pub checksum: String,
    /// Image name with any binary-mode marker removed.
    pub name: String,
    /// Whether the name carried the binary-mode marker.
    pub binary: bool,
}

impl ManifestEntry {
    /// Parses a manifest line. Lines with fewer than two fields yield `None`.
    ///
    /// # Examples
    ///
    /// ```
    /// use imagetool_core::manifest::ManifestEntry;
    ///
    /// let entry = ManifestEntry::parse("abc123  *myimage.qcow2").unwrap();
    /// assert_eq!(entry.name, "myimage.qcow2");
    /// assert_eq!(entry.checksum, "abc123");
    /// ```
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        let mut fields = line.split_whitespace();
        let checksum = fields.next()?;
        let raw_name = fields.next()?;
        let (name, binary) = raw_name
            .strip_prefix('*')
            .map_or((raw_name, false), |stripped| (stripped, true));
        if name.is_empty() {
            return None;
        }
        Some(Self {
            checksum: checksum.to_string(),
            name: name.to_string(),
            binary,
        })
    }

    /// Builds a provisional descriptor with the location joined against `base`.
    ///
    /// # Errors
    ///
    /// Returns an error if the name cannot be joined into a valid URL.
    pub fn resolve(&self, base: &Url) -> Result<ImageDescriptor> {
        let location = base.join(&self.name).map_err(|e| Error::InvalidLocation {
            location: format!("{base} + {}", self.name),
            reason: e.to_string(),
        })?;
        Ok(ImageDescriptor::new(&self.name, location).with_checksum(&self.checksum))
    }
}

/// Name-keyed set of discovered images, kept in manifest order.
#[derive(Debug, Clone, Default)]
pub struct RepositoryManifest {
    entries: Vec<ImageDescriptor>,
}

impl RepositoryManifest {
    /// Creates an empty manifest.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an image, replacing an existing entry of the same name in place.
    pub fn insert(&mut self, image: ImageDescriptor) {
        match self.entries.iter_mut().find(|e| e.name == image.name) {
            Some(existing) => *existing = image,
            None => self.entries.push(image),
        }
    }

    /// Looks up an image by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ImageDescriptor> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Removes all entries.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the manifest has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates entries in manifest order.
    pub fn iter(&self) -> impl Iterator<Item = &ImageDescriptor> {
        self.entries.iter()
    }

    /// Returns the most recently modified image whose name matches `pattern`.
    ///
    /// Entries without a timestamp sort before all timestamped ones. On equal
    /// timestamps the entry that appears first in the manifest wins.
    #[must_use]
    pub fn latest(&self, pattern: Option<&Regex>) -> Option<&ImageDescriptor> {
        self.entries
            .iter()
            .filter(|e| pattern.map_or(true, |p| p.is_match(&e.name)))
            .fold(None, |best: Option<&ImageDescriptor>, candidate| match best {
                Some(b) if b.last_modified >= candidate.last_modified => Some(b),
                _ => Some(candidate),
            })
    }
}
