//! # Imagetool Core
//!
//! Image descriptors, streaming transfer and registry rotation for
//! `os-imagetool`.
//!
//! This crate holds everything that does not speak HTTP:
//!
//! - [`ImageDescriptor`] - Name, location and checksum of a transferable image
//! - [`ChunkReader`] - Lazy chunked reads with progress and cancellation
//! - [`ProgressReporter`] - Throttled percentage display
//! - [`RepositoryManifest`] - Parsed checksum manifest and latest selection
//! - [`TransferEngine`] - Download to file or upload into a registry
//! - [`RotationEngine`] - Retention rotation of an image group
//!
//! Network collaborators implement [`SourceOpener`] and [`ImageRegistry`].
//!
//! ## Example
//!
//! ```rust
//! use chrono::{TimeZone, Utc};
//! use imagetool_core::record::RegistryImageRecord;
//! use imagetool_core::rotation::plan;
//! use imagetool_core::RotationPolicy;
//!
//! let t = |h| Utc.with_ymd_and_hms(2017, 3, 1, h, 0, 0).unwrap();
//! let records = vec![
//!     RegistryImageRecord::new("a", "CentOS 7", t(3)),
//!     RegistryImageRecord::new("b", "CentOS 7", t(1)),
//! ];
//!
//! let policy = RotationPolicy::new(1).with_rotated_suffix("(OLD)");
//! let steps = plan(records, &policy, t(12));
//! assert_eq!(steps[0].update.is_latest, Some(true));
//! assert_eq!(steps[1].update.name.as_deref(), Some("CentOS 7 (OLD)"));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cancel;
pub mod checksum;
pub mod descriptor;
pub mod error;
pub mod manifest;
pub mod progress;
pub mod properties;
pub mod record;
pub mod registry;
pub mod rotation;
pub mod stream;
pub mod transfer;

#[cfg(test)]
mod proptest_tests;

// Re-export main types at crate root
pub use cancel::CancelFlag;
pub use checksum::{ChecksumAlgorithm, Hasher};
pub use descriptor::ImageDescriptor;
pub use error::{Error, Result};
pub use manifest::{ManifestEntry, RepositoryManifest};
pub use progress::{ProgressObserver, ProgressReporter};
pub use properties::{parse_key_value, parse_properties};
pub use record::{
    ImageFilter, ImageStatus, NewImage, PropertyUpdate, RegistryImageRecord, Visibility,
};
pub use registry::ImageRegistry;
pub use rotation::{RotationEngine, RotationPolicy, RotationReport, RotationStep};
pub use stream::{
    ChunkReader, ChunkSource, ChunkStream, FileSource, IterSource, LocalOpener, SourceOpener,
    StreamSource, DEFAULT_CHUNK_SIZE,
};
pub use transfer::{ProgressMode, TransferEngine, UploadOptions};
