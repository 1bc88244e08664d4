//! Collaborator interface of the image registry.

use async_trait::async_trait;

use crate::error::Result;
use crate::record::{ImageFilter, NewImage, PropertyUpdate, RegistryImageRecord};
use crate::stream::{ChunkSource, ChunkStream};

/// Operations the transfer and rotation engines need from an image registry.
///
/// `create` and `upload` form one logical operation; callers roll back a
/// failed upload by deleting the created record.
#[async_trait]
pub trait ImageRegistry: Send + Sync {
    /// Lists records matching `filter`.
    async fn list(&self, filter: &ImageFilter) -> Result<Vec<RegistryImageRecord>>;

    /// Creates a record without data.
    async fn create(&self, image: &NewImage) -> Result<RegistryImageRecord>;

    /// Uploads the image data of a created record.
    async fn upload(&self, id: &str, data: ChunkStream) -> Result<()>;

    /// Applies metadata changes to a record.
    async fn update(&self, id: &str, update: &PropertyUpdate) -> Result<()>;

    /// Disables data download for a record.
    async fn deactivate(&self, id: &str) -> Result<()>;

    /// Deletes a record.
    async fn delete(&self, id: &str) -> Result<()>;

    /// Streams the stored image data back.
    async fn fetch_bytes(&self, id: &str) -> Result<Box<dyn ChunkSource>>;
}
