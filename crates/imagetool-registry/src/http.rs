//! HTTP(S) chunk sources.

use async_trait::async_trait;
use futures::TryStreamExt;
use imagetool_core::{ChunkSource, Error, LocalOpener, Result, SourceOpener, StreamSource};
use tracing::debug;
use url::Url;

use crate::error::RegistryError;

/// Wraps a successful response body as a chunk source.
///
/// Body read errors surface as collaborator failures of `operation`.
#[must_use]
pub fn response_source(response: reqwest::Response, operation: &'static str) -> Box<dyn ChunkSource> {
    let stream = response
        .bytes_stream()
        .map_err(move |e| RegistryError::from(e).into_core(operation));
    Box::new(StreamSource::new(stream))
}

/// Opens `http://`, `https://` and `file://` locations.
#[derive(Debug, Clone)]
pub struct HttpOpener {
    http: reqwest::Client,
    local: LocalOpener,
}

impl HttpOpener {
    /// Creates an opener issuing requests through `http`.
    #[must_use]
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            local: LocalOpener::new(),
        }
    }

    /// Sets the opener used for `file://` locations.
    #[must_use]
    pub fn with_local(mut self, local: LocalOpener) -> Self {
        self.local = local;
        self
    }

    async fn get(&self, location: &Url) -> Result<Box<dyn ChunkSource>> {
        debug!(url = %location, "Opening HTTP source");
        let response = self
            .http
            .get(location.clone())
            .send()
            .await
            .map_err(|e| RegistryError::from(e).into_core("Image download"))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::UpstreamFetchFailure {
                url: location.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response_source(response, "Image download"))
    }
}

#[async_trait]
impl SourceOpener for HttpOpener {
    async fn open(&self, location: &Url) -> Result<Box<dyn ChunkSource>> {
        match location.scheme() {
            "http" | "https" => self.get(location).await,
            "file" => self.local.open(location).await,
            scheme => Err(Error::UnsupportedScheme {
                scheme: scheme.to_string(),
                location: location.to_string(),
            }),
        }
    }
}
