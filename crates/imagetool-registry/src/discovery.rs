//! Image discovery in remote checksum repositories.
//!
//! A repository is a directory served over HTTP with a checksum manifest
//! (`sha256sum.txt` and the like) next to the images. Discovery fetches the
//! manifest, probes every listed image with a `HEAD` request for its final
//! location, size and modification time, and picks the newest one.

use chrono::{DateTime, Utc};
use imagetool_core::{Error, ImageDescriptor, ManifestEntry, RepositoryManifest, Result};
use regex::Regex;
use reqwest::header::{CONTENT_LENGTH, LAST_MODIFIED};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::RegistryError;

/// Discovers images listed in a repository manifest.
#[derive(Debug)]
pub struct RepositoryDiscoverer {
    http: reqwest::Client,
    manifest_url: Url,
    base_url: Option<Url>,
    manifest: RepositoryManifest,
}

impl RepositoryDiscoverer {
    /// Creates a discoverer for the manifest at `manifest_url`.
    ///
    /// Image names are resolved relative to the manifest URL unless a base
    /// URL is set.
    #[must_use]
    pub fn new(manifest_url: Url, http: reqwest::Client) -> Self {
        Self {
            http,
            manifest_url,
            base_url: None,
            manifest: RepositoryManifest::new(),
        }
    }

    /// Sets the base URL image names are resolved against.
    #[must_use]
    pub fn with_base_url(mut self, base_url: Url) -> Self {
        self.base_url = Some(base_url);
        self
    }

    /// The images found by the last refresh.
    #[must_use]
    pub const fn manifest(&self) -> &RepositoryManifest {
        &self.manifest
    }

    /// Rebuilds the manifest from the repository.
    ///
    /// Names not matching `pattern` are skipped before probing. Returns the
    /// number of images stored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UpstreamFetchFailure`] on a non-success manifest
    /// response, or a collaborator error if the request fails.
    pub async fn refresh(&mut self, pattern: Option<&Regex>) -> Result<usize> {
        info!(url = %self.manifest_url, "Fetching repository manifest");
        let response = self
            .http
            .get(self.manifest_url.clone())
            .send()
            .await
            .map_err(|e| RegistryError::from(e).into_core("Manifest fetch"))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::UpstreamFetchFailure {
                url: self.manifest_url.to_string(),
                status: status.as_u16(),
            });
        }
        let text = response
            .text()
            .await
            .map_err(|e| RegistryError::from(e).into_core("Manifest fetch"))?;

        self.manifest.clear();
        let base = self.base_url.as_ref().unwrap_or(&self.manifest_url).clone();
        for entry in text.lines().filter_map(ManifestEntry::parse) {
            if pattern.is_some_and(|p| !p.is_match(&entry.name)) {
                continue;
            }
            let mut image = entry.resolve(&base)?;
            self.probe(&mut image).await;
            self.manifest.insert(image);
        }
        debug!(count = self.manifest.len(), "Manifest refreshed");
        Ok(self.manifest.len())
    }

    /// Refines `image` with the final location, size and modification time
    /// reported by a `HEAD` request, following redirects.
    ///
    /// A failed probe leaves the descriptor unchanged.
    pub async fn probe(&self, image: &mut ImageDescriptor) {
        let response = match self.http.head(image.location.clone()).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(url = %image.location, error = %e, "Image probe failed");
                return;
            }
        };
        if !response.status().is_success() {
            warn!(
                url = %image.location,
                status = response.status().as_u16(),
                "Image probe failed"
            );
            return;
        }

        let headers = response.headers();
        if let Some(modified) = headers
            .get(LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| httpdate::parse_http_date(v).ok())
        {
            image.last_modified = Some(DateTime::<Utc>::from(modified));
        }
        if let Some(size) = headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
        {
            image.size = Some(size);
        }
        image.location = response.url().clone();
    }

    /// The most recently modified stored image matching `pattern`.
    #[must_use]
    pub fn latest(&self, pattern: Option<&Regex>) -> Option<&ImageDescriptor> {
        self.manifest.latest(pattern)
    }
}
