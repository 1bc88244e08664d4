//! Glance v2 image API client.
//!
//! [`GlanceClient`] implements [`ImageRegistry`] on top of the Glance HTTP
//! API. Listing follows the `next` links of the paginated `GET /v2/images`
//! and filters the records again on the client, so backends that ignore
//! property filters still give correct results.

use async_trait::async_trait;
use imagetool_core::record::keys;
use imagetool_core::{
    ChunkSource, ChunkStream, ImageFilter, ImageRegistry, NewImage, PropertyUpdate,
    RegistryImageRecord, Result,
};
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use serde_json::{json, Map, Value};
use tracing::debug;
use url::Url;

use crate::auth::Session;
use crate::config::GlanceConfig;
use crate::error::RegistryError;
use crate::http::response_source;

/// Header carrying the token in OpenStack API requests.
pub const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";

/// Content type of Glance v2 JSON-patch requests.
pub const JSON_PATCH_CONTENT_TYPE: &str = "application/openstack-images-v2.1-json-patch";

/// Default page size of image listings.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Client for the Glance v2 image API.
#[derive(Clone)]
pub struct GlanceClient {
    http: reqwest::Client,
    endpoint: String,
    token: String,
    page_size: usize,
}

impl std::fmt::Debug for GlanceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlanceClient")
            .field("endpoint", &self.endpoint)
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}

impl GlanceClient {
    /// Authenticates according to `config` and creates a client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built, authentication
    /// fails or no image endpoint is found.
    pub async fn connect(config: &GlanceConfig) -> std::result::Result<Self, RegistryError> {
        let http = config.http_client()?;
        let session = Session::establish(config, &http).await?;
        Ok(Self::new(http, &session.image_endpoint, session.token))
    }

    /// Creates a client for `endpoint` sending `token` with every request.
    ///
    /// A trailing `/` or `/v2` on the endpoint is ignored.
    ///
    /// # Examples
    ///
    /// ```
    /// use imagetool_registry::GlanceClient;
    ///
    /// let client = GlanceClient::new(reqwest::Client::new(), "https://glance.example.com:9292/v2/", "t");
    /// assert_eq!(client.endpoint(), "https://glance.example.com:9292");
    /// ```
    #[must_use]
    pub fn new(http: reqwest::Client, endpoint: &str, token: impl Into<String>) -> Self {
        Self {
            http,
            endpoint: normalize_endpoint(endpoint),
            token: token.into(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Sets the listing page size.
    #[must_use]
    pub const fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Image endpoint without version suffix.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn image_url(&self, id: &str, suffix: &str) -> String {
        format!("{}/v2/images/{id}{suffix}", self.endpoint)
    }

    fn list_url(&self, filter: &ImageFilter) -> std::result::Result<Url, RegistryError> {
        let mut url = Url::parse(&format!("{}/v2/images", self.endpoint))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("limit", &self.page_size.to_string());
            if let Some(group) = &filter.image_group {
                query.append_pair(keys::IMAGE_GROUP, group);
            }
            if let Some((algorithm, checksum)) = &filter.checksum {
                query.append_pair(&keys::checksum(*algorithm), checksum);
            }
        }
        Ok(url)
    }

    /// Resolves a `next` link, which Glance returns relative to the endpoint.
    fn next_url(&self, next: &str) -> std::result::Result<Url, RegistryError> {
        if next.starts_with('/') {
            Ok(Url::parse(&format!("{}{next}", self.endpoint))?)
        } else {
            Ok(Url::parse(next)?)
        }
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        id: Option<&str>,
    ) -> std::result::Result<reqwest::Response, RegistryError> {
        let response = request.header(AUTH_TOKEN_HEADER, &self.token).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        match (status.as_u16(), id) {
            (404, Some(id)) => Err(RegistryError::NotFound { id: id.to_string() }),
            (401, _) => Err(RegistryError::AuthenticationFailed {
                message: response.text().await.unwrap_or_default(),
            }),
            (status, _) => Err(RegistryError::HttpError {
                status,
                message: response.text().await.unwrap_or_default(),
            }),
        }
    }

    /// Lists all records matching `filter`, following pagination.
    ///
    /// # Errors
    ///
    /// Returns an error if a page cannot be fetched or parsed.
    pub async fn list_images(
        &self,
        filter: &ImageFilter,
    ) -> std::result::Result<Vec<RegistryImageRecord>, RegistryError> {
        let mut records = Vec::new();
        let mut next = Some(self.list_url(filter)?);
        while let Some(url) = next.take() {
            debug!(url = %url, "Listing images");
            let page: Value = self.send(self.http.get(url), None).await?.json().await?;
            let images = page
                .get("images")
                .and_then(Value::as_array)
                .ok_or_else(|| RegistryError::InvalidResponse {
                    message: "image list without images array".to_string(),
                })?;
            for image in images {
                let record = parse_record(image.clone())?;
                if filter.matches(&record) {
                    records.push(record);
                }
            }
            if let Some(link) = page.get("next").and_then(Value::as_str) {
                next = Some(self.next_url(link)?);
            }
        }
        Ok(records)
    }

    /// Creates a queued record without data.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the response is not a record.
    pub async fn create_image(
        &self,
        image: &NewImage,
    ) -> std::result::Result<RegistryImageRecord, RegistryError> {
        let body = create_body(image);
        let url = format!("{}/v2/images", self.endpoint);
        let record: Value = self.send(self.http.post(url).json(&body), None).await?.json().await?;
        let record = parse_record(record)?;
        debug!(image_id = %record.id, "Image record created");
        Ok(record)
    }

    /// Uploads the image data of a created record.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the data stream errors.
    pub async fn upload_image(
        &self,
        id: &str,
        data: ChunkStream,
    ) -> std::result::Result<(), RegistryError> {
        let request = self
            .http
            .put(self.image_url(id, "/file"))
            .header(CONTENT_TYPE, HeaderValue::from_static("application/octet-stream"))
            .body(reqwest::Body::wrap_stream(data));
        self.send(request, Some(id)).await?;
        Ok(())
    }

    /// Applies `update` with a single JSON-patch request.
    ///
    /// An empty update issues no request.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn update_image(
        &self,
        id: &str,
        update: &PropertyUpdate,
    ) -> std::result::Result<(), RegistryError> {
        if update.is_empty() {
            return Ok(());
        }
        let request = self
            .http
            .patch(self.image_url(id, ""))
            .header(CONTENT_TYPE, HeaderValue::from_static(JSON_PATCH_CONTENT_TYPE))
            .body(serde_json::to_vec(&patch_body(update))?);
        self.send(request, Some(id)).await?;
        Ok(())
    }

    /// Deactivates a record.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn deactivate_image(&self, id: &str) -> std::result::Result<(), RegistryError> {
        let url = self.image_url(id, "/actions/deactivate");
        self.send(self.http.post(url), Some(id)).await?;
        Ok(())
    }

    /// Deletes a record.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn delete_image(&self, id: &str) -> std::result::Result<(), RegistryError> {
        self.send(self.http.delete(self.image_url(id, "")), Some(id)).await?;
        Ok(())
    }

    /// Opens the stored image data.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn download_image(
        &self,
        id: &str,
    ) -> std::result::Result<Box<dyn ChunkSource>, RegistryError> {
        let response = self.send(self.http.get(self.image_url(id, "/file")), Some(id)).await?;
        Ok(response_source(response, "Image data download"))
    }
}

#[async_trait]
impl ImageRegistry for GlanceClient {
    async fn list(&self, filter: &ImageFilter) -> Result<Vec<RegistryImageRecord>> {
        self.list_images(filter).await.map_err(|e| e.into_core("Image list"))
    }

    async fn create(&self, image: &NewImage) -> Result<RegistryImageRecord> {
        self.create_image(image).await.map_err(|e| e.into_core("Image create"))
    }

    async fn upload(&self, id: &str, data: ChunkStream) -> Result<()> {
        self.upload_image(id, data).await.map_err(|e| e.into_core("Image upload"))
    }

    async fn update(&self, id: &str, update: &PropertyUpdate) -> Result<()> {
        self.update_image(id, update).await.map_err(|e| e.into_core("Image update"))
    }

    async fn deactivate(&self, id: &str) -> Result<()> {
        self.deactivate_image(id).await.map_err(|e| e.into_core("Image deactivate"))
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.delete_image(id).await.map_err(|e| e.into_core("Image delete"))
    }

    async fn fetch_bytes(&self, id: &str) -> Result<Box<dyn ChunkSource>> {
        self.download_image(id).await.map_err(|e| e.into_core("Image data download"))
    }
}

/// Strips a trailing `/` and `/v2` from an image endpoint.
#[must_use]
pub fn normalize_endpoint(endpoint: &str) -> String {
    let trimmed = endpoint.trim_end_matches('/');
    trimmed
        .strip_suffix("/v2")
        .unwrap_or(trimmed)
        .trim_end_matches('/')
        .to_string()
}

fn parse_record(value: Value) -> std::result::Result<RegistryImageRecord, RegistryError> {
    RegistryImageRecord::from_json(value).map_err(|e| RegistryError::InvalidResponse {
        message: e.to_string(),
    })
}

/// JSON body of `POST /v2/images`.
///
/// Custom properties are sent as top-level string attributes.
#[must_use]
pub fn create_body(image: &NewImage) -> Value {
    let mut body = Map::new();
    for (key, value) in &image.properties {
        body.insert(key.clone(), Value::String(value.clone()));
    }
    body.insert("name".to_string(), json!(image.name));
    body.insert("disk_format".to_string(), json!(image.disk_format));
    body.insert("container_format".to_string(), json!(image.container_format));
    body.insert("visibility".to_string(), json!(image.visibility.as_str()));
    if let Some(min_disk) = image.min_disk {
        body.insert("min_disk".to_string(), json!(min_disk));
    }
    if let Some(min_ram) = image.min_ram {
        body.insert("min_ram".to_string(), json!(min_ram));
    }
    Value::Object(body)
}

/// JSON-patch operations for `update`.
///
/// Core attributes are replaced; custom properties use `add`, which also
/// overwrites an existing value.
#[must_use]
pub fn patch_body(update: &PropertyUpdate) -> Value {
    let ops: Vec<Value> = update
        .entries()
        .into_iter()
        .map(|(key, value)| {
            let op = if matches!(key.as_str(), "name" | "visibility") {
                "replace"
            } else {
                "add"
            };
            json!({ "op": op, "path": format!("/{key}"), "value": value })
        })
        .collect();
    Value::Array(ops)
}
