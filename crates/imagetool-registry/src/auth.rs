//! Keystone v3 session construction.
//!
//! A [`Session`] is the pair the Glance client needs: a token to send as
//! `X-Auth-Token` and the image endpoint it applies to. With a pre-issued
//! token the endpoint must be configured explicitly; otherwise both come
//! from a `POST /v3/auth/tokens` response, the endpoint through the service
//! catalog.

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::config::{GlanceAuth, GlanceConfig, KeystoneCredentials};
use crate::error::RegistryError;

/// Header carrying the issued token in Keystone responses.
pub const SUBJECT_TOKEN_HEADER: &str = "X-Subject-Token";

/// Service type of the image service in the catalog.
pub const IMAGE_SERVICE_TYPE: &str = "image";

/// Authenticated token plus the image endpoint to use it against.
#[derive(Clone)]
pub struct Session {
    /// Token sent as `X-Auth-Token`.
    pub token: String,
    /// Image service endpoint.
    pub image_endpoint: String,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("token", &"<redacted>")
            .field("image_endpoint", &self.image_endpoint)
            .finish()
    }
}

/// One service of the Keystone catalog.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogEntry {
    /// Service type, e.g. `image`.
    #[serde(rename = "type")]
    pub service_type: String,
    /// Endpoints of the service.
    #[serde(default)]
    pub endpoints: Vec<CatalogEndpoint>,
}

/// One endpoint of a catalog service.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogEndpoint {
    /// Interface, e.g. `public`.
    pub interface: String,
    /// Region name.
    #[serde(default)]
    pub region: Option<String>,
    /// Region id.
    #[serde(default)]
    pub region_id: Option<String>,
    /// Endpoint URL.
    pub url: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: TokenBody,
}

#[derive(Debug, Deserialize)]
struct TokenBody {
    #[serde(default)]
    catalog: Vec<CatalogEntry>,
}

impl Session {
    /// Establishes a session for `config` using `http`.
    ///
    /// # Errors
    ///
    /// Returns an error if authentication fails or no image endpoint can be
    /// determined.
    pub async fn establish(
        config: &GlanceConfig,
        http: &reqwest::Client,
    ) -> Result<Self, RegistryError> {
        match &config.auth {
            GlanceAuth::Token { token } => {
                let image_endpoint =
                    config
                        .image_url
                        .clone()
                        .ok_or_else(|| RegistryError::AuthenticationFailed {
                            message: "token authentication requires an image endpoint URL"
                                .to_string(),
                        })?;
                Ok(Self {
                    token: token.clone(),
                    image_endpoint,
                })
            }
            GlanceAuth::Keystone(credentials) => {
                let (token, catalog) = authenticate(http, credentials).await?;
                let image_endpoint = match &config.image_url {
                    Some(url) => url.clone(),
                    None => find_endpoint(
                        &catalog,
                        IMAGE_SERVICE_TYPE,
                        &config.interface,
                        config.region.as_deref(),
                    )?,
                };
                info!(endpoint = %image_endpoint, "Using image endpoint");
                Ok(Self {
                    token,
                    image_endpoint,
                })
            }
        }
    }
}

/// Requests a token from Keystone and returns it with the service catalog.
///
/// # Errors
///
/// Returns [`RegistryError::AuthenticationFailed`] on missing credentials or a
/// 401 response, or an HTTP error for other failures.
pub async fn authenticate(
    http: &reqwest::Client,
    credentials: &KeystoneCredentials,
) -> Result<(String, Vec<CatalogEntry>), RegistryError> {
    let url = credentials.tokens_url();
    let body = token_request(credentials)?;
    debug!(url = %url, "Requesting Keystone token");

    let response = http.post(&url).json(&body).send().await?;
    let status = response.status();
    if status.as_u16() == 401 {
        return Err(RegistryError::AuthenticationFailed {
            message: response.text().await.unwrap_or_default(),
        });
    }
    if !status.is_success() {
        return Err(RegistryError::HttpError {
            status: status.as_u16(),
            message: response.text().await.unwrap_or_default(),
        });
    }

    let token = response
        .headers()
        .get(SUBJECT_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string)
        .ok_or_else(|| RegistryError::InvalidResponse {
            message: format!("missing {SUBJECT_TOKEN_HEADER} header"),
        })?;
    let body: TokenResponse = response.json().await?;
    Ok((token, body.token.catalog))
}

/// Builds the `POST /v3/auth/tokens` request body.
///
/// # Errors
///
/// Returns [`RegistryError::AuthenticationFailed`] when neither a token nor a
/// username and password are configured.
pub fn token_request(credentials: &KeystoneCredentials) -> Result<Value, RegistryError> {
    let identity = match (&credentials.token, &credentials.username, &credentials.password) {
        (Some(token), _, _) => json!({
            "methods": ["token"],
            "token": { "id": token },
        }),
        (None, Some(username), Some(password)) => json!({
            "methods": ["password"],
            "password": {
                "user": {
                    "name": username,
                    "domain": { "name": credentials.user_domain_name },
                    "password": password,
                }
            },
        }),
        _ => {
            return Err(RegistryError::AuthenticationFailed {
                message: "no token or username/password configured".to_string(),
            })
        }
    };

    let mut auth = json!({ "identity": identity });
    if let Some(project_id) = &credentials.project_id {
        auth["scope"] = json!({ "project": { "id": project_id } });
    } else if let Some(project_name) = &credentials.project_name {
        auth["scope"] = json!({
            "project": {
                "name": project_name,
                "domain": { "name": credentials.project_domain_name },
            }
        });
    }
    Ok(json!({ "auth": auth }))
}

/// Finds the URL of a service endpoint in the catalog.
///
/// The region, when given, matches either the region name or the region id.
///
/// # Errors
///
/// Returns [`RegistryError::EndpointNotFound`] when nothing matches.
pub fn find_endpoint(
    catalog: &[CatalogEntry],
    service_type: &str,
    interface: &str,
    region: Option<&str>,
) -> Result<String, RegistryError> {
    catalog
        .iter()
        .filter(|entry| entry.service_type == service_type)
        .flat_map(|entry| entry.endpoints.iter())
        .find(|endpoint| {
            endpoint.interface == interface
                && region.map_or(true, |r| {
                    endpoint.region.as_deref() == Some(r) || endpoint.region_id.as_deref() == Some(r)
                })
        })
        .map(|endpoint| endpoint.url.clone())
        .ok_or_else(|| RegistryError::EndpointNotFound {
            service_type: service_type.to_string(),
            interface: interface.to_string(),
            region: region.map(ToString::to_string),
        })
}
