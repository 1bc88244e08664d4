//! Configuration types for the OpenStack clients.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::RegistryError;

/// Default endpoint interface looked up in the service catalog.
pub const DEFAULT_INTERFACE: &str = "public";

/// Default Keystone domain for users and projects.
pub const DEFAULT_DOMAIN: &str = "Default";

/// Configuration for the Glance client.
#[derive(Debug, Clone)]
pub struct GlanceConfig {
    /// How to obtain a token.
    pub auth: GlanceAuth,

    /// Image endpoint override; skips the catalog lookup when set.
    pub image_url: Option<String>,

    /// Region to select in the service catalog.
    pub region: Option<String>,

    /// Endpoint interface (`public`, `internal` or `admin`).
    pub interface: String,

    /// Total request timeout. `None` lets long uploads run to completion.
    pub timeout: Option<Duration>,

    /// Connection establishment timeout.
    pub connect_timeout: Duration,

    /// TLS configuration.
    pub tls: Option<TlsConfig>,

    /// User agent string.
    pub user_agent: String,
}

impl GlanceConfig {
    /// Creates a configuration using `auth`, looking up the public image endpoint.
    ///
    /// # Examples
    ///
    /// ```
    /// use imagetool_registry::{GlanceAuth, GlanceConfig};
    ///
    /// let config = GlanceConfig::new(GlanceAuth::token("gAAAA"))
    ///     .with_image_url("https://glance.example.com:9292");
    /// assert_eq!(config.interface, "public");
    /// assert!(config.timeout.is_none());
    /// ```
    #[must_use]
    pub fn new(auth: GlanceAuth) -> Self {
        Self {
            auth,
            image_url: None,
            region: None,
            interface: DEFAULT_INTERFACE.to_string(),
            timeout: None,
            connect_timeout: Duration::from_secs(30),
            tls: None,
            user_agent: format!("os-imagetool/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    /// Sets the image endpoint override.
    #[must_use]
    pub fn with_image_url(mut self, url: impl Into<String>) -> Self {
        self.image_url = Some(url.into());
        self
    }

    /// Sets the catalog region.
    #[must_use]
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Sets the catalog interface.
    #[must_use]
    pub fn with_interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = interface.into();
        self
    }

    /// Sets the total request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the TLS configuration.
    #[must_use]
    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Builds the HTTP client shared by Keystone and Glance requests.
    ///
    /// # Errors
    ///
    /// Returns an error if TLS material cannot be read or parsed.
    pub fn http_client(&self) -> Result<reqwest::Client, RegistryError> {
        build_http_client(
            &self.user_agent,
            self.connect_timeout,
            self.timeout,
            self.tls.as_ref(),
        )
    }
}

/// Token acquisition for Glance requests.
#[derive(Debug, Clone)]
pub enum GlanceAuth {
    /// A pre-issued token, used as is.
    Token {
        /// Token value.
        token: String,
    },

    /// Keystone v3 authentication.
    Keystone(KeystoneCredentials),
}

impl GlanceAuth {
    /// Creates token authentication.
    #[must_use]
    pub fn token(token: impl Into<String>) -> Self {
        Self::Token {
            token: token.into(),
        }
    }
}

/// Keystone v3 credentials and scope.
#[derive(Debug, Clone)]
pub struct KeystoneCredentials {
    /// Identity endpoint, with or without the `/v3` suffix.
    pub auth_url: String,
    /// User name for password authentication.
    pub username: Option<String>,
    /// Password for password authentication.
    pub password: Option<String>,
    /// Existing token to rescope instead of a password.
    pub token: Option<String>,
    /// Domain of the user.
    pub user_domain_name: String,
    /// Project name for the scope.
    pub project_name: Option<String>,
    /// Project id for the scope; takes precedence over the name.
    pub project_id: Option<String>,
    /// Domain of the project when scoping by name.
    pub project_domain_name: String,
}

impl KeystoneCredentials {
    /// Creates credentials against `auth_url` with default domains.
    #[must_use]
    pub fn new(auth_url: impl Into<String>) -> Self {
        Self {
            auth_url: auth_url.into(),
            username: None,
            password: None,
            token: None,
            user_domain_name: DEFAULT_DOMAIN.to_string(),
            project_name: None,
            project_id: None,
            project_domain_name: DEFAULT_DOMAIN.to_string(),
        }
    }

    /// Sets password authentication.
    ///
    /// # Examples
    ///
    /// ```
    /// use imagetool_registry::KeystoneCredentials;
    ///
    /// let creds = KeystoneCredentials::new("https://keystone.example.com:5000")
    ///     .with_password("admin", "secret")
    ///     .with_project_name("images");
    /// assert_eq!(creds.username.as_deref(), Some("admin"));
    /// assert_eq!(creds.project_domain_name, "Default");
    /// ```
    #[must_use]
    pub fn with_password(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Sets token authentication.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Sets the user domain.
    #[must_use]
    pub fn with_user_domain_name(mut self, domain: impl Into<String>) -> Self {
        self.user_domain_name = domain.into();
        self
    }

    /// Scopes to a project by name.
    #[must_use]
    pub fn with_project_name(mut self, name: impl Into<String>) -> Self {
        self.project_name = Some(name.into());
        self
    }

    /// Scopes to a project by id.
    #[must_use]
    pub fn with_project_id(mut self, id: impl Into<String>) -> Self {
        self.project_id = Some(id.into());
        self
    }

    /// Sets the project domain.
    #[must_use]
    pub fn with_project_domain_name(mut self, domain: impl Into<String>) -> Self {
        self.project_domain_name = domain.into();
        self
    }

    /// Token endpoint URL, `<auth_url>/v3/auth/tokens`.
    ///
    /// # Examples
    ///
    /// ```
    /// use imagetool_registry::KeystoneCredentials;
    ///
    /// let a = KeystoneCredentials::new("https://keystone.example.com:5000/v3/");
    /// let b = KeystoneCredentials::new("https://keystone.example.com:5000");
    /// assert_eq!(a.tokens_url(), b.tokens_url());
    /// assert_eq!(a.tokens_url(), "https://keystone.example.com:5000/v3/auth/tokens");
    /// ```
    #[must_use]
    pub fn tokens_url(&self) -> String {
        let base = self.auth_url.trim_end_matches('/');
        let base = base.strip_suffix("/v3").unwrap_or(base);
        format!("{base}/v3/auth/tokens")
    }
}

/// TLS configuration for HTTPS connections.
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    /// Path to an additional CA certificate bundle.
    pub ca_cert: Option<PathBuf>,

    /// Path to the client certificate file.
    pub client_cert: Option<PathBuf>,

    /// Path to the client private key file.
    pub client_key: Option<PathBuf>,

    /// Whether to skip certificate verification.
    pub insecure_skip_verify: bool,
}

impl TlsConfig {
    /// Creates a TLS configuration with default settings.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ca_cert: None,
            client_cert: None,
            client_key: None,
            insecure_skip_verify: false,
        }
    }

    /// Sets the CA certificate path.
    #[must_use]
    pub fn with_ca_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_cert = Some(path.into());
        self
    }

    /// Sets client certificate and key paths.
    #[must_use]
    pub fn with_client_cert(mut self, cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        self.client_cert = Some(cert.into());
        self.client_key = Some(key.into());
        self
    }

    /// Skips certificate verification.
    #[must_use]
    pub const fn insecure(mut self) -> Self {
        self.insecure_skip_verify = true;
        self
    }
}

/// Builds a `reqwest` client with the given timeouts and TLS material.
///
/// # Errors
///
/// Returns an error if certificate files cannot be read or parsed.
pub fn build_http_client(
    user_agent: &str,
    connect_timeout: Duration,
    timeout: Option<Duration>,
    tls: Option<&TlsConfig>,
) -> Result<reqwest::Client, RegistryError> {
    let mut builder = reqwest::Client::builder()
        .connect_timeout(connect_timeout)
        .user_agent(user_agent);
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }

    if let Some(tls) = tls {
        if tls.insecure_skip_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }

        if let Some(ref ca_cert) = tls.ca_cert {
            let cert_pem = read_pem(ca_cert)?;
            let cert = reqwest::Certificate::from_pem(&cert_pem).map_err(|e| {
                RegistryError::TlsConfig {
                    message: format!("Invalid CA certificate: {e}"),
                }
            })?;
            builder = builder.add_root_certificate(cert);
        }

        if let (Some(cert_path), Some(key_path)) = (&tls.client_cert, &tls.client_key) {
            let mut cert_pem = read_pem(cert_path)?;
            cert_pem.extend_from_slice(&read_pem(key_path)?);
            let identity = reqwest::Identity::from_pem(&cert_pem).map_err(|e| {
                RegistryError::TlsConfig {
                    message: format!("Invalid client certificate: {e}"),
                }
            })?;
            builder = builder.identity(identity);
        }
    }

    builder.build().map_err(|e| RegistryError::TlsConfig {
        message: e.to_string(),
    })
}

fn read_pem(path: &Path) -> Result<Vec<u8>, RegistryError> {
    std::fs::read(path).map_err(|e| RegistryError::IoError {
        path: path.to_path_buf(),
        source: e,
    })
}
