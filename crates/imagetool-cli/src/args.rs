//! Command-line arguments.
//!
//! Every option falls back to an environment variable, `IMAGETOOL_*` for the
//! tool's own options and the usual `OS_*` variables for the OpenStack
//! session.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::builder::BoolishValueParser;
use clap::{Parser, ValueEnum};
use imagetool_core::{
    parse_properties, Error, ProgressMode, RotationPolicy, UploadOptions, Visibility,
};
use imagetool_registry::{GlanceAuth, GlanceConfig, KeystoneCredentials, TlsConfig};

/// Tool to handle image downloads and uploads
#[derive(Parser, Debug)]
#[command(name = "os-imagetool")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Local file to send
    #[arg(long, value_name = "FILE", env = "IMAGETOOL_IN_FILE")]
    pub in_file: Option<PathBuf>,

    /// URL of a repository checksum file listing image names
    #[arg(long, value_name = "URL", env = "IMAGETOOL_REPO")]
    pub repo: Option<String>,

    /// Pattern to filter repository images with
    #[arg(long, value_name = "REGEXP", env = "IMAGETOOL_REPO_MATCH_PATTERN")]
    pub repo_match_pattern: Option<String>,

    /// Base URL repository image names are resolved against
    #[arg(long, value_name = "URL", env = "IMAGETOOL_REPO_BASE_URL")]
    pub repo_base_url: Option<String>,

    /// File to save the image to
    #[arg(long, value_name = "FILE", env = "IMAGETOOL_OUT_FILE")]
    pub out_file: Option<PathBuf>,

    /// Download image to file even if the same image already exists
    #[arg(long, env = "IMAGETOOL_OUT_FILE_FORCE", value_parser = BoolishValueParser::new())]
    pub out_file_force: bool,

    /// Name to use in Glance
    #[arg(long, value_name = "NAME", env = "IMAGETOOL_OUT_GLANCE_NAME")]
    pub out_glance_name: Option<String>,

    /// Disk format to use in Glance
    #[arg(long, value_name = "NAME", env = "IMAGETOOL_OUT_DISK_FORMAT", default_value = "qcow2")]
    pub out_glance_disk_format: String,

    /// Container format to use in Glance
    #[arg(long, value_name = "NAME", env = "IMAGETOOL_OUT_CONTAINER_FORMAT", default_value = "bare")]
    pub out_glance_container_format: String,

    /// Minimum disk size required for the image in gigabytes
    #[arg(long, value_name = "GB", env = "IMAGETOOL_OUT_GLANCE_MIN_DISK")]
    pub out_glance_min_disk: Option<u64>,

    /// Minimum RAM size required for the image in megabytes
    #[arg(long, value_name = "MB", env = "IMAGETOOL_OUT_GLANCE_MIN_RAM")]
    pub out_glance_min_ram: Option<u64>,

    /// Additional image properties to set
    #[arg(long, value_name = "KEY=VAL,KEY=VAL,..", env = "IMAGETOOL_OUT_GLANCE_PROPERTY")]
    pub out_glance_properties: Vec<String>,

    /// Upload image to Glance even if the same image already exists
    #[arg(long, env = "IMAGETOOL_OUT_GLANCE_FORCE", value_parser = BoolishValueParser::new())]
    pub out_glance_force: bool,

    /// Visibility of the uploaded image
    #[arg(long, value_name = "NAME", env = "IMAGETOOL_OUT_GLANCE_VISIBILITY", default_value = "private")]
    pub out_glance_visibility: Visibility,

    /// Group name to use in Glance for upload and rotate
    #[arg(long, value_name = "NAME", env = "IMAGETOOL_GLANCE_IMAGE_GROUP")]
    pub glance_image_group: Option<String>,

    /// Rotate images of the image group, keeping NUM old images
    #[arg(long, value_name = "NUM", env = "IMAGETOOL_GLANCE_ROTATE", allow_negative_numbers = true)]
    pub glance_rotate: Option<i64>,

    /// Deactivate old images
    #[arg(long, env = "IMAGETOOL_GLANCE_ROTATE_DEACTIVATE", value_parser = BoolishValueParser::new())]
    pub glance_rotate_deactivate: bool,

    /// Delete old images
    #[arg(long, env = "IMAGETOOL_GLANCE_ROTATE_DELETE", value_parser = BoolishValueParser::new())]
    pub glance_rotate_delete: bool,

    /// Rotate images even when nothing was uploaded
    #[arg(long, env = "IMAGETOOL_GLANCE_ROTATE_FORCE", value_parser = BoolishValueParser::new())]
    pub glance_rotate_force: bool,

    /// Set community visibility on old images
    #[arg(long, env = "IMAGETOOL_GLANCE_ROTATE_HIDE", value_parser = BoolishValueParser::new())]
    pub glance_rotate_hide: bool,

    /// Suffix added to the name of the latest image
    #[arg(long, value_name = "SUFFIX", env = "IMAGETOOL_GLANCE_ROTATE_LATEST_SUFFIX")]
    pub glance_rotate_latest_suffix: Option<String>,

    /// Suffix added to the names of old images
    #[arg(long, value_name = "SUFFIX", env = "IMAGETOOL_GLANCE_ROTATE_OLD_SUFFIX")]
    pub glance_rotate_old_suffix: Option<String>,

    /// Visibility of rotated images
    #[arg(long, value_name = "NAME", env = "IMAGETOOL_GLANCE_ROTATE_VISIBILITY", default_value = "private")]
    pub glance_rotate_visibility: Visibility,

    /// Verify uploaded or downloaded image
    #[arg(long, env = "IMAGETOOL_VERIFY", value_parser = BoolishValueParser::new())]
    pub verify: bool,

    /// Progress display
    #[arg(long, value_enum, env = "IMAGETOOL_PROGRESS", default_value = "auto")]
    pub progress: Progress,

    /// Enable debug logging
    #[arg(long, env = "IMAGETOOL_DEBUG", value_parser = BoolishValueParser::new())]
    pub debug: bool,

    #[command(flatten)]
    pub os: OpenStackArgs,
}

/// OpenStack session options.
#[derive(clap::Args, Debug)]
pub struct OpenStackArgs {
    /// Keystone endpoint
    #[arg(long, env = "OS_AUTH_URL")]
    pub os_auth_url: Option<String>,

    /// User name
    #[arg(long, env = "OS_USERNAME")]
    pub os_username: Option<String>,

    /// Password
    #[arg(long, env = "OS_PASSWORD", hide_env_values = true)]
    pub os_password: Option<String>,

    /// Project name
    #[arg(long, env = "OS_PROJECT_NAME")]
    pub os_project_name: Option<String>,

    /// Project id
    #[arg(long, env = "OS_PROJECT_ID")]
    pub os_project_id: Option<String>,

    /// User domain name
    #[arg(long, env = "OS_USER_DOMAIN_NAME", default_value = "Default")]
    pub os_user_domain_name: String,

    /// Project domain name
    #[arg(long, env = "OS_PROJECT_DOMAIN_NAME", default_value = "Default")]
    pub os_project_domain_name: String,

    /// Region of the image endpoint
    #[arg(long, env = "OS_REGION_NAME")]
    pub os_region_name: Option<String>,

    /// Endpoint interface
    #[arg(long, env = "OS_INTERFACE", default_value = "public")]
    pub os_interface: String,

    /// Pre-issued token
    #[arg(long, env = "OS_TOKEN", hide_env_values = true)]
    pub os_token: Option<String>,

    /// Image endpoint, skipping the catalog lookup
    #[arg(long, env = "OS_IMAGE_URL")]
    pub os_image_url: Option<String>,

    /// CA certificate bundle
    #[arg(long, value_name = "FILE", env = "OS_CACERT")]
    pub os_cacert: Option<PathBuf>,

    /// Client certificate
    #[arg(long, value_name = "FILE", env = "OS_CERT")]
    pub os_cert: Option<PathBuf>,

    /// Client certificate key
    #[arg(long, value_name = "FILE", env = "OS_KEY")]
    pub os_key: Option<PathBuf>,

    /// Skip certificate verification
    #[arg(long, env = "OS_INSECURE", value_parser = BoolishValueParser::new())]
    pub os_insecure: bool,

    /// Total request timeout in seconds
    #[arg(long, value_name = "SECONDS", env = "OS_TIMEOUT")]
    pub os_timeout: Option<u64>,
}

/// Progress display choice.
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Progress {
    /// Interactive when stderr is a terminal
    #[default]
    Auto,
    /// Update one line in place
    Interactive,
    /// One line per percent
    Plain,
    /// No progress output
    None,
}

impl From<Progress> for ProgressMode {
    fn from(progress: Progress) -> Self {
        match progress {
            Progress::Auto => Self::Auto,
            Progress::Interactive => Self::Interactive,
            Progress::Plain => Self::Plain,
            Progress::None => Self::Disabled,
        }
    }
}

impl Args {
    /// Upload parameters for `--out-glance-name`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedKeyValue`] for a bad property.
    pub fn upload_options(&self, name: &str) -> Result<UploadOptions, Error> {
        let mut options = UploadOptions::new(name)
            .with_verify(self.verify)
            .with_disk_format(&self.out_glance_disk_format)
            .with_container_format(&self.out_glance_container_format)
            .with_properties(parse_properties(&self.out_glance_properties)?)
            .with_force(self.out_glance_force)
            .with_visibility(self.out_glance_visibility);
        if let Some(group) = &self.glance_image_group {
            options = options.with_image_group(group);
        }
        if let Some(min_disk) = self.out_glance_min_disk {
            options = options.with_min_disk(min_disk);
        }
        if let Some(min_ram) = self.out_glance_min_ram {
            options = options.with_min_ram(min_ram);
        }
        Ok(options)
    }

    /// Rotation policy from the `--glance-rotate*` options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRotationCount`] when the count is absent or
    /// negative.
    pub fn rotation_policy(&self) -> Result<RotationPolicy, Error> {
        let retain = match self.glance_rotate {
            Some(count) => usize::try_from(count).map_err(|_| Error::InvalidRotationCount {
                value: count.to_string(),
            })?,
            None => {
                return Err(Error::InvalidRotationCount {
                    value: "none".to_string(),
                })
            }
        };
        let mut policy = RotationPolicy::new(retain)
            .with_deactivate(self.glance_rotate_deactivate)
            .with_delete(self.glance_rotate_delete)
            .with_hide(self.glance_rotate_hide)
            .with_visibility(self.glance_rotate_visibility);
        if let Some(suffix) = &self.glance_rotate_latest_suffix {
            policy = policy.with_latest_suffix(suffix);
        }
        if let Some(suffix) = &self.glance_rotate_old_suffix {
            policy = policy.with_rotated_suffix(suffix);
        }
        Ok(policy)
    }
}

impl OpenStackArgs {
    /// Glance client configuration.
    ///
    /// Keystone is used when an auth URL is set; otherwise a token and an
    /// image URL are required.
    ///
    /// # Errors
    ///
    /// Returns an error when no usable credentials are configured.
    pub fn glance_config(&self) -> Result<GlanceConfig> {
        let auth = match (&self.os_auth_url, &self.os_token) {
            (Some(auth_url), _) => {
                let mut credentials = KeystoneCredentials::new(auth_url)
                    .with_user_domain_name(&self.os_user_domain_name)
                    .with_project_domain_name(&self.os_project_domain_name);
                if let Some(token) = &self.os_token {
                    credentials = credentials.with_token(token);
                } else if let (Some(username), Some(password)) =
                    (&self.os_username, &self.os_password)
                {
                    credentials = credentials.with_password(username, password);
                } else {
                    bail!("--os-auth-url needs --os-username and --os-password, or --os-token");
                }
                if let Some(project_id) = &self.os_project_id {
                    credentials = credentials.with_project_id(project_id);
                }
                if let Some(project_name) = &self.os_project_name {
                    credentials = credentials.with_project_name(project_name);
                }
                GlanceAuth::Keystone(credentials)
            }
            (None, Some(token)) => {
                if self.os_image_url.is_none() {
                    bail!("--os-token without --os-auth-url needs --os-image-url");
                }
                GlanceAuth::token(token)
            }
            (None, None) => bail!("no OpenStack credentials, set --os-auth-url or --os-token"),
        };

        let mut config = GlanceConfig::new(auth).with_interface(&self.os_interface);
        if let Some(url) = &self.os_image_url {
            config = config.with_image_url(url);
        }
        if let Some(region) = &self.os_region_name {
            config = config.with_region(region);
        }
        if let Some(seconds) = self.os_timeout {
            config = config.with_timeout(Duration::from_secs(seconds));
        }
        if let Some(tls) = self.tls_config() {
            config = config.with_tls(tls);
        }
        Ok(config)
    }

    fn tls_config(&self) -> Option<TlsConfig> {
        if self.os_cacert.is_none() && self.os_cert.is_none() && !self.os_insecure {
            return None;
        }
        let mut tls = TlsConfig::new();
        if let Some(ca_cert) = &self.os_cacert {
            tls = tls.with_ca_cert(ca_cert);
        }
        if let (Some(cert), Some(key)) = (&self.os_cert, &self.os_key) {
            tls = tls.with_client_cert(cert, key);
        }
        if self.os_insecure {
            tls = tls.insecure();
        }
        Some(tls)
    }
}
