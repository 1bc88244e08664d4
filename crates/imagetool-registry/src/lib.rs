//! # imagetool-registry
//!
//! Network collaborators of os-imagetool.
//!
//! This crate provides the pieces of the image tool that talk HTTP: chunk
//! sources for `http(s)://` locations, discovery of images in checksum
//! repositories, Keystone v3 authentication and a Glance v2 client
//! implementing [`imagetool_core::ImageRegistry`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use imagetool_core::{TransferEngine, UploadOptions};
//! use imagetool_registry::{
//!     GlanceAuth, GlanceClient, GlanceConfig, HttpOpener, KeystoneCredentials,
//!     RepositoryDiscoverer,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let http = reqwest::Client::new();
//!     let mut discoverer = RepositoryDiscoverer::new(
//!         "https://cloud.centos.org/centos/7/images/sha256sum.txt".parse()?,
//!         http.clone(),
//!     );
//!     discoverer.refresh(Some(&regex::Regex::new(r"qcow2$")?)).await?;
//!     let image = discoverer.latest(None).ok_or("no image")?.clone();
//!
//!     let credentials = KeystoneCredentials::new("https://keystone.example.com:5000")
//!         .with_password("admin", "secret")
//!         .with_project_name("images");
//!     let glance = GlanceClient::connect(&GlanceConfig::new(GlanceAuth::Keystone(credentials))).await?;
//!
//!     let engine = TransferEngine::new(Arc::new(HttpOpener::new(http)));
//!     let options = UploadOptions::new("CentOS 7").with_verify(true);
//!     if let Some(id) = engine.download_to_registry(&glance, &image, &options).await? {
//!         println!("{id}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────┐   ┌─────────────┐   ┌──────────────────┐
//! │ RepositoryDiscoverer │   │ HttpOpener  │   │   GlanceClient   │
//! │ (manifest + HEAD)    │   │ (GET body)  │   │ (ImageRegistry)  │
//! └──────────────────────┘   └─────────────┘   └────────┬─────────┘
//!                                                       │ Session
//!                                              ┌────────▼─────────┐
//!                                              │ Keystone v3 auth │
//!                                              └──────────────────┘
//! ```

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod auth;
mod config;
mod discovery;
mod error;
pub mod glance;
mod http;

pub use auth::{CatalogEndpoint, CatalogEntry, Session};
pub use config::{
    build_http_client, GlanceAuth, GlanceConfig, KeystoneCredentials, TlsConfig,
    DEFAULT_DOMAIN, DEFAULT_INTERFACE,
};
pub use discovery::RepositoryDiscoverer;
pub use error::RegistryError;
pub use glance::GlanceClient;
pub use http::{response_source, HttpOpener};

/// Result type for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;
