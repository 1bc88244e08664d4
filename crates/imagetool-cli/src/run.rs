//! Orchestration of one tool invocation.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use imagetool_core::{
    CancelFlag, Error, ImageDescriptor, RotationEngine, TransferEngine,
};
use imagetool_registry::{build_http_client, GlanceClient, HttpOpener, RepositoryDiscoverer};
use regex::Regex;
use tracing::info;
use url::Url;

use crate::args::Args;

const USER_AGENT: &str = concat!("os-imagetool/", env!("CARGO_PKG_VERSION"));
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// What an invocation produced.
#[derive(Debug, Default)]
pub struct Outcome {
    /// Absolute path of the written file.
    pub path: Option<PathBuf>,
    /// Id of the uploaded image.
    pub image_id: Option<String>,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(path) = &self.path {
            writeln!(f, "{}", path.display())?;
        }
        if let Some(id) = &self.image_id {
            writeln!(f, "{id}")?;
        }
        Ok(())
    }
}

/// Runs the transfer and rotation selected by `args`.
///
/// # Errors
///
/// Returns tool-level errors as [`imagetool_core::Error`] inside the
/// `anyhow` chain; configuration and connection problems carry context.
pub async fn run(args: &Args, cancel: &CancelFlag) -> Result<Outcome> {
    let mut outcome = Outcome::default();
    let http = build_http_client(USER_AGENT, CONNECT_TIMEOUT, None, None)?;
    let image = resolve_image(args, &http).await?;

    let transfer = TransferEngine::new(Arc::new(HttpOpener::new(http)))
        .with_cancel(cancel.clone())
        .with_progress(args.progress.into());

    let mut client = None;
    let mut do_rotate = false;

    if let Some(out_file) = &args.out_file {
        let image = require(image.as_ref())?;
        info!(image = %image, "Input image");
        outcome.path = transfer
            .download_to_file(image, out_file, args.verify, args.out_file_force)
            .await?;
    } else if let Some(name) = &args.out_glance_name {
        let image = require(image.as_ref())?;
        info!(image = %image, "Input image");
        let options = args.upload_options(name)?;
        let glance = connect(args).await?;
        outcome.image_id = transfer
            .download_to_registry(&glance, image, &options)
            .await?;
        do_rotate = outcome.image_id.is_some() && args.glance_rotate.is_some();
        client = Some(glance);
    }

    if do_rotate || args.glance_rotate_force {
        let policy = args.rotation_policy()?;
        let group = args
            .glance_image_group
            .as_deref()
            .ok_or_else(|| Error::InvalidInput {
                reason: "image rotation needs --glance-image-group".to_string(),
            })?;
        let glance = match client {
            Some(glance) => glance,
            None => connect(args).await?,
        };
        let report = RotationEngine::new()
            .with_cancel(cancel.clone())
            .rotate(&glance, group, &policy, Utc::now())
            .await?;
        info!(
            updated = report.updated,
            deactivated = report.deactivated,
            deleted = report.deleted,
            "Rotation done"
        );
    }

    Ok(outcome)
}

async fn resolve_image(args: &Args, http: &reqwest::Client) -> Result<Option<ImageDescriptor>> {
    if let Some(path) = &args.in_file {
        info!(path = %path.display(), "Opening image file");
        return Ok(Some(ImageDescriptor::from_file(path).await?));
    }
    let Some(repo) = &args.repo else {
        return Ok(None);
    };

    info!(repo = %repo, "Discovering image");
    let manifest_url = Url::parse(repo).with_context(|| format!("invalid repository URL '{repo}'"))?;
    let mut discoverer = RepositoryDiscoverer::new(manifest_url, http.clone());
    if let Some(base) = &args.repo_base_url {
        let base_url =
            Url::parse(base).with_context(|| format!("invalid repository base URL '{base}'"))?;
        discoverer = discoverer.with_base_url(base_url);
    }
    let pattern = args
        .repo_match_pattern
        .as_deref()
        .map(Regex::new)
        .transpose()
        .context("invalid --repo-match-pattern")?;

    discoverer.refresh(pattern.as_ref()).await?;
    Ok(discoverer.latest(pattern.as_ref()).cloned())
}

fn require(image: Option<&ImageDescriptor>) -> Result<&ImageDescriptor, Error> {
    image.ok_or_else(|| Error::MissingSource {
        reason: "no image from repository or from file".to_string(),
    })
}

async fn connect(args: &Args) -> Result<GlanceClient> {
    let config = args.os.glance_config()?;
    let client = GlanceClient::connect(&config)
        .await
        .context("Glance session setup failed")?;
    info!(endpoint = client.endpoint(), "Connected to image service");
    Ok(client)
}
