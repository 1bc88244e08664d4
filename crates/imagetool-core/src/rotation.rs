//! Retention rotation of an image group.
//!
//! Records are ordered newest first. Index 0 is the latest image; every other
//! record is rotated out, and records past the retention count can be hidden,
//! deactivated or deleted. Planning is pure and only emits changes the record
//! does not already carry, so a second run against unchanged records plans
//! nothing.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::cancel::CancelFlag;
use crate::error::Result;
use crate::record::{ImageFilter, PropertyUpdate, RegistryImageRecord, Visibility};
use crate::registry::ImageRegistry;

/// Format of the rotated-at stamp.
pub const ROTATED_AT_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Target state of an image group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationPolicy {
    /// Number of rotated records kept before hide/deactivate/delete apply.
    pub retain: usize,
    /// Suffix appended to the latest record's name.
    pub latest_suffix: Option<String>,
    /// Suffix appended to rotated records' names.
    pub rotated_suffix: Option<String>,
    /// Deactivate records past the retention count.
    pub deactivate: bool,
    /// Delete records past the retention count.
    pub delete: bool,
    /// Give records past the retention count community visibility.
    pub hide: bool,
    /// Visibility every other record converges to.
    pub visibility: Visibility,
}

impl RotationPolicy {
    /// Creates a policy keeping `retain` rotated records, with no renames
    /// and private visibility.
    ///
    /// # Examples
    ///
    /// ```
    /// use imagetool_core::RotationPolicy;
    ///
    /// let policy = RotationPolicy::new(2).with_rotated_suffix("(OLD)").with_deactivate(true);
    /// assert_eq!(policy.retain, 2);
    /// assert!(policy.deactivate);
    /// ```
    #[must_use]
    pub const fn new(retain: usize) -> Self {
        Self {
            retain,
            latest_suffix: None,
            rotated_suffix: None,
            deactivate: false,
            delete: false,
            hide: false,
            visibility: Visibility::Private,
        }
    }

    /// Sets the latest suffix.
    #[must_use]
    pub fn with_latest_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.latest_suffix = Some(suffix.into());
        self
    }

    /// Sets the rotated suffix.
    #[must_use]
    pub fn with_rotated_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.rotated_suffix = Some(suffix.into());
        self
    }

    /// Enables or disables deactivation.
    #[must_use]
    pub const fn with_deactivate(mut self, deactivate: bool) -> Self {
        self.deactivate = deactivate;
        self
    }

    /// Enables or disables deletion.
    #[must_use]
    pub const fn with_delete(mut self, delete: bool) -> Self {
        self.delete = delete;
        self
    }

    /// Enables or disables hiding.
    #[must_use]
    pub const fn with_hide(mut self, hide: bool) -> Self {
        self.hide = hide;
        self
    }

    /// Sets the target visibility.
    #[must_use]
    pub const fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }
}

/// Mutations planned for one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationStep {
    /// Record id.
    pub id: String,
    /// Record name at planning time.
    pub name: String,
    /// Metadata update, applied only when non-empty.
    pub update: PropertyUpdate,
    /// Issue a deactivate call.
    pub deactivate: bool,
    /// Issue a delete call, after any deactivate, in place of the update.
    pub delete: bool,
}

impl RotationStep {
    /// Returns true if the step changes nothing.
    #[must_use]
    pub const fn is_noop(&self) -> bool {
        self.update.is_empty() && !self.deactivate && !self.delete
    }
}

/// Counts of mutation calls issued by one rotation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RotationReport {
    /// Metadata updates.
    pub updated: usize,
    /// Deactivate calls.
    pub deactivated: usize,
    /// Delete calls.
    pub deleted: usize,
}

impl RotationReport {
    /// Total number of mutation calls.
    #[must_use]
    pub const fn mutations(&self) -> usize {
        self.updated + self.deactivated + self.deleted
    }
}

/// Plans one step per record, newest record first.
///
/// Records are sorted by descending creation time; equal timestamps keep
/// their listing order.
#[must_use]
pub fn plan(
    mut records: Vec<RegistryImageRecord>,
    policy: &RotationPolicy,
    now: DateTime<Utc>,
) -> Vec<RotationStep> {
    records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    records
        .iter()
        .enumerate()
        .map(|(index, record)| plan_record(index, record, policy, now))
        .collect()
}

fn plan_record(
    index: usize,
    record: &RegistryImageRecord,
    policy: &RotationPolicy,
    now: DateTime<Utc>,
) -> RotationStep {
    let mut update = PropertyUpdate::default();
    let latest = index == 0;
    let expired = index > policy.retain;

    let suffix = if latest {
        policy.latest_suffix.as_deref()
    } else {
        policy.rotated_suffix.as_deref()
    };
    if let Some(suffix) = suffix.filter(|s| !record.name.ends_with(s)) {
        update.name = Some(format!("{} {suffix}", record.base_name()));
    }

    if !latest && record.rotated_at.is_none() {
        update.rotated_at = Some(now.format(ROTATED_AT_FORMAT).to_string());
    }
    if record.is_latest != Some(latest) {
        update.is_latest = Some(latest);
    }

    let visibility = if expired && policy.hide {
        Visibility::Community
    } else {
        policy.visibility
    };
    if record.visibility != visibility {
        update.visibility = Some(visibility);
    }

    let delete = expired && policy.delete;
    if delete {
        update = PropertyUpdate::default();
    }

    RotationStep {
        id: record.id.clone(),
        name: record.name.clone(),
        update,
        deactivate: expired && policy.deactivate && record.is_active(),
        delete,
    }
}

/// Applies rotation policies to image groups in a registry.
#[derive(Debug, Clone, Default)]
pub struct RotationEngine {
    cancel: CancelFlag,
}

impl RotationEngine {
    /// Creates an engine.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the cancellation flag checked between steps.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Lists `group`, plans its rotation and applies it.
    ///
    /// # Errors
    ///
    /// Returns the first registry error, or [`crate::Error::Interrupted`]
    /// when cancelled between steps.
    pub async fn rotate(
        &self,
        registry: &dyn ImageRegistry,
        group: &str,
        policy: &RotationPolicy,
        now: DateTime<Utc>,
    ) -> Result<RotationReport> {
        let records = registry
            .list(&ImageFilter::new().with_image_group(group))
            .await?;
        info!(group, images = records.len(), "Rotating image group");
        self.apply(registry, &plan(records, policy, now)).await
    }

    /// Executes planned steps in order.
    ///
    /// # Errors
    ///
    /// Returns the first registry error, or [`crate::Error::Interrupted`]
    /// when cancelled between steps.
    pub async fn apply(
        &self,
        registry: &dyn ImageRegistry,
        steps: &[RotationStep],
    ) -> Result<RotationReport> {
        let mut report = RotationReport::default();
        for step in steps {
            if step.is_noop() {
                debug!(image_id = %step.id, "Image up to date");
                continue;
            }
            self.cancel.check()?;

            if step.delete {
                if step.deactivate {
                    info!(image_id = %step.id, name = %step.name, "Deactivating image");
                    registry.deactivate(&step.id).await?;
                    report.deactivated += 1;
                }
                info!(image_id = %step.id, name = %step.name, "Deleting image");
                registry.delete(&step.id).await?;
                report.deleted += 1;
                continue;
            }
            if !step.update.is_empty() {
                if let Some(new_name) = &step.update.name {
                    info!(image_id = %step.id, from = %step.name, to = %new_name, "Renaming image");
                }
                info!(image_id = %step.id, update = ?step.update, "Updating image");
                registry.update(&step.id, &step.update).await?;
                report.updated += 1;
            }
            if step.deactivate {
                info!(image_id = %step.id, name = %step.name, "Deactivating image");
                registry.deactivate(&step.id).await?;
                report.deactivated += 1;
            }
        }
        Ok(report)
    }
}
