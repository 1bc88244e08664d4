//! Registry image records and the requests made against them.
//!
//! The registry stores arbitrary string properties per image. The tool keeps
//! its own bookkeeping under the private keys in [`keys`]; everything else is
//! carried through untouched in [`RegistryImageRecord::extra`].

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::checksum::ChecksumAlgorithm;
use crate::error::{Error, Result};

/// Registry-private property keys. Backends must store them verbatim.
pub mod keys {
    use crate::checksum::ChecksumAlgorithm;

    /// Image group tag.
    pub const IMAGE_GROUP: &str = "_image_group";
    /// Prefix of the per-algorithm checksum tags.
    pub const CHECKSUM_PREFIX: &str = "_checksum_";
    /// Time the record was first rotated out.
    pub const ROTATED: &str = "_rotated";
    /// Display name requested at upload time.
    pub const ORIGINAL_NAME: &str = "_orig_name";
    /// Whether the record is the newest of its group.
    pub const IS_LATEST: &str = "_is_latest";

    /// Returns the checksum tag for `algorithm`, e.g. `_checksum_sha256`.
    #[must_use]
    pub fn checksum(algorithm: ChecksumAlgorithm) -> String {
        format!("{CHECKSUM_PREFIX}{algorithm}")
    }
}

/// Registry image visibility.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// Visible to every project.
    Public,
    /// Visible to the owner only.
    #[default]
    Private,
    /// Visible to the owner and explicit members.
    Shared,
    /// Usable by everyone but not listed by default.
    Community,
}

impl Visibility {
    /// Returns the registry's name for this visibility.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
            Self::Shared => "shared",
            Self::Community => "community",
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Visibility {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "public" => Ok(Self::Public),
            "private" => Ok(Self::Private),
            "shared" => Ok(Self::Shared),
            "community" => Ok(Self::Community),
            _ => Err(Error::InvalidInput {
                reason: format!("unknown visibility '{s}'"),
            }),
        }
    }
}

/// Lifecycle state of a registry image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageStatus {
    /// Record exists, no data yet.
    Queued,
    /// Data upload in progress.
    Saving,
    /// Staged data being uploaded.
    Uploading,
    /// Staged data being imported.
    Importing,
    /// Available for use.
    Active,
    /// Data download disabled.
    Deactivated,
    /// Upload failed.
    Killed,
    /// Deleted.
    Deleted,
    /// Scheduled for deletion.
    PendingDelete,
    /// Status this crate does not know about.
    Other(String),
}

impl ImageStatus {
    /// Returns the registry's name for this status.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Queued => "queued",
            Self::Saving => "saving",
            Self::Uploading => "uploading",
            Self::Importing => "importing",
            Self::Active => "active",
            Self::Deactivated => "deactivated",
            Self::Killed => "killed",
            Self::Deleted => "deleted",
            Self::PendingDelete => "pending_delete",
            Self::Other(s) => s,
        }
    }
}

impl From<&str> for ImageStatus {
    fn from(s: &str) -> Self {
        match s {
            "queued" => Self::Queued,
            "saving" => Self::Saving,
            "uploading" => Self::Uploading,
            "importing" => Self::Importing,
            "active" => Self::Active,
            "deactivated" => Self::Deactivated,
            "killed" => Self::Killed,
            "deleted" => Self::Deleted,
            "pending_delete" => Self::PendingDelete,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for ImageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed view of one registry image.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryImageRecord {
    /// Registry-assigned identifier.
    pub id: String,
    /// Current display name.
    pub name: String,
    /// Lifecycle state.
    pub status: ImageStatus,
    /// Visibility.
    pub visibility: Visibility,
    /// Creation time, used to order a group newest first.
    pub created_at: DateTime<Utc>,
    /// Image group tag.
    pub image_group: Option<String>,
    /// Display name requested at upload time. Never overwritten.
    pub original_name: Option<String>,
    /// Latest flag, `None` when never set.
    pub is_latest: Option<bool>,
    /// Rotated-at stamp as stored.
    pub rotated_at: Option<String>,
    /// Stored checksums by algorithm.
    pub checksums: BTreeMap<ChecksumAlgorithm, String>,
    /// Every other attribute, as returned by the registry.
    pub extra: Map<String, Value>,
}

impl RegistryImageRecord {
    /// Creates an active private record with no tool properties.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status: ImageStatus::Active,
            visibility: Visibility::Private,
            created_at,
            image_group: None,
            original_name: None,
            is_latest: None,
            rotated_at: None,
            checksums: BTreeMap::new(),
            extra: Map::new(),
        }
    }

    /// Parses a record from the registry's JSON image object.
    ///
    /// `id` and `created_at` are required. Custom properties arrive
    /// as strings; the latest flag accepts `true`, `True` and `1`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] when a required attribute is missing
    /// or malformed.
    ///
    /// # Examples
    ///
    /// ```
    /// use imagetool_core::record::RegistryImageRecord;
    /// use serde_json::json;
    ///
    /// let record = RegistryImageRecord::from_json(json!({
    ///     "id": "0b2c",
    ///     "name": "CentOS 7 (latest)",
    ///     "status": "active",
    ///     "visibility": "public",
    ///     "created_at": "2017-03-01T10:00:00Z",
    ///     "_orig_name": "CentOS 7",
    ///     "_is_latest": "true",
    /// })).unwrap();
    /// assert_eq!(record.base_name(), "CentOS 7");
    /// assert_eq!(record.is_latest, Some(true));
    /// ```
    pub fn from_json(value: Value) -> Result<Self> {
        let Value::Object(mut object) = value else {
            return Err(invalid("image record is not a JSON object"));
        };

        let id = take_string(&mut object, "id").ok_or_else(|| invalid("image record without id"))?;
        let name = take_string(&mut object, "name").unwrap_or_default();
        let created_at = take_string(&mut object, "created_at")
            .ok_or_else(|| invalid(format!("image {id} without created_at")))?;
        let created_at = DateTime::parse_from_rfc3339(&created_at)
            .map_err(|e| invalid(format!("image {id}: bad created_at '{created_at}': {e}")))?
            .with_timezone(&Utc);

        let status = take_string(&mut object, "status")
            .map_or(ImageStatus::Active, |s| ImageStatus::from(s.as_str()));
        let visibility = take_string(&mut object, "visibility")
            .map(|v| v.parse::<Visibility>())
            .transpose()?
            .unwrap_or_default();

        let image_group = take_string(&mut object, keys::IMAGE_GROUP);
        let original_name = take_string(&mut object, keys::ORIGINAL_NAME);
        let rotated_at = take_string(&mut object, keys::ROTATED);
        let is_latest = object.remove(keys::IS_LATEST).map(|v| match v {
            Value::Bool(b) => b,
            Value::String(s) => matches!(s.as_str(), "true" | "True" | "1"),
            _ => false,
        });

        let mut checksums = BTreeMap::new();
        let checksum_keys: Vec<String> = object
            .keys()
            .filter(|k| k.starts_with(keys::CHECKSUM_PREFIX))
            .cloned()
            .collect();
        for key in checksum_keys {
            let Ok(algorithm) = key[keys::CHECKSUM_PREFIX.len()..].parse::<ChecksumAlgorithm>()
            else {
                continue;
            };
            if let Some(checksum) = take_string(&mut object, &key) {
                checksums.insert(algorithm, checksum.to_ascii_lowercase());
            }
        }

        Ok(Self {
            id,
            name,
            status,
            visibility,
            created_at,
            image_group,
            original_name,
            is_latest,
            rotated_at,
            checksums,
            extra: object,
        })
    }

    /// Base for renames: the original name, else the current name.
    #[must_use]
    pub fn base_name(&self) -> &str {
        self.original_name.as_deref().unwrap_or(&self.name)
    }

    /// Returns the stored checksum for `algorithm`.
    #[must_use]
    pub fn checksum(&self, algorithm: ChecksumAlgorithm) -> Option<&str> {
        self.checksums.get(&algorithm).map(String::as_str)
    }

    /// Returns true when the record is active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == ImageStatus::Active
    }
}

fn take_string(object: &mut Map<String, Value>, key: &str) -> Option<String> {
    match object.remove(key)? {
        Value::String(s) => Some(s),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn invalid(reason: impl Into<String>) -> Error {
    Error::InvalidInput {
        reason: reason.into(),
    }
}

/// Selection criteria for listing registry images. Empty matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageFilter {
    /// Required image group tag.
    pub image_group: Option<String>,
    /// Required checksum under the given algorithm's tag.
    pub checksum: Option<(ChecksumAlgorithm, String)>,
}

impl ImageFilter {
    /// Creates a filter that matches every record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts to one image group.
    #[must_use]
    pub fn with_image_group(mut self, group: impl Into<String>) -> Self {
        self.image_group = Some(group.into());
        self
    }

    /// Restricts to records carrying `checksum` under `algorithm`.
    #[must_use]
    pub fn with_checksum(mut self, algorithm: ChecksumAlgorithm, checksum: impl AsRef<str>) -> Self {
        self.checksum = Some((algorithm, checksum.as_ref().to_ascii_lowercase()));
        self
    }

    /// Returns true if `record` satisfies every criterion.
    #[must_use]
    pub fn matches(&self, record: &RegistryImageRecord) -> bool {
        let group_ok = self
            .image_group
            .as_deref()
            .map_or(true, |g| record.image_group.as_deref() == Some(g));
        let checksum_ok = self
            .checksum
            .as_ref()
            .map_or(true, |(algo, sum)| record.checksum(*algo) == Some(sum.as_str()));
        group_ok && checksum_ok
    }
}

/// Attributes of a record to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewImage {
    /// Display name.
    pub name: String,
    /// Disk format hint, e.g. `qcow2`.
    pub disk_format: String,
    /// Container format hint, e.g. `bare`.
    pub container_format: String,
    /// Initial visibility.
    pub visibility: Visibility,
    /// Minimum disk size in gigabytes.
    pub min_disk: Option<u64>,
    /// Minimum RAM in megabytes.
    pub min_ram: Option<u64>,
    /// String properties, tool-private keys included.
    pub properties: BTreeMap<String, String>,
}

/// Metadata changes for one record. Unset fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyUpdate {
    /// New display name.
    pub name: Option<String>,
    /// New visibility.
    pub visibility: Option<Visibility>,
    /// New latest flag.
    pub is_latest: Option<bool>,
    /// Rotated-at stamp to set.
    pub rotated_at: Option<String>,
}

impl PropertyUpdate {
    /// Returns true if nothing would change.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.visibility.is_none()
            && self.is_latest.is_none()
            && self.rotated_at.is_none()
    }

    /// Flattens the update into registry attribute/value pairs.
    ///
    /// # Examples
    ///
    /// ```
    /// use imagetool_core::record::PropertyUpdate;
    ///
    /// let update = PropertyUpdate { is_latest: Some(false), ..PropertyUpdate::default() };
    /// assert_eq!(update.entries(), vec![("_is_latest".to_string(), "false".to_string())]);
    /// ```
    #[must_use]
    pub fn entries(&self) -> Vec<(String, String)> {
        let mut entries = Vec::new();
        if let Some(name) = &self.name {
            entries.push(("name".to_string(), name.clone()));
        }
        if let Some(visibility) = self.visibility {
            entries.push(("visibility".to_string(), visibility.to_string()));
        }
        if let Some(is_latest) = self.is_latest {
            entries.push((keys::IS_LATEST.to_string(), is_latest.to_string()));
        }
        if let Some(rotated_at) = &self.rotated_at {
            entries.push((keys::ROTATED.to_string(), rotated_at.clone()));
        }
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2017, 3, 1, 10, 0, 0).unwrap()
    }

    #[test]
    fn test_from_json_full() {
        let record = RegistryImageRecord::from_json(json!({
            "id": "abc",
            "name": "CentOS 7 (OLD)",
            "status": "deactivated",
            "visibility": "community",
            "created_at": "2017-03-01T10:00:00Z",
            "disk_format": "qcow2",
            "_image_group": "centos7",
            "_orig_name": "CentOS 7",
            "_rotated": "2017-03-02T10:00:00Z",
            "_is_latest": "False",
            "_checksum_sha256": "ABCDEF",
            "_checksum_whirlpool": "123",
        }))
        .unwrap();

        assert_eq!(record.id, "abc");
        assert_eq!(record.status, ImageStatus::Deactivated);
        assert_eq!(record.visibility, Visibility::Community);
        assert_eq!(record.created_at, ts());
        assert_eq!(record.image_group.as_deref(), Some("centos7"));
        assert_eq!(record.base_name(), "CentOS 7");
        assert_eq!(record.is_latest, Some(false));
        assert_eq!(record.rotated_at.as_deref(), Some("2017-03-02T10:00:00Z"));
        assert_eq!(record.checksum(ChecksumAlgorithm::Sha256), Some("abcdef"));
        assert!(record.extra.contains_key("disk_format"));
        assert!(record.extra.contains_key("_checksum_whirlpool"));
        assert!(!record.extra.contains_key("_image_group"));
    }

    #[test]
    fn test_from_json_latest_flag_variants() {
        for (value, expected) in [
            (json!("true"), true),
            (json!("True"), true),
            (json!("1"), true),
            (json!(true), true),
            (json!("no"), false),
        ] {
            let record = RegistryImageRecord::from_json(json!({
                "id": "x",
                "name": "x",
                "created_at": "2017-03-01T10:00:00Z",
                "_is_latest": value,
            }))
            .unwrap();
            assert_eq!(record.is_latest, Some(expected));
        }
    }

    #[test]
    fn test_from_json_requires_id_and_created_at() {
        assert!(RegistryImageRecord::from_json(json!({"name": "x"})).is_err());
        assert!(RegistryImageRecord::from_json(json!({"id": "x"})).is_err());
        assert!(RegistryImageRecord::from_json(json!({
            "id": "x",
            "created_at": "yesterday"
        }))
        .is_err());
        assert!(RegistryImageRecord::from_json(json!([])).is_err());
    }

    #[test]
    fn test_base_name_falls_back_to_name() {
        let record = RegistryImageRecord::new("id", "Fedora 25", ts());
        assert_eq!(record.base_name(), "Fedora 25");
    }

    #[test]
    fn test_filter_matches() {
        let mut record = RegistryImageRecord::new("id", "img", ts());
        record.image_group = Some("centos7".to_string());
        record
            .checksums
            .insert(ChecksumAlgorithm::Sha256, "abc".to_string());

        assert!(ImageFilter::new().matches(&record));
        assert!(ImageFilter::new().with_image_group("centos7").matches(&record));
        assert!(!ImageFilter::new().with_image_group("fedora").matches(&record));
        assert!(ImageFilter::new()
            .with_checksum(ChecksumAlgorithm::Sha256, "ABC")
            .matches(&record));
        assert!(!ImageFilter::new()
            .with_checksum(ChecksumAlgorithm::Md5, "abc")
            .matches(&record));
    }

    #[test]
    fn test_visibility_parse() {
        assert_eq!("Public".parse::<Visibility>().unwrap(), Visibility::Public);
        assert_eq!("community".parse::<Visibility>().unwrap(), Visibility::Community);
        assert!(matches!(
            "secret".parse::<Visibility>(),
            Err(Error::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_status_roundtrip_names() {
        assert_eq!(ImageStatus::from("pending_delete"), ImageStatus::PendingDelete);
        assert_eq!(
            ImageStatus::from("frozen"),
            ImageStatus::Other("frozen".to_string())
        );
        assert_eq!(ImageStatus::PendingDelete.to_string(), "pending_delete");
    }

    #[test]
    fn test_update_entries() {
        let update = PropertyUpdate::default();
        assert!(update.is_empty());
        assert!(update.entries().is_empty());

        let update = PropertyUpdate {
            name: Some("CentOS 7 (OLD)".to_string()),
            visibility: Some(Visibility::Community),
            is_latest: Some(false),
            rotated_at: Some("2017-03-02T10:00:00Z".to_string()),
        };
        assert!(!update.is_empty());
        let keys: Vec<String> = update.entries().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["name", "visibility", "_is_latest", "_rotated"]);
    }

    #[test]
    fn test_checksum_key() {
        assert_eq!(keys::checksum(ChecksumAlgorithm::Sha512), "_checksum_sha512");
    }
}
