//! Naming rules shared by export and import: the export tag, the flattened
//! archive member names, and the optional versioned manifest.
//!
//! Member names are the interchange format between an export and a later
//! import. A child dataset whose own name contains `_` decodes back to `/`,
//! so such trees only round-trip through the manifest.

use crate::error::{JailpackError, JailpackResult};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Label prefix of the snapshot taken for an export.
pub const SNAPSHOT_PREFIX: &str = "ioc-export-";

/// Extension of the container file.
pub const CONTAINER_EXTENSION: &str = "zip";

/// Extension of the checksum sidecar.
pub const CHECKSUM_EXTENSION: &str = "sha256";

/// Member holding the manifest, when one is written.
pub const MANIFEST_MEMBER: &str = "jailpack-manifest.json";

/// Manifest schema version this build reads and writes.
pub const FORMAT_VERSION: u32 = 1;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Correlates the snapshot, the staging files and the container of one export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportTag {
    uuid: String,
    date: String,
}

impl ExportTag {
    pub fn new(uuid: impl Into<String>, date: impl Into<String>) -> JailpackResult<Self> {
        let uuid = uuid.into();
        let date = date.into();
        let name = format!("{uuid}_{date}");

        if uuid.is_empty() || uuid.contains('/') || uuid.contains('@') {
            return Err(JailpackError::InvalidImageName {
                name,
                reason: format!("`{uuid}` is not a usable jail uuid"),
            });
        }
        if NaiveDate::parse_from_str(&date, DATE_FORMAT).is_err() || date.len() != 10 {
            return Err(JailpackError::InvalidImageName {
                name,
                reason: format!("`{date}` is not a YYYY-MM-DD date"),
            });
        }
        Ok(Self { uuid, date })
    }

    /// Tag for an export started now (UTC calendar day).
    pub fn today(uuid: impl Into<String>) -> JailpackResult<Self> {
        Self::new(uuid, Utc::now().format(DATE_FORMAT).to_string())
    }

    /// Recover the tag from a container file name such as `abc_2024-01-01.zip`.
    pub fn from_container_name(name: &str) -> JailpackResult<Self> {
        let suffix = format!(".{CONTAINER_EXTENSION}");
        let stem = name
            .strip_suffix(&suffix)
            .ok_or_else(|| JailpackError::InvalidImageName {
                name: name.to_string(),
                reason: format!("missing {suffix} extension"),
            })?;
        let (uuid, date) = stem
            .rsplit_once('_')
            .ok_or_else(|| JailpackError::InvalidImageName {
                name: name.to_string(),
                reason: "expected {uuid}_{date}".to_string(),
            })?;
        Self::new(uuid, date)
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn date(&self) -> &str {
        &self.date
    }

    /// `{uuid}_{date}`: container stem and name of the root member.
    pub fn base_name(&self) -> String {
        format!("{}_{}", self.uuid, self.date)
    }

    /// Snapshot label, e.g. `ioc-export-2024-01-01`.
    pub fn snapshot_name(&self) -> String {
        format!("{SNAPSHOT_PREFIX}{}", self.date)
    }

    pub fn container_name(&self) -> String {
        format!("{}.{CONTAINER_EXTENSION}", self.base_name())
    }

    pub fn checksum_name(&self) -> String {
        format!("{}.{CHECKSUM_EXTENSION}", self.base_name())
    }
}

/// Flatten `dataset` (at or below `export_root`) into its member name.
pub fn encode_member(tag: &ExportTag, dataset: &str, export_root: &str) -> JailpackResult<String> {
    if dataset == export_root {
        return Ok(tag.base_name());
    }

    let remainder = dataset
        .strip_prefix(export_root)
        .filter(|rest| rest.starts_with('/') && rest.len() > 1)
        .ok_or_else(|| {
            JailpackError::InvalidConfig(format!(
                "dataset {dataset} is not below export root {export_root}"
            ))
        })?;

    Ok(format!("{}{}", tag.base_name(), remainder.replace('/', "_")))
}

/// Recover the dataset path (relative to the jails directory) of a member:
/// `{uuid}` for the root member, `{uuid}/child/...` otherwise.
pub fn decode_member(member: &str, tag: &ExportTag) -> JailpackResult<String> {
    let base = tag.base_name();
    let rest = member.strip_prefix(&base).ok_or_else(|| {
        JailpackError::malformed(member, format!("expected the `{base}` prefix"))
    })?;

    if rest.is_empty() {
        return Ok(tag.uuid.clone());
    }

    let child = rest.strip_prefix('_').ok_or_else(|| {
        JailpackError::malformed(member, format!("unexpected text after `{base}`"))
    })?;

    let segments: Vec<&str> = child.split('_').collect();
    if segments.iter().any(|segment| segment.is_empty()) {
        return Err(JailpackError::malformed(member, "empty dataset name segment"));
    }

    Ok(format!("{}/{}", tag.uuid, segments.join("/")))
}

/// One archive member and the dataset it restores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub member: String,
    pub dataset: String,
}

/// Versioned member index stored alongside the streams.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub format_version: u32,
    pub uuid: String,
    pub date: String,
    pub members: Vec<ManifestEntry>,
}

impl Manifest {
    /// Build a manifest from `(member, dataset)` pairs where `dataset` is
    /// relative to the jails directory.
    pub fn new(tag: &ExportTag, members: Vec<ManifestEntry>) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            uuid: tag.uuid.clone(),
            date: tag.date.clone(),
            members,
        }
    }

    pub fn to_json(&self) -> JailpackResult<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Parse and check the schema version.
    pub fn from_json(bytes: &[u8]) -> JailpackResult<Self> {
        let manifest: Manifest = serde_json::from_slice(bytes)?;
        if manifest.format_version != FORMAT_VERSION {
            return Err(JailpackError::UnsupportedFormat {
                version: manifest.format_version,
            });
        }
        Ok(manifest)
    }

    pub fn dataset_for(&self, member: &str) -> JailpackResult<&str> {
        self.members
            .iter()
            .find(|entry| entry.member == member)
            .map(|entry| entry.dataset.as_str())
            .ok_or_else(|| JailpackError::malformed(member, "not listed in the manifest"))
    }
}
