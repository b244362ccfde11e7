use crate::error::{JailpackError, JailpackResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Dataset name component that holds every iocage-managed jail.
pub const IOCAGE_DATASET: &str = "iocage";

/// Directory (and dataset) kind that imported datasets always land under.
pub const JAILS_KIND: &str = "jails";

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct VolumeCfg {
    pub pool: String,

    #[serde(default = "default_root")]
    pub root: String,
}

fn default_root() -> String {
    "/iocage".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ZfsCfg {
    #[serde(default)]
    pub path: Option<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for ZfsCfg {
    fn default() -> Self {
        Self {
            path: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ArchiveCfg {
    #[serde(default)]
    pub images_dir: Option<String>,

    #[serde(default = "default_chunk_size_mib")]
    pub chunk_size_mib: u64,

    /// Embed a versioned member manifest in every exported container.
    #[serde(default)]
    pub manifest: bool,

    /// Recompute the container digest against its sidecar before importing.
    #[serde(default)]
    pub verify_on_import: bool,
}

/// Largest accepted read chunk, in MiB.
pub const MAX_CHUNK_SIZE_MIB: u64 = 1024;

fn default_chunk_size_mib() -> u64 {
    10
}

impl Default for ArchiveCfg {
    fn default() -> Self {
        Self {
            images_dir: None,
            chunk_size_mib: default_chunk_size_mib(),
            manifest: false,
            verify_on_import: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JailpackConfig {
    pub volume: VolumeCfg,

    #[serde(default)]
    pub zfs: ZfsCfg,

    #[serde(default)]
    pub archive: ArchiveCfg,

    #[serde(skip)]
    pub path: PathBuf,
}

impl JailpackConfig {
    /// Minimal configuration for a pool mounted at `root`.
    pub fn new(pool: impl Into<String>, root: impl Into<String>) -> Self {
        Self {
            volume: VolumeCfg {
                pool: pool.into(),
                root: root.into(),
            },
            zfs: ZfsCfg::default(),
            archive: ArchiveCfg::default(),
            path: PathBuf::new(),
        }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> JailpackResult<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let mut cfg = if matches!(path.extension().and_then(|ext| ext.to_str()), Some(ext) if ext.eq_ignore_ascii_case("toml"))
        {
            toml::from_str::<Self>(&contents)?
        } else {
            serde_yaml::from_str::<Self>(&contents)?
        };

        cfg.path = path.to_path_buf();

        if cfg.volume.pool.trim().is_empty() {
            return Err(JailpackError::InvalidConfig(
                "volume.pool must name a zfs pool".to_string(),
            ));
        }
        if cfg.archive.chunk_size_mib > MAX_CHUNK_SIZE_MIB {
            return Err(JailpackError::InvalidConfig(format!(
                "archive.chunk_size_mib {} exceeds {MAX_CHUNK_SIZE_MIB}",
                cfg.archive.chunk_size_mib
            )));
        }

        Ok(cfg)
    }

    /// Collect every problem with the configuration instead of stopping at the first.
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();
        let pool = self.volume.pool.trim();
        if pool.is_empty() {
            issues.push("volume.pool is empty".to_string());
        } else if pool.contains('/') || pool.contains('@') {
            issues.push(format!("volume.pool `{pool}` must be a bare pool name"));
        }
        if !Path::new(&self.volume.root).is_absolute() {
            issues.push(format!(
                "volume.root `{}` must be an absolute path",
                self.volume.root
            ));
        }
        if let Some(dir) = &self.archive.images_dir {
            if !Path::new(dir).is_absolute() {
                issues.push(format!("archive.images_dir `{dir}` must be an absolute path"));
            }
        }
        if self.archive.chunk_size_mib == 0 {
            issues.push("archive.chunk_size_mib must be at least 1".to_string());
        } else if self.archive.chunk_size_mib > MAX_CHUNK_SIZE_MIB {
            issues.push(format!(
                "archive.chunk_size_mib must be at most {MAX_CHUNK_SIZE_MIB}"
            ));
        }
        if self.zfs.timeout_secs == 0 {
            issues.push("zfs.timeout_secs must be at least 1".to_string());
        }
        issues
    }

    pub fn root(&self) -> PathBuf {
        PathBuf::from(&self.volume.root)
    }

    /// Staging directory for exported containers and per-dataset streams.
    pub fn images_dir(&self) -> PathBuf {
        match &self.archive.images_dir {
            Some(dir) => PathBuf::from(dir),
            None => self.root().join("images"),
        }
    }

    /// Mountpoint directory for jails of the given kind (`jails`, `templates`).
    pub fn kind_dir(&self, kind: &str) -> PathBuf {
        self.root().join(kind)
    }

    /// Dataset name for a jail of the given kind, e.g. `zroot/iocage/jails/abc`.
    pub fn dataset_for(&self, kind: &str, name: &str) -> String {
        format!("{}/{}/{}/{}", self.volume.pool, IOCAGE_DATASET, kind, name)
    }

    /// Read chunk in bytes, clamped to `1..=MAX_CHUNK_SIZE_MIB` MiB.
    pub fn chunk_size(&self) -> usize {
        let mib = self.archive.chunk_size_mib.clamp(1, MAX_CHUNK_SIZE_MIB) as usize;
        mib * 1024 * 1024
    }

    pub fn zfs_timeout(&self) -> Duration {
        Duration::from_secs(self.zfs.timeout_secs)
    }

    pub fn zfs_binary_path(&self) -> Option<PathBuf> {
        self.zfs.path.as_ref().map(PathBuf::from)
    }
}
