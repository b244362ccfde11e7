use std::path::PathBuf;
use thiserror::Error;

/// Result alias for core operations.
pub type JailpackResult<T> = Result<T, JailpackError>;

#[derive(Error, Debug)]
pub enum JailpackError {
    #[error("[JP1000] io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("[JP1001] toml config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("[JP1002] yaml config parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("[JP1003] json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("[JP1004] archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("[JP1100] configuration error: {0}")]
    InvalidConfig(String),

    #[error("[JP1200] {0} not found!")]
    NotFound(String),

    #[error("[JP1201] multiple images found for {query}: {}", candidates.join(", "))]
    AmbiguousImage {
        query: String,
        candidates: Vec<String>,
    },

    #[error("[JP1202] `{name}` is not a valid image name: {reason}")]
    InvalidImageName { name: String, reason: String },

    #[error("[JP1300] malformed archive member `{member}`: {reason}")]
    MalformedArchiveMember { member: String, reason: String },

    #[error("[JP1301] unsupported archive format version {version}")]
    UnsupportedFormat { version: u32 },

    #[error("[JP1400] path `{candidate}` escapes {root}")]
    PathEscape { root: PathBuf, candidate: String },

    #[error("[JP1500] failed to checksum {path}: {source}")]
    ChecksumIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[JP1501] checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("[JP2000] volume engine error: {0}")]
    VolumeEngine(String),

    #[error("[JP2100] metadata store error: {0}")]
    Metadata(String),
}

impl JailpackError {
    pub fn code(&self) -> &'static str {
        match self {
            JailpackError::Io(_) => "JP1000",
            JailpackError::Toml(_) => "JP1001",
            JailpackError::Yaml(_) => "JP1002",
            JailpackError::Json(_) => "JP1003",
            JailpackError::Archive(_) => "JP1004",
            JailpackError::InvalidConfig(_) => "JP1100",
            JailpackError::NotFound(_) => "JP1200",
            JailpackError::AmbiguousImage { .. } => "JP1201",
            JailpackError::InvalidImageName { .. } => "JP1202",
            JailpackError::MalformedArchiveMember { .. } => "JP1300",
            JailpackError::UnsupportedFormat { .. } => "JP1301",
            JailpackError::PathEscape { .. } => "JP1400",
            JailpackError::ChecksumIo { .. } => "JP1500",
            JailpackError::ChecksumMismatch { .. } => "JP1501",
            JailpackError::VolumeEngine(_) => "JP2000",
            JailpackError::Metadata(_) => "JP2100",
        }
    }

    /// Convenience constructor for member decoding failures.
    pub(crate) fn malformed(member: &str, reason: impl Into<String>) -> Self {
        JailpackError::MalformedArchiveMember {
            member: member.to_string(),
            reason: reason.into(),
        }
    }
}
