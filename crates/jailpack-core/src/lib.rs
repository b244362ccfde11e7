pub mod checksum;
pub mod codec;
pub mod config;
pub mod error;
pub mod extract;
pub mod guard;
pub mod logging;
pub mod metadata;
pub mod provider;
pub mod workflow;

pub use codec::{decode_member, encode_member, ExportTag, Manifest, ManifestEntry};
pub use config::{ArchiveCfg, JailpackConfig, VolumeCfg, ZfsCfg};
pub use error::{JailpackError, JailpackResult};
pub use guard::ensure_within;
pub use metadata::JsonMetadataStore;
pub use provider::{MetadataStore, VolumeEngine};
pub use workflow::{
    ExportPipeline, ExportReport, ImportPipeline, ImportReport, Reporter, WorkflowEvent,
    WorkflowLevel,
};
