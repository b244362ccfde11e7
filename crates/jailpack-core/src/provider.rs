use crate::error::JailpackResult;
use std::io::{Read, Write};

/// Abstraction over the snapshot/send/receive primitives of the volume engine.
///
/// Implementations are expected to be thin wrappers over the real system
/// interface so the export and import pipelines can be exercised against a
/// fake that records calls and injects failures.
///
/// Dataset arguments are full dataset names (`zroot/iocage/jails/abc`);
/// snapshot arguments are bare labels (`ioc-export-2024-01-01`).
pub trait VolumeEngine {
    /// Take one atomic snapshot of `dataset` and every descendant.
    fn snapshot_recursive(&self, dataset: &str, snapshot: &str) -> JailpackResult<()>;

    /// Return `dataset` and every descendant dataset name.
    fn list_datasets(&self, dataset: &str) -> JailpackResult<Vec<String>>;

    /// Write the linear send stream of `dataset@snapshot` into `sink`,
    /// returning the number of bytes written.
    fn send_snapshot(
        &self,
        dataset: &str,
        snapshot: &str,
        sink: &mut dyn Write,
    ) -> JailpackResult<u64>;

    /// Reconstruct `dataset` from a send stream read from `source`. With
    /// `force`, an existing dataset at that name is rolled back/overwritten.
    fn receive_stream(&self, dataset: &str, source: &mut dyn Read, force: bool)
        -> JailpackResult<()>;

    /// Destroy `dataset@snapshot` and the same-named snapshot on every descendant.
    fn destroy_snapshot_recursive(&self, dataset: &str, snapshot: &str) -> JailpackResult<()>;
}

/// Per-jail key/value configuration records.
///
/// `jail` is the jail location relative to the volume root, e.g. `jails/abc`.
pub trait MetadataStore {
    fn get_field(&self, jail: &str, key: &str) -> JailpackResult<Option<String>>;

    fn set_field(&self, jail: &str, key: &str, value: &str) -> JailpackResult<()>;
}
