//! Export: recursive snapshot, one send stream per dataset, zip container,
//! checksum sidecar, then cleanup of the snapshot and the staging files.

use super::{list_subtree, EventLog, Reporter, WorkflowEvent};
use crate::checksum::write_checksum;
use crate::codec::{encode_member, ExportTag, Manifest, ManifestEntry, MANIFEST_MEMBER};
use crate::config::JailpackConfig;
use crate::error::{JailpackError, JailpackResult};
use crate::provider::VolumeEngine;
use std::fs::{self, File};
use std::io::{self, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

/// A dataset whose send stream could not be produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFailure {
    pub dataset: String,
    pub error: String,
}

/// Outcome of a finished export.
#[derive(Debug, Clone)]
pub struct ExportReport {
    pub tag: ExportTag,
    pub container: PathBuf,
    pub checksum: PathBuf,
    pub digest: String,
    /// Member names written to the container, root first.
    pub members: Vec<String>,
    /// Datasets skipped because their stream failed. Non-empty means the
    /// container holds a partial tree.
    pub failed: Vec<StreamFailure>,
    pub events: Vec<WorkflowEvent>,
}

/// A member streamed to the staging directory and ready for archiving.
struct StagedMember {
    member: String,
    dataset: String,
    path: PathBuf,
}

/// Container and sidecar produced before cleanup runs.
struct Archived {
    container: PathBuf,
    checksum: PathBuf,
    digest: String,
    members: Vec<String>,
    failed: Vec<StreamFailure>,
}

/// Serialises a jail's dataset tree into `{images_dir}/{uuid}_{date}.zip`.
///
/// Streaming is best-effort: a dataset whose send fails is reported, left out
/// of the container and listed in [`ExportReport::failed`], and the remaining
/// datasets are still exported.
pub struct ExportPipeline<E: VolumeEngine> {
    config: Arc<JailpackConfig>,
    engine: E,
    reporter: Reporter,
}

impl<E: VolumeEngine> ExportPipeline<E> {
    pub fn new(config: Arc<JailpackConfig>, engine: E) -> Self {
        Self {
            config,
            engine,
            reporter: Reporter::default(),
        }
    }

    pub fn with_reporter(mut self, reporter: Reporter) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn into_engine(self) -> E {
        self.engine
    }

    /// Export the jail `uuid` of the given kind (`jails`, `templates`) tagged with today's date.
    pub fn export(&self, uuid: &str, kind: &str) -> JailpackResult<ExportReport> {
        let tag = ExportTag::today(uuid)?;
        self.export_with_tag(&tag, kind)
    }

    /// Export using an explicit tag.
    pub fn export_with_tag(&self, tag: &ExportTag, kind: &str) -> JailpackResult<ExportReport> {
        let root = self.config.dataset_for(kind, tag.uuid());
        let snapshot = tag.snapshot_name();
        let mut log = EventLog::new(&self.reporter);

        if let Err(err) = self.engine.snapshot_recursive(&root, &snapshot) {
            log.exception(format!("failed to snapshot {root}@{snapshot}: {err}"));
            return Err(err);
        }

        let mut staged = Vec::new();
        let outcome = self.stream_and_archive(tag, &root, &snapshot, &mut staged, &mut log);
        self.cleanup(&root, &snapshot, &staged, &mut log);

        let archived = match outcome {
            Ok(archived) => archived,
            Err(err) => {
                log.exception(format!("export of {root} failed: {err}"));
                return Err(err);
            }
        };

        log.info(format!("Exported: {}", archived.container.display()));
        Ok(ExportReport {
            tag: tag.clone(),
            container: archived.container,
            checksum: archived.checksum,
            digest: archived.digest,
            members: archived.members,
            failed: archived.failed,
            events: log.into_events(),
        })
    }

    /// Enumerate, stream every dataset into staging, bundle and hash the container.
    ///
    /// Every staging file created is pushed onto `staged` so cleanup can
    /// remove it whatever the outcome.
    fn stream_and_archive(
        &self,
        tag: &ExportTag,
        root: &str,
        snapshot: &str,
        staged: &mut Vec<PathBuf>,
        log: &mut EventLog<'_>,
    ) -> JailpackResult<Archived> {
        let datasets = list_subtree(&self.engine, root)?;
        let images = self.config.images_dir();
        fs::create_dir_all(&images)?;

        let mut members = Vec::with_capacity(datasets.len());
        let mut failed = Vec::new();
        for dataset in &datasets {
            let member = encode_member(tag, dataset, root)?;
            let path = images.join(&member);
            log.info(format!("Exporting dataset: {dataset}"));

            staged.push(path.clone());
            match self.stream_dataset(dataset, snapshot, &path) {
                Ok(_) => members.push(StagedMember {
                    member,
                    dataset: dataset.clone(),
                    path,
                }),
                Err(err) => {
                    log.exception(format!("failed to export dataset {dataset}: {err}"));
                    if let Err(remove_err) = fs::remove_file(&path) {
                        if remove_err.kind() != ErrorKind::NotFound {
                            log.exception(format!(
                                "failed to remove {}: {remove_err}",
                                path.display()
                            ));
                        }
                    }
                    failed.push(StreamFailure {
                        dataset: dataset.clone(),
                        error: err.to_string(),
                    });
                }
            }
        }

        if members.is_empty() {
            return Err(JailpackError::VolumeEngine(format!(
                "no dataset under {root} could be streamed"
            )));
        }

        let container = images.join(tag.container_name());
        log.info(format!("Preparing zip file: {}", container.display()));
        if let Err(err) = self.write_container(tag, root, &container, &members) {
            let _ = fs::remove_file(&container);
            return Err(err);
        }

        let (checksum, digest) = write_checksum(&container, self.config.chunk_size())?;

        Ok(Archived {
            container,
            checksum,
            digest,
            members: members.into_iter().map(|staged| staged.member).collect(),
            failed,
        })
    }

    /// Send one dataset's snapshot into its staging file.
    fn stream_dataset(&self, dataset: &str, snapshot: &str, path: &Path) -> JailpackResult<u64> {
        let mut writer = BufWriter::new(File::create(path)?);
        let written = self.engine.send_snapshot(dataset, snapshot, &mut writer)?;
        writer.flush()?;
        Ok(written)
    }

    fn write_container(
        &self,
        tag: &ExportTag,
        root: &str,
        container: &Path,
        members: &[StagedMember],
    ) -> JailpackResult<()> {
        let options = FileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .large_file(true);
        let mut zip = ZipWriter::new(File::create(container)?);

        for staged in members {
            zip.start_file(staged.member.as_str(), options)?;
            let mut source = File::open(&staged.path)?;
            io::copy(&mut source, &mut zip)?;
        }

        if self.config.archive.manifest {
            let entries = members
                .iter()
                .map(|staged| ManifestEntry {
                    member: staged.member.clone(),
                    dataset: relative_dataset(tag, root, &staged.dataset),
                })
                .collect();
            let manifest = Manifest::new(tag, entries);
            zip.start_file(
                MANIFEST_MEMBER,
                FileOptions::default().compression_method(CompressionMethod::Deflated),
            )?;
            zip.write_all(&manifest.to_json()?)?;
        }

        zip.finish()?;
        Ok(())
    }

    /// Destroy the export snapshot and remove every staging file, reporting
    /// (never propagating) failures.
    fn cleanup(&self, root: &str, snapshot: &str, staged: &[PathBuf], log: &mut EventLog<'_>) {
        if let Err(err) = self.engine.destroy_snapshot_recursive(root, snapshot) {
            log.exception(format!("failed to destroy {root}@{snapshot}: {err}"));
        }
        for path in staged {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => {
                    log.exception(format!("failed to remove {}: {err}", path.display()));
                }
            }
        }
    }
}

/// `{uuid}` or `{uuid}/child/...` for a dataset below the export root.
fn relative_dataset(tag: &ExportTag, root: &str, dataset: &str) -> String {
    let remainder = dataset.strip_prefix(root).unwrap_or_default();
    format!("{}{}", tag.uuid(), remainder)
}
