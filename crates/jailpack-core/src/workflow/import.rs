//! Import: locate a container, map every member back to its dataset, receive
//! the streams, turn templates into jails, and drop the carried-over snapshot.

use super::{EventLog, Reporter, WorkflowEvent};
use crate::checksum::verify_checksum;
use crate::codec::{decode_member, ExportTag, Manifest, CONTAINER_EXTENSION, MANIFEST_MEMBER};
use crate::config::{JailpackConfig, JAILS_KIND};
use crate::error::{JailpackError, JailpackResult};
use crate::extract::extract_zip;
use crate::guard::ensure_within;
use crate::provider::{MetadataStore, VolumeEngine};
use glob::Pattern;
use std::fs::{self, File};
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use zip::ZipArchive;

/// Outcome of a finished import.
#[derive(Debug, Clone)]
pub struct ImportReport {
    pub tag: ExportTag,
    pub container: PathBuf,
    /// Datasets received, parents first.
    pub received: Vec<String>,
    /// Whether the imported jail was a template turned into a jail.
    pub converted_template: bool,
    pub events: Vec<WorkflowEvent>,
}

/// One archive member scheduled for receive.
#[derive(Debug)]
struct PlannedMember {
    index: usize,
    member: String,
    /// `{uuid}` or `{uuid}/child/...`
    dataset: String,
}

/// Rebuilds a jail's dataset tree from a container in the images directory.
///
/// Import is fail-fast: every member is decoded and checked before the first
/// receive, and the first receive failure aborts the run.
pub struct ImportPipeline<E: VolumeEngine, M: MetadataStore> {
    config: Arc<JailpackConfig>,
    engine: E,
    store: M,
    reporter: Reporter,
}

impl<E: VolumeEngine, M: MetadataStore> ImportPipeline<E, M> {
    pub fn new(config: Arc<JailpackConfig>, engine: E, store: M) -> Self {
        Self {
            config,
            engine,
            store,
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

    pub fn store(&self) -> &M {
        &self.store
    }

    pub fn into_engine(self) -> E {
        self.engine
    }

    /// Find the single container matching `{identifier}*.zip`.
    pub fn discover(&self, identifier: &str) -> JailpackResult<PathBuf> {
        let images = self.config.images_dir();
        let entries = match fs::read_dir(&images) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(JailpackError::NotFound(identifier.to_string()))
            }
            Err(err) => return Err(err.into()),
        };

        let pattern = Pattern::new(&format!("{identifier}*.{CONTAINER_EXTENSION}")).map_err(
            |err| JailpackError::InvalidImageName {
                name: identifier.to_string(),
                reason: format!("not a usable search pattern: {}", err.msg),
            },
        )?;
        let mut matches = Vec::new();
        for entry in entries {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                if pattern.matches(name) {
                    matches.push(name.to_string());
                }
            }
        }
        matches.sort();

        match matches.len() {
            0 => Err(JailpackError::NotFound(identifier.to_string())),
            1 => Ok(images.join(&matches[0])),
            _ => Err(JailpackError::AmbiguousImage {
                query: identifier.to_string(),
                candidates: matches,
            }),
        }
    }

    /// Import the container matching `identifier` into the jails dataset.
    pub fn import(&self, identifier: &str) -> JailpackResult<ImportReport> {
        let mut log = EventLog::new(&self.reporter);
        let container = self.discover(identifier).map_err(|err| {
            log.exception(err.to_string());
            err
        })?;
        let name = container
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default();
        let tag = ExportTag::from_container_name(name).map_err(|err| {
            log.exception(err.to_string());
            err
        })?;

        if self.config.archive.verify_on_import {
            let digest = verify_checksum(&container, self.config.chunk_size())?;
            log.info(format!("Checksum verified: {digest}"));
        }

        let mut zip = ZipArchive::new(File::open(&container)?)?;
        let plan = match self.plan_members(&mut zip, &tag) {
            Ok(plan) => plan,
            Err(err) => {
                log.exception(format!(
                    "refusing to import {}: {err}",
                    container.display()
                ));
                return Err(err);
            }
        };

        let mut received = Vec::with_capacity(plan.len());
        let outcome = self
            .receive_members(&mut zip, &plan, &mut received, &mut log)
            .and_then(|_| self.fixup_metadata(&tag, &mut log));
        self.cleanup(&tag, &mut log);

        let converted_template = match outcome {
            Ok(converted) => converted,
            Err(err) => {
                log.exception(format!("import of {} failed: {err}", tag.uuid()));
                return Err(err);
            }
        };

        log.info(format!("Imported: {}", tag.uuid()));
        Ok(ImportReport {
            tag,
            container,
            received,
            converted_template,
            events: log.into_events(),
        })
    }

    /// Extract the container matching `identifier` into `dest`, guarding every entry.
    pub fn unpack(&self, identifier: &str, dest: &Path) -> JailpackResult<Vec<PathBuf>> {
        let container = self.discover(identifier)?;
        extract_zip(&container, dest)
    }

    /// Map every member to its dataset and check it stays inside the jail.
    fn plan_members<R>(
        &self,
        zip: &mut ZipArchive<R>,
        tag: &ExportTag,
    ) -> JailpackResult<Vec<PlannedMember>>
    where
        R: Read + std::io::Seek,
    {
        let manifest = match zip.by_name(MANIFEST_MEMBER) {
            Ok(mut entry) => {
                let mut bytes = Vec::new();
                entry.read_to_end(&mut bytes)?;
                Some(Manifest::from_json(&bytes)?)
            }
            Err(zip::result::ZipError::FileNotFound) => None,
            Err(err) => return Err(err.into()),
        };
        if let Some(manifest) = &manifest {
            if manifest.uuid != tag.uuid() || manifest.date != tag.date() {
                return Err(JailpackError::malformed(
                    MANIFEST_MEMBER,
                    format!(
                        "describes {}_{} but the container is {}",
                        manifest.uuid,
                        manifest.date,
                        tag.base_name()
                    ),
                ));
            }
        }

        let jail_dir = self.config.kind_dir(JAILS_KIND).join(tag.uuid());
        let mut plan = Vec::with_capacity(zip.len());
        for index in 0..zip.len() {
            let entry = zip.by_index(index)?;
            let member = entry.name().to_string();
            if entry.is_dir() || member == MANIFEST_MEMBER {
                continue;
            }

            let dataset = match &manifest {
                Some(manifest) => manifest.dataset_for(&member)?.to_string(),
                None => decode_member(&member, tag)?,
            };
            check_containment(&jail_dir, tag, &member, &dataset)?;
            plan.push(PlannedMember {
                index,
                member,
                dataset,
            });
        }

        if plan.is_empty() {
            return Err(JailpackError::malformed(
                &tag.container_name(),
                "container holds no dataset streams",
            ));
        }

        plan.sort_by_key(|planned| planned.dataset.matches('/').count());
        Ok(plan)
    }

    fn receive_members<R>(
        &self,
        zip: &mut ZipArchive<R>,
        plan: &[PlannedMember],
        received: &mut Vec<String>,
        log: &mut EventLog<'_>,
    ) -> JailpackResult<()>
    where
        R: Read + std::io::Seek,
    {
        for planned in plan {
            let target = self.config.dataset_for(JAILS_KIND, &planned.dataset);
            log.info(format!("Importing dataset: {}", planned.dataset));

            let mut entry = zip.by_index(planned.index)?;
            if let Err(err) = self.engine.receive_stream(&target, &mut entry, true) {
                log.exception(format!(
                    "failed to receive member {} into {target}: {err}",
                    planned.member
                ));
                return Err(err);
            }
            received.push(target);
        }
        Ok(())
    }

    /// Imported templates become regular jails. Returns whether a change was made.
    fn fixup_metadata(&self, tag: &ExportTag, log: &mut EventLog<'_>) -> JailpackResult<bool> {
        let jail = format!("{JAILS_KIND}/{}", tag.uuid());
        if self.store.get_field(&jail, "type")?.as_deref() != Some("template") {
            return Ok(false);
        }
        self.store.set_field(&jail, "type", "jail")?;
        self.store.set_field(&jail, "template", "0")?;
        log.info(format!("Converted template {} into a jail", tag.uuid()));
        Ok(true)
    }

    fn cleanup(&self, tag: &ExportTag, log: &mut EventLog<'_>) {
        let root = self.config.dataset_for(JAILS_KIND, tag.uuid());
        let snapshot = tag.snapshot_name();
        if let Err(err) = self.engine.destroy_snapshot_recursive(&root, &snapshot) {
            log.exception(format!("failed to destroy {root}@{snapshot}: {err}"));
        }
    }
}

/// A decoded dataset must live at or below the imported jail, both as a
/// dataset name and as a mountpoint under the jails directory.
fn check_containment(
    jail_dir: &Path,
    tag: &ExportTag,
    member: &str,
    dataset: &str,
) -> JailpackResult<()> {
    let below = if dataset == tag.uuid() {
        "."
    } else {
        dataset
            .strip_prefix(tag.uuid())
            .and_then(|rest| rest.strip_prefix('/'))
            .ok_or_else(|| {
                JailpackError::malformed(
                    member,
                    format!("dataset {dataset} is outside jail {}", tag.uuid()),
                )
            })?
    };

    ensure_within(jail_dir, below)?;

    if below != "." && below.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..") {
        return Err(JailpackError::malformed(
            member,
            format!("dataset {dataset} contains relative segments"),
        ));
    }
    Ok(())
}
