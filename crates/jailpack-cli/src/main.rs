//! Jailpack command-line interface: export jails into portable containers and
//! import them back.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use jailpack_core::{
    checksum::{verify_checksum, write_checksum},
    codec::ExportTag,
    extract::extract_archive,
    logging,
    workflow::{WorkflowCallback, WorkflowEvent},
    ExportPipeline, ImportPipeline, JailpackConfig, JsonMetadataStore, Reporter,
};
use jailpack_zfs::SystemVolumeEngine;
use schemars::schema_for;
use serde_json::to_string_pretty;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Top-level command-line options shared by every subcommand.
#[derive(Parser, Debug)]
#[command(
    name = "jailpack",
    version,
    about = "Export and import jail dataset trees as portable containers."
)]
struct Cli {
    /// Path to the jailpack configuration file.
    #[arg(short, long, default_value = "/usr/local/etc/jailpack.toml")]
    config: PathBuf,

    /// Only log; do not echo progress messages.
    #[arg(short, long, global = true)]
    silent: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Snapshot a jail and bundle its dataset tree into the images directory.
    Export {
        /// Jail identifier.
        uuid: String,

        /// Export from the templates directory instead of jails.
        #[arg(long)]
        template: bool,

        /// Tag date (YYYY-MM-DD); defaults to today.
        #[arg(long)]
        date: Option<String>,
    },

    /// Restore a jail from the container matching `<identifier>*.zip`.
    Import {
        /// Jail identifier or container name prefix.
        identifier: String,
    },

    /// Extract a container's members without touching any dataset.
    Unpack {
        /// Jail identifier or container name prefix.
        identifier: Option<String>,

        /// Extract this zip or tar file instead of searching the images directory.
        #[arg(long, conflicts_with = "identifier")]
        archive: Option<PathBuf>,

        /// Destination directory.
        #[arg(short, long)]
        dest: PathBuf,
    },

    /// Compute a container's digest and write the `.sha256` sidecar.
    Checksum {
        container: PathBuf,
    },

    /// Recompute a container's digest and compare it with the sidecar.
    Verify {
        container: PathBuf,
    },

    /// Validate a configuration file or emit the config schema.
    Validate {
        /// Path to the configuration file to validate.
        #[arg(short = 'f', long, default_value = "/usr/local/etc/jailpack.toml")]
        file: PathBuf,

        /// Output the JSON schema instead of validating a file.
        #[arg(long)]
        schema: bool,
    },
}

/// Entry point: parse arguments and surface errors with an exit code.
fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    logging::init("info");
    let cli = Cli::parse();
    let reporter = Reporter::new(Some(print_event()), cli.silent);

    match cli.command {
        Commands::Export {
            uuid,
            template,
            date,
        } => {
            let config = load_config(&cli.config)?;
            let engine = SystemVolumeEngine::from_config(&config)?;
            let tag = match date {
                Some(date) => ExportTag::new(uuid, date)?,
                None => ExportTag::today(uuid)?,
            };
            let kind = if template { "templates" } else { "jails" };
            let pipeline = ExportPipeline::new(config, engine).with_reporter(reporter);
            let report = pipeline
                .export_with_tag(&tag, kind)
                .with_context(|| format!("export of {} failed", tag.uuid()))?;
            for failure in &report.failed {
                eprintln!("  skipped {}: {}", failure.dataset, failure.error);
            }
            println!("{}  {}", report.digest, report.container.display());
        }
        Commands::Import { identifier } => {
            let config = load_config(&cli.config)?;
            let engine = SystemVolumeEngine::from_config(&config)?;
            let store = JsonMetadataStore::new(config.root());
            let pipeline = ImportPipeline::new(config, engine, store).with_reporter(reporter);
            let report = pipeline
                .import(&identifier)
                .with_context(|| format!("import of {identifier} failed"))?;
            for dataset in report.received {
                println!("  - {dataset}");
            }
        }
        Commands::Unpack {
            identifier,
            archive,
            dest,
        } => {
            let written = match (identifier, archive) {
                (_, Some(archive)) => extract_archive(&archive, &dest)
                    .with_context(|| format!("failed to unpack {}", archive.display()))?,
                (Some(identifier), None) => {
                    let config = load_config(&cli.config)?;
                    let engine = SystemVolumeEngine::from_config(&config)?;
                    let store = JsonMetadataStore::new(config.root());
                    ImportPipeline::new(config, engine, store)
                        .unpack(&identifier, &dest)
                        .with_context(|| format!("failed to unpack {identifier}"))?
                }
                (None, None) => anyhow::bail!("pass an identifier or --archive"),
            };
            for path in written {
                println!("{}", path.display());
            }
        }
        Commands::Checksum { container } => {
            let chunk = chunk_size(&cli.config);
            let (sidecar, digest) = write_checksum(&container, chunk)
                .with_context(|| format!("failed to hash {}", container.display()))?;
            println!("{digest}  {}", sidecar.display());
        }
        Commands::Verify { container } => {
            let chunk = chunk_size(&cli.config);
            let digest = verify_checksum(&container, chunk)
                .with_context(|| format!("verification of {} failed", container.display()))?;
            println!("{digest}  OK");
        }
        Commands::Validate { file, schema } => {
            if schema {
                let schema = schema_for!(JailpackConfig);
                println!("{}", to_string_pretty(&schema)?);
                return Ok(());
            }

            let cfg = JailpackConfig::load(&file)
                .with_context(|| format!("failed to load configuration from {}", file.display()))?;

            let issues = cfg.validate();
            if issues.is_empty() {
                println!(
                    "Configuration valid (pool {}, images in {}).",
                    cfg.volume.pool,
                    cfg.images_dir().display()
                );
            } else {
                eprintln!("Configuration validation failed:");
                for issue in issues {
                    eprintln!("  - {issue}");
                }
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn load_config(path: &Path) -> Result<Arc<JailpackConfig>> {
    let config = JailpackConfig::load(path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))?;
    Ok(Arc::new(config))
}

/// Checksum commands work without a config file; one is only read for the chunk size.
fn chunk_size(path: &Path) -> usize {
    JailpackConfig::load(path)
        .map(|cfg| cfg.chunk_size())
        .unwrap_or(jailpack_core::checksum::DEFAULT_CHUNK_SIZE)
}

fn print_event() -> WorkflowCallback {
    Arc::new(|event: &WorkflowEvent| println!("  [{}] {}", event.level, event.message))
}
