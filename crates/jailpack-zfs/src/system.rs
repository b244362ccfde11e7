//! System-backed `VolumeEngine` implementation. It shells out to the platform
//! `zfs` binary for snapshots, listings, and send/receive streams.

use crate::command::{CommandRunner, Output};
use crate::parse::{parse_dataset_names, validate_dataset_name, validate_snapshot_label};
use jailpack_core::config::JailpackConfig;
use jailpack_core::error::{JailpackError, JailpackResult};
use jailpack_core::provider::VolumeEngine;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default locations searched for a `zfs` binary on the host.
pub const DEFAULT_ZFS_PATHS: &[&str] = &[
    "/sbin/zfs",
    "/usr/sbin/zfs",
    "/usr/local/sbin/zfs",
    "/bin/zfs",
];

/// `VolumeEngine` that shells out to the native `zfs` CLI.
#[derive(Debug, Clone)]
pub struct SystemVolumeEngine {
    runner: CommandRunner,
}

impl SystemVolumeEngine {
    /// Build an engine from the user configuration, falling back to discovery when needed.
    pub fn from_config(config: &JailpackConfig) -> JailpackResult<Self> {
        let timeout = config.zfs_timeout();
        match config.zfs_binary_path() {
            Some(path) => Self::with_path(path, timeout),
            None => Self::discover(timeout),
        }
    }

    /// Construct an engine around an explicit `zfs` binary.
    pub fn with_path(path: PathBuf, timeout: Duration) -> JailpackResult<Self> {
        if !path.exists() {
            return Err(JailpackError::InvalidConfig(format!(
                "binary not found at {}",
                path.display()
            )));
        }
        Ok(Self {
            runner: CommandRunner::new(path, timeout),
        })
    }

    /// Walk through `DEFAULT_ZFS_PATHS` until a binary is found.
    pub fn discover(timeout: Duration) -> JailpackResult<Self> {
        for candidate in DEFAULT_ZFS_PATHS {
            let p = Path::new(candidate);
            if p.exists() {
                return Self::with_path(p.to_path_buf(), timeout);
            }
        }
        Err(JailpackError::InvalidConfig(format!(
            "unable to locate zfs binary; tried {:?}",
            DEFAULT_ZFS_PATHS
        )))
    }

    pub fn binary(&self) -> &Path {
        self.runner.binary()
    }

    /// Run `zfs` and turn non-zero exits into descriptive engine errors.
    fn run_checked(&self, args: &[&str]) -> JailpackResult<Output> {
        let out = self.runner.run(args)?;
        self.check(args, out)
    }

    fn check(&self, args: &[&str], out: Output) -> JailpackResult<Output> {
        if out.status != 0 {
            return Err(Self::classify_cli_error(self.runner.binary(), args, &out));
        }
        Ok(out)
    }

    /// Map CLI output into a `VolumeEngine` error carrying the command and diagnostic.
    fn classify_cli_error(binary: &Path, args: &[&str], output: &Output) -> JailpackError {
        let stderr = output.stderr.trim();
        let stdout = output.stdout.trim();
        let diagnostic = if !stderr.is_empty() { stderr } else { stdout };
        let diagnostic_lower = diagnostic.to_ascii_lowercase();

        if diagnostic_lower.contains("dataset does not exist")
            || diagnostic_lower.contains("cannot open '")
        {
            return JailpackError::VolumeEngine(format!(
                "{} {} reported missing dataset: {}",
                binary.display(),
                args.join(" "),
                diagnostic
            ));
        }

        JailpackError::VolumeEngine(format!(
            "{} {} exited with code {}: {}",
            binary.display(),
            args.join(" "),
            output.status,
            if diagnostic.is_empty() {
                "no additional output"
            } else {
                diagnostic
            }
        ))
    }

    fn snapshot_name(dataset: &str, snapshot: &str) -> JailpackResult<String> {
        validate_dataset_name(dataset)?;
        validate_snapshot_label(snapshot)?;
        Ok(format!("{dataset}@{snapshot}"))
    }
}

impl VolumeEngine for SystemVolumeEngine {
    fn snapshot_recursive(&self, dataset: &str, snapshot: &str) -> JailpackResult<()> {
        let name = Self::snapshot_name(dataset, snapshot)?;
        self.run_checked(&["snapshot", "-r", &name])?;
        Ok(())
    }

    fn list_datasets(&self, dataset: &str) -> JailpackResult<Vec<String>> {
        validate_dataset_name(dataset)?;
        let out = self.run_checked(&["list", "-H", "-r", "-o", "name", dataset])?;
        Ok(parse_dataset_names(&out.stdout))
    }

    fn send_snapshot(
        &self,
        dataset: &str,
        snapshot: &str,
        sink: &mut dyn Write,
    ) -> JailpackResult<u64> {
        let name = Self::snapshot_name(dataset, snapshot)?;
        let args = ["send", name.as_str()];
        let (bytes, out) = self.runner.stream_out(&args, sink)?;
        self.check(&args, out)?;
        Ok(bytes)
    }

    fn receive_stream(
        &self,
        dataset: &str,
        source: &mut dyn Read,
        force: bool,
    ) -> JailpackResult<()> {
        validate_dataset_name(dataset)?;
        let args: Vec<&str> = if force {
            vec!["recv", "-F", dataset]
        } else {
            vec!["recv", dataset]
        };
        let out = self.runner.stream_in(&args, source)?;
        self.check(&args, out)?;
        Ok(())
    }

    fn destroy_snapshot_recursive(&self, dataset: &str, snapshot: &str) -> JailpackResult<()> {
        let name = Self::snapshot_name(dataset, snapshot)?;
        self.run_checked(&["destroy", "-r", &name])?;
        Ok(())
    }
}
