#![cfg(unix)]

use jailpack_core::codec::ExportTag;
use jailpack_core::config::JailpackConfig;
use jailpack_core::{ExportPipeline, ImportPipeline, JailpackResult, JsonMetadataStore};
use jailpack_zfs::SystemVolumeEngine;
use serde_json::Value;
use std::env;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;

const TEMPLATE_STATE: &str = r#"{"datasets":["zroot/iocage/jails","zroot/iocage/templates","zroot/iocage/templates/tpl","zroot/iocage/templates/tpl/root"]}"#;

const FAKE_ZFS_SCRIPT: &str = r#"#!/usr/bin/env python3
import json
import os
import sys

STATE = os.environ.get("FAKE_ZFS_STATE")
if not STATE:
    print("FAKE_ZFS_STATE not set", file=sys.stderr)
    sys.exit(3)

with open(STATE, "r", encoding="utf-8") as fh:
    state = json.load(fh)

datasets = state.setdefault("datasets", [])
snapshots = state.setdefault("snapshots", [])
streams = state.setdefault("streams", {})

def save():
    with open(STATE, "w", encoding="utf-8") as fh:
        json.dump(state, fh)

def ensure_dataset_known(dataset):
    if dataset not in datasets:
        print(f"cannot open '{dataset}': dataset does not exist", file=sys.stderr)
        sys.exit(1)

def subtree(root):
    return [d for d in datasets if d == root or d.startswith(root + "/")]

args = sys.argv[1:]

if args[:2] == ["snapshot", "-r"]:
    dataset, snap = args[2].split("@", 1)
    ensure_dataset_known(dataset)
    snapshots.extend(f"{d}@{snap}" for d in subtree(dataset))
    save()
    sys.exit(0)

if args[:5] == ["list", "-H", "-r", "-o", "name"]:
    ensure_dataset_known(args[5])
    print("\n".join(subtree(args[5])))
    sys.exit(0)

if args[0] == "send":
    if args[1] not in snapshots:
        print(f"cannot open '{args[1]}': dataset does not exist", file=sys.stderr)
        sys.exit(1)
    sys.stdout.buffer.write(("stream:" + args[1]).encode())
    sys.exit(0)

if args[0] == "recv":
    dataset = args[-1]
    if dataset.rsplit("/", 1)[0] not in datasets:
        sys.stdin.buffer.read()
        print(f"cannot receive new filesystem stream: parent of '{dataset}' does not exist", file=sys.stderr)
        sys.exit(1)
    streams[dataset] = sys.stdin.buffer.read().decode()
    if dataset not in datasets:
        datasets.append(dataset)
    snap = streams[dataset].rsplit("@", 1)[-1]
    snapshots.append(f"{dataset}@{snap}")
    save()
    sys.exit(0)

if args[:2] == ["destroy", "-r"]:
    dataset, snap = args[2].split("@", 1)
    ensure_dataset_known(dataset)
    tree = subtree(dataset)
    state["snapshots"] = [s for s in snapshots if s.split("@")[0] not in tree or not s.endswith("@" + snap)]
    save()
    sys.exit(0)

print("unexpected args: " + " ".join(args), file=sys.stderr)
sys.exit(2)
"#;

#[test]
fn template_export_then_import_as_jail() -> JailpackResult<()> {
    let tmp = tempdir().unwrap();
    let zfs_path = tmp.path().join("zfs.py");
    fs::write(&zfs_path, FAKE_ZFS_SCRIPT)?;
    make_executable(&zfs_path)?;

    let state_path = tmp.path().join("state.json");
    fs::write(&state_path, TEMPLATE_STATE)?;
    let _state_guard = EnvGuard::set("FAKE_ZFS_STATE", state_path.to_string_lossy());

    let root = tmp.path().join("iocage");
    let mut config = JailpackConfig::new("zroot", root.to_string_lossy());
    config.zfs.path = Some(zfs_path.to_string_lossy().into_owned());
    let config = Arc::new(config);

    let tag = ExportTag::new("tpl", "2024-03-01")?;
    let exporter = ExportPipeline::new(config.clone(), SystemVolumeEngine::from_config(&config)?);
    let exported = exporter.export_with_tag(&tag, "templates")?;
    assert_eq!(
        exported.members,
        vec!["tpl_2024-03-01".to_string(), "tpl_2024-03-01_root".to_string()]
    );
    assert!(exported.failed.is_empty());

    // the received dataset brings its record with it on a real pool
    let record = root.join("jails/tpl/config.json");
    fs::create_dir_all(record.parent().unwrap())?;
    fs::write(&record, r#"{"host_hostuuid":"tpl","type":"template","template":1}"#)?;

    let importer = ImportPipeline::new(
        config.clone(),
        SystemVolumeEngine::from_config(&config)?,
        JsonMetadataStore::new(&root),
    );
    let imported = importer.import("tpl")?;
    assert!(imported.converted_template);
    assert_eq!(
        imported.received,
        vec![
            "zroot/iocage/jails/tpl".to_string(),
            "zroot/iocage/jails/tpl/root".to_string()
        ]
    );

    let state: Value = serde_json::from_slice(&fs::read(&state_path)?)?;
    assert_eq!(
        state["streams"]["zroot/iocage/jails/tpl/root"],
        "stream:zroot/iocage/templates/tpl/root@ioc-export-2024-03-01"
    );
    assert!(state["snapshots"].as_array().unwrap().is_empty());

    let record: Value = serde_json::from_slice(&fs::read(&record)?)?;
    assert_eq!(record["type"], "jail");
    assert_eq!(record["template"], 0);
    Ok(())
}

struct EnvGuard {
    key: &'static str,
    prev: Option<String>,
}

impl EnvGuard {
    fn set<K: Into<String>>(key: &'static str, value: K) -> Self {
        let prev = env::var(key).ok();
        let value = value.into();
        env::set_var(key, &value);
        Self { key, prev }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        if let Some(prev) = &self.prev {
            env::set_var(self.key, prev);
        } else {
            env::remove_var(self.key);
        }
    }
}

fn make_executable(path: &Path) -> std::io::Result<()> {
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms)
}
