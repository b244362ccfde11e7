//! In-memory engine and metadata store used by the pipeline tests.

use crate::error::{JailpackError, JailpackResult};
use crate::provider::{MetadataStore, VolumeEngine};
use std::collections::{HashMap, HashSet};
use std::io::{Read, Write};
use std::sync::Mutex;

/// Records every call; `send` emits `stream:{dataset}@{snapshot}`.
#[derive(Default)]
pub(crate) struct MockEngine {
    pub datasets: Vec<String>,
    pub fail_snapshot: bool,
    pub fail_list: bool,
    pub fail_destroy: bool,
    pub fail_send: HashSet<String>,
    pub fail_receive: HashSet<String>,
    pub calls: Mutex<Vec<String>>,
    pub received: Mutex<Vec<(String, Vec<u8>)>>,
}

impl MockEngine {
    pub fn with_datasets(datasets: &[&str]) -> Self {
        Self {
            datasets: datasets.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn received(&self) -> Vec<(String, Vec<u8>)> {
        self.received.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

pub(crate) fn stream_bytes(dataset: &str, snapshot: &str) -> Vec<u8> {
    format!("stream:{dataset}@{snapshot}").into_bytes()
}

impl VolumeEngine for MockEngine {
    fn snapshot_recursive(&self, dataset: &str, snapshot: &str) -> JailpackResult<()> {
        self.record(format!("snapshot -r {dataset}@{snapshot}"));
        if self.fail_snapshot {
            return Err(JailpackError::VolumeEngine("simulated snapshot failure".into()));
        }
        Ok(())
    }

    fn list_datasets(&self, dataset: &str) -> JailpackResult<Vec<String>> {
        self.record(format!("list {dataset}"));
        if self.fail_list {
            return Err(JailpackError::VolumeEngine("simulated list failure".into()));
        }
        Ok(self.datasets.clone())
    }

    fn send_snapshot(
        &self,
        dataset: &str,
        snapshot: &str,
        sink: &mut dyn Write,
    ) -> JailpackResult<u64> {
        self.record(format!("send {dataset}@{snapshot}"));
        if self.fail_send.contains(dataset) {
            sink.write_all(b"partial")?;
            return Err(JailpackError::VolumeEngine(format!(
                "simulated send failure for {dataset}"
            )));
        }
        let bytes = stream_bytes(dataset, snapshot);
        sink.write_all(&bytes)?;
        Ok(bytes.len() as u64)
    }

    fn receive_stream(
        &self,
        dataset: &str,
        source: &mut dyn Read,
        force: bool,
    ) -> JailpackResult<()> {
        self.record(format!("recv{} {dataset}", if force { " -F" } else { "" }));
        if self.fail_receive.contains(dataset) {
            return Err(JailpackError::VolumeEngine(format!(
                "simulated receive failure for {dataset}"
            )));
        }
        let mut bytes = Vec::new();
        source.read_to_end(&mut bytes)?;
        self.received
            .lock()
            .unwrap()
            .push((dataset.to_string(), bytes));
        Ok(())
    }

    fn destroy_snapshot_recursive(&self, dataset: &str, snapshot: &str) -> JailpackResult<()> {
        self.record(format!("destroy -r {dataset}@{snapshot}"));
        if self.fail_destroy {
            return Err(JailpackError::VolumeEngine("simulated destroy failure".into()));
        }
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct MockStore {
    pub fields: Mutex<HashMap<(String, String), String>>,
}

impl MockStore {
    pub fn with_fields(jail: &str, fields: &[(&str, &str)]) -> Self {
        let store = Self::default();
        {
            let mut map = store.fields.lock().unwrap();
            for (key, value) in fields {
                map.insert((jail.to_string(), key.to_string()), value.to_string());
            }
        }
        store
    }

    pub fn field(&self, jail: &str, key: &str) -> Option<String> {
        self.fields
            .lock()
            .unwrap()
            .get(&(jail.to_string(), key.to_string()))
            .cloned()
    }
}

impl MetadataStore for MockStore {
    fn get_field(&self, jail: &str, key: &str) -> JailpackResult<Option<String>> {
        Ok(self.field(jail, key))
    }

    fn set_field(&self, jail: &str, key: &str, value: &str) -> JailpackResult<()> {
        self.fields
            .lock()
            .unwrap()
            .insert((jail.to_string(), key.to_string()), value.to_string());
        Ok(())
    }
}
