//! Helpers for `zfs` CLI output and for checking names before they reach the
//! command line.

use jailpack_core::error::{JailpackError, JailpackResult};

/// Turn `zfs list -H -o name` output into dataset names, keeping only the
/// first column when more were requested.
pub(crate) fn parse_dataset_names(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            let name = line.split('\t').next()?.trim();
            if name.is_empty() {
                None
            } else {
                Some(name.to_string())
            }
        })
        .collect()
}

/// Reject dataset names the CLI would misread as options or snapshots.
pub(crate) fn validate_dataset_name(dataset: &str) -> JailpackResult<()> {
    let reason = if dataset.is_empty() {
        Some("name is empty")
    } else if dataset.starts_with('-') {
        Some("name starts with '-'")
    } else if dataset.contains('@') {
        Some("name contains '@'")
    } else if dataset.split('/').any(|segment| segment.is_empty()) {
        Some("name has an empty component")
    } else if dataset.chars().any(|c| c.is_whitespace() || c.is_control()) {
        Some("name contains whitespace")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(JailpackError::InvalidConfig(format!(
            "dataset `{dataset}` rejected: {reason}"
        ))),
        None => Ok(()),
    }
}

/// Snapshot labels are a single component without separators.
pub(crate) fn validate_snapshot_label(snapshot: &str) -> JailpackResult<()> {
    if snapshot.is_empty()
        || snapshot.starts_with('-')
        || snapshot.contains(['/', '@'])
        || snapshot.chars().any(|c| c.is_whitespace() || c.is_control())
    {
        return Err(JailpackError::InvalidConfig(format!(
            "snapshot label `{snapshot}` rejected"
        )));
    }
    Ok(())
}
