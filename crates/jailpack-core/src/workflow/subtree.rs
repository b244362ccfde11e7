use crate::error::{JailpackError, JailpackResult};
use crate::provider::VolumeEngine;

/// Every dataset at or below `root`, root first, descendants in lexical order.
///
/// Lexical order keeps each parent ahead of its children and makes exports
/// reproducible regardless of the order the engine reports datasets in.
pub fn list_subtree<E>(engine: &E, root: &str) -> JailpackResult<Vec<String>>
where
    E: VolumeEngine + ?Sized,
{
    let listed = engine.list_datasets(root)?;
    let prefix = format!("{root}/");

    if !listed.iter().any(|ds| ds == root) {
        return Err(JailpackError::VolumeEngine(format!(
            "dataset {root} was not reported by the volume engine"
        )));
    }

    let mut descendants: Vec<String> = listed
        .into_iter()
        .filter(|ds| ds.starts_with(&prefix))
        .collect();
    descendants.sort();
    descendants.dedup();

    let mut ordered = Vec::with_capacity(descendants.len() + 1);
    ordered.push(root.to_string());
    ordered.extend(descendants);
    Ok(ordered)
}
