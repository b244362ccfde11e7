//! Path containment checks applied before anything from an archive touches disk.

use crate::error::{JailpackError, JailpackResult};
use soft_canonicalize::soft_canonicalize;
use std::path::{Path, PathBuf};

/// Ensure `root.join(candidate)` resolves inside `root`, returning the resolved target.
///
/// Both paths are resolved with `.`/`..` applied and existing symlinks
/// followed; components that do not exist yet are taken literally. An absolute
/// `candidate` replaces `root` entirely and is therefore only accepted when it
/// happens to point inside it. Containment is decided per path component, so a
/// sibling such as `/srv/root2` is never inside `/srv/root`.
pub fn ensure_within(root: &Path, candidate: impl AsRef<Path>) -> JailpackResult<PathBuf> {
    let candidate = candidate.as_ref();
    let resolved_root = soft_canonicalize(root)?;
    let resolved = soft_canonicalize(root.join(candidate))?;

    if resolved.starts_with(&resolved_root) {
        Ok(resolved)
    } else {
        Err(JailpackError::PathEscape {
            root: resolved_root,
            candidate: candidate.display().to_string(),
        })
    }
}
