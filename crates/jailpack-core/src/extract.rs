//! Guarded extraction of zip and tar containers onto the filesystem.
//!
//! Every entry is checked with [`ensure_within`] twice: once in a validation
//! pass before anything is written, and again right before that entry is
//! written, so links laid down by earlier entries cannot redirect later ones.

use crate::error::{JailpackError, JailpackResult};
use crate::guard::ensure_within;
use log::debug;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tar::EntryType;
use zip::ZipArchive;

/// Extract `archive` into `dest`, choosing the format from the file extension.
pub fn extract_archive(archive: &Path, dest: &Path) -> JailpackResult<Vec<PathBuf>> {
    match archive.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("zip") => extract_zip(archive, dest),
        Some(ext) if ext.eq_ignore_ascii_case("tar") => extract_tar(archive, dest),
        _ => Err(JailpackError::InvalidConfig(format!(
            "unsupported archive type: {}",
            archive.display()
        ))),
    }
}

/// Extract every file of a zip container under `dest`.
pub fn extract_zip(archive: &Path, dest: &Path) -> JailpackResult<Vec<PathBuf>> {
    let mut zip = ZipArchive::new(File::open(archive)?)?;

    for i in 0..zip.len() {
        let entry = zip.by_index(i)?;
        ensure_within(dest, entry.name())?;
    }

    let mut written = Vec::with_capacity(zip.len());
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        let target = ensure_within(dest, entry.name())?;
        if entry.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&target)?;
        io::copy(&mut entry, &mut out)?;
        debug!("extracted {} to {}", entry.name(), target.display());
        written.push(target);
    }
    Ok(written)
}

/// Extract every entry of an uncompressed tar archive under `dest`.
///
/// Hard links and symlinks are only accepted when their targets stay under
/// `dest`; entries are unpacked relative to `dest`, never the working directory.
pub fn extract_tar(archive: &Path, dest: &Path) -> JailpackResult<Vec<PathBuf>> {
    {
        let mut tar = tar::Archive::new(File::open(archive)?);
        for entry in tar.entries()? {
            check_tar_entry(dest, &entry?)?;
        }
    }

    fs::create_dir_all(dest)?;
    let mut written = Vec::new();
    let mut tar = tar::Archive::new(File::open(archive)?);
    for entry in tar.entries()? {
        let mut entry = entry?;
        let target = check_tar_entry(dest, &entry)?;
        if !entry.unpack_in(dest)? {
            return Err(JailpackError::PathEscape {
                root: dest.to_path_buf(),
                candidate: entry.path()?.display().to_string(),
            });
        }
        debug!("extracted {}", target.display());
        written.push(target);
    }
    Ok(written)
}

/// Guard an entry's own path and, for links, the path it points at.
fn check_tar_entry<R: io::Read>(dest: &Path, entry: &tar::Entry<'_, R>) -> JailpackResult<PathBuf> {
    let name = entry.path()?;
    let target = ensure_within(dest, &name)?;
    let link = match entry.header().entry_type() {
        EntryType::Link | EntryType::Symlink => entry.link_name()?,
        _ => None,
    };
    let Some(link) = link else {
        return Ok(target);
    };

    if link.is_absolute() {
        return Err(JailpackError::PathEscape {
            root: dest.to_path_buf(),
            candidate: link.display().to_string(),
        });
    }
    let resolved = match entry.header().entry_type() {
        // hard link targets name another archive member
        EntryType::Link => link.into_owned(),
        // symlink targets are relative to the directory holding the link
        _ => name.parent().unwrap_or(Path::new("")).join(&link),
    };
    ensure_within(dest, resolved)?;
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;
    use zip::write::FileOptions;
    use zip::ZipWriter;

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let mut zip = ZipWriter::new(File::create(path).unwrap());
        for (name, body) in entries {
            zip.start_file(*name, FileOptions::default()).unwrap();
            zip.write_all(body).unwrap();
        }
        zip.finish().unwrap();
    }

    fn write_tar(path: &Path, entries: &[(&str, &[u8])]) {
        let entries: Vec<(&str, EntryType, &str, &[u8])> = entries
            .iter()
            .map(|(name, body)| (*name, EntryType::Regular, "", *body))
            .collect();
        write_tar_entries(path, &entries);
    }

    /// `(name, type, link target, body)`; names and targets are written raw so
    /// hostile values reach the archive unchanged.
    fn write_tar_entries(path: &Path, entries: &[(&str, EntryType, &str, &[u8])]) {
        let mut builder = tar::Builder::new(File::create(path).unwrap());
        for (name, kind, link, body) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(body.len() as u64);
            header.set_mode(if *kind == EntryType::Directory { 0o755 } else { 0o644 });
            header.set_entry_type(*kind);
            let old = header.as_old_mut();
            old.name[..name.len()].copy_from_slice(name.as_bytes());
            old.linkname[..link.len()].copy_from_slice(link.as_bytes());
            header.set_cksum();
            builder.append(&header, *body).unwrap();
        }
        builder.finish().unwrap();
    }

    #[test]
    fn zip_extracts_nested_members() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("abc_2024-01-01.zip");
        write_zip(&archive, &[("abc_2024-01-01", b"root"), ("nested/deep/x", b"x")]);
        let dest = dir.path().join("out");

        let written = extract_zip(&archive, &dest).unwrap();
        assert_eq!(written.len(), 2);
        assert_eq!(fs::read(dest.join("abc_2024-01-01")).unwrap(), b"root");
        assert_eq!(fs::read(dest.join("nested/deep/x")).unwrap(), b"x");
    }

    #[test]
    fn zip_traversal_member_aborts_before_any_write() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("evil.zip");
        write_zip(
            &archive,
            &[("harmless", b"ok"), ("../../etc/cron.d/x", b"* * * * * root sh")],
        );
        let dest = dir.path().join("a").join("out");
        fs::create_dir_all(&dest).unwrap();

        let err = extract_zip(&archive, &dest).unwrap_err();
        assert!(matches!(err, JailpackError::PathEscape { .. }), "{err}");
        assert!(!dest.join("harmless").exists());
        assert!(!dir.path().join("etc").exists());
    }

    #[test]
    fn tar_extracts_regular_entries() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("release.tar");
        write_tar(&archive, &[("bin/sh", b"#!"), ("etc/rc.conf", b"x=1")]);
        let dest = dir.path().join("out");

        let written = extract_archive(&archive, &dest).unwrap();
        assert_eq!(written.len(), 2);
        assert_eq!(fs::read(dest.join("etc/rc.conf")).unwrap(), b"x=1");
    }

    #[test]
    fn tar_traversal_entry_aborts_before_any_write() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("evil.tar");
        write_tar(&archive, &[("fine", b"ok"), ("../escape", b"boom")]);
        let dest = dir.path().join("out");
        fs::create_dir_all(&dest).unwrap();

        let err = extract_tar(&archive, &dest).unwrap_err();
        assert!(matches!(err, JailpackError::PathEscape { .. }), "{err}");
        assert!(!dest.join("fine").exists());
        assert!(!dir.path().join("escape").exists());
    }

    #[test]
    fn tar_hard_link_resolves_inside_destination() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("links.tar");
        write_tar_entries(
            &archive,
            &[
                ("data/file", EntryType::Regular, "", b"payload"),
                ("alias", EntryType::Link, "data/file", b""),
            ],
        );
        let dest = dir.path().join("out");

        extract_tar(&archive, &dest).unwrap();
        assert_eq!(fs::read(dest.join("alias")).unwrap(), b"payload");
    }

    #[test]
    fn tar_hard_link_never_reaches_the_working_directory() {
        let victim_name = format!("jailpack_link_victim_{}", std::process::id());
        let victim = std::env::current_dir().unwrap().join(&victim_name);
        fs::write(&victim, b"SECRET").unwrap();

        let dir = tempdir().unwrap();
        let archive = dir.path().join("leak.tar");
        write_tar_entries(&archive, &[("leak", EntryType::Link, victim_name.as_str(), b"")]);
        let dest = dir.path().join("out");

        let result = extract_tar(&archive, &dest);
        let leaked = fs::read(dest.join("leak")).ok();
        fs::remove_file(&victim).unwrap();

        assert!(result.is_err());
        assert_eq!(leaked, None);
    }

    #[test]
    fn tar_hard_link_out_of_destination_is_rejected() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("victim"), b"SECRET").unwrap();
        let archive = dir.path().join("leak.tar");
        write_tar_entries(&archive, &[("leak", EntryType::Link, "../victim", b"")]);
        let dest = dir.path().join("out");

        let err = extract_tar(&archive, &dest).unwrap_err();
        assert!(matches!(err, JailpackError::PathEscape { .. }), "{err}");
        assert!(!dest.join("leak").exists());
    }

    #[cfg(unix)]
    #[test]
    fn tar_symlink_escapes_are_rejected() {
        let dir = tempdir().unwrap();
        let outside = dir.path().join("outside");
        fs::create_dir_all(&outside).unwrap();
        let dest = dir.path().join("out");

        for (name, link) in [
            ("up", "../outside"),
            ("nested/up", "../../outside"),
            ("abs", outside.to_str().unwrap()),
        ] {
            let archive = dir.path().join("links.tar");
            write_tar_entries(&archive, &[(name, EntryType::Symlink, link, b"")]);
            let err = extract_tar(&archive, &dest).unwrap_err();
            assert!(matches!(err, JailpackError::PathEscape { .. }), "{name}: {err}");
            assert!(fs::symlink_metadata(dest.join(name)).is_err(), "{name}");
        }
    }

    #[cfg(unix)]
    #[test]
    fn tar_symlink_then_write_through_it_is_rejected() {
        let dir = tempdir().unwrap();
        let outside = dir.path().join("outside");
        fs::create_dir_all(&outside).unwrap();
        let archive = dir.path().join("evil.tar");
        write_tar_entries(
            &archive,
            &[
                ("fine", EntryType::Regular, "", b"ok"),
                ("evil", EntryType::Symlink, "../outside", b""),
                ("evil/payload", EntryType::Regular, "", b"boom"),
            ],
        );
        let dest = dir.path().join("out");

        let err = extract_tar(&archive, &dest).unwrap_err();
        assert!(matches!(err, JailpackError::PathEscape { .. }), "{err}");
        assert!(!outside.join("payload").exists());
        assert!(!dest.join("fine").exists());
    }

    #[cfg(unix)]
    #[test]
    fn tar_symlink_inside_destination_is_kept() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("links.tar");
        write_tar_entries(
            &archive,
            &[
                ("real/file", EntryType::Regular, "", b"x"),
                ("nested/alias", EntryType::Symlink, "../real", b""),
            ],
        );
        let dest = dir.path().join("out");

        extract_tar(&archive, &dest).unwrap();
        assert_eq!(fs::read(dest.join("nested/alias/file")).unwrap(), b"x");
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let dir = tempdir().unwrap();
        let err = extract_archive(&dir.path().join("x.rar"), dir.path()).unwrap_err();
        assert!(matches!(err, JailpackError::InvalidConfig(_)));
    }
}
