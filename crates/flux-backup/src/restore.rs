//! Hardened tar extraction for backup restores, grounded on
//! `sblanchard-SerialAgent`'s OpenClaw import path. `normalize_tar_path()`
//! is the single source of truth for both the duplicate-detection key and
//! the filesystem extraction target.

use std::io;
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use tar::Archive;

use crate::error::{BackupError, Result};

const MAX_PATH_DEPTH: usize = 64;
const MAX_ENTRIES_TOTAL: u64 = 100_000;
const MAX_EXTRACTED_BYTES: u64 = 500 * 1024 * 1024;
const MAX_FILE_COUNT: u64 = 50_000;

/// Validates every entry, then extracts. Never overwrites an existing file
/// (TOCTOU-safe `create_new`), never follows or creates symlinks/hardlinks,
/// and strips setuid/setgid/sticky bits from restored permissions.
pub fn restore_backup(archive_path: &Path, dest_dir: &Path) -> Result<()> {
    validate_tgz_entries(archive_path)?;

    let file = std::fs::File::open(archive_path)?;
    let gz = GzDecoder::new(std::io::BufReader::new(file));
    let mut archive = Archive::new(gz);

    for entry in archive.entries().map_err(|e| BackupError::ArchiveInvalid(format!("tar entries failed: {e}")))? {
        let mut entry = entry.map_err(|e| BackupError::ArchiveInvalid(format!("tar entry read failed: {e}")))?;
        let entry_type = entry.header().entry_type();

        match entry_type {
            tar::EntryType::XHeader | tar::EntryType::XGlobalHeader | tar::EntryType::GNULongName | tar::EntryType::GNULongLink => continue,
            tar::EntryType::Regular | tar::EntryType::GNUSparse | tar::EntryType::Directory => {}
            _ => {
                let path = entry.path().unwrap_or_default();
                return Err(BackupError::ArchiveInvalid(format!("unexpected entry type {entry_type:?} at: {}", path.display())));
            }
        }

        let raw_path = entry.path().map_err(|e| BackupError::ArchiveInvalid(format!("tar path read failed: {e}")))?.into_owned();
        validate_relative_path(&raw_path)?;
        let (_, normalized_path) = normalize_tar_path(&raw_path)?;
        let full_path = dest_dir.join(&normalized_path);

        match entry_type {
            tar::EntryType::Directory => {
                std::fs::create_dir_all(&full_path)?;
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    std::fs::set_permissions(&full_path, std::fs::Permissions::from_mode(0o755))?;
                }
            }
            _ => {
                if let Some(parent) = full_path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let mut out_file = std::fs::OpenOptions::new().write(true).create_new(true).open(&full_path).map_err(|e| {
                    if e.kind() == io::ErrorKind::AlreadyExists {
                        BackupError::ArchiveInvalid(format!("file collision (duplicate or pre-existing): {}", normalized_path.display()))
                    } else {
                        BackupError::Io(e)
                    }
                })?;
                std::io::copy(&mut entry, &mut out_file)?;

                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    let mode = entry.header().mode().unwrap_or(0o644) & 0o777;
                    std::fs::set_permissions(&full_path, std::fs::Permissions::from_mode(mode))?;
                }
            }
        }
    }

    Ok(())
}

fn validate_tgz_entries(archive_path: &Path) -> Result<()> {
    let file = std::fs::File::open(archive_path)?;
    let gz = GzDecoder::new(std::io::BufReader::new(file));
    let mut archive = Archive::new(gz);

    let mut total_bytes: u64 = 0;
    let mut total_files: u64 = 0;
    let mut total_entries: u64 = 0;
    let mut seen_file_paths = std::collections::HashSet::new();

    for entry in archive.entries().map_err(|e| BackupError::ArchiveInvalid(format!("tar entries failed: {e}")))? {
        let entry = entry.map_err(|e| BackupError::ArchiveInvalid(format!("tar entry read failed: {e}")))?;

        total_entries += 1;
        if total_entries > MAX_ENTRIES_TOTAL {
            return Err(BackupError::SizeLimitExceeded(format!("archive contains more than {MAX_ENTRIES_TOTAL} total entries (including metadata)")));
        }

        let entry_type = entry.header().entry_type();
        match entry_type {
            tar::EntryType::XHeader | tar::EntryType::XGlobalHeader | tar::EntryType::GNULongName | tar::EntryType::GNULongLink => {
                let meta_size = entry.header().size().unwrap_or(0);
                total_bytes += meta_size;
                if total_bytes > MAX_EXTRACTED_BYTES {
                    return Err(BackupError::SizeLimitExceeded(format!("archive metadata exceeds extracted-bytes limit of {MAX_EXTRACTED_BYTES} bytes")));
                }
                continue;
            }
            tar::EntryType::Regular | tar::EntryType::GNUSparse | tar::EntryType::Directory => {}
            tar::EntryType::Symlink | tar::EntryType::Link => {
                let path = entry.path().unwrap_or_default();
                return Err(BackupError::ArchiveInvalid(format!("symlink/hardlink in archive: {}", path.display())));
            }
            other => {
                let path = entry.path().unwrap_or_default();
                return Err(BackupError::ArchiveInvalid(format!("unsupported entry type {other:?}: {}", path.display())));
            }
        }

        let path = entry.path().map_err(|e| BackupError::ArchiveInvalid(format!("tar path read failed: {e}")))?;
        validate_relative_path(&path)?;

        let (normalized_key, _) = normalize_tar_path(&path)?;
        if !matches!(entry_type, tar::EntryType::Directory) && !seen_file_paths.insert(normalized_key.clone()) {
            return Err(BackupError::ArchiveInvalid(format!("duplicate file path in archive (after normalization): {}", path.display())));
        }

        let entry_size = entry.header().size().unwrap_or(0);
        total_bytes += entry_size;
        total_files += 1;

        if total_bytes > MAX_EXTRACTED_BYTES {
            return Err(BackupError::SizeLimitExceeded(format!("extracted content exceeds limit of {MAX_EXTRACTED_BYTES} bytes")));
        }
        if total_files > MAX_FILE_COUNT {
            return Err(BackupError::SizeLimitExceeded(format!("archive contains more than {MAX_FILE_COUNT} files")));
        }
    }
    Ok(())
}

fn normalize_tar_path(path: &Path) -> Result<(String, PathBuf)> {
    let raw = path.to_str().ok_or_else(|| BackupError::ArchiveInvalid(format!("non-UTF8 path in archive: {}", path.display())))?;

    let mut parts = Vec::new();
    for comp in path.components() {
        match comp {
            Component::Normal(s) => {
                let s_str = s.to_str().ok_or_else(|| BackupError::ArchiveInvalid(format!("non-UTF8 component in archive path: {raw}")))?;
                if s_str.is_empty() {
                    return Err(BackupError::ArchiveInvalid(format!("empty component in archive path: {raw}")));
                }
                parts.push(s_str);
            }
            Component::CurDir => {}
            Component::ParentDir => return Err(BackupError::ArchiveInvalid(format!("parent dir traversal in path: {raw}"))),
            Component::RootDir => return Err(BackupError::ArchiveInvalid(format!("absolute path (root dir): {raw}"))),
            Component::Prefix(_) => return Err(BackupError::ArchiveInvalid(format!("platform prefix in path: {raw}"))),
        }
    }

    if parts.is_empty() {
        return Err(BackupError::ArchiveInvalid(format!("path normalizes to empty: {raw}")));
    }

    let normalized: PathBuf = parts.iter().collect();
    let key = normalized.to_string_lossy().to_string();
    Ok((key, normalized))
}

fn validate_relative_path(path: &Path) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Err(BackupError::ArchiveInvalid("empty path in archive".to_string()));
    }
    if path.is_absolute() {
        return Err(BackupError::ArchiveInvalid(format!("absolute path in archive: {}", path.display())));
    }
    let mut depth = 0usize;
    for comp in path.components() {
        match comp {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::ParentDir => return Err(BackupError::ArchiveInvalid(format!("parent dir traversal in archive: {}", path.display()))),
            Component::Prefix(_) => return Err(BackupError::ArchiveInvalid(format!("platform prefix in archive path: {}", path.display()))),
            Component::RootDir => return Err(BackupError::ArchiveInvalid(format!("root dir in archive path: {}", path.display()))),
        }
    }
    if depth == 0 {
        return Err(BackupError::ArchiveInvalid(format!("path resolves to empty: {}", path.display())));
    }
    if depth > MAX_PATH_DEPTH {
        return Err(BackupError::ArchiveInvalid(format!("path depth {depth} exceeds limit of {MAX_PATH_DEPTH}: {}", path.display())));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_tgz(entries: &[(&str, &[u8])]) -> tempfile::NamedTempFile {
        use flate2::write::GzEncoder;
        use flate2::Compression;

        let tmp = tempfile::NamedTempFile::new().unwrap();
        let gz = GzEncoder::new(tmp.as_file(), Compression::fast());
        let mut builder = tar::Builder::new(gz);
        for (path, data) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_entry_type(tar::EntryType::Regular);
            header.set_cksum();
            builder.append_data(&mut header, path, &data[..]).unwrap();
        }
        let gz = builder.into_inner().unwrap();
        gz.finish().unwrap();
        tmp
    }

    #[test]
    fn rejects_path_traversal() {
        assert!(validate_relative_path(Path::new("../../../etc/passwd")).is_err());
    }

    #[test]
    fn rejects_absolute_path() {
        assert!(validate_relative_path(Path::new("/etc/passwd")).is_err());
    }

    #[test]
    fn normalizes_curdir_components() {
        let (key, pb) = normalize_tar_path(Path::new("a/./b/./c")).unwrap();
        assert_eq!(key, "a/b/c");
        assert_eq!(pb, PathBuf::from("a/b/c"));
    }

    #[test]
    fn restores_clean_archive() {
        let tgz = create_test_tgz(&[("data/conversations.db", b"sqlite"), ("knowledge/docs/index.json", b"{}")]);
        let dest = tempfile::tempdir().unwrap();
        restore_backup(tgz.path(), dest.path()).unwrap();
        assert!(dest.path().join("data/conversations.db").exists());
        assert!(dest.path().join("knowledge/docs/index.json").exists());
    }

    #[test]
    fn rejects_symlink_entries() {
        use flate2::write::GzEncoder;
        use flate2::Compression;

        let tmp = tempfile::NamedTempFile::new().unwrap();
        let gz = GzEncoder::new(tmp.as_file(), Compression::fast());
        let mut builder = tar::Builder::new(gz);
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Symlink);
        header.set_size(0);
        header.set_mode(0o777);
        header.set_cksum();
        builder.append_link(&mut header, "evil", "/etc").unwrap();
        let gz = builder.into_inner().unwrap();
        gz.finish().unwrap();

        let dest = tempfile::tempdir().unwrap();
        assert!(restore_backup(tmp.path(), dest.path()).is_err());
    }

    #[test]
    fn rejects_duplicate_paths() {
        let tgz = create_test_tgz(&[("data/auth.db", b"first"), ("data/auth.db", b"second")]);
        let dest = tempfile::tempdir().unwrap();
        assert!(restore_backup(tgz.path(), dest.path()).is_err());
    }

    #[test]
    fn second_restore_into_same_dir_fails_on_collision() {
        let tgz = create_test_tgz(&[("data/audit.db", b"x")]);
        let dest = tempfile::tempdir().unwrap();
        restore_backup(tgz.path(), dest.path()).unwrap();
        assert!(restore_backup(tgz.path(), dest.path()).is_err());
    }
}
