use std::path::{Path, PathBuf};

use chrono::Utc;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::Result;

/// Layout of the files a backup archive bundles, relative to the process's
/// working directory. Any entry that doesn't exist yet (e.g. `knowledge/`
/// before a document is ever added) is skipped rather than failing the
/// backup.
pub fn backup_members(data_dir: &Path) -> Vec<PathBuf> {
    vec![
        data_dir.join("conversations.db"),
        data_dir.join("auth.db"),
        data_dir.join("audit.db"),
        data_dir.join("webhooks.db"),
        data_dir.join("usage_data.json"),
        PathBuf::from("memory/memories.json"),
        PathBuf::from("knowledge"),
    ]
}

/// Builds `flux-backup-YYYYMMDD-HHMMSS.tar.gz` under `dest_dir`, containing
/// every existing member of [`backup_members`]. Returns the archive path.
pub fn create_backup(data_dir: &Path, dest_dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dest_dir)?;
    let name = format!("flux-backup-{}.tar.gz", Utc::now().format("%Y%m%d-%H%M%S"));
    let archive_path = dest_dir.join(name);

    let file = std::fs::File::create(&archive_path)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);

    for member in backup_members(data_dir) {
        if !member.exists() {
            tracing::debug!(path = %member.display(), "backup member missing, skipping");
            continue;
        }
        let archive_name = archive_relative_name(&member);
        if member.is_dir() {
            builder.append_dir_all(&archive_name, &member)?;
        } else {
            let mut f = std::fs::File::open(&member)?;
            builder.append_file(&archive_name, &mut f)?;
        }
    }

    builder.into_inner()?.finish()?;
    tracing::info!(path = %archive_path.display(), "backup created");
    Ok(archive_path)
}

/// Archive member names are the file's own relative path (`data/` prefix
/// dropped since a restore always targets a single destination root whose
/// own `data/` subdirectory is the database home).
fn archive_relative_name(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("data") {
        return PathBuf::from("data").join(stripped);
    }
    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_missing_members_and_produces_valid_gzip() {
        let tmp = tempfile::tempdir().unwrap();
        let data_dir = tmp.path().join("data");
        std::fs::create_dir_all(&data_dir).unwrap();
        std::fs::write(data_dir.join("conversations.db"), b"fake sqlite bytes").unwrap();

        let dest = tmp.path().join("backups");
        let archive = create_backup(&data_dir, &dest).unwrap();
        assert!(archive.exists());
        assert!(archive.file_name().unwrap().to_str().unwrap().starts_with("flux-backup-"));

        let file = std::fs::File::open(&archive).unwrap();
        let gz = flate2::read::GzDecoder::new(file);
        let mut archive_reader = tar::Archive::new(gz);
        let entries: Vec<_> = archive_reader.entries().unwrap().filter_map(|e| e.ok()).collect();
        assert_eq!(entries.len(), 1);
    }
}
