//! File browsing over the recordings/snapshots directories.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::error::{AppError, Result};

use super::types::{FileListResponse, FileMetadata};

#[derive(Debug, Clone, Copy)]
pub enum FileKind {
    Recording,
    Snapshot,
}

impl FileKind {
    fn extensions(self) -> &'static [&'static str] {
        match self {
            FileKind::Recording => &["mp4"],
            FileKind::Snapshot => &["jpg", "png"],
        }
    }

    fn url_prefix(self) -> &'static str {
        match self {
            FileKind::Recording => "/files/recordings/",
            FileKind::Snapshot => "/files/snapshots/",
        }
    }
}

fn validate_pagination(limit: usize, offset: usize) -> Result<()> {
    if !(1..=1000).contains(&limit) {
        return Err(AppError::InvalidParam(format!(
            "limit must be in [1, 1000], got {limit}"
        )));
    }
    let _ = offset;
    Ok(())
}

fn matches_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| extensions.iter().any(|ext| ext.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

async fn to_file_metadata(path: &Path, kind: FileKind) -> Result<FileMetadata> {
    let metadata = tokio::fs::metadata(path).await.map_err(AppError::Io)?;
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| AppError::InvalidParam("file has no valid name".to_string()))?
        .to_string();
    let modified_at: DateTime<Utc> = metadata.modified().map_err(AppError::Io)?.into();
    let created_at: DateTime<Utc> = metadata
        .created()
        .map(DateTime::<Utc>::from)
        .unwrap_or(modified_at);

    Ok(FileMetadata {
        filename: filename.clone(),
        size_bytes: metadata.len(),
        created_at,
        modified_at,
        duration_secs: None,
        download_url: format!("{}{}", kind.url_prefix(), filename),
    })
}

/// Lists files in `dir` matching `kind`'s extension policy, sorted by
/// modification time descending, paginated with validated
/// `limit`/`offset`.
pub async fn list_files(dir: &Path, kind: FileKind, limit: usize, offset: usize) -> Result<FileListResponse> {
    validate_pagination(limit, offset)?;

    let mut entries = Vec::new();
    let mut read_dir = match tokio::fs::read_dir(dir).await {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(FileListResponse {
                files: vec![],
                total: 0,
                limit,
                offset,
            })
        }
        Err(e) => return Err(AppError::Io(e)),
    };

    while let Some(entry) = read_dir.next_entry().await.map_err(AppError::Io)? {
        let path = entry.path();
        if !path.is_file() || !matches_extension(&path, kind.extensions()) {
            continue;
        }
        if let Ok(meta) = to_file_metadata(&path, kind).await {
            entries.push(meta);
        }
    }

    entries.sort_by(|a, b| b.modified_at.cmp(&a.modified_at));
    let total = entries.len();
    let page = entries.into_iter().skip(offset).take(limit).collect();

    Ok(FileListResponse {
        files: page,
        total,
        limit,
        offset,
    })
}

pub async fn file_info(dir: &Path, filename: &str, kind: FileKind) -> Result<FileMetadata> {
    validate_filename(filename)?;
    let path = safe_join(dir, filename)?;
    if !tokio::fs::metadata(&path).await.is_ok() {
        return Err(AppError::NotFound(filename.to_string()));
    }
    to_file_metadata(&path, kind).await
}

pub async fn delete_file(dir: &Path, filename: &str) -> Result<()> {
    validate_filename(filename)?;
    let path = safe_join(dir, filename)?;
    tokio::fs::remove_file(&path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            AppError::NotFound(filename.to_string())
        } else {
            AppError::Io(e)
        }
    })
}

fn validate_filename(filename: &str) -> Result<()> {
    if filename.is_empty() {
        return Err(AppError::InvalidParam("filename must not be empty".to_string()));
    }
    if filename.contains('/') || filename.contains("..") {
        return Err(AppError::InvalidParam(format!(
            "invalid filename: {filename}"
        )));
    }
    Ok(())
}

/// Joins `filename` (already validated to be a leaf name) onto `dir`.
fn safe_join(dir: &Path, filename: &str) -> Result<PathBuf> {
    Ok(dir.join(filename))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn lists_files_sorted_by_mtime_descending_with_extension_filter() {
        let dir = tempfile::tempdir().unwrap();
        for (name, delay_ms) in [("a.mp4", 0u64), ("b.mp4", 10), ("c.txt", 20)] {
            let path = dir.path().join(name);
            let mut f = std::fs::File::create(&path).unwrap();
            writeln!(f, "data").unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
        }

        let result = list_files(dir.path(), FileKind::Recording, 10, 0).await.unwrap();
        assert_eq!(result.total, 2);
        assert_eq!(result.files[0].filename, "b.mp4");
        assert_eq!(result.files[1].filename, "a.mp4");
    }

    #[tokio::test]
    async fn missing_directory_yields_empty_list() {
        let result = list_files(Path::new("/nonexistent/path"), FileKind::Recording, 10, 0)
            .await
            .unwrap();
        assert_eq!(result.total, 0);
        assert!(result.files.is_empty());
    }

    #[tokio::test]
    async fn rejects_out_of_range_limit() {
        let dir = tempfile::tempdir().unwrap();
        assert!(list_files(dir.path(), FileKind::Recording, 0, 0).await.is_err());
        assert!(list_files(dir.path(), FileKind::Recording, 1001, 0).await.is_err());
    }

    #[tokio::test]
    async fn empty_filename_is_invalid_param() {
        let dir = tempfile::tempdir().unwrap();
        let result = file_info(dir.path(), "", FileKind::Recording).await;
        assert!(matches!(result, Err(AppError::InvalidParam(_))));
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let result = file_info(dir.path(), "missing.mp4", FileKind::Recording).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn path_traversal_filename_is_invalid_param() {
        let dir = tempfile::tempdir().unwrap();
        let result = file_info(dir.path(), "../etc/passwd", FileKind::Recording).await;
        assert!(matches!(result, Err(AppError::InvalidParam(_))));
    }
}
