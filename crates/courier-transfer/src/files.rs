//! Download destination naming, collision handling and in-process file locks

use crate::settings::DownloadWriteMode;
use courier_types::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{File, OpenOptions};
use tracing::debug;
use url::Url;

/// Name used when neither the response nor the URL yields one
pub const FALLBACK_FILE_NAME: &str = "download";

/// Reduce a server-provided name to a single safe path component
pub fn sanitize_file_name(name: &str) -> Option<String> {
    let last = name.rsplit(|c| c == '/' || c == '\\').next().unwrap_or(name);
    let cleaned: String = last
        .chars()
        .map(|c| if c.is_control() { '_' } else { c })
        .collect();
    let cleaned = cleaned.trim();
    match cleaned {
        "" | "." | ".." => None,
        name => Some(name.to_string()),
    }
}

/// File name announced by a `Content-Disposition` header
///
/// `filename*` (RFC 5987) wins over a plain `filename`.
pub fn filename_from_content_disposition(value: &str) -> Option<String> {
    let mut plain = None;
    for param in value.split(';').skip(1) {
        let Some((key, raw)) = param.split_once('=') else {
            continue;
        };
        let raw = raw.trim();
        match key.trim().to_ascii_lowercase().as_str() {
            "filename*" => {
                let encoded = raw.splitn(3, '\'').nth(2).unwrap_or(raw);
                if let Some(name) = urlencoding::decode(encoded)
                    .ok()
                    .and_then(|decoded| sanitize_file_name(&decoded))
                {
                    return Some(name);
                }
            }
            "filename" => plain = sanitize_file_name(raw.trim_matches('"')),
            _ => {}
        }
    }
    plain
}

/// Last non-empty path segment of a URL, percent-decoded
pub fn filename_from_url(url: &Url) -> Option<String> {
    let segment = url.path_segments()?.rev().find(|s| !s.is_empty())?;
    let decoded = urlencoding::decode(segment).ok()?;
    sanitize_file_name(&decoded)
}

/// First `name (n).ext` sibling of `path` that does not exist yet
pub async fn next_free_name(path: &Path) -> PathBuf {
    let parent = path.parent().unwrap_or_else(|| Path::new(""));
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = path.extension().map(|e| e.to_string_lossy().into_owned());

    let mut n = 1u32;
    loop {
        let name = match &extension {
            Some(ext) => format!("{} ({}).{}", stem, n, ext),
            None => format!("{} ({})", stem, n),
        };
        let candidate = parent.join(name);
        if !exists(&candidate).await {
            return candidate;
        }
        n += 1;
    }
}

async fn exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

/// Resolved destination of a download attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    /// File that receives the body
    pub path: PathBuf,
    /// Bytes already present; non-zero only when resuming
    pub offset: u64,
}

impl Destination {
    /// Apply the collision policy to `path`, creating missing parent directories
    pub async fn plan(path: PathBuf, mode: DownloadWriteMode) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::file_reason(parent, format!("Cannot create directory: {}", e)))?;
        }

        let existing = match tokio::fs::metadata(&path).await {
            Ok(metadata) if metadata.is_dir() => {
                return Err(Error::file_reason(&path, "Destination is a directory"));
            }
            Ok(metadata) => Some(metadata.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(Error::file_reason(&path, e.to_string())),
        };

        let destination = match (existing, mode) {
            (None, _) | (Some(_), DownloadWriteMode::Overwrite) => Self { path, offset: 0 },
            (Some(len), DownloadWriteMode::ResumeDownload) => Self { path, offset: len },
            (Some(_), DownloadWriteMode::CreateNew) => Self {
                path: next_free_name(&path).await,
                offset: 0,
            },
            (Some(_), DownloadWriteMode::DoNothing) => {
                return Err(Error::file_reason(&path, "Destination already exists"));
            }
        };
        debug!(
            "Planned destination {} at offset {}",
            destination.path.display(),
            destination.offset
        );
        Ok(destination)
    }

    /// Write `path` from the start, skipping the collision policy
    ///
    /// Used for a file this submission already claimed on an earlier attempt.
    pub fn reclaim(path: PathBuf) -> Self {
        Self { path, offset: 0 }
    }

    /// Drop the resume offset, for servers that ignore range requests
    pub fn restart(&mut self) {
        self.offset = 0;
    }

    /// Open the file for writing, appending when resuming
    pub async fn open(&self) -> Result<File> {
        let mut options = OpenOptions::new();
        options.create(true).write(true);
        if self.offset > 0 {
            options.append(true);
        } else {
            options.truncate(true);
        }
        options
            .open(&self.path)
            .await
            .map_err(|e| Error::file_reason(&self.path, format!("Cannot open for writing: {}", e)))
    }
}

/// Advisory write locks on destination files, shared by one context
#[derive(Debug, Default)]
pub struct FileLocks {
    held: Mutex<HashSet<PathBuf>>,
}

impl FileLocks {
    /// Create an empty lock table
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock `path` for writing; fails with a file error if it is already held
    pub fn try_lock(self: &Arc<Self>, path: &Path) -> Result<FileLockGuard> {
        if !self.held.lock().insert(path.to_path_buf()) {
            return Err(Error::file_reason(path, "File is being written by another transfer"));
        }
        Ok(FileLockGuard {
            locks: Arc::clone(self),
            path: path.to_path_buf(),
        })
    }

    /// Whether `path` is currently locked
    pub fn is_locked(&self, path: &Path) -> bool {
        self.held.lock().contains(path)
    }
}

/// Releases its lock on drop
#[derive(Debug)]
pub struct FileLockGuard {
    locks: Arc<FileLocks>,
    path: PathBuf,
}

impl Drop for FileLockGuard {
    fn drop(&mut self) {
        self.locks.held.lock().remove(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tokio::io::AsyncWriteExt;

    #[rstest]
    #[case("attachment; filename=\"report.pdf\"", Some("report.pdf"))]
    #[case("attachment; filename=plain.txt", Some("plain.txt"))]
    #[case(
        "attachment; filename=\"fallback.txt\"; filename*=UTF-8''na%C3%AFve%20file.txt",
        Some("naïve file.txt")
    )]
    #[case("attachment; filename=\"../../etc/passwd\"", Some("passwd"))]
    #[case("attachment; filename=\"..\"", None)]
    #[case("inline", None)]
    fn test_content_disposition(#[case] header: &str, #[case] expected: Option<&str>) {
        assert_eq!(
            filename_from_content_disposition(header).as_deref(),
            expected
        );
    }

    #[rstest]
    #[case("http://host/files/archive.tar.gz", Some("archive.tar.gz"))]
    #[case("http://host/files/my%20doc.txt?x=1", Some("my doc.txt"))]
    #[case("http://host/dir/", Some("dir"))]
    #[case("http://host/", None)]
    fn test_url_names(#[case] url: &str, #[case] expected: Option<&str>) {
        let url = Url::parse(url).unwrap();
        assert_eq!(filename_from_url(&url).as_deref(), expected);
    }

    #[tokio::test]
    async fn test_next_free_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.pdf");
        std::fs::write(&path, b"x").unwrap();
        std::fs::write(dir.path().join("report (1).pdf"), b"x").unwrap();

        assert_eq!(next_free_name(&path).await, dir.path().join("report (2).pdf"));
        assert_eq!(
            next_free_name(&dir.path().join("data")).await,
            dir.path().join("data (1)")
        );
    }

    #[rstest]
    #[case(DownloadWriteMode::Overwrite, Some(("file.bin", 0)))]
    #[case(DownloadWriteMode::ResumeDownload, Some(("file.bin", 5)))]
    #[case(DownloadWriteMode::CreateNew, Some(("file (1).bin", 0)))]
    #[case(DownloadWriteMode::DoNothing, None)]
    #[tokio::test]
    async fn test_collision_policies(
        #[case] mode: DownloadWriteMode,
        #[case] expected: Option<(&str, u64)>,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.bin");
        std::fs::write(&path, b"12345").unwrap();

        let planned = Destination::plan(path, mode).await;
        match expected {
            Some((name, offset)) => {
                let planned = planned.unwrap();
                assert_eq!(planned.path, dir.path().join(name));
                assert_eq!(planned.offset, offset);
            }
            None => assert!(matches!(planned, Err(Error::FileReason { .. }))),
        }
    }

    #[tokio::test]
    async fn test_plan_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a").join("b").join("file.bin");
        let planned = Destination::plan(path.clone(), DownloadWriteMode::DoNothing)
            .await
            .unwrap();
        assert_eq!(planned.offset, 0);
        assert!(dir.path().join("a").join("b").is_dir());
    }

    #[tokio::test]
    async fn test_reclaim_truncates_without_renaming() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.bin");
        std::fs::write(&path, b"partial").unwrap();

        let destination = Destination::reclaim(path.clone());
        assert_eq!(destination.path, path);
        let mut file = destination.open().await.unwrap();
        file.write_all(b"new").await.unwrap();
        file.flush().await.unwrap();
        drop(file);
        assert_eq!(std::fs::read(&path).unwrap(), b"new");
    }

    #[test]
    fn test_file_locks_are_exclusive_until_dropped() {
        let locks = Arc::new(FileLocks::new());
        let path = Path::new("/tmp/courier-lock-test");
        let guard = locks.try_lock(path).unwrap();
        assert!(locks.is_locked(path));
        assert!(locks.try_lock(path).is_err());
        drop(guard);
        assert!(locks.try_lock(path).is_ok());
    }
}
