//! Local filesystem driver rooted at a configured directory.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bedrock_config::FILE_DRIVER_LOCAL;
use chrono::{DateTime, Utc};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tracing::debug;
use walkdir::WalkDir;

use crate::backend::{FileBackend, ReadSeek};
use crate::error::{FileStoreError, FileStoreResult, io_error};
use crate::paths::{relative_key, resolve_under};

const TEST_FILE_PATH: &str = "testfile";
const STAGING_PREFIX: &str = ".bedrock-staging-";

/// Backend storing files beneath a root directory.
#[derive(Debug, Clone)]
pub struct LocalFileBackend {
    root: PathBuf,
}

impl LocalFileBackend {
    /// Create a backend rooted at `directory`; nothing is touched until first use.
    #[must_use]
    pub fn new(directory: &str) -> Self {
        Self {
            root: PathBuf::from(directory),
        }
    }

    /// Root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> FileStoreResult<PathBuf> {
        resolve_under(&self.root, path)
    }

    async fn ensure_parent(operation: &'static str, target: &Path) -> FileStoreResult<()> {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| io_error(operation, parent.to_path_buf(), source))?;
        }
        Ok(())
    }

    async fn metadata(
        &self,
        operation: &'static str,
        path: &str,
    ) -> FileStoreResult<std::fs::Metadata> {
        let target = self.resolve(path)?;
        fs::metadata(&target)
            .await
            .map_err(|source| io_error(operation, target, source))
    }
}

#[async_trait]
impl FileBackend for LocalFileBackend {
    fn driver_name(&self) -> &'static str {
        FILE_DRIVER_LOCAL
    }

    async fn test_connection(&self) -> FileStoreResult<()> {
        let mut marker: &[u8] = b"testingwrite";
        self.write_file(&mut marker, TEST_FILE_PATH).await?;
        self.remove_file(TEST_FILE_PATH).await?;
        debug!(root = %self.root.display(), "local file backend reachable");
        Ok(())
    }

    async fn reader(&self, path: &str) -> FileStoreResult<Box<dyn ReadSeek>> {
        let target = self.resolve(path)?;
        let file = fs::File::open(&target)
            .await
            .map_err(|source| io_error("reader", target, source))?;
        Ok(Box::new(file))
    }

    async fn read_file(&self, path: &str) -> FileStoreResult<Vec<u8>> {
        let target = self.resolve(path)?;
        fs::read(&target)
            .await
            .map_err(|source| io_error("read_file", target, source))
    }

    async fn file_exists(&self, path: &str) -> FileStoreResult<bool> {
        let target = self.resolve(path)?;
        fs::try_exists(&target)
            .await
            .map_err(|source| io_error("file_exists", target, source))
    }

    async fn file_size(&self, path: &str) -> FileStoreResult<u64> {
        Ok(self.metadata("file_size", path).await?.len())
    }

    async fn file_mod_time(&self, path: &str) -> FileStoreResult<DateTime<Utc>> {
        let metadata = self.metadata("file_mod_time", path).await?;
        let modified = metadata
            .modified()
            .map_err(|source| io_error("file_mod_time", self.root.join(path), source))?;
        Ok(DateTime::<Utc>::from(modified))
    }

    async fn copy_file(&self, old_path: &str, new_path: &str) -> FileStoreResult<()> {
        let source_path = self.resolve(old_path)?;
        let target = self.resolve(new_path)?;
        Self::ensure_parent("copy_file", &target).await?;
        fs::copy(&source_path, &target)
            .await
            .map_err(|source| io_error("copy_file", source_path, source))?;
        Ok(())
    }

    async fn move_file(&self, old_path: &str, new_path: &str) -> FileStoreResult<()> {
        let source_path = self.resolve(old_path)?;
        let target = self.resolve(new_path)?;
        Self::ensure_parent("move_file", &target).await?;
        fs::rename(&source_path, &target)
            .await
            .map_err(|source| io_error("move_file", source_path, source))
    }

    async fn write_file(
        &self,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        path: &str,
    ) -> FileStoreResult<u64> {
        let target = self.resolve(path)?;
        Self::ensure_parent("write_file", &target).await?;
        let parent = target.parent().unwrap_or(self.root.as_path());

        // The previous contents stay in place until the staged copy is complete.
        let (staged, staged_path) = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempfile_in(parent)
            .map_err(|source| io_error("write_file", parent.to_path_buf(), source))?
            .into_parts();
        let mut file = fs::File::from_std(staged);
        let written = tokio::io::copy(reader, &mut file)
            .await
            .map_err(|source| io_error("write_file", target.clone(), source))?;
        file.flush()
            .await
            .map_err(|source| io_error("write_file", target.clone(), source))?;
        drop(file);

        staged_path
            .persist(&target)
            .map_err(|err| io_error("write_file", target, err.error))?;
        Ok(written)
    }

    async fn append_file(
        &self,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        path: &str,
    ) -> FileStoreResult<u64> {
        let target = self.resolve(path)?;
        let mut file = fs::OpenOptions::new()
            .append(true)
            .open(&target)
            .await
            .map_err(|source| io_error("append_file", target.clone(), source))?;
        let written = tokio::io::copy(reader, &mut file)
            .await
            .map_err(|source| io_error("append_file", target.clone(), source))?;
        file.flush()
            .await
            .map_err(|source| io_error("append_file", target, source))?;
        Ok(written)
    }

    async fn remove_file(&self, path: &str) -> FileStoreResult<()> {
        let target = self.resolve(path)?;
        fs::remove_file(&target)
            .await
            .map_err(|source| io_error("remove_file", target, source))
    }

    async fn list_directory(&self, path: &str) -> FileStoreResult<Vec<String>> {
        let target = self.resolve(path)?;
        let mut entries = match fs::read_dir(&target).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(io_error("list_directory", target, source)),
        };

        let mut listed = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| io_error("list_directory", target.clone(), source))?
        {
            if is_staging(&entry.path()) {
                continue;
            }
            if let Some(key) = relative_key(&self.root, &entry.path()) {
                listed.push(key);
            }
        }
        listed.sort();
        Ok(listed)
    }

    async fn list_directory_recursively(&self, path: &str) -> FileStoreResult<Vec<String>> {
        let target = self.resolve(path)?;
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || walk_files(&root, &target))
            .await
            .map_err(|source| FileStoreError::Join {
                operation: "list_directory_recursively",
                source,
            })?
    }

    async fn remove_directory(&self, path: &str) -> FileStoreResult<()> {
        let target = self.resolve(path)?;
        if target == self.root {
            return Err(FileStoreError::InvalidPath {
                path: path.to_string(),
                reason: "root_directory",
            });
        }
        match fs::remove_dir_all(&target).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(io_error("remove_directory", target, source)),
        }
    }
}

fn walk_files(root: &Path, start: &Path) -> FileStoreResult<Vec<String>> {
    if !start.exists() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(start).follow_links(false) {
        let entry = entry.map_err(|source| FileStoreError::Walkdir {
            operation: "list_directory_recursively",
            path: start.to_path_buf(),
            source,
        })?;
        if entry.file_type().is_file()
            && !is_staging(entry.path())
            && let Some(key) = relative_key(root, entry.path())
        {
            files.push(key);
        }
    }
    files.sort();
    Ok(files)
}

fn is_staging(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with(STAGING_PREFIX))
}
