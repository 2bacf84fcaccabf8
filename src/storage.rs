//! 上传存储后端：相对路径解析、目录准备与独占写入。

use async_trait::async_trait;
use std::io;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::io::ErrorKind;
use tracing::debug;

use crate::atomic::AtomicFile;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid storage path")]
    InvalidPath,
    #[error("target file already exists")]
    AlreadyExists,
    #[error("{0}")]
    Io(#[from] io::Error),
}

/// 上传处理器使用的持久化接口。
///
/// 路径以 `/` 分隔，相对于后端根目录，根目录位置由后端决定。
#[async_trait]
pub trait UploadStore: Send + Sync {
    /// 创建目录及缺失的上级目录，目录已存在不视为错误。
    async fn prepare_dir(&self, relative: &str) -> Result<(), StorageError>;

    /// 将 `data` 写入尚不存在的文件。
    ///
    /// 目标已存在时返回 [`StorageError::AlreadyExists`]，不会覆盖。
    async fn persist_new(&self, relative: &str, data: &[u8]) -> Result<(), StorageError>;

    async fn remove(&self, relative: &str) -> Result<(), StorageError>;
}

#[derive(Clone, Debug)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub async fn ensure_root(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root).await
    }

    pub fn root_path(&self) -> &Path {
        &self.root
    }

    pub async fn resolve_path_checked(
        &self,
        relative: &str,
        allow_missing_leaf: bool,
    ) -> Result<PathBuf, StorageError> {
        let target = self.resolve(relative)?;
        self.ensure_no_symlink_components(&target, allow_missing_leaf)
            .await?;
        Ok(target)
    }

    fn resolve(&self, relative: &str) -> Result<PathBuf, StorageError> {
        let mut normalized = PathBuf::new();
        let trimmed = relative.trim_start_matches(['/', '\\']);
        for component in Path::new(trimmed).components() {
            match component {
                Component::Normal(segment) => normalized.push(segment),
                Component::CurDir => continue,
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(StorageError::InvalidPath);
                }
            }
        }
        if normalized.as_os_str().is_empty() {
            return Err(StorageError::InvalidPath);
        }

        Ok(self.root.join(normalized))
    }

    async fn ensure_no_symlink_components(
        &self,
        target: &Path,
        allow_missing_leaf: bool,
    ) -> Result<(), StorageError> {
        let relative = target
            .strip_prefix(&self.root)
            .map_err(|_| StorageError::InvalidPath)?;
        let mut current = PathBuf::from(&self.root);
        let mut components = relative.components().peekable();

        while let Some(component) = components.next() {
            current.push(component.as_os_str());
            match fs::symlink_metadata(&current).await {
                Ok(metadata) => {
                    if metadata.file_type().is_symlink() {
                        return Err(StorageError::InvalidPath);
                    }
                    if components.peek().is_some() && !metadata.is_dir() {
                        return Err(StorageError::InvalidPath);
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound && allow_missing_leaf => {
                    return Ok(());
                }
                Err(err) => return Err(StorageError::Io(err)),
            }
        }

        Ok(())
    }
}

#[async_trait]
impl UploadStore for LocalStore {
    async fn prepare_dir(&self, relative: &str) -> Result<(), StorageError> {
        let target = self.resolve_path_checked(relative, true).await?;
        // create_dir_all 对并发创建的目录同样返回成功。
        fs::create_dir_all(&target).await?;
        debug!(path = relative, "upload dir ready");
        Ok(())
    }

    async fn persist_new(&self, relative: &str, data: &[u8]) -> Result<(), StorageError> {
        let target = self.resolve_path_checked(relative, true).await?;
        let mut atomic = AtomicFile::new(&target).await?;
        if let Err(err) = atomic.write_all(data).await {
            atomic.cleanup().await;
            return Err(err);
        }
        atomic.publish_new().await
    }

    async fn remove(&self, relative: &str) -> Result<(), StorageError> {
        let target = self.resolve_path_checked(relative, false).await?;
        fs::remove_file(target).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{LocalStore, StorageError, UploadStore};
    use tempfile::tempdir;

    fn make_store() -> (tempfile::TempDir, LocalStore) {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("root");
        std::fs::create_dir_all(&root).expect("create root");
        (temp, LocalStore::new(root))
    }

    #[tokio::test]
    async fn prepare_dir_is_idempotent() {
        let (_temp, store) = make_store();
        store
            .prepare_dir("public/uploads/documents")
            .await
            .expect("first prepare");
        store
            .prepare_dir("public/uploads/documents")
            .await
            .expect("second prepare");
        assert!(store.root_path().join("public/uploads/documents").is_dir());
    }

    #[tokio::test]
    async fn concurrent_prepare_dir_does_not_fail() {
        let (_temp, store) = make_store();
        let (a, b) = tokio::join!(
            store.prepare_dir("public/uploads/fresh"),
            store.prepare_dir("public/uploads/fresh")
        );
        assert!(a.is_ok());
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn persist_new_refuses_to_overwrite() {
        let (_temp, store) = make_store();
        store.prepare_dir("uploads").await.expect("prepare");
        store
            .persist_new("uploads/a.txt", b"first")
            .await
            .expect("first write");

        let result = store.persist_new("uploads/a.txt", b"second").await;
        assert!(matches!(result, Err(StorageError::AlreadyExists)));

        let contents = std::fs::read(store.root_path().join("uploads/a.txt")).expect("read");
        assert_eq!(contents, b"first");
        let leftovers = std::fs::read_dir(store.root_path().join("uploads"))
            .expect("read dir")
            .count();
        assert_eq!(leftovers, 1, "temp file should be cleaned up");
    }

    #[tokio::test]
    async fn persist_new_accepts_names_near_the_limit() {
        let (_temp, store) = make_store();
        store.prepare_dir("uploads").await.expect("prepare");
        let relative = format!("uploads/{}.png", "b".repeat(240));

        store.persist_new(&relative, b"png").await.expect("write");

        let entries: Vec<_> = std::fs::read_dir(store.root_path().join("uploads"))
            .expect("read dir")
            .collect();
        assert_eq!(entries.len(), 1);
        assert!(store.root_path().join(&relative).is_file());
    }

    #[tokio::test]
    async fn prepare_dir_fails_when_a_file_blocks_the_path() {
        let (_temp, store) = make_store();
        std::fs::create_dir_all(store.root_path().join("uploads")).expect("create");
        std::fs::write(store.root_path().join("uploads/images"), b"x").expect("write");

        let result = store.prepare_dir("uploads/images").await;

        assert!(matches!(result, Err(StorageError::Io(_))));
    }

    #[tokio::test]
    async fn resolve_rejects_traversal() {
        let (_temp, store) = make_store();
        let result = store.persist_new("../escape.txt", b"x").await;
        assert!(matches!(result, Err(StorageError::InvalidPath)));
        let result = store.prepare_dir("").await;
        assert!(matches!(result, Err(StorageError::InvalidPath)));
    }

    #[tokio::test]
    async fn remove_deletes_file() {
        let (_temp, store) = make_store();
        store.prepare_dir("uploads").await.expect("prepare");
        store
            .persist_new("uploads/gone.bin", b"abc")
            .await
            .expect("write");
        store.remove("uploads/gone.bin").await.expect("remove");
        assert!(!store.root_path().join("uploads/gone.bin").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn prepare_dir_rejects_symlinked_entity() {
        use std::os::unix::fs::symlink;

        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("root");
        std::fs::create_dir_all(root.join("uploads")).expect("create root");
        let outside = temp.path().join("outside");
        std::fs::create_dir_all(&outside).expect("create outside");
        symlink(&outside, root.join("uploads/linked")).expect("symlink");

        let store = LocalStore::new(root);
        let result = store.prepare_dir("uploads/linked").await;
        assert!(matches!(result, Err(StorageError::InvalidPath)));
    }
}
