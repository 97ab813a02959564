//! 暂存写入：先写入同目录隐藏临时文件，记录落库后再原子重命名。

use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::storage::StorageError;

/// 临时文件名中的固定标记，后台清理据此识别残留文件。
pub const STAGED_MARKER: &str = ".staged.";

/// 已写入磁盘、尚未提交到目标路径的文件。
#[derive(Debug)]
pub struct StagedFile {
    target: PathBuf,
    temp_path: PathBuf,
}

impl StagedFile {
    /// 在目标路径同目录写入临时文件并同步到磁盘。
    pub async fn write(target: &Path, contents: &[u8]) -> Result<Self, StorageError> {
        let parent = target.parent().ok_or(StorageError::InvalidPath)?;
        let base = target
            .file_name()
            .map(|name| name.to_string_lossy())
            .ok_or(StorageError::InvalidPath)?;
        let temp_path = parent.join(format!(".{base}{STAGED_MARKER}{}", Uuid::new_v4()));

        let staged = Self {
            target: target.to_path_buf(),
            temp_path,
        };
        if let Err(err) = staged.fill(contents).await {
            staged.discard().await;
            return Err(StorageError::Io(err));
        }
        Ok(staged)
    }

    async fn fill(&self, contents: &[u8]) -> io::Result<()> {
        let mut file = File::create(&self.temp_path).await?;
        file.write_all(contents).await?;
        file.sync_all().await
    }

    /// 放弃并删除临时文件。
    pub async fn discard(self) {
        let _ = fs::remove_file(&self.temp_path).await;
    }

    /// 重命名到目标路径。
    pub async fn commit(self) -> Result<PathBuf, StorageError> {
        if let Err(err) = fs::rename(&self.temp_path, &self.target).await {
            let _ = fs::remove_file(&self.temp_path).await;
            return Err(StorageError::Io(err));
        }

        if let Some(parent) = self.target.parent() {
            let _ = sync_dir(parent).await;
        }

        Ok(self.target)
    }
}

/// 依次提交全部暂存文件；某个失败时丢弃其余尚未提交的文件并返回该错误。
pub async fn commit_all(staged: Vec<StagedFile>) -> Result<Vec<PathBuf>, StorageError> {
    let mut committed = Vec::with_capacity(staged.len());
    let mut pending = staged.into_iter();
    while let Some(file) = pending.next() {
        match file.commit().await {
            Ok(path) => committed.push(path),
            Err(err) => {
                for rest in pending {
                    rest.discard().await;
                }
                return Err(err);
            }
        }
    }
    Ok(committed)
}

/// 丢弃全部暂存文件。
pub async fn discard_all(staged: Vec<StagedFile>) {
    for file in staged {
        file.discard().await;
    }
}

/// 判断文件名是否为暂存临时文件。
pub fn is_staged_name(name: &str) -> bool {
    name.starts_with('.') && name.contains(STAGED_MARKER)
}

async fn sync_dir(path: &Path) -> io::Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let dir = std::fs::File::open(path)?;
        dir.sync_all()
    })
    .await
    .map_err(|err| io::Error::other(err.to_string()))?
}
