use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs;
use tracing::{info, warn};

use crate::config::MAX_USERNAME_LEN;
use crate::staging::is_staged_name;

/// On-disk upload root, laid out as `<root>/<username>/<file>`.
#[derive(Clone, Debug)]
pub struct Storage {
    root: PathBuf,
    public_prefix: String,
}

impl Storage {
    pub fn new(root: PathBuf, public_prefix: &str) -> Self {
        Self {
            root,
            public_prefix: public_prefix.trim_end_matches('/').to_string(),
        }
    }

    pub async fn ensure_root(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root).await
    }

    pub fn root_path(&self) -> &Path {
        &self.root
    }

    /// Directory for `username`; does not touch the filesystem.
    pub fn user_dir(&self, username: &str) -> Result<PathBuf, StorageError> {
        if !is_valid_username(username) {
            return Err(StorageError::InvalidPath);
        }
        Ok(self.root.join(username))
    }

    /// Creates the user's directory if missing. Safe to race.
    pub async fn ensure_user_dir(&self, username: &str) -> Result<PathBuf, StorageError> {
        let dir = self.user_dir(username)?;
        fs::create_dir_all(&dir).await?;
        self.ensure_no_symlink_components(&dir).await?;
        Ok(dir)
    }

    /// Public path recorded for a stored file, e.g. `/uploads/alice/x.jpg`.
    pub fn public_path(&self, username: &str, file_name: &str) -> String {
        format!("{}/{}/{}", self.public_prefix, username, file_name)
    }

    /// Maps a public path back to the file under the root.
    pub async fn resolve_public(&self, public_path: &str) -> Result<PathBuf, StorageError> {
        let relative = public_path
            .strip_prefix(&self.public_prefix)
            .filter(|rest| rest.starts_with('/'))
            .ok_or(StorageError::InvalidPath)?;
        let target = self.resolve(relative)?;
        self.ensure_no_symlink_components(&target).await?;
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

    async fn ensure_no_symlink_components(&self, target: &Path) -> Result<(), StorageError> {
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
                Err(err) => return Err(StorageError::Io(err)),
            }
        }

        Ok(())
    }

    /// Removes staged temp files older than `ttl` from every user directory.
    /// Returns how many were removed.
    pub async fn sweep_staged(&self, ttl: Duration) -> io::Result<usize> {
        if fs::metadata(&self.root).await.is_err() {
            return Ok(0);
        }

        let now = SystemTime::now();
        let mut removed = 0;
        let mut users = fs::read_dir(&self.root).await?;
        while let Some(user) = users.next_entry().await? {
            if !user.file_type().await?.is_dir() {
                continue;
            }
            let mut files = fs::read_dir(user.path()).await?;
            while let Some(entry) = files.next_entry().await? {
                let name = entry.file_name();
                if !is_staged_name(&name.to_string_lossy()) {
                    continue;
                }
                let Ok(modified) = entry.metadata().await?.modified() else {
                    continue;
                };
                let Ok(age) = now.duration_since(modified) else {
                    continue;
                };
                if age < ttl {
                    continue;
                }
                let path = entry.path();
                match fs::remove_file(&path).await {
                    Ok(()) => {
                        removed += 1;
                        info!(path = ?path, "removed stale staged file");
                    }
                    Err(err) => warn!(path = ?path, error = %err, "failed to remove staged file"),
                }
            }
        }

        Ok(removed)
    }
}

/// A username is both a directory name and a MongoDB collection name, so it
/// must be one plain path segment and a legal collection name.
pub fn is_valid_username(value: &str) -> bool {
    if value.is_empty()
        || value.len() > MAX_USERNAME_LEN
        || value.starts_with('.')
        || value.starts_with("system.")
        || value.contains(['/', '\\', '\0', '$'])
    {
        return false;
    }
    let mut components = Path::new(value).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

#[derive(Debug)]
pub enum StorageError {
    InvalidPath,
    Io(io::Error),
}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> Self {
        StorageError::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::{Storage, StorageError};
    use crate::config::PUBLIC_UPLOAD_PREFIX;
    use std::time::Duration;
    use tempfile::tempdir;

    fn make_storage(temp: &tempfile::TempDir) -> Storage {
        Storage::new(temp.path().join("uploads"), PUBLIC_UPLOAD_PREFIX)
    }

    #[test]
    fn user_dir_rejects_unsafe_names() {
        let temp = tempdir().expect("tempdir");
        let storage = make_storage(&temp);
        let too_long = "u".repeat(crate::config::MAX_USERNAME_LEN + 1);
        for name in [
            "",
            "..",
            ".hidden",
            "a/b",
            "a\\b",
            "/root",
            "a$b",
            "system.users",
            too_long.as_str(),
        ] {
            assert!(
                matches!(storage.user_dir(name), Err(StorageError::InvalidPath)),
                "{name:?} should be rejected"
            );
        }
        assert!(storage.user_dir("alice").is_ok());
        assert!(storage.user_dir("alice.system").is_ok());
    }

    #[tokio::test]
    async fn public_path_round_trips_to_disk() {
        let temp = tempdir().expect("tempdir");
        let storage = make_storage(&temp);
        let dir = storage.ensure_user_dir("alice").await.expect("user dir");
        std::fs::write(dir.join("x.png"), b"png").expect("write file");

        let public = storage.public_path("alice", "x.png");
        assert_eq!(public, "/uploads/alice/x.png");
        let resolved = storage.resolve_public(&public).await.expect("resolve");
        assert_eq!(resolved, dir.join("x.png"));
    }

    #[tokio::test]
    async fn resolve_public_rejects_foreign_and_traversal_paths() {
        let temp = tempdir().expect("tempdir");
        let storage = make_storage(&temp);
        for path in ["/etc/passwd", "/uploads/../secret", "/uploadsx/a", "/uploads/"] {
            assert!(
                matches!(
                    storage.resolve_public(path).await,
                    Err(StorageError::InvalidPath)
                ),
                "{path:?} should be rejected"
            );
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn resolve_public_rejects_symlink() {
        use std::os::unix::fs::symlink;

        let temp = tempdir().expect("tempdir");
        let storage = make_storage(&temp);
        let dir = storage.ensure_user_dir("alice").await.expect("user dir");

        let outside = temp.path().join("outside.txt");
        std::fs::write(&outside, b"secret").expect("write outside file");
        symlink(&outside, dir.join("link.png")).expect("symlink");

        let result = storage.resolve_public("/uploads/alice/link.png").await;
        assert!(matches!(result, Err(StorageError::InvalidPath)));
    }

    #[tokio::test]
    async fn sweep_removes_only_staged_files() {
        let temp = tempdir().expect("tempdir");
        let storage = make_storage(&temp);
        let dir = storage.ensure_user_dir("alice").await.expect("user dir");
        std::fs::write(dir.join("kept-front-1.jpg"), b"a").expect("write kept");
        std::fs::write(dir.join(".kept-front-2.jpg.staged.abc"), b"b").expect("write staged");

        let removed = storage.sweep_staged(Duration::ZERO).await.expect("sweep");
        assert_eq!(removed, 1);
        assert!(dir.join("kept-front-1.jpg").exists());
        assert!(!dir.join(".kept-front-2.jpg.staged.abc").exists());
    }

    #[tokio::test]
    async fn sweep_keeps_fresh_staged_files() {
        let temp = tempdir().expect("tempdir");
        let storage = make_storage(&temp);
        let dir = storage.ensure_user_dir("bob").await.expect("user dir");
        std::fs::write(dir.join(".b-back-1.png.staged.abc"), b"b").expect("write staged");

        let removed = storage
            .sweep_staged(Duration::from_secs(3600))
            .await
            .expect("sweep");
        assert_eq!(removed, 0);
    }
}
