//! JSON snapshot files

use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::errors::GatewayError;

/// A JSON file that is only ever replaced whole
#[derive(Debug, Clone)]
pub struct File {
    path: PathBuf,
}

impl File {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn exists(&self) -> bool {
        fs::try_exists(&self.path).await.unwrap_or(false)
    }

    pub async fn read_string(&self) -> Result<String, GatewayError> {
        Ok(fs::read_to_string(&self.path).await?)
    }

    pub async fn read_json<T: DeserializeOwned>(&self) -> Result<T, GatewayError> {
        let bytes = fs::read(&self.path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Serialize `value` and swap it in with [`File::write_atomic`]
    pub async fn write_json_atomic<T: Serialize>(&self, value: &T) -> Result<(), GatewayError> {
        let contents = serde_json::to_vec_pretty(value)?;
        self.write_atomic(&contents).await
    }

    /// Write to a sibling `.tmp` file, fsync, restrict to 0600, then rename
    /// over the target. Readers see either the old or the new snapshot.
    pub async fn write_atomic(&self, contents: &[u8]) -> Result<(), GatewayError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let temp_path = self.path.with_extension("tmp");
        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut temp = options.open(&temp_path).await?;
        temp.write_all(contents).await?;
        temp.sync_all().await?;
        drop(temp);

        restrict_to_owner(&temp_path).await?;
        fs::rename(&temp_path, &self.path).await?;
        Ok(())
    }
}

/// `mode` on open only applies to new files, a leftover temp file keeps its bits
async fn restrict_to_owner(path: &Path) -> Result<(), GatewayError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}
