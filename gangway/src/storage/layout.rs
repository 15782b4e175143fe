//! Where the gateway keeps its files

use std::path::PathBuf;

use tokio::fs;

use crate::errors::GatewayError;
use crate::filesys::file::File;

/// Data directory:
///
/// ```text
/// <base_dir>/settings.json
/// <base_dir>/state/deployments.json
/// <base_dir>/state/credentials.json   (0600)
/// ```
#[derive(Debug, Clone)]
pub struct StorageLayout {
    pub base_dir: PathBuf,
}

impl StorageLayout {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn settings_file(&self) -> File {
        File::new(self.base_dir.join("settings.json"))
    }

    /// Snapshot of all deployment records
    pub fn deployments_file(&self) -> File {
        File::new(self.state_dir().join("deployments.json"))
    }

    /// Credential sets, kept apart from the records and owner-readable only
    pub fn credentials_file(&self) -> File {
        File::new(self.state_dir().join("credentials.json"))
    }

    pub fn state_dir(&self) -> PathBuf {
        self.base_dir.join("state")
    }

    /// Create the state directory, owner-only on unix
    pub async fn setup(&self) -> Result<(), GatewayError> {
        let state_dir = self.state_dir();
        fs::create_dir_all(&state_dir).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&state_dir, std::fs::Permissions::from_mode(0o700)).await?;
        }
        Ok(())
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        Self::new("/var/lib/gangway")
    }
}
