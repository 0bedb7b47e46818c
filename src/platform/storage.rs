//! File-backed token store and config source

use std::fs;
use std::path::{Path, PathBuf};

use super::{ConfigSource, PlatformError, TokenStore};

/// Keeps the auth token as a single line in a file
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TokenStore for FileTokenStore {
    fn persist(&self, token: &str) -> Result<(), PlatformError> {
        let io_err = |source| PlatformError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        // Staged write, then rename over the old token
        let staging = self.path.with_extension("tmp");
        fs::write(&staging, format!("{}\n", token)).map_err(io_err)?;
        fs::rename(&staging, &self.path).map_err(io_err)?;
        Ok(())
    }

    fn load(&self) -> Option<String> {
        let text = fs::read_to_string(&self.path).ok()?;
        let token = text.trim();
        if token.is_empty() {
            None
        } else {
            Some(token.to_string())
        }
    }
}

/// Reads the kiosk config straight from disk
#[derive(Debug, Clone, Default)]
pub struct FileConfigSource;

impl ConfigSource for FileConfigSource {
    fn read_config_file(&self, path: &Path) -> Option<String> {
        match fs::read_to_string(path) {
            Ok(text) => Some(text),
            Err(err) => {
                log::error!("Error reading config '{}': {}", path.display(), err);
                None
            }
        }
    }
}
