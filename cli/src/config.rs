use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

use grocer_core::KeyStore;
use grocer_core::keys::{append_key, generate_key};

pub const DATA_DIR_ENV: &str = "GROCER_DATA_DIR";

pub struct Config {
    pub db_path: PathBuf,
    pub data_dir: PathBuf,
    pub keys_path: PathBuf,
}

impl Config {
    /// Resolve the data directory: explicit override, then `GROCER_DATA_DIR`,
    /// then the platform data directory.
    pub fn load(data_dir: Option<PathBuf>) -> Result<Self> {
        let data_dir = match data_dir.or_else(|| std::env::var_os(DATA_DIR_ENV).map(PathBuf::from))
        {
            Some(dir) => dir,
            None => ProjectDirs::from("", "", "grocer")
                .context("Could not determine home directory")?
                .data_dir()
                .to_path_buf(),
        };
        Self::in_dir(data_dir)
    }

    fn in_dir(data_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;

        Ok(Config {
            db_path: data_dir.join("grocer.db"),
            keys_path: data_dir.join("keys"),
            data_dir,
        })
    }

    pub fn tls_dir(&self) -> Result<PathBuf> {
        let dir = self.data_dir.join("tls");
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create TLS directory: {}", dir.display()))?;
        Ok(dir)
    }

    /// Load the access keys for `serve`.
    ///
    /// An explicit keys file must exist. Without one, the default keys file is
    /// used and created with a fresh key on first run; the new key is returned
    /// so it can be shown once.
    pub fn load_keys(&self, explicit: Option<&Path>) -> Result<(KeyStore, Option<String>)> {
        if let Some(path) = explicit {
            return Ok((KeyStore::load(path)?, None));
        }

        let path = &self.keys_path;
        if path.exists() {
            let store = KeyStore::load(path)?;
            return Ok((store, None));
        }

        let key = generate_key();
        append_key(path, &key)?;
        tracing::info!(path = %path.display(), "generated new access key");
        Ok((KeyStore::from_keys([key.clone()]), Some(key)))
    }
}
