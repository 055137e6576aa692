use std::collections::HashSet;
use std::io::Write as _;
use std::path::Path;

use anyhow::{Context, Result, bail};

/// The set of access keys accepted by the server. Loaded once at startup.
#[derive(Debug, Clone, Default)]
pub struct KeyStore {
    keys: HashSet<String>,
}

impl KeyStore {
    /// Read a keys file: one key per line, `#` starts a comment line.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read keys file: {}", path.display()))?;
        let store = Self::parse(&contents);
        if store.is_empty() {
            bail!("No access keys found in {}", path.display());
        }
        Ok(store)
    }

    pub fn parse(contents: &str) -> Self {
        Self::from_keys(
            contents
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#')),
        )
    }

    pub fn from_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// 32 random bytes, hex encoded.
pub fn generate_key() -> String {
    use rand::Rng;
    use std::fmt::Write;

    let bytes: [u8; 32] = rand::rng().random();
    bytes
        .iter()
        .fold(String::with_capacity(64), |mut acc: String, b| {
            let _ = write!(acc, "{b:02x}");
            acc
        })
}

/// Append a key to the keys file, creating it owner-readable only.
pub fn append_key(path: &Path, key: &str) -> Result<()> {
    let existed = path.exists();
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open keys file: {}", path.display()))?;
    writeln!(file, "{key}").context("Failed to write keys file")?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if !existed {
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
                .context("Failed to set keys file permissions")?;
        }
    }
    #[cfg(not(unix))]
    let _ = existed;

    Ok(())
}
