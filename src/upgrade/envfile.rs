//! Required environment keys, read from a dotenv-style file.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{RanupError, Result};

/// Source of the environment variable names every service must define.
pub trait RequiredKeySource: Send + Sync {
    fn required_keys(&self) -> Result<Vec<String>>;
}

/// Keys of a dotenv file, in file order.
#[derive(Debug, Clone)]
pub struct EnvFile {
    path: PathBuf,
    keys: Vec<String>,
}

impl EnvFile {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let content = std::fs::read_to_string(&path).map_err(|source| RanupError::EnvFile {
            path: path.clone(),
            source,
        })?;
        let keys = parse_keys(&path, &content)?;

        debug!("Loaded {} required keys from {}", keys.len(), path.display());
        Ok(Self { path, keys })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RequiredKeySource for EnvFile {
    fn required_keys(&self) -> Result<Vec<String>> {
        Ok(self.keys.clone())
    }
}

fn parse_keys(path: &Path, content: &str) -> Result<Vec<String>> {
    let mut keys: Vec<String> = Vec::new();

    for (index, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);

        let syntax_error = |reason: &str| RanupError::EnvFileSyntax {
            path: path.to_path_buf(),
            line: index + 1,
            reason: reason.to_string(),
        };

        let (key, _) = line
            .split_once('=')
            .ok_or_else(|| syntax_error("expected KEY=VALUE"))?;
        let key = key.trim();
        if key.is_empty() || key.contains(char::is_whitespace) {
            return Err(syntax_error("invalid key"));
        }

        if !keys.iter().any(|k| k == key) {
            keys.push(key.to_string());
        }
    }

    Ok(keys)
}
