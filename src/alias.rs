use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::Path;
use std::sync::{PoisonError, RwLock};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum AliasError {
    #[error("failed to read alias file: {0}")]
    Io(#[from] io::Error),

    #[error("malformed alias file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Maps alternate artist spellings to the canonical name used for searching.
#[derive(Debug, Default)]
pub struct AliasStore {
    aliases: RwLock<HashMap<String, String>>,
}

impl AliasStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Imports a JSON document of the form `{"Artist": ["alias", ...]}`.
    ///
    /// Returns the number of aliases added. A missing file imports nothing.
    pub fn load_file(&self, path: &Path) -> Result<usize, AliasError> {
        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err.into()),
        };
        let grouped: HashMap<String, Vec<String>> = serde_json::from_slice(&data)?;

        let mut aliases = self.aliases.write().unwrap_or_else(PoisonError::into_inner);
        let mut added = 0;
        for (artist, names) in grouped {
            for alias in names {
                aliases.insert(alias, artist.clone());
                added += 1;
            }
        }
        info!("Loaded {} artist aliases from {}", added, path.display());
        Ok(added)
    }

    /// Canonical name for `name`, or `name` itself when no alias is known.
    pub fn lookup(&self, name: &str) -> String {
        self.aliases
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }

    pub fn add(&self, alias: impl Into<String>, artist: impl Into<String>) {
        self.aliases
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(alias.into(), artist.into());
    }

    pub fn remove(&self, alias: &str) -> bool {
        self.aliases
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(alias)
            .is_some()
    }

    pub fn entries(&self) -> BTreeMap<String, String> {
        self.aliases
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(alias, artist)| (alias.clone(), artist.clone()))
            .collect()
    }
}
