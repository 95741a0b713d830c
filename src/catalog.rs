use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
};

use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("nutrition catalog {} could not be read", path.display())]
    Missing {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("nutrition catalog {} is not a JSON object of class records", path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Class name to nutrition facts, loaded once and never mutated.
#[derive(Debug, Default, Clone)]
pub struct Catalog {
    records: BTreeMap<String, Value>,
}

impl Catalog {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| CatalogError::Missing {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_json(&raw).map_err(|source| CatalogError::Malformed {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        let records = serde_json::from_str(raw)?;
        Ok(Self { records })
    }

    /// Class names in ascending order.
    pub fn list_classes(&self) -> Vec<String> {
        self.records.keys().cloned().collect()
    }

    pub fn records(&self) -> &BTreeMap<String, Value> {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
