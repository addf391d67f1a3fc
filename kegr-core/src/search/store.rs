// kegr-core/src/search/store.rs
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use kegr_common::error::{KegrError, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One page of the documentation site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub content: String,
}

/// The pre-built page collection, in site order.
#[derive(Debug, Clone, Default)]
pub struct DocumentStore {
    documents: Vec<Document>,
    by_id: HashMap<String, usize>,
}

impl DocumentStore {
    pub fn new(documents: Vec<Document>) -> Self {
        let by_id = documents
            .iter()
            .enumerate()
            .map(|(i, d)| (d.id.clone(), i))
            .collect();
        Self { documents, by_id }
    }

    /// Parses a JSON array of documents.
    pub fn from_json(json: &str) -> Result<Self> {
        let documents: Vec<Document> = serde_json::from_str(json)?;
        Ok(Self::new(documents))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path).map_err(|e| {
            KegrError::NotFound(format!("Cannot read document store {}: {}", path.display(), e))
        })?;
        let store = Self::from_json(&json)?;
        debug!("Loaded {} documents from {}", store.len(), path.display());
        Ok(store)
    }

    pub fn get(&self, id: &str) -> Option<&Document> {
        self.by_id.get(id).map(|&i| &self.documents[i])
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}
