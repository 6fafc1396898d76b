//! Persistence of submitted snippets.
//!
//! The HTTP layer stores every submitted `{language, code}` pair under its
//! run id so a snippet can be reloaded later (the share-a-link flow). The
//! store is a boundary collaborator: the rest of the service only ever saves
//! and loads by id, so a networked key-value backend can replace this
//! in-process map without touching the core.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// A submitted language/code pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snippet {
    /// The submitted language tag.
    pub language: String,
    /// The submitted source code, verbatim.
    pub code: String,
}

/// In-process snippet store keyed by run id.
#[derive(Debug, Default)]
pub struct SnippetStore {
    entries: RwLock<HashMap<String, Snippet>>,
}

impl SnippetStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `snippet` under `id`, replacing any previous entry.
    pub async fn save(&self, id: &str, snippet: Snippet) {
        self.entries.write().await.insert(String::from(id), snippet);
    }

    /// Load the snippet stored under `id`, if any.
    pub async fn load(&self, id: &str) -> Option<Snippet> {
        self.entries.read().await.get(id).cloned()
    }
}
