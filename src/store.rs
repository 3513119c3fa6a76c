// SPDX-FileCopyrightText: 2025 Moritz Neeb <nt4u@kpvn.de>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The document store collaborator: persistence is an external concern the
//! core only depends on through a narrow trait.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::op::Operation;

/// The persisted state of one document.
#[derive(Debug, Clone, Default)]
pub struct StoredDocument {
    pub content: String,
    pub revision: u64,
    pub history: Vec<Operation>,
}

/// Load/save collaborator for `(content, revision, history)`.
///
/// A successful [`DocumentStore::save`] must be atomic with respect to
/// concurrent [`DocumentStore::load`]s of the same `doc_id`; the in-memory
/// implementation below gets this for free from its mutex, a networked
/// implementation (Redis and friends) must provide an equivalent guarantee
/// itself.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn load(&self, doc_id: &str) -> Option<StoredDocument>;

    /// Persist the full document state. `history_append` is the slice of
    /// history entries appended since the last save, provided so an
    /// implementation may choose to append incrementally instead of
    /// rewriting the whole history.
    ///
    /// On failure, the caller must not advance its in-memory `revision` or
    /// emit an Ack — the document session never mutates its committed state
    /// until this returns `Ok`.
    async fn save(
        &self,
        doc_id: &str,
        content: &str,
        revision: u64,
        history_append: &[Operation],
    ) -> anyhow::Result<()>;
}

/// An in-memory [`DocumentStore`], sufficient for the demo binary and for
/// integration tests. Not durable across process restarts.
#[derive(Default)]
pub struct InMemoryStore {
    docs: Mutex<HashMap<String, StoredDocument>>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn load(&self, doc_id: &str) -> Option<StoredDocument> {
        self.docs.lock().await.get(doc_id).cloned()
    }

    async fn save(
        &self,
        doc_id: &str,
        content: &str,
        revision: u64,
        history_append: &[Operation],
    ) -> anyhow::Result<()> {
        let mut docs = self.docs.lock().await;
        let entry = docs.entry(doc_id.to_string()).or_default();
        entry.content = content.to_string();
        entry.revision = revision;
        entry.history.extend_from_slice(history_append);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn load_of_unknown_doc_is_none() {
        let store = InMemoryStore::new();
        assert!(store.load("missing").await.is_none());
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let store = InMemoryStore::new();
        let mut op = Operation::new();
        op.insert("hi");
        store.save("doc-1", "hi", 1, &[op.clone()]).await.unwrap();

        let loaded = store.load("doc-1").await.unwrap();
        assert_eq!(loaded.content, "hi");
        assert_eq!(loaded.revision, 1);
        assert_eq!(loaded.history, vec![op]);
    }
}
