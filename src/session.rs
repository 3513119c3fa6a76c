// SPDX-FileCopyrightText: 2025 Moritz Neeb <nt4u@kpvn.de>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The document session: the server-side authoritative serialiser for one
//! document.
//!
//! [`DocumentState`] is the pure, synchronous algorithm — easy to unit test
//! in isolation. [`DocumentActor`] wraps it in a task-per-document
//! concurrency model: a single task owns the state and processes commands
//! from an mpsc queue one at a time, so pushes and pulls against the same
//! `docId` are always totally ordered, while different documents run fully
//! independently. [`DocumentRegistry`] is the one process-wide piece of
//! mutable state this core permits: the map from `docId` to its actor
//! handle.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use derive_more::Display;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tracing::{debug, error, info, warn};

use crate::error::{OtError, Result};
use crate::op::Operation;
use crate::store::DocumentStore;

/// Identifies one connected client session, used only to suppress
/// self-broadcast: an originator never receives its own push back as an
/// `Update`.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
#[display("session-{}", self.0)]
pub struct SessionId(u64);

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

impl SessionId {
    #[must_use]
    pub fn new() -> Self {
        Self(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

/// A push applied and broadcast to every other subscriber of the document.
#[derive(Debug, Clone)]
pub struct BroadcastUpdate {
    pub origin: SessionId,
    pub revision: u64,
    pub op: Operation,
}

/// The outcome of a pull.
#[derive(Debug, Clone, PartialEq)]
pub struct PullOutcome {
    pub start_revision: u64,
    pub ops: Vec<Operation>,
    pub current_revision: u64,
    pub current_doc_state: String,
    /// True iff the requested revision was out of range and the response is
    /// a full-history reset rather than an incremental catch-up.
    pub full_reset: bool,
}

/// A push staged but not yet committed: computed against an immutable
/// snapshot of [`DocumentState`] so a persistence failure never needs to
/// roll back in-memory mutation, it simply never happens — an ack is not
/// emitted until the post-push state is durably recorded.
#[derive(Debug, Clone)]
pub struct StagedPush {
    applied_op: Operation,
    new_content: String,
    new_revision: u64,
}

impl StagedPush {
    #[must_use]
    pub fn applied_op(&self) -> &Operation {
        &self.applied_op
    }

    #[must_use]
    pub fn new_revision(&self) -> u64 {
        self.new_revision
    }
}

/// The authoritative state of one document: `content`, `revision`, `history`.
#[derive(Debug, Clone)]
pub struct DocumentState {
    content: String,
    revision: u64,
    history: Vec<Operation>,
    /// Set once a `HistoryInconsistency` is detected; further pushes are
    /// rejected until the document is reloaded from storage.
    healthy: bool,
}

impl DocumentState {
    #[must_use]
    pub fn new(content: String, revision: u64, history: Vec<Operation>) -> Self {
        Self {
            content,
            revision,
            history,
            healthy: true,
        }
    }

    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    #[must_use]
    pub fn history(&self) -> &[Operation] {
        &self.history
    }

    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.healthy
    }

    /// Transform `client_op` against every concurrent history entry and
    /// apply it, computed against an immutable snapshot: does not mutate
    /// `self`. Call [`DocumentState::commit_push`] with the result once the
    /// staged state has been durably persisted.
    pub fn stage_push(&self, mut client_op: Operation, client_revision: u64) -> Result<StagedPush> {
        if !self.healthy {
            return Err(OtError::HistoryInconsistency {
                revision: self.revision,
                detail: "document is degraded, awaiting reload from storage".to_string(),
            });
        }
        if client_revision > self.revision {
            return Err(OtError::InvalidRevision {
                revision: client_revision,
                server_revision: self.revision,
            });
        }

        let concurrent_start = usize::try_from(client_revision).unwrap_or(usize::MAX);
        for h in &self.history[concurrent_start..] {
            if client_op.base_len() != h.base_len() {
                return Err(OtError::HistoryInconsistency {
                    revision: self.revision,
                    detail: format!(
                        "client op base_len {} did not match history entry base_len {}",
                        client_op.base_len(),
                        h.base_len()
                    ),
                });
            }
            let (transformed, _) = Operation::transform(&client_op, h)?;
            client_op = transformed;
        }

        let content_len = self.content.chars().count();
        if client_op.base_len() != content_len {
            return Err(OtError::LengthMismatch {
                expected: client_op.base_len(),
                actual: content_len,
            });
        }

        let new_content = client_op.apply(&self.content)?;
        let new_revision = self.revision + 1;
        Ok(StagedPush {
            applied_op: client_op,
            new_content,
            new_revision,
        })
    }

    /// Commit a successfully-persisted [`StagedPush`].
    pub fn commit_push(&mut self, staged: StagedPush) {
        self.content = staged.new_content;
        self.revision = staged.new_revision;
        self.history.push(staged.applied_op);
    }

    /// Mark the document degraded after an escalated error.
    pub fn mark_unhealthy(&mut self) {
        self.healthy = false;
    }

    #[must_use]
    pub fn apply_pull(&self, client_revision: u64) -> PullOutcome {
        if client_revision > self.revision {
            return PullOutcome {
                start_revision: 1,
                ops: self.history.clone(),
                current_revision: self.revision,
                current_doc_state: self.content.clone(),
                full_reset: true,
            };
        }
        let start = usize::try_from(client_revision).unwrap_or(usize::MAX);
        PullOutcome {
            start_revision: client_revision + 1,
            ops: self.history[start..].to_vec(),
            current_revision: self.revision,
            current_doc_state: self.content.clone(),
            full_reset: false,
        }
    }
}

enum DocumentCommand {
    Push {
        origin: SessionId,
        client_op: Operation,
        client_revision: u64,
        reply: oneshot::Sender<Result<u64>>,
    },
    Pull {
        client_revision: u64,
        reply: oneshot::Sender<PullOutcome>,
    },
}

struct DocumentActor {
    doc_id: String,
    state: DocumentState,
    store: Arc<dyn DocumentStore>,
    commands: mpsc::Receiver<DocumentCommand>,
    broadcast: broadcast::Sender<BroadcastUpdate>,
}

impl DocumentActor {
    async fn run(mut self) {
        while let Some(cmd) = self.commands.recv().await {
            match cmd {
                DocumentCommand::Push {
                    origin,
                    client_op,
                    client_revision,
                    reply,
                } => self.handle_push(origin, client_op, client_revision, reply).await,
                DocumentCommand::Pull { client_revision, reply } => {
                    let outcome = self.state.apply_pull(client_revision);
                    if outcome.full_reset {
                        warn!(doc_id = %self.doc_id, client_revision, "pull out of range, sending full history reset");
                    }
                    let _ = reply.send(outcome);
                }
            }
        }
        debug!(doc_id = %self.doc_id, "document actor shutting down: no more handles");
    }

    async fn handle_push(
        &mut self,
        origin: SessionId,
        client_op: Operation,
        client_revision: u64,
        reply: oneshot::Sender<Result<u64>>,
    ) {
        let staged = match self.state.stage_push(client_op, client_revision) {
            Ok(staged) => staged,
            Err(err) => {
                match &err {
                    OtError::HistoryInconsistency { .. } | OtError::LengthMismatch { .. } => {
                        error!(doc_id = %self.doc_id, error = %err, "escalated error applying push, marking document degraded");
                        self.state.mark_unhealthy();
                    }
                    OtError::InvalidRevision { .. } => {
                        debug!(doc_id = %self.doc_id, error = %err, "rejected push with invalid revision");
                    }
                    _ => {}
                }
                let _ = reply.send(Err(err));
                return;
            }
        };

        match self
            .store
            .save(
                &self.doc_id,
                &staged.new_content,
                staged.new_revision,
                std::slice::from_ref(staged.applied_op()),
            )
            .await
        {
            Ok(()) => {
                let revision = staged.new_revision();
                let op = staged.applied_op().clone();
                self.state.commit_push(staged);
                info!(doc_id = %self.doc_id, session = %origin, revision, "applied push");
                let _ = reply.send(Ok(revision));
                // A receive-less broadcast (no subscribers yet) is not an error.
                let _ = self.broadcast.send(BroadcastUpdate { origin, revision, op });
            }
            Err(store_err) => {
                error!(doc_id = %self.doc_id, error = %store_err, "persistence failed, push not acknowledged");
                let _ = reply.send(Err(OtError::TransportError(store_err.to_string())));
            }
        }
    }
}

/// A cheaply-clonable handle to a running [`DocumentActor`].
#[derive(Clone)]
pub struct DocumentHandle {
    doc_id: String,
    commands: mpsc::Sender<DocumentCommand>,
    broadcast: broadcast::Sender<BroadcastUpdate>,
}

impl DocumentHandle {
    /// Submit a push to the document actor. Returns the new revision on success.
    pub async fn push(&self, origin: SessionId, client_op: Operation, client_revision: u64) -> Result<u64> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(DocumentCommand::Push {
                origin,
                client_op,
                client_revision,
                reply: reply_tx,
            })
            .await
            .map_err(|_| OtError::TransportError(format!("document actor for {} is gone", self.doc_id)))?;
        reply_rx
            .await
            .map_err(|_| OtError::TransportError(format!("document actor for {} dropped the reply", self.doc_id)))?
    }

    /// Request history since `client_revision` from the document actor.
    pub async fn pull(&self, client_revision: u64) -> Result<PullOutcome> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(DocumentCommand::Pull {
                client_revision,
                reply: reply_tx,
            })
            .await
            .map_err(|_| OtError::TransportError(format!("document actor for {} is gone", self.doc_id)))?;
        reply_rx
            .await
            .map_err(|_| OtError::TransportError(format!("document actor for {} dropped the reply", self.doc_id)))
    }

    /// Subscribe to this document's broadcast stream. Callers are
    /// responsible for filtering out updates whose `origin` is their own
    /// [`SessionId`] (no self-broadcast).
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastUpdate> {
        self.broadcast.subscribe()
    }

    #[must_use]
    pub fn doc_id(&self) -> &str {
        &self.doc_id
    }
}

/// The map from `docId` to running [`DocumentHandle`] — the server's only
/// legitimate process-wide state. Documents are spawned lazily on first
/// access and run until every handle referencing their `docId` is dropped
/// and the command queue empties.
pub struct DocumentRegistry {
    store: Arc<dyn DocumentStore>,
    handles: Mutex<HashMap<String, DocumentHandle>>,
}

impl DocumentRegistry {
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Get or spawn the session for `doc_id`. An unknown id is created with
    /// empty content and revision 0.
    pub async fn get_or_create(&self, doc_id: &str) -> DocumentHandle {
        let mut handles = self.handles.lock().await;
        if let Some(handle) = handles.get(doc_id) {
            return handle.clone();
        }

        let stored = self.store.load(doc_id).await;
        let state = stored.map_or_else(
            || DocumentState::new(String::new(), 0, Vec::new()),
            |s| DocumentState::new(s.content, s.revision, s.history),
        );

        let (tx, rx) = mpsc::channel(64);
        let (broadcast_tx, _) = broadcast::channel(256);
        let actor = DocumentActor {
            doc_id: doc_id.to_string(),
            state,
            store: Arc::clone(&self.store),
            commands: rx,
            broadcast: broadcast_tx.clone(),
        };
        tokio::spawn(actor.run());

        let handle = DocumentHandle {
            doc_id: doc_id.to_string(),
            commands: tx,
            broadcast: broadcast_tx,
        };
        handles.insert(doc_id.to_string(), handle.clone());
        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::factories::*;
    use pretty_assertions::assert_eq;
    use tracing_test::{logs_contain, traced_test};

    fn doc(content: &str) -> DocumentState {
        DocumentState::new(content.to_string(), 0, Vec::new())
    }

    #[test]
    fn stage_and_commit_push_advances_revision() {
        let mut state = doc("abcdef");
        let staged = state.stage_push(insert_at(1, "X", 6), 0).unwrap();
        assert_eq!(staged.new_revision(), 1);
        state.commit_push(staged);
        assert_eq!(state.content(), "aXbcdef");
        assert_eq!(state.revision(), 1);
        assert_eq!(state.history().len(), 1);
    }

    #[test]
    fn push_with_future_revision_is_invalid() {
        let state = doc("abcdef");
        let err = state.stage_push(ret(6), 5).unwrap_err();
        assert!(matches!(err, OtError::InvalidRevision { .. }));
    }

    #[test]
    fn concurrent_pushes_transform_against_history_s1() {
        let mut state = doc("abcdef");
        let x = state.stage_push(insert_at(1, "X", 6), 0).unwrap();
        state.commit_push(x);

        // Y's push still claims revision 0, base_len 6, as if it never saw X's push.
        let y = state.stage_push(insert_at(4, "Y", 6), 0).unwrap();
        state.commit_push(y);

        assert_eq!(state.content(), "aXbcdYef");
        assert_eq!(state.revision(), 2);
    }

    #[test]
    fn overlapping_deletes_reduce_to_non_overlapping_removal_s2() {
        let mut state = doc("abcdef");
        let x = state.stage_push(delete_at(1, 3, 6), 0).unwrap(); // "abcdef" -> "aef"
        state.commit_push(x);

        let y = state.stage_push(delete_at(2, 3, 6), 0).unwrap(); // claims "cde" against original doc
        state.commit_push(y);

        assert_eq!(state.content(), "af");
        assert_eq!(state.revision(), 2);
    }

    #[test]
    fn insert_tie_break_priority_s5() {
        let mut state = doc("");
        let a = state.stage_push(ins("A"), 0).unwrap();
        state.commit_push(a);
        let b = state.stage_push(ins("B"), 0).unwrap();
        state.commit_push(b);
        assert_eq!(state.content(), "AB");
    }

    #[test]
    fn history_inconsistency_marks_document_degraded_s6() {
        let mut state = doc("abcdef");
        // A malformed push whose base_len cannot match the (empty) history
        // after the content check: craft one that matches content len but
        // mismatches a prior history entry's base_len once one exists.
        let first = state.stage_push(ret(6), 0).unwrap();
        state.commit_push(first);

        // This op's base_len (5) does not match the single history entry's
        // base_len (6), so the per-entry transform check must fail.
        let bogus = ret(5);
        let err = state.stage_push(bogus, 0).unwrap_err();
        assert!(matches!(err, OtError::HistoryInconsistency { .. }));
    }

    #[test]
    fn pull_within_range_returns_incremental_history() {
        let mut state = doc("abcdef");
        let a = state.stage_push(insert_at(1, "X", 6), 0).unwrap();
        state.commit_push(a);
        let b = state.stage_push(insert_at(4, "Y", 6), 0).unwrap();
        state.commit_push(b);

        let outcome = state.apply_pull(1);
        assert!(!outcome.full_reset);
        assert_eq!(outcome.start_revision, 2);
        assert_eq!(outcome.ops.len(), 1);
        assert_eq!(outcome.current_revision, 2);
        assert_eq!(outcome.current_doc_state, "aXbcdYef");
    }

    #[test]
    fn pull_out_of_range_triggers_full_reset() {
        let state = doc("abcdef");
        let outcome = state.apply_pull(9);
        assert!(outcome.full_reset);
        assert_eq!(outcome.start_revision, 1);
        assert_eq!(outcome.current_doc_state, "abcdef");
    }

    fn insert_at(pos: usize, s: &str, doc_len: usize) -> Operation {
        let mut op = Operation::new();
        op.retain(pos).insert(s).retain(doc_len - pos);
        op
    }

    fn delete_at(pos: usize, n: usize, doc_len: usize) -> Operation {
        let mut op = Operation::new();
        op.retain(pos).delete(n).retain(doc_len - pos - n);
        op
    }

    #[tokio::test]
    async fn registry_spawns_actor_and_applies_pushes() {
        use crate::store::InMemoryStore;
        let registry = DocumentRegistry::new(Arc::new(InMemoryStore::new()));
        let handle = registry.get_or_create("doc-1").await;
        let session = SessionId::new();

        let revision = handle.push(session, ins("hello"), 0).await.unwrap();
        assert_eq!(revision, 1);

        let same_handle = registry.get_or_create("doc-1").await;
        let pulled = same_handle.pull(0).await.unwrap();
        assert_eq!(pulled.ops.len(), 1);
        assert_eq!(pulled.current_doc_state, "hello");
    }

    #[traced_test]
    #[tokio::test]
    async fn actor_logs_and_degrades_on_history_inconsistency() {
        use crate::store::InMemoryStore;
        let registry = DocumentRegistry::new(Arc::new(InMemoryStore::new()));
        let handle = registry.get_or_create("doc-degraded").await;
        let session = SessionId::new();

        handle.push(session, ins("abcdef"), 0).await.unwrap();
        // This op's base_len (5) does not match the single history entry's
        // base_len (0, an insert into the empty document), so the
        // per-entry transform check must fail.
        let err = handle.push(session, ret(5), 0).await.unwrap_err();
        assert!(matches!(err, OtError::HistoryInconsistency { .. }));

        // Further pushes are rejected until the document is reloaded from storage.
        let err = handle.push(session, ret(6), 0).await.unwrap_err();
        assert!(matches!(err, OtError::HistoryInconsistency { .. }));
        assert!(logs_contain("marking document degraded"));
    }

    #[tokio::test]
    async fn broadcast_excludes_originator_by_convention() {
        use crate::store::InMemoryStore;
        let registry = DocumentRegistry::new(Arc::new(InMemoryStore::new()));
        let handle = registry.get_or_create("doc-1").await;
        let mut updates = handle.subscribe();

        let origin = SessionId::new();
        handle.push(origin, ins("hi"), 0).await.unwrap();

        let update = updates.recv().await.unwrap();
        assert_eq!(update.origin, origin);
        // The handle's own loop is responsible for discarding updates whose
        // origin matches its own session id; the broadcast itself fans out
        // to all subscribers indiscriminately.
    }
}
