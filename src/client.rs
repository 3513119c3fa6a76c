// SPDX-FileCopyrightText: 2025 Moritz Neeb <nt4u@kpvn.de>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The client-side synchronisation state machine.
//!
//! [`ClientSession`] owns exactly the state needed to reconcile local edits
//! against a remote authoritative document: `syncedDoc`, `virtualDoc`,
//! `serverRevision`, `outstandingOp`, `bufferedOp`, `state` and
//! `updateQueue`. It is deliberately synchronous and side-effect free beyond
//! its own fields — callers drive it from whatever event loop they have
//! (cooperative task, single-threaded event loop, or a mutex-guarded
//! multi-threaded one) and are responsible for actually sending the
//! [`ClientMessage`]s this module hands back.

use std::collections::VecDeque;

use crate::error::Result;
use crate::op::Operation;
use crate::wire::{ClientMessage, ServerMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Initializing,
    Synchronized,
    Dirty,
    AwaitingPush,
    AwaitingPull,
}

/// A server `Update` not yet reconciled because the client is `AwaitingPush`.
#[derive(Debug, Clone)]
struct RemoteUpdate {
    revision: u64,
    op: Operation,
}

/// Ask the transport to send a `Push`.
#[derive(Debug, Clone, PartialEq)]
pub struct PushRequest {
    pub revision: u64,
    pub op: Operation,
}

/// Ask the transport to send a `Pull`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PullRequest {
    pub revision: u64,
}

/// Per-connection client state. Created in [`ClientState::Initializing`] and
/// never shared across connections.
#[derive(Debug, Clone)]
pub struct ClientSession {
    synced_doc: String,
    virtual_doc: String,
    server_revision: u64,
    outstanding_op: Option<Operation>,
    buffered_op: Option<Operation>,
    state: ClientState,
    update_queue: VecDeque<RemoteUpdate>,
    /// Set when a push was rejected by the server; the next `History`
    /// response is then treated as an authoritative reset rather than an
    /// incremental replay, since the rejection already means the client's
    /// view of its own in-flight edit can no longer be trusted.
    forced_reset_pending: bool,
}

impl Default for ClientSession {
    fn default() -> Self {
        Self {
            synced_doc: String::new(),
            virtual_doc: String::new(),
            server_revision: 0,
            outstanding_op: None,
            buffered_op: None,
            state: ClientState::Initializing,
            update_queue: VecDeque::new(),
            forced_reset_pending: false,
        }
    }
}

impl ClientSession {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn state(&self) -> ClientState {
        self.state
    }

    #[must_use]
    pub fn virtual_doc(&self) -> &str {
        &self.virtual_doc
    }

    #[must_use]
    pub fn synced_doc(&self) -> &str {
        &self.synced_doc
    }

    #[must_use]
    pub fn server_revision(&self) -> u64 {
        self.server_revision
    }

    #[must_use]
    pub fn outstanding_op(&self) -> Option<&Operation> {
        self.outstanding_op.as_ref()
    }

    #[must_use]
    pub fn buffered_op(&self) -> Option<&Operation> {
        self.buffered_op.as_ref()
    }

    /// `Initializing -> Synchronized`.
    pub fn on_initial_state(&mut self, doc: String, revision: u64) {
        self.virtual_doc = doc.clone();
        self.synced_doc = doc;
        self.server_revision = revision;
        self.outstanding_op = None;
        self.buffered_op = None;
        self.update_queue.clear();
        self.forced_reset_pending = false;
        self.state = ClientState::Synchronized;
    }

    /// Integrate a local edit already expressed as an operation over
    /// `virtualDoc`.
    pub fn on_local_edit(&mut self, d: Operation) -> Result<()> {
        if d.is_noop() {
            return Ok(());
        }
        self.buffered_op = Some(match self.buffered_op.take() {
            Some(buffered) => buffered.compose(&d)?,
            None => d.clone(),
        });
        self.virtual_doc = d.apply(&self.virtual_doc)?;
        if self.state != ClientState::AwaitingPush {
            self.state = if self.virtual_doc == self.synced_doc && self.outstanding_op.is_none() {
                ClientState::Synchronized
            } else {
                ClientState::Dirty
            };
        }
        Ok(())
    }

    /// Convenience wrapper around [`ClientSession::on_local_edit`] that
    /// builds a retain-wrapped operation from an editor-style (position,
    /// delete count, inserted text) delta.
    pub fn local_edit(&mut self, position: usize, delete_count: usize, insert_text: &str) -> Result<()> {
        let len = self.virtual_doc.chars().count();
        let mut d = Operation::new();
        d.retain(position);
        if delete_count > 0 {
            d.delete(delete_count);
        }
        if !insert_text.is_empty() {
            d.insert(insert_text);
        }
        d.retain(len - position - delete_count);
        self.on_local_edit(d)
    }

    /// Auto-push tick. Returns the push to send, if the preconditions hold.
    pub fn auto_push_tick(&mut self) -> Option<PushRequest> {
        if self.state == ClientState::Initializing {
            return None;
        }
        if !matches!(self.state, ClientState::Synchronized | ClientState::Dirty) {
            return None;
        }
        match &self.buffered_op {
            Some(op) if !op.is_noop() => {}
            _ => return None,
        }
        let op = self.buffered_op.take().expect("checked above");
        self.outstanding_op = Some(op.clone());
        self.state = ClientState::AwaitingPush;
        Some(PushRequest {
            revision: self.server_revision,
            op,
        })
    }

    /// Entry point for a server `Update`.
    ///
    /// Processed immediately through the full transform algorithm —
    /// including its `outstandingOp`-aware branch — regardless of whether
    /// the client is currently `AwaitingPush`. An update's revision and
    /// reconciled ops take effect right away, and the state machine
    /// naturally lands back on `AwaitingPush` because `outstandingOp` is
    /// still present afterwards, not because the update was deferred in
    /// `updateQueue`. Since every method on this type runs to completion
    /// before returning (the single-threaded cooperative model this FSM
    /// assumes), "enqueue, then drain on the next Ack" and "process now" are
    /// observably identical for a lone update; this implementation takes the
    /// simpler of the two and keeps `updateQueue` as a data-model-complete
    /// but, under this scheme, always-empty queue that
    /// [`ClientSession::on_ack`] still drains defensively.
    pub fn on_remote_update(&mut self, revision: u64, op: Operation) -> Result<Option<PullRequest>> {
        self.handle_update(RemoteUpdate { revision, op })
    }

    fn handle_update(&mut self, update: RemoteUpdate) -> Result<Option<PullRequest>> {
        if update.revision != self.server_revision + 1 {
            return Ok(Some(self.transition_to_await_pull()));
        }

        // `syncedDoc` is "content at serverRevision", and the server computed
        // `update.op` against exactly that content, so it is the only
        // operation whose `baseLength` is guaranteed to match `syncedDoc` no
        // matter what `outstandingOp`/`bufferedOp` are doing. Transforming
        // against a non-length-preserving `outstandingOp` changes `s`'s
        // `baseLength` away from `syncedDoc`'s, so `syncedDoc` is updated
        // from the untransformed op, not from the post-transform `s` a
        // naive reading of the reconciliation order would use — that
        // ordering is dimensionally inconsistent whenever `outstandingOp`
        // inserts or deletes.
        let original = update.op.clone();
        let mut s = update.op;

        if let Some(outstanding) = self.outstanding_op.clone() {
            if outstanding.base_len() != s.base_len() {
                return Ok(Some(self.transition_to_await_pull()));
            }
            let (s_next, outstanding_next) = Operation::transform(&s, &outstanding)?;
            s = s_next;
            self.outstanding_op = Some(outstanding_next);
        }

        if let Some(buffered) = self.buffered_op.clone() {
            if buffered.base_len() != s.base_len() {
                return Ok(Some(self.transition_to_await_pull()));
            }
            let (s_next, buffered_next) = Operation::transform(&s, &buffered)?;
            s = s_next;
            self.buffered_op = Some(buffered_next);
        }

        self.synced_doc = original.apply(&self.synced_doc)?;
        self.virtual_doc = s.apply(&self.virtual_doc)?;
        self.server_revision = update.revision;
        self.reconcile_non_awaiting_state();
        Ok(None)
    }

    /// `AwaitingPush -> Synchronized/Dirty` on receiving an `Ack`, draining
    /// any updates queued while the push was outstanding.
    pub fn on_ack(&mut self, revision: u64) -> Result<Option<PullRequest>> {
        let Some(outstanding) = self.outstanding_op.take() else {
            return Ok(None);
        };
        self.synced_doc = outstanding.apply(&self.synced_doc)?;
        self.server_revision = revision;

        let queued = std::mem::take(&mut self.update_queue);
        for update in queued {
            if let Some(pull) = self.handle_update(update)? {
                // "If draining triggers a pull, discard the remaining queue":
                // true by construction, since `queued` was already moved out
                // of `self.update_queue` and the loop simply stops here.
                return Ok(Some(pull));
            }
        }
        self.reconcile_non_awaiting_state();
        Ok(None)
    }

    /// Reconcile a `History` response, falling back to an authoritative
    /// reset if the replay doesn't line up cleanly.
    pub fn on_history(
        &mut self,
        start_revision: u64,
        ops: Vec<Operation>,
        current_revision: u64,
        current_doc_state: String,
    ) -> Result<()> {
        let mut needs_reset = self.forced_reset_pending || start_revision != self.server_revision + 1;

        if !needs_reset {
            for (i, op) in ops.into_iter().enumerate() {
                let revision = start_revision + i as u64;
                match self.handle_update(RemoteUpdate { revision, op }) {
                    Ok(None) => {}
                    Ok(Some(_)) => {
                        needs_reset = true;
                        break;
                    }
                    Err(_) => {
                        needs_reset = true;
                        break;
                    }
                }
            }
        }

        if needs_reset {
            self.authoritative_reset(current_revision, current_doc_state);
        }
        self.forced_reset_pending = false;
        Ok(())
    }

    /// The server rejected an outstanding push. The client gives up on
    /// reconciling the in-flight edit and waits for an authoritative
    /// `History` response.
    pub fn on_push_rejected(&mut self) -> PullRequest {
        self.outstanding_op = None;
        self.forced_reset_pending = true;
        self.transition_to_await_pull()
    }

    /// Dispatch a decoded [`ServerMessage`], returning the [`ClientMessage`]
    /// to send back, if any. A thin convenience layer over the
    /// per-trigger methods above for callers that just want to plug a
    /// socket in.
    pub fn on_server_message(&mut self, msg: ServerMessage) -> Result<Option<ClientMessage>> {
        let pull = match msg {
            ServerMessage::InitialState { doc, revision } => {
                self.on_initial_state(doc, revision);
                None
            }
            ServerMessage::Ack { revision } => self.on_ack(revision)?,
            ServerMessage::Update { revision, op } => self.on_remote_update(revision, op)?,
            ServerMessage::History {
                start_revision,
                ops,
                current_revision,
                current_doc_state,
            } => {
                self.on_history(start_revision, ops, current_revision, current_doc_state)?;
                None
            }
            ServerMessage::Error { message: _ } => Some(self.on_push_rejected()),
        };
        Ok(pull.map(|p| ClientMessage::Pull { revision: p.revision }))
    }

    fn transition_to_await_pull(&mut self) -> PullRequest {
        self.state = ClientState::AwaitingPull;
        self.update_queue.clear();
        PullRequest {
            revision: self.server_revision,
        }
    }

    fn authoritative_reset(&mut self, current_revision: u64, current_doc_state: String) {
        self.virtual_doc = current_doc_state.clone();
        self.synced_doc = current_doc_state;
        self.outstanding_op = None;
        self.buffered_op = None;
        self.update_queue.clear();
        self.server_revision = current_revision;
        self.state = ClientState::Synchronized;
    }

    fn reconcile_non_awaiting_state(&mut self) {
        self.state = if self.outstanding_op.is_some() {
            ClientState::AwaitingPush
        } else if self.buffered_op.is_some() || self.virtual_doc != self.synced_doc {
            ClientState::Dirty
        } else {
            ClientState::Synchronized
        };
    }
}
