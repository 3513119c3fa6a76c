// SPDX-FileCopyrightText: 2025 Moritz Neeb <nt4u@kpvn.de>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error taxonomy for the operational-transform core.
//!
//! Every fallible boundary in this crate returns [`OtError`]. Call sites that
//! just need to propagate with extra context reach for `anyhow`, matching how
//! the rest of the crate is wired together.

use thiserror::Error;

/// The error taxonomy for the OT core.
///
/// Recovery policy lives with the caller: [`OtError::InvalidRevision`] and
/// [`OtError::DecodeError`] are expected to be recovered locally and
/// reported to the remote peer as a protocol `Error` message;
/// [`OtError::LengthMismatch`] and [`OtError::HistoryInconsistency`] must be
/// escalated to operator observability, since both indicate a bug or data
/// corruption rather than a client mistake.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OtError {
    /// `apply`/`invert`/`compose` precondition violated, or `transform` base
    /// lengths differ.
    #[error("length mismatch: expected base length {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    /// Client-supplied revision fell outside `[0, serverRevision]`.
    #[error("invalid revision {revision}: server is at {server_revision}")]
    InvalidRevision { revision: u64, server_revision: u64 },

    /// Server-side transform precondition failed while replaying history.
    /// Fatal for the current request; the document is marked degraded.
    #[error("history inconsistency at revision {revision}: {detail}")]
    HistoryInconsistency { revision: u64, detail: String },

    /// A wire-format operation or message could not be decoded.
    #[error("decode error: {0}")]
    DecodeError(String),

    /// A failure below the core (transport, persistence). The core never
    /// constructs this itself; hosts map their own failures into it.
    #[error("transport error: {0}")]
    TransportError(String),
}

pub type Result<T> = std::result::Result<T, OtError>;
