// SPDX-FileCopyrightText: 2025 Moritz Neeb <nt4u@kpvn.de>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Operational-transform core for real-time collaborative plain-text
//! editing: a canonical-form operation algebra (`op`), the server-side
//! document session (`session`), the client-side sync state machine
//! (`client`), and the JSON wire codec (`wire`) that ties them together.

pub mod client;
pub mod config;
pub mod error;
pub mod op;
pub mod session;
pub mod store;
pub mod wire;

#[cfg(feature = "executable-deps")]
pub mod cli;
pub mod logging;
