// SPDX-FileCopyrightText: 2025 Moritz Neeb <nt4u@kpvn.de>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! JSON-shaped wire codec: bidirectional mapping between [`Operation`] /
//! control messages and a value model suitable for any transport.
//!
//! A text operation's wire form is an ordered array of values, each either a
//! positive integer (`Retain`), a negative integer (`Delete`), or a string
//! (`Insert`). Decoding always goes back through the [`Operation`] builder,
//! so canonical form is re-imposed and malformed inputs are rejected rather
//! than silently accepted.

use serde::de::{self, SeqAccess, Visitor};
use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::error::OtError;
use crate::op::{Component, Operation};

impl Serialize for Operation {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut seq = serializer.serialize_seq(Some(self.components().len()))?;
        for component in self.components() {
            match component {
                Component::Retain(n) => seq.serialize_element(&WireValue::Int(
                    i64::try_from(*n).map_err(serde::ser::Error::custom)?,
                ))?,
                Component::Delete(n) => {
                    let negated = -i64::try_from(*n).map_err(serde::ser::Error::custom)?;
                    seq.serialize_element(&WireValue::Int(negated))?;
                }
                Component::Insert(s) => {
                    seq.serialize_element(&WireValue::Str(s.clone()))?;
                }
            }
        }
        seq.end()
    }
}

/// A single array element, tagged by shape rather than an explicit variant
/// name, matching the untagged wire form.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum WireValue {
    Int(i64),
    Str(String),
}

impl<'de> Deserialize<'de> for Operation {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct OperationVisitor;

        impl<'de> Visitor<'de> for OperationVisitor {
            type Value = Operation;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str(
                    "an array of positive integers (retain), negative integers (delete), or strings (insert)",
                )
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: SeqAccess<'de>,
            {
                let mut op = Operation::new();
                while let Some(value) = seq.next_element::<WireValue>()? {
                    match value {
                        WireValue::Int(n) if n > 0 => {
                            op.retain(usize::try_from(n).map_err(de::Error::custom)?);
                        }
                        WireValue::Int(n) if n < 0 => {
                            op.delete(usize::try_from(-n).map_err(de::Error::custom)?);
                        }
                        WireValue::Int(_) => {
                            // zero is dropped by the builder either way; accept it as a no-op retain.
                        }
                        WireValue::Str(s) => {
                            op.insert(&s);
                        }
                    }
                }
                Ok(op)
            }
        }

        deserializer.deserialize_seq(OperationVisitor)
    }
}

/// Decode an operation from its JSON wire form, surfacing malformed input as
/// [`OtError::DecodeError`] instead of a raw `serde_json` error.
pub fn decode_operation(json: &str) -> Result<Operation, OtError> {
    serde_json::from_str(json).map_err(|e| OtError::DecodeError(e.to_string()))
}

/// Encode an operation to its JSON wire form.
pub fn encode_operation(op: &Operation) -> String {
    serde_json::to_string(op).expect("operation serialization is infallible")
}

/// Client-to-server protocol messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Claim that `op` applies to `revision`.
    Push { revision: u64, op: Operation },
    /// Request history since `revision`.
    Pull { revision: u64 },
}

/// Server-to-client protocol messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    /// Sent once at session establishment.
    InitialState { doc: String, revision: u64 },
    /// Post-push acknowledgement carrying the new revision.
    Ack { revision: u64 },
    /// Broadcast on push from another client; never sent to the originator.
    Update { revision: u64, op: Operation },
    /// History since a requested revision, or a full reset if `start_revision == 1`
    /// and the requester's revision was out of range.
    History {
        start_revision: u64,
        ops: Vec<Operation>,
        current_revision: u64,
        current_doc_state: String,
    },
    /// Non-fatal protocol error; the client decides to pull or ignore.
    Error { message: String },
}
