// Copyright 2025 The dcSCTP Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Error causes carried in ABORT and ERROR chunks, see
//! <https://datatracker.ietf.org/doc/html/rfc9260#section-3.3.10>.

use crate::api::StreamId;
use crate::packet::ChunkParseError;
use crate::packet::SerializableTlv;
use crate::packet::parameter::RawParameter;
use crate::packet::parameter::write_parameter_header;
use crate::packet::read_u16_be;
use crate::packet::read_u32_be;
use crate::packet::write_u16_be;
use crate::packet::write_u32_be;
use crate::types::Tsn;
use anyhow::Error;
use anyhow::ensure;
use std::fmt;
use std::time::Duration;

const INVALID_STREAM_IDENTIFIER: u16 = 1;
const MISSING_MANDATORY_PARAMETER: u16 = 2;
const STALE_COOKIE: u16 = 3;
const UNRECOGNIZED_CHUNK: u16 = 6;
const INVALID_MANDATORY_PARAMETER: u16 = 7;
const NO_USER_DATA: u16 = 9;
const COOKIE_RECEIVED_WHILE_SHUTTING_DOWN: u16 = 10;
const USER_INITIATED_ABORT: u16 = 12;
const PROTOCOL_VIOLATION: u16 = 13;

#[derive(Clone, Debug, PartialEq)]
pub enum ErrorCause {
    /// DATA was sent to a stream that doesn't exist.
    InvalidStreamIdentifier(StreamId),

    /// Parameter types that a chunk lacked.
    MissingMandatoryParameter(Vec<u16>),

    /// How late the rejected COOKIE-ECHO was, with microsecond resolution.
    StaleCookie(Duration),

    /// A complete chunk (header and value) that the sender of this cause didn't understand.
    UnrecognizedChunk(Vec<u8>),

    InvalidMandatoryParameter,

    /// A DATA chunk with this TSN had no user data.
    NoUserData(Tsn),

    CookieReceivedWhileShuttingDown,

    UserInitiatedAbort(String),

    ProtocolViolation(String),

    Unknown { code: u16, value: Vec<u8> },
}

impl ErrorCause {
    pub fn code(&self) -> u16 {
        match self {
            ErrorCause::InvalidStreamIdentifier(_) => INVALID_STREAM_IDENTIFIER,
            ErrorCause::MissingMandatoryParameter(_) => MISSING_MANDATORY_PARAMETER,
            ErrorCause::StaleCookie(_) => STALE_COOKIE,
            ErrorCause::UnrecognizedChunk(_) => UNRECOGNIZED_CHUNK,
            ErrorCause::InvalidMandatoryParameter => INVALID_MANDATORY_PARAMETER,
            ErrorCause::NoUserData(_) => NO_USER_DATA,
            ErrorCause::CookieReceivedWhileShuttingDown => COOKIE_RECEIVED_WHILE_SHUTTING_DOWN,
            ErrorCause::UserInitiatedAbort(_) => USER_INITIATED_ABORT,
            ErrorCause::ProtocolViolation(_) => PROTOCOL_VIOLATION,
            ErrorCause::Unknown { code, .. } => *code,
        }
    }
}

/// Joins the causes into a human readable reason, as reported to the application.
pub(crate) fn describe(causes: &[ErrorCause]) -> String {
    causes.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

impl TryFrom<RawParameter<'_>> for ErrorCause {
    type Error = Error;

    fn try_from(raw: RawParameter<'_>) -> Result<Self, Error> {
        let v = raw.value;
        Ok(match raw.typ {
            INVALID_STREAM_IDENTIFIER => {
                ensure!(v.len() == 4, ChunkParseError::InvalidLength);
                ErrorCause::InvalidStreamIdentifier(StreamId(read_u16_be!(v)))
            }
            MISSING_MANDATORY_PARAMETER => {
                ensure!(v.len() >= 4, ChunkParseError::InvalidLength);
                let count = read_u32_be!(v) as usize;
                ensure!(v.len() == 4 + count * 2, ChunkParseError::InvalidLength);
                ErrorCause::MissingMandatoryParameter(
                    v[4..].chunks_exact(2).map(|c| read_u16_be!(c)).collect(),
                )
            }
            STALE_COOKIE => {
                ensure!(v.len() == 4, ChunkParseError::InvalidLength);
                ErrorCause::StaleCookie(Duration::from_micros(read_u32_be!(v).into()))
            }
            UNRECOGNIZED_CHUNK => ErrorCause::UnrecognizedChunk(v.to_vec()),
            INVALID_MANDATORY_PARAMETER => ErrorCause::InvalidMandatoryParameter,
            NO_USER_DATA => {
                ensure!(v.len() == 4, ChunkParseError::InvalidLength);
                ErrorCause::NoUserData(Tsn(read_u32_be!(v)))
            }
            COOKIE_RECEIVED_WHILE_SHUTTING_DOWN => ErrorCause::CookieReceivedWhileShuttingDown,
            USER_INITIATED_ABORT => {
                ErrorCause::UserInitiatedAbort(String::from_utf8_lossy(v).into_owned())
            }
            PROTOCOL_VIOLATION => {
                ErrorCause::ProtocolViolation(String::from_utf8_lossy(v).into_owned())
            }
            code => ErrorCause::Unknown { code, value: v.to_vec() },
        })
    }
}

impl SerializableTlv for ErrorCause {
    fn serialize_to(&self, output: &mut [u8]) {
        let value = write_parameter_header(self.code(), self.value_size(), output);
        match self {
            // The stream identifier is followed by two reserved bytes.
            ErrorCause::InvalidStreamIdentifier(stream_id) => {
                write_u16_be!(value, stream_id.0);
                value[2..4].fill(0);
            }
            ErrorCause::MissingMandatoryParameter(types) => {
                write_u32_be!(value, types.len());
                for (t, out) in types.iter().zip(value[4..].chunks_exact_mut(2)) {
                    write_u16_be!(out, *t);
                }
            }
            ErrorCause::StaleCookie(staleness) => {
                write_u32_be!(value, staleness.as_micros().min(u32::MAX as u128));
            }
            ErrorCause::NoUserData(tsn) => write_u32_be!(value, tsn.0),
            ErrorCause::UnrecognizedChunk(b) | ErrorCause::Unknown { value: b, .. } => {
                value.copy_from_slice(b)
            }
            ErrorCause::UserInitiatedAbort(s) | ErrorCause::ProtocolViolation(s) => {
                value.copy_from_slice(s.as_bytes())
            }
            ErrorCause::InvalidMandatoryParameter | ErrorCause::CookieReceivedWhileShuttingDown => {}
        }
    }

    fn value_size(&self) -> usize {
        match self {
            ErrorCause::MissingMandatoryParameter(types) => 4 + types.len() * 2,
            ErrorCause::InvalidStreamIdentifier(_)
            | ErrorCause::StaleCookie(_)
            | ErrorCause::NoUserData(_) => 4,
            ErrorCause::UnrecognizedChunk(b) | ErrorCause::Unknown { value: b, .. } => b.len(),
            ErrorCause::UserInitiatedAbort(s) | ErrorCause::ProtocolViolation(s) => s.len(),
            ErrorCause::InvalidMandatoryParameter | ErrorCause::CookieReceivedWhileShuttingDown => 0,
        }
    }
}

impl fmt::Display for ErrorCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCause::InvalidStreamIdentifier(stream_id) => {
                write!(f, "Invalid Stream Identifier, stream_id={}", stream_id.0)
            }
            ErrorCause::MissingMandatoryParameter(types) => {
                write!(f, "Missing Mandatory Parameter, types={types:?}")
            }
            ErrorCause::StaleCookie(staleness) => write!(f, "Stale Cookie Error, {staleness:?}"),
            ErrorCause::UnrecognizedChunk(chunk) => match chunk.first() {
                Some(typ) => write!(f, "Unrecognized Chunk Type, type={typ}"),
                None => write!(f, "Unrecognized Chunk Type"),
            },
            ErrorCause::InvalidMandatoryParameter => write!(f, "Invalid Mandatory Parameter"),
            ErrorCause::NoUserData(tsn) => write!(f, "No User Data, tsn={tsn}"),
            ErrorCause::CookieReceivedWhileShuttingDown => {
                write!(f, "Cookie Received While Shutting Down")
            }
            ErrorCause::UserInitiatedAbort(reason) => write!(f, "User-Initiated Abort, {reason}"),
            ErrorCause::ProtocolViolation(info) => write!(f, "Protocol Violation, {info}"),
            ErrorCause::Unknown { code, .. } => write!(f, "Unknown error cause, code={code}"),
        }
    }
}
