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

use crate::math::round_up_to_4;
use crate::packet::AsSerializableTlv;
use crate::packet::ChunkParseError;
use crate::packet::SerializableTlv;
use crate::packet::TLV_HEADER_SIZE;
use crate::packet::control::CwrChunk;
use crate::packet::control::EcneChunk;
use crate::packet::control::HeartbeatAckChunk;
use crate::packet::control::HeartbeatChunk;
use crate::packet::data::DataChunk;
use crate::packet::data::SackChunk;
use crate::packet::ensure;
use crate::packet::handshake::CookieAckChunk;
use crate::packet::handshake::CookieEchoChunk;
use crate::packet::handshake::InitAckChunk;
use crate::packet::handshake::InitChunk;
use crate::packet::read_u16_be;
use crate::packet::teardown::AbortChunk;
use crate::packet::teardown::ErrorChunk;
use crate::packet::teardown::ShutdownAckChunk;
use crate::packet::teardown::ShutdownChunk;
use crate::packet::teardown::ShutdownCompleteChunk;
use crate::packet::write_u16_be;
use anyhow::Error;
use std::cmp;
use std::fmt;

pub(crate) const DATA: u8 = 0;
pub(crate) const INIT: u8 = 1;
pub(crate) const INIT_ACK: u8 = 2;
pub(crate) const SACK: u8 = 3;
pub(crate) const HEARTBEAT: u8 = 4;
pub(crate) const HEARTBEAT_ACK: u8 = 5;
pub(crate) const ABORT: u8 = 6;
pub(crate) const SHUTDOWN: u8 = 7;
pub(crate) const SHUTDOWN_ACK: u8 = 8;
pub(crate) const ERROR: u8 = 9;
pub(crate) const COOKIE_ECHO: u8 = 10;
pub(crate) const COOKIE_ACK: u8 = 11;
pub(crate) const ECNE: u8 = 12;
pub(crate) const CWR: u8 = 13;
pub(crate) const SHUTDOWN_COMPLETE: u8 = 14;

/// Intermediate representation of a chunk for which the type hasn't been fully discriminated, see
/// <https://datatracker.ietf.org/doc/html/rfc9260#section-3.2>.
///
/// ```txt
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |  Chunk Type   |  Chunk Flags  |         Chunk Length          |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// \                                                               \
/// /                          Chunk Value                          /
/// \                                                               \
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug)]
pub(crate) struct RawChunk<'a> {
    pub(crate) typ: u8,
    pub(crate) flags: u8,
    pub(crate) value: &'a [u8],
}

impl<'a> RawChunk<'a> {
    /// Reads a chunk from `bytes` and returns it together with the data following it.
    pub(crate) fn from_bytes(bytes: &'a [u8]) -> Result<(Self, &'a [u8]), ChunkParseError> {
        ensure!(bytes.len() >= TLV_HEADER_SIZE, ChunkParseError::InvalidLength);

        let length = read_u16_be!(&bytes[2..4]) as usize;
        ensure!(length >= TLV_HEADER_SIZE && length <= bytes.len(), ChunkParseError::InvalidLength);

        let next = cmp::min(round_up_to_4!(length), bytes.len());
        Ok((
            Self { typ: bytes[0], flags: bytes[1], value: &bytes[TLV_HEADER_SIZE..length] },
            &bytes[next..],
        ))
    }
}

/// Writes a chunk header and returns the value part, to be filled in by the caller.
#[inline]
pub(crate) fn write_chunk_header(typ: u8, flags: u8, value_size: usize, output: &mut [u8]) -> &mut [u8] {
    let serialized_size = TLV_HEADER_SIZE + value_size;
    assert!(output.len() >= serialized_size);
    output[0] = typ;
    output[1] = flags;
    write_u16_be!(&mut output[2..4], serialized_size as u16);
    &mut output[TLV_HEADER_SIZE..serialized_size]
}

/// A chunk whose type this endpoint doesn't implement. It's kept whole so that it can be reported
/// back to the sender.
#[derive(Clone, Debug, PartialEq)]
pub struct UnknownChunk {
    pub typ: u8,
    pub flags: u8,
    pub value: Vec<u8>,
}

impl UnknownChunk {
    /// Whether processing of the remaining chunks of the packet may continue, which the sender
    /// encodes in the highest bit of the chunk type.
    pub fn should_skip(&self) -> bool {
        self.typ & 0x80 != 0
    }

    /// Whether the sender wants to be told with an "Unrecognized Chunk Type" error cause.
    pub fn should_report(&self) -> bool {
        self.typ & 0x40 != 0
    }
}

impl SerializableTlv for UnknownChunk {
    fn serialize_to(&self, output: &mut [u8]) {
        let value = write_chunk_header(self.typ, self.flags, self.value_size(), output);
        value.copy_from_slice(&self.value)
    }

    fn value_size(&self) -> usize {
        self.value.len()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Chunk {
    Data(DataChunk),
    Init(InitChunk),
    InitAck(InitAckChunk),
    Sack(SackChunk),
    Heartbeat(HeartbeatChunk),
    HeartbeatAck(HeartbeatAckChunk),
    Abort(AbortChunk),
    Shutdown(ShutdownChunk),
    ShutdownAck(ShutdownAckChunk),
    Error(ErrorChunk),
    CookieEcho(CookieEchoChunk),
    CookieAck(CookieAckChunk),
    Ecne(EcneChunk),
    Cwr(CwrChunk),
    ShutdownComplete(ShutdownCompleteChunk),
    Unknown(UnknownChunk),
}

impl Chunk {
    pub fn typ(&self) -> u8 {
        match self {
            Chunk::Data(_) => DATA,
            Chunk::Init(_) => INIT,
            Chunk::InitAck(_) => INIT_ACK,
            Chunk::Sack(_) => SACK,
            Chunk::Heartbeat(_) => HEARTBEAT,
            Chunk::HeartbeatAck(_) => HEARTBEAT_ACK,
            Chunk::Abort(_) => ABORT,
            Chunk::Shutdown(_) => SHUTDOWN,
            Chunk::ShutdownAck(_) => SHUTDOWN_ACK,
            Chunk::Error(_) => ERROR,
            Chunk::CookieEcho(_) => COOKIE_ECHO,
            Chunk::CookieAck(_) => COOKIE_ACK,
            Chunk::Ecne(_) => ECNE,
            Chunk::Cwr(_) => CWR,
            Chunk::ShutdownComplete(_) => SHUTDOWN_COMPLETE,
            Chunk::Unknown(c) => c.typ,
        }
    }
}

impl TryFrom<RawChunk<'_>> for Chunk {
    type Error = Error;

    fn try_from(raw: RawChunk<'_>) -> Result<Self, Error> {
        Ok(match raw.typ {
            DATA => Chunk::Data(DataChunk::try_from(raw)?),
            INIT => Chunk::Init(InitChunk::try_from(raw)?),
            INIT_ACK => Chunk::InitAck(InitAckChunk::try_from(raw)?),
            SACK => Chunk::Sack(SackChunk::try_from(raw)?),
            HEARTBEAT => Chunk::Heartbeat(HeartbeatChunk::try_from(raw)?),
            HEARTBEAT_ACK => Chunk::HeartbeatAck(HeartbeatAckChunk::try_from(raw)?),
            ABORT => Chunk::Abort(AbortChunk::try_from(raw)?),
            SHUTDOWN => Chunk::Shutdown(ShutdownChunk::try_from(raw)?),
            SHUTDOWN_ACK => Chunk::ShutdownAck(ShutdownAckChunk::try_from(raw)?),
            ERROR => Chunk::Error(ErrorChunk::try_from(raw)?),
            COOKIE_ECHO => Chunk::CookieEcho(CookieEchoChunk::try_from(raw)?),
            COOKIE_ACK => Chunk::CookieAck(CookieAckChunk::try_from(raw)?),
            ECNE => Chunk::Ecne(EcneChunk::try_from(raw)?),
            CWR => Chunk::Cwr(CwrChunk::try_from(raw)?),
            SHUTDOWN_COMPLETE => Chunk::ShutdownComplete(ShutdownCompleteChunk::try_from(raw)?),
            typ => Chunk::Unknown(UnknownChunk { typ, flags: raw.flags, value: raw.value.to_vec() }),
        })
    }
}

impl AsSerializableTlv for Chunk {
    fn as_serializable(&self) -> &dyn SerializableTlv {
        match self {
            Chunk::Data(c) => c,
            Chunk::Init(c) => c,
            Chunk::InitAck(c) => c,
            Chunk::Sack(c) => c,
            Chunk::Heartbeat(c) => c,
            Chunk::HeartbeatAck(c) => c,
            Chunk::Abort(c) => c,
            Chunk::Shutdown(c) => c,
            Chunk::ShutdownAck(c) => c,
            Chunk::Error(c) => c,
            Chunk::CookieEcho(c) => c,
            Chunk::CookieAck(c) => c,
            Chunk::Ecne(c) => c,
            Chunk::Cwr(c) => c,
            Chunk::ShutdownComplete(c) => c,
            Chunk::Unknown(c) => c,
        }
    }
}

impl fmt::Display for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Chunk::Data(c) => write!(f, "DATA, tsn={}, stream={}", c.tsn, c.stream_id),
            Chunk::Init(c) => write!(f, "INIT, initiate_tag={:#010x}", c.initiate_tag),
            Chunk::InitAck(c) => write!(f, "INIT_ACK, initiate_tag={:#010x}", c.initiate_tag),
            Chunk::Sack(c) => write!(f, "SACK, cum_ack_tsn={}", c.cumulative_tsn_ack),
            Chunk::Heartbeat(_) => write!(f, "HEARTBEAT"),
            Chunk::HeartbeatAck(_) => write!(f, "HEARTBEAT_ACK"),
            Chunk::Abort(c) => write!(f, "ABORT, t={}", c.tag_reflected),
            Chunk::Shutdown(c) => write!(f, "SHUTDOWN, cum_ack_tsn={}", c.cumulative_tsn_ack),
            Chunk::ShutdownAck(_) => write!(f, "SHUTDOWN_ACK"),
            Chunk::Error(_) => write!(f, "ERROR"),
            Chunk::CookieEcho(_) => write!(f, "COOKIE_ECHO"),
            Chunk::CookieAck(_) => write!(f, "COOKIE_ACK"),
            Chunk::Ecne(c) => write!(f, "ECNE, lowest_tsn={}", c.lowest_tsn),
            Chunk::Cwr(c) => write!(f, "CWR, lowest_tsn={}", c.lowest_tsn),
            Chunk::ShutdownComplete(c) => write!(f, "SHUTDOWN_COMPLETE, t={}", c.tag_reflected),
            Chunk::Unknown(c) => write!(f, "Unknown chunk, type={}", c.typ),
        }
    }
}
