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

//! ABORT, ERROR and the SHUTDOWN family of chunks.

use crate::packet::ChunkParseError;
use crate::packet::SerializableTlv;
use crate::packet::chunk;
use crate::packet::chunk::RawChunk;
use crate::packet::chunk::write_chunk_header;
use crate::packet::error_causes::ErrorCause;
use crate::packet::parameter::tlvs_from_bytes;
use crate::packet::parameter::tlvs_serialize_to;
use crate::packet::parameter::tlvs_serialized_size;
use crate::packet::read_u32_be;
use crate::packet::write_u32_be;
use crate::types::Tsn;
use anyhow::Error;
use anyhow::ensure;

/// The T bit: set when the verification tag of the packet is the sender's own tag rather than the
/// receiver's, see <https://datatracker.ietf.org/doc/html/rfc9260#section-8.5.1>.
const FLAG_T: u8 = 0x01;

/// Abort Association (ABORT) chunk, see
/// <https://datatracker.ietf.org/doc/html/rfc9260#section-3.3.7>.
///
/// ```txt
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |   Type = 6    |  Reserved   |T|            Length             |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// \                                                               \
/// /                   zero or more Error Causes                   /
/// \                                                               \
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AbortChunk {
    pub tag_reflected: bool,
    pub error_causes: Vec<ErrorCause>,
}

impl TryFrom<RawChunk<'_>> for AbortChunk {
    type Error = Error;

    fn try_from(raw: RawChunk<'_>) -> Result<Self, Error> {
        ensure!(raw.typ == chunk::ABORT, ChunkParseError::InvalidType);
        Ok(Self {
            tag_reflected: raw.flags & FLAG_T != 0,
            error_causes: tlvs_from_bytes(raw.value)?,
        })
    }
}

impl SerializableTlv for AbortChunk {
    fn serialize_to(&self, output: &mut [u8]) {
        let flags = if self.tag_reflected { FLAG_T } else { 0 };
        let value = write_chunk_header(chunk::ABORT, flags, self.value_size(), output);
        tlvs_serialize_to(&self.error_causes, value);
    }

    fn value_size(&self) -> usize {
        tlvs_serialized_size(&self.error_causes)
    }
}

/// Operation Error (ERROR) chunk, see <https://datatracker.ietf.org/doc/html/rfc9260#section-3.3.10>.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ErrorChunk {
    pub error_causes: Vec<ErrorCause>,
}

impl TryFrom<RawChunk<'_>> for ErrorChunk {
    type Error = Error;

    fn try_from(raw: RawChunk<'_>) -> Result<Self, Error> {
        ensure!(raw.typ == chunk::ERROR, ChunkParseError::InvalidType);
        Ok(Self { error_causes: tlvs_from_bytes(raw.value)? })
    }
}

impl SerializableTlv for ErrorChunk {
    fn serialize_to(&self, output: &mut [u8]) {
        let value = write_chunk_header(chunk::ERROR, 0, self.value_size(), output);
        tlvs_serialize_to(&self.error_causes, value);
    }

    fn value_size(&self) -> usize {
        tlvs_serialized_size(&self.error_causes)
    }
}

/// Shutdown Association (SHUTDOWN) chunk, see
/// <https://datatracker.ietf.org/doc/html/rfc9260#section-3.3.8>.
#[derive(Clone, Debug, PartialEq)]
pub struct ShutdownChunk {
    pub cumulative_tsn_ack: Tsn,
}

impl TryFrom<RawChunk<'_>> for ShutdownChunk {
    type Error = Error;

    fn try_from(raw: RawChunk<'_>) -> Result<Self, Error> {
        ensure!(raw.typ == chunk::SHUTDOWN, ChunkParseError::InvalidType);
        ensure!(raw.value.len() == 4, ChunkParseError::InvalidLength);
        Ok(Self { cumulative_tsn_ack: Tsn(read_u32_be!(raw.value)) })
    }
}

impl SerializableTlv for ShutdownChunk {
    fn serialize_to(&self, output: &mut [u8]) {
        let value = write_chunk_header(chunk::SHUTDOWN, 0, self.value_size(), output);
        write_u32_be!(value, self.cumulative_tsn_ack.0);
    }

    fn value_size(&self) -> usize {
        4
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ShutdownAckChunk;

impl TryFrom<RawChunk<'_>> for ShutdownAckChunk {
    type Error = Error;

    fn try_from(raw: RawChunk<'_>) -> Result<Self, Error> {
        ensure!(raw.typ == chunk::SHUTDOWN_ACK, ChunkParseError::InvalidType);
        Ok(Self)
    }
}

impl SerializableTlv for ShutdownAckChunk {
    fn serialize_to(&self, output: &mut [u8]) {
        write_chunk_header(chunk::SHUTDOWN_ACK, 0, 0, output);
    }

    fn value_size(&self) -> usize {
        0
    }
}

/// Shutdown Complete (SHUTDOWN COMPLETE) chunk, which like ABORT may reflect the tag.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ShutdownCompleteChunk {
    pub tag_reflected: bool,
}

impl TryFrom<RawChunk<'_>> for ShutdownCompleteChunk {
    type Error = Error;

    fn try_from(raw: RawChunk<'_>) -> Result<Self, Error> {
        ensure!(raw.typ == chunk::SHUTDOWN_COMPLETE, ChunkParseError::InvalidType);
        Ok(Self { tag_reflected: raw.flags & FLAG_T != 0 })
    }
}

impl SerializableTlv for ShutdownCompleteChunk {
    fn serialize_to(&self, output: &mut [u8]) {
        let flags = if self.tag_reflected { FLAG_T } else { 0 };
        write_chunk_header(chunk::SHUTDOWN_COMPLETE, flags, 0, output);
    }

    fn value_size(&self) -> usize {
        0
    }
}
