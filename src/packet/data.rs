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

use crate::api::PpId;
use crate::api::StreamId;
use crate::packet::ChunkParseError;
use crate::packet::SerializableTlv;
use crate::packet::chunk;
use crate::packet::chunk::RawChunk;
use crate::packet::chunk::write_chunk_header;
use crate::packet::read_u16_be;
use crate::packet::read_u32_be;
use crate::packet::write_u16_be;
use crate::packet::write_u32_be;
use crate::types::Ssn;
use crate::types::Tsn;
use anyhow::Error;
use anyhow::ensure;

const FLAG_ENDING: u8 = 0x01;
const FLAG_BEGINNING: u8 = 0x02;
const FLAG_UNORDERED: u8 = 0x04;

pub(crate) const DATA_HEADER_SIZE: usize = 16;

/// Payload Data (DATA) chunk, see <https://datatracker.ietf.org/doc/html/rfc9260#section-3.3.1>.
///
/// ```txt
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |   Type = 0    |  Res  |I|U|B|E|            Length             |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                              TSN                              |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |      Stream Identifier S      |   Stream Sequence Number n    |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                  Payload Protocol Identifier                  |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// \                                                               \
/// /                 User Data (seq n of Stream S)                 /
/// \                                                               \
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// A chunk without user data parses fine; rejecting it is up to the receiver, which must abort the
/// association.
#[derive(Clone, Debug, PartialEq)]
pub struct DataChunk {
    pub tsn: Tsn,
    pub stream_id: StreamId,
    pub ssn: Ssn,
    pub ppid: PpId,
    pub unordered: bool,
    pub beginning: bool,
    pub ending: bool,
    pub payload: Vec<u8>,
}

impl TryFrom<RawChunk<'_>> for DataChunk {
    type Error = Error;

    fn try_from(raw: RawChunk<'_>) -> Result<Self, Error> {
        ensure!(raw.typ == chunk::DATA, ChunkParseError::InvalidType);
        let v = raw.value;
        ensure!(v.len() >= 12, ChunkParseError::InvalidLength);

        Ok(Self {
            tsn: Tsn(read_u32_be!(&v[0..4])),
            stream_id: StreamId(read_u16_be!(&v[4..6])),
            ssn: Ssn(read_u16_be!(&v[6..8])),
            ppid: PpId(read_u32_be!(&v[8..12])),
            unordered: raw.flags & FLAG_UNORDERED != 0,
            beginning: raw.flags & FLAG_BEGINNING != 0,
            ending: raw.flags & FLAG_ENDING != 0,
            payload: v[12..].to_vec(),
        })
    }
}

impl SerializableTlv for DataChunk {
    fn serialize_to(&self, output: &mut [u8]) {
        let mut flags = 0;
        if self.unordered {
            flags |= FLAG_UNORDERED;
        }
        if self.beginning {
            flags |= FLAG_BEGINNING;
        }
        if self.ending {
            flags |= FLAG_ENDING;
        }
        let v = write_chunk_header(chunk::DATA, flags, self.value_size(), output);
        write_u32_be!(&mut v[0..4], self.tsn.0);
        write_u16_be!(&mut v[4..6], self.stream_id.0);
        write_u16_be!(&mut v[6..8], self.ssn.0);
        write_u32_be!(&mut v[8..12], self.ppid.0);
        v[12..].copy_from_slice(&self.payload);
    }

    fn value_size(&self) -> usize {
        12 + self.payload.len()
    }
}

/// A range of received TSNs following a gap, as offsets from the cumulative TSN ack.
#[derive(Clone, Debug, PartialEq)]
pub struct GapAckBlock {
    pub start: u16,
    pub end: u16,
}

impl GapAckBlock {
    pub fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }
}

/// Selective Acknowledgement (SACK) chunk, see
/// <https://datatracker.ietf.org/doc/html/rfc9260#section-3.3.4>.
#[derive(Clone, Debug, PartialEq)]
pub struct SackChunk {
    pub cumulative_tsn_ack: Tsn,
    pub a_rwnd: u32,
    pub gap_ack_blocks: Vec<GapAckBlock>,
    pub duplicate_tsns: Vec<Tsn>,
}

impl TryFrom<RawChunk<'_>> for SackChunk {
    type Error = Error;

    fn try_from(raw: RawChunk<'_>) -> Result<Self, Error> {
        ensure!(raw.typ == chunk::SACK, ChunkParseError::InvalidType);
        let v = raw.value;
        ensure!(v.len() >= 12, ChunkParseError::InvalidLength);

        let nbr_gap_blocks = read_u16_be!(&v[8..10]) as usize;
        let nbr_dup_tsns = read_u16_be!(&v[10..12]) as usize;
        let gaps_end = 12 + nbr_gap_blocks * 4;
        ensure!(v.len() == gaps_end + nbr_dup_tsns * 4, ChunkParseError::InvalidLength);

        Ok(Self {
            cumulative_tsn_ack: Tsn(read_u32_be!(&v[0..4])),
            a_rwnd: read_u32_be!(&v[4..8]),
            gap_ack_blocks: v[12..gaps_end]
                .chunks_exact(4)
                .map(|b| GapAckBlock::new(read_u16_be!(&b[0..2]), read_u16_be!(&b[2..4])))
                .collect(),
            duplicate_tsns: v[gaps_end..].chunks_exact(4).map(|b| Tsn(read_u32_be!(b))).collect(),
        })
    }
}

impl SerializableTlv for SackChunk {
    fn serialize_to(&self, output: &mut [u8]) {
        let v = write_chunk_header(chunk::SACK, 0, self.value_size(), output);
        write_u32_be!(&mut v[0..4], self.cumulative_tsn_ack.0);
        write_u32_be!(&mut v[4..8], self.a_rwnd);
        write_u16_be!(&mut v[8..10], self.gap_ack_blocks.len());
        write_u16_be!(&mut v[10..12], self.duplicate_tsns.len());

        let (gaps, dups) = v[12..].split_at_mut(self.gap_ack_blocks.len() * 4);
        for (block, out) in self.gap_ack_blocks.iter().zip(gaps.chunks_exact_mut(4)) {
            write_u16_be!(&mut out[0..2], block.start);
            write_u16_be!(&mut out[2..4], block.end);
        }
        for (tsn, out) in self.duplicate_tsns.iter().zip(dups.chunks_exact_mut(4)) {
            write_u32_be!(out, tsn.0);
        }
    }

    fn value_size(&self) -> usize {
        12 + (self.gap_ack_blocks.len() + self.duplicate_tsns.len()) * 4
    }
}
