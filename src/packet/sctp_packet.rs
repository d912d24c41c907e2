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

use crate::api::Options;
use crate::math::is_divisible_by_4;
use crate::math::round_down_to_4;
use crate::math::round_up_to_4;
use crate::packet::AsSerializableTlv;
use crate::packet::ChunkParseError;
use crate::packet::TLV_HEADER_SIZE;
use crate::packet::chunk::Chunk;
use crate::packet::chunk::RawChunk;
use crate::packet::crc32c::packet_checksum;
use crate::packet::ensure;
use crate::packet::read_u16_be;
use crate::packet::read_u32_be;
use crate::packet::write_u16_be;
use crate::packet::write_u32_be;
use thiserror::Error;

pub const COMMON_HEADER_SIZE: usize = 12;

/// Upper bound of what is accepted as input, to avoid malicious usage.
const MAX_PACKET_SIZE: usize = 65535;

/// SCTP common header
///
/// See <https://datatracker.ietf.org/doc/html/rfc9260#section-3.1>.
///
/// ```txt
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |      Source Port Number       |    Destination Port Number    |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                       Verification Tag                        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           Checksum                            |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug)]
pub(crate) struct CommonHeader {
    pub source_port: u16,
    pub destination_port: u16,
    pub verification_tag: u32,
    /// As it reads on the wire. The CRC-32C value is stored in little endian byte order.
    pub checksum: u32,
}

pub(crate) struct SctpPacket {
    pub common_header: CommonHeader,
    pub chunks: Vec<Chunk>,
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub(crate) enum PacketParseError {
    #[error("Invalid packet size")]
    InvalidPacketSize,
    #[error("Invalid packet checksum")]
    InvalidChecksum,
    #[error("Failed to parse chunk: {0}")]
    FailedParseChunk(#[from] anyhow::Error),
}

impl From<ChunkParseError> for PacketParseError {
    fn from(e: ChunkParseError) -> Self {
        Self::FailedParseChunk(e.into())
    }
}

impl SctpPacket {
    pub fn from_bytes(data: &[u8], options: &Options) -> Result<SctpPacket, PacketParseError> {
        ensure!(
            data.len() >= COMMON_HEADER_SIZE + TLV_HEADER_SIZE && data.len() <= MAX_PACKET_SIZE,
            PacketParseError::InvalidPacketSize
        );

        let common_header = CommonHeader {
            source_port: read_u16_be!(&data[0..2]),
            destination_port: read_u16_be!(&data[2..4]),
            verification_tag: read_u32_be!(&data[4..8]),
            checksum: read_u32_be!(&data[8..12]),
        };

        if !options.disable_checksum_verification {
            let received = u32::from_le_bytes([data[8], data[9], data[10], data[11]]);
            ensure!(received == packet_checksum(data), PacketParseError::InvalidChecksum);
        }

        let mut chunks = Vec::with_capacity(4);
        let mut remaining = &data[COMMON_HEADER_SIZE..];
        while !remaining.is_empty() {
            let (raw, next) = RawChunk::from_bytes(remaining)?;
            chunks.push(Chunk::try_from(raw)?);
            remaining = next;
        }

        Ok(SctpPacket { common_header, chunks })
    }
}

/// Serializes chunks into a packet that stays within a maximum size.
pub(crate) struct SctpPacketBuilder {
    verification_tag: u32,
    source_port: u16,
    dest_port: u16,
    max_packet_size: usize,
    data: Vec<u8>,
}

impl SctpPacketBuilder {
    pub(crate) fn new(
        verification_tag: u32,
        source_port: u16,
        dest_port: u16,
        max_packet_size: usize,
    ) -> Self {
        Self {
            verification_tag,
            source_port,
            dest_port,
            max_packet_size: round_down_to_4!(max_packet_size),
            data: vec![],
        }
    }

    pub(crate) fn add(&mut self, chunk: &Chunk) -> &mut Self {
        if self.data.is_empty() {
            self.data.reserve(self.max_packet_size);
            self.data.resize(COMMON_HEADER_SIZE, 0);
            write_u16_be!(&mut self.data[0..2], self.source_port);
            write_u16_be!(&mut self.data[2..4], self.dest_port);
            write_u32_be!(&mut self.data[4..8], self.verification_tag);
        }
        debug_assert!(is_divisible_by_4!(self.data.len()));

        let offset = self.data.len();
        let size = chunk.as_serializable().serialized_size();
        self.data.resize(round_up_to_4!(offset + size), 0);
        chunk.as_serializable().serialize_to(&mut self.data[offset..offset + size]);
        self
    }

    pub fn bytes_remaining(&self) -> usize {
        let used = if self.data.is_empty() { COMMON_HEADER_SIZE } else { self.data.len() };
        self.max_packet_size.saturating_sub(used)
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the finished packet, with checksum, and resets the builder for the next packet.
    pub fn build(&mut self) -> Vec<u8> {
        let mut out = std::mem::take(&mut self.data);
        if !out.is_empty() {
            let checksum = packet_checksum(&out);
            out[8..12].copy_from_slice(&checksum.to_le_bytes());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::PpId;
    use crate::api::StreamId;
    use crate::packet::data::DATA_HEADER_SIZE;
    use crate::packet::data::DataChunk;
    use crate::packet::data::GapAckBlock;
    use crate::packet::data::SackChunk;
    use crate::packet::error_causes::ErrorCause;
    use crate::packet::handshake::InitChunk;
    use crate::packet::teardown::AbortChunk;
    use crate::types::Ssn;
    use crate::types::Tsn;

    const VERIFICATION_TAG: u32 = 0x12345678;

    fn data_chunk(tsn: u32, payload: Vec<u8>) -> Chunk {
        Chunk::Data(DataChunk {
            tsn: Tsn(tsn),
            stream_id: StreamId(1),
            ssn: Ssn(0),
            ppid: PpId(53),
            unordered: false,
            beginning: true,
            ending: true,
            payload,
        })
    }

    #[test]
    fn deserialize_simple_packet_from_capture() {
        // Stream Control Transmission Protocol
        //   Source port: 5000
        //   Destination port: 5000
        //   Verification tag: 0x00000000
        //   Checksum: 0xaa019d33 [unverified]
        //   INIT chunk (Outbound streams: 1000, inbound streams: 1000)
        //     Initiate tag: 0x0eddca08
        //     Initial TSN: 1426601527
        //     ECN, Forward TSN supported, Supported Extensions, Random,
        //     Requested HMAC Algorithm and Authenticated Chunk list parameters
        let bytes: &[u8] = &[
            0x13, 0x88, 0x13, 0x88, 0x00, 0x00, 0x00, 0x00, 0xaa, 0x01, 0x9d, 0x33, 0x01, 0x00,
            0x00, 0x5a, 0x0e, 0xdd, 0xca, 0x08, 0x00, 0x02, 0x00, 0x00, 0x03, 0xe8, 0x03, 0xe8,
            0x55, 0x08, 0x36, 0x37, 0x80, 0x00, 0x00, 0x04, 0xc0, 0x00, 0x00, 0x04, 0x80, 0x08,
            0x00, 0x09, 0xc0, 0x0f, 0xc1, 0x80, 0x82, 0x00, 0x00, 0x00, 0x80, 0x02, 0x00, 0x24,
            0xc5, 0xa8, 0x61, 0x55, 0x09, 0x0e, 0x6f, 0x42, 0x00, 0x50, 0x63, 0x4c, 0xc8, 0xd6,
            0xb9, 0x08, 0xdf, 0xd5, 0x3e, 0x17, 0xc9, 0x9c, 0xb1, 0x43, 0x28, 0x4e, 0xaf, 0x64,
            0x68, 0x2a, 0xc2, 0x97, 0x80, 0x04, 0x00, 0x06, 0x00, 0x01, 0x00, 0x00, 0x80, 0x03,
            0x00, 0x06, 0x80, 0xc1, 0x00, 0x00,
        ];

        let packet = SctpPacket::from_bytes(bytes, &Options::default()).unwrap();
        assert_eq!(packet.common_header.source_port, 5000);
        assert_eq!(packet.common_header.destination_port, 5000);
        assert_eq!(packet.common_header.verification_tag, 0);
        assert_eq!(packet.common_header.checksum, 0xaa019d33);

        assert_eq!(packet.chunks.len(), 1);
        let Chunk::Init(init) = &packet.chunks[0] else { panic!("expected INIT") };
        assert_eq!(init.initiate_tag, 0x0eddca08);
        assert_eq!(init.initial_tsn, Tsn(1426601527));
        assert!(init.ecn_capable());
    }

    #[test]
    fn deserialize_packet_with_two_chunks() {
        // Src Port: 1234, Dst Port: 4321, Verification tag: 0x697e3a4e,
        // Checksum: 0xc06e8b36, COOKIE_ACK chunk followed by a SACK chunk with
        // Cumulative TSN: 2930332242, a_rwnd: 131072.
        let bytes: &[u8] = &[
            0x04, 0xd2, 0x10, 0xe1, 0x69, 0x7e, 0x3a, 0x4e, 0xc0, 0x6e, 0x8b, 0x36, 0x0b, 0x00,
            0x00, 0x04, 0x03, 0x00, 0x00, 0x10, 0xae, 0xa9, 0x52, 0x52, 0x00, 0x02, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
        ];

        let packet = SctpPacket::from_bytes(bytes, &Options::default()).unwrap();
        assert_eq!(packet.common_header.source_port, 1234);
        assert_eq!(packet.common_header.destination_port, 4321);
        assert_eq!(packet.common_header.verification_tag, 0x697e3a4e);

        assert_eq!(packet.chunks.len(), 2);
        assert!(matches!(packet.chunks[0], Chunk::CookieAck(_)));
        let Chunk::Sack(sack) = &packet.chunks[1] else { panic!("expected SACK") };
        assert_eq!(sack.cumulative_tsn_ack, Tsn(2930332242));
    }

    // SACK with a checksum that doesn't match its content.
    const WRONG_CHECKSUM: &[u8] = &[
        0x13, 0x88, 0x13, 0x88, 0x0e, 0xdd, 0xca, 0x08, 0x2a, 0x81, 0xf5, 0x31, 0x03, 0x00, 0x00,
        0x10, 0x55, 0x08, 0x36, 0x40, 0x00, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    ];

    #[test]
    fn rejects_packet_with_wrong_checksum() {
        assert!(matches!(
            SctpPacket::from_bytes(WRONG_CHECKSUM, &Options::default()),
            Err(PacketParseError::InvalidChecksum)
        ));
    }

    #[test]
    fn accepts_wrong_checksum_when_verification_is_disabled() {
        let options = Options { disable_checksum_verification: true, ..Default::default() };
        let packet = SctpPacket::from_bytes(WRONG_CHECKSUM, &options).unwrap();
        assert_eq!(packet.common_header.verification_tag, 0x0eddca08);
        assert_eq!(packet.common_header.checksum, 0x2a81f531);
    }

    #[test]
    fn detect_packet_with_zero_size_chunk() {
        let bytes: &[u8] = &[
            0xff, 0xff, 0xff, 0xff, 0xff, 0x0a, 0x0a, 0x0a, 0x5c, 0x0a, 0x0a, 0x0a, 0x0a, 0x0a,
            0x00, 0x00, 0x00,
        ];
        let options = Options { disable_checksum_verification: true, ..Default::default() };
        assert!(SctpPacket::from_bytes(bytes, &options).is_err());
    }

    #[test]
    fn rejects_packet_without_chunks() {
        let bytes = &[0x13, 0x88, 0x13, 0x88, 0, 0, 0, 1, 0, 0, 0, 0];
        let options = Options { disable_checksum_verification: true, ..Default::default() };
        assert!(matches!(
            SctpPacket::from_bytes(bytes, &options),
            Err(PacketParseError::InvalidPacketSize)
        ));
    }

    #[test]
    fn write_packet_with_calculated_checksum() {
        let mut b = SctpPacketBuilder::new(VERIFICATION_TAG, 5000, 5000, 1191);
        b.add(&Chunk::Sack(SackChunk {
            cumulative_tsn_ack: Tsn(999),
            a_rwnd: 456,
            gap_ack_blocks: vec![],
            duplicate_tsns: vec![],
        }));

        let bytes: &[u8] = &[
            0x13, 0x88, 0x13, 0x88, 0x12, 0x34, 0x56, 0x78, //
            0x07, 0xe8, 0x38, 0x77, // checksum
            0x03, 0x00, 0x00, 0x10, 0x00, 0x00, 0x03, 0xe7, 0x00, 0x00, 0x01, 0xc8, 0x00, 0x00,
            0x00, 0x00,
        ];
        assert_eq!(b.build(), bytes);
        assert!(b.is_empty());
    }

    #[test]
    fn built_packet_parses_back() {
        let mut b = SctpPacketBuilder::new(VERIFICATION_TAG, 1234, 4321, 1191);
        b.add(&Chunk::Sack(SackChunk {
            cumulative_tsn_ack: Tsn(999),
            a_rwnd: 456,
            gap_ack_blocks: vec![GapAckBlock::new(2, 3)],
            duplicate_tsns: vec![Tsn(1), Tsn(2), Tsn(3)],
        }))
        .add(&data_chunk(123, vec![1, 2, 3, 4, 5]))
        .add(&Chunk::Abort(AbortChunk {
            tag_reflected: false,
            error_causes: vec![ErrorCause::UserInitiatedAbort(String::new())],
        }))
        .add(&Chunk::Init(InitChunk {
            initiate_tag: 123,
            a_rwnd: 456,
            nbr_outbound_streams: 65535,
            nbr_inbound_streams: 65534,
            initial_tsn: Tsn(789),
            parameters: vec![],
        }));
        let packet = SctpPacket::from_bytes(&b.build(), &Options::default()).unwrap();

        assert_eq!(packet.common_header.source_port, 1234);
        assert_eq!(packet.common_header.destination_port, 4321);
        assert_eq!(packet.common_header.verification_tag, VERIFICATION_TAG);
        let types: Vec<u8> = packet.chunks.iter().map(Chunk::typ).collect();
        assert_eq!(types, vec![3, 0, 6, 1]);
        let Chunk::Data(data) = &packet.chunks[1] else { panic!("expected DATA") };
        assert_eq!(data.payload, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn returns_correct_space_available_to_stay_within_mtu() {
        // Chunks are padded to an even 4 bytes, so the maximum packet size is rounded down.
        const MTU: usize = 1191;
        const MAX_PACKET_SIZE: usize = round_down_to_4!(MTU);

        let mut builder = SctpPacketBuilder::new(VERIFICATION_TAG, 5000, 5000, MTU);
        assert_eq!(builder.bytes_remaining(), MAX_PACKET_SIZE - COMMON_HEADER_SIZE);

        builder.add(&data_chunk(1, vec![0; 183]));
        let chunk1_size = round_up_to_4!(DATA_HEADER_SIZE + 183);
        assert_eq!(builder.bytes_remaining(), MAX_PACKET_SIZE - COMMON_HEADER_SIZE - chunk1_size);
        assert_eq!(builder.bytes_remaining(), 976);

        builder.add(&data_chunk(2, vec![0; 957]));
        assert_eq!(builder.bytes_remaining(), 0);
    }
}
