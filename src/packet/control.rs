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

//! Path supervision (HEARTBEAT, HEARTBEAT-ACK) and congestion notification (ECNE, CWR) chunks.

use crate::packet::ChunkParseError;
use crate::packet::SerializableTlv;
use crate::packet::chunk;
use crate::packet::chunk::RawChunk;
use crate::packet::chunk::write_chunk_header;
use crate::packet::parameter::Parameter;
use crate::packet::parameter::tlvs_from_bytes;
use crate::packet::parameter::tlvs_serialize_to;
use crate::packet::parameter::tlvs_serialized_size;
use crate::packet::read_u32_be;
use crate::packet::write_u32_be;
use crate::types::Tsn;
use anyhow::Error;
use anyhow::ensure;

/// HEARTBEAT and HEARTBEAT-ACK carry one Heartbeat Info parameter, which the acknowledgement
/// returns unchanged. See <https://datatracker.ietf.org/doc/html/rfc9260#section-3.3.5>.
macro_rules! heartbeat_chunk {
    ($(#[$meta:meta])* $name:ident, $typ:expr) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq)]
        pub struct $name {
            pub parameters: Vec<Parameter>,
        }

        impl $name {
            pub fn with_info(info: Vec<u8>) -> Self {
                Self { parameters: vec![Parameter::HeartbeatInfo(info)] }
            }

            pub fn info(&self) -> Option<&[u8]> {
                self.parameters.iter().find_map(|p| match p {
                    Parameter::HeartbeatInfo(info) => Some(info.as_slice()),
                    _ => None,
                })
            }
        }

        impl TryFrom<RawChunk<'_>> for $name {
            type Error = Error;

            fn try_from(raw: RawChunk<'_>) -> Result<Self, Error> {
                ensure!(raw.typ == $typ, ChunkParseError::InvalidType);
                Ok(Self { parameters: tlvs_from_bytes(raw.value)? })
            }
        }

        impl SerializableTlv for $name {
            fn serialize_to(&self, output: &mut [u8]) {
                let value = write_chunk_header($typ, 0, self.value_size(), output);
                tlvs_serialize_to(&self.parameters, value);
            }

            fn value_size(&self) -> usize {
                tlvs_serialized_size(&self.parameters)
            }
        }
    };
}

heartbeat_chunk!(
    /// Heartbeat Request (HEARTBEAT) chunk.
    HeartbeatChunk,
    chunk::HEARTBEAT
);

heartbeat_chunk!(
    /// Heartbeat Acknowledgement (HEARTBEAT ACK) chunk.
    HeartbeatAckChunk,
    chunk::HEARTBEAT_ACK
);

/// ECNE and CWR carry nothing but a TSN, see
/// <https://datatracker.ietf.org/doc/html/rfc9260#appendix-A>.
macro_rules! lowest_tsn_chunk {
    ($(#[$meta:meta])* $name:ident, $typ:expr) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq)]
        pub struct $name {
            pub lowest_tsn: Tsn,
        }

        impl TryFrom<RawChunk<'_>> for $name {
            type Error = Error;

            fn try_from(raw: RawChunk<'_>) -> Result<Self, Error> {
                ensure!(raw.typ == $typ, ChunkParseError::InvalidType);
                ensure!(raw.value.len() == 4, ChunkParseError::InvalidLength);
                Ok(Self { lowest_tsn: Tsn(read_u32_be!(raw.value)) })
            }
        }

        impl SerializableTlv for $name {
            fn serialize_to(&self, output: &mut [u8]) {
                let value = write_chunk_header($typ, 0, self.value_size(), output);
                write_u32_be!(value, self.lowest_tsn.0);
            }

            fn value_size(&self) -> usize {
                4
            }
        }
    };
}

lowest_tsn_chunk!(
    /// Explicit Congestion Notification Echo. Sent by a receiver of congestion-marked packets
    /// until the sender confirms with CWR.
    EcneChunk,
    chunk::ECNE
);

lowest_tsn_chunk!(
    /// Congestion Window Reduced.
    CwrChunk,
    chunk::CWR
);
