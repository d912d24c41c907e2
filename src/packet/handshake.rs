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

//! Chunks of the four-way handshake: INIT, INIT-ACK, COOKIE-ECHO and COOKIE-ACK.

use crate::packet::ChunkParseError;
use crate::packet::SerializableTlv;
use crate::packet::chunk;
use crate::packet::chunk::RawChunk;
use crate::packet::chunk::write_chunk_header;
use crate::packet::parameter::Parameter;
use crate::packet::parameter::tlvs_from_bytes;
use crate::packet::parameter::tlvs_serialize_to;
use crate::packet::parameter::tlvs_serialized_size;
use crate::packet::read_u16_be;
use crate::packet::read_u32_be;
use crate::packet::write_u16_be;
use crate::packet::write_u32_be;
use crate::types::Tsn;
use anyhow::Error;
use anyhow::ensure;
use std::net::IpAddr;
use std::time::Duration;

const FIXED_FIELDS_SIZE: usize = 16;

/// INIT and INIT-ACK share their layout, see
/// <https://datatracker.ietf.org/doc/html/rfc9260#section-3.3.2> and
/// <https://datatracker.ietf.org/doc/html/rfc9260#section-3.3.3>.
///
/// ```txt
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |   Type = 1/2  |  Chunk Flags  |      Chunk Length             |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                         Initiate Tag                          |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |          Advertised Receiver Window Credit (a_rwnd)           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |  Number of Outbound Streams   |   Number of Inbound Streams   |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                          Initial TSN                          |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// \                                                               \
/// /              Optional/Variable-Length Parameters              /
/// \                                                               \
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
macro_rules! init_like_chunk {
    ($(#[$meta:meta])* $name:ident, $typ:expr) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq)]
        pub struct $name {
            pub initiate_tag: u32,
            pub a_rwnd: u32,
            pub nbr_outbound_streams: u16,
            pub nbr_inbound_streams: u16,
            pub initial_tsn: Tsn,
            pub parameters: Vec<Parameter>,
        }

        impl $name {
            pub fn state_cookie(&self) -> Option<&[u8]> {
                self.parameters.iter().find_map(|p| match p {
                    Parameter::StateCookie(cookie) => Some(cookie.as_slice()),
                    _ => None,
                })
            }

            /// Additional addresses that the sender can be reached at, besides the source address
            /// of the packet.
            pub fn addresses(&self) -> impl Iterator<Item = IpAddr> + '_ {
                self.parameters.iter().filter_map(|p| match p {
                    Parameter::Ipv4Address(a) => Some(IpAddr::V4(*a)),
                    Parameter::Ipv6Address(a) => Some(IpAddr::V6(*a)),
                    _ => None,
                })
            }

            pub fn ecn_capable(&self) -> bool {
                self.parameters.iter().any(|p| matches!(p, Parameter::EcnCapable))
            }

            pub fn cookie_preservative(&self) -> Option<Duration> {
                self.parameters.iter().find_map(|p| match p {
                    Parameter::CookiePreservative(d) => Some(*d),
                    _ => None,
                })
            }
        }

        impl TryFrom<RawChunk<'_>> for $name {
            type Error = Error;

            fn try_from(raw: RawChunk<'_>) -> Result<Self, Error> {
                ensure!(raw.typ == $typ, ChunkParseError::InvalidType);
                let v = raw.value;
                ensure!(v.len() >= FIXED_FIELDS_SIZE, ChunkParseError::InvalidLength);

                Ok(Self {
                    initiate_tag: read_u32_be!(&v[0..4]),
                    a_rwnd: read_u32_be!(&v[4..8]),
                    nbr_outbound_streams: read_u16_be!(&v[8..10]),
                    nbr_inbound_streams: read_u16_be!(&v[10..12]),
                    initial_tsn: Tsn(read_u32_be!(&v[12..16])),
                    parameters: tlvs_from_bytes(&v[FIXED_FIELDS_SIZE..])?,
                })
            }
        }

        impl SerializableTlv for $name {
            fn serialize_to(&self, output: &mut [u8]) {
                let v = write_chunk_header($typ, 0, self.value_size(), output);
                write_u32_be!(&mut v[0..4], self.initiate_tag);
                write_u32_be!(&mut v[4..8], self.a_rwnd);
                write_u16_be!(&mut v[8..10], self.nbr_outbound_streams);
                write_u16_be!(&mut v[10..12], self.nbr_inbound_streams);
                write_u32_be!(&mut v[12..16], self.initial_tsn.0);
                tlvs_serialize_to(&self.parameters, &mut v[FIXED_FIELDS_SIZE..]);
            }

            fn value_size(&self) -> usize {
                FIXED_FIELDS_SIZE + tlvs_serialized_size(&self.parameters)
            }
        }
    };
}

init_like_chunk!(
    /// Initiation (INIT) chunk.
    InitChunk,
    chunk::INIT
);

init_like_chunk!(
    /// Initiation Acknowledgement (INIT ACK) chunk. Must carry a State Cookie parameter.
    InitAckChunk,
    chunk::INIT_ACK
);

/// Cookie Echo (COOKIE ECHO) chunk, see
/// <https://datatracker.ietf.org/doc/html/rfc9260#section-3.3.11>. The value is the state cookie,
/// exactly as received in the INIT-ACK.
#[derive(Clone, Debug, PartialEq)]
pub struct CookieEchoChunk {
    pub cookie: Vec<u8>,
}

impl TryFrom<RawChunk<'_>> for CookieEchoChunk {
    type Error = Error;

    fn try_from(raw: RawChunk<'_>) -> Result<Self, Error> {
        ensure!(raw.typ == chunk::COOKIE_ECHO, ChunkParseError::InvalidType);
        Ok(Self { cookie: raw.value.to_vec() })
    }
}

impl SerializableTlv for CookieEchoChunk {
    fn serialize_to(&self, output: &mut [u8]) {
        write_chunk_header(chunk::COOKIE_ECHO, 0, self.value_size(), output)
            .copy_from_slice(&self.cookie);
    }

    fn value_size(&self) -> usize {
        self.cookie.len()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CookieAckChunk;

impl TryFrom<RawChunk<'_>> for CookieAckChunk {
    type Error = Error;

    fn try_from(raw: RawChunk<'_>) -> Result<Self, Error> {
        ensure!(raw.typ == chunk::COOKIE_ACK, ChunkParseError::InvalidType);
        Ok(Self)
    }
}

impl SerializableTlv for CookieAckChunk {
    fn serialize_to(&self, output: &mut [u8]) {
        write_chunk_header(chunk::COOKIE_ACK, 0, 0, output);
    }

    fn value_size(&self) -> usize {
        0
    }
}
