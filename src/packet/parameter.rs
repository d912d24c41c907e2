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
use crate::packet::ChunkParseError;
use crate::packet::SerializableTlv;
use crate::packet::TLV_HEADER_SIZE;
use crate::packet::read_u16_be;
use crate::packet::read_u32_be;
use crate::packet::write_u16_be;
use crate::packet::write_u32_be;
use anyhow::Error;
use anyhow::ensure;
use std::cmp;
use std::fmt;
use std::net::Ipv4Addr;
use std::net::Ipv6Addr;
use std::time::Duration;

pub(crate) const HEARTBEAT_INFO: u16 = 1;
pub(crate) const IPV4_ADDRESS: u16 = 5;
pub(crate) const IPV6_ADDRESS: u16 = 6;
pub(crate) const STATE_COOKIE: u16 = 7;
pub(crate) const UNRECOGNIZED_PARAMETER: u16 = 8;
pub(crate) const COOKIE_PRESERVATIVE: u16 = 9;
pub(crate) const ECN_CAPABLE: u16 = 0x8000;

/// Represents the raw optional/variable-length parameter format, as defined in
/// <https://datatracker.ietf.org/doc/html/rfc9260#section-3.2.1>. Error causes share the same
/// framing.
///
/// ```txt
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |        Parameter Type         |       Parameter Length        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// \                                                               \
/// /                        Parameter Value                        /
/// \                                                               \
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug)]
pub(crate) struct RawParameter<'a> {
    pub(crate) typ: u16,
    pub(crate) value: &'a [u8],
}

impl<'a> RawParameter<'a> {
    pub(crate) fn from_bytes(bytes: &'a [u8]) -> Result<(Self, &'a [u8]), Error> {
        ensure!(bytes.len() >= TLV_HEADER_SIZE, ChunkParseError::InvalidLength);
        let typ = read_u16_be!(&bytes[0..2]);
        let length = read_u16_be!(&bytes[2..4]) as usize;
        ensure!(length >= TLV_HEADER_SIZE && length <= bytes.len(), ChunkParseError::InvalidLength);
        let next = cmp::min(round_up_to_4!(length), bytes.len());
        Ok((Self { typ, value: &bytes[TLV_HEADER_SIZE..length] }, &bytes[next..]))
    }
}

/// Writes a parameter (or error cause) header and returns the value part, to be filled in by the
/// caller.
#[inline]
pub(crate) fn write_parameter_header(typ: u16, value_size: usize, output: &mut [u8]) -> &mut [u8] {
    let serialized_size = TLV_HEADER_SIZE + value_size;
    assert!(output.len() >= serialized_size);
    write_u16_be!(&mut output[0..2], typ);
    write_u16_be!(&mut output[2..4], serialized_size as u16);
    &mut output[TLV_HEADER_SIZE..serialized_size]
}

/// Parses a sequence of padded TLVs, such as the parameters of an INIT chunk or the error causes
/// of an ABORT chunk.
pub(crate) fn tlvs_from_bytes<T>(data: &[u8]) -> Result<Vec<T>, Error>
where
    T: for<'a> TryFrom<RawParameter<'a>, Error = Error>,
{
    let mut result = Vec::with_capacity(2);
    let mut remaining = data;
    while !remaining.is_empty() {
        let (raw, next) = RawParameter::from_bytes(remaining)?;
        result.push(T::try_from(raw)?);
        remaining = next;
    }
    Ok(result)
}

/// The serialized size of `tlvs`, where each but the last is padded to a multiple of four bytes.
pub(crate) fn tlvs_serialized_size<T: SerializableTlv>(tlvs: &[T]) -> usize {
    let padded: usize = tlvs.iter().map(|t| round_up_to_4!(t.serialized_size())).sum();
    match tlvs.last() {
        Some(last) => padded - round_up_to_4!(last.serialized_size()) + last.serialized_size(),
        None => 0,
    }
}

pub(crate) fn tlvs_serialize_to<T: SerializableTlv>(tlvs: &[T], out: &mut [u8]) {
    let mut offset = 0;
    for t in tlvs {
        let size = t.serialized_size();
        t.serialize_to(&mut out[offset..offset + size]);
        offset += round_up_to_4!(size);
    }
}

/// What to do with a parameter of a type that isn't understood, encoded in its two highest bits.
/// See <https://datatracker.ietf.org/doc/html/rfc9260#section-3.2.1>.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct UnrecognizedAction {
    pub skip: bool,
    pub report: bool,
}

impl UnrecognizedAction {
    pub fn for_type(typ: u16) -> Self {
        Self { skip: typ & 0x8000 != 0, report: typ & 0x4000 != 0 }
    }
}

/// Optional/variable-length parameters of INIT, INIT-ACK and HEARTBEAT chunks.
#[derive(Clone, Debug, PartialEq)]
pub enum Parameter {
    /// Opaque sender-specific information, echoed back by HEARTBEAT-ACK.
    HeartbeatInfo(Vec<u8>),
    Ipv4Address(Ipv4Addr),
    Ipv6Address(Ipv6Addr),
    /// Opaque to everyone but the endpoint that generated it.
    StateCookie(Vec<u8>),
    /// A complete parameter TLV that the sender of this parameter didn't understand.
    UnrecognizedParameter(Vec<u8>),
    /// Suggested increment of the cookie lifespan, see
    /// <https://datatracker.ietf.org/doc/html/rfc9260#section-3.3.2.1.2>.
    CookiePreservative(Duration),
    /// <https://datatracker.ietf.org/doc/html/rfc9260#appendix-A>
    EcnCapable,
    Unknown { typ: u16, value: Vec<u8> },
}

impl Parameter {
    pub fn typ(&self) -> u16 {
        match self {
            Parameter::HeartbeatInfo(_) => HEARTBEAT_INFO,
            Parameter::Ipv4Address(_) => IPV4_ADDRESS,
            Parameter::Ipv6Address(_) => IPV6_ADDRESS,
            Parameter::StateCookie(_) => STATE_COOKIE,
            Parameter::UnrecognizedParameter(_) => UNRECOGNIZED_PARAMETER,
            Parameter::CookiePreservative(_) => COOKIE_PRESERVATIVE,
            Parameter::EcnCapable => ECN_CAPABLE,
            Parameter::Unknown { typ, .. } => *typ,
        }
    }
}

impl TryFrom<RawParameter<'_>> for Parameter {
    type Error = Error;

    fn try_from(raw: RawParameter<'_>) -> Result<Self, Error> {
        let v = raw.value;
        Ok(match raw.typ {
            HEARTBEAT_INFO => Parameter::HeartbeatInfo(v.to_vec()),
            IPV4_ADDRESS => {
                let octets: [u8; 4] = v.try_into().map_err(|_| ChunkParseError::InvalidLength)?;
                Parameter::Ipv4Address(Ipv4Addr::from(octets))
            }
            IPV6_ADDRESS => {
                let octets: [u8; 16] = v.try_into().map_err(|_| ChunkParseError::InvalidLength)?;
                Parameter::Ipv6Address(Ipv6Addr::from(octets))
            }
            STATE_COOKIE => Parameter::StateCookie(v.to_vec()),
            UNRECOGNIZED_PARAMETER => Parameter::UnrecognizedParameter(v.to_vec()),
            COOKIE_PRESERVATIVE => {
                ensure!(v.len() == 4, ChunkParseError::InvalidLength);
                Parameter::CookiePreservative(Duration::from_millis(read_u32_be!(v).into()))
            }
            ECN_CAPABLE => Parameter::EcnCapable,
            typ => Parameter::Unknown { typ, value: v.to_vec() },
        })
    }
}

impl SerializableTlv for Parameter {
    fn serialize_to(&self, output: &mut [u8]) {
        let value = write_parameter_header(self.typ(), self.value_size(), output);
        match self {
            Parameter::HeartbeatInfo(b)
            | Parameter::StateCookie(b)
            | Parameter::UnrecognizedParameter(b)
            | Parameter::Unknown { value: b, .. } => value.copy_from_slice(b),
            Parameter::Ipv4Address(a) => value.copy_from_slice(&a.octets()),
            Parameter::Ipv6Address(a) => value.copy_from_slice(&a.octets()),
            Parameter::CookiePreservative(d) => {
                write_u32_be!(value, d.as_millis().min(u32::MAX as u128));
            }
            Parameter::EcnCapable => {}
        }
    }

    fn value_size(&self) -> usize {
        match self {
            Parameter::HeartbeatInfo(b)
            | Parameter::StateCookie(b)
            | Parameter::UnrecognizedParameter(b)
            | Parameter::Unknown { value: b, .. } => b.len(),
            Parameter::Ipv4Address(_) => 4,
            Parameter::Ipv6Address(_) => 16,
            Parameter::CookiePreservative(_) => 4,
            Parameter::EcnCapable => 0,
        }
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Parameter::HeartbeatInfo(b) => write!(f, "Heartbeat Info, {} bytes", b.len()),
            Parameter::Ipv4Address(a) => write!(f, "IPv4 Address {a}"),
            Parameter::Ipv6Address(a) => write!(f, "IPv6 Address {a}"),
            Parameter::StateCookie(b) => write!(f, "State Cookie, {} bytes", b.len()),
            Parameter::UnrecognizedParameter(_) => write!(f, "Unrecognized Parameter"),
            Parameter::CookiePreservative(d) => write!(f, "Cookie Preservative {d:?}"),
            Parameter::EcnCapable => write!(f, "ECN Capable"),
            Parameter::Unknown { typ, .. } => write!(f, "Unknown parameter, type={typ}"),
        }
    }
}
