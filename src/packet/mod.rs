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

//! Wire format of SCTP packets, chunks, parameters and error causes, as far as the association
//! state machine needs them.

use thiserror::Error;

pub(crate) mod chunk;
pub(crate) mod control;
pub(crate) mod crc32c;
pub(crate) mod data;
pub(crate) mod error_causes;
pub(crate) mod handshake;
pub(crate) mod parameter;
pub(crate) mod sctp_packet;
pub(crate) mod teardown;

/// Size of the Type-Length-Value header, used by chunks, parameters and error causes.
pub(crate) const TLV_HEADER_SIZE: usize = 4;

macro_rules! read_u16_be {
    ($buf: expr) => {
        u16::from_be_bytes([$buf[0], $buf[1]])
    };
}

macro_rules! read_u32_be {
    ($buf: expr) => {
        u32::from_be_bytes([$buf[0], $buf[1], $buf[2], $buf[3]])
    };
}

macro_rules! read_u64_be {
    ($buf: expr) => {
        u64::from_be_bytes([$buf[0], $buf[1], $buf[2], $buf[3], $buf[4], $buf[5], $buf[6], $buf[7]])
    };
}

macro_rules! write_u16_be {
    ($buf: expr, $n: expr) => {
        { $buf[..2].copy_from_slice(&($n as u16).to_be_bytes()); }
    };
}

macro_rules! write_u32_be {
    ($buf: expr, $n: expr) => {
        { $buf[..4].copy_from_slice(&($n as u32).to_be_bytes()); }
    };
}

macro_rules! write_u64_be {
    ($buf: expr, $n: expr) => {
        { $buf[..8].copy_from_slice(&($n as u64).to_be_bytes()); }
    };
}

/// Returns `Err($err)` early unless `$cond` holds. For functions returning typed errors; the
/// chunk decoders, which return `anyhow::Result`, use `anyhow::ensure!` instead.
macro_rules! ensure {
    ($cond: expr, $err: expr) => {
        if !$cond {
            return Err($err.into());
        }
    };
}

pub(crate) use ensure;
pub(crate) use read_u16_be;
pub(crate) use read_u32_be;
pub(crate) use read_u64_be;
pub(crate) use write_u16_be;
pub(crate) use write_u32_be;
pub(crate) use write_u64_be;

/// Trait for serialization/deserialization methods on TLV data types (chunks, parameters, error
/// causes) that have the same framing, but handle metadata (type, flags etc) differently.
pub(crate) trait SerializableTlv {
    /// Serializes this TLV object to a byte array. Callers are expected to call
    /// [`Self::serialized_size`] prior to calling this method, to ensure that `output` is large
    /// enough.
    fn serialize_to(&self, output: &mut [u8]);

    /// Returns how many bytes of value payload this TLV object has, which together with the TLV
    /// header size becomes the full serialized size.
    fn value_size(&self) -> usize;

    /// Returns the number of bytes this TLV object serializes to.
    fn serialized_size(&self) -> usize {
        TLV_HEADER_SIZE + self.value_size()
    }

    /// Serializes into a newly allocated buffer.
    fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0; self.serialized_size()];
        self.serialize_to(&mut out);
        out
    }
}

/// Trait for enums that carry objects that implement [`SerializableTlv`].
pub(crate) trait AsSerializableTlv {
    fn as_serializable(&self) -> &dyn SerializableTlv;
}

#[allow(clippy::enum_variant_names)]
#[derive(Debug, Error, PartialEq)]
#[non_exhaustive]
pub enum ChunkParseError {
    #[error("The TLV data has an invalid length field, or payload size")]
    InvalidLength,

    #[error("Unexpected TLV type")]
    InvalidType,

    #[error("Incorrect number of padding bytes")]
    InvalidPadding,

    #[error("Invalid value")]
    InvalidValue,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_big_endian() {
        let a = &[1, 2, 3, 4, 5, 6, 7, 8];
        assert_eq!(read_u16_be!(a), 0x0102);
        assert_eq!(read_u32_be!(&a[2..]), 0x03040506);
        assert_eq!(read_u64_be!(a), 0x0102030405060708);
    }

    #[test]
    fn write_big_endian() {
        let mut a: Vec<u8> = vec![0; 8];
        write_u16_be!(&mut a, 0xcafe);
        assert_eq!(a, &[0xca, 0xfe, 0, 0, 0, 0, 0, 0]);
        write_u32_be!(&mut a[4..], 0xdeadbeef_u32);
        assert_eq!(a, &[0xca, 0xfe, 0, 0, 0xde, 0xad, 0xbe, 0xef]);
        write_u64_be!(&mut a, 0x0102030405060708_u64);
        assert_eq!(a, &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    fn parse_even(n: u32) -> Result<u32, ChunkParseError> {
        ensure!(n % 2 == 0, ChunkParseError::InvalidValue);
        Ok(n / 2)
    }

    #[test]
    fn ensure_returns_early() {
        assert_eq!(parse_even(4), Ok(2));
        assert_eq!(parse_even(3), Err(ChunkParseError::InvalidValue));
    }
}
