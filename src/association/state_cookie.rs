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

use crate::api::SocketTime;
use crate::packet::SerializableTlv;
use crate::packet::chunk::RawChunk;
use crate::packet::handshake::InitChunk;
use crate::packet::read_u16_be;
use crate::packet::read_u32_be;
use crate::packet::read_u64_be;
use crate::packet::write_u16_be;
use crate::packet::write_u32_be;
use crate::packet::write_u64_be;
use crate::types::Tsn;
use hmac::Hmac;
use hmac::Mac;
use sha2::Sha256;
use std::time::Duration;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

const MAGIC: u32 = 0x64635343;
const FIXED_SIZE: usize = 44;
const MAC_SIZE: usize = 32;

/// Size of the key that cookies are signed with.
pub(crate) const COOKIE_KEY_SIZE: usize = 32;

#[derive(Debug, Error, PartialEq)]
pub enum CookieError {
    #[error("State cookie signature mismatch")]
    BadSignature,
    #[error("Malformed state cookie")]
    Malformed,
    #[error("State cookie expired {0:?} ago")]
    Stale(Duration),
    #[error("Out of memory while unpacking state cookie")]
    NoMem,
    #[error("Packet verification tag doesn't match the state cookie")]
    BadTag,
}

/// Everything needed to create an association from a COOKIE-ECHO, so that no state needs to be
/// kept between sending an INIT-ACK and receiving the cookie back. See
/// <https://datatracker.ietf.org/doc/html/rfc9260#section-5.1.3>.
///
/// ```txt
/// +--------+---------+----------+--------+----------+--------+----------+-------+---------+
/// | magic  | created | lifespan | 4 tags | init TSN | a_rwnd | streams  | peer  | HMAC-   |
/// | u32    | u64 µs  | u32 ms   | u32 x4 | u32      | u32    | u16 x2   | INIT  | SHA256  |
/// +--------+---------+----------+--------+----------+--------+----------+-------+---------+
/// ```
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct StateCookie {
    pub created: SocketTime,
    pub lifespan: Duration,
    pub my_vtag: u32,
    pub peer_vtag: u32,
    pub my_ttag: u32,
    pub peer_ttag: u32,
    pub my_initial_tsn: Tsn,
    pub my_rwnd: u32,
    pub inbound_streams: u16,
    pub outbound_streams: u16,
    pub peer_init: InitChunk,
}

impl StateCookie {
    pub fn expires_at(&self) -> SocketTime {
        self.created + self.lifespan
    }
}

fn new_mac(key: &[u8]) -> Result<HmacSha256, CookieError> {
    HmacSha256::new_from_slice(key).map_err(|_| CookieError::BadSignature)
}

/// Serializes and signs `cookie`.
pub(crate) fn make_cookie(cookie: &StateCookie, key: &[u8]) -> Result<Vec<u8>, CookieError> {
    let init_size = cookie.peer_init.serialized_size();
    let size = FIXED_SIZE + init_size + MAC_SIZE;
    let mut data = Vec::new();
    data.try_reserve_exact(size).map_err(|_| CookieError::NoMem)?;
    data.resize(FIXED_SIZE + init_size, 0);

    let created = Duration::from(cookie.created).as_micros().min(u64::MAX as u128);
    write_u32_be!(&mut data[0..4], MAGIC);
    write_u64_be!(&mut data[4..12], created);
    write_u32_be!(&mut data[12..16], cookie.lifespan.as_millis().min(u32::MAX as u128));
    write_u32_be!(&mut data[16..20], cookie.my_vtag);
    write_u32_be!(&mut data[20..24], cookie.peer_vtag);
    write_u32_be!(&mut data[24..28], cookie.my_ttag);
    write_u32_be!(&mut data[28..32], cookie.peer_ttag);
    write_u32_be!(&mut data[32..36], cookie.my_initial_tsn.0);
    write_u32_be!(&mut data[36..40], cookie.my_rwnd);
    write_u16_be!(&mut data[40..42], cookie.inbound_streams);
    write_u16_be!(&mut data[42..44], cookie.outbound_streams);
    cookie.peer_init.serialize_to(&mut data[FIXED_SIZE..]);

    let mut mac = new_mac(key)?;
    mac.update(&data);
    data.extend_from_slice(&mac.finalize().into_bytes());
    Ok(data)
}

/// The peer's verification tag in a cookie, which is only meaningful once [`unpack_cookie`] has
/// authenticated it, for example when reporting it as stale.
pub(crate) fn peer_vtag_of(raw: &[u8]) -> Option<u32> {
    raw.get(20..24).map(|b| read_u32_be!(b))
}

/// Validates a cookie received in a COOKIE-ECHO chunk, carried in a packet with verification tag
/// `packet_vtag`.
///
/// The signature is checked first, so that [`CookieError::Stale`] is only returned for cookies
/// that this endpoint once issued.
pub(crate) fn unpack_cookie(
    raw: &[u8],
    key: &[u8],
    packet_vtag: u32,
    now: SocketTime,
) -> Result<StateCookie, CookieError> {
    if raw.len() < FIXED_SIZE + MAC_SIZE {
        return Err(CookieError::Malformed);
    }
    let (data, signature) = raw.split_at(raw.len() - MAC_SIZE);
    let mut mac = new_mac(key)?;
    mac.update(data);
    mac.verify_slice(signature).map_err(|_| CookieError::BadSignature)?;

    if read_u32_be!(&data[0..4]) != MAGIC {
        return Err(CookieError::Malformed);
    }

    let my_vtag = read_u32_be!(&data[16..20]);
    if my_vtag != packet_vtag {
        return Err(CookieError::BadTag);
    }

    let created = SocketTime::from(Duration::from_micros(read_u64_be!(&data[4..12])));
    let lifespan = Duration::from_millis(read_u32_be!(&data[12..16]).into());
    let expires_at = created + lifespan;
    if now > expires_at {
        return Err(CookieError::Stale(now - expires_at));
    }

    let init_bytes = &data[FIXED_SIZE..];
    let mut copy = Vec::new();
    copy.try_reserve_exact(init_bytes.len()).map_err(|_| CookieError::NoMem)?;
    copy.extend_from_slice(init_bytes);
    let peer_init = RawChunk::from_bytes(&copy)
        .ok()
        .and_then(|(raw, _)| InitChunk::try_from(raw).ok())
        .ok_or(CookieError::Malformed)?;

    Ok(StateCookie {
        created,
        lifespan,
        my_vtag,
        peer_vtag: read_u32_be!(&data[20..24]),
        my_ttag: read_u32_be!(&data[24..28]),
        peer_ttag: read_u32_be!(&data[28..32]),
        my_initial_tsn: Tsn(read_u32_be!(&data[32..36])),
        my_rwnd: read_u32_be!(&data[36..40]),
        inbound_streams: read_u16_be!(&data[40..42]),
        outbound_streams: read_u16_be!(&data[42..44]),
        peer_init,
    })
}
