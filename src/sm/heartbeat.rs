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

//! Path supervision with HEARTBEAT and HEARTBEAT-ACK, see
//! <https://datatracker.ietf.org/doc/html/rfc9260#section-8.3>.

use crate::api::AssociationState;
use crate::api::ErrorKind;
use crate::api::Options;
use crate::api::PathState;
use crate::api::SocketTime;
use crate::association::Association;
use crate::packet::chunk::Chunk;
use crate::packet::control::HeartbeatAckChunk;
use crate::packet::control::HeartbeatChunk;
use crate::packet::read_u16_be;
use crate::packet::read_u64_be;
use crate::packet::write_u16_be;
use crate::packet::write_u64_be;
use crate::sm::Command;
use crate::sm::Decision;
use crate::sm::StateContext;
use crate::sm::TimerId;
use crate::sm::abort;
use crate::sm::command::Destination;
use crate::sm::command::Notification;
use crate::sm::command::OutPacket;
#[cfg(not(test))]
use log::debug;
use std::net::IpAddr;
use std::net::Ipv4Addr;
use std::net::Ipv6Addr;
use std::net::SocketAddr;
#[cfg(test)]
use std::println as debug;
use std::time::Duration;

const INFO_SIZE: usize = 36;

/// The sender-specific information in a HEARTBEAT, which only this endpoint interprets.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct HeartbeatInfo {
    pub address: SocketAddr,
    pub sent: SocketTime,
    pub nonce: u64,
}

impl HeartbeatInfo {
    //   0      1     17    19    20       28      36
    //  +------+-----+-----+-----+--------+-------+
    //  |family| ip  |port | pad | sent µs| nonce |
    //  +------+-----+-----+-----+--------+-------+
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = vec![0; INFO_SIZE];
        match self.address.ip() {
            IpAddr::V4(ip) => {
                data[0] = 4;
                data[1..5].copy_from_slice(&ip.octets());
            }
            IpAddr::V6(ip) => {
                data[0] = 6;
                data[1..17].copy_from_slice(&ip.octets());
            }
        }
        write_u16_be!(&mut data[17..19], self.address.port());
        let sent = Duration::from(self.sent).as_micros().min(u64::MAX as u128);
        write_u64_be!(&mut data[20..28], sent);
        write_u64_be!(&mut data[28..36], self.nonce);
        data
    }

    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() != INFO_SIZE {
            return None;
        }
        let ip = match data[0] {
            4 => IpAddr::V4(Ipv4Addr::new(data[1], data[2], data[3], data[4])),
            6 => IpAddr::V6(Ipv6Addr::from(<[u8; 16]>::try_from(&data[1..17]).ok()?)),
            _ => return None,
        };
        Some(Self {
            address: SocketAddr::new(ip, read_u16_be!(&data[17..19])),
            sent: SocketTime::from(Duration::from_micros(read_u64_be!(&data[20..28]))),
            nonce: read_u64_be!(&data[28..36]),
        })
    }
}

/// Counts a failure on the transport with index `idx`. The upper layer is told when this makes
/// the path unreachable.
///
/// From <https://datatracker.ietf.org/doc/html/rfc9260#section-8.2>:
///
///   When the value of this counter exceeds the limit indicated in the protocol parameter
///   'PMR', the endpoint MUST mark the destination transport address as inactive.
pub(crate) fn strike(assoc: &Association, idx: usize, options: &Options) -> Vec<Command> {
    let mut commands = vec![Command::Strike(idx)];
    if let Some(t) = assoc.transports.get(idx) {
        if t.is_active() && t.error_count + 1 > options.path_max_retransmissions {
            commands.push(Command::EventUlp(Notification::PathStateChanged(
                t.address,
                PathState::Inactive,
            )));
        }
    }
    commands
}

fn send_heartbeat(ctx: &StateContext<'_>, assoc: &Association, idx: usize) -> Vec<Command> {
    let Some(transport) = assoc.transports.get(idx) else {
        return vec![];
    };
    let info = HeartbeatInfo { address: transport.address, sent: ctx.now, nonce: fastrand::u64(..) };
    vec![
        Command::SendPacket(OutPacket {
            vtag: assoc.peer_vtag,
            dest: Destination::Address(transport.address),
            chunks: vec![Chunk::Heartbeat(HeartbeatChunk::with_info(info.to_bytes()))],
        }),
        Command::HbSent(idx, info.nonce),
    ]
}

fn supervises_paths(state: AssociationState) -> bool {
    matches!(
        state,
        AssociationState::Established
            | AssociationState::ShutdownPending
            | AssociationState::ShutdownSent
            | AssociationState::ShutdownReceived
    )
}

/// The heartbeat timer of one transport expired. An unanswered previous HEARTBEAT counts as a
/// failure.
pub(crate) fn heartbeat_expired(ctx: &StateContext<'_>, assoc: &Association, idx: usize) -> Decision {
    if !supervises_paths(assoc.state) {
        return Decision::discard();
    }
    let Some(transport) = assoc.transports.get(idx) else {
        return Decision::discard();
    };

    let mut commands = vec![];
    if transport.hb_pending.is_some() {
        if assoc.error_threshold_reached(ctx.options) {
            return abort::fail_association(
                ErrorKind::TooManyRetries,
                "No HEARTBEAT-ACK received",
                None,
            );
        }
        debug!("HEARTBEAT to {} unanswered", transport.address);
        commands.extend(strike(assoc, idx, ctx.options));
    }
    commands.extend(send_heartbeat(ctx, assoc, idx));
    commands.push(Command::TimerStart(TimerId::Heartbeat(idx)));
    Decision::consume(commands)
}

/// An on-demand HEARTBEAT, requested by the upper layer.
pub(crate) fn request_heartbeat(
    ctx: &StateContext<'_>,
    assoc: &Association,
    address: SocketAddr,
) -> Decision {
    match assoc.transport_index(address) {
        Some(idx) if supervises_paths(assoc.state) => Decision::consume(send_heartbeat(ctx, assoc, idx)),
        _ => Decision::discard(),
    }
}

/// HEARTBEAT from the peer, which is returned as it is.
pub(crate) fn beat(chunk: &HeartbeatChunk) -> Decision {
    Decision::consume(vec![Command::Reply(Chunk::HeartbeatAck(HeartbeatAckChunk {
        parameters: chunk.parameters.clone(),
    }))])
}

/// HEARTBEAT-ACK from the peer. Only an answer to the latest HEARTBEAT on a known path counts.
pub(crate) fn backbeat(
    ctx: &StateContext<'_>,
    assoc: &Association,
    chunk: &HeartbeatAckChunk,
) -> Decision {
    let Some(info) = chunk.info().and_then(HeartbeatInfo::from_bytes) else {
        debug!("Dropping HEARTBEAT-ACK with unreadable info");
        return Decision::discard();
    };
    let Some(idx) = assoc.transport_index(info.address) else {
        return Decision::discard();
    };
    let transport = &assoc.transports[idx];
    if transport.hb_pending != Some(info.nonce) {
        debug!("Dropping HEARTBEAT-ACK with unexpected nonce");
        return Decision::discard();
    }

    let rtt = ctx.now.saturating_duration_since(info.sent);
    let mut commands = vec![Command::TransportOn(idx, Some(rtt)), Command::CounterReset];
    if !transport.is_active() {
        commands.push(Command::EventUlp(Notification::PathStateChanged(
            transport.address,
            PathState::Active,
        )));
    }
    Decision::consume(commands)
}
