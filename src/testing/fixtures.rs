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

//! Associations and decision contexts for testing state functions in isolation.

use crate::api::AssocId;
use crate::api::AssociationState;
use crate::api::Options;
use crate::api::SocketTime;
use crate::association::Association;
use crate::association::PeerInit;
use crate::association::outqueue::OutQueue;
use crate::association::state_cookie::COOKIE_KEY_SIZE;
use crate::packet::chunk::Chunk;
use crate::packet::handshake::InitChunk;
use crate::packet::parameter::Parameter;
use crate::sm::Command;
use crate::sm::Decision;
use crate::sm::PacketInfo;
use crate::sm::StateContext;
use crate::sm::command::OutPacket;
use crate::types::Tsn;
use std::net::IpAddr;
use std::net::Ipv4Addr;
use std::net::SocketAddr;

pub(crate) const MY_VTAG: u32 = 0x1111_1111;
pub(crate) const PEER_VTAG: u32 = 0x2222_2222;
pub(crate) const MY_INITIAL_TSN: Tsn = Tsn(1000);
pub(crate) const PEER_INITIAL_TSN: Tsn = Tsn(5000);
pub(crate) const PEER_ADDR: SocketAddr =
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)), 5000);
pub(crate) const COOKIE_KEY: [u8; COOKIE_KEY_SIZE] = [0x5a; COOKIE_KEY_SIZE];

/// An INIT as sent by the peer.
pub(crate) fn peer_init(initiate_tag: u32) -> InitChunk {
    InitChunk {
        initiate_tag,
        a_rwnd: 65536,
        nbr_outbound_streams: 10,
        nbr_inbound_streams: 10,
        initial_tsn: PEER_INITIAL_TSN,
        parameters: vec![Parameter::EcnCapable],
    }
}

/// An association with well known tags and TSNs in `state`. The peer's tag is only known after
/// COOKIE_WAIT.
pub(crate) fn in_state(state: AssociationState, options: &Options) -> Association {
    let mut assoc = Association::new_outbound(PEER_ADDR, options);
    assoc.id = AssocId(1);
    assoc.state = state;
    assoc.my_vtag = MY_VTAG;
    assoc.initial_tsn = MY_INITIAL_TSN;
    assoc.outqueue = OutQueue::new(MY_INITIAL_TSN);
    assoc.last_cwr_tsn = MY_INITIAL_TSN - 1;
    if state != AssociationState::CookieWait {
        assoc.apply_peer_init(
            &PeerInit {
                initiate_tag: PEER_VTAG,
                a_rwnd: 100_000,
                nbr_outbound_streams: 10,
                nbr_inbound_streams: 10,
                initial_tsn: PEER_INITIAL_TSN,
                addresses: vec![],
                ecn_capable: true,
                cookie: Some(vec![0xc0; 8]),
            },
            options,
        );
    }
    assoc
}

pub(crate) fn established(options: &Options) -> Association {
    in_state(AssociationState::Established, options)
}

pub(crate) fn context<'a>(
    options: &'a Options,
    assoc: Option<&'a Association>,
    packet: Option<&'a PacketInfo<'a>>,
) -> StateContext<'a> {
    StateContext { now: SocketTime::zero(), options, cookie_key: &COOKIE_KEY, assoc, packet }
}

/// A packet from the peer's primary address.
pub(crate) fn packet(verification_tag: u32, chunks: &[Chunk]) -> PacketInfo<'_> {
    PacketInfo { source: PEER_ADDR, verification_tag, ecn_ce: false, chunks }
}

/// The first packet that `decision` sends on its own.
pub(crate) fn sent_packet(decision: &Decision) -> &OutPacket {
    decision
        .commands
        .iter()
        .find_map(|c| match c {
            Command::SendPacket(p) => Some(p),
            _ => None,
        })
        .expect("no packet sent")
}

/// The chunks that `decision` replies with.
pub(crate) fn replies(decision: &Decision) -> Vec<&Chunk> {
    decision.commands.iter().filter_map(Command::as_reply).collect()
}
