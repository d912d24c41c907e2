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

//! The decision layer of the association state machine.
//!
//! Every incoming chunk, timer expiry and upper layer primitive is routed by [`dispatch::dispatch`]
//! to a state function, chosen by the current association state and the kind of event. State
//! functions only read the association. They return a [`Decision`]: a disposition, and an ordered
//! list of [`Command`]s that the endpoint applies afterwards.

use crate::api::AssociationState;
use crate::api::Message;
use crate::api::Options;
use crate::api::SocketTime;
use crate::association::Association;
use crate::packet::chunk::Chunk;
use std::fmt;
use std::net::SocketAddr;

pub(crate) mod abort;
pub(crate) mod collision;
pub(crate) mod command;
pub(crate) mod data;
pub(crate) mod dispatch;
pub(crate) mod ecn;
pub(crate) mod handshake;
pub(crate) mod heartbeat;
pub(crate) mod ootb;
pub(crate) mod shutdown;
pub(crate) mod verification;

pub(crate) use command::Command;

/// Timers owned by an association.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub(crate) enum TimerId {
    T1Init,
    T1Cookie,
    T2Shutdown,
    T3Rtx,
    /// Delayed acknowledgement.
    Sack,
    Autoclose,
    /// Heartbeat of the transport with this index.
    Heartbeat(usize),
}

/// Requests from the upper layer.
#[derive(Clone, Debug)]
pub(crate) enum Primitive {
    Associate(SocketAddr),
    Shutdown,
    Abort(String),
    Send(Message, bool),
    RequestHeartbeat(SocketAddr),
}

/// Events generated by the endpoint itself.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum OtherEvent {
    /// All outbound data has been acknowledged, while waiting for that to shut down.
    NoPendingTsn,
}

pub(crate) enum Event<'a> {
    Chunk(&'a Chunk),
    Timeout(TimerId),
    Primitive(&'a Primitive),
    Other(OtherEvent),
}

impl fmt::Display for Event<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Chunk(chunk) => write!(f, "{chunk}"),
            Event::Timeout(timer) => write!(f, "{timer:?} timeout"),
            Event::Primitive(Primitive::Send(..)) => write!(f, "SEND primitive"),
            Event::Primitive(p) => write!(f, "{p:?} primitive"),
            Event::Other(other) => write!(f, "{other:?}"),
        }
    }
}

/// What should happen to the event, and to the rest of the packet it arrived in.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Disposition {
    /// The event was processed.
    Consume,
    /// The chunk was ignored. Later chunks in the packet are still processed.
    Discard,
    /// The chunk and the rest of its packet were ignored.
    DiscardPacket,
    /// The association is gone.
    DeleteTcb,
    /// This endpoint aborted the association.
    Abort,
    /// The peer broke a protocol rule. Nothing was changed.
    Violation,
    /// Allocation failed. Nothing was changed, and the event may be retried.
    Nomem,
    /// A state and event that should never meet.
    Bug,
}

impl Disposition {
    /// Whether the remaining chunks of the packet must not be processed.
    pub fn ends_packet(self) -> bool {
        !matches!(self, Disposition::Consume | Disposition::Discard)
    }
}

#[derive(Debug)]
pub(crate) struct Decision {
    pub disposition: Disposition,
    pub commands: Vec<Command>,
}

impl Decision {
    pub fn new(disposition: Disposition, commands: Vec<Command>) -> Self {
        Self { disposition, commands }
    }

    pub fn consume(commands: Vec<Command>) -> Self {
        Self::new(Disposition::Consume, commands)
    }

    pub fn discard() -> Self {
        Self::new(Disposition::Discard, vec![])
    }

    pub fn discard_packet() -> Self {
        Self::new(Disposition::DiscardPacket, vec![])
    }

    pub fn violation() -> Self {
        Self::new(Disposition::Violation, vec![])
    }

    pub fn nomem() -> Self {
        Self::new(Disposition::Nomem, vec![])
    }

    pub fn bug() -> Self {
        Self::new(Disposition::Bug, vec![])
    }
}

/// The header fields of the packet that the current chunk arrived in.
pub(crate) struct PacketInfo<'a> {
    pub source: SocketAddr,
    pub verification_tag: u32,

    /// The IP header carried the Congestion Experienced codepoint.
    pub ecn_ce: bool,

    /// All chunks of the packet, for decisions that look at the packet as a whole.
    pub chunks: &'a [Chunk],
}

/// Everything a state function may look at, besides the event itself.
pub(crate) struct StateContext<'a> {
    pub now: SocketTime,
    pub options: &'a Options,
    pub cookie_key: &'a [u8],
    pub assoc: Option<&'a Association>,
    pub packet: Option<&'a PacketInfo<'a>>,
}

impl StateContext<'_> {
    pub fn state(&self) -> AssociationState {
        self.assoc.map_or(AssociationState::Closed, |a| a.state)
    }
}
