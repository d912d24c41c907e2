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

use crate::api::AssociationState;
use crate::api::ErrorKind;
use crate::api::Message;
use crate::api::PathState;
use crate::association::Association;
use crate::association::PeerInit;
use crate::packet::chunk::Chunk;
use crate::packet::data::DataChunk;
use crate::packet::data::SackChunk;
use crate::sm::TimerId;
use crate::types::Tsn;
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

/// Where a packet is sent.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum Destination {
    /// Back to where the packet being processed came from.
    Source,
    /// The primary path of the association.
    Primary,
    Address(SocketAddr),
}

/// A packet that is sent on its own, rather than bundled with the replies.
#[derive(Debug, PartialEq)]
pub(crate) struct OutPacket {
    pub vtag: u32,
    pub dest: Destination,
    pub chunks: Vec<Chunk>,
}

/// Notifications to the upper layer.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Notification {
    /// COMM_UP
    Connected,
    /// RESTART
    Restarted,
    /// SHUTDOWN_COMPLETE
    Closed,
    /// REMOTE_ERROR
    Error(ErrorKind, String),
    /// NETWORK_STATUS
    PathStateChanged(SocketAddr, PathState),
}

/// The side effects that a state function can request.
#[derive(Debug)]
pub(crate) enum Command {
    /// Registers a newly created association.
    NewAssoc(Box<Association>),
    /// Replaces the current incarnation of the association.
    UpdateAssoc(Box<Association>),
    /// Removes the association, with all its timers. Nothing after it is applied.
    DeleteTcb,
    NewState(AssociationState),
    PeerInit(PeerInit),

    TimerStart(TimerId),
    TimerStop(TimerId),
    /// Starts the timer with one more step of backoff.
    TimerRestart(TimerId),
    HbTimersStart,

    /// Queues a chunk to the packet that answers the current event.
    Reply(Chunk),
    SendPacket(OutPacket),

    EventUlp(Notification),
    /// Delivers received user data.
    ChunkUlp(DataChunk),
    /// Reports a local, non fatal error to the upper layer.
    ReportError(ErrorKind, String),

    ProcessSack(SackChunk),
    /// Acknowledges outbound data up to the TSN carried in a SHUTDOWN.
    ProcessCtsn(Tsn),
    /// Sends a SACK now, or within the delayed ack timeout unless `force` is set.
    GenSack { force: bool },
    GenShutdown,

    QueueData(Message, bool),
    Transmit,
    Retransmit,
    /// Records a received TSN.
    ReportTsn(Tsn),
    PurgeOutqueue,

    EcnCe(Tsn),
    EcnEcne(Tsn),
    EcnCwr(Tsn),

    CounterReset,
    InitCounterInc,
    InitCounterReset,
    /// Counts a failure on a transport, and on the association.
    Strike(usize),
    /// A transport was heard from, optionally with a round-trip sample.
    TransportOn(usize, Option<Duration>),
    HbSent(usize, u64),

    /// Establishment failed.
    InitFailed(ErrorKind, String),
    /// An established association was lost.
    AssocFailed(ErrorKind, String),
    SetCookiePreserve(Duration),
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::NewAssoc(a) => write!(f, "NEW_ASOC(my_vtag={:#010x})", a.my_vtag),
            Command::UpdateAssoc(a) => write!(f, "UPDATE_ASSOC(my_vtag={:#010x})", a.my_vtag),
            Command::Reply(chunk) => write!(f, "REPLY({chunk})"),
            Command::NewState(state) => write!(f, "NEW_STATE({state})"),
            other => write!(f, "{other:?}"),
        }
    }
}

/// Accessors used when asserting on decisions.
#[cfg(test)]
impl Command {
    pub fn as_reply(&self) -> Option<&Chunk> {
        match self {
            Command::Reply(chunk) => Some(chunk),
            _ => None,
        }
    }

    pub fn as_new_state(&self) -> Option<AssociationState> {
        match self {
            Command::NewState(state) => Some(*state),
            _ => None,
        }
    }
}
