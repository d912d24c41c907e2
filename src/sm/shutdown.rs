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

//! Graceful shutdown, see <https://datatracker.ietf.org/doc/html/rfc9260#section-9.2>.
//!
//! ```text
//!   ESTABLISHED --SHUTDOWN primitive--> SHUTDOWN_PENDING --no pending TSN--> SHUTDOWN_SENT
//!   ESTABLISHED --SHUTDOWN-----------> SHUTDOWN_RECEIVED --no pending TSN--> SHUTDOWN_ACK_SENT
//!   SHUTDOWN_SENT --SHUTDOWN-ACK--> CLOSED (sends SHUTDOWN-COMPLETE)
//!   SHUTDOWN_ACK_SENT --SHUTDOWN-COMPLETE--> CLOSED
//! ```

use crate::api::AssociationState;
use crate::api::ErrorKind;
use crate::association::Association;
use crate::packet::chunk::Chunk;
use crate::packet::teardown::ShutdownAckChunk;
use crate::packet::teardown::ShutdownChunk;
use crate::packet::teardown::ShutdownCompleteChunk;
use crate::sm::Command;
use crate::sm::Decision;
use crate::sm::Disposition;
use crate::sm::StateContext;
use crate::sm::TimerId;
use crate::sm::abort;
use crate::sm::command::Notification;
use crate::sm::heartbeat;
use crate::sm::ootb;
#[cfg(not(test))]
use log::debug;
#[cfg(test)]
use std::println as debug;

fn closed() -> Decision {
    Decision::new(
        Disposition::DeleteTcb,
        vec![Command::EventUlp(Notification::Closed), Command::DeleteTcb],
    )
}

/// The SHUTDOWN primitive. An association that isn't up yet is simply removed.
pub(crate) fn shutdown_primitive(assoc: &Association) -> Decision {
    match assoc.state {
        AssociationState::CookieWait | AssociationState::CookieEchoed => closed(),
        AssociationState::Established => Decision::consume(vec![
            Command::TimerStop(TimerId::Autoclose),
            // Outstanding data is drained first. See `no_pending_tsn`.
            Command::NewState(AssociationState::ShutdownPending),
        ]),
        _ => Decision::discard(),
    }
}

/// SHUTDOWN from the peer, which acknowledges data up to its cumulative TSN ack.
pub(crate) fn shutdown(assoc: &Association, chunk: &ShutdownChunk) -> Decision {
    let ack = Command::ProcessCtsn(chunk.cumulative_tsn_ack);
    match assoc.state {
        AssociationState::Established | AssociationState::ShutdownPending => {
            Decision::consume(vec![
                Command::TimerStop(TimerId::Autoclose),
                Command::NewState(AssociationState::ShutdownReceived),
                ack,
            ])
        }
        // From <https://datatracker.ietf.org/doc/html/rfc9260#section-9.2>:
        //
        //   If an endpoint is in the SHUTDOWN-SENT state and receives a SHUTDOWN chunk from its
        //   peer, the endpoint SHOULD respond immediately with a SHUTDOWN ACK chunk to its peer
        //   and move into the SHUTDOWN-ACK-SENT state, restarting its T2-shutdown timer.
        AssociationState::ShutdownSent => Decision::consume(vec![
            ack,
            Command::NewState(AssociationState::ShutdownAckSent),
            Command::Reply(Chunk::ShutdownAck(ShutdownAckChunk)),
            Command::TimerStart(TimerId::T2Shutdown),
        ]),
        AssociationState::ShutdownReceived => Decision::consume(vec![ack]),
        AssociationState::ShutdownAckSent => {
            Decision::consume(vec![Command::Reply(Chunk::ShutdownAck(ShutdownAckChunk))])
        }
        _ => Decision::discard(),
    }
}

/// SHUTDOWN-ACK from the peer.
pub(crate) fn shutdown_ack(ctx: &StateContext<'_>, assoc: &Association) -> Decision {
    match assoc.state {
        AssociationState::ShutdownSent | AssociationState::ShutdownAckSent => {
            let mut decision = closed();
            decision.commands.splice(
                0..0,
                [
                    Command::TimerStop(TimerId::T2Shutdown),
                    Command::Reply(Chunk::ShutdownComplete(ShutdownCompleteChunk {
                        tag_reflected: false,
                    })),
                ],
            );
            decision
        }
        // From <https://datatracker.ietf.org/doc/html/rfc9260#section-8.5.1>:
        //
        //   If the receiver is in COOKIE-ECHOED or COOKIE-WAIT state, the procedures in Section
        //   8.4 SHOULD be followed; in other words, it is treated as an OOTB packet.
        AssociationState::CookieWait | AssociationState::CookieEchoed => ootb::handle(ctx),
        _ => Decision::discard(),
    }
}

/// SHUTDOWN-COMPLETE from the peer, which ends the association.
pub(crate) fn shutdown_complete(assoc: &Association) -> Decision {
    if assoc.state != AssociationState::ShutdownAckSent {
        return Decision::discard();
    }
    let mut decision = closed();
    decision.commands.insert(0, Command::TimerStop(TimerId::T2Shutdown));
    decision
}

/// T2-shutdown expiry. SHUTDOWN or SHUTDOWN-ACK is sent again, to the primary path.
pub(crate) fn t2_shutdown_expired(ctx: &StateContext<'_>, assoc: &Association) -> Decision {
    let resend = match assoc.state {
        AssociationState::ShutdownSent => Command::GenShutdown,
        AssociationState::ShutdownAckSent => Command::Reply(Chunk::ShutdownAck(ShutdownAckChunk)),
        _ => return Decision::bug(),
    };
    if assoc.error_threshold_reached(ctx.options) {
        return abort::fail_association(
            ErrorKind::TooManyRetries,
            "No response to shutdown",
            None,
        );
    }
    let mut commands = heartbeat::strike(assoc, assoc.primary, ctx.options);
    commands.push(resend);
    commands.push(Command::TimerRestart(TimerId::T2Shutdown));
    Decision::consume(commands)
}

/// The association has been idle for the autoclose period.
pub(crate) fn autoclose_expired(assoc: &Association) -> Decision {
    if assoc.state != AssociationState::Established {
        return Decision::discard();
    }
    debug!("Association {} idle, closing", assoc.id);
    shutdown_primitive(assoc)
}

/// All outbound data has been acknowledged, in a state that waits for it.
pub(crate) fn no_pending_tsn(assoc: &Association) -> Decision {
    match assoc.state {
        AssociationState::ShutdownPending => Decision::consume(vec![
            Command::NewState(AssociationState::ShutdownSent),
            Command::GenShutdown,
            Command::TimerStart(TimerId::T2Shutdown),
        ]),
        AssociationState::ShutdownReceived => Decision::consume(vec![
            Command::NewState(AssociationState::ShutdownAckSent),
            Command::Reply(Chunk::ShutdownAck(ShutdownAckChunk)),
            Command::TimerStart(TimerId::T2Shutdown),
        ]),
        _ => Decision::discard(),
    }
}
