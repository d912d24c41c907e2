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

//! User data: DATA, SACK, the SEND primitive and the timers that keep data moving.

use crate::api::AssociationState;
use crate::api::ErrorKind;
use crate::api::Message;
use crate::association::Association;
use crate::packet::chunk::Chunk;
use crate::packet::data::DataChunk;
use crate::packet::data::SackChunk;
use crate::packet::error_causes::ErrorCause;
use crate::packet::teardown::ErrorChunk;
use crate::sm::Command;
use crate::sm::Decision;
use crate::sm::StateContext;
use crate::sm::TimerId;
use crate::sm::abort;
use crate::sm::heartbeat;
#[cfg(not(test))]
use log::debug;
#[cfg(test)]
use std::println as debug;

fn autoclose_restart(ctx: &StateContext<'_>, commands: &mut Vec<Command>) {
    if ctx.options.autoclose.is_some() {
        commands.push(Command::TimerStart(TimerId::Autoclose));
    }
}

/// DATA from the peer.
pub(crate) fn eat_data(ctx: &StateContext<'_>, assoc: &Association, data: &DataChunk) -> Decision {
    // From <https://datatracker.ietf.org/doc/html/rfc9260#section-9.2>:
    //
    //   Once an endpoint has reached the SHUTDOWN-RECEIVED state, it MUST NOT send a SHUTDOWN in
    //   response to a ULP request. [...] and discard any new DATA chunks it receives.
    if !matches!(
        assoc.state,
        AssociationState::Established
            | AssociationState::ShutdownPending
            | AssociationState::ShutdownSent
    ) {
        return Decision::discard();
    }

    // From <https://datatracker.ietf.org/doc/html/rfc9260#section-6.2>:
    //
    //   If an endpoint receives a DATA chunk with no user data (i.e., the Length field is set to
    //   16), it MUST send an ABORT chunk with a "No User Data" error cause.
    if data.payload.is_empty() {
        return abort::fail_association(
            ErrorKind::ProtocolViolation,
            "DATA chunk without user data",
            Some(ErrorCause::NoUserData(data.tsn)),
        );
    }

    if !assoc.tsn_map.is_valid(data.tsn) {
        debug!("Dropping DATA with TSN {} too far ahead", data.tsn);
        return Decision::discard();
    }

    let mut commands = vec![];
    let ce = ctx.packet.is_some_and(|p| p.ecn_ce);
    if ce && assoc.ecn_capable {
        commands.push(Command::EcnCe(data.tsn));
    }

    if assoc.tsn_map.is_duplicate(data.tsn) {
        // From <https://datatracker.ietf.org/doc/html/rfc9260#section-6.2>:
        //
        //   When a packet arrives with duplicate DATA chunk(s) and with no new DATA chunk(s), the
        //   endpoint MUST immediately send a SACK chunk with no delay.
        commands.push(Command::ReportTsn(data.tsn));
        commands.push(Command::GenSack { force: true });
        return Decision::consume(commands);
    }

    // From <https://datatracker.ietf.org/doc/html/rfc9260#section-6.5>:
    //
    //   Every DATA chunk MUST carry a valid stream identifier. If an endpoint receives a DATA
    //   chunk with an invalid stream identifier, it SHOULD acknowledge the reception of the DATA
    //   chunk following the normal procedure, immediately send an ERROR chunk with cause set to
    //   "Invalid Stream Identifier", and discard the DATA chunk.
    if data.stream_id.0 >= assoc.inbound_streams {
        debug!("Dropping DATA for stream {} beyond negotiated streams", data.stream_id.0);
        commands.push(Command::ReportTsn(data.tsn));
        commands.push(Command::Reply(Chunk::Error(ErrorChunk {
            error_causes: vec![ErrorCause::InvalidStreamIdentifier(data.stream_id)],
        })));
        commands.push(Command::GenSack { force: true });
        return Decision::consume(commands);
    }

    commands.push(Command::ReportTsn(data.tsn));
    commands.push(Command::ChunkUlp(data.clone()));
    commands.push(Command::GenSack { force: ce });
    autoclose_restart(ctx, &mut commands);

    // From <https://datatracker.ietf.org/doc/html/rfc9260#section-9.2>:
    //
    //   While in the SHUTDOWN-SENT state, the SHUTDOWN sender MUST immediately respond to each
    //   received packet containing one or more DATA chunks with a SHUTDOWN chunk and restart the
    //   T2-shutdown timer.
    if assoc.state == AssociationState::ShutdownSent {
        commands.push(Command::GenShutdown);
        commands.push(Command::TimerStart(TimerId::T2Shutdown));
    }
    Decision::consume(commands)
}

/// SACK from the peer.
pub(crate) fn sack(assoc: &Association, sack: &SackChunk) -> Decision {
    if !matches!(
        assoc.state,
        AssociationState::Established
            | AssociationState::ShutdownPending
            | AssociationState::ShutdownSent
            | AssociationState::ShutdownReceived
    ) {
        return Decision::discard();
    }

    // From <https://datatracker.ietf.org/doc/html/rfc9260#section-6.2.1>:
    //
    //   If Cumulative TSN Ack is less than the Cumulative TSN Ack Point, then drop the SACK
    //   chunk. Since Cumulative TSN Ack is monotonically increasing, a SACK chunk whose
    //   Cumulative TSN Ack is less than the Cumulative TSN Ack Point indicates an out-of-order
    //   SACK.
    let ack_point = assoc.outqueue.ctsn_ack_point();
    if sack.cumulative_tsn_ack < ack_point {
        debug!("Dropping out of order SACK ({} < {ack_point})", sack.cumulative_tsn_ack);
        return Decision::discard();
    }

    //   If an endpoint receives a SACK chunk with a Cumulative TSN Ack [...] that acknowledges a
    //   TSN that has not been sent, the endpoint SHOULD abort the association.
    if sack.cumulative_tsn_ack >= assoc.outqueue.next_tsn() {
        return abort::fail_association(
            ErrorKind::ProtocolViolation,
            "SACK acknowledges data that was never sent",
            Some(ErrorCause::ProtocolViolation(format!(
                "Cumulative TSN Ack {} beyond highest TSN sent",
                sack.cumulative_tsn_ack
            ))),
        );
    }

    Decision::consume(vec![Command::ProcessSack(sack.clone()), Command::Transmit])
}

/// The SEND primitive. Data can be queued before the association is up, and is sent once it is.
pub(crate) fn send(
    ctx: &StateContext<'_>,
    assoc: &Association,
    message: &Message,
    unordered: bool,
) -> Decision {
    match assoc.state {
        AssociationState::Established => {
            let mut commands = vec![Command::QueueData(message.clone(), unordered), Command::Transmit];
            autoclose_restart(ctx, &mut commands);
            Decision::consume(commands)
        }
        AssociationState::CookieWait | AssociationState::CookieEchoed => {
            Decision::consume(vec![Command::QueueData(message.clone(), unordered)])
        }
        _ => Decision::discard(),
    }
}

/// T3-rtx expiry: the primary path counts a failure, and everything outstanding is sent again.
pub(crate) fn t3_rtx_expired(ctx: &StateContext<'_>, assoc: &Association) -> Decision {
    if !assoc.outqueue.has_outstanding() {
        return Decision::discard();
    }
    if assoc.error_threshold_reached(ctx.options) {
        return abort::fail_association(
            ErrorKind::TooManyRetries,
            "Too many retransmissions",
            None,
        );
    }
    let mut commands = heartbeat::strike(assoc, assoc.primary, ctx.options);
    commands.push(Command::Retransmit);
    commands.push(Command::TimerRestart(TimerId::T3Rtx));
    Decision::consume(commands)
}

/// The delayed acknowledgement is due.
pub(crate) fn sack_timer_expired() -> Decision {
    Decision::consume(vec![Command::GenSack { force: true }])
}
