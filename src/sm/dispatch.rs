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
use crate::association::Association;
use crate::packet::SerializableTlv;
use crate::packet::chunk::Chunk;
use crate::packet::chunk::UnknownChunk;
use crate::packet::error_causes::ErrorCause;
use crate::packet::teardown::ErrorChunk;
use crate::sm::Command;
use crate::sm::Decision;
use crate::sm::Disposition;
use crate::sm::Event;
use crate::sm::OtherEvent;
use crate::sm::Primitive;
use crate::sm::StateContext;
use crate::sm::TimerId;
use crate::sm::abort;
use crate::sm::data;
use crate::sm::ecn;
use crate::sm::handshake;
use crate::sm::heartbeat;
use crate::sm::ootb;
use crate::sm::shutdown;
use crate::sm::verification;
#[cfg(not(test))]
use log::debug;
#[cfg(not(test))]
use log::error;
#[cfg(not(test))]
use log::warn;
#[cfg(test)]
use std::println as debug;
#[cfg(test)]
use std::println as error;
#[cfg(test)]
use std::println as warn;

/// Routes `event` to the state function for the current state, and returns its decision.
pub(crate) fn dispatch(ctx: &StateContext<'_>, event: &Event<'_>) -> Decision {
    let decision = match event {
        Event::Chunk(chunk) => dispatch_chunk(ctx, chunk),
        Event::Timeout(timer) => match ctx.assoc {
            Some(assoc) => dispatch_timeout(ctx, assoc, *timer),
            // A timer of a deleted association.
            None => Decision::discard(),
        },
        Event::Primitive(primitive) => dispatch_primitive(ctx, primitive),
        Event::Other(OtherEvent::NoPendingTsn) => match ctx.assoc {
            Some(assoc) => shutdown::no_pending_tsn(assoc),
            None => Decision::discard(),
        },
    };

    let id = ctx.assoc.map(|a| a.id.to_string()).unwrap_or_default();
    match decision.disposition {
        Disposition::Violation => warn!("{id}[{}] {event}: protocol violation", ctx.state()),
        Disposition::Bug => {
            error!("{id}[{}] {event}: {:?}", ctx.state(), decision.disposition)
        }
        disposition => debug!(
            "{id}[{}] {event} -> {disposition:?}, {} commands",
            ctx.state(),
            decision.commands.len()
        ),
    }
    decision
}

fn dispatch_chunk(ctx: &StateContext<'_>, chunk: &Chunk) -> Decision {
    let Some(packet) = ctx.packet else {
        return Decision::bug();
    };
    if verification::violates_bundling(packet.chunks) {
        return Decision::violation();
    }

    // From <https://datatracker.ietf.org/doc/html/rfc9260#section-8.5.1>:
    //
    //   When an endpoint receives an SCTP packet with the Verification Tag set to 0, it SHOULD
    //   verify that the packet contains only an INIT chunk. Otherwise, the receiver MUST silently
    //   discard the packet.
    if matches!(chunk, Chunk::Init(_)) && packet.verification_tag != 0 {
        return Decision::discard_packet();
    }

    let Some(assoc) = ctx.assoc else {
        return match chunk {
            Chunk::Init(init) => handshake::closed_init(ctx, init),
            Chunk::CookieEcho(echo) => handshake::closed_cookie_echo(ctx, echo),
            _ => ootb::handle(ctx),
        };
    };

    if !verification::accepts(assoc, packet.verification_tag, chunk) {
        debug!(
            "{} dropping {chunk}: tag {:#010x} doesn't match",
            assoc.id, packet.verification_tag
        );
        return Decision::discard_packet();
    }

    let state = assoc.state;
    match chunk {
        Chunk::Init(init) => handshake::unexpected_init(ctx, assoc, init),
        Chunk::InitAck(init_ack) if state == AssociationState::CookieWait => {
            handshake::init_ack(assoc, init_ack)
        }
        Chunk::CookieEcho(echo) => handshake::duplicate_cookie_echo(ctx, assoc, echo),
        Chunk::CookieAck(_) if state == AssociationState::CookieEchoed => handshake::cookie_ack(ctx),
        // INIT-ACK and COOKIE-ACK in any other state are stale.
        Chunk::InitAck(_) | Chunk::CookieAck(_) => Decision::discard(),
        Chunk::Data(d) => data::eat_data(ctx, assoc, d),
        Chunk::Sack(s) => data::sack(assoc, s),
        Chunk::Heartbeat(hb) => heartbeat::beat(hb),
        Chunk::HeartbeatAck(ack) => heartbeat::backbeat(ctx, assoc, ack),
        Chunk::Abort(a) => abort::abort(assoc, a),
        Chunk::Shutdown(s) => shutdown::shutdown(assoc, s),
        Chunk::ShutdownAck(_) => shutdown::shutdown_ack(ctx, assoc),
        Chunk::ShutdownComplete(_) => shutdown::shutdown_complete(assoc),
        Chunk::Error(e) if state == AssociationState::CookieEchoed => {
            handshake::error_in_cookie_echoed(ctx, assoc, e)
        }
        Chunk::Error(e) => abort::operation_error(e),
        Chunk::Ecne(e) => ecn::ecne(assoc, e),
        Chunk::Cwr(c) => ecn::cwr(assoc, c),
        Chunk::Unknown(c) => unrecognized_chunk(assoc, c),
    }
}

/// A chunk type this endpoint doesn't implement. The two highest bits of the type say what the
/// sender expects, see <https://datatracker.ietf.org/doc/html/rfc9260#section-3.2>.
fn unrecognized_chunk(assoc: &Association, chunk: &UnknownChunk) -> Decision {
    let mut commands = vec![];
    if chunk.should_report() && assoc.peer_vtag != 0 {
        commands.push(Command::Reply(Chunk::Error(ErrorChunk {
            error_causes: vec![ErrorCause::UnrecognizedChunk(chunk.to_bytes())],
        })));
    }
    let disposition =
        if chunk.should_skip() { Disposition::Discard } else { Disposition::DiscardPacket };
    Decision::new(disposition, commands)
}

fn dispatch_timeout(ctx: &StateContext<'_>, assoc: &Association, timer: TimerId) -> Decision {
    let state = assoc.state;
    match timer {
        TimerId::T1Init if state == AssociationState::CookieWait => {
            handshake::t1_init_expired(ctx, assoc)
        }
        TimerId::T1Cookie if state == AssociationState::CookieEchoed => {
            handshake::t1_cookie_expired(ctx, assoc)
        }
        TimerId::T1Init | TimerId::T1Cookie => Decision::bug(),
        TimerId::T2Shutdown => shutdown::t2_shutdown_expired(ctx, assoc),
        TimerId::T3Rtx => data::t3_rtx_expired(ctx, assoc),
        TimerId::Sack => data::sack_timer_expired(),
        TimerId::Autoclose => shutdown::autoclose_expired(assoc),
        TimerId::Heartbeat(idx) => heartbeat::heartbeat_expired(ctx, assoc, idx),
    }
}

fn dispatch_primitive(ctx: &StateContext<'_>, primitive: &Primitive) -> Decision {
    let Some(assoc) = ctx.assoc else {
        return match primitive {
            Primitive::Associate(peer) => handshake::associate(ctx, *peer),
            _ => Decision::discard(),
        };
    };
    match primitive {
        Primitive::Associate(peer) => Decision::new(
            Disposition::Discard,
            vec![Command::ReportError(
                ErrorKind::WrongSequence,
                format!("Already associated with {peer}"),
            )],
        ),
        Primitive::Shutdown => shutdown::shutdown_primitive(assoc),
        Primitive::Abort(reason) => abort::user_abort(assoc, reason),
        Primitive::Send(message, unordered) => data::send(ctx, assoc, message, *unordered),
        Primitive::RequestHeartbeat(address) => heartbeat::request_heartbeat(ctx, assoc, *address),
    }
}
