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

//! Association establishment: INIT, INIT-ACK, COOKIE-ECHO and COOKIE-ACK, the T1 timers and the
//! handling of stale cookies.

use crate::api::AssociationState;
use crate::api::ErrorKind;
use crate::api::Options;
use crate::association::Association;
use crate::association::PeerInit;
use crate::association::local_rwnd;
use crate::association::state_cookie::CookieError;
use crate::association::state_cookie::StateCookie;
use crate::association::state_cookie::make_cookie;
use crate::association::state_cookie::peer_vtag_of;
use crate::association::state_cookie::unpack_cookie;
use crate::packet::SerializableTlv;
use crate::packet::chunk::Chunk;
use crate::packet::error_causes::ErrorCause;
use crate::packet::handshake::CookieAckChunk;
use crate::packet::handshake::CookieEchoChunk;
use crate::packet::handshake::InitAckChunk;
use crate::packet::handshake::InitChunk;
use crate::packet::parameter;
use crate::packet::parameter::Parameter;
use crate::packet::parameter::UnrecognizedAction;
use crate::packet::teardown::AbortChunk;
use crate::packet::teardown::ErrorChunk;
use crate::packet::teardown::ShutdownAckChunk;
use crate::sm::Command;
use crate::sm::Decision;
use crate::sm::Disposition;
use crate::sm::StateContext;
use crate::sm::TimerId;
use crate::sm::collision;
use crate::sm::collision::Collision;
use crate::sm::collision::InitAckTags;
use crate::sm::collision::Tags;
use crate::sm::command::Destination;
use crate::sm::command::Notification;
use crate::sm::command::OutPacket;
#[cfg(not(test))]
use log::debug;
#[cfg(not(test))]
use log::warn;
use std::cmp::min;
use std::net::IpAddr;
use std::net::SocketAddr;
#[cfg(test)]
use std::println as debug;
#[cfg(test)]
use std::println as warn;
use std::time::Duration;

fn local_address_parameters(options: &Options) -> impl Iterator<Item = Parameter> + '_ {
    options.local_addresses.iter().map(|a| match a {
        IpAddr::V4(a) => Parameter::Ipv4Address(*a),
        IpAddr::V6(a) => Parameter::Ipv6Address(*a),
    })
}

/// The INIT that starts (or restarts) the handshake of `assoc`.
pub(crate) fn make_init(
    assoc: &Association,
    options: &Options,
    cookie_preserve: Option<Duration>,
) -> InitChunk {
    let mut parameters: Vec<Parameter> = local_address_parameters(options).collect();
    if options.ecn_capable {
        parameters.push(Parameter::EcnCapable);
    }
    if let Some(preserve) = cookie_preserve {
        parameters.push(Parameter::CookiePreservative(preserve));
    }
    InitChunk {
        initiate_tag: assoc.my_vtag,
        a_rwnd: assoc.my_rwnd,
        nbr_outbound_streams: options.announced_maximum_outgoing_streams,
        nbr_inbound_streams: options.announced_maximum_incoming_streams,
        initial_tsn: assoc.initial_tsn,
        parameters,
    }
}

/// INIT is always sent with a zero verification tag, whatever is known about the peer.
fn send_init(assoc: &Association, options: &Options, cookie_preserve: Option<Duration>) -> Command {
    Command::SendPacket(OutPacket {
        vtag: 0,
        dest: Destination::Primary,
        chunks: vec![Chunk::Init(make_init(assoc, options, cookie_preserve))],
    })
}

/// Parameters that the sender asked to be told about, in the order they appeared, up to the
/// first one that stops processing.
fn unrecognized_parameters(parameters: &[Parameter]) -> Vec<Parameter> {
    let mut unrecognized = vec![];
    for p in parameters {
        if let Parameter::Unknown { typ, .. } = p {
            let action = UnrecognizedAction::for_type(*typ);
            if action.report {
                unrecognized.push(Parameter::UnrecognizedParameter(p.to_bytes()));
            }
            if !action.skip {
                break;
            }
        }
    }
    unrecognized
}

fn make_init_ack(
    ctx: &StateContext<'_>,
    init: &InitChunk,
    tags: InitAckTags,
) -> Result<InitAckChunk, CookieError> {
    let options = ctx.options;

    // From <https://datatracker.ietf.org/doc/html/rfc9260#section-5.2.6>:
    //
    //   The receiver of an INIT chunk with a Cookie Preservative MAY choose to add this increment
    //   to the lifespan of the State Cookie it generates.
    let increment = init
        .cookie_preservative()
        .map_or(Duration::ZERO, |p| min(p, options.max_cookie_life_increment));

    let cookie = StateCookie {
        created: ctx.now,
        lifespan: options.cookie_lifespan + increment,
        my_vtag: tags.my_vtag,
        peer_vtag: init.initiate_tag,
        my_ttag: tags.my_ttag,
        peer_ttag: tags.peer_ttag,
        my_initial_tsn: tags.initial_tsn,
        my_rwnd: local_rwnd(options),
        inbound_streams: min(options.announced_maximum_incoming_streams, init.nbr_outbound_streams),
        outbound_streams: min(options.announced_maximum_outgoing_streams, init.nbr_inbound_streams),
        peer_init: init.clone(),
    };

    let mut parameters = vec![Parameter::StateCookie(make_cookie(&cookie, ctx.cookie_key)?)];
    parameters.extend(local_address_parameters(options));
    if options.ecn_capable {
        parameters.push(Parameter::EcnCapable);
    }
    parameters.extend(unrecognized_parameters(&init.parameters));

    Ok(InitAckChunk {
        initiate_tag: tags.my_vtag,
        a_rwnd: cookie.my_rwnd,
        nbr_outbound_streams: options.announced_maximum_outgoing_streams,
        nbr_inbound_streams: options.announced_maximum_incoming_streams,
        initial_tsn: tags.initial_tsn,
        parameters,
    })
}

fn abort_to_source(vtag: u32, tag_reflected: bool, cause: ErrorCause) -> Command {
    Command::SendPacket(OutPacket {
        vtag,
        dest: Destination::Source,
        chunks: vec![Chunk::Abort(AbortChunk { tag_reflected, error_causes: vec![cause] })],
    })
}

/// Checks the mandatory fields of an INIT. Returns the decision to make if they are invalid.
fn validate_init(init: &InitChunk) -> Option<Decision> {
    // From <https://datatracker.ietf.org/doc/html/rfc9260#section-3.3.2>:
    //
    //   If the value of the Initiate Tag in a received INIT chunk is found to be 0, the receiver
    //   MUST silently discard the packet.
    if init.initiate_tag == 0 {
        return Some(Decision::discard_packet());
    }

    //   A receiver of an INIT chunk with the OS value set to 0 MUST discard the packet, SHOULD
    //   send a packet in response containing an ABORT chunk and using the Initiate Tag as the
    //   Verification Tag, MUST NOT change the state of any existing association.
    if init.nbr_outbound_streams == 0 || init.nbr_inbound_streams == 0 {
        warn!("INIT announces zero streams");
        return Some(Decision::new(
            Disposition::DiscardPacket,
            vec![abort_to_source(init.initiate_tag, false, ErrorCause::InvalidMandatoryParameter)],
        ));
    }
    None
}

fn reply_init_ack(ctx: &StateContext<'_>, init: &InitChunk, tags: InitAckTags) -> Decision {
    match make_init_ack(ctx, init, tags) {
        Ok(init_ack) => Decision::consume(vec![Command::SendPacket(OutPacket {
            vtag: init.initiate_tag,
            dest: Destination::Source,
            chunks: vec![Chunk::InitAck(init_ack)],
        })]),
        Err(_) => Decision::nomem(),
    }
}

/// The commands that bring an association into ESTABLISHED, and tell the upper layer.
fn enter_established(options: &Options) -> Vec<Command> {
    let mut commands = vec![
        Command::NewState(AssociationState::Established),
        Command::EventUlp(Notification::Connected),
        Command::HbTimersStart,
    ];
    if options.autoclose.is_some() {
        commands.push(Command::TimerStart(TimerId::Autoclose));
    }
    commands.push(Command::Transmit);
    commands
}

/// The ASSOCIATE primitive, in CLOSED.
pub(crate) fn associate(ctx: &StateContext<'_>, peer: SocketAddr) -> Decision {
    let assoc = Association::new_outbound(peer, ctx.options);
    let init = send_init(&assoc, ctx.options, None);
    Decision::consume(vec![
        Command::NewAssoc(Box::new(assoc)),
        Command::NewState(AssociationState::CookieWait),
        init,
        Command::TimerStart(TimerId::T1Init),
    ])
}

/// INIT without an association. Answered with an INIT-ACK carrying everything needed to create
/// the association later, without keeping any state now.
pub(crate) fn closed_init(ctx: &StateContext<'_>, init: &InitChunk) -> Decision {
    if let Some(decision) = validate_init(init) {
        return decision;
    }
    reply_init_ack(ctx, init, collision::init_ack_tags(None))
}

/// INIT for an association that already exists, either as a simultaneous open or because the peer
/// restarted.
pub(crate) fn unexpected_init(
    ctx: &StateContext<'_>,
    assoc: &Association,
    init: &InitChunk,
) -> Decision {
    if let Some(decision) = validate_init(init) {
        return decision;
    }

    // From <https://datatracker.ietf.org/doc/html/rfc9260#section-9.2>:
    //
    //   If an endpoint is in the SHUTDOWN-ACK-SENT state and receives an INIT chunk (e.g., if the
    //   SHUTDOWN COMPLETE chunk was lost) with source and destination transport addresses [...]
    //   equal to the current association, the endpoint SHOULD respond with a SHUTDOWN ACK
    //   chunk.
    if assoc.state == AssociationState::ShutdownAckSent {
        return Decision::consume(vec![
            Command::Reply(Chunk::ShutdownAck(ShutdownAckChunk)),
            Command::TimerRestart(TimerId::T2Shutdown),
        ]);
    }

    reply_init_ack(ctx, init, collision::init_ack_tags(Some(assoc)))
}

fn abort_init(abort: Command, reason: &str) -> Decision {
    warn!("Aborting handshake: {reason}");
    Decision::new(
        Disposition::Abort,
        vec![
            abort,
            Command::InitFailed(ErrorKind::ProtocolViolation, reason.to_string()),
            Command::DeleteTcb,
        ],
    )
}

/// INIT-ACK in COOKIE_WAIT.
pub(crate) fn init_ack(assoc: &Association, init_ack: &InitAckChunk) -> Decision {
    // From <https://datatracker.ietf.org/doc/html/rfc9260#section-3.3.3>:
    //
    //   If the value of the Initiate Tag in a received INIT ACK chunk is found to be 0, the
    //   receiver MUST destroy the association discarding its TCB. The receiver MAY send an ABORT
    //   chunk for debugging purpose.
    //
    // There is no peer tag to use, so the ABORT reflects the tag of the INIT-ACK.
    if init_ack.initiate_tag == 0 {
        return abort_init(
            abort_to_source(assoc.my_vtag, true, ErrorCause::InvalidMandatoryParameter),
            "INIT-ACK with zero tag",
        );
    }
    let peer_vtag = init_ack.initiate_tag;
    if init_ack.nbr_outbound_streams == 0 || init_ack.nbr_inbound_streams == 0 {
        return abort_init(
            abort_to_source(peer_vtag, false, ErrorCause::InvalidMandatoryParameter),
            "INIT-ACK announces zero streams",
        );
    }
    let Some(cookie) = init_ack.state_cookie() else {
        return abort_init(
            abort_to_source(
                peer_vtag,
                false,
                ErrorCause::MissingMandatoryParameter(vec![parameter::STATE_COOKIE]),
            ),
            "INIT-ACK without state cookie",
        );
    };

    Decision::consume(vec![
        Command::TimerStop(TimerId::T1Init),
        Command::PeerInit(PeerInit::from(init_ack)),
        Command::InitCounterReset,
        Command::Reply(Chunk::CookieEcho(CookieEchoChunk { cookie: cookie.to_vec() })),
        Command::TimerStart(TimerId::T1Cookie),
        Command::NewState(AssociationState::CookieEchoed),
    ])
}

/// COOKIE-ACK in COOKIE_ECHOED.
pub(crate) fn cookie_ack(ctx: &StateContext<'_>) -> Decision {
    let mut commands = vec![
        Command::TimerStop(TimerId::T1Cookie),
        Command::InitCounterReset,
        Command::CounterReset,
    ];
    commands.extend(enter_established(ctx.options));
    Decision::consume(commands)
}

/// Validates a received cookie. On failure, returns the decision to make instead.
fn unpack(ctx: &StateContext<'_>, echo: &CookieEchoChunk) -> Result<StateCookie, Decision> {
    let Some(packet) = ctx.packet else {
        return Err(Decision::bug());
    };
    match unpack_cookie(&echo.cookie, ctx.cookie_key, packet.verification_tag, ctx.now) {
        Ok(cookie) => Ok(cookie),
        Err(CookieError::Stale(staleness)) => {
            // From <https://datatracker.ietf.org/doc/html/rfc9260#section-5.1.5>:
            //
            //   If the State Cookie has expired, the receiver sends an ERROR chunk with a Stale
            //   Cookie error cause.
            let Some(vtag) = peer_vtag_of(&echo.cookie) else {
                return Err(Decision::discard_packet());
            };
            debug!("Stale cookie, expired {staleness:?} ago");
            Err(Decision::new(
                Disposition::DiscardPacket,
                vec![Command::SendPacket(OutPacket {
                    vtag,
                    dest: Destination::Source,
                    chunks: vec![Chunk::Error(ErrorChunk {
                        error_causes: vec![ErrorCause::StaleCookie(staleness)],
                    })],
                })],
            ))
        }
        Err(CookieError::NoMem) => Err(Decision::nomem()),
        Err(e) => {
            debug!("Dropping COOKIE-ECHO: {e}");
            Err(Decision::discard_packet())
        }
    }
}

/// COOKIE-ECHO without an association. A valid cookie creates it.
pub(crate) fn closed_cookie_echo(ctx: &StateContext<'_>, echo: &CookieEchoChunk) -> Decision {
    let cookie = match unpack(ctx, echo) {
        Ok(cookie) => cookie,
        Err(decision) => return decision,
    };
    let Some(packet) = ctx.packet else {
        return Decision::bug();
    };

    let assoc = Association::from_cookie(&cookie, packet.source, ctx.options);
    let mut commands = vec![
        Command::NewAssoc(Box::new(assoc)),
        Command::Reply(Chunk::CookieAck(CookieAckChunk)),
    ];
    commands.extend(enter_established(ctx.options));
    Decision::consume(commands)
}

/// COOKIE-ECHO for an association that already exists. See
/// <https://datatracker.ietf.org/doc/html/rfc9260#section-5.2.4>.
pub(crate) fn duplicate_cookie_echo(
    ctx: &StateContext<'_>,
    assoc: &Association,
    echo: &CookieEchoChunk,
) -> Decision {
    let cookie = match unpack(ctx, echo) {
        Ok(cookie) => cookie,
        Err(decision) => return decision,
    };
    let Some(packet) = ctx.packet else {
        return Decision::bug();
    };

    match collision::classify(Tags::from(assoc), Tags::from(&cookie)) {
        Collision::PeerRestarted if assoc.state == AssociationState::ShutdownAckSent => {
            // From <https://datatracker.ietf.org/doc/html/rfc9260#section-5.2.4>:
            //
            //   If the endpoint is in the SHUTDOWN-ACK-SENT state and recognizes that the peer
            //   has restarted (Action A), it MUST NOT set up a new association but instead resend
            //   the SHUTDOWN ACK and send an ERROR chunk with a "Cookie Received While Shutting
            //   Down" error cause to its peer.
            Decision::consume(vec![Command::SendPacket(OutPacket {
                vtag: cookie.peer_vtag,
                dest: Destination::Source,
                chunks: vec![
                    Chunk::ShutdownAck(ShutdownAckChunk),
                    Chunk::Error(ErrorChunk {
                        error_causes: vec![ErrorCause::CookieReceivedWhileShuttingDown],
                    }),
                ],
            })])
        }
        Collision::PeerRestarted => {
            debug!("Peer restarted association {}", assoc.id);
            let restarted = Association::from_cookie(&cookie, packet.source, ctx.options);
            let mut commands = vec![
                Command::PurgeOutqueue,
                Command::UpdateAssoc(Box::new(restarted)),
                Command::NewState(AssociationState::Established),
                Command::Reply(Chunk::CookieAck(CookieAckChunk)),
                Command::EventUlp(Notification::Restarted),
                Command::HbTimersStart,
            ];
            if ctx.options.autoclose.is_some() {
                commands.push(Command::TimerStart(TimerId::Autoclose));
            }
            Decision::consume(commands)
        }
        Collision::SimultaneousInit => {
            let updated = Association::from_cookie(&cookie, packet.source, ctx.options);
            let mut commands = vec![
                Command::UpdateAssoc(Box::new(updated)),
                Command::Reply(Chunk::CookieAck(CookieAckChunk)),
            ];
            if assoc.state == AssociationState::Established {
                commands.push(Command::NewState(AssociationState::Established));
                commands.push(Command::HbTimersStart);
            } else {
                commands.extend(enter_established(ctx.options));
            }
            Decision::consume(commands)
        }
        Collision::LateCookie => Decision::discard(),
        Collision::Duplicate => {
            let mut commands = vec![];
            if matches!(
                assoc.state,
                AssociationState::CookieWait | AssociationState::CookieEchoed
            ) {
                commands.push(Command::TimerStop(TimerId::T1Init));
                commands.push(Command::TimerStop(TimerId::T1Cookie));
                commands.extend(enter_established(ctx.options));
            }
            // The peer is still waiting for this, even if the association is already up.
            commands.push(Command::Reply(Chunk::CookieAck(CookieAckChunk)));
            Decision::consume(commands)
        }
        Collision::Unclassified => {
            warn!(
                "COOKIE-ECHO with unexpected tags for association {} ({:?} vs {:?})",
                assoc.id,
                Tags::from(assoc),
                Tags::from(&cookie)
            );
            Decision::discard()
        }
    }
}

/// T1-init expiry in COOKIE_WAIT.
pub(crate) fn t1_init_expired(ctx: &StateContext<'_>, assoc: &Association) -> Decision {
    if assoc.init_retries_exhausted(ctx.options) {
        return Decision::new(
            Disposition::DeleteTcb,
            vec![
                Command::InitFailed(ErrorKind::TooManyRetries, "No INIT-ACK received".to_string()),
                Command::DeleteTcb,
            ],
        );
    }
    Decision::consume(vec![
        Command::InitCounterInc,
        send_init(assoc, ctx.options, assoc.cookie_preserve),
        Command::TimerRestart(TimerId::T1Init),
    ])
}

/// T1-cookie expiry in COOKIE_ECHOED.
pub(crate) fn t1_cookie_expired(ctx: &StateContext<'_>, assoc: &Association) -> Decision {
    if assoc.init_retries_exhausted(ctx.options) {
        return Decision::new(
            Disposition::DeleteTcb,
            vec![
                Command::InitFailed(ErrorKind::TooManyRetries, "No COOKIE-ACK received".to_string()),
                Command::DeleteTcb,
            ],
        );
    }
    let Some(cookie) = &assoc.peer_cookie else {
        return Decision::bug();
    };
    Decision::consume(vec![
        Command::InitCounterInc,
        Command::Reply(Chunk::CookieEcho(CookieEchoChunk { cookie: cookie.clone() })),
        Command::TimerRestart(TimerId::T1Cookie),
    ])
}

/// ERROR in COOKIE_ECHOED, which is where a Stale Cookie error is expected.
pub(crate) fn error_in_cookie_echoed(
    ctx: &StateContext<'_>,
    assoc: &Association,
    error: &ErrorChunk,
) -> Decision {
    let staleness = error.error_causes.iter().find_map(|c| match c {
        ErrorCause::StaleCookie(staleness) => Some(*staleness),
        _ => None,
    });
    let Some(staleness) = staleness else {
        return crate::sm::abort::operation_error(error);
    };

    if assoc.init_retries_exhausted(ctx.options) {
        return Decision::new(
            Disposition::DeleteTcb,
            vec![
                Command::InitFailed(ErrorKind::TooManyRetries, "State cookie is stale".to_string()),
                Command::DeleteTcb,
            ],
        );
    }

    // From <https://datatracker.ietf.org/doc/html/rfc9260#section-5.2.6>:
    //
    //   Upon the reception of the ERROR chunk containing a "Stale Cookie" error cause, an endpoint
    //   MAY [...] go back to the COOKIE-WAIT state and send another INIT chunk with a "Suggested
    //   Cookie Life-Span Increment" parameter [...] When calculating the time extension, an
    //   implementation SHOULD use the RTT information measured based on the previous COOKIE
    //   ECHO / ERROR exchange, and SHOULD add no more than 1 second beyond the measured RTT.
    let preserve = min(staleness.saturating_mul(2), ctx.options.max_cookie_preservative);
    Decision::consume(vec![
        Command::TimerStop(TimerId::T1Cookie),
        Command::SetCookiePreserve(preserve),
        Command::InitCounterInc,
        Command::NewState(AssociationState::CookieWait),
        send_init(assoc, ctx.options, Some(preserve)),
        Command::TimerStart(TimerId::T1Init),
    ])
}
