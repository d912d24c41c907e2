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

//! The runtime around the decision layer. An [`Endpoint`] owns every association, finds the one
//! an incoming packet belongs to, feeds each chunk, timer expiry and primitive to
//! [`dispatch`], and has the [`Interpreter`] apply the resulting commands.

use crate::EventSink;
use crate::api::AssocId;
use crate::api::AssociationState;
use crate::api::AssociationStatus;
use crate::api::Message;
use crate::api::Options;
use crate::api::SctpEndpoint;
use crate::api::SendOptions;
use crate::api::SendStatus;
use crate::api::SocketEvent;
use crate::api::SocketTime;
use crate::association::state_cookie::COOKIE_KEY_SIZE;
use crate::endpoint::interpreter::Interpreter;
use crate::endpoint::interpreter::ReplyTo;
use crate::endpoint::registry::Registry;
use crate::events::Events;
use crate::events::LoggingEvents;
use crate::logging::log_packet;
use crate::math::round_down_to_4;
use crate::packet::chunk::Chunk;
use crate::packet::data::DATA_HEADER_SIZE;
use crate::packet::sctp_packet::COMMON_HEADER_SIZE;
use crate::packet::sctp_packet::SctpPacket;
use crate::sm::Disposition;
use crate::sm::Event;
use crate::sm::OtherEvent;
use crate::sm::PacketInfo;
use crate::sm::Primitive;
use crate::sm::StateContext;
use crate::sm::TimerId;
use crate::sm::dispatch::dispatch;
#[cfg(not(test))]
use log::debug;
#[cfg(not(test))]
use log::warn;
use rand::Rng;
use std::cell::RefCell;
use std::cmp::max;
use std::net::IpAddr;
use std::net::SocketAddr;
#[cfg(test)]
use std::println as debug;
#[cfg(test)]
use std::println as warn;
use std::rc::Rc;

pub(crate) mod interpreter;
pub(crate) mod registry;

#[cfg(test)]
mod endpoint_tests;

/// An SCTP endpoint: one local port, and any number of associations with peers.
pub struct Endpoint {
    name: String,
    now: Rc<RefCell<SocketTime>>,
    options: Options,
    cookie_key: [u8; COOKIE_KEY_SIZE],
    events: Rc<RefCell<dyn EventSink>>,
    registry: Registry,
}

impl Endpoint {
    /// Creates a new `Endpoint`.
    ///
    /// The provided `name` is only used for logging to identify this endpoint.
    pub fn new(name: &str, options: &Options) -> Self {
        let now = Rc::new(RefCell::new(SocketTime::zero()));
        let events: Rc<RefCell<Events>> = Rc::new(RefCell::new(Events::new()));
        let events: Rc<RefCell<dyn EventSink>> =
            Rc::new(RefCell::new(LoggingEvents::new(events, name.into(), Rc::clone(&now))));
        let mut cookie_key = [0; COOKIE_KEY_SIZE];
        rand::rng().fill(&mut cookie_key);
        Endpoint {
            name: name.into(),
            now,
            options: options.clone(),
            cookie_key,
            events,
            registry: Registry::new(),
        }
    }

    /// The largest message that fits in a single DATA chunk.
    fn max_message_size(&self) -> usize {
        round_down_to_4!(self.options.mtu).saturating_sub(COMMON_HEADER_SIZE + DATA_HEADER_SIZE)
    }

    /// Dispatches one event and applies the decision. Returns the association that remains
    /// current afterwards, and the disposition of the event.
    fn process(
        &mut self,
        id: Option<AssocId>,
        event: &Event<'_>,
        packet: Option<&PacketInfo<'_>>,
        timer: Option<TimerId>,
    ) -> (Option<AssocId>, Disposition) {
        let now = *self.now.borrow();
        let ctx = StateContext {
            now,
            options: &self.options,
            cookie_key: &self.cookie_key,
            assoc: id.and_then(|id| self.registry.get(id)),
            packet,
        };
        let decision = dispatch(&ctx, event);
        let disposition = decision.disposition;

        let reply_to = packet.map_or(ReplyTo::Primary, |p| ReplyTo::Source(p.source));
        let id = Interpreter::new(
            &self.name,
            now,
            &self.options,
            &self.events,
            &mut self.registry,
            reply_to,
        )
        .run(id, decision, timer);

        if let Some(id) = id.filter(|_| !matches!(event, Event::Other(_))) {
            self.check_pending_shutdown(id);
        }
        (id, disposition)
    }

    /// Once all outbound data has been acknowledged, a pending shutdown can proceed.
    fn check_pending_shutdown(&mut self, id: AssocId) {
        let ready = self.registry.get(id).is_some_and(|a| {
            matches!(a.state, AssociationState::ShutdownPending | AssociationState::ShutdownReceived)
                && a.outqueue.is_empty()
        });
        if ready {
            self.process(Some(id), &Event::Other(OtherEvent::NoPendingTsn), None, None);
        }
    }

    fn primitive(&mut self, id: Option<AssocId>, primitive: Primitive) -> (Option<AssocId>, Disposition) {
        self.process(id, &Event::Primitive(&primitive), None, None)
    }

    fn known(&self, id: AssocId) -> Option<AssocId> {
        self.registry.get(id).map(|a| a.id)
    }
}

impl SctpEndpoint for Endpoint {
    fn poll_event(&mut self) -> Option<SocketEvent> {
        self.events.borrow_mut().next_event()
    }

    fn handle_input(&mut self, source: IpAddr, packet: &[u8]) {
        self.handle_input_with_ecn(source, packet, false);
    }

    fn handle_input_with_ecn(&mut self, source: IpAddr, data: &[u8], congestion_experienced: bool) {
        let now = *self.now.borrow();
        log_packet(&self.name, now.into(), false, data);

        let packet = match SctpPacket::from_bytes(data, &self.options) {
            Ok(packet) => packet,
            Err(e) => {
                warn!("{}: dropping packet from {source}: {e}", self.name);
                return;
            }
        };
        let header = &packet.common_header;
        if header.destination_port != self.options.local_port {
            debug!("{}: dropping packet for port {}", self.name, header.destination_port);
            return;
        }

        let from = SocketAddr::new(source, header.source_port);
        let starts_handshake =
            matches!(packet.chunks.first(), Some(Chunk::Init(_) | Chunk::CookieEcho(_)));
        let mut id = self.registry.lookup(from, header.verification_tag, starts_handshake);
        let info = PacketInfo {
            source: from,
            verification_tag: header.verification_tag,
            ecn_ce: congestion_experienced,
            chunks: &packet.chunks,
        };
        for chunk in &packet.chunks {
            let (next, disposition) = self.process(id, &Event::Chunk(chunk), Some(&info), None);
            id = next;
            if disposition.ends_packet() {
                break;
            }
        }
    }

    fn advance_time(&mut self, now: SocketTime) {
        if now < *self.now.borrow() {
            // Time is not allowed to go backwards.
            return;
        }
        self.now.replace(now);
        for id in self.registry.ids() {
            let expired = match self.registry.get_mut(id) {
                Some(assoc) => assoc.expire_timers(now),
                None => continue,
            };
            for timer in expired {
                if self.known(id).is_none() {
                    break;
                }
                self.process(Some(id), &Event::Timeout(timer), None, Some(timer));
            }
        }
    }

    fn poll_timeout(&self) -> SocketTime {
        let now = *self.now.borrow();
        self.registry
            .iter()
            .filter_map(|a| a.next_timeout())
            .min()
            .map_or(SocketTime::infinite_future(), |t| max(t, now))
    }

    fn associate(&mut self, peer: SocketAddr) -> AssocId {
        let existing = self.registry.by_address(peer);
        let (id, _) = self.primitive(existing, Primitive::Associate(peer));
        id.unwrap_or(AssocId(0))
    }

    fn shutdown(&mut self, id: AssocId) {
        if self.known(id).is_none() {
            warn!("{}: shutdown of unknown association {id}", self.name);
            return;
        }
        self.primitive(Some(id), Primitive::Shutdown);
    }

    fn abort(&mut self, id: AssocId, reason: &str) {
        if self.known(id).is_none() {
            warn!("{}: abort of unknown association {id}", self.name);
            return;
        }
        self.primitive(Some(id), Primitive::Abort(reason.into()));
    }

    fn send(&mut self, id: AssocId, message: Message, send_options: &SendOptions) -> SendStatus {
        if message.payload.is_empty() {
            return SendStatus::ErrorMessageEmpty;
        }
        if message.payload.len() > self.max_message_size() {
            return SendStatus::ErrorMessageTooLarge;
        }
        if self.known(id).is_none() {
            return SendStatus::ErrorNotConnected;
        }
        match self.primitive(Some(id), Primitive::Send(message, send_options.unordered)) {
            (_, Disposition::Consume) => SendStatus::Success,
            _ => SendStatus::ErrorShuttingDown,
        }
    }

    fn request_heartbeat(&mut self, id: AssocId, address: SocketAddr) -> bool {
        if self.known(id).is_none() {
            return false;
        }
        let (_, disposition) = self.primitive(Some(id), Primitive::RequestHeartbeat(address));
        disposition == Disposition::Consume
    }

    fn state(&self, id: AssocId) -> AssociationState {
        self.registry.get(id).map_or(AssociationState::Closed, |a| a.state)
    }

    fn status(&self, id: AssocId) -> Option<AssociationStatus> {
        self.registry.get(id).map(|a| a.status())
    }

    fn association_count(&self) -> usize {
        self.registry.len()
    }
}
