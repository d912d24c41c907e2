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

//! Applies the commands of a [`Decision`] to the association record and turns them into
//! [`SocketEvent`]s. This is the only place where an association is mutated after creation.

use crate::EventSink;
use crate::api::AssocId;
use crate::api::Message;
use crate::api::Options;
use crate::api::PathState;
use crate::api::SocketEvent;
use crate::api::SocketTime;
use crate::association::Association;
use crate::endpoint::registry::Registry;
use crate::packet::AsSerializableTlv;
use crate::packet::chunk::Chunk;
use crate::packet::control::EcneChunk;
use crate::packet::sctp_packet::SctpPacketBuilder;
use crate::packet::teardown::ShutdownChunk;
use crate::sm::Command;
use crate::sm::Decision;
use crate::sm::Disposition;
use crate::sm::TimerId;
use crate::sm::command::Destination;
use crate::sm::command::Notification;
use crate::sm::command::OutPacket;
#[cfg(not(test))]
use log::debug;
#[cfg(not(test))]
use log::error;
#[cfg(not(test))]
use log::info;
use std::cell::RefCell;
use std::net::SocketAddr;
#[cfg(test)]
use std::println as debug;
#[cfg(test)]
use std::println as error;
#[cfg(test)]
use std::println as info;

/// A SACK is sent right away for every second DATA chunk.
const SACK_EVERY_N_CHUNKS: u32 = 2;

/// Where the chunks queued with [`Command::Reply`] go.
#[derive(Clone, Copy, Debug)]
pub(crate) enum ReplyTo {
    /// The source of the packet being processed.
    Source(SocketAddr),
    /// The primary path, for timer expiries and primitives.
    Primary,
}

/// Serializes `chunks` into as few packets as the MTU allows and emits them.
fn emit_packets(
    events: &RefCell<dyn EventSink>,
    options: &Options,
    dest: SocketAddr,
    vtag: u32,
    chunks: impl IntoIterator<Item = Chunk>,
) {
    let mut builder = SctpPacketBuilder::new(vtag, options.local_port, dest.port(), options.mtu);
    for chunk in chunks {
        let size = chunk.as_serializable().serialized_size();
        if !builder.is_empty() && size > builder.bytes_remaining() {
            events.borrow_mut().add(SocketEvent::SendPacket(dest, builder.build()));
        }
        builder.add(&chunk);
    }
    if !builder.is_empty() {
        events.borrow_mut().add(SocketEvent::SendPacket(dest, builder.build()));
    }
}

fn notification_event(id: AssocId, notification: Notification) -> SocketEvent {
    match notification {
        Notification::Connected => SocketEvent::OnConnected(id),
        Notification::Restarted => SocketEvent::OnConnectionRestarted(id),
        Notification::Closed => SocketEvent::OnClosed(id),
        Notification::Error(kind, reason) => SocketEvent::OnError(id, kind, reason),
        Notification::PathStateChanged(address, state) => {
            SocketEvent::OnPathStateChanged(id, address, state)
        }
    }
}

pub(crate) struct Interpreter<'a> {
    name: &'a str,
    now: SocketTime,
    options: &'a Options,
    events: &'a RefCell<dyn EventSink>,
    registry: &'a mut Registry,
    reply_to: ReplyTo,
    replies: Vec<Chunk>,
}

impl<'a> Interpreter<'a> {
    pub fn new(
        name: &'a str,
        now: SocketTime,
        options: &'a Options,
        events: &'a RefCell<dyn EventSink>,
        registry: &'a mut Registry,
        reply_to: ReplyTo,
    ) -> Self {
        Self { name, now, options, events, registry, reply_to, replies: vec![] }
    }

    /// Applies `decision` to the association `id`, or to no association when `id` is `None`.
    /// `timer` is the timer whose expiry led to the decision, if any.
    ///
    /// Returns the association that the next chunk of the same packet should be processed
    /// against: one may have been created, or deleted.
    pub fn run(
        &mut self,
        mut id: Option<AssocId>,
        decision: Decision,
        timer: Option<TimerId>,
    ) -> Option<AssocId> {
        if decision.disposition == Disposition::Nomem {
            if let (Some(timer), Some(assoc)) = (timer, id.and_then(|id| self.registry.get_mut(id)))
            {
                if let Some(t) = assoc.timer_mut(timer) {
                    t.rearm_at(self.now);
                }
            }
            return id;
        }

        for command in decision.commands {
            match command {
                Command::NewAssoc(assoc) => {
                    let new_id = self.registry.insert(*assoc);
                    info!("{}: created association {new_id}", self.name);
                    id = Some(new_id);
                }
                Command::SendPacket(packet) => {
                    self.flush(id);
                    self.send_packet(id, packet);
                }
                Command::Reply(chunk) => self.replies.push(chunk),
                Command::DeleteTcb => {
                    self.flush(id);
                    if let Some(old) = id.and_then(|id| self.registry.remove(id)) {
                        info!("{}: deleted association {}", self.name, old.id);
                    }
                    return None;
                }
                Command::Transmit | Command::Retransmit => {
                    self.flush(id);
                    self.apply(id, command);
                }
                command => self.apply(id, command),
            }
        }
        self.flush(id);
        id
    }

    /// Sends the chunks queued with [`Command::Reply`] as one packet.
    fn flush(&mut self, id: Option<AssocId>) {
        if self.replies.is_empty() {
            return;
        }
        let replies = std::mem::take(&mut self.replies);
        let Some(assoc) = id.and_then(|id| self.registry.get(id)) else {
            error!("{}: dropping {} reply chunks without an association", self.name, replies.len());
            return;
        };
        let dest = match self.reply_to {
            ReplyTo::Source(source) => source,
            ReplyTo::Primary => assoc.primary_address(),
        };
        emit_packets(self.events, self.options, dest, assoc.peer_vtag, replies);
    }

    fn send_packet(&mut self, id: Option<AssocId>, packet: OutPacket) {
        let assoc = id.and_then(|id| self.registry.get(id));
        let dest = match (packet.dest, self.reply_to, assoc) {
            (Destination::Address(address), _, _) => address,
            (Destination::Source, ReplyTo::Source(source), _) => source,
            (Destination::Source | Destination::Primary, _, Some(assoc)) => assoc.primary_address(),
            (_, _, None) => {
                error!("{}: no destination for packet {:?}", self.name, packet.chunks);
                return;
            }
        };
        emit_packets(self.events, self.options, dest, packet.vtag, packet.chunks);
    }

    /// Applies a command that acts on the current association.
    fn apply(&mut self, id: Option<AssocId>, command: Command) {
        let Some(id) = id else {
            error!("{}: {command} without an association", self.name);
            return;
        };
        let Some(assoc) = self.registry.get_mut(id) else {
            error!("{}: {command} for unknown association {id}", self.name);
            return;
        };
        let now = self.now;
        let options = self.options;

        match command {
            Command::UpdateAssoc(new) => {
                assoc.replace_incarnation(*new);
                info!("{}: {id} replaced by a new incarnation", self.name);
                self.registry.reindex(id);
            }
            Command::NewState(state) => {
                info!("{}: {id} {} -> {state}", self.name, assoc.state);
                assoc.state = state;
            }
            Command::PeerInit(init) => {
                assoc.apply_peer_init(&init, options);
                self.registry.reindex(id);
            }

            Command::TimerStart(timer) => {
                let duration = assoc.timer_duration(timer, options);
                if let Some(t) = assoc.timer_mut(timer) {
                    t.set_duration(duration);
                    t.start(now);
                }
            }
            Command::TimerRestart(timer) => {
                let duration = assoc.timer_duration(timer, options);
                if let Some(t) = assoc.timer_mut(timer) {
                    t.set_duration(duration);
                    t.restart(now);
                }
            }
            Command::TimerStop(timer) => {
                if let Some(t) = assoc.timer_mut(timer) {
                    t.stop();
                }
            }
            Command::HbTimersStart => {
                for t in assoc.transports.iter_mut() {
                    t.hb_timer.set_duration(t.heartbeat_interval(options));
                    t.hb_timer.start(now);
                }
            }

            Command::EventUlp(notification) => {
                self.events.borrow_mut().add(notification_event(id, notification));
            }
            Command::ChunkUlp(data) => {
                self.events.borrow_mut().add(SocketEvent::OnMessage(
                    id,
                    Message::new(data.stream_id, data.ppid, data.payload),
                ));
            }
            Command::ReportError(kind, reason) => {
                self.events.borrow_mut().add(SocketEvent::OnError(id, kind, reason));
            }
            Command::InitFailed(kind, reason) | Command::AssocFailed(kind, reason) => {
                self.events.borrow_mut().add(SocketEvent::OnAborted(id, kind, reason));
            }

            Command::ProcessSack(sack) => {
                let ack = assoc.outqueue.handle_sack(now, sack.cumulative_tsn_ack, &sack.gap_ack_blocks);
                assoc.peer_rwnd = sack.a_rwnd;
                if ack.newly_acked {
                    assoc.overall_error_count = 0;
                    let primary = assoc.primary;
                    assoc.transports[primary].error_count = 0;
                }
                if let Some(rtt) = ack.rtt {
                    let primary = assoc.primary;
                    assoc.transports[primary].rto.observe_rto(rtt);
                }
                update_t3_rtx(assoc, now, options, ack.newly_acked);
            }
            Command::ProcessCtsn(tsn) => {
                let ack = assoc.outqueue.handle_cum_ack(now, tsn);
                update_t3_rtx(assoc, now, options, ack.newly_acked);
            }
            Command::GenSack { force } => {
                let immediate = force
                    || assoc.data_since_sack + 1 >= SACK_EVERY_N_CHUNKS
                    || assoc.tsn_map.has_gaps();
                if immediate {
                    self.replies.push(Chunk::Sack(assoc.tsn_map.create_sack(assoc.my_rwnd)));
                    if assoc.need_ecne {
                        self.replies.push(Chunk::Ecne(EcneChunk { lowest_tsn: assoc.last_ecne_tsn }));
                    }
                    assoc.data_since_sack = 0;
                    assoc.sack_timer.stop();
                } else {
                    assoc.data_since_sack += 1;
                    if !assoc.sack_timer.is_running() {
                        let duration = assoc.timer_duration(TimerId::Sack, options);
                        assoc.sack_timer.set_duration(duration);
                        assoc.sack_timer.start(now);
                    }
                }
            }
            Command::GenShutdown => {
                self.replies.push(Chunk::Shutdown(ShutdownChunk {
                    cumulative_tsn_ack: assoc.tsn_map.cumulative_tsn(),
                }));
            }

            Command::QueueData(message, unordered) => assoc.outqueue.push(message, unordered),
            Command::Transmit => {
                let chunks = assoc.outqueue.produce(now, assoc.peer_rwnd);
                if !chunks.is_empty() {
                    debug!("{}: {id} sending {} DATA chunks", self.name, chunks.len());
                    emit_packets(
                        self.events,
                        options,
                        assoc.primary_address(),
                        assoc.peer_vtag,
                        chunks.into_iter().map(Chunk::Data),
                    );
                    if !assoc.t3_rtx.is_running() {
                        let duration = assoc.timer_duration(TimerId::T3Rtx, options);
                        assoc.t3_rtx.set_duration(duration);
                        assoc.t3_rtx.start(now);
                    }
                }
            }
            Command::Retransmit => {
                let chunks = assoc.outqueue.retransmit(now);
                debug!("{}: {id} retransmitting {} DATA chunks", self.name, chunks.len());
                emit_packets(
                    self.events,
                    options,
                    assoc.primary_address(),
                    assoc.peer_vtag,
                    chunks.into_iter().map(Chunk::Data),
                );
            }
            Command::ReportTsn(tsn) => {
                assoc.tsn_map.mark(tsn);
            }
            Command::PurgeOutqueue => {
                assoc.outqueue.purge();
                assoc.t3_rtx.stop();
            }

            Command::EcnCe(tsn) => {
                if tsn > assoc.last_ecne_tsn {
                    assoc.last_ecne_tsn = tsn;
                }
                assoc.need_ecne = true;
            }
            Command::EcnEcne(_) => {
                // The congestion window isn't modelled. What remains is the TSN that the CWR
                // covers, so that further ECNEs for the same window are ignored.
                assoc.last_cwr_tsn = assoc.outqueue.next_tsn() - 1;
            }
            Command::EcnCwr(_) => assoc.need_ecne = false,

            Command::CounterReset => assoc.overall_error_count = 0,
            Command::InitCounterInc => assoc.init_retries += 1,
            Command::InitCounterReset => assoc.init_retries = 0,
            Command::Strike(idx) => strike(assoc, idx, options),
            Command::TransportOn(idx, rtt) => {
                if let Some(t) = assoc.transports.get_mut(idx) {
                    t.state = PathState::Active;
                    t.error_count = 0;
                    t.hb_pending = None;
                    if let Some(rtt) = rtt {
                        t.rto.observe_rto(rtt);
                    }
                }
            }
            Command::HbSent(idx, nonce) => {
                if let Some(t) = assoc.transports.get_mut(idx) {
                    t.hb_pending = Some(nonce);
                    t.last_hb_sent = Some(now);
                }
            }
            Command::SetCookiePreserve(preserve) => assoc.cookie_preserve = Some(preserve),

            Command::NewAssoc(_) | Command::DeleteTcb | Command::Reply(_) | Command::SendPacket(_) => {
                error!("{}: {command} can't be applied to {id}", self.name);
            }
        }
    }
}

/// T3-rtx runs while data is outstanding, and is restarted when the earliest outstanding chunk
/// is acknowledged.
fn update_t3_rtx(assoc: &mut Association, now: SocketTime, options: &Options, newly_acked: bool) {
    if !assoc.outqueue.has_outstanding() {
        assoc.t3_rtx.stop();
    } else if newly_acked || !assoc.t3_rtx.is_running() {
        let duration = assoc.timer_duration(TimerId::T3Rtx, options);
        assoc.t3_rtx.set_duration(duration);
        assoc.t3_rtx.start(now);
    }
}

/// Counts a failure on the path `idx`. A path that fails too often is marked unreachable, and if
/// it was the primary, another reachable path takes over.
fn strike(assoc: &mut Association, idx: usize, options: &Options) {
    assoc.overall_error_count += 1;
    let Some(t) = assoc.transports.get_mut(idx) else {
        return;
    };
    t.error_count += 1;
    if t.error_count > options.path_max_retransmissions && t.is_active() {
        t.state = PathState::Inactive;
        if idx == assoc.primary {
            if let Some(next) = assoc.transports.iter().position(|t| t.is_active()) {
                assoc.primary = next;
            }
        }
    }
}
