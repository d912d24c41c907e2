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

//! The association record (transmission control block) and the structures it owns.

use crate::api::AssocId;
use crate::api::AssociationState;
use crate::api::AssociationStatus;
use crate::api::Options;
use crate::api::SocketTime;
use crate::association::outqueue::OutQueue;
use crate::association::state_cookie::StateCookie;
use crate::association::transport::Transport;
use crate::association::tsn_map::TsnMap;
use crate::packet::handshake::InitAckChunk;
use crate::packet::handshake::InitChunk;
use crate::sm::TimerId;
use crate::timer::BackoffAlgorithm;
use crate::timer::Timer;
use crate::types::Tsn;
use std::cmp::min;
use std::fmt;
use std::net::IpAddr;
use std::net::SocketAddr;
use std::time::Duration;

pub(crate) mod outqueue;
pub(crate) mod state_cookie;
pub(crate) mod transport;
pub(crate) mod tsn_map;

const MIN_VERIFICATION_TAG: u32 = 1;
const MAX_VERIFICATION_TAG: u32 = u32::MAX;

pub(crate) fn new_verification_tag() -> u32 {
    fastrand::u32(MIN_VERIFICATION_TAG..=MAX_VERIFICATION_TAG)
}

pub(crate) fn new_initial_tsn() -> Tsn {
    Tsn(fastrand::u32(..))
}

/// The receiver window announced in INIT and INIT-ACK.
pub(crate) fn local_rwnd(options: &Options) -> u32 {
    u32::try_from(options.max_receiver_window_buffer_size).unwrap_or(u32::MAX)
}

/// What the peer announced in its INIT or INIT-ACK chunk.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct PeerInit {
    pub initiate_tag: u32,
    pub a_rwnd: u32,
    pub nbr_outbound_streams: u16,
    pub nbr_inbound_streams: u16,
    pub initial_tsn: Tsn,
    pub addresses: Vec<IpAddr>,
    pub ecn_capable: bool,

    /// Only present in an INIT-ACK.
    pub cookie: Option<Vec<u8>>,
}

impl From<&InitChunk> for PeerInit {
    fn from(init: &InitChunk) -> Self {
        Self {
            initiate_tag: init.initiate_tag,
            a_rwnd: init.a_rwnd,
            nbr_outbound_streams: init.nbr_outbound_streams,
            nbr_inbound_streams: init.nbr_inbound_streams,
            initial_tsn: init.initial_tsn,
            addresses: init.addresses().collect(),
            ecn_capable: init.ecn_capable(),
            cookie: None,
        }
    }
}

impl From<&InitAckChunk> for PeerInit {
    fn from(init_ack: &InitAckChunk) -> Self {
        Self {
            initiate_tag: init_ack.initiate_tag,
            a_rwnd: init_ack.a_rwnd,
            nbr_outbound_streams: init_ack.nbr_outbound_streams,
            nbr_inbound_streams: init_ack.nbr_inbound_streams,
            initial_tsn: init_ack.initial_tsn,
            addresses: init_ack.addresses().collect(),
            ecn_capable: init_ack.ecn_capable(),
            cookie: init_ack.state_cookie().map(<[u8]>::to_vec),
        }
    }
}

/// Per-peer protocol state, also known as the Transmission Control Block (TCB).
///
/// State functions only ever see a shared reference. All mutation goes through the command
/// interpreter of the endpoint.
pub(crate) struct Association {
    pub id: AssocId,
    pub state: AssociationState,

    pub my_vtag: u32,
    pub peer_vtag: u32,

    /// Verification tags of a previous incarnation, only set during collision windows.
    pub my_ttag: u32,
    pub peer_ttag: u32,

    pub peer_port: u16,

    pub initial_tsn: Tsn,
    pub peer_initial_tsn: Tsn,
    pub tsn_map: TsnMap,
    pub outqueue: OutQueue,

    pub inbound_streams: u16,
    pub outbound_streams: u16,
    pub peer_rwnd: u32,
    pub my_rwnd: u32,
    pub ecn_capable: bool,

    /// Consecutive timeouts and unanswered heartbeats, over all paths.
    pub overall_error_count: u32,
    pub init_retries: u32,

    pub t1_init: Timer,
    pub t1_cookie: Timer,
    pub t2_shutdown: Timer,
    pub t3_rtx: Timer,
    pub sack_timer: Timer,
    pub autoclose: Timer,

    pub transports: Vec<Transport>,
    pub primary: usize,

    /// The highest TSN received in a packet marked with Congestion Experienced, and whether it
    /// still needs to be echoed in an ECNE chunk.
    pub last_ecne_tsn: Tsn,
    pub need_ecne: bool,
    pub last_cwr_tsn: Tsn,

    /// Lifespan increment to ask for in the next INIT, after a stale cookie.
    pub cookie_preserve: Option<Duration>,

    /// The cookie received in the INIT-ACK, kept to retransmit COOKIE-ECHO.
    pub peer_cookie: Option<Vec<u8>>,
    pub data_since_sack: u32,
}

impl fmt::Debug for Association {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Association")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("my_vtag", &format_args!("{:#010x}", self.my_vtag))
            .field("peer_vtag", &format_args!("{:#010x}", self.peer_vtag))
            .field("primary", &self.primary_address())
            .finish_non_exhaustive()
    }
}

impl Association {
    fn new(peer: SocketAddr, my_vtag: u32, initial_tsn: Tsn, options: &Options) -> Self {
        let rto_timer =
            || Timer::new(options.rto_initial, BackoffAlgorithm::Exponential, Some(options.rto_max));
        Self {
            id: AssocId(0),
            state: AssociationState::Closed,
            my_vtag,
            peer_vtag: 0,
            my_ttag: 0,
            peer_ttag: 0,
            peer_port: peer.port(),
            initial_tsn,
            peer_initial_tsn: Tsn(0),
            tsn_map: TsnMap::new(Tsn(0)),
            outqueue: OutQueue::new(initial_tsn),
            inbound_streams: options.announced_maximum_incoming_streams,
            outbound_streams: options.announced_maximum_outgoing_streams,
            peer_rwnd: 0,
            my_rwnd: local_rwnd(options),
            ecn_capable: false,
            overall_error_count: 0,
            init_retries: 0,
            t1_init: Timer::new(
                options.t1_init_timeout,
                BackoffAlgorithm::Exponential,
                options.max_timer_backoff_duration,
            ),
            t1_cookie: Timer::new(
                options.t1_cookie_timeout,
                BackoffAlgorithm::Exponential,
                options.max_timer_backoff_duration,
            ),
            t2_shutdown: rto_timer(),
            t3_rtx: rto_timer(),
            sack_timer: Timer::new(options.delayed_ack_max_timeout, BackoffAlgorithm::Fixed, None),
            autoclose: Timer::new(
                options.autoclose.unwrap_or(Duration::ZERO),
                BackoffAlgorithm::Fixed,
                None,
            ),
            transports: vec![Transport::new(peer, options)],
            primary: 0,
            last_ecne_tsn: Tsn(0),
            need_ecne: false,
            last_cwr_tsn: initial_tsn - 1,
            cookie_preserve: None,
            peer_cookie: None,
            data_since_sack: 0,
        }
    }

    /// An association that this endpoint is about to initiate towards `peer`.
    pub fn new_outbound(peer: SocketAddr, options: &Options) -> Self {
        Self::new(peer, new_verification_tag(), new_initial_tsn(), options)
    }

    /// An association built from a validated state cookie, received from `source`.
    pub fn from_cookie(cookie: &StateCookie, source: SocketAddr, options: &Options) -> Self {
        let mut assoc = Self::new(source, cookie.my_vtag, cookie.my_initial_tsn, options);
        assoc.my_ttag = cookie.my_ttag;
        assoc.peer_ttag = cookie.peer_ttag;
        assoc.my_rwnd = cookie.my_rwnd;
        assoc.apply_peer_init(&PeerInit::from(&cookie.peer_init), options);
        assoc.inbound_streams = cookie.inbound_streams;
        assoc.outbound_streams = cookie.outbound_streams;
        assoc
    }

    /// Adopts the parameters that the peer announced in its INIT or INIT-ACK.
    pub fn apply_peer_init(&mut self, init: &PeerInit, options: &Options) {
        self.peer_vtag = init.initiate_tag;
        self.peer_initial_tsn = init.initial_tsn;
        self.tsn_map = TsnMap::new(init.initial_tsn);
        self.peer_rwnd = init.a_rwnd;
        self.inbound_streams = min(options.announced_maximum_incoming_streams, init.nbr_outbound_streams);
        self.outbound_streams = min(options.announced_maximum_outgoing_streams, init.nbr_inbound_streams);
        self.ecn_capable = options.ecn_capable && init.ecn_capable;
        self.last_ecne_tsn = init.initial_tsn - 1;
        for ip in &init.addresses {
            let address = SocketAddr::new(*ip, self.peer_port);
            if self.transport_index(address).is_none() {
                self.transports.push(Transport::new(address, options));
            }
        }
        if init.cookie.is_some() {
            self.peer_cookie = init.cookie.clone();
        }
    }

    /// Replaces this incarnation with `new`, as decided by collision resolution. The identifier is
    /// kept, and so are messages that haven't been sent yet.
    pub fn replace_incarnation(&mut self, mut new: Association) {
        new.id = self.id;
        for (message, unordered) in self.outqueue.take_pending() {
            new.outqueue.push(message, unordered);
        }
        *self = new;
    }

    pub fn primary_transport(&self) -> &Transport {
        &self.transports[self.primary]
    }

    pub fn primary_address(&self) -> SocketAddr {
        self.primary_transport().address
    }

    pub fn transport_index(&self, address: SocketAddr) -> Option<usize> {
        self.transports.iter().position(|t| t.address == address)
    }

    /// True when the overall error counter has reached `Association.Max.Retrans`, so that the next
    /// failure ends the association.
    pub fn error_threshold_reached(&self, options: &Options) -> bool {
        options.max_retransmissions.is_some_and(|max| self.overall_error_count >= max)
    }

    pub fn init_retries_exhausted(&self, options: &Options) -> bool {
        options.max_init_retransmits.is_some_and(|max| self.init_retries >= max)
    }

    pub fn timer(&self, id: TimerId) -> Option<&Timer> {
        match id {
            TimerId::T1Init => Some(&self.t1_init),
            TimerId::T1Cookie => Some(&self.t1_cookie),
            TimerId::T2Shutdown => Some(&self.t2_shutdown),
            TimerId::T3Rtx => Some(&self.t3_rtx),
            TimerId::Sack => Some(&self.sack_timer),
            TimerId::Autoclose => Some(&self.autoclose),
            TimerId::Heartbeat(idx) => self.transports.get(idx).map(|t| &t.hb_timer),
        }
    }

    pub fn timer_mut(&mut self, id: TimerId) -> Option<&mut Timer> {
        match id {
            TimerId::T1Init => Some(&mut self.t1_init),
            TimerId::T1Cookie => Some(&mut self.t1_cookie),
            TimerId::T2Shutdown => Some(&mut self.t2_shutdown),
            TimerId::T3Rtx => Some(&mut self.t3_rtx),
            TimerId::Sack => Some(&mut self.sack_timer),
            TimerId::Autoclose => Some(&mut self.autoclose),
            TimerId::Heartbeat(idx) => self.transports.get_mut(idx).map(|t| &mut t.hb_timer),
        }
    }

    /// The base duration of a timer, given what is currently known about the paths.
    pub fn timer_duration(&self, id: TimerId, options: &Options) -> Duration {
        let rto = self.primary_transport().rto.rto();
        match id {
            TimerId::T1Init => options.t1_init_timeout,
            TimerId::T1Cookie => options.t1_cookie_timeout,
            TimerId::T2Shutdown => min(rto, options.t2_shutdown_timeout),
            TimerId::T3Rtx => rto,
            TimerId::Sack => min(rto / 2, options.delayed_ack_max_timeout),
            TimerId::Autoclose => options.autoclose.unwrap_or(Duration::ZERO),
            TimerId::Heartbeat(idx) => {
                self.transports.get(idx).map_or(Duration::ZERO, |t| t.heartbeat_interval(options))
            }
        }
    }

    fn timer_ids(&self) -> impl Iterator<Item = TimerId> + use<> {
        [
            TimerId::T1Init,
            TimerId::T1Cookie,
            TimerId::T2Shutdown,
            TimerId::T3Rtx,
            TimerId::Sack,
            TimerId::Autoclose,
        ]
        .into_iter()
        .chain((0..self.transports.len()).map(TimerId::Heartbeat))
    }

    pub fn next_timeout(&self) -> Option<SocketTime> {
        self.timer_ids().filter_map(|id| self.timer(id)?.next_expiry()).min()
    }

    /// Returns the timers whose deadline has been reached, which are stopped as a result.
    pub fn expire_timers(&mut self, now: SocketTime) -> Vec<TimerId> {
        let ids: Vec<TimerId> = self.timer_ids().collect();
        ids.into_iter().filter(|id| self.timer_mut(*id).is_some_and(|t| t.fire(now))).collect()
    }

    pub fn stop_all_timers(&mut self) {
        let ids: Vec<TimerId> = self.timer_ids().collect();
        for id in ids {
            if let Some(t) = self.timer_mut(id) {
                t.stop();
            }
        }
    }

    pub fn status(&self) -> AssociationStatus {
        AssociationStatus {
            state: self.state,
            primary_path: self.primary_address(),
            paths: self.transports.iter().map(|t| (t.address, t.state)).collect(),
            srtt: self.primary_transport().rto.srtt(),
            peer_rwnd_bytes: self.peer_rwnd,
            unack_data_count: self.outqueue.outstanding_count(),
            pending_data_count: self.outqueue.pending_count(),
            negotiated_maximum_incoming_streams: self.inbound_streams,
            negotiated_maximum_outgoing_streams: self.outbound_streams,
            ecn_capable: self.ecn_capable,
        }
    }
}
