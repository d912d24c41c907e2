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

use std::fmt;
use std::net::IpAddr;
use std::net::SocketAddr;
use std::ops::Add;
use std::ops::Sub;
use std::time::Duration;

pub use crate::endpoint::Endpoint;

/// Represents a point in time relative to the creation of the endpoint.
///
/// This is an absolute timestamp within the "Endpoint Epoch".
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct SocketTime(Duration);

impl SocketTime {
    /// The moment the endpoint was created (t=0).
    pub const fn zero() -> SocketTime {
        SocketTime(Duration::ZERO)
    }

    pub const fn infinite_future() -> SocketTime {
        SocketTime(Duration::MAX)
    }

    /// Returns the time since `earlier`, or zero if `earlier` is in the future.
    pub fn saturating_duration_since(self, earlier: SocketTime) -> Duration {
        self.0.saturating_sub(earlier.0)
    }
}

impl Add<Duration> for SocketTime {
    type Output = SocketTime;
    fn add(self, rhs: Duration) -> SocketTime {
        SocketTime(self.0.saturating_add(rhs))
    }
}

impl Sub<Duration> for SocketTime {
    type Output = SocketTime;
    fn sub(self, rhs: Duration) -> SocketTime {
        SocketTime(self.0.saturating_sub(rhs))
    }
}

impl Sub<SocketTime> for SocketTime {
    type Output = Duration;
    fn sub(self, rhs: SocketTime) -> Duration {
        self.0 - rhs.0
    }
}

impl From<Duration> for SocketTime {
    fn from(value: Duration) -> Self {
        SocketTime(value)
    }
}

impl From<SocketTime> for Duration {
    fn from(value: SocketTime) -> Self {
        value.0
    }
}

/// Identifies an association within an [`Endpoint`]. It stays the same for the lifetime of the
/// association, including when the peer restarts it.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct AssocId(pub u32);

impl fmt::Debug for AssocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for AssocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Stream Identifier
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct StreamId(pub u16);

impl fmt::Debug for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Payload Protocol Identifier (PPID)
#[derive(Clone, Copy, Eq, Hash, PartialEq)]
pub struct PpId(pub u32);

impl fmt::Debug for PpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
impl fmt::Display for PpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Send options for sending messages.
#[derive(Default)]
pub struct SendOptions {
    /// If the message should be sent with unordered message delivery.
    pub unordered: bool,
}

/// An SCTP message is a group of bytes sent and received as a whole on a specified stream
/// identifier (`stream_id`), and with a payload protocol identifier (`ppid`).
///
/// Messages are carried in a single DATA chunk each and are never fragmented, so a message must
/// fit within the MTU.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    /// The stream identifier to which the message is sent.
    pub stream_id: StreamId,

    /// The payload protocol identifier (ppid) associated with the message.
    pub ppid: PpId,

    /// The payload of the message.
    pub payload: Vec<u8>,
}

impl Message {
    /// Creates a new `Message`.
    pub fn new(stream_id: StreamId, ppid: PpId, payload: Vec<u8>) -> Self {
        Message { stream_id, ppid, payload }
    }
}

/// Represents the category of an error that has occurred.
///
/// This enum is used in [`SocketEvent::OnError`] and [`SocketEvent::OnAborted`] to provide
/// information about the nature of the error.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ErrorKind {
    /// Indicates that no error has occurred. This will never be the case when
    /// [`SocketEvent::OnError`] or [`SocketEvent::OnAborted`] is called.
    NoError,

    /// The operation could not be completed because of too many retransmissions or timeouts.
    /// This typically indicates a loss of connectivity to the peer.
    TooManyRetries,

    /// A command was received that is only possible to execute when the association is
    /// established, but it is not.
    NotConnected,

    /// Parsing of an incoming SCTP packet or its parameters failed. This can happen if the
    /// packet is malformed.
    ParseFailed,

    /// SCTP chunks were received in an unexpected sequence, or a primitive was issued in a state
    /// where it's not allowed.
    WrongSequence,

    /// The peer has reported an issue by sending an `ERROR` or `ABORT` chunk. The specific
    /// cause is included in the string provided with the event.
    PeerReported,

    /// The peer has performed a protocol violation, such as sending an invalid chunk or
    /// parameter that violates the SCTP specification.
    ProtocolViolation,

    /// Memory could not be allocated for an operation.
    ResourceExhaustion,

    /// The client application has attempted to perform an invalid or unsupported operation.
    UnsupportedOperation,
}

/// User configurable options.
#[derive(Clone)]
pub struct Options {
    /// The local SCTP port. Incoming packets will be verified that they are sent to this port
    /// number and all outgoing packets will have this port number as source port.
    pub local_port: u16,

    /// Additional local addresses, advertised as IPv4/IPv6 Address parameters in INIT and INIT-ACK
    /// chunks so that the peer can use them as alternative paths.
    pub local_addresses: Vec<IpAddr>,

    /// The announced maximum number of incoming streams.
    pub announced_maximum_incoming_streams: u16,

    /// The announced maximum number of outgoing streams.
    pub announced_maximum_outgoing_streams: u16,

    /// Maximum SCTP packet size. The library will limit the size of generated packets to be less
    /// than or equal to this number.
    pub mtu: usize,

    /// The receiver window that is announced to the peer.
    pub max_receiver_window_buffer_size: usize,

    /// Max allowed RTT value. When the RTT is measured and it's found to be larger than this
    /// value, it will be discarded and not used for any RTO calculation.
    pub rtt_max: Duration,

    /// Initial RTO value.
    pub rto_initial: Duration,

    /// Maximum RTO value.
    pub rto_max: Duration,

    /// Minimum RTO value. This must be larger than an expected peer delayed ack timeout.
    pub rto_min: Duration,

    /// The minimum limit for the measured RTT variance.
    ///
    /// Setting this below the expected delayed ack timeout (+ margin) of the peer might result in
    /// unnecessary retransmissions, as the maximum time it takes to ACK a DATA chunk is typically
    /// RTT + ATO (delayed ack timeout). See
    /// <https://datatracker.ietf.org/doc/html/rfc6298#section-4>.
    pub min_rtt_variance: Duration,

    /// T1-init timeout.
    pub t1_init_timeout: Duration,

    /// T1-cookie timeout.
    pub t1_cookie_timeout: Duration,

    /// Upper bound of the T2-shutdown timeout, which otherwise follows the RTO of the primary
    /// path.
    pub t2_shutdown_timeout: Duration,

    /// For t1-init and t1-cookie, this value, if set, will be the upper bound on how large the
    /// exponentially backed off timeout can become.
    pub max_timer_backoff_duration: Option<Duration>,

    /// Heartbeat interval (on idle paths). Set to zero to disable.
    pub heartbeat_interval: Duration,

    /// If RTO should be added to heartbeat_interval.
    pub heartbeat_interval_include_rtt: bool,

    /// The maximum time when a SACK will be sent from the arrival of an unacknowledged packet.
    pub delayed_ack_max_timeout: Duration,

    /// Corresponds to `Association.Max.Retrans` from
    /// <https://datatracker.ietf.org/doc/html/rfc9260#section-16>: the number of consecutive
    /// timeouts and unanswered heartbeats, on all paths together, after which the association is
    /// considered lost. Set to `None` for no limit.
    pub max_retransmissions: Option<u32>,

    /// Corresponds to `Path.Max.Retrans`: the number of consecutive failures after which a
    /// single path is considered unreachable.
    pub path_max_retransmissions: u32,

    /// Corresponds to `Max.Init.Retransmits` from
    /// <https://datatracker.ietf.org/doc/html/rfc9260#section-16-2.20.1>. Set to `None` for no
    /// limit.
    pub max_init_retransmits: Option<u32>,

    /// Corresponds to `Valid.Cookie.Life`: how long a state cookie issued by this endpoint is
    /// accepted.
    pub cookie_lifespan: Duration,

    /// The largest extension of the cookie lifespan that is granted when a peer asks for it with a
    /// Cookie Preservative parameter.
    pub max_cookie_life_increment: Duration,

    /// The largest extension that this endpoint asks for, after its COOKIE-ECHO has been rejected
    /// as stale.
    pub max_cookie_preservative: Duration,

    /// If set, an established association that has been idle (no data sent or received) for this
    /// long is shut down gracefully.
    pub autoclose: Option<Duration>,

    /// RFC 9260 Appendix A, Explicit Congestion Notification.
    pub ecn_capable: bool,

    /// Disables SCTP packet CRC-32 verification. Must only be used by tests.
    pub disable_checksum_verification: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            local_port: 5000,
            local_addresses: vec![],
            announced_maximum_incoming_streams: u16::MAX,
            announced_maximum_outgoing_streams: u16::MAX,

            // A safe default SCTP packet size. It is derived from the minimum guaranteed
            // MTU for IPv6 (1280 bytes), which may not support fragmentation, by subtracting
            // conservative estimates for headers and overhead.
            //
            // Calculation:
            //   1280 (IPv6 MTU)
            //    -40 (IPv6 header)
            //     -8 (UDP header)
            //    -24 (GCM AEAD overhead)
            //    -13 (DTLS record header)
            //     -4 (TURN ChannelData header)
            //   = 1191 bytes
            mtu: 1191,

            max_receiver_window_buffer_size: 5 * 1024 * 1024,
            rtt_max: Duration::from_secs(60),
            rto_initial: Duration::from_millis(500),
            rto_max: Duration::from_secs(60),
            rto_min: Duration::from_millis(400),
            min_rtt_variance: Duration::from_millis(220),
            t1_init_timeout: Duration::from_secs(1),
            t1_cookie_timeout: Duration::from_secs(1),
            t2_shutdown_timeout: Duration::from_secs(1),
            max_timer_backoff_duration: None,
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_interval_include_rtt: true,
            delayed_ack_max_timeout: Duration::from_millis(200),
            max_retransmissions: Some(10),
            path_max_retransmissions: 5,
            max_init_retransmits: Some(8),
            cookie_lifespan: Duration::from_secs(60),
            max_cookie_life_increment: Duration::from_secs(10),
            max_cookie_preservative: Duration::from_secs(5),
            autoclose: None,
            ecn_capable: true,
            disable_checksum_verification: false,
        }
    }
}

/// The lifecycle state of an association, as defined in
/// <https://datatracker.ietf.org/doc/html/rfc9260#section-4>.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum AssociationState {
    /// No association exists. This is both the initial and the terminal state.
    Closed,
    CookieWait,
    CookieEchoed,
    Established,
    ShutdownPending,
    ShutdownSent,
    ShutdownReceived,
    ShutdownAckSent,
}

impl fmt::Display for AssociationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AssociationState::Closed => "CLOSED",
            AssociationState::CookieWait => "COOKIE_WAIT",
            AssociationState::CookieEchoed => "COOKIE_ECHOED",
            AssociationState::Established => "ESTABLISHED",
            AssociationState::ShutdownPending => "SHUTDOWN_PENDING",
            AssociationState::ShutdownSent => "SHUTDOWN_SENT",
            AssociationState::ShutdownReceived => "SHUTDOWN_RECEIVED",
            AssociationState::ShutdownAckSent => "SHUTDOWN_ACK_SENT",
        };
        f.write_str(name)
    }
}

/// Reachability of a single peer destination address.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PathState {
    Active,
    Inactive,
}

/// Application level events generated by the endpoint.
#[derive(Debug)]
pub enum SocketEvent {
    /// Generated when the library wants a datagram packet to be sent to the given peer transport
    /// address (IP address and SCTP port).
    SendPacket(SocketAddr, Vec<u8>),

    /// Generated when [`SctpEndpoint::associate`] succeeds, but also for incoming successful
    /// association attempts.
    OnConnected(AssocId),

    /// Generated when the association is closed in a controlled way. No other event will be
    /// generated for this association after this event.
    OnClosed(AssocId),

    /// On association restarted (by peer). This is just a notification, and the association is
    /// expected to work fine after this call, but queued data has been discarded.
    OnConnectionRestarted(AssocId),

    /// Generated when the association has aborted - either as decided by this endpoint due to
    /// e.g. too many retransmission attempts, or by the peer when receiving an ABORT chunk. No
    /// other events will be generated for this association after this event.
    OnAborted(AssocId, ErrorKind, String),

    /// Generated when a non-fatal error is reported by either this library or from the other peer
    /// (by sending an ERROR chunk). The association is still viable.
    OnError(AssocId, ErrorKind, String),

    /// Generated when a peer destination address becomes reachable or unreachable.
    OnPathStateChanged(AssocId, SocketAddr, PathState),

    /// A message received from the peer.
    OnMessage(AssocId, Message),
}

/// The result of a `send` operation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SendStatus {
    /// The message was enqueued successfully. As sending the message is done asynchronously, this
    /// is no guarantee that the message has been actually sent.
    Success,

    /// The message was rejected as the payload was empty (which is not allowed in SCTP).
    ErrorMessageEmpty,

    /// The message was rejected as it would not fit in a single packet.
    ErrorMessageTooLarge,

    /// There is no association with the given identifier.
    ErrorNotConnected,

    /// The message could not be sent as the association is shutting down.
    ErrorShuttingDown,
}

/// A snapshot of an association, returned by [`SctpEndpoint::status`].
#[derive(Debug)]
pub struct AssociationStatus {
    pub state: AssociationState,

    /// The destination address that new data is sent to.
    pub primary_path: SocketAddr,

    /// All peer destination addresses and their reachability.
    pub paths: Vec<(SocketAddr, PathState)>,

    /// Smoothed round trip time of the primary path.
    pub srtt: Duration,

    /// The peer's last announced receiver window size.
    pub peer_rwnd_bytes: u32,

    /// Number of DATA chunks sent but not yet acknowledged.
    pub unack_data_count: usize,

    /// Number of messages waiting to be sent.
    pub pending_data_count: usize,

    pub negotiated_maximum_incoming_streams: u16,
    pub negotiated_maximum_outgoing_streams: u16,

    /// Indicates if both peers have announced ECN support.
    pub ecn_capable: bool,
}

/// The endpoint implements the following interface.
pub trait SctpEndpoint {
    /// Returns the next generated event, if any.
    fn poll_event(&mut self) -> Option<SocketEvent>;

    /// To be called when an incoming SCTP packet from `source` is to be processed.
    fn handle_input(&mut self, source: IpAddr, packet: &[u8]);

    /// Same as [`Self::handle_input`], but also conveys whether the IP header of the packet had
    /// the Congestion Experienced (CE) codepoint set.
    fn handle_input_with_ecn(&mut self, source: IpAddr, packet: &[u8], congestion_experienced: bool);

    /// Advances the internal clock to a specific point in the endpoint's lifetime.
    ///
    /// Time should always move forward. If you provide a `now` value that is older than
    /// a previous call (meaning time went backwards), the operation is safe but ignored,
    /// and the internal clock remains unchanged.
    ///
    /// This method triggers any timers scheduled to expire at or before `now`.
    fn advance_time(&mut self, now: SocketTime);

    /// Returns the next absolute time on the endpoint's timeline when a timer expires, never
    /// earlier than the last time passed to [`Self::advance_time`].
    ///
    /// Returns `SocketTime::infinite_future()` if there are no active timers.
    fn poll_timeout(&self) -> SocketTime;

    /// Initiates an association with the peer transport address `peer`. This is an asynchronous
    /// operation, and [`SocketEvent::OnConnected`] will be generated on success.
    ///
    /// If an association with that peer already exists, its identifier is returned and an
    /// [`SocketEvent::OnError`] is generated.
    fn associate(&mut self, peer: SocketAddr) -> AssocId;

    /// Gracefully shuts down the association after all outstanding data has been acknowledged.
    /// [`SocketEvent::OnClosed`] will be generated when done.
    fn shutdown(&mut self, id: AssocId);

    /// Closes the association non-gracefully. Will send ABORT if the peer is known.
    fn abort(&mut self, id: AssocId, reason: &str);

    /// Sends the message `message` on the association.
    ///
    /// The association does not have to be established before calling this method. If it's called
    /// before the association is established, the message will be queued.
    fn send(&mut self, id: AssocId, message: Message, send_options: &SendOptions) -> SendStatus;

    /// Sends an on-demand HEARTBEAT to one of the peer's destination addresses. Returns false if
    /// the association or the address isn't known.
    fn request_heartbeat(&mut self, id: AssocId, address: SocketAddr) -> bool;

    /// The state of an association. Unknown (or deleted) associations are [`AssociationState::Closed`].
    fn state(&self, id: AssocId) -> AssociationState;

    /// Returns a snapshot of an association, or `None` if it doesn't exist.
    fn status(&self, id: AssocId) -> Option<AssociationStatus>;

    /// The number of associations that currently exist.
    fn association_count(&self) -> usize;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options() {
        let options: Options = Options::default();
        assert_eq!(options.local_port, 5000);
        assert_eq!(options.max_init_retransmits, Some(8));
        assert!(options.autoclose.is_none());
    }

    #[test]
    fn socket_time_saturates() {
        let t = SocketTime::from(Duration::from_millis(10));
        assert_eq!(t - Duration::from_millis(20), SocketTime::zero());
        assert_eq!(SocketTime::infinite_future() + Duration::from_secs(1), SocketTime::infinite_future());
        assert_eq!(t.saturating_duration_since(SocketTime::from(Duration::from_millis(30))), Duration::ZERO);
    }

    #[test]
    fn state_display_uses_rfc_names() {
        assert_eq!(AssociationState::ShutdownAckSent.to_string(), "SHUTDOWN_ACK_SENT");
        assert_eq!(AssociationState::CookieEchoed.to_string(), "COOKIE_ECHOED");
    }
}
