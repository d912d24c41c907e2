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

#[cfg(test)]
mod tests {
    use crate::api::AssocId;
    use crate::api::AssociationState;
    use crate::api::ErrorKind;
    use crate::api::Message;
    use crate::api::Options;
    use crate::api::PathState;
    use crate::api::PpId;
    use crate::api::SctpEndpoint;
    use crate::api::SendOptions;
    use crate::api::SendStatus;
    use crate::api::SocketEvent;
    use crate::api::SocketTime;
    use crate::api::StreamId;
    use crate::endpoint::Endpoint;
    use crate::math::round_down_to_4;
    use crate::packet::chunk::Chunk;
    use crate::packet::control::HeartbeatChunk;
    use crate::packet::data::DATA_HEADER_SIZE;
    use crate::packet::error_causes::ErrorCause;
    use crate::packet::parameter::Parameter;
    use crate::packet::sctp_packet::COMMON_HEADER_SIZE;
    use crate::packet::sctp_packet::SctpPacket;
    use crate::packet::sctp_packet::SctpPacketBuilder;
    use crate::packet::teardown::AbortChunk;
    use crate::testing::event_helpers::expect_no_event;
    use crate::testing::event_helpers::expect_on_aborted;
    use crate::testing::event_helpers::expect_on_closed;
    use crate::testing::event_helpers::expect_on_connected;
    use crate::testing::event_helpers::expect_on_error;
    use crate::testing::event_helpers::expect_on_message;
    use crate::testing::event_helpers::expect_on_path_state_changed;
    use crate::testing::event_helpers::expect_on_restarted;
    use crate::testing::event_helpers::expect_sent_packet;
    use std::cmp::min;
    use std::collections::VecDeque;
    use std::net::IpAddr;
    use std::net::Ipv4Addr;
    use std::net::SocketAddr;
    use std::time::Duration;

    const A_IP: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
    const Z_IP: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));
    const A_ADDR: SocketAddr = SocketAddr::new(A_IP, 5000);
    const Z_ADDR: SocketAddr = SocketAddr::new(Z_IP, 5000);

    #[derive(Clone, Copy, Debug, PartialEq)]
    enum Direction {
        AToZ,
        ZToA,
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn at(n: u64) -> SocketTime {
        SocketTime::from(ms(n))
    }

    fn default_options() -> Options {
        Options {
            rto_min: ms(100),
            rto_initial: ms(100),
            rto_max: ms(100),
            delayed_ack_max_timeout: ms(10),
            heartbeat_interval: Duration::ZERO,
            ..Options::default()
        }
    }

    fn message(payload: &[u8]) -> Message {
        Message::new(StreamId(1), PpId(53), payload.to_vec())
    }

    fn parse(data: &[u8]) -> SctpPacket {
        SctpPacket::from_bytes(data, &Options::default()).unwrap()
    }

    /// Moves packets between `a` (at `A_IP`) and `z` (at `Z_IP`) and advances both clocks to each
    /// next timeout, until nothing happens anymore or the clocks would pass `until`. Every packet
    /// is offered to `deliver` first, which drops it by returning false.
    fn run_until(
        a: &mut Endpoint,
        z: &mut Endpoint,
        until: SocketTime,
        mut deliver: impl FnMut(Direction, &[u8]) -> bool,
    ) -> (VecDeque<SocketEvent>, VecDeque<SocketEvent>) {
        let mut events_a: VecDeque<SocketEvent> = VecDeque::new();
        let mut events_z: VecDeque<SocketEvent> = VecDeque::new();
        let mut reached = false;
        loop {
            let mut again = false;
            if let Some(e) = a.poll_event() {
                match e {
                    SocketEvent::SendPacket(dest, data) => {
                        assert_eq!(dest.ip(), Z_IP);
                        if deliver(Direction::AToZ, &data) {
                            z.handle_input(A_IP, &data);
                        }
                    }
                    e => events_a.push_back(e),
                }
                again = true;
            }
            if let Some(e) = z.poll_event() {
                match e {
                    SocketEvent::SendPacket(dest, data) => {
                        assert_eq!(dest.ip(), A_IP);
                        if deliver(Direction::ZToA, &data) {
                            a.handle_input(Z_IP, &data);
                        }
                    }
                    e => events_z.push_back(e),
                }
                again = true;
            }
            if !again {
                let timeout = min(a.poll_timeout(), z.poll_timeout());
                if timeout != SocketTime::infinite_future() && timeout <= until {
                    a.advance_time(timeout);
                    z.advance_time(timeout);
                    again = true;
                } else if until != SocketTime::infinite_future() && !reached {
                    a.advance_time(until);
                    z.advance_time(until);
                    reached = true;
                    again = true;
                }
            }

            if !again {
                return (events_a, events_z);
            }
        }
    }

    fn exchange_packets(
        a: &mut Endpoint,
        z: &mut Endpoint,
    ) -> (VecDeque<SocketEvent>, VecDeque<SocketEvent>) {
        run_until(a, z, SocketTime::infinite_future(), |_, _| true)
    }

    fn connect(a: &mut Endpoint, z: &mut Endpoint) -> (AssocId, AssocId) {
        let id_a = a.associate(Z_ADDR);
        // A -> INIT -> Z
        z.handle_input(A_IP, &expect_sent_packet!(a.poll_event()).1);
        // A <- INIT_ACK <- Z
        a.handle_input(Z_IP, &expect_sent_packet!(z.poll_event()).1);
        // A -> COOKIE_ECHO -> Z
        z.handle_input(A_IP, &expect_sent_packet!(a.poll_event()).1);
        let id_z = expect_on_connected!(z.poll_event());
        // A <- COOKIE_ACK <- Z
        a.handle_input(Z_IP, &expect_sent_packet!(z.poll_event()).1);
        assert_eq!(expect_on_connected!(a.poll_event()), id_a);
        expect_no_event!(a.poll_event());
        expect_no_event!(z.poll_event());
        (id_a, id_z)
    }

    #[test]
    fn establish_association() {
        let options = default_options();
        let mut a = Endpoint::new("A", &options);
        let mut z = Endpoint::new("Z", &options);

        let id_a = a.associate(Z_ADDR);
        assert_eq!(a.state(id_a), AssociationState::CookieWait);

        // A -> INIT -> Z
        let (dest, init) = expect_sent_packet!(a.poll_event());
        assert_eq!(dest, Z_ADDR);
        let packet = parse(&init);
        assert_eq!(packet.common_header.verification_tag, 0);
        assert!(matches!(packet.chunks[..], [Chunk::Init(_)]));
        z.handle_input(A_IP, &init);
        // The INIT-ACK carries all state, so nothing is kept yet.
        assert_eq!(z.association_count(), 0);

        // A <- INIT_ACK <- Z
        let (dest, init_ack) = expect_sent_packet!(z.poll_event());
        assert_eq!(dest, A_ADDR);
        a.handle_input(Z_IP, &init_ack);
        assert_eq!(a.state(id_a), AssociationState::CookieEchoed);

        // A -> COOKIE_ECHO -> Z
        z.handle_input(A_IP, &expect_sent_packet!(a.poll_event()).1);
        let id_z = expect_on_connected!(z.poll_event());
        assert_eq!(z.state(id_z), AssociationState::Established);
        assert_eq!(z.association_count(), 1);

        // A <- COOKIE_ACK <- Z
        a.handle_input(Z_IP, &expect_sent_packet!(z.poll_event()).1);
        assert_eq!(expect_on_connected!(a.poll_event()), id_a);
        assert_eq!(a.state(id_a), AssociationState::Established);
        expect_no_event!(a.poll_event());
        expect_no_event!(z.poll_event());

        let status = a.status(id_a).unwrap();
        assert_eq!(status.primary_path, Z_ADDR);
        assert_eq!(status.paths, vec![(Z_ADDR, PathState::Active)]);
        assert!(status.ecn_capable);
    }

    #[test]
    fn associating_twice_reports_an_error() {
        let options = default_options();
        let mut a = Endpoint::new("A", &options);
        let mut z = Endpoint::new("Z", &options);
        let (id_a, _) = connect(&mut a, &mut z);

        assert_eq!(a.associate(Z_ADDR), id_a);
        assert_eq!(expect_on_error!(a.poll_event()), (id_a, ErrorKind::WrongSequence));
        expect_no_event!(a.poll_event());
        assert_eq!(a.association_count(), 1);
    }

    #[test]
    fn send_and_receive_message() {
        let options = default_options();
        let mut a = Endpoint::new("A", &options);
        let mut z = Endpoint::new("Z", &options);
        let (id_a, id_z) = connect(&mut a, &mut z);

        assert_eq!(a.send(id_a, message(b"hello"), &SendOptions::default()), SendStatus::Success);
        assert_eq!(a.status(id_a).unwrap().unack_data_count, 1);

        let (events_a, mut events_z) = exchange_packets(&mut a, &mut z);
        assert!(events_a.is_empty());
        let (id, msg) = expect_on_message!(events_z.pop_front());
        assert_eq!(id, id_z);
        assert_eq!(msg.stream_id, StreamId(1));
        assert_eq!(msg.ppid, PpId(53));
        assert_eq!(msg.payload, b"hello");
        expect_no_event!(events_z.pop_front());

        // The delayed SACK has acknowledged it.
        assert_eq!(a.status(id_a).unwrap().unack_data_count, 0);
    }

    #[test]
    fn messages_sent_before_the_handshake_are_delivered_after_it() {
        let options = default_options();
        let mut a = Endpoint::new("A", &options);
        let mut z = Endpoint::new("Z", &options);

        let id_a = a.associate(Z_ADDR);
        assert_eq!(a.send(id_a, message(b"early"), &SendOptions::default()), SendStatus::Success);
        assert_eq!(a.status(id_a).unwrap().pending_data_count, 1);

        let (mut events_a, mut events_z) = exchange_packets(&mut a, &mut z);
        assert_eq!(expect_on_connected!(events_a.pop_front()), id_a);
        let id_z = expect_on_connected!(events_z.pop_front());
        let (id, msg) = expect_on_message!(events_z.pop_front());
        assert_eq!(id, id_z);
        assert_eq!(msg.payload, b"early");
        assert_eq!(a.status(id_a).unwrap().pending_data_count, 0);
    }

    #[test]
    fn send_validates_its_input() {
        let options = default_options();
        let mut a = Endpoint::new("A", &options);
        let mut z = Endpoint::new("Z", &options);
        let (id_a, _) = connect(&mut a, &mut z);
        let max_size = round_down_to_4!(options.mtu) - COMMON_HEADER_SIZE - DATA_HEADER_SIZE;

        assert_eq!(a.send(id_a, message(b""), &SendOptions::default()), SendStatus::ErrorMessageEmpty);
        assert_eq!(
            a.send(id_a, message(&vec![0; max_size + 1]), &SendOptions::default()),
            SendStatus::ErrorMessageTooLarge
        );
        assert_eq!(
            a.send(AssocId(99), message(b"nobody"), &SendOptions::default()),
            SendStatus::ErrorNotConnected
        );
        assert_eq!(a.send(id_a, message(&vec![0; max_size]), &SendOptions::default()), SendStatus::Success);

        // The largest message fits in a single packet.
        let (_, data) = expect_sent_packet!(a.poll_event());
        assert_eq!(data.len(), round_down_to_4!(options.mtu));

        // Outstanding data keeps the association in SHUTDOWN-PENDING.
        a.shutdown(id_a);
        assert_eq!(a.state(id_a), AssociationState::ShutdownPending);
        assert_eq!(
            a.send(id_a, message(b"late"), &SendOptions::default()),
            SendStatus::ErrorShuttingDown
        );
    }

    #[test]
    fn graceful_shutdown() {
        let options = default_options();
        let mut a = Endpoint::new("A", &options);
        let mut z = Endpoint::new("Z", &options);
        let (id_a, id_z) = connect(&mut a, &mut z);

        a.shutdown(id_a);
        // Nothing is outstanding, so SHUTDOWN is sent right away.
        assert_eq!(a.state(id_a), AssociationState::ShutdownSent);
        let (_, shutdown) = expect_sent_packet!(a.poll_event());
        assert!(matches!(parse(&shutdown).chunks[..], [Chunk::Shutdown(_)]));

        z.handle_input(A_IP, &shutdown);
        assert_eq!(z.state(id_z), AssociationState::ShutdownAckSent);
        let (_, shutdown_ack) = expect_sent_packet!(z.poll_event());
        assert!(matches!(parse(&shutdown_ack).chunks[..], [Chunk::ShutdownAck(_)]));

        a.handle_input(Z_IP, &shutdown_ack);
        assert_eq!(expect_on_closed!(a.poll_event()), id_a);
        let (_, shutdown_complete) = expect_sent_packet!(a.poll_event());
        assert!(matches!(parse(&shutdown_complete).chunks[..], [Chunk::ShutdownComplete(_)]));

        z.handle_input(A_IP, &shutdown_complete);
        assert_eq!(expect_on_closed!(z.poll_event()), id_z);

        expect_no_event!(a.poll_event());
        expect_no_event!(z.poll_event());
        assert_eq!(a.association_count(), 0);
        assert_eq!(z.association_count(), 0);
        assert_eq!(a.poll_timeout(), SocketTime::infinite_future());
    }

    #[test]
    fn shutdown_waits_for_outstanding_data() {
        let options = default_options();
        let mut a = Endpoint::new("A", &options);
        let mut z = Endpoint::new("Z", &options);
        let (id_a, id_z) = connect(&mut a, &mut z);

        assert_eq!(a.send(id_a, message(b"last words"), &SendOptions::default()), SendStatus::Success);
        a.shutdown(id_a);
        assert_eq!(a.state(id_a), AssociationState::ShutdownPending);

        let (mut events_a, mut events_z) = exchange_packets(&mut a, &mut z);
        let (id, msg) = expect_on_message!(events_z.pop_front());
        assert_eq!(id, id_z);
        assert_eq!(msg.payload, b"last words");
        assert_eq!(expect_on_closed!(events_z.pop_front()), id_z);
        assert_eq!(expect_on_closed!(events_a.pop_front()), id_a);
        expect_no_event!(events_a.pop_front());
        expect_no_event!(events_z.pop_front());
        assert_eq!(a.association_count(), 0);
        assert_eq!(z.association_count(), 0);
    }

    #[test]
    fn autoclose_shuts_down_an_idle_association() {
        let options = default_options();
        let mut a = Endpoint::new("A", &options);
        let mut z = Endpoint::new("Z", &Options { autoclose: Some(Duration::from_secs(1)), ..options });
        let (id_a, id_z) = connect(&mut a, &mut z);

        let (mut events_a, mut events_z) = exchange_packets(&mut a, &mut z);
        assert_eq!(expect_on_closed!(events_a.pop_front()), id_a);
        assert_eq!(expect_on_closed!(events_z.pop_front()), id_z);
        assert_eq!(z.association_count(), 0);
    }

    #[test]
    fn user_abort_notifies_the_peer() {
        let options = default_options();
        let mut a = Endpoint::new("A", &options);
        let mut z = Endpoint::new("Z", &options);
        let (id_a, id_z) = connect(&mut a, &mut z);

        a.abort(id_a, "bye");
        let (_, abort) = expect_sent_packet!(a.poll_event());
        assert_eq!(expect_on_closed!(a.poll_event()), id_a);
        assert_eq!(a.association_count(), 0);

        z.handle_input(A_IP, &abort);
        match z.poll_event() {
            Some(SocketEvent::OnAborted(id, ErrorKind::PeerReported, reason)) => {
                assert_eq!(id, id_z);
                assert!(reason.contains("bye"), "{reason}");
            }
            e => panic!("Expected OnAborted, got {e:?}"),
        }
        expect_no_event!(z.poll_event());
        assert_eq!(z.association_count(), 0);
        assert_eq!(z.state(id_z), AssociationState::Closed);
    }

    #[test]
    fn out_of_the_blue_heartbeat_is_answered_with_reflected_abort() {
        let options = default_options();
        let mut z = Endpoint::new("Z", &options);

        let packet = SctpPacketBuilder::new(0x1234_5678, 5000, 5000, options.mtu)
            .add(&Chunk::Heartbeat(HeartbeatChunk::with_info(vec![1, 2, 3, 4])))
            .build();
        z.handle_input(A_IP, &packet);

        let (dest, abort) = expect_sent_packet!(z.poll_event());
        assert_eq!(dest, A_ADDR);
        let abort = parse(&abort);
        assert_eq!(abort.common_header.verification_tag, 0x1234_5678);
        assert!(matches!(
            abort.chunks[..],
            [Chunk::Abort(AbortChunk { tag_reflected: true, .. })]
        ));
        expect_no_event!(z.poll_event());
        assert_eq!(z.association_count(), 0);
    }

    #[test]
    fn drops_packets_for_other_ports_and_malformed_packets() {
        let options = default_options();
        let mut z = Endpoint::new("Z", &options);

        let packet = SctpPacketBuilder::new(0x1234_5678, 5000, 6000, options.mtu)
            .add(&Chunk::Heartbeat(HeartbeatChunk::with_info(vec![1, 2, 3, 4])))
            .build();
        z.handle_input(A_IP, &packet);
        expect_no_event!(z.poll_event());

        z.handle_input(A_IP, &[0x13, 0x88, 0x13]);
        expect_no_event!(z.poll_event());
    }

    #[test]
    fn too_many_init_retransmissions_fail_the_attempt() {
        let options = Options { max_init_retransmits: Some(2), ..default_options() };
        let mut a = Endpoint::new("A", &options);
        let mut z = Endpoint::new("Z", &options);

        let id_a = a.associate(Z_ADDR);
        let mut inits = 0;
        let (mut events_a, events_z) =
            run_until(&mut a, &mut z, SocketTime::infinite_future(), |direction, data| {
                assert_eq!(direction, Direction::AToZ);
                assert!(matches!(parse(data).chunks[..], [Chunk::Init(_)]));
                inits += 1;
                false
            });

        assert_eq!(inits, 3);
        assert_eq!(expect_on_aborted!(events_a.pop_front()), (id_a, ErrorKind::TooManyRetries));
        expect_no_event!(events_a.pop_front());
        assert!(events_z.is_empty());
        assert_eq!(a.association_count(), 0);
        assert_eq!(a.state(id_a), AssociationState::Closed);
    }

    #[test]
    fn stale_cookie_is_retried_with_preservative() {
        let options = default_options();
        let mut a = Endpoint::new("A", &options);
        let mut z = Endpoint::new("Z", &Options { cookie_lifespan: ms(100), ..default_options() });

        let id_a = a.associate(Z_ADDR);
        z.handle_input(A_IP, &expect_sent_packet!(a.poll_event()).1);
        a.handle_input(Z_IP, &expect_sent_packet!(z.poll_event()).1);
        let (_, cookie_echo) = expect_sent_packet!(a.poll_event());

        // The COOKIE-ECHO arrives after the cookie has expired.
        a.advance_time(at(500));
        z.advance_time(at(500));
        z.handle_input(A_IP, &cookie_echo);
        let (_, error) = expect_sent_packet!(z.poll_event());
        assert!(matches!(
            &parse(&error).chunks[..],
            [Chunk::Error(e)] if matches!(e.error_causes[..], [ErrorCause::StaleCookie(_)])
        ));
        assert_eq!(z.association_count(), 0);

        a.handle_input(Z_IP, &error);
        assert_eq!(a.state(id_a), AssociationState::CookieWait);
        let (_, init) = expect_sent_packet!(a.poll_event());
        let packet = parse(&init);
        let Chunk::Init(init_chunk) = &packet.chunks[0] else {
            panic!("expected INIT, got {}", packet.chunks[0]);
        };
        assert!(init_chunk.parameters.iter().any(|p| matches!(p, Parameter::CookiePreservative(_))));

        z.handle_input(A_IP, &init);
        let (mut events_a, mut events_z) = exchange_packets(&mut a, &mut z);
        assert_eq!(expect_on_connected!(events_a.pop_front()), id_a);
        expect_on_connected!(events_z.pop_front());
        assert_eq!(a.state(id_a), AssociationState::Established);
    }

    #[test]
    fn simultaneous_open_results_in_one_association() {
        let options = default_options();
        let mut a = Endpoint::new("A", &options);
        let mut z = Endpoint::new("Z", &options);

        let id_a = a.associate(Z_ADDR);
        let id_z = z.associate(A_ADDR);

        let (mut events_a, mut events_z) = exchange_packets(&mut a, &mut z);
        assert_eq!(expect_on_connected!(events_a.pop_front()), id_a);
        assert_eq!(expect_on_connected!(events_z.pop_front()), id_z);
        expect_no_event!(events_a.pop_front());
        expect_no_event!(events_z.pop_front());

        assert_eq!(a.association_count(), 1);
        assert_eq!(z.association_count(), 1);
        assert_eq!(a.state(id_a), AssociationState::Established);
        assert_eq!(z.state(id_z), AssociationState::Established);

        assert_eq!(a.send(id_a, message(b"ping"), &SendOptions::default()), SendStatus::Success);
        let (_, mut events_z) = exchange_packets(&mut a, &mut z);
        assert_eq!(expect_on_message!(events_z.pop_front()).0, id_z);
    }

    #[test]
    fn peer_restart_keeps_the_association() {
        let options = default_options();
        let mut a = Endpoint::new("A", &options);
        let mut z = Endpoint::new("Z", &options);
        let (_, id_z) = connect(&mut a, &mut z);

        // A loses all state and associates again from the same address.
        let mut a2 = Endpoint::new("A2", &options);
        let id_a2 = a2.associate(Z_ADDR);
        let (mut events_a2, mut events_z) = exchange_packets(&mut a2, &mut z);
        assert_eq!(expect_on_connected!(events_a2.pop_front()), id_a2);
        assert_eq!(expect_on_restarted!(events_z.pop_front()), id_z);
        expect_no_event!(events_z.pop_front());
        assert_eq!(z.association_count(), 1);
        assert_eq!(z.state(id_z), AssociationState::Established);

        assert_eq!(a2.send(id_a2, message(b"again"), &SendOptions::default()), SendStatus::Success);
        let (_, mut events_z) = exchange_packets(&mut a2, &mut z);
        let (id, msg) = expect_on_message!(events_z.pop_front());
        assert_eq!(id, id_z);
        assert_eq!(msg.payload, b"again");
    }

    #[test]
    fn congestion_experienced_is_echoed_until_cwr() {
        let options = default_options();
        let mut a = Endpoint::new("A", &options);
        let mut z = Endpoint::new("Z", &options);
        let (id_a, _) = connect(&mut a, &mut z);

        assert_eq!(a.send(id_a, message(b"hello"), &SendOptions::default()), SendStatus::Success);
        let (_, data) = expect_sent_packet!(a.poll_event());
        z.handle_input_with_ecn(A_IP, &data, true);
        expect_on_message!(z.poll_event());

        // The mark makes the SACK go out at once, with an ECNE.
        let (_, sack) = expect_sent_packet!(z.poll_event());
        assert!(matches!(parse(&sack).chunks[..], [Chunk::Sack(_), Chunk::Ecne(_)]));

        a.handle_input(Z_IP, &sack);
        let (_, cwr) = expect_sent_packet!(a.poll_event());
        assert!(matches!(parse(&cwr).chunks[..], [Chunk::Cwr(_)]));
        z.handle_input(A_IP, &cwr);
        expect_no_event!(z.poll_event());

        // Later SACKs are delayed again, and come without ECNE.
        assert_eq!(a.send(id_a, message(b"calm"), &SendOptions::default()), SendStatus::Success);
        z.handle_input(A_IP, &expect_sent_packet!(a.poll_event()).1);
        expect_on_message!(z.poll_event());
        expect_no_event!(z.poll_event());
        z.advance_time(at(10));
        let (_, sack) = expect_sent_packet!(z.poll_event());
        assert!(matches!(parse(&sack).chunks[..], [Chunk::Sack(_)]));
    }

    #[test]
    fn unanswered_heartbeats_make_the_path_inactive() {
        let options = Options {
            heartbeat_interval: Duration::from_secs(1),
            heartbeat_interval_include_rtt: false,
            path_max_retransmissions: 1,
            ..default_options()
        };
        let mut a = Endpoint::new("A", &options);
        let mut z = Endpoint::new("Z", &options);
        let (id_a, _) = connect(&mut a, &mut z);

        // Nothing comes back from Z. The second unanswered HEARTBEAT exceeds the limit.
        let (mut events_a, _) =
            run_until(&mut a, &mut z, at(3500), |direction, _| direction == Direction::AToZ);
        assert_eq!(expect_on_path_state_changed!(events_a.pop_front()), (Z_ADDR, PathState::Inactive));
        expect_no_event!(events_a.pop_front());
        assert_eq!(a.status(id_a).unwrap().paths, vec![(Z_ADDR, PathState::Inactive)]);
        assert_eq!(a.state(id_a), AssociationState::Established);

        // Once the network is back, an on-demand HEARTBEAT brings the path back.
        assert!(a.request_heartbeat(id_a, Z_ADDR));
        assert!(!a.request_heartbeat(id_a, "10.0.0.3:5000".parse().unwrap()));
        let (mut events_a, _) = run_until(&mut a, &mut z, at(3500), |_, _| true);
        assert_eq!(expect_on_path_state_changed!(events_a.pop_front()), (Z_ADDR, PathState::Active));
        expect_no_event!(events_a.pop_front());
        assert_eq!(a.status(id_a).unwrap().paths, vec![(Z_ADDR, PathState::Active)]);
    }

    #[test]
    fn unanswered_heartbeats_eventually_abort() {
        let options = Options {
            heartbeat_interval: Duration::from_secs(1),
            heartbeat_interval_include_rtt: false,
            max_retransmissions: Some(2),
            ..default_options()
        };
        let mut a = Endpoint::new("A", &options);
        let mut z = Endpoint::new("Z", &options);
        let (id_a, id_z) = connect(&mut a, &mut z);

        let (mut events_a, mut events_z) = run_until(&mut a, &mut z, at(10_000), |_, _| false);
        assert_eq!(expect_on_aborted!(events_a.pop_front()), (id_a, ErrorKind::TooManyRetries));
        assert_eq!(expect_on_aborted!(events_z.pop_front()), (id_z, ErrorKind::TooManyRetries));
        expect_no_event!(events_a.pop_front());
        assert_eq!(a.association_count(), 0);
        assert_eq!(z.association_count(), 0);
    }

    #[test]
    fn time_never_goes_backwards() {
        let options = default_options();
        let mut a = Endpoint::new("A", &options);
        assert_eq!(a.poll_timeout(), SocketTime::infinite_future());

        a.advance_time(at(2000));
        a.associate(Z_ADDR);
        expect_sent_packet!(a.poll_event());
        let deadline = a.poll_timeout();
        assert_eq!(deadline, at(2000) + options.t1_init_timeout);

        // Going back in time neither fires nor moves anything.
        a.advance_time(at(1000));
        assert_eq!(a.poll_timeout(), deadline);
        expect_no_event!(a.poll_event());
    }
}
