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

#[macro_export]
macro_rules! expect_event_1 {
    ($event:expr, $event_type:ident) => {
        match $event {
            None => panic!("No event emitted"),
            Some(e) => match (e) {
                $crate::api::SocketEvent::$event_type(d) => d,
                _ => panic!("Expected {}, got {:?}", stringify!($event_type), e),
            },
        }
    };
}

#[macro_export]
macro_rules! expect_event_2 {
    ($event:expr, $event_type:ident) => {
        match $event {
            None => panic!("No event emitted"),
            Some(e) => match (e) {
                $crate::api::SocketEvent::$event_type(a, b) => (a, b),
                _ => panic!("Expected {}, got {:?}", stringify!($event_type), e),
            },
        }
    };
}

/// Returns the destination and the packet.
macro_rules! expect_sent_packet {
    ($event:expr) => {
        crate::expect_event_2!($event, SendPacket)
    };
}

macro_rules! expect_on_connected {
    ($event:expr) => {
        crate::expect_event_1!($event, OnConnected)
    };
}

macro_rules! expect_on_closed {
    ($event:expr) => {
        crate::expect_event_1!($event, OnClosed)
    };
}

macro_rules! expect_on_restarted {
    ($event:expr) => {
        crate::expect_event_1!($event, OnConnectionRestarted)
    };
}

macro_rules! expect_on_message {
    ($event:expr) => {
        crate::expect_event_2!($event, OnMessage)
    };
}

/// Returns the association and the error kind.
macro_rules! expect_on_error {
    ($event:expr) => {
        match $event {
            None => panic!("No event emitted"),
            Some(e) => match (e) {
                $crate::api::SocketEvent::OnError(id, kind, _) => (id, kind),
                _ => panic!("Expected OnError, got {:?}", e),
            },
        }
    };
}

/// Returns the association and the error kind.
macro_rules! expect_on_aborted {
    ($event:expr) => {
        match $event {
            None => panic!("No event emitted"),
            Some(e) => match (e) {
                $crate::api::SocketEvent::OnAborted(id, kind, _) => (id, kind),
                _ => panic!("Expected OnAborted, got {:?}", e),
            },
        }
    };
}

/// Returns the address and its new state.
macro_rules! expect_on_path_state_changed {
    ($event:expr) => {
        match $event {
            None => panic!("No event emitted"),
            Some(e) => match (e) {
                $crate::api::SocketEvent::OnPathStateChanged(_, address, state) => (address, state),
                _ => panic!("Expected OnPathStateChanged, got {:?}", e),
            },
        }
    };
}

macro_rules! expect_no_event {
    ($event:expr) => {
        match $event {
            None => {}
            Some(e) => panic!("Expected no event, got {:?}", e),
        }
    };
}

pub(crate) use expect_no_event;
pub(crate) use expect_on_aborted;
pub(crate) use expect_on_closed;
pub(crate) use expect_on_connected;
pub(crate) use expect_on_error;
pub(crate) use expect_on_message;
pub(crate) use expect_on_path_state_changed;
pub(crate) use expect_on_restarted;
pub(crate) use expect_sent_packet;
