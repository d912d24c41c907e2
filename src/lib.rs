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

//! An SCTP association state machine (RFC 9260).
//!
//! The protocol logic lives in pure state functions that decide what to do with each incoming
//! chunk, timer expiry and user request. An [`api::Endpoint`] owns the associations and applies
//! those decisions. It does no I/O: the embedder feeds it packets and time, and drains
//! [`api::SocketEvent`]s, which include the packets to send.

use crate::api::Options;
use crate::api::SctpEndpoint;

pub mod api;

pub(crate) mod association;
pub(crate) mod endpoint;
pub(crate) mod events;
pub(crate) mod packet;
pub(crate) mod sm;
pub(crate) mod timer;
pub(crate) mod types;

pub(crate) trait EventSink {
    fn add(&mut self, event: api::SocketEvent);
    fn next_event(&mut self) -> Option<api::SocketEvent>;
}

#[cfg(test)]
pub(crate) mod testing;

/// Returns the version of this crate.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Creates a new endpoint.
///
/// The provided `name` is only used for logging to identify this endpoint.
pub fn new_endpoint(name: &str, options: &Options) -> Box<dyn SctpEndpoint> {
    Box::new(endpoint::Endpoint::new(name, options))
}

pub(crate) mod logging {
    #[cfg(not(test))]
    use log::info;
    use std::fmt::Write;
    #[cfg(test)]
    use std::println as info;
    use std::string::String;
    use std::time::Duration;

    /// Logs a packet in a format that `text2pcap -D -n -l 248 -t "%H:%M:%S." -` can read, after
    /// grepping the log for "SCTP_PACKET".
    pub fn log_packet(name: &str, ts: Duration, sent: bool, data: &[u8]) {
        let s = data.iter().fold(String::new(), |mut output, c| {
            let _ = write!(output, " {c:02x}");
            output
        });
        let prefix = if sent { "O" } else { "I" };
        let mut remaining = (ts.as_millis() % (24 * 60 * 60 * 1000)) as u64;
        let hours = remaining / (60 * 60 * 1000);
        remaining %= 60 * 60 * 1000;
        let minutes = remaining / (60 * 1000);
        remaining %= 60 * 1000;
        let seconds = remaining / 1000;
        let ms = remaining % 1000;
        info!("{prefix} {hours:02}:{minutes:02}:{seconds:02}.{ms:03} 0000{s} # SCTP_PACKET {name}");
    }
}

pub(crate) mod math {
    macro_rules! round_up_to_4 {
        ($a: expr) => {
            ($a + 3) & !3
        };
    }

    macro_rules! round_down_to_4 {
        ($a: expr) => {
            $a & !3
        };
    }

    macro_rules! is_divisible_by_4 {
        ($a: expr) => {
            ($a % 4) == 0
        };
    }

    pub(crate) use is_divisible_by_4;
    pub(crate) use round_down_to_4;
    pub(crate) use round_up_to_4;
}
