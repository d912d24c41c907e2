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

use crate::api::Message;
use crate::api::SocketTime;
use crate::api::StreamId;
use crate::packet::data::DataChunk;
use crate::packet::data::GapAckBlock;
use crate::types::Ssn;
use crate::types::Tsn;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::time::Duration;

/// The result of processing an acknowledgement.
#[derive(Debug, Default, PartialEq)]
pub(crate) struct AckInfo {
    /// Whether the cumulative ack point moved, or a gap ack block covered a chunk for the first
    /// time.
    pub newly_acked: bool,

    /// A round-trip sample, only taken from chunks that were never retransmitted (Karn's
    /// algorithm).
    pub rtt: Option<Duration>,
}

#[derive(Debug)]
struct Item {
    data: DataChunk,
    time_sent: SocketTime,
    retransmitted: bool,

    /// Reported in a gap ack block. It stays in the queue until the cumulative ack point passes
    /// it, as gap reports are advisory.
    acked: bool,
}

/// Outbound user messages: the ones waiting to be sent, and the ones sent but not yet
/// acknowledged.
///
/// TSNs and stream sequence numbers are assigned when a message is first sent, so a message that
/// never left the queue can be carried over to a new incarnation of the association.
pub(crate) struct OutQueue {
    pending: VecDeque<(Message, bool)>,

    /// `outstanding[i]` has TSN `ctsn_ack_point + 1 + i`.
    outstanding: VecDeque<Item>,
    ctsn_ack_point: Tsn,
    next_ssn: HashMap<StreamId, Ssn>,
}

impl OutQueue {
    pub fn new(initial_tsn: Tsn) -> Self {
        Self {
            pending: VecDeque::new(),
            outstanding: VecDeque::new(),
            ctsn_ack_point: initial_tsn - 1,
            next_ssn: HashMap::new(),
        }
    }

    pub fn push(&mut self, message: Message, unordered: bool) {
        self.pending.push_back((message, unordered));
    }

    /// Nothing waiting and nothing in flight.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.outstanding.is_empty()
    }

    pub fn has_outstanding(&self) -> bool {
        !self.outstanding.is_empty()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn outstanding_count(&self) -> usize {
        self.outstanding.len()
    }

    /// The highest TSN below which everything has been acknowledged.
    pub fn ctsn_ack_point(&self) -> Tsn {
        self.ctsn_ack_point
    }

    pub fn next_tsn(&self) -> Tsn {
        self.ctsn_ack_point + 1 + self.outstanding.len() as u32
    }

    pub fn unacked_bytes(&self) -> usize {
        self.outstanding.iter().filter(|i| !i.acked).map(|i| i.data.payload.len()).sum()
    }

    /// Assigns TSNs to waiting messages and returns them as DATA chunks, as long as they fit in
    /// the peer's receiver window. One chunk is always allowed when nothing is in flight, so that a
    /// zero window can be probed.
    pub fn produce(&mut self, now: SocketTime, peer_rwnd: u32) -> Vec<DataChunk> {
        let mut chunks = vec![];
        let mut in_flight = self.unacked_bytes();
        while let Some((message, _)) = self.pending.front() {
            let size = message.payload.len();
            if in_flight > 0 && in_flight + size > peer_rwnd as usize {
                break;
            }
            let Some((message, unordered)) = self.pending.pop_front() else { break };
            let ssn = if unordered {
                Ssn(0)
            } else {
                let next = self.next_ssn.entry(message.stream_id).or_default();
                let ssn = *next;
                *next += 1;
                ssn
            };
            let data = DataChunk {
                tsn: self.next_tsn(),
                stream_id: message.stream_id,
                ssn,
                ppid: message.ppid,
                unordered,
                beginning: true,
                ending: true,
                payload: message.payload,
            };
            in_flight += size;
            chunks.push(data.clone());
            self.outstanding.push_back(Item { data, time_sent: now, retransmitted: false, acked: false });
        }
        chunks
    }

    /// Returns every chunk that hasn't been acknowledged in any way, marking them as retransmitted.
    pub fn retransmit(&mut self, now: SocketTime) -> Vec<DataChunk> {
        self.outstanding
            .iter_mut()
            .filter(|i| !i.acked)
            .map(|i| {
                i.retransmitted = true;
                i.time_sent = now;
                i.data.clone()
            })
            .collect()
    }

    /// Moves the cumulative ack point to `cumulative_tsn_ack`, as carried by SACK and SHUTDOWN.
    pub fn handle_cum_ack(&mut self, now: SocketTime, cumulative_tsn_ack: Tsn) -> AckInfo {
        let mut info = AckInfo::default();
        while self.ctsn_ack_point < cumulative_tsn_ack {
            let Some(item) = self.outstanding.pop_front() else { break };
            if !item.retransmitted {
                info.rtt = Some(now.saturating_duration_since(item.time_sent));
            }
            info.newly_acked = true;
            self.ctsn_ack_point += 1;
        }
        info
    }

    pub fn handle_sack(
        &mut self,
        now: SocketTime,
        cumulative_tsn_ack: Tsn,
        gap_ack_blocks: &[GapAckBlock],
    ) -> AckInfo {
        let mut info = self.handle_cum_ack(now, cumulative_tsn_ack);

        // From <https://datatracker.ietf.org/doc/html/rfc9260#section-7.1>:
        //
        //   SCTP considers the information carried in the Gap Ack Blocks in the SACK chunk as
        //   advisory.
        for block in gap_ack_blocks {
            let start = cumulative_tsn_ack + block.start as u32;
            let end = cumulative_tsn_ack + block.end as u32;
            for item in self.outstanding.iter_mut() {
                let tsn = item.data.tsn;
                if tsn >= start && tsn <= end && !item.acked {
                    item.acked = true;
                    info.newly_acked = true;
                }
            }
        }
        info
    }

    /// Discards everything, sent or not, as done when the peer restarts the association.
    pub fn purge(&mut self) {
        self.pending.clear();
        self.ctsn_ack_point += self.outstanding.len() as u32;
        self.outstanding.clear();
    }

    /// Removes the messages that haven't been sent yet.
    pub fn take_pending(&mut self) -> VecDeque<(Message, bool)> {
        std::mem::take(&mut self.pending)
    }
}
