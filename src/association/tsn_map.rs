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

use crate::packet::data::GapAckBlock;
use crate::packet::data::SackChunk;
use crate::types::Tsn;
use std::ops::Range;

/// The maximum distance ahead of the cumulative TSN that received DATA is accepted at. Anything
/// further away is dropped, which forces the sender to fill the gaps first.
const MAX_ACCEPTED_OUTSTANDING_CHUNKS: u32 = 100000;

/// The maximum number of duplicate TSNs that will be reported in a SACK.
const MAX_DUPLICATE_TSN_REPORTED: usize = 20;

/// The maximum number of gap-ack-blocks that will be reported in a SACK.
const MAX_GAP_ACK_BLOCKS_REPORTED: usize = 20;

/// Tracks the TSNs of received DATA chunks, and generates SACKs describing them.
///
/// Only tells what has been seen. When to send a SACK is decided by the state functions and the
/// delayed-ack timer of the association.
pub(crate) struct TsnMap {
    /// All TSNs up until (and including) this value have been seen.
    cumulative_tsn: Tsn,

    /// Received TSNs that are not directly following `cumulative_tsn`. Note that these are open
    /// ranges, with the `end` value not being included.
    additional_tsn_blocks: Vec<Range<Tsn>>,

    /// Duplicates seen since the last SACK.
    duplicates: Vec<Tsn>,
}

impl TsnMap {
    pub fn new(peer_initial_tsn: Tsn) -> Self {
        Self {
            cumulative_tsn: peer_initial_tsn - 1,
            additional_tsn_blocks: vec![],
            duplicates: vec![],
        }
    }

    pub fn cumulative_tsn(&self) -> Tsn {
        self.cumulative_tsn
    }

    pub fn has_gaps(&self) -> bool {
        !self.additional_tsn_blocks.is_empty()
    }

    /// Old TSNs are valid, as receiving them again affects the next SACK by reporting them as
    /// duplicates. TSNs too far into the future are not.
    pub fn is_valid(&self, tsn: Tsn) -> bool {
        tsn <= self.cumulative_tsn
            || self.cumulative_tsn.distance_to(tsn) <= MAX_ACCEPTED_OUTSTANDING_CHUNKS
    }

    pub fn is_duplicate(&self, tsn: Tsn) -> bool {
        if tsn <= self.cumulative_tsn {
            return true;
        }
        let idx = self.additional_tsn_blocks.partition_point(|r| r.start <= tsn);
        idx > 0 && self.additional_tsn_blocks[idx - 1].contains(&tsn)
    }

    /// Records `tsn` as received. Returns false if it had been seen before, in which case it will
    /// be reported as a duplicate in the next SACK.
    pub fn mark(&mut self, tsn: Tsn) -> bool {
        if tsn <= self.cumulative_tsn {
            self.add_duplicate(tsn);
            return false;
        }

        if tsn == self.cumulative_tsn + 1 {
            self.cumulative_tsn = tsn;
            // The cumulative TSN may be moved even further, if a gap was filled.
            if !self.additional_tsn_blocks.is_empty()
                && self.additional_tsn_blocks[0].start == self.cumulative_tsn + 1
            {
                self.cumulative_tsn = self.additional_tsn_blocks[0].end - 1;
                self.additional_tsn_blocks.remove(0);
            }
            return true;
        }

        if !self.add_additional_tsn(tsn) {
            self.add_duplicate(tsn);
            return false;
        }
        true
    }

    fn add_duplicate(&mut self, tsn: Tsn) {
        if self.duplicates.len() < MAX_DUPLICATE_TSN_REPORTED {
            self.duplicates.push(tsn);
        }
    }

    fn add_additional_tsn(&mut self, tsn: Tsn) -> bool {
        let blocks = &mut self.additional_tsn_blocks;
        let idx = blocks.partition_point(|r| r.start <= tsn);

        if idx > 0 && blocks[idx - 1].contains(&tsn) {
            return false;
        }

        let extend_prev = idx > 0 && blocks[idx - 1].end == tsn;
        let extend_next = idx < blocks.len() && blocks[idx].start == tsn + 1;

        match (extend_prev, extend_next) {
            (true, true) => {
                blocks[idx - 1].end = blocks[idx].end;
                blocks.remove(idx);
            }
            (true, false) => blocks[idx - 1].end = tsn + 1,
            (false, true) => blocks[idx].start = tsn,
            (false, false) => blocks.insert(idx, tsn..tsn + 1),
        }
        true
    }

    /// Creates a SACK describing everything received so far. Clears the reported duplicates, so
    /// the chunk must be sent.
    pub fn create_sack(&mut self, a_rwnd: u32) -> SackChunk {
        let cumulative_tsn_ack = self.cumulative_tsn;
        let gap_ack_blocks = self
            .additional_tsn_blocks
            .iter()
            .take(MAX_GAP_ACK_BLOCKS_REPORTED)
            .filter_map(|b| {
                let start = u16::try_from(cumulative_tsn_ack.distance_to(b.start)).ok()?;
                let end = u16::try_from(cumulative_tsn_ack.distance_to(b.end) - 1).ok()?;
                Some(GapAckBlock::new(start, end))
            })
            .collect();

        SackChunk {
            cumulative_tsn_ack,
            a_rwnd,
            gap_ack_blocks,
            duplicate_tsns: std::mem::take(&mut self.duplicates),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INITIAL_TSN: Tsn = Tsn(11);
    const A_RWND: u32 = 10000;

    fn observe(m: &mut TsnMap, tsns: &[u32]) {
        for tsn in tsns {
            m.mark(Tsn(*tsn));
        }
    }

    fn gaps(sack: &SackChunk) -> Vec<(u16, u16)> {
        sack.gap_ack_blocks.iter().map(|b| (b.start, b.end)).collect()
    }

    #[test]
    fn empty() {
        let mut m = TsnMap::new(INITIAL_TSN);
        let sack = m.create_sack(A_RWND);
        assert_eq!(sack.cumulative_tsn_ack, Tsn(10));
        assert_eq!(sack.a_rwnd, A_RWND);
        assert!(sack.gap_ack_blocks.is_empty());
        assert!(sack.duplicate_tsns.is_empty());
    }

    #[test]
    fn in_order_moves_cumulative_tsn() {
        let mut m = TsnMap::new(INITIAL_TSN);
        observe(&mut m, &[11, 12, 13]);
        assert_eq!(m.cumulative_tsn(), Tsn(13));
        assert!(!m.has_gaps());
    }

    #[test]
    fn out_of_order_moves_cumulative_tsn_when_gap_filled() {
        let mut m = TsnMap::new(INITIAL_TSN);
        observe(&mut m, &[12, 13, 14]);
        assert!(m.has_gaps());
        assert_eq!(m.cumulative_tsn(), Tsn(10));
        m.mark(Tsn(11));
        assert_eq!(m.cumulative_tsn(), Tsn(14));
        assert!(!m.has_gaps());
    }

    #[test]
    fn example_from_rfc9260_section334() {
        let mut m = TsnMap::new(INITIAL_TSN);
        observe(&mut m, &[11, 12, 14, 15, 17]);
        let sack = m.create_sack(A_RWND);
        assert_eq!(sack.cumulative_tsn_ack, Tsn(12));
        assert_eq!(gaps(&sack), vec![(2, 3), (5, 5)]);
    }

    #[test]
    fn merges_adjacent_blocks() {
        let mut m = TsnMap::new(INITIAL_TSN);
        observe(&mut m, &[13, 15, 14]);
        let sack = m.create_sack(A_RWND);
        assert_eq!(sack.cumulative_tsn_ack, Tsn(10));
        assert_eq!(gaps(&sack), vec![(3, 5)]);
    }

    #[test]
    fn reports_duplicates_once() {
        let mut m = TsnMap::new(INITIAL_TSN);
        observe(&mut m, &[11, 13]);
        assert!(m.is_duplicate(Tsn(11)));
        assert!(m.is_duplicate(Tsn(13)));
        assert!(!m.is_duplicate(Tsn(12)));

        assert!(!m.mark(Tsn(11)));
        assert!(!m.mark(Tsn(13)));
        let sack = m.create_sack(A_RWND);
        assert_eq!(sack.duplicate_tsns, vec![Tsn(11), Tsn(13)]);

        let sack = m.create_sack(A_RWND);
        assert!(sack.duplicate_tsns.is_empty());
    }

    #[test]
    fn limits_reported_duplicates() {
        let mut m = TsnMap::new(INITIAL_TSN);
        m.mark(Tsn(11));
        for _ in 0..100 {
            m.mark(Tsn(11));
        }
        assert_eq!(m.create_sack(A_RWND).duplicate_tsns.len(), MAX_DUPLICATE_TSN_REPORTED);
    }

    #[test]
    fn rejects_tsns_too_far_ahead() {
        let m = TsnMap::new(INITIAL_TSN);
        assert!(m.is_valid(Tsn(11)));
        assert!(m.is_valid(Tsn(5)));
        assert!(m.is_valid(Tsn(10 + MAX_ACCEPTED_OUTSTANDING_CHUNKS)));
        assert!(!m.is_valid(Tsn(11 + MAX_ACCEPTED_OUTSTANDING_CHUNKS)));
    }

    #[test]
    fn handles_wraparound() {
        let mut m = TsnMap::new(Tsn(u32::MAX - 1));
        observe(&mut m, &[u32::MAX - 1, u32::MAX, 0, 2]);
        let sack = m.create_sack(A_RWND);
        assert_eq!(sack.cumulative_tsn_ack, Tsn(0));
        assert_eq!(gaps(&sack), vec![(2, 2)]);
    }
}
