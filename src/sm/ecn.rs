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

//! Explicit Congestion Notification, see
//! <https://datatracker.ietf.org/doc/html/rfc9260#appendix-A>.

use crate::association::Association;
use crate::packet::chunk::Chunk;
use crate::packet::control::CwrChunk;
use crate::packet::control::EcneChunk;
use crate::sm::Command;
use crate::sm::Decision;
#[cfg(not(test))]
use log::debug;
#[cfg(test)]
use std::println as debug;

/// ECNE from the peer: a packet this endpoint sent was marked as congested. The window is reduced
/// at most once per round trip, and CWR is always returned so that the peer stops repeating
/// the ECNE.
pub(crate) fn ecne(assoc: &Association, chunk: &EcneChunk) -> Decision {
    if !assoc.ecn_capable {
        return Decision::discard();
    }
    let mut commands = vec![];
    let mut cwr_tsn = assoc.last_cwr_tsn;
    if chunk.lowest_tsn > assoc.last_cwr_tsn {
        debug!("Congestion reported at {}", chunk.lowest_tsn);
        commands.push(Command::EcnEcne(chunk.lowest_tsn));
        cwr_tsn = assoc.outqueue.next_tsn() - 1;
    }
    commands.push(Command::Reply(Chunk::Cwr(CwrChunk { lowest_tsn: cwr_tsn })));
    Decision::consume(commands)
}

/// CWR from the peer, which has reacted to the ECNE this endpoint kept sending.
pub(crate) fn cwr(assoc: &Association, chunk: &CwrChunk) -> Decision {
    if !assoc.ecn_capable || chunk.lowest_tsn < assoc.last_ecne_tsn {
        return Decision::discard();
    }
    Decision::consume(vec![Command::EcnCwr(chunk.lowest_tsn)])
}
