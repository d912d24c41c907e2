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

use crate::api::AssociationState;
use crate::association::Association;
use crate::packet::chunk::Chunk;

/// Whether `chunk`, received in a packet with verification tag `vtag`, belongs to `assoc`. A
/// chunk that doesn't silently takes the whole packet down with it.
///
/// From <https://datatracker.ietf.org/doc/html/rfc9260#section-8.5>:
///
///   When receiving an SCTP packet, the endpoint MUST ensure that the value in the Verification
///   Tag field of the received SCTP packet matches its own tag. If the received Verification Tag
///   value does not match the receiver's own tag value, the receiver MUST silently discard the
///   packet and MUST NOT process it any further, except for those cases listed in Section 8.5.1.
pub(crate) fn accepts(assoc: &Association, vtag: u32, chunk: &Chunk) -> bool {
    match chunk {
        // INIT carries a zero tag, and the state cookie carries its own.
        Chunk::Init(_) | Chunk::CookieEcho(_) => true,
        Chunk::Abort(c) => reflected_tag_matches(assoc, vtag, c.tag_reflected),
        Chunk::ShutdownComplete(c) => reflected_tag_matches(assoc, vtag, c.tag_reflected),
        // Treated as out of the blue, which mirrors the tag back.
        Chunk::ShutdownAck(_)
            if matches!(assoc.state, AssociationState::CookieWait | AssociationState::CookieEchoed) =>
        {
            true
        }
        _ => vtag == assoc.my_vtag,
    }
}

/// From <https://datatracker.ietf.org/doc/html/rfc9260#section-8.5.1>:
///
///   The receiver of an ABORT chunk MUST accept the packet if the Verification Tag field of the
///   packet matches its own tag and the T bit is not set OR if it is set to its Peer's Tag and the
///   T bit is set in the Chunk Flags.
///
/// Until the peer's tag is known it is zero, and a reflected tag can't be checked.
fn reflected_tag_matches(assoc: &Association, vtag: u32, tag_reflected: bool) -> bool {
    if tag_reflected {
        assoc.peer_vtag != 0 && vtag == assoc.peer_vtag
    } else {
        vtag == assoc.my_vtag
    }
}

/// INIT, INIT-ACK and SHUTDOWN-COMPLETE must be the only chunk in their packet.
pub(crate) fn violates_bundling(chunks: &[Chunk]) -> bool {
    chunks.len() > 1
        && chunks.iter().any(|c| {
            matches!(c, Chunk::Init(_) | Chunk::InitAck(_) | Chunk::ShutdownComplete(_))
        })
}
