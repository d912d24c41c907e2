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

use crate::packet::chunk::Chunk;
use crate::packet::error_causes::ErrorCause;
use crate::packet::teardown::AbortChunk;
use crate::packet::teardown::ShutdownCompleteChunk;
use crate::sm::Command;
use crate::sm::Decision;
use crate::sm::Disposition;
use crate::sm::StateContext;
use crate::sm::command::Destination;
use crate::sm::command::OutPacket;
#[cfg(not(test))]
use log::debug;
#[cfg(test)]
use std::println as debug;

fn is_stale_cookie_report(chunk: &Chunk) -> bool {
    matches!(chunk, Chunk::Error(e)
        if !e.error_causes.is_empty()
            && e.error_causes.iter().all(|c| matches!(c, ErrorCause::StaleCookie(_))))
}

/// An "out of the blue" packet: one that belongs to no association. It is answered at most once,
/// with the T-bit set and the packet's own verification tag, and never creates any state.
///
/// See <https://datatracker.ietf.org/doc/html/rfc9260#section-8.4>.
pub(crate) fn handle(ctx: &StateContext<'_>) -> Decision {
    let Some(packet) = ctx.packet else {
        return Decision::bug();
    };

    // Answering these could start an endless exchange with another confused endpoint.
    if packet.chunks.iter().any(|c| {
        matches!(c, Chunk::Abort(_) | Chunk::ShutdownComplete(_) | Chunk::CookieAck(_))
            || is_stale_cookie_report(c)
    }) {
        debug!("Silently discarding OOTB packet from {}", packet.source);
        return Decision::discard_packet();
    }

    let reply = if packet.chunks.iter().any(|c| matches!(c, Chunk::ShutdownAck(_))) {
        Chunk::ShutdownComplete(ShutdownCompleteChunk { tag_reflected: true })
    } else {
        Chunk::Abort(AbortChunk { tag_reflected: true, error_causes: vec![] })
    };
    debug!("Answering OOTB packet from {} with {reply}", packet.source);
    Decision::new(
        Disposition::DiscardPacket,
        vec![Command::SendPacket(OutPacket {
            vtag: packet.verification_tag,
            dest: Destination::Source,
            chunks: vec![reply],
        })],
    )
}
