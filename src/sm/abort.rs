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
use crate::api::ErrorKind;
use crate::association::Association;
use crate::packet::chunk::Chunk;
use crate::packet::error_causes;
use crate::packet::error_causes::ErrorCause;
use crate::packet::teardown::AbortChunk;
use crate::packet::teardown::ErrorChunk;
use crate::sm::Command;
use crate::sm::Decision;
use crate::sm::Disposition;
use crate::sm::command::Destination;
use crate::sm::command::Notification;
use crate::sm::command::OutPacket;
#[cfg(not(test))]
use log::warn;
#[cfg(test)]
use std::println as warn;

/// ABORT from the peer, with a tag that passed verification.
///
/// From <https://datatracker.ietf.org/doc/html/rfc9260#section-9.1>:
///
///   Upon receipt of the ABORT chunk, the receiving endpoint MUST NOT send any more chunks. It
///   removes the association and reports it to the upper layer.
pub(crate) fn abort(assoc: &Association, chunk: &AbortChunk) -> Decision {
    let reason = error_causes::describe(&chunk.error_causes);
    warn!("Association {} aborted by peer: {reason}", assoc.id);
    let failed = if matches!(assoc.state, AssociationState::CookieWait | AssociationState::CookieEchoed)
    {
        Command::InitFailed(ErrorKind::PeerReported, reason)
    } else {
        Command::AssocFailed(ErrorKind::PeerReported, reason)
    };
    Decision::new(Disposition::DeleteTcb, vec![failed, Command::DeleteTcb])
}

/// The ABORT primitive. The peer is told, if its tag is known.
pub(crate) fn user_abort(assoc: &Association, reason: &str) -> Decision {
    let mut commands = vec![];
    if assoc.peer_vtag != 0 {
        commands.push(Command::SendPacket(OutPacket {
            vtag: assoc.peer_vtag,
            dest: Destination::Primary,
            chunks: vec![Chunk::Abort(AbortChunk {
                tag_reflected: false,
                error_causes: vec![ErrorCause::UserInitiatedAbort(reason.to_string())],
            })],
        }));
    }
    commands.push(Command::EventUlp(Notification::Closed));
    commands.push(Command::DeleteTcb);
    Decision::new(Disposition::DeleteTcb, commands)
}

/// Ends the association from this side, after the peer stopped responding or misbehaved.
pub(crate) fn fail_association(kind: ErrorKind, reason: &str, cause: Option<ErrorCause>) -> Decision {
    warn!("Aborting association: {reason}");
    Decision::new(
        Disposition::Abort,
        vec![
            Command::Reply(Chunk::Abort(AbortChunk {
                tag_reflected: false,
                error_causes: cause.into_iter().collect(),
            })),
            Command::AssocFailed(kind, reason.to_string()),
            Command::DeleteTcb,
        ],
    )
}

/// An ERROR chunk, which is only informational. The association goes on.
pub(crate) fn operation_error(chunk: &ErrorChunk) -> Decision {
    let reason = error_causes::describe(&chunk.error_causes);
    warn!("Peer reported error: {reason}");
    Decision::consume(vec![Command::EventUlp(Notification::Error(ErrorKind::PeerReported, reason))])
}
