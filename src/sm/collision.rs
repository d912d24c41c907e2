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
use crate::association::new_initial_tsn;
use crate::association::new_verification_tag;
use crate::association::state_cookie::StateCookie;
use crate::types::Tsn;

/// The verification tags and tie-tags of one incarnation of an association.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub(crate) struct Tags {
    pub my_vtag: u32,
    pub peer_vtag: u32,
    pub my_ttag: u32,
    pub peer_ttag: u32,
}

impl From<&Association> for Tags {
    fn from(assoc: &Association) -> Self {
        Self {
            my_vtag: assoc.my_vtag,
            peer_vtag: assoc.peer_vtag,
            my_ttag: assoc.my_ttag,
            peer_ttag: assoc.peer_ttag,
        }
    }
}

impl From<&StateCookie> for Tags {
    fn from(cookie: &StateCookie) -> Self {
        Self {
            my_vtag: cookie.my_vtag,
            peer_vtag: cookie.peer_vtag,
            my_ttag: cookie.my_ttag,
            peer_ttag: cookie.peer_ttag,
        }
    }
}

/// How a COOKIE-ECHO relates to an association that already exists. See
/// <https://datatracker.ietf.org/doc/html/rfc9260#section-5.2.4>.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Collision {
    /// Case A: The peer restarted.
    PeerRestarted,
    /// Case B: Simultaneous INIT.
    SimultaneousInit,
    /// Case C: A cookie from an older exchange arrived late. Silently discard.
    LateCookie,
    /// Case D: Tags match. The COOKIE-ACK was probably lost.
    Duplicate,
    /// Case E: None of the above. Silently discard.
    Unclassified,
}

/// Compares the tags of the existing association (`old`) with the ones carried in the state
/// cookie (`new`).
pub(crate) fn classify(old: Tags, new: Tags) -> Collision {
    let my_matches = old.my_vtag == new.my_vtag;
    let peer_matches = old.peer_vtag == new.peer_vtag;
    let no_tie_tags = new.my_ttag == 0 && new.peer_ttag == 0;

    if !my_matches
        && !peer_matches
        && new.my_ttag == old.my_vtag
        && new.peer_ttag == old.peer_vtag
    {
        Collision::PeerRestarted
    } else if my_matches && peer_matches {
        // Before B, which would otherwise match when the tie-tags are zero.
        Collision::Duplicate
    } else if my_matches && (!peer_matches || no_tie_tags) {
        Collision::SimultaneousInit
    } else if !my_matches && peer_matches && no_tie_tags {
        Collision::LateCookie
    } else {
        Collision::Unclassified
    }
}

/// The tags and initial TSN that go into an INIT-ACK, answering an INIT.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct InitAckTags {
    pub my_vtag: u32,
    pub initial_tsn: Tsn,
    pub my_ttag: u32,
    pub peer_ttag: u32,
}

/// Picks the tags for an INIT-ACK, depending on which association (if any) already exists.
///
/// From <https://datatracker.ietf.org/doc/html/rfc9260#section-5.2.1>:
///
///   Upon receipt of an INIT chunk in the COOKIE-WAIT state, an endpoint MUST respond with an INIT
///   ACK chunk using the same parameters it sent in its original INIT chunk (including its
///   Initiate Tag, unchanged). When responding, the following rules MUST be applied: [...] the
///   endpoint MUST populate its Tie-Tags within both the association TCB and inside the State
///   Cookie.
///
/// From <https://datatracker.ietf.org/doc/html/rfc9260#section-5.2.2>:
///
///   Unless otherwise stated, upon receipt of an unexpected INIT chunk for this association, the
///   endpoint MUST generate an INIT ACK chunk with a State Cookie. [...] In the outbound INIT
///   ACK chunk, the endpoint MUST copy its current Tie-Tags to a reserved place within the State
///   Cookie and the association's TCB.
pub(crate) fn init_ack_tags(old: Option<&Association>) -> InitAckTags {
    match old {
        None => InitAckTags {
            my_vtag: new_verification_tag(),
            initial_tsn: new_initial_tsn(),
            my_ttag: 0,
            peer_ttag: 0,
        },
        Some(old) if old.state == AssociationState::CookieWait => InitAckTags {
            my_vtag: old.my_vtag,
            initial_tsn: old.initial_tsn,
            my_ttag: old.my_vtag,
            peer_ttag: 0,
        },
        Some(old) if old.state == AssociationState::CookieEchoed => InitAckTags {
            my_vtag: old.my_vtag,
            initial_tsn: old.initial_tsn,
            my_ttag: old.my_vtag,
            peer_ttag: old.peer_vtag,
        },
        Some(old) => InitAckTags {
            my_vtag: new_verification_tag(),
            initial_tsn: new_initial_tsn(),
            my_ttag: old.my_vtag,
            peer_ttag: old.peer_vtag,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Options;
    use crate::testing::fixtures::MY_VTAG;
    use crate::testing::fixtures::PEER_VTAG;
    use crate::testing::fixtures::in_state;

    const OLD: Tags = Tags { my_vtag: MY_VTAG, peer_vtag: PEER_VTAG, my_ttag: 0, peer_ttag: 0 };

    fn new(my_vtag: u32, peer_vtag: u32, my_ttag: u32, peer_ttag: u32) -> Tags {
        Tags { my_vtag, peer_vtag, my_ttag, peer_ttag }
    }

    #[test]
    fn peer_restart_is_case_a() {
        assert_eq!(classify(OLD, new(7, 8, MY_VTAG, PEER_VTAG)), Collision::PeerRestarted);
    }

    #[test]
    fn simultaneous_init_is_case_b() {
        assert_eq!(classify(OLD, new(MY_VTAG, 8, MY_VTAG, 0)), Collision::SimultaneousInit);
        assert_eq!(classify(OLD, new(MY_VTAG, 8, 0, 0)), Collision::SimultaneousInit);
    }

    #[test]
    fn late_cookie_is_case_c() {
        assert_eq!(classify(OLD, new(7, PEER_VTAG, 0, 0)), Collision::LateCookie);
    }

    #[test]
    fn matching_tags_are_case_d_even_without_tie_tags() {
        assert_eq!(classify(OLD, new(MY_VTAG, PEER_VTAG, 0, 0)), Collision::Duplicate);
        assert_eq!(classify(OLD, new(MY_VTAG, PEER_VTAG, 5, 6)), Collision::Duplicate);
    }

    #[test]
    fn anything_else_is_case_e() {
        assert_eq!(classify(OLD, new(7, 8, 9, 10)), Collision::Unclassified);
        assert_eq!(classify(OLD, new(7, PEER_VTAG, 1, 0)), Collision::Unclassified);
        assert_eq!(classify(OLD, new(7, 8, MY_VTAG, 0)), Collision::Unclassified);
    }

    #[test]
    fn classification_is_total_and_deterministic() {
        let values = [0, 1, MY_VTAG, PEER_VTAG];
        let mut counts = [0usize; 5];
        for old_my in values {
            for old_peer in values {
                for my in values {
                    for peer in values {
                        for my_t in values {
                            for peer_t in values {
                                let old = new(old_my, old_peer, 0, 0);
                                let cookie = new(my, peer, my_t, peer_t);
                                let c = classify(old, cookie);
                                assert_eq!(classify(old, cookie), c);
                                counts[c as usize] += 1;
                            }
                        }
                    }
                }
            }
        }
        assert_eq!(counts.iter().sum::<usize>(), 4usize.pow(6));
        assert!(counts.iter().all(|n| *n > 0));
    }

    #[test]
    fn init_ack_tags_without_association_are_fresh() {
        let tags = init_ack_tags(None);
        assert_ne!(tags.my_vtag, 0);
        assert_eq!((tags.my_ttag, tags.peer_ttag), (0, 0));
    }

    #[test]
    fn init_ack_tags_in_cookie_wait_reuse_own_tag() {
        let old = in_state(AssociationState::CookieWait, &Options::default());
        let tags = init_ack_tags(Some(&old));
        assert_eq!(tags.my_vtag, old.my_vtag);
        assert_eq!(tags.initial_tsn, old.initial_tsn);
        assert_eq!((tags.my_ttag, tags.peer_ttag), (old.my_vtag, 0));
    }

    #[test]
    fn init_ack_tags_in_cookie_echoed_fill_both_tie_tags() {
        let old = in_state(AssociationState::CookieEchoed, &Options::default());
        let tags = init_ack_tags(Some(&old));
        assert_eq!(tags.my_vtag, MY_VTAG);
        assert_eq!((tags.my_ttag, tags.peer_ttag), (MY_VTAG, PEER_VTAG));
    }

    #[test]
    fn init_ack_tags_when_established_use_new_tag() {
        let old = in_state(AssociationState::Established, &Options::default());
        let tags = init_ack_tags(Some(&old));
        assert_ne!(tags.my_vtag, MY_VTAG);
        assert_eq!((tags.my_ttag, tags.peer_ttag), (MY_VTAG, PEER_VTAG));
    }
}
