/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Per-user vote/like bookkeeping.
//!
//! One entry per `(user, record)`. Voting the same direction twice retracts the
//! vote; switching direction moves the single vote; likes flip. Counts saturate
//! at zero so a ledger that drifted from the server tally can never drive a
//! count negative.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::record::{Kind, Record, Tally};
use crate::store::{load_json, save_json, votes_key, LocalStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteState {
    Up,
    Down,
    Liked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteRequest {
    Up,
    Down,
    ToggleLike,
}

impl VoteRequest {
    /// Votes go to up/down tallies, likes to like counts.
    pub fn applies_to(self, tally: Tally) -> bool {
        matches!(
            (tally, self),
            (Tally::Votes { .. }, VoteRequest::Up | VoteRequest::Down)
                | (Tally::Likes { .. }, VoteRequest::ToggleLike)
        )
    }

    /// Direction string the vote endpoint expects.
    pub fn wire_direction(self) -> &'static str {
        match self {
            VoteRequest::Up => "up",
            VoteRequest::Down => "down",
            VoteRequest::ToggleLike => "like",
        }
    }
}

/// Computes the tally and stored vote after `request`, given the user's `prior` vote.
pub fn transition(
    tally: Tally,
    prior: Option<VoteState>,
    request: VoteRequest,
) -> (Tally, Option<VoteState>) {
    match (tally, request) {
        (Tally::Votes { upvotes, downvotes }, VoteRequest::Up | VoteRequest::Down) => {
            let requested = if request == VoteRequest::Up {
                VoteState::Up
            } else {
                VoteState::Down
            };
            let (mut up, mut down) = (upvotes, downvotes);
            match prior {
                Some(VoteState::Up) => up = up.saturating_sub(1),
                Some(VoteState::Down) => down = down.saturating_sub(1),
                _ => {}
            }
            if prior == Some(requested) {
                return (
                    Tally::Votes {
                        upvotes: up,
                        downvotes: down,
                    },
                    None,
                );
            }
            match requested {
                VoteState::Up => up = up.saturating_add(1),
                _ => down = down.saturating_add(1),
            }
            (
                Tally::Votes {
                    upvotes: up,
                    downvotes: down,
                },
                Some(requested),
            )
        }
        (Tally::Likes { likes }, VoteRequest::ToggleLike) => {
            if prior == Some(VoteState::Liked) {
                (
                    Tally::Likes {
                        likes: likes.saturating_sub(1),
                    },
                    None,
                )
            } else {
                (
                    Tally::Likes {
                        likes: likes.saturating_add(1),
                    },
                    Some(VoteState::Liked),
                )
            }
        }
        // Request does not apply to this tally shape.
        (tally, _) => (tally, prior),
    }
}

/// Increments the requested direction without consulting any ledger.
pub fn bump(tally: Tally, request: VoteRequest) -> Tally {
    match (tally, request) {
        (Tally::Votes { upvotes, downvotes }, VoteRequest::Up) => Tally::Votes {
            upvotes: upvotes.saturating_add(1),
            downvotes,
        },
        (Tally::Votes { upvotes, downvotes }, VoteRequest::Down) => Tally::Votes {
            upvotes,
            downvotes: downvotes.saturating_add(1),
        },
        (Tally::Likes { likes }, VoteRequest::ToggleLike) => Tally::Likes {
            likes: likes.saturating_add(1),
        },
        (tally, _) => tally,
    }
}

#[derive(Debug, Clone)]
pub struct VoteLedger {
    kind: Kind,
    user_id: String,
    entries: HashMap<String, VoteState>,
}

impl VoteLedger {
    pub fn new(kind: Kind, user_id: impl Into<String>) -> Self {
        Self {
            kind,
            user_id: user_id.into(),
            entries: HashMap::new(),
        }
    }

    pub fn load(store: &dyn LocalStore, kind: Kind, user_id: &str) -> Self {
        let entries = load_json(store, &votes_key(kind, user_id));
        Self {
            kind,
            user_id: user_id.to_string(),
            entries,
        }
    }

    pub fn save(&self, store: &dyn LocalStore) -> Result<()> {
        save_json(store, &votes_key(self.kind, &self.user_id), &self.entries)
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn get(&self, record_id: &str) -> Option<VoteState> {
        self.entries.get(record_id).copied()
    }

    pub fn set(&mut self, record_id: &str, state: Option<VoteState>) {
        match state {
            Some(v) => {
                self.entries.insert(record_id.to_string(), v);
            }
            None => {
                self.entries.remove(record_id);
            }
        }
    }

    pub fn forget(&mut self, record_id: &str) {
        self.entries.remove(record_id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Applies `request` to `record` in place and records the user's new vote.
    pub fn apply(
        &mut self,
        record: &mut Record,
        request: VoteRequest,
    ) -> (Tally, Option<VoteState>) {
        let prior = self.get(&record.id);
        let (tally, state) = transition(record.tally, prior, request);
        record.tally = tally;
        self.set(&record.id, state);
        (tally, state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Origin;
    use crate::store::MemoryStore;

    fn votes(upvotes: u64, downvotes: u64) -> Tally {
        Tally::Votes { upvotes, downvotes }
    }

    fn demo_record() -> Record {
        Record {
            id: "demo_conf_1".to_string(),
            kind: Kind::Confession,
            origin: Origin::Local,
            timestamp: 1,
            tally: votes(23, 1),
            fields: Default::default(),
        }
    }

    #[test]
    fn same_vote_twice_retracts() {
        let mut ledger = VoteLedger::new(Kind::Confession, "alice");
        let mut rec = demo_record();

        let (t, s) = ledger.apply(&mut rec, VoteRequest::Up);
        assert_eq!(t, votes(24, 1));
        assert_eq!(s, Some(VoteState::Up));
        assert_eq!(ledger.get("demo_conf_1"), Some(VoteState::Up));

        let (t, s) = ledger.apply(&mut rec, VoteRequest::Up);
        assert_eq!(t, votes(23, 1));
        assert_eq!(s, None);
        assert!(ledger.get("demo_conf_1").is_none());
    }

    #[test]
    fn switching_direction_moves_the_single_vote() {
        let mut ledger = VoteLedger::new(Kind::Confession, "alice");
        let mut rec = demo_record();
        ledger.apply(&mut rec, VoteRequest::Up);
        let (t, s) = ledger.apply(&mut rec, VoteRequest::Down);
        assert_eq!(t, votes(23, 2));
        assert_eq!(s, Some(VoteState::Down));
    }

    #[test]
    fn likes_flip() {
        let (t, s) = transition(Tally::Likes { likes: 4 }, None, VoteRequest::ToggleLike);
        assert_eq!(t, Tally::Likes { likes: 5 });
        assert_eq!(s, Some(VoteState::Liked));
        let (t, s) = transition(t, s, VoteRequest::ToggleLike);
        assert_eq!(t, Tally::Likes { likes: 4 });
        assert_eq!(s, None);
    }

    #[test]
    fn desynchronized_ledger_never_goes_negative() {
        let (t, _) = transition(votes(0, 0), Some(VoteState::Up), VoteRequest::Up);
        assert_eq!(t, votes(0, 0));
        let (t, _) = transition(votes(0, 0), Some(VoteState::Up), VoteRequest::Down);
        assert_eq!(t, votes(0, 1));
        let likes = Tally::Likes { likes: 0 };
        let (t, _) = transition(likes, Some(VoteState::Liked), VoteRequest::ToggleLike);
        assert_eq!(t, Tally::Likes { likes: 0 });
    }

    #[test]
    fn mismatched_request_is_a_no_op() {
        let (t, s) = transition(Tally::None, None, VoteRequest::Up);
        assert_eq!(t, Tally::None);
        assert_eq!(s, None);
        let (t, s) = transition(votes(1, 1), Some(VoteState::Up), VoteRequest::ToggleLike);
        assert_eq!(t, votes(1, 1));
        assert_eq!(s, Some(VoteState::Up));
    }

    #[test]
    fn arbitrary_sequences_keep_one_vote_per_user() {
        let seq = [
            VoteRequest::Up,
            VoteRequest::Down,
            VoteRequest::Down,
            VoteRequest::Up,
            VoteRequest::Up,
            VoteRequest::Down,
            VoteRequest::Up,
        ];
        let mut ledger = VoteLedger::new(Kind::Feedback, "bob");
        let mut rec = demo_record();
        for req in seq {
            let (t, s) = ledger.apply(&mut rec, req);
            let Tally::Votes { upvotes, downvotes } = t else {
                panic!("tally shape changed");
            };
            let expected = match s {
                Some(VoteState::Up) => (24, 1),
                Some(VoteState::Down) => (23, 2),
                _ => (23, 1),
            };
            assert_eq!((upvotes, downvotes), expected);
        }
    }

    #[test]
    fn ledgers_are_isolated_per_user() {
        let store = MemoryStore::new();
        let mut alice = VoteLedger::load(&store, Kind::Confession, "alice");
        alice.set("r1", Some(VoteState::Up));
        alice.save(&store).unwrap();

        let bob = VoteLedger::load(&store, Kind::Confession, "bob");
        assert!(bob.is_empty());
        let alice = VoteLedger::load(&store, Kind::Confession, "alice");
        assert_eq!(alice.get("r1"), Some(VoteState::Up));
        assert_eq!(alice.user_id(), "alice");
    }

    #[test]
    fn requests_match_tally_shapes() {
        assert!(VoteRequest::Down.applies_to(votes(0, 0)));
        assert!(VoteRequest::ToggleLike.applies_to(Tally::Likes { likes: 2 }));
        assert!(!VoteRequest::Up.applies_to(Tally::Likes { likes: 2 }));
        assert!(!VoteRequest::ToggleLike.applies_to(votes(1, 0)));
        assert!(!VoteRequest::Up.applies_to(Tally::None));
    }

    #[test]
    fn bump_ignores_the_ledger() {
        assert_eq!(bump(votes(1, 1), VoteRequest::Down), votes(1, 2));
        assert_eq!(
            bump(Tally::Likes { likes: 0 }, VoteRequest::ToggleLike),
            Tally::Likes { likes: 1 }
        );
    }
}
