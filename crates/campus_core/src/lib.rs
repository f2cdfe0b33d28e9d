/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

pub mod cache;
pub mod coordinator;
pub mod http_retry;
pub mod ledger;
pub mod metrics;
pub mod notices;
pub mod record;
pub mod refresh;
pub mod remote;
pub mod runtime;
pub mod store;

pub use cache::{merge, KindPolicy, ListFilter};
pub use coordinator::{Coordinator, MutationError, Outcome, VoteOutcome};
pub use ledger::{VoteLedger, VoteRequest, VoteState};
pub use notices::{Notice, NoticeLevel};
pub use record::{Kind, Origin, Record, Tally};
pub use remote::{HttpRemote, OfflineRemote, RemoteError, RemoteSource};
pub use store::{LocalStore, MemoryStore, SqliteStore};

pub fn campus_core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
