/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Optimistic mutation coordinator.
//!
//! Every action resolves to a consistent view whatever the network does:
//! creates and votes fall back to local state, updates and deletes of
//! server records surface an error instead. State is only touched under the
//! session lock and the lock is never held across an await, so completions
//! always read-modify-write the state current at completion time. Each
//! dispatch on a server record takes a fresh revision; a response whose
//! revision has been superseded is dropped.

use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::{broadcast, Notify};
use tracing::{debug, info, warn};

use crate::cache::{merge, KindPolicy, ListFilter, LocalRecords};
use crate::ledger::{bump, transition, VoteLedger, VoteRequest, VoteState};
use crate::metrics::SyncMetrics;
use crate::notices::Notice;
use crate::record::{now_ms, Kind, Record, Tally};
use crate::remote::{RemoteError, RemoteSource};
use crate::store::LocalStore;

#[derive(Debug, Error)]
pub enum MutationError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("{kind:?} record {id} not found")]
    NotFound { kind: Kind, id: String },
    #[error("{request:?} does not apply to {kind:?} records")]
    Unsupported { kind: Kind, request: VoteRequest },
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

#[derive(Debug, Clone)]
pub enum Outcome {
    /// Confirmed by the server.
    Synced,
    /// Local-only record; the server is never involved.
    Local,
    /// Completed locally because the server call failed.
    Degraded(Notice),
}

impl Outcome {
    pub fn is_degraded(&self) -> bool {
        matches!(self, Outcome::Degraded(_))
    }
}

#[derive(Debug, Clone)]
pub struct VoteOutcome {
    pub tally: Tally,
    pub vote: Option<VoteState>,
    pub outcome: Outcome,
}

struct KindState {
    policy: KindPolicy,
    merged: Vec<Record>,
    filter: ListFilter,
    ledger: VoteLedger,
    revisions: HashMap<String, u64>,
    refetch_pending: bool,
}

impl KindState {
    fn new(policy: KindPolicy, ledger: VoteLedger, local: Vec<Record>) -> Self {
        Self {
            merged: merge(&[], &local),
            policy,
            filter: ListFilter::default(),
            ledger,
            revisions: HashMap::new(),
            refetch_pending: false,
        }
    }

    fn find_mut(&mut self, id: &str) -> Option<&mut Record> {
        self.merged.iter_mut().find(|r| r.id == id)
    }

    fn prepend(&mut self, rec: Record) {
        self.merged.retain(|r| r.id != rec.id);
        self.merged.insert(0, rec);
    }

    fn replace(&mut self, rec: Record) {
        match self.find_mut(&rec.id) {
            Some(slot) => *slot = rec,
            None => self.prepend(rec),
        }
    }

    /// Ids whose latest dispatch or confirmation is newer than `revision`.
    fn touched_since(&self, revision: u64) -> HashSet<String> {
        self.revisions
            .iter()
            .filter(|(_, r)| **r > revision)
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn is_latest(&self, id: &str, revision: u64) -> bool {
        self.revisions.get(id).copied().unwrap_or(0) == revision
    }
}

/// What a remote vote needs to settle once its response arrives.
struct VoteDispatch {
    prior: Option<VoteState>,
    intended: Option<VoteState>,
    voter: String,
    epoch: u64,
    revision: u64,
}

struct SessionState {
    user_id: String,
    /// Bumped on every user switch.
    epoch: u64,
    kinds: HashMap<Kind, KindState>,
    next_revision: u64,
}

impl SessionState {
    fn kind_mut(&mut self, kind: Kind) -> &mut KindState {
        let user = &self.user_id;
        self.kinds.entry(kind).or_insert_with(|| {
            let ledger = VoteLedger::new(kind, user.clone());
            KindState::new(KindPolicy::builtin(kind), ledger, Vec::new())
        })
    }

    fn bump_revision(&mut self, kind: Kind, id: &str) -> u64 {
        self.next_revision = self.next_revision.saturating_add(1);
        let rev = self.next_revision;
        self.kind_mut(kind).revisions.insert(id.to_string(), rev);
        rev
    }
}

struct Inner {
    store: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteSource>,
    metrics: Arc<SyncMetrics>,
    notices: broadcast::Sender<Notice>,
    refetch: Notify,
    state: Mutex<SessionState>,
}

#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

impl Coordinator {
    pub fn new(
        store: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteSource>,
        metrics: Arc<SyncMetrics>,
        user_id: &str,
    ) -> Self {
        Self::with_policies(
            store,
            remote,
            metrics,
            user_id,
            Kind::ALL.iter().map(|k| KindPolicy::builtin(*k)).collect(),
        )
    }

    pub fn with_policies(
        store: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteSource>,
        metrics: Arc<SyncMetrics>,
        user_id: &str,
        policies: Vec<KindPolicy>,
    ) -> Self {
        let mut kinds = HashMap::new();
        for policy in policies {
            let kind = policy.kind;
            let ledger = VoteLedger::load(store.as_ref(), kind, user_id);
            let local = LocalRecords::load(store.as_ref(), kind);
            kinds.insert(kind, KindState::new(policy, ledger, local));
        }
        let (notices, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Inner {
                store,
                remote,
                metrics,
                notices,
                refetch: Notify::new(),
                state: Mutex::new(SessionState {
                    user_id: user_id.to_string(),
                    kinds,
                    epoch: 0,
                    next_revision: 0,
                }),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn store(&self) -> &dyn LocalStore {
        self.inner.store.as_ref()
    }

    fn publish(&self, notice: &Notice) {
        let _ = self.inner.notices.send(notice.clone());
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.inner.notices.subscribe()
    }

    pub fn metrics(&self) -> Arc<SyncMetrics> {
        self.inner.metrics.clone()
    }

    pub fn user_id(&self) -> String {
        self.state().user_id.clone()
    }

    /// Switches the session user; ledgers are reloaded from that user's keys.
    pub fn set_user(&self, user_id: &str) {
        let mut st = self.state();
        if st.user_id == user_id {
            return;
        }
        st.user_id = user_id.to_string();
        st.epoch = st.epoch.saturating_add(1);
        for (kind, ks) in st.kinds.iter_mut() {
            ks.ledger = VoteLedger::load(self.store(), *kind, user_id);
        }
        info!(user = user_id, "session user switched");
    }

    /// The visible collection under the last filter, newest first.
    pub fn collection(&self, kind: Kind) -> Vec<Record> {
        let mut st = self.state();
        let ks = st.kind_mut(kind);
        ks.policy.view(&ks.merged, &ks.filter)
    }

    pub fn record(&self, kind: Kind, id: &str) -> Option<Record> {
        let mut st = self.state();
        st.kind_mut(kind).merged.iter().find(|r| r.id == id).cloned()
    }

    pub fn vote_of(&self, kind: Kind, id: &str) -> Option<VoteState> {
        let mut st = self.state();
        st.kind_mut(kind).ledger.get(id)
    }

    /// Fetches `kind` from the server and reconciles it with the local store.
    ///
    /// Records mutated while the list call was in flight keep their current
    /// state; the listing only covers what the server knew at dispatch.
    pub async fn refresh(&self, kind: Kind, filter: ListFilter) -> Vec<Record> {
        let dispatched_at = self.state().next_revision;
        let listed = match self.inner.remote.list(kind, &filter).await {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(kind = ?kind, "list failed, showing cached records: {e}");
                self.publish(&Notice::degraded(kind, None, "Offline: showing saved posts"));
                None
            }
        };
        self.inner.metrics.refresh(listed.is_some());

        let mut st = self.state();
        let store = self.inner.store.clone();
        let ks = st.kind_mut(kind);
        let pinned = ks.touched_since(dispatched_at);
        let mut remote: Vec<Record> = ks
            .merged
            .iter()
            .filter(|r| pinned.contains(&r.id))
            .cloned()
            .collect();
        let had_listing = listed.is_some();
        if let Some(listed) = listed {
            if filter.is_empty() {
                let res =
                    LocalRecords::replace_remote_snapshot(store.as_ref(), kind, &listed, &pinned);
                if let Err(e) = res {
                    warn!(kind = ?kind, "snapshot write failed: {e:#}");
                }
            }
            remote.extend(listed.into_iter().filter(|r| !pinned.contains(&r.id)));
        }
        if !pinned.is_empty() {
            debug!(kind = ?kind, kept = pinned.len(), "kept records changed during refresh");
        }

        let mut merged = merge(&remote, &LocalRecords::load(store.as_ref(), kind));
        let seeded = match ks.policy.bootstrap(store.as_ref(), &merged) {
            Ok(n) => n,
            Err(e) => {
                warn!(kind = ?kind, "bootstrap failed: {e:#}");
                0
            }
        };
        if seeded > 0 {
            self.inner.metrics.seeded(seeded as u64);
            merged = merge(&remote, &LocalRecords::load(store.as_ref(), kind));
            self.publish(&Notice::info(
                kind,
                None,
                "Showing sample posts until the board fills up",
            ));
        }
        ks.merged = merged;
        ks.filter = filter;
        // A mutation confirmed during the call still needs its own refetch.
        if had_listing && pinned.is_empty() {
            ks.refetch_pending = false;
        }
        ks.policy.view(&ks.merged, &ks.filter)
    }

    pub async fn create(
        &self,
        kind: Kind,
        fields: Map<String, Value>,
    ) -> Result<(Record, Outcome), MutationError> {
        {
            let mut st = self.state();
            if let Some(name) = st.kind_mut(kind).policy.missing_field(&fields) {
                return Err(MutationError::MissingField(name));
            }
        }

        let (rec, outcome) = match self.inner.remote.create(kind, &fields).await {
            Ok(rec) => (rec, Outcome::Synced),
            Err(e) => {
                warn!(kind = ?kind, "create failed, keeping local copy: {e}");
                self.inner.metrics.degraded_create();
                let rec = Record::new_local(kind, fields);
                let notice = Notice::degraded(
                    kind,
                    Some(rec.id.as_str()),
                    "Saved on this device; it will not be shared until you are back online",
                );
                self.publish(&notice);
                (rec, Outcome::Degraded(notice))
            }
        };

        let mut st = self.state();
        st.bump_revision(kind, &rec.id);
        st.kind_mut(kind).prepend(rec.clone());
        if let Err(e) = LocalRecords::upsert(self.store(), &rec) {
            warn!(id = %rec.id, "local persist failed: {e:#}");
        }
        Ok((rec, outcome))
    }

    pub async fn vote(
        &self,
        kind: Kind,
        id: &str,
        request: VoteRequest,
    ) -> Result<VoteOutcome, MutationError> {
        let dispatch = {
            let mut st = self.state();
            let store = self.inner.store.clone();
            let ks = st.kind_mut(kind);
            let (ledger, merged) = (&mut ks.ledger, &mut ks.merged);
            let Some(rec) = merged.iter_mut().find(|r| r.id == id) else {
                return Err(MutationError::NotFound {
                    kind,
                    id: id.to_string(),
                });
            };
            if !request.applies_to(rec.tally) {
                return Err(MutationError::Unsupported { kind, request });
            }

            if rec.is_local() {
                let (tally, vote) = ledger.apply(rec, request);
                let snapshot = rec.clone();
                if let Err(e) = ledger.save(store.as_ref()) {
                    warn!(kind = ?kind, "ledger persist failed: {e:#}");
                }
                if let Err(e) = LocalRecords::upsert(store.as_ref(), &snapshot) {
                    warn!(id, "local persist failed: {e:#}");
                }
                self.inner.metrics.local_mutation();
                return Ok(VoteOutcome {
                    tally,
                    vote,
                    outcome: Outcome::Local,
                });
            }

            let prior = ledger.get(id);
            let (_, intended) = transition(rec.tally, prior, request);
            ledger.set(id, intended);
            VoteDispatch {
                prior,
                intended,
                voter: st.user_id.clone(),
                epoch: st.epoch,
                revision: st.bump_revision(kind, id),
            }
        };

        let result = match request {
            VoteRequest::ToggleLike => self
                .inner
                .remote
                .like(kind, id)
                .await
                .map(|(_, likes)| Tally::Likes { likes }),
            VoteRequest::Up | VoteRequest::Down => self.inner.remote.vote(kind, id, request).await,
        };

        let mut st = self.state();
        let same_session = st.epoch == dispatch.epoch;
        let voter_is_current = st.user_id == dispatch.voter;
        let latest = st.kind_mut(kind).is_latest(id, dispatch.revision);
        if latest {
            // Confirmation time counts as a change for refreshes already in flight.
            st.bump_revision(kind, id);
        }
        let ks = st.kind_mut(kind);
        if !latest {
            debug!(id, revision = dispatch.revision, "vote response superseded");
            self.inner.metrics.stale_response();
        }
        match result {
            Ok(tally) => {
                if latest {
                    if let Some(rec) = ks.find_mut(id) {
                        rec.tally = tally;
                    }
                }
                let vote = if same_session {
                    if latest {
                        if let Err(e) = ks.ledger.save(self.store()) {
                            warn!(kind = ?kind, "ledger persist failed: {e:#}");
                        }
                    }
                    ks.ledger.get(id)
                } else {
                    // The session switched users while the call was in flight.
                    if latest || !voter_is_current {
                        self.settle_detached_vote(kind, &dispatch.voter, id, dispatch.intended);
                    }
                    if latest && voter_is_current {
                        ks.ledger.set(id, dispatch.intended);
                    }
                    dispatch.intended
                };
                Ok(VoteOutcome {
                    tally: ks.find_mut(id).map(|r| r.tally).unwrap_or(tally),
                    vote,
                    outcome: Outcome::Synced,
                })
            }
            Err(e) => {
                warn!(kind = ?kind, id, "vote failed, counting locally: {e}");
                self.inner.metrics.degraded_vote();
                if latest {
                    if same_session {
                        ks.ledger.set(id, dispatch.prior);
                    }
                    if let Some(rec) = ks.find_mut(id) {
                        rec.tally = bump(rec.tally, request);
                    }
                }
                // A detached voter's stored ledger never saw the intent.
                let vote = if same_session {
                    ks.ledger.get(id)
                } else {
                    dispatch.prior
                };
                let notice = Notice::degraded(kind, Some(id), "Vote saved on this device only");
                self.publish(&notice);
                Ok(VoteOutcome {
                    tally: ks.find_mut(id).map(|r| r.tally).unwrap_or(Tally::None),
                    vote,
                    outcome: Outcome::Degraded(notice),
                })
            }
        }
    }

    fn settle_detached_vote(&self, kind: Kind, voter: &str, id: &str, vote: Option<VoteState>) {
        let mut ledger = VoteLedger::load(self.store(), kind, voter);
        ledger.set(id, vote);
        if let Err(e) = ledger.save(self.store()) {
            warn!(kind = ?kind, voter, "ledger persist failed: {e:#}");
        }
    }

    pub async fn update(
        &self,
        kind: Kind,
        id: &str,
        fields: Map<String, Value>,
    ) -> Result<Outcome, MutationError> {
        let local_patch = fields.clone();
        self.mutate(
            kind,
            id,
            move |rec| rec.fields.extend(local_patch),
            |remote| async move { remote.update(kind, id, &fields).await },
        )
        .await
    }

    /// Lost & found: flags an item as handed back to its owner.
    pub async fn mark_returned(&self, id: &str) -> Result<Outcome, MutationError> {
        self.mutate(
            Kind::LostFound,
            id,
            |rec| {
                rec.fields
                    .insert("status".to_string(), Value::String("returned".to_string()));
                rec.fields
                    .insert("returnedAt".to_string(), Value::from(now_ms()));
            },
            |remote| async move { remote.mark_returned(id).await },
        )
        .await
    }

    /// Feedback: moderation status change (pending, in_progress, resolved, ...).
    pub async fn update_status(&self, id: &str, status: &str) -> Result<Outcome, MutationError> {
        let owned = status.to_string();
        self.mutate(
            Kind::Feedback,
            id,
            move |rec| {
                rec.fields.insert("status".to_string(), Value::String(owned));
            },
            |remote| async move { remote.update_status(id, status).await },
        )
        .await
    }

    async fn mutate<L, R, Fut>(
        &self,
        kind: Kind,
        id: &str,
        local: L,
        remote_call: R,
    ) -> Result<Outcome, MutationError>
    where
        L: FnOnce(&mut Record),
        R: FnOnce(Arc<dyn RemoteSource>) -> Fut,
        Fut: std::future::Future<Output = Result<Record, RemoteError>>,
    {
        let revision = {
            let mut st = self.state();
            let ks = st.kind_mut(kind);
            let Some(rec) = ks.find_mut(id) else {
                return Err(MutationError::NotFound {
                    kind,
                    id: id.to_string(),
                });
            };
            if rec.is_local() {
                local(rec);
                let snapshot = rec.clone();
                if let Err(e) = LocalRecords::upsert(self.store(), &snapshot) {
                    warn!(id, "local persist failed: {e:#}");
                }
                self.inner.metrics.local_mutation();
                return Ok(Outcome::Local);
            }
            st.bump_revision(kind, id)
        };

        match remote_call(self.inner.remote.clone()).await {
            Ok(rec) => {
                let mut st = self.state();
                if st.kind_mut(kind).is_latest(id, revision) {
                    st.bump_revision(kind, id);
                    if let Err(e) = LocalRecords::upsert(self.store(), &rec) {
                        warn!(id, "cached copy update failed: {e:#}");
                    }
                    st.kind_mut(kind).replace(rec);
                } else {
                    self.inner.metrics.stale_response();
                }
                drop(st);
                self.schedule_refetch(kind);
                Ok(Outcome::Synced)
            }
            Err(e) => {
                warn!(kind = ?kind, id, "update failed: {e}");
                let message = format!("Could not save changes: {e}");
                self.publish(&Notice::error(kind, Some(id), message));
                Err(e.into())
            }
        }
    }

    /// Local records disappear at once; server records only after the next fetch.
    pub async fn delete(&self, kind: Kind, id: &str) -> Result<Outcome, MutationError> {
        {
            let mut st = self.state();
            let ks = st.kind_mut(kind);
            let Some(rec) = ks.find_mut(id) else {
                return Err(MutationError::NotFound {
                    kind,
                    id: id.to_string(),
                });
            };
            if rec.is_local() {
                ks.merged.retain(|r| r.id != id);
                ks.revisions.remove(id);
                ks.ledger.forget(id);
                if let Err(e) = LocalRecords::remove(self.store(), kind, id) {
                    warn!(id, "local delete failed: {e:#}");
                }
                if let Err(e) = ks.ledger.save(self.store()) {
                    warn!(kind = ?kind, "ledger persist failed: {e:#}");
                }
                self.inner.metrics.local_mutation();
                return Ok(Outcome::Local);
            }
        }

        match self.inner.remote.delete(kind, id).await {
            Ok(()) => {
                {
                    let mut st = self.state();
                    st.bump_revision(kind, id);
                    if let Err(e) = LocalRecords::remove(self.store(), kind, id) {
                        warn!(id, "cached copy removal failed: {e:#}");
                    }
                }
                self.schedule_refetch(kind);
                Ok(Outcome::Synced)
            }
            Err(e) => {
                warn!(kind = ?kind, id, "delete failed: {e}");
                self.publish(&Notice::error(kind, Some(id), format!("Could not delete: {e}")));
                Err(e.into())
            }
        }
    }

    pub fn schedule_refetch(&self, kind: Kind) {
        self.state().kind_mut(kind).refetch_pending = true;
        self.inner.refetch.notify_one();
    }

    pub fn refetch_pending(&self, kind: Kind) -> bool {
        self.state().kind_mut(kind).refetch_pending
    }

    /// Kinds waiting for a refetch together with their last filter.
    pub fn pending_refetches(&self) -> Vec<(Kind, ListFilter)> {
        let st = self.state();
        let mut out: Vec<(Kind, ListFilter)> = st
            .kinds
            .iter()
            .filter(|(_, ks)| ks.refetch_pending)
            .map(|(k, ks)| (*k, ks.filter.clone()))
            .collect();
        out.sort_by_key(|(k, _)| *k);
        out
    }

    /// Last filters used per kind, for periodic refreshes.
    pub fn active_filters(&self) -> Vec<(Kind, ListFilter)> {
        let st = self.state();
        let mut out: Vec<(Kind, ListFilter)> =
            st.kinds.iter().map(|(k, ks)| (*k, ks.filter.clone())).collect();
        out.sort_by_key(|(k, _)| *k);
        out
    }

    pub(crate) async fn refetch_requested(&self) {
        self.inner.refetch.notified().await;
    }
}
