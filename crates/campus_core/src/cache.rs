/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::Result;
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use tracing::info;

use crate::record::{now_ms, Kind, Origin, Record, Tally};
use crate::store::{load_json, records_key, save_json, LocalStore};

/// Union of `remote` and every `local` record whose id the server did not return,
/// newest first. Equal timestamps keep input order (remote before local).
pub fn merge(remote: &[Record], local: &[Record]) -> Vec<Record> {
    let mut seen: HashSet<&str> = HashSet::with_capacity(remote.len() + local.len());
    let mut out = Vec::with_capacity(remote.len() + local.len());
    for rec in remote.iter().chain(local.iter()) {
        if seen.insert(rec.id.as_str()) {
            out.push(rec.clone());
        }
    }
    // sort_by is stable
    out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    out
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilter {
    /// Exact matches on kind-specific fields (category, status, type, ...).
    pub equals: Vec<(String, String)>,
    /// Case-insensitive substring over every string field.
    pub search: Option<String>,
}

impl ListFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.equals.push((name.into(), value.into()));
        self
    }

    pub fn with_search(mut self, q: impl Into<String>) -> Self {
        let q = q.into();
        self.search = if q.trim().is_empty() { None } else { Some(q) };
        self
    }

    pub fn is_empty(&self) -> bool {
        self.equals.is_empty() && self.search.is_none()
    }

    pub fn matches(&self, rec: &Record) -> bool {
        for (name, want) in &self.equals {
            let have = match rec.fields.get(name) {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Bool(b)) => b.to_string(),
                Some(Value::Number(n)) => n.to_string(),
                _ => return false,
            };
            if !have.eq_ignore_ascii_case(want) {
                return false;
            }
        }
        if let Some(q) = self.search.as_deref() {
            let q = q.trim().to_lowercase();
            let hit = rec
                .fields
                .values()
                .filter_map(|v| v.as_str())
                .any(|s| s.to_lowercase().contains(&q));
            if !hit {
                return false;
            }
        }
        true
    }

    /// Query parameters for the list endpoint.
    pub fn to_query(&self) -> Vec<(String, String)> {
        let mut out = self.equals.clone();
        if let Some(q) = self.search.as_deref() {
            out.push(("search".to_string(), q.trim().to_string()));
        }
        out
    }
}

/// Per-kind display policy: legacy titles to hide and the sample set used to
/// populate an empty board.
#[derive(Debug, Clone)]
pub struct KindPolicy {
    pub kind: Kind,
    /// Fields a new record must carry as non-blank strings.
    pub required_fields: Vec<&'static str>,
    pub excluded_titles: Vec<String>,
    pub seeds: Vec<SeedRecord>,
}

#[derive(Debug, Clone)]
pub struct SeedRecord {
    pub id: &'static str,
    /// Age relative to the moment of seeding.
    pub age_ms: i64,
    pub tally: Tally,
    pub fields: Value,
}

impl SeedRecord {
    fn materialize(&self, kind: Kind, seeded_at_ms: i64) -> Record {
        let fields = match &self.fields {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        Record {
            id: self.id.to_string(),
            kind,
            origin: Origin::Local,
            timestamp: seeded_at_ms.saturating_sub(self.age_ms),
            tally: self.tally,
            fields,
        }
    }
}

const HOUR_MS: i64 = 3600 * 1000;

impl KindPolicy {
    pub fn builtin(kind: Kind) -> Self {
        let (excluded_titles, seeds) = match kind {
            Kind::Confession => (
                vec![],
                vec![
                    SeedRecord {
                        id: "demo_conf_1",
                        age_ms: 2 * HOUR_MS,
                        tally: Tally::Votes { upvotes: 23, downvotes: 1 },
                        fields: json!({
                            "content":
                                "I have been pretending to understand recursion since first year.",
                            "category": "academics",
                        }),
                    },
                    SeedRecord {
                        id: "demo_conf_2",
                        age_ms: 5 * HOUR_MS,
                        tally: Tally::Votes { upvotes: 15, downvotes: 2 },
                        fields: json!({
                            "content": "The library third floor is the best nap spot on campus.",
                            "category": "campus-life",
                        }),
                    },
                    SeedRecord {
                        id: "demo_conf_3",
                        age_ms: 26 * HOUR_MS,
                        tally: Tally::Votes { upvotes: 8, downvotes: 0 },
                        fields: json!({
                            "content": "I still don't know where the chemistry building is.",
                            "category": "general",
                        }),
                    },
                ],
            ),
            Kind::Feedback => (
                vec![],
                vec![
                    SeedRecord {
                        id: "demo_fb_1",
                        age_ms: 3 * HOUR_MS,
                        tally: Tally::Votes { upvotes: 12, downvotes: 0 },
                        fields: json!({
                            "title": "Wi-Fi drops in hostel block B",
                            "content": "Connection drops every evening between 8 and 11 pm.",
                            "category": "infrastructure",
                            "status": "pending",
                        }),
                    },
                    SeedRecord {
                        id: "demo_fb_2",
                        age_ms: 30 * HOUR_MS,
                        tally: Tally::Votes { upvotes: 7, downvotes: 1 },
                        fields: json!({
                            "title": "More vegetarian options in the canteen",
                            "content": "The menu repeats the same two dishes all week.",
                            "category": "food",
                            "status": "in_progress",
                        }),
                    },
                ],
            ),
            Kind::LostFound => (
                vec![],
                vec![
                    SeedRecord {
                        id: "demo_lf_1",
                        age_ms: 4 * HOUR_MS,
                        tally: Tally::None,
                        fields: json!({
                            "title": "Blue water bottle",
                            "description": "Steel bottle with a sticker, left in lecture hall 2.",
                            "type": "lost",
                            "category": "personal",
                            "location": "Lecture Hall 2",
                            "status": "open",
                        }),
                    },
                    SeedRecord {
                        id: "demo_lf_2",
                        age_ms: 20 * HOUR_MS,
                        tally: Tally::None,
                        fields: json!({
                            "title": "Calculator found",
                            "description": "Scientific calculator found near the main gate.",
                            "type": "found",
                            "category": "electronics",
                            "location": "Main Gate",
                            "status": "open",
                        }),
                    },
                ],
            ),
            Kind::Announcement => (
                // Placeholder posts shipped by early server builds.
                vec![
                    "Welcome to the Campus Board".to_string(),
                    "Library Hours Extended".to_string(),
                ],
                vec![
                    SeedRecord {
                        id: "demo_ann_1",
                        age_ms: HOUR_MS,
                        tally: Tally::Likes { likes: 18 },
                        fields: json!({
                            "title": "Mid-semester exam schedule published",
                            "content": "Check the academics portal for your timetable.",
                            "priority": "high",
                        }),
                    },
                    SeedRecord {
                        id: "demo_ann_2",
                        age_ms: 48 * HOUR_MS,
                        tally: Tally::Likes { likes: 5 },
                        fields: json!({
                            "title": "Cultural fest volunteers needed",
                            "content": "Sign up at the student council office by Friday.",
                            "priority": "normal",
                        }),
                    },
                ],
            ),
        };
        let required_fields = match kind {
            Kind::Confession => vec!["content"],
            Kind::Feedback => vec!["title", "content"],
            Kind::LostFound => vec!["title", "type"],
            Kind::Announcement => vec!["title", "content"],
        };
        Self {
            kind,
            required_fields,
            excluded_titles,
            seeds,
        }
    }

    pub fn missing_field(&self, fields: &Map<String, Value>) -> Option<&'static str> {
        self.required_fields.iter().copied().find(|name| {
            fields
                .get(*name)
                .and_then(|v| v.as_str())
                .map(|s| s.trim().is_empty())
                .unwrap_or(true)
        })
    }

    pub fn with_excluded_titles(mut self, titles: Vec<String>) -> Self {
        self.excluded_titles = titles;
        self
    }

    pub fn is_excluded(&self, rec: &Record) -> bool {
        match rec.title() {
            Some(t) => self.excluded_titles.iter().any(|x| x == t),
            None => false,
        }
    }

    /// Hides excluded records and applies `filter`.
    pub fn view(&self, merged: &[Record], filter: &ListFilter) -> Vec<Record> {
        merged
            .iter()
            .filter(|r| !self.is_excluded(r))
            .filter(|r| filter.matches(r))
            .cloned()
            .collect()
    }

    /// Writes the sample set into the store when nothing non-excluded is visible.
    /// Returns how many records were added; ids already stored are skipped.
    pub fn bootstrap(&self, store: &dyn LocalStore, merged: &[Record]) -> Result<usize> {
        if merged.iter().any(|r| !self.is_excluded(r)) || self.seeds.is_empty() {
            return Ok(0);
        }
        let mut stored = LocalRecords::load(store, self.kind);
        let known: HashSet<String> = stored.iter().map(|r| r.id.clone()).collect();
        let seeded_at = now_ms();
        let mut added = 0usize;
        for seed in &self.seeds {
            if known.contains(seed.id) {
                continue;
            }
            stored.push(seed.materialize(self.kind, seeded_at));
            added += 1;
        }
        if added > 0 {
            LocalRecords::save(store, self.kind, &stored)?;
            info!(kind = ?self.kind, added, "seeded sample records");
        }
        Ok(added)
    }
}

/// Records of one kind held in the local store.
pub struct LocalRecords;

impl LocalRecords {
    pub fn load(store: &dyn LocalStore, kind: Kind) -> Vec<Record> {
        let mut out: Vec<Record> = load_json(store, &records_key(kind));
        out.retain(|r| r.kind == kind);
        out
    }

    pub fn save(store: &dyn LocalStore, kind: Kind, records: &[Record]) -> Result<()> {
        save_json(store, &records_key(kind), &records)
    }

    /// Inserts or replaces by id against the latest stored copy.
    pub fn upsert(store: &dyn LocalStore, rec: &Record) -> Result<()> {
        let mut stored = Self::load(store, rec.kind);
        match stored.iter_mut().find(|r| r.id == rec.id) {
            Some(slot) => *slot = rec.clone(),
            None => stored.insert(0, rec.clone()),
        }
        Self::save(store, rec.kind, &stored)
    }

    pub fn remove(store: &dyn LocalStore, kind: Kind, id: &str) -> Result<bool> {
        let mut stored = Self::load(store, kind);
        let before = stored.len();
        stored.retain(|r| r.id != id);
        if stored.len() == before {
            return Ok(false);
        }
        Self::save(store, kind, &stored)?;
        Ok(true)
    }

    /// Replaces the cached server copies with `remote`, keeping local-origin
    /// records and the stored copies of `pinned` ids, which changed after the
    /// list was requested and must not be overwritten by it.
    pub fn replace_remote_snapshot(
        store: &dyn LocalStore,
        kind: Kind,
        remote: &[Record],
        pinned: &HashSet<String>,
    ) -> Result<()> {
        let mut stored = Self::load(store, kind);
        stored.retain(|r| r.origin == Origin::Local || pinned.contains(&r.id));
        stored.extend(remote.iter().filter(|r| !pinned.contains(&r.id)).cloned());
        Self::save(store, kind, &stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn rec(id: &str, ts: i64, origin: Origin) -> Record {
        Record {
            id: id.to_string(),
            kind: Kind::Confession,
            origin,
            timestamp: ts,
            tally: Tally::Votes { upvotes: 0, downvotes: 0 },
            fields: Map::new(),
        }
    }

    fn ids(v: &[Record]) -> Vec<&str> {
        v.iter().map(|r| r.id.as_str()).collect()
    }

    #[test]
    fn merge_dedups_with_remote_winning_and_sorts_desc() {
        let mut remote_dup = rec("b", 20, Origin::Remote);
        remote_dup.tally = Tally::Votes { upvotes: 9, downvotes: 0 };
        let remote = vec![rec("a", 10, Origin::Remote), remote_dup];
        let local = vec![rec("b", 20, Origin::Remote), rec("local_conf_1", 30, Origin::Local)];

        let merged = merge(&remote, &local);
        assert_eq!(ids(&merged), vec!["local_conf_1", "b", "a"]);
        assert_eq!(merged[1].tally, Tally::Votes { upvotes: 9, downvotes: 0 });
    }

    #[test]
    fn merge_is_stable_on_equal_timestamps() {
        let remote = vec![rec("r1", 5, Origin::Remote), rec("r2", 5, Origin::Remote)];
        let local = vec![rec("l1", 5, Origin::Local)];
        assert_eq!(ids(&merge(&remote, &local)), vec!["r1", "r2", "l1"]);
    }

    #[test]
    fn merge_is_idempotent() {
        let remote = vec![rec("a", 3, Origin::Remote), rec("b", 7, Origin::Remote)];
        let local = vec![rec("c", 5, Origin::Local), rec("a", 1, Origin::Remote)];
        let once = merge(&remote, &local);
        let twice = merge(&once, &[]);
        assert_eq!(once, twice);
    }

    #[test]
    fn offline_merge_shows_local_only() {
        let local = vec![rec("l1", 1, Origin::Local), rec("l2", 2, Origin::Local)];
        assert_eq!(ids(&merge(&[], &local)), vec!["l2", "l1"]);
    }

    #[test]
    fn filter_matches_fields_and_search() {
        let mut r = rec("a", 1, Origin::Remote);
        r.fields.insert("category".into(), json!("Food"));
        r.fields.insert("content".into(), json!("Canteen queues are too long"));

        assert!(ListFilter::new().with_field("category", "food").matches(&r));
        assert!(!ListFilter::new().with_field("category", "sports").matches(&r));
        assert!(!ListFilter::new().with_field("status", "open").matches(&r));
        assert!(ListFilter::new().with_search("QUEUES").matches(&r));
        assert!(!ListFilter::new().with_search("library").matches(&r));
        assert!(ListFilter::new().with_search("   ").is_empty());
    }

    #[test]
    fn bootstrap_seeds_once_without_duplicates() {
        let store = MemoryStore::new();
        let policy = KindPolicy::builtin(Kind::Confession);

        let added = policy.bootstrap(&store, &[]).unwrap();
        assert_eq!(added, policy.seeds.len());
        let stored = LocalRecords::load(&store, Kind::Confession);
        assert!(stored.iter().any(|r| r.id == "demo_conf_1"
            && r.tally == Tally::Votes { upvotes: 23, downvotes: 1 }));

        let merged = merge(&[], &stored);
        assert_eq!(policy.bootstrap(&store, &merged).unwrap(), 0);
        // Even a stale empty view does not duplicate stored ids.
        assert_eq!(policy.bootstrap(&store, &[]).unwrap(), 0);
        assert_eq!(LocalRecords::load(&store, Kind::Confession).len(), policy.seeds.len());
    }

    #[test]
    fn excluded_records_do_not_block_bootstrap() {
        let store = MemoryStore::new();
        let policy = KindPolicy::builtin(Kind::Announcement)
            .with_excluded_titles(vec!["Old welcome post".to_string()]);
        let mut legacy = rec("x", 1, Origin::Remote);
        legacy.kind = Kind::Announcement;
        legacy.fields.insert("title".into(), json!("Old welcome post"));

        assert!(policy.view(&[legacy.clone()], &ListFilter::new()).is_empty());
        assert_eq!(policy.bootstrap(&store, &[legacy]).unwrap(), policy.seeds.len());
    }

    #[test]
    fn required_fields_must_be_non_blank() {
        let policy = KindPolicy::builtin(Kind::Feedback);
        let mut fields = Map::new();
        fields.insert("title".into(), json!("Broken fan"));
        fields.insert("content".into(), json!("  "));
        assert_eq!(policy.missing_field(&fields), Some("content"));
        fields.insert("content".into(), json!("Room 204"));
        assert_eq!(policy.missing_field(&fields), None);
    }

    #[test]
    fn snapshot_replacement_keeps_local_records() {
        let store = MemoryStore::new();
        LocalRecords::upsert(&store, &rec("local_conf_1", 1, Origin::Local)).unwrap();
        LocalRecords::upsert(&store, &rec("gone", 2, Origin::Remote)).unwrap();

        let fresh = [rec("fresh", 3, Origin::Remote)];
        LocalRecords::replace_remote_snapshot(&store, Kind::Confession, &fresh, &HashSet::new())
            .unwrap();
        let mut got: Vec<String> = LocalRecords::load(&store, Kind::Confession)
            .into_iter()
            .map(|r| r.id)
            .collect();
        got.sort();
        assert_eq!(got, vec!["fresh".to_string(), "local_conf_1".to_string()]);

        assert!(LocalRecords::remove(&store, Kind::Confession, "fresh").unwrap());
        assert!(!LocalRecords::remove(&store, Kind::Confession, "fresh").unwrap());
    }

    #[test]
    fn snapshot_replacement_leaves_pinned_ids_alone() {
        let store = MemoryStore::new();
        let mut newer = rec("srv_new", 9, Origin::Remote);
        newer.tally = Tally::Votes { upvotes: 5, downvotes: 0 };
        LocalRecords::upsert(&store, &newer).unwrap();
        LocalRecords::upsert(&store, &rec("srv_old", 1, Origin::Remote)).unwrap();

        let pinned: HashSet<String> = ["srv_new".to_string()].into_iter().collect();
        let mut stale = rec("srv_new", 9, Origin::Remote);
        stale.tally = Tally::Votes { upvotes: 0, downvotes: 0 };
        let listed = [stale, rec("srv_listed", 2, Origin::Remote)];
        LocalRecords::replace_remote_snapshot(&store, Kind::Confession, &listed, &pinned).unwrap();

        let stored = LocalRecords::load(&store, Kind::Confession);
        let kept: Vec<&Record> = stored.iter().filter(|r| r.id == "srv_new").collect();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].tally, Tally::Votes { upvotes: 5, downvotes: 0 });
        assert!(stored.iter().any(|r| r.id == "srv_listed"));
        assert!(stored.iter().all(|r| r.id != "srv_old"));
    }
}
