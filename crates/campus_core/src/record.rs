/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    Confession,
    Feedback,
    LostFound,
    Announcement,
}

impl Kind {
    pub const ALL: [Kind; 4] = [
        Kind::Confession,
        Kind::Feedback,
        Kind::LostFound,
        Kind::Announcement,
    ];

    /// REST collection segment under the API base url.
    pub fn collection_path(self) -> &'static str {
        match self {
            Kind::Confession => "confessions",
            Kind::Feedback => "feedback",
            Kind::LostFound => "lost-found",
            Kind::Announcement => "announcements",
        }
    }

    /// Short tag used in locally minted identifiers and store keys.
    pub fn tag(self) -> &'static str {
        match self {
            Kind::Confession => "conf",
            Kind::Feedback => "fb",
            Kind::LostFound => "lf",
            Kind::Announcement => "ann",
        }
    }

    pub fn empty_tally(self) -> Tally {
        match self {
            Kind::Confession | Kind::Feedback => Tally::Votes {
                upvotes: 0,
                downvotes: 0,
            },
            Kind::Announcement => Tally::Likes { likes: 0 },
            Kind::LostFound => Tally::None,
        }
    }

    pub fn from_str(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "confession" | "confessions" | "conf" => Some(Kind::Confession),
            "feedback" | "complaint" | "complaints" | "fb" => Some(Kind::Feedback),
            "lost_found" | "lost-found" | "lostfound" | "lf" => Some(Kind::LostFound),
            "announcement" | "announcements" | "ann" => Some(Kind::Announcement),
            _ => None,
        }
    }
}

/// Where the authoritative copy of a record lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// Exists only in the local store; never sent to the server for mutation.
    Local,
    #[default]
    Remote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Tally {
    Votes { upvotes: u64, downvotes: u64 },
    Likes { likes: u64 },
    None,
}

impl Default for Tally {
    fn default() -> Self {
        Tally::None
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub kind: Kind,
    #[serde(default)]
    pub origin: Origin,
    /// Creation time, ms since epoch.
    pub timestamp: i64,
    #[serde(default)]
    pub tally: Tally,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl Record {
    /// Synthesizes a local-only record with a fresh identifier and a zero tally.
    pub fn new_local(kind: Kind, fields: Map<String, Value>) -> Self {
        Self {
            id: new_local_id(kind),
            kind,
            origin: Origin::Local,
            timestamp: now_ms(),
            tally: kind.empty_tally(),
            fields,
        }
    }

    pub fn is_local(&self) -> bool {
        self.origin == Origin::Local
    }

    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(|v| v.as_str())
    }

    pub fn title(&self) -> Option<&str> {
        self.field_str("title")
    }
}

pub fn new_local_id(kind: Kind) -> String {
    let mut b = [0u8; 8];
    OsRng.fill_bytes(&mut b);
    let suffix: String = b.iter().map(|v| format!("{v:02x}")).collect();
    format!("local_{}_{}", kind.tag(), suffix)
}

pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
