/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A board item as the REST API returns it. Kind-specific fields stay opaque in `fields`.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WireRecord {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(default, rename = "createdAt", alias = "created_at")]
    pub created_at: Option<WireTimestamp>,
    /// Older servers send `timestamp` instead of (or next to) `createdAt`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<WireTimestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upvotes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downvotes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub likes: Option<u64>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// Servers emit either RFC 3339 strings or epoch milliseconds.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum WireTimestamp {
    Millis(i64),
    Text(String),
}

/// List endpoints answer with a bare array or an envelope.
#[derive(Debug, Deserialize, Clone)]
#[serde(untagged)]
pub enum ListResponse {
    Bare(Vec<WireRecord>),
    Wrapped {
        #[serde(alias = "data", alias = "records")]
        items: Vec<WireRecord>,
    },
}

impl ListResponse {
    pub fn into_items(self) -> Vec<WireRecord> {
        match self {
            ListResponse::Bare(items) => items,
            ListResponse::Wrapped { items } => items,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct VoteBody {
    #[serde(rename = "voteType")]
    pub vote_type: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct VoteResponse {
    #[serde(default)]
    pub upvotes: u64,
    #[serde(default)]
    pub downvotes: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct LikeResponse {
    pub liked: bool,
    #[serde(default)]
    pub likes: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StatusBody {
    pub status: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ApiErrorBody {
    pub fn describe(&self) -> Option<&str> {
        self.message.as_deref().or(self.error.as_deref())
    }
}
