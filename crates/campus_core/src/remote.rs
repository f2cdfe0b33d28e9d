/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use async_trait::async_trait;
use campus_protocol::{
    ApiErrorBody, LikeResponse, ListResponse, StatusBody, VoteBody, VoteResponse, WireRecord,
    WireTimestamp,
};
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use tracing::debug;
use urlencoding::encode;

use crate::cache::ListFilter;
use crate::http_retry::send_with_retry_metrics;
use crate::ledger::VoteRequest;
use crate::metrics::SyncMetrics;
use crate::record::{now_ms, Kind, Origin, Record, Tally};

#[derive(Debug, Error)]
pub enum RemoteError {
    /// Transport failure or timeout.
    #[error("HTTP error calling {endpoint}: {source}")]
    Http {
        endpoint: String,
        source: reqwest::Error,
    },
    /// Non-2xx answer.
    #[error("{endpoint} returned {status}: {body}")]
    Api {
        endpoint: String,
        status: u16,
        body: String,
    },
    #[error("failed to decode response from {endpoint}: {detail}")]
    Decode { endpoint: String, detail: String },
    #[error("{operation} is not available for {kind:?}")]
    Unsupported { operation: &'static str, kind: Kind },
    #[error("remote unavailable: {0}")]
    Unavailable(String),
}

impl RemoteError {
    /// True when the server was never reached.
    pub fn is_transport(&self) -> bool {
        matches!(self, RemoteError::Http { .. } | RemoteError::Unavailable(_))
    }
}

/// The board REST API, one collection per [`Kind`].
#[async_trait]
pub trait RemoteSource: Send + Sync {
    async fn list(&self, kind: Kind, filter: &ListFilter) -> Result<Vec<Record>, RemoteError>;
    async fn create(&self, kind: Kind, fields: &Map<String, Value>) -> Result<Record, RemoteError>;
    async fn update(
        &self,
        kind: Kind,
        id: &str,
        fields: &Map<String, Value>,
    ) -> Result<Record, RemoteError>;
    /// Returns the server tally after the vote.
    async fn vote(
        &self,
        kind: Kind,
        id: &str,
        direction: VoteRequest,
    ) -> Result<Tally, RemoteError>;
    /// Returns `(liked, likes)` after toggling.
    async fn like(&self, kind: Kind, id: &str) -> Result<(bool, u64), RemoteError>;
    async fn delete(&self, kind: Kind, id: &str) -> Result<(), RemoteError>;
    /// Lost & found only.
    async fn mark_returned(&self, id: &str) -> Result<Record, RemoteError>;
    /// Feedback only.
    async fn update_status(&self, id: &str, status: &str) -> Result<Record, RemoteError>;
}

/// Used when no API endpoint is configured: every call fails as unreachable.
#[derive(Clone, Copy, Debug, Default)]
pub struct OfflineRemote;

#[async_trait]
impl RemoteSource for OfflineRemote {
    async fn list(&self, _kind: Kind, _filter: &ListFilter) -> Result<Vec<Record>, RemoteError> {
        Err(offline())
    }
    async fn create(
        &self,
        _kind: Kind,
        _fields: &Map<String, Value>,
    ) -> Result<Record, RemoteError> {
        Err(offline())
    }
    async fn update(
        &self,
        _kind: Kind,
        _id: &str,
        _fields: &Map<String, Value>,
    ) -> Result<Record, RemoteError> {
        Err(offline())
    }
    async fn vote(
        &self,
        _kind: Kind,
        _id: &str,
        _direction: VoteRequest,
    ) -> Result<Tally, RemoteError> {
        Err(offline())
    }
    async fn like(&self, _kind: Kind, _id: &str) -> Result<(bool, u64), RemoteError> {
        Err(offline())
    }
    async fn delete(&self, _kind: Kind, _id: &str) -> Result<(), RemoteError> {
        Err(offline())
    }
    async fn mark_returned(&self, _id: &str) -> Result<Record, RemoteError> {
        Err(offline())
    }
    async fn update_status(&self, _id: &str, _status: &str) -> Result<Record, RemoteError> {
        Err(offline())
    }
}

fn offline() -> RemoteError {
    RemoteError::Unavailable("no api endpoint configured".to_string())
}

#[derive(Debug, Clone)]
pub struct HttpRemoteConfig {
    /// e.g. `https://board.example.edu/api`
    pub base_url: String,
    pub token: Option<String>,
    pub timeout_secs: u64,
    pub attempts: u32,
}

#[derive(Clone)]
pub struct HttpRemote {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
    attempts: u32,
    metrics: Arc<SyncMetrics>,
}

impl HttpRemote {
    pub fn new(cfg: HttpRemoteConfig, metrics: Arc<SyncMetrics>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs.clamp(1, 120)))
            .user_agent(concat!("campus_core/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            token: cfg
                .token
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            attempts: cfg.attempts,
            metrics,
        })
    }

    fn collection_url(&self, kind: Kind) -> String {
        format!("{}/{}", self.base_url, kind.collection_path())
    }

    fn item_url(&self, kind: Kind, id: &str) -> String {
        format!("{}/{}", self.collection_url(kind), encode(id))
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        let req = req.header("Accept", "application/json");
        match self.token.as_deref() {
            Some(tok) => req.header("Authorization", format!("Bearer {tok}")),
            None => req,
        }
    }

    async fn send<F>(&self, endpoint: &str, build: F) -> Result<Response, RemoteError>
    where
        F: Fn() -> RequestBuilder,
    {
        let resp = send_with_retry_metrics(|| self.authorize(build()), self.attempts, &self.metrics)
            .await
            .map_err(|e| RemoteError::Http {
                endpoint: endpoint.to_string(),
                source: e,
            })?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let raw = resp.text().await.unwrap_or_default();
            let body = serde_json::from_str::<ApiErrorBody>(&raw)
                .ok()
                .and_then(|b| b.describe().map(|s| s.to_string()))
                .unwrap_or(raw);
            self.metrics.set_last_error(format!("{endpoint}: {status}"));
            return Err(RemoteError::Api {
                endpoint: endpoint.to_string(),
                status,
                body,
            });
        }
        Ok(resp)
    }

    async fn decode<T: DeserializeOwned>(endpoint: &str, resp: Response) -> Result<T, RemoteError> {
        let bytes = resp.bytes().await.map_err(|e| RemoteError::Http {
            endpoint: endpoint.to_string(),
            source: e,
        })?;
        serde_json::from_slice(&bytes).map_err(|e| RemoteError::Decode {
            endpoint: endpoint.to_string(),
            detail: e.to_string(),
        })
    }

    async fn fetch_record<F>(
        &self,
        kind: Kind,
        endpoint: &str,
        build: F,
    ) -> Result<Record, RemoteError>
    where
        F: Fn() -> RequestBuilder,
    {
        let resp = self.send(endpoint, build).await?;
        let wire: WireRecord = Self::decode(endpoint, resp).await?;
        Ok(record_from_wire(kind, wire))
    }
}

#[async_trait]
impl RemoteSource for HttpRemote {
    async fn list(&self, kind: Kind, filter: &ListFilter) -> Result<Vec<Record>, RemoteError> {
        let endpoint = format!("GET /{}", kind.collection_path());
        let url = self.collection_url(kind);
        let query = filter.to_query();
        let resp = self
            .send(&endpoint, || self.http.get(&url).query(&query))
            .await?;
        let list: ListResponse = Self::decode(&endpoint, resp).await?;
        let out: Vec<Record> = list
            .into_items()
            .into_iter()
            .map(|w| record_from_wire(kind, w))
            .collect();
        debug!(kind = ?kind, count = out.len(), "remote list");
        Ok(out)
    }

    async fn create(&self, kind: Kind, fields: &Map<String, Value>) -> Result<Record, RemoteError> {
        let endpoint = format!("POST /{}", kind.collection_path());
        let url = self.collection_url(kind);
        self.fetch_record(kind, &endpoint, || self.http.post(&url).json(fields))
            .await
    }

    async fn update(
        &self,
        kind: Kind,
        id: &str,
        fields: &Map<String, Value>,
    ) -> Result<Record, RemoteError> {
        let endpoint = format!("PUT /{}/{id}", kind.collection_path());
        let url = self.item_url(kind, id);
        self.fetch_record(kind, &endpoint, || self.http.put(&url).json(fields))
            .await
    }

    async fn vote(
        &self,
        kind: Kind,
        id: &str,
        direction: VoteRequest,
    ) -> Result<Tally, RemoteError> {
        if !direction.applies_to(kind.empty_tally()) || direction == VoteRequest::ToggleLike {
            return Err(RemoteError::Unsupported {
                operation: "vote",
                kind,
            });
        }
        let endpoint = format!("POST /{}/{id}/vote", kind.collection_path());
        let url = format!("{}/vote", self.item_url(kind, id));
        let body = VoteBody {
            vote_type: direction.wire_direction().to_string(),
        };
        let resp = self
            .send(&endpoint, || self.http.post(&url).json(&body))
            .await?;
        let out: VoteResponse = Self::decode(&endpoint, resp).await?;
        Ok(Tally::Votes {
            upvotes: out.upvotes,
            downvotes: out.downvotes,
        })
    }

    async fn like(&self, kind: Kind, id: &str) -> Result<(bool, u64), RemoteError> {
        if !matches!(kind.empty_tally(), Tally::Likes { .. }) {
            return Err(RemoteError::Unsupported {
                operation: "like",
                kind,
            });
        }
        let endpoint = format!("POST /{}/{id}/like", kind.collection_path());
        let url = format!("{}/like", self.item_url(kind, id));
        let resp = self.send(&endpoint, || self.http.post(&url)).await?;
        let out: LikeResponse = Self::decode(&endpoint, resp).await?;
        Ok((out.liked, out.likes))
    }

    async fn delete(&self, kind: Kind, id: &str) -> Result<(), RemoteError> {
        let endpoint = format!("DELETE /{}/{id}", kind.collection_path());
        let url = self.item_url(kind, id);
        self.send(&endpoint, || self.http.delete(&url)).await?;
        Ok(())
    }

    async fn mark_returned(&self, id: &str) -> Result<Record, RemoteError> {
        let kind = Kind::LostFound;
        let endpoint = format!("PATCH /{}/{id}/returned", kind.collection_path());
        let url = format!("{}/returned", self.item_url(kind, id));
        self.fetch_record(kind, &endpoint, || self.http.patch(&url))
            .await
    }

    async fn update_status(&self, id: &str, status: &str) -> Result<Record, RemoteError> {
        let kind = Kind::Feedback;
        let endpoint = format!("PATCH /{}/{id}/status", kind.collection_path());
        let url = format!("{}/status", self.item_url(kind, id));
        let body = StatusBody {
            status: status.to_string(),
        };
        self.fetch_record(kind, &endpoint, || self.http.patch(&url).json(&body))
            .await
    }
}

/// Converts an API payload into a remote-tracked record of `kind`.
pub fn record_from_wire(kind: Kind, wire: WireRecord) -> Record {
    let timestamp = wire
        .created_at
        .as_ref()
        .or(wire.timestamp.as_ref())
        .and_then(parse_timestamp)
        .unwrap_or_else(|| {
            debug!(id = %wire.id, "record without a usable timestamp");
            now_ms()
        });
    let tally = match kind.empty_tally() {
        Tally::Votes { .. } => Tally::Votes {
            upvotes: wire.upvotes.unwrap_or(0),
            downvotes: wire.downvotes.unwrap_or(0),
        },
        Tally::Likes { .. } => Tally::Likes {
            likes: wire.likes.unwrap_or(0),
        },
        Tally::None => Tally::None,
    };
    let mut fields = wire.fields;
    fields.remove("__v");
    Record {
        id: wire.id,
        kind,
        origin: Origin::Remote,
        timestamp,
        tally,
        fields,
    }
}

fn parse_timestamp(ts: &WireTimestamp) -> Option<i64> {
    match ts {
        WireTimestamp::Millis(ms) => Some(*ms),
        WireTimestamp::Text(s) => {
            let s = s.trim();
            if let Ok(ms) = s.parse::<i64>() {
                return Some(ms);
            }
            let dt = time::OffsetDateTime::parse(s, &Rfc3339).ok()?;
            Some((dt.unix_timestamp_nanos() / 1_000_000) as i64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire(v: Value) -> WireRecord {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn wire_records_become_remote_with_kind_tally() {
        let rec = record_from_wire(
            Kind::Confession,
            wire(serde_json::json!({
                "_id": "65f0",
                "createdAt": "2024-03-01T10:00:00Z",
                "upvotes": 4,
                "content": "hello",
                "__v": 0
            })),
        );
        assert_eq!(rec.id, "65f0");
        assert_eq!(rec.origin, Origin::Remote);
        assert_eq!(rec.timestamp, 1_709_287_200_000);
        assert_eq!(rec.tally, Tally::Votes { upvotes: 4, downvotes: 0 });
        assert_eq!(rec.field_str("content"), Some("hello"));
        assert!(!rec.fields.contains_key("__v"));
    }

    #[test]
    fn created_at_wins_over_legacy_timestamp() {
        let both = wire(serde_json::json!({
            "_id": "c7",
            "createdAt": 5000,
            "timestamp": "2024-03-01T10:00:00Z",
            "content": "x"
        }));
        assert_eq!(record_from_wire(Kind::Confession, both).timestamp, 5000);

        let legacy = wire(serde_json::json!({"_id": "c8", "timestamp": "2024-03-01T10:00:00Z"}));
        let rec = record_from_wire(Kind::Confession, legacy);
        assert_eq!(rec.timestamp, 1_709_287_200_000);
        assert!(!rec.fields.contains_key("timestamp"));
    }

    #[test]
    fn millisecond_timestamps_and_likes() {
        let rec = record_from_wire(
            Kind::Announcement,
            wire(serde_json::json!({"id": "a1", "createdAt": 1234, "likes": 9, "title": "t"})),
        );
        assert_eq!(rec.timestamp, 1234);
        assert_eq!(rec.tally, Tally::Likes { likes: 9 });

        let payload = serde_json::json!({"id": "x", "createdAt": "77"});
        let rec = record_from_wire(Kind::LostFound, wire(payload));
        assert_eq!(rec.timestamp, 77);
        assert_eq!(rec.tally, Tally::None);
    }

    #[test]
    fn transport_classification() {
        assert!(RemoteError::Unavailable("down".into()).is_transport());
        assert!(!RemoteError::Api {
            endpoint: "GET /x".into(),
            status: 500,
            body: String::new()
        }
        .is_transport());
    }
}
