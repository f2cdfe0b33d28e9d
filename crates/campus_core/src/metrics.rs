/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[derive(Default)]
pub struct SyncMetrics {
    pub remote_ok: AtomicU64,
    pub http_errors: AtomicU64,
    pub http_timeouts: AtomicU64,
    pub remote_rtt_ema_ms: AtomicU64,
    pub last_success_ms: AtomicU64,
    last_error: Mutex<Option<String>>,

    pub degraded_creates: AtomicU64,
    pub degraded_votes: AtomicU64,
    pub local_mutations: AtomicU64,
    pub stale_responses_dropped: AtomicU64,
    pub refreshes: AtomicU64,
    pub offline_refreshes: AtomicU64,
    pub seeded_records: AtomicU64,
}

impl SyncMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remote_success(&self, rtt_ms: u64) {
        self.remote_ok.fetch_add(1, Ordering::Relaxed);
        self.last_success_ms.store(now_ms(), Ordering::Relaxed);
        if rtt_ms > 0 {
            let prev = self.remote_rtt_ema_ms.load(Ordering::Relaxed);
            let next = if prev == 0 {
                rtt_ms
            } else {
                (prev.saturating_mul(7).saturating_add(rtt_ms)) / 8
            };
            self.remote_rtt_ema_ms.store(next, Ordering::Relaxed);
        }
        if let Ok(mut g) = self.last_error.lock() {
            *g = None;
        }
    }

    pub fn set_last_error(&self, err: String) {
        if let Ok(mut g) = self.last_error.lock() {
            *g = Some(err);
        }
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().ok().and_then(|g| g.clone())
    }

    pub fn http_timeout(&self) {
        self.http_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn http_error(&self) {
        self.http_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn degraded_create(&self) {
        self.degraded_creates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn degraded_vote(&self) {
        self.degraded_votes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn local_mutation(&self) {
        self.local_mutations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stale_response(&self) {
        self.stale_responses_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn refresh(&self, online: bool) {
        self.refreshes.fetch_add(1, Ordering::Relaxed);
        if !online {
            self.offline_refreshes.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn seeded(&self, n: u64) {
        self.seeded_records.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot_json(&self) -> serde_json::Value {
        serde_json::json!({
            "ts_ms": now_ms(),
            "remote": {
                "ok": self.remote_ok.load(Ordering::Relaxed),
                "rtt_ms": self.remote_rtt_ema_ms.load(Ordering::Relaxed),
                "last_success_ms": self.last_success_ms.load(Ordering::Relaxed),
                "last_error": self.last_error(),
            },
            "errors": {
                "http_timeouts": self.http_timeouts.load(Ordering::Relaxed),
                "http_errors": self.http_errors.load(Ordering::Relaxed),
            },
            "mutations": {
                "degraded_creates": self.degraded_creates.load(Ordering::Relaxed),
                "degraded_votes": self.degraded_votes.load(Ordering::Relaxed),
                "local": self.local_mutations.load(Ordering::Relaxed),
                "stale_responses_dropped": self.stale_responses_dropped.load(Ordering::Relaxed),
            },
            "cache": {
                "refreshes": self.refreshes.load(Ordering::Relaxed),
                "offline_refreshes": self.offline_refreshes.load(Ordering::Relaxed),
                "seeded_records": self.seeded_records.load(Ordering::Relaxed),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_clears_last_error_and_smooths_rtt() {
        let m = SyncMetrics::new();
        m.set_last_error("connection refused".to_string());
        m.remote_success(80);
        m.remote_success(160);
        assert!(m.last_error().is_none());
        assert_eq!(m.remote_rtt_ema_ms.load(Ordering::Relaxed), 90);

        let snap = m.snapshot_json();
        assert_eq!(snap["remote"]["ok"], 2);
    }
}
