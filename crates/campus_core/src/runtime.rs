/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::cache::KindPolicy;
use crate::coordinator::Coordinator;
use crate::metrics::SyncMetrics;
use crate::record::Kind;
use crate::refresh::start_refresh_worker;
use crate::remote::{HttpRemote, HttpRemoteConfig, OfflineRemote, RemoteSource};
use crate::store::{LocalStore, SqliteStore};

#[derive(Clone, Debug, serde::Deserialize)]
pub struct ClientConfig {
    /// Identity whose votes and likes the ledgers track.
    pub user_id: String,
    /// Board API root, e.g. `https://board.example.edu/api`. Without it the client runs offline.
    #[serde(default, alias = "base_url")]
    pub api_base_url: Option<String>,
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default)]
    pub data_dir: Option<String>,
    /// HTTP client timeout for API requests (seconds).
    #[serde(default)]
    pub http_timeout_secs: Option<u64>,
    #[serde(default)]
    pub http_retry_attempts: Option<u32>,
    #[serde(default)]
    pub refresh_interval_secs: Option<u64>,
    /// Extra titles to hide per kind (`"announcements": ["..."]`), replacing the built-in list.
    #[serde(default)]
    pub excluded_titles: Option<HashMap<String, Vec<String>>>,
    /// `tracing` filter directive; `RUST_LOG` still applies on top.
    #[serde(default)]
    pub log_filter: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user_id: "anonymous".to_string(),
            api_base_url: None,
            api_token: None,
            data_dir: None,
            http_timeout_secs: Some(15),
            http_retry_attempts: Some(3),
            refresh_interval_secs: Some(60),
            excluded_titles: None,
            log_filter: None,
        }
    }
}

impl ClientConfig {
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("invalid client config json")
    }

    pub fn policies(&self) -> Vec<KindPolicy> {
        Kind::ALL
            .iter()
            .map(|kind| {
                let policy = KindPolicy::builtin(*kind);
                let titles = self.excluded_titles.as_ref().and_then(|m| {
                    m.iter()
                        .find(|(k, _)| Kind::from_str(k) == Some(*kind))
                        .map(|(_, v)| v.clone())
                });
                match titles {
                    Some(t) => policy.with_excluded_titles(t),
                    None => policy,
                }
            })
            .collect()
    }
}

pub fn init_tracing(filter: Option<&str>) {
    let directive = filter.unwrap_or("info");
    let env = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(directive));
    tracing_subscriber::fmt().with_env_filter(env).try_init().ok();
}

pub fn default_data_dir() -> Result<PathBuf> {
    if let Ok(v) = std::env::var("CAMPUS_DATA_DIR") {
        return Ok(PathBuf::from(v));
    }
    let proj = ProjectDirs::from("edu", "campus", "CampusBoard")
        .context("unable to determine platform data dir")?;
    Ok(proj.data_local_dir().to_path_buf())
}

pub struct ClientHandle {
    pub coordinator: Coordinator,
    pub metrics: Arc<SyncMetrics>,
    data_dir: PathBuf,
    shutdown_tx: watch::Sender<bool>,
    worker: JoinHandle<()>,
}

impl ClientHandle {
    pub fn data_dir(&self) -> &std::path::Path {
        &self.data_dir
    }

    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown_tx.send(true);
        self.worker.await.context("refresh worker panicked")?;
        info!("client stopped");
        Ok(())
    }
}

/// Wires store, remote source and coordinator, and starts the refresh worker.
/// Must be called from within a tokio runtime.
pub fn open(cfg: ClientConfig) -> Result<ClientHandle> {
    init_tracing(cfg.log_filter.as_deref());
    tokio::runtime::Handle::try_current().context("campus client needs a tokio runtime")?;

    let user_id = cfg.user_id.trim();
    anyhow::ensure!(!user_id.is_empty(), "user_id must not be empty");

    let data_dir = match cfg.data_dir.as_deref() {
        Some(d) if !d.trim().is_empty() => PathBuf::from(d),
        _ => default_data_dir()?,
    };
    let sqlite = SqliteStore::open(data_dir.join("campus.db"))?;
    sqlite.health_check()?;
    info!(db = %sqlite.path().display(), "local store ready");
    let store: Arc<dyn LocalStore> = Arc::new(sqlite);
    let metrics = Arc::new(SyncMetrics::new());

    let remote: Arc<dyn RemoteSource> = match cfg
        .api_base_url
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        Some(base) => Arc::new(HttpRemote::new(
            HttpRemoteConfig {
                base_url: base.to_string(),
                token: cfg.api_token.clone(),
                timeout_secs: cfg.http_timeout_secs.unwrap_or(15),
                attempts: cfg.http_retry_attempts.unwrap_or(3),
            },
            metrics.clone(),
        )?),
        None => {
            info!("no api_base_url configured; running offline");
            Arc::new(OfflineRemote)
        }
    };

    let coordinator =
        Coordinator::with_policies(store, remote, metrics.clone(), user_id, cfg.policies());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = start_refresh_worker(
        coordinator.clone(),
        cfg.refresh_interval_secs.unwrap_or(60),
        shutdown_rx,
    );
    info!(user = user_id, data_dir = %data_dir.display(), "campus client started");

    Ok(ClientHandle {
        coordinator,
        metrics,
        data_dir,
        shutdown_tx,
        worker,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ListFilter;
    use rand::{rngs::OsRng, RngCore};

    #[test]
    fn config_fills_defaults_and_reads_exclusions() {
        let raw = r#"{
            "user_id": "u1",
            "base_url": "http://x/api",
            "excluded_titles": {"announcements": ["Hi"]}
        }"#;
        let cfg = ClientConfig::from_json(raw).unwrap();
        assert_eq!(cfg.api_base_url.as_deref(), Some("http://x/api"));
        assert!(cfg.http_timeout_secs.is_none());
        let ann = cfg
            .policies()
            .into_iter()
            .find(|p| p.kind == Kind::Announcement)
            .unwrap();
        assert_eq!(ann.excluded_titles, vec!["Hi".to_string()]);
    }

    #[test]
    fn config_requires_user() {
        assert!(ClientConfig::from_json(r#"{"api_base_url":"http://x"}"#).is_err());
    }

    #[tokio::test]
    async fn open_offline_serves_seeded_boards() {
        let mut b = [0u8; 8];
        OsRng.fill_bytes(&mut b);
        let name: String = b.iter().map(|v| format!("{v:02x}")).collect();
        let dir = std::env::temp_dir().join(format!("campus-rt-{name}"));

        let handle = open(ClientConfig {
            user_id: "alice".to_string(),
            data_dir: Some(dir.to_string_lossy().to_string()),
            ..ClientConfig::default()
        })
        .unwrap();
        assert!(handle.data_dir().join("campus.db").exists());

        let visible = handle
            .coordinator
            .refresh(Kind::Confession, ListFilter::new())
            .await;
        assert!(visible.iter().any(|r| r.id == "demo_conf_1"));

        handle.shutdown().await.unwrap();
        let _ = std::fs::remove_dir_all(&dir);
    }
}
