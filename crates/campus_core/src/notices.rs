/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use serde::Serialize;

use crate::record::{now_ms, Kind};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Info,
    /// The action completed locally; the server has not seen it.
    Degraded,
    /// The action did not complete.
    Error,
}

/// Advisory, non-blocking message for the presentation layer.
#[derive(Clone, Debug, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub kind: Kind,
    pub record_id: Option<String>,
    pub message: String,
    pub ts_ms: i64,
}

impl Notice {
    pub fn new(
        level: NoticeLevel,
        kind: Kind,
        record_id: Option<&str>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            level,
            kind,
            record_id: record_id.map(|s| s.to_string()),
            message: message.into(),
            ts_ms: now_ms(),
        }
    }

    pub fn info(kind: Kind, record_id: Option<&str>, message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Info, kind, record_id, message)
    }

    pub fn degraded(kind: Kind, record_id: Option<&str>, message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Degraded, kind, record_id, message)
    }

    pub fn error(kind: Kind, record_id: Option<&str>, message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Error, kind, record_id, message)
    }
}
