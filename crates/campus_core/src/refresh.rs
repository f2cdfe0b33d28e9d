/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::coordinator::Coordinator;

/// Refreshes every kind on each tick, and the kinds flagged for a refetch
/// (after a confirmed update or delete) as soon as they are flagged.
pub fn start_refresh_worker(
    coordinator: Coordinator,
    interval_secs: u64,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let interval_secs = interval_secs.clamp(5, 3600);
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(interval_secs));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            let periodic = tokio::select! {
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() { break; }
                    continue;
                }
                _ = tick.tick() => true,
                _ = coordinator.refetch_requested() => false,
            };
            if *shutdown.borrow() {
                break;
            }

            let targets = if periodic {
                coordinator.active_filters()
            } else {
                coordinator.pending_refetches()
            };
            for (kind, filter) in targets {
                let visible = coordinator.refresh(kind, filter).await;
                debug!(kind = ?kind, visible = visible.len(), periodic, "refreshed");
            }
        }
    })
}
