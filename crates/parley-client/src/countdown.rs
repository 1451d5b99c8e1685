//! Per-approval expiry countdown.
//!
//! One background task per pending approval. It republishes the remaining
//! wall-clock time on every tick and, when the deadline passes, flips the
//! approval to locally `Expired` through the driver. The local flip is
//! advisory; a later server resolution overrides it.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parley_protocol::ApprovalId;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::driver::TurnDriver;

pub struct ApprovalCountdown {
    approval_id: ApprovalId,
    remaining: watch::Receiver<Duration>,
    handle: JoinHandle<()>,
}

impl ApprovalCountdown {
    /// Spawn with the standard one-second display tick.
    pub fn spawn(driver: Arc<TurnDriver>, approval_id: ApprovalId, expires_at: DateTime<Utc>) -> Self {
        Self::spawn_with_tick(driver, approval_id, expires_at, Duration::from_secs(1))
    }

    pub fn spawn_with_tick(
        driver: Arc<TurnDriver>,
        approval_id: ApprovalId,
        expires_at: DateTime<Utc>,
        tick: Duration,
    ) -> Self {
        let initial = (expires_at - Utc::now()).to_std().unwrap_or_default();
        let (tx, remaining) = watch::channel(initial);
        let id = approval_id.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let left = (expires_at - Utc::now()).to_std().unwrap_or_default();
                tx.send_replace(left);
                if left.is_zero() {
                    debug!(approval_id = %id, "approval countdown reached zero");
                    driver.expire_approval(&id);
                    return;
                }
            }
        });
        Self {
            approval_id,
            remaining,
            handle,
        }
    }

    pub fn approval_id(&self) -> &ApprovalId {
        &self.approval_id
    }

    /// Latest published remaining time, clamped at zero.
    pub fn remaining(&self) -> Duration {
        *self.remaining.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Duration> {
        self.remaining.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stop ticking without touching the approval's status. Used when the
    /// approval resolves or the turn is cancelled.
    pub fn stop(&self) {
        self.handle.abort();
    }
}

impl Drop for ApprovalCountdown {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
