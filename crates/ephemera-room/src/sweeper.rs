//! The cleanup sweeper: expiry for messages, staleness for typing rows.
//!
//! The routines in this module are set-based conditional updates: each
//! one touches only rows that still match its predicate, so running it
//! twice (or from two tasks back to back) changes nothing the second
//! time. Callers hold the owning table's write lock while they run.
//!
//! The ledger and the presence tracker call these inline before every
//! read. [`Sweeper`] additionally runs them on an interval so memory is
//! reclaimed in rooms nobody is reading.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ephemera_protocol::SessionId;
use tokio::task::JoinHandle;

use crate::message::{Message, TypingState};
use crate::{MessageLedger, PresenceTracker, RoomError, RoomHub};

// ---------------------------------------------------------------------------
// Message routines
// ---------------------------------------------------------------------------

/// Tombstones every live message with `expires_at <= now`.
///
/// Returns how many rows changed.
pub(crate) fn tombstone_expired<'a>(
    messages: impl Iterator<Item = &'a mut Message>,
    now: DateTime<Utc>,
) -> usize {
    let mut count = 0;
    for message in messages {
        if !message.deleted && message.is_expired_at(now) {
            message.deleted = true;
            count += 1;
        }
    }
    count
}

/// Physically removes tombstones that expired at or before `cutoff`.
pub(crate) fn purge_tombstones<K: Ord>(
    log: &mut BTreeMap<K, Message>,
    cutoff: DateTime<Utc>,
) -> usize {
    let before = log.len();
    log.retain(|_, m| !(m.deleted && m.expires_at <= cutoff));
    before - log.len()
}

// ---------------------------------------------------------------------------
// Typing routines
// ---------------------------------------------------------------------------

/// Flips stale `is_typing = true` rows to `false`.
///
/// `updated_at` is left alone: neutralizing is not a client announcement,
/// and eviction still measures idleness from the last real update.
pub(crate) fn neutralize_stale<'a>(
    rows: impl Iterator<Item = &'a mut TypingState>,
    now: DateTime<Utc>,
    staleness: chrono::Duration,
) -> usize {
    let mut count = 0;
    for row in rows {
        if row.is_typing && !row.is_fresh_at(now, staleness) {
            row.is_typing = false;
            count += 1;
        }
    }
    count
}

/// Removes rows not updated since `cutoff` (inclusive).
pub(crate) fn evict_idle(
    rows: &mut HashMap<SessionId, TypingState>,
    cutoff: DateTime<Utc>,
) -> usize {
    let before = rows.len();
    rows.retain(|_, row| row.updated_at > cutoff);
    before - rows.len()
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// What one ledger sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerSweep {
    pub tombstoned: usize,
    pub purged: usize,
}

/// What one presence sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PresenceSweep {
    pub neutralized: usize,
    pub evicted: usize,
}

/// What one full [`Sweeper::run_once`] pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub ledger: LedgerSweep,
    pub presence: PresenceSweep,
    /// Room channels dropped because nobody was subscribed.
    pub idle_channels: usize,
}

// ---------------------------------------------------------------------------
// Sweeper
// ---------------------------------------------------------------------------

/// Runs every sweep across all rooms, on demand or on an interval.
#[derive(Clone)]
pub struct Sweeper {
    ledger: Arc<MessageLedger>,
    presence: Arc<PresenceTracker>,
    hub: Arc<RoomHub>,
}

impl Sweeper {
    pub fn new(
        ledger: Arc<MessageLedger>,
        presence: Arc<PresenceTracker>,
        hub: Arc<RoomHub>,
    ) -> Self {
        Self {
            ledger,
            presence,
            hub,
        }
    }

    /// One pass over everything.
    pub fn run_once(&self) -> Result<SweepReport, RoomError> {
        Ok(SweepReport {
            ledger: self.ledger.sweep()?,
            presence: self.presence.sweep()?,
            idle_channels: self.hub.prune(),
        })
    }

    /// Spawns a task that calls [`run_once`](Self::run_once) every
    /// `period`. Abort the returned handle to stop it.
    pub fn spawn(self, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                match self.run_once() {
                    Ok(report) if report != SweepReport::default() => {
                        tracing::debug!(?report, "background sweep");
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "background sweep failed"),
                }
            }
        })
    }
}
