//! The presence tracker: who is typing in which room.
//!
//! One row per (session, room). A row only counts as typing while it is
//! fresh; clients keep it fresh by re-announcing every few seconds, and
//! the sweep flips rows that stopped being refreshed.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use ephemera_protocol::{Event, RoomName, SessionId};
use ephemera_session::{SharedClock, TokenStore};

use crate::message::resolve_label;
use crate::sweeper::{self, PresenceSweep};
use crate::{PresenceConfig, RoomError, RoomHub, TypingState};

type RoomRows = HashMap<SessionId, TypingState>;

/// Tracks typing indicators for every room.
pub struct PresenceTracker {
    table: RwLock<HashMap<RoomName, RoomRows>>,
    sessions: Arc<TokenStore>,
    hub: Arc<RoomHub>,
    clock: SharedClock,
    config: PresenceConfig,
}

impl PresenceTracker {
    pub fn new(
        sessions: Arc<TokenStore>,
        hub: Arc<RoomHub>,
        clock: SharedClock,
        config: PresenceConfig,
    ) -> Self {
        Self {
            table: RwLock::new(HashMap::new()),
            sessions,
            hub,
            clock,
            config,
        }
    }

    /// Records whether the caller is typing and returns the labels of
    /// everyone else currently typing in the room, sorted.
    ///
    /// Subscribers get a [`Event::TypingChanged`] when the set of typing
    /// sessions in the room changes. Labels are client-chosen and may
    /// repeat, so comparing labels alone would miss changes.
    ///
    /// # Errors
    /// - [`RoomError::Session`]: the session does not resolve to `room`
    /// - [`RoomError::InvalidInput`]: the label is blank
    pub fn set_typing(
        &self,
        session_id: &SessionId,
        room: &RoomName,
        user_label: Option<&str>,
        is_typing: bool,
    ) -> Result<Vec<String>, RoomError> {
        let session = self.sessions.resolve(session_id, room)?;
        let user_label = resolve_label(user_label, &session)?;
        let now = self.clock.now();

        let (changed_here, others, elsewhere) = {
            let mut table = self.write()?;
            let before = typing_sessions(table.get(room), now, self.config.staleness);

            table.entry(room.clone()).or_default().insert(
                session_id.clone(),
                TypingState {
                    session_id: session_id.clone(),
                    room: room.clone(),
                    user_label,
                    is_typing,
                    updated_at: now,
                },
            );
            let (swept, neutralized_in) = self.sweep_locked(&mut table, now);
            if swept != PresenceSweep::default() {
                tracing::debug!(?swept, "presence sweep");
            }

            let rows = table.get(room);
            let changed_here = before != typing_sessions(rows, now, self.config.staleness)
                || neutralized_in.contains(room);
            let labels = typing_labels(rows, now, self.config.staleness, None);
            let others =
                typing_labels(rows, now, self.config.staleness, Some(session_id));
            let elsewhere = self.snapshots(&table, neutralized_in, room, now);
            (changed_here.then_some(labels), others, elsewhere)
        };

        for (other_room, labels) in elsewhere {
            self.publish(&other_room, labels);
        }
        tracing::debug!(%session_id, %room, is_typing, "typing updated");
        if let Some(labels) = changed_here {
            self.publish(room, labels);
        }
        Ok(others.into_iter().collect())
    }

    /// Labels of everyone typing in `room`, sorted. Read-only.
    pub fn typing_users(&self, room: &RoomName) -> Result<Vec<String>, RoomError> {
        self.query(room, None)
    }

    /// Like [`typing_users`](Self::typing_users), leaving out the row of
    /// `session_id`.
    pub fn typing_users_except(
        &self,
        room: &RoomName,
        session_id: &SessionId,
    ) -> Result<Vec<String>, RoomError> {
        self.query(room, Some(session_id))
    }

    /// Marks the caller as not typing. A missing row is left missing.
    pub fn clear(&self, session_id: &SessionId, room: &RoomName) -> Result<(), RoomError> {
        let now = self.clock.now();
        let changed = {
            let mut table = self.write()?;
            let Some(row) = table
                .get_mut(room)
                .and_then(|rows| rows.get_mut(session_id))
            else {
                return Ok(());
            };
            let was_visible = row.is_typing && row.is_fresh_at(now, self.config.staleness);
            row.is_typing = false;
            row.updated_at = now;
            was_visible.then(|| typing_labels(table.get(room), now, self.config.staleness, None))
        };

        if let Some(labels) = changed {
            self.publish(room, labels);
        }
        Ok(())
    }

    /// Neutralizes stale rows and evicts idle ones in every room.
    ///
    /// Rooms that lost a typer get a fresh [`Event::TypingChanged`], so
    /// subscribers drop labels of clients that went quiet without saying
    /// so.
    pub fn sweep(&self) -> Result<PresenceSweep, RoomError> {
        let now = self.clock.now();
        let (report, changed) = {
            let mut table = self.write()?;
            let (report, neutralized_in) = self.sweep_locked(&mut table, now);
            let changed = neutralized_in
                .into_iter()
                .map(|room| {
                    let labels =
                        typing_labels(table.get(&room), now, self.config.staleness, None);
                    (room, labels)
                })
                .collect::<Vec<_>>();
            (report, changed)
        };

        for (room, labels) in changed {
            self.publish(&room, labels);
        }
        if report != PresenceSweep::default() {
            tracing::info!(
                neutralized = report.neutralized,
                evicted = report.evicted,
                "presence sweep"
            );
        }
        Ok(report)
    }

    fn query(
        &self,
        room: &RoomName,
        exclude: Option<&SessionId>,
    ) -> Result<Vec<String>, RoomError> {
        let now = self.clock.now();
        let table = self
            .table
            .read()
            .map_err(|_| RoomError::StoreUnavailable("presence table"))?;
        Ok(typing_labels(table.get(room), now, self.config.staleness, exclude)
            .into_iter()
            .collect())
    }

    /// Runs both presence routines over every room. Also returns the
    /// rooms in which at least one row was neutralized.
    fn sweep_locked(
        &self,
        table: &mut HashMap<RoomName, RoomRows>,
        now: DateTime<Utc>,
    ) -> (PresenceSweep, Vec<RoomName>) {
        let mut report = PresenceSweep::default();
        let mut neutralized_in = Vec::new();
        let idle_cutoff = now - self.config.eviction;
        for (room, rows) in table.iter_mut() {
            let neutralized =
                sweeper::neutralize_stale(rows.values_mut(), now, self.config.staleness);
            if neutralized > 0 {
                neutralized_in.push(room.clone());
            }
            report.neutralized += neutralized;
            report.evicted += sweeper::evict_idle(rows, idle_cutoff);
        }
        table.retain(|_, rows| !rows.is_empty());
        (report, neutralized_in)
    }

    /// Current label sets for `rooms`, skipping `except`.
    fn snapshots(
        &self,
        table: &HashMap<RoomName, RoomRows>,
        rooms: Vec<RoomName>,
        except: &RoomName,
        now: DateTime<Utc>,
    ) -> Vec<(RoomName, BTreeSet<String>)> {
        rooms
            .into_iter()
            .filter(|room| room != except)
            .map(|room| {
                let labels = typing_labels(table.get(&room), now, self.config.staleness, None);
                (room, labels)
            })
            .collect()
    }

    fn publish(&self, room: &RoomName, labels: BTreeSet<String>) {
        self.hub.publish(
            room,
            Event::TypingChanged {
                room_name: room.clone(),
                typing_users: labels.into_iter().collect(),
            },
        );
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<RoomName, RoomRows>>, RoomError> {
        self.table.write().map_err(|_| {
            tracing::warn!("presence table lock poisoned");
            RoomError::StoreUnavailable("presence table")
        })
    }
}

/// Sessions in `rows` that are currently typing.
fn typing_sessions(
    rows: Option<&RoomRows>,
    now: DateTime<Utc>,
    staleness: chrono::Duration,
) -> BTreeSet<SessionId> {
    rows.into_iter()
        .flat_map(HashMap::values)
        .filter(|row| row.is_typing && row.is_fresh_at(now, staleness))
        .map(|row| row.session_id.clone())
        .collect()
}

/// Fresh typing labels in `rows`, deduplicated and sorted.
fn typing_labels(
    rows: Option<&RoomRows>,
    now: DateTime<Utc>,
    staleness: chrono::Duration,
    exclude: Option<&SessionId>,
) -> BTreeSet<String> {
    rows.into_iter()
        .flat_map(HashMap::values)
        .filter(|row| row.is_typing && row.is_fresh_at(now, staleness))
        .filter(|row| exclude != Some(&row.session_id))
        .map(|row| row.user_label.clone())
        .collect()
}
