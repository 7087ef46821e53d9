//! The message ledger: append, list, and expire room messages.
//!
//! # Layout
//!
//! Each room keeps its messages in a `BTreeMap` keyed by
//! `(created_at, id)`, so iteration order is the listing order and ties
//! on the timestamp fall back to insertion order. A side index remembers
//! when each session last posted, which is all the rate limiter needs.
//!
//! # Concurrency note
//!
//! The rate-limit check and the insert run under one write guard, so two
//! concurrent posts from a session are serialized: the second one sees
//! the first one's timestamp and is rejected.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use ephemera_protocol::{Event, MessageId, RoomName, SessionId};
use ephemera_session::{SharedClock, TokenStore};

use crate::message::{normalize_content, resolve_label};
use crate::sweeper::{self, LedgerSweep};
use crate::{LedgerConfig, Message, RoomError, RoomHub};

type RoomLog = BTreeMap<(DateTime<Utc>, MessageId), Message>;

#[derive(Default)]
struct LedgerTable {
    next_id: u64,
    rooms: HashMap<RoomName, RoomLog>,
    latest_by_session: HashMap<SessionId, DateTime<Utc>>,
}

/// Stores every room's messages until they expire.
pub struct MessageLedger {
    table: RwLock<LedgerTable>,
    sessions: Arc<TokenStore>,
    hub: Arc<RoomHub>,
    clock: SharedClock,
    config: LedgerConfig,
}

impl MessageLedger {
    pub fn new(
        sessions: Arc<TokenStore>,
        hub: Arc<RoomHub>,
        clock: SharedClock,
        config: LedgerConfig,
    ) -> Self {
        Self {
            table: RwLock::new(LedgerTable {
                next_id: 1,
                ..LedgerTable::default()
            }),
            sessions,
            hub,
            clock,
            config,
        }
    }

    /// Appends a message on behalf of `session_id` and publishes it to
    /// the room's subscribers.
    ///
    /// The timestamp is taken and the event published while the table is
    /// locked, so subscribers see messages in the same order `list`
    /// returns them.
    ///
    /// `author_label` defaults to the session's derived label.
    ///
    /// # Errors
    /// - [`RoomError::Session`]: the session does not resolve to `room`
    /// - [`RoomError::InvalidInput`]: blank content or blank label
    /// - [`RoomError::RateLimited`]: the session posted within the window
    pub fn post(
        &self,
        session_id: &SessionId,
        room: &RoomName,
        content: &str,
        author_label: Option<&str>,
    ) -> Result<Message, RoomError> {
        let session = self.sessions.resolve(session_id, room)?;
        let content = normalize_content(content, self.config.max_content_chars)?;
        let author_label = resolve_label(author_label, &session)?;

        let message = {
            let mut table = self.write()?;
            let now = self.clock.now();

            if let Some(&last) = table.latest_by_session.get(session_id) {
                let reopens_at = last + self.config.rate_window;
                if reopens_at > now {
                    let retry_after_ms =
                        u64::try_from((reopens_at - now).num_milliseconds()).unwrap_or(0);
                    tracing::debug!(%session_id, %room, retry_after_ms, "post rate limited");
                    return Err(RoomError::RateLimited {
                        session_id: session_id.clone(),
                        retry_after_ms,
                    });
                }
            }

            let id = MessageId(table.next_id);
            table.next_id += 1;

            let message = Message {
                id,
                room: room.clone(),
                session_id: session_id.clone(),
                author_label,
                content,
                created_at: now,
                expires_at: now + self.config.message_ttl,
                deleted: false,
            };
            table
                .rooms
                .entry(room.clone())
                .or_default()
                .insert((now, id), message.clone());
            table.latest_by_session.insert(session_id.clone(), now);
            self.hub.publish(
                room,
                Event::MessageCreated {
                    message: message.to_view(),
                },
            );
            message
        };

        tracing::info!(message_id = %message.id, %session_id, %room, "message posted");
        Ok(message)
    }

    /// Returns the room's live messages, oldest first, capped at the
    /// `page_size` most recent. Expired messages are swept first.
    pub fn list(&self, room: &RoomName) -> Result<Vec<Message>, RoomError> {
        self.sweep()?;

        let now = self.clock.now();
        let table = self
            .table
            .read()
            .map_err(|_| RoomError::StoreUnavailable("message ledger"))?;
        let Some(log) = table.rooms.get(room) else {
            return Ok(Vec::new());
        };

        let mut page: Vec<Message> = log
            .values()
            .rev()
            .filter(|m| !m.deleted && !m.is_expired_at(now))
            .take(self.config.page_size)
            .cloned()
            .collect();
        page.reverse();
        Ok(page)
    }

    /// Number of rows held for `room`, tombstones included.
    pub fn stored_len(&self, room: &RoomName) -> usize {
        self.table
            .read()
            .map_or(0, |t| t.rooms.get(room).map_or(0, BTreeMap::len))
    }

    /// Tombstones expired messages in every room, then purges tombstones
    /// past their retention.
    pub fn sweep(&self) -> Result<LedgerSweep, RoomError> {
        let now = self.clock.now();
        let mut table = self.write()?;
        let LedgerTable {
            rooms,
            latest_by_session,
            ..
        } = &mut *table;

        let mut report = LedgerSweep::default();
        for log in rooms.values_mut() {
            report.tombstoned += sweeper::tombstone_expired(log.values_mut(), now);
            if let Some(retention) = self.config.tombstone_retention {
                report.purged += sweeper::purge_tombstones(log, now - retention);
            }
        }
        rooms.retain(|_, log| !log.is_empty());

        let window_start = now - self.config.rate_window;
        latest_by_session.retain(|_, last| *last > window_start);

        if report != LedgerSweep::default() {
            tracing::info!(
                tombstoned = report.tombstoned,
                purged = report.purged,
                "message sweep"
            );
        }
        Ok(report)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, LedgerTable>, RoomError> {
        self.table.write().map_err(|_| {
            tracing::warn!("message ledger lock poisoned");
            RoomError::StoreUnavailable("message ledger")
        })
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    //! Naming: `test_{function}_{scenario}_{expected}`.

    use chrono::{Duration, TimeZone};
    use ephemera_session::{ManualClock, SessionError};

    use super::*;
    use crate::HubConfig;

    // -- Helpers ----------------------------------------------------------

    struct Fixture {
        ledger: MessageLedger,
        tokens: Arc<TokenStore>,
        hub: Arc<RoomHub>,
        clock: ManualClock,
    }

    fn fixture() -> Fixture {
        fixture_with(LedgerConfig::default())
    }

    fn fixture_with(config: LedgerConfig) -> Fixture {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap());
        let shared: SharedClock = Arc::new(clock.clone());
        let tokens = Arc::new(TokenStore::new(shared.clone()));
        let hub = Arc::new(RoomHub::new(HubConfig::default()));
        let ledger = MessageLedger::new(tokens.clone(), hub.clone(), shared, config);
        Fixture {
            ledger,
            tokens,
            hub,
            clock,
        }
    }

    fn room(name: &str) -> RoomName {
        RoomName::parse(name).unwrap()
    }

    impl Fixture {
        fn login(&self, credential: &str, name: &str) -> SessionId {
            self.tokens
                .validate_or_create(credential, &room(name))
                .unwrap()
                .session_id
        }
    }

    // =====================================================================
    // post()
    // =====================================================================

    #[test]
    fn test_post_stores_trimmed_content_with_ten_minute_expiry() {
        let f = fixture();
        let sid = f.login("abc123def456", "general");

        let message = f.ledger.post(&sid, &room("general"), "  hello  ", None).unwrap();

        assert_eq!(message.content, "hello");
        assert_eq!(message.expires_at - message.created_at, Duration::minutes(10));
        assert_eq!(message.author_label, format!("user_{}", &sid.as_str()[24..]));
        assert!(!message.deleted);
    }

    #[test]
    fn test_post_uses_client_label_when_given() {
        let f = fixture();
        let sid = f.login("abc123def456", "general");

        let message = f
            .ledger
            .post(&sid, &room("general"), "hi", Some(" alice "))
            .unwrap();

        assert_eq!(message.author_label, "alice");
    }

    #[test]
    fn test_post_blank_label_is_invalid_input() {
        let f = fixture();
        let sid = f.login("abc123def456", "general");

        let result = f.ledger.post(&sid, &room("general"), "hi", Some("   "));

        assert!(matches!(result, Err(RoomError::InvalidInput(_))));
    }

    #[test]
    fn test_post_blank_content_is_invalid_input() {
        let f = fixture();
        let sid = f.login("abc123def456", "general");

        let result = f.ledger.post(&sid, &room("general"), " \n ", None);

        assert!(matches!(result, Err(RoomError::InvalidInput(_))));
        assert_eq!(f.ledger.stored_len(&room("general")), 0);
    }

    #[test]
    fn test_post_long_content_truncated_to_limit() {
        let f = fixture();
        let sid = f.login("abc123def456", "general");

        let message = f
            .ledger
            .post(&sid, &room("general"), &"x".repeat(1500), None)
            .unwrap();

        assert_eq!(message.content.chars().count(), 1000);
    }

    #[test]
    fn test_post_unknown_session_is_unauthorized() {
        let f = fixture();

        let result = f
            .ledger
            .post(&SessionId::new("forged"), &room("general"), "hi", None);

        assert!(matches!(
            result,
            Err(RoomError::Session(SessionError::Unauthorized(_)))
        ));
    }

    #[test]
    fn test_post_session_from_other_room_is_unauthorized() {
        let f = fixture();
        let sid = f.login("abc123def456", "general");

        let result = f.ledger.post(&sid, &room("random"), "hi", None);

        assert!(matches!(
            result,
            Err(RoomError::Session(SessionError::Unauthorized(_)))
        ));
    }

    #[test]
    fn test_post_within_window_is_rate_limited_then_reopens() {
        let f = fixture();
        let sid = f.login("abc123def456", "general");
        let general = room("general");

        let first = f.ledger.post(&sid, &general, "hello", None).unwrap();
        assert_eq!(first.content, "hello");

        f.clock.advance(Duration::seconds(1));
        let second = f.ledger.post(&sid, &general, "again", None);
        assert!(matches!(
            second,
            Err(RoomError::RateLimited { retry_after_ms: 1000, .. })
        ));

        f.clock.advance(Duration::seconds(1));
        assert!(f.ledger.post(&sid, &general, "again", None).is_ok());
    }

    #[test]
    fn test_post_rate_limit_is_per_session() {
        let f = fixture();
        let a = f.login("abc123def456", "general");
        let b = f.login("zzz999yyy888", "general");

        f.ledger.post(&a, &room("general"), "one", None).unwrap();

        assert!(f.ledger.post(&b, &room("general"), "two", None).is_ok());
    }

    #[test]
    fn test_post_concurrent_same_session_exactly_one_succeeds() {
        let f = fixture();
        let sid = f.login("abc123def456", "general");
        let general = room("general");

        let results: Vec<_> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let (ledger, sid, general) = (&f.ledger, &sid, &general);
                    scope.spawn(move || ledger.post(sid, general, &format!("m{i}"), None))
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let ok = results.iter().filter(|r| r.is_ok()).count();
        let limited = results
            .iter()
            .filter(|r| matches!(r, Err(RoomError::RateLimited { .. })))
            .count();
        assert_eq!(ok, 1);
        assert_eq!(limited, 7);
    }

    #[test]
    fn test_post_publishes_message_created() {
        let f = fixture();
        let sid = f.login("abc123def456", "general");
        let mut rx = f.hub.subscribe(&room("general"));

        let message = f.ledger.post(&sid, &room("general"), "hi", None).unwrap();

        match rx.try_recv().unwrap() {
            Event::MessageCreated { message: view } => assert_eq!(view.id, message.id),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_post_concurrent_sessions_publish_in_list_order() {
        let f = fixture();
        let general = room("general");
        let sessions: Vec<_> = (0..8)
            .map(|i| f.login(&format!("writer{i}abcdef"), "general"))
            .collect();
        let mut rx = f.hub.subscribe(&general);

        std::thread::scope(|scope| {
            for (i, sid) in sessions.iter().enumerate() {
                let (ledger, general) = (&f.ledger, &general);
                scope.spawn(move || ledger.post(sid, general, &format!("m{i}"), None).unwrap());
            }
        });

        let mut pushed = Vec::new();
        while let Ok(Event::MessageCreated { message }) = rx.try_recv() {
            pushed.push(message.id);
        }
        let listed: Vec<_> = f.ledger.list(&general).unwrap().iter().map(|m| m.id).collect();
        assert_eq!(pushed.len(), 8);
        assert_eq!(pushed, listed);
    }

    // =====================================================================
    // list()
    // =====================================================================

    #[test]
    fn test_list_unknown_room_is_empty() {
        let f = fixture();
        assert!(f.ledger.list(&room("nobody-here")).unwrap().is_empty());
    }

    #[test]
    fn test_list_orders_oldest_first_with_stable_ties() {
        let f = fixture();
        let a = f.login("abc123def456", "general");
        let b = f.login("zzz999yyy888", "general");
        let general = room("general");

        // Same timestamp for both: insertion order decides.
        let first = f.ledger.post(&a, &general, "first", None).unwrap();
        let second = f.ledger.post(&b, &general, "second", None).unwrap();
        f.clock.advance(Duration::seconds(3));
        let third = f.ledger.post(&a, &general, "third", None).unwrap();

        let ids: Vec<_> = f.ledger.list(&general).unwrap().iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![first.id, second.id, third.id]);
        let again: Vec<_> = f.ledger.list(&general).unwrap().iter().map(|m| m.id).collect();
        assert_eq!(ids, again);
    }

    #[test]
    fn test_list_caps_at_page_size_keeping_newest() {
        let f = fixture_with(LedgerConfig {
            page_size: 3,
            ..LedgerConfig::default()
        });
        let sid = f.login("abc123def456", "general");
        let general = room("general");

        for i in 0..5 {
            f.ledger.post(&sid, &general, &format!("m{i}"), None).unwrap();
            f.clock.advance(Duration::seconds(2));
        }

        let contents: Vec<_> = f
            .ledger
            .list(&general)
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(contents, vec!["m2", "m3", "m4"]);
    }

    #[test]
    fn test_list_hides_message_at_exact_expiry() {
        let f = fixture();
        let sid = f.login("abc123def456", "general");
        let general = room("general");
        f.ledger.post(&sid, &general, "short-lived", None).unwrap();

        f.clock.advance(Duration::minutes(10) - Duration::milliseconds(1));
        assert_eq!(f.ledger.list(&general).unwrap().len(), 1);

        f.clock.advance(Duration::milliseconds(1));
        assert!(f.ledger.list(&general).unwrap().is_empty());
        assert_eq!(
            f.ledger.stored_len(&general),
            1,
            "expired rows are tombstoned, not removed"
        );
    }

    #[test]
    fn test_list_does_not_require_a_session() {
        let f = fixture();
        let sid = f.login("abc123def456", "general");
        f.ledger.post(&sid, &room("general"), "public", None).unwrap();

        assert_eq!(f.ledger.list(&room("general")).unwrap().len(), 1);
    }

    // =====================================================================
    // sweep()
    // =====================================================================

    #[test]
    fn test_sweep_purges_tombstones_after_retention() {
        let f = fixture();
        let sid = f.login("abc123def456", "general");
        let general = room("general");
        f.ledger.post(&sid, &general, "bye", None).unwrap();

        f.clock.advance(Duration::minutes(10));
        assert_eq!(f.ledger.sweep().unwrap().tombstoned, 1);

        f.clock.advance(Duration::hours(1));
        let report = f.ledger.sweep().unwrap();
        assert_eq!(report, LedgerSweep { tombstoned: 0, purged: 1 });
        assert_eq!(f.ledger.stored_len(&general), 0);
    }

    #[test]
    fn test_sweep_without_retention_keeps_tombstones() {
        let f = fixture_with(LedgerConfig {
            tombstone_retention: None,
            ..LedgerConfig::default()
        });
        let sid = f.login("abc123def456", "general");
        f.ledger.post(&sid, &room("general"), "bye", None).unwrap();

        f.clock.advance(Duration::days(1));
        f.ledger.sweep().unwrap();

        assert_eq!(f.ledger.stored_len(&room("general")), 1);
    }

    #[test]
    fn test_sweep_twice_changes_nothing_the_second_time() {
        let f = fixture();
        let sid = f.login("abc123def456", "general");
        f.ledger.post(&sid, &room("general"), "hi", None).unwrap();
        f.clock.advance(Duration::minutes(11));

        assert_eq!(f.ledger.sweep().unwrap().tombstoned, 1);
        assert_eq!(f.ledger.sweep().unwrap(), LedgerSweep::default());
    }
}
