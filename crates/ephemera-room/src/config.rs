//! Tunables for the ledger, presence tracker, and event hub.
//!
//! Defaults are the client-visible constants; changing them changes what
//! clients observe, so deployments normally only touch retention and
//! eviction.

use chrono::Duration;

/// Message ledger settings.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Lifetime of a message: `expires_at = created_at + message_ttl`.
    /// Default: 10 minutes.
    pub message_ttl: Duration,

    /// Content longer than this (in characters, after trimming) is
    /// truncated. Default: 1000.
    pub max_content_chars: usize,

    /// Minimum spacing between two posts of one session. Default: 2 s.
    pub rate_window: Duration,

    /// Maximum number of messages returned by a listing. Default: 100.
    pub page_size: usize,

    /// How long a tombstoned message is kept before it is physically
    /// removed. `None` keeps tombstones forever. Default: 1 hour.
    pub tombstone_retention: Option<Duration>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            message_ttl: Duration::minutes(10),
            max_content_chars: 1000,
            rate_window: Duration::seconds(2),
            page_size: 100,
            tombstone_retention: Some(Duration::hours(1)),
        }
    }
}

/// Presence tracker settings.
#[derive(Debug, Clone)]
pub struct PresenceConfig {
    /// A typing row not refreshed within this window is stale: it is
    /// excluded from queries and the sweeper flips it to not-typing.
    /// Clients re-announce every 3 s. Default: 10 s.
    pub staleness: Duration,

    /// Rows idle longer than this are removed entirely. Default: 5 min.
    pub eviction: Duration,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            staleness: Duration::seconds(10),
            eviction: Duration::minutes(5),
        }
    }
}

/// Room event hub settings.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Per-room broadcast buffer. Subscribers that fall further behind
    /// skip the oldest events. Default: 256.
    pub channel_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
        }
    }
}
