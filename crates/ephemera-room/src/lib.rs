//! Room-scoped state for Ephemera: messages, typing indicators, expiry.
//!
//! Everything here is in memory and synchronous. Each service owns one
//! table behind a `std::sync::RwLock` and never awaits while holding it,
//! so the services are plain `Arc`-shared values callable from any task.
//! Authorization goes through the [`TokenStore`](ephemera_session::TokenStore)
//! passed in at construction.
//!
//! # Key types
//!
//! - [`MessageLedger`]: append, list, and expire messages; rate limiting
//! - [`PresenceTracker`]: per-session typing state with a freshness window
//! - [`Sweeper`]: expiry and eviction, inline or on an interval
//! - [`RoomHub`]: per-room broadcast of [`Event`](ephemera_protocol::Event)s
//! - [`LedgerConfig`] / [`PresenceConfig`] / [`HubConfig`]: tunables

mod config;
mod error;
mod hub;
mod ledger;
mod message;
mod presence;
mod sweeper;

pub use config::{HubConfig, LedgerConfig, PresenceConfig};
pub use error::RoomError;
pub use hub::RoomHub;
pub use ledger::MessageLedger;
pub use message::{MAX_USER_LABEL_CHARS, Message, TypingState};
pub use presence::PresenceTracker;
pub use sweeper::{LedgerSweep, PresenceSweep, SweepReport, Sweeper};
