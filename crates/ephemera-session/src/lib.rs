//! Room-scoped sessions for Ephemera: the token store.
//!
//! 1. **Credential policy**: which bearer strings are acceptable
//!    ([`CredentialPolicy`], [`AlphanumericPolicy`])
//! 2. **Session issuing**: one active session per (credential, room),
//!    reused on re-authentication ([`TokenStore::validate_or_create`])
//! 3. **Authorization**: resolving a session id for a room
//!    ([`TokenStore::resolve`])
//!
//! # How it fits in the stack
//!
//! ```text
//! Room layer (above)    ← ledger and presence resolve sessions here
//!     ↕
//! Session layer (this crate)
//!     ↕
//! Protocol layer (below) ← SessionId, RoomName
//! ```
//!
//! The [`Clock`] abstraction lives here too because this is the lowest
//! layer that stamps time onto records.

mod auth;
mod clock;
mod error;
mod session;
mod store;

pub use auth::{AlphanumericPolicy, CredentialPolicy};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use error::SessionError;
pub use session::{Session, default_user_label};
pub use store::TokenStore;
