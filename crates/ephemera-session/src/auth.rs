//! Credential policy: decides which bearer strings may open a session.
//!
//! The token store never interprets a credential beyond this check. It
//! is an opaque string the client pulled out of a file; whoever holds it
//! may join the room it is presented for.
//!
//! The policy is a trait so deployments can tighten it (longer minimum,
//! an allow-list, a checksum) without touching the store.

use crate::SessionError;

/// Validates the shape of a credential before any session work happens.
///
/// `Send + Sync + 'static` because one policy instance lives inside the
/// token store for the life of the server and is consulted from every
/// connection task.
///
/// # Example
///
/// ```rust
/// use ephemera_session::{CredentialPolicy, SessionError};
///
/// /// Only accepts credentials issued with a known prefix.
/// struct PrefixPolicy;
///
/// impl CredentialPolicy for PrefixPolicy {
///     fn check(&self, credential: &str) -> Result<(), SessionError> {
///         if credential.starts_with("room") && credential.len() >= 12 {
///             Ok(())
///         } else {
///             Err(SessionError::InvalidCredential("unknown issuer".into()))
///         }
///     }
/// }
/// ```
pub trait CredentialPolicy: Send + Sync + 'static {
    /// Returns `Ok(())` if `credential` may be exchanged for a session.
    ///
    /// # Errors
    /// [`SessionError::InvalidCredential`] with a human-readable reason.
    fn check(&self, credential: &str) -> Result<(), SessionError>;
}

// Lets builders hold a policy chosen at runtime.
impl CredentialPolicy for Box<dyn CredentialPolicy> {
    fn check(&self, credential: &str) -> Result<(), SessionError> {
        (**self).check(credential)
    }
}

/// The default policy: `^[A-Za-z0-9]{min_len,}$` over ASCII.
#[derive(Debug, Clone, Copy)]
pub struct AlphanumericPolicy {
    /// Minimum number of characters. Default: 8.
    pub min_len: usize,
}

impl Default for AlphanumericPolicy {
    fn default() -> Self {
        Self { min_len: 8 }
    }
}

impl CredentialPolicy for AlphanumericPolicy {
    fn check(&self, credential: &str) -> Result<(), SessionError> {
        if !credential.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(SessionError::InvalidCredential(
                "credential must contain only letters and digits".into(),
            ));
        }
        // All bytes are ASCII at this point, so byte length == char count.
        if credential.len() < self.min_len {
            return Err(SessionError::InvalidCredential(format!(
                "credential must be at least {} characters",
                self.min_len
            )));
        }
        Ok(())
    }
}
