//! Error types raised synchronously by configuration-time store operations.
//!
//! Mirrors the style of [`eventually::entity::GetError`] and
//! [`eventually::store::ConflictError`]: small, `thiserror`-derived enums
//! with one variant per distinct failure mode, never a bare `String`.

use thiserror::Error;

/// Errors raised synchronously when a registration call on the
/// [`Store`](crate::store::Store) violates one of its configuration
/// invariants.
///
/// These are programmer errors: they are fatal for the offending call, but
/// never poison the store itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Raised by `add_behavior`/`add_event_source`/`connect` when a second
    /// source is registered for an identifier that only accepts one.
    #[error("behavior or event source with the given identifier has already been added")]
    SourceAlreadyAdded,

    /// Raised by `add_reducer` when a reducer is already registered for the
    /// same `(StateId, EventId)` pair.
    #[error("a source with the given ID has already been added")]
    ReducerAlreadyAdded,

    /// Raised by `get_lifecycle_handle` when called from within another
    /// lifecycle registration callback.
    #[error(
        "getLifecycleHandle cannot be called while already within a lifecycleRegistrationCallback"
    )]
    NestedLifecycleRegistration,
}
