//! Shared error taxonomy (spec §7). Each crate defines its own `thiserror` enum
//! for the errors it can produce; [`Fatal`] is the umbrella the supervisor (C11)
//! matches on to decide whether to exit.

/// Marks an error as belonging to one of the two fatal kinds from spec §7:
/// configuration-fatal (exit before starting any task) or transport-fatal
/// (exit after cleaning up what was already created).
///
/// Transient I/O, membership violations, and classification drops are never
/// `Fatal` - they are logged and absorbed at the task that observed them and
/// must not implement this trait.
pub trait Fatal: std::error::Error {}
