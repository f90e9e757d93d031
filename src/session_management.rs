//! Session management core module.
//!
//! This module provides the session type and the registry that issues, tracks and retires
//! sessions.

/// Submodule for session data structures and modes.
pub mod session;
/// Submodule for the session registry.
pub mod session_manager;

pub use session::{AccessMode, OutputFormat, Session, SessionInfo, SessionMode};
pub use session_manager::{SessionManager, TerminationOutcome};
