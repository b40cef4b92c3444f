//! Lifecycle of a synthesized connection.
//!
//! The synthesizer never negotiates anything, so the full RFC 793 diagram
//! collapses to a linear three-state machine.  Transitions are driven by
//! [`crate::connection::ConnectionState`]; this module only defines the
//! states and the guard that checks them.
//!
//! ```text
//!  UNOPENED ──open()──▶ OPEN ──close()──▶ CLOSED
//! ```
//!
//! There is no re-entry: a closed connection stays closed, and opening twice
//! is an error.

use crate::error::{Result, SynthError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Lifecycle {
    /// Endpoints and ISNs not assigned yet.
    #[default]
    Unopened,
    /// Segments may be observed.
    Open,
    /// Terminal.
    Closed,
}

impl Lifecycle {
    /// Succeeds only while segments may be observed.
    pub fn ensure_open(self) -> Result<()> {
        match self {
            Self::Open => Ok(()),
            Self::Unopened => Err(SynthError::NotOpen),
            Self::Closed => Err(SynthError::ClosedConnection),
        }
    }
}

impl std::fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}
