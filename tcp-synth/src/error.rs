//! Error taxonomy for scenario construction.
//!
//! Every variant is a local, synchronous construction error.  Nothing here is
//! retried: synthesis is a one-shot deterministic computation, so the first
//! error aborts the scenario and is reported to whoever asked for it.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SynthError {
    /// Zero chunk size, malformed permutation, or an unsatisfiable fault.
    #[error("invalid strategy: {0}")]
    InvalidStrategy(String),
    #[error("index {index} out of range for a plan of {len} descriptor(s)")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("connection already open")]
    AlreadyOpen,
    #[error("connection not open")]
    NotOpen,
    #[error("connection closed")]
    ClosedConnection,
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
    /// A single advance larger than the 32-bit sequence space.
    #[error("sequence space overflow: cannot advance by {0} bytes in one step")]
    Overflow(u64),
    #[error("phase {requested} cannot follow {current}")]
    PhaseOrder {
        current: &'static str,
        requested: &'static str,
    },
    #[error("no landmark named {0:?}")]
    UnknownLandmark(String),
}

pub type Result<T, E = SynthError> = std::result::Result<T, E>;
