//! `tcp-synth`: deterministic TCP trace synthesis for reassembly testing.
//!
//! # Architecture
//!
//! ```text
//!  ┌───────────────────┐  data steps / faults  ┌──────────────────┐
//!  │ ScenarioAssembler │──────────────────────▶│  SegmentPlanner  │
//!  └────┬──────────────┘◀──────────────────────└──────────────────┘
//!       │                  segment descriptors
//!       │ descriptor + flags
//!  ┌────▼──────────────────────────────┐
//!  │           FrameBuilder            │
//!  │  (stamps seq/ack/options, frames) │
//!  └────┬─────────────────────▲────────┘
//!       │ observe_*           │ peek / ack_for
//!  ┌────▼─────────────────────┴────────┐
//!  │          ConnectionState          │
//!  │  (two SequenceSpaces + echoes)    │
//!  └───────────────────────────────────┘
//!       records ──▶ CaptureSink (pcap)
//! ```
//!
//! Each module has a single responsibility:
//! - [`sequence`]   : wraparound 32-bit sequence spaces
//! - [`planner`]    : payload + strategy → ordered segment descriptors
//! - [`connection`] : per-direction sequence, ACK and timestamp state
//! - [`state`]      : connection lifecycle
//! - [`endpoint`]   : MAC/IPv4/port endpoints and direction
//! - [`packet`]     : Ethernet/IPv4/TCP wire format and checksums
//! - [`frame`]      : descriptor → immutable record
//! - [`scenario`]   : phase driver, trace clock and manifest
//! - [`catalog`]    : the named scenarios
//! - [`config`]     : ISN sources, timing, caller overrides
//! - [`capture`]    : libpcap output
//! - [`verdict`]    : delayed mock verdict HTTP service
//! - [`script`]     : IDS driver script rendering
//! - [`error`]      : construction errors

pub mod capture;
pub mod catalog;
pub mod config;
pub mod connection;
pub mod endpoint;
pub mod error;
pub mod frame;
pub mod packet;
pub mod planner;
pub mod scenario;
pub mod script;
pub mod sequence;
pub mod state;
pub mod verdict;

pub use error::{Result, SynthError};
