//! Scenario configuration.
//!
//! Everything a named scenario lets the caller override: endpoints, initial
//! sequence numbers and record timing.  Unset fields fall back to the
//! scenario's own defaults, so a bare [`ScenarioConfig::default`] reproduces
//! the canonical capture byte for byte.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::endpoint::EndpointPair;

/// Seed used when a scenario with randomized ISNs is generated without one.
pub const DEFAULT_SEED: u64 = 0x5eed;

/// ISNs are drawn from this range, as real stacks in the captures did.
const ISN_RANGE: std::ops::RangeInclusive<u32> = 1_000_000..=9_000_000;

/// Where the client and server ISNs come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsnSource {
    Fixed { client: u32, server: u32 },
    /// Drawn from a seeded RNG; the same seed always yields the same pair.
    Seeded(u64),
}

impl IsnSource {
    /// `(client_isn, server_isn)`.
    pub fn resolve(&self) -> (u32, u32) {
        match *self {
            Self::Fixed { client, server } => (client, server),
            Self::Seeded(seed) => {
                let mut rng = StdRng::seed_from_u64(seed);
                let client = rng.random_range(ISN_RANGE);
                let server = rng.random_range(ISN_RANGE);
                (client, server)
            }
        }
    }
}

impl Default for IsnSource {
    fn default() -> Self {
        Self::Seeded(DEFAULT_SEED)
    }
}

/// Capture timestamps and TCP timestamp values handed out per record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TraceTiming {
    /// Capture time of the first record, in seconds.
    pub start: f64,
    /// Seconds between consecutive records.
    pub interval: f64,
    /// TSval increment per record.
    pub timestamp_tick: u32,
}

impl Default for TraceTiming {
    fn default() -> Self {
        Self {
            start: 0.0,
            interval: 1.0,
            timestamp_tick: 100,
        }
    }
}

/// Caller overrides for a named scenario.
#[derive(Debug, Clone, Default)]
pub struct ScenarioConfig {
    pub endpoints: Option<EndpointPair>,
    pub isn: Option<IsnSource>,
    pub timing: TraceTiming,
}

impl ScenarioConfig {
    pub fn endpoints_or(&self, default: EndpointPair) -> EndpointPair {
        self.endpoints.unwrap_or(default)
    }

    pub fn isns_or(&self, default: IsnSource) -> (u32, u32) {
        self.isn.unwrap_or(default).resolve()
    }
}
