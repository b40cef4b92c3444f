//! Per-connection bookkeeping for the synthesizer.
//!
//! A [`ConnectionState`] owns everything that must stay consistent across a
//! scenario:
//! - one [`SequenceSpace`] per direction,
//! - the acknowledgment number each side last stamped,
//! - the TCP timestamp each side last sent (echoed back by its peer),
//! - each side's IPv4 identification counter.
//!
//! Acknowledgments are computed from the constructor's omniscient view: the
//! ACK a side sends is the highest offset its peer has put on the wire, no
//! matter in which order the segments were emitted.  Advancement is keyed by
//! that high-water mark, so duplicates and overlaps never count twice.
//!
//! Lifecycle: `Unopened → Open → Closed` (see [`crate::state`]).

use crate::endpoint::{Direction, Endpoint, EndpointPair};
use crate::error::{Result, SynthError};
use crate::planner::SegmentDescriptor;
use crate::sequence::SequenceSpace;
use crate::state::Lifecycle;

/// One direction's sending state.
#[derive(Debug, Clone, Copy)]
struct Flow {
    seq: SequenceSpace,
    /// Last acknowledgment number this side put on the wire.
    acked_through: u32,
    /// Last TSval this side sent.
    last_ts: u32,
    ip_id: u16,
}

impl Flow {
    fn new(isn: u32) -> Self {
        Self {
            seq: SequenceSpace::new(isn),
            acked_through: 0,
            last_ts: 0,
            ip_id: 1,
        }
    }
}

/// Sequence, acknowledgment and timestamp state for one synthesized
/// connection.
#[derive(Debug, Clone)]
pub struct ConnectionState {
    lifecycle: Lifecycle,
    endpoints: Option<EndpointPair>,
    client: Flow,
    server: Flow,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionState {
    /// A connection in the [`Lifecycle::Unopened`] state.
    pub fn new() -> Self {
        Self {
            lifecycle: Lifecycle::Unopened,
            endpoints: None,
            client: Flow::new(0),
            server: Flow::new(0),
        }
    }

    /// Assign endpoints and initial sequence numbers.
    pub fn open(
        &mut self,
        client: Endpoint,
        server: Endpoint,
        client_isn: u32,
        server_isn: u32,
    ) -> Result<()> {
        if self.lifecycle != Lifecycle::Unopened {
            return Err(SynthError::AlreadyOpen);
        }
        let endpoints = EndpointPair::new(client, server);
        endpoints.validate()?;

        self.endpoints = Some(endpoints);
        self.client = Flow::new(client_isn);
        self.server = Flow::new(server_isn);
        self.lifecycle = Lifecycle::Open;
        log::debug!(
            "[conn] open {endpoints} isn c={client_isn} s={server_isn}"
        );
        Ok(())
    }

    /// Mark the connection terminal.
    pub fn close(&mut self) -> Result<()> {
        self.lifecycle.ensure_open()?;
        self.lifecycle = Lifecycle::Closed;
        Ok(())
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn endpoints(&self) -> Result<&EndpointPair> {
        self.endpoints.as_ref().ok_or(SynthError::NotOpen)
    }

    fn flow(&self, direction: Direction) -> &Flow {
        match direction {
            Direction::ClientToServer => &self.client,
            Direction::ServerToClient => &self.server,
        }
    }

    fn flow_mut(&mut self, direction: Direction) -> &mut Flow {
        match direction {
            Direction::ClientToServer => &mut self.client,
            Direction::ServerToClient => &mut self.server,
        }
    }

    /// Sequence space of the side sending in `direction`.
    pub fn sequence(&self, direction: Direction) -> &SequenceSpace {
        &self.flow(direction).seq
    }

    /// Stream offset of the next unused byte in `direction`.
    pub fn next_offset(&self, direction: Direction) -> u32 {
        self.flow(direction).seq.position()
    }

    // -----------------------------------------------------------------------
    // Observation
    // -----------------------------------------------------------------------

    /// Account for a data segment put on the wire in `direction`.
    ///
    /// Only bytes beyond the high-water mark advance the sequence space.
    /// Returns how many bytes were newly accounted.
    pub fn observe_sent(
        &mut self,
        direction: Direction,
        segment: &SegmentDescriptor,
    ) -> Result<u64> {
        self.lifecycle.ensure_open()?;
        if segment.payload.is_empty() {
            return Ok(0);
        }
        let end = segment.end()?;
        self.flow_mut(direction).seq.advance_to(end)
    }

    /// Account for a SYN or FIN, which occupies one sequence number at the
    /// current position.  Returns the offset it occupied.
    pub fn observe_control(&mut self, direction: Direction) -> Result<u32> {
        self.lifecycle.ensure_open()?;
        let seq = &mut self.flow_mut(direction).seq;
        let offset = seq.position();
        seq.advance(1)?;
        Ok(offset)
    }

    /// Remember the TSval just sent in `direction`.
    pub fn observe_timestamp(&mut self, direction: Direction, value: u32) {
        self.flow_mut(direction).last_ts = value;
    }

    /// Remember the acknowledgment number just stamped in `direction`.
    pub fn record_ack(&mut self, direction: Direction, ack: u32) {
        self.flow_mut(direction).acked_through = ack;
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Acknowledgment number for a segment sent in `direction`: everything
    /// the peer has put on the wire so far.
    pub fn ack_for(&self, direction: Direction) -> u32 {
        self.flow(direction.reverse()).seq.next()
    }

    /// Sequence space the peer has delivered to the side sending in
    /// `direction` (SYN and FIN included).
    pub fn received(&self, direction: Direction) -> u64 {
        self.flow(direction.reverse()).seq.advanced()
    }

    pub fn acked_through(&self, direction: Direction) -> u32 {
        self.flow(direction).acked_through
    }

    pub fn last_timestamp(&self, direction: Direction) -> u32 {
        self.flow(direction).last_ts
    }

    /// TSecr for a segment sent in `direction`.
    pub fn timestamp_echo(&self, direction: Direction) -> u32 {
        self.flow(direction.reverse()).last_ts
    }

    /// Next IPv4 identification for `direction`.
    pub fn next_ip_id(&mut self, direction: Direction) -> u16 {
        let flow = self.flow_mut(direction);
        let id = flow.ip_id;
        flow.ip_id = flow.ip_id.wrapping_add(1);
        id
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
