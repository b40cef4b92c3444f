//! Scenario assembly: phases in, records and a manifest out.
//!
//! A [`ScenarioAssembler`] owns one [`ConnectionState`] and drives it through
//!
//! ```text
//!  Setup ─▶ Handshake ─▶ DataExchange* ─▶ FaultInjection* ─▶ Teardown
//! ```
//!
//! Every phase is optional, teardown included, but phases never go backwards.
//! Each emitted record gets a capture time and a TSval from the
//! [`TraceClock`]; records worth pointing at are named in the [`Manifest`]
//! (`syn`, `body.chunk0`, `body.last_chunk`, `fin`, ...).

use std::collections::BTreeMap;

use crate::config::TraceTiming;
use crate::connection::ConnectionState;
use crate::endpoint::{Direction, EndpointPair};
use crate::error::{Result, SynthError};
use crate::frame::{FrameBuilder, OptionProfile, Record};
use crate::packet::flags;
use crate::planner::{SegmentDescriptor, SegmentPlanner, Strategy, TimestampSchedule};
use crate::sequence::seq_le;

// ---------------------------------------------------------------------------
// Phases
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Setup,
    Handshake,
    DataExchange,
    FaultInjection,
    Teardown,
}

impl Phase {
    pub fn name(self) -> &'static str {
        match self {
            Self::Setup => "setup",
            Self::Handshake => "handshake",
            Self::DataExchange => "data exchange",
            Self::FaultInjection => "fault injection",
            Self::Teardown => "teardown",
        }
    }

    /// Phases that may run at most once.
    fn is_single(self) -> bool {
        matches!(self, Self::Handshake | Self::Teardown)
    }
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

/// Pure ACKs the peer sends back during a data step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AckPolicy {
    None,
    /// One ACK after every emitted segment, retransmissions included.
    #[default]
    EachSegment,
    /// One ACK once the whole step is on the wire.
    AfterStep,
}

/// Which data segments carry PSH.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PushPolicy {
    /// Only the last emitted segment of the step.
    #[default]
    Last,
    Every,
}

/// One payload sent in one direction.
#[derive(Debug, Clone, PartialEq)]
pub struct DataStep {
    /// Prefix for this step's landmarks.
    pub label: String,
    pub direction: Direction,
    pub payload: Vec<u8>,
    pub strategy: Strategy,
    pub acks: AckPolicy,
    pub push: PushPolicy,
    /// Extra seconds inserted before every retransmitted copy.
    pub holdoff: f64,
}

impl DataStep {
    pub fn new(label: impl Into<String>, direction: Direction, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            label: label.into(),
            direction,
            payload: payload.into(),
            strategy: Strategy::Whole,
            acks: AckPolicy::default(),
            push: PushPolicy::default(),
            holdoff: 0.0,
        }
    }

    pub fn strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn acks(mut self, acks: AckPolicy) -> Self {
        self.acks = acks;
        self
    }

    pub fn push(mut self, push: PushPolicy) -> Self {
        self.push = push;
        self
    }

    pub fn holdoff(mut self, seconds: f64) -> Self {
        self.holdoff = seconds;
        self
    }
}

/// Faults injected after the regular exchange.
#[derive(Debug, Clone, PartialEq)]
pub enum Fault {
    /// Replay the data segment at `landmark`, `holdoff` seconds late.
    Retransmit { landmark: String, holdoff: f64 },
    /// An overlapping segment starting `back_off` bytes before the segment at
    /// `landmark`, carrying unrelated bytes.
    Gap {
        landmark: String,
        back_off: u32,
        payload: Vec<u8>,
    },
    /// Normal in-order data after the faults.
    Resume {
        label: String,
        direction: Direction,
        payload: Vec<u8>,
        acks: AckPolicy,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Teardown {
    /// Client FIN, server FIN-ACK, client ACK.
    #[default]
    Graceful,
    /// Server FIN answered by a client ACK.
    ServerFin,
}

// ---------------------------------------------------------------------------
// TraceClock
// ---------------------------------------------------------------------------

/// Hands out capture times and TSvals, one pair per record.
#[derive(Debug, Clone)]
pub struct TraceClock {
    timing: TraceTiming,
    emitted: u32,
    held: f64,
}

impl TraceClock {
    pub fn new(timing: TraceTiming) -> Self {
        Self {
            timing,
            emitted: 0,
            held: 0.0,
        }
    }

    pub fn tick(&self) -> u32 {
        self.timing.timestamp_tick
    }

    /// TSval the next record will carry.
    pub fn peek_ts(&self) -> u32 {
        self.timing
            .timestamp_tick
            .wrapping_mul(self.emitted.wrapping_add(1))
    }

    /// Capture time the next record will carry.
    pub fn peek_time(&self) -> f64 {
        self.timing.start + f64::from(self.emitted) * self.timing.interval + self.held
    }

    /// Consume one record's slot: `(capture time, TSval)`.
    pub fn stamp(&mut self) -> (f64, u32) {
        let slot = (self.peek_time(), self.peek_ts());
        self.emitted = self.emitted.wrapping_add(1);
        slot
    }

    /// Delay every later record by `seconds`.
    pub fn hold(&mut self, seconds: f64) {
        self.held += seconds;
    }
}

// ---------------------------------------------------------------------------
// Manifest / Trace
// ---------------------------------------------------------------------------

/// Named record indices.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    landmarks: BTreeMap<String, usize>,
}

impl Manifest {
    pub fn get(&self, name: &str) -> Result<usize> {
        self.landmarks
            .get(name)
            .copied()
            .ok_or_else(|| SynthError::UnknownLandmark(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.landmarks.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.landmarks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.landmarks.is_empty()
    }

    /// Landmarks in record order.
    pub fn by_record(&self) -> Vec<(&str, usize)> {
        let mut marks: Vec<(&str, usize)> = self
            .landmarks
            .iter()
            .map(|(name, &index)| (name.as_str(), index))
            .collect();
        marks.sort_by_key(|&(name, index)| (index, name));
        marks
    }

    fn mark(&mut self, name: impl Into<String>, index: usize) {
        self.landmarks.insert(name.into(), index);
    }

    fn mark_once(&mut self, name: impl Into<String>, index: usize) {
        self.landmarks.entry(name.into()).or_insert(index);
    }
}

/// A finished scenario.
#[derive(Debug, Clone)]
pub struct Trace {
    pub records: Vec<Record>,
    pub manifest: Manifest,
}

impl Trace {
    /// The record a landmark points at.
    pub fn record(&self, landmark: &str) -> Result<&Record> {
        let index = self.manifest.get(landmark)?;
        self.records.get(index).ok_or(SynthError::IndexOutOfRange {
            index,
            len: self.records.len(),
        })
    }
}

// ---------------------------------------------------------------------------
// ScenarioAssembler
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct AssemblerSettings {
    pub profile: OptionProfile,
    pub timing: TraceTiming,
}

pub struct ScenarioAssembler {
    connection: ConnectionState,
    builder: FrameBuilder,
    clock: TraceClock,
    phase: Phase,
    records: Vec<Record>,
    /// Parallel to `records`; what each record was built from.
    sent: Vec<SegmentDescriptor>,
    manifest: Manifest,
}

impl ScenarioAssembler {
    /// Open a connection between `endpoints` with `(client_isn, server_isn)`.
    pub fn new(
        endpoints: EndpointPair,
        (client_isn, server_isn): (u32, u32),
        settings: AssemblerSettings,
    ) -> Result<Self> {
        let mut connection = ConnectionState::new();
        connection.open(endpoints.client, endpoints.server, client_isn, server_isn)?;
        Ok(Self {
            connection,
            builder: FrameBuilder::new(settings.profile),
            clock: TraceClock::new(settings.timing),
            phase: Phase::Setup,
            records: Vec::new(),
            sent: Vec::new(),
            manifest: Manifest::default(),
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn connection(&self) -> &ConnectionState {
        &self.connection
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    fn enter(&mut self, requested: Phase) -> Result<()> {
        let backwards = requested < self.phase;
        let repeated = requested == self.phase && requested.is_single();
        if backwards || repeated {
            return Err(SynthError::PhaseOrder {
                current: self.phase.name(),
                requested: requested.name(),
            });
        }
        if requested != self.phase {
            log::debug!("[scenario] {} -> {}", self.phase.name(), requested.name());
        }
        self.phase = requested;
        Ok(())
    }

    /// SYN, SYN-ACK, ACK.
    pub fn handshake(&mut self) -> Result<&mut Self> {
        self.enter(Phase::Handshake)?;
        let syn = self.emit_control(Direction::ClientToServer, flags::SYN)?;
        self.manifest.mark("syn", syn);
        let syn_ack = self.emit_control(Direction::ServerToClient, flags::SYN | flags::ACK)?;
        self.manifest.mark("syn_ack", syn_ack);
        let ack = self.emit_control(Direction::ClientToServer, flags::ACK)?;
        self.manifest.mark("handshake_ack", ack);
        Ok(self)
    }

    /// Plan and emit one data step.
    pub fn exchange(&mut self, step: DataStep) -> Result<&mut Self> {
        self.enter(Phase::DataExchange)?;
        self.emit_step(&step)?;
        Ok(self)
    }

    pub fn inject(&mut self, fault: Fault) -> Result<&mut Self> {
        self.enter(Phase::FaultInjection)?;
        match fault {
            Fault::Retransmit { landmark, holdoff } => {
                let index = self.manifest.get(&landmark)?;
                let original = &self.sent[index];
                if original.payload.is_empty() {
                    return Err(SynthError::InvalidStrategy(format!(
                        "landmark {landmark:?} has no payload to retransmit"
                    )));
                }
                let direction = self.records[index].direction();
                let tcp_flags = self.records[index].flags();
                let mut replay = original.retransmitted();
                replay.force_ack = None;
                replay.timestamp_value = self.clock.peek_ts();
                self.clock.hold(holdoff);
                let replayed = self.emit(direction, replay, tcp_flags)?;
                self.manifest.mark(format!("{landmark}.retransmission"), replayed);
            }
            Fault::Gap {
                landmark,
                back_off,
                payload,
            } => {
                let index = self.manifest.get(&landmark)?;
                let direction = self.records[index].direction();
                let offset = self.sent[index].stream_offset.wrapping_sub(back_off);
                let gap = SegmentDescriptor::overlap(offset, payload)
                    .with_timestamp(self.clock.peek_ts(), 0);
                let high_water = self.connection.next_offset(direction);
                if !seq_le(gap.end()?, high_water) {
                    return Err(SynthError::InvalidStrategy(format!(
                        "gap before {landmark:?} ends past offset {high_water}, beyond what was sent"
                    )));
                }
                let injected = self.emit(direction, gap, flags::ACK)?;
                self.manifest.mark(format!("{landmark}.gap"), injected);
            }
            Fault::Resume {
                label,
                direction,
                payload,
                acks,
            } => {
                let step = DataStep::new(label, direction, payload).acks(acks);
                self.emit_step(&step)?;
            }
        }
        Ok(self)
    }

    pub fn teardown(&mut self, teardown: Teardown) -> Result<&mut Self> {
        self.enter(Phase::Teardown)?;
        let fin = flags::FIN | flags::ACK;
        match teardown {
            Teardown::Graceful => {
                let index = self.emit_control(Direction::ClientToServer, fin)?;
                self.manifest.mark("fin", index);
                let index = self.emit_control(Direction::ServerToClient, fin)?;
                self.manifest.mark("fin_ack", index);
            }
            Teardown::ServerFin => {
                let index = self.emit_control(Direction::ServerToClient, fin)?;
                self.manifest.mark("fin", index);
            }
        }
        let index = self.emit_control(Direction::ClientToServer, flags::ACK)?;
        self.manifest.mark("last_ack", index);
        Ok(self)
    }

    /// Close the connection and hand back everything emitted.
    pub fn finalize(mut self) -> Result<Trace> {
        self.connection.close()?;
        log::info!(
            "[scenario] {} record(s), {} landmark(s)",
            self.records.len(),
            self.manifest.len()
        );
        Ok(Trace {
            records: self.records,
            manifest: self.manifest,
        })
    }

    // -----------------------------------------------------------------------
    // Emission
    // -----------------------------------------------------------------------

    /// TSval `direction` sent last, if it has sent one.
    fn previous_timestamp(&self, direction: Direction) -> Option<u32> {
        if !self.builder.profile.uses_timestamps() {
            return None;
        }
        Some(self.connection.last_timestamp(direction)).filter(|&ts| ts != 0)
    }

    fn emit_step(&mut self, step: &DataStep) -> Result<()> {
        if step.strategy.has_stale_timestamp() && !self.builder.profile.uses_timestamps() {
            return Err(SynthError::InvalidStrategy(format!(
                "{}: stale timestamp needs the timestamp option, profile is {:?}",
                step.label, self.builder.profile
            )));
        }
        let direction = step.direction;
        let origin = self.connection.next_offset(direction);
        let per_segment = u32::from(step.acks == AckPolicy::EachSegment);
        let schedule = TimestampSchedule {
            start: self.clock.peek_ts(),
            step: self.clock.tick().wrapping_mul(1 + per_segment),
            previous: self.previous_timestamp(direction),
        };
        let plan = SegmentPlanner::new(origin)
            .with_schedule(schedule)
            .plan(&step.payload, &step.strategy)?;
        if plan.is_empty() {
            log::debug!("[scenario] {}: empty payload, nothing to send", step.label);
            return Ok(());
        }

        // Chunk numbering follows stream order, not emission order.
        let mut chunk_offsets: Vec<u32> = plan
            .iter()
            .filter(|d| !d.is_retransmission)
            .map(|d| d.stream_offset.wrapping_sub(origin))
            .collect();
        chunk_offsets.sort_unstable();

        let last = plan.len() - 1;
        for (position, descriptor) in plan.into_iter().enumerate() {
            let mut tcp_flags = flags::ACK;
            if step.push == PushPolicy::Every || position == last {
                tcp_flags |= flags::PSH;
            }
            let scheduled = schedule
                .start
                .wrapping_add(schedule.step.wrapping_mul(position as u32));
            let stale = descriptor.timestamp_value != scheduled;
            let retransmission = descriptor.is_retransmission;
            let relative = descriptor.stream_offset.wrapping_sub(origin);
            if retransmission && step.holdoff > 0.0 {
                self.clock.hold(step.holdoff);
            }

            let index = self.emit(direction, descriptor, tcp_flags)?;
            let label = &step.label;
            if position == 0 {
                self.manifest.mark(format!("{label}.first"), index);
            }
            if retransmission {
                self.manifest.mark_once(format!("{label}.retransmission"), index);
            } else {
                if let Ok(chunk) = chunk_offsets.binary_search(&relative) {
                    self.manifest.mark(format!("{label}.chunk{chunk}"), index);
                }
                self.manifest.mark(format!("{label}.last_chunk"), index);
            }
            if stale {
                self.manifest.mark(format!("{label}.stale_timestamp"), index);
            }

            if step.acks == AckPolicy::EachSegment {
                let ack = self.emit_control(direction.reverse(), flags::ACK)?;
                self.manifest.mark(format!("{label}.ack"), ack);
            }
        }
        if step.acks == AckPolicy::AfterStep {
            let ack = self.emit_control(direction.reverse(), flags::ACK)?;
            self.manifest.mark(format!("{}.ack", step.label), ack);
        }
        Ok(())
    }

    /// A payload-less segment at the direction's current position.
    fn emit_control(&mut self, direction: Direction, tcp_flags: u8) -> Result<usize> {
        let descriptor = SegmentDescriptor::control(self.connection.next_offset(direction))
            .with_timestamp(self.clock.peek_ts(), 0);
        self.emit(direction, descriptor, tcp_flags)
    }

    fn emit(
        &mut self,
        direction: Direction,
        mut descriptor: SegmentDescriptor,
        tcp_flags: u8,
    ) -> Result<usize> {
        descriptor.timestamp_echo = if tcp_flags & flags::ACK != 0 {
            self.connection.timestamp_echo(direction)
        } else {
            0
        };
        let (at, _) = self.clock.stamp();
        let record = self
            .builder
            .build(&mut self.connection, direction, &descriptor, tcp_flags, at)?;
        let index = self.records.len();
        log::debug!("[scenario] #{index} {record}");
        self.records.push(record);
        self.sent.push(descriptor);
        Ok(index)
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
