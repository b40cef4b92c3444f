//! Segment planning: how a payload is cut up and in what order it hits the
//! wire.
//!
//! [`SegmentPlanner::plan`] turns a payload and a [`Strategy`] into an
//! ordered list of [`SegmentDescriptor`]s.  Planning happens in two passes:
//!
//! 1. **Layout**: split the payload into chunks and decide the emission
//!    order, including inserted duplicates and stale-timestamp overrides.
//!    Wrappers ([`Strategy::WithDuplicate`], [`Strategy::WithStaleAck`]) only
//!    ever rearrange slots, so they compose in any nesting.
//! 2. **Materialise**: label each slot with its true stream offset and a
//!    TCP timestamp taken from the [`TimestampSchedule`].
//!
//! Offsets stored on descriptors are always true stream offsets; only the
//! emission order is scrambled.  A stale timestamp is kept exactly as
//! requested: if it would not actually go backwards, planning fails instead
//! of quietly adjusting it.

use std::ops::Range;

use crate::error::{Result, SynthError};
use crate::sequence::span_of;

// ---------------------------------------------------------------------------
// SegmentDescriptor
// ---------------------------------------------------------------------------

/// One TCP segment to be framed: where its bytes sit in the stream and how it
/// should be stamped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentDescriptor {
    /// Offset into the sender's sequence space, measured from the ISN.
    pub stream_offset: u32,
    pub payload: Vec<u8>,
    /// A second copy of bytes an earlier descriptor already carried.
    pub is_retransmission: bool,
    /// May re-cover (or precede) bytes outside the declared plan.
    pub is_overlap: bool,
    /// Replaces the computed acknowledgment number when set.
    pub force_ack: Option<u32>,
    /// TSval.
    pub timestamp_value: u32,
    /// TSecr.
    pub timestamp_echo: u32,
}

impl SegmentDescriptor {
    pub fn new(stream_offset: u32, payload: Vec<u8>) -> Self {
        Self {
            stream_offset,
            payload,
            is_retransmission: false,
            is_overlap: false,
            force_ack: None,
            timestamp_value: 0,
            timestamp_echo: 0,
        }
    }

    /// A payload-less segment (SYN, FIN, pure ACK).
    pub fn control(stream_offset: u32) -> Self {
        Self::new(stream_offset, Vec::new())
    }

    /// A segment allowed to land outside the planned byte range.
    pub fn overlap(stream_offset: u32, payload: Vec<u8>) -> Self {
        Self {
            is_overlap: true,
            ..Self::new(stream_offset, payload)
        }
    }

    /// A copy of `self` flagged as a retransmission.
    pub fn retransmitted(&self) -> Self {
        Self {
            is_retransmission: true,
            ..self.clone()
        }
    }

    pub fn with_timestamp(mut self, value: u32, echo: u32) -> Self {
        self.timestamp_value = value;
        self.timestamp_echo = echo;
        self
    }

    pub fn with_forced_ack(mut self, ack: u32) -> Self {
        self.force_ack = Some(ack);
        self
    }

    /// Bytes of sequence space covered by the payload.
    pub fn span(&self) -> Result<u32> {
        span_of(self.payload.len())
    }

    /// First offset after the payload.
    pub fn end(&self) -> Result<u32> {
        Ok(self.stream_offset.wrapping_add(self.span()?))
    }
}

// ---------------------------------------------------------------------------
// Strategy
// ---------------------------------------------------------------------------

/// Closed set of planning strategies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    /// One descriptor for the whole payload.
    Whole,
    /// Consecutive chunks of `size` bytes, the last possibly shorter.
    FixedChunks(usize),
    /// `ceil(len / size)` chunks emitted in the given index order.
    Permuted(usize, Vec<usize>),
    /// Re-emit the descriptor at `duplicate_index` as a retransmission,
    /// `delay` slots later.
    WithDuplicate {
        inner: Box<Strategy>,
        duplicate_index: usize,
        delay: usize,
    },
    /// Force the descriptor at `index` to carry a timestamp older than the
    /// one emitted before it (PAWS violation).
    WithStaleAck {
        inner: Box<Strategy>,
        index: usize,
        stale_timestamp: u32,
    },
}

impl Strategy {
    pub fn with_duplicate(self, duplicate_index: usize, delay: usize) -> Self {
        Strategy::WithDuplicate {
            inner: Box::new(self),
            duplicate_index,
            delay,
        }
    }

    pub fn with_stale_ack(self, index: usize, stale_timestamp: u32) -> Self {
        Strategy::WithStaleAck {
            inner: Box::new(self),
            index,
            stale_timestamp,
        }
    }

    /// Whether any layer forces a stale timestamp.
    pub fn has_stale_timestamp(&self) -> bool {
        match self {
            Strategy::Whole | Strategy::FixedChunks(_) | Strategy::Permuted(..) => false,
            Strategy::WithDuplicate { inner, .. } => inner.has_stale_timestamp(),
            Strategy::WithStaleAck { .. } => true,
        }
    }
}

// ---------------------------------------------------------------------------
// TimestampSchedule
// ---------------------------------------------------------------------------

/// TCP timestamp values handed out in emission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampSchedule {
    /// TSval of the first emitted descriptor.
    pub start: u32,
    /// Increment between consecutive emitted descriptors.
    pub step: u32,
    /// TSval this direction sent last, before the plan begins.
    pub previous: Option<u32>,
}

impl TimestampSchedule {
    fn at(&self, position: usize) -> u32 {
        self.start
            .wrapping_add(self.step.wrapping_mul(position as u32))
    }
}

impl Default for TimestampSchedule {
    fn default() -> Self {
        Self {
            start: 100,
            step: 100,
            previous: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Layout (pass 1)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct Slot {
    chunk: usize,
    retransmission: bool,
    stale: Option<u32>,
}

impl Slot {
    fn original(chunk: usize) -> Self {
        Self {
            chunk,
            retransmission: false,
            stale: None,
        }
    }
}

#[derive(Debug, Default)]
struct Layout {
    chunks: Vec<Range<usize>>,
    slots: Vec<Slot>,
}

fn chunk_ranges(len: usize, size: usize) -> Result<Vec<Range<usize>>> {
    if size == 0 {
        return Err(SynthError::InvalidStrategy("chunk size must be positive".into()));
    }
    Ok((0..len)
        .step_by(size)
        .map(|start| start..(start + size).min(len))
        .collect())
}

fn layout(len: usize, strategy: &Strategy) -> Result<Layout> {
    match strategy {
        Strategy::Whole => {
            if len == 0 {
                return Ok(Layout::default());
            }
            Ok(Layout {
                chunks: vec![0..len],
                slots: vec![Slot::original(0)],
            })
        }
        Strategy::FixedChunks(size) => {
            let chunks = chunk_ranges(len, *size)?;
            let slots = (0..chunks.len()).map(Slot::original).collect();
            Ok(Layout { chunks, slots })
        }
        Strategy::Permuted(size, order) => {
            let chunks = chunk_ranges(len, *size)?;
            if chunks.is_empty() {
                return Ok(Layout::default());
            }
            check_permutation(order, chunks.len())?;
            let slots = order.iter().copied().map(Slot::original).collect();
            Ok(Layout { chunks, slots })
        }
        Strategy::WithDuplicate {
            inner,
            duplicate_index,
            delay,
        } => {
            let mut l = layout(len, inner)?;
            let original = *l.slots.get(*duplicate_index).ok_or(SynthError::IndexOutOfRange {
                index: *duplicate_index,
                len: l.slots.len(),
            })?;
            if *delay == 0 {
                return Err(SynthError::InvalidStrategy(
                    "a duplicate must be emitted after its original (delay >= 1)".into(),
                ));
            }
            let at = (duplicate_index + delay).min(l.slots.len());
            l.slots.insert(
                at,
                Slot {
                    chunk: original.chunk,
                    retransmission: true,
                    stale: None,
                },
            );
            Ok(l)
        }
        Strategy::WithStaleAck {
            inner,
            index,
            stale_timestamp,
        } => {
            let mut l = layout(len, inner)?;
            let n = l.slots.len();
            let slot = l
                .slots
                .get_mut(*index)
                .ok_or(SynthError::IndexOutOfRange { index: *index, len: n })?;
            slot.stale = Some(*stale_timestamp);
            Ok(l)
        }
    }
}

fn check_permutation(order: &[usize], n: usize) -> Result<()> {
    if order.len() != n {
        return Err(SynthError::InvalidStrategy(format!(
            "permutation has {} entries for {n} chunk(s)",
            order.len()
        )));
    }
    let mut seen = vec![false; n];
    for &idx in order {
        match seen.get_mut(idx) {
            Some(s) if !*s => *s = true,
            Some(_) => {
                return Err(SynthError::InvalidStrategy(format!(
                    "chunk {idx} appears twice in permutation"
                )))
            }
            None => {
                return Err(SynthError::InvalidStrategy(format!(
                    "chunk {idx} does not exist (only {n})"
                )))
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// SegmentPlanner (pass 2)
// ---------------------------------------------------------------------------

/// Plans payloads anchored at a fixed offset in one direction's stream.
#[derive(Debug, Clone, Copy)]
pub struct SegmentPlanner {
    origin: u32,
    schedule: TimestampSchedule,
}

impl SegmentPlanner {
    /// `origin` is the stream offset of the payload's first byte.
    pub fn new(origin: u32) -> Self {
        Self {
            origin,
            schedule: TimestampSchedule::default(),
        }
    }

    pub fn with_schedule(mut self, schedule: TimestampSchedule) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn origin(&self) -> u32 {
        self.origin
    }

    /// Produce descriptors in emission order.
    pub fn plan(&self, payload: &[u8], strategy: &Strategy) -> Result<Vec<SegmentDescriptor>> {
        let layout = layout(payload.len(), strategy)?;
        let mut previous = self.schedule.previous;
        let mut out = Vec::with_capacity(layout.slots.len());

        for (position, slot) in layout.slots.iter().enumerate() {
            let scheduled = self.schedule.at(position);
            let timestamp_value = match slot.stale {
                Some(stale) => {
                    let reference = previous.unwrap_or(scheduled);
                    if stale >= reference {
                        return Err(SynthError::InvalidStrategy(format!(
                            "stale timestamp {stale} at position {position} is not older than {reference}"
                        )));
                    }
                    stale
                }
                None => scheduled,
            };
            previous = Some(timestamp_value);

            let range = layout.chunks[slot.chunk].clone();
            let stream_offset = self.origin.wrapping_add(span_of(range.start)?);
            let mut descriptor = SegmentDescriptor::new(stream_offset, payload[range].to_vec());
            descriptor.is_retransmission = slot.retransmission;
            descriptor.timestamp_value = timestamp_value;
            out.push(descriptor);
        }
        Ok(out)
    }
}

/// Rebuild the stream from a plan by true offset, ignoring emission order and
/// every retransmitted or overlapping copy.
pub fn reassemble(origin: u32, descriptors: &[SegmentDescriptor]) -> Vec<u8> {
    let mut originals: Vec<&SegmentDescriptor> = descriptors
        .iter()
        .filter(|d| !d.is_retransmission && !d.is_overlap)
        .collect();
    originals.sort_by_key(|d| d.stream_offset.wrapping_sub(origin));
    originals
        .into_iter()
        .flat_map(|d| d.payload.iter().copied())
        .collect()
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn spans(plan: &[SegmentDescriptor]) -> Vec<(u32, usize)> {
        plan.iter().map(|d| (d.stream_offset, d.payload.len())).collect()
    }

    #[test]
    fn whole_is_one_descriptor() {
        let data = b"GET / HTTP/1.1\r\n\r\n";
        let plan = SegmentPlanner::new(1).plan(data, &Strategy::Whole).unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].stream_offset, 1);
        assert_eq!(plan[0].payload, data);
        assert!(!plan[0].is_retransmission);
    }

    #[test]
    fn fixed_chunks_reconstruct_payload() {
        for (len, size) in [(1000, 200), (1001, 200), (7, 3), (5, 1460), (1460, 1460)] {
            let data = payload(len);
            let plan = SegmentPlanner::new(0)
                .plan(&data, &Strategy::FixedChunks(size))
                .unwrap();
            assert_eq!(plan.len(), len.div_ceil(size));
            assert!(plan.iter().all(|d| d.payload.len() <= size));
            assert_eq!(reassemble(0, &plan), data, "len={len} size={size}");
        }
    }

    #[test]
    fn permuted_has_same_spans_as_fixed_chunks() {
        let data = payload(1000);
        let planner = SegmentPlanner::new(70);
        let fixed = planner.plan(&data, &Strategy::FixedChunks(200)).unwrap();
        let permuted = planner
            .plan(&data, &Strategy::Permuted(200, vec![2, 0, 3, 1, 4]))
            .unwrap();

        let mut a = spans(&fixed);
        let mut b = spans(&permuted);
        assert_ne!(a, b, "emission order should differ");
        a.sort();
        b.sort();
        assert_eq!(a, b);
        assert_eq!(permuted[0].stream_offset, 70 + 400);
        assert_eq!(reassemble(70, &permuted), data);
    }

    #[test]
    fn timestamps_follow_emission_order() {
        let schedule = TimestampSchedule {
            start: 1000,
            step: 200,
            previous: Some(900),
        };
        let plan = SegmentPlanner::new(0)
            .with_schedule(schedule)
            .plan(&payload(600), &Strategy::Permuted(200, vec![1, 2, 0]))
            .unwrap();
        let ts: Vec<u32> = plan.iter().map(|d| d.timestamp_value).collect();
        assert_eq!(ts, vec![1000, 1200, 1400]);
    }

    #[test]
    fn zero_chunk_size_is_invalid() {
        let planner = SegmentPlanner::new(0);
        for strategy in [Strategy::FixedChunks(0), Strategy::Permuted(0, vec![])] {
            assert!(matches!(
                planner.plan(b"abc", &strategy),
                Err(SynthError::InvalidStrategy(_))
            ));
        }
    }

    #[test]
    fn malformed_permutations_are_invalid() {
        let planner = SegmentPlanner::new(0);
        let data = payload(600);
        for order in [vec![0, 1], vec![0, 0, 1], vec![0, 1, 3], vec![0, 1, 2, 3]] {
            assert!(
                matches!(
                    planner.plan(&data, &Strategy::Permuted(200, order.clone())),
                    Err(SynthError::InvalidStrategy(_))
                ),
                "order {order:?}"
            );
        }
    }

    #[test]
    fn empty_payload_yields_nothing() {
        let planner = SegmentPlanner::new(0);
        for strategy in [
            Strategy::Whole,
            Strategy::FixedChunks(10),
            Strategy::Permuted(10, vec![3, 1]),
        ] {
            assert!(planner.plan(b"", &strategy).unwrap().is_empty());
        }
    }

    #[test]
    fn duplicate_is_inserted_delay_slots_later() {
        let plan = SegmentPlanner::new(0)
            .plan(&payload(800), &Strategy::FixedChunks(200).with_duplicate(1, 2))
            .unwrap();
        assert_eq!(plan.len(), 5);
        assert!(plan[3].is_retransmission);
        assert_eq!(plan[3].stream_offset, plan[1].stream_offset);
        assert_eq!(plan[3].payload, plan[1].payload);
        assert_eq!(plan.iter().filter(|d| d.is_retransmission).count(), 1);
    }

    #[test]
    fn duplicate_delay_past_end_is_clamped() {
        let plan = SegmentPlanner::new(0)
            .plan(&payload(400), &Strategy::FixedChunks(200).with_duplicate(0, 10))
            .unwrap();
        assert_eq!(plan.len(), 3);
        assert!(plan[2].is_retransmission);
        assert_eq!(plan[2].stream_offset, 0);
    }

    #[test]
    fn duplicate_needs_positive_delay() {
        assert!(matches!(
            SegmentPlanner::new(0).plan(b"abc", &Strategy::Whole.with_duplicate(0, 0)),
            Err(SynthError::InvalidStrategy(_))
        ));
    }

    #[test]
    fn fault_indices_out_of_range() {
        let planner = SegmentPlanner::new(0);
        assert_eq!(
            planner.plan(b"abc", &Strategy::Whole.with_duplicate(1, 1)),
            Err(SynthError::IndexOutOfRange { index: 1, len: 1 })
        );
        assert_eq!(
            planner.plan(b"", &Strategy::Whole.with_stale_ack(0, 1)),
            Err(SynthError::IndexOutOfRange { index: 0, len: 0 })
        );
    }

    #[test]
    fn stale_timestamp_goes_backwards() {
        let schedule = TimestampSchedule {
            start: 400,
            step: 100,
            previous: Some(300),
        };
        let plan = SegmentPlanner::new(0)
            .with_schedule(schedule)
            .plan(&payload(600), &Strategy::FixedChunks(200).with_stale_ack(2, 350))
            .unwrap();
        assert_eq!(plan[1].timestamp_value, 500);
        assert_eq!(plan[2].timestamp_value, 350);
        assert!(plan[2].timestamp_value < plan[1].timestamp_value);
    }

    #[test]
    fn stale_timestamp_at_first_position_compares_with_previous() {
        let schedule = TimestampSchedule {
            start: 800,
            step: 100,
            previous: Some(700),
        };
        let planner = SegmentPlanner::new(0).with_schedule(schedule);
        let plan = planner
            .plan(b"late", &Strategy::Whole.with_stale_ack(0, 350))
            .unwrap();
        assert_eq!(plan[0].timestamp_value, 350);

        // Not older than what was sent before: refuse rather than fix.
        assert!(matches!(
            planner.plan(b"late", &Strategy::Whole.with_stale_ack(0, 700)),
            Err(SynthError::InvalidStrategy(_))
        ));
    }

    #[test]
    fn stale_timestamp_must_be_numerically_smaller() {
        let planner = SegmentPlanner::new(0).with_schedule(TimestampSchedule {
            start: 200,
            step: 100,
            previous: Some(100),
        });
        // Older in modular order, but larger as a number.
        assert!(matches!(
            planner.plan(b"late", &Strategy::Whole.with_stale_ack(0, u32::MAX - 5)),
            Err(SynthError::InvalidStrategy(_))
        ));
        assert_eq!(
            planner.plan(b"late", &Strategy::Whole.with_stale_ack(0, 99)).unwrap()[0].timestamp_value,
            99
        );
    }

    #[test]
    fn stale_timestamp_is_found_through_wrappers() {
        assert!(!Strategy::FixedChunks(10).with_duplicate(0, 1).has_stale_timestamp());
        assert!(Strategy::Whole.with_stale_ack(0, 1).has_stale_timestamp());
        assert!(Strategy::Whole
            .with_stale_ack(0, 1)
            .with_duplicate(0, 1)
            .has_stale_timestamp());
    }

    #[test]
    fn stale_and_duplicate_compose() {
        let schedule = TimestampSchedule {
            start: 1000,
            step: 100,
            previous: Some(900),
        };
        let plan = SegmentPlanner::new(0)
            .with_schedule(schedule)
            .plan(
                &payload(400),
                &Strategy::FixedChunks(200)
                    .with_stale_ack(1, 50)
                    .with_duplicate(1, 1),
            )
            .unwrap();
        assert_eq!(plan.len(), 3);
        assert_eq!(plan[1].timestamp_value, 50);
        // The retransmitted copy gets its own scheduled timestamp.
        assert!(plan[2].is_retransmission);
        assert_eq!(plan[2].timestamp_value, 1200);
    }
}
