//! Per-direction sequence-number space.
//!
//! A [`SequenceSpace`] answers two questions for one side of a connection:
//! "what sequence number labels stream offset N?" ([`SequenceSpace::peek`])
//! and "how far has this side's stream been consumed?"
//! ([`SequenceSpace::position`]).  Offsets are measured from the ISN, so the
//! SYN occupies offset 0 and the first data byte of a handshaken connection
//! sits at offset 1.
//!
//! Wraparound is silent and intentional.  Every comparison between offsets or
//! sequence numbers is done modulo 2^32 using the half-window convention:
//! two values are ordered correctly as long as they are less than
//! `u32::MAX / 2` apart.

use crate::error::{Result, SynthError};

/// Largest advance accepted in one call: the size of the whole space.
const MAX_ADVANCE: u64 = 1 << 32;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Returns `true` when `a` is ≤ `b` in wrap-around space.
#[inline]
pub fn seq_le(a: u32, b: u32) -> bool {
    b.wrapping_sub(a) <= (u32::MAX / 2)
}

/// Returns `true` when `a` is strictly before `b` in wrap-around space.
#[inline]
pub fn seq_lt(a: u32, b: u32) -> bool {
    a != b && seq_le(a, b)
}

/// Convert a payload length into a 32-bit sequence span.
pub fn span_of(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| SynthError::Overflow(len as u64))
}

// ---------------------------------------------------------------------------
// SequenceSpace
// ---------------------------------------------------------------------------

/// Monotonic cursor over one direction's 32-bit sequence space.
///
/// ```text
///  start (ISN)              start + advanced
///      │                          │
///  ────┼──────────────────────────┼──────────────▶ seq space (mod 2^32)
///      │ <──── consumed ─────────▶│ <── unused ──▶
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceSpace {
    start: u32,
    /// Total sequence space consumed.  Only ever increases.
    advanced: u64,
}

impl SequenceSpace {
    pub fn new(start: u32) -> Self {
        Self { start, advanced: 0 }
    }

    /// The initial sequence number this space was seeded with.
    pub fn start(&self) -> u32 {
        self.start
    }

    /// Total bytes of sequence space consumed so far (not reduced mod 2^32).
    pub fn advanced(&self) -> u64 {
        self.advanced
    }

    /// Move forward `by` bytes and return the new absolute sequence number.
    ///
    /// Fails with [`SynthError::Overflow`] when a single call asks for more
    /// than the entire 2^32 space.
    pub fn advance(&mut self, by: u64) -> Result<u32> {
        if by > MAX_ADVANCE {
            return Err(SynthError::Overflow(by));
        }
        self.advanced = self
            .advanced
            .checked_add(by)
            .ok_or(SynthError::Overflow(by))?;
        Ok(self.next())
    }

    /// Sequence number labelling stream offset `offset`, without moving the
    /// cursor.
    pub fn peek(&self, offset: u32) -> u32 {
        self.start.wrapping_add(offset)
    }

    /// Offset of the first unused byte, reduced modulo 2^32.
    pub fn position(&self) -> u32 {
        self.advanced as u32
    }

    /// Absolute sequence number of the first unused byte.
    pub fn next(&self) -> u32 {
        self.peek(self.position())
    }

    /// Advance so that everything before `end` counts as consumed.
    ///
    /// Offsets at or behind the current position are a no-op, which is what
    /// keeps retransmissions and overlaps from being counted twice.  Returns
    /// the number of bytes newly consumed.
    pub fn advance_to(&mut self, end: u32) -> Result<u64> {
        let here = self.position();
        if !seq_lt(here, end) {
            return Ok(0);
        }
        let by = u64::from(end.wrapping_sub(here));
        self.advance(by)?;
        Ok(by)
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
