//! Rendering segment descriptors into framed records.
//!
//! [`FrameBuilder::build`] is the only place where a [`SegmentDescriptor`]
//! meets the [`ConnectionState`]: it resolves addresses from the direction,
//! labels the segment with `peek(stream_offset)`, stamps the acknowledgment
//! number, chooses TCP options for the connection phase, and then tells the
//! connection what went on the wire.
//!
//! The resulting [`Record`] is immutable.

use std::fmt;

use crate::connection::ConnectionState;
use crate::endpoint::Direction;
use crate::error::{Result, SynthError};
use crate::packet::{
    flags, EthernetHeader, Frame, Ipv4Header, TcpHeader, TcpOption, ETHERTYPE_IPV4,
    MAX_PAYLOAD_LEN,
};
use crate::planner::SegmentDescriptor;
use crate::sequence::seq_le;

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// What a record was meant to be, kept alongside the bytes so callers can
/// assert on intent without re-deriving it from headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Annotation {
    pub direction: Direction,
    pub stream_offset: u32,
    pub is_retransmission: bool,
    pub is_overlap: bool,
}

/// A fully built frame ready for a capture sink.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    timestamp: f64,
    frame: Frame,
    bytes: Vec<u8>,
    annotation: Annotation,
}

impl Record {
    /// Capture timestamp in seconds.
    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    pub fn link(&self) -> &EthernetHeader {
        &self.frame.ethernet
    }

    pub fn network(&self) -> &Ipv4Header {
        &self.frame.ipv4
    }

    pub fn transport(&self) -> &TcpHeader {
        &self.frame.tcp
    }

    pub fn payload(&self) -> &[u8] {
        &self.frame.payload
    }

    /// The complete encoded frame.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn annotation(&self) -> &Annotation {
        &self.annotation
    }

    pub fn direction(&self) -> Direction {
        self.annotation.direction
    }

    pub fn seq(&self) -> u32 {
        self.frame.tcp.seq
    }

    pub fn ack(&self) -> u32 {
        self.frame.tcp.ack
    }

    pub fn flags(&self) -> u8 {
        self.frame.tcp.flags
    }

    pub fn is_retransmission(&self) -> bool {
        self.annotation.is_retransmission
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tcp = &self.frame.tcp;
        write!(
            f,
            "{:>10.6} {} {:<2} seq={} ack={} len={}",
            self.timestamp,
            self.annotation.direction,
            flags::describe(tcp.flags),
            tcp.seq,
            tcp.ack,
            self.frame.payload.len()
        )?;
        if let Some((value, echo)) = tcp.timestamp() {
            write!(f, " ts={value}/{echo}")?;
        }
        if self.annotation.is_retransmission {
            write!(f, " [retransmission]")?;
        }
        if self.annotation.is_overlap {
            write!(f, " [overlap]")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FrameBuilder
// ---------------------------------------------------------------------------

/// Which TCP options the synthesized stacks emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OptionProfile {
    /// MSS, NOP, NOP, Timestamp, WScale on SYNs; NOP, NOP, Timestamp after.
    #[default]
    Full,
    /// No options at all.
    Bare,
}

impl OptionProfile {
    pub fn uses_timestamps(self) -> bool {
        matches!(self, Self::Full)
    }
}

/// Fixed per-trace framing parameters.
#[derive(Debug, Clone)]
pub struct FrameBuilder {
    pub profile: OptionProfile,
    pub mss: u16,
    pub window_scale: u8,
    pub window: u16,
    pub ttl: u8,
}

impl Default for FrameBuilder {
    fn default() -> Self {
        Self {
            profile: OptionProfile::Full,
            mss: 1460,
            window_scale: 7,
            window: 8192,
            ttl: 64,
        }
    }
}

impl FrameBuilder {
    pub fn new(profile: OptionProfile) -> Self {
        Self {
            profile,
            ..Self::default()
        }
    }

    fn options(&self, tcp_flags: u8, descriptor: &SegmentDescriptor) -> Vec<TcpOption> {
        if self.profile == OptionProfile::Bare {
            return Vec::new();
        }
        let timestamp = TcpOption::Timestamp {
            value: descriptor.timestamp_value,
            echo: descriptor.timestamp_echo,
        };
        if tcp_flags & flags::SYN != 0 {
            vec![
                TcpOption::Mss(self.mss),
                TcpOption::Nop,
                TcpOption::Nop,
                timestamp,
                TcpOption::WindowScale(self.window_scale),
            ]
        } else {
            vec![TcpOption::Nop, TcpOption::Nop, timestamp]
        }
    }

    /// Frame one descriptor sent in `direction` at capture time `at`.
    ///
    /// Side effects on `connection`: SYN/FIN consume a sequence number, data
    /// bytes beyond the high-water mark are accounted (a retransmission of
    /// bytes already accounted is not observed again), and the stamped ACK
    /// and TSval are remembered.
    pub fn build(
        &self,
        connection: &mut ConnectionState,
        direction: Direction,
        descriptor: &SegmentDescriptor,
        tcp_flags: u8,
        at: f64,
    ) -> Result<Record> {
        connection.lifecycle().ensure_open()?;
        let endpoints = *connection.endpoints()?;
        endpoints.validate()?;
        let (src, dst) = endpoints.resolve(direction);
        if descriptor.payload.len() > MAX_PAYLOAD_LEN {
            return Err(SynthError::Overflow(descriptor.payload.len() as u64));
        }

        let seq = connection.sequence(direction).peek(descriptor.stream_offset);
        let ack = match descriptor.force_ack {
            Some(forced) => forced,
            None if tcp_flags & flags::ACK != 0 => connection.ack_for(direction),
            None => 0,
        };

        let frame = Frame {
            ethernet: EthernetHeader {
                dst: dst.mac,
                src: src.mac,
                ethertype: ETHERTYPE_IPV4,
            },
            ipv4: Ipv4Header {
                src: src.ip(),
                dst: dst.ip(),
                identification: connection.next_ip_id(direction),
                ttl: self.ttl,
                total_len: 0,
                checksum: 0,
            },
            tcp: TcpHeader {
                src_port: src.port(),
                dst_port: dst.port(),
                seq,
                ack,
                flags: tcp_flags,
                window: self.window,
                options: self.options(tcp_flags, descriptor),
                checksum: 0,
            },
            payload: descriptor.payload.clone(),
        };
        let (frame, bytes) = frame.seal();

        if !descriptor.payload.is_empty() {
            let already_accounted =
                seq_le(descriptor.end()?, connection.next_offset(direction));
            if !(descriptor.is_retransmission && already_accounted) {
                connection.observe_sent(direction, descriptor)?;
            }
        }
        if tcp_flags & (flags::SYN | flags::FIN) != 0 {
            connection.observe_control(direction)?;
        }
        if tcp_flags & flags::ACK != 0 {
            connection.record_ack(direction, ack);
        }
        if self.profile.uses_timestamps() {
            connection.observe_timestamp(direction, descriptor.timestamp_value);
        }

        Ok(Record {
            timestamp: at,
            frame,
            bytes,
            annotation: Annotation {
                direction,
                stream_offset: descriptor.stream_offset,
                is_retransmission: descriptor.is_retransmission,
                is_overlap: descriptor.is_overlap,
            },
        })
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::Endpoint;
    use crate::packet::Frame;

    const C: Direction = Direction::ClientToServer;
    const S: Direction = Direction::ServerToClient;

    fn open(client_isn: u32, server_isn: u32) -> ConnectionState {
        let mut conn = ConnectionState::new();
        conn.open(
            "192.168.1.100:49152".parse::<Endpoint>().unwrap(),
            "10.1.1.100:80".parse::<Endpoint>().unwrap(),
            client_isn,
            server_isn,
        )
        .unwrap();
        conn
    }

    #[test]
    fn syn_carries_handshake_options_and_no_ack() {
        let mut conn = open(1_000, 2_000);
        let syn = SegmentDescriptor::control(0).with_timestamp(100, 0);
        let rec = FrameBuilder::default()
            .build(&mut conn, C, &syn, flags::SYN, 0.0)
            .unwrap();

        assert_eq!(rec.seq(), 1_000);
        assert_eq!(rec.ack(), 0);
        assert_eq!(rec.transport().options.len(), 5);
        assert_eq!(rec.transport().options[0], TcpOption::Mss(1460));
        assert_eq!(rec.transport().timestamp(), Some((100, 0)));
        assert_eq!(conn.next_offset(C), 1);
    }

    #[test]
    fn data_segment_stamps_peer_ack_and_steady_state_options() {
        let mut conn = open(1_000, 2_000);
        conn.observe_control(C).unwrap();
        conn.observe_control(S).unwrap();

        let data = SegmentDescriptor::new(1, b"hello".to_vec()).with_timestamp(400, 200);
        let rec = FrameBuilder::default()
            .build(&mut conn, C, &data, flags::PSH | flags::ACK, 3.0)
            .unwrap();

        assert_eq!(rec.seq(), 1_001);
        assert_eq!(rec.ack(), 2_001);
        assert_eq!(
            rec.transport().options,
            vec![
                TcpOption::Nop,
                TcpOption::Nop,
                TcpOption::Timestamp { value: 400, echo: 200 }
            ]
        );
        assert_eq!(rec.payload(), b"hello");
        assert_eq!(rec.timestamp(), 3.0);
        assert_eq!(conn.ack_for(S), 1_006);
        assert_eq!(conn.acked_through(C), 2_001);
        assert_eq!(conn.timestamp_echo(S), 400);
    }

    #[test]
    fn record_bytes_decode_with_valid_checksums() {
        let mut conn = open(7, 9);
        let data = SegmentDescriptor::new(0, b"odd".to_vec());
        let rec = FrameBuilder::default()
            .build(&mut conn, S, &data, flags::ACK, 0.0)
            .unwrap();
        let decoded = Frame::decode(rec.bytes()).unwrap();
        assert_eq!(decoded.tcp.checksum, rec.transport().checksum);
        assert_eq!(decoded.ipv4.total_len, rec.network().total_len);
        assert_eq!(decoded.ipv4.src, rec.network().src);
        assert_eq!(decoded.payload, b"odd");
    }

    #[test]
    fn forced_ack_overrides_computed_value() {
        let mut conn = open(0, 0);
        let d = SegmentDescriptor::control(0).with_forced_ack(42);
        let rec = FrameBuilder::default()
            .build(&mut conn, C, &d, flags::ACK, 0.0)
            .unwrap();
        assert_eq!(rec.ack(), 42);
    }

    #[test]
    fn accounted_retransmission_is_not_observed_again() {
        let mut conn = open(0, 0);
        let original = SegmentDescriptor::new(0, vec![1; 100]);
        let builder = FrameBuilder::default();
        builder.build(&mut conn, C, &original, flags::ACK, 0.0).unwrap();
        let rec = builder
            .build(&mut conn, C, &original.retransmitted(), flags::ACK, 1.0)
            .unwrap();
        assert!(rec.is_retransmission());
        assert_eq!(rec.seq(), 0);
        assert_eq!(conn.received(S), 100);
    }

    #[test]
    fn bare_profile_emits_no_options() {
        let mut conn = open(0, 0);
        let syn = SegmentDescriptor::control(0);
        let rec = FrameBuilder::new(OptionProfile::Bare)
            .build(&mut conn, C, &syn, flags::SYN, 0.0)
            .unwrap();
        assert!(rec.transport().options.is_empty());
        assert_eq!(rec.bytes().len(), 14 + 20 + 20);
    }

    #[test]
    fn unopened_connection_cannot_frame() {
        let mut conn = ConnectionState::new();
        let d = SegmentDescriptor::control(0);
        assert_eq!(
            FrameBuilder::default().build(&mut conn, C, &d, flags::SYN, 0.0),
            Err(SynthError::NotOpen)
        );
    }

    #[test]
    fn display_summarises_the_record() {
        let mut conn = open(1_000, 2_000);
        let d = SegmentDescriptor::new(0, b"x".to_vec()).with_timestamp(5, 6);
        let rec = FrameBuilder::default()
            .build(&mut conn, C, &d.retransmitted(), flags::PSH | flags::ACK, 1.5)
            .unwrap();
        let line = rec.to_string();
        assert!(line.contains("PA"), "{line}");
        assert!(line.contains("seq=1000"), "{line}");
        assert!(line.contains("ts=5/6"), "{line}");
        assert!(line.contains("[retransmission]"), "{line}");
    }
}
