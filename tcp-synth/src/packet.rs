//! Wire format for synthesized frames: Ethernet II / IPv4 / TCP.
//!
//! This module is responsible for:
//! - Defining the header fields the synthesizer controls.
//! - Serialising a [`Frame`] into bytes with correct length fields and
//!   checksums (IPv4 header checksum, TCP checksum over the pseudo-header).
//! - Parsing bytes back into a [`Frame`] and verifying both checksums, so
//!   tests can check what actually lands in a capture.
//!
//! No I/O happens here: this is pure data transformation.
//!
//! # Layout
//!
//! All multi-byte integers are **big-endian**.
//!
//! ```text
//!  +----------------+---------------------+--------------------------+---------+
//!  | Ethernet (14)  | IPv4 (20, no opts)  | TCP (20 + options, ≤ 60) | payload |
//!  +----------------+---------------------+--------------------------+---------+
//! ```

use std::net::Ipv4Addr;

use thiserror::Error;

/// Bit-flag constants for the TCP flags byte.
pub mod flags {
    pub const FIN: u8 = 0x01;
    pub const SYN: u8 = 0x02;
    pub const RST: u8 = 0x04;
    pub const PSH: u8 = 0x08;
    pub const ACK: u8 = 0x10;
    pub const URG: u8 = 0x20;

    /// Render flags the way packet tools print them (`S`, `SA`, `PA`, `FA`).
    pub fn describe(bits: u8) -> String {
        [
            (FIN, 'F'),
            (SYN, 'S'),
            (RST, 'R'),
            (PSH, 'P'),
            (ACK, 'A'),
            (URG, 'U'),
        ]
        .iter()
        .filter(|(bit, _)| bits & bit != 0)
        .map(|(_, c)| *c)
        .collect()
    }
}

pub const ETHERNET_HEADER_LEN: usize = 14;
pub const IPV4_HEADER_LEN: usize = 20;
pub const TCP_HEADER_LEN: usize = 20;
/// Largest option block a TCP header can carry.
pub const MAX_TCP_OPTIONS_LEN: usize = 40;
/// Largest payload that still fits the IPv4 total-length field.
pub const MAX_PAYLOAD_LEN: usize =
    u16::MAX as usize - IPV4_HEADER_LEN - TCP_HEADER_LEN - MAX_TCP_OPTIONS_LEN;

pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const IPPROTO_TCP: u8 = 6;

// Option kinds (RFC 793, RFC 7323).
const OPT_EOL: u8 = 0;
const OPT_NOP: u8 = 1;
const OPT_MSS: u8 = 2;
const OPT_WSCALE: u8 = 3;
const OPT_TIMESTAMP: u8 = 8;

// ---------------------------------------------------------------------------
// Headers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EthernetHeader {
    pub dst: [u8; 6],
    pub src: [u8; 6],
    pub ethertype: u16,
}

/// IPv4 header without options.  `total_len` and `checksum` are computed by
/// [`Frame::encode`] and filled in by [`Frame::decode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ipv4Header {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub identification: u16,
    pub ttl: u8,
    pub total_len: u16,
    pub checksum: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TcpOption {
    EndOfList,
    Nop,
    Mss(u16),
    WindowScale(u8),
    Timestamp { value: u32, echo: u32 },
    Unknown { kind: u8, data: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub seq: u32,
    pub ack: u32,
    /// Bitmask of [`flags`] constants.
    pub flags: u8,
    pub window: u16,
    /// Options in wire order; padding to a 32-bit boundary is added on encode.
    pub options: Vec<TcpOption>,
    pub checksum: u16,
}

impl TcpHeader {
    /// The (TSval, TSecr) pair, if the header carries a timestamp option.
    pub fn timestamp(&self) -> Option<(u32, u32)> {
        self.options.iter().find_map(|o| match o {
            TcpOption::Timestamp { value, echo } => Some((*value, *echo)),
            _ => None,
        })
    }

    pub fn has(&self, flag: u8) -> bool {
        self.flags & flag == flag
    }
}

// ---------------------------------------------------------------------------
// Frame
// ---------------------------------------------------------------------------

/// A complete Ethernet/IPv4/TCP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub ethernet: EthernetHeader,
    pub ipv4: Ipv4Header,
    pub tcp: TcpHeader,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Serialise into a newly allocated buffer.
    ///
    /// Length fields and both checksums are computed here; whatever is stored
    /// in `total_len` and the `checksum` fields is ignored.  The caller must
    /// keep the payload within [`MAX_PAYLOAD_LEN`].
    pub fn encode(&self) -> Vec<u8> {
        let options = encode_options(&self.tcp.options);
        let tcp_len = TCP_HEADER_LEN + options.len();
        let ip_total = IPV4_HEADER_LEN + tcp_len + self.payload.len();
        let mut buf = Vec::with_capacity(ETHERNET_HEADER_LEN + ip_total);

        // Ethernet II
        buf.extend_from_slice(&self.ethernet.dst);
        buf.extend_from_slice(&self.ethernet.src);
        buf.extend_from_slice(&self.ethernet.ethertype.to_be_bytes());

        // IPv4
        let ip_start = buf.len();
        buf.push(0x45); // version 4, IHL 5
        buf.push(0); // DSCP/ECN
        buf.extend_from_slice(&(ip_total as u16).to_be_bytes());
        buf.extend_from_slice(&self.ipv4.identification.to_be_bytes());
        buf.extend_from_slice(&0u16.to_be_bytes()); // flags + fragment offset
        buf.push(self.ipv4.ttl);
        buf.push(IPPROTO_TCP);
        buf.extend_from_slice(&0u16.to_be_bytes()); // checksum placeholder
        buf.extend_from_slice(&self.ipv4.src.octets());
        buf.extend_from_slice(&self.ipv4.dst.octets());
        let ip_csum = internet_checksum(&buf[ip_start..]);
        buf[ip_start + 10..ip_start + 12].copy_from_slice(&ip_csum.to_be_bytes());

        // TCP
        let tcp_start = buf.len();
        buf.extend_from_slice(&self.tcp.src_port.to_be_bytes());
        buf.extend_from_slice(&self.tcp.dst_port.to_be_bytes());
        buf.extend_from_slice(&self.tcp.seq.to_be_bytes());
        buf.extend_from_slice(&self.tcp.ack.to_be_bytes());
        buf.push(((tcp_len / 4) as u8) << 4);
        buf.push(self.tcp.flags);
        buf.extend_from_slice(&self.tcp.window.to_be_bytes());
        buf.extend_from_slice(&0u16.to_be_bytes()); // checksum placeholder
        buf.extend_from_slice(&0u16.to_be_bytes()); // urgent pointer
        buf.extend_from_slice(&options);
        buf.extend_from_slice(&self.payload);
        let tcp_csum = tcp_checksum(self.ipv4.src, self.ipv4.dst, &buf[tcp_start..]);
        buf[tcp_start + 16..tcp_start + 18].copy_from_slice(&tcp_csum.to_be_bytes());

        buf
    }

    /// Encode, then copy the computed length and checksum fields back into
    /// the headers so the struct describes exactly the bytes returned.
    pub fn seal(mut self) -> (Self, Vec<u8>) {
        let bytes = self.encode();
        let ip = &bytes[ETHERNET_HEADER_LEN..];
        self.ipv4.total_len = be16(ip, 2);
        self.ipv4.checksum = be16(ip, 10);
        self.tcp.checksum = be16(&ip[IPV4_HEADER_LEN..], 16);
        (self, bytes)
    }

    /// Parse a frame, verifying lengths and both checksums.
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < ETHERNET_HEADER_LEN + IPV4_HEADER_LEN + TCP_HEADER_LEN {
            return Err(PacketError::BufferTooShort);
        }
        let ethernet = EthernetHeader {
            dst: mac_at(buf, 0),
            src: mac_at(buf, 6),
            ethertype: be16(buf, 12),
        };
        if ethernet.ethertype != ETHERTYPE_IPV4 {
            return Err(PacketError::UnsupportedEtherType(ethernet.ethertype));
        }

        let ip = &buf[ETHERNET_HEADER_LEN..];
        if ip[0] != 0x45 {
            return Err(PacketError::UnsupportedIpHeader(ip[0]));
        }
        if ip[9] != IPPROTO_TCP {
            return Err(PacketError::UnsupportedProtocol(ip[9]));
        }
        let total_len = be16(ip, 2);
        if usize::from(total_len) != ip.len() {
            return Err(PacketError::LengthMismatch);
        }
        if internet_checksum(&ip[..IPV4_HEADER_LEN]) != 0 {
            return Err(PacketError::ChecksumFailed("ipv4"));
        }
        let ipv4 = Ipv4Header {
            src: Ipv4Addr::new(ip[12], ip[13], ip[14], ip[15]),
            dst: Ipv4Addr::new(ip[16], ip[17], ip[18], ip[19]),
            identification: be16(ip, 4),
            ttl: ip[8],
            total_len,
            checksum: be16(ip, 10),
        };

        let seg = &ip[IPV4_HEADER_LEN..];
        let data_offset = usize::from(seg[12] >> 4) * 4;
        if data_offset < TCP_HEADER_LEN || data_offset > seg.len() {
            return Err(PacketError::LengthMismatch);
        }
        if tcp_checksum(ipv4.src, ipv4.dst, seg) != 0 {
            return Err(PacketError::ChecksumFailed("tcp"));
        }
        let tcp = TcpHeader {
            src_port: be16(seg, 0),
            dst_port: be16(seg, 2),
            seq: be32(seg, 4),
            ack: be32(seg, 8),
            flags: seg[13],
            window: be16(seg, 14),
            options: decode_options(&seg[TCP_HEADER_LEN..data_offset])?,
            checksum: be16(seg, 16),
        };

        Ok(Frame {
            ethernet,
            ipv4,
            tcp,
            payload: seg[data_offset..].to_vec(),
        })
    }
}

fn mac_at(buf: &[u8], at: usize) -> [u8; 6] {
    let mut mac = [0u8; 6];
    mac.copy_from_slice(&buf[at..at + 6]);
    mac
}

fn be16(buf: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([buf[at], buf[at + 1]])
}

fn be32(buf: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Encode options and pad with EOL bytes to a 32-bit boundary.
fn encode_options(options: &[TcpOption]) -> Vec<u8> {
    let mut out = Vec::new();
    for option in options {
        match option {
            TcpOption::EndOfList => out.push(OPT_EOL),
            TcpOption::Nop => out.push(OPT_NOP),
            TcpOption::Mss(mss) => {
                out.extend_from_slice(&[OPT_MSS, 4]);
                out.extend_from_slice(&mss.to_be_bytes());
            }
            TcpOption::WindowScale(shift) => out.extend_from_slice(&[OPT_WSCALE, 3, *shift]),
            TcpOption::Timestamp { value, echo } => {
                out.extend_from_slice(&[OPT_TIMESTAMP, 10]);
                out.extend_from_slice(&value.to_be_bytes());
                out.extend_from_slice(&echo.to_be_bytes());
            }
            TcpOption::Unknown { kind, data } => {
                out.push(*kind);
                out.push((data.len() + 2) as u8);
                out.extend_from_slice(data);
            }
        }
    }
    while out.len() % 4 != 0 {
        out.push(OPT_EOL);
    }
    out
}

/// Decode an option block.  Everything after an EOL is padding.
fn decode_options(mut buf: &[u8]) -> Result<Vec<TcpOption>, PacketError> {
    let mut options = Vec::new();
    while let Some(&kind) = buf.first() {
        match kind {
            OPT_EOL => break,
            OPT_NOP => {
                options.push(TcpOption::Nop);
                buf = &buf[1..];
                continue;
            }
            _ => {}
        }
        let len = usize::from(*buf.get(1).ok_or(PacketError::BadOption(kind))?);
        if len < 2 || len > buf.len() {
            return Err(PacketError::BadOption(kind));
        }
        let body = &buf[2..len];
        let option = match (kind, body.len()) {
            (OPT_MSS, 2) => TcpOption::Mss(be16(body, 0)),
            (OPT_WSCALE, 1) => TcpOption::WindowScale(body[0]),
            (OPT_TIMESTAMP, 8) => TcpOption::Timestamp {
                value: be32(body, 0),
                echo: be32(body, 4),
            },
            (OPT_MSS | OPT_WSCALE | OPT_TIMESTAMP, _) => return Err(PacketError::BadOption(kind)),
            _ => TcpOption::Unknown {
                kind,
                data: body.to_vec(),
            },
        };
        options.push(option);
        buf = &buf[len..];
    }
    Ok(options)
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can arise when parsing a raw frame.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PacketError {
    #[error("buffer too short to contain Ethernet/IPv4/TCP headers")]
    BufferTooShort,
    #[error("unsupported ethertype {0:#06x}")]
    UnsupportedEtherType(u16),
    #[error("unsupported IPv4 version/IHL byte {0:#04x}")]
    UnsupportedIpHeader(u8),
    #[error("unsupported IP protocol {0}")]
    UnsupportedProtocol(u8),
    #[error("length fields do not match the buffer")]
    LengthMismatch,
    #[error("malformed TCP option kind {0}")]
    BadOption(u8),
    #[error("{0} checksum verification failed")]
    ChecksumFailed(&'static str),
}

// ---------------------------------------------------------------------------
// Checksums
// ---------------------------------------------------------------------------

/// Add `data` to a running one's-complement sum as big-endian 16-bit words.
/// An odd trailing byte is padded with a zero byte on the right.
fn sum_words(mut sum: u32, data: &[u8]) -> u32 {
    let mut chunks = data.chunks_exact(2);
    for word in &mut chunks {
        sum += u32::from(u16::from_be_bytes([word[0], word[1]]));
    }
    if let [last] = chunks.remainder() {
        sum += u32::from(*last) << 8;
    }
    // Fold so the accumulator never overflows across calls.
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    sum
}

/// Compute the Internet checksum (RFC 1071) over `data`.
///
/// The caller must zero any checksum field within `data` before calling;
/// over a buffer that already carries a valid checksum the result is `0`.
pub fn internet_checksum(data: &[u8]) -> u16 {
    !(sum_words(0, data) as u16)
}

/// TCP checksum over the IPv4 pseudo-header and the whole segment.
pub fn tcp_checksum(src: Ipv4Addr, dst: Ipv4Addr, segment: &[u8]) -> u16 {
    let mut pseudo = [0u8; 12];
    pseudo[0..4].copy_from_slice(&src.octets());
    pseudo[4..8].copy_from_slice(&dst.octets());
    pseudo[9] = IPPROTO_TCP;
    pseudo[10..12].copy_from_slice(&(segment.len() as u16).to_be_bytes());
    !(sum_words(sum_words(0, &pseudo), segment) as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_frame(options: Vec<TcpOption>, payload: &[u8]) -> Frame {
        Frame {
            ethernet: EthernetHeader {
                dst: [0x02, 0, 10, 1, 1, 100],
                src: [0x02, 0, 192, 168, 1, 100],
                ethertype: ETHERTYPE_IPV4,
            },
            ipv4: Ipv4Header {
                src: Ipv4Addr::new(192, 168, 1, 100),
                dst: Ipv4Addr::new(10, 1, 1, 100),
                identification: 1,
                ttl: 64,
                total_len: 0, // computed by encode
                checksum: 0,  // computed by encode
            },
            tcp: TcpHeader {
                src_port: 49152,
                dst_port: 80,
                seq: 0x0102_0304,
                ack: 0x0506_0708,
                flags: flags::PSH | flags::ACK,
                window: 8192,
                options,
                checksum: 0,
            },
            payload: payload.to_vec(),
        }
    }

    fn handshake_options() -> Vec<TcpOption> {
        vec![
            TcpOption::Mss(1460),
            TcpOption::Nop,
            TcpOption::Nop,
            TcpOption::Timestamp { value: 100, echo: 0 },
            TcpOption::WindowScale(7),
        ]
    }

    #[test]
    fn encoded_length_matches_headers_plus_payload() {
        let bytes = make_frame(vec![], b"hello").encode();
        assert_eq!(bytes.len(), 14 + 20 + 20 + 5);
        assert_eq!(be16(&bytes, 14 + 2) as usize, 20 + 20 + 5);
    }

    #[test]
    fn options_are_padded_to_word_boundary() {
        // 4 + 1 + 1 + 10 + 3 = 19 bytes of options, padded to 20.
        let bytes = make_frame(handshake_options(), b"").encode();
        assert_eq!(bytes.len(), 14 + 20 + 40);
        assert_eq!(bytes[14 + 20 + 12] >> 4, 10);
        assert_eq!(*bytes.last().unwrap(), OPT_EOL);
    }

    #[test]
    fn decode_recovers_fields_and_verifies_checksums() {
        let frame = make_frame(handshake_options(), b"GET / HTTP/1.1\r\n\r\n");
        let decoded = Frame::decode(&frame.encode()).unwrap();
        assert_eq!(decoded.tcp.seq, frame.tcp.seq);
        assert_eq!(decoded.tcp.ack, frame.tcp.ack);
        assert_eq!(decoded.tcp.flags, frame.tcp.flags);
        assert_eq!(decoded.tcp.options, frame.tcp.options);
        assert_eq!(decoded.tcp.timestamp(), Some((100, 0)));
        assert_eq!(decoded.payload, frame.payload);
        assert_eq!(decoded.ipv4.src, frame.ipv4.src);
    }

    #[test]
    fn odd_length_payload_checksums_verify() {
        let bytes = make_frame(vec![], b"odd").encode();
        assert!(Frame::decode(&bytes).is_ok());
    }

    #[test]
    fn corrupt_payload_fails_tcp_checksum() {
        let mut bytes = make_frame(vec![], b"test").encode();
        *bytes.last_mut().unwrap() ^= 0xff;
        assert_eq!(Frame::decode(&bytes), Err(PacketError::ChecksumFailed("tcp")));
    }

    #[test]
    fn corrupt_ttl_fails_ip_checksum() {
        let mut bytes = make_frame(vec![], b"test").encode();
        bytes[14 + 8] ^= 0x01;
        assert_eq!(Frame::decode(&bytes), Err(PacketError::ChecksumFailed("ipv4")));
    }

    #[test]
    fn truncated_frame_is_rejected() {
        let mut bytes = make_frame(vec![], b"data").encode();
        bytes.pop();
        assert_eq!(Frame::decode(&bytes), Err(PacketError::LengthMismatch));
        assert_eq!(Frame::decode(&[0u8; 10]), Err(PacketError::BufferTooShort));
    }

    #[test]
    fn seq_ack_big_endian_on_wire() {
        let bytes = make_frame(vec![], b"").encode();
        let tcp = 14 + 20;
        assert_eq!(&bytes[tcp + 4..tcp + 8], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(&bytes[tcp + 8..tcp + 12], &[0x05, 0x06, 0x07, 0x08]);
    }

    #[test]
    fn checksum_of_rfc1071_example() {
        // RFC 1071 §3 sample words.
        let data = [0x00, 0x01, 0xf2, 0x03, 0xf4, 0xf5, 0xf6, 0xf7];
        assert_eq!(internet_checksum(&data), !0xddf2);
    }

    #[test]
    fn flags_render_like_packet_tools() {
        assert_eq!(flags::describe(flags::SYN), "S");
        assert_eq!(flags::describe(flags::SYN | flags::ACK), "SA");
        assert_eq!(flags::describe(flags::PSH | flags::ACK), "PA");
        assert_eq!(flags::describe(flags::FIN | flags::ACK), "FA");
    }
}
