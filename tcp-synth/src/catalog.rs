//! Named scenarios.
//!
//! Each function builds one complete trace.  Defaults (endpoints, ISNs,
//! payloads) reproduce the reference captures; a [`ScenarioConfig`] may
//! override endpoints, ISNs and timing.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::{IsnSource, ScenarioConfig};
use crate::endpoint::{Direction, EndpointPair};
use crate::error::Result;
use crate::frame::OptionProfile;
use crate::planner::Strategy;
use crate::scenario::{
    AckPolicy, AssemblerSettings, DataStep, Fault, PushPolicy, ScenarioAssembler, Teardown, Trace,
};

const C: Direction = Direction::ClientToServer;
const S: Direction = Direction::ServerToClient;

/// File-type signature the IDS rule matches on.
pub const SIGNATURE: &[u8] = b"MALWARE";

pub const DEFAULT_SWEEP_SIZES: [usize; 5] = [5, 10, 20, 50, 100];

pub const DEFAULT_LARGE_SIZE: usize = 5 * 1024 * 1024;

/// Full-sized segments for the large transfer.
pub const MSS: usize = 1460;

/// Timestamp the PAWS scenario stamps on its late client segment.
pub const PAWS_STALE_TIMESTAMP: u32 = 350;

const FIXED_ISNS: IsnSource = IsnSource::Fixed {
    client: 1000,
    server: 2000,
};

fn assembler(
    config: &ScenarioConfig,
    (client, server): (&str, &str),
    isn: IsnSource,
    profile: OptionProfile,
) -> Result<ScenarioAssembler> {
    let endpoints = config.endpoints_or(EndpointPair::parse(client, server)?);
    let settings = AssemblerSettings {
        profile,
        timing: config.timing,
    };
    ScenarioAssembler::new(endpoints, config.isns_or(isn), settings)
}

// ---------------------------------------------------------------------------
// PAWS
// ---------------------------------------------------------------------------

/// A client segment whose TSval is older than the client's previous one,
/// followed by a normal segment.
pub fn paws(config: &ScenarioConfig) -> Result<Trace> {
    log::info!("[catalog] building paws scenario");
    let mut a = assembler(
        config,
        ("192.168.1.100:49152", "10.1.1.100:80"),
        IsnSource::default(),
        OptionProfile::Full,
    )?;
    a.handshake()?
        .exchange(DataStep::new(
            "get",
            C,
            "GET / HTTP/1.1\r\nHost: example.com\r\n\r\n",
        ))?
        .exchange(DataStep::new(
            "response",
            S,
            "HTTP/1.1 200 OK\r\nContent-Length: 13\r\n\r\nHello, World!",
        ))?
        .exchange(
            DataStep::new("paws", C, "Additional data with old timestamp")
                .strategy(Strategy::Whole.with_stale_ack(0, PAWS_STALE_TIMESTAMP))
                .acks(AckPolicy::None),
        )?
        .exchange(
            DataStep::new("after_paws", C, "Normal packet after PAWS violation")
                .acks(AckPolicy::None),
        )?
        .teardown(Teardown::Graceful)?;
    a.finalize()
}

// ---------------------------------------------------------------------------
// Reassembly
// ---------------------------------------------------------------------------

/// The 1000-byte response body: an HTML page padded with `X`.
pub fn html_body() -> Vec<u8> {
    let (open, close) = (b"<html><body>".as_slice(), b"</body></html>".as_slice());
    let mut body = open.to_vec();
    body.resize(1000 - close.len(), b'X');
    body.extend_from_slice(close);
    body
}

/// Out-of-order response body, a retransmission of its first chunk, a
/// segment reaching back before that chunk, then normal data.
pub fn reassembly(config: &ScenarioConfig) -> Result<Trace> {
    log::info!("[catalog] building reassembly scenario");
    let mut a = assembler(
        config,
        ("192.168.1.100:49152", "10.1.1.100:80"),
        IsnSource::default(),
        OptionProfile::Full,
    )?;
    a.handshake()?
        .exchange(DataStep::new(
            "request1",
            C,
            "GET /index.html HTTP/1.1\r\nHost: example.com\r\n",
        ))?
        .exchange(DataStep::new("request2", C, "Content-Length: 0\r\n\r\n"))?
        .exchange(DataStep::new(
            "header",
            S,
            "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: 1000\r\n\r\n",
        ))?
        .exchange(
            DataStep::new("body", S, html_body())
                .strategy(Strategy::Permuted(200, vec![2, 0, 3, 1, 4])),
        )?
        .inject(Fault::Retransmit {
            landmark: "body.chunk0".into(),
            holdoff: 0.0,
        })?
        .inject(Fault::Gap {
            landmark: "body.chunk0".into(),
            back_off: 50,
            payload: b"This packet has a sequence number less than the retransmitted packet"
                .to_vec(),
        })?
        .inject(Fault::Resume {
            label: "trailer".into(),
            direction: S,
            payload: b"This is a normal packet after the problematic sequence".to_vec(),
            acks: AckPolicy::EachSegment,
        })?
        .teardown(Teardown::Graceful)?;
    a.finalize()
}

// ---------------------------------------------------------------------------
// Verdict hold
// ---------------------------------------------------------------------------

/// The first file segment is retransmitted one second later, while an inline
/// IDS would still be holding the original for a verdict.
pub fn verdict_hold(config: &ScenarioConfig) -> Result<Trace> {
    log::info!("[catalog] building verdict-hold scenario");
    let mut a = assembler(
        config,
        ("10.1.1.10:12345", "10.1.2.20:80"),
        IsnSource::default(),
        OptionProfile::Bare,
    )?;
    a.handshake()?
        .exchange(DataStep::new(
            "get",
            C,
            "GET /file.bin HTTP/1.1\r\nHost: example.com\r\nUser-Agent: Mozilla/5.0\r\nAccept: */*\r\n\r\n",
        ))?
        .exchange(DataStep::new(
            "header",
            S,
            "HTTP/1.1 200 OK\r\nContent-Type: application/octet-stream\r\nContent-Length: 100\r\n\r\n",
        ))?
        .exchange(
            DataStep::new("part1", S, "MALWARE-content-part1")
                .strategy(Strategy::Whole.with_duplicate(0, 1))
                .acks(AckPolicy::AfterStep)
                .push(PushPolicy::Every)
                .holdoff(1.0),
        )?
        .exchange(DataStep::new("part2", S, "-content-part2-end").acks(AckPolicy::AfterStep))?
        .teardown(Teardown::Graceful)?;
    a.finalize()
}

// ---------------------------------------------------------------------------
// Size sweep
// ---------------------------------------------------------------------------

/// `size` bytes starting with the signature, padded with `X`, or the
/// signature truncated when `size` is shorter.
pub fn malware_body(size: usize) -> Vec<u8> {
    let mut body = SIGNATURE[..size.min(SIGNATURE.len())].to_vec();
    body.resize(size, b'X');
    body
}

fn octet_stream_header(len: usize, server: Option<&str>) -> String {
    let server = server.map(|s| format!("Server: {s}\r\n")).unwrap_or_default();
    format!(
        "HTTP/1.1 200 OK\r\n{server}Content-Type: application/octet-stream\r\nContent-Length: {len}\r\n\r\n"
    )
}

/// Mid-stream capture (no handshake) of a `size`-byte file download.
pub fn size_sweep(size: usize, config: &ScenarioConfig) -> Result<Trace> {
    log::info!("[catalog] building size-sweep scenario for {size} byte(s)");
    let mut a = assembler(
        config,
        ("10.1.0.2:12345", "10.1.0.1:80"),
        FIXED_ISNS,
        OptionProfile::Bare,
    )?;
    a.exchange(
        DataStep::new("get", C, "GET /malware.bin HTTP/1.1\r\nHost: example.com\r\n\r\n")
            .acks(AckPolicy::None),
    )?
    .exchange(DataStep::new("header", S, octet_stream_header(size, None)))?
    .exchange(DataStep::new("file", S, malware_body(size)))?;
    a.finalize()
}

// ---------------------------------------------------------------------------
// Large transfer
// ---------------------------------------------------------------------------

/// `size` seeded random bytes with the signature up front.
pub fn large_body(size: usize, seed: u64) -> Vec<u8> {
    let mut body = vec![0u8; size];
    StdRng::seed_from_u64(seed).fill(body.as_mut_slice());
    let prefix = size.min(SIGNATURE.len());
    body[..prefix].copy_from_slice(&SIGNATURE[..prefix]);
    body
}

/// A large download in full-sized segments, each acknowledged, closed by the
/// server.
pub fn large_transfer(size: usize, seed: u64, config: &ScenarioConfig) -> Result<Trace> {
    log::info!("[catalog] building large-transfer scenario for {size} byte(s)");
    let mut a = assembler(
        config,
        ("10.1.0.2:49152", "10.1.0.1:80"),
        FIXED_ISNS,
        OptionProfile::Bare,
    )?;
    a.exchange(
        DataStep::new(
            "get",
            C,
            "GET /large_file.bin HTTP/1.1\r\nHost: example.com\r\nUser-Agent: Mozilla/5.0\r\nAccept: */*\r\n\r\n",
        )
        .acks(AckPolicy::None),
    )?
    .exchange(DataStep::new("header", S, octet_stream_header(size, Some("Apache"))))?
    .exchange(
        DataStep::new("file", S, large_body(size, seed))
            .strategy(Strategy::FixedChunks(MSS))
            .push(PushPolicy::Every),
    )?
    .teardown(Teardown::ServerFin)?;
    a.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malware_body_pads_or_truncates() {
        assert_eq!(malware_body(5), b"MALWA");
        assert_eq!(malware_body(7), b"MALWARE");
        assert_eq!(malware_body(10), b"MALWAREXXX");
        assert!(malware_body(0).is_empty());
    }

    #[test]
    fn html_body_is_exactly_one_kilobyte() {
        let body = html_body();
        assert_eq!(body.len(), 1000);
        assert!(body.starts_with(b"<html><body>"));
        assert!(body.ends_with(b"</body></html>"));
    }

    #[test]
    fn large_body_is_seeded_and_signed() {
        let a = large_body(4096, 9);
        assert_eq!(a, large_body(4096, 9));
        assert_ne!(a, large_body(4096, 10));
        assert!(a.starts_with(SIGNATURE));
        assert_eq!(large_body(3, 1), b"MAL");
    }

    #[test]
    fn octet_stream_header_mentions_length() {
        let h = octet_stream_header(50, Some("Apache"));
        assert!(h.contains("Server: Apache\r\n"));
        assert!(h.ends_with("Content-Length: 50\r\n\r\n"));
        assert!(!octet_stream_header(5, None).contains("Server"));
    }
}
