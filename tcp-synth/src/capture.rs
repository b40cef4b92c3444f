//! Capture sinks.
//!
//! A [`CaptureSink`] accepts `(timestamp, frame bytes)` pairs in record
//! order.  [`PcapWriter`] writes the classic libpcap file format; a plain
//! `Vec<(f64, Vec<u8>)>` collects frames in memory for tests.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::scenario::Trace;

const PCAP_MAGIC: u32 = 0xa1b2_c3d4; // microsecond resolution
const PCAP_VERSION_MAJOR: u16 = 2;
const PCAP_VERSION_MINOR: u16 = 4;
const PCAP_SNAPLEN: u32 = 65_535;
const PCAP_LINKTYPE_ETHERNET: u32 = 1;

pub const PCAP_GLOBAL_HEADER_LEN: usize = 24;
pub const PCAP_RECORD_HEADER_LEN: usize = 16;

pub trait CaptureSink {
    fn write_frame(&mut self, timestamp: f64, frame: &[u8]) -> io::Result<()>;
}

impl CaptureSink for Vec<(f64, Vec<u8>)> {
    fn write_frame(&mut self, timestamp: f64, frame: &[u8]) -> io::Result<()> {
        self.push((timestamp, frame.to_vec()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// PcapWriter
// ---------------------------------------------------------------------------

/// Little-endian libpcap writer, Ethernet link type.
#[derive(Debug)]
pub struct PcapWriter<W: Write> {
    inner: W,
    frames: usize,
}

impl PcapWriter<BufWriter<File>> {
    /// Create (or truncate) `path` and write the global header.
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        Self::new(BufWriter::new(File::create(path)?))
    }
}

impl<W: Write> PcapWriter<W> {
    /// Write the global header to `inner`.
    pub fn new(mut inner: W) -> io::Result<Self> {
        let mut h = Vec::with_capacity(PCAP_GLOBAL_HEADER_LEN);
        h.extend_from_slice(&PCAP_MAGIC.to_le_bytes());
        h.extend_from_slice(&PCAP_VERSION_MAJOR.to_le_bytes());
        h.extend_from_slice(&PCAP_VERSION_MINOR.to_le_bytes());
        h.extend_from_slice(&0i32.to_le_bytes()); // thiszone
        h.extend_from_slice(&0u32.to_le_bytes()); // sigfigs
        h.extend_from_slice(&PCAP_SNAPLEN.to_le_bytes());
        h.extend_from_slice(&PCAP_LINKTYPE_ETHERNET.to_le_bytes());
        inner.write_all(&h)?;
        Ok(Self { inner, frames: 0 })
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Flush and return the underlying writer.
    pub fn finish(mut self) -> io::Result<W> {
        self.inner.flush()?;
        Ok(self.inner)
    }
}

/// Split seconds into `(sec, usec)`, rounding to the nearest microsecond.
fn split_timestamp(timestamp: f64) -> (u32, u32) {
    let micros = (timestamp.max(0.0) * 1_000_000.0).round() as u64;
    ((micros / 1_000_000) as u32, (micros % 1_000_000) as u32)
}

impl<W: Write> CaptureSink for PcapWriter<W> {
    fn write_frame(&mut self, timestamp: f64, frame: &[u8]) -> io::Result<()> {
        let len = u32::try_from(frame.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "frame too large"))?;
        let captured = len.min(PCAP_SNAPLEN);
        let (sec, usec) = split_timestamp(timestamp);

        let mut h = [0u8; PCAP_RECORD_HEADER_LEN];
        h[0..4].copy_from_slice(&sec.to_le_bytes());
        h[4..8].copy_from_slice(&usec.to_le_bytes());
        h[8..12].copy_from_slice(&captured.to_le_bytes()); // incl_len
        h[12..16].copy_from_slice(&len.to_le_bytes()); // orig_len
        self.inner.write_all(&h)?;
        self.inner.write_all(&frame[..captured as usize])?;
        self.frames += 1;
        Ok(())
    }
}

/// Stream every record of `trace` into `sink`.
pub fn write_trace<S: CaptureSink + ?Sized>(sink: &mut S, trace: &Trace) -> io::Result<()> {
    for record in &trace.records {
        sink.write_frame(record.timestamp(), record.bytes())?;
    }
    log::debug!("[capture] wrote {} frame(s)", trace.records.len());
    Ok(())
}

/// Write `trace` to a new pcap file at `path`.
pub fn save_pcap(path: impl AsRef<Path>, trace: &Trace) -> io::Result<()> {
    let path = path.as_ref();
    let mut writer = PcapWriter::create(path)?;
    write_trace(&mut writer, trace)?;
    writer.finish()?;
    log::info!("[capture] {} ({} packets)", path.display(), trace.records.len());
    Ok(())
}
