//! Entry point for `tcp-synth`.
//!
//! Parses CLI arguments and dispatches into one scenario generator or the
//! mock verdict service.  All synthesis is delegated to library modules;
//! `main.rs` owns only process setup (logging, argument parsing, file output).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use tcp_synth::capture::save_pcap;
use tcp_synth::catalog;
use tcp_synth::config::{IsnSource, ScenarioConfig, TraceTiming};
use tcp_synth::endpoint::EndpointPair;
use tcp_synth::scenario::Trace;
use tcp_synth::script::{
    render_large_transfer_script, render_size_sweep_script, sweep_capture_name, SweepScriptConfig,
};
use tcp_synth::verdict::{VerdictConfig, VerdictService};

/// Deterministic TCP captures for stressing stream reassembly.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(flatten)]
    scenario: ScenarioArgs,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Args)]
struct ScenarioArgs {
    /// Seed for randomized ISNs.
    #[arg(long, global = true)]
    seed: Option<u64>,

    /// Client ISN (requires --server-isn).
    #[arg(long, global = true, requires = "server_isn")]
    client_isn: Option<u32>,

    /// Server ISN (requires --client-isn).
    #[arg(long, global = true, requires = "client_isn")]
    server_isn: Option<u32>,

    /// Client endpoint as ip:port (requires --server).
    #[arg(long, global = true, requires = "server")]
    client: Option<String>,

    /// Server endpoint as ip:port (requires --client).
    #[arg(long, global = true, requires = "client")]
    server: Option<String>,

    /// Capture time of the first packet, in seconds.
    #[arg(long, global = true, default_value_t = 0.0)]
    start_time: f64,

    /// Seconds between packets.
    #[arg(long, global = true, default_value_t = 1.0)]
    interval: f64,
}

#[derive(Subcommand)]
enum Mode {
    /// Client segment with a timestamp older than its predecessor.
    Paws {
        #[arg(short, long, default_value = "paws_test.pcap")]
        output: PathBuf,
    },
    /// Out-of-order body, retransmission and a backwards-reaching segment.
    Reassembly {
        #[arg(short, long, default_value = "tcp_reassembly_test.pcap")]
        output: PathBuf,
    },
    /// File segment retransmitted while the original awaits a verdict.
    VerdictHold {
        #[arg(short, long, default_value = "retransmit_test.pcap")]
        output: PathBuf,
    },
    /// One capture per file size, plus the driver script.
    SizeSweep {
        /// File sizes in bytes.
        #[arg(long, value_delimiter = ',', default_values_t = catalog::DEFAULT_SWEEP_SIZES)]
        sizes: Vec<usize>,
        /// Directory the captures and script are written to.
        #[arg(short, long, default_value = ".")]
        dir: PathBuf,
    },
    /// A multi-megabyte download in full-sized segments, plus the driver script.
    LargeTransfer {
        #[arg(long, default_value_t = catalog::DEFAULT_LARGE_SIZE)]
        size: usize,
        #[arg(short, long, default_value = ".")]
        dir: PathBuf,
    },
    /// Serve delayed verdicts over HTTP.
    MockVerdict {
        /// Local address to bind.
        #[arg(short, long, default_value = "0.0.0.0:8080")]
        bind: String,
        /// Response delay in milliseconds.
        #[arg(long, default_value_t = 3000)]
        delay_ms: u64,
    },
}

impl ScenarioArgs {
    fn config(&self) -> Result<ScenarioConfig> {
        let endpoints = match (&self.client, &self.server) {
            (Some(client), Some(server)) => Some(
                EndpointPair::parse(client, server).context("invalid --client/--server")?,
            ),
            _ => None,
        };
        let isn = match (self.client_isn, self.server_isn, self.seed) {
            (Some(client), Some(server), _) => Some(IsnSource::Fixed { client, server }),
            (_, _, Some(seed)) => Some(IsnSource::Seeded(seed)),
            _ => None,
        };
        Ok(ScenarioConfig {
            endpoints,
            isn,
            timing: TraceTiming {
                start: self.start_time,
                interval: self.interval,
                ..TraceTiming::default()
            },
        })
    }
}

fn print_summary(name: &str, trace: &Trace) {
    println!("{name}: {} packets", trace.records.len());
    let marks = trace.manifest.by_record();
    let verbose = marks.len() <= 32;
    for (landmark, index) in marks {
        if !verbose && landmark.contains(".chunk") {
            continue;
        }
        println!("  #{:<5} {:<28} {}", index + 1, landmark, trace.records[index]);
    }
}

fn write_capture(path: &Path, name: &str, trace: &Trace) -> Result<()> {
    save_pcap(path, trace).with_context(|| format!("writing {}", path.display()))?;
    println!("Created PCAP file: {}", path.display());
    print_summary(name, trace);
    Ok(())
}

fn write_script(path: &Path, script: &str) -> Result<()> {
    fs::write(path, script).with_context(|| format!("writing {}", path.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o755))
            .with_context(|| format!("chmod {}", path.display()))?;
    }
    println!("Created script: {}", path.display());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();
    let config = cli.scenario.config()?;

    match cli.mode {
        Mode::Paws { output } => {
            let trace = catalog::paws(&config).context("building paws scenario")?;
            write_capture(&output, "paws", &trace)?;
        }
        Mode::Reassembly { output } => {
            let trace = catalog::reassembly(&config).context("building reassembly scenario")?;
            write_capture(&output, "reassembly", &trace)?;
        }
        Mode::VerdictHold { output } => {
            let trace =
                catalog::verdict_hold(&config).context("building verdict-hold scenario")?;
            write_capture(&output, "verdict-hold", &trace)?;
        }
        Mode::SizeSweep { sizes, dir } => {
            fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
            for &size in &sizes {
                let trace = catalog::size_sweep(size, &config)
                    .with_context(|| format!("building size-sweep scenario for {size}"))?;
                write_capture(&dir.join(sweep_capture_name(size)), &format!("size {size}"), &trace)?;
            }
            let script = render_size_sweep_script(&sizes, &SweepScriptConfig::default());
            write_script(&dir.join("test_sizes.sh"), &script)?;
        }
        Mode::LargeTransfer { size, dir } => {
            fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
            let seed = cli.scenario.seed.unwrap_or(tcp_synth::config::DEFAULT_SEED);
            let trace = catalog::large_transfer(size, seed, &config)
                .context("building large-transfer scenario")?;
            let script_config = SweepScriptConfig::default();
            write_capture(&dir.join(&script_config.large_capture), "large-transfer", &trace)?;
            write_script(
                &dir.join("test_large_file.sh"),
                &render_large_transfer_script(&script_config),
            )?;
        }
        Mode::MockVerdict { bind, delay_ms } => {
            let config = VerdictConfig {
                bind: bind.parse().with_context(|| format!("invalid bind address {bind}"))?,
                delay: Duration::from_millis(delay_ms),
                ..VerdictConfig::default()
            };
            let service = VerdictService::bind(config)
                .await
                .context("binding verdict service")?;
            service.serve().await.context("verdict service failed")?;
        }
    }
    Ok(())
}
