//! Replays a capture of timestamped BLE-MIDI packets (or plain MIDI messages) through the
//! recorder, and writes every recorded segment as a `.mid` file.
//!
//! A capture is a text file with one packet per line: the host timestamp in milliseconds,
//! followed by the packet bytes in hexadecimal.
//! Bytes may be grouped or spaced freely, and `#` starts a comment.
//!
//! ```text
//! # host_ms  packet
//! 0.0        80 80 90 3c 40
//! 250.5      81fa 80 3c 00
//! ```

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use bletrack::{timer::VirtualClock, Recorder, RecorderConfig};
use clap::{Parser, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Convert BLE-MIDI captures into Standard Midi Files
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Capture file to replay
    capture: PathBuf,

    /// What each line of the capture holds
    #[arg(short, long, value_enum, default_value_t = Mode::Ble)]
    mode: Mode,

    /// Directory where the `.mid` files are written
    #[arg(short, long, default_value = ".")]
    out: PathBuf,

    /// File name prefix of the written segments
    #[arg(long, default_value = "segment")]
    prefix: String,

    /// Recorder configuration, as JSON
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Minimum silence in milliseconds that counts as a gap
    #[arg(long)]
    min_gap: Option<u32>,

    /// Record everything into a single file instead of splitting on gaps
    #[arg(long)]
    no_split: bool,

    /// Text written at the start of every file
    #[arg(short, long)]
    description: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug, ValueEnum)]
enum Mode {
    /// BLE-MIDI notification packets
    Ble,
    /// Complete MIDI messages, timed by the host timestamp alone
    Midi,
}

#[derive(Clone, PartialEq, Debug)]
struct Record {
    host_ms: f64,
    bytes: Vec<u8>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level)?;

    let config = load_config(&args)?;
    let text = fs::read_to_string(&args.capture)
        .with_context(|| format!("failed to read capture {}", args.capture.display()))?;
    let records = parse_capture(&text)
        .with_context(|| format!("invalid capture {}", args.capture.display()))?;
    info!(records = records.len(), mode = ?args.mode, "replaying capture");

    let segments = replay(config, args.mode, &records);
    if segments.is_empty() {
        warn!("nothing was recorded");
        return Ok(());
    }

    fs::create_dir_all(&args.out)
        .with_context(|| format!("failed to create {}", args.out.display()))?;
    for (idx, segment) in segments.iter().enumerate() {
        let path = segment_path(&args.out, &args.prefix, idx);
        fs::write(&path, segment).with_context(|| format!("failed to write {}", path.display()))?;
        info!(path = %path.display(), len = segment.len(), "wrote segment");
    }
    Ok(())
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .init();

    Ok(())
}

fn load_config(args: &Args) -> Result<RecorderConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("failed to read config {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("invalid config {}", path.display()))?
        }
        None => RecorderConfig::default(),
    };
    if let Some(min_gap) = args.min_gap {
        config.gap.min_gap_ms = min_gap;
    }
    if args.no_split {
        config.split_on_gap = false;
    }
    if args.description.is_some() {
        config.description = args.description.clone();
    }
    Ok(config)
}

fn parse_capture(text: &str) -> Result<Vec<Record>> {
    let mut records = Vec::new();
    let mut last = 0.0;
    for (idx, line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = match line.find('#') {
            Some(comment) => &line[..comment],
            None => line,
        };
        let mut fields = line.split_whitespace();
        let host_ms = match fields.next() {
            Some(field) => field
                .parse::<f64>()
                .with_context(|| format!("line {}: invalid timestamp {:?}", line_no, field))?,
            None => continue,
        };
        if !host_ms.is_finite() || host_ms < 0.0 {
            bail!("line {}: timestamp {} out of range", line_no, host_ms);
        }
        if host_ms < last {
            bail!("line {}: timestamp {} goes back in time", line_no, host_ms);
        }
        last = host_ms;
        let digits = fields.collect::<String>();
        let bytes =
            hex::decode(&digits).with_context(|| format!("line {}: invalid hex", line_no))?;
        records.push(Record { host_ms, bytes });
    }
    Ok(records)
}

/// Push every record through a recorder on a virtual clock, firing timers as time goes by.
fn replay(config: RecorderConfig, mode: Mode, records: &[Record]) -> Vec<Vec<u8>> {
    let mut recorder = Recorder::new(config);
    let mut clock = VirtualClock::new();
    recorder.start(&mut clock);

    let origin = records.first().map(|r| r.host_ms).unwrap_or(0.0);
    for record in records {
        let now = (record.host_ms - origin) as u64;
        while let Some(token) = clock.next_due(now) {
            recorder.fire(token);
        }
        match mode {
            Mode::Ble => recorder.push_packet(record.host_ms, &record.bytes, &mut clock),
            Mode::Midi => recorder.push_message(record.host_ms, &record.bytes, &mut clock),
        }
    }
    //Let pending timeouts close the last segment
    while let Some(token) = clock.next_due(u64::MAX) {
        recorder.fire(token);
    }
    recorder.finish()
}

fn segment_path(dir: &Path, prefix: &str, idx: usize) -> PathBuf {
    dir.join(format!("{}-{:03}.mid", prefix, idx))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn capture_comments_and_spacing() {
        let text = "# a capture\n\n0 80 80 90 3c 40 # note on\n  12.5 81fa803c00\n";
        let records = parse_capture(text).unwrap();
        assert_eq!(
            records,
            vec![
                Record {
                    host_ms: 0.0,
                    bytes: vec![0x80, 0x80, 0x90, 0x3C, 0x40],
                },
                Record {
                    host_ms: 12.5,
                    bytes: vec![0x81, 0xFA, 0x80, 0x3C, 0x00],
                },
            ]
        );
    }

    #[test]
    fn capture_rejects_bad_hex() {
        assert!(parse_capture("0 80 8").is_err());
        assert!(parse_capture("0 zz").is_err());
    }

    #[test]
    fn capture_rejects_time_travel() {
        assert!(parse_capture("10 f8\n5 f8\n").is_err());
        assert!(parse_capture("-1 f8\n").is_err());
        assert!(parse_capture("x f8\n").is_err());
    }

    #[test]
    fn midi_replay_splits_on_timeout() {
        let records = parse_capture(
            "1000 90 3c 40\n\
             1100 80 3c 00\n\
             4000 90 3e 40\n\
             4100 80 3e 00\n",
        )
        .unwrap();
        let segments = replay(RecorderConfig::default(), Mode::Midi, &records);
        assert_eq!(segments.len(), 2);
        for segment in &segments {
            let smf = midly::Smf::parse(segment).unwrap();
            assert_eq!(smf.tracks.len(), 1);
        }
    }

    #[test]
    fn replay_without_split() {
        let records = parse_capture("0 90 3c 40\n100 80 3c 00\n5000 90 3e 40\n5100 80 3e 00\n")
            .unwrap();
        let mut config = RecorderConfig::default();
        config.split_on_gap = false;
        let segments = replay(config, Mode::Midi, &records);
        assert_eq!(segments.len(), 1);
    }

    #[test]
    fn empty_capture_records_nothing() {
        let segments = replay(RecorderConfig::default(), Mode::Ble, &[]);
        assert!(segments.is_empty());
    }

    #[test]
    fn segment_names() {
        assert_eq!(
            segment_path(Path::new("out"), "take", 7),
            Path::new("out").join("take-007.mid")
        );
    }
}
