//! cardscan-core replay harness
//!
//! Feeds recorded frame tensor dumps through the scan pipeline and prints
//! the consensus card fields. Dumps are JSON lines, one frame per line,
//! carrying the frame geometry plus the tensors each model produced.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::runtime::Runtime;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use cardscan_core::analyzer::{Availability, NameBranch, PaymentCardAnalyzer, ScanState};
use cardscan_core::config::{self, AppConfig};
use cardscan_core::geometry::Rect;
use cardscan_core::session::{ScanOutcome, ScanSession};
use cardscan_core::vision::{FrameGeometry, ScanBackends, SsdRawOutput, WindowCrop};

/// Replay recorded scan frames through the card pipeline
#[derive(Parser, Debug)]
#[command(name = "cardscan-core")]
#[command(about = "Replay recorded scan frames through the card pipeline")]
struct Args {
    /// Frame dump file (JSON lines, one frame per line)
    frames: PathBuf,

    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Accept only this exact card number instead of the plausibility check
    #[arg(long)]
    expected_pan: Option<String>,
}

/// One recorded frame: geometry plus the tensors each model produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FrameRecord {
    geometry: FrameGeometry,
    /// Card-number SSD tensors
    ocr: Option<SsdRawOutput>,
    /// Card-feature SSD tensors
    object: Option<SsdRawOutput>,
    /// Probability vectors for consecutive character windows, left to right
    alphabet_windows: Option<Vec<Vec<f32>>>,
    /// Expiry strip scores
    expiry: Option<Vec<f32>>,
}

/// Backend that serves one frame's recorded tensors instead of running
/// models. Character windows are handed out in request order, matching the
/// serial left-to-right sampling of the name extractor.
struct RecordedBackend {
    frame: FrameRecord,
    window_cursor: Mutex<usize>,
}

impl RecordedBackend {
    fn new(frame: FrameRecord) -> Self {
        Self {
            frame,
            window_cursor: Mutex::new(0),
        }
    }
}

#[async_trait::async_trait]
impl ScanBackends for RecordedBackend {
    async fn ocr(&self, _crop: Rect) -> Result<SsdRawOutput> {
        self.frame
            .ocr
            .clone()
            .context("frame dump carries no card-number tensors")
    }

    async fn object(&self, _crop: Rect) -> Result<SsdRawOutput> {
        self.frame
            .object
            .clone()
            .context("frame dump carries no card-feature tensors")
    }

    async fn alphabet(&self, _window: WindowCrop) -> Result<Vec<f32>> {
        let windows = self
            .frame
            .alphabet_windows
            .as_ref()
            .context("frame dump carries no character windows")?;
        let mut cursor = self.window_cursor.lock();
        let probabilities = windows.get(*cursor).cloned().unwrap_or_else(|| {
            // Windows past the recording read as empty space
            let mut empty = vec![0.0; 27];
            empty[0] = 1.0;
            empty
        });
        *cursor += 1;
        Ok(probabilities)
    }

    async fn expiry(&self, _strip: WindowCrop) -> Result<Vec<f32>> {
        self.frame
            .expiry
            .clone()
            .context("frame dump carries no expiry scores")
    }
}

fn main() -> Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();
    let config = load_or_default_config(args.config.as_deref());

    info!("replaying frames from {:?}", args.frames);

    // Reader thread feeds parsed frames over a channel so parsing overlaps
    // frame analysis.
    let (sender, receiver) = crossbeam_channel::bounded::<FrameRecord>(8);
    let frames_path = args.frames.clone();
    let reader = std::thread::spawn(move || read_frames(&frames_path, sender));

    let runtime = Runtime::new().context("failed to create tokio runtime")?;
    let outcome = runtime.block_on(replay(receiver, &config, args.expected_pan))?;

    match reader.join() {
        Ok(result) => result?,
        Err(_) => anyhow::bail!("frame reader thread panicked"),
    }

    print_outcome(outcome);
    Ok(())
}

/// Load configuration from file or fall back to defaults
fn load_or_default_config(path: Option<&Path>) -> AppConfig {
    if let Some(path) = path {
        match config::load_config(path) {
            Ok(config) => {
                info!("loaded configuration from {:?}", path);
                return config;
            }
            Err(e) => warn!("ignoring unreadable configuration {:?}: {e:#}", path),
        }
    }
    info!("using default configuration");
    AppConfig::default()
}

fn read_frames(path: &Path, sender: Sender<FrameRecord>) -> Result<()> {
    let file = File::open(path).with_context(|| format!("failed to open {path:?}"))?;
    for (number, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let frame: FrameRecord = serde_json::from_str(&line)
            .with_context(|| format!("malformed frame record on line {}", number + 1))?;
        if sender.send(frame).is_err() {
            // Session settled early; stop parsing
            break;
        }
    }
    Ok(())
}

async fn replay(
    receiver: Receiver<FrameRecord>,
    config: &AppConfig,
    expected_pan: Option<String>,
) -> Result<Option<ScanOutcome>> {
    let name_branch = if config.pipeline.run_name_extraction {
        Availability::Available(NameBranch::new())
    } else {
        Availability::Unavailable
    };
    let state = ScanState {
        run_ocr: true,
        run_name_extraction: config.pipeline.run_name_extraction,
    };

    let mut session = match expected_pan {
        Some(expected) => ScanSession::new(
            PaymentCardAnalyzer::new(name_branch),
            state,
            config.aggregation.to_aggregator_config(),
            move |pan: &str| pan == expected,
        ),
        None => ScanSession::new(
            PaymentCardAnalyzer::new(name_branch),
            state,
            config.aggregation.to_aggregator_config(),
            plausible_pan,
        ),
    };

    for frame in receiver.iter() {
        let geometry = frame.geometry;
        let backend = RecordedBackend::new(frame);
        match session.process_frame(&backend, &geometry).await {
            Ok(Some(outcome)) => return Ok(Some(outcome)),
            Ok(None) => {}
            Err(e) => warn!("frame skipped: {e:#}"),
        }
    }

    // Recording exhausted without a settled number; report what accumulated
    Ok(session.finish())
}

/// Format-level plausibility for card numbers. Checksum validation belongs
/// to the issuer-aware caller; replay only needs a digit-string filter.
fn plausible_pan(pan: &str) -> bool {
    (12..=19).contains(&pan.len()) && pan.bytes().all(|b| b.is_ascii_digit())
}

fn print_outcome(outcome: Option<ScanOutcome>) {
    let Some(outcome) = outcome else {
        println!("No card fields could be read from the recorded frames");
        return;
    };

    println!("Frames processed: {}", outcome.frames_processed);
    match outcome.pan {
        Some(pan) => println!(
            "Card number: {} ({} frames agree)",
            pan.value, pan.agreement_count
        ),
        None => println!("Card number: not read"),
    }
    match outcome.name {
        Some(name) => println!(
            "Cardholder:  {} ({} frames agree)",
            name.value, name.agreement_count
        ),
        None => println!("Cardholder:  not read"),
    }
    match outcome.expiry {
        Some(expiry) => println!(
            "Expiry:      {} ({} frames agree)",
            expiry.value, expiry.agreement_count
        ),
        None => println!("Expiry:      not read"),
    }
}
