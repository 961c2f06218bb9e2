//! `kws`: command-line host for the keyword-spotting engine.
//!
//! ```text
//! kws [synthetic | wav <file.wav> | mic]
//! ```
//!
//! No arguments runs the synthetic self-test. Settings are read from the JSON
//! file named by `KWS_CONFIG`; log verbosity follows `RUST_LOG`.

mod settings;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use kws_core::{
    ClassifierHandle, DetectionEvent, FileReport, KwsEngine, StubClassifier, SyntheticReport,
    WindowReport, WindowScoreEvent,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use settings::{load_settings, settings_path_from_env, AppSettings};

const USAGE: &str = "Usage: kws [synthetic | wav <file.wav> | mic]

  synthetic        classify a tone, white noise and silence (default)
  wav <file.wav>   analyse a mono 16-bit PCM WAV file
  mic              listen on the default input device until Ctrl-C

Environment:
  KWS_CONFIG       path to a JSON settings file
  RUST_LOG         log filter (default: kws=info,kws_core=info)";

#[derive(Debug, Clone, PartialEq)]
enum Mode {
    Synthetic,
    Wav(PathBuf),
    Mic,
    Help,
}

fn parse_mode<I: IntoIterator<Item = String>>(args: I) -> Result<Mode, String> {
    let mut args = args.into_iter();
    let Some(first) = args.next() else {
        return Ok(Mode::Synthetic);
    };
    let mode = match first.trim_start_matches("--") {
        "synthetic" => Mode::Synthetic,
        "mic" => Mode::Mic,
        "wav" => match args.next() {
            Some(path) => Mode::Wav(PathBuf::from(path)),
            None => return Err("wav mode needs a file path".into()),
        },
        "help" | "-h" => Mode::Help,
        other => return Err(format!("unknown mode: {other}")),
    };
    if let Some(extra) = args.next() {
        return Err(format!("unexpected argument: {extra}"));
    }
    Ok(mode)
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("kws=info,kws_core=info")),
        )
        .init();

    let mode = match parse_mode(std::env::args().skip(1)) {
        Ok(Mode::Help) => {
            println!("{USAGE}");
            return ExitCode::SUCCESS;
        }
        Ok(mode) => mode,
        Err(msg) => {
            eprintln!("error: {msg}\n\n{USAGE}");
            return ExitCode::FAILURE;
        }
    };

    match run(mode).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(mode: Mode) -> Result<()> {
    let settings = match settings_path_from_env() {
        Some(path) => load_settings(&path)?,
        None => AppSettings::default(),
    };
    info!(?settings, "settings loaded");

    let engine = KwsEngine::new(
        settings.engine_config(),
        ClassifierHandle::new(StubClassifier::default()),
    )
    .context("building engine")?;
    engine.warm_up().context("warming up classifier")?;
    let printer = Printer {
        verbose: settings.verbose_windows,
        model_rate: engine.config().model_sample_rate,
    };

    match mode {
        Mode::Synthetic => {
            let report = engine.analyze_synthetic(&mut rand::thread_rng());
            printer.synthetic(&report);
        }
        Mode::Wav(path) => {
            let report = engine
                .analyze_wav(&path)
                .with_context(|| format!("analysing {}", path.display()))?;
            printer.file(&report);
        }
        Mode::Mic => listen(Arc::new(engine), printer).await?,
        Mode::Help => println!("{USAGE}"),
    }
    Ok(())
}

async fn listen(engine: Arc<KwsEngine>, printer: Printer) -> Result<()> {
    let mut windows = engine.subscribe_windows();
    let mut detections = engine.subscribe_detections();
    engine.start().context("starting microphone capture")?;
    println!("Listening for \"{}\" (Ctrl-C to stop)", engine.config().keyword_label);

    let window_task = tokio::spawn(async move {
        loop {
            match windows.recv().await {
                Ok(event) => printer.live_window(&event),
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "window printer lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });
    let detection_task = tokio::spawn(async move {
        loop {
            match detections.recv().await {
                Ok(event) => print_detection(&event),
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "detection printer lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    engine.stop()?;
    info!(diagnostics = ?engine.diagnostics_snapshot(), "stopped");

    window_task.abort();
    detection_task.abort();
    Ok(())
}

#[derive(Debug, Clone, Copy)]
struct Printer {
    verbose: bool,
    model_rate: u32,
}

impl Printer {
    fn synthetic(&self, report: &SyntheticReport) {
        for signal in &report.signals {
            println!("--- {} ---", signal.signal);
            match (&signal.window, &signal.error) {
                (Some(window), _) => self.window(window),
                (None, Some(err)) => println!("  classification failed: {err}"),
                (None, None) => {}
            }
        }
        println!("detections: {}", report.detections.len());
    }

    fn file(&self, report: &FileReport) {
        println!(
            "{}: {} Hz{}, loudest window at {:.2}s (rms {:.4})",
            report.source,
            report.sample_rate_in,
            if report.resampled { " (resampled)" } else { "" },
            report.best_start as f64 / f64::from(self.model_rate.max(1)),
            report.best_rms,
        );
        for window in &report.windows {
            self.window(window);
        }
        println!(
            "windows: {} failed: {} detections: {}",
            report.windows.len(),
            report.failed_windows,
            report.detections.len()
        );
    }

    fn window(&self, w: &WindowReport) {
        println!("[{:>7.2}s] best={} ({:.3})", w.start_secs, w.best_label, w.best_confidence);
        if self.verbose {
            for score in &w.scores {
                let mark = if w.high_confidence.contains(&score.label) {
                    " ***"
                } else {
                    ""
                };
                println!("    {:<12} {:.3}{mark}", score.label, score.confidence);
            }
            println!("    inference {:.2} ms", w.inference_ms);
        }
        println!(
            "  [POST] keyword_score={:.3} avg={:.3} history={} elapsed={}ms",
            w.keyword_score, w.average, w.history_len, w.elapsed_since_last_ms
        );
        if let Some(event) = &w.detection {
            print_detection(event);
        }
    }

    fn live_window(&self, e: &WindowScoreEvent) {
        if !self.verbose {
            return;
        }
        println!(
            "[window {}] best={} ({:.3}) keyword_score={:.3} avg={:.3}",
            e.window_start, e.best_label, e.best_confidence, e.keyword_score, e.average
        );
    }
}

fn print_detection(e: &DetectionEvent) {
    println!(
        "[DETECT] Keyword detected! keyword={} avg={:.3} elapsed={}ms at={}",
        e.keyword,
        e.triggering_average,
        e.elapsed_since_last_ms,
        e.detected_at.to_rfc3339()
    );
}
