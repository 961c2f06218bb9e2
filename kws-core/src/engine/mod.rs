//! `KwsEngine` — top-level lifecycle controller.
//!
//! ## Lifecycle
//!
//! ```text
//! KwsEngine::new()             → labels read, keyword resolved (fatal if missing)
//!     ├─► warm_up()            → status = WarmingUp → Idle
//!     ├─► analyze_wav()/analyze_buffer()/analyze_synthetic()
//!     │                        → one-shot, fresh detector state per call
//!     └─► start()              → mic open, capture + classification threads, status = Listening
//!         └─► stop()           → running=false, status = Stopped
//! ```
//!
//! `start()`/`stop()` called in the wrong state return an error rather than
//! panicking.
//!
//! ## Threading
//!
//! `cpal::Stream` is `!Send` on Windows/macOS (COM / CoreAudio thread affinity).
//! `AudioCapture` is therefore created *inside* the capture `spawn_blocking`
//! closure so it never crosses a thread boundary. A sync oneshot channel
//! propagates any open-device errors back to the `start()` caller.

pub mod pipeline;

use std::path::Path;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{info, info_span, warn};

use crate::{
    audio::{synth::SyntheticSignal, wav, AudioCapture},
    buffering::{create_audio_ring, handoff::window_handoff, samples::SampleBuffer},
    detect::{DetectionAggregator, DetectorConfig, MonotonicClock},
    error::{KwsError, Result},
    inference::{ClassifierAdapter, ClassifierHandle, KeywordSelector},
    ipc::events::{DetectionEvent, EngineStatus, EngineStatusEvent, WindowScoreEvent},
};

use pipeline::{
    CaptureContext, DiagnosticsSnapshot, EventSinks, FileReport, PipelineDiagnostics,
    WindowProcessor, WindowReport,
};

/// Broadcast channel capacity for slow consumers.
const BROADCAST_CAP: usize = 256;

/// Configuration for `KwsEngine`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct EngineConfig {
    /// Rate the classifier expects (Hz). Must match the backend. Default: 16000.
    pub model_sample_rate: u32,
    /// Windows overlapping any one sample; hop = window_len / slices. Default: 4.
    pub slices_per_window: usize,
    /// Label whose confidence feeds the detector. Default: "hey_sun".
    pub keyword_label: String,
    /// Use the best label's confidence when `keyword_label` is not in the
    /// label set, instead of failing at startup. Default: false.
    pub keyword_fallback_to_best: bool,
    /// Peak amplitude file-mode buffers are normalised to. Default: 0.95.
    pub target_peak: f32,
    /// Locator scan step in milliseconds. Default: 250.
    pub locator_step_ms: u32,
    /// Confidence at which a label is marked in window reports. Default: 0.6.
    pub confidence_report_threshold: f32,
    /// Pending windows between capture and classification (1..=2). Default: 2.
    pub handoff_capacity: usize,
    pub detector: DetectorConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model_sample_rate: 16_000,
            slices_per_window: 4,
            keyword_label: "hey_sun".into(),
            keyword_fallback_to_best: false,
            target_peak: 0.95,
            locator_step_ms: 250,
            confidence_report_threshold: 0.6,
            handoff_capacity: 2,
            detector: DetectorConfig::default(),
        }
    }
}

impl EngineConfig {
    /// # Errors
    /// `KwsError::InvalidConfig` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(KwsError::InvalidConfig(msg.to_string()));
        if self.model_sample_rate == 0 {
            return invalid("modelSampleRate must be > 0");
        }
        if self.slices_per_window == 0 {
            return invalid("slicesPerWindow must be > 0");
        }
        if self.keyword_label.trim().is_empty() {
            return invalid("keywordLabel must not be empty");
        }
        if !(self.target_peak > 0.0 && self.target_peak <= 1.0) {
            return invalid("targetPeak must be in (0, 1]");
        }
        if self.locator_step_ms == 0 {
            return invalid("locatorStepMs must be > 0");
        }
        if !(0.0..=1.0).contains(&self.confidence_report_threshold) {
            return invalid("confidenceReportThreshold must be in [0, 1]");
        }
        if !(1..=2).contains(&self.handoff_capacity) {
            return invalid("handoffCapacity must be 1 or 2");
        }
        if self.detector.agg_windows == 0 {
            return invalid("detector.aggWindows must be > 0");
        }
        if !(0.0..=1.0).contains(&self.detector.avg_threshold) {
            return invalid("detector.avgThreshold must be in [0, 1]");
        }
        if self.detector.min_history > self.detector.agg_windows {
            return invalid("detector.minHistory must not exceed aggWindows");
        }
        Ok(())
    }

    /// Hop between window starts for a `window_len`-sample window.
    pub fn hop_len(&self, window_len: usize) -> usize {
        (window_len / self.slices_per_window.max(1)).max(1)
    }

    /// Locator scan step in samples at `sample_rate`.
    pub fn locator_step_len(&self, sample_rate: u32) -> usize {
        let samples = u64::from(sample_rate) * u64::from(self.locator_step_ms) / 1000;
        usize::try_from(samples).unwrap_or(usize::MAX).max(1)
    }
}

/// One synthetic signal's outcome.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalReport {
    pub signal: String,
    pub window: Option<WindowReport>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyntheticReport {
    pub signals: Vec<SignalReport>,
    pub detections: Vec<DetectionEvent>,
}

/// The top-level engine handle.
///
/// `KwsEngine` is `Send + Sync`; all fields use interior mutability. Wrap in
/// `Arc<KwsEngine>` to share with event-forwarding async tasks.
pub struct KwsEngine {
    config: EngineConfig,
    adapter: ClassifierAdapter,
    /// Resolved once at construction, immutable afterwards.
    selector: KeywordSelector,
    /// Running flag of the current capture session. Each `start()` gets a
    /// fresh flag, so threads of a stopped session can never be revived.
    session: Mutex<Option<Arc<AtomicBool>>>,
    status: Arc<Mutex<EngineStatus>>,
    sinks: EventSinks,
    status_tx: broadcast::Sender<EngineStatusEvent>,
    diagnostics: Arc<PipelineDiagnostics>,
}

impl KwsEngine {
    /// Create an engine around a classifier backend.
    ///
    /// # Errors
    /// - `KwsError::InvalidConfig` for an invalid config or a backend whose
    ///   rate or window does not fit it.
    /// - `KwsError::UnknownKeywordLabel` when the keyword is not a backend
    ///   label and fallback is off.
    pub fn new(config: EngineConfig, classifier: ClassifierHandle) -> Result<Self> {
        config.validate()?;
        let adapter = ClassifierAdapter::new(classifier);
        if adapter.sample_rate() != config.model_sample_rate {
            return Err(KwsError::InvalidConfig(format!(
                "classifier expects {} Hz, config says {} Hz",
                adapter.sample_rate(),
                config.model_sample_rate
            )));
        }
        if adapter.window_len() == 0 || adapter.labels().is_empty() {
            return Err(KwsError::InvalidConfig(
                "classifier reports an empty window or label set".into(),
            ));
        }

        let selector = KeywordSelector::resolve(
            adapter.labels(),
            &config.keyword_label,
            config.keyword_fallback_to_best,
        )?;
        info!(
            labels = ?adapter.labels(),
            keyword = %config.keyword_label,
            degraded = selector.is_degraded(),
            window_len = adapter.window_len(),
            hop_len = config.hop_len(adapter.window_len()),
            "engine configured"
        );

        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);
        Ok(Self {
            config,
            adapter,
            selector,
            session: Mutex::new(None),
            status: Arc::new(Mutex::new(EngineStatus::Idle)),
            sinks: EventSinks::new(BROADCAST_CAP),
            status_tx,
            diagnostics: Arc::new(PipelineDiagnostics::default()),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn labels(&self) -> &[String] {
        self.adapter.labels()
    }

    pub fn keyword_selector(&self) -> &KeywordSelector {
        &self.selector
    }

    /// Warm up the classifier. Call once before the first analysis.
    pub fn warm_up(&self) -> Result<()> {
        self.set_status(EngineStatus::WarmingUp, None);
        info!("warming up classifier");
        if let Err(e) = self.adapter.warm_up() {
            self.set_status(EngineStatus::Error, Some(e.to_string()));
            return Err(e);
        }
        self.set_status(EngineStatus::Idle, None);
        info!("classifier ready");
        Ok(())
    }

    /// Analyse a decoded buffer at any sample rate.
    pub fn analyze_buffer(&self, buffer: SampleBuffer, source: &str) -> Result<FileReport> {
        let mut processor = self.processor(DetectionAggregator::with_wall_clock(
            self.config.detector.clone(),
        ));
        let report = pipeline::run_file(
            &mut processor,
            buffer,
            source,
            &self.config,
            &self.diagnostics,
        )?;
        info!(diagnostics = ?self.diagnostics.snapshot(), "file run complete");
        Ok(report)
    }

    /// Decode and analyse a mono 16-bit PCM WAV file.
    ///
    /// # Errors
    /// `Io` / `InvalidContainer` from decoding, `InputTooShort` from analysis.
    pub fn analyze_wav(&self, path: &Path) -> Result<FileReport> {
        let buffer = wav::read_wav(path)?;
        self.analyze_buffer(buffer, &path.display().to_string())
    }

    /// Classify one window of each synthetic signal through a single detector.
    ///
    /// Signals are laid end to end on the detector clock, one window apart.
    pub fn analyze_synthetic<R: Rng + ?Sized>(&self, rng: &mut R) -> SyntheticReport {
        let window_len = self.adapter.window_len();
        let rate = self.adapter.sample_rate();
        let span = info_span!("synthetic", window_len, rate);
        let _enter = span.enter();

        let mut processor = self.processor(DetectionAggregator::with_wall_clock(
            self.config.detector.clone(),
        ));
        let window_secs = window_len as f64 / f64::from(rate.max(1));
        let mut signals = Vec::new();
        let mut detections = Vec::new();

        for (i, signal) in SyntheticSignal::ALL.into_iter().enumerate() {
            let samples = signal.render(window_len, rate, rng);
            let start = (i * window_len) as u64;
            let now = Duration::from_secs_f64(window_secs * (i + 1) as f64);
            self.diagnostics
                .windows_scheduled
                .fetch_add(1, Ordering::Relaxed);
            let (window, error) = match processor.process(start, &samples, Some(now)) {
                Ok(report) => {
                    if let Some(event) = &report.detection {
                        detections.push(event.clone());
                    }
                    (Some(report), None)
                }
                Err(e) => (None, Some(e.to_string())),
            };
            signals.push(SignalReport {
                signal: signal.name().to_string(),
                window,
                error,
            });
        }

        SyntheticReport {
            signals,
            detections,
        }
    }

    /// Start microphone capture and live classification.
    ///
    /// Blocks until the audio device is confirmed open (or fails), then returns.
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    /// - `KwsError::AlreadyRunning` if already started.
    /// - `KwsError::DeviceUnavailable` when the microphone cannot be opened.
    pub fn start(&self) -> Result<()> {
        let session = self.begin_session()?;
        self.diagnostics.reset();

        let window_len = self.adapter.window_len();
        let hop_len = self.config.hop_len(window_len);
        let model_sample_rate = self.adapter.sample_rate();

        let (producer, consumer) = create_audio_ring();
        let (window_tx, window_rx) = window_handoff(self.config.handoff_capacity);

        let processor = self.processor(DetectionAggregator::new(
            self.config.detector.clone(),
            Box::new(MonotonicClock::new()),
        ));
        let running = Arc::clone(&session);
        let diagnostics = Arc::clone(&self.diagnostics);
        tokio::task::spawn_blocking(move || {
            pipeline::run_classification(processor, window_rx, running, diagnostics);
        });

        let running = Arc::clone(&session);
        let diagnostics = Arc::clone(&self.diagnostics);

        // Sync oneshot: capture thread reports the device rate or the open error.
        let (open_tx, open_rx) = std::sync::mpsc::channel::<Result<u32>>();

        tokio::task::spawn_blocking(move || {
            // ── Open audio device (must happen on THIS thread — cpal::Stream is !Send) ──
            let capture = match AudioCapture::open_default(producer, Arc::clone(&running)) {
                Ok(c) => {
                    let _ = open_tx.send(Ok(c.sample_rate));
                    c
                }
                Err(e) => {
                    let _ = open_tx.send(Err(e));
                    running.store(false, Ordering::SeqCst);
                    return;
                }
            };

            pipeline::run_capture(CaptureContext {
                consumer,
                running,
                capture_sample_rate: capture.sample_rate,
                model_sample_rate,
                window_len,
                hop_len,
                handoff: window_tx,
                overruns: capture.overrun_counter(),
                diagnostics,
            });

            capture.stop();
            // Stream drops here, releasing the audio device on this thread.
            drop(capture);
        });

        match open_rx.recv() {
            Ok(Ok(rate)) => {
                self.set_status(EngineStatus::Listening, None);
                info!(capture_rate = rate, "engine started, listening");
                Ok(())
            }
            Ok(Err(e)) => {
                session.store(false, Ordering::SeqCst);
                self.set_status(EngineStatus::Error, Some(e.to_string()));
                Err(e)
            }
            Err(_) => {
                session.store(false, Ordering::SeqCst);
                self.set_status(EngineStatus::Error, Some("capture failed to start".into()));
                Err(KwsError::Other(anyhow::anyhow!(
                    "capture task died unexpectedly"
                )))
            }
        }
    }

    /// Stop capture. The window in flight is classified before the
    /// classification thread exits.
    ///
    /// # Errors
    /// `KwsError::NotRunning` if not currently running.
    pub fn stop(&self) -> Result<()> {
        let session = self.session.lock().take();
        match session {
            Some(running) if running.swap(false, Ordering::SeqCst) => {}
            _ => return Err(KwsError::NotRunning),
        }
        self.set_status(EngineStatus::Stopped, None);
        info!(diagnostics = ?self.diagnostics.snapshot(), "engine stop requested");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.session
            .lock()
            .as_ref()
            .is_some_and(|running| running.load(Ordering::SeqCst))
    }

    /// Current engine status (snapshot).
    pub fn status(&self) -> EngineStatus {
        *self.status.lock()
    }

    pub fn subscribe_detections(&self) -> broadcast::Receiver<DetectionEvent> {
        self.sinks.detection_tx.subscribe()
    }

    /// Per-window scores, whether or not they triggered.
    pub fn subscribe_windows(&self) -> broadcast::Receiver<WindowScoreEvent> {
        self.sinks.window_tx.subscribe()
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<EngineStatusEvent> {
        self.status_tx.subscribe()
    }

    /// Snapshot of pipeline counters for observability.
    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    // ── Internal helpers ─────────────────────────────────────────────────────

    /// Install a fresh running flag for a new capture session.
    fn begin_session(&self) -> Result<Arc<AtomicBool>> {
        let mut session = self.session.lock();
        if session
            .as_ref()
            .is_some_and(|running| running.load(Ordering::SeqCst))
        {
            return Err(KwsError::AlreadyRunning);
        }
        let running = Arc::new(AtomicBool::new(true));
        *session = Some(Arc::clone(&running));
        Ok(running)
    }

    fn processor(&self, aggregator: DetectionAggregator) -> WindowProcessor {
        WindowProcessor::new(
            self.adapter.clone(),
            self.selector.clone(),
            aggregator,
            self.config.confidence_report_threshold,
            self.sinks.clone(),
            Arc::clone(&self.diagnostics),
        )
    }

    fn set_status(&self, new_status: EngineStatus, detail: Option<String>) {
        *self.status.lock() = new_status;
        if new_status == EngineStatus::Error {
            warn!(?detail, "engine entered error state");
        }
        let _ = self.status_tx.send(EngineStatusEvent {
            status: new_status,
            detail,
        });
    }
}
