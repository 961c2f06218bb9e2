//! Window classification pipeline.
//!
//! ## Per-window stage
//!
//! ```text
//! 1. ClassifierAdapter::classify(window)     → Classification | InferenceFailed
//! 2. KeywordSelector::keyword_score           → f32
//! 3. DetectionAggregator::observe(_at)        → Step (maybe Trigger)
//! 4. broadcast WindowScoreEvent (+ DetectionEvent on trigger)
//! ```
//!
//! A failed window is logged and counted, and contributes nothing to the
//! score history.
//!
//! ## Drivers
//!
//! - [`run_file`]: resample → normalize → locate → schedule → per-window stage,
//!   with the detector clock following audio time (window end).
//! - [`run_capture`] + [`run_classification`]: the live path, two blocking
//!   threads joined by the bounded window handoff. Both run in
//!   `spawn_blocking`, keeping the Tokio executor free for event forwarding.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    Arc, OnceLock,
};
use std::time::Duration;

use chrono::Utc;
use crossbeam_channel::RecvTimeoutError;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, error, info, info_span, warn};

use crate::{
    audio::{normalize::normalize_in_place, resample::resample_to_rate, resample::RateConverter},
    buffering::{
        handoff::{PushOutcome, WindowReceiver, WindowSender},
        samples::SampleBuffer,
        AudioConsumer, Consumer,
    },
    detect::{DetectionAggregator, Trigger},
    engine::EngineConfig,
    error::{KwsError, Result},
    inference::{Classification, ClassifierAdapter, KeywordSelector, LabelScore, StageTiming},
    ipc::events::{DetectionEvent, WindowScoreEvent},
    window::{locator::find_best_window_with_rms, schedule_from_located, StreamWindower},
};

// ---------------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct PipelineDiagnostics {
    pub frames_in: AtomicUsize,
    pub frames_resampled: AtomicUsize,
    pub windows_scheduled: AtomicUsize,
    pub windows_classified: AtomicUsize,
    pub inference_errors: AtomicUsize,
    pub windows_dropped: AtomicUsize,
    pub detections: AtomicUsize,
}

impl PipelineDiagnostics {
    pub fn reset(&self) {
        self.frames_in.store(0, Ordering::Relaxed);
        self.frames_resampled.store(0, Ordering::Relaxed);
        self.windows_scheduled.store(0, Ordering::Relaxed);
        self.windows_classified.store(0, Ordering::Relaxed);
        self.inference_errors.store(0, Ordering::Relaxed);
        self.windows_dropped.store(0, Ordering::Relaxed);
        self.detections.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            frames_in: self.frames_in.load(Ordering::Relaxed),
            frames_resampled: self.frames_resampled.load(Ordering::Relaxed),
            windows_scheduled: self.windows_scheduled.load(Ordering::Relaxed),
            windows_classified: self.windows_classified.load(Ordering::Relaxed),
            inference_errors: self.inference_errors.load(Ordering::Relaxed),
            windows_dropped: self.windows_dropped.load(Ordering::Relaxed),
            detections: self.detections.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub frames_in: usize,
    pub frames_resampled: usize,
    pub windows_scheduled: usize,
    pub windows_classified: usize,
    pub inference_errors: usize,
    pub windows_dropped: usize,
    pub detections: usize,
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Everything observed for one classified window.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowReport {
    /// Window start in samples at the model rate.
    pub start: u64,
    pub start_secs: f64,
    pub scores: Vec<LabelScore>,
    /// Labels at or above the report threshold.
    pub high_confidence: Vec<String>,
    pub best_label: String,
    pub best_confidence: f32,
    /// Wall-clock classifier call time.
    pub inference_ms: f64,
    pub timing: StageTiming,
    pub keyword_score: f32,
    pub average: f32,
    pub history_len: usize,
    pub elapsed_since_last_ms: u64,
    pub detection: Option<DetectionEvent>,
}

/// Result of analysing one finite buffer (WAV file or in-memory clip).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileReport {
    pub source: String,
    pub sample_rate_in: u32,
    /// Whether the input was converted to the model rate.
    pub resampled: bool,
    /// Start of the most energetic window, in samples at the model rate.
    pub best_start: usize,
    pub best_rms: f32,
    pub windows: Vec<WindowReport>,
    pub detections: Vec<DetectionEvent>,
    /// Windows whose classification failed (score dropped).
    pub failed_windows: usize,
}

// ---------------------------------------------------------------------------
// Per-window stage
// ---------------------------------------------------------------------------

/// Broadcast endpoints shared by every processor of one engine.
#[derive(Clone)]
pub struct EventSinks {
    pub detection_tx: broadcast::Sender<DetectionEvent>,
    pub window_tx: broadcast::Sender<WindowScoreEvent>,
    /// Detection sequence number, shared across runs.
    pub detection_seq: Arc<AtomicU64>,
}

impl EventSinks {
    pub fn new(capacity: usize) -> Self {
        let (detection_tx, _) = broadcast::channel(capacity.max(1));
        let (window_tx, _) = broadcast::channel(capacity.max(1));
        Self {
            detection_tx,
            window_tx,
            detection_seq: Arc::new(AtomicU64::new(0)),
        }
    }
}

/// Classify → select → aggregate → publish, for one window at a time.
///
/// Sole owner of its detector state.
pub struct WindowProcessor {
    adapter: ClassifierAdapter,
    selector: KeywordSelector,
    aggregator: DetectionAggregator,
    report_threshold: f32,
    sinks: EventSinks,
    diagnostics: Arc<PipelineDiagnostics>,
    window_seq: u64,
}

impl WindowProcessor {
    pub fn new(
        adapter: ClassifierAdapter,
        selector: KeywordSelector,
        aggregator: DetectionAggregator,
        report_threshold: f32,
        sinks: EventSinks,
        diagnostics: Arc<PipelineDiagnostics>,
    ) -> Self {
        Self {
            adapter,
            selector,
            aggregator,
            report_threshold,
            sinks,
            diagnostics,
            window_seq: 0,
        }
    }

    pub fn window_len(&self) -> usize {
        self.adapter.window_len()
    }

    pub fn sample_rate(&self) -> u32 {
        self.adapter.sample_rate()
    }

    pub fn aggregator(&self) -> &DetectionAggregator {
        &self.aggregator
    }

    /// Run one window through the stage.
    ///
    /// `now` is the detector time for this window; `None` reads the
    /// aggregator's own clock.
    ///
    /// # Errors
    /// `KwsError::InferenceFailed` when the classifier rejects the window.
    /// The error is already logged and counted; detector state is untouched.
    pub fn process(&mut self, start: u64, samples: &[f32], now: Option<Duration>) -> Result<WindowReport> {
        let classification = match self.adapter.classify(samples) {
            Ok(c) => c,
            Err(e) => {
                self.diagnostics
                    .inference_errors
                    .fetch_add(1, Ordering::Relaxed);
                warn!(window_start = start, error = %e, "window classification failed, score dropped");
                return Err(e);
            }
        };
        self.diagnostics
            .windows_classified
            .fetch_add(1, Ordering::Relaxed);

        let keyword_score = self.selector.keyword_score(&classification);
        let step = match now {
            Some(t) => self.aggregator.observe_at(keyword_score, t),
            None => self.aggregator.observe(keyword_score),
        };

        let inference_ms = classification.elapsed.as_secs_f64() * 1000.0;
        let elapsed_ms = millis(step.elapsed_since_last);
        debug!(
            window_start = start,
            best = classification.best_label(),
            keyword_score,
            avg = step.average,
            history_len = step.history_len,
            elapsed_ms,
            inference_ms,
            "window scored"
        );

        let detection = step
            .trigger
            .map(|trigger| self.emit_detection(start, &classification, trigger, keyword_score));

        let scores = classification.to_label_scores();
        let high_confidence = scores
            .iter()
            .filter(|s| s.confidence >= self.report_threshold)
            .map(|s| s.label.clone())
            .collect();

        let _ = self.sinks.window_tx.send(WindowScoreEvent {
            seq: self.window_seq,
            window_start: start,
            best_label: classification.best_label().to_string(),
            best_confidence: classification.best_confidence(),
            keyword_score,
            average: step.average,
            scores: scores.clone(),
            timing: classification.timing,
        });
        self.window_seq = self.window_seq.saturating_add(1);

        Ok(WindowReport {
            start,
            start_secs: start as f64 / f64::from(self.adapter.sample_rate().max(1)),
            scores,
            high_confidence,
            best_label: classification.best_label().to_string(),
            best_confidence: classification.best_confidence(),
            inference_ms,
            timing: classification.timing,
            keyword_score,
            average: step.average,
            history_len: step.history_len,
            elapsed_since_last_ms: elapsed_ms,
            detection,
        })
    }

    fn emit_detection(
        &self,
        start: u64,
        classification: &Classification,
        trigger: Trigger,
        keyword_score: f32,
    ) -> DetectionEvent {
        self.diagnostics.detections.fetch_add(1, Ordering::Relaxed);
        let keyword = match &self.selector {
            KeywordSelector::Label { name, .. } => name.clone(),
            KeywordSelector::BestLabel => classification.best_label().to_string(),
        };
        let event = DetectionEvent {
            seq: self.sinks.detection_seq.fetch_add(1, Ordering::Relaxed),
            keyword,
            timestamp_ms: millis(trigger.at),
            detected_at: Utc::now(),
            triggering_average: trigger.average,
            elapsed_since_last_ms: millis(trigger.elapsed_since_last),
            keyword_score,
            window_start: start,
        };
        let emit_result = self.sinks.detection_tx.send(event.clone());
        info!(
            seq = event.seq,
            keyword = %event.keyword,
            window_start = start,
            avg = trigger.average,
            elapsed_ms = event.elapsed_since_last_ms,
            emit_success = emit_result.is_ok(),
            "keyword detected"
        );
        event
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

// ---------------------------------------------------------------------------
// File mode
// ---------------------------------------------------------------------------

/// Analyse a finite buffer end to end.
///
/// Detector time follows the audio: a window "happens" at its end sample.
///
/// # Errors
/// `KwsError::InputTooShort` when the buffer (after resampling) cannot hold
/// one window. Per-window inference failures are counted in the report.
pub fn run_file(
    processor: &mut WindowProcessor,
    buffer: SampleBuffer,
    source: &str,
    config: &EngineConfig,
    diagnostics: &PipelineDiagnostics,
) -> Result<FileReport> {
    let window_len = processor.window_len();
    let model_rate = processor.sample_rate();
    let sample_rate_in = buffer.sample_rate;
    let span = info_span!("file", source, sample_rate_in, window_len);
    let _enter = span.enter();

    let resampled = sample_rate_in != model_rate;
    let mut buffer = resample_to_rate(buffer, model_rate);
    if resampled {
        debug!(from = sample_rate_in, to = model_rate, len = buffer.len(), "resampled input");
    }
    diagnostics
        .frames_in
        .fetch_add(buffer.len(), Ordering::Relaxed);

    if buffer.len() < window_len {
        warn!(needed = window_len, got = buffer.len(), "input shorter than one window");
        return Err(KwsError::InputTooShort {
            needed: window_len,
            got: buffer.len(),
        });
    }

    let gain = normalize_in_place(&mut buffer.samples, config.target_peak);
    let step = config.locator_step_len(model_rate);
    let (best_start, best_rms) = find_best_window_with_rms(&buffer.samples, window_len, step);
    let hop = config.hop_len(window_len);
    info!(gain, best_start, best_rms, hop, "located most energetic window");

    let rate = f64::from(model_rate.max(1));
    let mut windows = Vec::new();
    let mut detections = Vec::new();
    let mut failed_windows = 0usize;

    for (start, window) in schedule_from_located(&buffer.samples, window_len, hop, best_start) {
        diagnostics
            .windows_scheduled
            .fetch_add(1, Ordering::Relaxed);
        let now = Duration::from_secs_f64((start + window_len) as f64 / rate);
        match processor.process(start as u64, window, Some(now)) {
            Ok(report) => {
                if let Some(event) = &report.detection {
                    detections.push(event.clone());
                }
                windows.push(report);
            }
            Err(_) => failed_windows += 1,
        }
    }

    info!(
        windows = windows.len(),
        detections = detections.len(),
        failed_windows,
        "file analysed"
    );

    Ok(FileReport {
        source: source.to_string(),
        sample_rate_in,
        resampled,
        best_start,
        best_rms,
        windows,
        detections,
        failed_windows,
    })
}

// ---------------------------------------------------------------------------
// Live mode
// ---------------------------------------------------------------------------

/// Samples drained from the ring per iteration (20 ms at 48 kHz).
const DRAIN_CHUNK: usize = 960;

const DEFAULT_IDLE_SLEEP_MS: u64 = 5;

/// How long the classifier waits on the handoff before re-checking `running`.
const RECV_TIMEOUT: Duration = Duration::from_millis(50);

fn capture_idle_sleep_ms() -> u64 {
    static IDLE_SLEEP_MS: OnceLock<u64> = OnceLock::new();
    *IDLE_SLEEP_MS.get_or_init(|| {
        std::env::var("KWS_CAPTURE_IDLE_SLEEP_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(|v| v.clamp(1, 20))
            .unwrap_or(DEFAULT_IDLE_SLEEP_MS)
    })
}

/// Everything the capture thread needs.
pub struct CaptureContext {
    pub consumer: AudioConsumer,
    pub running: Arc<AtomicBool>,
    pub capture_sample_rate: u32,
    pub model_sample_rate: u32,
    pub window_len: usize,
    pub hop_len: usize,
    pub handoff: WindowSender,
    /// Samples the device callback could not fit into the ring.
    pub overruns: Arc<AtomicUsize>,
    pub diagnostics: Arc<PipelineDiagnostics>,
}

/// Drain the ring, convert to the model rate, cut windows and hand them off.
///
/// Never blocks on the classifier: a full handoff evicts its oldest window.
/// Returns when `running` clears. Dropping the sender on return disconnects
/// the classification thread.
pub fn run_capture(mut ctx: CaptureContext) {
    info!(
        capture_rate = ctx.capture_sample_rate,
        model_rate = ctx.model_sample_rate,
        window_len = ctx.window_len,
        hop_len = ctx.hop_len,
        "capture loop started"
    );

    let mut converter = match RateConverter::new(
        ctx.capture_sample_rate,
        ctx.model_sample_rate,
        DRAIN_CHUNK,
    ) {
        Ok(c) => c,
        Err(e) => {
            error!("failed to create rate converter: {e}");
            ctx.running.store(false, Ordering::SeqCst);
            return;
        }
    };

    let mut windower = StreamWindower::new(ctx.window_len, ctx.hop_len);
    let mut raw = vec![0f32; DRAIN_CHUNK];

    loop {
        if !ctx.running.load(Ordering::Relaxed) {
            break;
        }

        let n = ctx.consumer.pop_slice(&mut raw);
        if n == 0 {
            let lost = ctx.overruns.swap(0, Ordering::Relaxed);
            if lost > 0 {
                warn!(lost, "audio ring overrun, samples discarded");
            }
            std::thread::sleep(Duration::from_millis(capture_idle_sleep_ms()));
            continue;
        }
        ctx.diagnostics.frames_in.fetch_add(n, Ordering::Relaxed);

        let converted = converter.process(&raw[..n]);
        if converted.is_empty() {
            continue;
        }
        ctx.diagnostics
            .frames_resampled
            .fetch_add(converted.len(), Ordering::Relaxed);

        for window in windower.push(&converted) {
            ctx.diagnostics
                .windows_scheduled
                .fetch_add(1, Ordering::Relaxed);
            let start = window.start;
            match ctx.handoff.push(window) {
                PushOutcome::Queued => {
                    debug!(window_start = start, pending = ctx.handoff.pending(), "window queued");
                }
                PushOutcome::DroppedOldest { dropped_start } => {
                    ctx.diagnostics
                        .windows_dropped
                        .fetch_add(1, Ordering::Relaxed);
                    warn!(
                        dropped_start,
                        window_start = start,
                        "classifier behind, oldest pending window dropped"
                    );
                }
            }
        }
    }

    info!(buffered = windower.buffered(), "capture loop stopped");
}

/// Classify handed-off windows until stopped or disconnected.
///
/// A window already received is always classified to completion; `running`
/// is checked between windows only.
pub fn run_classification(
    mut processor: WindowProcessor,
    windows: WindowReceiver,
    running: Arc<AtomicBool>,
    diagnostics: Arc<PipelineDiagnostics>,
) {
    info!("classification loop started");

    loop {
        match windows.recv_timeout(RECV_TIMEOUT) {
            Ok(window) => {
                // Failures are logged and counted inside `process`.
                let _ = processor.process(window.start, &window.samples, None);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                debug!("window handoff disconnected");
                break;
            }
        }
        if !running.load(Ordering::Relaxed) {
            break;
        }
    }

    info!(diagnostics = ?diagnostics.snapshot(), "classification loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::VecDeque;
    use std::thread;
    use std::time::Instant;

    use approx::assert_relative_eq;
    use parking_lot::Mutex;
    use tokio::sync::broadcast::error::TryRecvError;

    use crate::audio::synth::tone_samples;
    use crate::buffering::{create_audio_ring, handoff::window_handoff, samples::AudioWindow, Producer};
    use crate::detect::{DetectorConfig, MonotonicClock};
    use crate::inference::{ClassifierHandle, KeywordClassifier, RawScores};

    const LABELS: [&str; 2] = ["hey_sun", "other"];

    /// Replays scripted keyword scores; `None` fails the window. Repeats
    /// the last entry once the script runs out.
    struct ScriptedClassifier {
        labels: Vec<String>,
        window_len: usize,
        script: VecDeque<Option<f32>>,
        last: Option<f32>,
        calls: Arc<Mutex<usize>>,
    }

    impl ScriptedClassifier {
        fn new(window_len: usize, script: Vec<Option<f32>>, calls: Arc<Mutex<usize>>) -> Self {
            Self {
                labels: LABELS.iter().map(|s| s.to_string()).collect(),
                window_len,
                script: script.into(),
                last: Some(0.0),
                calls,
            }
        }
    }

    impl KeywordClassifier for ScriptedClassifier {
        fn labels(&self) -> &[String] {
            &self.labels
        }

        fn window_len(&self) -> usize {
            self.window_len
        }

        fn sample_rate(&self) -> u32 {
            16_000
        }

        fn warm_up(&mut self) -> Result<()> {
            Ok(())
        }

        fn classify(&mut self, _window: &[f32]) -> Result<RawScores> {
            *self.calls.lock() += 1;
            let next = self.script.pop_front().unwrap_or(self.last);
            self.last = next;
            match next {
                Some(score) => Ok(RawScores {
                    confidences: vec![score, 1.0 - score],
                    timing: StageTiming::default(),
                }),
                None => Err(KwsError::InferenceFailed("scripted failure".into())),
            }
        }
    }

    fn processor(
        window_len: usize,
        script: Vec<Option<f32>>,
        sinks: EventSinks,
        diagnostics: Arc<PipelineDiagnostics>,
    ) -> (WindowProcessor, Arc<Mutex<usize>>) {
        let calls = Arc::new(Mutex::new(0));
        let adapter = ClassifierAdapter::new(ClassifierHandle::new(ScriptedClassifier::new(
            window_len,
            script,
            Arc::clone(&calls),
        )));
        let selector = KeywordSelector::resolve(adapter.labels(), "hey_sun", false).unwrap();
        let aggregator =
            DetectionAggregator::new(DetectorConfig::default(), Box::new(MonotonicClock::new()));
        (
            WindowProcessor::new(adapter, selector, aggregator, 0.6, sinks, diagnostics),
            calls,
        )
    }

    fn config() -> EngineConfig {
        EngineConfig::default()
    }

    fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) {
        let start = Instant::now();
        while !cond() {
            if start.elapsed() >= timeout {
                panic!("timed out waiting for pipeline condition");
            }
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn failed_window_is_dropped_not_scored_as_zero() {
        let diagnostics = Arc::new(PipelineDiagnostics::default());
        let (mut p, _) = processor(
            8,
            vec![Some(0.9), None, Some(0.3)],
            EventSinks::new(8),
            Arc::clone(&diagnostics),
        );
        let window = [0.0f32; 8];
        let ms = Duration::from_millis;

        assert!(p.process(0, &window, Some(ms(0))).is_ok());
        let err = p.process(4, &window, Some(ms(100))).unwrap_err();
        assert!(err.is_per_window());
        let report = p.process(8, &window, Some(ms(200))).unwrap();

        // history holds 0.9 and 0.3 only; a zero would have pulled it to 0.4
        assert_eq!(report.history_len, 2);
        assert_relative_eq!(report.average, 0.6, epsilon = 1e-6);
        let snap = diagnostics.snapshot();
        assert_eq!(snap.inference_errors, 1);
        assert_eq!(snap.windows_classified, 2);
    }

    #[test]
    fn wrong_length_window_fails_without_reaching_backend() {
        let (mut p, calls) = processor(
            8,
            vec![Some(0.9)],
            EventSinks::new(8),
            Arc::new(PipelineDiagnostics::default()),
        );
        let err = p.process(0, &[0.0; 7], None).unwrap_err();
        assert!(matches!(err, KwsError::InferenceFailed(_)));
        assert_eq!(*calls.lock(), 0);
        assert!(p.aggregator().state().history().is_empty());
    }

    #[test]
    fn trigger_publishes_detection_and_window_events() {
        let sinks = EventSinks::new(8);
        let mut detections = sinks.detection_tx.subscribe();
        let mut windows = sinks.window_tx.subscribe();
        let (mut p, _) = processor(
            4,
            vec![Some(0.95)],
            sinks,
            Arc::new(PipelineDiagnostics::default()),
        );

        let report = p
            .process(16_000, &[0.1; 4], Some(Duration::from_millis(2_000)))
            .unwrap();
        let event = report.detection.expect("first qualifying window fires");
        assert_eq!(event.keyword, "hey_sun");
        assert_eq!(event.timestamp_ms, 2_000);
        assert_eq!(event.window_start, 16_000);
        assert_eq!(report.high_confidence, vec!["hey_sun".to_string()]);
        assert_relative_eq!(report.start_secs, 1.0);

        assert_eq!(detections.try_recv().unwrap().seq, 0);
        assert_eq!(windows.try_recv().unwrap().window_start, 16_000);
        assert!(matches!(detections.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn file_run_rejects_buffer_shorter_than_window() {
        let diagnostics = Arc::new(PipelineDiagnostics::default());
        let (mut p, _) = processor(16_000, vec![], EventSinks::new(8), Arc::clone(&diagnostics));
        let buffer = SampleBuffer::new(vec![0.1; 15_999], 16_000);
        let err = run_file(&mut p, buffer, "short", &config(), &diagnostics).unwrap_err();
        assert!(matches!(
            err,
            KwsError::InputTooShort {
                needed: 16_000,
                got: 15_999
            }
        ));
    }

    #[test]
    fn file_run_walks_back_from_loudest_region_on_audio_time() {
        let diagnostics = Arc::new(PipelineDiagnostics::default());
        let (mut p, _) = processor(
            16_000,
            vec![Some(0.9)],
            EventSinks::new(32),
            Arc::clone(&diagnostics),
        );

        let mut samples = vec![0.0f32; 40_000];
        samples[20_000..36_000].copy_from_slice(&tone_samples(440.0, 16_000, 16_000, 0.5));
        let report = run_file(
            &mut p,
            SampleBuffer::new(samples, 16_000),
            "tone.wav",
            &config(),
            &diagnostics,
        )
        .unwrap();

        assert!(!report.resampled);
        assert_eq!(report.best_start, 20_000);
        let starts: Vec<u64> = report.windows.iter().map(|w| w.start).collect();
        assert_eq!(starts, vec![8_000, 12_000, 16_000, 20_000, 24_000]);

        // first window ends at 1.5 s; the rest fall inside the cooldown
        assert_eq!(report.detections.len(), 1);
        assert_eq!(report.detections[0].timestamp_ms, 1_500);
        assert_eq!(report.windows[4].elapsed_since_last_ms, 1_000);
        assert_eq!(report.failed_windows, 0);
        assert_eq!(diagnostics.snapshot().windows_scheduled, 5);
    }

    #[test]
    fn file_run_resamples_to_model_rate() {
        let diagnostics = Arc::new(PipelineDiagnostics::default());
        let (mut p, _) = processor(
            16_000,
            vec![Some(0.2)],
            EventSinks::new(8),
            Arc::clone(&diagnostics),
        );
        let buffer = SampleBuffer::new(vec![0.25; 12_000], 8_000);
        let report = run_file(&mut p, buffer, "low-rate", &config(), &diagnostics).unwrap();

        assert!(report.resampled);
        assert_eq!(report.sample_rate_in, 8_000);
        // 24_000 samples at 16 kHz: any located start walks back to 0,
        // giving windows at 0, 4_000, 8_000
        assert_eq!(report.windows.len(), 3);
        assert!(report.detections.is_empty());
    }

    #[test]
    fn capture_loop_drops_oldest_when_classifier_is_behind() {
        let (mut producer, consumer) = create_audio_ring();
        producer.push_slice(&vec![0.1; 32_000]);

        let (tx, rx) = window_handoff(2);
        let running = Arc::new(AtomicBool::new(true));
        let diagnostics = Arc::new(PipelineDiagnostics::default());
        let ctx = CaptureContext {
            consumer,
            running: Arc::clone(&running),
            capture_sample_rate: 16_000,
            model_sample_rate: 16_000,
            window_len: 16_000,
            hop_len: 4_000,
            handoff: tx,
            overruns: Arc::new(AtomicUsize::new(0)),
            diagnostics: Arc::clone(&diagnostics),
        };

        let handle = thread::spawn(move || run_capture(ctx));
        wait_until(Duration::from_secs(2), || {
            diagnostics.snapshot().windows_scheduled == 5
        });
        running.store(false, Ordering::SeqCst);
        handle.join().expect("capture thread panicked");

        let snap = diagnostics.snapshot();
        assert_eq!(snap.frames_in, 32_000);
        assert_eq!(snap.windows_dropped, 3);
        let pending: Vec<u64> = rx.try_iter().map(|w| w.start).collect();
        assert_eq!(pending, vec![12_000, 16_000]);
    }

    #[test]
    fn stopped_capture_loop_exits_while_next_session_runs() {
        let spawn_capture = |running: &Arc<AtomicBool>| {
            let (_producer, consumer) = create_audio_ring();
            let (tx, _rx) = window_handoff(2);
            let ctx = CaptureContext {
                consumer,
                running: Arc::clone(running),
                capture_sample_rate: 16_000,
                model_sample_rate: 16_000,
                window_len: 16_000,
                hop_len: 4_000,
                handoff: tx,
                overruns: Arc::new(AtomicUsize::new(0)),
                diagnostics: Arc::new(PipelineDiagnostics::default()),
            };
            thread::spawn(move || run_capture(ctx))
        };

        let old_session = Arc::new(AtomicBool::new(true));
        let old = spawn_capture(&old_session);

        old_session.store(false, Ordering::SeqCst);
        let new_session = Arc::new(AtomicBool::new(true));
        let new = spawn_capture(&new_session);

        wait_until(Duration::from_secs(2), || old.is_finished());
        old.join().expect("old capture thread panicked");
        assert!(!new.is_finished());

        new_session.store(false, Ordering::SeqCst);
        new.join().expect("new capture thread panicked");
    }

    #[test]
    fn classification_loop_runs_until_handoff_disconnects() {
        let sinks = EventSinks::new(16);
        let mut detections = sinks.detection_tx.subscribe();
        // outlives the processor so the channel stays open after the loop exits
        let _engine_sinks = sinks.clone();
        let diagnostics = Arc::new(PipelineDiagnostics::default());
        let (p, calls) = processor(4, vec![Some(0.9)], sinks, Arc::clone(&diagnostics));

        let (tx, rx) = window_handoff(2);
        let running = Arc::new(AtomicBool::new(true));
        let loop_running = Arc::clone(&running);
        let loop_diag = Arc::clone(&diagnostics);
        let handle = thread::spawn(move || run_classification(p, rx, loop_running, loop_diag));

        for start in [0u64, 2, 4] {
            tx.push(AudioWindow::new(start, vec![0.5; 4]));
            wait_until(Duration::from_secs(1), || {
                tx.pending() == 0 && *calls.lock() as u64 == start / 2 + 1
            });
        }
        drop(tx);
        handle.join().expect("classification thread panicked");

        assert_eq!(diagnostics.snapshot().windows_classified, 3);
        // wall clock: all three windows land inside one cooldown
        assert_eq!(detections.try_recv().unwrap().window_start, 0);
        assert!(matches!(detections.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn classification_loop_finishes_in_flight_window_then_stops() {
        let diagnostics = Arc::new(PipelineDiagnostics::default());
        let (p, calls) = processor(4, vec![Some(0.1)], EventSinks::new(8), Arc::clone(&diagnostics));

        let (tx, rx) = window_handoff(2);
        tx.push(AudioWindow::new(0, vec![0.0; 4]));
        tx.push(AudioWindow::new(4, vec![0.0; 4]));

        let running = Arc::new(AtomicBool::new(false));
        run_classification(p, rx, running, Arc::clone(&diagnostics));

        assert_eq!(*calls.lock(), 1);
        assert_eq!(tx.pending(), 1);
    }

    #[test]
    fn diagnostics_reset_clears_counters() {
        let d = PipelineDiagnostics::default();
        d.frames_in.fetch_add(10, Ordering::Relaxed);
        d.detections.fetch_add(1, Ordering::Relaxed);
        d.reset();
        assert_eq!(d.snapshot(), PipelineDiagnostics::default().snapshot());
    }
}
