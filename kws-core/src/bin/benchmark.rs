//! Offline evaluation over a directory of WAV fixtures.
//!
//! ```text
//! cargo run -p kws-core --bin benchmark -- \
//!   [--fixtures <dir>] [--iterations <n>] [--output <file.json>] [--generate]
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use kws_core::{
    audio::{synth, wav},
    ClassifierHandle, EngineConfig, FileReport, KwsEngine, SampleBuffer, StubClassifier,
};
use rand::{rngs::StdRng, SeedableRng};
use serde::Serialize;

const FIXTURE_RATE: u32 = 16_000;
const FIXTURE_SECS: f32 = 1.0;

#[derive(Debug)]
struct Args {
    fixtures_dir: PathBuf,
    iterations: usize,
    output: Option<PathBuf>,
    generate: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct CaseResult {
    file: String,
    iteration: usize,
    windows: usize,
    detections: usize,
    failed_windows: usize,
    best_label: Option<String>,
    error: Option<String>,
    p50_latency_ms: f64,
    p95_latency_ms: f64,
    avg_latency_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct FileSummary {
    file: String,
    runs: usize,
    windows: usize,
    detections: usize,
    failures: usize,
    p50_latency_ms: f64,
    p95_latency_ms: f64,
    avg_latency_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct Summary {
    fixtures_dir: String,
    iterations: usize,
    total_files: usize,
    total_runs: usize,
    total_windows: usize,
    total_detections: usize,
    total_failures: usize,
    p50_latency_ms: f64,
    p95_latency_ms: f64,
    avg_latency_ms: f64,
    files: Vec<FileSummary>,
    cases: Vec<CaseResult>,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("benchmark failed: {e:#}");
        std::process::exit(1);
    }
}

fn parse_args() -> Result<Args> {
    let mut fixtures_dir: Option<PathBuf> = None;
    let mut iterations: usize = 1;
    let mut output: Option<PathBuf> = None;
    let mut generate = false;

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--fixtures" => {
                let Some(v) = it.next() else {
                    bail!("missing value for --fixtures");
                };
                fixtures_dir = Some(PathBuf::from(v));
            }
            "--iterations" => {
                let Some(v) = it.next() else {
                    bail!("missing value for --iterations");
                };
                iterations = v
                    .parse::<usize>()
                    .with_context(|| format!("invalid value for --iterations: {v}"))?
                    .clamp(1, 10);
            }
            "--output" => {
                let Some(v) = it.next() else {
                    bail!("missing value for --output");
                };
                output = Some(PathBuf::from(v));
            }
            "--generate" => generate = true,
            "--help" | "-h" => {
                println!(
                    "Usage: cargo run -p kws-core --bin benchmark -- \\
  [--fixtures <dir>] [--iterations <n>] [--output <file.json>] [--generate]"
                );
                std::process::exit(0);
            }
            other => bail!("unknown argument: {other}"),
        }
    }

    Ok(Args {
        fixtures_dir: fixtures_dir.unwrap_or_else(|| PathBuf::from("benchmarks/fixtures")),
        iterations,
        output,
        generate,
    })
}

/// Write the six reference fixtures into `dir`.
fn generate_fixtures(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("creating fixtures directory {}", dir.display()))?;
    let mut rng = StdRng::seed_from_u64(0x6b77_73);
    let fixtures = [
        ("440hz_tone.wav", synth::tone(440.0, FIXTURE_SECS, FIXTURE_RATE, 0.5)),
        ("1000hz_tone.wav", synth::tone(1_000.0, FIXTURE_SECS, FIXTURE_RATE, 0.5)),
        ("white_noise.wav", synth::white_noise(FIXTURE_SECS, FIXTURE_RATE, 0.1, &mut rng)),
        ("silence.wav", synth::silence(FIXTURE_SECS, FIXTURE_RATE)),
        ("quiet_noise.wav", synth::white_noise(FIXTURE_SECS, FIXTURE_RATE, 0.05, &mut rng)),
        ("loud_noise.wav", synth::white_noise(FIXTURE_SECS, FIXTURE_RATE, 0.3, &mut rng)),
    ];
    for (name, samples) in fixtures {
        let path = dir.join(name);
        wav::write_wav(&path, &SampleBuffer::new(samples, FIXTURE_RATE))
            .with_context(|| format!("writing {}", path.display()))?;
        println!("Generated: {}", path.display());
    }
    Ok(())
}

fn collect_wavs(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("reading directory {}", dir.display()))?;
    for entry in entries {
        let path = entry?.path();
        if path.is_dir() {
            collect_wavs(&path, out)?;
            continue;
        }
        let is_wav = path
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.eq_ignore_ascii_case("wav"))
            .unwrap_or(false);
        if is_wav {
            out.push(path);
        }
    }
    Ok(())
}

fn percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let idx = ((sorted.len() - 1) as f64 * p.clamp(0.0, 1.0)).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn latencies(report: &FileReport) -> Vec<f64> {
    report.windows.iter().map(|w| w.inference_ms).collect()
}

fn case_from(file: &str, iteration: usize, outcome: &kws_core::Result<FileReport>) -> CaseResult {
    match outcome {
        Ok(report) => {
            let lat = latencies(report);
            CaseResult {
                file: file.to_string(),
                iteration,
                windows: report.windows.len(),
                detections: report.detections.len(),
                failed_windows: report.failed_windows,
                best_label: report.windows.first().map(|w| w.best_label.clone()),
                error: None,
                p50_latency_ms: percentile(&lat, 0.50),
                p95_latency_ms: percentile(&lat, 0.95),
                avg_latency_ms: mean(&lat),
            }
        }
        Err(e) => CaseResult {
            file: file.to_string(),
            iteration,
            windows: 0,
            detections: 0,
            failed_windows: 0,
            best_label: None,
            error: Some(e.to_string()),
            p50_latency_ms: 0.0,
            p95_latency_ms: 0.0,
            avg_latency_ms: 0.0,
        },
    }
}

fn run() -> Result<()> {
    let args = parse_args()?;
    if args.generate {
        generate_fixtures(&args.fixtures_dir)?;
    }
    if !args.fixtures_dir.exists() {
        bail!(
            "fixtures directory not found: {} (use --generate)",
            args.fixtures_dir.display()
        );
    }

    let mut wav_files = Vec::new();
    collect_wavs(&args.fixtures_dir, &mut wav_files)?;
    wav_files.sort();
    if wav_files.is_empty() {
        bail!("no .wav fixtures found in {}", args.fixtures_dir.display());
    }

    println!(
        "Running keyword-spotting benchmark on {} fixtures (iterations={})",
        wav_files.len(),
        args.iterations
    );

    let engine = KwsEngine::new(
        EngineConfig::default(),
        ClassifierHandle::new(StubClassifier::default()),
    )
    .context("building engine")?;
    engine.warm_up().context("warming up classifier")?;

    let mut cases = Vec::new();
    let mut per_file_latency: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for wav_path in &wav_files {
        let file = wav_path
            .strip_prefix(&args.fixtures_dir)
            .unwrap_or(wav_path)
            .display()
            .to_string();

        for iteration in 1..=args.iterations {
            let outcome = engine.analyze_wav(wav_path);
            if let Ok(report) = &outcome {
                per_file_latency
                    .entry(file.clone())
                    .or_default()
                    .extend(latencies(report));
            }
            let case = case_from(&file, iteration, &outcome);
            match &case.error {
                None => println!(
                    "{file} [{iteration}/{iters}] windows={} detections={} p50={:.2} ms",
                    case.windows,
                    case.detections,
                    case.p50_latency_ms,
                    iters = args.iterations,
                ),
                Some(err) => println!("{file} [{iteration}/{iters}] FAILED: {err}", iters = args.iterations),
            }
            cases.push(case);
        }
    }

    let mut grouped: BTreeMap<String, Vec<&CaseResult>> = BTreeMap::new();
    for case in &cases {
        grouped.entry(case.file.clone()).or_default().push(case);
    }
    let files: Vec<FileSummary> = grouped
        .into_iter()
        .map(|(file, rows)| {
            let lat = per_file_latency.get(&file).cloned().unwrap_or_default();
            FileSummary {
                runs: rows.len(),
                windows: rows.iter().map(|r| r.windows).sum(),
                detections: rows.iter().map(|r| r.detections).sum(),
                failures: rows
                    .iter()
                    .map(|r| r.failed_windows + usize::from(r.error.is_some()))
                    .sum(),
                p50_latency_ms: percentile(&lat, 0.50),
                p95_latency_ms: percentile(&lat, 0.95),
                avg_latency_ms: mean(&lat),
                file,
            }
        })
        .collect();

    let all_latencies: Vec<f64> = per_file_latency.values().flatten().copied().collect();
    let summary = Summary {
        fixtures_dir: args.fixtures_dir.display().to_string(),
        iterations: args.iterations,
        total_files: wav_files.len(),
        total_runs: cases.len(),
        total_windows: files.iter().map(|f| f.windows).sum(),
        total_detections: files.iter().map(|f| f.detections).sum(),
        total_failures: files.iter().map(|f| f.failures).sum(),
        p50_latency_ms: percentile(&all_latencies, 0.50),
        p95_latency_ms: percentile(&all_latencies, 0.95),
        avg_latency_ms: mean(&all_latencies),
        files,
        cases,
    };

    println!(
        "Done. runs={} windows={} detections={} p50={:.2}ms p95={:.2}ms",
        summary.total_runs,
        summary.total_windows,
        summary.total_detections,
        summary.p50_latency_ms,
        summary.p95_latency_ms
    );

    let json = serde_json::to_string_pretty(&summary)?;
    if let Some(out) = args.output {
        if let Some(parent) = out.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&out, json).with_context(|| format!("writing {}", out.display()))?;
        println!("Wrote benchmark report: {}", out.display());
    } else {
        println!("{json}");
    }

    Ok(())
}
