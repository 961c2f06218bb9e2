//! Optional JSON settings file, located through `KWS_CONFIG`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use kws_core::{DetectorConfig, EngineConfig};
use serde::{Deserialize, Serialize};

pub const CONFIG_ENV: &str = "KWS_CONFIG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    pub keyword_label: String,
    pub keyword_fallback_to_best: bool,
    pub agg_windows: usize,
    pub avg_threshold: f32,
    pub cooldown_ms: u64,
    pub min_history: usize,
    pub slices_per_window: usize,
    pub target_peak: f32,
    pub locator_step_ms: u32,
    pub confidence_report_threshold: f32,
    pub handoff_capacity: usize,
    /// Print the per-label breakdown for every window.
    pub verbose_windows: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            keyword_label: engine.keyword_label,
            keyword_fallback_to_best: engine.keyword_fallback_to_best,
            agg_windows: engine.detector.agg_windows,
            avg_threshold: engine.detector.avg_threshold,
            cooldown_ms: engine.detector.cooldown_ms,
            min_history: engine.detector.min_history,
            slices_per_window: engine.slices_per_window,
            target_peak: engine.target_peak,
            locator_step_ms: engine.locator_step_ms,
            confidence_report_threshold: engine.confidence_report_threshold,
            handoff_capacity: engine.handoff_capacity,
            verbose_windows: true,
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        let keyword = self.keyword_label.trim();
        self.keyword_label = if keyword.is_empty() {
            EngineConfig::default().keyword_label
        } else {
            keyword.to_string()
        };
        self.agg_windows = self.agg_windows.clamp(1, 32);
        self.avg_threshold = self.avg_threshold.clamp(0.0, 1.0);
        self.cooldown_ms = self.cooldown_ms.min(60_000);
        self.min_history = self.min_history.clamp(1, self.agg_windows);
        self.slices_per_window = self.slices_per_window.clamp(1, 16);
        self.target_peak = self.target_peak.clamp(0.05, 1.0);
        self.locator_step_ms = self.locator_step_ms.clamp(10, 1_000);
        self.confidence_report_threshold = self.confidence_report_threshold.clamp(0.0, 1.0);
        self.handoff_capacity = self.handoff_capacity.clamp(1, 2);
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            slices_per_window: self.slices_per_window,
            keyword_label: self.keyword_label.clone(),
            keyword_fallback_to_best: self.keyword_fallback_to_best,
            target_peak: self.target_peak,
            locator_step_ms: self.locator_step_ms,
            confidence_report_threshold: self.confidence_report_threshold,
            handoff_capacity: self.handoff_capacity,
            detector: DetectorConfig {
                agg_windows: self.agg_windows,
                avg_threshold: self.avg_threshold,
                cooldown_ms: self.cooldown_ms,
                min_history: self.min_history,
            },
            ..EngineConfig::default()
        }
    }
}

/// Settings path from `KWS_CONFIG`, if set and non-empty.
pub fn settings_path_from_env() -> Option<PathBuf> {
    std::env::var_os(CONFIG_ENV)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

/// Load and normalise settings. A missing file yields defaults.
///
/// # Errors
/// The file exists but cannot be read or is not valid settings JSON.
pub fn load_settings(path: &Path) -> Result<AppSettings> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!(path = %path.display(), "settings file not found, using defaults");
            return Ok(AppSettings::default());
        }
        Err(e) => {
            return Err(e).with_context(|| format!("reading settings {}", path.display()));
        }
    };
    let mut settings: AppSettings = serde_json::from_str(&raw)
        .with_context(|| format!("parsing settings {}", path.display()))?;
    settings.normalize();
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_file(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("kws-settings-{}-{name}", std::process::id()));
        fs::write(&path, contents).expect("write temp settings");
        path
    }

    #[test]
    fn defaults_match_engine_defaults() {
        assert_eq!(AppSettings::default().engine_config(), EngineConfig::default());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let path = std::env::temp_dir().join("kws-settings-does-not-exist.json");
        assert_eq!(load_settings(&path).unwrap(), AppSettings::default());
    }

    #[test]
    fn partial_file_overrides_and_clamps() {
        let path = temp_file(
            "partial.json",
            r#"{"keywordLabel":"  marvin ","cooldownMs":800,"handoffCapacity":9,"avgThreshold":1.7,"minHistory":7}"#,
        );
        let settings = load_settings(&path).unwrap();
        let _ = fs::remove_file(&path);

        assert_eq!(settings.keyword_label, "marvin");
        assert_eq!(settings.cooldown_ms, 800);
        assert_eq!(settings.handoff_capacity, 2);
        assert_eq!(settings.avg_threshold, 1.0);
        assert_eq!(settings.min_history, 3);
        assert_eq!(settings.agg_windows, 3);

        let engine = settings.engine_config();
        engine.validate().unwrap();
        assert_eq!(engine.detector.cooldown_ms, 800);
        assert_eq!(engine.keyword_label, "marvin");
    }

    #[test]
    fn malformed_file_is_an_error() {
        let path = temp_file("bad.json", "{ not json");
        let err = load_settings(&path).unwrap_err();
        let _ = fs::remove_file(&path);
        assert!(format!("{err:#}").contains("parsing settings"));
    }

    #[test]
    fn blank_keyword_falls_back_to_default() {
        let mut settings = AppSettings {
            keyword_label: "   ".into(),
            ..AppSettings::default()
        };
        settings.normalize();
        assert_eq!(settings.keyword_label, "hey_sun");
    }
}
