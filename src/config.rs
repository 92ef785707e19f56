use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::analysis::AnalysisSettings;
use crate::capture::CaptureSettings;
use crate::event::{KeywordTable, MatchStrategy};
use crate::ingest::serial::{self, SerialSettings};
use crate::notify::NotifySettings;

const DEFAULT_MODEL_PATH: &str = "yolov8n.onnx";
const DEFAULT_MODEL_INPUT_SIZE: u32 = 640;

#[derive(Debug, Deserialize, Default)]
struct MotionConfigFile {
    serial: Option<SerialConfigFile>,
    protocol: Option<ProtocolConfigFile>,
    capture: Option<CaptureConfigFile>,
    analysis: Option<AnalysisConfigFile>,
    notify: Option<NotifyConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SerialConfigFile {
    device: Option<String>,
    baud_rate: Option<u32>,
    read_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct ProtocolConfigFile {
    mode: Option<MatchStrategy>,
    start_tokens: Option<Vec<String>>,
    end_tokens: Option<Vec<String>>,
    prefix: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    command: Option<String>,
    output_dir: Option<PathBuf>,
    file_prefix: Option<String>,
    extension: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    quality: Option<u8>,
    no_preview: Option<bool>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct AnalysisConfigFile {
    enabled: Option<bool>,
    backend: Option<DetectorKind>,
    model_path: Option<PathBuf>,
    input_size: Option<u32>,
    confidence_threshold: Option<f32>,
    target_class: Option<String>,
    max_other_objects: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct NotifyConfigFile {
    topic_url: Option<String>,
    title: Option<String>,
    priority: Option<String>,
    filename: Option<String>,
    access_token: Option<String>,
    timeout_secs: Option<u64>,
}

/// Detector backend selected for analysis.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorKind {
    Stub,
    Tract,
}

/// Overrides taken from the command line. These win over env and file.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub device: Option<String>,
    pub protocol: Option<MatchStrategy>,
}

#[derive(Debug, Clone)]
pub struct MotionConfig {
    pub serial: SerialSettings,
    pub protocol: ProtocolSettings,
    pub capture: CaptureSettings,
    pub analysis: AnalysisConfig,
    pub notify: NotifySettings,
}

#[derive(Debug, Clone)]
pub struct ProtocolSettings {
    pub strategy: MatchStrategy,
    pub keywords: KeywordTable,
}

#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    pub enabled: bool,
    pub backend: DetectorKind,
    pub model_path: Option<PathBuf>,
    pub input_size: u32,
    pub settings: AnalysisSettings,
}

impl MotionConfig {
    /// Loads configuration: defaults, then the config file at `path`, then
    /// `MOTION_*` environment variables, then `overrides`.
    pub fn load(path: Option<&Path>, overrides: &ConfigOverrides) -> Result<Self> {
        let mut file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => MotionConfigFile::default(),
        };
        // The protocol picks profile defaults, so it is resolved first.
        if let Some(protocol) = overrides.protocol {
            file_cfg.protocol.get_or_insert_with(Default::default).mode = Some(protocol);
        }

        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        if let Some(device) = overrides.device.as_deref() {
            if !device.trim().is_empty() {
                cfg.serial.device = PathBuf::from(device);
            }
        }
        cfg.validate()?;
        Ok(cfg)
    }

    /// Defaults for a protocol profile, without file or env input.
    pub fn defaults_for(strategy: MatchStrategy) -> Self {
        let file = MotionConfigFile {
            protocol: Some(ProtocolConfigFile {
                mode: Some(strategy),
                ..Default::default()
            }),
            ..Default::default()
        };
        Self::from_file(file)
    }

    fn from_file(file: MotionConfigFile) -> Self {
        let serial_file = file.serial.unwrap_or_default();
        let mut serial = SerialSettings::default();
        if let Some(device) = serial_file.device {
            serial.device = PathBuf::from(device);
        }
        if let Some(baud_rate) = serial_file.baud_rate {
            serial.baud_rate = baud_rate;
        }
        if let Some(ms) = serial_file.read_timeout_ms {
            serial.read_timeout = Duration::from_millis(ms);
        }

        let protocol_file = file.protocol.unwrap_or_default();
        let strategy = protocol_file.mode.unwrap_or(MatchStrategy::Fragment);
        let profile = KeywordTable::defaults_for(strategy);
        let protocol = ProtocolSettings {
            strategy,
            keywords: KeywordTable {
                start: protocol_file.start_tokens.unwrap_or(profile.start),
                end: protocol_file.end_tokens.unwrap_or(profile.end),
                prefix: protocol_file.prefix.unwrap_or(profile.prefix),
            },
        };

        // The strict profile keeps its own file naming and quality.
        let mut capture = CaptureSettings::default();
        if strategy == MatchStrategy::Exact {
            capture.file_prefix = "intruder_".to_string();
            capture.quality = 85;
        }
        let capture_file = file.capture.unwrap_or_default();
        if let Some(command) = capture_file.command {
            capture.command = command;
        }
        if let Some(output_dir) = capture_file.output_dir {
            capture.output_dir = output_dir;
        }
        if let Some(file_prefix) = capture_file.file_prefix {
            capture.file_prefix = file_prefix;
        }
        if let Some(extension) = capture_file.extension {
            capture.extension = extension;
        }
        if let Some(width) = capture_file.width {
            capture.width = width;
        }
        if let Some(height) = capture_file.height {
            capture.height = height;
        }
        if let Some(quality) = capture_file.quality {
            capture.quality = quality;
        }
        if let Some(no_preview) = capture_file.no_preview {
            capture.no_preview = no_preview;
        }
        if let Some(secs) = capture_file.timeout_secs {
            capture.timeout = Some(Duration::from_secs(secs));
        }

        let analysis_file = file.analysis.unwrap_or_default();
        let mut settings = AnalysisSettings::default();
        if let Some(threshold) = analysis_file.confidence_threshold {
            settings.confidence_threshold = threshold;
        }
        if let Some(target_class) = analysis_file.target_class {
            settings.target_class = target_class;
        }
        if let Some(max_other_objects) = analysis_file.max_other_objects {
            settings.max_other_objects = max_other_objects;
        }
        let analysis = AnalysisConfig {
            enabled: analysis_file.enabled.unwrap_or(false),
            backend: analysis_file.backend.unwrap_or(DetectorKind::Tract),
            model_path: analysis_file.model_path,
            input_size: analysis_file.input_size.unwrap_or(DEFAULT_MODEL_INPUT_SIZE),
            settings,
        };

        let notify_file = file.notify.unwrap_or_default();
        let mut notify = NotifySettings::default();
        if let Some(topic_url) = notify_file.topic_url {
            notify.topic_url = topic_url;
        }
        if let Some(title) = notify_file.title {
            notify.title = title;
        }
        if let Some(priority) = notify_file.priority {
            notify.priority = priority;
        }
        if let Some(filename) = notify_file.filename {
            notify.filename = filename;
        }
        notify.access_token = notify_file.access_token;
        if let Some(secs) = notify_file.timeout_secs {
            notify.timeout = Duration::from_secs(secs);
        }

        Self {
            serial,
            protocol,
            capture,
            analysis,
            notify,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(device) = env_value("MOTION_SERIAL_DEVICE") {
            self.serial.device = PathBuf::from(device);
        }
        if let Some(baud) = env_value("MOTION_BAUD_RATE") {
            self.serial.baud_rate = baud
                .parse()
                .map_err(|_| anyhow!("MOTION_BAUD_RATE must be an integer"))?;
        }
        if let Some(url) = env_value("MOTION_NTFY_URL") {
            self.notify.topic_url = url;
        }
        if let Some(token) = env_value("MOTION_NTFY_TOKEN") {
            self.notify.access_token = Some(token);
        }
        if let Some(dir) = env_value("MOTION_OUTPUT_DIR") {
            self.capture.output_dir = PathBuf::from(dir);
        }
        if let Some(threshold) = env_value("MOTION_CONFIDENCE_THRESHOLD") {
            self.analysis.settings.confidence_threshold = threshold.parse().map_err(|_| {
                anyhow!("MOTION_CONFIDENCE_THRESHOLD must be a number between 0 and 1")
            })?;
        }
        if let Some(enabled) = env_value("MOTION_ANALYSIS_ENABLED") {
            self.analysis.enabled = parse_bool(&enabled)
                .ok_or_else(|| anyhow!("MOTION_ANALYSIS_ENABLED must be true or false"))?;
        }
        if let Some(path) = env_value("MOTION_MODEL_PATH") {
            self.analysis.model_path = Some(PathBuf::from(path));
        }
        if let Some(tokens) = env_value("MOTION_START_TOKENS") {
            let parsed = split_csv(&tokens);
            if !parsed.is_empty() {
                self.protocol.keywords.start = parsed;
            }
        }
        if let Some(tokens) = env_value("MOTION_END_TOKENS") {
            let parsed = split_csv(&tokens);
            if !parsed.is_empty() {
                self.protocol.keywords.end = parsed;
            }
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.serial.device.as_os_str().is_empty() {
            return Err(anyhow!("serial device must not be empty"));
        }
        serial::validate_baud_rate(self.serial.baud_rate)?;
        if self.serial.read_timeout.is_zero() {
            return Err(anyhow!("serial read timeout must be greater than zero"));
        }

        self.protocol.keywords.validate()?;

        if self.capture.command.trim().is_empty() {
            return Err(anyhow!("capture command must not be empty"));
        }
        if self.capture.width == 0 || self.capture.height == 0 {
            return Err(anyhow!("capture width and height must be greater than zero"));
        }
        if !(1..=100).contains(&self.capture.quality) {
            return Err(anyhow!("capture quality must be between 1 and 100"));
        }
        if self.capture.timeout.is_some_and(|timeout| timeout.is_zero()) {
            return Err(anyhow!("capture timeout must be greater than zero when set"));
        }

        let threshold = self.analysis.settings.confidence_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(anyhow!(
                "confidence threshold must be between 0 and 1 (got {})",
                threshold
            ));
        }
        if self.analysis.enabled && self.analysis.backend == DetectorKind::Tract {
            let model_path = self
                .analysis
                .model_path
                .get_or_insert_with(|| PathBuf::from(DEFAULT_MODEL_PATH));
            if model_path.as_os_str().is_empty() {
                return Err(anyhow!("analysis.model_path must not be empty"));
            }
        }

        let topic = url::Url::parse(&self.notify.topic_url)
            .map_err(|e| anyhow!("invalid notify topic url {}: {}", self.notify.topic_url, e))?;
        if !matches!(topic.scheme(), "http" | "https") {
            return Err(anyhow!(
                "notify topic url must be http or https (got {})",
                topic.scheme()
            ));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<MotionConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg: MotionConfigFile = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragment_profile_defaults() {
        let cfg = MotionConfig::defaults_for(MatchStrategy::Fragment);
        assert_eq!(cfg.serial.device, PathBuf::from("/dev/rfcomm0"));
        assert_eq!(cfg.serial.baud_rate, 9600);
        assert_eq!(cfg.protocol.keywords.start, vec!["STARTED", "OINSA", "OINT"]);
        assert_eq!(cfg.protocol.keywords.end, vec!["ENDED", "MTO_NE", "OINE"]);
        assert_eq!(cfg.capture.file_prefix, "Image_");
        assert_eq!(cfg.capture.quality, 50);
        assert!(cfg.capture.timeout.is_none());
        assert!(!cfg.analysis.enabled);

        let capture = CaptureSettings::default();
        assert_eq!(cfg.capture.command, capture.command);
        assert_eq!(cfg.capture.output_dir, capture.output_dir);
        assert_eq!((cfg.capture.width, cfg.capture.height), (640, 480));
        assert_eq!(cfg.serial.read_timeout, serial::DEFAULT_READ_TIMEOUT);
        assert_eq!(cfg.notify.topic_url, NotifySettings::default().topic_url);
    }

    #[test]
    fn exact_profile_defaults() {
        let cfg = MotionConfig::defaults_for(MatchStrategy::Exact);
        assert_eq!(cfg.protocol.keywords.start, vec!["EVENT:MOTION_STARTED"]);
        assert_eq!(cfg.protocol.keywords.end, vec!["EVENT:MOTION_ENDED"]);
        assert_eq!(cfg.protocol.keywords.prefix, "EVENT:");
        assert_eq!(cfg.capture.file_prefix, "intruder_");
        assert_eq!(cfg.capture.quality, 85);
        assert_eq!(cfg.analysis.settings.confidence_threshold, 0.4);
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut cfg = MotionConfig::defaults_for(MatchStrategy::Fragment);
        assert!(cfg.validate().is_ok());

        cfg.analysis.settings.confidence_threshold = 1.5;
        assert!(cfg.validate().is_err());

        let mut cfg = MotionConfig::defaults_for(MatchStrategy::Fragment);
        cfg.notify.topic_url = "ftp://example.com/topic".to_string();
        assert!(cfg.validate().is_err());

        let mut cfg = MotionConfig::defaults_for(MatchStrategy::Fragment);
        cfg.capture.quality = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = MotionConfig::defaults_for(MatchStrategy::Fragment);
        cfg.serial.baud_rate = 12345;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn tract_analysis_gets_default_model_path() {
        let mut cfg = MotionConfig::defaults_for(MatchStrategy::Exact);
        cfg.analysis.enabled = true;
        cfg.validate().unwrap();
        assert_eq!(cfg.analysis.model_path, Some(PathBuf::from("yolov8n.onnx")));
    }

    #[test]
    fn parses_flags_and_lists() {
        assert_eq!(parse_bool("Yes"), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
        assert_eq!(split_csv(" STARTED, ,OINT "), vec!["STARTED", "OINT"]);
    }
}
