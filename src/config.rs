use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::aggregate::TriggerMode;

const DEFAULT_MODEL_PATH: &str = "detect.onnx";
const DEFAULT_LABELS_PATH: &str = "coco_labels.txt";
const DEFAULT_THRESHOLD: f32 = 0.6;
const DEFAULT_PERSON_CLASS: u32 = 0;
const DEFAULT_MODEL_INPUT: u32 = 300;
const DEFAULT_CAMERA_DEVICE: &str = "/dev/video0";
const DEFAULT_CAMERA_WIDTH: u32 = 640;
const DEFAULT_CAMERA_HEIGHT: u32 = 480;
const DEFAULT_CAMERA_FPS: u32 = 30;
const DEFAULT_WARM_UP_MS: u64 = 2_000;
const DEFAULT_COLLECTION_LIMIT: usize = 5;
const DEFAULT_CAPTURE_INTERVAL_MS: u64 = 10_000;
const DEFAULT_REPORT_INTERVAL_MS: u64 = 1_000;
const DEFAULT_UPLOAD_TIMEOUT_MS: u64 = 2_000;
const MAX_UPLOAD_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_BUTTON_PIN: u32 = 17;
const DEFAULT_LED_PIN: u32 = 4;
const DEFAULT_SYSFS_ROOT: &str = "/sys/class/gpio";
const DEFAULT_DEBOUNCE_MS: u64 = 50;
const DEFAULT_PREVIEW_PATH: &str = "preview.jpg";

#[derive(Debug, Deserialize, Default)]
struct CounterConfigFile {
    model_path: Option<PathBuf>,
    labels_path: Option<PathBuf>,
    threshold: Option<f32>,
    person_class: Option<u32>,
    model_input: Option<SizeFile>,
    collection_limit: Option<usize>,
    trigger: Option<TriggerMode>,
    watch: Option<bool>,
    capture_interval_ms: Option<u64>,
    report_interval_ms: Option<u64>,
    start_running: Option<bool>,
    preview_path: Option<PathBuf>,
    camera: Option<CameraConfigFile>,
    upload: Option<UploadConfigFile>,
    gpio: Option<GpioConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SizeFile {
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    device: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
    warm_up_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct UploadConfigFile {
    endpoint: Option<String>,
    username: Option<String>,
    password: Option<String>,
    timeout_ms: Option<u64>,
    statistic_key: Option<StatisticKey>,
}

#[derive(Debug, Deserialize, Default)]
struct GpioConfigFile {
    /// `false` disables the hardware button.
    button: Option<bool>,
    button_pin: Option<u32>,
    /// `false` disables the hardware indicator.
    led: Option<bool>,
    led_pin: Option<u32>,
    /// Pressed reads as 0 (button to ground with pull-up).
    button_active_low: Option<bool>,
    sysfs_root: Option<PathBuf>,
    debounce_ms: Option<u64>,
}

/// Wire key carrying the order statistic in upload records.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatisticKey {
    #[default]
    Mode,
    Average,
}

impl StatisticKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatisticKey::Mode => "mode",
            StatisticKey::Average => "average",
        }
    }
}

impl std::str::FromStr for StatisticKey {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mode" => Ok(StatisticKey::Mode),
            "average" => Ok(StatisticKey::Average),
            other => Err(anyhow!(
                "statistic key must be 'mode' or 'average', got '{}'",
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CounterConfig {
    pub detector: DetectorSettings,
    pub camera: CameraSettings,
    pub aggregation: AggregationSettings,
    pub upload: UploadSettings,
    pub gpio: GpioSettings,
    /// Continuous capture with annotated preview.
    pub watch: bool,
    /// Delay after each capture cycle.
    pub capture_interval: Duration,
    /// Press the switch once at start-up.
    pub start_running: bool,
    pub preview_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    /// Model file; `stub://` selects the stub engine.
    pub model_path: PathBuf,
    pub labels_path: PathBuf,
    pub threshold: f32,
    /// Model class id counted as a person (0 in COCO-trained SSD models).
    pub person_class: u32,
    pub input_width: u32,
    pub input_height: u32,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    /// Device path (e.g., "/dev/video0"); `stub://` selects synthetic frames.
    pub device: String,
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
    /// Settle delay between opening the device and the first capture.
    pub warm_up: Duration,
}

#[derive(Debug, Clone)]
pub struct AggregationSettings {
    pub collection_limit: usize,
    /// Explicit trigger; `None` derives it from watch mode.
    pub trigger: Option<TriggerMode>,
    pub report_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct UploadSettings {
    /// `None` means samples are only logged.
    pub endpoint: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout: Duration,
    pub statistic_key: StatisticKey,
}

#[derive(Debug, Clone)]
pub struct GpioSettings {
    /// BCM pin of the push button; `None` runs without a hardware button.
    pub button_pin: Option<u32>,
    /// BCM pin of the indicator LED; `None` only logs state changes.
    pub led_pin: Option<u32>,
    pub button_active_low: bool,
    pub sysfs_root: PathBuf,
    pub debounce: Duration,
}

/// Command-line overrides, applied after file and environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub model_path: Option<PathBuf>,
    pub labels_path: Option<PathBuf>,
    pub threshold: Option<f32>,
    pub watch: Option<bool>,
    pub collection_limit: Option<usize>,
    pub trigger: Option<TriggerMode>,
    pub device: Option<String>,
    pub capture_interval: Option<Duration>,
    pub endpoint: Option<String>,
    pub start_running: Option<bool>,
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self::from_file(CounterConfigFile::default())
    }
}

impl CounterConfig {
    /// Defaults, then the file named by `COUNTER_CONFIG`, then environment.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("COUNTER_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: CounterConfigFile) -> Self {
        let camera = file.camera.unwrap_or_default();
        let upload = file.upload.unwrap_or_default();
        let gpio = file.gpio.unwrap_or_default();
        let model_input = file.model_input.unwrap_or_default();

        let detector = DetectorSettings {
            model_path: file
                .model_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH)),
            labels_path: file
                .labels_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LABELS_PATH)),
            threshold: file.threshold.unwrap_or(DEFAULT_THRESHOLD),
            person_class: file.person_class.unwrap_or(DEFAULT_PERSON_CLASS),
            input_width: model_input.width.unwrap_or(DEFAULT_MODEL_INPUT),
            input_height: model_input.height.unwrap_or(DEFAULT_MODEL_INPUT),
        };
        let camera = CameraSettings {
            device: camera
                .device
                .unwrap_or_else(|| DEFAULT_CAMERA_DEVICE.to_string()),
            target_fps: camera.target_fps.unwrap_or(DEFAULT_CAMERA_FPS),
            width: camera.width.unwrap_or(DEFAULT_CAMERA_WIDTH),
            height: camera.height.unwrap_or(DEFAULT_CAMERA_HEIGHT),
            warm_up: Duration::from_millis(camera.warm_up_ms.unwrap_or(DEFAULT_WARM_UP_MS)),
        };
        let aggregation = AggregationSettings {
            collection_limit: file.collection_limit.unwrap_or(DEFAULT_COLLECTION_LIMIT),
            trigger: file.trigger,
            report_interval: Duration::from_millis(
                file.report_interval_ms.unwrap_or(DEFAULT_REPORT_INTERVAL_MS),
            ),
        };
        let upload = UploadSettings {
            endpoint: upload.endpoint,
            username: upload.username,
            password: upload.password,
            timeout: Duration::from_millis(upload.timeout_ms.unwrap_or(DEFAULT_UPLOAD_TIMEOUT_MS)),
            statistic_key: upload.statistic_key.unwrap_or_default(),
        };
        let gpio = GpioSettings {
            button_pin: match gpio.button {
                Some(false) => None,
                _ => Some(gpio.button_pin.unwrap_or(DEFAULT_BUTTON_PIN)),
            },
            led_pin: match gpio.led {
                Some(false) => None,
                _ => Some(gpio.led_pin.unwrap_or(DEFAULT_LED_PIN)),
            },
            button_active_low: gpio.button_active_low.unwrap_or(true),
            sysfs_root: gpio
                .sysfs_root
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SYSFS_ROOT)),
            debounce: Duration::from_millis(gpio.debounce_ms.unwrap_or(DEFAULT_DEBOUNCE_MS)),
        };

        Self {
            detector,
            camera,
            aggregation,
            upload,
            gpio,
            watch: file.watch.unwrap_or(false),
            capture_interval: Duration::from_millis(
                file.capture_interval_ms
                    .unwrap_or(DEFAULT_CAPTURE_INTERVAL_MS),
            ),
            start_running: file.start_running.unwrap_or(false),
            preview_path: file
                .preview_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_PREVIEW_PATH)),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(route) = non_empty_env("COUNTER_POST_DATA_ROUTE") {
            self.upload.endpoint = Some(route);
        }
        if let Some(user) = non_empty_env("COUNTER_USER") {
            self.upload.username = Some(user);
        }
        if let Some(password) = non_empty_env("COUNTER_PASSWORD") {
            self.upload.password = Some(password);
        }
        if let Some(model) = non_empty_env("COUNTER_MODEL") {
            self.detector.model_path = PathBuf::from(model);
        }
        if let Some(labels) = non_empty_env("COUNTER_LABELS") {
            self.detector.labels_path = PathBuf::from(labels);
        }
        if let Some(threshold) = non_empty_env("COUNTER_THRESHOLD") {
            self.detector.threshold = threshold
                .parse()
                .map_err(|_| anyhow!("COUNTER_THRESHOLD must be a number between 0 and 1"))?;
        }
        if let Some(device) = non_empty_env("COUNTER_CAMERA_DEVICE") {
            self.camera.device = device;
        }
        Ok(())
    }

    /// Apply command-line overrides and re-validate.
    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) -> Result<()> {
        if let Some(path) = overrides.model_path {
            self.detector.model_path = path;
        }
        if let Some(path) = overrides.labels_path {
            self.detector.labels_path = path;
        }
        if let Some(threshold) = overrides.threshold {
            self.detector.threshold = threshold;
        }
        if let Some(watch) = overrides.watch {
            self.watch = watch;
        }
        if let Some(limit) = overrides.collection_limit {
            self.aggregation.collection_limit = limit;
        }
        if let Some(trigger) = overrides.trigger {
            self.aggregation.trigger = Some(trigger);
        }
        if let Some(device) = overrides.device {
            self.camera.device = device;
        }
        if let Some(interval) = overrides.capture_interval {
            self.capture_interval = interval;
        }
        if let Some(endpoint) = overrides.endpoint {
            self.upload.endpoint = Some(endpoint);
        }
        if let Some(start_running) = overrides.start_running {
            self.start_running = start_running;
        }
        self.validate()
    }

    /// Effective trigger mode: explicit setting, else timer-driven in watch mode.
    pub fn trigger_mode(&self) -> TriggerMode {
        self.aggregation.trigger.unwrap_or(if self.watch {
            TriggerMode::OnTimer
        } else {
            TriggerMode::OnPushFull
        })
    }

    fn validate(&mut self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.detector.threshold) {
            return Err(anyhow!(
                "threshold must be between 0 and 1, got {}",
                self.detector.threshold
            ));
        }
        if self.detector.input_width == 0 || self.detector.input_height == 0 {
            return Err(anyhow!("model input dimensions must be greater than zero"));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera resolution must be greater than zero"));
        }
        if self.aggregation.collection_limit == 0 {
            return Err(anyhow!("collection_limit must be at least 1"));
        }
        if self.aggregation.report_interval.is_zero() {
            return Err(anyhow!("report interval must be greater than zero"));
        }
        let timeout_ms = self.upload.timeout.as_millis() as u64;
        if timeout_ms == 0 || timeout_ms > MAX_UPLOAD_TIMEOUT_MS {
            return Err(anyhow!(
                "upload timeout must be within 1..={} ms, got {}",
                MAX_UPLOAD_TIMEOUT_MS,
                timeout_ms
            ));
        }
        if let Some(endpoint) = self.upload.endpoint.as_deref() {
            let url = url::Url::parse(endpoint)
                .map_err(|e| anyhow!("invalid upload endpoint '{}': {}", endpoint, e))?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(anyhow!(
                    "upload endpoint must be http(s), got '{}'",
                    url.scheme()
                ));
            }
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<CounterConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path.extension().is_some_and(|ext| ext == "toml");
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}
