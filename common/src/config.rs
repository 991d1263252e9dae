use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Shared configuration for the viewer and the enrollment tool.
///
/// Every section has defaults so a config file only needs the values that
/// differ on a given machine (usually `detector.api_key` and `camera.candidates`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub face: FaceConfig,
    #[serde(default)]
    pub sheety: SheetyConfig,
    #[serde(default)]
    pub dataset: DatasetConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    /// Stream URLs probed in order; the first one that yields a frame wins.
    #[serde(default = "default_candidates")]
    pub candidates: Vec<String>,
    /// "mjpeg" (multipart stream) or "polling" (single JPEG per request).
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default = "default_fps")]
    pub fps: f64,
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectorConfig {
    #[serde(default = "default_detector_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_detector_model")]
    pub model: String,
    #[serde(default = "default_detector_version")]
    pub version: u32,
    #[serde(default)]
    pub api_key: String,
    /// Minimum confidence (0..1) requested from the hosted model.
    #[serde(default = "default_confidence")]
    pub confidence: f32,
    /// Labels kept from the response. Empty keeps everything.
    #[serde(default = "default_labels")]
    pub labels: Vec<String>,
    #[serde(default = "default_interval")]
    pub interval_secs: f64,
    #[serde(default = "default_warn_after_failures")]
    pub warn_after_failures: u32,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FaceConfig {
    #[serde(default = "default_face_model")]
    pub model: String,
    #[serde(default = "default_detector_version")]
    pub version: u32,
    #[serde(default = "default_face_label")]
    pub label: String,
    #[serde(default = "default_face_interval")]
    pub interval_secs: f64,
    #[serde(default = "default_crop_size")]
    pub crop_size: u32,
    #[serde(default = "default_target_images")]
    pub target_images: u32,
    /// A face box older than this is not used for a capture.
    #[serde(default = "default_max_crop_age")]
    pub max_crop_age_secs: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SheetyConfig {
    #[serde(default = "default_sheety_base_url")]
    pub base_url: String,
    #[serde(default = "default_sheety_sheet")]
    pub sheet: String,
    /// Sent verbatim as the `Authorization` header when non-empty.
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_points")]
    pub default_points: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatasetConfig {
    #[serde(default = "default_dataset_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_model_path")]
    pub model_path: PathBuf,
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_file")]
    pub file: PathBuf,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            candidates: default_candidates(),
            mode: default_mode(),
            fps: default_fps(),
            probe_timeout_secs: default_probe_timeout(),
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            endpoint: default_detector_endpoint(),
            model: default_detector_model(),
            version: default_detector_version(),
            api_key: String::new(),
            confidence: default_confidence(),
            labels: default_labels(),
            interval_secs: default_interval(),
            warn_after_failures: default_warn_after_failures(),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

impl Default for FaceConfig {
    fn default() -> Self {
        Self {
            model: default_face_model(),
            version: default_detector_version(),
            label: default_face_label(),
            interval_secs: default_face_interval(),
            crop_size: default_crop_size(),
            target_images: default_target_images(),
            max_crop_age_secs: default_max_crop_age(),
        }
    }
}

impl Default for SheetyConfig {
    fn default() -> Self {
        Self {
            base_url: default_sheety_base_url(),
            sheet: default_sheety_sheet(),
            token: String::new(),
            default_points: default_points(),
        }
    }
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            dir: default_dataset_dir(),
            model_path: default_model_path(),
            db_path: default_db_path(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.camera.candidates.is_empty() {
            return Err(ConfigError::Invalid("camera.candidates must not be empty".into()));
        }
        for (name, secs) in [
            ("detector.interval_secs", self.detector.interval_secs),
            ("face.interval_secs", self.face.interval_secs),
            ("face.max_crop_age_secs", self.face.max_crop_age_secs),
            ("camera.probe_timeout_secs", self.camera.probe_timeout_secs),
        ] {
            seconds(name, secs)?;
        }
        if !self.camera.fps.is_finite() || self.camera.fps <= 0.0 {
            return Err(ConfigError::Invalid("camera.fps must be a positive number".into()));
        }
        seconds("1 / camera.fps", 1.0 / self.camera.fps)?;
        if self.face.crop_size == 0 {
            return Err(ConfigError::Invalid("face.crop_size must be positive".into()));
        }
        Ok(())
    }
}

/// A seconds value that converts to a `Duration` without panicking.
fn seconds(name: &str, secs: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(secs).map_err(|_| {
        ConfigError::Invalid(format!("{name} must be a non-negative number of seconds, got {secs}"))
    })
}

impl DetectorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(self.interval_secs)
    }
}

impl FaceConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(self.interval_secs)
    }

    pub fn max_crop_age(&self) -> Duration {
        Duration::from_secs_f64(self.max_crop_age_secs)
    }
}

impl CameraConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.probe_timeout_secs)
    }

    /// Time between snapshot requests in polling mode.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// Default value functions
fn default_candidates() -> Vec<String> {
    (0..4)
        .map(|idx| format!("http://127.0.0.1:{}/stream", 8080 + idx))
        .collect()
}
fn default_mode() -> String {
    "mjpeg".into()
}
fn default_fps() -> f64 {
    30.0
}
fn default_probe_timeout() -> f64 {
    5.0
}
fn default_detector_endpoint() -> String {
    "https://detect.roboflow.com".into()
}
fn default_detector_model() -> String {
    "uniform-tie-belt".into()
}
fn default_detector_version() -> u32 {
    1
}
fn default_confidence() -> f32 {
    0.4
}
fn default_labels() -> Vec<String> {
    vec!["tie".into(), "belt".into()]
}
fn default_interval() -> f64 {
    0.7
}
fn default_warn_after_failures() -> u32 {
    3
}
fn default_jpeg_quality() -> u8 {
    80
}
fn default_face_model() -> String {
    "face-detection".into()
}
fn default_face_label() -> String {
    "face".into()
}
fn default_face_interval() -> f64 {
    0.3
}
fn default_crop_size() -> u32 {
    200
}
fn default_target_images() -> u32 {
    50
}
fn default_max_crop_age() -> f64 {
    1.0
}
fn default_sheety_base_url() -> String {
    "https://api.sheety.co/eduvision/dataSiswa".into()
}
fn default_sheety_sheet() -> String {
    "studentData".into()
}
fn default_points() -> i64 {
    100
}
fn default_dataset_dir() -> PathBuf {
    PathBuf::from("dataset")
}
fn default_model_path() -> PathBuf {
    PathBuf::from("trainer.json")
}
fn default_db_path() -> PathBuf {
    PathBuf::from("students.db")
}
fn default_log_level() -> String {
    "info".into()
}
fn default_log_file() -> PathBuf {
    PathBuf::from("eduvision.log")
}
