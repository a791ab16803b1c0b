//! Daemon configuration: a TOML file with `ROLLCALL_*` environment
//! overrides on top of built-in defaults.

use rollcall_engine::SessionSettings;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub models: ModelsConfig,
    pub recognition: RecognitionConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    /// Directory containing the ONNX model files.
    pub dir: PathBuf,
    pub scrfd: String,
    pub yunet: String,
    pub arcface: String,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("models"),
            scrfd: "det_10g.onnx".to_string(),
            yunet: "face_detection_yunet_2023mar.onnx".to_string(),
            arcface: "w600k_r50.onnx".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    /// Acceptance threshold on the mapped confidence scale, [50, 95].
    pub threshold_percent: f32,
    pub active_detectors: Vec<String>,
    /// Trust order for equal-confidence merge ties, most trusted first.
    pub trust_order: Vec<String>,
    pub max_faces: usize,
    pub merge_iou: f32,
    pub detector_timeout_secs: u64,
    pub encoder_timeout_secs: u64,
    pub liveness_min_frames: usize,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            threshold_percent: 70.0,
            active_detectors: vec!["scrfd".to_string(), "yunet".to_string()],
            trust_order: vec!["scrfd".to_string(), "yunet".to_string()],
            max_faces: 3,
            merge_iou: 0.5,
            detector_timeout_secs: 5,
            encoder_timeout_secs: 5,
            liveness_min_frames: 3,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the gallery database; defaults to the XDG data directory.
    pub db_path: Option<PathBuf>,
}

impl Config {
    /// Load from the file named by `ROLLCALL_CONFIG` (default
    /// `rollcall.toml` when present), then apply environment overrides.
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("ROLLCALL_CONFIG").unwrap_or_else(|_| "rollcall.toml".to_string());

        let mut config = if std::path::Path::new(&path).exists() {
            let content = std::fs::read_to_string(&path)?;
            let config: Config = toml::from_str(&content)?;
            tracing::info!(path, "configuration loaded");
            config
        } else {
            tracing::info!("no configuration file, using defaults");
            Config::default()
        };

        if let Ok(dir) = std::env::var("ROLLCALL_MODEL_DIR") {
            config.models.dir = PathBuf::from(dir);
        }
        if let Ok(db) = std::env::var("ROLLCALL_DB_PATH") {
            config.storage.db_path = Some(PathBuf::from(db));
        }
        if let Some(threshold) = env_f32("ROLLCALL_THRESHOLD") {
            config.recognition.threshold_percent = threshold;
        }

        Ok(config)
    }

    pub fn scrfd_model_path(&self) -> String {
        self.model_path(&self.models.scrfd)
    }

    pub fn yunet_model_path(&self) -> String {
        self.model_path(&self.models.yunet)
    }

    pub fn arcface_model_path(&self) -> String {
        self.model_path(&self.models.arcface)
    }

    fn model_path(&self, file: &str) -> String {
        self.models.dir.join(file).to_string_lossy().into_owned()
    }

    /// Gallery database path, defaulting under the XDG data directory.
    pub fn db_path(&self) -> PathBuf {
        if let Some(path) = &self.storage.db_path {
            return path.clone();
        }
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("rollcall");
        data_dir.join("gallery.db")
    }

    /// Initial session settings derived from the recognition section.
    pub fn session_settings(&self) -> SessionSettings {
        let mut settings = SessionSettings::default();
        settings.threshold_percent = self.recognition.threshold_percent;
        settings.active_detectors = self.recognition.active_detectors.clone();
        settings.merge.trust_order = self.recognition.trust_order.clone();
        settings.merge.max_faces = self.recognition.max_faces;
        settings.merge.iou_threshold = self.recognition.merge_iou;
        settings.detector_timeout = Duration::from_secs(self.recognition.detector_timeout_secs);
        settings.encoder_timeout = Duration::from_secs(self.recognition.encoder_timeout_secs);
        settings.liveness.min_frames = self.recognition.liveness_min_frames;
        settings
    }
}

fn env_f32(key: &str) -> Option<f32> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_consistent() {
        let config = Config::default();
        assert_eq!(config.recognition.threshold_percent, 70.0);
        assert_eq!(config.recognition.active_detectors, vec!["scrfd", "yunet"]);
        assert!(config.scrfd_model_path().ends_with("det_10g.onnx"));
    }

    #[test]
    fn toml_sections_deserialize_with_partial_content() {
        let config: Config = toml::from_str(
            r#"
            [recognition]
            threshold_percent = 85.0
            active_detectors = ["scrfd"]

            [storage]
            db_path = "/var/lib/rollcall/gallery.db"
            "#,
        )
        .unwrap();
        assert_eq!(config.recognition.threshold_percent, 85.0);
        assert_eq!(config.recognition.active_detectors, vec!["scrfd"]);
        assert_eq!(config.recognition.max_faces, 3);
        assert_eq!(
            config.db_path(),
            PathBuf::from("/var/lib/rollcall/gallery.db")
        );
    }

    #[test]
    fn session_settings_carry_the_recognition_section() {
        let mut config = Config::default();
        config.recognition.threshold_percent = 80.0;
        config.recognition.max_faces = 5;
        let settings = config.session_settings();
        assert_eq!(settings.threshold_percent, 80.0);
        assert_eq!(settings.merge.max_faces, 5);
        assert_eq!(settings.detector_timeout, Duration::from_secs(5));
    }
}
