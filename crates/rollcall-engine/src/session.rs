//! Process-wide recognition session configuration.
//!
//! Settings mutate only through the explicit setters and take effect for
//! subsequent operations; every pipeline run works from an immutable
//! snapshot taken at its start, never retroactively.

use rollcall_core::liveness::LivenessConfig;
use rollcall_core::matcher::{
    DEFAULT_THRESHOLD_PERCENT, MAX_THRESHOLD_PERCENT, MIN_THRESHOLD_PERCENT,
};
use rollcall_core::merger::MergeConfig;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("threshold {0}% outside the allowed range [50, 95]")]
    ThresholdOutOfRange(f32),
    #[error("unknown detector algorithm: {0}")]
    UnknownDetector(String),
    #[error("active detector set must not be empty")]
    EmptyDetectorSet,
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Match acceptance threshold on the mapped confidence scale.
    pub threshold_percent: f32,
    /// Algorithm tags that run on each detection pass.
    pub active_detectors: Vec<String>,
    pub merge: MergeConfig,
    pub liveness: LivenessConfig,
    pub detector_timeout: Duration,
    pub encoder_timeout: Duration,
    /// Fraction of near-black pixels above which a frame is skipped.
    pub dark_frame_threshold: f32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            threshold_percent: DEFAULT_THRESHOLD_PERCENT,
            active_detectors: vec!["scrfd".to_string(), "yunet".to_string()],
            merge: MergeConfig::default(),
            liveness: LivenessConfig::default(),
            detector_timeout: Duration::from_secs(5),
            encoder_timeout: Duration::from_secs(5),
            dark_frame_threshold: 0.95,
        }
    }
}

/// Clone-safe handle to the mutable session state.
#[derive(Clone)]
pub struct Session {
    state: Arc<RwLock<SessionSettings>>,
    known_detectors: Arc<Vec<String>>,
}

impl Session {
    /// Validate and install the initial settings. `known_detectors` is the
    /// set of algorithm tags that actually have a loaded implementation.
    pub fn new(
        settings: SessionSettings,
        known_detectors: Vec<String>,
    ) -> Result<Self, ConfigurationError> {
        validate_threshold(settings.threshold_percent)?;
        validate_detectors(&settings.active_detectors, &known_detectors)?;
        Ok(Self {
            state: Arc::new(RwLock::new(settings)),
            known_detectors: Arc::new(known_detectors),
        })
    }

    /// Immutable snapshot of the current settings.
    pub fn snapshot(&self) -> SessionSettings {
        self.state.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Set the acceptance threshold. Takes effect for subsequent
    /// operations only.
    pub fn set_threshold(&self, percent: f32) -> Result<(), ConfigurationError> {
        validate_threshold(percent)?;
        self.state
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .threshold_percent = percent;
        tracing::info!(percent, "recognition threshold updated");
        Ok(())
    }

    /// Set the active detector set. Takes effect for subsequent
    /// operations only.
    pub fn set_active_detectors(&self, tags: Vec<String>) -> Result<(), ConfigurationError> {
        validate_detectors(&tags, &self.known_detectors)?;
        self.state
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .active_detectors = tags.clone();
        tracing::info!(?tags, "active detector set updated");
        Ok(())
    }

    pub fn known_detectors(&self) -> &[String] {
        &self.known_detectors
    }
}

fn validate_threshold(percent: f32) -> Result<(), ConfigurationError> {
    if !percent.is_finite()
        || percent < MIN_THRESHOLD_PERCENT
        || percent > MAX_THRESHOLD_PERCENT
    {
        return Err(ConfigurationError::ThresholdOutOfRange(percent));
    }
    Ok(())
}

fn validate_detectors(tags: &[String], known: &[String]) -> Result<(), ConfigurationError> {
    if tags.is_empty() {
        return Err(ConfigurationError::EmptyDetectorSet);
    }
    for tag in tags {
        if !known.contains(tag) {
            return Err(ConfigurationError::UnknownDetector(tag.clone()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new(
            SessionSettings::default(),
            vec!["scrfd".into(), "yunet".into()],
        )
        .unwrap()
    }

    #[test]
    fn threshold_bounds_are_inclusive() {
        let s = session();
        assert!(s.set_threshold(50.0).is_ok());
        assert!(s.set_threshold(95.0).is_ok());
        assert!(matches!(
            s.set_threshold(49.9),
            Err(ConfigurationError::ThresholdOutOfRange(_))
        ));
        assert!(matches!(
            s.set_threshold(95.1),
            Err(ConfigurationError::ThresholdOutOfRange(_))
        ));
        assert!(s.set_threshold(f32::NAN).is_err());
    }

    #[test]
    fn unknown_detector_is_rejected() {
        let s = session();
        assert!(matches!(
            s.set_active_detectors(vec!["mtcnn".into()]),
            Err(ConfigurationError::UnknownDetector(_))
        ));
    }

    #[test]
    fn empty_detector_set_is_rejected() {
        let s = session();
        assert!(matches!(
            s.set_active_detectors(vec![]),
            Err(ConfigurationError::EmptyDetectorSet)
        ));
    }

    #[test]
    fn updates_are_not_retroactive_on_snapshots() {
        let s = session();
        let before = s.snapshot();
        s.set_threshold(90.0).unwrap();
        assert_eq!(before.threshold_percent, DEFAULT_THRESHOLD_PERCENT);
        assert_eq!(s.snapshot().threshold_percent, 90.0);
    }

    #[test]
    fn failed_update_leaves_state_unchanged() {
        let s = session();
        let _ = s.set_threshold(10.0);
        assert_eq!(s.snapshot().threshold_percent, DEFAULT_THRESHOLD_PERCENT);

        let _ = s.set_active_detectors(vec!["scrfd".into(), "bogus".into()]);
        assert_eq!(s.snapshot().active_detectors.len(), 2);
        assert!(s.snapshot().active_detectors.contains(&"yunet".to_string()));
    }

    #[test]
    fn invalid_initial_settings_are_rejected() {
        let bad = SessionSettings {
            threshold_percent: 20.0,
            ..SessionSettings::default()
        };
        assert!(Session::new(bad, vec!["scrfd".into(), "yunet".into()]).is_err());
    }
}
