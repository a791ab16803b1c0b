//! The recognition engine: enroll, recognize and check-in pipelines.
//!
//! Every operation snapshots the session settings up front, fans the frame
//! out to all active detector workers concurrently, merges the results,
//! encodes the best face and takes a match decision against the gallery
//! snapshot. Dropping an operation's future cancels it cooperatively: the
//! worker replies land on dropped oneshot channels and are discarded, while
//! gallery writes always run to completion on the SQLite actor.

use crate::session::{ConfigurationError, Session, SessionSettings};
use crate::worker::{self, DetectorWorker, EncoderWorker};
use rollcall_core::liveness::{self, LivenessResult};
use rollcall_core::matcher::{self, MatchDecision};
use rollcall_core::merger;
use rollcall_core::{
    Detection, DetectionError, Detector, Embedding, Encoder, EncodingError, Frame, Identity,
    Landmarks,
};
use rollcall_gallery::{Gallery, GalleryError};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinSet;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("detection: {0}")]
    Detection(#[from] DetectionError),
    #[error("encoding: {0}")]
    Encoding(#[from] EncodingError),
    #[error("gallery: {0}")]
    Gallery(#[from] GalleryError),
    #[error("configuration: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error("{operation} timed out after {millis} ms")]
    Timeout {
        operation: &'static str,
        millis: u64,
    },
    #[error("no active detector is available")]
    NoActiveDetectors,
    #[error("worker thread exited")]
    WorkerClosed,
}

/// Result kinds of a recognition pass. The caller distinguishes three
/// outcomes: no face found, face found but not recognized (a reject
/// [`MatchDecision`]), and system errors (the `Err` arm of the pipeline).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RecognizeOutcome {
    NoFaceFound,
    Decision {
        face: Detection,
        decision: MatchDecision,
    },
}

/// Result kinds of a liveness-gated check-in.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CheckInOutcome {
    NoFaceFound,
    NotLive {
        liveness: LivenessResult,
    },
    Decision {
        liveness: LivenessResult,
        face: Detection,
        decision: MatchDecision,
    },
}

/// The dependency-injected recognition engine.
///
/// Constructed once at process start with its detectors, encoder and
/// gallery; torn down when dropped (worker threads exit as their queues
/// close).
pub struct Engine {
    detectors: Vec<DetectorWorker>,
    encoder: EncoderWorker,
    gallery: Gallery,
    session: Session,
}

impl Engine {
    /// Spawn worker threads for the given models and validate the initial
    /// session settings against them.
    ///
    /// Fails fast when the gallery was opened under a different encoder
    /// version than the injected encoder produces.
    pub fn new(
        detectors: Vec<Box<dyn Detector>>,
        encoder: Box<dyn Encoder>,
        gallery: Gallery,
        settings: SessionSettings,
    ) -> Result<Self, EngineError> {
        if gallery.encoder_version() != encoder.version() {
            return Err(EngineError::Gallery(GalleryError::EncoderVersionMismatch {
                expected: gallery.encoder_version().to_string(),
                found: encoder.version().to_string(),
            }));
        }

        let workers: Vec<DetectorWorker> =
            detectors.into_iter().map(worker::spawn_detector).collect();
        let known: Vec<String> = workers.iter().map(|w| w.algorithm().to_string()).collect();
        let session = Session::new(settings, known)?;
        let encoder = worker::spawn_encoder(encoder);

        Ok(Self {
            detectors: workers,
            encoder,
            gallery,
            session,
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn gallery(&self) -> &Gallery {
        &self.gallery
    }

    pub fn encoder_version(&self) -> &'static str {
        self.encoder.version()
    }

    /// Enroll an identity from a reference image.
    ///
    /// The image must contain at least one detectable face; its embedding
    /// replaces any previous reference for `key`.
    pub async fn enroll(
        &self,
        key: &str,
        name: &str,
        image: &[u8],
    ) -> Result<Identity, EngineError> {
        let settings = self.session.snapshot();
        let request = Uuid::new_v4();
        tracing::info!(request = %request, key, "enroll requested");

        let frame = Arc::new(Frame::decode(image)?);
        let merged = self.detect_merged(&frame, &settings).await?;
        let face = best_face(&merged)
            .cloned()
            .ok_or(DetectionError::NoFaceDetected)?;

        tracing::debug!(
            request = %request,
            confidence = face.confidence,
            algorithm = %face.algorithm,
            "enroll: best face selected"
        );

        let embedding = self.encode_with_timeout(frame, face, &settings).await?;
        let identity = self.gallery.enroll(key, name, embedding).await?;
        Ok(identity)
    }

    /// Recognize the face in a single query image against the gallery.
    pub async fn recognize(&self, image: &[u8]) -> Result<RecognizeOutcome, EngineError> {
        let settings = self.session.snapshot();
        let request = Uuid::new_v4();

        let frame = Arc::new(Frame::decode(image)?);
        let merged = self.detect_merged(&frame, &settings).await?;
        let Some(face) = best_face(&merged).cloned() else {
            tracing::info!(request = %request, "recognition: no face found");
            return Ok(RecognizeOutcome::NoFaceFound);
        };

        let embedding = self.encode_with_timeout(frame, face.clone(), &settings).await?;
        let gallery = self.gallery.all().await;
        let decision = matcher::match_against(&embedding, &gallery, settings.threshold_percent);

        tracing::info!(
            request = %request,
            accepted = decision.accepted,
            confidence = decision.confidence,
            identity = decision.identity_key.as_deref().unwrap_or("-"),
            "recognition decision"
        );
        Ok(RecognizeOutcome::Decision { face, decision })
    }

    /// Liveness-gated recognition over a short frame sequence.
    ///
    /// Dark frames are skipped. The highest-trust active detector tracks
    /// the face across the sequence to collect the landmark motion the
    /// liveness gate scores; a failed gate blocks any accept outcome. The
    /// best frame then goes through the full multi-algorithm recognition
    /// path.
    pub async fn check_in(&self, frames: &[Vec<u8>]) -> Result<CheckInOutcome, EngineError> {
        let settings = self.session.snapshot();
        let request = Uuid::new_v4();

        let mut decoded = Vec::with_capacity(frames.len());
        let mut dark_skipped = 0usize;
        for bytes in frames {
            let frame = Frame::decode(bytes)?;
            if frame.is_dark(settings.dark_frame_threshold) {
                dark_skipped += 1;
                continue;
            }
            decoded.push(Arc::new(frame));
        }
        tracing::debug!(
            request = %request,
            usable = decoded.len(),
            dark_skipped,
            "check-in: frames decoded"
        );
        if decoded.is_empty() {
            return Ok(CheckInOutcome::NoFaceFound);
        }

        let tracker = self.primary_detector(&settings)?;
        let mut landmark_seq: Vec<Landmarks> = Vec::new();
        let mut best: Option<(usize, f32)> = None;
        for (i, frame) in decoded.iter().enumerate() {
            let detections = match tokio::time::timeout(
                settings.detector_timeout,
                tracker.detect(frame.clone()),
            )
            .await
            {
                Ok(result) => result?,
                Err(_) => {
                    tracing::warn!(
                        request = %request,
                        algorithm = tracker.algorithm(),
                        frame = i,
                        "check-in: tracking detection timed out; skipping frame"
                    );
                    continue;
                }
            };
            let Some(face) = detections.first() else {
                continue;
            };
            if let Some(lms) = face.landmarks {
                landmark_seq.push(lms);
            }
            if best.map_or(true, |(_, c)| face.confidence > c) {
                best = Some((i, face.confidence));
            }
        }
        let Some((best_idx, _)) = best else {
            tracing::info!(request = %request, "check-in: no face found in any frame");
            return Ok(CheckInOutcome::NoFaceFound);
        };

        let liveness = liveness::assess(&landmark_seq, &settings.liveness);
        if !liveness.is_live {
            tracing::info!(
                request = %request,
                mean_eye_displacement = liveness.mean_eye_displacement,
                frame_pairs = liveness.frame_pairs,
                "check-in: liveness gate rejected"
            );
            return Ok(CheckInOutcome::NotLive { liveness });
        }

        let frame = decoded[best_idx].clone();
        let merged = self.detect_merged(&frame, &settings).await?;
        let Some(face) = best_face(&merged).cloned() else {
            return Ok(CheckInOutcome::NoFaceFound);
        };
        let embedding = self.encode_with_timeout(frame, face.clone(), &settings).await?;
        let gallery = self.gallery.all().await;
        let decision = matcher::match_against(&embedding, &gallery, settings.threshold_percent);

        tracing::info!(
            request = %request,
            accepted = decision.accepted,
            confidence = decision.confidence,
            "check-in decision"
        );
        Ok(CheckInOutcome::Decision {
            liveness,
            face,
            decision,
        })
    }

    /// Run all active detectors concurrently and merge their detections.
    ///
    /// A timed-out detector is excluded from the merge (explicit
    /// degradation); a detector error aborts the whole attempt.
    async fn detect_merged(
        &self,
        frame: &Arc<Frame>,
        settings: &SessionSettings,
    ) -> Result<Vec<Detection>, EngineError> {
        let mut set = JoinSet::new();
        let mut spawned = 0usize;
        for detector in self.active_workers(settings) {
            let frame = frame.clone();
            let timeout = settings.detector_timeout;
            set.spawn(async move {
                let result = tokio::time::timeout(timeout, detector.detect(frame)).await;
                (detector.algorithm(), result)
            });
            spawned += 1;
        }
        if spawned == 0 {
            return Err(EngineError::NoActiveDetectors);
        }

        let mut all = Vec::new();
        while let Some(joined) = set.join_next().await {
            let (algorithm, result) = joined.map_err(|_| EngineError::WorkerClosed)?;
            match result {
                Ok(Ok(detections)) => {
                    tracing::debug!(algorithm, count = detections.len(), "detector finished");
                    all.extend(detections);
                }
                Ok(Err(err)) => return Err(err),
                Err(_elapsed) => {
                    tracing::warn!(
                        algorithm,
                        timeout_ms = settings.detector_timeout.as_millis() as u64,
                        "detector timed out; excluding its results from the merge"
                    );
                }
            }
        }

        Ok(merger::merge(all, &settings.merge))
    }

    async fn encode_with_timeout(
        &self,
        frame: Arc<Frame>,
        face: Detection,
        settings: &SessionSettings,
    ) -> Result<Embedding, EngineError> {
        match tokio::time::timeout(settings.encoder_timeout, self.encoder.encode(frame, face)).await
        {
            Ok(result) => result,
            Err(_) => Err(EngineError::Timeout {
                operation: "embedding extraction",
                millis: settings.encoder_timeout.as_millis() as u64,
            }),
        }
    }

    fn active_workers<'a>(
        &'a self,
        settings: &'a SessionSettings,
    ) -> impl Iterator<Item = DetectorWorker> + 'a {
        self.detectors
            .iter()
            .filter(|w| settings.active_detectors.iter().any(|t| t == w.algorithm()))
            .cloned()
    }

    /// The active worker ranking highest in the configured trust order.
    fn primary_detector(&self, settings: &SessionSettings) -> Result<DetectorWorker, EngineError> {
        let rank = |tag: &str| {
            settings
                .merge
                .trust_order
                .iter()
                .position(|t| t == tag)
                .unwrap_or(usize::MAX)
        };
        self.active_workers(settings)
            .min_by_key(|w| rank(w.algorithm()))
            .ok_or(EngineError::NoActiveDetectors)
    }
}

/// The top-ranked detection that can feed alignment, falling back to the
/// overall top (whose missing landmarks surface as an encoding error).
fn best_face(merged: &[Detection]) -> Option<&Detection> {
    merged
        .iter()
        .find(|d| d.landmarks.is_some())
        .or_else(|| merged.first())
}
