//! Per-model worker threads.
//!
//! Each ONNX session lives on its own named OS thread behind an mpsc
//! request queue; async callers receive replies over oneshot channels.
//! A request whose caller times out or is dropped keeps the worker busy
//! until it finishes; the reply is then discarded.

use crate::pipeline::EngineError;
use rollcall_core::{Detection, DetectionError, Detector, Embedding, Encoder, EncodingError, Frame};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

const WORKER_QUEUE_DEPTH: usize = 4;

struct DetectRequest {
    frame: Arc<Frame>,
    reply: oneshot::Sender<Result<Vec<Detection>, DetectionError>>,
}

/// Clone-safe handle to one detector's worker thread.
#[derive(Clone)]
pub struct DetectorWorker {
    tx: mpsc::Sender<DetectRequest>,
    algorithm: &'static str,
}

/// Move a detector onto its own OS thread and return a handle to it.
pub fn spawn_detector(mut detector: Box<dyn Detector>) -> DetectorWorker {
    let algorithm = detector.algorithm();
    let (tx, mut rx) = mpsc::channel::<DetectRequest>(WORKER_QUEUE_DEPTH);

    std::thread::Builder::new()
        .name(format!("rollcall-det-{algorithm}"))
        .spawn(move || {
            tracing::info!(algorithm, "detector worker started");
            while let Some(req) = rx.blocking_recv() {
                let result = detector.detect(&req.frame);
                let _ = req.reply.send(result);
            }
            tracing::info!(algorithm, "detector worker exiting");
        })
        .expect("failed to spawn detector worker thread");

    DetectorWorker { tx, algorithm }
}

impl DetectorWorker {
    pub fn algorithm(&self) -> &'static str {
        self.algorithm
    }

    /// Detect faces in a frame on the worker thread.
    pub async fn detect(&self, frame: Arc<Frame>) -> Result<Vec<Detection>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(DetectRequest {
                frame,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::WorkerClosed)?;
        let result = reply_rx.await.map_err(|_| EngineError::WorkerClosed)?;
        Ok(result?)
    }
}

struct EncodeRequest {
    frame: Arc<Frame>,
    detection: Detection,
    reply: oneshot::Sender<Result<Embedding, EncodingError>>,
}

/// Clone-safe handle to the encoder's worker thread.
#[derive(Clone)]
pub struct EncoderWorker {
    tx: mpsc::Sender<EncodeRequest>,
    version: &'static str,
    embedding_len: usize,
}

/// Move an encoder onto its own OS thread and return a handle to it.
pub fn spawn_encoder(mut encoder: Box<dyn Encoder>) -> EncoderWorker {
    let version = encoder.version();
    let embedding_len = encoder.embedding_len();
    let (tx, mut rx) = mpsc::channel::<EncodeRequest>(WORKER_QUEUE_DEPTH);

    std::thread::Builder::new()
        .name(format!("rollcall-enc-{version}"))
        .spawn(move || {
            tracing::info!(version, "encoder worker started");
            while let Some(req) = rx.blocking_recv() {
                let result = encoder.encode(&req.frame, &req.detection);
                let _ = req.reply.send(result);
            }
            tracing::info!(version, "encoder worker exiting");
        })
        .expect("failed to spawn encoder worker thread");

    EncoderWorker {
        tx,
        version,
        embedding_len,
    }
}

impl EncoderWorker {
    pub fn version(&self) -> &'static str {
        self.version
    }

    pub fn embedding_len(&self) -> usize {
        self.embedding_len
    }

    /// Extract an embedding for one detection on the worker thread.
    pub async fn encode(
        &self,
        frame: Arc<Frame>,
        detection: Detection,
    ) -> Result<Embedding, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EncodeRequest {
                frame,
                detection,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::WorkerClosed)?;
        let result = reply_rx.await.map_err(|_| EngineError::WorkerClosed)?;
        Ok(result?)
    }
}
