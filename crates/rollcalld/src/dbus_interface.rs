use rollcall_engine::{Engine, EngineError};
use rollcall_gallery::GalleryExport;
use std::sync::Arc;
use zbus::interface;

/// D-Bus interface for the Rollcall attendance daemon.
///
/// Bus name: org.rollcall.Recognizer1
/// Object path: /org/rollcall/Recognizer1
///
/// Structured results travel as JSON strings; images as raw byte arrays.
pub struct RecognizerService {
    engine: Arc<Engine>,
}

impl RecognizerService {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }
}

#[interface(name = "org.rollcall.Recognizer1")]
impl RecognizerService {
    /// Enroll an identity from a reference image. Replaces any previous
    /// reference for the same key.
    async fn enroll(&self, key: &str, name: &str, image: Vec<u8>) -> zbus::fdo::Result<String> {
        tracing::info!(key, name, "enroll requested");
        let identity = self
            .engine
            .enroll(key, name, &image)
            .await
            .map_err(to_fdo)?;
        to_json(&serde_json::json!({
            "key": identity.key,
            "name": identity.name,
            "enrolled_at": identity.enrolled_at,
        }))
    }

    /// Recognize the face in a single image against the gallery.
    async fn recognize(&self, image: Vec<u8>) -> zbus::fdo::Result<String> {
        let outcome = self.engine.recognize(&image).await.map_err(to_fdo)?;
        to_json(&outcome)
    }

    /// Liveness-gated recognition over a short frame sequence.
    async fn check_in(&self, frames: Vec<Vec<u8>>) -> zbus::fdo::Result<String> {
        let outcome = self.engine.check_in(&frames).await.map_err(to_fdo)?;
        to_json(&outcome)
    }

    /// Set the acceptance threshold (percent, [50, 95]); applies to
    /// subsequent operations only.
    async fn set_threshold(&self, percent: f64) -> zbus::fdo::Result<()> {
        self.engine
            .session()
            .set_threshold(percent as f32)
            .map_err(|e| zbus::fdo::Error::InvalidArgs(e.to_string()))
    }

    /// Set the active detector set; applies to subsequent operations only.
    async fn set_active_detectors(&self, tags: Vec<String>) -> zbus::fdo::Result<()> {
        self.engine
            .session()
            .set_active_detectors(tags)
            .map_err(|e| zbus::fdo::Error::InvalidArgs(e.to_string()))
    }

    /// List enrolled identities (key, name, enrollment timestamp).
    async fn list_identities(&self) -> zbus::fdo::Result<String> {
        let identities: Vec<_> = self
            .engine
            .gallery()
            .all()
            .await
            .into_iter()
            .map(|i| {
                serde_json::json!({
                    "key": i.key,
                    "name": i.name,
                    "enrolled_at": i.enrolled_at,
                    "reference_embeddings": i.embeddings.len(),
                })
            })
            .collect();
        to_json(&identities)
    }

    /// Remove an enrolled identity. Reports whether the key existed.
    async fn remove_identity(&self, key: &str) -> zbus::fdo::Result<bool> {
        tracing::info!(key, "remove requested");
        self.engine
            .gallery()
            .remove(key)
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Export the gallery in the versioned interchange schema.
    async fn export_gallery(&self) -> zbus::fdo::Result<String> {
        let export = self.engine.gallery().export().await;
        to_json(&export)
    }

    /// Import a gallery export, upserting by identity key. Returns how many
    /// identities were stored.
    async fn import_gallery(&self, payload: &str) -> zbus::fdo::Result<u32> {
        let export: GalleryExport = serde_json::from_str(payload)
            .map_err(|e| zbus::fdo::Error::InvalidArgs(e.to_string()))?;
        let imported = self
            .engine
            .gallery()
            .import(export)
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
        Ok(imported as u32)
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let settings = self.engine.session().snapshot();
        to_json(&serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "encoder_version": self.engine.encoder_version(),
            "enrolled_identities": self.engine.gallery().len().await,
            "threshold_percent": settings.threshold_percent,
            "active_detectors": settings.active_detectors,
            "known_detectors": self.engine.session().known_detectors(),
        }))
    }
}

fn to_fdo(err: EngineError) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(err.to_string())
}

fn to_json<T: serde::Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}
