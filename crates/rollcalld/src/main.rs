use anyhow::Result;
use rollcall_core::encoder::ArcFaceEncoder;
use rollcall_core::scrfd::ScrfdDetector;
use rollcall_core::yunet::YuNetDetector;
use rollcall_core::{Detector, Encoder};
use rollcall_engine::Engine;
use rollcall_gallery::Gallery;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let config = config::Config::load()?;

    // Load all models up front so a missing file fails fast at startup.
    let scrfd = ScrfdDetector::load(&config.scrfd_model_path())?;
    tracing::info!(path = %config.scrfd_model_path(), "SCRFD detector loaded");

    let yunet = YuNetDetector::load(&config.yunet_model_path())?;
    tracing::info!(path = %config.yunet_model_path(), "YuNet detector loaded");

    let encoder = ArcFaceEncoder::load(&config.arcface_model_path())?;
    tracing::info!(path = %config.arcface_model_path(), "ArcFace encoder loaded");

    let db_path = config.db_path();
    let gallery = Gallery::open(&db_path, encoder.version()).await?;
    tracing::info!(db = %db_path.display(), identities = gallery.len().await, "gallery ready");

    let detectors: Vec<Box<dyn Detector>> = vec![Box::new(scrfd), Box::new(yunet)];
    let engine = Arc::new(Engine::new(
        detectors,
        Box::new(encoder),
        gallery,
        config.session_settings(),
    )?);

    let service = dbus_interface::RecognizerService::new(engine);
    let _connection = zbus::connection::Builder::session()?
        .name("org.rollcall.Recognizer1")?
        .serve_at("/org/rollcall/Recognizer1", service)?
        .build()
        .await?;

    tracing::info!("rollcalld ready on org.rollcall.Recognizer1");

    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");

    Ok(())
}
