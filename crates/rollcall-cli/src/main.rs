//! Offline driver for the recognition engine: runs enrollment, recognition
//! and gallery management directly against image files, without the daemon.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rollcall_core::encoder::ArcFaceEncoder;
use rollcall_core::scrfd::ScrfdDetector;
use rollcall_core::yunet::YuNetDetector;
use rollcall_core::{Detector, Encoder};
use rollcall_engine::{Engine, RecognizeOutcome};
use rollcall_gallery::{Gallery, GalleryExport};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall face-recognition attendance CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll an identity from a reference image
    Enroll {
        /// Unique identity key (e.g. an employee id)
        key: String,
        /// Display name
        name: String,
        /// Reference image file (JPEG/PNG)
        image: PathBuf,
    },
    /// Recognize the face in an image against the gallery
    Recognize {
        image: PathBuf,
        /// Acceptance threshold override (percent, 50-95)
        #[arg(short, long)]
        threshold: Option<f32>,
    },
    /// Liveness-gated check-in over a short frame sequence
    CheckIn {
        /// Frame image files, in capture order
        #[arg(required = true)]
        frames: Vec<PathBuf>,
        /// Acceptance threshold override (percent, 50-95)
        #[arg(short, long)]
        threshold: Option<f32>,
    },
    /// List enrolled identities
    List,
    /// Remove an enrolled identity
    Remove {
        /// Identity key to remove
        key: String,
    },
    /// Export the gallery as versioned JSON
    Export {
        /// Output file (stdout when omitted)
        output: Option<PathBuf>,
    },
    /// Import a gallery export, upserting by identity key
    Import {
        input: PathBuf,
    },
    /// Show engine and gallery status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let engine = build_engine().await?;

    match cli.command {
        Commands::Enroll { key, name, image } => {
            let bytes = read_image(&image)?;
            let identity = engine.enroll(&key, &name, &bytes).await?;
            println!("enrolled {} ({}) at {}", identity.key, identity.name, identity.enrolled_at);
        }
        Commands::Recognize { image, threshold } => {
            if let Some(percent) = threshold {
                engine.session().set_threshold(percent)?;
            }
            let bytes = read_image(&image)?;
            let outcome = engine.recognize(&bytes).await?;
            print_json(&outcome)?;
            if let RecognizeOutcome::Decision { decision, .. } = &outcome {
                if !decision.accepted {
                    std::process::exit(1);
                }
            }
        }
        Commands::CheckIn { frames, threshold } => {
            if let Some(percent) = threshold {
                engine.session().set_threshold(percent)?;
            }
            let mut sequence = Vec::with_capacity(frames.len());
            for frame in &frames {
                sequence.push(read_image(frame)?);
            }
            let outcome = engine.check_in(&sequence).await?;
            print_json(&outcome)?;
        }
        Commands::List => {
            let mut identities = engine.gallery().all().await;
            identities.sort_by(|a, b| a.key.cmp(&b.key));
            if identities.is_empty() {
                println!("no identities enrolled");
            }
            for identity in identities {
                println!(
                    "{}\t{}\t{} reference(s)\tenrolled {}",
                    identity.key,
                    identity.name,
                    identity.embeddings.len(),
                    identity.enrolled_at
                );
            }
        }
        Commands::Remove { key } => {
            if engine.gallery().remove(&key).await? {
                println!("removed {key}");
            } else {
                println!("{key} was not enrolled");
            }
        }
        Commands::Export { output } => {
            let export = engine.gallery().export().await;
            let json = serde_json::to_string_pretty(&export)?;
            match output {
                Some(path) => {
                    std::fs::write(&path, json)
                        .with_context(|| format!("writing {}", path.display()))?;
                    println!("exported {} identities to {}", export.identities.len(), path.display());
                }
                None => println!("{json}"),
            }
        }
        Commands::Import { input } => {
            let json = std::fs::read_to_string(&input)
                .with_context(|| format!("reading {}", input.display()))?;
            let export: GalleryExport = serde_json::from_str(&json)?;
            let imported = engine.gallery().import(export).await?;
            println!("imported {imported} identities");
        }
        Commands::Status => {
            let settings = engine.session().snapshot();
            print_json(&serde_json::json!({
                "encoder_version": engine.encoder_version(),
                "enrolled_identities": engine.gallery().len().await,
                "threshold_percent": settings.threshold_percent,
                "active_detectors": settings.active_detectors,
                "known_detectors": engine.session().known_detectors(),
            }))?;
        }
    }

    Ok(())
}

/// Build the engine from `ROLLCALL_MODEL_DIR` / `ROLLCALL_DB_PATH`, with the
/// same defaults the daemon uses.
async fn build_engine() -> Result<Engine> {
    let model_dir = std::env::var("ROLLCALL_MODEL_DIR").unwrap_or_else(|_| "models".to_string());
    let model = |file: &str| {
        Path::new(&model_dir)
            .join(file)
            .to_string_lossy()
            .into_owned()
    };

    let scrfd = ScrfdDetector::load(&model("det_10g.onnx"))?;
    let yunet = YuNetDetector::load(&model("face_detection_yunet_2023mar.onnx"))?;
    let encoder = ArcFaceEncoder::load(&model("w600k_r50.onnx"))?;

    let db_path = std::env::var("ROLLCALL_DB_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let data_dir = std::env::var("XDG_DATA_HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|_| {
                    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                    PathBuf::from(home).join(".local/share")
                });
            data_dir.join("rollcall/gallery.db")
        });
    let gallery = Gallery::open(&db_path, encoder.version()).await?;

    let detectors: Vec<Box<dyn Detector>> = vec![Box::new(scrfd), Box::new(yunet)];
    let engine = Engine::new(
        detectors,
        Box::new(encoder),
        gallery,
        rollcall_engine::SessionSettings::default(),
    )?;
    Ok(engine)
}

fn read_image(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("reading image {}", path.display()))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
