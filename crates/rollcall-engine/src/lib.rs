//! rollcall-engine — orchestration of detectors, the encoder, the gallery
//! and the liveness gate into enroll / recognize / check-in pipelines.

pub mod pipeline;
pub mod session;
pub mod worker;

pub use pipeline::{CheckInOutcome, Engine, EngineError, RecognizeOutcome};
pub use session::{ConfigurationError, Session, SessionSettings};
