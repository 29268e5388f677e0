//! rollcalld — HTTP service for face registration and verification.

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod matching;
pub mod payload;

pub use api::{router, AppState, ServiceInfo};
pub use config::Config;
pub use engine::{spawn_engine, EngineError, EngineHandle, EngineSettings};
