//! Core module: configuration and error types shared across the engine.

pub mod config;
pub mod error;

pub use config::Config;
pub use error::{CollaboratorError, EngineError};
