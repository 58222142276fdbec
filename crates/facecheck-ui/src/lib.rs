//! facecheck-ui: State controller for single-image face verification.
//!
//! Owns the session state a view renders: the selected image, detections,
//! overlay, face crops and the match verdict. Transitions are driven by
//! [`VerificationController`].

pub mod config;
pub mod controller;
pub mod models;
pub mod state;

pub use config::{Config, ConfigError};
pub use controller::{CheckOutcome, ControllerError, VerificationController};
pub use models::ModelGate;
pub use state::{Phase, UiState};
