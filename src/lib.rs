//! Delegation incident and risk service.
//!
//! Serves historical incidents, risk-zone shares and daily statistics per
//! delegation, and synthesizes forecast incidents for future dates from a
//! per-delegation random-forest classifier. Operator feedback on forecasts
//! is staged, retrains the model and can be promoted into the history.

pub mod api;
pub mod config;
pub mod error;
pub mod feedback;
pub mod metrics;
pub mod ml;
pub mod models;
pub mod state;

pub use error::{AppError, Result};
