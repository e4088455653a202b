//! PowerGrid T-LAMP predictive-maintenance risk service
//!
//! Scores transmission lines Low / Medium / High risk from their incident
//! history, age and tower condition using a random-forest classifier, and
//! serves predictions, model metrics and a small keyword assistant over HTTP.

pub mod api;
pub mod chatbot;
pub mod config;
pub mod error;
pub mod metrics;
pub mod ml;
pub mod models;
pub mod state;

pub use error::{AppError, Result};
