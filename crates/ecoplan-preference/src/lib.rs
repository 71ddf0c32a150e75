#![warn(clippy::unwrap_used, clippy::expect_used)]

//! Preference scores learned from accept/decline feedback.
//!
//! The [`PreferenceModel`] keeps one exponential moving average per action,
//! a [`StateStore`] persists the flat score mapping, and a
//! [`PreferenceSession`] ties both together so that "apply feedback" and
//! "persist" happen inside one critical section.

pub mod error;
pub mod model;
pub mod session;
pub mod store;

pub use error::PersistenceError;
pub use model::{
    PreferenceConfig, PreferenceModel, RewardPolicy, ScoreChange, DEFAULT_LEARNING_RATE,
};
pub use session::{FeedbackReport, PreferenceSession};
pub use store::{InMemoryStore, JsonFileStore, StateStore};

fn log_warning(message: &str, err: &dyn std::fmt::Display) {
    #[cfg(feature = "telemetry")]
    tracing::warn!(error = %err, "{message}");
    #[cfg(not(feature = "telemetry"))]
    eprintln!("warning: {message}: {err}");
}
