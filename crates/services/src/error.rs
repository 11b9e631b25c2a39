//! Shared error types for the services crate.

use thiserror::Error;

use live_core::cutoff::CutoffError;
use live_core::model::WorkoutType;
use live_core::sequencer::SequencerError;
use storage::gateway::GatewayError;

/// Errors emitted by the participant controller and sync layer.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LiveClientError {
    #[error("session is still being prepared")]
    Preparing,
    #[error("time cap reached")]
    TimeUp,
    #[error("{0} workouts do not take this input")]
    WrongModality(WorkoutType),
    #[error(transparent)]
    Sequencer(#[from] SequencerError),
    #[error(transparent)]
    Cutoff(#[from] CutoffError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("client state lock poisoned")]
    Poisoned,
}

impl LiveClientError {
    /// Network-level failure that polling will recover from.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Gateway(err) if err.is_transient())
    }
}

/// Errors emitted while reading configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("{var} must be an integer, got {value:?}")]
    NotANumber { var: &'static str, value: String },
    #[error("{var} must be within {min}..={max}, got {value}")]
    OutOfRange {
        var: &'static str,
        value: u64,
        min: u64,
        max: u64,
    },
    #[error("{0} is required")]
    Missing(&'static str),
}
