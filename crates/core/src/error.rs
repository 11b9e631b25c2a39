use thiserror::Error;

use crate::cutoff::CutoffError;
use crate::model::{ProgressError, SessionError, WorkoutParseError};
use crate::sequencer::SequencerError;

/// Any error raised by the live-class domain.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Sequencer(#[from] SequencerError),
    #[error(transparent)]
    Progress(#[from] ProgressError),
    #[error(transparent)]
    Cutoff(#[from] CutoffError),
    #[error(transparent)]
    Workout(#[from] WorkoutParseError),
}
