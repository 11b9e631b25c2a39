mod ids;
pub mod plan;
mod progress;
mod session;
mod step;
pub mod workout;

pub use ids::{ClassId, ParseIdError, UserId, WorkoutId};
pub use plan::{ExerciseRow, WorkoutDefinition, WorkoutMetadata, WorkoutPlan};
pub use progress::{
    AdvanceEffect, EmomMark, LeaderboardEntry, ParticipantProgress, ProgressError,
    check_step_index,
};
pub use session::{EmomPlan, Session, SessionError, SessionStatus};
pub use step::{Step, cumulative_reps};
pub use workout::{QuantityType, Scaling, ScalingFilter, WorkoutParseError, WorkoutType};
