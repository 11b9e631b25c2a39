//! Contracts between live-class clients and the authoritative server.
//!
//! Timestamps crossing these traits are integer epoch seconds.

use async_trait::async_trait;
use live_core::model::{
    ClassId, EmomMark, LeaderboardEntry, ParticipantProgress, ProgressError, Scaling,
    ScalingFilter, Session, SessionError, UserId, WorkoutType,
};
use live_core::sequencer::Direction;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

/// Errors surfaced by live-class gateways.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum GatewayError {
    #[error("class not found")]
    NotFound,

    #[error("class session not started")]
    NotStarted,

    #[error("session is not live")]
    NotLive,

    #[error("time cap reached")]
    TimeUp,

    #[error("session already started")]
    AlreadyStarted,

    #[error("session already ended")]
    AlreadyEnded,

    #[error("user {0} is not booked into this class")]
    NotBooked(UserId),

    #[error("operation not supported for {0} workouts")]
    Unsupported(WorkoutType),

    #[error("rejected: {0}")]
    Rejected(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl GatewayError {
    /// Failures worth leaving to the next poll rather than surfacing.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Connection(_))
    }
}

impl From<SessionError> for GatewayError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::AlreadyStarted => Self::AlreadyStarted,
            SessionError::AlreadyEnded => Self::AlreadyEnded,
            SessionError::NotStarted | SessionError::NoSteps => Self::NotStarted,
            SessionError::NotLive => Self::NotLive,
            SessionError::TimeUp => Self::TimeUp,
            SessionError::CursorNotTracked(workout_type) => Self::Unsupported(workout_type),
            other => Self::Rejected(other.to_string()),
        }
    }
}

impl From<ProgressError> for GatewayError {
    fn from(err: ProgressError) -> Self {
        Self::Rejected(err.to_string())
    }
}

//
// ─── WIRE TYPES ────────────────────────────────────────────────────────────────
//

/// Session state plus the server clock it was read at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session: Session,
    pub server_now: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvanceOutcome {
    pub current_step: u32,
    pub rounds_completed: u32,
    pub finished: bool,
    /// `false` when the request was stale and ignored.
    pub applied: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialOutcome {
    /// Value held by the server after the call.
    pub reps: u32,
    /// `false` when an earlier submission already stood.
    pub accepted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Session,
    Progress,
    Leaderboard,
}

/// Push hint that something in a class changed; clients refetch on receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeNotice {
    pub class_id: ClassId,
    pub kind: ChangeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
}

//
// ─── TRAITS ────────────────────────────────────────────────────────────────────
//

/// Participant-scoped access to a live class.
#[async_trait]
pub trait LiveClassGateway: Send + Sync {
    /// The participant this gateway acts for.
    fn user_id(&self) -> UserId;

    /// Current session, or `None` while the class is still being prepared.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::NotFound` for unknown classes, or transport errors.
    async fn get_session(&self, class_id: ClassId) -> Result<Option<SessionSnapshot>, GatewayError>;

    /// # Errors
    ///
    /// Returns `GatewayError::NotBooked` when the caller has no booking.
    async fn get_my_progress(&self, class_id: ClassId) -> Result<ParticipantProgress, GatewayError>;

    /// Move the server cursor one step.
    ///
    /// `seq` is the client's monotonic request number; requests at or below
    /// the last applied number are ignored and report `applied: false`.
    ///
    /// # Errors
    ///
    /// - `GatewayError::NotLive` unless the session is live.
    /// - `GatewayError::TimeUp` when the cap elapsed; the session is ended.
    /// - `GatewayError::Unsupported` for workouts without a server cursor.
    async fn advance(
        &self,
        class_id: ClassId,
        direction: Direction,
        seq: u64,
    ) -> Result<AdvanceOutcome, GatewayError>;

    /// Store the cutoff partial reps. Only the first submission counts.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::NotStarted` before the session started.
    async fn submit_partial(&self, class_id: ClassId, reps: u32) -> Result<PartialOutcome, GatewayError>;

    /// Upsert the caller's result for one EMOM minute.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Unsupported` for non-EMOM sessions.
    async fn mark_emom_minute(&self, class_id: ClassId, mark: EmomMark) -> Result<(), GatewayError>;

    /// Unranked entries matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::NotFound` for unknown classes, or transport errors.
    async fn get_leaderboard(
        &self,
        class_id: ClassId,
        filter: ScalingFilter,
    ) -> Result<Vec<LeaderboardEntry>, GatewayError>;

    /// Record reps for one interval step.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Unsupported` unless the workout is TABATA/INTERVAL
    /// and `GatewayError::Rejected` for an out-of-range step.
    async fn post_interval_score(
        &self,
        class_id: ClassId,
        step_index: u32,
        reps: u32,
    ) -> Result<(), GatewayError>;

    /// # Errors
    ///
    /// Returns `GatewayError::NotBooked` when the caller has no booking.
    async fn set_scaling(&self, class_id: ClassId, scaling: Scaling) -> Result<(), GatewayError>;
}

/// Coach controls for a class.
#[async_trait]
pub trait CoachGateway: Send + Sync {
    /// Start the class, resetting every participant's progress.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::AlreadyStarted` or `GatewayError::AlreadyEnded`.
    async fn start_session(&self, class_id: ClassId) -> Result<SessionSnapshot, GatewayError>;

    /// # Errors
    ///
    /// Returns `GatewayError::NotStarted` before start, `GatewayError::AlreadyEnded` after stop.
    async fn pause_session(&self, class_id: ClassId) -> Result<SessionSnapshot, GatewayError>;

    /// # Errors
    ///
    /// Returns `GatewayError::NotStarted` before start, `GatewayError::AlreadyEnded` after stop.
    async fn resume_session(&self, class_id: ClassId) -> Result<SessionSnapshot, GatewayError>;

    /// End the class. Stopping twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::NotStarted` when no session exists.
    async fn stop_session(&self, class_id: ClassId) -> Result<SessionSnapshot, GatewayError>;

    /// Correct an AMRAP participant's total reps.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Unsupported` for non-AMRAP sessions.
    async fn set_amrap_total(
        &self,
        class_id: ClassId,
        user_id: UserId,
        total_reps: u32,
    ) -> Result<(), GatewayError>;

    /// Set (or clear with `None`) a FOR_TIME finish, in active seconds.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Unsupported` for non-FOR_TIME sessions.
    async fn set_for_time_finish(
        &self,
        class_id: ClassId,
        user_id: UserId,
        finish_seconds: Option<i64>,
    ) -> Result<(), GatewayError>;

    /// Record a FOR_TIME DNF as a total rep count, clearing any finish.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Unsupported` for non-FOR_TIME sessions.
    async fn set_for_time_total(
        &self,
        class_id: ClassId,
        user_id: UserId,
        total_reps: u32,
    ) -> Result<(), GatewayError>;

    /// Overwrite a participant's result for one EMOM minute.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Unsupported` for non-EMOM sessions and
    /// `GatewayError::NotStarted` before the class started.
    async fn set_emom_mark(
        &self,
        class_id: ClassId,
        user_id: UserId,
        mark: EmomMark,
    ) -> Result<(), GatewayError>;

    /// Enter interval reps on a participant's behalf.
    ///
    /// # Errors
    ///
    /// Same as [`LiveClassGateway::post_interval_score`].
    async fn post_interval_score_for(
        &self,
        class_id: ClassId,
        user_id: UserId,
        step_index: u32,
        reps: u32,
    ) -> Result<(), GatewayError>;
}

/// Push channel of change notices for a class.
pub trait ChangeFeed: Send + Sync {
    fn subscribe(&self, class_id: ClassId) -> broadcast::Receiver<ChangeNotice>;
}
