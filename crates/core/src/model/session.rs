use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

use crate::model::ids::{ClassId, WorkoutId};
use crate::model::plan::{WorkoutDefinition, WorkoutMetadata};
use crate::model::step::Step;
use crate::model::workout::WorkoutType;
use crate::time::elapsed_seconds;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SessionError {
    #[error("session already started")]
    AlreadyStarted,

    #[error("session already ended")]
    AlreadyEnded,

    #[error("session has not started")]
    NotStarted,

    #[error("session is not live")]
    NotLive,

    #[error("time cap reached")]
    TimeUp,

    #[error("session has no steps")]
    NoSteps,

    #[error("{0} workouts do not track a step cursor on the server")]
    CursorNotTracked(WorkoutType),
}

//
// ─── STATUS ────────────────────────────────────────────────────────────────────
//

/// Coach-controlled lifecycle of a live class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Ready,
    Live,
    Paused,
    Ended,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ready => "ready",
            Self::Live => "live",
            Self::Paused => "paused",
            Self::Ended => "ended",
        })
    }
}

//
// ─── SESSION ───────────────────────────────────────────────────────────────────
//

/// One live run of a class.
///
/// All timestamps are epoch seconds. Only the transition methods mutate
/// timing fields, which keeps `pause_accumulated_seconds` monotonic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    class_id: ClassId,
    workout_id: WorkoutId,
    status: SessionStatus,
    started_at: Option<i64>,
    paused_at: Option<i64>,
    ended_at: Option<i64>,
    pause_accumulated_seconds: i64,
    time_cap_seconds: i64,
    workout_type: WorkoutType,
    steps: Vec<Step>,
    steps_cumulative_reps: Vec<u32>,
    #[serde(default)]
    metadata: WorkoutMetadata,
}

impl Session {
    /// Build a session in `Ready` state from a workout definition.
    #[must_use]
    pub fn prepare(
        class_id: ClassId,
        workout_id: WorkoutId,
        workout: &WorkoutDefinition,
        class_duration_minutes: u32,
    ) -> Self {
        let plan = workout.build_plan();
        Self {
            class_id,
            workout_id,
            status: SessionStatus::Ready,
            started_at: None,
            paused_at: None,
            ended_at: None,
            pause_accumulated_seconds: 0,
            time_cap_seconds: workout.time_cap_seconds(class_duration_minutes),
            workout_type: workout.workout_type,
            steps: plan.steps,
            steps_cumulative_reps: plan.cumulative_reps,
            metadata: workout.metadata.clone(),
        }
    }

    /// Override the time cap (0 = uncapped).
    #[must_use]
    pub fn with_time_cap(mut self, seconds: i64) -> Self {
        self.time_cap_seconds = seconds.max(0);
        self
    }

    #[must_use]
    pub fn class_id(&self) -> ClassId {
        self.class_id
    }

    #[must_use]
    pub fn workout_id(&self) -> WorkoutId {
        self.workout_id
    }

    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    #[must_use]
    pub fn started_at(&self) -> Option<i64> {
        self.started_at
    }

    #[must_use]
    pub fn paused_at(&self) -> Option<i64> {
        self.paused_at
    }

    #[must_use]
    pub fn ended_at(&self) -> Option<i64> {
        self.ended_at
    }

    #[must_use]
    pub fn pause_accumulated_seconds(&self) -> i64 {
        self.pause_accumulated_seconds
    }

    #[must_use]
    pub fn time_cap_seconds(&self) -> i64 {
        self.time_cap_seconds
    }

    #[must_use]
    pub fn workout_type(&self) -> WorkoutType {
        self.workout_type
    }

    #[must_use]
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    #[must_use]
    pub fn steps_cumulative_reps(&self) -> &[u32] {
        &self.steps_cumulative_reps
    }

    #[must_use]
    pub fn metadata(&self) -> &WorkoutMetadata {
        &self.metadata
    }

    #[must_use]
    pub fn step_count(&self) -> u32 {
        u32::try_from(self.steps.len()).unwrap_or(u32::MAX)
    }

    /// Steps are present; an empty list means the class is still being set up.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        !self.steps.is_empty()
    }

    /// Reps completed once the cursor sits at `step`.
    #[must_use]
    pub fn reps_before(&self, step: u32) -> u32 {
        if step == 0 {
            return 0;
        }
        let idx = (step as usize - 1).min(self.steps_cumulative_reps.len().saturating_sub(1));
        self.steps_cumulative_reps.get(idx).copied().unwrap_or(0)
    }

    /// Reps in one full lap of the step list (AMRAP).
    #[must_use]
    pub fn reps_per_round(&self) -> u32 {
        self.steps_cumulative_reps.last().copied().unwrap_or(0)
    }

    /// Minute-by-minute round plan for EMOM sessions.
    #[must_use]
    pub fn emom_plan(&self) -> EmomPlan {
        let minute_limit = if self.time_cap_seconds > 0 {
            u32::try_from((self.time_cap_seconds + 59) / 60).unwrap_or(EmomPlan::MAX_MINUTES)
        } else {
            EmomPlan::MAX_MINUTES
        };
        EmomPlan::from_steps_within(&self.steps, &self.metadata.emom_repeats, minute_limit)
    }

    #[must_use]
    pub fn is_time_up(&self, now: i64) -> bool {
        self.time_cap_seconds > 0 && elapsed_seconds(self, now) >= self.time_cap_seconds
    }

    //
    // ─── TRANSITIONS ───────────────────────────────────────────────────────────
    //

    /// `ready → live`.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::AlreadyStarted` when live or paused and
    /// `SessionError::AlreadyEnded` once ended.
    pub fn start(&mut self, now: i64) -> Result<(), SessionError> {
        match self.status {
            SessionStatus::Ready => {
                self.status = SessionStatus::Live;
                self.started_at = Some(now);
                self.paused_at = None;
                self.ended_at = None;
                self.pause_accumulated_seconds = 0;
                Ok(())
            }
            SessionStatus::Live | SessionStatus::Paused => Err(SessionError::AlreadyStarted),
            SessionStatus::Ended => Err(SessionError::AlreadyEnded),
        }
    }

    /// `live → paused`. Pausing an already paused session keeps the first pause time.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotStarted` before start and `SessionError::AlreadyEnded` after stop.
    pub fn pause(&mut self, now: i64) -> Result<(), SessionError> {
        match self.status {
            SessionStatus::Live | SessionStatus::Paused => {
                self.status = SessionStatus::Paused;
                self.paused_at.get_or_insert(now);
                Ok(())
            }
            SessionStatus::Ready => Err(SessionError::NotStarted),
            SessionStatus::Ended => Err(SessionError::AlreadyEnded),
        }
    }

    /// `paused → live`, folding the pause interval into the accumulated total.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotStarted` before start and `SessionError::AlreadyEnded` after stop.
    pub fn resume(&mut self, now: i64) -> Result<(), SessionError> {
        match self.status {
            SessionStatus::Paused => {
                self.close_pause(now);
                self.status = SessionStatus::Live;
                Ok(())
            }
            SessionStatus::Live => Ok(()),
            SessionStatus::Ready => Err(SessionError::NotStarted),
            SessionStatus::Ended => Err(SessionError::AlreadyEnded),
        }
    }

    /// Any state → `ended`. Stopping twice keeps the first end time.
    pub fn stop(&mut self, now: i64) {
        if self.status == SessionStatus::Ended {
            return;
        }
        if self.status == SessionStatus::Paused {
            self.close_pause(now);
        }
        self.status = SessionStatus::Ended;
        self.ended_at = Some(now);
    }

    /// End a live session whose cap has elapsed, freezing time at the cap.
    ///
    /// Returns `true` when the session was ended by this call.
    pub fn end_if_cap_reached(&mut self, now: i64) -> bool {
        if self.status != SessionStatus::Live || self.time_cap_seconds <= 0 {
            return false;
        }
        let elapsed = elapsed_seconds(self, now);
        if elapsed < self.time_cap_seconds {
            return false;
        }
        let overshoot = elapsed - self.time_cap_seconds;
        self.status = SessionStatus::Ended;
        self.ended_at = Some(now - overshoot);
        true
    }

    /// Gate for participant progress mutations.
    ///
    /// # Errors
    ///
    /// - `SessionError::NotLive` unless the session is live.
    /// - `SessionError::TimeUp` once the cap has elapsed.
    /// - `SessionError::NoSteps` when the plan is empty.
    pub fn ensure_accepting_progress(&self, now: i64) -> Result<(), SessionError> {
        if self.status != SessionStatus::Live {
            return Err(SessionError::NotLive);
        }
        if self.is_time_up(now) {
            return Err(SessionError::TimeUp);
        }
        if self.steps.is_empty() {
            return Err(SessionError::NoSteps);
        }
        Ok(())
    }

    fn close_pause(&mut self, now: i64) {
        if let Some(paused_at) = self.paused_at.take() {
            self.pause_accumulated_seconds += (now - paused_at).max(0);
        }
    }
}

//
// ─── EMOM PLAN ─────────────────────────────────────────────────────────────────
//

/// Which round runs in each minute of an EMOM session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmomPlan {
    minute_rounds: Vec<u32>,
    round_lengths: BTreeMap<u32, u32>,
}

impl EmomPlan {
    /// Upper bound on planned minutes, whatever the repeat counts say.
    pub const MAX_MINUTES: u32 = 24 * 60;

    /// Build the plan from steps grouped by round and per-round repeat counts.
    ///
    /// Without repeats every round from 1 to the highest round runs once.
    #[must_use]
    pub fn from_steps(steps: &[Step], repeats: &[u32]) -> Self {
        Self::from_steps_within(steps, repeats, Self::MAX_MINUTES)
    }

    /// Like [`EmomPlan::from_steps`], stopping after `minute_limit` minutes.
    #[must_use]
    pub fn from_steps_within(steps: &[Step], repeats: &[u32], minute_limit: u32) -> Self {
        let mut round_lengths: BTreeMap<u32, u32> = BTreeMap::new();
        for step in steps {
            *round_lengths.entry(step.round.max(1)).or_default() += 1;
        }

        let repeats: Vec<u32> = if repeats.is_empty() {
            let max_round = round_lengths.keys().next_back().copied().unwrap_or(0);
            vec![1; max_round as usize]
        } else {
            repeats.to_vec()
        };

        let limit = minute_limit.min(Self::MAX_MINUTES) as usize;
        let mut minute_rounds = Vec::new();
        for (offset, count) in repeats.iter().enumerate() {
            let room = limit.saturating_sub(minute_rounds.len());
            if room == 0 {
                break;
            }
            let round = u32::try_from(offset + 1).unwrap_or(u32::MAX);
            minute_rounds.extend(std::iter::repeat_n(round, (*count as usize).min(room)));
        }

        Self {
            minute_rounds,
            round_lengths,
        }
    }

    #[must_use]
    pub fn total_minutes(&self) -> u32 {
        u32::try_from(self.minute_rounds.len()).unwrap_or(u32::MAX)
    }

    /// Minute index for an elapsed time, clamped to the plan.
    #[must_use]
    pub fn minute_index(&self, elapsed: i64) -> u32 {
        let raw = u32::try_from((elapsed.max(0)) / 60).unwrap_or(u32::MAX);
        raw.min(self.total_minutes().saturating_sub(1))
    }

    /// Whether every planned minute has elapsed.
    #[must_use]
    pub fn is_done(&self, elapsed: i64) -> bool {
        let total = i64::from(self.total_minutes());
        total > 0 && elapsed >= total * 60
    }

    #[must_use]
    pub fn round_for_minute(&self, minute: u32) -> Option<u32> {
        self.minute_rounds.get(minute as usize).copied()
    }

    /// Exercises to complete in the given minute.
    #[must_use]
    pub fn round_length(&self, minute: u32) -> u32 {
        self.round_for_minute(minute)
            .and_then(|round| self.round_lengths.get(&round).copied())
            .unwrap_or(0)
    }
}
