use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::{ClassId, UserId};
use crate::model::workout::Scaling;
use crate::sequencer::Direction;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProgressError {
    #[error("step index {index} is out of range for {len} steps")]
    StepOutOfRange { index: u32, len: u32 },
}

/// Check an interval step index against the session's step list.
///
/// # Errors
///
/// Returns `ProgressError::StepOutOfRange` when `index >= len`.
pub fn check_step_index(index: u32, len: u32) -> Result<(), ProgressError> {
    if index < len {
        Ok(())
    } else {
        Err(ProgressError::StepOutOfRange { index, len })
    }
}

/// Server-side progress of one participant in one session.
///
/// FOR_TIME uses `current_step` and `finished_at`; AMRAP additionally counts
/// `rounds_completed`. Both keep the reps typed in at cutoff in `dnf_partial_reps`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantProgress {
    pub class_id: ClassId,
    pub user_id: UserId,
    pub current_step: u32,
    pub finished_at: Option<i64>,
    /// Active elapsed seconds captured when the participant reached the last step.
    pub finish_elapsed_seconds: Option<i64>,
    pub rounds_completed: u32,
    pub dnf_partial_reps: u32,
    pub partial_submitted: bool,
    pub scaling: Scaling,
    /// Highest advance sequence number applied so far.
    pub last_advance_seq: u64,
}

/// What a server-side advance did to the cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceEffect {
    Moved,
    /// The request was at or below the last applied sequence.
    Stale,
    /// Clamped at a bound; nothing changed.
    Unchanged,
}

impl ParticipantProgress {
    #[must_use]
    pub fn new(class_id: ClassId, user_id: UserId) -> Self {
        Self {
            class_id,
            user_id,
            current_step: 0,
            finished_at: None,
            finish_elapsed_seconds: None,
            rounds_completed: 0,
            dnf_partial_reps: 0,
            partial_submitted: false,
            scaling: Scaling::Rx,
            last_advance_seq: 0,
        }
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }

    /// Clear everything except identity and scaling. Used when a session (re)starts.
    pub fn reset(&mut self) {
        let scaling = self.scaling;
        *self = Self::new(self.class_id, self.user_id);
        self.scaling = scaling;
    }

    /// Record a sequence number, returning `false` when it is stale.
    ///
    /// Sequence 0 means the caller does not order its requests and is always applied.
    fn accept_seq(&mut self, seq: u64) -> bool {
        if seq == 0 {
            return true;
        }
        if seq <= self.last_advance_seq {
            return false;
        }
        self.last_advance_seq = seq;
        true
    }

    /// FOR_TIME advance: clamp to `[0, step_count]`.
    ///
    /// Reaching `step_count` stamps `finished_at` once; the first finish time
    /// is kept even if the participant steps back afterwards.
    pub fn advance_for_time(
        &mut self,
        direction: Direction,
        step_count: u32,
        seq: u64,
        now: i64,
        elapsed: i64,
    ) -> AdvanceEffect {
        if !self.accept_seq(seq) {
            return AdvanceEffect::Stale;
        }

        let before = self.current_step;
        self.current_step = match direction {
            Direction::Forward => before.saturating_add(1).min(step_count),
            Direction::Backward => before.saturating_sub(1),
        };

        if self.current_step >= step_count && self.finished_at.is_none() {
            self.finished_at = Some(now);
            self.finish_elapsed_seconds = Some(elapsed.max(0));
        }
        if self.current_step < step_count {
            self.dnf_partial_reps = 0;
        }

        if self.current_step == before {
            AdvanceEffect::Unchanged
        } else {
            AdvanceEffect::Moved
        }
    }

    /// AMRAP advance: wrap modulo `step_count`, counting laps.
    ///
    /// Backward from step 0 unwinds one lap when at least one is completed.
    pub fn advance_amrap(&mut self, direction: Direction, step_count: u32, seq: u64) -> AdvanceEffect {
        if !self.accept_seq(seq) {
            return AdvanceEffect::Stale;
        }
        if step_count == 0 {
            return AdvanceEffect::Unchanged;
        }

        let before = (self.current_step, self.rounds_completed);
        match direction {
            Direction::Forward => {
                let next = self.current_step.saturating_add(1);
                if next >= step_count {
                    self.current_step = 0;
                    self.rounds_completed = self.rounds_completed.saturating_add(1);
                } else {
                    self.current_step = next;
                }
            }
            Direction::Backward => {
                if self.current_step > 0 {
                    self.current_step -= 1;
                } else if self.rounds_completed > 0 {
                    self.current_step = step_count - 1;
                    self.rounds_completed -= 1;
                }
            }
        }
        self.dnf_partial_reps = 0;

        if (self.current_step, self.rounds_completed) == before {
            AdvanceEffect::Unchanged
        } else {
            AdvanceEffect::Moved
        }
    }

    /// Store the cutoff partial reps. Only the first submission counts.
    ///
    /// Returns `true` if this call stored the value.
    pub fn submit_partial(&mut self, reps: u32) -> bool {
        if self.partial_submitted {
            return false;
        }
        self.dnf_partial_reps = reps;
        self.partial_submitted = true;
        true
    }

    /// Coach correction: map a total rep count onto laps, step and partial reps.
    pub fn set_amrap_total(&mut self, total_reps: u32, cumulative_reps: &[u32]) {
        let reps_per_round = cumulative_reps.last().copied().unwrap_or(0);
        let (rounds, within) = if reps_per_round > 0 {
            (total_reps / reps_per_round, total_reps % reps_per_round)
        } else {
            (0, total_reps)
        };

        let mut step = u32::try_from(cumulative_reps.len()).unwrap_or(u32::MAX);
        let mut partial = 0;
        for (i, need) in cumulative_reps.iter().enumerate() {
            if within < *need {
                step = u32::try_from(i).unwrap_or(u32::MAX);
                let prev = if i > 0 { cumulative_reps[i - 1] } else { 0 };
                partial = within.saturating_sub(prev);
                break;
            }
        }
        if cumulative_reps.is_empty() {
            step = 0;
        }

        self.rounds_completed = rounds;
        self.current_step = step;
        self.dnf_partial_reps = partial;
    }

    /// Coach correction: record a FOR_TIME DNF as a total rep count.
    ///
    /// Clears any finish. The total lands on the last step the reps fully
    /// cover, never past the final step, with the rest stored as the partial.
    pub fn set_for_time_total(&mut self, total_reps: u32, cumulative_reps: &[u32]) {
        let last = cumulative_reps.len().saturating_sub(1);
        let covered = cumulative_reps
            .iter()
            .take(last)
            .take_while(|need| total_reps >= **need)
            .count();
        let before = if covered > 0 { cumulative_reps[covered - 1] } else { 0 };

        self.current_step = u32::try_from(covered).unwrap_or(u32::MAX);
        self.dnf_partial_reps = total_reps.saturating_sub(before);
        self.partial_submitted = true;
        self.finished_at = None;
        self.finish_elapsed_seconds = None;
    }

    /// Coach correction: set or clear the FOR_TIME finish, as active seconds.
    pub fn set_for_time_finish(&mut self, finish_seconds: Option<i64>, started_at: i64) {
        match finish_seconds {
            Some(seconds) => {
                let seconds = seconds.max(0);
                self.finished_at = Some(started_at + seconds);
                self.finish_elapsed_seconds = Some(seconds);
            }
            None => {
                self.finished_at = None;
                self.finish_elapsed_seconds = None;
            }
        }
    }
}

//
// ─── EMOM MARKS ────────────────────────────────────────────────────────────────
//

/// Result of one EMOM minute for one participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmomMark {
    pub minute_index: u32,
    pub finished: bool,
    /// Seconds into the minute when the round was done; 60 means not finished.
    pub finish_seconds: Option<u32>,
    /// Exercises completed in the minute; informational.
    #[serde(default)]
    pub exercises_completed: u32,
}

impl EmomMark {
    /// Penalty mark for a minute that rolled over unfinished.
    #[must_use]
    pub fn penalty(minute_index: u32, exercises_completed: u32) -> Self {
        Self {
            minute_index,
            finished: false,
            finish_seconds: Some(60),
            exercises_completed,
        }
    }

    #[must_use]
    pub fn finished(minute_index: u32, seconds_into_minute: u32, exercises_completed: u32) -> Self {
        Self {
            minute_index,
            finished: true,
            finish_seconds: Some(seconds_into_minute),
            exercises_completed,
        }
    }

    /// Clamp a mark for storage.
    ///
    /// The minute is clamped to the plan; missing seconds become 0 when
    /// finished and 60 otherwise.
    #[must_use]
    pub fn normalized(self, total_minutes: u32) -> Self {
        let minute_index = self.minute_index.min(total_minutes.saturating_sub(1));
        let finish_seconds = match self.finish_seconds {
            Some(seconds) => seconds.min(60),
            None if self.finished => 0,
            None => 60,
        };
        Self {
            minute_index,
            finish_seconds: Some(finish_seconds),
            ..self
        }
    }

    /// Seconds this minute adds to the cumulative EMOM time.
    #[must_use]
    pub fn penalty_seconds(&self) -> i64 {
        if self.finished {
            i64::from(self.finish_seconds.unwrap_or(0).min(59))
        } else {
            60
        }
    }
}

//
// ─── LEADERBOARD ENTRY ─────────────────────────────────────────────────────────
//

/// One row of a leaderboard, derived from progress and scoring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub user_id: UserId,
    pub display_name: String,
    pub scaling: Scaling,
    pub finished: bool,
    pub elapsed_seconds: Option<i64>,
    pub total_reps: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_minutes: Option<u32>,
}
