//! Per-participant scores for every workout modality.
//!
//! [`score`] is the single dispatch point on [`WorkoutType`]; everything
//! else in this module is a modality-specific helper it calls.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::model::{
    EmomMark, LeaderboardEntry, ParticipantProgress, Scaling, Session, SessionStatus, Step,
    UserId, WorkoutType,
};
use crate::time::{elapsed_seconds, format_clock};

/// Score of one participant, tagged by how it is measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Score {
    /// FOR_TIME participant who reached the last step.
    FinishedIn { seconds: i64 },
    /// FOR_TIME DNF or AMRAP total.
    Reps { reps: u32 },
    /// EMOM cumulative minute time; lower is better.
    CumulativeTime { seconds: i64 },
    /// TABATA/INTERVAL rep total from the interval counter.
    IntervalReps { reps: u32, completed_intervals: u32 },
}

impl Score {
    #[must_use]
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::FinishedIn { .. } | Self::CumulativeTime { .. })
    }

    #[must_use]
    pub fn reps(&self) -> Option<u32> {
        match self {
            Self::Reps { reps } | Self::IntervalReps { reps, .. } => Some(*reps),
            Self::FinishedIn { .. } | Self::CumulativeTime { .. } => None,
        }
    }

    #[must_use]
    pub fn seconds(&self) -> Option<i64> {
        match self {
            Self::FinishedIn { seconds } | Self::CumulativeTime { seconds } => Some(*seconds),
            Self::Reps { .. } | Self::IntervalReps { .. } => None,
        }
    }

    /// Human form: `mm:ss` for times, `N reps` for counts.
    #[must_use]
    pub fn display(&self) -> String {
        match self {
            Self::FinishedIn { seconds } | Self::CumulativeTime { seconds } => {
                format_clock(*seconds)
            }
            Self::Reps { reps } | Self::IntervalReps { reps, .. } => format!("{reps} reps"),
        }
    }

    /// Leaderboard row for this score.
    #[must_use]
    pub fn to_entry(&self, user_id: UserId, display_name: &str, scaling: Scaling) -> LeaderboardEntry {
        let completed_minutes = match self {
            Self::IntervalReps {
                completed_intervals,
                ..
            } => Some(*completed_intervals),
            _ => None,
        };
        LeaderboardEntry {
            user_id,
            display_name: display_name.to_owned(),
            scaling,
            finished: self.is_finished(),
            elapsed_seconds: self.seconds(),
            total_reps: self.reps(),
            completed_minutes,
        }
    }
}

/// Everything recorded for one participant in one session.
#[derive(Debug, Clone, Copy)]
pub struct ScoreInputs<'a> {
    pub progress: &'a ParticipantProgress,
    pub emom_marks: &'a [EmomMark],
    /// Interval step index to reps entered.
    pub interval_reps: &'a BTreeMap<u32, u32>,
}

/// Score a participant according to the session's workout type.
#[must_use]
pub fn score(session: &Session, now: i64, inputs: ScoreInputs<'_>) -> Score {
    match session.workout_type() {
        WorkoutType::ForTime => for_time(session, inputs.progress),
        WorkoutType::Amrap => Score::Reps {
            reps: amrap_reps(session, inputs.progress),
        },
        WorkoutType::Emom => Score::CumulativeTime {
            seconds: emom_cumulative_seconds(session, now, inputs.emom_marks),
        },
        WorkoutType::Tabata | WorkoutType::Interval => {
            let (reps, completed_intervals) = interval_tally(session.steps(), inputs.interval_reps);
            Score::IntervalReps {
                reps,
                completed_intervals,
            }
        }
    }
}

/// FOR_TIME: frozen finish time, else reps so far plus the cutoff partial.
#[must_use]
pub fn for_time(session: &Session, progress: &ParticipantProgress) -> Score {
    if let Some(seconds) = progress.finish_elapsed_seconds {
        return Score::FinishedIn { seconds };
    }
    if let Some(finished_at) = progress.finished_at {
        return Score::FinishedIn {
            seconds: elapsed_seconds(session, finished_at),
        };
    }
    Score::Reps {
        reps: session
            .reps_before(progress.current_step)
            .saturating_add(progress.dnf_partial_reps),
    }
}

/// AMRAP: full laps plus the reps into the current lap plus the cutoff partial.
#[must_use]
pub fn amrap_reps(session: &Session, progress: &ParticipantProgress) -> u32 {
    progress
        .rounds_completed
        .saturating_mul(session.reps_per_round())
        .saturating_add(session.reps_before(progress.current_step))
        .saturating_add(progress.dnf_partial_reps)
}

/// EMOM cumulative seconds at `now`.
///
/// Minutes fully behind the clock count their finish time, or 60 when not
/// finished or never marked. The running minute counts only once finished
/// while the session is still going; later minutes count nothing.
#[must_use]
pub fn emom_cumulative_seconds(session: &Session, now: i64, marks: &[EmomMark]) -> i64 {
    let planned = session.emom_plan().total_minutes();
    let elapsed = elapsed_seconds(session, now);
    let full_minutes = u32::try_from(elapsed / 60).unwrap_or(u32::MAX).min(planned);

    let by_minute: BTreeMap<u32, &EmomMark> =
        marks.iter().map(|mark| (mark.minute_index, mark)).collect();

    let past: i64 = (0..full_minutes)
        .map(|minute| by_minute.get(&minute).map_or(60, |mark| mark.penalty_seconds()))
        .sum();

    let current = if full_minutes < planned && session.status() != SessionStatus::Ended {
        by_minute
            .get(&full_minutes)
            .filter(|mark| mark.finished)
            .map_or(0, |mark| mark.penalty_seconds())
    } else {
        0
    };

    past + current
}

/// Total interval reps and the number of steps whose target was met.
#[must_use]
pub fn interval_tally(steps: &[Step], reps_by_step: &BTreeMap<u32, u32>) -> (u32, u32) {
    let total = reps_by_step
        .values()
        .fold(0_u32, |acc, reps| acc.saturating_add(*reps));
    let completed = steps
        .iter()
        .filter(|step| {
            step.target_reps.is_some_and(|target| {
                reps_by_step
                    .get(&step.index)
                    .is_some_and(|reps| *reps >= target)
            })
        })
        .count();
    (total, u32::try_from(completed).unwrap_or(u32::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        ClassId, ExerciseRow, QuantityType, WorkoutDefinition, WorkoutId, WorkoutMetadata,
    };
    use crate::time::FIXED_TEST_TIMESTAMP;

    const T0: i64 = FIXED_TEST_TIMESTAMP;

    fn session(workout_type: WorkoutType, reps: &[u32], metadata: WorkoutMetadata) -> Session {
        let rows = reps
            .iter()
            .enumerate()
            .map(|(i, r)| ExerciseRow {
                round: 1,
                subround: 1,
                position: i as u32,
                name: format!("Move {i}"),
                quantity_type: QuantityType::Reps,
                quantity: *r,
                target_reps: Some(*r),
            })
            .collect();
        let mut s = Session::prepare(
            ClassId::new(1),
            WorkoutId::new(1),
            &WorkoutDefinition {
                workout_type,
                rows,
                metadata,
            },
            20,
        );
        s.start(T0).unwrap();
        s
    }

    fn progress() -> ParticipantProgress {
        ParticipantProgress::new(ClassId::new(1), UserId::new(1))
    }

    #[test]
    fn for_time_dnf_counts_reps_and_partial() {
        let s = session(WorkoutType::ForTime, &[5, 10, 15], WorkoutMetadata::default());
        let mut p = progress();
        p.current_step = 2;
        p.dnf_partial_reps = 7;
        assert_eq!(for_time(&s, &p), Score::Reps { reps: 22 });
        assert_eq!(for_time(&s, &p).display(), "22 reps");
    }

    #[test]
    fn for_time_finish_time_is_frozen() {
        let s = session(WorkoutType::ForTime, &[5], WorkoutMetadata::default());
        let mut p = progress();
        p.current_step = 1;
        p.finished_at = Some(T0 + 200);
        p.finish_elapsed_seconds = Some(185);
        let score = for_time(&s, &p);
        assert_eq!(score, Score::FinishedIn { seconds: 185 });
        assert_eq!(score.display(), "03:05");
    }

    #[test]
    fn for_time_finish_without_stored_elapsed_excludes_pauses() {
        let mut s = session(WorkoutType::ForTime, &[5], WorkoutMetadata::default());
        s.pause(T0 + 60).unwrap();
        s.resume(T0 + 90).unwrap();
        let mut p = progress();
        p.current_step = 1;
        p.finished_at = Some(T0 + 200);
        assert_eq!(for_time(&s, &p), Score::FinishedIn { seconds: 170 });
    }

    #[test]
    fn amrap_total_counts_laps() {
        let s = session(WorkoutType::Amrap, &[5, 10, 15], WorkoutMetadata::default());
        let mut p = progress();
        p.rounds_completed = 2;
        p.current_step = 2;
        p.dnf_partial_reps = 3;
        assert_eq!(amrap_reps(&s, &p), 2 * 30 + 15 + 3);
    }

    fn emom_session() -> Session {
        session(
            WorkoutType::Emom,
            &[3, 3],
            WorkoutMetadata {
                emom_repeats: vec![5],
                ..WorkoutMetadata::default()
            },
        )
    }

    #[test]
    fn emom_counts_past_minutes_with_penalties() {
        let s = emom_session();
        let marks = [
            EmomMark::finished(0, 42, 2),
            EmomMark::penalty(1, 1),
            EmomMark::finished(3, 20, 2),
        ];
        // minute 2 unmarked, minute 3 is running and finished
        assert_eq!(emom_cumulative_seconds(&s, T0 + 190, &marks), 42 + 60 + 60 + 20);
        // running minute not yet finished counts 0
        assert_eq!(emom_cumulative_seconds(&s, T0 + 130, &marks[..2]), 102);
        assert_eq!(emom_cumulative_seconds(&s, T0 + 30, &[]), 0);
    }

    #[test]
    fn emom_ended_session_ignores_running_minute() {
        let mut s = emom_session();
        s.stop(T0 + 150);
        let marks = [EmomMark::finished(2, 10, 2)];
        assert_eq!(emom_cumulative_seconds(&s, T0 + 999, &marks), 120);
    }

    #[test]
    fn interval_tally_counts_targets_met() {
        let s = session(WorkoutType::Tabata, &[10, 12], WorkoutMetadata::default());
        let reps = BTreeMap::from([(0, 11), (1, 9)]);
        assert_eq!(interval_tally(s.steps(), &reps), (20, 1));
    }

    #[test]
    fn dispatch_builds_entries() {
        let s = session(WorkoutType::Amrap, &[5, 5], WorkoutMetadata::default());
        let mut p = progress();
        p.rounds_completed = 1;
        let inputs = ScoreInputs {
            progress: &p,
            emom_marks: &[],
            interval_reps: &BTreeMap::new(),
        };
        let entry = score(&s, T0 + 60, inputs).to_entry(UserId::new(1), "Ana", Scaling::Sc);
        assert!(!entry.finished);
        assert_eq!(entry.total_reps, Some(10));
        assert_eq!(entry.elapsed_seconds, None);
        assert_eq!(entry.scaling, Scaling::Sc);
    }
}
