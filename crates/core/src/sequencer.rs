//! Client-side step cursor.
//!
//! Moves are applied optimistically and handed back as [`CursorMove`] values
//! so a failed network call can undo exactly what was done. The server owns
//! the authoritative progress; [`StepCursor::sync_from_server`] adopts it
//! whenever no move is in flight.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use thiserror::Error;

use crate::model::{EmomMark, EmomPlan, SessionStatus, WorkoutType};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SequencerError {
    #[error("cursor only moves while the session is live (status: {0})")]
    NotLive(SessionStatus),

    #[error("cursor is already at a bound")]
    AtBoundary,

    #[error("minute already completed; wait for the next minute")]
    MinuteComplete,

    #[error("{0} workouts have no step cursor")]
    NoCursor(WorkoutType),
}

//
// ─── DIRECTION ─────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    #[serde(rename = "next")]
    Forward,
    #[serde(rename = "prev")]
    Backward,
}

impl Direction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Forward => "next",
            Self::Backward => "prev",
        }
    }

    #[must_use]
    pub fn reversed(self) -> Self {
        match self {
            Self::Forward => Self::Backward,
            Self::Backward => Self::Forward,
        }
    }
}

//
// ─── MOVES ─────────────────────────────────────────────────────────────────────
//

/// AMRAP lap bookkeeping caused by a move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LapChange {
    None,
    /// Forward past the last step back to 0.
    Wrapped,
    /// Backward from step 0 into the previous lap.
    Unwrapped,
}

impl LapChange {
    fn inverse(self) -> Self {
        match self {
            Self::None => Self::None,
            Self::Wrapped => Self::Unwrapped,
            Self::Unwrapped => Self::Wrapped,
        }
    }
}

/// One optimistic cursor move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CursorMove {
    pub direction: Direction,
    pub from: u32,
    pub to: u32,
    pub lap: LapChange,
    /// Cursor generation the move was made in. A server sync bumps it.
    pub generation: u64,
}

impl CursorMove {
    /// The move that undoes this one.
    #[must_use]
    pub fn inverse(&self) -> Self {
        Self {
            direction: self.direction.reversed(),
            from: self.to,
            to: self.from,
            lap: self.lap.inverse(),
            generation: self.generation,
        }
    }
}

//
// ─── CURSOR ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorMode {
    /// Clamp to `[0, step_count]`; `step_count` means finished.
    ForTime { step_count: u32 },
    /// Wrap modulo `step_count`.
    Amrap { step_count: u32 },
    /// Clamp to `[0, round_length]` within the current minute.
    Emom { round_length: u32 },
}

impl CursorMode {
    /// Cursor mode for a workout, or `None` for interval workouts.
    #[must_use]
    pub fn for_workout(workout_type: WorkoutType, step_count: u32) -> Option<Self> {
        match workout_type {
            WorkoutType::ForTime => Some(Self::ForTime { step_count }),
            WorkoutType::Amrap => Some(Self::Amrap { step_count }),
            WorkoutType::Emom => Some(Self::Emom { round_length: 0 }),
            WorkoutType::Tabata | WorkoutType::Interval => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepCursor {
    mode: CursorMode,
    position: u32,
    laps: u32,
    generation: u64,
    in_flight: u32,
}

impl StepCursor {
    #[must_use]
    pub fn new(mode: CursorMode) -> Self {
        Self {
            mode,
            position: 0,
            laps: 0,
            generation: 0,
            in_flight: 0,
        }
    }

    #[must_use]
    pub fn mode(&self) -> CursorMode {
        self.mode
    }

    #[must_use]
    pub fn position(&self) -> u32 {
        self.position
    }

    /// Completed AMRAP laps as last known locally.
    #[must_use]
    pub fn laps(&self) -> u32 {
        self.laps
    }

    #[must_use]
    pub fn in_flight(&self) -> u32 {
        self.in_flight
    }

    /// FOR_TIME: the cursor sits past the last step.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        matches!(self.mode, CursorMode::ForTime { step_count } if step_count > 0 && self.position >= step_count)
    }

    /// EMOM: every exercise of the current minute is done.
    #[must_use]
    pub fn minute_complete(&self) -> bool {
        matches!(self.mode, CursorMode::Emom { round_length } if round_length > 0 && self.position >= round_length)
    }

    /// Apply one move optimistically.
    ///
    /// # Errors
    ///
    /// - `SequencerError::NotLive` unless `status` is live.
    /// - `SequencerError::AtBoundary` when the move would not change anything.
    /// - `SequencerError::MinuteComplete` for forward moves in a finished EMOM minute.
    pub fn advance(
        &mut self,
        direction: Direction,
        status: SessionStatus,
    ) -> Result<CursorMove, SequencerError> {
        if status != SessionStatus::Live {
            return Err(SequencerError::NotLive(status));
        }

        let from = self.position;
        let (to, lap) = match (self.mode, direction) {
            (CursorMode::ForTime { step_count }, Direction::Forward) => {
                (from.saturating_add(1).min(step_count), LapChange::None)
            }
            (CursorMode::Amrap { step_count }, Direction::Forward) => {
                if step_count == 0 {
                    (from, LapChange::None)
                } else if from + 1 >= step_count {
                    (0, LapChange::Wrapped)
                } else {
                    (from + 1, LapChange::None)
                }
            }
            (CursorMode::Amrap { step_count }, Direction::Backward) => {
                if from > 0 {
                    (from - 1, LapChange::None)
                } else if self.laps > 0 && step_count > 0 {
                    (step_count - 1, LapChange::Unwrapped)
                } else {
                    (from, LapChange::None)
                }
            }
            (CursorMode::Emom { round_length }, Direction::Forward) => {
                if self.minute_complete() {
                    return Err(SequencerError::MinuteComplete);
                }
                (from.saturating_add(1).min(round_length), LapChange::None)
            }
            (CursorMode::ForTime { .. } | CursorMode::Emom { .. }, Direction::Backward) => {
                (from.saturating_sub(1), LapChange::None)
            }
        };

        if to == from && lap == LapChange::None {
            return Err(SequencerError::AtBoundary);
        }

        let mv = CursorMove {
            direction,
            from,
            to,
            lap,
            generation: self.generation,
        };
        self.apply(&mv);
        self.in_flight += 1;
        Ok(mv)
    }

    /// The server accepted `mv`.
    pub fn confirm(&mut self, mv: &CursorMove) {
        if mv.generation == self.generation {
            self.in_flight = self.in_flight.saturating_sub(1);
        }
    }

    /// Undo `mv` after a failed request.
    ///
    /// Returns `false` when a server sync already replaced the state the move
    /// was made against, in which case nothing is undone.
    pub fn rollback(&mut self, mv: &CursorMove) -> bool {
        if mv.generation != self.generation {
            return false;
        }
        self.apply(&mv.inverse());
        self.in_flight = self.in_flight.saturating_sub(1);
        true
    }

    /// Adopt server progress unless a local move is still unresolved.
    pub fn sync_from_server(&mut self, position: u32, laps: u32) -> bool {
        if self.in_flight > 0 {
            return false;
        }
        if (position, laps) != (self.position, self.laps) {
            self.position = position;
            self.laps = laps;
        }
        self.generation += 1;
        true
    }

    /// EMOM: start a fresh minute with `round_length` exercises.
    pub fn start_minute(&mut self, round_length: u32) {
        self.mode = CursorMode::Emom { round_length };
        self.position = 0;
        self.generation += 1;
        self.in_flight = 0;
    }

    /// Step the current position the way `mv` stepped its own start.
    ///
    /// Moves resolve out of order, so an undo may land on a position other
    /// than `mv.to`. AMRAP positions stay in `[0, step_count)`; the others stay
    /// within their bound.
    fn apply(&mut self, mv: &CursorMove) {
        let position = i64::from(self.position);
        let moved = match self.mode {
            CursorMode::Amrap { step_count } if step_count > 0 => {
                let step = match mv.direction {
                    Direction::Forward => 1,
                    Direction::Backward => -1,
                };
                (position + step).rem_euclid(i64::from(step_count))
            }
            CursorMode::Amrap { .. } => 0,
            CursorMode::ForTime { step_count: bound } | CursorMode::Emom { round_length: bound } => {
                let delta = i64::from(mv.to) - i64::from(mv.from);
                (position + delta).clamp(0, i64::from(bound))
            }
        };
        self.position = u32::try_from(moved).unwrap_or(0);
        match mv.lap {
            LapChange::None => {}
            LapChange::Wrapped => self.laps = self.laps.saturating_add(1),
            LapChange::Unwrapped => self.laps = self.laps.saturating_sub(1),
        }
    }
}

//
// ─── EMOM MINUTES ──────────────────────────────────────────────────────────────
//

/// Tracks EMOM minute boundaries and the marks to send for them.
///
/// Each minute index produces at most one mark. A mark stays queued until
/// [`EmomMinuteTracker::acknowledge`] confirms the server stored it.
#[derive(Debug, Clone, Default)]
pub struct EmomMinuteTracker {
    plan: EmomPlan,
    current_minute: Option<u32>,
    sent: BTreeSet<u32>,
    pending: VecDeque<EmomMark>,
}

impl EmomMinuteTracker {
    #[must_use]
    pub fn new(plan: EmomPlan) -> Self {
        Self {
            plan,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn plan(&self) -> &EmomPlan {
        &self.plan
    }

    #[must_use]
    pub fn current_minute(&self) -> Option<u32> {
        self.current_minute
    }

    /// The server acknowledged the mark for `minute`.
    #[must_use]
    pub fn is_sent(&self, minute: u32) -> bool {
        self.sent.contains(&minute)
    }

    /// A mark for `minute` is queued or already acknowledged.
    #[must_use]
    pub fn is_marked(&self, minute: u32) -> bool {
        self.sent.contains(&minute) || self.pending.iter().any(|m| m.minute_index == minute)
    }

    /// Advance to the minute `elapsed` falls in.
    ///
    /// On rollover an unfinished previous minute is marked with the 60s
    /// penalty and the cursor restarts for the new minute. Returns the new
    /// minute index when it changed.
    pub fn on_tick(&mut self, elapsed: i64, cursor: &mut StepCursor) -> Option<u32> {
        if self.plan.total_minutes() == 0 {
            return None;
        }
        let minute = self.plan.minute_index(elapsed);
        match self.current_minute {
            Some(prev) if minute <= prev => None,
            Some(prev) => {
                self.queue_penalty(prev, cursor.position());
                for skipped in prev + 1..minute {
                    self.queue_penalty(skipped, 0);
                }
                self.enter_minute(minute, cursor);
                Some(minute)
            }
            None => {
                self.enter_minute(minute, cursor);
                Some(minute)
            }
        }
    }

    /// Queue a finished mark once the cursor completes the current minute.
    pub fn record_completion(&mut self, elapsed: i64, cursor: &StepCursor) -> Option<EmomMark> {
        let minute = self.current_minute?;
        if !cursor.minute_complete() || self.is_marked(minute) {
            return None;
        }
        let into_minute = (elapsed - i64::from(minute) * 60).clamp(0, 59);
        let mark = EmomMark::finished(
            minute,
            u32::try_from(into_minute).unwrap_or(59),
            cursor.position(),
        );
        self.pending.push_back(mark);
        Some(mark)
    }

    /// The plan ran out or the coach ended the class: close the current minute.
    pub fn finish(&mut self, cursor: &StepCursor) {
        if let Some(minute) = self.current_minute {
            self.queue_penalty(minute, cursor.position());
        }
    }

    /// Marks waiting to be sent, oldest first. They stay queued until
    /// acknowledged.
    #[must_use]
    pub fn pending(&self) -> Vec<EmomMark> {
        self.pending.iter().copied().collect()
    }

    /// Drop `mark` from the queue after the server stored it.
    ///
    /// Returns `false` when the mark is no longer queued, e.g. because the
    /// tracker was replaced by a restarted session in the meantime.
    pub fn acknowledge(&mut self, mark: &EmomMark) -> bool {
        let Some(idx) = self.pending.iter().position(|m| m == mark) else {
            return false;
        };
        self.pending.remove(idx);
        self.sent.insert(mark.minute_index);
        true
    }

    fn queue_penalty(&mut self, minute: u32, completed: u32) {
        if !self.is_marked(minute) {
            self.pending.push_back(EmomMark::penalty(minute, completed));
        }
    }

    fn enter_minute(&mut self, minute: u32, cursor: &mut StepCursor) {
        self.current_minute = Some(minute);
        cursor.start_minute(self.plan.round_length(minute));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{QuantityType, Step};

    const LIVE: SessionStatus = SessionStatus::Live;

    fn for_time(n: u32) -> StepCursor {
        StepCursor::new(CursorMode::ForTime { step_count: n })
    }

    #[test]
    fn for_time_cursor_stays_in_bounds() {
        let mut cursor = for_time(3);
        assert_eq!(
            cursor.advance(Direction::Backward, LIVE),
            Err(SequencerError::AtBoundary)
        );
        for _ in 0..3 {
            cursor.advance(Direction::Forward, LIVE).unwrap();
        }
        assert!(cursor.is_finished());
        assert_eq!(
            cursor.advance(Direction::Forward, LIVE),
            Err(SequencerError::AtBoundary)
        );
        assert_eq!(cursor.position(), 3);
    }

    #[test]
    fn moves_rejected_unless_live() {
        let mut cursor = for_time(3);
        for status in [SessionStatus::Ready, SessionStatus::Paused, SessionStatus::Ended] {
            assert_eq!(
                cursor.advance(Direction::Forward, status),
                Err(SequencerError::NotLive(status))
            );
        }
        assert_eq!(cursor.position(), 0);
    }

    #[test]
    fn rollback_restores_exact_state() {
        let mut cursor = StepCursor::new(CursorMode::Amrap { step_count: 2 });
        cursor.advance(Direction::Forward, LIVE).unwrap();
        let wrap = cursor.advance(Direction::Forward, LIVE).unwrap();
        assert_eq!(wrap.lap, LapChange::Wrapped);
        assert_eq!((cursor.position(), cursor.laps()), (0, 1));

        assert!(cursor.rollback(&wrap));
        assert_eq!((cursor.position(), cursor.laps()), (1, 0));
        assert_eq!(cursor.in_flight(), 1);
    }

    #[test]
    fn out_of_order_rollback_keeps_amrap_cursor_in_the_lap() {
        let mut cursor = StepCursor::new(CursorMode::Amrap { step_count: 3 });
        cursor.sync_from_server(2, 0);

        let wrap = cursor.advance(Direction::Forward, LIVE).unwrap();
        let next = cursor.advance(Direction::Forward, LIVE).unwrap();
        assert_eq!(wrap.lap, LapChange::Wrapped);
        assert_eq!((cursor.position(), cursor.laps()), (1, 1));

        cursor.confirm(&next);
        assert!(cursor.rollback(&wrap));
        assert!(cursor.position() < 3);
        assert_eq!((cursor.position(), cursor.laps()), (0, 0));
        assert_eq!(cursor.in_flight(), 0);
    }

    #[test]
    fn out_of_order_rollback_respects_for_time_bounds() {
        let mut cursor = for_time(2);
        let first = cursor.advance(Direction::Forward, LIVE).unwrap();
        let back = cursor.advance(Direction::Backward, LIVE).unwrap();
        cursor.confirm(&first);
        assert!(cursor.rollback(&back));
        assert_eq!(cursor.position(), 1);

        let mut cursor = for_time(2);
        cursor.sync_from_server(1, 0);
        let back = cursor.advance(Direction::Backward, LIVE).unwrap();
        let forward = cursor.advance(Direction::Forward, LIVE).unwrap();
        let finish = cursor.advance(Direction::Forward, LIVE).unwrap();
        cursor.confirm(&forward);
        cursor.confirm(&finish);
        assert!(cursor.rollback(&back));
        assert_eq!(cursor.position(), 2);
    }

    #[test]
    fn amrap_unwinds_a_lap_backwards() {
        let mut cursor = StepCursor::new(CursorMode::Amrap { step_count: 3 });
        assert_eq!(
            cursor.advance(Direction::Backward, LIVE),
            Err(SequencerError::AtBoundary)
        );
        cursor.sync_from_server(0, 2);
        let mv = cursor.advance(Direction::Backward, LIVE).unwrap();
        assert_eq!(mv.lap, LapChange::Unwrapped);
        assert_eq!((cursor.position(), cursor.laps()), (2, 1));
        assert_eq!(mv.inverse().lap, LapChange::Wrapped);
    }

    #[test]
    fn server_sync_waits_for_in_flight_moves() {
        let mut cursor = for_time(5);
        let mv = cursor.advance(Direction::Forward, LIVE).unwrap();
        assert!(!cursor.sync_from_server(0, 0));
        cursor.confirm(&mv);
        assert!(cursor.sync_from_server(4, 0));
        assert_eq!(cursor.position(), 4);
        assert!(!cursor.rollback(&mv));
        assert_eq!(cursor.position(), 4);
    }

    #[test]
    fn random_move_sequences_stay_in_bounds() {
        // Deterministic LCG so the sequence is reproducible.
        let mut seed: u64 = 0x5eed;
        let mut next = || {
            seed = seed.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
            seed >> 33
        };
        let mut cursor = for_time(6);
        for _ in 0..2_000 {
            let direction = if next() % 2 == 0 {
                Direction::Forward
            } else {
                Direction::Backward
            };
            if let Ok(mv) = cursor.advance(direction, LIVE) {
                if next() % 4 == 0 {
                    cursor.rollback(&mv);
                } else {
                    cursor.confirm(&mv);
                }
            }
            assert!(cursor.position() <= 6);
        }
        assert_eq!(cursor.in_flight(), 0);
    }

    fn emom_plan() -> EmomPlan {
        let steps: Vec<Step> = (0..3)
            .map(|i| Step {
                index: i,
                name: "Swing".into(),
                quantity_type: QuantityType::Reps,
                quantity: 10,
                round: 1,
                subround: 1,
                target_reps: None,
            })
            .collect();
        EmomPlan::from_steps(&steps, &[4])
    }

    #[test]
    fn emom_rollover_penalizes_unfinished_minute_once() {
        let mut cursor = StepCursor::new(CursorMode::Emom { round_length: 0 });
        let mut tracker = EmomMinuteTracker::new(emom_plan());

        assert_eq!(tracker.on_tick(0, &mut cursor), Some(0));
        cursor.advance(Direction::Forward, LIVE).unwrap();
        cursor.advance(Direction::Forward, LIVE).unwrap();

        assert_eq!(tracker.on_tick(60, &mut cursor), Some(1));
        assert_eq!(tracker.on_tick(61, &mut cursor), None);
        assert_eq!(cursor.position(), 0);

        let marks = tracker.pending();
        assert_eq!(marks, vec![EmomMark::penalty(0, 2)]);
        assert!(!tracker.is_sent(0));
        assert!(tracker.acknowledge(&marks[0]));
        assert!(tracker.pending().is_empty());
        assert!(tracker.is_sent(0));
    }

    #[test]
    fn emom_completed_minute_marks_finish_time() {
        let mut cursor = StepCursor::new(CursorMode::Emom { round_length: 0 });
        let mut tracker = EmomMinuteTracker::new(emom_plan());
        tracker.on_tick(60, &mut cursor);
        for _ in 0..3 {
            cursor.advance(Direction::Forward, LIVE).unwrap();
        }
        assert_eq!(
            cursor.advance(Direction::Forward, LIVE),
            Err(SequencerError::MinuteComplete)
        );

        let mark = tracker.record_completion(102, &cursor).unwrap();
        assert_eq!(mark, EmomMark::finished(1, 42, 3));
        assert!(tracker.record_completion(105, &cursor).is_none());

        tracker.on_tick(125, &mut cursor);
        tracker.finish(&cursor);
        let minutes: Vec<u32> = tracker
            .pending()
            .iter()
            .map(|m| m.minute_index)
            .collect();
        assert_eq!(minutes, vec![1, 2]);
    }

    #[test]
    fn unacknowledged_marks_stay_queued() {
        let mut cursor = StepCursor::new(CursorMode::Emom { round_length: 0 });
        let mut tracker = EmomMinuteTracker::new(emom_plan());
        tracker.on_tick(0, &mut cursor);
        for _ in 0..3 {
            cursor.advance(Direction::Forward, LIVE).unwrap();
        }
        let mark = tracker.record_completion(10, &cursor).unwrap();
        assert!(tracker.is_marked(0));
        assert!(!tracker.is_sent(0));

        // Send failed; the next tick and the rollover must not replace it.
        assert!(tracker.record_completion(12, &cursor).is_none());
        tracker.on_tick(61, &mut cursor);
        assert_eq!(tracker.pending(), vec![mark]);

        assert!(tracker.acknowledge(&mark));
        assert!(!tracker.acknowledge(&mark));
        assert!(tracker.is_sent(0));
        assert!(tracker.pending().is_empty());
    }

    #[test]
    fn emom_skipped_minutes_are_penalized() {
        let mut cursor = StepCursor::new(CursorMode::Emom { round_length: 0 });
        let mut tracker = EmomMinuteTracker::new(emom_plan());
        tracker.on_tick(0, &mut cursor);
        tracker.on_tick(200, &mut cursor);
        let marks = tracker.pending();
        assert_eq!(marks.len(), 3);
        assert!(marks.iter().all(|m| !m.finished));
        assert_eq!(tracker.current_minute(), Some(3));
    }
}
