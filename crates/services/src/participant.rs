//! Client-side projection of one participant in a live class.
//!
//! The controller never holds its state lock across a network call: every
//! operation locks, mutates, unlocks, awaits the gateway, then locks again to
//! confirm or roll back.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use live_core::cutoff::{CutoffAction, CutoffGate, CutoffState};
use live_core::model::{
    ClassId, EmomMark, ParticipantProgress, Scaling, ScalingFilter, Session, SessionStatus,
    UserId, WorkoutType,
};
use live_core::ranker::{self, Leaderboard};
use live_core::scoring::{self, Score, ScoreInputs};
use live_core::sequencer::{CursorMode, Direction, EmomMinuteTracker, SequencerError, StepCursor};
use live_core::time::{elapsed_seconds, remaining_seconds};
use live_core::{Clock, ClockOffset};
use storage::gateway::{LiveClassGateway, PartialOutcome};

use crate::error::LiveClientError;

//
// ─── VIEW ──────────────────────────────────────────────────────────────────────
//

/// What the live screen should show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    /// No session yet; show a waiting state.
    #[default]
    Preparing,
    /// Session exists but the coach has not started it.
    Waiting,
    Live,
    /// Coach paused; inputs are blocked behind an overlay.
    Paused,
    /// Cutoff reached; own progress is still loading.
    Syncing,
    /// Cutoff reached; the partial-reps prompt is open.
    AwaitingPartial,
    /// Partial reps sent, waiting for the server.
    Submitting,
    /// Leave the live screen.
    Done,
}

/// Snapshot of the participant's live state, recomputed every tick.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LiveView {
    pub phase: SessionPhase,
    pub status: Option<SessionStatus>,
    pub workout_type: Option<WorkoutType>,
    pub elapsed_seconds: i64,
    pub remaining_seconds: Option<i64>,
    pub time_up: bool,
    pub current_step: u32,
    pub step_count: u32,
    pub laps: u32,
    pub emom_minute: Option<u32>,
    pub score: Option<Score>,
    pub position: Option<u32>,
}

/// Result of a step move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepReport {
    pub current_step: u32,
    pub laps: u32,
    /// FOR_TIME done, or EMOM minute done.
    pub completed: bool,
}

//
// ─── STATE ─────────────────────────────────────────────────────────────────────
//

#[derive(Default)]
struct LocalState {
    session: Option<Session>,
    offset: ClockOffset,
    cursor: Option<StepCursor>,
    emom: Option<EmomMinuteTracker>,
    emom_sent: BTreeMap<u32, EmomMark>,
    interval_reps: BTreeMap<u32, u32>,
    cutoff: CutoffGate,
    progress: Option<ParticipantProgress>,
    next_seq: u64,
    filter: ScalingFilter,
    leaderboard: Leaderboard,
    last_view: LiveView,
}

impl LocalState {
    /// Take a fresh session snapshot, resetting local progress when the
    /// session was (re)started or its workout changed.
    fn adopt_session(&mut self, session: Session, now: i64) {
        let restarted = match self.session.as_ref() {
            None => true,
            Some(current) => {
                current.started_at() != session.started_at()
                    || current.workout_type() != session.workout_type()
                    || current.step_count() != session.step_count()
            }
        };

        if restarted {
            self.cursor = CursorMode::for_workout(session.workout_type(), session.step_count())
                .map(StepCursor::new);
            self.emom = (session.workout_type() == WorkoutType::Emom)
                .then(|| EmomMinuteTracker::new(session.emom_plan()));
            self.emom_sent.clear();
            self.interval_reps.clear();
            self.cutoff = CutoffGate::new();
            self.progress = None;
        }

        self.session = Some(session);
        self.advance_emom_clock(now);
    }

    /// Roll EMOM minutes forward and close the plan when it is over.
    fn advance_emom_clock(&mut self, now: i64) {
        let (Some(session), Some(cursor), Some(tracker)) =
            (self.session.as_ref(), self.cursor.as_mut(), self.emom.as_mut())
        else {
            return;
        };
        let elapsed = elapsed_seconds(session, now);
        match session.status() {
            SessionStatus::Ready => {}
            SessionStatus::Live | SessionStatus::Paused => {
                tracker.on_tick(elapsed, cursor);
                if tracker.plan().is_done(elapsed) {
                    tracker.finish(cursor);
                }
            }
            SessionStatus::Ended => tracker.finish(cursor),
        }
    }

    fn projected_progress(&self, class_id: ClassId, user_id: UserId) -> ParticipantProgress {
        let mut progress = self
            .progress
            .clone()
            .unwrap_or_else(|| ParticipantProgress::new(class_id, user_id));
        if let Some(cursor) = self.cursor.as_ref() {
            progress.current_step = cursor.position();
            progress.rounds_completed = cursor.laps();
        }
        progress
    }

    fn is_finished(&self) -> bool {
        let cursor_done = self.cursor.as_ref().is_some_and(StepCursor::is_finished);
        let server_done = self
            .progress
            .as_ref()
            .is_some_and(ParticipantProgress::is_finished);
        cursor_done || server_done
    }

    fn compute_view(&mut self, class_id: ClassId, user_id: UserId, now: i64) -> LiveView {
        let Some(session) = self.session.as_ref() else {
            return LiveView::default();
        };
        let status = session.status();
        let workout_type = session.workout_type();
        let time_up = session.is_time_up(now);
        let ended = status == SessionStatus::Ended;
        let finished = workout_type == WorkoutType::ForTime && self.is_finished();

        // Whether a member already finished is only known once their progress
        // has been loaded, so the prompt waits for it.
        let progress_unknown = self.progress.is_none()
            && workout_type.requires_partial_at_cutoff()
            && self.cutoff.state() == CutoffState::Idle;
        let action = if status == SessionStatus::Ready {
            CutoffAction::Continue
        } else if progress_unknown && (time_up || ended) {
            CutoffAction::Wait
        } else {
            self.cutoff.evaluate(workout_type, time_up, ended, finished)
        };

        let progress = self.projected_progress(class_id, user_id);
        let marks: Vec<EmomMark> = self.emom_sent.values().copied().collect();
        let score = scoring::score(
            session,
            now,
            ScoreInputs {
                progress: &progress,
                emom_marks: &marks,
                interval_reps: &self.interval_reps,
            },
        );

        let phase = match (status, action) {
            (SessionStatus::Ready, _) => SessionPhase::Waiting,
            (SessionStatus::Paused, _) => SessionPhase::Paused,
            (_, CutoffAction::Continue) => SessionPhase::Live,
            (_, CutoffAction::Navigate) => SessionPhase::Done,
            (_, CutoffAction::Prompt | CutoffAction::Wait) => match self.cutoff.state() {
                CutoffState::Idle => SessionPhase::Syncing,
                CutoffState::Submitting { .. } => SessionPhase::Submitting,
                _ => SessionPhase::AwaitingPartial,
            },
        };

        LiveView {
            phase,
            status: Some(status),
            workout_type: Some(workout_type),
            elapsed_seconds: elapsed_seconds(session, now),
            remaining_seconds: remaining_seconds(session, now),
            time_up,
            current_step: progress.current_step,
            step_count: session.step_count(),
            laps: progress.rounds_completed,
            emom_minute: self.emom.as_ref().and_then(EmomMinuteTracker::current_minute),
            score: Some(score),
            position: self.leaderboard.position_of(user_id),
        }
    }
}

//
// ─── CONTROLLER ────────────────────────────────────────────────────────────────
//

/// One participant's view of a live class, reconciled against the server.
pub struct ParticipantController {
    class_id: ClassId,
    user_id: UserId,
    gateway: Arc<dyn LiveClassGateway>,
    clock: Clock,
    state: Mutex<LocalState>,
}

impl ParticipantController {
    #[must_use]
    pub fn new(class_id: ClassId, gateway: Arc<dyn LiveClassGateway>) -> Self {
        let user_id = gateway.user_id();
        Self {
            class_id,
            user_id,
            gateway,
            clock: Clock::default(),
            state: Mutex::new(LocalState::default()),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_filter(self, filter: ScalingFilter) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.filter = filter;
        }
        self
    }

    #[must_use]
    pub fn class_id(&self) -> ClassId {
        self.class_id
    }

    #[must_use]
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    fn lock(&self) -> Result<MutexGuard<'_, LocalState>, LiveClientError> {
        self.state.lock().map_err(|_| LiveClientError::Poisoned)
    }

    fn local_now(&self) -> i64 {
        self.clock.epoch_seconds()
    }

    /// Last computed view.
    ///
    /// # Errors
    ///
    /// Returns `LiveClientError::Poisoned` if the state lock is poisoned.
    pub fn view(&self) -> Result<LiveView, LiveClientError> {
        Ok(self.lock()?.last_view.clone())
    }

    /// Last ranked leaderboard.
    ///
    /// # Errors
    ///
    /// Returns `LiveClientError::Poisoned` if the state lock is poisoned.
    pub fn leaderboard(&self) -> Result<Leaderboard, LiveClientError> {
        Ok(self.lock()?.leaderboard.clone())
    }

    /// Change the leaderboard scaling filter; applies from the next refresh.
    ///
    /// # Errors
    ///
    /// Returns `LiveClientError::Poisoned` if the state lock is poisoned.
    pub fn set_filter(&self, filter: ScalingFilter) -> Result<(), LiveClientError> {
        self.lock()?.filter = filter;
        Ok(())
    }

    //
    // ─── LOCAL TICK ────────────────────────────────────────────────────────────
    //

    /// Recompute time, EMOM minute, cutoff and score from local state.
    ///
    /// # Errors
    ///
    /// Returns `LiveClientError::Poisoned` if the state lock is poisoned.
    pub fn tick(&self) -> Result<LiveView, LiveClientError> {
        let local_now = self.local_now();
        let mut guard = self.lock()?;
        let state = &mut *guard;
        let now = state.offset.apply(local_now);
        state.advance_emom_clock(now);
        let view = state.compute_view(self.class_id, self.user_id, now);
        if view.phase != state.last_view.phase {
            tracing::debug!(
                class_id = %self.class_id,
                user_id = %self.user_id,
                phase = ?view.phase,
                "live phase changed"
            );
        }
        state.last_view = view.clone();
        Ok(view)
    }

    //
    // ─── SERVER REFRESH ────────────────────────────────────────────────────────
    //

    /// Fetch the session and fold it into local state.
    ///
    /// # Errors
    ///
    /// Returns `LiveClientError::Gateway` when the fetch fails.
    pub async fn refresh_session(&self) -> Result<SessionPhase, LiveClientError> {
        let snapshot = self.gateway.get_session(self.class_id).await?;
        let local_now = self.local_now();
        {
            let mut state = self.lock()?;
            match snapshot {
                None => {
                    state.session = None;
                }
                Some(snapshot) => {
                    state.offset.observe(snapshot.server_now, local_now);
                    let now = state.offset.apply(local_now);
                    let previous = state.session.as_ref().map(Session::status);
                    if previous != Some(snapshot.session.status()) {
                        tracing::info!(
                            class_id = %self.class_id,
                            user_id = %self.user_id,
                            status = %snapshot.session.status(),
                            "session status observed"
                        );
                    }
                    state.adopt_session(snapshot.session, now);
                }
            }
        }
        Ok(self.tick()?.phase)
    }

    /// Fetch own progress and adopt it unless a move is still in flight.
    ///
    /// # Errors
    ///
    /// Returns `LiveClientError::Gateway` when the fetch fails.
    pub async fn refresh_progress(&self) -> Result<ParticipantProgress, LiveClientError> {
        let progress = self.gateway.get_my_progress(self.class_id).await?;
        let mut guard = self.lock()?;
        let state = &mut *guard;

        let uses_cursor = state
            .session
            .as_ref()
            .is_some_and(|session| session.workout_type().uses_server_cursor());
        if let (true, Some(cursor)) = (uses_cursor, state.cursor.as_mut()) {
            cursor.sync_from_server(progress.current_step, progress.rounds_completed);
        }
        if progress.partial_submitted {
            state.cutoff.mark_submitted(progress.dnf_partial_reps);
        } else if progress.is_finished() {
            state.cutoff.settle_finished();
        }
        state.next_seq = state.next_seq.max(progress.last_advance_seq);
        state.progress = Some(progress.clone());
        Ok(progress)
    }

    /// Fetch and rank the leaderboard for the current filter.
    ///
    /// # Errors
    ///
    /// Returns `LiveClientError::Gateway` when the fetch fails.
    pub async fn refresh_leaderboard(&self) -> Result<Leaderboard, LiveClientError> {
        let filter = self.lock()?.filter;
        let entries = self.gateway.get_leaderboard(self.class_id, filter).await?;
        let board = ranker::rank(&entries, filter);
        let mut state = self.lock()?;
        if state.filter == filter {
            state.leaderboard = board.clone();
        }
        Ok(board)
    }

    //
    // ─── PARTICIPANT ACTIONS ───────────────────────────────────────────────────
    //

    /// Move one step, optimistically.
    ///
    /// FOR_TIME and AMRAP moves go to the server and are rolled back exactly
    /// if the request fails. EMOM moves are local; a completed minute queues
    /// its mark.
    ///
    /// # Errors
    ///
    /// - `LiveClientError::Preparing` without a session.
    /// - `LiveClientError::TimeUp` once the cap has elapsed.
    /// - `LiveClientError::Sequencer` when the move is not allowed.
    /// - `LiveClientError::Gateway` when the server rejected it; the cursor was rolled back.
    pub async fn advance(&self, direction: Direction) -> Result<StepReport, LiveClientError> {
        let local_now = self.local_now();
        let (mv, seq) = {
            let mut guard = self.lock()?;
            let state = &mut *guard;
            let now = state.offset.apply(local_now);
            let session = state.session.as_ref().ok_or(LiveClientError::Preparing)?;
            let status = session.status();
            let workout_type = session.workout_type();
            if status == SessionStatus::Live && session.is_time_up(now) {
                return Err(LiveClientError::TimeUp);
            }
            let elapsed = elapsed_seconds(session, now);

            let cursor = state
                .cursor
                .as_mut()
                .ok_or(SequencerError::NoCursor(workout_type))?;
            let mv = cursor.advance(direction, status)?;

            if workout_type == WorkoutType::Emom {
                cursor.confirm(&mv);
                if let Some(tracker) = state.emom.as_mut() {
                    tracker.record_completion(elapsed, cursor);
                }
                return Ok(StepReport {
                    current_step: cursor.position(),
                    laps: 0,
                    completed: cursor.minute_complete(),
                });
            }

            state.next_seq += 1;
            (mv, state.next_seq)
        };

        match self.gateway.advance(self.class_id, direction, seq).await {
            Ok(outcome) => {
                let mut guard = self.lock()?;
                let state = &mut *guard;
                let now = state.offset.apply(self.local_now());
                if let Some(cursor) = state.cursor.as_mut() {
                    cursor.confirm(&mv);
                    if cursor.in_flight() == 0 {
                        cursor.sync_from_server(outcome.current_step, outcome.rounds_completed);
                    }
                }
                let elapsed = state
                    .session
                    .as_ref()
                    .map_or(0, |session| elapsed_seconds(session, now));
                let progress = state
                    .progress
                    .get_or_insert_with(|| ParticipantProgress::new(self.class_id, self.user_id));
                progress.current_step = outcome.current_step;
                progress.rounds_completed = outcome.rounds_completed;
                if outcome.finished && progress.finish_elapsed_seconds.is_none() {
                    progress.finished_at = Some(now);
                    progress.finish_elapsed_seconds = Some(elapsed);
                }
                if !outcome.applied {
                    tracing::debug!(class_id = %self.class_id, seq, "server ignored stale advance");
                }
                Ok(StepReport {
                    current_step: outcome.current_step,
                    laps: outcome.rounds_completed,
                    completed: outcome.finished,
                })
            }
            Err(err) => {
                let rolled_back = self
                    .lock()?
                    .cursor
                    .as_mut()
                    .is_some_and(|cursor| cursor.rollback(&mv));
                tracing::warn!(
                    class_id = %self.class_id,
                    user_id = %self.user_id,
                    error = %err,
                    rolled_back,
                    "advance failed"
                );
                Err(err.into())
            }
        }
    }

    /// Submit the cutoff partial reps. Only one submission is ever sent
    /// successfully; a failed one reopens the prompt.
    ///
    /// # Errors
    ///
    /// - `LiveClientError::Cutoff` when no prompt is open or a value was sent.
    /// - `LiveClientError::Gateway` when the request failed.
    pub async fn submit_partial(&self, reps: u32) -> Result<PartialOutcome, LiveClientError> {
        self.lock()?.cutoff.begin_submit(reps)?;

        match self.gateway.submit_partial(self.class_id, reps).await {
            Ok(outcome) => {
                let mut state = self.lock()?;
                state.cutoff.submit_succeeded();
                if let Some(progress) = state.progress.as_mut() {
                    progress.dnf_partial_reps = outcome.reps;
                    progress.partial_submitted = true;
                }
                tracing::info!(
                    class_id = %self.class_id,
                    user_id = %self.user_id,
                    reps = outcome.reps,
                    accepted = outcome.accepted,
                    "partial reps submitted"
                );
                Ok(outcome)
            }
            Err(err) => {
                self.lock()?.cutoff.submit_failed();
                tracing::warn!(class_id = %self.class_id, error = %err, "partial submit failed");
                Err(err.into())
            }
        }
    }

    /// Send queued EMOM minute marks. A mark that fails stays queued and is
    /// retried by the next flush.
    ///
    /// # Errors
    ///
    /// Returns `LiveClientError::Poisoned` if the state lock is poisoned.
    pub async fn flush_emom_marks(&self) -> Result<usize, LiveClientError> {
        let marks = {
            let state = self.lock()?;
            state
                .emom
                .as_ref()
                .map(EmomMinuteTracker::pending)
                .unwrap_or_default()
        };

        let mut sent = 0;
        for mark in marks {
            match self.gateway.mark_emom_minute(self.class_id, mark).await {
                Ok(()) => {
                    let mut guard = self.lock()?;
                    let state = &mut *guard;
                    let acknowledged = state
                        .emom
                        .as_mut()
                        .is_some_and(|tracker| tracker.acknowledge(&mark));
                    if acknowledged {
                        state.emom_sent.insert(mark.minute_index, mark);
                        sent += 1;
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        class_id = %self.class_id,
                        minute = mark.minute_index,
                        error = %err,
                        "emom mark failed, will retry"
                    );
                    break;
                }
            }
        }
        Ok(sent)
    }

    /// Record reps for one interval.
    ///
    /// # Errors
    ///
    /// - `LiveClientError::WrongModality` unless the workout is TABATA/INTERVAL.
    /// - `LiveClientError::Gateway` when the request failed.
    pub async fn post_interval_score(&self, step_index: u32, reps: u32) -> Result<(), LiveClientError> {
        {
            let state = self.lock()?;
            let session = state.session.as_ref().ok_or(LiveClientError::Preparing)?;
            if !session.workout_type().is_interval() {
                return Err(LiveClientError::WrongModality(session.workout_type()));
            }
        }
        self.gateway
            .post_interval_score(self.class_id, step_index, reps)
            .await?;
        self.lock()?.interval_reps.insert(step_index, reps);
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `LiveClientError::Gateway` when the request failed.
    pub async fn set_scaling(&self, scaling: Scaling) -> Result<(), LiveClientError> {
        self.gateway.set_scaling(self.class_id, scaling).await?;
        if let Some(progress) = self.lock()?.progress.as_mut() {
            progress.scaling = scaling;
        }
        Ok(())
    }
}
