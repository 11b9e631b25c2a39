//! Authoritative live-class server kept in process memory.
//!
//! One mutex guards every class so a session transition and the progress it
//! resets are always observed together.

use async_trait::async_trait;
use chrono::Duration;
use live_core::Clock;
use live_core::model::{
    AdvanceEffect, ClassId, EmomMark, LeaderboardEntry, ParticipantProgress, Scaling,
    ScalingFilter, Session, SessionStatus, UserId, WorkoutDefinition, WorkoutId, WorkoutType,
    check_step_index,
};
use live_core::scoring::{self, ScoreInputs};
use live_core::sequencer::Direction;
use live_core::time::elapsed_seconds;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;

use crate::gateway::{
    AdvanceOutcome, ChangeFeed, ChangeKind, ChangeNotice, CoachGateway, GatewayError,
    LiveClassGateway, PartialOutcome, SessionSnapshot,
};

const FEED_CAPACITY: usize = 256;

struct ClassRecord {
    workout_id: WorkoutId,
    workout: WorkoutDefinition,
    duration_minutes: u32,
    roster: BTreeMap<UserId, String>,
    session: Option<Session>,
    progress: HashMap<UserId, ParticipantProgress>,
    emom_marks: HashMap<UserId, BTreeMap<u32, EmomMark>>,
    interval_reps: HashMap<UserId, BTreeMap<u32, u32>>,
}

impl ClassRecord {
    fn ensure_booked(&self, user_id: UserId) -> Result<(), GatewayError> {
        if self.roster.contains_key(&user_id) {
            Ok(())
        } else {
            Err(GatewayError::NotBooked(user_id))
        }
    }

    fn progress_mut(&mut self, class_id: ClassId, user_id: UserId) -> &mut ParticipantProgress {
        self.progress
            .entry(user_id)
            .or_insert_with(|| ParticipantProgress::new(class_id, user_id))
    }

    fn session(&self) -> Result<&Session, GatewayError> {
        self.session.as_ref().ok_or(GatewayError::NotStarted)
    }

    fn session_mut(&mut self) -> Result<&mut Session, GatewayError> {
        self.session.as_mut().ok_or(GatewayError::NotStarted)
    }

    /// Leaderboard rows for every booked member, in roster order.
    fn entries(&self, class_id: ClassId, now: i64, filter: ScalingFilter) -> Vec<LeaderboardEntry> {
        let Some(session) = self.session.as_ref() else {
            return Vec::new();
        };
        let no_marks = BTreeMap::new();
        let no_reps = BTreeMap::new();

        self.roster
            .iter()
            .filter_map(|(user_id, name)| {
                let progress = self
                    .progress
                    .get(user_id)
                    .cloned()
                    .unwrap_or_else(|| ParticipantProgress::new(class_id, *user_id));
                if !filter.matches(progress.scaling) {
                    return None;
                }
                let marks: Vec<EmomMark> = self
                    .emom_marks
                    .get(user_id)
                    .unwrap_or(&no_marks)
                    .values()
                    .copied()
                    .collect();
                let inputs = ScoreInputs {
                    progress: &progress,
                    emom_marks: &marks,
                    interval_reps: self.interval_reps.get(user_id).unwrap_or(&no_reps),
                };
                let score = scoring::score(session, now, inputs);
                Some(score.to_entry(*user_id, name, progress.scaling))
            })
            .collect()
    }
}

/// In-memory reference server implementing every gateway trait.
#[derive(Clone)]
pub struct InMemoryLiveServer {
    clock: Arc<Mutex<Clock>>,
    classes: Arc<Mutex<HashMap<ClassId, ClassRecord>>>,
    feeds: Arc<Mutex<HashMap<ClassId, broadcast::Sender<ChangeNotice>>>>,
}

impl Default for InMemoryLiveServer {
    fn default() -> Self {
        Self::new(Clock::default())
    }
}

impl InMemoryLiveServer {
    #[must_use]
    pub fn new(clock: Clock) -> Self {
        Self {
            clock: Arc::new(Mutex::new(clock)),
            classes: Arc::new(Mutex::new(HashMap::new())),
            feeds: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Participant-scoped connection for `user_id`.
    #[must_use]
    pub fn participant(&self, user_id: UserId) -> ParticipantConnection {
        ParticipantConnection {
            server: self.clone(),
            user_id,
        }
    }

    /// Register a class and its workout. No session exists until the coach
    /// prepares or starts it.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Connection` if the state lock is poisoned.
    pub fn schedule_class(
        &self,
        class_id: ClassId,
        workout_id: WorkoutId,
        workout: WorkoutDefinition,
        duration_minutes: u32,
    ) -> Result<(), GatewayError> {
        let mut classes = self.lock_classes()?;
        classes.insert(
            class_id,
            ClassRecord {
                workout_id,
                workout,
                duration_minutes,
                roster: BTreeMap::new(),
                session: None,
                progress: HashMap::new(),
                emom_marks: HashMap::new(),
                interval_reps: HashMap::new(),
            },
        );
        tracing::debug!(class_id = %class_id, workout_id = %workout_id, "class scheduled");
        Ok(())
    }

    /// Book a member into a class.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::NotFound` for unknown classes.
    pub fn book(&self, class_id: ClassId, user_id: UserId, display_name: &str) -> Result<(), GatewayError> {
        let mut classes = self.lock_classes()?;
        let class = classes.get_mut(&class_id).ok_or(GatewayError::NotFound)?;
        class.roster.insert(user_id, display_name.to_owned());
        class.progress_mut(class_id, user_id);
        Ok(())
    }

    /// Create the `ready` session so clients leave the preparing state.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::NotFound` for unknown classes.
    pub fn prepare_session(&self, class_id: ClassId) -> Result<SessionSnapshot, GatewayError> {
        let now = self.now()?;
        let snapshot = {
            let mut classes = self.lock_classes()?;
            let class = classes.get_mut(&class_id).ok_or(GatewayError::NotFound)?;
            let session = Self::prepared(class_id, class);
            SessionSnapshot {
                session: session.clone(),
                server_now: now,
            }
        };
        self.publish(class_id, ChangeKind::Session, None);
        Ok(snapshot)
    }

    //
    // ─── CLOCK ─────────────────────────────────────────────────────────────────
    //

    /// Current server time in epoch seconds.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Connection` if the clock lock is poisoned.
    pub fn now(&self) -> Result<i64, GatewayError> {
        let clock = self
            .clock
            .lock()
            .map_err(|e| GatewayError::Connection(e.to_string()))?;
        Ok(clock.epoch_seconds())
    }

    /// Move a fixed clock forward. Has no effect on a real-time clock.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Connection` if the clock lock is poisoned.
    pub fn advance_clock(&self, seconds: i64) -> Result<(), GatewayError> {
        let mut clock = self
            .clock
            .lock()
            .map_err(|e| GatewayError::Connection(e.to_string()))?;
        clock.advance(Duration::seconds(seconds));
        Ok(())
    }

    /// Live push subscribers for a class.
    #[must_use]
    pub fn subscriber_count(&self, class_id: ClassId) -> usize {
        self.feeds
            .lock()
            .ok()
            .and_then(|feeds| feeds.get(&class_id).map(broadcast::Sender::receiver_count))
            .unwrap_or(0)
    }

    //
    // ─── INTERNALS ─────────────────────────────────────────────────────────────
    //

    fn lock_classes(&self) -> Result<MutexGuard<'_, HashMap<ClassId, ClassRecord>>, GatewayError> {
        self.classes
            .lock()
            .map_err(|e| GatewayError::Connection(e.to_string()))
    }

    fn prepared(class_id: ClassId, class: &mut ClassRecord) -> &mut Session {
        class.session.get_or_insert_with(|| {
            Session::prepare(
                class_id,
                class.workout_id,
                &class.workout,
                class.duration_minutes,
            )
        })
    }

    fn publish(&self, class_id: ClassId, kind: ChangeKind, user_id: Option<UserId>) {
        let Ok(feeds) = self.feeds.lock() else {
            return;
        };
        if let Some(sender) = feeds.get(&class_id) {
            // Zero receivers is not an error here.
            let _ = sender.send(ChangeNotice {
                class_id,
                kind,
                user_id,
            });
        }
    }

    /// Run `f` against a class with the cap auto-end applied first.
    ///
    /// Publishes a session notice when the cap ended the session.
    fn with_class<T>(
        &self,
        class_id: ClassId,
        f: impl FnOnce(&mut ClassRecord, i64) -> Result<T, GatewayError>,
    ) -> Result<T, GatewayError> {
        let now = self.now()?;
        let (result, capped) = {
            let mut classes = self.lock_classes()?;
            let class = classes.get_mut(&class_id).ok_or(GatewayError::NotFound)?;
            let capped = class
                .session
                .as_mut()
                .is_some_and(|session| session.end_if_cap_reached(now));
            (f(class, now), capped)
        };
        if capped {
            tracing::info!(class_id = %class_id, "time cap reached, session ended");
            self.publish(class_id, ChangeKind::Session, None);
        }
        result
    }

    fn coach_transition(
        &self,
        class_id: ClassId,
        action: &'static str,
        f: impl FnOnce(&mut ClassRecord, i64) -> Result<(), GatewayError>,
    ) -> Result<SessionSnapshot, GatewayError> {
        let snapshot = self.with_class(class_id, |class, now| {
            f(class, now)?;
            let session = class.session()?.clone();
            Ok(SessionSnapshot {
                session,
                server_now: now,
            })
        })?;
        tracing::info!(
            class_id = %class_id,
            action,
            status = %snapshot.session.status(),
            "session transition"
        );
        self.publish(class_id, ChangeKind::Session, None);
        Ok(snapshot)
    }

    fn participant_advance(
        &self,
        class_id: ClassId,
        user_id: UserId,
        direction: Direction,
        seq: u64,
    ) -> Result<AdvanceOutcome, GatewayError> {
        let now = self.now()?;
        let (result, ended_by_cap) = {
            let mut classes = self.lock_classes()?;
            let class = classes.get_mut(&class_id).ok_or(GatewayError::NotFound)?;
            class.ensure_booked(user_id)?;
            let session = class.session_mut()?;

            if let Err(err) = session.ensure_accepting_progress(now) {
                let ended = session.end_if_cap_reached(now);
                (Err(GatewayError::from(err)), ended)
            } else {
                let workout_type = session.workout_type();
                let step_count = session.step_count();
                let elapsed = elapsed_seconds(session, now);
                let progress = class.progress_mut(class_id, user_id);
                let effect = match workout_type {
                    WorkoutType::ForTime => {
                        Ok(progress.advance_for_time(direction, step_count, seq, now, elapsed))
                    }
                    WorkoutType::Amrap => Ok(progress.advance_amrap(direction, step_count, seq)),
                    other => Err(GatewayError::Unsupported(other)),
                };
                let outcome = effect.map(|effect| {
                    (
                        effect,
                        AdvanceOutcome {
                            current_step: progress.current_step,
                            rounds_completed: progress.rounds_completed,
                            finished: progress.is_finished(),
                            applied: effect != AdvanceEffect::Stale,
                        },
                    )
                });
                (outcome, false)
            }
        };

        if ended_by_cap {
            tracing::info!(class_id = %class_id, "time cap reached on advance, session ended");
            self.publish(class_id, ChangeKind::Session, None);
        }

        let (effect, outcome) = result?;
        match effect {
            AdvanceEffect::Moved => {
                tracing::debug!(
                    class_id = %class_id,
                    user_id = %user_id,
                    step = outcome.current_step,
                    rounds = outcome.rounds_completed,
                    "participant advanced"
                );
                self.publish(class_id, ChangeKind::Progress, Some(user_id));
            }
            AdvanceEffect::Stale => {
                tracing::debug!(class_id = %class_id, user_id = %user_id, seq, "stale advance ignored");
            }
            AdvanceEffect::Unchanged => {}
        }
        Ok(outcome)
    }

    fn store_interval_score(
        &self,
        class_id: ClassId,
        user_id: UserId,
        step_index: u32,
        reps: u32,
    ) -> Result<(), GatewayError> {
        self.with_class(class_id, |class, _now| {
            class.ensure_booked(user_id)?;
            let session = class.session()?;
            if !session.workout_type().is_interval() {
                return Err(GatewayError::Unsupported(session.workout_type()));
            }
            check_step_index(step_index, session.step_count())?;
            class
                .interval_reps
                .entry(user_id)
                .or_default()
                .insert(step_index, reps);
            Ok(())
        })?;
        self.publish(class_id, ChangeKind::Leaderboard, Some(user_id));
        Ok(())
    }

    fn store_emom_mark(
        &self,
        class_id: ClassId,
        user_id: UserId,
        mark: EmomMark,
    ) -> Result<EmomMark, GatewayError> {
        let stored = self.with_class(class_id, |class, _now| {
            class.ensure_booked(user_id)?;
            let session = class.session()?;
            if session.workout_type() != WorkoutType::Emom {
                return Err(GatewayError::Unsupported(session.workout_type()));
            }
            if session.status() == SessionStatus::Ready {
                return Err(GatewayError::NotStarted);
            }
            let mark = mark.normalized(session.emom_plan().total_minutes());
            class
                .emom_marks
                .entry(user_id)
                .or_default()
                .insert(mark.minute_index, mark);
            Ok(mark)
        })?;
        self.publish(class_id, ChangeKind::Leaderboard, Some(user_id));
        Ok(stored)
    }
}

#[async_trait]
impl CoachGateway for InMemoryLiveServer {
    async fn start_session(&self, class_id: ClassId) -> Result<SessionSnapshot, GatewayError> {
        self.coach_transition(class_id, "start", |class, now| {
            Self::prepared(class_id, class).start(now)?;
            for progress in class.progress.values_mut() {
                progress.reset();
            }
            class.emom_marks.clear();
            class.interval_reps.clear();
            Ok(())
        })
    }

    async fn pause_session(&self, class_id: ClassId) -> Result<SessionSnapshot, GatewayError> {
        self.coach_transition(class_id, "pause", |class, now| {
            Ok(class.session_mut()?.pause(now)?)
        })
    }

    async fn resume_session(&self, class_id: ClassId) -> Result<SessionSnapshot, GatewayError> {
        self.coach_transition(class_id, "resume", |class, now| {
            Ok(class.session_mut()?.resume(now)?)
        })
    }

    async fn stop_session(&self, class_id: ClassId) -> Result<SessionSnapshot, GatewayError> {
        self.coach_transition(class_id, "stop", |class, now| {
            class.session_mut()?.stop(now);
            Ok(())
        })
    }

    async fn set_amrap_total(
        &self,
        class_id: ClassId,
        user_id: UserId,
        total_reps: u32,
    ) -> Result<(), GatewayError> {
        self.with_class(class_id, |class, _now| {
            class.ensure_booked(user_id)?;
            let session = class.session()?;
            if session.workout_type() != WorkoutType::Amrap {
                return Err(GatewayError::Unsupported(session.workout_type()));
            }
            let cumulative = session.steps_cumulative_reps().to_vec();
            class
                .progress_mut(class_id, user_id)
                .set_amrap_total(total_reps, &cumulative);
            Ok(())
        })?;
        tracing::info!(class_id = %class_id, user_id = %user_id, total_reps, "coach set AMRAP total");
        self.publish(class_id, ChangeKind::Progress, Some(user_id));
        Ok(())
    }

    async fn set_for_time_finish(
        &self,
        class_id: ClassId,
        user_id: UserId,
        finish_seconds: Option<i64>,
    ) -> Result<(), GatewayError> {
        self.with_class(class_id, |class, _now| {
            class.ensure_booked(user_id)?;
            let session = class.session()?;
            if session.workout_type() != WorkoutType::ForTime {
                return Err(GatewayError::Unsupported(session.workout_type()));
            }
            let started_at = session.started_at().ok_or(GatewayError::NotStarted)?;
            class
                .progress_mut(class_id, user_id)
                .set_for_time_finish(finish_seconds, started_at);
            Ok(())
        })?;
        tracing::info!(class_id = %class_id, user_id = %user_id, ?finish_seconds, "coach set finish");
        self.publish(class_id, ChangeKind::Progress, Some(user_id));
        Ok(())
    }

    async fn set_for_time_total(
        &self,
        class_id: ClassId,
        user_id: UserId,
        total_reps: u32,
    ) -> Result<(), GatewayError> {
        self.with_class(class_id, |class, _now| {
            class.ensure_booked(user_id)?;
            let session = class.session()?;
            if session.workout_type() != WorkoutType::ForTime {
                return Err(GatewayError::Unsupported(session.workout_type()));
            }
            let cumulative = session.steps_cumulative_reps().to_vec();
            class
                .progress_mut(class_id, user_id)
                .set_for_time_total(total_reps, &cumulative);
            Ok(())
        })?;
        tracing::info!(class_id = %class_id, user_id = %user_id, total_reps, "coach set DNF total");
        self.publish(class_id, ChangeKind::Progress, Some(user_id));
        Ok(())
    }

    async fn set_emom_mark(
        &self,
        class_id: ClassId,
        user_id: UserId,
        mark: EmomMark,
    ) -> Result<(), GatewayError> {
        let stored = self.store_emom_mark(class_id, user_id, mark)?;
        tracing::info!(
            class_id = %class_id,
            user_id = %user_id,
            minute = stored.minute_index,
            finished = stored.finished,
            "coach set emom minute"
        );
        Ok(())
    }

    async fn post_interval_score_for(
        &self,
        class_id: ClassId,
        user_id: UserId,
        step_index: u32,
        reps: u32,
    ) -> Result<(), GatewayError> {
        self.store_interval_score(class_id, user_id, step_index, reps)
    }
}

impl ChangeFeed for InMemoryLiveServer {
    fn subscribe(&self, class_id: ClassId) -> broadcast::Receiver<ChangeNotice> {
        match self.feeds.lock() {
            Ok(mut feeds) => feeds
                .entry(class_id)
                .or_insert_with(|| broadcast::channel(FEED_CAPACITY).0)
                .subscribe(),
            // A receiver with no sender behind it reports `Closed` right away.
            Err(_) => broadcast::channel(1).1,
        }
    }
}

//
// ─── PARTICIPANT CONNECTION ────────────────────────────────────────────────────
//

/// [`LiveClassGateway`] bound to one participant of an [`InMemoryLiveServer`].
#[derive(Clone)]
pub struct ParticipantConnection {
    server: InMemoryLiveServer,
    user_id: UserId,
}

#[async_trait]
impl LiveClassGateway for ParticipantConnection {
    fn user_id(&self) -> UserId {
        self.user_id
    }

    async fn get_session(&self, class_id: ClassId) -> Result<Option<SessionSnapshot>, GatewayError> {
        self.server.with_class(class_id, |class, now| {
            Ok(class.session.clone().map(|session| SessionSnapshot {
                session,
                server_now: now,
            }))
        })
    }

    async fn get_my_progress(&self, class_id: ClassId) -> Result<ParticipantProgress, GatewayError> {
        let user_id = self.user_id;
        self.server.with_class(class_id, |class, _now| {
            class.ensure_booked(user_id)?;
            Ok(class.progress_mut(class_id, user_id).clone())
        })
    }

    async fn advance(
        &self,
        class_id: ClassId,
        direction: Direction,
        seq: u64,
    ) -> Result<AdvanceOutcome, GatewayError> {
        self.server
            .participant_advance(class_id, self.user_id, direction, seq)
    }

    async fn submit_partial(&self, class_id: ClassId, reps: u32) -> Result<PartialOutcome, GatewayError> {
        let user_id = self.user_id;
        let outcome = self.server.with_class(class_id, |class, _now| {
            class.ensure_booked(user_id)?;
            if class.session()?.started_at().is_none() {
                return Err(GatewayError::NotStarted);
            }
            let progress = class.progress_mut(class_id, user_id);
            let accepted = progress.submit_partial(reps);
            Ok(PartialOutcome {
                reps: progress.dnf_partial_reps,
                accepted,
            })
        })?;
        if outcome.accepted {
            tracing::info!(class_id = %class_id, user_id = %user_id, reps, "partial reps stored");
            self.server
                .publish(class_id, ChangeKind::Leaderboard, Some(user_id));
        } else {
            tracing::debug!(class_id = %class_id, user_id = %user_id, "duplicate partial ignored");
        }
        Ok(outcome)
    }

    async fn mark_emom_minute(&self, class_id: ClassId, mark: EmomMark) -> Result<(), GatewayError> {
        let stored = self.server.store_emom_mark(class_id, self.user_id, mark)?;
        tracing::debug!(
            class_id = %class_id,
            user_id = %self.user_id,
            minute = stored.minute_index,
            finished = stored.finished,
            "emom minute marked"
        );
        Ok(())
    }

    async fn get_leaderboard(
        &self,
        class_id: ClassId,
        filter: ScalingFilter,
    ) -> Result<Vec<LeaderboardEntry>, GatewayError> {
        self.server
            .with_class(class_id, |class, now| Ok(class.entries(class_id, now, filter)))
    }

    async fn post_interval_score(
        &self,
        class_id: ClassId,
        step_index: u32,
        reps: u32,
    ) -> Result<(), GatewayError> {
        self.server
            .store_interval_score(class_id, self.user_id, step_index, reps)
    }

    async fn set_scaling(&self, class_id: ClassId, scaling: Scaling) -> Result<(), GatewayError> {
        let user_id = self.user_id;
        self.server.with_class(class_id, |class, _now| {
            class.ensure_booked(user_id)?;
            class.progress_mut(class_id, user_id).scaling = scaling;
            Ok(())
        })?;
        self.server
            .publish(class_id, ChangeKind::Leaderboard, Some(user_id));
        Ok(())
    }
}
