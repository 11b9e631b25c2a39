use chrono::{DateTime, Duration, Utc};

use crate::model::{Session, SessionStatus};

/// A simple clock abstraction for deterministic time in services and tests.
#[derive(Debug, Clone, Copy, Default)]
pub enum Clock {
    #[default]
    Default,
    Fixed(DateTime<Utc>),
}

impl Clock {
    /// Returns a clock fixed at the given timestamp.
    #[must_use]
    pub fn fixed(at: DateTime<Utc>) -> Self {
        Self::Fixed(at)
    }

    /// Returns the current time according to the clock.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        match self {
            Clock::Default => Utc::now(),
            Clock::Fixed(t) => *t,
        }
    }

    /// Current time as integer epoch seconds, the unit every session field uses.
    #[must_use]
    pub fn epoch_seconds(&self) -> i64 {
        self.now().timestamp()
    }

    /// If this is a fixed clock, advance it by the given duration.
    ///
    /// Has no effect on `Clock::Default`.
    pub fn advance(&mut self, delta: Duration) {
        if let Clock::Fixed(t) = self {
            *t += delta;
        }
    }

    #[must_use]
    pub fn is_fixed(&self) -> bool {
        matches!(self, Clock::Fixed(_))
    }
}

/// Deterministic timestamp for tests and examples (2023-11-14T22:13:20Z).
pub const FIXED_TEST_TIMESTAMP: i64 = 1_700_000_000;

/// Returns a deterministic `DateTime<Utc>` for tests and doc examples.
///
/// # Panics
///
/// Panics if the fixed timestamp cannot be represented.
#[must_use]
pub fn fixed_now() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(FIXED_TEST_TIMESTAMP, 0)
        .expect("fixed timestamp should be valid")
}

/// Returns a `Clock` fixed at the deterministic test timestamp.
#[must_use]
pub fn fixed_clock() -> Clock {
    Clock::fixed(fixed_now())
}

//
// ─── ELAPSED TIME ──────────────────────────────────────────────────────────────
//

/// Active workout seconds for `session` at `now`.
///
/// Never negative. Time spent paused is excluded, including an open pause.
/// Once the session has ended the value is frozen at `ended_at`.
#[must_use]
pub fn elapsed_seconds(session: &Session, now: i64) -> i64 {
    let Some(started_at) = session.started_at() else {
        return 0;
    };

    let now = match (session.status(), session.ended_at()) {
        (SessionStatus::Ended, Some(ended_at)) => now.min(ended_at),
        _ => now,
    };

    let open_pause = match (session.status(), session.paused_at()) {
        (SessionStatus::Paused, Some(paused_at)) => (now - paused_at).max(0),
        _ => 0,
    };

    ((now - started_at) - (session.pause_accumulated_seconds() + open_pause)).max(0)
}

/// Seconds left before the cap, or `None` for uncapped sessions.
#[must_use]
pub fn remaining_seconds(session: &Session, now: i64) -> Option<i64> {
    let cap = session.time_cap_seconds();
    (cap > 0).then(|| (cap - elapsed_seconds(session, now)).max(0))
}

/// `mm:ss` for a second count; negative input renders as `00:00`.
#[must_use]
pub fn format_clock(seconds: i64) -> String {
    let seconds = seconds.max(0);
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

//
// ─── CLOCK OFFSET ──────────────────────────────────────────────────────────────
//

/// Smoothed estimate of `server_now - local_now`.
///
/// Every session snapshot carries the server's clock; feeding it here lets
/// clients compute elapsed time on the server's timeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClockOffset {
    offset: Option<i64>,
}

impl ClockOffset {
    /// Seconds of disagreement treated as a clock change rather than jitter.
    pub const RESYNC_THRESHOLD: i64 = 2;

    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one server sample.
    ///
    /// Small deviations move the estimate a quarter of the way towards the
    /// sample. The first sample, and any sample further than
    /// [`ClockOffset::RESYNC_THRESHOLD`] from the estimate, is taken as-is.
    pub fn observe(&mut self, server_now: i64, local_now: i64) {
        let sample = server_now - local_now;
        self.offset = Some(match self.offset {
            Some(current) if (sample - current).abs() <= Self::RESYNC_THRESHOLD => {
                (3 * current + sample).div_euclid(4)
            }
            _ => sample,
        });
    }

    #[must_use]
    pub fn seconds(&self) -> i64 {
        self.offset.unwrap_or(0)
    }

    /// Translate a local timestamp onto the server timeline.
    #[must_use]
    pub fn apply(&self, local_now: i64) -> i64 {
        local_now + self.seconds()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::plan::{ExerciseRow, WorkoutDefinition, WorkoutMetadata};
    use crate::model::workout::{QuantityType, WorkoutType};
    use crate::model::{ClassId, WorkoutId};

    const T0: i64 = FIXED_TEST_TIMESTAMP;

    fn session(cap_minutes: u32) -> Session {
        let workout = WorkoutDefinition {
            workout_type: WorkoutType::Amrap,
            rows: vec![ExerciseRow {
                round: 1,
                subround: 1,
                position: 1,
                name: "Burpee".into(),
                quantity_type: QuantityType::Reps,
                quantity: 10,
                target_reps: None,
            }],
            metadata: WorkoutMetadata::default(),
        };
        Session::prepare(ClassId::new(1), WorkoutId::new(1), &workout, cap_minutes)
    }

    #[test]
    fn unstarted_session_has_zero_elapsed() {
        assert_eq!(elapsed_seconds(&session(10), T0 + 500), 0);
    }

    #[test]
    fn elapsed_excludes_closed_and_open_pauses() {
        let mut s = session(10);
        s.start(T0).unwrap();
        s.pause(T0 + 100).unwrap();
        s.resume(T0 + 130).unwrap();
        assert_eq!(elapsed_seconds(&s, T0 + 200), 170);

        s.pause(T0 + 200).unwrap();
        assert_eq!(elapsed_seconds(&s, T0 + 260), 170);
    }

    #[test]
    fn elapsed_is_monotonic_in_now_while_live_or_paused() {
        let mut s = session(0);
        s.start(T0).unwrap();
        let mut last = 0;
        for step in 0..400 {
            let now = T0 + step;
            match step {
                120 => s.pause(now).unwrap(),
                180 => s.resume(now).unwrap(),
                300 => s.pause(now).unwrap(),
                _ => {}
            }
            let value = elapsed_seconds(&s, now);
            assert!(value >= last, "elapsed went backwards at {step}");
            assert!(value >= 0);
            last = value;
        }
    }

    #[test]
    fn elapsed_never_negative_with_local_clock_behind_server() {
        let mut s = session(10);
        s.start(T0).unwrap();
        assert_eq!(elapsed_seconds(&s, T0 - 30), 0);
    }

    #[test]
    fn ended_session_freezes_elapsed() {
        let mut s = session(10);
        s.start(T0).unwrap();
        s.stop(T0 + 90);
        assert_eq!(elapsed_seconds(&s, T0 + 90), 90);
        assert_eq!(elapsed_seconds(&s, T0 + 9_000), 90);
    }

    #[test]
    fn remaining_and_time_up_follow_cap() {
        let mut s = session(1);
        s.start(T0).unwrap();
        assert_eq!(remaining_seconds(&s, T0 + 45), Some(15));
        assert!(!s.is_time_up(T0 + 59));
        assert!(s.is_time_up(T0 + 60));
        assert_eq!(remaining_seconds(&s, T0 + 80), Some(0));
        assert_eq!(remaining_seconds(&session(0), T0), None);
    }

    #[test]
    fn clock_formatting() {
        assert_eq!(format_clock(0), "00:00");
        assert_eq!(format_clock(75), "01:15");
        assert_eq!(format_clock(-4), "00:00");
    }

    #[test]
    fn clock_offset_smooths_samples() {
        let mut offset = ClockOffset::new();
        assert_eq!(offset.apply(T0), T0);

        offset.observe(T0 + 8, T0);
        assert_eq!(offset.seconds(), 8);

        offset.observe(T0 + 110, T0 + 100);
        assert_eq!(offset.seconds(), 8);
        offset.observe(T0 + 106, T0 + 100);
        assert_eq!(offset.seconds(), 7);
        assert_eq!(offset.apply(T0), T0 + 7);
    }

    #[test]
    fn clock_offset_resyncs_on_large_jumps() {
        let mut offset = ClockOffset::new();
        offset.observe(T0 + 8, T0);
        offset.observe(T0 + 100, T0);
        assert_eq!(offset.seconds(), 100);
    }

    #[test]
    fn fixed_clock_reports_epoch_seconds() {
        let mut clock = fixed_clock();
        assert_eq!(clock.epoch_seconds(), T0);
        clock.advance(Duration::seconds(5));
        assert_eq!(clock.epoch_seconds(), T0 + 5);
        assert!(clock.is_fixed());
    }
}
