use std::env;
use std::time::Duration;

use crate::error::ConfigError;

/// Default local recompute tick.
pub const DEFAULT_TICK: Duration = Duration::from_millis(250);
/// Default session poll interval.
pub const DEFAULT_SESSION_POLL: Duration = Duration::from_millis(500);
/// Default own-progress poll interval.
pub const DEFAULT_PROGRESS_POLL: Duration = Duration::from_millis(1_500);
/// Default leaderboard poll interval.
pub const DEFAULT_LEADERBOARD_POLL: Duration = Duration::from_millis(2_500);
/// Default window for coalescing push notices into one refresh.
pub const DEFAULT_PUSH_DEBOUNCE: Duration = Duration::from_millis(250);

/// Timing of one participant's sync loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    pub tick: Duration,
    pub session_poll: Duration,
    pub progress_poll: Duration,
    pub leaderboard_poll: Duration,
    pub push_debounce: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tick: DEFAULT_TICK,
            session_poll: DEFAULT_SESSION_POLL,
            progress_poll: DEFAULT_PROGRESS_POLL,
            leaderboard_poll: DEFAULT_LEADERBOARD_POLL,
            push_debounce: DEFAULT_PUSH_DEBOUNCE,
        }
    }
}

impl SyncConfig {
    /// Load the sync timing from environment variables.
    ///
    /// | Env Var                    | Default | Range (ms)     |
    /// |----------------------------|---------|----------------|
    /// | `LIVE_TICK_MS`             | `250`   | 10..=1000      |
    /// | `LIVE_SESSION_POLL_MS`     | `500`   | 100..=60000    |
    /// | `LIVE_PROGRESS_POLL_MS`    | `1500`  | 100..=60000    |
    /// | `LIVE_LEADERBOARD_POLL_MS` | `2500`  | 100..=60000    |
    /// | `LIVE_PUSH_DEBOUNCE_MS`    | `250`   | 0..=5000       |
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when a variable is not an integer or out of range.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`SyncConfig::from_env`] with a custom variable source.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when a variable is not an integer or out of range.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let read = |var: &'static str, default: Duration, min: u64, max: u64| {
            millis(&lookup, var, default, min, max)
        };
        Ok(Self {
            tick: read("LIVE_TICK_MS", DEFAULT_TICK, 10, 1_000)?,
            session_poll: read("LIVE_SESSION_POLL_MS", DEFAULT_SESSION_POLL, 100, 60_000)?,
            progress_poll: read("LIVE_PROGRESS_POLL_MS", DEFAULT_PROGRESS_POLL, 100, 60_000)?,
            leaderboard_poll: read(
                "LIVE_LEADERBOARD_POLL_MS",
                DEFAULT_LEADERBOARD_POLL,
                100,
                60_000,
            )?,
            push_debounce: read("LIVE_PUSH_DEBOUNCE_MS", DEFAULT_PUSH_DEBOUNCE, 0, 5_000)?,
        })
    }

    #[must_use]
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    #[must_use]
    pub fn with_push_debounce(mut self, debounce: Duration) -> Self {
        self.push_debounce = debounce;
        self
    }
}

fn millis(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: Duration,
    min: u64,
    max: u64,
) -> Result<Duration, ConfigError> {
    let Some(raw) = lookup(var).filter(|value| !value.trim().is_empty()) else {
        return Ok(default);
    };
    let value: u64 = raw.trim().parse().map_err(|_| ConfigError::NotANumber {
        var,
        value: raw.clone(),
    })?;
    if !(min..=max).contains(&value) {
        return Err(ConfigError::OutOfRange {
            var,
            value,
            min,
            max,
        });
    }
    Ok(Duration::from_millis(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = SyncConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, SyncConfig::default());
    }

    #[test]
    fn overrides_are_read_in_millis() {
        let config = SyncConfig::from_lookup(lookup(&[
            ("LIVE_TICK_MS", "100"),
            ("LIVE_LEADERBOARD_POLL_MS", " 4000 "),
        ]))
        .unwrap();
        assert_eq!(config.tick, Duration::from_millis(100));
        assert_eq!(config.leaderboard_poll, Duration::from_secs(4));
        assert_eq!(config.session_poll, DEFAULT_SESSION_POLL);
    }

    #[test]
    fn tick_above_one_second_is_rejected() {
        let err = SyncConfig::from_lookup(lookup(&[("LIVE_TICK_MS", "1500")])).unwrap_err();
        assert!(matches!(err, ConfigError::OutOfRange { var: "LIVE_TICK_MS", .. }));
    }

    #[test]
    fn garbage_is_rejected() {
        let err = SyncConfig::from_lookup(lookup(&[("LIVE_PUSH_DEBOUNCE_MS", "soon")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::NotANumber {
                var: "LIVE_PUSH_DEBOUNCE_MS",
                value: "soon".into()
            }
        );
    }
}
