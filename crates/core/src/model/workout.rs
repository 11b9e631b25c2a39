use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum WorkoutParseError {
    #[error("unknown workout type: {0}")]
    UnknownWorkoutType(String),

    #[error("unknown scaling: {0}")]
    UnknownScaling(String),

    #[error("unknown quantity type: {0}")]
    UnknownQuantityType(String),
}

//
// ─── WORKOUT TYPE ──────────────────────────────────────────────────────────────
//

/// Workout modality driving sequencing, scoring and ranking rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkoutType {
    /// Race through a fixed list of steps; ranked by completion time.
    ForTime,
    /// Loop the step list until the cap; ranked by total reps.
    Amrap,
    /// One round per minute; ranked by cumulative minute time.
    Emom,
    /// Fixed interval structure scored by an external rep counter.
    Tabata,
    /// Same scoring model as `Tabata`.
    Interval,
}

impl WorkoutType {
    /// Parse a stored workout type, falling back to `ForTime` for unset values.
    #[must_use]
    pub fn parse_or_default(raw: Option<&str>) -> Self {
        raw.and_then(|value| value.parse().ok())
            .unwrap_or(Self::ForTime)
    }

    /// Interval-style workouts score from the interval counter, not the cursor.
    #[must_use]
    pub fn is_interval(self) -> bool {
        matches!(self, Self::Tabata | Self::Interval)
    }

    /// Modalities whose participants walk a server-tracked step cursor.
    #[must_use]
    pub fn uses_server_cursor(self) -> bool {
        matches!(self, Self::ForTime | Self::Amrap)
    }

    /// Modalities that ask for a partial-reps value at cutoff.
    #[must_use]
    pub fn requires_partial_at_cutoff(self) -> bool {
        matches!(self, Self::ForTime | Self::Amrap)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ForTime => "FOR_TIME",
            Self::Amrap => "AMRAP",
            Self::Emom => "EMOM",
            Self::Tabata => "TABATA",
            Self::Interval => "INTERVAL",
        }
    }
}

impl fmt::Display for WorkoutType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkoutType {
    type Err = WorkoutParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "FOR_TIME" | "FORTIME" => Ok(Self::ForTime),
            "AMRAP" => Ok(Self::Amrap),
            "EMOM" => Ok(Self::Emom),
            "TABATA" => Ok(Self::Tabata),
            "INTERVAL" => Ok(Self::Interval),
            _ => Err(WorkoutParseError::UnknownWorkoutType(s.to_owned())),
        }
    }
}

//
// ─── SCALING ───────────────────────────────────────────────────────────────────
//

/// Difficulty variant a participant opts into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Scaling {
    #[default]
    Rx,
    Sc,
}

impl fmt::Display for Scaling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rx => f.write_str("RX"),
            Self::Sc => f.write_str("SC"),
        }
    }
}

impl FromStr for Scaling {
    type Err = WorkoutParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "RX" => Ok(Self::Rx),
            "SC" => Ok(Self::Sc),
            _ => Err(WorkoutParseError::UnknownScaling(s.to_owned())),
        }
    }
}

/// Leaderboard filter over scaling variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ScalingFilter {
    #[default]
    All,
    Rx,
    Sc,
}

impl ScalingFilter {
    #[must_use]
    pub fn matches(self, scaling: Scaling) -> bool {
        match self {
            Self::All => true,
            Self::Rx => scaling == Scaling::Rx,
            Self::Sc => scaling == Scaling::Sc,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::All => "ALL",
            Self::Rx => "RX",
            Self::Sc => "SC",
        }
    }
}

impl FromStr for ScalingFilter {
    type Err = WorkoutParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ALL" | "" => Ok(Self::All),
            "RX" => Ok(Self::Rx),
            "SC" => Ok(Self::Sc),
            _ => Err(WorkoutParseError::UnknownScaling(s.to_owned())),
        }
    }
}

//
// ─── QUANTITY TYPE ─────────────────────────────────────────────────────────────
//

/// How a step's quantity is measured.
///
/// For interval workouts the quantity is always seconds; `Reps` there only
/// means the member enters a rep count for the interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuantityType {
    Reps,
    Duration,
}

impl FromStr for QuantityType {
    type Err = WorkoutParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reps" => Ok(Self::Reps),
            "duration" | "sec" | "seconds" => Ok(Self::Duration),
            _ => Err(WorkoutParseError::UnknownQuantityType(s.to_owned())),
        }
    }
}
