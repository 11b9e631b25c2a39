use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::model::{LeaderboardEntry, ScalingFilter, UserId};

/// An entry with its 1-based position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedEntry {
    pub position: u32,
    #[serde(flatten)]
    pub entry: LeaderboardEntry,
}

/// Ordered leaderboard view for one scaling filter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Leaderboard {
    pub filter: ScalingFilter,
    pub entries: Vec<RankedEntry>,
}

impl Leaderboard {
    #[must_use]
    pub fn position_of(&self, user_id: UserId) -> Option<u32> {
        self.entries
            .iter()
            .find(|ranked| ranked.entry.user_id == user_id)
            .map(|ranked| ranked.position)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// User ids in rank order.
    #[must_use]
    pub fn order(&self) -> Vec<UserId> {
        self.entries.iter().map(|ranked| ranked.entry.user_id).collect()
    }
}

/// Total order used for ranking.
///
/// Finished rows come first, fastest first. Unfinished rows follow, most reps
/// first. `user_id` breaks every remaining tie.
#[must_use]
pub fn compare(a: &LeaderboardEntry, b: &LeaderboardEntry) -> Ordering {
    b.finished
        .cmp(&a.finished)
        .then_with(|| {
            if a.finished && b.finished {
                let a_time = a.elapsed_seconds.unwrap_or(i64::MAX);
                let b_time = b.elapsed_seconds.unwrap_or(i64::MAX);
                a_time.cmp(&b_time)
            } else {
                b.total_reps.unwrap_or(0).cmp(&a.total_reps.unwrap_or(0))
            }
        })
        .then_with(|| a.user_id.cmp(&b.user_id))
}

/// Filter by scaling and sort. The result does not depend on input order.
#[must_use]
pub fn rank(entries: &[LeaderboardEntry], filter: ScalingFilter) -> Leaderboard {
    let mut kept: Vec<&LeaderboardEntry> = entries
        .iter()
        .filter(|entry| filter.matches(entry.scaling))
        .collect();
    kept.sort_by(|a, b| compare(a, b));

    let entries = kept
        .into_iter()
        .enumerate()
        .map(|(idx, entry)| RankedEntry {
            position: u32::try_from(idx + 1).unwrap_or(u32::MAX),
            entry: entry.clone(),
        })
        .collect();

    Leaderboard { filter, entries }
}
