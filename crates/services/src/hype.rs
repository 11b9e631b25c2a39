//! Short encouragement messages when a member's rank changes.

use rand::Rng;
use rand::seq::IndexedRandom;

use live_core::model::UserId;
use live_core::ranker::Leaderboard;

/// Minimum gap between two messages.
pub const DEFAULT_THROTTLE_MS: u64 = 1_800;
/// Chance of a message when a top-three rank is merely held.
pub const DEFAULT_TOP3_CHANCE: f64 = 0.12;

const UP: &[&str] = &[
    "Up to #{rank}! Keep pushing!",
    "Climbing! You're #{rank} now.",
    "Passed someone. #{rank} and rising.",
];
const DOWN: &[&str] = &[
    "Down to #{rank}. Dig in!",
    "#{rank} now. Time to fight back.",
    "Someone slipped past. Go get #{rank} back!",
];
const TOP3: &[&str] = &[
    "Holding #{rank}. Stay strong!",
    "Podium pace at #{rank}!",
    "#{rank} on the board. Don't let up!",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HypeKind {
    Up,
    Down,
    Top3,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HypeMessage {
    pub kind: HypeKind,
    pub rank: u32,
    pub text: String,
}

/// Watches one member's rank across leaderboard refreshes.
#[derive(Debug, Clone)]
pub struct HypeNotifier {
    user_id: UserId,
    prev_rank: Option<u32>,
    last_shown_ms: Option<u64>,
    throttle_ms: u64,
    top3_chance: f64,
    opted_out: bool,
}

impl HypeNotifier {
    #[must_use]
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            prev_rank: None,
            last_shown_ms: None,
            throttle_ms: DEFAULT_THROTTLE_MS,
            top3_chance: DEFAULT_TOP3_CHANCE,
            opted_out: false,
        }
    }

    #[must_use]
    pub fn with_throttle_ms(mut self, throttle_ms: u64) -> Self {
        self.throttle_ms = throttle_ms;
        self
    }

    #[must_use]
    pub fn with_top3_chance(mut self, chance: f64) -> Self {
        self.top3_chance = chance.clamp(0.0, 1.0);
        self
    }

    pub fn set_opted_out(&mut self, opted_out: bool) {
        self.opted_out = opted_out;
    }

    #[must_use]
    pub fn previous_rank(&self) -> Option<u32> {
        self.prev_rank
    }

    /// Feed a fresh leaderboard; returns a message when one should be shown.
    ///
    /// The rank is tracked even while throttled or opted out, so the next
    /// message compares against the latest position.
    pub fn observe<R: Rng + ?Sized>(
        &mut self,
        board: &Leaderboard,
        now_ms: u64,
        rng: &mut R,
    ) -> Option<HypeMessage> {
        let rank = board.position_of(self.user_id)?;
        let previous = self.prev_rank.replace(rank);
        if self.opted_out {
            return None;
        }

        let kind = match previous {
            None if rank <= 3 => HypeKind::Top3,
            None => return None,
            Some(prev) if rank < prev => HypeKind::Up,
            Some(prev) if rank > prev => HypeKind::Down,
            Some(_) if rank <= 3 && rng.random_bool(self.top3_chance) => HypeKind::Top3,
            Some(_) => return None,
        };

        if self
            .last_shown_ms
            .is_some_and(|last| now_ms.saturating_sub(last) < self.throttle_ms)
        {
            return None;
        }

        let templates = match kind {
            HypeKind::Up => UP,
            HypeKind::Down => DOWN,
            HypeKind::Top3 => TOP3,
        };
        let template = templates.choose(rng).copied().unwrap_or("#{rank}");
        self.last_shown_ms = Some(now_ms);
        Some(HypeMessage {
            kind,
            rank,
            text: template.replace("{rank}", &rank.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use live_core::model::{LeaderboardEntry, Scaling, ScalingFilter};
    use live_core::ranker;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn entry(user: u64, reps: u32) -> LeaderboardEntry {
        LeaderboardEntry {
            user_id: UserId::new(user),
            display_name: format!("Member {user}"),
            scaling: Scaling::Rx,
            finished: false,
            elapsed_seconds: None,
            total_reps: Some(reps),
            completed_minutes: None,
        }
    }

    fn board(reps: &[(u64, u32)]) -> Leaderboard {
        let entries: Vec<_> = reps.iter().map(|(u, r)| entry(*u, *r)).collect();
        ranker::rank(&entries, ScalingFilter::All)
    }

    #[test]
    fn first_sight_only_hypes_the_podium() {
        let mut rng = StdRng::seed_from_u64(7);
        let five = board(&[(1, 10), (2, 20), (3, 30), (4, 40), (5, 50)]);

        let mut last = HypeNotifier::new(UserId::new(1));
        assert!(last.observe(&five, 0, &mut rng).is_none());
        assert_eq!(last.previous_rank(), Some(5));

        let mut leader = HypeNotifier::new(UserId::new(5));
        let msg = leader.observe(&five, 0, &mut rng).unwrap();
        assert_eq!(msg.kind, HypeKind::Top3);
        assert!(msg.text.contains("#1"));
    }

    #[test]
    fn rank_changes_are_announced_with_throttle() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut hype = HypeNotifier::new(UserId::new(1)).with_top3_chance(0.0);
        hype.observe(&board(&[(1, 10), (2, 20), (3, 30), (4, 40)]), 0, &mut rng);

        let up = hype
            .observe(&board(&[(1, 35), (2, 20), (3, 30), (4, 40)]), 5_000, &mut rng)
            .unwrap();
        assert_eq!((up.kind, up.rank), (HypeKind::Up, 2));

        // Within the throttle window: tracked but silent.
        assert!(hype
            .observe(&board(&[(1, 35), (2, 50), (3, 30), (4, 40)]), 5_500, &mut rng)
            .is_none());
        assert_eq!(hype.previous_rank(), Some(3));

        let down = hype
            .observe(&board(&[(1, 35), (2, 50), (3, 60), (4, 40)]), 9_000, &mut rng)
            .unwrap();
        assert_eq!((down.kind, down.rank), (HypeKind::Down, 4));
    }

    #[test]
    fn held_podium_rank_uses_the_configured_chance() {
        let mut rng = StdRng::seed_from_u64(3);
        let top = board(&[(1, 99), (2, 1)]);
        let mut always = HypeNotifier::new(UserId::new(1)).with_top3_chance(1.0);
        always.observe(&top, 0, &mut rng);
        assert_eq!(always.observe(&top, 10_000, &mut rng).unwrap().kind, HypeKind::Top3);

        let mut never = HypeNotifier::new(UserId::new(1)).with_top3_chance(0.0);
        never.observe(&top, 0, &mut rng);
        assert!(never.observe(&top, 10_000, &mut rng).is_none());
    }

    #[test]
    fn opted_out_members_hear_nothing() {
        let mut rng = StdRng::seed_from_u64(9);
        let mut hype = HypeNotifier::new(UserId::new(1));
        hype.set_opted_out(true);
        assert!(hype.observe(&board(&[(1, 99)]), 0, &mut rng).is_none());
        assert!(hype.observe(&board(&[(2, 1)]), 0, &mut rng).is_none());
    }
}
