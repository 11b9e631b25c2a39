//! Flattening of a stored workout (rounds → subrounds → exercises) into the
//! ordered step list a live session runs on.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::model::step::{Step, cumulative_reps};
use crate::model::workout::{QuantityType, WorkoutType};

/// One exercise row as stored under a workout's round/subround tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExerciseRow {
    pub round: u32,
    pub subround: u32,
    pub position: u32,
    pub name: String,
    pub quantity_type: QuantityType,
    pub quantity: u32,
    #[serde(default)]
    pub target_reps: Option<u32>,
}

/// Free-form workout metadata that affects the live plan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkoutMetadata {
    /// Repeat count for single-round FOR_TIME / TABATA / INTERVAL templates.
    #[serde(default)]
    pub number_of_rounds: Option<u32>,
    /// Preferred time cap in minutes; falls back to the class duration.
    #[serde(default)]
    pub time_limit_minutes: Option<u32>,
    /// EMOM: how many consecutive minutes each round is repeated for.
    #[serde(default)]
    pub emom_repeats: Vec<u32>,
}

/// Workout as handed to the coach's `start` transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkoutDefinition {
    pub workout_type: WorkoutType,
    pub rows: Vec<ExerciseRow>,
    #[serde(default)]
    pub metadata: WorkoutMetadata,
}

/// Flattened steps plus their cumulative reps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkoutPlan {
    pub steps: Vec<Step>,
    pub cumulative_reps: Vec<u32>,
}

impl WorkoutDefinition {
    /// Flatten the workout into the live step list.
    ///
    /// - EMOM regroups exercises by subround; each subround becomes one minute round.
    /// - FOR_TIME, TABATA and INTERVAL expand a single-round template
    ///   `number_of_rounds` times.
    /// - AMRAP keeps rows in stored order.
    #[must_use]
    pub fn build_plan(&self) -> WorkoutPlan {
        let mut rows = self.rows.clone();
        rows.sort_by_key(|row| (row.round, row.subround, row.position));

        let base: Vec<Step> = rows
            .into_iter()
            .enumerate()
            .map(|(idx, row)| Step {
                index: index_u32(idx),
                name: row.name,
                quantity_type: row.quantity_type,
                quantity: row.quantity,
                round: row.round,
                subround: row.subround,
                target_reps: row.target_reps,
            })
            .collect();

        let steps = match self.workout_type {
            WorkoutType::Emom => group_by_subround(base),
            WorkoutType::ForTime | WorkoutType::Tabata | WorkoutType::Interval => {
                let repeats = self.metadata.number_of_rounds.unwrap_or(1).max(1);
                expand_single_round(base, repeats)
            }
            WorkoutType::Amrap => reindex(base),
        };

        // Interval quantities are seconds, never reps.
        let cumulative_reps = if self.workout_type.is_interval() {
            vec![0; steps.len()]
        } else {
            cumulative_reps(&steps)
        };

        WorkoutPlan {
            steps,
            cumulative_reps,
        }
    }

    /// Time cap in seconds: the workout's own limit, else the class length.
    #[must_use]
    pub fn time_cap_seconds(&self, class_duration_minutes: u32) -> i64 {
        let minutes = match self.metadata.time_limit_minutes {
            Some(limit) if limit > 0 => limit,
            _ => class_duration_minutes,
        };
        i64::from(minutes) * 60
    }
}

fn index_u32(idx: usize) -> u32 {
    u32::try_from(idx).unwrap_or(u32::MAX)
}

fn reindex(steps: Vec<Step>) -> Vec<Step> {
    steps
        .into_iter()
        .enumerate()
        .map(|(idx, step)| Step {
            index: index_u32(idx),
            ..step
        })
        .collect()
}

fn group_by_subround(steps: Vec<Step>) -> Vec<Step> {
    let mut by_subround: BTreeMap<u32, Vec<Step>> = BTreeMap::new();
    for step in steps {
        by_subround.entry(step.subround.max(1)).or_default().push(step);
    }

    let mut out = Vec::new();
    for (subround, mut group) in by_subround {
        group.sort_by_key(|step| step.index);
        for step in group {
            out.push(Step {
                round: subround,
                ..step
            });
        }
    }
    reindex(out)
}

fn expand_single_round(steps: Vec<Step>, repeats: u32) -> Vec<Step> {
    let rounds: BTreeSet<u32> = steps.iter().map(|step| step.round).collect();
    if repeats <= 1 || rounds.len() != 1 {
        return reindex(steps);
    }

    let mut template = steps;
    template.sort_by_key(|step| (step.subround, step.index));

    let mut out = Vec::with_capacity(template.len() * repeats as usize);
    for round in 1..=repeats {
        for step in &template {
            out.push(Step {
                round,
                ..step.clone()
            });
        }
    }
    reindex(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(round: u32, subround: u32, position: u32, name: &str, reps: u32) -> ExerciseRow {
        ExerciseRow {
            round,
            subround,
            position,
            name: name.into(),
            quantity_type: QuantityType::Reps,
            quantity: reps,
            target_reps: None,
        }
    }

    #[test]
    fn for_time_expands_single_round_template() {
        let def = WorkoutDefinition {
            workout_type: WorkoutType::ForTime,
            rows: vec![row(1, 1, 2, "Squat", 15), row(1, 1, 1, "Pushup", 10)],
            metadata: WorkoutMetadata {
                number_of_rounds: Some(3),
                ..WorkoutMetadata::default()
            },
        };

        let plan = def.build_plan();
        assert_eq!(plan.steps.len(), 6);
        assert_eq!(plan.steps[0].name, "Pushup");
        assert_eq!(plan.steps[5].round, 3);
        assert_eq!(plan.steps[5].index, 5);
        assert_eq!(plan.cumulative_reps, vec![10, 25, 35, 50, 60, 75]);
    }

    #[test]
    fn multi_round_workouts_are_not_expanded() {
        let def = WorkoutDefinition {
            workout_type: WorkoutType::ForTime,
            rows: vec![row(1, 1, 1, "Row", 10), row(2, 1, 1, "Run", 5)],
            metadata: WorkoutMetadata {
                number_of_rounds: Some(4),
                ..WorkoutMetadata::default()
            },
        };
        assert_eq!(def.build_plan().steps.len(), 2);
    }

    #[test]
    fn emom_groups_by_subround() {
        let def = WorkoutDefinition {
            workout_type: WorkoutType::Emom,
            rows: vec![
                row(1, 2, 1, "Lunge", 8),
                row(1, 1, 1, "Clean", 3),
                row(1, 1, 2, "Jerk", 3),
            ],
            metadata: WorkoutMetadata::default(),
        };

        let plan = def.build_plan();
        let rounds: Vec<u32> = plan.steps.iter().map(|s| s.round).collect();
        assert_eq!(rounds, vec![1, 1, 2]);
        assert_eq!(plan.steps[2].name, "Lunge");
    }

    #[test]
    fn interval_plans_carry_no_cumulative_reps() {
        let def = WorkoutDefinition {
            workout_type: WorkoutType::Tabata,
            rows: vec![row(1, 1, 1, "Bike", 20)],
            metadata: WorkoutMetadata::default(),
        };
        assert_eq!(def.build_plan().cumulative_reps, vec![0]);
    }

    #[test]
    fn time_cap_prefers_workout_limit() {
        let mut def = WorkoutDefinition {
            workout_type: WorkoutType::Amrap,
            rows: Vec::new(),
            metadata: WorkoutMetadata {
                time_limit_minutes: Some(12),
                ..WorkoutMetadata::default()
            },
        };
        assert_eq!(def.time_cap_seconds(45), 720);

        def.metadata.time_limit_minutes = Some(0);
        assert_eq!(def.time_cap_seconds(45), 2700);
    }
}
