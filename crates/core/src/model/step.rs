use serde::{Deserialize, Serialize};

use crate::model::workout::QuantityType;

/// One exercise entry in a live session's flattened step list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    /// 0-based position in the flattened list.
    pub index: u32,
    pub name: String,
    pub quantity_type: QuantityType,
    pub quantity: u32,
    pub round: u32,
    pub subround: u32,
    /// Rep target used by EMOM and interval minute completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_reps: Option<u32>,
}

impl Step {
    /// Reps contributed to the cumulative total; duration steps add nothing.
    #[must_use]
    pub fn reps(&self) -> u32 {
        match self.quantity_type {
            QuantityType::Reps => self.quantity,
            QuantityType::Duration => 0,
        }
    }

    /// Short human label, e.g. `10x Pushups` or `Plank 30s`.
    #[must_use]
    pub fn label(&self) -> String {
        match self.quantity_type {
            QuantityType::Reps => format!("{}x {}", self.quantity, self.name),
            QuantityType::Duration => format!("{} {}s", self.name, self.quantity),
        }
    }
}

/// Running sum of reps aligned with `steps`.
#[must_use]
pub fn cumulative_reps(steps: &[Step]) -> Vec<u32> {
    steps
        .iter()
        .scan(0_u32, |running, step| {
            *running = running.saturating_add(step.reps());
            Some(*running)
        })
        .collect()
}
