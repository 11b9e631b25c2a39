use thiserror::Error;

use crate::model::WorkoutType;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CutoffError {
    #[error("no partial-reps prompt is open")]
    NotPrompting,

    #[error("partial reps already submitted")]
    AlreadySubmitted,
}

/// Where the one-shot partial-reps prompt stands for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CutoffState {
    /// Cutoff not reached yet.
    #[default]
    Idle,
    /// Prompt shown, waiting for the member to enter reps.
    Prompting,
    /// Reps sent, waiting for the server.
    Submitting { reps: u32 },
    Submitted { reps: u32 },
    /// Finished participants and non-cursor workouts skip the prompt.
    NotRequired,
}

/// What the client should do after evaluating the cutoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CutoffAction {
    /// Keep going; cutoff not reached.
    Continue,
    /// Open the partial-reps prompt.
    Prompt,
    /// Waiting on the member or the server.
    Wait,
    /// Leave the live screen.
    Navigate,
}

/// Gates navigation at cutoff behind a single partial-reps submission.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CutoffGate {
    state: CutoffState,
}

impl CutoffGate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn state(&self) -> CutoffState {
        self.state
    }

    /// Re-evaluate on every tick and session refresh.
    pub fn evaluate(
        &mut self,
        workout_type: WorkoutType,
        time_up: bool,
        ended: bool,
        finished: bool,
    ) -> CutoffAction {
        if !time_up && !ended {
            return CutoffAction::Continue;
        }

        match self.state {
            CutoffState::Idle => {
                if finished || !workout_type.requires_partial_at_cutoff() {
                    self.state = CutoffState::NotRequired;
                    CutoffAction::Navigate
                } else {
                    self.state = CutoffState::Prompting;
                    CutoffAction::Prompt
                }
            }
            CutoffState::Prompting | CutoffState::Submitting { .. } => CutoffAction::Wait,
            CutoffState::Submitted { .. } | CutoffState::NotRequired => CutoffAction::Navigate,
        }
    }

    /// Claim the prompt for a submission.
    ///
    /// # Errors
    ///
    /// Returns `CutoffError::AlreadySubmitted` once a value was sent or stored,
    /// and `CutoffError::NotPrompting` when no prompt is open.
    pub fn begin_submit(&mut self, reps: u32) -> Result<u32, CutoffError> {
        match self.state {
            CutoffState::Prompting => {
                self.state = CutoffState::Submitting { reps };
                Ok(reps)
            }
            CutoffState::Submitting { .. } | CutoffState::Submitted { .. } => {
                Err(CutoffError::AlreadySubmitted)
            }
            CutoffState::Idle | CutoffState::NotRequired => Err(CutoffError::NotPrompting),
        }
    }

    pub fn submit_succeeded(&mut self) {
        if let CutoffState::Submitting { reps } = self.state {
            self.state = CutoffState::Submitted { reps };
        }
    }

    /// Reopen the prompt so the member can try again.
    pub fn submit_failed(&mut self) {
        if matches!(self.state, CutoffState::Submitting { .. }) {
            self.state = CutoffState::Prompting;
        }
    }

    /// The server already holds a partial (e.g. after reconnecting).
    pub fn mark_submitted(&mut self, reps: u32) {
        self.state = CutoffState::Submitted { reps };
    }

    /// Server progress shows the member finished: an open prompt is not needed.
    pub fn settle_finished(&mut self) {
        if matches!(self.state, CutoffState::Idle | CutoffState::Prompting) {
            self.state = CutoffState::NotRequired;
        }
    }

    #[must_use]
    pub fn may_navigate(&self) -> bool {
        matches!(
            self.state,
            CutoffState::Submitted { .. } | CutoffState::NotRequired
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_opens_once_and_gates_navigation() {
        let mut gate = CutoffGate::new();
        assert_eq!(
            gate.evaluate(WorkoutType::Amrap, false, false, false),
            CutoffAction::Continue
        );
        assert_eq!(
            gate.evaluate(WorkoutType::Amrap, true, false, false),
            CutoffAction::Prompt
        );
        assert_eq!(
            gate.evaluate(WorkoutType::Amrap, true, true, false),
            CutoffAction::Wait
        );
        assert!(!gate.may_navigate());

        assert_eq!(gate.begin_submit(7), Ok(7));
        assert_eq!(gate.begin_submit(7), Err(CutoffError::AlreadySubmitted));
        gate.submit_succeeded();
        assert_eq!(gate.state(), CutoffState::Submitted { reps: 7 });
        assert_eq!(
            gate.evaluate(WorkoutType::Amrap, true, true, false),
            CutoffAction::Navigate
        );
    }

    #[test]
    fn failed_submit_reopens_prompt() {
        let mut gate = CutoffGate::new();
        gate.evaluate(WorkoutType::ForTime, false, true, false);
        gate.begin_submit(3).unwrap();
        gate.submit_failed();
        assert_eq!(gate.state(), CutoffState::Prompting);
        assert_eq!(gate.begin_submit(4), Ok(4));
    }

    #[test]
    fn finished_or_non_cursor_workouts_navigate_directly() {
        let mut gate = CutoffGate::new();
        assert_eq!(
            gate.evaluate(WorkoutType::ForTime, false, true, true),
            CutoffAction::Navigate
        );
        assert_eq!(gate.begin_submit(1), Err(CutoffError::NotPrompting));

        let mut emom = CutoffGate::new();
        assert_eq!(
            emom.evaluate(WorkoutType::Emom, true, false, false),
            CutoffAction::Navigate
        );
    }

    #[test]
    fn late_finish_closes_an_open_prompt() {
        let mut gate = CutoffGate::new();
        assert_eq!(
            gate.evaluate(WorkoutType::ForTime, false, true, false),
            CutoffAction::Prompt
        );
        gate.settle_finished();
        assert!(gate.may_navigate());
        assert_eq!(
            gate.evaluate(WorkoutType::ForTime, false, true, true),
            CutoffAction::Navigate
        );

        let mut submitted = CutoffGate::new();
        submitted.mark_submitted(4);
        submitted.settle_finished();
        assert_eq!(submitted.state(), CutoffState::Submitted { reps: 4 });
    }
}
