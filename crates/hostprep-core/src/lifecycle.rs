use crate::CoreError;
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepState {
    Unstarted,
    Probing,
    Satisfied,
    Applying,
    Verifying,
    Done,
    Failed,
}

impl StepState {
    pub fn is_terminal(self) -> bool {
        matches!(self, StepState::Satisfied | StepState::Done | StepState::Failed)
    }
}

impl std::fmt::Display for StepState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StepState::Unstarted => "unstarted",
            StepState::Probing => "probing",
            StepState::Satisfied => "satisfied",
            StepState::Applying => "applying",
            StepState::Verifying => "verifying",
            StepState::Done => "done",
            StepState::Failed => "failed",
        };
        f.write_str(s)
    }
}

pub fn validate_transition(from: StepState, to: StepState) -> Result<(), CoreError> {
    let valid = matches!(
        (from, to),
        (StepState::Unstarted, StepState::Probing)
            | (
                StepState::Probing,
                StepState::Satisfied | StepState::Applying | StepState::Failed
            )
            | (StepState::Applying, StepState::Verifying | StepState::Failed)
            | (StepState::Verifying, StepState::Done | StepState::Failed)
    );

    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

/// Current state of one step plus every state it passed through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepTracker {
    state: StepState,
    trail: Vec<StepState>,
}

impl Default for StepTracker {
    fn default() -> Self {
        Self {
            state: StepState::Unstarted,
            trail: vec![StepState::Unstarted],
        }
    }
}

impl StepTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> StepState {
        self.state
    }

    pub fn trail(&self) -> &[StepState] {
        &self.trail
    }

    pub fn advance(&mut self, to: StepState) -> Result<(), CoreError> {
        validate_transition(self.state, to)?;
        self.state = to;
        self.trail.push(to);
        Ok(())
    }

    /// Move to `Failed` if the current state allows it.
    pub fn fail(&mut self) {
        if self.advance(StepState::Failed).is_err() {
            debug!("step in state {} cannot fail", self.state);
        }
    }
}
