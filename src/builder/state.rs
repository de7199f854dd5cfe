//! Build stages and the image build state machine

use super::error::BuildError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The four ordered declaration stages of an application image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Base,
    SystemDependencies,
    Source,
    AppDependencies,
    Runtime,
}

impl Stage {
    pub fn all() -> &'static [Stage] {
        &[
            Stage::Base,
            Stage::SystemDependencies,
            Stage::Source,
            Stage::AppDependencies,
            Stage::Runtime,
        ]
    }

    /// How a failure inside this stage is reported
    pub fn failure_description(&self) -> &'static str {
        match self {
            Stage::Base => "unresolvable base image",
            Stage::SystemDependencies => "system package installation failed",
            Stage::Source => "source copy failed",
            Stage::AppDependencies => "dependency resolution failed",
            Stage::Runtime => "runtime contract declaration failed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Base => "base runtime",
            Stage::SystemDependencies => "system dependencies",
            Stage::Source => "source copy",
            Stage::AppDependencies => "application dependencies",
            Stage::Runtime => "runtime entrypoint",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildState {
    Pending,
    BaseReady,
    SystemDepsReady,
    SourceCopied,
    AppDepsReady,
    ImageComplete,
    Failed,
}

impl BuildState {
    /// The single forward successor, if any
    pub fn next(&self) -> Option<BuildState> {
        match self {
            BuildState::Pending => Some(BuildState::BaseReady),
            BuildState::BaseReady => Some(BuildState::SystemDepsReady),
            BuildState::SystemDepsReady => Some(BuildState::SourceCopied),
            BuildState::SourceCopied => Some(BuildState::AppDepsReady),
            BuildState::AppDepsReady => Some(BuildState::ImageComplete),
            BuildState::ImageComplete | BuildState::Failed => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BuildState::ImageComplete | BuildState::Failed)
    }

    pub fn can_transition_to(&self, to: BuildState) -> bool {
        if self.is_terminal() {
            return false;
        }
        to == BuildState::Failed || self.next() == Some(to)
    }
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BuildState::Pending => "PENDING",
            BuildState::BaseReady => "BASE_READY",
            BuildState::SystemDepsReady => "SYSTEM_DEPS_READY",
            BuildState::SourceCopied => "SOURCE_COPIED",
            BuildState::AppDepsReady => "APP_DEPS_READY",
            BuildState::ImageComplete => "IMAGE_COMPLETE",
            BuildState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Tracks the current state and every state visited
#[derive(Debug, Clone)]
pub struct StateMachine {
    state: BuildState,
    history: Vec<BuildState>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self {
            state: BuildState::Pending,
            history: vec![BuildState::Pending],
        }
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> BuildState {
        self.state
    }

    pub fn history(&self) -> &[BuildState] {
        &self.history
    }

    pub fn transition(&mut self, to: BuildState) -> Result<(), BuildError> {
        if !self.state.can_transition_to(to) {
            return Err(BuildError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        self.history.push(to);
        Ok(())
    }

    /// Move to `to`, which must be the current state's successor
    pub fn advance(&mut self, to: BuildState) -> Result<(), BuildError> {
        if to == BuildState::Failed {
            return Err(BuildError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        self.transition(to)
    }

    /// Move to `Failed` unless already terminal
    pub fn fail(&mut self) {
        if !self.state.is_terminal() {
            self.state = BuildState::Failed;
            self.history.push(BuildState::Failed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_path() {
        let mut machine = StateMachine::new();
        let mut state = BuildState::Pending;
        while let Some(next) = state.next() {
            machine.advance(next).unwrap();
            state = next;
        }
        assert_eq!(machine.state(), BuildState::ImageComplete);
        assert_eq!(machine.history().len(), 6);
    }

    #[test]
    fn test_cannot_skip_states() {
        let mut machine = StateMachine::new();
        let err = machine.advance(BuildState::SourceCopied).unwrap_err();
        assert!(matches!(
            err,
            BuildError::InvalidTransition {
                from: BuildState::Pending,
                to: BuildState::SourceCopied
            }
        ));
        assert_eq!(machine.state(), BuildState::Pending);
    }

    #[test]
    fn test_cannot_move_backwards() {
        let mut machine = StateMachine::new();
        machine.advance(BuildState::BaseReady).unwrap();
        assert!(machine.advance(BuildState::Pending).is_err());
    }

    #[test]
    fn test_failed_is_terminal() {
        let mut machine = StateMachine::new();
        machine.advance(BuildState::BaseReady).unwrap();
        machine.fail();
        assert_eq!(machine.state(), BuildState::Failed);
        assert!(machine.advance(BuildState::SystemDepsReady).is_err());

        machine.fail();
        assert_eq!(
            machine.history(),
            &[BuildState::Pending, BuildState::BaseReady, BuildState::Failed]
        );
    }

    #[test]
    fn test_complete_is_terminal() {
        assert!(!BuildState::ImageComplete.can_transition_to(BuildState::Failed));
        assert!(BuildState::AppDepsReady.can_transition_to(BuildState::Failed));
    }

    #[test]
    fn test_display_names() {
        assert_eq!(BuildState::SystemDepsReady.to_string(), "SYSTEM_DEPS_READY");
        assert_eq!(
            serde_json::to_string(&BuildState::AppDepsReady).unwrap(),
            "\"APP_DEPS_READY\""
        );
        assert_eq!(Stage::AppDependencies.to_string(), "application dependencies");
    }
}
