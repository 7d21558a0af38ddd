//! Loader lifecycle state machine.

use std::fmt::{self, Display, Formatter};

use chrono::{DateTime, Utc};

use crate::error::{LoaderError, Result};

/// Step of the load/activate sequence, used to report where a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Configuration,
    LoadRuntime,
    LoadPlugin,
    ResolveRegister,
    ResolveDescriptor,
    ValidateDescriptor,
    Register,
    Initialize,
    Unregister,
    Finalize,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Configuration => "configuration",
            Stage::LoadRuntime => "load runtime",
            Stage::LoadPlugin => "load plugin",
            Stage::ResolveRegister => "resolve registration entry point",
            Stage::ResolveDescriptor => "resolve plugin descriptor",
            Stage::ValidateDescriptor => "validate plugin descriptor",
            Stage::Register => "register plugin",
            Stage::Initialize => "initialize plugin",
            Stage::Unregister => "unregister plugin",
            Stage::Finalize => "finalize plugin",
        }
    }
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a loader instance is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoaderStage {
    Unloaded,
    RuntimeLoaded,
    PluginLoaded,
    Registered,
    Initialized,
    /// A step failed. No further forward step is accepted.
    Failed { stage: Stage, reason: String },
}

impl LoaderStage {
    /// Check if the loader is in the failed state.
    pub fn is_failed(&self) -> bool {
        matches!(self, LoaderStage::Failed { .. })
    }

    /// Check if activation completed.
    pub fn is_initialized(&self) -> bool {
        matches!(self, LoaderStage::Initialized)
    }
}

impl Display for LoaderStage {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            LoaderStage::Unloaded => f.write_str("unloaded"),
            LoaderStage::RuntimeLoaded => f.write_str("runtime loaded"),
            LoaderStage::PluginLoaded => f.write_str("plugin loaded"),
            LoaderStage::Registered => f.write_str("registered"),
            LoaderStage::Initialized => f.write_str("initialized"),
            LoaderStage::Failed { stage, reason } => {
                write!(f, "failed at '{}': {}", stage, reason)
            }
        }
    }
}

/// Record of a state transition.
#[derive(Debug, Clone)]
pub struct StateTransition {
    pub from: LoaderStage,
    pub to: LoaderStage,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
}

/// Loader state machine for managing stage transitions.
#[derive(Debug)]
pub struct StateMachine {
    current: LoaderStage,
    history: Vec<StateTransition>,
}

impl StateMachine {
    /// Create a new state machine in [`LoaderStage::Unloaded`].
    pub fn new() -> Self {
        Self {
            current: LoaderStage::Unloaded,
            history: Vec::new(),
        }
    }

    /// Get current stage.
    pub fn current(&self) -> &LoaderStage {
        &self.current
    }

    /// Get transition history.
    pub fn history(&self) -> &[StateTransition] {
        &self.history
    }

    /// Fail with `InvalidState` unless the current stage is `expected`.
    pub fn require(&self, expected: &LoaderStage, operation: &'static str) -> Result<()> {
        if &self.current == expected {
            Ok(())
        } else {
            Err(self.invalid(operation))
        }
    }

    /// `InvalidState` error for `operation` in the current stage.
    pub fn invalid(&self, operation: &'static str) -> LoaderError {
        LoaderError::InvalidState {
            operation,
            stage: self.current.to_string(),
        }
    }

    /// Transition to a new stage.
    pub fn transition(&mut self, to: LoaderStage, reason: impl Into<String>) -> Result<()> {
        if !Self::is_valid_transition(&self.current, &to) {
            return Err(LoaderError::InvalidState {
                operation: "change stage",
                stage: format!("{} (requested {})", self.current, to),
            });
        }
        self.record(to, reason.into());
        Ok(())
    }

    /// Transition to the failed stage. The first failure is kept.
    pub fn fail(&mut self, stage: Stage, reason: impl Into<String>) {
        if self.current.is_failed() {
            return;
        }
        self.record(
            LoaderStage::Failed {
                stage,
                reason: reason.into(),
            },
            format!("{} failed", stage),
        );
    }

    fn record(&mut self, to: LoaderStage, reason: String) {
        tracing::debug!(from = %self.current, to = %to, "{}", reason);
        let transition = StateTransition {
            from: self.current.clone(),
            to: to.clone(),
            timestamp: Utc::now(),
            reason,
        };
        self.current = to;
        self.history.push(transition);
    }

    fn is_valid_transition(from: &LoaderStage, to: &LoaderStage) -> bool {
        use LoaderStage::*;
        matches!(
            (from, to),
            // Forward
            (Unloaded, RuntimeLoaded)
                | (RuntimeLoaded, PluginLoaded)
                | (PluginLoaded, Registered)
                | (Registered, Initialized)
                // Shutdown and unload
                | (Initialized, PluginLoaded)
                | (PluginLoaded, RuntimeLoaded)
                | (RuntimeLoaded, Unloaded)
        )
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}
