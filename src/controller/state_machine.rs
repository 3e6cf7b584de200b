//! Finite state machine for one reconciliation pass
//!
//! A pass moves Building → Applying → Deployed, or ends in Failed from either
//! working phase. The next pass always restarts from Building, so a failed
//! pass never resumes half way. The phase a pass ends in is kept per instance
//! and exported as a metric.

use std::fmt;

use tracing::{debug, warn};

use crate::controller::error::{Error, Result};

/// Phase of a reconciliation pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReconcilePhase {
    /// Fetching external config and building the desired model
    Building,
    /// Converging cluster objects toward the model
    Applying,
    /// Every object converged
    Deployed,
    /// The pass stopped on an error
    Failed,
}

impl ReconcilePhase {
    pub const ALL: [ReconcilePhase; 4] = [
        ReconcilePhase::Building,
        ReconcilePhase::Applying,
        ReconcilePhase::Deployed,
        ReconcilePhase::Failed,
    ];

    /// Whether a pass ended here
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReconcilePhase::Deployed | ReconcilePhase::Failed)
    }
}

impl fmt::Display for ReconcilePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcilePhase::Building => write!(f, "Building"),
            ReconcilePhase::Applying => write!(f, "Applying"),
            ReconcilePhase::Deployed => write!(f, "Deployed"),
            ReconcilePhase::Failed => write!(f, "Failed"),
        }
    }
}

/// Events that move a pass between phases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassEvent {
    /// The desired model was built
    ModelBuilt,
    /// Every desired object was applied and every absent one removed
    ObjectsConverged,
    /// Any error
    PassFailed,
    /// A new pass started
    PassStarted,
}

impl fmt::Display for PassEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PassEvent::ModelBuilt => write!(f, "ModelBuilt"),
            PassEvent::ObjectsConverged => write!(f, "ObjectsConverged"),
            PassEvent::PassFailed => write!(f, "PassFailed"),
            PassEvent::PassStarted => write!(f, "PassStarted"),
        }
    }
}

/// Facts the guards look at
#[derive(Debug, Clone, Default)]
pub struct TransitionContext {
    /// Desired objects not yet applied in this pass
    pub pending_objects: usize,
}

#[derive(Debug)]
pub struct Transition {
    pub from: ReconcilePhase,
    pub to: ReconcilePhase,
    pub event: PassEvent,
    pub description: &'static str,
}

impl Transition {
    const fn new(
        from: ReconcilePhase,
        to: ReconcilePhase,
        event: PassEvent,
        description: &'static str,
    ) -> Self {
        Self {
            from,
            to,
            event,
            description,
        }
    }
}

/// Result of attempting a state transition
#[derive(Debug, PartialEq, Eq)]
pub enum TransitionResult {
    Success {
        from: ReconcilePhase,
        to: ReconcilePhase,
        event: PassEvent,
        description: &'static str,
    },
    InvalidTransition {
        current: ReconcilePhase,
        event: PassEvent,
    },
    GuardFailed {
        from: ReconcilePhase,
        to: ReconcilePhase,
        event: PassEvent,
        reason: String,
    },
}

pub struct PassStateMachine {
    transitions: Vec<Transition>,
}

impl Default for PassStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl PassStateMachine {
    pub fn new() -> Self {
        use PassEvent::*;
        use ReconcilePhase::*;

        Self {
            transitions: vec![
                Transition::new(Building, Applying, ModelBuilt, "Desired model built"),
                Transition::new(Building, Failed, PassFailed, "Model could not be built"),
                Transition::new(Applying, Deployed, ObjectsConverged, "All objects converged"),
                Transition::new(Applying, Failed, PassFailed, "Applying objects failed"),
                Transition::new(Deployed, Building, PassStarted, "New pass after success"),
                Transition::new(Failed, Building, PassStarted, "New pass after failure"),
            ],
        }
    }

    /// Attempt to transition to a new phase based on an event
    pub fn transition(
        &self,
        current: ReconcilePhase,
        event: PassEvent,
        ctx: &TransitionContext,
    ) -> TransitionResult {
        match self
            .transitions
            .iter()
            .find(|t| t.from == current && t.event == event)
        {
            Some(t) => match self.check_guard(t, ctx) {
                Some(reason) => TransitionResult::GuardFailed {
                    from: t.from,
                    to: t.to,
                    event,
                    reason,
                },
                None => TransitionResult::Success {
                    from: t.from,
                    to: t.to,
                    event,
                    description: t.description,
                },
            },
            None => TransitionResult::InvalidTransition { current, event },
        }
    }

    pub fn can_transition(&self, from: ReconcilePhase, event: PassEvent) -> bool {
        self.transitions
            .iter()
            .any(|t| t.from == from && t.event == event)
    }

    fn check_guard(&self, transition: &Transition, ctx: &TransitionContext) -> Option<String> {
        match transition.event {
            PassEvent::ObjectsConverged if ctx.pending_objects > 0 => Some(format!(
                "{} objects still pending",
                ctx.pending_objects
            )),
            _ => None,
        }
    }
}

/// Phase of the pass in progress
#[derive(Debug)]
pub struct PassTracker {
    machine: PassStateMachine,
    phase: ReconcilePhase,
}

impl Default for PassTracker {
    fn default() -> Self {
        Self {
            machine: PassStateMachine::new(),
            phase: ReconcilePhase::Building,
        }
    }
}

impl PassTracker {
    /// Start a pass after one that ended in `last`.
    ///
    /// A pass that never reached a terminal phase (the task was cancelled)
    /// is abandoned and the new one starts from Building as well.
    pub fn resume(last: Option<ReconcilePhase>) -> Self {
        let mut tracker = Self::default();
        if let Some(last) = last.filter(ReconcilePhase::is_terminal) {
            tracker.phase = last;
            tracker.fire(PassEvent::PassStarted, &TransitionContext::default());
        }
        tracker
    }

    pub fn phase(&self) -> ReconcilePhase {
        self.phase
    }

    /// Fire `event` and fail unless the phase moved
    pub fn advance(&mut self, event: PassEvent, ctx: &TransitionContext) -> Result<ReconcilePhase> {
        match self.fire(event, ctx) {
            TransitionResult::Success { to, .. } => Ok(to),
            TransitionResult::GuardFailed { from, reason, .. } => Err(Error::PassInterrupted {
                phase: from.to_string(),
                message: reason,
            }),
            TransitionResult::InvalidTransition { current, event } => Err(Error::PassInterrupted {
                phase: current.to_string(),
                message: format!("{event} is not valid here"),
            }),
        }
    }

    /// Mark the pass failed from whatever working phase it reached
    pub fn fail(&mut self) {
        if let TransitionResult::InvalidTransition { current, .. } =
            self.fire(PassEvent::PassFailed, &TransitionContext::default())
        {
            warn!(phase = %current, "failure reported outside a working phase");
        }
    }

    /// Fire `event`; the phase only moves on a successful transition
    pub fn fire(&mut self, event: PassEvent, ctx: &TransitionContext) -> TransitionResult {
        let result = self.machine.transition(self.phase, event, ctx);
        if let TransitionResult::Success { to, description, .. } = &result {
            debug!(from = %self.phase, to = %to, %event, description, "pass phase transition");
            self.phase = *to;
        }
        result
    }
}

impl fmt::Debug for PassStateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PassStateMachine")
            .field("transitions", &self.transitions.len())
            .finish()
    }
}
