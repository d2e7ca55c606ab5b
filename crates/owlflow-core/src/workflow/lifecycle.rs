//! Execution lifecycle state machine.
//!
//! An explicit transition table over [`LifecycleState`] plus an observer list
//! invoked on every accepted transition. The run loop drives one
//! `ExecutionLifecycle` per execution and derives the persisted
//! [`ExecutionStatus`] from its state, so an illegal status change cannot be
//! written.

use std::fmt;
use std::sync::Arc;

use owlflow_types::execution::ExecutionStatus;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Idle,
    Running,
    Paused,
    Completed,
    Failed,
    Canceled,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Idle => "idle",
            LifecycleState::Running => "running",
            LifecycleState::Paused => "paused",
            LifecycleState::Completed => "completed",
            LifecycleState::Failed => "failed",
            LifecycleState::Canceled => "canceled",
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(
            self,
            LifecycleState::Completed | LifecycleState::Failed | LifecycleState::Canceled
        )
    }

    /// The persisted status for this state. `Idle` is a pending execution.
    pub fn execution_status(&self) -> ExecutionStatus {
        match self {
            LifecycleState::Idle => ExecutionStatus::Pending,
            LifecycleState::Running => ExecutionStatus::Running,
            LifecycleState::Paused => ExecutionStatus::Paused,
            LifecycleState::Completed => ExecutionStatus::Completed,
            LifecycleState::Failed => ExecutionStatus::Failed,
            LifecycleState::Canceled => ExecutionStatus::Canceled,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    Start,
    Pause,
    Resume,
    Cancel,
    Complete,
    Fail,
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleEvent::Start => "start",
            LifecycleEvent::Pause => "pause",
            LifecycleEvent::Resume => "resume",
            LifecycleEvent::Cancel => "cancel",
            LifecycleEvent::Complete => "complete",
            LifecycleEvent::Fail => "fail",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("illegal lifecycle transition from {from} on {event}")]
    IllegalTransition {
        from: LifecycleState,
        event: LifecycleEvent,
    },
}

/// The transition table. `None` means the event is not accepted in `state`.
pub fn next_state(state: LifecycleState, event: LifecycleEvent) -> Option<LifecycleState> {
    use LifecycleEvent as E;
    use LifecycleState as S;

    match (state, event) {
        (S::Idle, E::Start) => Some(S::Running),
        (S::Running, E::Complete) => Some(S::Completed),
        (S::Running, E::Fail) => Some(S::Failed),
        (S::Running, E::Pause) => Some(S::Paused),
        (S::Running, E::Cancel) => Some(S::Canceled),
        (S::Paused, E::Resume) => Some(S::Running),
        (S::Paused, E::Cancel) => Some(S::Canceled),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Observers
// ---------------------------------------------------------------------------

/// Hook invoked after every accepted transition.
pub trait LifecycleObserver: Send + Sync {
    fn on_transition(
        &self,
        execution_id: Uuid,
        from: LifecycleState,
        to: LifecycleState,
        event: LifecycleEvent,
    );
}

/// Logs each state entry at `info`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl LifecycleObserver for TracingObserver {
    fn on_transition(
        &self,
        execution_id: Uuid,
        from: LifecycleState,
        to: LifecycleState,
        event: LifecycleEvent,
    ) {
        tracing::info!(
            execution_id = %execution_id,
            from = %from,
            to = %to,
            event = %event,
            "execution entered state"
        );
    }
}

// ---------------------------------------------------------------------------
// ExecutionLifecycle
// ---------------------------------------------------------------------------

/// The state machine for one execution.
pub struct ExecutionLifecycle {
    execution_id: Uuid,
    state: LifecycleState,
    observers: Vec<Arc<dyn LifecycleObserver>>,
}

impl ExecutionLifecycle {
    pub fn new(execution_id: Uuid, observers: Vec<Arc<dyn LifecycleObserver>>) -> Self {
        Self {
            execution_id,
            state: LifecycleState::Idle,
            observers,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Apply `event`, notifying observers on success. The state is unchanged
    /// on error.
    pub fn fire(&mut self, event: LifecycleEvent) -> Result<LifecycleState, LifecycleError> {
        let from = self.state;
        let to = next_state(from, event).ok_or(LifecycleError::IllegalTransition { from, event })?;
        self.state = to;
        for observer in &self.observers {
            observer.on_transition(self.execution_id, from, to, event);
        }
        Ok(to)
    }
}

impl fmt::Debug for ExecutionLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionLifecycle")
            .field("execution_id", &self.execution_id)
            .field("state", &self.state)
            .field("observers", &self.observers.len())
            .finish()
    }
}
