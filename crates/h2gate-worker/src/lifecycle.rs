//! Worker lifecycle state machine.
//!
//! Every lifecycle input (IPC commands, the parent closing its pipe,
//! workers reporting idle) funnels through [`LifecycleController`], which
//! owns the state and answers with the actions the event loop must carry
//! out. The machine performs no I/O of its own, so the transition table is
//! directly testable.

use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Accepting connections, steady state.
    Running,
    /// No longer accepting; waiting for in-flight connections to finish.
    Draining,
    /// The event loop must exit.
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    GracefulShutdown,
    ReopenLog,
    IpcClosed,
    WorkersIdle,
}

/// What the event loop must do in response to a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    DisableAcceptors,
    DrainBacklog,
    ShutdownWorkers,
    ReopenLogs,
    BreakLoop,
}

pub struct LifecycleController {
    state: LifecycleState,
}

impl LifecycleController {
    pub fn new() -> Self {
        LifecycleController {
            state: LifecycleState::Running,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == LifecycleState::Running
    }

    pub fn is_terminated(&self) -> bool {
        self.state == LifecycleState::Terminated
    }

    /// Apply one event and return the actions it triggers, in order.
    ///
    /// Once the state leaves `Running` the acceptors are never re-enabled:
    /// no action exists that would turn them back on.
    pub fn on_event(&mut self, event: LifecycleEvent) -> Vec<Action> {
        match (self.state, event) {
            (LifecycleState::Running, LifecycleEvent::GracefulShutdown) => {
                info!("Graceful shutdown signal received");
                self.state = LifecycleState::Draining;
                vec![
                    Action::DisableAcceptors,
                    Action::DrainBacklog,
                    Action::ShutdownWorkers,
                ]
            }
            (LifecycleState::Draining, LifecycleEvent::GracefulShutdown) => Vec::new(),
            (
                LifecycleState::Running | LifecycleState::Draining,
                LifecycleEvent::ReopenLog,
            ) => {
                info!("Reopening log files: worker process");
                vec![Action::ReopenLogs]
            }
            (
                LifecycleState::Running | LifecycleState::Draining,
                LifecycleEvent::IpcClosed,
            ) => {
                error!("IPC channel closed; performing immediate shutdown");
                self.state = LifecycleState::Terminated;
                vec![Action::BreakLoop]
            }
            (LifecycleState::Draining, LifecycleEvent::WorkersIdle) => {
                info!("All workers idle; shutting down");
                self.state = LifecycleState::Terminated;
                vec![Action::BreakLoop]
            }
            (LifecycleState::Running, LifecycleEvent::WorkersIdle) => Vec::new(),
            (LifecycleState::Terminated, _) => Vec::new(),
        }
    }
}

impl Default for LifecycleController {
    fn default() -> Self {
        Self::new()
    }
}
