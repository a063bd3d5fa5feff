//! Pipeline executor - runs resolved steps against an environment

use crate::core::state::Build;
use crate::core::step::{ExecutionIndex, Step};
use crate::environment::Environment;
use crate::execution::BuildError;
use crate::persistence::Store;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Where the executor is in its run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    Pending,
    Running(ExecutionIndex),
    Succeeded,
    Failed,
    Finished,
}

/// Events that can occur during pipeline execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionEvent {
    StepStarted { key: String, index: ExecutionIndex },
    StepCompleted { key: String, success: bool },
    PipelineCompleted { success: bool },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// Drives an ordered step list through one environment, fail-fast
pub struct PipelineExecutor {
    store: Arc<dyn Store>,
    state: ExecutionState,
    event_handlers: Vec<EventHandler>,
}

impl PipelineExecutor {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            state: ExecutionState::Pending,
            event_handlers: Vec::new(),
        }
    }

    /// Add an event handler
    pub fn add_event_handler(&mut self, handler: EventHandler) {
        self.event_handlers.push(handler);
    }

    pub fn state(&self) -> ExecutionState {
        self.state
    }

    fn emit_event(&self, event: ExecutionEvent) {
        for handler in &self.event_handlers {
            handler(event.clone());
        }
    }

    /// Run `steps` in order, stopping at the first unsuccessful one
    ///
    /// Before each step the build's `status` is set to `"<i>/<n>: <key>"`
    /// and persisted. Returns the verdict, which is also stored in
    /// `build.success`; the status is cleared once the run ends.
    ///
    /// # Errors
    /// Environment and store failures abort the run. A failing step is not
    /// an error.
    pub async fn execute(
        &mut self,
        build: &mut Build,
        steps: &mut [Step],
        env: &dyn Environment,
    ) -> Result<bool, BuildError> {
        let total = steps.len();
        let mut success = true;

        for (i, step) in steps.iter_mut().enumerate() {
            step.set_index(i + 1, total);
            let index = ExecutionIndex {
                current: i + 1,
                total,
            };
            self.state = ExecutionState::Running(index);

            build.status = Some(format!("{}: {}", index, step.key));
            self.store.update_build(build).await?;

            info!(build = %build.short_id(), step = %step.log_key(), "Running: {}", step.command());
            self.emit_event(ExecutionEvent::StepStarted {
                key: step.key.clone(),
                index,
            });

            let result = env.execute(step).await?;
            step.success = Some(result.success);
            self.emit_event(ExecutionEvent::StepCompleted {
                key: step.key.clone(),
                success: result.success,
            });

            if !result.success {
                warn!(build = %build.short_id(), step = %step.log_key(), "Step failed");
                success = false;
                break;
            }
            debug!(step = %step.log_key(), "Step succeeded");
        }

        self.state = if success {
            ExecutionState::Succeeded
        } else {
            ExecutionState::Failed
        };

        build.success = Some(success);
        build.status = Some(String::new());
        self.store.update_build(build).await?;

        self.emit_event(ExecutionEvent::PipelineCompleted { success });
        self.state = ExecutionState::Finished;

        Ok(success)
    }
}
