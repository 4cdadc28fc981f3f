// SPDX-License-Identifier: MIT OR Apache-2.0

use std::sync::Arc;

use crate::error::PropagationError;
use crate::tasks::Task;

/// Generic queue accepting background units of work.
///
/// Submission is fire-and-forget: the caller has already committed the structural fact which
/// made the task necessary and does not wait for the result. Implementations must execute every
/// submitted task at least once.
pub trait TaskQueue: Send + Sync {
    fn submit(&self, task: Task);
}

impl<Q> TaskQueue for Arc<Q>
where
    Q: TaskQueue + ?Sized,
{
    fn submit(&self, task: Task) {
        self.as_ref().submit(task)
    }
}

/// Executes a single task.
///
/// Handlers must be idempotent, a task might be delivered again after a failed attempt.
pub trait TaskHandler: Send + Sync + 'static {
    fn handle(&self, task: &Task) -> Result<(), PropagationError>;
}
