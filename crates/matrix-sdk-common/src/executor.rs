// Copyright 2021 The Matrix.org Foundation C.I.C.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A uniform abstraction over long-running, cancellable operations (sync
//! long-polls, uploads, downloads; spec §5, "Cancellation").
//!
//! Every suspension point in the runtime ends up as a [`Task`]. Awaiting one
//! yields exactly one of `Ok(value)`, `Err(TaskError::Failed)`, or
//! `Err(TaskError::Cancelled)`, matching the Design Notes' "completion
//! dispatches exactly one of {success(value), failure(error), cancelled}".

use std::future::Future;

use thiserror::Error;
use tokio::task::JoinHandle;

/// Error surfaced when awaiting a [`Task`] that didn't run to completion.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The task was cancelled via [`Task::cancel`] before it completed.
    #[error("the operation was cancelled")]
    Cancelled,
    /// The task's future panicked.
    #[error("the operation panicked: {0}")]
    Panicked(String),
}

/// A cancellable handle to a spawned asynchronous operation.
///
/// Wraps a [`tokio::task::JoinHandle`]; cancelling aborts the underlying
/// task, which in turn must propagate to the HTTP/file operation it drives
/// (spec §5).
#[derive(Debug)]
pub struct Task<T> {
    handle: JoinHandle<T>,
}

impl<T: Send + 'static> Task<T> {
    /// Spawn a future as a cancellable task on the current Tokio runtime.
    pub fn spawn(future: impl Future<Output = T> + Send + 'static) -> Self {
        Self { handle: tokio::spawn(future) }
    }

    /// Request cancellation. The task will resolve with
    /// [`TaskError::Cancelled`] the next time it's awaited, once the
    /// executor has observed the abort.
    pub fn cancel(&self) {
        self.handle.abort();
    }

    /// Wait for the task to complete, cancel, or panic.
    pub async fn join(self) -> Result<T, TaskError> {
        match self.handle.await {
            Ok(value) => Ok(value),
            Err(join_error) if join_error.is_cancelled() => Err(TaskError::Cancelled),
            Err(join_error) => Err(TaskError::Panicked(join_error.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Task, TaskError};

    #[tokio::test]
    async fn completed_task_returns_value() {
        let task = Task::spawn(async { 42 });
        assert_eq!(task.join().await.unwrap(), 42);
    }

    #[tokio::test]
    async fn cancelled_task_reports_cancellation() {
        let task = Task::spawn(async {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            0
        });
        task.cancel();
        assert!(matches!(task.join().await, Err(TaskError::Cancelled)));
    }
}
