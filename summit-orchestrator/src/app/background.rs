// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Manages execution of one-shot background tasks
//!
//! Operations hand the executor the part of their work that outlives the
//! caller (stack status polling, teardown, mount and unmount).  Each task
//! runs at most once, on the tokio runtime, detached from the operation that
//! spawned it.  There is no retry and no cancellation surface; a task's only
//! obligations are to persist its outcome through the datastore and to report
//! a terminal [`CompletionStatus`] on its watch channel.

use slog::info;
use slog::o;
use slog::warn;
use slog::Logger;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Mutex;
use summit_common::Error;
use tokio::sync::watch;

/// Identifies a task spawned on an [`Executor`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct TaskId(u64);

/// How many completed task records are retained for status queries.  Once
/// exceeded, the oldest completed records are reclaimed; running tasks are
/// never reclaimed.
const MAX_COMPLETED_TASKS: usize = 64;

#[derive(Clone, Debug, PartialEq)]
pub enum CompletionStatus {
    Running,
    Succeeded,
    Failed { message: String },
}

struct TaskRecord {
    name: String,
    status: watch::Receiver<CompletionStatus>,
    tokio_task: tokio::task::JoinHandle<()>,
}

struct Inner {
    next_id: u64,
    tasks: BTreeMap<TaskId, TaskRecord>,
}

pub struct Executor {
    log: Logger,
    inner: Mutex<Inner>,
}

impl Executor {
    pub fn new(log: Logger) -> Executor {
        Executor {
            log,
            inner: Mutex::new(Inner { next_id: 0, tasks: BTreeMap::new() }),
        }
    }

    /// Spawns `task` and returns its id
    ///
    /// The returned id can be polled with [`Executor::task_status`].  The
    /// task's result is recorded on its watch channel; a failure is terminal
    /// and is never returned to any caller.  Completed records are kept for
    /// status queries up to [`MAX_COMPLETED_TASKS`], after which the oldest
    /// are reclaimed.
    pub fn spawn<Fut>(&self, name: &str, task: Fut) -> TaskId
    where
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        let (status_tx, status_rx) = watch::channel(CompletionStatus::Running);
        let log = self.log.new(o!("task" => name.to_string()));
        let tokio_task = tokio::spawn(async move {
            match task.await {
                Ok(()) => {
                    info!(log, "background task succeeded");
                    status_tx.send_replace(CompletionStatus::Succeeded);
                }
                Err(error) => {
                    warn!(log, "background task failed"; "error" => %error);
                    status_tx.send_replace(CompletionStatus::Failed {
                        message: error.to_string(),
                    });
                }
            }
        });

        let mut inner = self.inner.lock().unwrap();
        let id = TaskId(inner.next_id);
        inner.next_id += 1;
        inner.tasks.insert(
            id,
            TaskRecord { name: name.to_string(), status: status_rx, tokio_task },
        );
        Self::prune_completed(&mut inner);
        id
    }

    /// Reclaims the oldest completed task records beyond the retention cap.
    /// Map order is spawn order, so the excess drops oldest-first.
    fn prune_completed(inner: &mut Inner) {
        let completed: Vec<TaskId> = inner
            .tasks
            .iter()
            .filter(|(_, task)| {
                *task.status.borrow() != CompletionStatus::Running
            })
            .map(|(id, _)| *id)
            .collect();
        if completed.len() > MAX_COMPLETED_TASKS {
            let excess = completed.len() - MAX_COMPLETED_TASKS;
            for id in completed.into_iter().take(excess) {
                inner.tasks.remove(&id);
            }
        }
    }

    /// Returns the last reported status of the given task, if it exists
    pub fn task_status(&self, id: TaskId) -> Option<CompletionStatus> {
        let inner = self.inner.lock().unwrap();
        inner.tasks.get(&id).map(|task| task.status.borrow().clone())
    }

    /// Lists all tasks ever spawned, with their names and current statuses
    pub fn tasks(&self) -> Vec<(TaskId, String, CompletionStatus)> {
        let inner = self.inner.lock().unwrap();
        inner
            .tasks
            .iter()
            .map(|(id, task)| {
                (*id, task.name.clone(), task.status.borrow().clone())
            })
            .collect()
    }

    /// Waits until the given task reports a terminal status
    ///
    /// Returns `None` if no such task exists.  A task that panicked before
    /// reporting leaves its last reported status behind.
    pub async fn wait_for_completion(
        &self,
        id: TaskId,
    ) -> Option<CompletionStatus> {
        let mut status = {
            let inner = self.inner.lock().unwrap();
            inner.tasks.get(&id)?.status.clone()
        };
        loop {
            let current = status.borrow_and_update().clone();
            if current != CompletionStatus::Running {
                return Some(current);
            }
            if status.changed().await.is_err() {
                return Some(status.borrow().clone());
            }
        }
    }

    /// Waits for every task spawned so far to reach a terminal status
    pub async fn wait_for_all(&self) {
        let ids: Vec<TaskId> = {
            let inner = self.inner.lock().unwrap();
            inner.tasks.keys().copied().collect()
        };
        for id in ids {
            let _ = self.wait_for_completion(id).await;
        }
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        // In-flight work is not awaited on teardown.  Anything durable was
        // already persisted by the tasks themselves.
        if let Ok(inner) = self.inner.lock() {
            for task in inner.tasks.values() {
                task.tokio_task.abort();
            }
        }
    }
}
