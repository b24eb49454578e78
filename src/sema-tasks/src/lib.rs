//! Single-consumer FIFO task executor.
//!
//! Serialises all symbol-service and language-server work for one project:
//! tasks run strictly one at a time, in submission order. Cancelling a
//! pending task removes it from the queue; cancelling a running task
//! resolves its waiters immediately while the work itself runs to
//! completion (there is no forcible interruption). A task that exceeds its
//! timeout is abandoned the same way, and the queue moves on to the next
//! task.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{oneshot, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    #[error("task was cancelled")]
    Cancelled,
    #[error("task did not complete within {0:?}")]
    Timeout(Duration),
    #[error("task failed: {0}")]
    Failed(String),
}

pub type Result<T> = std::result::Result<T, TaskError>;

struct QueuedTask {
    id: u64,
    name: String,
    cancel: CancellationToken,
    timeout: Option<Duration>,
    done: Arc<AtomicBool>,
    future: BoxFuture<'static, ()>,
}

#[derive(Clone)]
struct RunningTask {
    id: u64,
    name: String,
    cancel: CancellationToken,
    done: Arc<AtomicBool>,
}

/// Snapshot of one running or queued task, usable for cancellation.
#[derive(Clone)]
pub struct TaskInfo {
    pub task_id: u64,
    pub name: String,
    pub is_running: bool,
    cancel: CancellationToken,
    done: Arc<AtomicBool>,
}

impl TaskInfo {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for TaskInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskInfo")
            .field("task_id", &self.task_id)
            .field("name", &self.name)
            .field("is_running", &self.is_running)
            .finish()
    }
}

/// Handle to an issued task; resolves to the task's result.
pub struct Task<T> {
    id: u64,
    name: String,
    cancel: CancellationToken,
    done: Arc<AtomicBool>,
    rx: oneshot::Receiver<T>,
}

impl<T> Task<T> {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cancels the task. A pending task will not be executed; a running
    /// task continues, but waiters receive `Cancelled` immediately.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    /// Awaits the task's result.
    pub async fn result(mut self) -> Result<T> {
        tokio::select! {
            res = &mut self.rx => match res {
                Ok(value) => Ok(value),
                Err(_) => {
                    if self.cancel.is_cancelled() {
                        Err(TaskError::Cancelled)
                    } else {
                        Err(TaskError::Failed("task aborted before completion".into()))
                    }
                }
            },
            _ = self.cancel.cancelled() => Err(TaskError::Cancelled),
        }
    }

    /// Awaits the task's result, giving up after `timeout`. The task keeps
    /// running; only this waiter stops waiting.
    pub async fn result_timeout(self, timeout: Duration) -> Result<T> {
        match tokio::time::timeout(timeout, self.result()).await {
            Ok(res) => res,
            Err(_) => Err(TaskError::Timeout(timeout)),
        }
    }
}

struct ExecutorState {
    name: String,
    queue: Mutex<VecDeque<QueuedTask>>,
    current: Mutex<Option<RunningTask>>,
    last_executed: Mutex<Option<TaskInfo>>,
    notify: Notify,
    next_id: AtomicU64,
}

/// Per-project FIFO task executor.
///
/// Dropping the executor aborts the consumer loop; queued tasks are
/// abandoned and their waiters resolve with an error.
pub struct TaskExecutor {
    state: Arc<ExecutorState>,
    consumer: tokio::task::JoinHandle<()>,
}

impl TaskExecutor {
    pub fn new(name: impl Into<String>) -> Self {
        let state = Arc::new(ExecutorState {
            name: name.into(),
            queue: Mutex::new(VecDeque::new()),
            current: Mutex::new(None),
            last_executed: Mutex::new(None),
            notify: Notify::new(),
            next_id: AtomicU64::new(1),
        });
        let consumer = tokio::spawn(Self::process_queue(state.clone()));
        Self { state, consumer }
    }

    async fn process_queue(state: Arc<ExecutorState>) {
        loop {
            let task = {
                let mut queue = state.queue.lock().unwrap();
                queue.pop_front()
            };
            let Some(task) = task else {
                state.notify.notified().await;
                continue;
            };

            if task.cancel.is_cancelled() {
                info!(
                    "{}: task {} ({}) was cancelled before starting; skipping",
                    state.name, task.id, task.name
                );
                task.done.store(true, Ordering::SeqCst);
                continue;
            }

            let running = RunningTask {
                id: task.id,
                name: task.name.clone(),
                cancel: task.cancel.clone(),
                done: task.done.clone(),
            };
            *state.current.lock().unwrap() = Some(running.clone());
            info!("{}: starting task {} ({})", state.name, task.id, task.name);

            let started = std::time::Instant::now();
            // Run the task on its own spawn so a timeout abandons it
            // without interrupting the work.
            let join = tokio::spawn(task.future);
            match task.timeout {
                Some(timeout) => {
                    if tokio::time::timeout(timeout, join).await.is_err() {
                        warn!(
                            "{}: task {} ({}) exceeded {:?}; moving on",
                            state.name, task.id, task.name, timeout
                        );
                    }
                }
                None => {
                    let _ = join.await;
                }
            }
            debug!(
                "{}: task {} ({}) finished after {:?}",
                state.name,
                task.id,
                task.name,
                started.elapsed()
            );

            *state.current.lock().unwrap() = None;
            *state.last_executed.lock().unwrap() = Some(TaskInfo {
                task_id: running.id,
                name: running.name,
                is_running: false,
                cancel: running.cancel,
                done: running.done,
            });
        }
    }

    /// Enqueues a task and returns immediately.
    pub fn issue_task<T, F, Fut>(
        &self,
        function: F,
        name: impl Into<String>,
        timeout: Option<Duration>,
    ) -> Task<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let id = self.state.next_id.fetch_add(1, Ordering::SeqCst);
        let name = format!("Task-{}:{}", id, name.into());
        let cancel = CancellationToken::new();
        let done = Arc::new(AtomicBool::new(false));
        let (tx, rx) = oneshot::channel();

        let done_inner = done.clone();
        let future = async move {
            let result = function().await;
            done_inner.store(true, Ordering::SeqCst);
            // waiter may have been cancelled or dropped; nothing to do then
            let _ = tx.send(result);
        }
        .boxed();

        info!("{}: scheduling {}", self.state.name, name);
        let task = QueuedTask {
            id,
            name: name.clone(),
            cancel: cancel.clone(),
            timeout,
            done: done.clone(),
            future,
        };
        self.state.queue.lock().unwrap().push_back(task);
        self.state.notify.notify_one();

        Task {
            id,
            name,
            cancel,
            done,
            rx,
        }
    }

    /// Issues a task and awaits its result.
    pub async fn execute_task<T, F, Fut>(
        &self,
        function: F,
        name: impl Into<String>,
        timeout: Option<Duration>,
    ) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let task = self.issue_task(function, name, timeout);
        match timeout {
            Some(t) => task.result_timeout(t).await,
            None => task.result().await,
        }
    }

    /// Snapshot of the running task followed by all pending tasks.
    pub fn get_current_tasks(&self) -> Vec<TaskInfo> {
        let mut tasks = Vec::new();
        if let Some(current) = self.state.current.lock().unwrap().as_ref() {
            tasks.push(TaskInfo {
                task_id: current.id,
                name: current.name.clone(),
                is_running: true,
                cancel: current.cancel.clone(),
                done: current.done.clone(),
            });
        }
        for task in self.state.queue.lock().unwrap().iter() {
            if !task.cancel.is_cancelled() {
                tasks.push(TaskInfo {
                    task_id: task.id,
                    name: task.name.clone(),
                    is_running: false,
                    cancel: task.cancel.clone(),
                    done: task.done.clone(),
                });
            }
        }
        tasks
    }

    /// Info about the most recently finished task, if any.
    pub fn last_executed_task(&self) -> Option<TaskInfo> {
        self.state.last_executed.lock().unwrap().clone()
    }
}

impl Drop for TaskExecutor {
    fn drop(&mut self) {
        self.consumer.abort();
    }
}
