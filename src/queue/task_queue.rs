// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::check::{CheckTask, TaskKey};
use crate::domain::models::descriptor::ServiceDescriptor;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::debug;

/// 队列错误类型
#[derive(Error, Debug, PartialEq, Eq)]
pub enum QueueError {
    /// 队列已关闭
    #[error("Queue closed")]
    Closed,
}

/// 出队结果
#[derive(Debug)]
pub enum NextTask {
    Task(CheckTask),
    /// 队列已关闭且没有剩余任务
    Done,
}

/// 队列进度
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueProgress {
    pub completed: usize,
    pub in_progress: usize,
    pub remaining: usize,
}

/// 任务队列特质
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// 入队任务
    ///
    /// 按号码外层、描述符内层展开，重复的 (号码, 服务) 组合被忽略。
    ///
    /// # 返回值
    ///
    /// * `Ok(usize)` - 新入队的任务数
    /// * `Err(QueueError)` - 队列已关闭
    async fn enqueue(
        &self,
        candidates: &[String],
        descriptors: &[Arc<ServiceDescriptor>],
    ) -> Result<usize, QueueError>;

    /// 出队任务，队列为空但未关闭时等待
    async fn next(&self) -> NextTask;

    /// 关闭队列，之后不再接受新任务
    fn close(&self);

    /// 完成任务
    fn mark_completed(&self, task: &CheckTask);

    /// 获取进度
    fn progress(&self) -> QueueProgress;
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<CheckTask>,
    seen: HashSet<TaskKey>,
    in_progress: HashSet<TaskKey>,
    completed: usize,
    closed: bool,
}

/// 进程内工作分发器
///
/// 保证每个 (号码, 服务) 组合在一次运行中只被分发一次。
#[derive(Debug, Default)]
pub struct WorkDistributor {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl WorkDistributor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 丢弃所有未分发的任务
    ///
    /// # 返回值
    ///
    /// 被丢弃的任务数
    pub fn drain_pending(&self) -> usize {
        let mut state = self.state.lock();
        let drained = state.pending.len();
        state.pending.clear();
        state.closed = true;
        drop(state);
        self.notify.notify_waiters();
        drained
    }

    fn try_next(&self) -> Option<NextTask> {
        let mut state = self.state.lock();
        if let Some(task) = state.pending.pop_front() {
            state.in_progress.insert(task.key());
            return Some(NextTask::Task(task));
        }
        if state.closed {
            return Some(NextTask::Done);
        }
        None
    }
}

#[async_trait]
impl TaskQueue for WorkDistributor {
    async fn enqueue(
        &self,
        candidates: &[String],
        descriptors: &[Arc<ServiceDescriptor>],
    ) -> Result<usize, QueueError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(QueueError::Closed);
        }

        let mut added = 0;
        for candidate in candidates {
            for descriptor in descriptors {
                let task = CheckTask::new(candidate.clone(), descriptor.clone());
                if state.seen.insert(task.key()) {
                    state.pending.push_back(task);
                    added += 1;
                }
            }
        }
        drop(state);

        debug!("Enqueued {} task(s)", added);
        if added > 0 {
            self.notify.notify_waiters();
        }
        Ok(added)
    }

    async fn next(&self) -> NextTask {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(next) = self.try_next() {
                return next;
            }
            notified.await;
        }
    }

    fn close(&self) {
        self.state.lock().closed = true;
        self.notify.notify_waiters();
    }

    fn mark_completed(&self, task: &CheckTask) {
        let mut state = self.state.lock();
        if state.in_progress.remove(&task.key()) {
            state.completed += 1;
        }
    }

    fn progress(&self) -> QueueProgress {
        let state = self.state.lock();
        QueueProgress {
            completed: state.completed,
            in_progress: state.in_progress.len(),
            remaining: state.pending.len(),
        }
    }
}
