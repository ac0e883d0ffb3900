//! 任务账本
//!
//! 保存在途任务信封、FIFO待分派队列, 以及已结束任务的去重窗口。

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::{TaskId, WorkerId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Queued,
    Dispatched,
    Completed,
    Failed,
}

/// 单个任务的交换机侧记录
#[derive(Debug, Clone)]
pub struct TaskEnvelope {
    pub task_id: TaskId,
    pub payload: Bytes,
    pub state: TaskState,
    pub assigned_worker: Option<WorkerId>,
    /// 已分派次数
    pub attempts: u32,
    /// 客户端已取消, 结果丢弃且不再重排队
    pub cancelled: bool,
}

#[derive(Debug, Default)]
pub struct TaskLedger {
    tasks: HashMap<TaskId, TaskEnvelope>,
    // 可能含有已结束任务的陈旧ID, 出队时跳过
    pending: VecDeque<TaskId>,
    queued: usize,
    finished: HashMap<TaskId, (TaskState, Instant)>,
}

impl TaskLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// 新任务入队尾, 已知或刚结束的ID返回false
    pub fn enqueue(&mut self, task_id: TaskId, payload: Bytes) -> bool {
        if self.tasks.contains_key(&task_id) || self.finished.contains_key(&task_id) {
            return false;
        }
        self.tasks.insert(
            task_id,
            TaskEnvelope {
                task_id,
                payload,
                state: TaskState::Queued,
                assigned_worker: None,
                attempts: 0,
                cancelled: false,
            },
        );
        self.pending.push_back(task_id);
        self.queued += 1;
        true
    }

    /// 弹出下一个待分派任务并标记为已分派
    pub fn dispatch_next(&mut self, worker_id: &str) -> Option<&TaskEnvelope> {
        while let Some(task_id) = self.pending.pop_front() {
            let Some(env) = self.tasks.get_mut(&task_id) else {
                continue;
            };
            if env.state != TaskState::Queued {
                continue;
            }
            env.state = TaskState::Dispatched;
            env.assigned_worker = Some(worker_id.to_string());
            env.attempts += 1;
            self.queued -= 1;
            return self.tasks.get(&task_id);
        }
        None
    }

    /// 已分派任务回到队首
    ///
    /// 调用方按逆序传入即可保持原有顺序。
    pub fn requeue_front(&mut self, task_id: TaskId) -> bool {
        let Some(env) = self.tasks.get_mut(&task_id) else {
            return false;
        };
        if env.state != TaskState::Dispatched {
            return false;
        }
        env.state = TaskState::Queued;
        env.assigned_worker = None;
        self.pending.push_front(task_id);
        self.queued += 1;
        true
    }

    /// 未能发出的任务退回队首, 不计入分派次数
    pub fn undispatch(&mut self, task_id: TaskId) -> bool {
        if !self.requeue_front(task_id) {
            return false;
        }
        if let Some(env) = self.tasks.get_mut(&task_id) {
            env.attempts = env.attempts.saturating_sub(1);
        }
        true
    }

    /// 任务进入终态, 移出账本并记入去重窗口
    pub fn finish(&mut self, task_id: TaskId, state: TaskState, now: Instant) -> Option<TaskEnvelope> {
        debug_assert!(matches!(state, TaskState::Completed | TaskState::Failed));
        let mut env = self.tasks.remove(&task_id)?;
        if env.state == TaskState::Queued {
            self.queued -= 1;
        }
        env.state = state;
        self.finished.insert(task_id, (state, now));
        Some(env)
    }

    pub fn mark_cancelled(&mut self, task_id: TaskId) -> bool {
        match self.tasks.get_mut(&task_id) {
            Some(env) => {
                env.cancelled = true;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, task_id: TaskId) -> Option<&TaskEnvelope> {
        self.tasks.get(&task_id)
    }

    /// 当前状态, 包括去重窗口内的终态
    pub fn state(&self, task_id: TaskId) -> Option<TaskState> {
        self.tasks
            .get(&task_id)
            .map(|env| env.state)
            .or_else(|| self.finished.get(&task_id).map(|(state, _)| *state))
    }

    pub fn recently_finished(&self, task_id: TaskId) -> bool {
        self.finished.contains_key(&task_id)
    }

    /// 清理超出去重窗口的终态记录
    pub fn prune_finished(&mut self, now: Instant, grace: Duration) -> usize {
        let before = self.finished.len();
        self.finished
            .retain(|_, (_, at)| now.saturating_duration_since(*at) <= grace);
        // 顺带压缩队列中的陈旧ID
        if self.pending.len() > self.queued * 2 + 64 {
            let tasks = &self.tasks;
            self.pending.retain(|id| {
                tasks
                    .get(id)
                    .is_some_and(|env| env.state == TaskState::Queued)
            });
        }
        before - self.finished.len()
    }

    /// 待分派任务数
    pub fn pending_len(&self) -> usize {
        self.queued
    }

    /// 账本中尚未结束的任务数
    pub fn open_len(&self) -> usize {
        self.tasks.len()
    }

    /// 待分派任务ID, 按分派顺序
    pub fn pending_ids(&self) -> Vec<TaskId> {
        self.pending
            .iter()
            .copied()
            .filter(|id| {
                self.tasks
                    .get(id)
                    .is_some_and(|env| env.state == TaskState::Queued)
            })
            .collect()
    }
}
