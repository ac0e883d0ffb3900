//! 客户端任务结果占位

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam_channel::Sender;
use log::debug;
use parking_lot::{Condvar, Mutex};

use super::table::FutureTable;
use super::Outbound;
use crate::{TaskError, TaskId};

pub type Outcome = Result<Bytes, TaskError>;

#[derive(Default)]
struct Slot {
    outcome: Option<Outcome>,
    wakers: Vec<Waker>,
}

#[derive(Default)]
struct Shared {
    slot: Mutex<Slot>,
    ready: Condvar,
}

/// 归还背压槽位并通知交换机丢弃任务
#[derive(Clone)]
pub(crate) struct Canceller {
    pub(crate) table: Weak<FutureTable>,
    pub(crate) outbound: Sender<Outbound>,
}

impl Canceller {
    fn cancel(&self, task_id: TaskId) {
        if let Some(table) = self.table.upgrade() {
            table.take(task_id);
        }
        if self.outbound.send(Outbound::Cancel(task_id)).is_err() {
            debug!("Session closed, cancel of task {} not forwarded", task_id);
        }
    }
}

/// 已提交任务的最终结果句柄
///
/// 克隆共享同一个结果槽。槽只写入一次, 结果送达、失败和
/// [`TaskFuture::cancel`] 中先到者生效。
#[derive(Clone)]
pub struct TaskFuture {
    task_id: TaskId,
    shared: Arc<Shared>,
    canceller: Option<Canceller>,
}

impl TaskFuture {
    pub(crate) fn new(task_id: TaskId, canceller: Option<Canceller>) -> Self {
        Self {
            task_id,
            shared: Arc::new(Shared::default()),
            canceller,
        }
    }

    /// 未登记的future, 只能通过 `resolve` 完成
    pub fn detached(task_id: TaskId) -> Self {
        Self::new(task_id, None)
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// 写入结果, 已有结果时忽略
    pub fn resolve(&self, outcome: Outcome) -> bool {
        let wakers = {
            let mut slot = self.shared.slot.lock();
            if slot.outcome.is_some() {
                return false;
            }
            slot.outcome = Some(outcome);
            std::mem::take(&mut slot.wakers)
        };
        self.shared.ready.notify_all();
        for waker in wakers {
            waker.wake();
        }
        true
    }

    pub fn done(&self) -> bool {
        self.shared.slot.lock().outcome.is_some()
    }

    pub fn cancelled(&self) -> bool {
        matches!(
            self.shared.slot.lock().outcome,
            Some(Err(TaskError::Cancelled))
        )
    }

    /// 已完成时返回结果
    pub fn try_result(&self) -> Option<Outcome> {
        self.shared.slot.lock().outcome.clone()
    }

    /// 阻塞等待结果
    ///
    /// `None` 表示无限等待; 超时返回 `TaskError::Timeout`, future保持未完成。
    pub fn result(&self, timeout: Option<Duration>) -> Outcome {
        let mut slot = self.shared.slot.lock();
        match timeout {
            None => {
                while slot.outcome.is_none() {
                    self.shared.ready.wait(&mut slot);
                }
            }
            Some(timeout) => {
                let deadline = Instant::now() + timeout;
                while slot.outcome.is_none() {
                    if self.shared.ready.wait_until(&mut slot, deadline).timed_out() {
                        break;
                    }
                }
            }
        }
        slot.outcome.clone().unwrap_or(Err(TaskError::Timeout))
    }

    /// 未完成时以 `Cancelled` 结束
    ///
    /// 排队中的任务由交换机直接丢弃; 已分派的任务继续执行, 结果丢弃。
    pub fn cancel(&self) -> bool {
        if !self.resolve(Err(TaskError::Cancelled)) {
            return false;
        }
        debug!("Task {} cancelled by caller", self.task_id);
        if let Some(canceller) = &self.canceller {
            canceller.cancel(self.task_id);
        }
        true
    }
}

impl Future for TaskFuture {
    type Output = Outcome;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Outcome> {
        let mut slot = self.shared.slot.lock();
        match &slot.outcome {
            Some(outcome) => Poll::Ready(outcome.clone()),
            None => {
                if !slot.wakers.iter().any(|w| w.will_wake(cx.waker())) {
                    slot.wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}

impl fmt::Debug for TaskFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskFuture")
            .field("task_id", &self.task_id)
            .field("done", &self.done())
            .finish()
    }
}
