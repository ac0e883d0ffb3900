use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::Sender;
use log::debug;

use super::future::{Canceller, TaskFuture};
use super::table::FutureTable;
use super::Outbound;
use crate::{TaskError, TaskId};

/// 会话的提交端
///
/// 可在多个调用线程间共享, 共享状态只有future表和出站通道。
pub struct TaskQueueClient {
    table: Arc<FutureTable>,
    outbound: Sender<Outbound>,
    next_id: AtomicU64,
    submit_timeout: Duration,
}

impl TaskQueueClient {
    pub(crate) fn new(table: Arc<FutureTable>, outbound: Sender<Outbound>, submit_timeout: Duration) -> Self {
        Self {
            table,
            outbound,
            next_id: AtomicU64::new(1),
            submit_timeout,
        }
    }

    /// 提交任务, 最多等待配置的提交超时以获得空闲槽位, 否则返回 `QueueFull`
    pub fn submit(&self, payload: impl Into<Bytes>) -> Result<TaskFuture, TaskError> {
        self.submit_inner(payload.into(), Some(self.submit_timeout))
    }

    /// 指定等待时间的 `submit`, `None` 表示一直等到有空闲槽位
    pub fn submit_blocking(
        &self,
        payload: impl Into<Bytes>,
        timeout: Option<Duration>,
    ) -> Result<TaskFuture, TaskError> {
        self.submit_inner(payload.into(), timeout)
    }

    fn submit_inner(&self, payload: Bytes, wait: Option<Duration>) -> Result<TaskFuture, TaskError> {
        let task_id: TaskId = self.next_id.fetch_add(1, Ordering::Relaxed);
        let future = TaskFuture::new(
            task_id,
            Some(Canceller {
                table: Arc::downgrade(&self.table),
                outbound: self.outbound.clone(),
            }),
        );
        self.table.admit(future.clone(), wait)?;

        if self.outbound.send(Outbound::Submit { task_id, payload }).is_err() {
            let lost = TaskError::ConnectionLost("outbound channel closed".into());
            if let Some(future) = self.table.take(task_id) {
                future.resolve(Err(lost.clone()));
            }
            return Err(lost);
        }
        debug!("Task {} submitted", task_id);
        Ok(future)
    }

    /// 尚未完成、占用槽位的future数
    pub fn outstanding(&self) -> usize {
        self.table.len()
    }

    /// 会话是否已关闭
    pub fn is_closed(&self) -> bool {
        self.table.is_closed()
    }
}
