//! `task_id -> future` 映射表, 提交端与结果路由线程共享

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::future::TaskFuture;
use crate::{TaskError, TaskId};

#[derive(Default)]
struct Inner {
    futures: HashMap<TaskId, TaskFuture>,
    closed: Option<String>,
}

/// 未完成的future, 数量受在途上限约束
pub(crate) struct FutureTable {
    inner: Mutex<Inner>,
    vacancy: Condvar,
    capacity: usize,
}

impl FutureTable {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            vacancy: Condvar::new(),
            capacity: capacity.max(1),
        }
    }

    /// 登记future, 最多等待 `wait` 获得空闲槽位(`None` 表示一直等待)
    pub(crate) fn admit(&self, future: TaskFuture, wait: Option<Duration>) -> Result<(), TaskError> {
        let deadline = wait.map(|wait| Instant::now() + wait);
        let mut inner = self.inner.lock();
        loop {
            if let Some(reason) = &inner.closed {
                return Err(TaskError::ConnectionLost(reason.clone()));
            }
            if inner.futures.len() < self.capacity {
                break;
            }
            match deadline {
                None => self.vacancy.wait(&mut inner),
                Some(deadline) => {
                    if Instant::now() >= deadline {
                        return Err(TaskError::QueueFull);
                    }
                    self.vacancy.wait_until(&mut inner, deadline);
                }
            }
        }
        inner.futures.insert(future.task_id(), future);
        Ok(())
    }

    /// 移除条目并归还槽位
    pub(crate) fn take(&self, task_id: TaskId) -> Option<TaskFuture> {
        let future = self.inner.lock().futures.remove(&task_id);
        if future.is_some() {
            self.vacancy.notify_one();
        }
        future
    }

    /// 关闭映射表, 拒绝新的登记并交出所有未完成的future
    pub(crate) fn close(&self, reason: &str) -> Vec<TaskFuture> {
        let drained: Vec<TaskFuture> = {
            let mut inner = self.inner.lock();
            if inner.closed.is_none() {
                inner.closed = Some(reason.to_string());
            }
            inner.futures.drain().map(|(_, future)| future).collect()
        };
        self.vacancy.notify_all();
        drained
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().futures.len()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.inner.lock().closed.is_some()
    }
}
