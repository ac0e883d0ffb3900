//! Drone任务队列模块 - 基于crossbeam-channel + rayon实现

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use log::{debug, warn};

use super::{DroneError, TaskHandler};
use crate::proto::Frame;

/// 任务队列配置
const QUEUE_CAPACITY: usize = 1000;

/// 任务队列结构体
pub struct TaskQueue {
    sender: Sender<Frame>,
    receiver: Receiver<Frame>,
    received: Arc<AtomicUsize>,
    running: Arc<AtomicUsize>,
}

impl TaskQueue {
    /// 创建新任务队列, 执行线程数即节点容量
    pub fn new(capacity: usize, handler: Arc<dyn TaskHandler>) -> Result<Self, DroneError> {
        let (task_sender, task_receiver) = bounded::<Frame>(QUEUE_CAPACITY.max(capacity));
        let (resp_sender, resp_receiver) = unbounded();

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(capacity.max(1))
            .thread_name(|i| format!("drone-exec-{}", i))
            .build()?;

        let running = Arc::new(AtomicUsize::new(0));
        let pool_running = Arc::clone(&running);

        // 任务分发线程, 发送端关闭后退出
        thread::Builder::new()
            .name("drone-dispatch".into())
            .spawn(move || {
                while let Ok(task) = task_receiver.recv() {
                    let resp_sender = resp_sender.clone();
                    let handler = Arc::clone(&handler);
                    let running = Arc::clone(&pool_running);
                    running.fetch_add(1, Ordering::Relaxed);
                    pool.spawn(move || {
                        let response = execute(handler.as_ref(), task);
                        running.fetch_sub(1, Ordering::Relaxed);
                        // 接收端已关闭说明节点已退出, 结果丢弃
                        let _ = resp_sender.send(response);
                    });
                }
            })?;

        Ok(Self {
            sender: task_sender,
            receiver: resp_receiver,
            received: Arc::new(AtomicUsize::new(0)),
            running,
        })
    }

    /// 提交新任务
    pub fn submit(&self, task: Frame) -> Result<(), DroneError> {
        self.received.fetch_add(1, Ordering::Relaxed);
        self.sender.send(task).map_err(|_| DroneError::QueueClosed)
    }

    /// 取出所有已完成的结果
    pub fn drain_results(&self) -> Vec<Frame> {
        self.receiver.try_iter().collect()
    }

    /// 已接收的任务总数
    pub fn received_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.received)
    }

    /// 正在执行或等待执行的任务数
    pub fn running(&self) -> usize {
        self.running.load(Ordering::Relaxed)
    }
}

fn execute(handler: &dyn TaskHandler, task: Frame) -> Frame {
    let task_id = task.task_id;
    match panic::catch_unwind(AssertUnwindSafe(|| handler.handle(task_id, &task.payload))) {
        Ok(Ok(output)) => {
            debug!("Task {} completed", task_id);
            Frame::result(task_id, output)
        }
        Ok(Err(message)) => {
            debug!("Task {} raised: {}", task_id, message);
            Frame::exception(task_id, &message)
        }
        Err(_) => {
            warn!("Task {} panicked", task_id);
            Frame::exception(task_id, "task panicked")
        }
    }
}
