//! 工蜂(Drone)节点: 参考工作节点实现
//!
//! 连接交换机后注册容量, 定期发送心跳, 接收任务批次并在rayon线程池上
//! 通过 `TaskHandler` 执行, 结果经结果通道批量回传。

pub mod heartbeat;
pub mod network;
pub mod task_queue;

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use log::{error, info, warn};
use uuid::Uuid;

use crate::{TaskId, WorkerId};
pub use heartbeat::HeartbeatManager;
pub use network::DroneNetwork;
pub use task_queue::TaskQueue;

const POLL_MS: i64 = 10;

/// 任务执行逻辑, 返回输出或应用层错误信息
pub trait TaskHandler: Send + Sync + 'static {
    fn handle(&self, task_id: TaskId, payload: &[u8]) -> Result<Vec<u8>, String>;
}

impl<F> TaskHandler for F
where
    F: Fn(TaskId, &[u8]) -> Result<Vec<u8>, String> + Send + Sync + 'static,
{
    fn handle(&self, task_id: TaskId, payload: &[u8]) -> Result<Vec<u8>, String> {
        self(task_id, payload)
    }
}

/// Drone错误类型
#[derive(thiserror::Error, Debug)]
pub enum DroneError {
    #[error("ZMQ通信错误: {0}")]
    Zmq(#[from] zmq::Error),
    #[error("消息编码错误: {0}")]
    Encode(#[from] prost::EncodeError),
    #[error("消息解码错误: {0}")]
    Decode(#[from] prost::DecodeError),
    #[error("线程池创建失败: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("I/O错误: {0}")]
    Io(#[from] io::Error),
    #[error("任务队列已关闭")]
    QueueClosed,
    #[error("Drone线程异常退出")]
    Panicked,
}

#[derive(Debug, Clone)]
pub struct DroneConfig {
    pub worker_id: WorkerId,
    pub capacity: usize,
    pub heartbeat_interval: Duration,
}

impl Default for DroneConfig {
    fn default() -> Self {
        Self {
            worker_id: Uuid::new_v4().to_string(),
            capacity: num_cpus::get(),
            heartbeat_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    /// 下线并退出
    Stop,
    /// 直接退出, 模拟进程崩溃
    Kill,
}

pub struct Drone {
    network: DroneNetwork,
    queue: TaskQueue,
    heartbeat: HeartbeatManager,
    config: DroneConfig,
}

impl Drone {
    pub fn connect(
        task_url: &str,
        result_url: &str,
        config: DroneConfig,
        handler: impl TaskHandler,
    ) -> Result<Self, DroneError> {
        let network = DroneNetwork::connect(task_url, result_url, &config.worker_id)?;
        let queue = TaskQueue::new(config.capacity, Arc::new(handler))?;
        let heartbeat = HeartbeatManager::new(
            config.worker_id.clone(),
            config.capacity,
            config.heartbeat_interval,
            Instant::now(),
        );
        Ok(Self {
            network,
            queue,
            heartbeat,
            config,
        })
    }

    /// 在后台线程运行
    pub fn spawn(self) -> Result<DroneHandle, DroneError> {
        let (control_sender, control_receiver) = bounded(1);
        let worker_id = self.config.worker_id.clone();
        let received = self.queue.received_counter();
        let thread = thread::Builder::new()
            .name(format!("drone-{}", worker_id))
            .spawn(move || self.run(control_receiver))?;
        Ok(DroneHandle {
            worker_id,
            control: control_sender,
            received,
            thread: Some(thread),
        })
    }

    fn run(mut self, control: Receiver<Control>) -> Result<(), DroneError> {
        self.network.register(self.config.capacity)?;
        info!(
            "Drone {} registered with capacity {}",
            self.network.worker_id(),
            self.config.capacity
        );

        loop {
            match control.try_recv() {
                Ok(Control::Kill) => {
                    self.network.abandon()?;
                    warn!("Drone {} killed", self.network.worker_id());
                    return Ok(());
                }
                Ok(Control::Stop) | Err(TryRecvError::Disconnected) => {
                    self.flush_results()?;
                    self.network.deregister("shutdown")?;
                    info!("Drone {} stopped", self.network.worker_id());
                    return Ok(());
                }
                Err(TryRecvError::Empty) => {}
            }

            if let Some(batch) = self.network.recv_batch(POLL_MS)? {
                for task in batch.tasks {
                    self.queue.submit(task)?;
                }
            }
            self.flush_results()?;
            if let Some(hb) = self.heartbeat.poll(Instant::now(), self.queue.running()) {
                self.network.send_heartbeat(hb)?;
            }
        }
    }

    fn flush_results(&self) -> Result<(), DroneError> {
        let results = self.queue.drain_results();
        if results.is_empty() {
            return Ok(());
        }
        self.network.send_results(results)
    }
}

/// 后台运行的Drone句柄, drop时正常下线
pub struct DroneHandle {
    worker_id: WorkerId,
    control: Sender<Control>,
    received: Arc<AtomicUsize>,
    thread: Option<thread::JoinHandle<Result<(), DroneError>>>,
}

impl DroneHandle {
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// 节点收到的任务总数
    pub fn received(&self) -> usize {
        self.received.load(Ordering::Relaxed)
    }

    /// 发送未回传的结果, 注销后退出
    pub fn stop(mut self) -> Result<(), DroneError> {
        self.finish(Control::Stop)
    }

    /// 立即退出, 不注销也不回传结果
    pub fn kill(mut self) -> Result<(), DroneError> {
        self.finish(Control::Kill)
    }

    fn finish(&mut self, signal: Control) -> Result<(), DroneError> {
        let _ = self.control.try_send(signal);
        match self.thread.take() {
            Some(thread) => join_drone(&self.worker_id, thread),
            None => Ok(()),
        }
    }
}

/// 等待Drone线程退出, 线程panic时记录日志并返回错误
fn join_drone(
    worker_id: &str,
    thread: thread::JoinHandle<Result<(), DroneError>>,
) -> Result<(), DroneError> {
    thread.join().unwrap_or_else(|_| {
        error!("Drone {} thread panicked", worker_id);
        Err(DroneError::Panicked)
    })
}

impl Drop for DroneHandle {
    fn drop(&mut self) {
        if let Err(e) = self.finish(Control::Stop) {
            warn!("Drone {} exited with error: {}", self.worker_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panicked_drone_thread_is_reported() {
        let handle = thread::spawn(|| -> Result<(), DroneError> { panic!("drone loop crashed") });
        assert!(matches!(join_drone("w1", handle), Err(DroneError::Panicked)));

        let handle = thread::spawn(|| Ok(()));
        assert!(join_drone("w1", handle).is_ok());
    }
}
