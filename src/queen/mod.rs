//! Queen模块: 交换机(Interchange)
//!
//! 单线程事件循环独占 `InterchangeState`, 用 `zmq::poll` 同时监听
//! 客户端任务入口、节点任务通道与节点结果通道; 看门狗作为定时器
//! 在每次唤醒时检查。

pub mod ledger;
pub mod network;
pub mod pool;
pub mod state;

use std::collections::VecDeque;
use std::thread;
use std::time::Instant;

use bytes::Bytes;
use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use log::{debug, error, info, warn};

use crate::config::InterchangeConfig;
use crate::proto::{self, worker_message::Body, Frame, FrameKind};
use network::{HiveNetwork, InterchangeEndpoints, NetworkError, WorkerEnvelope};

pub use ledger::{TaskEnvelope, TaskState};
pub use pool::{DronePool, WorkerRegistration};
pub use state::{Batch, Eviction, InterchangeState, Liveness};

/// 事件循环的最长等待时间(毫秒)
const MAX_POLL_MS: u128 = 100;

/// 交换机进程
pub struct Interchange {
    network: HiveNetwork,
    state: InterchangeState,
    config: InterchangeConfig,
    outbox: VecDeque<Vec<u8>>,
}

impl Interchange {
    /// 绑定所有socket, 此后即可公布地址
    ///
    /// `config` 应事先通过 `InterchangeConfig::validate`。
    pub fn bind(config: InterchangeConfig) -> Result<Self, NetworkError> {
        let network = HiveNetwork::bind(&config)?;
        let state = InterchangeState::new(&config);
        info!(
            "Interchange '{}' listening: tasks={} results={} workers={}/{}",
            config.label,
            network.endpoints().client_task_url,
            network.endpoints().client_result_url,
            network.endpoints().worker_task_url,
            network.endpoints().worker_result_url,
        );
        Ok(Self {
            network,
            state,
            config,
            outbox: VecDeque::new(),
        })
    }

    pub fn endpoints(&self) -> &InterchangeEndpoints {
        self.network.endpoints()
    }

    pub fn state(&self) -> &InterchangeState {
        &self.state
    }

    /// 在后台线程运行事件循环
    pub fn spawn(self) -> Result<InterchangeHandle, NetworkError> {
        let endpoints = self.endpoints().clone();
        let (shutdown_sender, shutdown_receiver) = bounded(1);
        let thread = thread::Builder::new()
            .name(format!("interchange-{}", self.config.label))
            .spawn(move || {
                let mut interchange = self;
                interchange.run(Some(shutdown_receiver))
            })?;
        Ok(InterchangeHandle {
            endpoints,
            shutdown: shutdown_sender,
            thread: Some(thread),
        })
    }

    /// 事件循环, 收到关闭信号(或信号通道断开)时返回
    pub fn run(&mut self, shutdown: Option<Receiver<()>>) -> Result<(), NetworkError> {
        let interval = self.config.heartbeat_interval();
        let poll_ms = interval.as_millis().clamp(1, MAX_POLL_MS) as i64;
        let mut next_tick = Instant::now() + interval;

        loop {
            if let Some(rx) = &shutdown {
                match rx.try_recv() {
                    Ok(()) | Err(TryRecvError::Disconnected) => {
                        info!(
                            "Interchange '{}' shutting down with {} outstanding task(s)",
                            self.config.label,
                            self.state.outstanding()
                        );
                        return Ok(());
                    }
                    Err(TryRecvError::Empty) => {}
                }
            }

            let (client_ready, worker_ready, results_ready) = match self.network.poll(poll_ms) {
                Ok(ready) => ready,
                Err(NetworkError::Zmq(zmq::Error::EINTR)) => continue,
                Err(e) => return Err(e),
            };

            let now = Instant::now();
            if client_ready {
                self.drain_client(now)?;
            }
            if worker_ready {
                self.drain_workers(now)?;
            }
            if results_ready {
                self.drain_results(now)?;
            }
            if now >= next_tick {
                self.watchdog(now);
                next_tick = now + interval;
            }
            self.dispatch(now);
            self.flush_outbox();
        }
    }

    fn drain_client(&mut self, now: Instant) -> Result<(), NetworkError> {
        loop {
            match self.network.recv_client_frame() {
                Ok(Some(frame)) => self.handle_client_frame(frame, now),
                Ok(None) => return Ok(()),
                Err(NetworkError::Decode(e)) => warn!("Dropping undecodable client frame: {}", e),
                Err(e) => return Err(e),
            }
        }
    }

    fn handle_client_frame(&mut self, frame: Frame, now: Instant) {
        match frame.kind() {
            FrameKind::Task => {
                self.state.submit(frame.task_id, Bytes::from(frame.payload));
            }
            FrameKind::Cancel => {
                if !self.state.cancel(frame.task_id, now) {
                    debug!("Cancel for task {} ignored, already finished", frame.task_id);
                }
            }
            other => warn!("Unexpected {} frame from client", other.as_str_name()),
        }
    }

    fn drain_workers(&mut self, now: Instant) -> Result<(), NetworkError> {
        loop {
            match self.network.recv_worker_message() {
                Ok(Some(envelope)) => self.handle_worker_message(envelope, now),
                Ok(None) => return Ok(()),
                Err(NetworkError::Decode(e)) => warn!("Dropping undecodable worker message: {}", e),
                Err(NetworkError::Malformed(n)) => warn!("Dropping worker message with {} frames", n),
                Err(e) => return Err(e),
            }
        }
    }

    fn handle_worker_message(&mut self, envelope: WorkerEnvelope, now: Instant) {
        let WorkerEnvelope { identity, message } = envelope;
        match message.body {
            Some(Body::Registration(reg)) => {
                if reg.worker_id != identity {
                    warn!(
                        "Worker registered as '{}' over connection '{}', using the connection identity",
                        reg.worker_id, identity
                    );
                }
                if let Err(e) =
                    self.state
                        .register_worker(&identity, reg.capacity as usize, &reg.version, now)
                {
                    warn!("Rejected registration from {}: {}", identity, e);
                }
            }
            Some(Body::Heartbeat(hb)) => {
                match self.state.worker_heartbeat(&identity, hb.capacity as usize, now) {
                    Liveness::Alive => {
                        debug!("Heartbeat from {} ({} task(s) running)", identity, hb.current_tasks)
                    }
                    Liveness::Rejoined => info!(
                        "Worker {} rejoined from heartbeat with capacity {}",
                        identity, hb.capacity
                    ),
                    Liveness::Unknown => warn!("Heartbeat from unregistered worker {}", identity),
                }
            }
            Some(Body::Deregistration(dereg)) => {
                let reason = format!("deregistered: {}", dereg.reason);
                let eviction = self.state.evict(&identity, &reason, now);
                self.forward_failures(eviction);
            }
            None => warn!("Empty message from worker {}", identity),
        }
    }

    fn drain_results(&mut self, now: Instant) -> Result<(), NetworkError> {
        loop {
            match self.network.recv_results() {
                Ok(Some(batch)) => {
                    self.state.heartbeat(&batch.worker_id, now);
                    for frame in batch.results {
                        if let Some(frame) = self.state.complete(&batch.worker_id, frame, now) {
                            self.push_client(&frame);
                        }
                    }
                }
                Ok(None) => return Ok(()),
                Err(NetworkError::Decode(e)) => warn!("Dropping undecodable result batch: {}", e),
                Err(e) => return Err(e),
            }
        }
    }

    fn watchdog(&mut self, now: Instant) {
        let eviction = self.state.sweep(now);
        if !eviction.requeued.is_empty() {
            info!("Watchdog requeued {} task(s)", eviction.requeued.len());
        }
        self.forward_failures(eviction);

        // 客户端以此判断交换机存活, 未就绪时直接丢弃
        match proto::encode(&Frame::heartbeat()) {
            Ok(data) => {
                if let Err(e) = self.network.send_client_raw(&data) {
                    warn!("Failed to send heartbeat to client: {}", e);
                }
            }
            Err(e) => error!("Failed to encode heartbeat: {}", e),
        }
    }

    /// 分派并发送批次
    ///
    /// 对端不可达的节点被移除, 其任务重新分派; 对端队列已满时批次退回
    /// 队首, 节点保留, 下次唤醒再试。
    fn dispatch(&mut self, now: Instant) {
        loop {
            let batches = self.state.dispatch();
            if batches.is_empty() {
                return;
            }
            let mut rerun = false;
            let mut stalled: Vec<Batch> = Vec::new();
            for batch in batches {
                if !self.state.pool().contains(&batch.worker_id) {
                    continue;
                }
                // 同一节点排在后面的批次一并退回, 保持顺序
                if stalled.iter().any(|b| b.worker_id == batch.worker_id) {
                    stalled.push(batch);
                    continue;
                }
                match self.network.send_batch(&batch.worker_id, &batch.to_proto()) {
                    Ok(()) => {}
                    Err(NetworkError::Zmq(zmq::Error::EAGAIN)) => {
                        debug!(
                            "Worker {} is not keeping up, holding batch {}",
                            batch.worker_id, batch.batch_id
                        );
                        stalled.push(batch);
                    }
                    Err(e) => {
                        error!(
                            "Failed to route batch {} to worker {}: {}",
                            batch.batch_id, batch.worker_id, e
                        );
                        let eviction = self.state.evict(&batch.worker_id, "unroutable", now);
                        self.forward_failures(eviction);
                        rerun = true;
                    }
                }
            }
            for batch in stalled.into_iter().rev() {
                self.state.return_batch(batch);
            }
            if !rerun {
                return;
            }
        }
    }

    fn forward_failures(&mut self, eviction: Eviction) {
        for frame in eviction.failed {
            self.push_client(&frame);
        }
    }

    fn push_client(&mut self, frame: &Frame) {
        match proto::encode(frame) {
            Ok(data) => self.outbox.push_back(data),
            Err(e) => error!("Failed to encode frame for task {}: {}", frame.task_id, e),
        }
    }

    fn flush_outbox(&mut self) {
        while let Some(data) = self.outbox.front() {
            match self.network.send_client_raw(data) {
                Ok(true) => {
                    self.outbox.pop_front();
                }
                Ok(false) => break,
                Err(e) => {
                    error!("Failed to deliver result to client: {}", e);
                    break;
                }
            }
        }
    }
}

/// 后台运行的交换机句柄, drop时关闭
pub struct InterchangeHandle {
    endpoints: InterchangeEndpoints,
    shutdown: Sender<()>,
    thread: Option<thread::JoinHandle<Result<(), NetworkError>>>,
}

impl InterchangeHandle {
    pub fn endpoints(&self) -> &InterchangeEndpoints {
        &self.endpoints
    }

    /// 停止事件循环并等待线程退出
    pub fn shutdown(mut self) -> Result<(), NetworkError> {
        self.stop()
    }

    fn stop(&mut self) -> Result<(), NetworkError> {
        let _ = self.shutdown.try_send(());
        match self.thread.take() {
            Some(thread) => thread.join().unwrap_or_else(|_| {
                error!("Interchange thread panicked");
                Ok(())
            }),
            None => Ok(()),
        }
    }
}

impl Drop for InterchangeHandle {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            error!("Interchange exited with error: {}", e);
        }
    }
}
