//! 执行器与交换机之间的ZeroMQ连接
//!
//! 任务经PUSH发出, 结果经PULL收回。交换机每次看门狗检查时在结果通道上
//! 发送心跳帧, 超过心跳超时没有任何消息即视为断开。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use log::{debug, error, info, warn};
use prost::Message;
use zmq::{Context, Socket};

use super::{Inbound, Outbound};
use crate::proto::{self, Frame, FrameKind};
use crate::queen::network::{InterchangeEndpoints, NetworkError};

const POLL_MS: i64 = 10;

pub(crate) struct ClientTransport {
    stop: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

struct Link {
    tasks: Socket,
    results: Socket,
    outbound: Receiver<Outbound>,
    inbound: Sender<Inbound>,
    heartbeat_timeout: Duration,
    stop: Arc<AtomicBool>,
    backlog: VecDeque<Vec<u8>>,
}

impl ClientTransport {
    pub(crate) fn connect(
        endpoints: &InterchangeEndpoints,
        heartbeat_timeout: Duration,
        outbound: Receiver<Outbound>,
        inbound: Sender<Inbound>,
    ) -> Result<Self, NetworkError> {
        let ctx = Context::new();
        let tasks = ctx.socket(zmq::PUSH)?;
        let results = ctx.socket(zmq::PULL)?;
        tasks.set_linger(0)?;
        results.set_linger(0)?;
        tasks.connect(&endpoints.client_task_url)?;
        results.connect(&endpoints.client_result_url)?;
        info!(
            "Executor connected to interchange: tasks={} results={}",
            endpoints.client_task_url, endpoints.client_result_url
        );

        let stop = Arc::new(AtomicBool::new(false));
        let link = Link {
            tasks,
            results,
            outbound,
            inbound,
            heartbeat_timeout,
            stop: Arc::clone(&stop),
            backlog: VecDeque::new(),
        };
        let thread = thread::Builder::new()
            .name("executor-transport".into())
            .spawn(move || {
                let _ctx = ctx;
                link.run()
            })?;
        Ok(Self {
            stop,
            thread: Some(thread),
        })
    }

    pub(crate) fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Link {
    fn run(mut self) {
        let mut last_seen = Instant::now();
        let reason = loop {
            if self.stop.load(Ordering::Acquire) {
                break "executor shut down".to_string();
            }
            if let Err(reason) = self.pump_outbound() {
                break reason;
            }
            match self.pump_inbound() {
                Ok(true) => last_seen = Instant::now(),
                Ok(false) => {}
                Err(reason) => break reason,
            }
            if last_seen.elapsed() > self.heartbeat_timeout {
                break format!(
                    "no heartbeat from interchange for {:?}",
                    self.heartbeat_timeout
                );
            }
        };
        warn!("Executor transport closing: {}", reason);
        let _ = self.inbound.send(Inbound::Disconnected(reason));
    }

    /// 编码待发的提交与取消, 尽量写入套接字
    fn pump_outbound(&mut self) -> Result<(), String> {
        loop {
            match self.outbound.try_recv() {
                Ok(msg) => {
                    let frame = match msg {
                        Outbound::Submit { task_id, payload } => Frame::task(task_id, payload.to_vec()),
                        Outbound::Cancel(task_id) => Frame::cancel(task_id),
                    };
                    match proto::encode(&frame) {
                        Ok(data) => self.backlog.push_back(data),
                        Err(e) => error!("Failed to encode frame for task {}: {}", frame.task_id, e),
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return Err("executor dropped".to_string()),
            }
        }
        while let Some(data) = self.backlog.front() {
            match self.tasks.send(data.as_slice(), zmq::DONTWAIT) {
                Ok(()) => {
                    self.backlog.pop_front();
                }
                Err(zmq::Error::EAGAIN) => break,
                Err(e) => return Err(format!("task channel failed: {}", e)),
            }
        }
        Ok(())
    }

    /// 把结果帧转交路由线程, 返回是否收到了消息
    fn pump_inbound(&mut self) -> Result<bool, String> {
        let mut items = [self.results.as_poll_item(zmq::POLLIN)];
        match zmq::poll(&mut items, POLL_MS) {
            Ok(_) => {}
            Err(zmq::Error::EINTR) => return Ok(false),
            Err(e) => return Err(format!("poll failed: {}", e)),
        }
        if !items[0].is_readable() {
            return Ok(false);
        }

        let mut seen = false;
        loop {
            let data = match self.results.recv_bytes(zmq::DONTWAIT) {
                Ok(data) => data,
                Err(zmq::Error::EAGAIN) => return Ok(seen),
                Err(e) => return Err(format!("result channel failed: {}", e)),
            };
            seen = true;
            let frame = match Frame::decode(data.as_slice()) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("Dropping undecodable result frame: {}", e);
                    continue;
                }
            };
            if frame.kind() == FrameKind::Heartbeat {
                debug!("Interchange heartbeat");
                continue;
            }
            if self.inbound.send(Inbound::Frame(frame)).is_err() {
                return Err("result router gone".to_string());
            }
        }
    }
}
