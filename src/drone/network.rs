//! Drone端网络通信模块
//!
//! 任务通道为DEALER(identity即节点ID), 结果通道为PUSH。

use log::debug;
use prost::Message;
use zmq::{Context, Socket};

use super::DroneError;
use crate::proto::{self, worker_message::Body, Batch, Deregistration, Frame, Heartbeat, Registration, ResultBatch, WorkerMessage};
use crate::WorkerId;

/// 正常关闭时等待未发送消息的时间(毫秒)
const LINGER_MS: i32 = 500;

/// Drone网络连接
pub struct DroneNetwork {
    _ctx: Context,
    tasks: Socket,
    results: Socket,
    worker_id: WorkerId,
}

impl DroneNetwork {
    /// 连接交换机的任务与结果地址
    pub fn connect(task_url: &str, result_url: &str, worker_id: &str) -> Result<Self, DroneError> {
        let ctx = Context::new();
        let tasks = ctx.socket(zmq::DEALER)?;
        let results = ctx.socket(zmq::PUSH)?;
        tasks.set_identity(worker_id.as_bytes())?;
        tasks.set_linger(LINGER_MS)?;
        results.set_linger(LINGER_MS)?;
        tasks.connect(task_url)?;
        results.connect(result_url)?;
        debug!("Drone {} connected to {} / {}", worker_id, task_url, result_url);

        Ok(Self {
            _ctx: ctx,
            tasks,
            results,
            worker_id: worker_id.to_string(),
        })
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// 丢弃缓冲中尚未发出的消息, 模拟进程崩溃
    pub fn abandon(&self) -> Result<(), DroneError> {
        self.tasks.set_linger(0)?;
        self.results.set_linger(0)?;
        Ok(())
    }

    /// 发送注册消息
    pub fn register(&self, capacity: usize) -> Result<(), DroneError> {
        self.send_upstream(Body::Registration(Registration {
            worker_id: self.worker_id.clone(),
            capacity: capacity as u32,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }))
    }

    pub fn send_heartbeat(&self, heartbeat: Heartbeat) -> Result<(), DroneError> {
        self.send_upstream(Body::Heartbeat(heartbeat))
    }

    /// 主动下线
    pub fn deregister(&self, reason: &str) -> Result<(), DroneError> {
        self.send_upstream(Body::Deregistration(Deregistration {
            worker_id: self.worker_id.clone(),
            reason: reason.to_string(),
        }))
    }

    fn send_upstream(&self, body: Body) -> Result<(), DroneError> {
        let buf = proto::encode(&WorkerMessage { body: Some(body) })?;
        self.tasks.send(buf, 0)?;
        Ok(())
    }

    /// 等待任务批次, 超时返回None
    pub fn recv_batch(&self, timeout_ms: i64) -> Result<Option<Batch>, DroneError> {
        let mut items = [self.tasks.as_poll_item(zmq::POLLIN)];
        match zmq::poll(&mut items, timeout_ms) {
            Ok(_) => {}
            Err(zmq::Error::EINTR) => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        if !items[0].is_readable() {
            return Ok(None);
        }
        match self.tasks.recv_bytes(zmq::DONTWAIT) {
            Ok(data) => Ok(Some(Batch::decode(data.as_slice())?)),
            Err(zmq::Error::EAGAIN) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// 发送任务结果
    pub fn send_results(&self, results: Vec<Frame>) -> Result<(), DroneError> {
        let buf = proto::encode(&ResultBatch {
            worker_id: self.worker_id.clone(),
            results,
        })?;
        self.results.send(buf, 0)?;
        Ok(())
    }
}
