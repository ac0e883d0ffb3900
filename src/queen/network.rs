//! Queen端网络通信模块
//!
//! 四个socket:
//! - 客户端任务入口 PULL, 客户端结果出口 PUSH
//! - 工作节点任务通道 ROUTER (节点以DEALER连接, identity即节点ID)
//! - 工作节点结果通道 PULL

use std::io;

use log::{debug, warn};
use prost::Message;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zmq::{Context, Socket};

use crate::config::InterchangeConfig;
use crate::proto::{self, Frame, ResultBatch, WorkerMessage};

const MAX_BIND_ATTEMPTS: usize = 100;

/// 网络通信错误类型
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("ZMQ error: {0}")]
    Zmq(#[from] zmq::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Protobuf decode error: {0}")]
    Decode(#[from] prost::DecodeError),
    #[error("Protobuf encode error: {0}")]
    Encode(#[from] prost::EncodeError),
    #[error("no free port in range {0}-{1}")]
    PortsExhausted(u16, u16),
    #[error("malformed multipart message ({0} frames)")]
    Malformed(usize),
}

/// 交换机对外公布的四个地址
///
/// 工作节点池只需要 `worker_task_url` 与 `worker_result_url`。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterchangeEndpoints {
    pub client_task_url: String,
    pub client_result_url: String,
    pub worker_task_url: String,
    pub worker_result_url: String,
}

/// 工作节点经任务通道发来的消息
#[derive(Debug)]
pub struct WorkerEnvelope {
    pub identity: String,
    pub message: WorkerMessage,
}

/// 网络通信核心结构体
pub struct HiveNetwork {
    _ctx: Context,
    client_tasks: Socket,
    client_results: Socket,
    worker_tasks: Socket,
    worker_results: Socket,
    endpoints: InterchangeEndpoints,
}

impl HiveNetwork {
    /// 创建并绑定全部socket
    pub fn bind(config: &InterchangeConfig) -> Result<Self, NetworkError> {
        let ctx = Context::new();

        let client_tasks = ctx.socket(zmq::PULL)?;
        let client_results = ctx.socket(zmq::PUSH)?;
        let worker_tasks = ctx.socket(zmq::ROUTER)?;
        let worker_results = ctx.socket(zmq::PULL)?;

        // 路由到已断开的节点时返回错误而不是静默丢弃
        worker_tasks.set_router_mandatory(true)?;
        for socket in [&client_tasks, &client_results, &worker_tasks, &worker_results] {
            socket.set_linger(0)?;
        }

        let addr = &config.bind_address;
        let client_task_port = bind_in_range(&client_tasks, addr, config.internal_port_range)?;
        let client_result_port = bind_in_range(&client_results, addr, config.internal_port_range)?;
        let (worker_task_port, worker_result_port) = match config.worker_ports {
            Some((task_port, result_port)) => {
                worker_tasks.bind(&format!("tcp://{}:{}", addr, task_port))?;
                worker_results.bind(&format!("tcp://{}:{}", addr, result_port))?;
                (task_port, result_port)
            }
            None => (
                bind_in_range(&worker_tasks, addr, config.worker_port_range)?,
                bind_in_range(&worker_results, addr, config.worker_port_range)?,
            ),
        };

        let url = |port: u16| format!("tcp://{}:{}", config.public_ip, port);
        let endpoints = InterchangeEndpoints {
            client_task_url: url(client_task_port),
            client_result_url: url(client_result_port),
            worker_task_url: url(worker_task_port),
            worker_result_url: url(worker_result_port),
        };
        debug!("Interchange sockets bound: {:?}", endpoints);

        Ok(Self {
            _ctx: ctx,
            client_tasks,
            client_results,
            worker_tasks,
            worker_results,
            endpoints,
        })
    }

    pub fn endpoints(&self) -> &InterchangeEndpoints {
        &self.endpoints
    }

    /// 等待任一入站socket可读
    ///
    /// # 返回
    /// (客户端任务, 节点任务通道, 节点结果通道) 的可读标记
    pub fn poll(&self, timeout_ms: i64) -> Result<(bool, bool, bool), NetworkError> {
        let mut items = [
            self.client_tasks.as_poll_item(zmq::POLLIN),
            self.worker_tasks.as_poll_item(zmq::POLLIN),
            self.worker_results.as_poll_item(zmq::POLLIN),
        ];
        zmq::poll(&mut items, timeout_ms)?;
        Ok((
            items[0].is_readable(),
            items[1].is_readable(),
            items[2].is_readable(),
        ))
    }

    /// 非阻塞读取一条客户端帧
    pub fn recv_client_frame(&self) -> Result<Option<Frame>, NetworkError> {
        match self.client_tasks.recv_bytes(zmq::DONTWAIT) {
            Ok(data) => Ok(Some(Frame::decode(data.as_slice())?)),
            Err(zmq::Error::EAGAIN) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// 非阻塞读取一条工作节点上行消息
    pub fn recv_worker_message(&self) -> Result<Option<WorkerEnvelope>, NetworkError> {
        let parts = match self.worker_tasks.recv_multipart(zmq::DONTWAIT) {
            Ok(parts) => parts,
            Err(zmq::Error::EAGAIN) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        // DEALER直连ROUTER: [identity, body]
        let [identity, body] = <[Vec<u8>; 2]>::try_from(parts)
            .map_err(|parts| NetworkError::Malformed(parts.len()))?;
        Ok(Some(WorkerEnvelope {
            identity: String::from_utf8_lossy(&identity).into_owned(),
            message: WorkerMessage::decode(body.as_slice())?,
        }))
    }

    /// 非阻塞读取一批结果
    pub fn recv_results(&self) -> Result<Option<ResultBatch>, NetworkError> {
        match self.worker_results.recv_bytes(zmq::DONTWAIT) {
            Ok(data) => Ok(Some(ResultBatch::decode(data.as_slice())?)),
            Err(zmq::Error::EAGAIN) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// 将批次路由给指定节点
    pub fn send_batch(&self, worker_id: &str, batch: &proto::Batch) -> Result<(), NetworkError> {
        let body = proto::encode(batch)?;
        self.worker_tasks
            .send_multipart([worker_id.as_bytes(), body.as_slice()], zmq::DONTWAIT)?;
        Ok(())
    }

    /// 向客户端发送已编码的帧, 对端未就绪时返回false
    pub fn send_client_raw(&self, data: &[u8]) -> Result<bool, NetworkError> {
        match self.client_results.send(data, zmq::DONTWAIT) {
            Ok(()) => Ok(true),
            Err(zmq::Error::EAGAIN) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// 在端口范围内随机选取端口绑定
fn bind_in_range(socket: &Socket, addr: &str, (lo, hi): (u16, u16)) -> Result<u16, NetworkError> {
    for _ in 0..MAX_BIND_ATTEMPTS {
        let port = rand::random_range(lo..hi);
        match socket.bind(&format!("tcp://{}:{}", addr, port)) {
            Ok(()) => return Ok(port),
            Err(zmq::Error::EADDRINUSE) => continue,
            Err(e) => {
                warn!("Failed to bind tcp://{}:{}: {}", addr, port, e);
                return Err(e.into());
            }
        }
    }
    Err(NetworkError::PortsExhausted(lo, hi))
}
