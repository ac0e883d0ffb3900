//! 执行器: 客户端的任务提交、future与结果路由
//!
//! ```text
//! submit() -> FutureTable + outbound ──> transport ──> interchange
//!                  ^                                       |
//!                  └── ResultRouter <── inbound <── transport
//! ```

mod client;
mod future;
mod router;
mod table;
mod transport;

use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use log::info;

use crate::config::InterchangeConfig;
use crate::proto::Frame;
use crate::queen::network::{InterchangeEndpoints, NetworkError};
use crate::{TaskError, TaskId};

pub use client::TaskQueueClient;
pub use future::{Outcome, TaskFuture};
pub use router::ResultRouter;

use table::FutureTable;
use transport::ClientTransport;

/// 发往交换机的消息
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Submit { task_id: TaskId, payload: Bytes },
    Cancel(TaskId),
}

/// 交换机发往结果路由线程的消息
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Frame(Frame),
    /// 连接断开, 所有未完成的future以 `ConnectionLost` 失败
    Disconnected(String),
}

/// 提交会话: 任务队列客户端、结果路由线程以及可选的ZeroMQ连接
pub struct Executor {
    client: TaskQueueClient,
    router: Option<ResultRouter>,
    transport: Option<ClientTransport>,
    inbound: Sender<Inbound>,
}

impl Executor {
    /// 连接运行中的交换机
    pub fn connect(
        config: &InterchangeConfig,
        endpoints: &InterchangeEndpoints,
    ) -> Result<Self, NetworkError> {
        let (outbound_tx, outbound_rx) = unbounded();
        let (inbound_tx, inbound_rx) = bounded(config.queue_depth.max(1));
        let transport = ClientTransport::connect(
            endpoints,
            config.heartbeat_timeout(),
            outbound_rx,
            inbound_tx.clone(),
        )?;
        let mut executor = Self::assemble(config, outbound_tx, inbound_tx, inbound_rx)?;
        executor.transport = Some(transport);
        info!("Executor '{}' ready (queue depth {})", config.label, config.queue_depth);
        Ok(executor)
    }

    /// 不带网络连接的会话
    ///
    /// 调用方代替传输线程: 从返回的接收端取出站消息, 向返回的发送端写入结果帧。
    pub fn with_channels(
        config: &InterchangeConfig,
    ) -> io::Result<(Self, Receiver<Outbound>, Sender<Inbound>)> {
        let (outbound_tx, outbound_rx) = unbounded();
        let (inbound_tx, inbound_rx) = bounded(config.queue_depth.max(1));
        let executor = Self::assemble(config, outbound_tx, inbound_tx.clone(), inbound_rx)?;
        Ok((executor, outbound_rx, inbound_tx))
    }

    fn assemble(
        config: &InterchangeConfig,
        outbound: Sender<Outbound>,
        inbound_tx: Sender<Inbound>,
        inbound_rx: Receiver<Inbound>,
    ) -> io::Result<Self> {
        let table = Arc::new(FutureTable::new(config.queue_depth));
        let router = ResultRouter::spawn(Arc::clone(&table), inbound_rx)?;
        Ok(Self {
            client: TaskQueueClient::new(table, outbound, config.submit_timeout()),
            router: Some(router),
            transport: None,
            inbound: inbound_tx,
        })
    }

    pub fn submit(&self, payload: impl Into<Bytes>) -> Result<TaskFuture, TaskError> {
        self.client.submit(payload)
    }

    pub fn submit_blocking(
        &self,
        payload: impl Into<Bytes>,
        timeout: Option<Duration>,
    ) -> Result<TaskFuture, TaskError> {
        self.client.submit_blocking(payload, timeout)
    }

    pub fn client(&self) -> &TaskQueueClient {
        &self.client
    }

    pub fn outstanding(&self) -> usize {
        self.client.outstanding()
    }

    /// 结束会话, 未完成的future以 `ConnectionLost` 失败
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        match self.transport.take() {
            // 传输线程退出时会向路由线程报告断开
            Some(mut transport) => transport.shutdown(),
            None => {
                let _ = self
                    .inbound
                    .send(Inbound::Disconnected("executor shut down".into()));
            }
        }
        if let Some(router) = self.router.take() {
            router.join();
        }
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        self.stop();
    }
}
