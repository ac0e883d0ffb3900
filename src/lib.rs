//! zerg_interchange 核心库入口
//!
//! 三个部分:
//! - `executor`: 客户端侧的任务提交、Future与结果路由
//! - `queen`: 交换机(Interchange), 负责批处理、负载均衡与看门狗
//! - `drone`: 参考工作节点实现, 通过任务/结果通道接入交换机

pub mod balancer;
pub mod config;
pub mod drone;
pub mod executor;
pub mod proto;
pub mod queen;

/// 任务标识, 由客户端单调递增分配
pub type TaskId = u64;

/// 工作节点标识
pub type WorkerId = String;

/// 通过 [`TaskFuture`] 交给调用方的错误
///
/// 除 `Timeout` 外都是终态; `Timeout` 只表示限时等待已到期。
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    #[error("在途任务已达上限, 提交被拒绝")]
    QueueFull,
    #[error("与交换机的连接已断开: {0}")]
    ConnectionLost(String),
    #[error("工作节点丢失, 已分派{attempts}次")]
    WorkerLost { attempts: u32 },
    #[error("任务执行异常: {0}")]
    TaskException(String),
    #[error("任务已取消")]
    Cancelled,
    #[error("等待结果超时")]
    Timeout,
}

/// 工作节点注册错误
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("工作节点容量必须大于0")]
    ZeroCapacity,
    #[error("无效的工作节点ID")]
    InvalidWorkerId,
}

pub type Result<T> = std::result::Result<T, TaskError>;

pub use config::{ConfigError, InterchangeConfig};
pub use drone::{Drone, DroneConfig, DroneError, DroneHandle, TaskHandler};
pub use executor::{Executor, ResultRouter, TaskFuture, TaskQueueClient};
pub use queen::network::{InterchangeEndpoints, NetworkError};
pub use queen::{Interchange, InterchangeHandle, InterchangeState};
