//! 交换机与执行器配置
//!
//! 会话双方共用同一个 `InterchangeConfig`: 交换机读取端口、批次与看门狗设置,
//! 执行器读取背压与存活检测设置。

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::queen::network::InterchangeEndpoints;

const DEFAULT_LAUNCH_CMD: &str = "mpiexec -np {tasks_per_node} mpi_worker_pool.py {debug} --task_url={task_url} --result_url={result_url}";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InterchangeConfig {
    pub label: String,
    /// 对外公布的地址, 用于客户端与工作节点池的连接URL
    pub public_ip: String,
    /// 绑定的网卡地址, `*` 表示全部
    pub bind_address: String,
    /// 固定的工作节点 `(任务, 结果)` 端口, 优先于 `worker_port_range`
    pub worker_ports: Option<(u16, u16)>,
    pub worker_port_range: (u16, u16),
    /// 客户端端口范围
    pub internal_port_range: (u16, u16),
    /// 注册时未声明容量的节点使用的默认容量
    pub worker_capacity: usize,
    pub batch_size: usize,
    pub heartbeat_interval_ms: u64,
    pub heartbeat_timeout_ms: u64,
    /// 每个执行器未完成future的上限
    pub queue_depth: usize,
    pub submit_timeout_ms: u64,
    /// 节点丢失后单个任务的最大重试次数, `None` 表示无限重试
    pub retry_limit: Option<u32>,
    pub duplicate_grace_ms: u64,
    pub launch_cmd: String,
    pub engine_debug: bool,
}

impl Default for InterchangeConfig {
    fn default() -> Self {
        Self {
            label: "interchange".to_string(),
            public_ip: "127.0.0.1".to_string(),
            bind_address: "127.0.0.1".to_string(),
            worker_ports: None,
            worker_port_range: (54000, 55000),
            internal_port_range: (55000, 56000),
            worker_capacity: num_cpus::get(),
            batch_size: 1,
            heartbeat_interval_ms: 1000,
            heartbeat_timeout_ms: 5000,
            queue_depth: 10_000,
            submit_timeout_ms: 0,
            retry_limit: None,
            duplicate_grace_ms: 30_000,
            launch_cmd: DEFAULT_LAUNCH_CMD.to_string(),
            engine_debug: false,
        }
    }
}

impl InterchangeConfig {
    /// 加载JSON配置文件, 缺失字段使用默认值
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be at least 1".into()));
        }
        if self.queue_depth == 0 {
            return Err(ConfigError::Invalid("queue_depth must be at least 1".into()));
        }
        if self.worker_capacity == 0 {
            return Err(ConfigError::Invalid("worker_capacity must be at least 1".into()));
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(ConfigError::Invalid("heartbeat_interval_ms must be positive".into()));
        }
        if self.heartbeat_timeout_ms <= self.heartbeat_interval_ms {
            return Err(ConfigError::Invalid(format!(
                "heartbeat_timeout_ms ({}) must exceed heartbeat_interval_ms ({})",
                self.heartbeat_timeout_ms, self.heartbeat_interval_ms
            )));
        }
        for (name, (lo, hi)) in [
            ("worker_port_range", self.worker_port_range),
            ("internal_port_range", self.internal_port_range),
        ] {
            if lo >= hi {
                return Err(ConfigError::Invalid(format!("{name} ({lo}, {hi}) is empty")));
            }
        }
        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn submit_timeout(&self) -> Duration {
        Duration::from_millis(self.submit_timeout_ms)
    }

    pub fn duplicate_grace(&self) -> Duration {
        Duration::from_millis(self.duplicate_grace_ms)
    }

    /// 渲染 `launch_cmd`, 生成连接 `endpoints` 的工作节点池启动命令
    pub fn launch_command(&self, endpoints: &InterchangeEndpoints, tasks_per_node: usize) -> String {
        let debug = if self.engine_debug { "--debug" } else { "" };
        self.launch_cmd
            .replace("{tasks_per_node}", &tasks_per_node.to_string())
            .replace("{debug}", debug)
            .replace("{task_url}", &endpoints.worker_task_url)
            .replace("{result_url}", &endpoints.worker_result_url)
    }
}
