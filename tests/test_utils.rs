#![allow(dead_code)]

use std::time::{Duration, Instant};

use bytes::Bytes;
use zerg_interchange::proto::Frame;
use zerg_interchange::{InterchangeConfig, InterchangeState, TaskId};

/// 测试专用配置: 短心跳, 小批次
pub fn test_config() -> InterchangeConfig {
    InterchangeConfig {
        label: "test".to_string(),
        worker_capacity: 4,
        batch_size: 1,
        heartbeat_interval_ms: 50,
        heartbeat_timeout_ms: 400,
        queue_depth: 256,
        duplicate_grace_ms: 1_000,
        worker_port_range: (40000, 50000),
        internal_port_range: (50000, 60000),
        ..InterchangeConfig::default()
    }
}

/// 带若干已注册节点的状态机
pub struct StateBuilder {
    config: InterchangeConfig,
    workers: Vec<(String, usize)>,
}

impl StateBuilder {
    pub fn new() -> Self {
        Self {
            config: test_config(),
            workers: Vec::new(),
        }
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.config.batch_size = batch_size;
        self
    }

    pub fn retry_limit(mut self, limit: u32) -> Self {
        self.config.retry_limit = Some(limit);
        self
    }

    pub fn worker(mut self, id: &str, capacity: usize) -> Self {
        self.workers.push((id.to_string(), capacity));
        self
    }

    pub fn build(self, now: Instant) -> InterchangeState {
        let mut state = InterchangeState::new(&self.config);
        for (id, capacity) in self.workers {
            state.register_worker(&id, capacity, "test", now).unwrap();
        }
        state
    }
}

pub fn submit_range(state: &mut InterchangeState, ids: impl IntoIterator<Item = TaskId>) {
    for id in ids {
        assert!(state.submit(id, Bytes::from(id.to_be_bytes().to_vec())));
    }
}

pub fn ok(task_id: TaskId) -> Frame {
    Frame::result(task_id, b"ok".to_vec())
}

pub fn after(now: Instant, ms: u64) -> Instant {
    now + Duration::from_millis(ms)
}
