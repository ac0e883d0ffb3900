//! 工蜂节点心跳
//!
//! 间隔带 ±5% 随机抖动, 避免大量节点同时上报。

use std::time::{Duration, Instant};

use crate::proto::Heartbeat;
use crate::WorkerId;

/// 心跳管理器
#[derive(Debug)]
pub struct HeartbeatManager {
    worker_id: WorkerId,
    capacity: usize,
    base: Duration,
    next_due: Instant,
}

impl HeartbeatManager {
    /// 创建新的心跳管理器, 第一次心跳在一个间隔之后
    pub fn new(worker_id: WorkerId, capacity: usize, base: Duration, now: Instant) -> Self {
        let mut manager = Self {
            worker_id,
            capacity,
            base,
            next_due: now,
        };
        manager.next_due = now + manager.next_interval();
        manager
    }

    /// 计算下一个心跳间隔(基准±5%随机抖动)
    pub fn next_interval(&self) -> Duration {
        let jitter = rand::random_range(0..=10u32);
        self.base + (self.base * jitter) / 100 - self.base / 20
    }

    /// 到期时返回待发送的心跳并安排下一次
    pub fn poll(&mut self, now: Instant, current_tasks: usize) -> Option<Heartbeat> {
        if now < self.next_due {
            return None;
        }
        self.next_due = now + self.next_interval();
        Some(Heartbeat {
            worker_id: self.worker_id.clone(),
            timestamp: chrono::Utc::now().timestamp(),
            current_tasks: current_tasks as u32,
            capacity: self.capacity as u32,
        })
    }
}
