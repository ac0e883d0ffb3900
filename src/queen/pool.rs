//! 工作节点注册表
//!
//! 维护每个已连接节点的容量、心跳时间与在途任务,
//! 并与 `CapacityBalancer` 保持同步。

use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};

use crate::balancer::CapacityBalancer;
use crate::{RegistrationError, TaskId, WorkerId};

/// 交换机侧的工作节点记录
#[derive(Debug, Clone)]
pub struct WorkerRegistration {
    pub worker_id: WorkerId,
    pub capacity: usize,
    pub last_heartbeat: Instant,
    pub in_flight: BTreeSet<TaskId>,
    pub version: String,
    seq: u64,
}

impl WorkerRegistration {
    pub fn spare(&self) -> usize {
        self.capacity.saturating_sub(self.in_flight.len())
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }
}

/// 进程池管理结构体
#[derive(Debug, Default)]
pub struct DronePool {
    workers: HashMap<WorkerId, WorkerRegistration>,
    balancer: CapacityBalancer,
    next_seq: u64,
}

impl DronePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册新的工作节点
    ///
    /// 已注册的节点重新注册时只刷新心跳与容量, 在途任务保留。
    pub fn register(
        &mut self,
        worker_id: &str,
        capacity: usize,
        version: &str,
        now: Instant,
    ) -> Result<(), RegistrationError> {
        if worker_id.is_empty() {
            return Err(RegistrationError::InvalidWorkerId);
        }
        if capacity == 0 {
            return Err(RegistrationError::ZeroCapacity);
        }

        if let Some(reg) = self.workers.get_mut(worker_id) {
            let old_spare = reg.spare();
            reg.capacity = capacity.max(reg.in_flight.len());
            reg.last_heartbeat = now;
            reg.version = version.to_string();
            self.balancer.update(&reg.worker_id, reg.seq, old_spare, reg.spare());
            return Ok(());
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        let reg = WorkerRegistration {
            worker_id: worker_id.to_string(),
            capacity,
            last_heartbeat: now,
            in_flight: BTreeSet::new(),
            version: version.to_string(),
            seq,
        };
        self.balancer.update(&reg.worker_id, seq, 0, capacity);
        self.workers.insert(reg.worker_id.clone(), reg);
        Ok(())
    }

    /// 刷新心跳, 未知节点返回false
    pub fn heartbeat(&mut self, worker_id: &str, now: Instant) -> bool {
        match self.workers.get_mut(worker_id) {
            Some(reg) => {
                reg.last_heartbeat = now;
                true
            }
            None => false,
        }
    }

    /// 剩余容量最多的节点
    pub fn select(&self) -> Option<(WorkerId, usize)> {
        self.balancer.select().map(|(id, spare)| (id.clone(), spare))
    }

    /// 记录分派到节点的任务
    pub fn assign(&mut self, worker_id: &str, task_ids: &[TaskId]) -> bool {
        let Some(reg) = self.workers.get_mut(worker_id) else {
            return false;
        };
        let old_spare = reg.spare();
        debug_assert!(task_ids.len() <= old_spare);
        reg.in_flight.extend(task_ids.iter().copied());
        self.balancer.update(&reg.worker_id, reg.seq, old_spare, reg.spare());
        true
    }

    /// 任务完成后释放节点容量
    pub fn release(&mut self, worker_id: &str, task_id: TaskId) -> bool {
        let Some(reg) = self.workers.get_mut(worker_id) else {
            return false;
        };
        let old_spare = reg.spare();
        if !reg.in_flight.remove(&task_id) {
            return false;
        }
        self.balancer.update(&reg.worker_id, reg.seq, old_spare, reg.spare());
        true
    }

    /// 移除节点, 返回其注册记录(含在途任务)
    pub fn remove(&mut self, worker_id: &str) -> Option<WorkerRegistration> {
        let reg = self.workers.remove(worker_id)?;
        self.balancer.remove(reg.seq, reg.spare());
        Some(reg)
    }

    /// 心跳超时的节点, 按注册顺序返回
    pub fn expired(&self, now: Instant, timeout: Duration) -> Vec<WorkerId> {
        let mut expired: Vec<&WorkerRegistration> = self
            .workers
            .values()
            .filter(|reg| now.saturating_duration_since(reg.last_heartbeat) > timeout)
            .collect();
        expired.sort_by_key(|reg| reg.seq);
        expired.into_iter().map(|reg| reg.worker_id.clone()).collect()
    }

    pub fn get(&self, worker_id: &str) -> Option<&WorkerRegistration> {
        self.workers.get(worker_id)
    }

    pub fn contains(&self, worker_id: &str) -> bool {
        self.workers.contains_key(worker_id)
    }

    /// 获取当前工作节点数量
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn total_in_flight(&self) -> usize {
        self.workers.values().map(|reg| reg.in_flight.len()).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = &WorkerRegistration> {
        self.workers.values()
    }
}
