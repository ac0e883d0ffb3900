//! 交换机状态机
//!
//! 纯逻辑部分, 不做任何I/O: 由唯一的事件循环线程持有,
//! 所有修改都经过这里, 分派、回包与看门狗之间不存在竞争。

use std::time::{Duration, Instant};

use bytes::Bytes;
use log::{debug, info, warn};

use super::ledger::{TaskLedger, TaskState};
use super::pool::DronePool;
use crate::config::InterchangeConfig;
use crate::proto::{Frame, FrameKind};
use crate::{RegistrationError, TaskId, WorkerId};

/// 发往单个工作节点的任务批次, 分派后不再拆分
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub batch_id: u64,
    pub worker_id: WorkerId,
    pub tasks: Vec<(TaskId, Bytes)>,
}

impl Batch {
    pub fn task_ids(&self) -> Vec<TaskId> {
        self.tasks.iter().map(|(id, _)| *id).collect()
    }

    pub fn to_proto(&self) -> crate::proto::Batch {
        crate::proto::Batch {
            batch_id: self.batch_id,
            tasks: self
                .tasks
                .iter()
                .map(|(id, payload)| Frame::task(*id, payload.to_vec()))
                .collect(),
        }
    }
}

/// 收到心跳时节点的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// 已注册, 心跳已刷新
    Alive,
    /// 已被移除, 凭心跳重新注册
    Rejoined,
    /// 未知节点, 心跳被忽略
    Unknown,
}

/// 节点被移除后的处理结果
#[derive(Debug, Default, PartialEq)]
pub struct Eviction {
    /// 重新排队的任务, 保持原分派顺序
    pub requeued: Vec<TaskId>,
    /// 超过重试上限而失败的任务, 需转发给客户端
    pub failed: Vec<Frame>,
}

impl Eviction {
    fn merge(&mut self, other: Eviction) {
        self.requeued.extend(other.requeued);
        self.failed.extend(other.failed);
    }
}

#[derive(Debug, Clone)]
struct Limits {
    batch_size: usize,
    default_capacity: usize,
    heartbeat_timeout: Duration,
    retry_limit: Option<u32>,
    duplicate_grace: Duration,
}

/// 交换机的全部可变状态
#[derive(Debug)]
pub struct InterchangeState {
    ledger: TaskLedger,
    pool: DronePool,
    limits: Limits,
    next_batch_id: u64,
}

impl InterchangeState {
    pub fn new(config: &InterchangeConfig) -> Self {
        Self {
            ledger: TaskLedger::new(),
            pool: DronePool::new(),
            limits: Limits {
                batch_size: config.batch_size.max(1),
                default_capacity: config.worker_capacity.max(1),
                heartbeat_timeout: config.heartbeat_timeout(),
                retry_limit: config.retry_limit,
                duplicate_grace: config.duplicate_grace(),
            },
            next_batch_id: 0,
        }
    }

    /// 客户端提交的任务进入待分派队列
    pub fn submit(&mut self, task_id: TaskId, payload: Bytes) -> bool {
        if !self.ledger.enqueue(task_id, payload) {
            warn!("Dropping duplicate submission of task {}", task_id);
            return false;
        }
        metrics::counter!("interchange_tasks_received_total").increment(1);
        debug!("Task {} queued ({} pending)", task_id, self.ledger.pending_len());
        true
    }

    /// 注册工作节点, 容量为0时使用配置的默认容量
    pub fn register_worker(
        &mut self,
        worker_id: &str,
        capacity: usize,
        version: &str,
        now: Instant,
    ) -> Result<(), RegistrationError> {
        let capacity = if capacity == 0 {
            self.limits.default_capacity
        } else {
            capacity
        };
        let known = self.pool.contains(worker_id);
        self.pool.register(worker_id, capacity, version, now)?;
        if known {
            debug!("Worker {} re-registered with capacity {}", worker_id, capacity);
        } else {
            info!("Worker {} registered with capacity {} (version {})", worker_id, capacity, version);
        }
        Ok(())
    }

    pub fn heartbeat(&mut self, worker_id: &str, now: Instant) -> bool {
        self.pool.heartbeat(worker_id, now)
    }

    /// 处理节点心跳
    ///
    /// 被移除但仍在运行的节点凭心跳中声明的容量重新加入;
    /// 容量为0(未声明)时不予接纳。
    pub fn worker_heartbeat(&mut self, worker_id: &str, capacity: usize, now: Instant) -> Liveness {
        if self.pool.heartbeat(worker_id, now) {
            return Liveness::Alive;
        }
        if capacity == 0 {
            return Liveness::Unknown;
        }
        match self.register_worker(worker_id, capacity, "rejoined", now) {
            Ok(()) => Liveness::Rejoined,
            Err(e) => {
                warn!("Worker {} cannot rejoin: {}", worker_id, e);
                Liveness::Unknown
            }
        }
    }

    /// 分派循环
    ///
    /// 只要存在空闲节点且队列非空, 就选择剩余容量最多的节点,
    /// 一次取出至多 min(batch_size, 剩余容量) 个任务组成批次。
    pub fn dispatch(&mut self) -> Vec<Batch> {
        let mut batches = Vec::new();
        while self.ledger.pending_len() > 0 {
            let Some((worker_id, spare)) = self.pool.select() else {
                break;
            };
            let take = spare.min(self.limits.batch_size);
            let mut tasks = Vec::with_capacity(take);
            while tasks.len() < take {
                match self.ledger.dispatch_next(&worker_id) {
                    Some(env) => tasks.push((env.task_id, env.payload.clone())),
                    None => break,
                }
            }
            if tasks.is_empty() {
                break;
            }
            let ids: Vec<TaskId> = tasks.iter().map(|(id, _)| *id).collect();
            self.pool.assign(&worker_id, &ids);

            let batch = Batch {
                batch_id: self.next_batch_id,
                worker_id,
                tasks,
            };
            self.next_batch_id += 1;
            debug!(
                "Batch {} -> worker {}: tasks {:?}",
                batch.batch_id, batch.worker_id, ids
            );
            metrics::counter!("interchange_tasks_dispatched_total").increment(ids.len() as u64);
            batches.push(batch);
        }
        metrics::gauge!("interchange_pending_tasks").set(self.ledger.pending_len() as f64);
        batches
    }

    /// 处理工作节点返回的结果或异常
    ///
    /// 只有任务当前归属的节点回包时才释放其容量; 已被移除的节点迟到的
    /// 结果照样转发, 新归属节点的容量保留到它自己的结果到达。
    ///
    /// # 返回
    /// 需要转发给客户端的帧; 重复、孤立或已取消的结果返回None
    pub fn complete(&mut self, worker_id: &str, frame: Frame, now: Instant) -> Option<Frame> {
        let task_id = frame.task_id;
        let terminal = match frame.kind() {
            FrameKind::Result => TaskState::Completed,
            FrameKind::Exception => TaskState::Failed,
            other => {
                warn!("Unexpected {} frame for task {} on result channel", other.as_str_name(), task_id);
                return None;
            }
        };

        let Some(env) = self.ledger.finish(task_id, terminal, now) else {
            // 重复执行的那份结果, 归还该节点的容量
            self.pool.release(worker_id, task_id);
            if self.ledger.recently_finished(task_id) {
                debug!("Dropping duplicate result for task {} from {}", task_id, worker_id);
            } else {
                warn!("Dropping result for unknown task {} from {}", task_id, worker_id);
            }
            return None;
        };
        match env.assigned_worker.as_deref() {
            Some(owner) if owner == worker_id => {
                self.pool.release(owner, task_id);
            }
            Some(owner) => debug!(
                "Task {} answered by {} while assigned to {}",
                task_id, worker_id, owner
            ),
            None => {}
        }
        if env.cancelled {
            debug!("Discarding result of cancelled task {}", task_id);
            return None;
        }
        metrics::counter!("interchange_results_forwarded_total").increment(1);
        Some(frame)
    }

    /// 发送受阻(对端队列已满)的批次退回队首
    ///
    /// 节点保留注册, 其容量归还, 任务的分派次数不增加。
    /// 多个批次受阻时按分派的逆序调用以保持原有顺序。
    pub fn return_batch(&mut self, batch: Batch) {
        for task_id in batch.task_ids().into_iter().rev() {
            self.pool.release(&batch.worker_id, task_id);
            self.ledger.undispatch(task_id);
        }
        debug!(
            "Batch {} returned from worker {} ({} pending)",
            batch.batch_id,
            batch.worker_id,
            self.ledger.pending_len()
        );
    }

    /// 客户端取消任务
    ///
    /// 排队中的任务直接移除; 已分派的任务继续执行, 结果丢弃。
    pub fn cancel(&mut self, task_id: TaskId, now: Instant) -> bool {
        match self.ledger.get(task_id).map(|env| env.state) {
            Some(TaskState::Queued) => {
                self.ledger.finish(task_id, TaskState::Failed, now);
                debug!("Cancelled queued task {}", task_id);
                true
            }
            Some(TaskState::Dispatched) => {
                self.ledger.mark_cancelled(task_id);
                debug!("Task {} cancelled after dispatch, result will be discarded", task_id);
                true
            }
            _ => false,
        }
    }

    /// 移除节点并处理其在途任务
    ///
    /// 未取消的任务按原顺序回到队首; 设置了重试上限且已用尽的任务
    /// 以 WorkerLost 结束。
    pub fn evict(&mut self, worker_id: &str, reason: &str, now: Instant) -> Eviction {
        let mut eviction = Eviction::default();
        let Some(reg) = self.pool.remove(worker_id) else {
            return eviction;
        };
        warn!(
            "Worker {} removed ({}), {} task(s) in flight",
            worker_id,
            reason,
            reg.in_flight.len()
        );
        metrics::counter!("interchange_workers_lost_total").increment(1);

        let mut requeue = Vec::new();
        for task_id in reg.in_flight {
            let Some(env) = self.ledger.get(task_id) else {
                continue;
            };
            if env.cancelled {
                self.ledger.finish(task_id, TaskState::Failed, now);
                continue;
            }
            let retries = env.attempts.saturating_sub(1);
            match self.limits.retry_limit {
                Some(limit) if retries >= limit => {
                    let attempts = env.attempts;
                    self.ledger.finish(task_id, TaskState::Failed, now);
                    warn!("Task {} failed: worker lost after {} attempt(s)", task_id, attempts);
                    eviction.failed.push(Frame::worker_lost(task_id, attempts));
                }
                _ => requeue.push(task_id),
            }
        }
        // in_flight为有序集合, 任务ID随提交单调递增
        for task_id in requeue.iter().rev() {
            self.ledger.requeue_front(*task_id);
        }
        metrics::counter!("interchange_tasks_requeued_total").increment(requeue.len() as u64);
        eviction.requeued = requeue;
        eviction
    }

    /// 看门狗: 移除心跳超时的节点并清理去重窗口
    pub fn sweep(&mut self, now: Instant) -> Eviction {
        let mut eviction = Eviction::default();
        for worker_id in self.pool.expired(now, self.limits.heartbeat_timeout) {
            let lost = self.evict(&worker_id, "heartbeat timeout", now);
            eviction.merge(lost);
        }
        let pruned = self.ledger.prune_finished(now, self.limits.duplicate_grace);
        if pruned > 0 {
            debug!("Pruned {} finished task id(s)", pruned);
        }
        eviction
    }

    pub fn pending_len(&self) -> usize {
        self.ledger.pending_len()
    }

    pub fn pending_ids(&self) -> Vec<TaskId> {
        self.ledger.pending_ids()
    }

    pub fn task_state(&self, task_id: TaskId) -> Option<TaskState> {
        self.ledger.state(task_id)
    }

    pub fn assigned_worker(&self, task_id: TaskId) -> Option<&str> {
        self.ledger.get(task_id)?.assigned_worker.as_deref()
    }

    pub fn attempts(&self, task_id: TaskId) -> Option<u32> {
        self.ledger.get(task_id).map(|env| env.attempts)
    }

    pub fn worker_count(&self) -> usize {
        self.pool.worker_count()
    }

    pub fn in_flight(&self, worker_id: &str) -> Vec<TaskId> {
        self.pool
            .get(worker_id)
            .map(|reg| reg.in_flight.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn pool(&self) -> &DronePool {
        &self.pool
    }

    /// 尚未结束的任务数(排队 + 在途)
    pub fn outstanding(&self) -> usize {
        self.ledger.open_len()
    }
}
