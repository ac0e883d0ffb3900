//! 负载均衡模块
//!
//! 贪心最小负载策略: 总是选择剩余容量最多的工作节点,
//! 容量相同时选择最早注册的节点, 保证调度结果确定。

use std::cmp::Reverse;
use std::collections::BTreeMap;

use crate::WorkerId;

/// 按剩余容量排序的节点索引
///
/// 只收录剩余容量大于0的节点, 每次选择为 O(log W)。
#[derive(Debug, Default)]
pub struct CapacityBalancer {
    ranked: BTreeMap<(Reverse<usize>, u64), WorkerId>,
}

impl CapacityBalancer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 更新节点的剩余容量
    ///
    /// # 参数
    /// - seq: 节点注册序号
    /// - old_spare: 更新前的剩余容量
    /// - new_spare: 更新后的剩余容量
    pub fn update(&mut self, worker_id: &WorkerId, seq: u64, old_spare: usize, new_spare: usize) {
        if old_spare > 0 {
            self.ranked.remove(&(Reverse(old_spare), seq));
        }
        if new_spare > 0 {
            self.ranked.insert((Reverse(new_spare), seq), worker_id.clone());
        }
    }

    /// 移除节点
    pub fn remove(&mut self, seq: u64, spare: usize) {
        if spare > 0 {
            self.ranked.remove(&(Reverse(spare), seq));
        }
    }

    /// 选择剩余容量最多的节点
    ///
    /// # 返回
    /// (节点ID, 剩余容量), 所有节点已满时返回None
    pub fn select(&self) -> Option<(&WorkerId, usize)> {
        self.ranked
            .iter()
            .next()
            .map(|((Reverse(spare), _), id)| (id, *spare))
    }

    /// 有剩余容量的节点数
    pub fn available(&self) -> usize {
        self.ranked.len()
    }
}
