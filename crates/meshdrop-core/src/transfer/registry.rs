//! 传输表
//!
//! 一把互斥锁保护整张表，所有读-改-写序列都在同一临界区内完成。
//! 读取接口返回克隆，调用方修改返回值不会影响表内状态。

use super::Transfer;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
pub struct TransferRegistry {
    transfers: Mutex<HashMap<String, Transfer>>,
}

impl TransferRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Transfer>> {
        self.transfers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// 获取传输副本
    pub fn get(&self, id: &str) -> Option<Transfer> {
        self.lock().get(id).cloned()
    }

    /// 按创建时间升序返回所有传输的副本
    pub fn list(&self) -> Vec<Transfer> {
        let mut transfers: Vec<Transfer> = self.lock().values().cloned().collect();
        transfers.sort_by(|a, b| a.created.cmp(&b.created));
        transfers
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// 插入新传输，id 已存在时不覆盖并返回 `false`
    pub fn insert(&self, transfer: Transfer) -> bool {
        let mut transfers = self.lock();
        if transfers.contains_key(&transfer.id) {
            return false;
        }
        transfers.insert(transfer.id.clone(), transfer);
        true
    }

    pub fn remove(&self, id: &str) -> Option<Transfer> {
        self.lock().remove(id)
    }

    /// 在锁内修改指定传输
    ///
    /// 闭包内的检查与修改构成一个原子操作；传输不存在时返回 `None`。
    pub fn update<R>(&self, id: &str, f: impl FnOnce(&mut Transfer) -> R) -> Option<R> {
        self.lock().get_mut(id).map(f)
    }
}
