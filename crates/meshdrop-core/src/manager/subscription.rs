//! 进度订阅
//!
//! 每个传输最多一个订阅者。发送使用 `try_send`，订阅者处理过慢时丢弃快照，
//! 不阻塞事件处理线程。

use crate::transfer::Progress;
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc::{self, error::TrySendError};

pub(crate) const DEFAULT_CAPACITY: usize = 32;

#[derive(Debug)]
pub(crate) struct Subscriptions {
    capacity: usize,
    senders: Mutex<HashMap<String, mpsc::Sender<Progress>>>,
}

impl Default for Subscriptions {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl Subscriptions {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            senders: Mutex::new(HashMap::new()),
        }
    }

    /// 注册订阅，替换该传输已有的订阅者
    pub fn subscribe(&self, transfer: &str) -> mpsc::Receiver<Progress> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let replaced = self
            .senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(transfer.to_string(), tx);
        if replaced.is_some() {
            debug!("Replaced progress subscriber for {transfer}");
        }
        rx
    }

    /// 已结束的传输：只投递终态快照，不登记发送端
    pub fn finished(&self, transfer: &str, progress: Progress) -> mpsc::Receiver<Progress> {
        self.senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(transfer);
        let (tx, rx) = mpsc::channel(1);
        // 新建通道容量为 1，首次发送不会失败
        let _ = tx.try_send(progress);
        rx
    }

    /// 订阅者离开后清理；已被新订阅者替换时保留新的发送端
    pub fn remove_closed(&self, transfer: &str) {
        let mut senders = self.senders.lock().unwrap_or_else(PoisonError::into_inner);
        if senders.get(transfer).is_some_and(mpsc::Sender::is_closed) {
            senders.remove(transfer);
            debug!("Removed progress subscriber for {transfer}");
        }
    }

    /// 推送快照；终态快照推送后移除订阅
    pub fn publish(&self, transfer: &str, progress: Progress) {
        let mut senders = self.senders.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = senders.get(transfer) else {
            return;
        };

        let remove = match tx.try_send(progress) {
            Ok(()) => progress.status.is_terminal(),
            Err(TrySendError::Full(_)) => {
                warn!("Progress subscriber for {transfer} is lagging, dropping snapshot");
                progress.status.is_terminal()
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Progress subscriber for {transfer} went away");
                true
            }
        };

        if remove {
            senders.remove(transfer);
        }
    }

    #[cfg(test)]
    pub fn is_subscribed(&self, transfer: &str) -> bool {
        self.senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(transfer)
    }
}
