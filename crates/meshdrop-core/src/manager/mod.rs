//! 传输状态机
//!
//! [`EventManager`] 接收引擎事件并维护传输表，同时为上层（IPC、通知按钮）
//! 提供接受、取消、订阅等操作。
//!
//! 所有 "检查后修改" 的序列都在传输表的锁内完成；调用引擎、存储、通知等
//! 外部协作者时不持有锁。

mod accept;
mod actions;
mod subscription;

#[cfg(test)]
mod tests;

use crate::engine::TransferEngine;
use crate::error::{FileshareError, Result};
use crate::event::{
    Event, FinishReason, RequestQueued, RequestReceived, TransferFinished, TransferProgress,
    TransferStarted,
};
use crate::notify::NotificationManager;
use crate::peer::PeerDirectory;
use crate::storage::{NoopStorage, Storage};
use crate::transfer::{tree, Direction, Progress, Status, Transfer, TransferRegistry};
use log::{debug, error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use subscription::Subscriptions;
use tokio::sync::mpsc;

/// 事件被忽略的原因，只用于日志
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
enum Skip {
    #[error("unknown file")]
    UnknownFile,
    #[error("file is not being transferred")]
    FileNotOngoing,
    #[error("transfer already finished")]
    TransferFinished,
}

/// 传输进入终态后需要在锁外执行的动作
#[derive(Debug)]
struct Completion {
    /// 本次是否负责调用 finalize
    finalize: bool,
    snapshot: Transfer,
}

impl Completion {
    /// 在锁内调用：置位 finalize 锁存并生成快照
    fn latch(transfer: &mut Transfer) -> Self {
        let finalize = !transfer.finalized;
        transfer.finalized = true;
        Self {
            finalize,
            snapshot: transfer.clone(),
        }
    }
}

/// 文件结束通知所需的信息
#[derive(Debug)]
struct FileFinished {
    direction: Direction,
    status: Status,
    downloaded_to: PathBuf,
    completion: Option<Completion>,
}

pub struct EventManager {
    registry: TransferRegistry,
    peers: Arc<dyn PeerDirectory>,
    engine: Arc<dyn TransferEngine>,
    storage: Arc<dyn Storage>,
    notifications: Option<NotificationManager>,
    subscriptions: Subscriptions,
}

impl std::fmt::Debug for EventManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventManager")
            .field("registry", &self.registry)
            .field("notifications", &self.notifications)
            .finish_non_exhaustive()
    }
}

impl EventManager {
    pub fn new(peers: Arc<dyn PeerDirectory>, engine: Arc<dyn TransferEngine>) -> Self {
        Self {
            registry: TransferRegistry::new(),
            peers,
            engine,
            storage: Arc::new(NoopStorage),
            notifications: None,
            subscriptions: Subscriptions::default(),
        }
    }

    pub fn with_storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = storage;
        self
    }

    pub fn with_notifications(mut self, notifications: NotificationManager) -> Self {
        self.notifications = Some(notifications);
        self
    }

    /// 每个订阅通道的缓冲区大小
    pub fn with_subscription_capacity(mut self, capacity: usize) -> Self {
        self.subscriptions = Subscriptions::new(capacity);
        self
    }

    /// 处理一条引擎事件
    ///
    /// 无法解析或无法对应到已知传输 / 文件的事件记录日志后丢弃。
    pub fn handle_event(&self, raw: &str) {
        let event = match Event::parse(raw) {
            Ok(event) => event,
            Err(e) => {
                warn!("Dropping engine event: {e}");
                return;
            }
        };
        debug!("Engine event for {}: {event:?}", event.transfer_id());

        match event {
            Event::RequestReceived(e) => self.on_request_received(e),
            Event::RequestQueued(e) => self.on_request_queued(e),
            Event::TransferStarted(e) => self.on_transfer_started(&e),
            Event::TransferProgress(e) => self.on_transfer_progress(&e),
            Event::TransferFinished(e) => self.on_transfer_finished(e),
        }
    }

    /// 所有传输，按创建时间排序
    pub fn transfers(&self) -> Vec<Transfer> {
        self.registry.list()
    }

    pub fn transfer(&self, id: &str) -> Result<Transfer> {
        self.registry.get(id).ok_or(FileshareError::TransferNotFound)
    }

    /// 登记本地发起的传输，文件列表由随后的 `RequestQueued` 填充
    pub fn new_outgoing_transfer(
        &self,
        id: &str,
        peer: &str,
        path: impl Into<PathBuf>,
    ) -> Result<()> {
        if !self.registry.insert(Transfer::outgoing(id, peer, path)) {
            return Err(FileshareError::TransferExists);
        }
        info!("New outgoing transfer {id} to {peer}");
        Ok(())
    }

    /// 直接覆盖传输状态，不经过事件处理的单调性约束
    pub fn set_transfer_status(&self, id: &str, status: Status) -> Result<()> {
        self.registry
            .update(id, |t| t.status = status)
            .ok_or(FileshareError::TransferNotFound)
    }

    /// 用户取消整个传输
    pub fn cancel_transfer(&self, id: &str) -> Result<()> {
        let completion = self
            .registry
            .update(id, |t| {
                if t.status.is_terminal() {
                    return Err(FileshareError::TransferNotCancelable);
                }
                t.status = Status::Canceled;
                tree::resolve_pending(&mut t.files, Status::Canceled);
                Ok(Completion::latch(t))
            })
            .ok_or(FileshareError::TransferNotFound)??;

        info!("Transfer {id} canceled by user");
        self.complete(completion);
        Ok(())
    }

    /// 用户取消单个文件，状态变化由随后的 `FileCanceled` 事件带回
    pub fn cancel_file(&self, id: &str, file: &str) -> Result<()> {
        let transfer = self.registry.get(id).ok_or(FileshareError::TransferNotFound)?;
        let node = tree::find(&transfer.files, file).ok_or(FileshareError::FileNotFound)?;
        if node.status.is_terminal() || transfer.status.is_terminal() {
            return Err(FileshareError::FileNotCancelable);
        }

        if let Err(e) = self.engine.cancel_file(id, file) {
            error!("Failed to cancel file {file} in {id}: {e:#}");
        }
        Ok(())
    }

    /// 订阅传输进度，替换已有订阅
    ///
    /// 已结束的传输只收到一条终态快照，随后通道关闭。
    /// 状态检查与登记在表锁内完成，不会与终态事件交错。
    pub fn subscribe(&self, id: &str) -> Result<mpsc::Receiver<Progress>> {
        self.registry
            .update(id, |t| {
                if t.status.is_terminal() {
                    self.subscriptions.finished(id, t.progress())
                } else {
                    self.subscriptions.subscribe(id)
                }
            })
            .ok_or(FileshareError::TransferNotFound)
    }

    /// 释放订阅；该传输已有更新的订阅者时保留其登记
    pub fn unsubscribe(&self, id: &str, rx: mpsc::Receiver<Progress>) {
        drop(rx);
        self.subscriptions.remove_closed(id);
    }

    /// 从存储恢复历史记录，已在表中的传输不覆盖
    pub fn restore_history(&self) -> usize {
        let stored = match self.storage.load() {
            Ok(stored) => stored,
            Err(e) => {
                warn!("Failed to load transfer history: {e:#}");
                return 0;
            }
        };

        let restored = stored
            .into_iter()
            .filter(|transfer| self.registry.insert(transfer.clone()))
            .count();
        info!("Restored {restored} transfers from history");
        restored
    }

    /// 关闭通知后端
    pub fn shutdown(&self) {
        if let Some(notifications) = &self.notifications {
            notifications.close();
        }
    }

    /// 在锁内修改传输，统一记录被忽略的事件
    fn apply<T>(
        &self,
        event: &str,
        id: &str,
        f: impl FnOnce(&mut Transfer) -> std::result::Result<T, Skip>,
    ) -> Option<T> {
        match self.registry.update(id, f) {
            None => {
                warn!("{event} for unknown transfer {id}");
                None
            }
            Some(Err(skip)) => {
                debug!("{event} for {id} ignored: {skip}");
                None
            }
            Some(Ok(value)) => Some(value),
        }
    }

    /// 终态副作用：finalize、推送终态快照、保存历史
    fn complete(&self, completion: Completion) {
        let Completion { finalize, snapshot } = completion;

        if finalize && let Err(e) = self.engine.finalize(&snapshot.id) {
            error!("Failed to finalize transfer {}: {e:#}", snapshot.id);
        }

        self.subscriptions.publish(&snapshot.id, snapshot.progress());

        if let Err(e) = self.storage.save(&snapshot) {
            warn!("Failed to save transfer {}: {e:#}", snapshot.id);
        }
        info!("Transfer {} finished: {}", snapshot.id, snapshot.status);
    }

    fn on_request_received(&self, e: RequestReceived) {
        let Some(peer) = self.peers.lookup(&e.peer) else {
            warn!("Transfer request {} from unknown peer {}", e.transfer, e.peer);
            return;
        };
        if !peer.allow_fileshare {
            info!(
                "Ignoring transfer request {} from {}: file sharing not allowed",
                e.transfer, e.peer
            );
            return;
        }

        let transfer = Transfer::incoming(&e.transfer, &e.peer, e.files);
        if !self.registry.insert(transfer) {
            warn!("Duplicate transfer request {}", e.transfer);
            return;
        }
        info!("Transfer request {} from {}", e.transfer, peer.display_name());

        if let Some(notifications) = &self.notifications {
            notifications.notify_new_transfer(&e.transfer, peer.display_name());
        }
    }

    fn on_request_queued(&self, e: RequestQueued) {
        let files = e.files;
        let count = self.apply("RequestQueued", &e.transfer, move |t| {
            if t.status.is_terminal() {
                return Err(Skip::TransferFinished);
            }
            t.files = files;
            Ok(tree::count_leaves(&t.files))
        });

        if let Some(count) = count {
            debug!("Transfer {} queued with {count} files", e.transfer);
        }
    }

    fn on_transfer_started(&self, e: &TransferStarted) {
        let progress = self.apply("TransferStarted", &e.transfer, |t| {
            let node = tree::find_mut(&mut t.files, &e.file).ok_or(Skip::UnknownFile)?;
            match node.status {
                Status::Requested => {
                    node.status = Status::Ongoing;
                    let size = node.size;
                    t.total_size = t.total_size.saturating_add(size);
                }
                Status::Ongoing => {}
                _ => return Err(Skip::FileNotOngoing),
            }
            if !t.status.is_terminal() {
                t.status = Status::Ongoing;
            }
            Ok(t.progress())
        });

        if let Some(progress) = progress {
            self.subscriptions.publish(&e.transfer, progress);
        }
    }

    fn on_transfer_progress(&self, e: &TransferProgress) {
        let progress = self.apply("TransferProgress", &e.transfer, |t| {
            let node = tree::find_mut(&mut t.files, &e.file).ok_or(Skip::UnknownFile)?;
            if node.status != Status::Ongoing {
                return Err(Skip::FileNotOngoing);
            }
            let delta = e.transferred.saturating_sub(node.transferred);
            node.transferred = node.transferred.max(e.transferred);
            t.total_transferred = t.total_transferred.saturating_add(delta);
            Ok(t.progress())
        });

        if let Some(progress) = progress {
            self.subscriptions.publish(&e.transfer, progress);
        }
    }

    fn on_transfer_finished(&self, e: TransferFinished) {
        match e.reason {
            FinishReason::TransferCanceled { by_peer } => {
                debug!("Transfer {} canceled (by peer: {by_peer})", e.transfer);
                self.finish_transfer(&e.transfer, Status::Canceled);
            }
            FinishReason::TransferFailed { status } => {
                warn!("Transfer {} failed: {status}", e.transfer);
                self.finish_transfer(&e.transfer, status);
            }
            FinishReason::FileDownloaded { file, final_path } => {
                self.finish_file(&e.transfer, &file, Status::Success, final_path);
            }
            FinishReason::FileUploaded { file } => {
                self.finish_file(&e.transfer, &file, Status::Success, None);
            }
            FinishReason::FileCanceled { file, .. } => {
                self.finish_file(&e.transfer, &file, Status::Canceled, None);
            }
            FinishReason::FileFailed { file, status } => {
                self.finish_file(&e.transfer, &file, status, None);
            }
        }
    }

    /// 整个传输被取消或失败，未结束的文件随之结束
    fn finish_transfer(&self, id: &str, reason: Status) {
        let completion = self.apply("TransferFinished", id, |t| {
            if t.status.is_terminal() {
                return Err(Skip::TransferFinished);
            }
            t.status = if reason == Status::Canceled {
                Status::Canceled
            } else {
                Status::FinishedWithErrors
            };
            tree::resolve_pending(&mut t.files, reason);
            Ok(Completion::latch(t))
        });

        let Some(completion) = completion else {
            return;
        };
        if let Some(notifications) = &self.notifications {
            notifications.notify_transfer_finished(id, completion.snapshot.status);
        }
        self.complete(completion);
    }

    /// 单个文件结束，重新计算传输的聚合状态
    fn finish_file(&self, id: &str, file: &str, status: Status, final_path: Option<String>) {
        let finished = self.apply("TransferFinished", id, |t| {
            let node = tree::find_mut(&mut t.files, file).ok_or(Skip::UnknownFile)?;
            node.status = status;

            let downloaded_to = final_path.map_or_else(
                || {
                    t.path
                        .as_deref()
                        .map_or_else(|| PathBuf::from(file), |dir| dir.join(file))
                },
                PathBuf::from,
            );

            // 终态不会被文件事件改变
            let completion = if t.status.is_terminal() {
                None
            } else {
                t.status = tree::aggregate_status(&t.files, t.status);
                t.status.is_terminal().then(|| Completion::latch(t))
            };

            Ok(FileFinished {
                direction: t.direction,
                status,
                downloaded_to,
                completion,
            })
        });

        let Some(finished) = finished else {
            return;
        };
        if let Some(notifications) = &self.notifications {
            notifications.notify_file_finished(
                finished.direction,
                file,
                finished.status,
                finished.downloaded_to,
            );
        }
        if let Some(completion) = finished.completion {
            self.complete(completion);
        }
    }
}
