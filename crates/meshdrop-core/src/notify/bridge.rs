//! 传输事件到通知的映射

use super::{
    new_transfer_body, Action, Notifier, FILE_DOWNLOADED_SUMMARY, FILE_UPLOADED_SUMMARY,
    NEW_TRANSFER_SUMMARY, TRANSFER_CANCELED_SUMMARY, TRANSFER_FAILED_SUMMARY,
};
use crate::fs::{EntryKind, FilesystemProbe};
use crate::transfer::{Direction, Status};
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// 下载目录不可用，`Display` 文本直接作为通知正文
#[derive(Debug, thiserror::Error)]
pub enum DownloadDirError {
    #[error("Download directory does not exist")]
    NotFound,
    #[error("Download directory is a symlink")]
    Symlink,
    #[error("Download directory is not a directory")]
    NotADirectory,
    #[error("Not enough space on device")]
    NotEnoughSpace,
    #[error("Failed to access download directory: {0}")]
    Io(#[from] io::Error),
}

type Opener = Box<dyn Fn(&Path) + Send + Sync>;

/// 每类通知最多记住的条数
const TRACKED_NOTIFICATIONS: usize = 256;

/// 按发送顺序记录最近的通知，超出容量时淘汰最早的一条
#[derive(Debug)]
struct Recent<V> {
    capacity: usize,
    entries: VecDeque<(u32, V)>,
}

impl<V: Clone> Recent<V> {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::new(),
        }
    }

    fn insert(&mut self, id: u32, value: V) {
        // 通知服务重启后 id 可能重复
        self.entries.retain(|(existing, _)| *existing != id);
        if self.entries.len() >= self.capacity
            && let Some((evicted, _)) = self.entries.pop_front()
        {
            debug!("Forgetting notification {evicted}");
        }
        self.entries.push_back((id, value));
    }

    fn get(&self, id: u32) -> Option<V> {
        self.entries
            .iter()
            .find(|(existing, _)| *existing == id)
            .map(|(_, value)| value.clone())
    }

    fn remove(&mut self, id: u32) -> Option<V> {
        let index = self.entries.iter().position(|(existing, _)| *existing == id)?;
        self.entries.remove(index).map(|(_, value)| value)
    }
}

pub struct NotificationManager {
    notifier: Arc<dyn Notifier>,
    filesystem: Arc<dyn FilesystemProbe>,
    opener: Opener,
    download_dir: PathBuf,
    size_limit: u64,
    /// 通知 id -> 传输 id
    transfers: Mutex<Recent<String>>,
    /// 通知 id -> 已下载文件路径
    files: Mutex<Recent<PathBuf>>,
}

impl std::fmt::Debug for NotificationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationManager")
            .field("download_dir", &self.download_dir)
            .field("size_limit", &self.size_limit)
            .finish_non_exhaustive()
    }
}

impl NotificationManager {
    pub fn new(
        notifier: Arc<dyn Notifier>,
        filesystem: Arc<dyn FilesystemProbe>,
        download_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            notifier,
            filesystem,
            opener: Box::new(|path: &Path| {
                info!("No file opener configured, skipping {}", path.display());
            }),
            download_dir: download_dir.into(),
            size_limit: u64::MAX,
            transfers: Mutex::new(Recent::new(TRACKED_NOTIFICATIONS)),
            files: Mutex::new(Recent::new(TRACKED_NOTIFICATIONS)),
        }
    }

    /// 通过通知接受传输时使用的大小上限
    pub fn with_size_limit(mut self, size_limit: u64) -> Self {
        self.size_limit = size_limit;
        self
    }

    /// 设置打开已下载文件的方式
    pub fn with_opener(mut self, opener: impl Fn(&Path) + Send + Sync + 'static) -> Self {
        self.opener = Box::new(opener);
        self
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    pub fn size_limit(&self) -> u64 {
        self.size_limit
    }

    fn send(&self, summary: &str, body: &str, actions: &[Action]) -> Option<u32> {
        match self.notifier.send(summary, body, actions) {
            Ok(id) => Some(id),
            Err(e) => {
                warn!("Failed to send notification '{summary}': {e:#}");
                None
            }
        }
    }

    /// 新的传输请求，附带接受 / 取消按钮
    pub fn notify_new_transfer(&self, transfer: &str, from: &str) {
        let body = new_transfer_body(transfer, from);
        if let Some(id) = self.send(NEW_TRANSFER_SUMMARY, &body, &[Action::ACCEPT, Action::CANCEL]) {
            self.transfers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(id, transfer.to_string());
        }
    }

    /// 单个文件结束
    ///
    /// `downloaded_to` 只在接收成功时使用，记录下来供 "Open" 按钮打开。
    pub fn notify_file_finished(
        &self,
        direction: Direction,
        file: &str,
        status: Status,
        downloaded_to: PathBuf,
    ) {
        match (status, direction) {
            (Status::Success, Direction::Incoming) => {
                if let Some(id) = self.send(FILE_DOWNLOADED_SUMMARY, file, &[Action::OPEN]) {
                    self.files
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .insert(id, downloaded_to);
                }
            }
            (Status::Success, Direction::Outgoing) => {
                self.send(FILE_UPLOADED_SUMMARY, file, &[]);
            }
            (status, _) => {
                self.send(status.describe(), file, &[]);
            }
        }
    }

    /// 整个传输被取消或失败
    pub fn notify_transfer_finished(&self, transfer: &str, status: Status) {
        let summary = if status == Status::Canceled {
            TRANSFER_CANCELED_SUMMARY
        } else {
            TRANSFER_FAILED_SUMMARY
        };
        self.send(summary, transfer, &[]);
    }

    /// 错误通知不带按钮
    pub fn notify_error(&self, summary: &str, body: &str) {
        self.send(summary, body, &[]);
    }

    /// 通知 id 对应的传输
    pub fn transfer_for(&self, notification_id: u32) -> Option<String> {
        self.transfers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(notification_id)
    }

    /// 打开通知对应的文件，每个通知只打开一次
    pub fn open_file(&self, notification_id: u32) -> bool {
        let path = self
            .files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(notification_id);

        match path {
            Some(path) => {
                debug!("Opening {}", path.display());
                (self.opener)(&path);
                true
            }
            None => false,
        }
    }

    /// 检查下载目录能否容纳 `required` 字节
    pub fn validate_download_dir(&self, required: u64) -> Result<PathBuf, DownloadDirError> {
        let dir = &self.download_dir;
        let kind = self.filesystem.entry_kind(dir).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                DownloadDirError::NotFound
            } else {
                DownloadDirError::Io(e)
            }
        })?;

        match kind {
            EntryKind::Directory => {}
            EntryKind::Symlink => return Err(DownloadDirError::Symlink),
            EntryKind::File => return Err(DownloadDirError::NotADirectory),
        }

        if self.filesystem.free_space(dir)? < required {
            return Err(DownloadDirError::NotEnoughSpace);
        }
        Ok(dir.clone())
    }

    pub fn close(&self) {
        if let Err(e) = self.notifier.close() {
            warn!("Failed to close notifier: {e:#}");
        }
    }
}
