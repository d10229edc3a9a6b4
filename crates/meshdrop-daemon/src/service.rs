//! Core Service - 组装 `EventManager` 并处理 IPC 请求

use crate::engine_link::{EngineCommand, EngineLink};
use crate::notifier::LogNotifier;
use anyhow::Result;
use meshdrop_core::{
    AppSettings, EventManager, IpcRequest, IpcResponse, JsonFileStorage, NotificationManager,
    SystemFilesystem,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct Service {
    manager: Arc<EventManager>,
    engine: EngineLink,
    settings: AppSettings,
}

impl Service {
    pub fn new(settings: AppSettings, engine: EngineLink) -> Self {
        tracing::info!("核心服务初始化...");

        let mut manager = EventManager::new(
            Arc::new(settings.peer_directory()),
            Arc::new(engine.clone()),
        )
        .with_storage(Arc::new(JsonFileStorage::new(JsonFileStorage::default_path())))
        .with_subscription_capacity(settings.subscription_buffer);

        if settings.notifications {
            let notifications = NotificationManager::new(
                Arc::new(LogNotifier::default()),
                Arc::new(SystemFilesystem),
                settings.download_dir.clone(),
            )
            .with_size_limit(settings.effective_size_limit())
            .with_opener(open_file);
            manager = manager.with_notifications(notifications);
        }

        tracing::info!(
            "已加载 {} 个对端，下载目录: {:?}",
            settings.peers.len(),
            settings.download_dir
        );

        Self {
            manager: Arc::new(manager),
            engine,
            settings,
        }
    }

    pub fn manager(&self) -> Arc<EventManager> {
        self.manager.clone()
    }

    pub fn restore_history(&self) {
        self.manager.restore_history();
    }

    pub fn shutdown(&self) {
        self.manager.shutdown();
    }

    /// 发起发送，返回新传输的 id
    fn send(&self, peer: &str, path: &Path) -> Result<String> {
        if !path.exists() {
            anyhow::bail!("路径不存在: {}", path.display());
        }

        let id = uuid::Uuid::new_v4().to_string();
        self.manager.new_outgoing_transfer(&id, peer, path)?;
        self.engine.send(EngineCommand::Send {
            transfer: id.clone(),
            peer: peer.to_string(),
            paths: vec![path.to_path_buf()],
        })?;
        Ok(id)
    }

    /// 处理除 `watch` 以外的请求
    pub fn handle(&self, request: IpcRequest) -> IpcResponse {
        tracing::debug!("收到请求: {:?}", request);

        match request {
            IpcRequest::List => IpcResponse::Transfers {
                transfers: self.manager.transfers(),
            },
            IpcRequest::Get { id } => match self.manager.transfer(&id) {
                Ok(transfer) => IpcResponse::Transfer {
                    transfer: Box::new(transfer),
                },
                Err(e) => IpcResponse::error(e),
            },
            IpcRequest::Send { peer, path } => match self.send(&peer, &path) {
                Ok(id) => {
                    tracing::info!("发送文件: {:?} -> {}", path, peer);
                    IpcResponse::ok(id)
                }
                Err(e) => IpcResponse::error(format!("{e:#}")),
            },
            IpcRequest::Accept { id, path, files } => {
                let path = path.unwrap_or_else(|| self.settings.download_dir.clone());
                match self.manager.accept_transfer(
                    &id,
                    path,
                    &files,
                    self.settings.effective_size_limit(),
                ) {
                    Ok(transfer) => IpcResponse::Transfer {
                        transfer: Box::new(transfer),
                    },
                    Err(e) => IpcResponse::error(e),
                }
            }
            IpcRequest::Cancel { id } => match self.manager.cancel_transfer(&id) {
                Ok(()) => IpcResponse::ok(format!("已取消 {id}")),
                Err(e) => IpcResponse::error(e),
            },
            IpcRequest::CancelFile { id, file } => match self.manager.cancel_file(&id, &file) {
                Ok(()) => IpcResponse::ok(format!("正在取消 {file}")),
                Err(e) => IpcResponse::error(e),
            },
            IpcRequest::NotificationAction {
                notification_id,
                action,
            } => {
                self.manager.notification_action(notification_id, action);
                IpcResponse::ok(format!("已执行 {action}"))
            }
            IpcRequest::Watch { .. } => IpcResponse::error("watch 请求需要流式连接"),
        }
    }
}

/// 用桌面默认程序打开文件
fn open_file(path: &Path) {
    let path: PathBuf = path.to_path_buf();
    match std::process::Command::new("xdg-open").arg(&path).spawn() {
        Ok(_) => tracing::info!("已打开 {:?}", path),
        Err(e) => tracing::warn!("无法打开 {:?}: {}", path, e),
    }
}
