//! Meshdrop Core Library
//!
//! VPN 网内点对点文件共享的事件与状态管理。实际的数据传输由外部引擎完成，
//! 本库负责把引擎事件折算为传输状态，并向上层提供接受、取消、订阅等操作。
//!
//! # 模块
//!
//! - **transfer**: 文件树、传输记录与并发安全的传输表
//! - **event**: 引擎事件解码
//! - **manager**: 传输状态机 [`EventManager`]
//! - **notify**: 桌面通知与通知按钮动作
//! - **peer** / **engine** / **fs** / **storage**: 注入的外部协作者
//! - **config** / **logging** / **ipc**: 配置、日志级别与 IPC 协议
//!
//! # 使用示例
//!
//! ```ignore
//! use meshdrop_core::{EventManager, StaticPeers};
//!
//! let manager = EventManager::new(Arc::new(peers), Arc::new(engine));
//!
//! // 引擎回调
//! manager.handle_event(r#"{"type":"RequestReceived","data":{...}}"#);
//!
//! // 用户接受
//! manager.accept_transfer(&id, "/home/me/Downloads", &[], u64::MAX)?;
//! let mut progress = manager.subscribe(&id)?;
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod fs;
pub mod ipc;
pub mod logging;
pub mod manager;
pub mod notify;
pub mod peer;
pub mod storage;
pub mod transfer;

pub use config::{AppSettings, PeerEntry};
pub use engine::TransferEngine;
pub use error::{FileshareError, Result};
pub use event::{Event, EventError, FinishReason};
pub use fs::{EntryKind, FilesystemProbe, SystemFilesystem};
pub use ipc::{IpcRequest, IpcResponse};
pub use logging::LogLevel;
pub use manager::EventManager;
pub use notify::{Action, ActionKey, DownloadDirError, NotificationManager, Notifier};
pub use peer::{PeerDirectory, PeerInfo, StaticPeers};
pub use storage::{JsonFileStorage, NoopStorage, Storage};
pub use transfer::{Direction, FileNode, Progress, Status, Transfer};
