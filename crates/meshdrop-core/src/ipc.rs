//! 守护进程与 CLI 之间的 IPC 协议
//!
//! Unix Socket 上逐行传输 JSON，以 `type` 字段区分消息。

use crate::notify::ActionKey;
use crate::transfer::{Progress, Status, Transfer};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

fn runtime_dir() -> PathBuf {
    std::env::var("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

/// CLI 连接的 socket
pub fn socket_path() -> PathBuf {
    runtime_dir().join("meshdrop.sock")
}

/// 传输引擎连接的 socket
pub fn engine_socket_path() -> PathBuf {
    runtime_dir().join("meshdrop-engine.sock")
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum IpcRequest {
    #[serde(rename = "list")]
    List,
    #[serde(rename = "get")]
    Get { id: String },
    #[serde(rename = "send")]
    Send { peer: String, path: PathBuf },
    #[serde(rename = "accept")]
    Accept {
        id: String,
        /// 缺省时使用配置的下载目录
        #[serde(default)]
        path: Option<PathBuf>,
        #[serde(default)]
        files: Vec<String>,
    },
    #[serde(rename = "cancel")]
    Cancel { id: String },
    #[serde(rename = "cancel_file")]
    CancelFile { id: String, file: String },
    /// 持续推送进度直到传输结束
    #[serde(rename = "watch")]
    Watch { id: String },
    #[serde(rename = "notification_action")]
    NotificationAction {
        notification_id: u32,
        action: ActionKey,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum IpcResponse {
    #[serde(rename = "ok")]
    Ok { message: String },
    #[serde(rename = "error")]
    Error { message: String },
    #[serde(rename = "transfers")]
    Transfers { transfers: Vec<Transfer> },
    #[serde(rename = "transfer")]
    Transfer { transfer: Box<Transfer> },
    #[serde(rename = "progress")]
    Progress { status: Status, transferred: u32 },
}

impl IpcResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        IpcResponse::Ok {
            message: message.into(),
        }
    }

    pub fn error(message: impl ToString) -> Self {
        IpcResponse::Error {
            message: message.to_string(),
        }
    }

    /// `watch` 流是否应在此响应后结束
    pub fn ends_stream(&self) -> bool {
        match self {
            IpcResponse::Progress { status, .. } => status.is_terminal(),
            _ => true,
        }
    }
}

impl From<Progress> for IpcResponse {
    fn from(progress: Progress) -> Self {
        IpcResponse::Progress {
            status: progress.status,
            transferred: progress.transferred,
        }
    }
}
