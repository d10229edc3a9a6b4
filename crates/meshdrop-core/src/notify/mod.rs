//! 桌面通知
//!
//! - [`Notifier`]: 通知发送后端（D-Bus、日志等）
//! - [`NotificationManager`]: 将传输事件映射为通知，并记住通知与传输 / 文件的对应关系

mod bridge;

pub use bridge::{DownloadDirError, NotificationManager};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const NEW_TRANSFER_SUMMARY: &str = "New file transfer";
pub const TRANSFER_CANCELED_SUMMARY: &str = "Transfer canceled";
pub const TRANSFER_FAILED_SUMMARY: &str = "Transfer failed";
pub const FILE_DOWNLOADED_SUMMARY: &str = "downloaded";
pub const FILE_UPLOADED_SUMMARY: &str = "uploaded";

pub const ACCEPT_FAILED_SUMMARY: &str = "Failed to accept transfer";
pub const CANCEL_FAILED_SUMMARY: &str = "Failed to cancel transfer";
pub const ACCEPT_ERROR_GENERIC: &str = "Something went wrong while accepting the transfer";
pub const CANCEL_ERROR_GENERIC: &str = "Something went wrong while canceling the transfer";
pub const TRANSFER_ALREADY_ACCEPTED: &str = "Transfer already accepted";
pub const TRANSFER_NOT_CANCELABLE: &str = "Transfer can no longer be canceled";

/// 新传输通知的正文
pub fn new_transfer_body(transfer: &str, from: &str) -> String {
    format!("Transfer ID: {transfer}\nFrom: {from}")
}

/// 通知按钮对应的动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKey {
    AcceptTransfer,
    CancelTransfer,
    OpenFile,
}

impl ActionKey {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionKey::AcceptTransfer => "accept-transfer",
            ActionKey::CancelTransfer => "cancel-transfer",
            ActionKey::OpenFile => "open-file",
        }
    }
}

impl fmt::Display for ActionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown notification action: {0}")]
pub struct UnknownAction(pub String);

impl FromStr for ActionKey {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "accept-transfer" => Ok(ActionKey::AcceptTransfer),
            "cancel-transfer" => Ok(ActionKey::CancelTransfer),
            "open-file" => Ok(ActionKey::OpenFile),
            other => Err(UnknownAction(other.to_string())),
        }
    }
}

/// 通知上的按钮
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Action {
    pub key: ActionKey,
    pub label: &'static str,
}

impl Action {
    pub const ACCEPT: Action = Action {
        key: ActionKey::AcceptTransfer,
        label: "Accept",
    };
    pub const CANCEL: Action = Action {
        key: ActionKey::CancelTransfer,
        label: "Cancel",
    };
    pub const OPEN: Action = Action {
        key: ActionKey::OpenFile,
        label: "Open",
    };
}

/// 通知发送后端
pub trait Notifier: Send + Sync {
    /// 发送通知，返回通知 id
    fn send(&self, summary: &str, body: &str, actions: &[Action]) -> anyhow::Result<u32>;

    fn close(&self) -> anyhow::Result<()>;
}
