//! 传输引擎事件
//!
//! 信封格式: `{"type": "<EventType>", "data": {...}}`
//!
//! 解码分两步：先解析通用信封，再按 `type` 解析对应载荷。
//! `TransferFinished` 还会按 `reason` 做第二层分派。

mod wire;

use crate::transfer::{FileNode, Status};
use wire::{Envelope, RawFile, RawFinished, RawProgress, RawRequest, RawStarted};

/// 事件解码错误，只用于日志
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("malformed event: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown event type: {0}")]
    UnknownType(String),
    #[error("unknown finish reason: {0}")]
    UnknownReason(String),
    #[error("missing field: {0}")]
    MissingField(&'static str),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    RequestReceived(RequestReceived),
    RequestQueued(RequestQueued),
    TransferStarted(TransferStarted),
    TransferProgress(TransferProgress),
    TransferFinished(TransferFinished),
}

/// 对端发来的传输请求
#[derive(Debug, Clone, PartialEq)]
pub struct RequestReceived {
    pub peer: String,
    pub transfer: String,
    pub files: Vec<FileNode>,
}

/// 本地发起的传输已排队
#[derive(Debug, Clone, PartialEq)]
pub struct RequestQueued {
    pub peer: Option<String>,
    pub transfer: String,
    pub files: Vec<FileNode>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransferStarted {
    pub transfer: String,
    pub file: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransferProgress {
    pub transfer: String,
    pub file: String,
    /// 该文件累计已传输字节数
    pub transferred: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransferFinished {
    pub transfer: String,
    pub reason: FinishReason,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FinishReason {
    TransferCanceled { by_peer: bool },
    TransferFailed { status: Status },
    FileDownloaded { file: String, final_path: Option<String> },
    FileUploaded { file: String },
    FileCanceled { file: String, by_peer: bool },
    FileFailed { file: String, status: Status },
}

impl FinishReason {
    /// 文件级结束原因对应的文件路径
    pub fn file(&self) -> Option<&str> {
        match self {
            FinishReason::TransferCanceled { .. } | FinishReason::TransferFailed { .. } => None,
            FinishReason::FileDownloaded { file, .. }
            | FinishReason::FileUploaded { file }
            | FinishReason::FileCanceled { file, .. }
            | FinishReason::FileFailed { file, .. } => Some(file),
        }
    }
}

impl Event {
    /// 解析一条引擎事件
    pub fn parse(raw: &str) -> Result<Self, EventError> {
        let envelope: Envelope = serde_json::from_str(raw)?;

        let event = match envelope.kind.as_str() {
            "RequestReceived" => {
                let data: RawRequest = envelope.payload()?;
                Event::RequestReceived(RequestReceived {
                    peer: data.peer.ok_or(EventError::MissingField("peer"))?,
                    transfer: data.transfer,
                    files: convert_files(data.files)?,
                })
            }
            "RequestQueued" => {
                let data: RawRequest = envelope.payload()?;
                Event::RequestQueued(RequestQueued {
                    peer: data.peer,
                    transfer: data.transfer,
                    files: convert_files(data.files)?,
                })
            }
            "TransferStarted" => {
                let data: RawStarted = envelope.payload()?;
                Event::TransferStarted(TransferStarted {
                    transfer: data.transfer,
                    file: data.file,
                })
            }
            "TransferProgress" => {
                let data: RawProgress = envelope.payload()?;
                Event::TransferProgress(TransferProgress {
                    transfer: data.transfer,
                    file: data.file,
                    transferred: data.transferred,
                })
            }
            "TransferFinished" => {
                let data: RawFinished = envelope.payload()?;
                Event::TransferFinished(parse_finished(data)?)
            }
            other => return Err(EventError::UnknownType(other.to_string())),
        };

        Ok(event)
    }

    /// 事件所属的传输 id
    pub fn transfer_id(&self) -> &str {
        match self {
            Event::RequestReceived(e) => &e.transfer,
            Event::RequestQueued(e) => &e.transfer,
            Event::TransferStarted(e) => &e.transfer,
            Event::TransferProgress(e) => &e.transfer,
            Event::TransferFinished(e) => &e.transfer,
        }
    }
}

fn parse_finished(raw: RawFinished) -> Result<TransferFinished, EventError> {
    let data = raw.data;
    let file = data.file.ok_or(EventError::MissingField("data.file"));
    let by_peer = data.by_peer.unwrap_or(false);
    let status = data
        .status
        .map_or(Status::BadStatus, Status::from_failure_code);

    let reason = match raw.reason.as_str() {
        "TransferCanceled" => FinishReason::TransferCanceled { by_peer },
        "TransferFailed" => FinishReason::TransferFailed { status },
        "FileDownloaded" => FinishReason::FileDownloaded {
            file: file?,
            final_path: data.final_path,
        },
        "FileUploaded" => FinishReason::FileUploaded { file: file? },
        "FileCanceled" => FinishReason::FileCanceled {
            file: file?,
            by_peer,
        },
        "FileFailed" => FinishReason::FileFailed {
            file: file?,
            status,
        },
        other => return Err(EventError::UnknownReason(other.to_string())),
    };

    Ok(TransferFinished {
        transfer: raw.transfer,
        reason,
    })
}

fn convert_files(files: Vec<RawFile>) -> Result<Vec<FileNode>, EventError> {
    files
        .into_iter()
        .map(|file| {
            let id = file.id.clone().ok_or(EventError::MissingField("files.id"))?;
            Ok(convert_file(id, file))
        })
        .collect()
}

/// 子节点缺少 `id` 时使用其在父对象中的键
fn convert_file(id: String, file: RawFile) -> FileNode {
    let children = file
        .children
        .into_iter()
        .map(|(key, child)| {
            let child_id = child.id.clone().unwrap_or(key);
            convert_file(child_id, child)
        })
        .collect();

    FileNode::new(id, file.size).with_children(children)
}
