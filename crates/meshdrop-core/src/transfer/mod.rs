//! 传输数据模型
//!
//! 包含:
//! - 文件状态与传输方向
//! - 递归文件树节点 [`FileNode`]
//! - 传输记录 [`Transfer`] 和进度快照 [`Progress`]
//! - 文件树操作 ([`tree`]) 与并发安全的传输表 ([`registry`])

pub mod registry;
pub mod tree;

pub use registry::TransferRegistry;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::SystemTime;

/// 文件 / 传输状态
///
/// 数值与传输引擎上报的状态码保持一致，`FinishedWithErrors` 之后的
/// 三个值只在本地使用。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Success = 0,
    Canceled = 1,
    BadPath = 2,
    BadFile = 3,
    Transport = 4,
    BadStatus = 5,
    ServiceStop = 6,
    BadTransfer = 7,
    BadTransferState = 8,
    BadFileId = 9,
    BadSystemTime = 10,
    TruncatedFile = 11,
    EventSend = 12,
    BadUuid = 13,
    ChannelClosed = 14,
    Io = 15,
    DataSend = 16,
    DirectoryNotExpected = 17,
    EmptyTransfer = 18,
    TransferClosedByPeer = 19,
    TransferLimitsExceeded = 20,
    MismatchedSize = 21,
    UnexpectedData = 22,
    InvalidArgument = 23,
    TransferTimeout = 24,
    WsServer = 25,
    WsClient = 26,
    FileModified = 28,
    FilenameTooLong = 29,
    AuthFailed = 30,
    FinishedWithErrors = 100,
    #[default]
    Requested = 101,
    Ongoing = 102,
}

impl Status {
    /// 从引擎的失败状态码创建
    ///
    /// `FileFailed` 必须落到失败状态，所以未知码以及 0/1 都映射为 `BadStatus`。
    pub fn from_failure_code(code: i64) -> Self {
        match code {
            2 => Status::BadPath,
            3 => Status::BadFile,
            4 => Status::Transport,
            5 => Status::BadStatus,
            6 => Status::ServiceStop,
            7 => Status::BadTransfer,
            8 => Status::BadTransferState,
            9 => Status::BadFileId,
            10 => Status::BadSystemTime,
            11 => Status::TruncatedFile,
            12 => Status::EventSend,
            13 => Status::BadUuid,
            14 => Status::ChannelClosed,
            15 => Status::Io,
            16 => Status::DataSend,
            17 => Status::DirectoryNotExpected,
            18 => Status::EmptyTransfer,
            19 => Status::TransferClosedByPeer,
            20 => Status::TransferLimitsExceeded,
            21 => Status::MismatchedSize,
            22 => Status::UnexpectedData,
            23 => Status::InvalidArgument,
            24 => Status::TransferTimeout,
            25 => Status::WsServer,
            26 => Status::WsClient,
            28 => Status::FileModified,
            29 => Status::FilenameTooLong,
            30 => Status::AuthFailed,
            100 => Status::FinishedWithErrors,
            _ => Status::BadStatus,
        }
    }

    /// 获取状态码
    pub fn code(self) -> u32 {
        self as u32
    }

    /// 是否已结束（不再等待引擎事件）
    pub fn is_terminal(self) -> bool {
        !matches!(self, Status::Requested | Status::Ongoing)
    }

    /// 是否为失败状态
    pub fn is_failure(self) -> bool {
        !matches!(
            self,
            Status::Success | Status::Canceled | Status::Requested | Status::Ongoing
        )
    }

    /// 获取简短描述（用于通知标题）
    pub fn describe(self) -> &'static str {
        match self {
            Status::Success => "success",
            Status::Canceled => "canceled",
            Status::BadPath => "bad path",
            Status::BadFile => "bad file",
            Status::Transport => "transport problem",
            Status::BadStatus => "bad status",
            Status::ServiceStop => "service stopped",
            Status::BadTransfer => "bad transfer",
            Status::BadTransferState => "bad transfer state",
            Status::BadFileId => "bad file id",
            Status::BadSystemTime => "bad system time",
            Status::TruncatedFile => "truncated file",
            Status::EventSend => "event send failure",
            Status::BadUuid => "bad uuid",
            Status::ChannelClosed => "channel closed",
            Status::Io => "io error",
            Status::DataSend => "data send failure",
            Status::DirectoryNotExpected => "directory not expected",
            Status::EmptyTransfer => "empty transfer",
            Status::TransferClosedByPeer => "closed by peer",
            Status::TransferLimitsExceeded => "transfer limits exceeded",
            Status::MismatchedSize => "mismatched size",
            Status::UnexpectedData => "unexpected data",
            Status::InvalidArgument => "invalid argument",
            Status::TransferTimeout => "transfer timeout",
            Status::WsServer => "server error",
            Status::WsClient => "client error",
            Status::FileModified => "file modified",
            Status::FilenameTooLong => "filename too long",
            Status::AuthFailed => "authentication failed",
            Status::FinishedWithErrors => "finished with errors",
            Status::Requested => "requested",
            Status::Ongoing => "ongoing",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.describe())
    }
}

/// 传输方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Incoming,
    Outgoing,
}

/// 文件树节点
///
/// 有子节点的是目录，目录自身的状态不参与聚合。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileNode {
    /// 路径片段，完整相对路径由祖先 id 以 `/` 连接得到
    pub id: String,
    pub size: u64,
    pub status: Status,
    /// 已传输字节数（仅在文件下载中累计）
    pub transferred: u64,
    /// 子节点，保持引擎给出的顺序
    pub children: Vec<FileNode>,
}

impl FileNode {
    pub fn new(id: impl Into<String>, size: u64) -> Self {
        Self {
            id: id.into(),
            size,
            status: Status::Requested,
            transferred: 0,
            children: Vec::new(),
        }
    }

    /// 添加子节点
    pub fn with_children(mut self, children: Vec<FileNode>) -> Self {
        self.children = children;
        self
    }

    pub fn with_status(mut self, status: Status) -> Self {
        self.status = status;
        self
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// 传输记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transfer {
    pub id: String,
    pub direction: Direction,
    pub peer: String,
    pub status: Status,
    /// 接收：目标目录（接受后设置）；发送：源路径
    pub path: Option<PathBuf>,
    pub created: SystemTime,
    pub files: Vec<FileNode>,
    /// 已开始传输的文件大小之和
    pub total_size: u64,
    pub total_transferred: u64,
    /// 清理回调是否已触发（单向锁存）
    pub finalized: bool,
}

impl Transfer {
    /// 创建收到的传输请求
    pub fn incoming(id: impl Into<String>, peer: impl Into<String>, files: Vec<FileNode>) -> Self {
        Self {
            id: id.into(),
            direction: Direction::Incoming,
            peer: peer.into(),
            status: Status::Requested,
            path: None,
            created: SystemTime::now(),
            files,
            total_size: 0,
            total_transferred: 0,
            finalized: false,
        }
    }

    /// 创建本地发起的传输，文件列表等引擎确认后再填充
    pub fn outgoing(
        id: impl Into<String>,
        peer: impl Into<String>,
        path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            id: id.into(),
            direction: Direction::Outgoing,
            peer: peer.into(),
            status: Status::Requested,
            path: Some(path.into()),
            created: SystemTime::now(),
            files: Vec::new(),
            total_size: 0,
            total_transferred: 0,
            finalized: false,
        }
    }

    /// 当前进度百分比（向下取整）
    pub fn percentage(&self) -> u32 {
        if self.total_size == 0 {
            return 0;
        }
        let percent =
            u128::from(self.total_transferred) * 100 / u128::from(self.total_size);
        u32::try_from(percent).unwrap_or(u32::MAX)
    }

    /// 生成进度快照
    pub fn progress(&self) -> Progress {
        Progress {
            status: self.status,
            transferred: self.percentage(),
        }
    }
}

/// 推送给订阅者的进度快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub status: Status,
    /// 已传输百分比
    pub transferred: u32,
}
