//! 错误类型

/// 返回给调用方（IPC 层）的错误，不会自动重试
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FileshareError {
    #[error("transfer not found")]
    TransferNotFound,
    #[error("file not found")]
    FileNotFound,
    #[error("transfer size exceeds the limit")]
    SizeLimitExceeded,
    #[error("outgoing transfers cannot be accepted")]
    TransferAcceptOutgoing,
    #[error("transfer was already accepted")]
    TransferAlreadyAccepted,
    #[error("transfer already exists")]
    TransferExists,
    #[error("transfer can no longer be canceled")]
    TransferNotCancelable,
    #[error("file can no longer be canceled")]
    FileNotCancelable,
}

pub type Result<T> = std::result::Result<T, FileshareError>;
