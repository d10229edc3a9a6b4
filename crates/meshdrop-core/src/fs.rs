//! 文件系统探测
//!
//! 接受传输前检查下载目录，便于在测试中替换。

use std::fs;
use std::path::Path;

/// 路径类型（不跟随符号链接）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    Symlink,
    File,
}

pub trait FilesystemProbe: Send + Sync {
    /// 路径不存在时返回 `io::ErrorKind::NotFound`
    fn entry_kind(&self, path: &Path) -> std::io::Result<EntryKind>;

    /// 路径所在文件系统的可用字节数
    fn free_space(&self, path: &Path) -> std::io::Result<u64>;
}

/// 基于本机文件系统的实现
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemFilesystem;

impl FilesystemProbe for SystemFilesystem {
    fn entry_kind(&self, path: &Path) -> std::io::Result<EntryKind> {
        let file_type = fs::symlink_metadata(path)?.file_type();
        Ok(if file_type.is_symlink() {
            EntryKind::Symlink
        } else if file_type.is_dir() {
            EntryKind::Directory
        } else {
            EntryKind::File
        })
    }

    fn free_space(&self, path: &Path) -> std::io::Result<u64> {
        fs2::available_space(path)
    }
}
