//! 传输历史存储
//!
//! 传输结束后保存一份快照，重启时通过 [`crate::EventManager::restore_history`] 恢复。

use crate::transfer::Transfer;
use anyhow::Context;
use log::debug;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

pub trait Storage: Send + Sync {
    fn load(&self) -> anyhow::Result<Vec<Transfer>>;

    /// 保存或替换同 id 的记录
    fn save(&self, transfer: &Transfer) -> anyhow::Result<()>;
}

/// 不保存任何历史
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStorage;

impl Storage for NoopStorage {
    fn load(&self) -> anyhow::Result<Vec<Transfer>> {
        Ok(Vec::new())
    }

    fn save(&self, _transfer: &Transfer) -> anyhow::Result<()> {
        Ok(())
    }
}

/// 以 JSON 数组保存在单个文件中
#[derive(Debug)]
pub struct JsonFileStorage {
    path: PathBuf,
    /// 串行化读-改-写
    write_lock: Mutex<()>,
}

impl JsonFileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// 默认历史文件位置: `<data_dir>/meshdrop/history.json`
    pub fn default_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("meshdrop")
            .join("history.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> anyhow::Result<Vec<Transfer>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("读取历史文件失败: {}", self.path.display()))?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        let transfers = serde_json::from_str(&content)
            .with_context(|| format!("解析历史文件失败: {}", self.path.display()))?;
        Ok(transfers)
    }
}

impl Storage for JsonFileStorage {
    fn load(&self) -> anyhow::Result<Vec<Transfer>> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.read_all()
    }

    fn save(&self, transfer: &Transfer) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut transfers = self.read_all()?;
        match transfers.iter_mut().find(|t| t.id == transfer.id) {
            Some(existing) => *existing = transfer.clone(),
            None => transfers.push(transfer.clone()),
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(&transfers)?)?;
        debug!("Saved transfer {} to {:?}", transfer.id, self.path);
        Ok(())
    }
}
