//! 应用配置和持久化
//!
//! 提供下载目录、大小上限、对端列表等设置的存储和读取。

use crate::logging::LogLevel;
use crate::peer::{PeerInfo, StaticPeers};
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// 配置文件中的对端条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerEntry {
    /// VPN 网内地址
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    /// 是否接受该对端发来的文件
    #[serde(default)]
    pub allow_fileshare: bool,
}

/// 应用设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// 下载目录
    pub download_dir: PathBuf,
    /// 单次接受的最大字节数，0 表示不限制
    pub size_limit: u64,
    /// 是否发送桌面通知
    pub notifications: bool,
    pub log_level: LogLevel,
    /// 进度订阅通道缓冲区大小
    pub subscription_buffer: usize,
    pub peers: Vec<PeerEntry>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            download_dir: dirs::download_dir().unwrap_or_else(|| PathBuf::from(".")),
            size_limit: 0,
            notifications: true,
            log_level: LogLevel::Info,
            subscription_buffer: 32,
            peers: Vec::new(),
        }
    }
}

impl AppSettings {
    /// 获取配置文件路径
    pub fn config_path() -> PathBuf {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("meshdrop");
        config_dir.join("settings.toml")
    }

    /// 加载设置（如果文件不存在则使用默认值）
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Self {
        if path.exists() {
            match fs::read_to_string(path) {
                Ok(content) => match toml::from_str(&content) {
                    Ok(settings) => {
                        debug!("Loaded settings from {:?}", path);
                        return settings;
                    }
                    Err(e) => {
                        log::warn!("Failed to parse settings: {}, using defaults", e);
                    }
                },
                Err(e) => {
                    log::warn!("Failed to read settings file: {}, using defaults", e);
                }
            }
        }
        Self::default()
    }

    /// 保存设置
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        debug!("Saved settings to {:?}", path);
        Ok(())
    }

    /// 接受传输时实际使用的上限
    pub fn effective_size_limit(&self) -> u64 {
        if self.size_limit == 0 {
            u64::MAX
        } else {
            self.size_limit
        }
    }

    /// 由配置的对端列表构建对端目录
    pub fn peer_directory(&self) -> StaticPeers {
        self.peers
            .iter()
            .map(|entry| PeerInfo {
                address: entry.address.clone(),
                hostname: entry.hostname.clone(),
                allow_fileshare: entry.allow_fileshare,
            })
            .collect()
    }
}
