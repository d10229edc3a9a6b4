//! 对端目录
//!
//! 收到传输请求前需要确认对端已知且授予了文件共享权限。

use std::collections::HashMap;

/// 对端信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub address: String,
    /// 用于通知显示，未知时为 `None`
    pub hostname: Option<String>,
    /// 是否允许该对端向本机发送文件
    pub allow_fileshare: bool,
}

impl PeerInfo {
    /// 通知中显示的名称，没有主机名时使用地址
    pub fn display_name(&self) -> &str {
        self.hostname.as_deref().unwrap_or(&self.address)
    }
}

/// 按地址查找对端
pub trait PeerDirectory: Send + Sync {
    fn lookup(&self, address: &str) -> Option<PeerInfo>;
}

/// 内存中的静态对端表，由配置文件填充
#[derive(Debug, Default, Clone)]
pub struct StaticPeers {
    peers: HashMap<String, PeerInfo>,
}

impl StaticPeers {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加或替换一个对端
    pub fn insert(&mut self, peer: PeerInfo) {
        self.peers.insert(peer.address.clone(), peer);
    }

    pub fn with_peer(mut self, peer: PeerInfo) -> Self {
        self.insert(peer);
        self
    }
}

impl FromIterator<PeerInfo> for StaticPeers {
    fn from_iter<I: IntoIterator<Item = PeerInfo>>(iter: I) -> Self {
        let mut peers = Self::new();
        for peer in iter {
            peers.insert(peer);
        }
        peers
    }
}

impl PeerDirectory for StaticPeers {
    fn lookup(&self, address: &str) -> Option<PeerInfo> {
        self.peers.get(address).cloned()
    }
}
