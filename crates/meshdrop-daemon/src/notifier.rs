//! 日志通知后端
//!
//! 没有桌面通知服务时把通知写入日志，按钮动作通过 CLI 的
//! `meshdrop action <id> <action>` 触发。

use meshdrop_core::{Action, Notifier};
use std::sync::atomic::{AtomicU32, Ordering};

#[derive(Debug, Default)]
pub struct LogNotifier {
    next_id: AtomicU32,
}

impl Notifier for LogNotifier {
    fn send(&self, summary: &str, body: &str, actions: &[Action]) -> anyhow::Result<u32> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let keys: Vec<&str> = actions.iter().map(|a| a.key.as_str()).collect();
        tracing::info!(id, actions = ?keys, "[通知] {}: {}", summary, body);
        Ok(id)
    }

    fn close(&self) -> anyhow::Result<()> {
        tracing::debug!("Notifier closed");
        Ok(())
    }
}
