//! 传输引擎连接 - Unix Domain Socket
//!
//! 引擎逐行写入事件 JSON，守护进程按到达顺序交给 `EventManager`；
//! 反方向逐行写回引擎指令（以 `cmd` 字段区分）。

use anyhow::Result;
use meshdrop_core::ipc::engine_socket_path;
use meshdrop_core::{EventManager, TransferEngine};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc::{self, error::TrySendError};

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum EngineCommand {
    Send {
        transfer: String,
        peer: String,
        paths: Vec<PathBuf>,
    },
    Accept {
        transfer: String,
        destination: PathBuf,
        #[serde(skip_serializing_if = "Option::is_none")]
        file: Option<String>,
    },
    /// 释放传输资源
    Cancel { transfer: String },
    CancelFile { transfer: String, file: String },
}

/// 引擎断开期间最多排队的指令数
pub const COMMAND_QUEUE_CAPACITY: usize = 256;

/// 指令发送端，引擎断开期间指令在通道中排队
///
/// 队列已满时直接报错，调用方在事件处理线程上，不能等待。
#[derive(Debug, Clone)]
pub struct EngineLink {
    tx: mpsc::Sender<EngineCommand>,
}

impl EngineLink {
    pub fn new() -> (Self, mpsc::Receiver<EngineCommand>) {
        Self::with_capacity(COMMAND_QUEUE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> (Self, mpsc::Receiver<EngineCommand>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    pub fn send(&self, command: EngineCommand) -> anyhow::Result<()> {
        self.tx.try_send(command).map_err(|e| match e {
            TrySendError::Full(command) => {
                tracing::warn!("引擎指令队列已满 ({})", self.tx.max_capacity());
                anyhow::anyhow!("engine command queue full, dropped {:?}", command)
            }
            TrySendError::Closed(command) => {
                anyhow::anyhow!("engine link closed, dropped {:?}", command)
            }
        })
    }
}

impl TransferEngine for EngineLink {
    fn accept(&self, transfer: &str, destination: &Path, file: Option<&str>) -> anyhow::Result<()> {
        self.send(EngineCommand::Accept {
            transfer: transfer.to_string(),
            destination: destination.to_path_buf(),
            file: file.map(str::to_string),
        })
    }

    fn cancel_file(&self, transfer: &str, file: &str) -> anyhow::Result<()> {
        self.send(EngineCommand::CancelFile {
            transfer: transfer.to_string(),
            file: file.to_string(),
        })
    }

    fn finalize(&self, transfer: &str) -> anyhow::Result<()> {
        self.send(EngineCommand::Cancel {
            transfer: transfer.to_string(),
        })
    }
}

pub async fn run_engine_server(
    manager: Arc<EventManager>,
    mut commands: mpsc::Receiver<EngineCommand>,
) -> Result<()> {
    let path = engine_socket_path();

    // 删除旧的 socket 文件
    let _ = std::fs::remove_file(&path);

    let listener = UnixListener::bind(&path)?;
    tracing::info!("引擎通道已启动: {:?}", path);

    // 同一时间只服务一个引擎连接
    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                tracing::info!("传输引擎已连接");
                if let Err(e) = serve_engine(stream, &manager, &mut commands).await {
                    tracing::warn!("引擎连接出错: {:#}", e);
                }
                tracing::info!("传输引擎已断开");
            }
            Err(e) => {
                tracing::warn!("接受连接失败: {}", e);
            }
        }
    }
}

async fn serve_engine(
    stream: UnixStream,
    manager: &Arc<EventManager>,
    commands: &mut mpsc::Receiver<EngineCommand>,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    return Ok(());
                };
                if line.trim().is_empty() {
                    continue;
                }
                // 事件处理是同步的，等待完成后再读下一条以保持顺序
                let manager = manager.clone();
                tokio::task::spawn_blocking(move || manager.handle_event(&line)).await?;
            }
            command = commands.recv() => {
                let Some(command) = command else {
                    return Ok(());
                };
                tracing::debug!("下发引擎指令: {:?}", command);
                writer.write_all(serde_json::to_string(&command)?.as_bytes()).await?;
                writer.write_all(b"\n").await?;
            }
        }
    }
}
