//! IPC Server - Unix Domain Socket 通信

use crate::service::Service;
use anyhow::Result;
use meshdrop_core::ipc::socket_path;
use meshdrop_core::{EventManager, IpcRequest, IpcResponse, Progress};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;

pub async fn run_ipc_server(service: Arc<Service>) -> Result<()> {
    let path = socket_path();

    // 删除旧的 socket 文件
    let _ = std::fs::remove_file(&path);

    let listener = UnixListener::bind(&path)?;
    tracing::info!("IPC 服务器已启动: {:?}", path);

    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                let service = service.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_client(stream, service).await {
                        tracing::debug!("客户端连接结束: {:#}", e);
                    }
                });
            }
            Err(e) => {
                tracing::warn!("接受连接失败: {}", e);
            }
        }
    }
}

async fn write_response<W: AsyncWrite + Unpin>(writer: &mut W, response: &IpcResponse) -> Result<()> {
    writer
        .write_all(serde_json::to_string(response)?.as_bytes())
        .await?;
    writer.write_all(b"\n").await?;
    Ok(())
}

async fn handle_client(stream: UnixStream, service: Arc<Service>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    while reader.read_line(&mut line).await? > 0 {
        let request: IpcRequest = match serde_json::from_str(&line) {
            Ok(req) => req,
            Err(e) => {
                let resp = IpcResponse::error(format!("Invalid request: {}", e));
                write_response(&mut writer, &resp).await?;
                line.clear();
                continue;
            }
        };

        match request {
            IpcRequest::Watch { id } => watch(&service.manager(), &id, &mut writer).await?,
            request => {
                // 管理器内部使用同步锁，放到阻塞线程池执行
                let service = service.clone();
                let response = tokio::task::spawn_blocking(move || service.handle(request)).await?;
                write_response(&mut writer, &response).await?;
            }
        }
        line.clear();
    }

    Ok(())
}

/// 推送进度直到传输结束或订阅被替换
async fn watch<W: AsyncWrite + Unpin>(
    manager: &EventManager,
    id: &str,
    writer: &mut W,
) -> Result<()> {
    tracing::debug!("开始推送进度: {}", id);

    let mut rx = match manager.subscribe(id) {
        Ok(rx) => rx,
        Err(e) => return write_response(writer, &IpcResponse::error(e)).await,
    };

    // 客户端断开时写入失败，同样要释放订阅
    let result = stream_progress(manager, id, &mut rx, writer).await;
    manager.unsubscribe(id, rx);
    tracing::debug!("停止推送进度: {}", id);
    result
}

async fn stream_progress<W: AsyncWrite + Unpin>(
    manager: &EventManager,
    id: &str,
    rx: &mut mpsc::Receiver<Progress>,
    writer: &mut W,
) -> Result<()> {
    // 订阅之后再取快照，订阅前已结束的传输不会漏掉最终状态
    let snapshot = match manager.transfer(id) {
        Ok(transfer) => IpcResponse::from(transfer.progress()),
        Err(e) => IpcResponse::error(e),
    };
    write_response(writer, &snapshot).await?;
    if snapshot.ends_stream() {
        return Ok(());
    }

    while let Some(progress) = rx.recv().await {
        let response = IpcResponse::from(progress);
        write_response(writer, &response).await?;
        if response.ends_stream() {
            return Ok(());
        }
    }

    // 订阅被新的 watch 替换
    write_response(writer, &IpcResponse::error("watch superseded")).await
}
