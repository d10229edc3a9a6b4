//! IPC Client - 与守护进程通信

use anyhow::Result;
use meshdrop_core::ipc::socket_path;
use meshdrop_core::{IpcRequest, IpcResponse};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::UnixStream;
use tokio::net::unix::OwnedReadHalf;

async fn connect(request: &IpcRequest) -> Result<Lines<BufReader<OwnedReadHalf>>> {
    let path = socket_path();

    let stream = match UnixStream::connect(&path).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("❌ 无法连接到守护进程: {}", e);
            eprintln!("   请确保 meshdrop-daemon 正在运行");
            eprintln!("   运行: cargo xtask dev");
            return Err(e.into());
        }
    };

    let (reader, mut writer) = stream.into_split();

    // 发送请求
    let json = serde_json::to_string(request)?;
    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\n").await?;

    Ok(BufReader::new(reader).lines())
}

fn report(response: &IpcResponse) {
    match response {
        IpcResponse::Ok { message } => println!("✅ {}", message),
        IpcResponse::Error { message } => eprintln!("❌ {}", message),
        _ => {}
    }
}

pub async fn send_request(request: IpcRequest) -> Result<IpcResponse> {
    let mut lines = connect(&request).await?;

    // 读取响应
    let line = lines
        .next_line()
        .await?
        .ok_or_else(|| anyhow::anyhow!("守护进程关闭了连接"))?;
    let response: IpcResponse = serde_json::from_str(&line)?;
    report(&response);

    Ok(response)
}

/// 持续读取进度推送，每条响应交给 `on_update`，返回最后一条
pub async fn watch(id: &str, mut on_update: impl FnMut(&IpcResponse)) -> Result<IpcResponse> {
    let mut lines = connect(&IpcRequest::Watch { id: id.to_string() }).await?;

    while let Some(line) = lines.next_line().await? {
        let response: IpcResponse = serde_json::from_str(&line)?;
        if response.ends_stream() {
            report(&response);
            return Ok(response);
        }
        on_update(&response);
    }

    anyhow::bail!("守护进程关闭了连接")
}
