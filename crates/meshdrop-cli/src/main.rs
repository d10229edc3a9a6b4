//! Meshdrop CLI
//!
//! 命令行客户端，通过 Unix Socket 与守护进程通信

mod client;

use anyhow::Result;
use clap::{Parser, Subcommand};
use meshdrop_core::transfer::tree;
use meshdrop_core::{ActionKey, Direction, IpcRequest, IpcResponse, Transfer};
use std::io::Write;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "meshdrop", version, about = "Meshdrop - VPN 网内文件共享")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 列出所有传输
    List,
    /// 查看传输详情
    Get {
        /// 传输 ID
        id: String,
    },
    /// 发送文件或目录
    Send {
        /// 对端 VPN 地址
        peer: String,
        /// 要发送的路径
        path: PathBuf,
    },
    /// 接受收到的传输
    Accept {
        /// 传输 ID
        id: String,
        /// 保存目录 (默认: 配置中的下载目录)
        #[arg(short, long)]
        path: Option<PathBuf>,
        /// 只接受指定文件或目录 (可重复)
        #[arg(short, long = "file")]
        files: Vec<String>,
    },
    /// 取消传输或其中的单个文件
    Cancel {
        /// 传输 ID
        id: String,
        /// 只取消该文件
        #[arg(short, long)]
        file: Option<String>,
    },
    /// 实时查看传输进度
    Watch {
        /// 传输 ID
        id: String,
    },
    /// 触发通知按钮动作
    Action {
        /// 通知 ID
        notification_id: u32,
        /// accept-transfer / cancel-transfer / open-file
        action: ActionKey,
    },
}

fn direction_icon(direction: Direction) -> &'static str {
    match direction {
        Direction::Incoming => "📥",
        Direction::Outgoing => "📤",
    }
}

fn print_transfer(transfer: &Transfer) {
    println!(
        "{} {} [{}] {}%",
        direction_icon(transfer.direction),
        transfer.id,
        transfer.status,
        transfer.percentage()
    );
    println!("   对端: {}", transfer.peer);
    if let Some(path) = &transfer.path {
        println!("   路径: {}", path.display());
    }
    for (path, file) in tree::leaves(&transfer.files) {
        println!("   - {} ({} bytes) [{}]", path, file.size, file.status);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::List => {
            let resp = client::send_request(IpcRequest::List).await?;
            if let IpcResponse::Transfers { transfers } = resp {
                if transfers.is_empty() {
                    println!("   没有传输记录");
                } else {
                    for t in &transfers {
                        println!(
                            "{} {} [{}] {} ({}%)",
                            direction_icon(t.direction),
                            t.id,
                            t.status,
                            t.peer,
                            t.percentage()
                        );
                    }
                }
            }
        }
        Commands::Get { id } => {
            let resp = client::send_request(IpcRequest::Get { id }).await?;
            if let IpcResponse::Transfer { transfer } = resp {
                print_transfer(&transfer);
            }
        }
        Commands::Send { peer, path } => {
            println!("📤 发送: {} -> {}", path.display(), peer);
            // 守护进程按自身工作目录解析路径
            let path = std::path::absolute(&path)?;
            client::send_request(IpcRequest::Send { peer, path }).await?;
        }
        Commands::Accept { id, path, files } => {
            let path = path.map(|p| std::path::absolute(&p)).transpose()?;
            let resp = client::send_request(IpcRequest::Accept { id, path, files }).await?;
            if let IpcResponse::Transfer { transfer } = resp {
                println!("✅ 已接受");
                print_transfer(&transfer);
            }
        }
        Commands::Cancel { id, file } => {
            let request = match file {
                Some(file) => IpcRequest::CancelFile { id, file },
                None => IpcRequest::Cancel { id },
            };
            client::send_request(request).await?;
        }
        Commands::Watch { id } => {
            let last = client::watch(&id, |update| {
                if let IpcResponse::Progress {
                    status,
                    transferred,
                } = update
                {
                    print!("\r⏳ {}% [{}]", transferred, status);
                    let _ = std::io::stdout().flush();
                }
            })
            .await?;
            if let IpcResponse::Progress {
                status,
                transferred,
            } = last
            {
                println!("\r🏁 {}% [{}]", transferred, status);
            }
        }
        Commands::Action {
            notification_id,
            action,
        } => {
            client::send_request(IpcRequest::NotificationAction {
                notification_id,
                action,
            })
            .await?;
        }
    }

    Ok(())
}
