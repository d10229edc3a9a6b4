//! Meshdrop Daemon
//!
//! 后台守护进程，负责：
//! - 接收传输引擎的事件流并下发引擎指令
//! - 维护传输状态和历史
//! - 通过 Unix Socket 与 CLI 通信

mod engine_link;
mod ipc;
mod notifier;
mod service;

use anyhow::Result;
use meshdrop_core::AppSettings;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = AppSettings::load();

    // 桥接 log crate（meshdrop-core 使用）到 tracing
    let _ = tracing_log::LogTracer::init();

    // 初始化日志，RUST_LOG 优先于配置文件
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(settings.log_level.directive())),
        )
        .try_init();

    tracing::info!("Meshdrop daemon starting...");

    let (engine, commands) = engine_link::EngineLink::new();
    let service = Arc::new(service::Service::new(settings, engine));
    service.restore_history();

    // 启动 IPC 服务器
    let ipc_handle = tokio::spawn(ipc::run_ipc_server(service.clone()));

    // 启动引擎事件通道
    let engine_handle = tokio::spawn(engine_link::run_engine_server(
        service.manager(),
        commands,
    ));

    // 等待任一任务完成
    tokio::select! {
        res = ipc_handle => {
            tracing::error!("IPC server exited: {:?}", res);
        }
        res = engine_handle => {
            tracing::error!("Engine link exited: {:?}", res);
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
        }
    }

    service.shutdown();
    Ok(())
}
