//! 传输引擎接口
//!
//! 实际的收发由外部引擎完成，这里只定义本模块需要下发的指令。

use std::path::Path;

pub trait TransferEngine: Send + Sync {
    /// 开始接收；`file` 为 `None` 表示接收整个传输
    fn accept(&self, transfer: &str, destination: &Path, file: Option<&str>) -> anyhow::Result<()>;

    /// 取消单个文件
    fn cancel_file(&self, transfer: &str, file: &str) -> anyhow::Result<()>;

    /// 释放引擎侧资源，每个传输最多调用一次
    fn finalize(&self, transfer: &str) -> anyhow::Result<()>;
}
