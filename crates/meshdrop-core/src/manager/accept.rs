//! 接受传输

use super::EventManager;
use crate::error::{FileshareError, Result};
use crate::transfer::{tree, Direction, FileNode, Status, Transfer};
use log::{error, info};
use std::collections::BTreeSet;
use std::path::PathBuf;

impl EventManager {
    /// 接受收到的传输
    ///
    /// `files` 为空时接受全部文件，否则只接受列出的文件（目录包含其下所有文件），
    /// 其余文件标记为已取消。状态检查与切换在同一临界区内完成，
    /// 并发调用时只有一个会成功。
    pub fn accept_transfer(
        &self,
        id: &str,
        path: impl Into<PathBuf>,
        files: &[String],
        size_limit: u64,
    ) -> Result<Transfer> {
        let path = path.into();

        let accepted = self
            .registry
            .update(id, |t| {
                if t.direction == Direction::Outgoing {
                    return Err(FileshareError::TransferAcceptOutgoing);
                }
                if t.status != Status::Requested {
                    return Err(FileshareError::TransferAlreadyAccepted);
                }

                let selected = if files.is_empty() {
                    None
                } else {
                    Some(select_leaves(&t.files, files)?)
                };

                let size: u64 = match &selected {
                    None => tree::total_size(&t.files),
                    Some(selected) => tree::leaves(&t.files)
                        .into_iter()
                        .filter(|(leaf_path, _)| selected.contains(leaf_path))
                        .map(|(_, node)| node.size)
                        .sum(),
                };
                if size > size_limit {
                    return Err(FileshareError::SizeLimitExceeded);
                }

                if let Some(selected) = &selected {
                    let skipped: Vec<String> = tree::leaves(&t.files)
                        .into_iter()
                        .map(|(leaf_path, _)| leaf_path)
                        .filter(|leaf_path| !selected.contains(leaf_path))
                        .collect();
                    for leaf_path in skipped {
                        tree::set_status(&mut t.files, &leaf_path, Status::Canceled);
                    }
                }

                t.path = Some(path.clone());
                t.status = Status::Ongoing;
                Ok(t.clone())
            })
            .ok_or(FileshareError::TransferNotFound)??;

        info!("Accepted transfer {id} into {}", path.display());

        if files.is_empty() {
            if let Err(e) = self.engine.accept(id, &path, None) {
                error!("Engine failed to accept transfer {id}: {e:#}");
            }
        } else {
            for file in files {
                if let Err(e) = self.engine.accept(id, &path, Some(file)) {
                    error!("Engine failed to accept {file} in {id}: {e:#}");
                }
            }
        }

        Ok(accepted)
    }
}

/// 将请求的文件 / 目录展开为叶子路径集合
fn select_leaves(files: &[FileNode], requested: &[String]) -> Result<BTreeSet<String>> {
    let mut selected = BTreeSet::new();
    for path in requested {
        let node = tree::find(files, path).ok_or(FileshareError::FileNotFound)?;
        selected.extend(tree::leaf_paths(node, path));
    }
    Ok(selected)
}
