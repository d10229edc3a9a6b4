//! 文件树操作
//!
//! 完整路径 = 祖先 id 以 `/` 连接。遍历顺序为深度优先、先父后子，
//! 与引擎给出的顺序一致，保证聚合计算的确定性。

use super::{FileNode, Status};

fn join_path(prefix: &str, id: &str) -> String {
    if prefix.is_empty() {
        id.to_string()
    } else {
        format!("{prefix}/{id}")
    }
}

/// `path` 是否为 `target` 的祖先目录
fn is_ancestor(path: &str, target: &str) -> bool {
    target
        .strip_prefix(path)
        .is_some_and(|rest| rest.starts_with('/'))
}

/// 展开文件树，返回所有节点（含目录）及其完整路径
pub fn flatten(files: &[FileNode]) -> Vec<(String, &FileNode)> {
    fn walk<'a>(nodes: &'a [FileNode], prefix: &str, out: &mut Vec<(String, &'a FileNode)>) {
        for node in nodes {
            let path = join_path(prefix, &node.id);
            out.push((path.clone(), node));
            walk(&node.children, &path, out);
        }
    }

    let mut out = Vec::new();
    walk(files, "", &mut out);
    out
}

/// 只返回叶子节点
pub fn leaves(files: &[FileNode]) -> Vec<(String, &FileNode)> {
    flatten(files)
        .into_iter()
        .filter(|(_, node)| node.is_leaf())
        .collect()
}

/// 统计叶子节点数量
pub fn count_leaves(files: &[FileNode]) -> u64 {
    files
        .iter()
        .map(|node| {
            if node.is_leaf() {
                1
            } else {
                count_leaves(&node.children)
            }
        })
        .sum()
}

/// 按完整路径查找节点
pub fn find<'a>(files: &'a [FileNode], path: &str) -> Option<&'a FileNode> {
    flatten(files)
        .into_iter()
        .find(|(full_path, _)| full_path == path)
        .map(|(_, node)| node)
}

/// 按完整路径查找节点（可变）
pub fn find_mut<'a>(files: &'a mut [FileNode], path: &str) -> Option<&'a mut FileNode> {
    fn walk<'a>(
        nodes: &'a mut [FileNode],
        prefix: &str,
        target: &str,
    ) -> Option<&'a mut FileNode> {
        for node in nodes.iter_mut() {
            let path = join_path(prefix, &node.id);
            if path == target {
                return Some(node);
            }
            if is_ancestor(&path, target)
                && let Some(found) = walk(&mut node.children, &path, target)
            {
                return Some(found);
            }
        }
        None
    }

    walk(files, "", path)
}

/// 设置叶子状态，路径不存在时静默忽略
///
/// 引擎可能上报已移除或未知的文件，返回值表示是否找到。
pub fn set_status(files: &mut [FileNode], path: &str, status: Status) -> bool {
    match find_mut(files, path) {
        Some(node) => {
            node.status = status;
            true
        }
        None => false,
    }
}

/// 将所有叶子设置为同一状态
pub fn set_all_status(files: &mut [FileNode], status: Status) {
    for node in files {
        if node.is_leaf() {
            node.status = status;
        } else {
            set_all_status(&mut node.children, status);
        }
    }
}

/// 将所有未结束的叶子设置为指定状态
pub fn resolve_pending(files: &mut [FileNode], status: Status) {
    for node in files {
        if node.is_leaf() {
            if !node.status.is_terminal() {
                node.status = status;
            }
        } else {
            resolve_pending(&mut node.children, status);
        }
    }
}

/// 节点下所有叶子的大小之和
pub fn leaf_size(node: &FileNode) -> u64 {
    if node.is_leaf() {
        node.size
    } else {
        node.children.iter().map(leaf_size).sum()
    }
}

/// 整棵树的叶子大小之和
pub fn total_size(files: &[FileNode]) -> u64 {
    files.iter().map(leaf_size).sum()
}

/// 节点下所有叶子的完整路径
pub fn leaf_paths(node: &FileNode, path: &str) -> Vec<String> {
    if node.is_leaf() {
        return vec![path.to_string()];
    }
    node.children
        .iter()
        .flat_map(|child| leaf_paths(child, &join_path(path, &child.id)))
        .collect()
}

/// 根据所有叶子状态计算传输聚合状态
///
/// - 仍有未结束的叶子：保持 `current`
/// - 全部取消：`Canceled`
/// - 任一失败：`FinishedWithErrors`
/// - 其余（成功，可能夹杂取消）：`Success`
pub fn aggregate_status(files: &[FileNode], current: Status) -> Status {
    let leaves = leaves(files);
    if leaves.is_empty() {
        return current;
    }

    let mut all_canceled = true;
    let mut any_failure = false;
    for (_, leaf) in &leaves {
        if !leaf.status.is_terminal() {
            return current;
        }
        all_canceled &= leaf.status == Status::Canceled;
        any_failure |= leaf.status.is_failure();
    }

    if all_canceled {
        Status::Canceled
    } else if any_failure {
        Status::FinishedWithErrors
    } else {
        Status::Success
    }
}
