//! # Output Directory Module / 输出目录模块
//!
//! The engine-provided directory file artifacts are published into. Each
//! node gets its own subdirectory derived from a sanitized form of its
//! identifier, and every published artifact is validated to be a plain file
//! or directory lying directly under that subdirectory.
//!
//! 引擎提供的、用于发布文件产物的目录。每个节点得到一个由其标识符
//! 净化形式派生的子目录，并且每个发布的产物都会被校验为
//! 直接位于该子目录下的普通文件或目录。

use anyhow::{Context, Result, bail};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use crate::core::descriptor::UniqueId;

/// Owns the output root for a run. When backed by a temporary directory,
/// the directory on disk is deleted when this provider is dropped.
/// 拥有一次运行的输出根目录。当由临时目录支撑时，
/// 此提供者被丢弃时磁盘上的目录会被删除。
pub struct OutputDirProvider {
    /// Keeps the temp dir alive for temp-backed providers.
    /// 为临时目录支撑的提供者保持临时目录存活。
    _temp_root: Option<TempDir>,
    root: PathBuf,
}

impl std::fmt::Debug for OutputDirProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputDirProvider")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl OutputDirProvider {
    /// Uses an explicit directory, creating it if needed.
    pub fn at(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create output root: {}", root.display()))?;
        Ok(Self {
            _temp_root: None,
            root,
        })
    }

    /// Uses a fresh temporary directory, removed when the provider drops.
    pub fn temporary() -> Result<Self> {
        let temp_dir = tempfile::tempdir().context("failed to create temporary output root")?;
        let root = temp_dir.path().to_path_buf();
        Ok(Self {
            _temp_root: Some(temp_dir),
            root,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The per-node output directory, created on first use.
    /// 每节点的输出目录，首次使用时创建。
    pub fn node_dir(&self, id: &UniqueId) -> Result<PathBuf> {
        let dir = self.root.join(sanitize(&id.to_string()));
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create node output dir: {}", dir.display()))?;
        Ok(dir)
    }

    /// Publishes one named artifact under the node's directory.
    ///
    /// The requested name must not contain a path separator; after `writer`
    /// runs, the produced path must exist and be a plain file or directory
    /// lying directly under the node directory.
    ///
    /// 在节点目录下发布一个命名产物。
    ///
    /// 请求的名称不得包含路径分隔符；`writer` 运行后，
    /// 产生的路径必须存在，且是直接位于节点目录下的普通文件或目录。
    pub fn publish<F>(&self, id: &UniqueId, name: &str, writer: F) -> Result<PathBuf>
    where
        F: FnOnce(&Path) -> Result<()>,
    {
        if name.is_empty() {
            bail!("artifact name must not be empty");
        }
        // "." and ".." pass a lexical parent check while resolving to the
        // node dir itself or the output root.
        if name == "." || name == ".." {
            bail!("artifact name \"{name}\" does not name an artifact");
        }
        if name.contains('/') || name.contains('\\') || name.contains(std::path::MAIN_SEPARATOR) {
            bail!("artifact name \"{name}\" must not contain a path separator");
        }

        let node_dir = self.node_dir(id)?;
        let target = node_dir.join(name);
        writer(&target).with_context(|| format!("failed to write artifact \"{name}\""))?;

        let metadata = fs::symlink_metadata(&target)
            .with_context(|| format!("published artifact \"{name}\" was not created"))?;
        if !metadata.is_file() && !metadata.is_dir() {
            bail!("published artifact \"{name}\" is neither a plain file nor a directory");
        }
        let canonical_target = target
            .canonicalize()
            .with_context(|| format!("published artifact \"{name}\" cannot be resolved"))?;
        let canonical_node_dir = node_dir
            .canonicalize()
            .context("node output dir cannot be resolved")?;
        match canonical_target.parent() {
            Some(parent) if parent == canonical_node_dir => {}
            _ => bail!("published artifact \"{name}\" escaped the node output directory"),
        }
        Ok(target)
    }
}

/// Keeps identifiers filesystem-safe, one directory name per node.
/// 保持标识符对文件系统安全，每个节点一个目录名。
fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_id() -> UniqueId {
        UniqueId::root("engine", "run").child("test", "artifacts")
    }

    #[test]
    fn publishes_a_plain_file_under_the_node_dir() {
        let provider = OutputDirProvider::temporary().unwrap();
        let path = provider
            .publish(&sample_id(), "log.txt", |target| {
                fs::write(target, "hello").map_err(Into::into)
            })
            .unwrap();
        assert!(path.is_file());
        assert!(path.starts_with(provider.root()));
    }

    #[test]
    fn rejects_names_that_resolve_outside_the_node_dir() {
        let provider = OutputDirProvider::temporary().unwrap();
        for name in [".", ".."] {
            let result = provider.publish(&sample_id(), name, |target| {
                fs::write(target.join("escaped.txt"), "x").map_err(Into::into)
            });
            assert!(result.is_err(), "name {name:?} must be rejected");
        }
        // Nothing landed in the output root either.
        assert!(!provider.root().join("escaped.txt").exists());
    }

    #[test]
    fn rejects_names_with_path_separators() {
        let provider = OutputDirProvider::temporary().unwrap();
        let result = provider.publish(&sample_id(), "nested/log.txt", |_| Ok(()));
        assert!(result.is_err());
    }

    #[test]
    fn rejects_artifacts_the_writer_never_created() {
        let provider = OutputDirProvider::temporary().unwrap();
        let result = provider.publish(&sample_id(), "ghost.txt", |_| Ok(()));
        assert!(result.is_err());
    }

    #[test]
    fn node_dirs_are_distinct_per_identifier() {
        let provider = OutputDirProvider::temporary().unwrap();
        let a = provider.node_dir(&UniqueId::root("engine", "a")).unwrap();
        let b = provider.node_dir(&UniqueId::root("engine", "b")).unwrap();
        assert_ne!(a, b);
    }
}
