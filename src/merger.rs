use log::debug;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};

use crate::error::{Error, Result};

/// 生成不冲突文件名时的最大尝试次数
pub const MAX_RENAME_ATTEMPTS: usize = 64;

/// 目标文件已存在时，在扩展名前插入 `_` 直到找到一个不存在的路径
pub fn resolve_output_path(path: &Path) -> Result<PathBuf> {
    let mut candidate = path.to_path_buf();

    for _ in 0..MAX_RENAME_ATTEMPTS {
        if !candidate.exists() {
            return Ok(candidate);
        }
        debug!("{:?} already exists", candidate);
        candidate = disambiguate(&candidate);
    }

    Err(Error::OutputPathExhausted {
        path: path.to_path_buf(),
        attempts: MAX_RENAME_ATTEMPTS,
    })
}

fn disambiguate(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{}_.{}", stem, ext.to_string_lossy()),
        None => format!("{}_", stem),
    };
    path.with_file_name(name)
}

/// 以追加方式新建输出文件，绝不覆盖已有文件
pub async fn create_output(path: &Path) -> Result<File> {
    OpenOptions::new()
        .write(true)
        .append(true)
        .create_new(true)
        .open(path)
        .await
        .map_err(|source| Error::Output {
            path: path.to_path_buf(),
            source,
        })
}
