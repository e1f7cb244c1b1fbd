use std::sync::Arc;
use url::Url;

use crate::error::Result;
use crate::key::{self, KeyDirective, EXT_X_KEY};
use crate::location;
use crate::playlist::Manifest;

/// 一个待下载的分段以及下载时生效的加密指令
#[derive(Debug, Clone)]
pub struct Segment {
    /// 在播放列表中的位置（从0开始），也是默认IV
    pub sequence: usize,
    pub url: Url,
    pub key: Arc<KeyDirective>,
}

/// 按顺序列出媒体播放列表中的分段，每个分段带上其之前最近一次出现的加密指令
pub fn enumerate(manifest: &Manifest) -> Result<Vec<Segment>> {
    let base = manifest.base_url();
    let mut key = Arc::new(KeyDirective::None);
    let mut segments = Vec::new();

    for line in &manifest.lines {
        if line.starts_with(EXT_X_KEY) {
            key = Arc::new(key::parse(line, &base)?);
        } else if !line.is_empty() && !line.starts_with('#') {
            segments.push(Segment {
                sequence: segments.len(),
                url: location::resolve(&base, line)?,
                key: key.clone(),
            });
        }
    }

    Ok(segments)
}
