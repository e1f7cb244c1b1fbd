use url::Url;

use crate::error::{Error, Result};

/// 取URL中最后一个 `/` 之前（含）的部分作为基础路径
pub fn base_url(url: &Url) -> String {
    let s = url.as_str();
    match s.rfind('/') {
        Some(pos) => s[..=pos].to_string(),
        None => s.to_string(),
    }
}

/// 解析播放列表中的URI：http(s) 绝对地址原样返回，`/` 开头的按主机根目录解析，
/// 其余拼接到基础路径上
pub fn resolve(base: &str, reference: &str) -> Result<Url> {
    let lower = reference.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        return parse(reference);
    }

    if reference.starts_with('/') {
        let base = parse(base)?;
        return base.join(reference).map_err(|source| Error::MalformedUrl {
            url: format!("{}{}", base, reference),
            source,
        });
    }

    parse(&format!("{}{}", base, reference))
}

pub fn parse(url: &str) -> Result<Url> {
    Url::parse(url).map_err(|source| Error::MalformedUrl {
        url: url.to_string(),
        source,
    })
}
