use log::{debug, info, warn};
use reqwest::Client;
use url::Url;

use crate::error::{Error, Result};
use crate::location;

const EXT_X_STREAM_INF: &str = "#EXT-X-STREAM-INF";

/// 主播放列表嵌套的最大层数
pub const MAX_PLAYLIST_DEPTH: usize = 8;

/// 从一个URL获取到的播放列表原始行
#[derive(Debug, Clone)]
pub struct Manifest {
    pub url: Url,
    pub lines: Vec<String>,
}

impl Manifest {
    pub fn new(url: Url, content: &str) -> Self {
        Self {
            url,
            lines: content.lines().map(|l| l.trim().to_string()).collect(),
        }
    }

    /// 当前播放列表所在目录，用于解析其中的相对地址
    pub fn base_url(&self) -> String {
        location::base_url(&self.url)
    }

    /// 含有带 BANDWIDTH 属性的变体流标签即视为主播放列表
    pub fn is_master(&self) -> bool {
        self.lines.iter().any(|line| {
            line.starts_with(EXT_X_STREAM_INF)
                && attributes(line).iter().any(|(k, _)| k == "BANDWIDTH")
        })
    }

    /// 提取所有带 BANDWIDTH 的变体流
    pub fn variants(&self) -> Vec<Variant> {
        let mut variants = Vec::new();
        let mut lines = self.lines.iter();

        while let Some(line) = lines.next() {
            if !line.starts_with(EXT_X_STREAM_INF) {
                continue;
            }
            let Some(raw) = attributes(line)
                .into_iter()
                .find(|(k, _)| k == "BANDWIDTH")
                .map(|(_, v)| v)
            else {
                continue;
            };
            let bandwidth = raw.parse::<u64>().unwrap_or_else(|_| {
                warn!("Unparseable bandwidth {:?}, counting as 0", raw);
                0
            });

            match lines.by_ref().find(|l| !l.is_empty() && !l.starts_with('#')) {
                Some(uri) => variants.push(Variant {
                    bandwidth,
                    uri: uri.clone(),
                }),
                None => warn!("Variant with bandwidth {} has no URI", bandwidth),
            }
        }

        variants
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variant {
    pub bandwidth: u64,
    pub uri: String,
}

/// 选出带宽最高的变体；带宽相同时保留最先出现的那个
pub fn select_variant(variants: &[Variant]) -> Option<&Variant> {
    variants.iter().fold(None, |best, v| match best {
        Some(b) if b.bandwidth >= v.bandwidth => Some(b),
        _ => Some(v),
    })
}

/// 解析标签的属性列表，引号内的逗号不作为分隔符，返回值去掉引号
pub fn attributes(tag_line: &str) -> Vec<(String, String)> {
    let Some((_, list)) = tag_line.split_once(':') else {
        return Vec::new();
    };

    let mut attrs = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut fields = Vec::new();

    for c in list.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                field.push(c);
            }
            ',' if !quoted => fields.push(std::mem::take(&mut field)),
            _ => field.push(c),
        }
    }
    fields.push(field);

    for field in fields {
        if let Some((k, v)) = field.split_once('=') {
            let v = v.trim();
            let v = v
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(v);
            attrs.push((k.trim().to_string(), v.to_string()));
        }
    }

    attrs
}

/// 获取并解析M3U8播放列表，遇到主播放列表时选择最高码率继续解析
pub struct PlaylistResolver {
    client: Client,
}

impl PlaylistResolver {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// 返回最终的媒体播放列表；其 `base_url()` 始终是该列表自身所在的目录
    pub async fn resolve(&self, url: &str) -> Result<Manifest> {
        let mut url = location::parse(url)?;

        for _ in 0..MAX_PLAYLIST_DEPTH {
            let manifest = self.fetch(url).await?;
            if !manifest.is_master() {
                info!("Media playlist found at {}", manifest.url);
                return Ok(manifest);
            }

            let variants = manifest.variants();
            let best = select_variant(&variants).ok_or_else(|| Error::NoVariants {
                url: manifest.url.clone(),
            })?;
            info!(
                "Found master playlist, fetching highest stream at {}Kb/s",
                best.bandwidth / 1024
            );
            url = location::resolve(&manifest.base_url(), &best.uri)?;
        }

        Err(Error::PlaylistTooDeep {
            url,
            depth: MAX_PLAYLIST_DEPTH,
        })
    }

    async fn fetch(&self, url: Url) -> Result<Manifest> {
        debug!("Fetching playlist from {}", url);

        let fail = |source| Error::ManifestFetch {
            url: url.clone(),
            source,
        };
        let content = self
            .client
            .get(url.clone())
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(fail)?
            .text()
            .await
            .map_err(fail)?;

        Ok(Manifest::new(url, &content))
    }
}
