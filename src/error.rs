use std::io;
use std::path::PathBuf;
use thiserror::Error;
use url::Url;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// 下载流程中的致命错误
#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed URL {url:?}")]
    MalformedUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("failed to fetch playlist {url}")]
    ManifestFetch {
        url: Url,
        #[source]
        source: reqwest::Error,
    },

    #[error("master playlist {url} lists no usable variant")]
    NoVariants { url: Url },

    #[error("master playlist nesting exceeds {depth} levels at {url}")]
    PlaylistTooDeep { url: Url, depth: usize },

    #[error("failed to fetch key {url}")]
    KeyFetch {
        url: Url,
        #[source]
        source: reqwest::Error,
    },

    #[error("key {url} is {len} bytes, expected 16")]
    InvalidKeyLength { url: Url, len: usize },

    #[error("key override must be 32 hex digits: {0}")]
    InvalidKeyOverride(String),

    #[error("segment {index} / {total} failed")]
    SegmentFetch {
        /// 从1开始计数
        index: usize,
        total: usize,
        #[source]
        source: SegmentError,
    },

    #[error("no free output path derived from {path:?} after {attempts} attempts")]
    OutputPathExhausted { path: PathBuf, attempts: usize },

    #[error("cannot open output file {path:?}")]
    Output {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// 单个分段的下载/解密失败，是否致命由调用方决定
#[derive(Debug, Error)]
pub enum SegmentError {
    #[error("http request failed")]
    Http(#[from] reqwest::Error),

    #[error("decrypt: {0}")]
    Decrypt(String),

    #[error("write failed")]
    Io(#[from] io::Error),
}
