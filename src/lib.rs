pub mod cli;
pub mod crypto;
pub mod downloader;
pub mod error;
pub mod http;
pub mod key;
pub mod location;
pub mod merger;
pub mod playlist;
pub mod segment;

use anyhow::{Context, Result};
use indicatif::ProgressBar;
use log::info;
use std::time::Duration;

use crate::cli::Args;
use crate::crypto::CryptoContext;
use crate::downloader::{Assembler, Assembly};
use crate::http::build_http_client;
use crate::playlist::PlaylistResolver;

pub use crate::error::{Error, SegmentError};

/// 解析命令行给出的16字节密钥
pub fn parse_key_override(raw: &str) -> Result<[u8; 16], Error> {
    let raw = raw.trim();
    let digits = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .unwrap_or(raw);
    let mut key = [0u8; 16];
    hex::decode_to_slice(digits, &mut key).map_err(|_| Error::InvalidKeyOverride(raw.to_string()))?;
    Ok(key)
}

/// 运行M3U8下载器的主要逻辑
pub async fn run(args: Args, progress: ProgressBar) -> Result<Assembly> {
    let key_override = args.key.as_deref().map(parse_key_override).transpose()?;
    let client = build_http_client(
        &args.headers,
        args.cookie.as_deref(),
        Duration::from_secs(args.timeout),
    )?;

    let manifest = PlaylistResolver::new(client.clone())
        .resolve(&args.url)
        .await
        .context("Failed to resolve playlist")?;

    let segments = segment::enumerate(&manifest).context("Failed to read media playlist")?;
    let encrypted = segments.iter().filter(|s| s.key.is_encrypted()).count();
    info!(
        "Found {} segments ({} encrypted).",
        segments.len(),
        encrypted
    );

    let crypto = CryptoContext::new(client.clone(), key_override);
    let assembly = Assembler::new(client, crypto)
        .with_progress(progress)
        .assemble(segments, &args.output)
        .await?;

    info!("Done. {} segments written to {}", assembly.written, assembly.path.display());
    Ok(assembly)
}
