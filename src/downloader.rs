use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use reqwest::Client;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::crypto::CryptoContext;
use crate::error::{Error, Result, SegmentError};
use crate::merger::{create_output, resolve_output_path};
use crate::segment::Segment;

/// 下载结果；`skipped` 是被容忍的末尾失败分段（1-based）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assembly {
    pub path: PathBuf,
    pub written: usize,
    pub skipped: Option<usize>,
}

/// 按顺序逐个下载、解密分段并追加到同一个输出文件
pub struct Assembler {
    client: Client,
    crypto: CryptoContext,
    progress: ProgressBar,
}

impl Assembler {
    pub fn new(client: Client, crypto: CryptoContext) -> Self {
        Self {
            client,
            crypto,
            progress: ProgressBar::hidden(),
        }
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    /// 只有最后一个分段失败时视为成功，其余失败立即中止
    ///
    /// 失败分段已写入的部分会被截掉，文件始终停在最后一个完整写入的分段末尾。
    pub async fn assemble(&mut self, segments: Vec<Segment>, output: &Path) -> Result<Assembly> {
        let path = resolve_output_path(output)?;
        info!("Download to {}", path.display());
        let mut file = create_output(&path).await?;

        let total = segments.len();
        self.progress.set_length(total as u64);
        let mut report = Assembly {
            path,
            written: 0,
            skipped: None,
        };
        let mut committed: u64 = 0;

        for (i, segment) in segments.into_iter().enumerate() {
            // 切换到 NONE 不会发起请求；密钥下载失败总是致命的
            self.crypto.activate(&segment.key).await?;

            match self.fetch_segment(&segment, &mut file).await {
                Ok(len) => {
                    committed += len;
                    report.written += 1;
                }
                Err(source) => {
                    self.rollback(&mut file, &report.path, committed).await?;
                    if total - i >= 2 {
                        self.progress.abandon();
                        return Err(Error::SegmentFetch {
                            index: i + 1,
                            total,
                            source,
                        });
                    }
                    warn!(
                        "Ignoring failure of trailing segment {}: {:#}",
                        segment.url,
                        anyhow::Error::from(source)
                    );
                    report.skipped = Some(i + 1);
                }
            }
            self.progress.inc(1);
        }

        self.progress.finish();
        Ok(report)
    }

    /// 截掉失败分段已写入的字节
    async fn rollback(&self, file: &mut File, path: &Path, committed: u64) -> Result<()> {
        file.set_len(committed).await.map_err(|source| Error::Output {
            path: path.to_path_buf(),
            source,
        })
    }

    /// 返回写入的字节数
    async fn fetch_segment(&self, segment: &Segment, file: &mut File) -> Result<u64, SegmentError> {
        debug!("Downloading segment {}", segment.url);

        let response = self
            .client
            .get(segment.url.clone())
            .send()
            .await?
            .error_for_status()?;

        let body = self
            .crypto
            .decrypt_stream(response.bytes_stream(), segment.sequence);
        futures::pin_mut!(body);

        let mut written = 0u64;
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        Ok(written)
    }
}

/// 终端进度条，显示为 `N / total`
pub fn progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos} / {len} ({eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    pb
}
