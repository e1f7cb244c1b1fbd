use log::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志系统
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // 解析命令行参数
    let args = m3u8_stitch::cli::parse_args();

    info!("Starting M3U8 downloader...");
    info!("URL: {}", args.url);

    match m3u8_stitch::run(args, m3u8_stitch::downloader::progress_bar()).await {
        Ok(assembly) => {
            if let Some(index) = assembly.skipped {
                info!("Trailing segment {} was unavailable and has been skipped.", index);
            }
        }
        Err(e) => {
            error!("An error occurred: {:#}", e);
            std::process::exit(1);
        }
    }

    Ok(())
}
