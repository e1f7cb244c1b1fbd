use clap::Parser;
use std::path::PathBuf;

/// Download an HLS (M3U8) stream into a single file, decrypting AES-128 segments.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// The M3U8 URL to download. Master playlists resolve to the highest bitrate.
    #[arg(short, long)]
    pub url: String,

    /// Output file. If it exists, a free name is derived by inserting `_` before the extension.
    #[arg(short, long)]
    pub output: PathBuf,

    /// AES-128 key as 32 hex digits, used instead of fetching key URIs.
    #[arg(short, long)]
    pub key: Option<String>,

    /// Cookie header value sent with every request.
    #[arg(short, long)]
    pub cookie: Option<String>,

    /// Custom HTTP header(s). E.g., -H "Referer: https://example.com/"
    #[arg(short = 'H', long = "header", action = clap::ArgAction::Append)]
    pub headers: Vec<String>,

    /// Request timeout in seconds.
    #[arg(long, default_value_t = 30)]
    pub timeout: u64,
}

pub fn parse_args() -> Args {
    Args::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_command_line() {
        let args = Args::try_parse_from([
            "m3u8_stitch",
            "-u",
            "http://example.com/index.m3u8",
            "-o",
            "out.ts",
            "-c",
            "session=abc",
            "-H",
            "Referer: http://example.com/",
            "-H",
            "X-Test: 1",
        ])
        .unwrap();

        assert_eq!(args.output, PathBuf::from("out.ts"));
        assert_eq!(args.cookie.as_deref(), Some("session=abc"));
        assert_eq!(args.headers.len(), 2);
        assert!(args.key.is_none());
        assert_eq!(args.timeout, 30);
    }

    #[test]
    fn output_is_required() {
        assert!(Args::try_parse_from(["m3u8_stitch", "-u", "http://example.com/a.m3u8"]).is_err());
    }
}
