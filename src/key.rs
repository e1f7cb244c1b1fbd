use log::warn;
use url::Url;

use crate::error::Result;
use crate::location;
use crate::playlist::attributes;

pub const EXT_X_KEY: &str = "#EXT-X-KEY";

/// 加密指令，从出现位置开始作用于后续所有分段，直到被新的指令覆盖
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum KeyDirective {
    #[default]
    None,
    Aes128 {
        uri: Url,
        iv: Option<[u8; 16]>,
    },
}

impl KeyDirective {
    pub fn is_encrypted(&self) -> bool {
        matches!(self, KeyDirective::Aes128 { .. })
    }
}

/// 解析 `#EXT-X-KEY` 标签
///
/// 无法识别的加密方式、缺少URI或IV格式错误时降级为不加密并记录警告，
/// 只有URI本身无法解析时才返回错误。
pub fn parse(tag_line: &str, base: &str) -> Result<KeyDirective> {
    let attrs = attributes(tag_line);
    let get = |name: &str| {
        attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    };

    match get("METHOD") {
        Some("NONE") => Ok(KeyDirective::None),
        Some("AES-128") => {
            let Some(uri) = get("URI") else {
                warn!("AES-128 key tag without URI, treating as unencrypted: {}", tag_line);
                return Ok(KeyDirective::None);
            };
            let iv = match get("IV") {
                Some(raw) => match parse_iv(raw) {
                    Some(iv) => Some(iv),
                    None => {
                        warn!("Invalid IV {:?}, treating as unencrypted", raw);
                        return Ok(KeyDirective::None);
                    }
                },
                None => None,
            };
            let uri = location::resolve(base, uri)?;
            Ok(KeyDirective::Aes128 { uri, iv })
        }
        other => {
            warn!(
                "Unsupported key method {:?}, treating as unencrypted",
                other.unwrap_or("<missing>")
            );
            Ok(KeyDirective::None)
        }
    }
}

/// `0x` 开头的十六进制数，按大端补齐到16字节
fn parse_iv(raw: &str) -> Option<[u8; 16]> {
    let digits = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))?;
    if digits.is_empty() || digits.len() > 32 {
        return None;
    }
    let padded = format!("{:0>32}", digits);
    let mut iv = [0u8; 16];
    hex::decode_to_slice(padded, &mut iv).ok()?;
    Some(iv)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "http://cdn.example.com/vod/hi/";

    #[test]
    fn aes_with_explicit_iv() {
        let directive = parse(
            r#"#EXT-X-KEY:METHOD=AES-128,URI="key.bin",IV=0x000102030405060708090a0b0c0d0e0f"#,
            BASE,
        )
        .unwrap();

        let expected_iv: [u8; 16] = core::array::from_fn(|i| i as u8);
        assert_eq!(
            directive,
            KeyDirective::Aes128 {
                uri: Url::parse("http://cdn.example.com/vod/hi/key.bin").unwrap(),
                iv: Some(expected_iv),
            }
        );
    }

    #[test]
    fn aes_without_iv() {
        let directive = parse(
            r#"#EXT-X-KEY:METHOD=AES-128,URI="https://keys.example.net/k?id=1,2""#,
            BASE,
        )
        .unwrap();
        match directive {
            KeyDirective::Aes128 { uri, iv } => {
                assert_eq!(uri.as_str(), "https://keys.example.net/k?id=1,2");
                assert!(iv.is_none());
            }
            other => panic!("unexpected directive {:?}", other),
        }
    }

    #[test]
    fn short_iv_is_left_padded() {
        assert_eq!(parse_iv("0x1"), Some({
            let mut iv = [0u8; 16];
            iv[15] = 1;
            iv
        }));
        assert_eq!(parse_iv("1234"), None);
        assert_eq!(parse_iv("0xzz"), None);
    }

    #[test]
    fn none_method() {
        assert_eq!(parse("#EXT-X-KEY:METHOD=NONE", BASE).unwrap(), KeyDirective::None);
    }

    #[test]
    fn unknown_method_downgrades_to_none() {
        let directive = parse(r#"#EXT-X-KEY:METHOD=SAMPLE-AES,URI="skd://k""#, BASE).unwrap();
        assert_eq!(directive, KeyDirective::None);

        let directive = parse("#EXT-X-KEY:URI=\"key.bin\"", BASE).unwrap();
        assert_eq!(directive, KeyDirective::None);
    }

    #[test]
    fn aes_without_uri_downgrades_to_none() {
        assert_eq!(parse("#EXT-X-KEY:METHOD=AES-128", BASE).unwrap(), KeyDirective::None);
    }
}
