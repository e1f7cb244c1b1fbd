use aes::cipher::block_padding::{NoPadding, Pkcs7};
use aes::cipher::{BlockDecryptMut, KeyIvInit};
use aes::Aes128;
use bytes::{Bytes, BytesMut};
use cbc::Decryptor;
use futures::stream::{self, Stream, StreamExt};
use log::debug;
use reqwest::Client;
use std::sync::Arc;
use url::Url;

use crate::error::{Error, Result, SegmentError};
use crate::key::KeyDirective;

const AES_BLOCK_SIZE: usize = 16;

/// 当前生效的密钥和显式IV
#[derive(Debug, Clone, Default)]
pub struct CryptoState {
    pub key: Option<[u8; 16]>,
    pub iv: Option<[u8; 16]>,
}

/// 持有当前密钥状态，按需下载密钥，并为分段生成解密流
pub struct CryptoContext {
    client: Client,
    key_override: Option<[u8; 16]>,
    directive: Arc<KeyDirective>,
    fetched: Option<(Url, [u8; 16])>,
    state: CryptoState,
}

impl CryptoContext {
    pub fn new(client: Client, key_override: Option<[u8; 16]>) -> Self {
        Self {
            client,
            key_override,
            directive: Arc::new(KeyDirective::None),
            fetched: None,
            state: CryptoState::default(),
        }
    }

    pub fn state(&self) -> &CryptoState {
        &self.state
    }

    /// 切换到新的加密指令；同一个密钥URI只下载一次
    pub async fn activate(&mut self, directive: &Arc<KeyDirective>) -> Result<()> {
        if Arc::ptr_eq(&self.directive, directive) || self.directive == *directive {
            return Ok(());
        }

        self.state = match directive.as_ref() {
            KeyDirective::None => CryptoState::default(),
            KeyDirective::Aes128 { uri, iv } => CryptoState {
                key: Some(self.key_for(uri).await?),
                iv: *iv,
            },
        };
        self.directive = directive.clone();
        Ok(())
    }

    async fn key_for(&mut self, uri: &Url) -> Result<[u8; 16]> {
        if let Some(key) = self.key_override {
            return Ok(key);
        }
        if let Some((fetched_uri, key)) = &self.fetched {
            if fetched_uri == uri {
                return Ok(*key);
            }
        }

        debug!("Fetching key from {}", uri);
        let fail = |source| Error::KeyFetch {
            url: uri.clone(),
            source,
        };
        let body = self
            .client
            .get(uri.clone())
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(fail)?
            .bytes()
            .await
            .map_err(fail)?;

        let key: [u8; 16] = body[..]
            .try_into()
            .map_err(|_| Error::InvalidKeyLength {
                url: uri.clone(),
                len: body.len(),
            })?;
        self.fetched = Some((uri.clone(), key));
        Ok(key)
    }

    /// 为指定序号的分段创建解密器；未加密时原样输出
    pub fn transform(&self, sequence: usize) -> Transform {
        match self.state.key {
            Some(key) => {
                let iv = self.state.iv.unwrap_or_else(|| sequence_iv(sequence));
                Transform::Aes128Cbc(CbcStream::new(key, iv))
            }
            None => Transform::Identity,
        }
    }

    /// 包装分段的字节流，边接收边解密
    pub fn decrypt_stream<S, E>(
        &self,
        source: S,
        sequence: usize,
    ) -> impl Stream<Item = Result<Bytes, SegmentError>>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: Into<SegmentError>,
    {
        decrypt_stream(source, self.transform(sequence))
    }
}

/// 没有显式IV时使用分段序号的16字节大端表示
pub fn sequence_iv(sequence: usize) -> [u8; 16] {
    (sequence as u128).to_be_bytes()
}

pub enum Transform {
    Identity,
    Aes128Cbc(CbcStream),
}

impl Transform {
    pub fn update(&mut self, chunk: Bytes) -> Result<Bytes, SegmentError> {
        match self {
            Transform::Identity => Ok(chunk),
            Transform::Aes128Cbc(cbc) => cbc.update(&chunk),
        }
    }

    pub fn finish(self) -> Result<Bytes, SegmentError> {
        match self {
            Transform::Identity => Ok(Bytes::new()),
            Transform::Aes128Cbc(cbc) => cbc.finish(),
        }
    }
}

pub fn decrypt_stream<S, E>(
    source: S,
    transform: Transform,
) -> impl Stream<Item = Result<Bytes, SegmentError>>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Into<SegmentError>,
{
    let source = Box::pin(source);
    stream::unfold(Some((source, transform)), |state| async move {
        let (mut source, mut transform) = state?;
        match source.next().await {
            Some(Ok(chunk)) => {
                let item = transform.update(chunk);
                let next = item.is_ok().then_some((source, transform));
                Some((item, next))
            }
            Some(Err(e)) => Some((Err(e.into()), None)),
            None => Some((transform.finish(), None)),
        }
    })
    .filter(|item| futures::future::ready(!matches!(item, Ok(b) if b.is_empty())))
}

/// AES-128-CBC 流式解密，始终保留最后一个完整块直到流结束以便去除PKCS7填充
pub struct CbcStream {
    key: [u8; 16],
    iv: [u8; 16],
    pending: BytesMut,
}

impl CbcStream {
    pub fn new(key: [u8; 16], iv: [u8; 16]) -> Self {
        Self {
            key,
            iv,
            pending: BytesMut::new(),
        }
    }

    pub fn update(&mut self, chunk: &[u8]) -> Result<Bytes, SegmentError> {
        self.pending.extend_from_slice(chunk);

        let ready = (self.pending.len().saturating_sub(1) / AES_BLOCK_SIZE) * AES_BLOCK_SIZE;
        if ready == 0 {
            return Ok(Bytes::new());
        }

        let mut out = self.pending.split_to(ready);
        let mut next_iv = [0u8; AES_BLOCK_SIZE];
        next_iv.copy_from_slice(&out[ready - AES_BLOCK_SIZE..]);

        Decryptor::<Aes128>::new((&self.key).into(), (&self.iv).into())
            .decrypt_padded_mut::<NoPadding>(&mut out[..])
            .map_err(|e| SegmentError::Decrypt(format!("CBC decrypt failed: {}", e)))?;
        self.iv = next_iv;

        Ok(out.freeze())
    }

    pub fn finish(mut self) -> Result<Bytes, SegmentError> {
        if self.pending.is_empty() {
            return Ok(Bytes::new());
        }
        if self.pending.len() % AES_BLOCK_SIZE != 0 {
            return Err(SegmentError::Decrypt(format!(
                "ciphertext has {} trailing bytes, not aligned to AES block size",
                self.pending.len() % AES_BLOCK_SIZE
            )));
        }

        let len = Decryptor::<Aes128>::new((&self.key).into(), (&self.iv).into())
            .decrypt_padded_mut::<Pkcs7>(&mut self.pending[..])
            .map_err(|e| SegmentError::Decrypt(format!("PKCS7 unpad failed: {}", e)))?
            .len();
        self.pending.truncate(len);

        Ok(self.pending.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cbc::cipher::BlockEncryptMut;
    use cbc::Encryptor;

    fn encrypt(plaintext: &[u8], key: &[u8; 16], iv: &[u8; 16]) -> Vec<u8> {
        let encryptor = Encryptor::<Aes128>::new(key.into(), iv.into());
        let padded_len = plaintext.len() + (AES_BLOCK_SIZE - plaintext.len() % AES_BLOCK_SIZE);
        let mut buf = vec![0u8; padded_len];
        buf[..plaintext.len()].copy_from_slice(plaintext);
        encryptor
            .encrypt_padded_mut::<Pkcs7>(&mut buf, plaintext.len())
            .unwrap()
            .to_vec()
    }

    fn decrypt_in_chunks(ciphertext: &[u8], key: [u8; 16], iv: [u8; 16], chunk: usize) -> Vec<u8> {
        let mut cbc = CbcStream::new(key, iv);
        let mut out = Vec::new();
        for piece in ciphertext.chunks(chunk) {
            out.extend_from_slice(&cbc.update(piece).unwrap());
        }
        out.extend_from_slice(&cbc.finish().unwrap());
        out
    }

    #[test]
    fn chunked_decrypt_matches_plaintext() {
        let key = [0x42u8; 16];
        let iv = sequence_iv(7);
        let plaintext: Vec<u8> = (0..1000).map(|i| (i % 251) as u8).collect();
        let ciphertext = encrypt(&plaintext, &key, &iv);

        for chunk in [1, 7, 15, 16, 17, 64, 1000, 4096] {
            assert_eq!(
                decrypt_in_chunks(&ciphertext, key, iv, chunk),
                plaintext,
                "chunk size {}",
                chunk
            );
        }
    }

    #[test]
    fn block_aligned_plaintext_strips_full_padding_block() {
        let key = [0xAAu8; 16];
        let iv = [0xBBu8; 16];
        let plaintext = [0x55u8; 32];
        let ciphertext = encrypt(&plaintext, &key, &iv);
        assert_eq!(ciphertext.len(), 48);

        assert_eq!(decrypt_in_chunks(&ciphertext, key, iv, 16), plaintext);
    }

    #[test]
    fn unaligned_ciphertext_fails() {
        let mut cbc = CbcStream::new([0u8; 16], [0u8; 16]);
        cbc.update(&[0u8; 20]).unwrap();
        assert!(matches!(cbc.finish(), Err(SegmentError::Decrypt(_))));
    }

    #[test]
    fn invalid_padding_fails() {
        let key = [1u8; 16];
        let iv = [0u8; 16];
        // 明文最后一个字节为0，不是合法的PKCS7填充
        let mut block = [0u8; 16];
        Encryptor::<Aes128>::new((&key).into(), (&iv).into())
            .encrypt_padded_mut::<NoPadding>(&mut block, 16)
            .unwrap();

        let mut cbc = CbcStream::new(key, iv);
        cbc.update(&block).unwrap();
        assert!(matches!(cbc.finish(), Err(SegmentError::Decrypt(_))));
    }

    #[test]
    fn sequence_iv_is_big_endian() {
        let iv = sequence_iv(0x0102);
        assert_eq!(&iv[..14], &[0u8; 14]);
        assert_eq!(&iv[14..], &[0x01, 0x02]);
    }

    #[tokio::test]
    async fn decrypt_stream_round_trip() {
        let key = [0x13u8; 16];
        let iv = sequence_iv(3);
        let plaintext: Vec<u8> = (0..300).map(|i| i as u8).collect();
        let ciphertext = encrypt(&plaintext, &key, &iv);

        let chunks: Vec<Result<Bytes, SegmentError>> = ciphertext
            .chunks(50)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        let transform = Transform::Aes128Cbc(CbcStream::new(key, iv));
        let out: Vec<Bytes> = decrypt_stream(stream::iter(chunks), transform)
            .map(|r| r.unwrap())
            .collect()
            .await;

        assert_eq!(out.concat(), plaintext);
    }

    #[tokio::test]
    async fn identity_stream_passes_bytes_through() {
        let chunks: Vec<Result<Bytes, SegmentError>> =
            vec![Ok(Bytes::from_static(b"abc")), Ok(Bytes::from_static(b"def"))];
        let out: Vec<Bytes> = decrypt_stream(stream::iter(chunks), Transform::Identity)
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(out, vec![Bytes::from_static(b"abc"), Bytes::from_static(b"def")]);
    }

    #[tokio::test]
    async fn source_error_ends_stream() {
        let chunks: Vec<Result<Bytes, SegmentError>> = vec![
            Ok(Bytes::from_static(b"abc")),
            Err(SegmentError::Decrypt("boom".into())),
            Ok(Bytes::from_static(b"never")),
        ];
        let out: Vec<_> = decrypt_stream(stream::iter(chunks), Transform::Identity)
            .collect()
            .await;
        assert_eq!(out.len(), 2);
        assert!(out[1].is_err());
    }

    #[tokio::test]
    async fn none_directive_yields_identity() {
        let mut ctx = CryptoContext::new(Client::new(), None);
        ctx.activate(&Arc::new(KeyDirective::None)).await.unwrap();
        assert!(ctx.state().key.is_none());
        assert!(matches!(ctx.transform(0), Transform::Identity));
    }

    #[tokio::test]
    async fn key_override_skips_fetch() {
        let mut ctx = CryptoContext::new(Client::new(), Some([9u8; 16]));
        let directive = Arc::new(KeyDirective::Aes128 {
            // 不可达的地址，覆盖密钥时不应发起请求
            uri: Url::parse("http://127.0.0.1:1/key").unwrap(),
            iv: None,
        });
        ctx.activate(&directive).await.unwrap();
        assert_eq!(ctx.state().key, Some([9u8; 16]));
        assert!(matches!(ctx.transform(5), Transform::Aes128Cbc(_)));
    }
}
