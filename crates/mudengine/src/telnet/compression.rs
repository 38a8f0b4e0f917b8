//! 壓縮切換
//!
//! 收到壓縮起始標記後，讀取迴圈之後所有位元組都改由 zlib 解壓縮串流提供。
//! 此切換是單向、一次性的，連線期間不會恢復成原始資料流。

use flate2::{Decompress, FlushDecompress, Status};
use thiserror::Error;
use tracing::{debug, warn};

const INFLATE_BLOCK: usize = 8192;

/// 解壓縮錯誤
#[derive(Debug, Error)]
pub enum CompressionError {
    #[error("解壓縮失敗: {0}")]
    Inflate(#[from] flate2::DecompressError),

    #[error("伺服器結束了壓縮串流")]
    StreamEnded,
}

/// 讀取迴圈的位元組來源
#[derive(Debug, Default)]
pub enum ByteSource {
    /// 原始 socket 資料
    #[default]
    Raw,
    /// 包在 socket 外層的 zlib 解壓縮串流
    Inflate(Box<Decompress>),
}

impl ByteSource {
    /// 是否已切換為解壓縮
    pub fn is_compressed(&self) -> bool {
        matches!(self, Self::Inflate(_))
    }

    /// 切換為解壓縮來源；重複呼叫無效
    pub fn activate(&mut self) {
        if self.is_compressed() {
            return;
        }
        debug!("位元組來源切換為 zlib 解壓縮");
        *self = Self::Inflate(Box::new(Decompress::new(true)));
    }

    /// 將從 socket 讀到的位元組轉為協定層位元組，附加到 `out`
    pub fn pump(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<(), CompressionError> {
        let inflater = match self {
            Self::Raw => {
                out.extend_from_slice(input);
                return Ok(());
            }
            Self::Inflate(inflater) => inflater,
        };

        let mut block = [0u8; INFLATE_BLOCK];
        let mut consumed = 0usize;
        loop {
            let before_in = inflater.total_in();
            let before_out = inflater.total_out();
            let status = inflater.decompress(&input[consumed..], &mut block, FlushDecompress::None)?;
            let read = (inflater.total_in() - before_in) as usize;
            let written = (inflater.total_out() - before_out) as usize;
            consumed += read;
            out.extend_from_slice(&block[..written]);

            match status {
                Status::StreamEnd => {
                    warn!("壓縮串流已結束，剩餘 {} 位元組無法處理", input.len() - consumed);
                    return Err(CompressionError::StreamEnded);
                }
                Status::Ok | Status::BufError => {
                    // 輸出區塊未填滿代表目前輸入已全部解完
                    if written < block.len() && consumed >= input.len() {
                        return Ok(());
                    }
                    if read == 0 && written == 0 {
                        return Ok(());
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn deflate_flushed(parts: &[&[u8]]) -> Vec<Vec<u8>> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        let mut chunks = Vec::new();
        for part in parts {
            encoder.write_all(part).unwrap();
            encoder.flush().unwrap();
            chunks.push(std::mem::take(encoder.get_mut()));
        }
        chunks
    }

    #[test]
    fn test_raw_passthrough() {
        let mut source = ByteSource::default();
        let mut out = Vec::new();
        source.pump(b"abc", &mut out).unwrap();
        assert_eq!(out, b"abc");
        assert!(!source.is_compressed());
    }

    #[test]
    fn test_inflate_across_reads() {
        let chunks = deflate_flushed(&[b"first line\r\n", b"second line\r\n"]);
        let mut source = ByteSource::default();
        source.activate();

        let mut out = Vec::new();
        source.pump(&chunks[0], &mut out).unwrap();
        assert_eq!(out, b"first line\r\n");

        out.clear();
        source.pump(&chunks[1], &mut out).unwrap();
        assert_eq!(out, b"second line\r\n");
    }

    #[test]
    fn test_inflate_byte_by_byte() {
        let chunks = deflate_flushed(&[b"hello world"]);
        let mut source = ByteSource::default();
        source.activate();

        let mut out = Vec::new();
        for b in &chunks[0] {
            source.pump(std::slice::from_ref(b), &mut out).unwrap();
        }
        assert_eq!(out, b"hello world");
    }

    #[test]
    fn test_activate_is_one_time() {
        let chunks = deflate_flushed(&[b"abc", b"def"]);
        let mut source = ByteSource::default();
        source.activate();
        let mut out = Vec::new();
        source.pump(&chunks[0], &mut out).unwrap();
        // 再次 activate 不可重建解壓縮器
        source.activate();
        source.pump(&chunks[1], &mut out).unwrap();
        assert_eq!(out, b"abcdef");
    }

    #[test]
    fn test_garbage_is_error() {
        let mut source = ByteSource::default();
        source.activate();
        let mut out = Vec::new();
        let result = source.pump(&[0x00, 0x01, 0x02, 0x03, 0x04], &mut out);
        assert!(matches!(result, Err(CompressionError::Inflate(_))));
    }
}
