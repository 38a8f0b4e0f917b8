//! 單位元組字碼頁編解碼模組
//!
//! 伺服器文字固定使用單位元組的舊式字碼頁（預設 windows-1251），
//! 0xFF 在此類字碼頁中是可顯示字元，因此會與 Telnet IAC 衝突。

use encoding_rs::{Encoding, WINDOWS_1251};
use thiserror::Error;

/// 字碼頁錯誤
#[derive(Debug, Error)]
pub enum EncodingError {
    #[error("未知的編碼: {0}")]
    Unknown(String),

    #[error("不是單位元組編碼: {0}")]
    NotSingleByte(String),
}

/// 單位元組字碼頁
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Codepage {
    encoding: &'static Encoding,
}

impl Codepage {
    /// 從 WHATWG 標籤建立字碼頁（例如 `"windows-1251"`、`"koi8-r"`）
    ///
    /// # Example
    /// ```
    /// use mudengine::encoding::Codepage;
    ///
    /// let cp = Codepage::for_label("koi8-r").unwrap();
    /// assert_eq!(cp.name(), "KOI8-R");
    /// ```
    pub fn for_label(label: &str) -> Result<Self, EncodingError> {
        let encoding = Encoding::for_label(label.as_bytes())
            .ok_or_else(|| EncodingError::Unknown(label.to_string()))?;
        if !encoding.is_single_byte() {
            return Err(EncodingError::NotSingleByte(encoding.name().to_string()));
        }
        Ok(Self { encoding })
    }

    /// 編碼名稱
    pub fn name(&self) -> &'static str {
        self.encoding.name()
    }

    /// 將伺服器位元組解碼為 UTF-8 字串
    pub fn decode(&self, bytes: &[u8]) -> String {
        let (decoded, _) = self.encoding.decode_without_bom_handling(bytes);
        decoded.into_owned()
    }

    /// 將 UTF-8 字串編碼為伺服器位元組（無法編碼的字元以 HTML 實體替換）
    pub fn encode(&self, text: &str) -> Vec<u8> {
        let (encoded, _, _) = self.encoding.encode(text);
        encoded.into_owned()
    }
}

impl Default for Codepage {
    fn default() -> Self {
        Self {
            encoding: WINDOWS_1251,
        }
    }
}
