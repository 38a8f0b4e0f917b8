//! 客戶端設定
//!
//! 以 JSON 儲存的連線設定；所有欄位都有預設值，設定檔只需寫要覆寫的部分。

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::encoding::{Codepage, EncodingError};

/// 設定錯誤
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("讀取設定檔失敗: {0}")]
    Io(#[from] std::io::Error),

    #[error("設定檔格式錯誤: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Encoding(#[from] EncodingError),
}

/// 連線與引擎設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    /// 伺服器字碼頁（WHATWG 標籤）
    pub encoding: String,
    /// 連線逾時（秒）
    pub connect_timeout_secs: u64,
    /// 讀取緩衝區大小
    pub read_buffer_size: usize,
    /// 新回合觸發器延遲（毫秒），讓同時抵達的狀態更新先處理完
    pub round_delay_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 4000,
            encoding: "windows-1251".to_string(),
            connect_timeout_secs: 30,
            read_buffer_size: 8192,
            round_delay_ms: 10,
        }
    }
}

impl ClientConfig {
    /// 從 JSON 檔載入
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// 從 JSON 字串解析，並檢查字碼頁
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.codepage()?;
        Ok(config)
    }

    /// 儲存為 JSON 檔
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn codepage(&self) -> Result<Codepage, ConfigError> {
        Ok(Codepage::for_label(&self.encoding)?)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn round_delay(&self) -> Duration {
        Duration::from_millis(self.round_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = ClientConfig::default();
        assert_eq!(config.connect_timeout(), Duration::from_secs(30));
        assert_eq!(config.read_buffer_size, 8192);
        assert_eq!(config.codepage().unwrap().name(), "windows-1251");
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = ClientConfig::from_json(r#"{ "host": "mud.example.org", "port": 6666 }"#).unwrap();
        assert_eq!(config.host, "mud.example.org");
        assert_eq!(config.port, 6666);
        assert_eq!(config.round_delay(), Duration::from_millis(10));
    }

    #[test]
    fn test_bad_encoding_is_rejected() {
        let result = ClientConfig::from_json(r#"{ "encoding": "utf-8" }"#);
        assert!(matches!(result, Err(ConfigError::Encoding(_))));
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir().join("mudengine_config_test.json");
        let config = ClientConfig {
            host: "example.net".to_string(),
            encoding: "koi8-r".to_string(),
            ..Default::default()
        };
        config.save(&path).unwrap();
        let loaded = ClientConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
        let _ = fs::remove_file(&path);
    }
}
