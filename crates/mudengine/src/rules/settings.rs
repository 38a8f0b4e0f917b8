//! 規則群組設定
//!
//! 群組的啟用狀態由外部設定保存；引擎只透過 [`GroupSettings`] 查詢與註冊。

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::{PoisonError, RwLock};

use thiserror::Error;
use tracing::debug;

/// 群組設定存取介面
pub trait GroupSettings: Send + Sync {
    /// 群組是否啟用；未註冊的群組視為啟用
    fn is_group_active(&self, group: &str) -> bool;

    /// 註冊群組（重複註冊不影響既有狀態）
    fn register_group(&self, group: &str);

    fn set_group_active(&self, group: &str, active: bool);
}

/// 設定檔錯誤
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("讀取群組設定失敗: {0}")]
    Io(#[from] std::io::Error),

    #[error("群組設定格式錯誤: {0}")]
    Json(#[from] serde_json::Error),
}

/// 記憶體中的群組設定，可存成 JSON（群組名稱 → 是否啟用）
#[derive(Debug, Default)]
pub struct MemorySettings {
    groups: RwLock<BTreeMap<String, bool>>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self, SettingsError> {
        let groups: BTreeMap<String, bool> = serde_json::from_str(json)?;
        Ok(Self {
            groups: RwLock::new(groups),
        })
    }

    pub fn to_json(&self) -> Result<String, SettingsError> {
        Ok(serde_json::to_string_pretty(&self.groups())?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        Self::from_json(&fs::read_to_string(path)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), SettingsError> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// 目前所有群組與狀態
    pub fn groups(&self) -> BTreeMap<String, bool> {
        self.groups.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl GroupSettings for MemorySettings {
    fn is_group_active(&self, group: &str) -> bool {
        self.groups
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(group)
            .copied()
            .unwrap_or(true)
    }

    fn register_group(&self, group: &str) {
        let mut groups = self.groups.write().unwrap_or_else(PoisonError::into_inner);
        if !groups.contains_key(group) {
            debug!("註冊群組: {}", group);
            groups.insert(group.to_string(), true);
        }
    }

    fn set_group_active(&self, group: &str, active: bool) {
        self.groups
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(group.to_string(), active);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_is_idempotent() {
        let settings = MemorySettings::new();
        settings.register_group("combat");
        settings.set_group_active("combat", false);
        settings.register_group("combat");
        assert!(!settings.is_group_active("combat"));
        assert!(settings.is_group_active("unknown"));
    }

    #[test]
    fn test_json_round_trip() {
        let settings = MemorySettings::new();
        settings.register_group("travel");
        settings.set_group_active("combat", false);

        let restored = MemorySettings::from_json(&settings.to_json().unwrap()).unwrap();
        assert_eq!(restored.groups(), settings.groups());
        assert!(!restored.is_group_active("combat"));
    }

    #[test]
    fn test_bad_json() {
        assert!(matches!(MemorySettings::from_json("[1, 2]"), Err(SettingsError::Json(_))));
    }
}
